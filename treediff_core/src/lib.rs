pub mod align;
pub mod builder;
pub mod compare;
pub mod content;
pub mod node;
pub mod snapshot;

pub use align::{AlignmentAnalyser, FrequencyCounter};
pub use builder::{LocalTreeBuilder, ZipTreeBuilder};
pub use compare::{CompareOptions, ComparisonDirNode, LeafComparisonResult, TreeComparator};
pub use content::{compare_content, select_method, ContentMethod, Cost};
pub use node::{truncate_to_millis, ContentSource, DirNode, FileKind, Leaf};
pub use snapshot::{
    is_snapshot, read_snapshot, CaptureInfo, DigestKind, SnapshotInfo, SnapshotWriter,
};
