//! Builders that construct comparable trees from concrete sources.

mod archive;
mod local;

pub use archive::ZipTreeBuilder;
pub use local::LocalTreeBuilder;
