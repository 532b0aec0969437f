pub mod config;
pub mod error;
pub mod policy;

pub use config::{ensure_config, load_config, save_config, AppConfig, LoadedConfig};
pub use error::{Result, TreeDiffError};
pub use policy::{AbortPolicy, ContinuePolicy, ErrorPolicy};
