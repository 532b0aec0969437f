use thiserror::Error;

#[derive(Error, Debug)]
pub enum TreeDiffError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("duplicate entry name {name:?} in directory {dir:?}")]
    DuplicateName { dir: String, name: String },

    #[error("no comparable content method for {name:?}")]
    NoComparableMethod { name: String },

    #[error("snapshot error at line {line}, column {column}: {message}")]
    Snapshot {
        line: u64,
        column: u64,
        message: String,
    },

    #[error("unsupported digest {0:?}")]
    UnsupportedDigest(String),

    #[error("tree builder error: {0}")]
    Builder(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("comparison error: {0}")]
    Comparison(String),
}

pub type Result<T> = std::result::Result<T, TreeDiffError>;
