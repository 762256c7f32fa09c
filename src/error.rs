use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("{allocator} allocator out of memory ({requested} bytes requested)")]
    OutOfMemory {
        allocator: &'static str,
        requested: usize,
    },

    #[error("heap corruption: {0}")]
    Corruption(&'static str),

    #[error("allocation tag 0 is reserved for free blocks")]
    ReservedTag,

    #[error("invalid allocation size: {0}")]
    InvalidSize(&'static str),

    #[error("cache user already holds a block")]
    AlreadyCached,

    #[error("cache user holds no block")]
    NotCached,

    #[error("{0:?}: not a pack file")]
    InvalidMagic(PathBuf),

    #[error("{path:?}: {count} entries exceeds the pack entry cap")]
    TooManyEntries { path: PathBuf, count: usize },

    #[error("out of file handles")]
    OutOfFileHandles,

    #[error("file handle {0} is not open")]
    BadFileHandle(usize),

    #[error("console variable table is full")]
    CvarTableFull,

    #[error("host is not little-endian")]
    BigEndianHost,

    #[error("configuration error: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
