// ─────────────────────────────────────────────────────────────────────────────
//  z2mflasher_core :: error
// ─────────────────────────────────────────────────────────────────────────────

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("object name '{path}' is {len} bytes, the layout allows at most {max}")]
    PathTooLong { path: String, len: usize, max: usize },

    #[error("object '{0}' was already added to the image")]
    DuplicatePath(String),

    #[error("image is full while placing '{path}' ({blocks} blocks of {block_size} bytes available)")]
    InsufficientSpace { path: String, blocks: usize, block_size: usize },

    #[error("invalid layout: {0}")]
    InvalidConfig(String),

    #[error("cannot parse layout file: {0}")]
    Layout(#[from] toml::de::Error),

    #[error("corrupt image: {0}")]
    Corrupt(String),

    #[error("cannot read {}: {source}", path.display())]
    Io { path: PathBuf, source: std::io::Error },
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
