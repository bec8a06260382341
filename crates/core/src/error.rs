//! Error taxonomy for repository operations
//!
//! Every failure surfaces to the caller; nothing is retried or swallowed.
//! The CLI maps each variant to a distinct process exit code.

use crate::hash::Digest;
use std::path::PathBuf;
use thiserror::Error;

/// Result type used throughout capsy-core
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A reference (digest, snapshot, or snapshot prefix) does not resolve
    /// in the store; carries a description of what was looked up
    #[error("object not found: {0}")]
    NotFound(String),

    /// `init` was called on a directory that already has a `.capsy`
    #[error("repository already initialized at {0}")]
    AlreadyInitialized(PathBuf),

    /// `open` was called outside any capsy repository
    #[error("not a capsy repository: no .capsy directory at {0}")]
    NotInitialized(PathBuf),

    /// Commit named a parent snapshot that does not exist
    #[error("invalid parent snapshot: {0}")]
    InvalidParent(Digest),

    /// Working tree is identical to HEAD's root tree
    #[error("nothing to commit: working tree matches HEAD")]
    NothingToCommit,

    /// I/O failure while scanning or digesting; aborts the whole capture
    #[error("capture failed at {path}: {source}")]
    CaptureFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A stored reference points at a missing or damaged object. Fatal,
    /// never auto-repaired.
    #[error("corrupt repository: {0}")]
    CorruptRepository(String),

    /// A digest string could not be parsed as 64 hex characters
    #[error("invalid digest: {0}")]
    InvalidDigest(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("snapshot database error: {0}")]
    Storage(#[from] sled::Error),

    #[error("snapshot encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),
}

impl Error {
    /// Wrap an I/O error that occurred while capturing `path`
    pub(crate) fn capture(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::CaptureFailed {
            path: path.into(),
            source,
        }
    }
}
