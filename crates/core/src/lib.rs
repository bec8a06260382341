//! Capsy Core - Content-addressed snapshot engine
//!
//! This crate provides the storage and snapshot layer behind the `capsy` CLI:
//! - BLAKE3 digests over blob and tree content
//! - Blob storage with compression and atomic writes
//! - Merkle trees (one `Tree` object per directory level)
//! - Working-tree scanning and the staging index
//! - Append-only snapshot graph with linear history
//! - The `Repository` coordinator tying it all together

pub mod blob;
pub mod error;
pub mod hash;
pub mod index;
pub mod repo;
pub mod scan;
pub mod snapshot;
pub mod store;
pub mod tree;

// Re-export main types for convenience
pub use blob::{Blob, BlobStore};
pub use error::{Error, Result};
pub use hash::{hash_bytes, hash_file, Digest};
pub use index::Index;
pub use repo::{Repository, StatusReport};
pub use scan::{scan, ScanEntry, ScanKind};
pub use snapshot::{Snapshot, SnapshotGraph};
pub use store::Store;
pub use tree::{EntryKind, Tree, TreeEntry};

/// Repository format version written to and validated against `config.toml`
pub const FORMAT_VERSION: i64 = 1;
