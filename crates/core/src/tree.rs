//! Merkle tree objects: one `Tree` per directory level
//!
//! Directory entries reference child Tree digests, so the whole working tree
//! is a DAG rooted at a single digest. Content addressing makes cycles
//! impossible by construction.

use crate::error::{Error, Result};
use crate::hash::{hash_bytes, Digest};
use std::collections::BTreeMap;

/// Kind of tree entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Regular file; digest references a blob
    File,
    /// Directory; digest references a child Tree
    Dir,
    /// Symbolic link; digest references a blob holding the target path
    Symlink,
}

impl EntryKind {
    fn to_byte(self) -> u8 {
        match self {
            EntryKind::File => 0,
            EntryKind::Dir => 1,
            EntryKind::Symlink => 2,
        }
    }

    fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(EntryKind::File),
            1 => Ok(EntryKind::Dir),
            2 => Ok(EntryKind::Symlink),
            _ => Err(Error::CorruptRepository(format!(
                "invalid tree entry kind: {byte}"
            ))),
        }
    }
}

/// Entry in a tree: one file, subdirectory, or symlink at this level
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub kind: EntryKind,
    /// Unix permission bits
    pub mode: u32,
    /// Blob digest for files/symlinks, child Tree digest for directories
    pub digest: Digest,
}

impl TreeEntry {
    pub fn file(mode: u32, digest: Digest) -> Self {
        Self {
            kind: EntryKind::File,
            mode,
            digest,
        }
    }

    pub fn dir(digest: Digest) -> Self {
        Self {
            kind: EntryKind::Dir,
            mode: 0o040000,
            digest,
        }
    }

    pub fn symlink(digest: Digest) -> Self {
        Self {
            kind: EntryKind::Symlink,
            mode: 0o120000,
            digest,
        }
    }
}

/// One directory level: an ordered mapping of entry name to `TreeEntry`
///
/// Entries are kept sorted by name so that serialization, and therefore the
/// tree digest, is deterministic for a given directory state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tree {
    entries: BTreeMap<String, TreeEntry>,
}

impl Tree {
    /// TreeV1 magic
    const MAGIC: &'static [u8] = b"CPT1";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, entry: TreeEntry) {
        self.entries.insert(name.into(), entry);
    }

    pub fn get(&self, name: &str) -> Option<&TreeEntry> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &TreeEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Serialize the tree (TreeV1 format)
    ///
    /// Format:
    /// - magic: "CPT1" (4 bytes)
    /// - entry_count: u32 LE
    /// - entries (sorted by name):
    ///   - name_len: u16 LE
    ///   - name_bytes: [u8; name_len]
    ///   - kind: u8 (0=file, 1=dir, 2=symlink)
    ///   - mode: u32 LE
    ///   - digest: [u8; 32]
    pub fn serialize(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(Self::MAGIC);
        bytes.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());

        for (name, entry) in &self.entries {
            let name_bytes = name.as_bytes();
            bytes.extend_from_slice(&(name_bytes.len() as u16).to_le_bytes());
            bytes.extend_from_slice(name_bytes);
            bytes.push(entry.kind.to_byte());
            bytes.extend_from_slice(&entry.mode.to_le_bytes());
            bytes.extend_from_slice(entry.digest.as_bytes());
        }

        bytes
    }

    /// Deserialize a tree (TreeV1 format)
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 8 {
            return Err(Error::CorruptRepository("tree data too short".into()));
        }

        if &bytes[0..4] != Self::MAGIC {
            return Err(Error::CorruptRepository("invalid tree magic".into()));
        }

        let entry_count = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;

        let mut entries = BTreeMap::new();
        let mut offset = 8;

        for _ in 0..entry_count {
            if offset + 2 > bytes.len() {
                return Err(Error::CorruptRepository("incomplete tree entry".into()));
            }

            let name_len = u16::from_le_bytes([bytes[offset], bytes[offset + 1]]) as usize;
            offset += 2;

            if offset + name_len > bytes.len() {
                return Err(Error::CorruptRepository("tree entry name overruns data".into()));
            }

            let name = std::str::from_utf8(&bytes[offset..offset + name_len])
                .map_err(|_| Error::CorruptRepository("tree entry name is not UTF-8".into()))?
                .to_string();
            offset += name_len;

            if offset + 1 + 4 + 32 > bytes.len() {
                return Err(Error::CorruptRepository(
                    "incomplete tree entry metadata".into(),
                ));
            }

            let kind = EntryKind::from_byte(bytes[offset])?;
            offset += 1;

            let mode = u32::from_le_bytes([
                bytes[offset],
                bytes[offset + 1],
                bytes[offset + 2],
                bytes[offset + 3],
            ]);
            offset += 4;

            let mut digest_bytes = [0u8; 32];
            digest_bytes.copy_from_slice(&bytes[offset..offset + 32]);
            offset += 32;

            entries.insert(
                name,
                TreeEntry {
                    kind,
                    mode,
                    digest: Digest::from_bytes(digest_bytes),
                },
            );
        }

        Ok(Self { entries })
    }

    /// Compute the digest of this tree (BLAKE3 of the canonical encoding)
    pub fn digest(&self) -> Digest {
        hash_bytes(&self.serialize())
    }
}
