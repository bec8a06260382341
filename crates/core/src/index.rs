//! Staging index: what the next capture will contain
//!
//! Keeps a cheap fingerprint (size + mtime + mode) per path so unchanged
//! files are not rehashed between captures. The fingerprint is purely an
//! optimization: a missing or stale index only costs rehashing, never
//! correctness.

use crate::error::{Error, Result};
use crate::hash::{self, Digest};
use crate::scan::{ScanEntry, ScanKind};
use crate::store::{atomic_write, Store};
use crate::tree::{EntryKind, Tree, TreeEntry};
use ahash::{AHashMap, AHashSet};
use smallvec::SmallVec;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// One indexed path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub digest: Digest,
    pub kind: EntryKind,
    pub mode: u32,
    /// Fingerprint: size in bytes
    pub size: u64,
    /// Fingerprint: modification time, Unix milliseconds
    pub mtime_ms: u64,
}

/// Convert a relative path to the index key representation
fn path_to_key(path: &Path) -> SmallVec<[u8; 64]> {
    let path_str = path.to_string_lossy();
    SmallVec::from_slice(path_str.as_bytes())
}

/// Mutable record of the working tree as of the last capture
///
/// Uses AHashMap (faster for small keys) and SmallVec (stack allocation for
/// short paths), persisted at `.capsy/state/index.bin`.
#[derive(Debug, Clone, Default)]
pub struct Index {
    entries: AHashMap<SmallVec<[u8; 64]>, IndexEntry>,
}

impl Index {
    const MAGIC: &'static [u8] = b"CIV1";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, path: &Path) -> Option<&IndexEntry> {
        self.entries.get(&path_to_key(path))
    }

    /// Iterate over all `(path bytes, entry)` pairs
    pub fn entries(&self) -> impl Iterator<Item = (&[u8], &IndexEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_slice(), v))
    }

    /// Reconcile the index against fresh scan results, ingesting new content
    ///
    /// Paths whose fingerprint is unchanged keep their recorded digest.
    /// Everything else is rehashed; new content is written to the object
    /// store as it is discovered. Returns the changed paths (added, modified,
    /// or removed), sorted.
    ///
    /// Any unreadable path aborts the whole update with `CaptureFailed`.
    pub fn update(
        &mut self,
        scans: &[ScanEntry],
        repo_root: &Path,
        store: &Store,
    ) -> Result<Vec<PathBuf>> {
        self.reconcile(scans, repo_root, Some(store))
    }

    /// Reconcile without touching the object store
    ///
    /// Same fingerprint-and-rehash pass as [`Index::update`], but content is
    /// only digested, never written. Used by read-only queries (status) so
    /// they cannot leave objects behind; ingestion waits for the capture.
    pub fn refresh(&mut self, scans: &[ScanEntry], repo_root: &Path) -> Result<Vec<PathBuf>> {
        self.reconcile(scans, repo_root, None)
    }

    fn reconcile(
        &mut self,
        scans: &[ScanEntry],
        repo_root: &Path,
        store: Option<&Store>,
    ) -> Result<Vec<PathBuf>> {
        let mut changed = Vec::new();

        // Removals: indexed paths no longer present on disk
        let scanned: AHashSet<SmallVec<[u8; 64]>> =
            scans.iter().map(|s| path_to_key(&s.path)).collect();
        let stale: Vec<SmallVec<[u8; 64]>> = self
            .entries
            .keys()
            .filter(|k| !scanned.contains(*k))
            .cloned()
            .collect();
        for key in stale {
            self.entries.remove(&key);
            if let Ok(path_str) = std::str::from_utf8(&key) {
                changed.push(PathBuf::from(path_str));
            }
        }

        for entry in scans {
            match entry.kind {
                ScanKind::File => self.reconcile_file(entry, repo_root, store, &mut changed)?,
                ScanKind::Symlink => {
                    self.reconcile_symlink(entry, repo_root, store, &mut changed)?
                }
            }
        }

        changed.sort();
        Ok(changed)
    }

    fn reconcile_file(
        &mut self,
        scanned: &ScanEntry,
        repo_root: &Path,
        store: Option<&Store>,
        changed: &mut Vec<PathBuf>,
    ) -> Result<()> {
        let key = path_to_key(&scanned.path);

        // Fast path: fingerprint unchanged, keep the recorded digest
        if let Some(prev) = self.entries.get(&key) {
            if prev.kind == EntryKind::File
                && prev.size == scanned.size
                && prev.mtime_ms == scanned.mtime_ms
                && prev.mode == scanned.mode
            {
                return Ok(());
            }
        }

        let abs = repo_root.join(&scanned.path);
        let digest =
            hash::hash_file(&abs).map_err(|e| capture_error(&scanned.path, e))?;

        if let Some(store) = store {
            if !store.blobs().has(digest) {
                let data =
                    std::fs::read(&abs).map_err(|e| Error::capture(scanned.path.clone(), e))?;
                let stored = store.blobs().put(&data)?;
                if stored != digest {
                    // Content moved under us between hashing and reading
                    return Err(Error::capture(
                        scanned.path.clone(),
                        std::io::Error::other("file modified during capture"),
                    ));
                }
            }
        }

        let unchanged = self
            .entries
            .get(&key)
            .is_some_and(|prev| {
                prev.kind == EntryKind::File && prev.digest == digest && prev.mode == scanned.mode
            });

        self.entries.insert(
            key,
            IndexEntry {
                digest,
                kind: EntryKind::File,
                mode: scanned.mode,
                size: scanned.size,
                mtime_ms: scanned.mtime_ms,
            },
        );

        if !unchanged {
            changed.push(scanned.path.clone());
        }
        Ok(())
    }

    fn reconcile_symlink(
        &mut self,
        scanned: &ScanEntry,
        repo_root: &Path,
        store: Option<&Store>,
        changed: &mut Vec<PathBuf>,
    ) -> Result<()> {
        let key = path_to_key(&scanned.path);
        let abs = repo_root.join(&scanned.path);

        // Target is the content; always cheap to re-read
        let target =
            std::fs::read_link(&abs).map_err(|e| Error::capture(scanned.path.clone(), e))?;
        let target_bytes = target.to_string_lossy();
        let digest = match store {
            Some(store) => store.blobs().put(target_bytes.as_bytes())?,
            None => crate::hash::hash_bytes(target_bytes.as_bytes()),
        };

        let unchanged = self
            .entries
            .get(&key)
            .is_some_and(|prev| prev.kind == EntryKind::Symlink && prev.digest == digest);

        self.entries.insert(
            key,
            IndexEntry {
                digest,
                kind: EntryKind::Symlink,
                mode: 0o120000,
                size: scanned.size,
                mtime_ms: scanned.mtime_ms,
            },
        );

        if !unchanged {
            changed.push(scanned.path.clone());
        }
        Ok(())
    }

    /// Assemble per-directory Tree objects bottom-up and return the root
    /// digest. Subtrees whose digest already exists in the store are not
    /// rewritten.
    pub fn build_tree(&self, store: &Store) -> Result<Digest> {
        let mut root = DirNode::default();

        for (key, entry) in &self.entries {
            let path = std::str::from_utf8(key)
                .map_err(|_| Error::CorruptRepository("non-UTF-8 path in index".into()))?;

            let components: Vec<&str> = path.split('/').collect();
            let (name, dirs) = components
                .split_last()
                .ok_or_else(|| Error::CorruptRepository("empty path in index".into()))?;

            let mut node = &mut root;
            for dir in dirs {
                node = node.dirs.entry((*dir).to_string()).or_default();
            }

            let tree_entry = match entry.kind {
                EntryKind::File => TreeEntry::file(entry.mode, entry.digest),
                EntryKind::Symlink => TreeEntry::symlink(entry.digest),
                EntryKind::Dir => {
                    return Err(Error::CorruptRepository(
                        "directory entry in flat index".into(),
                    ))
                }
            };
            node.files.insert((*name).to_string(), tree_entry);
        }

        write_node(&root, store)
    }

    /// Persist to `.capsy/state/index.bin` (IndexV1 format)
    ///
    /// Format:
    /// - magic: "CIV1" (4 bytes)
    /// - entry_count: u32 LE
    /// - entries (sorted by path):
    ///   - path_len: u16 LE, path_bytes
    ///   - kind: u8, mode: u32 LE, size: u64 LE, mtime_ms: u64 LE
    ///   - digest: [u8; 32]
    pub fn save(&self, capsy_dir: &Path) -> Result<()> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(Self::MAGIC);
        bytes.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());

        let mut sorted: Vec<_> = self.entries.iter().collect();
        sorted.sort_by(|(a, _), (b, _)| a.cmp(b));

        for (path_bytes, entry) in sorted {
            bytes.extend_from_slice(&(path_bytes.len() as u16).to_le_bytes());
            bytes.extend_from_slice(path_bytes);
            let kind_byte = match entry.kind {
                EntryKind::File => 0u8,
                EntryKind::Dir => 1u8,
                EntryKind::Symlink => 2u8,
            };
            bytes.push(kind_byte);
            bytes.extend_from_slice(&entry.mode.to_le_bytes());
            bytes.extend_from_slice(&entry.size.to_le_bytes());
            bytes.extend_from_slice(&entry.mtime_ms.to_le_bytes());
            bytes.extend_from_slice(entry.digest.as_bytes());
        }

        let target = capsy_dir.join("state").join("index.bin");
        let tmp_dir = capsy_dir.join("tmp").join("ingest");
        atomic_write(&tmp_dir, &target, &bytes)
    }

    /// Load from `.capsy/state/index.bin`
    ///
    /// Callers treat any error as "start from an empty index": the file is a
    /// cache, and a full rescan always reproduces it.
    pub fn load(capsy_dir: &Path) -> Result<Self> {
        let bytes = std::fs::read(capsy_dir.join("state").join("index.bin"))?;

        if bytes.len() < 8 || &bytes[0..4] != Self::MAGIC {
            return Err(Error::CorruptRepository("invalid index file".into()));
        }

        let entry_count = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;

        let mut entries = AHashMap::new();
        let mut offset = 8;

        for _ in 0..entry_count {
            if offset + 2 > bytes.len() {
                return Err(Error::CorruptRepository("truncated index entry".into()));
            }
            let path_len = u16::from_le_bytes([bytes[offset], bytes[offset + 1]]) as usize;
            offset += 2;

            if offset + path_len + 1 + 4 + 8 + 8 + 32 > bytes.len() {
                return Err(Error::CorruptRepository("truncated index entry".into()));
            }

            let path_bytes = SmallVec::from_slice(&bytes[offset..offset + path_len]);
            offset += path_len;

            let kind = match bytes[offset] {
                0 => EntryKind::File,
                1 => EntryKind::Dir,
                2 => EntryKind::Symlink,
                other => {
                    return Err(Error::CorruptRepository(format!(
                        "invalid index entry kind: {other}"
                    )))
                }
            };
            offset += 1;

            let mut mode_bytes = [0u8; 4];
            mode_bytes.copy_from_slice(&bytes[offset..offset + 4]);
            let mode = u32::from_le_bytes(mode_bytes);
            offset += 4;

            let mut size_bytes = [0u8; 8];
            size_bytes.copy_from_slice(&bytes[offset..offset + 8]);
            let size = u64::from_le_bytes(size_bytes);
            offset += 8;

            let mut mtime_bytes = [0u8; 8];
            mtime_bytes.copy_from_slice(&bytes[offset..offset + 8]);
            let mtime_ms = u64::from_le_bytes(mtime_bytes);
            offset += 8;

            let mut digest_bytes = [0u8; 32];
            digest_bytes.copy_from_slice(&bytes[offset..offset + 32]);
            offset += 32;

            entries.insert(
                path_bytes,
                IndexEntry {
                    digest: Digest::from_bytes(digest_bytes),
                    kind,
                    mode,
                    size,
                    mtime_ms,
                },
            );
        }

        Ok(Self { entries })
    }
}

/// Intermediate nested directory structure used while building trees
#[derive(Default)]
struct DirNode {
    files: BTreeMap<String, TreeEntry>,
    dirs: BTreeMap<String, DirNode>,
}

fn write_node(node: &DirNode, store: &Store) -> Result<Digest> {
    let mut tree = Tree::new();

    for (name, child) in &node.dirs {
        let child_digest = write_node(child, store)?;
        tree.insert(name.clone(), TreeEntry::dir(child_digest));
    }
    for (name, entry) in &node.files {
        tree.insert(name.clone(), entry.clone());
    }

    store.write_tree(&tree)
}

/// Map a generic hashing error onto `CaptureFailed` for the offending path
fn capture_error(path: &Path, err: Error) -> Error {
    match err {
        Error::Io(source) => Error::capture(path.to_path_buf(), source),
        other => other,
    }
}
