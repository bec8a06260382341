//! Repository coordinator
//!
//! Owns the store, the snapshot graph, and the staging index, and sequences
//! the capture/restore/status/history flows. The handle is passed explicitly
//! through all operations; there is no process-wide repository state.

use crate::error::{Error, Result};
use crate::hash::Digest;
use crate::index::Index;
use crate::scan::scan;
use crate::snapshot::{History, Snapshot, SnapshotGraph};
use crate::store::Store;
use crate::tree::EntryKind;
use ahash::AHashMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Changed paths relative to HEAD's root tree
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusReport {
    pub added: Vec<PathBuf>,
    pub modified: Vec<PathBuf>,
    pub removed: Vec<PathBuf>,
}

impl StatusReport {
    pub fn is_clean(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.added.len() + self.modified.len() + self.removed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.is_clean()
    }
}

/// Open repository handle
pub struct Repository {
    store: Store,
    graph: SnapshotGraph,
    index: Index,
}

impl Repository {
    /// Create a new repository rooted at `repo_root`
    pub fn init(repo_root: &Path) -> Result<Self> {
        let store = Store::init(repo_root)?;
        let graph = SnapshotGraph::open(store.capsy_dir())?;

        Ok(Self {
            store,
            graph,
            index: Index::new(),
        })
    }

    /// Open an existing repository
    ///
    /// A missing or unreadable index is not fatal; the next capture simply
    /// rehashes everything.
    pub fn open(repo_root: &Path) -> Result<Self> {
        let store = Store::open(repo_root)?;
        let graph = SnapshotGraph::open(store.capsy_dir())?;

        let index = match Index::load(store.capsy_dir()) {
            Ok(index) => index,
            Err(err) => {
                tracing::warn!(error = %err, "index unreadable, starting fresh");
                Index::new()
            }
        };

        Ok(Self {
            store,
            graph,
            index,
        })
    }

    /// Capture the current working tree as a new snapshot
    ///
    /// Scans, reconciles the index (writing new blobs), assembles the Merkle
    /// tree, and commits a snapshot whose parent is the current HEAD. Rejects
    /// with `NothingToCommit` when the root tree digest equals HEAD's.
    /// Any failure before the commit leaves HEAD untouched; orphan objects
    /// may remain but are harmless.
    pub fn capture(&mut self, message: &str) -> Result<Digest> {
        self.capture_with(message, false)
    }

    /// Capture with explicit control over the no-change check
    ///
    /// With `force`, a snapshot is committed even when the working tree
    /// matches HEAD: the root tree is shared, only the metadata is new. Used
    /// for marker snapshots (end-of-day entries, restore points before risky
    /// changes).
    pub fn capture_with(&mut self, message: &str, force: bool) -> Result<Digest> {
        let scans = scan(self.store.root(), self.store.ignore_prefixes())?;
        let changed = self.index.update(&scans, self.store.root(), &self.store)?;
        let root_tree = self.index.build_tree(&self.store)?;

        let head = self.store.head()?;
        if let Some(head_digest) = head {
            let head_snapshot = self.graph.get(head_digest)?;
            if head_snapshot.root_tree == root_tree && !force {
                return Err(Error::NothingToCommit);
            }
        }

        let snapshot = Snapshot::new(head, root_tree, now_ms(), message);
        let digest = self.graph.commit(&snapshot)?;
        self.store.set_head(digest)?;

        // The index is a cache; losing it only costs a rescan
        if let Err(err) = self.index.save(self.store.capsy_dir()) {
            tracing::warn!(error = %err, "failed to persist index");
        }

        tracing::info!(
            snapshot = %digest,
            files = self.index.len(),
            changed = changed.len(),
            "captured working tree"
        );

        Ok(digest)
    }

    /// Materialize a snapshot's content into `dest`, overwriting conflicting
    /// paths
    ///
    /// Not transactional: a failure mid-restore leaves the destination
    /// partially written. HEAD is not moved. A missing referenced object is
    /// `CorruptRepository` since committed snapshots must be fully backed.
    pub fn restore(&self, snapshot: Digest, dest: &Path) -> Result<()> {
        let snap = self.graph.get(snapshot)?;

        std::fs::create_dir_all(dest)?;
        self.materialize_tree(snap.root_tree, dest)?;

        tracing::info!(snapshot = %snapshot, dest = %dest.display(), "restored snapshot");
        Ok(())
    }

    fn materialize_tree(&self, tree_digest: Digest, dir: &Path) -> Result<()> {
        let tree = self
            .store
            .read_tree(tree_digest)
            .map_err(promote_missing)?;

        for (name, entry) in tree.iter() {
            let path = dir.join(name);
            match entry.kind {
                EntryKind::Dir => {
                    std::fs::create_dir_all(&path)?;
                    self.materialize_tree(entry.digest, &path)?;
                }
                EntryKind::File => {
                    let data = self
                        .store
                        .blobs()
                        .get(entry.digest)
                        .map_err(promote_missing)?;
                    std::fs::write(&path, data)?;
                    set_file_mode(&path, entry.mode)?;
                }
                EntryKind::Symlink => {
                    let target_bytes = self
                        .store
                        .blobs()
                        .get(entry.digest)
                        .map_err(promote_missing)?;
                    let target = String::from_utf8(target_bytes).map_err(|_| {
                        Error::CorruptRepository("symlink target is not UTF-8".into())
                    })?;
                    write_symlink(&target, &path)?;
                }
            }
        }
        Ok(())
    }

    /// Report working-tree changes against HEAD's root tree, without
    /// committing
    ///
    /// Reconciliation runs on a clone of the index so that capture
    /// fingerprints are not perturbed, and in hash-only mode so a status
    /// check never writes to the object store.
    pub fn status(&self) -> Result<StatusReport> {
        let scans = scan(self.store.root(), self.store.ignore_prefixes())?;

        let mut working = self.index.clone();
        working.refresh(&scans, self.store.root())?;

        let mut head_paths: AHashMap<PathBuf, (Digest, u32)> = AHashMap::new();
        if let Some(head_digest) = self.store.head()? {
            let head_snapshot = self.graph.get(head_digest)?;
            self.flatten_tree(head_snapshot.root_tree, Path::new(""), &mut head_paths)?;
        }

        let mut report = StatusReport::default();

        for (path_bytes, entry) in working.entries() {
            let path = match std::str::from_utf8(path_bytes) {
                Ok(s) => PathBuf::from(s),
                Err(_) => continue,
            };
            match head_paths.remove(&path) {
                None => report.added.push(path),
                Some((digest, mode)) => {
                    if digest != entry.digest || mode != entry.mode {
                        report.modified.push(path);
                    }
                }
            }
        }

        // Whatever is left in HEAD was not seen in the working tree
        report.removed.extend(head_paths.into_keys());

        report.added.sort();
        report.modified.sort();
        report.removed.sort();
        Ok(report)
    }

    fn flatten_tree(
        &self,
        tree_digest: Digest,
        prefix: &Path,
        out: &mut AHashMap<PathBuf, (Digest, u32)>,
    ) -> Result<()> {
        let tree = self
            .store
            .read_tree(tree_digest)
            .map_err(promote_missing)?;

        for (name, entry) in tree.iter() {
            let path = prefix.join(name);
            match entry.kind {
                EntryKind::Dir => self.flatten_tree(entry.digest, &path, out)?,
                EntryKind::File | EntryKind::Symlink => {
                    out.insert(path, (entry.digest, entry.mode));
                }
            }
        }
        Ok(())
    }

    /// Walk snapshot history newest-first, starting from `from` (default:
    /// HEAD). An empty iterator when the repository has no snapshots yet.
    pub fn history(&self, from: Option<Digest>) -> Result<Option<History<'_>>> {
        let start = match from {
            Some(digest) => Some(digest),
            None => self.store.head()?,
        };
        match start {
            Some(digest) => Ok(Some(self.graph.history(digest)?)),
            None => Ok(None),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn graph(&self) -> &SnapshotGraph {
        &self.graph
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A missing object referenced from a committed snapshot is an invariant
/// violation, not a lookup miss
fn promote_missing(err: Error) -> Error {
    match err {
        Error::NotFound(what) => {
            Error::CorruptRepository(format!("referenced object {what} is missing"))
        }
        other => other,
    }
}

fn set_file_mode(path: &Path, mode: u32) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode & 0o7777))?;
    }
    #[cfg(not(unix))]
    {
        let _ = (path, mode);
    }
    Ok(())
}

fn write_symlink(target: &str, path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        if path.symlink_metadata().is_ok() {
            std::fs::remove_file(path)?;
        }
        std::os::unix::fs::symlink(target, path)?;
        Ok(())
    }
    #[cfg(not(unix))]
    {
        // Fall back to a regular file holding the target path
        std::fs::write(path, target)?;
        Ok(())
    }
}
