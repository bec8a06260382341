//! Snapshot graph: the append-only history of captures
//!
//! Snapshots are content-addressed: a snapshot's identity is the BLAKE3
//! digest of its canonical encoding, so identical metadata yields the same
//! identity. Records live in a sled database under `.capsy/snapshots/`; an
//! in-memory digest set answers parent-existence checks without hitting disk.

use crate::error::{Error, Result};
use crate::hash::{hash_bytes, Digest};
use ahash::AHashSet;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One immutable point-in-time capture
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Previous snapshot; `None` only for the first capture
    pub parent: Option<Digest>,
    /// Root tree digest of the captured working tree
    pub root_tree: Digest,
    /// Creation time, Unix milliseconds
    pub ts_unix_ms: u64,
    /// Operator-supplied memo
    pub message: String,
}

impl Snapshot {
    pub fn new(
        parent: Option<Digest>,
        root_tree: Digest,
        ts_unix_ms: u64,
        message: impl Into<String>,
    ) -> Self {
        Self {
            parent,
            root_tree,
            ts_unix_ms,
            message: message.into(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }

    /// Identity of this snapshot: digest of the canonical encoding
    pub fn digest(&self) -> Result<Digest> {
        Ok(hash_bytes(&self.encode()?))
    }
}

/// Append-only, linear snapshot history
///
/// Snapshots are never modified or deleted once committed.
pub struct SnapshotGraph {
    db: sled::Db,
    /// All committed snapshot digests, for parent validation
    ids: RwLock<AHashSet<Digest>>,
}

impl SnapshotGraph {
    /// Open (or create) the graph database under `.capsy/snapshots/`
    pub fn open(capsy_dir: &Path) -> Result<Self> {
        let db = sled::open(capsy_dir.join("snapshots").join("graph.db"))?;

        let mut ids = AHashSet::new();
        for item in db.iter() {
            let (key, _) = item?;
            let bytes: [u8; 32] = key.as_ref().try_into().map_err(|_| {
                Error::CorruptRepository("snapshot key is not a 32-byte digest".into())
            })?;
            ids.insert(Digest::from_bytes(bytes));
        }

        Ok(Self {
            db,
            ids: RwLock::new(ids),
        })
    }

    /// Commit a snapshot, returning its digest
    ///
    /// Rejects with `InvalidParent` when the named parent has never been
    /// committed. Flushes before returning so a crash after commit cannot
    /// lose the record.
    pub fn commit(&self, snapshot: &Snapshot) -> Result<Digest> {
        if let Some(parent) = snapshot.parent {
            if !self.ids.read().contains(&parent) {
                return Err(Error::InvalidParent(parent));
            }
        }

        let encoded = snapshot.encode()?;
        let digest = hash_bytes(&encoded);

        self.db.insert(digest.as_bytes(), encoded)?;
        self.db.flush()?;
        self.ids.write().insert(digest);

        tracing::info!(
            snapshot = %digest,
            parent = ?snapshot.parent.map(|p| p.to_hex()),
            "committed snapshot"
        );

        Ok(digest)
    }

    /// Fetch a snapshot by digest
    pub fn get(&self, digest: Digest) -> Result<Snapshot> {
        let bytes = self
            .db
            .get(digest.as_bytes())?
            .ok_or_else(|| Error::NotFound(digest.to_hex()))?;
        Snapshot::decode(&bytes)
    }

    pub fn contains(&self, digest: Digest) -> bool {
        self.ids.read().contains(&digest)
    }

    pub fn count(&self) -> usize {
        self.ids.read().len()
    }

    /// All committed snapshot digests, in no particular order
    pub fn ids(&self) -> Vec<Digest> {
        self.ids.read().iter().copied().collect()
    }

    /// Walk history from `start` back to the first snapshot, newest first
    ///
    /// The starting snapshot must exist (`NotFound` otherwise). A dangling
    /// parent link encountered mid-walk is `CorruptRepository`: the start was
    /// valid, so the chain below it is supposed to be intact.
    pub fn history(&self, start: Digest) -> Result<History<'_>> {
        if !self.contains(start) {
            return Err(Error::NotFound(start.to_hex()));
        }
        Ok(History {
            graph: self,
            next: Some(start),
        })
    }
}

/// Iterator over a snapshot chain, newest first
pub struct History<'a> {
    graph: &'a SnapshotGraph,
    next: Option<Digest>,
}

impl Iterator for History<'_> {
    type Item = Result<(Digest, Snapshot)>;

    fn next(&mut self) -> Option<Self::Item> {
        let digest = self.next.take()?;
        match self.graph.get(digest) {
            Ok(snapshot) => {
                self.next = snapshot.parent;
                Some(Ok((digest, snapshot)))
            }
            Err(Error::NotFound(missing)) => Some(Err(Error::CorruptRepository(format!(
                "dangling parent link: snapshot {missing} is missing"
            )))),
            Err(other) => Some(Err(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash_bytes;
    use std::fs;

    fn setup() -> (tempfile::TempDir, SnapshotGraph) {
        let temp_dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(temp_dir.path().join("snapshots")).unwrap();
        let graph = SnapshotGraph::open(temp_dir.path()).unwrap();
        (temp_dir, graph)
    }

    fn snapshot(parent: Option<Digest>, msg: &str) -> Snapshot {
        Snapshot::new(parent, hash_bytes(msg.as_bytes()), 1_700_000_000_000, msg)
    }

    #[test]
    fn test_commit_and_get() -> Result<()> {
        let (_tmp, graph) = setup();

        let snap = snapshot(None, "first");
        let digest = graph.commit(&snap)?;

        assert_eq!(graph.get(digest)?, snap);
        assert!(graph.contains(digest));
        assert_eq!(graph.count(), 1);
        Ok(())
    }

    #[test]
    fn test_digest_is_deterministic() -> Result<()> {
        let a = snapshot(None, "same");
        let b = snapshot(None, "same");
        assert_eq!(a.digest()?, b.digest()?);

        let c = snapshot(None, "different");
        assert_ne!(a.digest()?, c.digest()?);
        Ok(())
    }

    #[test]
    fn test_commit_rejects_unknown_parent() {
        let (_tmp, graph) = setup();

        let bogus = hash_bytes(b"never committed");
        let snap = snapshot(Some(bogus), "orphan");

        assert!(matches!(
            graph.commit(&snap),
            Err(Error::InvalidParent(p)) if p == bogus
        ));
    }

    #[test]
    fn test_get_missing_is_not_found() {
        let (_tmp, graph) = setup();
        let missing = hash_bytes(b"missing");
        assert!(matches!(graph.get(missing), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_history_newest_first() -> Result<()> {
        let (_tmp, graph) = setup();

        let first = graph.commit(&snapshot(None, "first"))?;
        let second = graph.commit(&snapshot(Some(first), "second"))?;
        let third = graph.commit(&snapshot(Some(second), "third"))?;

        let chain: Vec<_> = graph
            .history(third)?
            .collect::<Result<Vec<_>>>()?;

        let digests: Vec<_> = chain.iter().map(|(d, _)| *d).collect();
        assert_eq!(digests, vec![third, second, first]);

        let messages: Vec<_> = chain.iter().map(|(_, s)| s.message.as_str()).collect();
        assert_eq!(messages, vec!["third", "second", "first"]);
        Ok(())
    }

    #[test]
    fn test_history_unknown_start() -> Result<()> {
        let (_tmp, graph) = setup();
        graph.commit(&snapshot(None, "only"))?;

        let missing = hash_bytes(b"missing");
        assert!(matches!(graph.history(missing), Err(Error::NotFound(_))));
        Ok(())
    }

    #[test]
    fn test_graph_survives_reopen() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        fs::create_dir_all(temp_dir.path().join("snapshots"))?;

        let digest = {
            let graph = SnapshotGraph::open(temp_dir.path())?;
            graph.commit(&snapshot(None, "persisted"))?
        };

        let graph = SnapshotGraph::open(temp_dir.path())?;
        assert!(graph.contains(digest));
        assert_eq!(graph.get(digest)?.message, "persisted");

        // Parent validation works against the reloaded id set
        let child = snapshot(Some(digest), "child");
        graph.commit(&child)?;
        Ok(())
    }

    #[test]
    fn test_encode_decode_roundtrip() -> Result<()> {
        let snap = snapshot(Some(hash_bytes(b"parent")), "memo with spaces");
        let decoded = Snapshot::decode(&snap.encode()?)?;
        assert_eq!(snap, decoded);
        Ok(())
    }
}
