//! On-disk store management for the `.capsy` state directory

use crate::blob::BlobStore;
use crate::error::{Error, Result};
use crate::hash::Digest;
use crate::tree::Tree;
use crate::FORMAT_VERSION;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Main store for Capsy repository data
///
/// Manages the `.capsy/` directory structure:
/// ```text
/// .capsy/
///   config.toml
///   HEAD
///   objects/
///     blobs/
///     trees/
///   snapshots/
///     graph.db
///   state/
///     index.bin
///   tmp/
///     ingest/
/// ```
pub struct Store {
    /// Root of repository
    root: PathBuf,
    /// Path to .capsy directory
    capsy_dir: PathBuf,
    /// Blob storage
    blobs: BlobStore,
    /// Tree cache (digest -> tree)
    tree_cache: DashMap<Digest, Arc<Tree>>,
    /// Ignore prefixes from config.toml, relative to the repository root
    ignore: Vec<PathBuf>,
}

impl Store {
    /// Initialize a new store at the given repository root
    pub fn init(repo_root: &Path) -> Result<Self> {
        use std::fs;

        let capsy_dir = repo_root.join(".capsy");

        if capsy_dir.exists() {
            return Err(Error::AlreadyInitialized(repo_root.to_path_buf()));
        }

        fs::create_dir(&capsy_dir)?;
        fs::create_dir_all(capsy_dir.join("objects/blobs"))?;
        fs::create_dir_all(capsy_dir.join("objects/trees"))?;
        fs::create_dir_all(capsy_dir.join("snapshots"))?;
        fs::create_dir_all(capsy_dir.join("state"))?;
        fs::create_dir_all(capsy_dir.join("tmp/ingest"))?;

        let config_content = format!(
            r#"# Capsy configuration
[store]
version = {FORMAT_VERSION}
blob_compression_threshold = 4096  # 4KB

[scan]
# Path prefixes (relative to the repository root) excluded from capture.
# `.capsy` and `.git` are always excluded.
ignore = []
"#
        );
        fs::write(capsy_dir.join("config.toml"), config_content)?;

        // Empty HEAD: no snapshot yet
        fs::write(capsy_dir.join("HEAD"), "")?;

        tracing::info!(root = %repo_root.display(), "initialized capsy repository");

        Ok(Self {
            root: repo_root.to_path_buf(),
            blobs: BlobStore::new(capsy_dir.clone()),
            capsy_dir,
            tree_cache: DashMap::new(),
            ignore: Vec::new(),
        })
    }

    /// Open an existing store
    pub fn open(repo_root: &Path) -> Result<Self> {
        let capsy_dir = repo_root.join(".capsy");

        if !capsy_dir.exists() {
            return Err(Error::NotInitialized(repo_root.to_path_buf()));
        }

        let required_dirs = [
            "objects/blobs",
            "objects/trees",
            "snapshots",
            "state",
            "tmp/ingest",
        ];
        for dir in &required_dirs {
            if !capsy_dir.join(dir).exists() {
                return Err(Error::CorruptRepository(format!(
                    "missing required directory: {dir}"
                )));
            }
        }

        let ignore = read_config(&capsy_dir)?;

        Ok(Self {
            root: repo_root.to_path_buf(),
            blobs: BlobStore::new(capsy_dir.clone()),
            capsy_dir,
            tree_cache: DashMap::new(),
            ignore,
        })
    }

    /// Write a tree to storage, returning its digest. Idempotent.
    pub fn write_tree(&self, tree: &Tree) -> Result<Digest> {
        let digest = tree.digest();
        let tree_path = self.tree_path(digest);

        if tree_path.exists() {
            return Ok(digest);
        }

        let serialized = tree.serialize();
        let tmp_dir = self.capsy_dir.join("tmp").join("ingest");
        atomic_write(&tmp_dir, &tree_path, &serialized)?;

        tracing::debug!(digest = %digest, entries = tree.len(), "stored tree");
        self.tree_cache.insert(digest, Arc::new(tree.clone()));

        Ok(digest)
    }

    /// Read a tree from storage, verifying its digest
    pub fn read_tree(&self, digest: Digest) -> Result<Tree> {
        use std::fs;

        if let Some(cached) = self.tree_cache.get(&digest) {
            return Ok((**cached).clone());
        }

        let tree_path = self.tree_path(digest);
        if !tree_path.exists() {
            return Err(Error::NotFound(digest.to_hex()));
        }

        let serialized = fs::read(&tree_path)?;
        let tree = Tree::deserialize(&serialized)?;

        let computed = tree.digest();
        if computed != digest {
            return Err(Error::CorruptRepository(format!(
                "tree digest mismatch: expected {digest}, got {computed}"
            )));
        }

        self.tree_cache.insert(digest, Arc::new(tree.clone()));

        Ok(tree)
    }

    /// Check whether a tree exists without reading it
    pub fn has_tree(&self, digest: Digest) -> bool {
        if self.tree_cache.contains_key(&digest) {
            return true;
        }
        self.tree_path(digest).exists()
    }

    /// Read HEAD; `None` when no snapshot has been captured yet
    pub fn head(&self) -> Result<Option<Digest>> {
        let content = std::fs::read_to_string(self.capsy_dir.join("HEAD"))?;
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        let digest = Digest::from_hex(trimmed)
            .map_err(|_| Error::CorruptRepository(format!("malformed HEAD: {trimmed:?}")))?;
        Ok(Some(digest))
    }

    /// Publish a new HEAD atomically (write-new-then-rename)
    pub fn set_head(&self, digest: Digest) -> Result<()> {
        let tmp_dir = self.capsy_dir.join("tmp").join("ingest");
        atomic_write(
            &tmp_dir,
            &self.capsy_dir.join("HEAD"),
            digest.to_hex().as_bytes(),
        )?;
        tracing::debug!(head = %digest, "published HEAD");
        Ok(())
    }

    fn tree_path(&self, digest: Digest) -> PathBuf {
        // Fan-out structure: objects/trees/<hh>/<rest>
        let hex = digest.to_hex();
        let (prefix, rest) = hex.split_at(2);
        self.capsy_dir
            .join("objects/trees")
            .join(prefix)
            .join(rest)
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    pub fn capsy_dir(&self) -> &Path {
        &self.capsy_dir
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Ignore prefixes configured under `[scan] ignore`
    pub fn ignore_prefixes(&self) -> &[PathBuf] {
        &self.ignore
    }
}

/// Parse config.toml, validating the format version. Returns ignore prefixes.
fn read_config(capsy_dir: &Path) -> Result<Vec<PathBuf>> {
    let config_path = capsy_dir.join("config.toml");
    let content = std::fs::read_to_string(&config_path)
        .map_err(|_| Error::CorruptRepository("missing config.toml".into()))?;

    let config: toml::Value = content.parse()?;

    let version = config
        .get("store")
        .and_then(|s| s.get("version"))
        .and_then(|v| v.as_integer())
        .ok_or_else(|| Error::CorruptRepository("config.toml missing [store] version".into()))?;

    if version != FORMAT_VERSION {
        return Err(Error::CorruptRepository(format!(
            "unsupported repository format version {version} (expected {FORMAT_VERSION})"
        )));
    }

    let ignore = config
        .get("scan")
        .and_then(|s| s.get("ignore"))
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str())
                .map(PathBuf::from)
                .collect()
        })
        .unwrap_or_default();

    Ok(ignore)
}

/// Atomic write helper
///
/// Writes data to a temporary file, fsyncs it, then renames it to the target
/// path. A crash at any point leaves either the old file or the new one,
/// never a partial write.
pub fn atomic_write(tmp_dir: &Path, target: &Path, data: &[u8]) -> Result<()> {
    use std::fs;
    use std::io::Write;

    fs::create_dir_all(tmp_dir)?;

    let temp_path = tmp_dir.join(uuid::Uuid::new_v4().to_string());

    let mut temp_file = fs::File::create(&temp_path)?;
    temp_file.write_all(data)?;
    temp_file.sync_all()?;
    drop(temp_file);

    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }

    fs::rename(&temp_path, target)?;

    // Fsync parent directory for durability (best effort)
    if let Some(parent) = target.parent() {
        if let Ok(dir) = fs::File::open(parent) {
            let _ = dir.sync_all();
        }
    }

    Ok(())
}

/// Check if a relative path falls under the always-excluded state directories
pub fn always_ignored(path: &Path) -> bool {
    path.starts_with(".capsy") || path.starts_with(".git")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash_bytes;
    use crate::tree::TreeEntry;

    #[test]
    fn test_store_init() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let store = Store::init(temp_dir.path())?;

        assert!(store.capsy_dir().exists());
        assert!(store.capsy_dir().join("objects/blobs").exists());
        assert!(store.capsy_dir().join("objects/trees").exists());
        assert!(store.capsy_dir().join("snapshots").exists());
        assert!(store.capsy_dir().join("state").exists());
        assert!(store.capsy_dir().join("tmp/ingest").exists());
        assert!(store.capsy_dir().join("config.toml").exists());
        assert!(store.capsy_dir().join("HEAD").exists());

        Ok(())
    }

    #[test]
    fn test_store_init_already_initialized() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        Store::init(temp_dir.path())?;

        let result = Store::init(temp_dir.path());
        assert!(matches!(result, Err(Error::AlreadyInitialized(_))));
        Ok(())
    }

    #[test]
    fn test_store_open() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        Store::init(temp_dir.path())?;

        let store = Store::open(temp_dir.path())?;
        assert_eq!(store.root(), temp_dir.path());
        assert_eq!(store.capsy_dir(), temp_dir.path().join(".capsy"));
        Ok(())
    }

    #[test]
    fn test_store_open_not_initialized() {
        let temp_dir = tempfile::tempdir().unwrap();
        let result = Store::open(temp_dir.path());
        assert!(matches!(result, Err(Error::NotInitialized(_))));
    }

    #[test]
    fn test_store_open_bad_version() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        Store::init(temp_dir.path())?;

        let config_path = temp_dir.path().join(".capsy/config.toml");
        std::fs::write(&config_path, "[store]\nversion = 99\n")?;

        let result = Store::open(temp_dir.path());
        assert!(matches!(result, Err(Error::CorruptRepository(_))));
        Ok(())
    }

    #[test]
    fn test_store_open_reads_ignore_list() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        Store::init(temp_dir.path())?;

        let config_path = temp_dir.path().join(".capsy/config.toml");
        std::fs::write(
            &config_path,
            "[store]\nversion = 1\n\n[scan]\nignore = [\"target\", \"node_modules\"]\n",
        )?;

        let store = Store::open(temp_dir.path())?;
        assert_eq!(
            store.ignore_prefixes(),
            &[PathBuf::from("target"), PathBuf::from("node_modules")]
        );
        Ok(())
    }

    #[test]
    fn test_store_write_read_tree() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let store = Store::init(temp_dir.path())?;

        let mut tree = Tree::new();
        tree.insert("file1.txt", TreeEntry::file(0o644, hash_bytes(b"content1")));
        tree.insert("file2.txt", TreeEntry::file(0o644, hash_bytes(b"content2")));

        let digest = store.write_tree(&tree)?;
        let read_tree = store.read_tree(digest)?;

        assert_eq!(tree, read_tree);
        Ok(())
    }

    #[test]
    fn test_store_tree_idempotent_write() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let store = Store::init(temp_dir.path())?;

        let mut tree = Tree::new();
        tree.insert("file.txt", TreeEntry::file(0o644, hash_bytes(b"idempotent")));

        let digest1 = store.write_tree(&tree)?;
        let digest2 = store.write_tree(&tree)?;
        assert_eq!(digest1, digest2);
        Ok(())
    }

    #[test]
    fn test_store_read_tree_not_found() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let store = Store::init(temp_dir.path())?;

        let fake = Digest::from_bytes([0xEE; 32]);
        assert!(matches!(store.read_tree(fake), Err(Error::NotFound(_))));
        assert!(!store.has_tree(fake));
        Ok(())
    }

    #[test]
    fn test_head_roundtrip() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let store = Store::init(temp_dir.path())?;

        assert_eq!(store.head()?, None);

        let digest = hash_bytes(b"snapshot");
        store.set_head(digest)?;
        assert_eq!(store.head()?, Some(digest));
        Ok(())
    }

    #[test]
    fn test_head_malformed() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let store = Store::init(temp_dir.path())?;

        std::fs::write(temp_dir.path().join(".capsy/HEAD"), "not-a-digest")?;
        assert!(matches!(store.head(), Err(Error::CorruptRepository(_))));
        Ok(())
    }

    #[test]
    fn test_atomic_write() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let tmp_dir = temp_dir.path().join("tmp");
        let target = temp_dir.path().join("out").join("test.txt");

        let data = b"test atomic write content";
        atomic_write(&tmp_dir, &target, data)?;

        assert!(target.exists());
        assert_eq!(std::fs::read(&target)?, data);
        Ok(())
    }

    #[test]
    fn test_always_ignored() {
        assert!(always_ignored(Path::new(".capsy/config.toml")));
        assert!(always_ignored(Path::new(".capsy")));
        assert!(always_ignored(Path::new(".git/HEAD")));

        assert!(!always_ignored(Path::new("src/main.rs")));
        assert!(!always_ignored(Path::new("README.md")));
    }
}
