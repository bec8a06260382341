//! Blob storage with compression and content-addressing

use crate::error::{Error, Result};
use crate::hash::{hash_bytes, Digest};
use dashmap::DashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Compress payloads larger than this when it actually saves space
const COMPRESSION_THRESHOLD: usize = 4096;

/// Blob header format (version 1)
#[derive(Debug, Clone)]
pub struct BlobHeaderV1 {
    /// Magic bytes: "CPB1"
    pub magic: [u8; 4],
    /// Flags: bit0=compressed, bit1-7=reserved
    pub flags: u8,
    /// Original size (before compression)
    pub orig_len: u64,
    /// Stored size (after compression, if compressed)
    pub stored_len: u64,
}

impl BlobHeaderV1 {
    const MAGIC: [u8; 4] = *b"CPB1";
    const FLAG_COMPRESSED: u8 = 0b0000_0001;
    const LEN: usize = 21;

    pub fn new(orig_len: u64, stored_len: u64, compressed: bool) -> Self {
        let flags = if compressed { Self::FLAG_COMPRESSED } else { 0 };
        Self {
            magic: Self::MAGIC,
            flags,
            orig_len,
            stored_len,
        }
    }

    pub fn is_compressed(&self) -> bool {
        (self.flags & Self::FLAG_COMPRESSED) != 0
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(Self::LEN);
        bytes.extend_from_slice(&self.magic);
        bytes.push(self.flags);
        bytes.extend_from_slice(&self.orig_len.to_le_bytes());
        bytes.extend_from_slice(&self.stored_len.to_le_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::LEN {
            return Err(Error::CorruptRepository(format!(
                "blob header too short: expected at least {} bytes, got {}",
                Self::LEN,
                bytes.len()
            )));
        }

        let magic = [bytes[0], bytes[1], bytes[2], bytes[3]];
        if magic != Self::MAGIC {
            return Err(Error::CorruptRepository(format!(
                "invalid blob magic: expected {:?}, got {:?}",
                Self::MAGIC,
                magic
            )));
        }

        let flags = bytes[4];
        let orig_len = u64::from_le_bytes([
            bytes[5], bytes[6], bytes[7], bytes[8], bytes[9], bytes[10], bytes[11], bytes[12],
        ]);
        let stored_len = u64::from_le_bytes([
            bytes[13], bytes[14], bytes[15], bytes[16], bytes[17], bytes[18], bytes[19], bytes[20],
        ]);

        Ok(Self {
            magic,
            flags,
            orig_len,
            stored_len,
        })
    }
}

/// Metadata for one stored blob
#[derive(Debug, Clone)]
pub struct Blob {
    /// Content digest (BLAKE3 of the uncompressed bytes)
    pub digest: Digest,
    /// Original size
    pub size: u64,
    /// Whether this blob is stored compressed
    pub compressed: bool,
}

impl Blob {
    /// Encode content into on-disk form (header + possibly compressed payload)
    pub fn encode(data: &[u8]) -> Result<(Self, Vec<u8>)> {
        let digest = hash_bytes(data);
        let orig_len = data.len() as u64;

        let should_compress = data.len() > COMPRESSION_THRESHOLD;

        let (stored_data, stored_len, compressed) = if should_compress {
            match zstd::encode_all(data, 3) {
                Ok(compressed_data) if compressed_data.len() < data.len() => {
                    let len = compressed_data.len() as u64;
                    (compressed_data, len, true)
                }
                // Compression did not pay off (or failed): store raw
                _ => (data.to_vec(), orig_len, false),
            }
        } else {
            (data.to_vec(), orig_len, false)
        };

        let header = BlobHeaderV1::new(orig_len, stored_len, compressed);
        let mut serialized = header.to_bytes();
        serialized.extend_from_slice(&stored_data);

        let blob = Blob {
            digest,
            size: orig_len,
            compressed,
        };

        Ok((blob, serialized))
    }

    /// Decode on-disk form back into the original content
    pub fn decode(serialized: &[u8]) -> Result<Vec<u8>> {
        let header = BlobHeaderV1::from_bytes(serialized)?;

        let data_start = BlobHeaderV1::LEN;
        let data_end = data_start + header.stored_len as usize;

        if serialized.len() < data_end {
            return Err(Error::CorruptRepository(format!(
                "truncated blob: expected at least {} bytes, got {}",
                data_end,
                serialized.len()
            )));
        }

        let stored_data = &serialized[data_start..data_end];

        if header.is_compressed() {
            let decompressed = zstd::decode_all(stored_data)
                .map_err(|e| Error::CorruptRepository(format!("zstd decode failed: {e}")))?;
            if decompressed.len() != header.orig_len as usize {
                return Err(Error::CorruptRepository(format!(
                    "decompressed size mismatch: expected {}, got {}",
                    header.orig_len,
                    decompressed.len()
                )));
            }
            Ok(decompressed)
        } else {
            Ok(stored_data.to_vec())
        }
    }
}

/// Content-addressed blob storage under `.capsy/objects/blobs/`
///
/// Writes are crash-atomic: content lands in `tmp/ingest/` first and is
/// published with a rename. A partially written blob is never observable.
pub struct BlobStore {
    /// Path to the `.capsy` directory
    capsy_dir: PathBuf,
    /// In-memory cache: digest -> blob metadata
    cache: DashMap<Digest, Arc<Blob>>,
}

impl BlobStore {
    pub fn new(capsy_dir: PathBuf) -> Self {
        Self {
            capsy_dir,
            cache: DashMap::new(),
        }
    }

    /// Store content, returning its digest. Idempotent: repeated puts of
    /// identical content do not rewrite or duplicate storage.
    pub fn put(&self, data: &[u8]) -> Result<Digest> {
        use std::fs;
        use std::io::Write;

        let digest = hash_bytes(data);
        let blob_path = self.blob_path(digest);
        if blob_path.exists() {
            return Ok(digest);
        }

        let (blob, serialized) = Blob::encode(data)?;

        if let Some(parent) = blob_path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Atomic write pattern: write to temp, fsync, rename
        let tmp_dir = self.capsy_dir.join("tmp").join("ingest");
        fs::create_dir_all(&tmp_dir)?;
        let temp_path = tmp_dir.join(format!("{}-{}", uuid::Uuid::new_v4(), digest.to_hex()));

        let mut temp_file = fs::File::create(&temp_path)?;
        temp_file.write_all(&serialized)?;
        temp_file.sync_all()?;
        drop(temp_file);

        fs::rename(&temp_path, &blob_path)?;

        // Fsync parent directory for durability (best effort)
        if let Some(parent) = blob_path.parent() {
            if let Ok(dir) = fs::File::open(parent) {
                let _ = dir.sync_all();
            }
        }

        tracing::debug!(digest = %digest, size = blob.size, compressed = blob.compressed, "stored blob");
        self.cache.insert(digest, Arc::new(blob));

        Ok(digest)
    }

    /// Read content by digest. Verifies the stored bytes still hash to the
    /// requested digest.
    pub fn get(&self, digest: Digest) -> Result<Vec<u8>> {
        use std::fs;

        let blob_path = self.blob_path(digest);
        if !blob_path.exists() {
            return Err(Error::NotFound(digest.to_hex()));
        }

        let serialized = fs::read(&blob_path)?;
        let data = Blob::decode(&serialized)?;

        let actual = hash_bytes(&data);
        if actual != digest {
            return Err(Error::CorruptRepository(format!(
                "blob digest mismatch: expected {digest}, got {actual}"
            )));
        }

        Ok(data)
    }

    /// Existence check without reading content
    pub fn has(&self, digest: Digest) -> bool {
        if self.cache.contains_key(&digest) {
            return true;
        }
        self.blob_path(digest).exists()
    }

    /// Filesystem path for a digest, fanned out as `<hh>/<rest>`
    fn blob_path(&self, digest: Digest) -> PathBuf {
        let hex = digest.to_hex();
        let (prefix, rest) = hex.split_at(2);
        self.capsy_dir
            .join("objects")
            .join("blobs")
            .join(prefix)
            .join(rest)
    }
}
