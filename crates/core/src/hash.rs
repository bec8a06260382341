//! Content digests
//!
//! Every object capsy stores (blob, tree, snapshot) is keyed by the BLAKE3
//! digest of its canonical bytes. Digests are the only key space: two objects
//! are the same object exactly when their digests are equal, which is what
//! makes deduplication and subtree sharing fall out for free.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Files at or above this size are digested through a memory map instead of
/// buffered reads
const MMAP_THRESHOLD: u64 = 4 * 1024 * 1024;

/// A BLAKE3 content digest, the sole key space of the object store
#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct Digest([u8; Self::SIZE]);

impl Digest {
    pub const SIZE: usize = 32;
    pub const HEX_LEN: usize = 2 * Self::SIZE;

    pub const fn from_bytes(bytes: [u8; Self::SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; Self::SIZE] {
        &self.0
    }

    /// Lowercase hex form, as used in object paths and HEAD
    pub fn to_hex(&self) -> String {
        self.to_string()
    }

    /// Parse a full hex digest. Accepts upper or lower case; anything that is
    /// not exactly `HEX_LEN` hex characters is `InvalidDigest`.
    pub fn from_hex(hex: &str) -> Result<Self> {
        hex.parse()
    }
}

impl FromStr for Digest {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.len() != Self::HEX_LEN {
            return Err(Error::InvalidDigest(format!(
                "expected {} hex characters, got {}",
                Self::HEX_LEN,
                s.len()
            )));
        }
        if !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(Error::InvalidDigest(format!("not a hex string: {s:?}")));
        }

        let mut bytes = [0u8; Self::SIZE];
        for (byte, pair) in bytes.iter_mut().zip(s.as_bytes().chunks_exact(2)) {
            // Both bytes verified hex above, so this cannot fail
            let pair = std::str::from_utf8(pair)
                .map_err(|_| Error::InvalidDigest(format!("not a hex string: {s:?}")))?;
            *byte = u8::from_str_radix(pair, 16)
                .map_err(|_| Error::InvalidDigest(format!("not a hex string: {s:?}")))?;
        }
        Ok(Self(bytes))
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({self})")
    }
}

/// Digest a byte slice
pub fn hash_bytes(data: &[u8]) -> Digest {
    Digest::from_bytes(*blake3::hash(data).as_bytes())
}

/// Digest a file's content without loading it whole
///
/// Small files go through a buffered read loop; files at or above the mmap
/// threshold are memory-mapped so BLAKE3 can hash them in one multi-threaded
/// pass.
pub fn hash_file(path: &Path) -> Result<Digest> {
    let len = std::fs::metadata(path)?.len();
    if len >= MMAP_THRESHOLD {
        hash_file_mmap(path)
    } else {
        hash_file_buffered(path)
    }
}

fn hash_file_buffered(path: &Path) -> Result<Digest> {
    use std::io::Read;

    let mut file = std::fs::File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    let mut buffer = [0u8; 64 * 1024];

    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(Digest::from_bytes(*hasher.finalize().as_bytes()))
}

fn hash_file_mmap(path: &Path) -> Result<Digest> {
    let file = std::fs::File::open(path)?;
    let mmap = unsafe { memmap2::Mmap::map(&file)? };
    Ok(hash_bytes(&mmap))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_digest_keys_are_content_identity() {
        // Same bytes always produce the same key, different bytes never do;
        // this is the invariant the whole object store rests on
        let a1 = hash_bytes(b"capture me");
        let a2 = hash_bytes(b"capture me");
        let b = hash_bytes(b"capture me ");

        assert_eq!(a1, a2);
        assert_ne!(a1, b);

        let mut objects: BTreeMap<Digest, &[u8]> = BTreeMap::new();
        objects.insert(a1, b"capture me");
        objects.insert(a2, b"capture me");
        objects.insert(b, b"capture me ");
        assert_eq!(objects.len(), 2);
    }

    #[test]
    fn test_display_parse_roundtrip() -> Result<()> {
        let digest = hash_bytes(b"roundtrip");
        let hex = digest.to_hex();

        assert_eq!(hex.len(), Digest::HEX_LEN);
        assert_eq!(hex, format!("{digest}"));
        assert_eq!(hex.parse::<Digest>()?, digest);
        Ok(())
    }

    #[test]
    fn test_hex_is_lowercase_but_parse_accepts_uppercase() -> Result<()> {
        let digest = hash_bytes(b"case sensitivity");
        let hex = digest.to_hex();

        assert!(!hex.contains(char::is_uppercase));
        assert_eq!(Digest::from_hex(&hex.to_uppercase())?, digest);
        Ok(())
    }

    #[test]
    fn test_parse_rejects_bad_references() {
        // Wrong length (a plausible-looking prefix), not an error the store
        // should ever silently accept
        let err = Digest::from_hex("ab12cd").unwrap_err();
        assert!(matches!(err, Error::InvalidDigest(_)));

        // Right length, wrong alphabet
        assert!(matches!(
            Digest::from_hex(&"zz".repeat(32)),
            Err(Error::InvalidDigest(_))
        ));

        // from_str_radix would tolerate a sign; the parser must not
        let signed = format!("+a{}", "ab".repeat(31));
        assert_eq!(signed.len(), Digest::HEX_LEN);
        assert!(matches!(
            Digest::from_hex(&signed),
            Err(Error::InvalidDigest(_))
        ));
    }

    #[test]
    fn test_debug_includes_hex() {
        let digest = Digest::from_bytes([7; 32]);
        let debug = format!("{digest:?}");
        assert!(debug.starts_with("Digest("));
        assert!(debug.contains(&digest.to_hex()));
    }

    #[test]
    fn test_hash_file_matches_in_memory_digest() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("note.md");
        std::fs::write(&path, b"- [19:42] worklog entry\n")?;

        assert_eq!(hash_file(&path)?, hash_bytes(b"- [19:42] worklog entry\n"));
        Ok(())
    }

    #[test]
    fn test_hash_file_strategies_agree_past_threshold() -> Result<()> {
        // A file big enough to take the mmap path must hash identically to
        // the buffered path and to the in-memory digest
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("asset.bin");

        let data: Vec<u8> = (0u32..(MMAP_THRESHOLD as u32 + 4096))
            .map(|i| (i % 251) as u8)
            .collect();
        std::fs::write(&path, &data)?;

        let expected = hash_bytes(&data);
        assert_eq!(hash_file(&path)?, expected);
        assert_eq!(hash_file_buffered(&path)?, expected);
        assert_eq!(hash_file_mmap(&path)?, expected);
        Ok(())
    }

    #[test]
    fn test_hash_file_missing_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = hash_file(&dir.path().join("never-written"));
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[test]
    fn test_empty_content_has_a_digest() -> Result<()> {
        // The empty blob and the empty tree are real, storable objects
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("empty");
        std::fs::write(&path, b"")?;

        assert_eq!(hash_file(&path)?, hash_bytes(b""));
        Ok(())
    }
}
