//! Content hashing for model files.
//!
//! Provides two tiers of identity:
//! - Quick hash: SHA256 over a bounded sample (first + last chunk + size),
//!   sub-second even for multi-gigabyte files. Used for routine identity
//!   checks and dedup candidate filtering.
//! - Strong hash: full-file BLAKE3, used to arbitrate suspected quick-hash
//!   collisions and for on-demand integrity checks.

use crate::config::SyncConfig;
use crate::{AtelierError, Result};
use blake3::Hasher as Blake3Hasher;
use sha2::{Digest, Sha256};
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

/// Content hasher with a configurable sample length.
///
/// The sample length determines how much of a file's head and tail feed
/// the quick hash. Identical content always produces identical quick
/// hashes regardless of filename or path.
#[derive(Debug, Clone, Copy)]
pub struct Hasher {
    sample_len: usize,
}

impl Default for Hasher {
    fn default() -> Self {
        Self {
            sample_len: SyncConfig::QUICK_HASH_SAMPLE,
        }
    }
}

impl Hasher {
    /// Create a hasher with a custom sample length.
    pub fn with_sample_len(sample_len: usize) -> Self {
        Self { sample_len }
    }

    /// Compute the sampled quick hash of a file.
    ///
    /// Hashes the first `sample_len` bytes, the last `sample_len` bytes
    /// (when the file is more than twice the sample), and the file size.
    /// Zero-byte files cannot be hashed and are reported as such.
    pub fn quick_hash(&self, path: impl AsRef<Path>) -> Result<String> {
        let path = path.as_ref();
        let mut file =
            std::fs::File::open(path).map_err(|e| AtelierError::io_with_path(e, path))?;

        let file_size = file
            .metadata()
            .map_err(|e| AtelierError::io_with_path(e, path))?
            .len();

        if file_size == 0 {
            return Err(AtelierError::EmptyFile(path.to_path_buf()));
        }

        let mut hasher = Sha256::new();

        // Read first chunk
        let first_chunk_size = std::cmp::min(file_size as usize, self.sample_len);
        let mut buffer = vec![0u8; first_chunk_size];
        file.read_exact(&mut buffer)
            .map_err(|e| AtelierError::io_with_path(e, path))?;
        hasher.update(&buffer);

        // Read last chunk (if the file is large enough that it doesn't overlap)
        if file_size > self.sample_len as u64 * 2 {
            let last_start = file_size - self.sample_len as u64;
            file.seek(SeekFrom::Start(last_start))
                .map_err(|e| AtelierError::io_with_path(e, path))?;

            let mut last_buffer = vec![0u8; self.sample_len];
            file.read_exact(&mut last_buffer)
                .map_err(|e| AtelierError::io_with_path(e, path))?;
            hasher.update(&last_buffer);
        }

        // Include file size
        hasher.update(&file_size.to_le_bytes());

        Ok(hex::encode(hasher.finalize()))
    }

    /// Compute the full-file strong hash (BLAKE3).
    pub fn strong_hash(&self, path: impl AsRef<Path>) -> Result<String> {
        let path = path.as_ref();
        let mut file =
            std::fs::File::open(path).map_err(|e| AtelierError::io_with_path(e, path))?;

        let file_size = file
            .metadata()
            .map_err(|e| AtelierError::io_with_path(e, path))?
            .len();
        if file_size == 0 {
            return Err(AtelierError::EmptyFile(path.to_path_buf()));
        }

        let mut hasher = Blake3Hasher::new();
        let mut buffer = vec![0u8; SyncConfig::HASH_CHUNK_SIZE];

        loop {
            let bytes_read = file
                .read(&mut buffer)
                .map_err(|e| AtelierError::io_with_path(e, path))?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
        }

        Ok(hasher.finalize().to_hex().to_string())
    }

    /// Verify a file's strong hash against an expected value.
    pub fn verify_strong_hash(&self, path: impl AsRef<Path>, expected: &str) -> Result<()> {
        let actual = self.strong_hash(path)?;
        let expected_lower = expected.to_lowercase();

        if actual == expected_lower {
            Ok(())
        } else {
            Err(AtelierError::HashMismatch {
                expected: expected_lower,
                actual,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_quick_hash_deterministic_across_paths() {
        let mut a = NamedTempFile::new().unwrap();
        let mut b = NamedTempFile::new().unwrap();
        a.write_all(b"identical model bytes").unwrap();
        b.write_all(b"identical model bytes").unwrap();
        a.flush().unwrap();
        b.flush().unwrap();

        let hasher = Hasher::default();
        assert_eq!(
            hasher.quick_hash(a.path()).unwrap(),
            hasher.quick_hash(b.path()).unwrap()
        );
    }

    #[test]
    fn test_quick_hash_differs_on_content() {
        let mut a = NamedTempFile::new().unwrap();
        let mut b = NamedTempFile::new().unwrap();
        a.write_all(b"model one").unwrap();
        b.write_all(b"model two").unwrap();
        a.flush().unwrap();
        b.flush().unwrap();

        let hasher = Hasher::default();
        assert_ne!(
            hasher.quick_hash(a.path()).unwrap(),
            hasher.quick_hash(b.path()).unwrap()
        );
    }

    #[test]
    fn test_quick_hash_empty_file_rejected() {
        let file = NamedTempFile::new().unwrap();
        let err = Hasher::default().quick_hash(file.path()).unwrap_err();
        assert!(matches!(err, AtelierError::EmptyFile(_)));
    }

    #[test]
    fn test_engineered_sample_collision() {
        // Two 10 KB files sharing header, footer and size but differing in
        // the middle collide on the quick hash and are separated by the
        // strong hash.
        let sample = 4 * 1024;
        let mut bytes_a = vec![0u8; 10 * 1024];
        let mut bytes_b = bytes_a.clone();
        bytes_a[5 * 1024] = 1;
        bytes_b[5 * 1024] = 2;

        let mut a = NamedTempFile::new().unwrap();
        let mut b = NamedTempFile::new().unwrap();
        a.write_all(&bytes_a).unwrap();
        b.write_all(&bytes_b).unwrap();
        a.flush().unwrap();
        b.flush().unwrap();

        let hasher = Hasher::with_sample_len(sample);
        assert_eq!(
            hasher.quick_hash(a.path()).unwrap(),
            hasher.quick_hash(b.path()).unwrap()
        );
        assert_ne!(
            hasher.strong_hash(a.path()).unwrap(),
            hasher.strong_hash(b.path()).unwrap()
        );
    }

    #[test]
    fn test_strong_hash_stable_across_paths() {
        let mut a = NamedTempFile::new().unwrap();
        let mut b = NamedTempFile::new().unwrap();
        a.write_all(b"abc").unwrap();
        b.write_all(b"abc").unwrap();
        a.flush().unwrap();
        b.flush().unwrap();

        let hasher = Hasher::default();
        let hash = hasher.strong_hash(a.path()).unwrap();
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, hasher.strong_hash(b.path()).unwrap());
    }

    #[test]
    fn test_verify_strong_hash() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"verify me").unwrap();
        file.flush().unwrap();

        let hasher = Hasher::default();
        let hash = hasher.strong_hash(file.path()).unwrap();
        assert!(hasher.verify_strong_hash(file.path(), &hash).is_ok());
        assert!(matches!(
            hasher.verify_strong_hash(file.path(), "00ff00ff"),
            Err(AtelierError::HashMismatch { .. })
        ));
    }
}
