//! Streaming SHA256 computation for model files.
//!
//! Files are read in fixed-size chunks so memory stays flat no matter how
//! large the weights file is.

use crate::config::ScanConfig;
use crate::error::{ArchivistError, Result};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

/// Compute the SHA256 of a file as a lowercase hex string.
pub fn compute_sha256(path: impl AsRef<Path>) -> Result<String> {
    compute_sha256_chunked(path.as_ref(), ScanConfig::HASH_CHUNK_SIZE)
}

fn compute_sha256_chunked(path: &Path, chunk_size: usize) -> Result<String> {
    let mut file =
        std::fs::File::open(path).map_err(|e| ArchivistError::io_with_path(e, path))?;

    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; chunk_size];
    loop {
        let bytes_read = file
            .read(&mut buffer)
            .map_err(|e| ArchivistError::io_with_path(e, path))?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Verify a file's SHA256 hash matches the expected value.
///
/// Returns `Ok(true)` on a match and `Ok(false)` on a mismatch.
pub fn verify_sha256(path: impl AsRef<Path>, expected: &str) -> Result<bool> {
    let actual = compute_sha256(path)?;
    Ok(actual == expected.trim().to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_sha256_empty_file() {
        let file = NamedTempFile::new().unwrap();
        let hash = compute_sha256(file.path()).unwrap();
        assert_eq!(
            hash,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_sha256_known_content() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"abc").unwrap();
        file.flush().unwrap();

        assert_eq!(
            compute_sha256(file.path()).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_small_chunks_match_single_read() {
        let mut file = NamedTempFile::new().unwrap();
        let content: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        file.write_all(&content).unwrap();
        file.flush().unwrap();

        let chunked = compute_sha256_chunked(file.path(), 7).unwrap();
        assert_eq!(chunked, hex::encode(Sha256::digest(&content)));
    }

    #[test]
    fn test_verify_sha256() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"abc").unwrap();
        file.flush().unwrap();

        assert!(verify_sha256(
            file.path(),
            "BA7816BF8F01CFEA414140DE5DAE2223B00361A396177A9CB410FF61F20015AD"
        )
        .unwrap());
        assert!(!verify_sha256(file.path(), "wrong_hash").unwrap());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = compute_sha256("/nonexistent/model.safetensors");
        assert!(matches!(result, Err(ArchivistError::Io { .. })));
    }
}
