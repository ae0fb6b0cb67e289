//! Content fingerprinting and filesystem signatures.
//!
//! The fingerprint is a SHA-256 over the full file contents, so it
//! detects real changes independent of filesystem metadata. The cheaper
//! [`FileSignature`] (size + mtime) is checked first during a scan and
//! lets unchanged files skip hashing entirely.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::UNIX_EPOCH;

/// Size + mtime pair used to short-circuit re-scanning unchanged files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileSignature {
    /// File size in bytes
    pub size: u64,
    /// Modification time as unix seconds (0 if before the epoch)
    pub mtime: i64,
}

impl FileSignature {
    /// Read the signature for a file from the filesystem.
    pub fn read(path: &Path) -> std::io::Result<Self> {
        let meta = std::fs::metadata(path)?;
        let mtime = meta
            .modified()?
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        Ok(Self {
            size: meta.len(),
            mtime,
        })
    }
}

/// Compute the SHA-256 fingerprint of a file's bytes.
///
/// Reads the file in 64 KiB chunks; never loads the whole file.
///
/// # Returns
///
/// The hash as a lowercase hex string (64 characters).
pub fn compute_fingerprint(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];

    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_fingerprint_is_stable() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("test.bin");

        let mut file = File::create(&file_path).unwrap();
        file.write_all(b"Hello, world!").unwrap();
        drop(file);

        let hash = compute_fingerprint(&file_path).unwrap();
        assert_eq!(hash.len(), 64); // SHA-256 hex

        let hash2 = compute_fingerprint(&file_path).unwrap();
        assert_eq!(hash, hash2);
    }

    #[test]
    fn test_fingerprint_differs_for_different_content() {
        let dir = tempdir().unwrap();

        let file1 = dir.path().join("a.bin");
        let file2 = dir.path().join("b.bin");
        std::fs::write(&file1, b"Content A").unwrap();
        std::fs::write(&file2, b"Content B").unwrap();

        assert_ne!(
            compute_fingerprint(&file1).unwrap(),
            compute_fingerprint(&file2).unwrap()
        );
    }

    #[test]
    fn test_fingerprint_ignores_mtime() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("touched.bin");
        std::fs::write(&file_path, b"same bytes").unwrap();

        let before = compute_fingerprint(&file_path).unwrap();

        // Rewriting identical bytes bumps the mtime but not the hash.
        std::fs::write(&file_path, b"same bytes").unwrap();
        let after = compute_fingerprint(&file_path).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_signature_reflects_size() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("sig.bin");
        std::fs::write(&file_path, b"12345").unwrap();

        let sig = FileSignature::read(&file_path).unwrap();
        assert_eq!(sig.size, 5);
        assert!(sig.mtime > 0);
    }
}
