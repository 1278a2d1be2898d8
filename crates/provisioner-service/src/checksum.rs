//! SHA-256 checksum computation and file validation.
//!
//! Hashing happens in fixed-size chunks to keep memory use bounded; cached
//! artifacts are routinely hundreds of megabytes.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};

const BUF_SIZE: usize = 64 * 1024;

/// Computes the SHA-256 digest of a reader and returns it as lowercase hex.
///
/// Consumes the reader fully from its current position; callers are
/// responsible for seeking beforehand.
pub fn compute_hash(mut reader: impl Read) -> std::io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buf = [0u8; BUF_SIZE];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Checks whether the file at `path` hashes to `expected` (hex, compared
/// case-insensitively).
///
/// A file that cannot be opened or read counts as invalid: a validation
/// failure is data, not a fault, so this never propagates an error. The
/// computed and expected digests are logged for post-hoc diagnosis.
pub fn verify_file(path: &Path, expected: &str) -> bool {
    let computed = match File::open(path).and_then(compute_hash) {
        Ok(digest) => digest,
        Err(e) => {
            tracing::debug!(
                error = &e as &dyn std::error::Error,
                "Failed to hash `{}`",
                path.display()
            );
            return false;
        }
    };

    tracing::debug!(
        "File `{}` has checksum `{computed}`, expected `{expected}`",
        path.display()
    );
    computed.eq_ignore_ascii_case(expected)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn test_compute_hash_empty() {
        let digest = compute_hash(std::io::empty()).unwrap();
        assert_eq!(digest, EMPTY_SHA256);
    }

    #[test]
    fn test_compute_hash_known_content() {
        let digest = compute_hash(&b"hello\n"[..]).unwrap();
        assert_eq!(
            digest,
            "5891b5b522d5df086d0ff0b110fbd9d21bb4fc7163af34d08286a2e846f6be03"
        );
    }

    #[test]
    fn test_verify_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"hello\n").unwrap();
        file.flush().unwrap();

        assert!(verify_file(
            file.path(),
            "5891b5b522d5df086d0ff0b110fbd9d21bb4fc7163af34d08286a2e846f6be03"
        ));
        // hex digests compare case-insensitively
        assert!(verify_file(
            file.path(),
            "5891B5B522D5DF086D0FF0B110FBD9D21BB4FC7163AF34D08286A2E846F6BE03"
        ));
        assert!(!verify_file(file.path(), EMPTY_SHA256));
    }

    #[test]
    fn test_verify_missing_file_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!verify_file(&dir.path().join("nope"), EMPTY_SHA256));
    }
}
