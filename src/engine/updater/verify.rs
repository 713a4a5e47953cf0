//! Content Verification
//!
//! Streams artifacts through SHA-256 and compares the result against the
//! digest published in the update descriptor.

use std::path::Path;
use std::fs::File;
use std::io::{self, Read, BufReader};
use sha2::{Sha256, Digest};
use thiserror::Error;

const CHUNK_SIZE: usize = 8192;

/// Verification errors
#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },
}

/// Calculate the SHA-256 digest of everything `reader` yields, hex-encoded.
///
/// The input is hashed incrementally, so artifacts of any size are fine.
pub fn digest_reader<R: Read>(reader: R) -> Result<String, VerifyError> {
    let mut reader = BufReader::new(reader);
    let mut hasher = Sha256::new();

    let mut buffer = [0u8; CHUNK_SIZE];
    loop {
        let bytes_read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Calculate the SHA-256 digest of a file
pub fn digest_file(path: &Path) -> Result<String, VerifyError> {
    let file = File::open(path)?;
    digest_reader(file)
}

/// Compare two hex digests. Case-insensitive; whitespace around either side
/// is ignored.
pub fn digests_match(actual: &str, expected: &str) -> bool {
    let actual = actual.trim();
    let expected = expected.trim();
    !expected.is_empty() && actual.eq_ignore_ascii_case(expected)
}

/// Verify a file's digest against the expected value
pub fn verify_file(path: &Path, expected: &str) -> Result<(), VerifyError> {
    let actual = digest_file(path)?;
    if !digests_match(&actual, expected) {
        return Err(VerifyError::ChecksumMismatch {
            expected: expected.trim().to_string(),
            actual,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const HELLO_WORLD: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    #[test]
    fn test_sha256_calculation() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"hello world").unwrap();
        file.flush().unwrap();

        assert_eq!(digest_file(file.path()).unwrap(), HELLO_WORLD);
    }

    #[test]
    fn test_digest_spans_multiple_chunks() {
        let data = vec![0xabu8; CHUNK_SIZE * 3 + 17];
        let streamed = digest_reader(&data[..]).unwrap();
        let direct = hex::encode(Sha256::digest(&data));
        assert_eq!(streamed, direct);
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(
            digest_reader(&b""[..]).unwrap(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_match_is_case_insensitive() {
        assert!(digests_match(HELLO_WORLD, &HELLO_WORLD.to_uppercase()));
        assert!(digests_match(HELLO_WORLD, &format!("  {}\n", HELLO_WORLD)));
        assert!(!digests_match(HELLO_WORLD, "abc"));
        assert!(!digests_match("", ""));
    }

    #[test]
    fn test_checksum_verification_success() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"hello world").unwrap();
        file.flush().unwrap();

        assert!(verify_file(file.path(), HELLO_WORLD).is_ok());
    }

    #[test]
    fn test_checksum_verification_failure() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"hello world").unwrap();
        file.flush().unwrap();

        let result = verify_file(file.path(), "wrongchecksum");
        match result {
            Err(VerifyError::ChecksumMismatch { expected, actual }) => {
                assert_eq!(expected, "wrongchecksum");
                assert_eq!(actual, HELLO_WORLD);
            }
            other => panic!("expected mismatch, got {:?}", other),
        }
    }
}
