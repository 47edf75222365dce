//! SHA-256 content verification for layer blobs.
//!
//! Blobs are hashed while they stream, so verification never needs a
//! second pass over the data.

use std::io::{self, Read};

use burrow_common::error::{BurrowError, Result};
use burrow_common::types::Digest;
use sha2::{Digest as _, Sha256};

/// Hashes every byte read through it.
pub struct DigestReader<R> {
    inner: R,
    hasher: Sha256,
    bytes: u64,
}

impl<R: Read> DigestReader<R> {
    /// Wraps `inner`.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            bytes: 0,
        }
    }

    /// Returns the number of bytes read so far.
    pub const fn bytes_read(&self) -> u64 {
        self.bytes
    }

    /// Reads the rest of the stream and returns the hex SHA-256 of everything read.
    ///
    /// # Errors
    ///
    /// Returns the I/O error raised while draining.
    pub fn finish(mut self) -> io::Result<String> {
        let _ = io::copy(&mut self, &mut io::sink())?;
        Ok(format!("{:x}", self.hasher.finalize()))
    }
}

impl<R: Read> Read for DigestReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        self.bytes += n as u64;
        Ok(n)
    }
}

/// Drains `reader` and checks the result against `expected`.
///
/// Digests that are not SHA-256 are logged and accepted.
///
/// # Errors
///
/// Returns `BurrowError::DigestMismatch` when the hashes differ,
/// `BurrowError::BlobFetch` when the rest of the blob cannot be read, and
/// `BurrowError::Config` when `expected` is not a digest at all.
pub fn verify_digest<R: Read>(reader: DigestReader<R>, expected: &str) -> Result<()> {
    let digest = Digest::parse(expected)?;
    let Some(expected_hex) = digest.sha256_hex() else {
        tracing::warn!(digest = %digest, "skipping verification of non-sha256 digest");
        return Ok(());
    };

    let actual = reader.finish().map_err(|e| {
        if burrow_common::types::is_cancellation(&e) {
            BurrowError::Cancelled
        } else {
            BurrowError::BlobFetch {
                digest: expected.to_string(),
                message: format!("failed to read blob tail: {e}"),
            }
        }
    })?;

    if actual != expected_hex {
        return Err(BurrowError::DigestMismatch {
            digest: expected.to_string(),
            actual: format!("sha256:{actual}"),
        });
    }
    tracing::debug!(digest = %digest, "blob digest verified");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // sha256("hello")
    const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[test]
    fn digest_covers_partially_read_stream() {
        let mut reader = DigestReader::new(&b"hello"[..]);
        let mut first = [0u8; 2];
        reader.read_exact(&mut first).unwrap();
        assert_eq!(reader.bytes_read(), 2);
        assert_eq!(reader.finish().unwrap(), HELLO_SHA256);
    }

    #[test]
    fn verify_accepts_matching_digest() {
        let reader = DigestReader::new(&b"hello"[..]);
        verify_digest(reader, &format!("sha256:{HELLO_SHA256}")).unwrap();
    }

    #[test]
    fn verify_rejects_mismatch() {
        let reader = DigestReader::new(&b"hullo"[..]);
        let err = verify_digest(reader, &format!("sha256:{HELLO_SHA256}")).unwrap_err();
        assert!(matches!(err, BurrowError::DigestMismatch { .. }));
    }

    #[test]
    fn verify_skips_other_algorithms() {
        let reader = DigestReader::new(&b"anything"[..]);
        verify_digest(reader, "sha512:abcdef").unwrap();
    }
}
