//! Reader adapters applied to layer blob streams.

use std::io::{self, Read};

use burrow_common::types::{CancelToken, cancellation_error};

/// A boxed, sendable blob byte stream.
pub type BlobStream = Box<dyn Read + Send>;

/// Fails every read once its token is cancelled.
///
/// Wrapping a network body in this adapter aborts an in-flight download
/// at the next chunk boundary.
pub struct CancellableReader<R> {
    inner: R,
    cancel: CancelToken,
}

impl<R: Read> CancellableReader<R> {
    /// Wraps `inner`, observing `cancel`.
    pub const fn new(inner: R, cancel: CancelToken) -> Self {
        Self { inner, cancel }
    }
}

impl<R: Read> Read for CancellableReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.cancel.is_cancelled() {
            return Err(cancellation_error());
        }
        self.inner.read(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burrow_common::types::is_cancellation;

    #[test]
    fn reads_pass_through_until_cancelled() {
        let cancel = CancelToken::new();
        let mut reader = CancellableReader::new(&b"abcdef"[..], cancel.clone());

        let mut buf = [0u8; 3];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"abc");

        cancel.cancel();
        let err = reader.read(&mut buf).unwrap_err();
        assert!(is_cancellation(&err));
    }
}
