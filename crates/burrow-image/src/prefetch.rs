//! Concurrent blob download with ordered consumption.
//!
//! A bounded pool of scoped worker threads spools layer blobs into
//! anonymous temporary files. The caller's thread consumes them strictly
//! in manifest order, so extraction into the shared root stays serial.

use std::fs::File;
use std::io::{self, Seek};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;

use burrow_common::error::{BurrowError, Result};
use burrow_common::types::{CancelToken, is_cancellation};

use crate::manifest::Descriptor;
use crate::registry::{ImageRegistry, RegistrySession};
use crate::stream::{BlobStream, CancellableReader};

/// Downloads every layer of `session` with `workers` threads and hands the
/// blobs to `apply` in manifest order.
///
/// When `apply` fails, outstanding downloads are aborted and the error is
/// returned.
///
/// # Errors
///
/// Returns the first error in manifest order, from either a download or
/// `apply`.
pub fn fetch_ordered<R, F>(
    registry: &R,
    session: &RegistrySession,
    workers: usize,
    cancel: &CancelToken,
    mut apply: F,
) -> Result<()>
where
    R: ImageRegistry + ?Sized,
    F: FnMut(usize, &Descriptor, BlobStream) -> Result<()>,
{
    let layers = session.manifest().layers.as_slice();
    let abort = CancelToken::new();
    let next = AtomicUsize::new(0);
    let (senders, receivers): (Vec<_>, Vec<_>) =
        layers.iter().map(|_| mpsc::channel::<Result<File>>()).unzip();

    thread::scope(|scope| {
        for worker in 0..workers.clamp(1, layers.len().max(1)) {
            let senders = senders.clone();
            let (abort, next) = (&abort, &next);
            let _ = scope.spawn(move || {
                loop {
                    let index = next.fetch_add(1, Ordering::SeqCst);
                    let Some(layer) = layers.get(index) else {
                        break;
                    };
                    if abort.is_cancelled() || cancel.is_cancelled() {
                        break;
                    }
                    tracing::debug!(worker, layer = index, digest = %layer.digest, "downloading blob");
                    let result = spool_blob(registry, session, layer, abort);
                    let failed = result.is_err();
                    let _ = senders[index].send(result);
                    if failed {
                        break;
                    }
                }
            });
        }
        drop(senders);

        for (index, (layer, receiver)) in layers.iter().zip(receivers).enumerate() {
            let spooled = receiver
                .recv()
                .map_err(|_| {
                    cancel.check().err().unwrap_or_else(|| BurrowError::BlobFetch {
                        digest: layer.digest.clone(),
                        message: "download worker exited before delivering the blob".into(),
                    })
                })
                .and_then(|result| result);
            let applied = spooled.and_then(|file| apply(index, layer, Box::new(file)));
            if let Err(err) = applied {
                abort.cancel();
                return Err(err);
            }
        }
        Ok(())
    })
}

fn spool_blob<R: ImageRegistry + ?Sized>(
    registry: &R,
    session: &RegistrySession,
    layer: &Descriptor,
    abort: &CancelToken,
) -> Result<File> {
    let stream = session.open_layer(registry, layer)?;
    let mut reader = CancellableReader::new(stream, abort.clone());
    let spool_err = |e: io::Error| {
        if is_cancellation(&e) {
            BurrowError::Cancelled
        } else {
            BurrowError::BlobFetch {
                digest: layer.digest.clone(),
                message: format!("download failed: {e}"),
            }
        }
    };

    let mut spool = tempfile::tempfile().map_err(|e| BurrowError::Io {
        path: std::env::temp_dir(),
        source: e,
    })?;
    let bytes = io::copy(&mut reader, &mut spool).map_err(spool_err)?;
    spool.rewind().map_err(spool_err)?;
    tracing::debug!(digest = %layer.digest, bytes, "blob spooled");
    Ok(spool)
}
