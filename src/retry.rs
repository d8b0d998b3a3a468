//! Retry wrapper for device calls interrupted by a signal.

use std::io;

/// Run `op` until it finishes with anything other than `EINTR`.
///
/// Only [`io::ErrorKind::Interrupted`] is retried, with the same closure and
/// therefore the same arguments. Every other error is returned immediately.
pub fn retry_interrupted<T, F>(mut op: F) -> io::Result<T>
where
    F: FnMut() -> io::Result<T>,
{
    loop {
        match op() {
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {
                tracing::debug!("device call interrupted by signal, retrying");
            }
            result => return result,
        }
    }
}
