//! Timeout wrappers for I/O operations
//!
//! The read path uses these to bound how long a connection may sit silent
//! before its idle hook fires.

use compio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use compio::time::timeout;
use std::io;
use std::time::Duration;

/// Execute an async read with an optional timeout.
///
/// `None` blocks indefinitely. On elapse the buffer is lost with the
/// cancelled operation, so callers hand in a fresh or recoverable buffer.
///
/// # Errors
///
/// Returns `io::ErrorKind::TimedOut` if the duration elapses before any
/// bytes arrive.
pub async fn read_with_timeout<S, B>(
    stream: &mut S,
    buf: B,
    duration: Option<Duration>,
) -> io::Result<compio::buf::BufResult<usize, B>>
where
    S: AsyncRead + Unpin,
    B: compio::buf::IoBufMut,
{
    match duration {
        None => Ok(stream.read(buf).await),
        Some(d) => match timeout(d, stream.read(buf)).await {
            Ok(result) => Ok(result),
            Err(_elapsed) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "read operation timed out",
            )),
        },
    }
}

/// Execute an async write_all with an optional timeout.
///
/// # Errors
///
/// Returns `io::ErrorKind::TimedOut` if the duration elapses before the
/// full buffer is accepted.
pub async fn write_all_with_timeout<S, B>(
    stream: &mut S,
    buf: B,
    duration: Option<Duration>,
) -> io::Result<compio::buf::BufResult<(), B>>
where
    S: AsyncWrite + Unpin,
    B: compio::buf::IoBuf,
{
    match duration {
        None => Ok(stream.write_all(buf).await),
        Some(d) => match timeout(d, stream.write_all(buf)).await {
            Ok(result) => Ok(result),
            Err(_elapsed) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "write operation timed out",
            )),
        },
    }
}
