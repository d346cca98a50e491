//! TCP socket tuning.
//!
//! Protocol-agnostic socket options applied to accepted and dialed
//! connections before their actor starts.
//!
//! # Safety
//!
//! This module uses unsafe code to borrow the raw file descriptor/socket
//! for configuration through `socket2`. The borrowed handle is forgotten
//! before returning so the stream keeps ownership.

#![allow(unsafe_code)]

use std::io;
use std::time::Duration;

/// Enable TCP_NODELAY on a compio TcpStream.
///
/// Disables Nagle's algorithm so small frames leave immediately.
///
/// # Errors
///
/// Returns an error if the socket option cannot be set.
#[inline]
pub fn enable_tcp_nodelay(stream: &compio::net::TcpStream) -> io::Result<()> {
    with_socket(stream, |sock| sock.set_nodelay(true))
}

/// Enable TCP keepalive probing with the given idle time.
///
/// Dead peers behind NATs and dropped links are detected by the kernel
/// instead of holding a connection slot forever.
///
/// # Errors
///
/// Returns an error if the socket option cannot be set.
#[inline]
pub fn enable_tcp_keepalive(stream: &compio::net::TcpStream, idle: Duration) -> io::Result<()> {
    with_socket(stream, |sock| {
        let keepalive = socket2::TcpKeepalive::new().with_time(idle);
        sock.set_tcp_keepalive(&keepalive)
    })
}

/// Shut down both directions of the stream at the socket level.
///
/// Unblocks a read pending on another clone of the stream, so a writer
/// that hits a fatal error can stop its paired reader.
///
/// # Errors
///
/// Returns an error if the socket refuses the shutdown.
#[inline]
pub fn shutdown_both(stream: &compio::net::TcpStream) -> io::Result<()> {
    with_socket(stream, |sock| sock.shutdown(std::net::Shutdown::Both))
}

fn with_socket<F>(stream: &compio::net::TcpStream, f: F) -> io::Result<()>
where
    F: FnOnce(&socket2::Socket) -> io::Result<()>,
{
    #[cfg(unix)]
    {
        use std::os::unix::io::{AsRawFd, FromRawFd};
        let fd = stream.as_raw_fd();
        let sock = unsafe { socket2::Socket::from_raw_fd(fd) };
        let result = f(&sock);
        std::mem::forget(sock); // Don't close the fd
        result
    }

    #[cfg(windows)]
    {
        use std::os::windows::io::{AsRawSocket, FromRawSocket};
        let raw = stream.as_raw_socket();
        let sock = unsafe { socket2::Socket::from_raw_socket(raw) };
        let result = f(&sock);
        std::mem::forget(sock); // Don't close the socket
        result
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = f;
        Ok(())
    }
}
