//! Application event handler contract
//!
//! The handler is the application's seam into the engine: decoded frames
//! arrive at [`IoEventHandle::accept`] on the connection's own loop
//! thread, and the optional returned frame is encoded and queued as the
//! reply. Handlers never see sockets or buffers.

use crate::connection::Connection;
use crate::error::CoreError;

/// Per-connection application callbacks.
///
/// One handler instance serves one connection and runs only on that
/// connection's loop thread, so implementations can keep plain mutable
/// state without synchronization.
///
/// Errors returned from `accept` are routed to [`on_error`]
/// (IoEventHandle::on_error); they never unwind into the reactor.
pub trait IoEventHandle<F> {
    /// Handle one decoded frame, optionally returning an immediate reply.
    ///
    /// # Errors
    ///
    /// Returns an error to report a failed frame; the connection closes
    /// only if the error classifies as a connection error.
    fn accept(&mut self, conn: &mut Connection, frame: F) -> Result<Option<F>, CoreError>;

    /// Called once when the connection is ready.
    fn on_open(&mut self, _conn: &mut Connection) {}

    /// Called once when the connection has closed.
    fn on_close(&mut self, _conn: &mut Connection) {}

    /// Called for every error attributed to this connection.
    fn on_error(&mut self, conn: &mut Connection, err: &CoreError) {
        tracing::warn!("[HANDLER] connection {}: {err}", conn.id());
    }
}
