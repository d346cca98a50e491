//! Per-connection state
//!
//! A [`Connection`] is the engine-side record for one TCP peer: identity,
//! typed attributes, the outbound write queue, and the backpressure gate.
//! It is created on the owning loop thread and never leaves it; the
//! socket itself is owned by the connection's read and write pumps.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Instant;

use crate::alloc::WireBuf;
use crate::attrs::{AttributeMap, AttributeRegistry};
use crate::backpressure::WriteBacklog;
use crate::buffer::WriteQueue;
use crate::codec::EncodeOutput;

/// First id handed out; the range below it is reserved.
const FIRST_ID: i32 = 0x1000;

static NEXT_ID: AtomicI32 = AtomicI32::new(FIRST_ID);

/// Successor of `id` in the id ring `[FIRST_ID, i32::MAX)`.
const fn next_id_after(id: i32) -> i32 {
    if id >= i32::MAX - 1 {
        FIRST_ID
    } else {
        id + 1
    }
}

/// Claim the next connection id from the process-wide ring.
///
/// Ids wrap around rather than overflow; uniqueness is practical, not
/// guaranteed across a full wrap.
pub(crate) fn next_connection_id() -> i32 {
    match NEXT_ID.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |id| {
        Some(next_id_after(id))
    }) {
        Ok(prev) | Err(prev) => prev,
    }
}

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Reads and writes flowing.
    Open,
    /// Close requested; queued writes drain, then the socket closes.
    Closing,
    /// Socket gone. Terminal.
    Closed,
}

/// Engine-side state for one TCP peer.
pub struct Connection {
    id: i32,
    peer_addr: Option<SocketAddr>,
    local_addr: Option<SocketAddr>,
    attrs: AttributeMap,
    outbound: WriteQueue,
    backlog: WriteBacklog,
    state: ConnState,
    opened_at: Instant,
}

impl Connection {
    /// Build connection state with a fresh id.
    ///
    /// Constructing the first connection freezes the global attribute key
    /// set for `Connection`, so applications register their keys before
    /// starting the engine.
    pub(crate) fn new(
        peer_addr: Option<SocketAddr>,
        local_addr: Option<SocketAddr>,
        write_backlog_limit: usize,
    ) -> Self {
        Self {
            id: next_connection_id(),
            peer_addr,
            local_addr,
            attrs: AttributeMap::for_owner::<Connection>(AttributeRegistry::global()),
            outbound: WriteQueue::new(),
            backlog: WriteBacklog::new(write_backlog_limit),
            state: ConnState::Open,
            opened_at: Instant::now(),
        }
    }

    /// Build a connection record with no socket behind it.
    ///
    /// Intended for exercising codecs and handlers outside a running
    /// engine; queued writes accumulate but are never flushed.
    #[must_use]
    pub fn standalone(write_backlog_limit: usize) -> Self {
        Self::new(None, None, write_backlog_limit)
    }

    /// Engine-assigned connection id.
    #[must_use]
    pub fn id(&self) -> i32 {
        self.id
    }

    /// Remote peer address, when known.
    #[must_use]
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Local socket address, when known.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// When this connection was accepted or dialed.
    #[must_use]
    pub fn opened_at(&self) -> Instant {
        self.opened_at
    }

    /// Typed per-connection attributes.
    #[must_use]
    pub fn attrs(&self) -> &AttributeMap {
        &self.attrs
    }

    /// Mutable access to the attribute storage.
    pub fn attrs_mut(&mut self) -> &mut AttributeMap {
        &mut self.attrs
    }

    #[must_use]
    pub fn state(&self) -> ConnState {
        self.state
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state == ConnState::Open
    }

    #[must_use]
    pub fn is_closing(&self) -> bool {
        self.state != ConnState::Open
    }

    /// Request an orderly close: queued writes still drain, reads stop.
    pub fn close(&mut self) {
        if self.state == ConnState::Open {
            self.state = ConnState::Closing;
        }
    }

    pub(crate) fn mark_closed(&mut self) {
        self.state = ConnState::Closed;
    }

    /// Queue one raw outbound segment.
    pub fn queue(&mut self, buf: impl Into<WireBuf>) {
        self.outbound.push(buf);
    }

    /// Queue the segments of an encoded frame.
    pub fn queue_output(&mut self, out: EncodeOutput) {
        match out {
            EncodeOutput::Single(buf) => self.outbound.push(buf),
            EncodeOutput::HeaderAndBody(header, body) => {
                self.outbound.push(header);
                self.outbound.push(body);
            }
        }
    }

    /// Bytes currently queued for write.
    #[must_use]
    pub fn queued_write_bytes(&self) -> usize {
        self.outbound.bytes()
    }

    /// Whether reads are paused by write backlog.
    #[must_use]
    pub fn write_paused(&self) -> bool {
        self.backlog.is_paused()
    }

    /// Re-evaluate the backpressure gate against the current queue depth.
    pub(crate) fn evaluate_backlog(&self) -> bool {
        self.backlog.evaluate(self.outbound.bytes())
    }

    pub(crate) fn next_segment(&mut self) -> Option<WireBuf> {
        self.outbound.pop()
    }

    pub(crate) fn requeue_segment(&mut self, buf: WireBuf) {
        self.outbound.requeue_front(buf);
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer_addr)
            .field("state", &self.state)
            .field("queued_bytes", &self.outbound.bytes())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::ByteView;

    #[test]
    fn ids_start_in_ring_range() {
        let a = next_connection_id();
        let b = next_connection_id();
        assert!(a >= FIRST_ID);
        assert!(b >= FIRST_ID);
        assert_ne!(a, b);
    }

    #[test]
    fn id_ring_wraps_before_overflow() {
        assert_eq!(next_id_after(FIRST_ID), FIRST_ID + 1);
        assert_eq!(next_id_after(i32::MAX - 1), FIRST_ID);
        assert_eq!(next_id_after(i32::MAX), FIRST_ID);
    }

    #[test]
    fn close_is_one_way() {
        let mut conn = Connection::standalone(1024);
        assert!(conn.is_open());

        conn.close();
        assert_eq!(conn.state(), ConnState::Closing);
        assert!(conn.is_closing());

        conn.mark_closed();
        conn.close();
        assert_eq!(conn.state(), ConnState::Closed);
    }

    #[test]
    fn queue_output_splits_segments() {
        let mut conn = Connection::standalone(1024);
        conn.queue_output(EncodeOutput::HeaderAndBody(
            ByteView::copy_from_slice(b"head").into(),
            ByteView::copy_from_slice(b"body!").into(),
        ));
        assert_eq!(conn.queued_write_bytes(), 9);
        assert_eq!(conn.next_segment().unwrap().as_slice(), b"head");
        assert_eq!(conn.next_segment().unwrap().as_slice(), b"body!");
        assert!(conn.next_segment().is_none());
    }

    #[test]
    fn backlog_gates_on_queue_depth() {
        let mut conn = Connection::standalone(8);
        conn.queue(ByteView::copy_from_slice(b"0123456789"));
        assert!(conn.evaluate_backlog());
        assert!(conn.write_paused());

        while conn.next_segment().is_some() {}
        assert!(!conn.evaluate_backlog());
        assert!(!conn.write_paused());
    }
}
