//! Protocol codec contract
//!
//! A codec translates between wire bytes and typed frames for one
//! connection. The engine owns the read and write pumps; the codec owns
//! framing state. One codec instance serves one connection for its whole
//! life, so per-connection decode state (partial start line, body
//! countdown) lives directly in the codec instance instead of a separate
//! attachment object.

use crate::alloc::{ByteBuf, PagePool, WireBuf};
use crate::connection::Connection;
use crate::error::{DecodeError, EncodeError};

/// Encoded output of one frame.
///
/// `Single` is the common case. `HeaderAndBody` lets a codec hand back a
/// freshly encoded header plus an already-materialized body as two
/// segments, so large bodies go to the socket without being copied into
/// the header buffer.
#[derive(Debug)]
pub enum EncodeOutput {
    /// One contiguous segment.
    Single(WireBuf),
    /// Header segment followed by a zero-copy body segment.
    HeaderAndBody(WireBuf, WireBuf),
}

impl EncodeOutput {
    /// Total bytes across all segments.
    #[must_use]
    pub fn total_len(&self) -> usize {
        match self {
            Self::Single(buf) => buf.len(),
            Self::HeaderAndBody(header, body) => header.len() + body.len(),
        }
    }
}

/// Stateful translator between wire bytes and frames.
///
/// # Decode contract
///
/// The read pump calls [`decode`](Codec::decode) repeatedly after each
/// socket read until it returns `Ok(None)`. The codec either consumes
/// input as it goes (staging partial frames internally) or leaves the
/// unconsumed tail in `input` for the next call; it must never block.
/// `Ok(None)` means "no complete frame yet", which is not an error.
///
/// # Encode contract
///
/// `encode` sizes its output exactly and allocates from the given pool.
/// On error, buffers allocated during the attempt are dropped with the
/// attempt; nothing reaches the write queue.
pub trait Codec {
    /// Decoded message type.
    type Frame;

    /// Short protocol tag used in logs.
    fn protocol(&self) -> &'static str;

    /// Minimum readable bytes before `decode` is worth calling.
    fn header_length(&self) -> usize {
        0
    }

    /// Called once when the codec is bound to its connection.
    fn attach(&mut self, _conn: &mut Connection) {}

    /// Try to decode one frame from `input`.
    fn decode(
        &mut self,
        conn: &mut Connection,
        input: &mut ByteBuf,
    ) -> Result<Option<Self::Frame>, DecodeError>;

    /// Encode `frame` into one or two write segments.
    fn encode(
        &mut self,
        conn: &mut Connection,
        pool: &PagePool,
        frame: Self::Frame,
    ) -> Result<EncodeOutput, EncodeError>;

    /// Idle-timeout hook. A heartbeat-capable protocol returns a ping
    /// frame to write; the default does nothing and leaves closing
    /// policy to the application.
    fn ping(
        &mut self,
        _conn: &mut Connection,
        _pool: &PagePool,
    ) -> Result<Option<EncodeOutput>, EncodeError> {
        Ok(None)
    }

    /// Heartbeat response hook.
    fn pong(&mut self, conn: &mut Connection) {
        tracing::debug!(
            "[CODEC] {} pong on connection {}",
            self.protocol(),
            conn.id()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::ByteView;

    #[test]
    fn total_len_spans_segments() {
        let single = EncodeOutput::Single(ByteView::copy_from_slice(b"abc").into());
        assert_eq!(single.total_len(), 3);

        let pair = EncodeOutput::HeaderAndBody(
            ByteView::copy_from_slice(b"header").into(),
            ByteView::copy_from_slice(b"body").into(),
        );
        assert_eq!(pair.total_len(), 10);
    }
}
