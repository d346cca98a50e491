//! Backpressure: write-backlog gating
//!
//! Flow control scales with **bytes**, not message count: one giant queued
//! response should pause reads just as surely as a thousand small ones.
//! When a connection's outbound queue exceeds the configured limit, its
//! actor stops issuing reads until the queue drains back under the resume
//! threshold. This is the engine's sole flow-control mechanism.

use std::cell::Cell;

/// Per-connection read-gate driven by queued write bytes.
///
/// Pauses at `limit` and resumes at `limit / 2`. The gap keeps a
/// connection hovering near the limit from flapping between paused and
/// running on every write completion.
#[derive(Debug)]
pub struct WriteBacklog {
    limit: usize,
    paused: Cell<bool>,
}

impl WriteBacklog {
    #[must_use]
    pub const fn new(limit: usize) -> Self {
        Self {
            limit,
            paused: Cell::new(false),
        }
    }

    /// Byte limit above which reads pause.
    #[must_use]
    pub const fn limit(&self) -> usize {
        self.limit
    }

    /// Re-evaluate against the current queue depth.
    ///
    /// Returns `true` while reads should stay paused.
    pub fn evaluate(&self, queued_bytes: usize) -> bool {
        if !self.paused.get() && queued_bytes > self.limit {
            self.paused.set(true);
            tracing::debug!(
                "[BACKPRESSURE] pausing reads: {queued_bytes} bytes queued (limit {})",
                self.limit
            );
        } else if self.paused.get() && queued_bytes <= self.limit / 2 {
            self.paused.set(false);
            tracing::debug!("[BACKPRESSURE] resuming reads: {queued_bytes} bytes queued");
        }
        self.paused.get()
    }

    /// Whether reads are currently paused.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pauses_above_limit() {
        let gate = WriteBacklog::new(1000);
        assert!(!gate.evaluate(1000));
        assert!(gate.evaluate(1001));
        assert!(gate.is_paused());
    }

    #[test]
    fn resumes_with_hysteresis() {
        let gate = WriteBacklog::new(1000);
        assert!(gate.evaluate(2000));
        // Still paused between the resume threshold and the limit.
        assert!(gate.evaluate(800));
        assert!(gate.evaluate(501));
        // Resumes at half the limit.
        assert!(!gate.evaluate(500));
        assert!(!gate.is_paused());
    }

    #[test]
    fn large_single_buffer_counts() {
        let gate = WriteBacklog::new(64 * 1024);
        assert!(gate.evaluate(1024 * 1024));
        assert!(!gate.evaluate(0));
    }
}
