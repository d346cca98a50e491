//! Engine configuration
//!
//! This module provides the tunables for the event-loop group, modeled as
//! a builder so servers can start from sane defaults and override only
//! what their workload needs.

use std::time::Duration;

use crate::alloc::PoolConfig;

/// Upper bound on the write fan-out count.
///
/// More than this many queued segments per flush pass stops helping and
/// starts starving other connections on the loop.
pub const MAX_WRITE_FANOUT: usize = 127;

/// Engine-wide configuration.
///
/// One instance is handed to the event-loop group at startup; per-loop
/// state (pools, read buffers) is derived from it.
///
/// # Examples
///
/// ```
/// use longeron_core::options::EngineOptions;
/// use std::time::Duration;
///
/// let opts = EngineOptions::default()
///     .with_workers(4)
///     .with_idle_time(Duration::from_secs(10));
/// ```
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Number of worker event loops.
    ///
    /// Each worker is one OS thread owning its own reactor, buffer pool,
    /// and connections.
    /// - Default: the number of logical CPUs
    pub workers: usize,

    /// Idle timeout per connection.
    ///
    /// A connection with no inbound bytes for this long is surfaced to the
    /// codec's ping hook. The loop never force-closes on idleness; closing
    /// policy belongs to the codec or application.
    /// - Default: 30 seconds
    pub idle_time: Duration,

    /// Read buffer ceiling (bytes).
    ///
    /// Each connection reads into a single reusable buffer of at most this
    /// size per pass.
    /// - Default: 512 KiB
    pub read_buffer_ceiling: usize,

    /// Write backlog limit (bytes).
    ///
    /// Queued outbound bytes above this pause reads for the connection
    /// until the queue drains.
    /// - Default: 256 KiB
    pub write_backlog_limit: usize,

    /// Write fan-out count.
    ///
    /// Maximum outbound segments written per flush pass before the actor
    /// yields back to reading.
    /// - Default: 32, capped at [`MAX_WRITE_FANOUT`]
    pub write_fanout: usize,

    /// Task fairness cap.
    ///
    /// Maximum submitted tasks drained per loop pass so cross-thread work
    /// cannot starve I/O dispatch.
    /// - Default: 32
    pub task_fairness_cap: usize,

    /// Shutdown grace period.
    ///
    /// Time a stopping loop gives in-flight writes to drain before
    /// force-closing the remaining connections.
    /// - Default: 1 second
    pub shutdown_grace: Duration,

    /// TCP keepalive probe idle time.
    ///
    /// When set, accepted and dialed sockets get kernel keepalive probing
    /// with this idle time.
    /// - Default: disabled
    pub keepalive: Option<Duration>,

    /// Per-worker buffer pool sizing.
    pub pool: PoolConfig,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            workers: num_cpus::get(),
            idle_time: Duration::from_secs(30),
            read_buffer_ceiling: 512 * 1024,
            write_backlog_limit: 256 * 1024,
            write_fanout: 32,
            task_fairness_cap: 32,
            shutdown_grace: Duration::from_secs(1),
            keepalive: None,
            pool: PoolConfig::default(),
        }
    }
}

impl EngineOptions {
    /// Create options with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the worker count. Zero is coerced to one.
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Set the per-connection idle timeout.
    #[must_use]
    pub fn with_idle_time(mut self, idle_time: Duration) -> Self {
        self.idle_time = idle_time;
        self
    }

    /// Set the read buffer ceiling.
    ///
    /// # Examples
    ///
    /// ```
    /// use longeron_core::options::EngineOptions;
    ///
    /// // Small buffers for many mostly-idle connections
    /// let opts = EngineOptions::new().with_read_buffer_ceiling(16 * 1024);
    /// ```
    #[must_use]
    pub fn with_read_buffer_ceiling(mut self, bytes: usize) -> Self {
        self.read_buffer_ceiling = bytes.max(1);
        self
    }

    /// Set the write backlog limit in bytes.
    #[must_use]
    pub fn with_write_backlog_limit(mut self, bytes: usize) -> Self {
        self.write_backlog_limit = bytes;
        self
    }

    /// Set the write fan-out count, capped at [`MAX_WRITE_FANOUT`].
    #[must_use]
    pub fn with_write_fanout(mut self, count: usize) -> Self {
        self.write_fanout = count.clamp(1, MAX_WRITE_FANOUT);
        self
    }

    /// Set the task fairness cap.
    #[must_use]
    pub fn with_task_fairness_cap(mut self, cap: usize) -> Self {
        self.task_fairness_cap = cap.max(1);
        self
    }

    /// Set the shutdown grace period.
    #[must_use]
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Enable TCP keepalive probing with the given idle time.
    #[must_use]
    pub fn with_keepalive(mut self, idle: Duration) -> Self {
        self.keepalive = Some(idle);
        self
    }

    /// Set the per-worker pool sizing.
    #[must_use]
    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Derive pool capacity from a total memory budget spread across the
    /// configured workers.
    #[must_use]
    pub fn with_pool_budget(mut self, total_budget: usize, unit: usize, overcommit: usize) -> Self {
        self.pool = PoolConfig::derive(total_budget, unit, self.workers, overcommit);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options() {
        let opts = EngineOptions::default();
        assert!(opts.workers >= 1);
        assert_eq!(opts.idle_time, Duration::from_secs(30));
        assert_eq!(opts.read_buffer_ceiling, 512 * 1024);
        assert_eq!(opts.write_fanout, 32);
        assert!(opts.keepalive.is_none());
        assert_eq!(opts.pool.unit, 512);
    }

    #[test]
    fn builder_pattern() {
        let opts = EngineOptions::new()
            .with_workers(2)
            .with_idle_time(Duration::from_secs(5))
            .with_write_backlog_limit(64 * 1024);

        assert_eq!(opts.workers, 2);
        assert_eq!(opts.idle_time, Duration::from_secs(5));
        assert_eq!(opts.write_backlog_limit, 64 * 1024);
    }

    #[test]
    fn fanout_is_capped() {
        let opts = EngineOptions::new().with_write_fanout(4096);
        assert_eq!(opts.write_fanout, MAX_WRITE_FANOUT);

        let opts = EngineOptions::new().with_write_fanout(0);
        assert_eq!(opts.write_fanout, 1);
    }

    #[test]
    fn zero_workers_coerced() {
        let opts = EngineOptions::new().with_workers(0);
        assert_eq!(opts.workers, 1);
    }

    #[test]
    fn pool_budget_derivation() {
        let opts = EngineOptions::new()
            .with_workers(4)
            .with_pool_budget(64 * 1024 * 1024, 512, 32);
        assert_eq!(opts.pool.capacity, 1024);
    }
}
