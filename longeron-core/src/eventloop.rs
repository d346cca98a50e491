//! Event-loop group
//!
//! One worker == one OS thread owning a compio runtime, a buffer pool,
//! and the connections assigned to it. Work enters a loop only through
//! its task queue; connection state never crosses loops, which the type
//! system enforces because everything loop-local is `!Send`.
//!
//! Lifecycle per loop: `Idle -> Running -> Stopping -> Stopped`, with
//! `Stopped` terminal. Submission is accepted in `Idle` (queued until the
//! thread comes up) and `Running`, and refused afterwards.

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::alloc::{PagePool, PoolGroup};
use crate::error::{CoreError, Result};
use crate::options::EngineOptions;

const STATE_IDLE: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_STOPPING: u8 = 2;
const STATE_STOPPED: u8 = 3;

/// Observable loop lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

impl LoopState {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            STATE_IDLE => Self::Idle,
            STATE_RUNNING => Self::Running,
            STATE_STOPPING => Self::Stopping,
            _ => Self::Stopped,
        }
    }
}

/// A unit of work executed on a loop thread.
pub type LoopTask = Box<dyn FnOnce(&LoopContext) + Send + 'static>;

struct LoopShared {
    index: usize,
    state: AtomicU8,
    tx: flume::Sender<LoopTask>,
}

impl LoopShared {
    fn begin_stopping(&self) {
        let _ = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |s| {
                (s < STATE_STOPPING).then_some(STATE_STOPPING)
            });
    }
}

/// Cheap cloneable handle to one worker loop.
#[derive(Clone)]
pub struct EventLoop {
    shared: Arc<LoopShared>,
}

impl EventLoop {
    /// Position of this loop within its group.
    #[must_use]
    pub fn index(&self) -> usize {
        self.shared.index
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LoopState {
        LoopState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    /// Enqueue `task` to run on this loop's thread.
    ///
    /// Callable from any thread. The task runs inside the loop's runtime,
    /// so it may spawn loop-local futures.
    ///
    /// # Errors
    ///
    /// [`CoreError::LoopClosed`] once the loop is stopping or stopped.
    pub fn submit<F>(&self, task: F) -> Result<()>
    where
        F: FnOnce(&LoopContext) + Send + 'static,
    {
        match self.state() {
            LoopState::Idle | LoopState::Running => self
                .shared
                .tx
                .send(Box::new(task))
                .map_err(|_| CoreError::ChannelSend),
            LoopState::Stopping | LoopState::Stopped => Err(CoreError::LoopClosed),
        }
    }
}

impl std::fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoop")
            .field("index", &self.shared.index)
            .field("state", &self.state())
            .finish()
    }
}

/// Loop-local context handed to every task and pump.
///
/// Not `Send`: a context is only ever seen by code already running on
/// its loop.
#[derive(Clone)]
pub struct LoopContext {
    shared: Arc<LoopShared>,
    pool: PagePool,
    options: EngineOptions,
}

impl LoopContext {
    /// Position of the owning loop within its group.
    #[must_use]
    pub fn index(&self) -> usize {
        self.shared.index
    }

    /// This loop's buffer pool.
    #[must_use]
    pub fn pool(&self) -> &PagePool {
        &self.pool
    }

    /// Engine configuration.
    #[must_use]
    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Whether the owning loop has begun shutting down.
    #[must_use]
    pub fn is_stopping(&self) -> bool {
        self.shared.state.load(Ordering::Acquire) >= STATE_STOPPING
    }
}

/// A fixed set of worker loops sharing one configuration.
///
/// Dropping the group shuts it down: loops stop accepting work, give
/// in-flight writes `shutdown_grace` to drain, then force-close.
pub struct EventLoopGroup {
    loops: Vec<EventLoop>,
    handles: Mutex<Vec<thread::JoinHandle<()>>>,
    next: AtomicUsize,
    pools: PoolGroup,
    options: EngineOptions,
}

impl EventLoopGroup {
    /// Spawn `options.workers` loop threads.
    ///
    /// # Errors
    ///
    /// Fails if an OS thread cannot be spawned.
    pub fn new(options: EngineOptions) -> Result<Self> {
        let workers = options.workers.max(1);
        let mut loops = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);

        for index in 0..workers {
            let (tx, rx) = flume::unbounded::<LoopTask>();
            let shared = Arc::new(LoopShared {
                index,
                state: AtomicU8::new(STATE_IDLE),
                tx,
            });
            let thread_shared = Arc::clone(&shared);
            let thread_options = options.clone();
            let handle = thread::Builder::new()
                .name(format!("longeron-loop-{index}"))
                .spawn(move || run_loop(&thread_shared, &rx, thread_options))
                .map_err(CoreError::Io)?;
            loops.push(EventLoop { shared });
            handles.push(handle);
        }

        tracing::debug!("[LOOP] group started with {workers} workers");
        Ok(Self {
            loops,
            handles: Mutex::new(handles),
            next: AtomicUsize::new(0),
            pools: PoolGroup::new(&vec![options.pool; workers]),
            options,
        })
    }

    /// Number of worker loops.
    #[must_use]
    pub fn len(&self) -> usize {
        self.loops.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }

    /// Engine configuration shared by every loop.
    #[must_use]
    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Per-worker pool sizing index.
    #[must_use]
    pub fn pools(&self) -> &PoolGroup {
        &self.pools
    }

    /// Round-robin loop selection for new connections.
    #[must_use]
    pub fn next_loop(&self) -> &EventLoop {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        &self.loops[n % self.loops.len()]
    }

    /// Loop handle by index.
    #[must_use]
    pub fn event_loop(&self, index: usize) -> Option<&EventLoop> {
        self.loops.get(index)
    }

    /// All loop handles, in index order.
    #[must_use]
    pub fn loops(&self) -> &[EventLoop] {
        &self.loops
    }

    /// Stop every loop and wait for its thread to exit.
    ///
    /// New submissions are refused immediately; each loop gives in-flight
    /// writes `shutdown_grace` to drain before its runtime is dropped.
    /// Idempotent.
    pub fn shutdown(&self) {
        for event_loop in &self.loops {
            event_loop.shared.begin_stopping();
            // Wake a loop parked on an empty queue.
            let _ = event_loop.shared.tx.send(Box::new(|_| {}));
        }
        for handle in self.handles.lock().drain(..) {
            if handle.join().is_err() {
                tracing::warn!("[LOOP] worker thread panicked during shutdown");
            }
        }
    }
}

impl Drop for EventLoopGroup {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for EventLoopGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoopGroup")
            .field("workers", &self.loops.len())
            .finish_non_exhaustive()
    }
}

fn run_loop(shared: &Arc<LoopShared>, rx: &flume::Receiver<LoopTask>, options: EngineOptions) {
    let runtime = match compio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(err) => {
            tracing::error!("[LOOP] loop {} failed to start: {err}", shared.index);
            shared.state.store(STATE_STOPPED, Ordering::Release);
            return;
        }
    };

    let ctx = LoopContext {
        shared: Arc::clone(shared),
        pool: PagePool::new(options.pool),
        options: options.clone(),
    };

    shared.state.store(STATE_RUNNING, Ordering::Release);
    tracing::debug!("[LOOP] loop {} running", shared.index);

    runtime.block_on(drive(shared, rx, &ctx, &options));

    // Grace period: connection pumps keep running while we sleep, so
    // queued writes get a chance to reach the socket.
    runtime.block_on(compio::time::sleep(options.shutdown_grace));
    drop(runtime);

    shared.state.store(STATE_STOPPED, Ordering::Release);
    tracing::debug!("[LOOP] loop {} stopped", shared.index);
}

/// Main loop future: park on the queue, then drain a bounded batch of
/// tasks so submissions cannot starve connection pumps.
async fn drive(
    shared: &Arc<LoopShared>,
    rx: &flume::Receiver<LoopTask>,
    ctx: &LoopContext,
    options: &EngineOptions,
) {
    loop {
        if shared.state.load(Ordering::Acquire) >= STATE_STOPPING {
            break;
        }
        let task = match rx.recv_async().await {
            Ok(task) => task,
            Err(_) => break,
        };
        task(ctx);

        let mut drained = 1;
        while drained < options.task_fairness_cap {
            match rx.try_recv() {
                Ok(task) => {
                    task(ctx);
                    drained += 1;
                }
                Err(_) => break,
            }
        }
        compio::time::sleep(Duration::from_micros(1)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn small_options(workers: usize) -> EngineOptions {
        EngineOptions::new()
            .with_workers(workers)
            .with_shutdown_grace(Duration::from_millis(10))
    }

    #[test]
    fn tasks_run_on_loop_threads() {
        let group = EventLoopGroup::new(small_options(2)).unwrap();
        let (tx, rx) = flume::bounded(2);

        for _ in 0..2 {
            let tx = tx.clone();
            group
                .next_loop()
                .submit(move |ctx| {
                    let _ = tx.send((ctx.index(), std::thread::current().name().map(String::from)));
                })
                .unwrap();
        }

        let mut seen = Vec::new();
        for _ in 0..2 {
            let (index, name) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
            assert_eq!(
                name.as_deref(),
                Some(format!("longeron-loop-{index}").as_str())
            );
            seen.push(index);
        }
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1]);
    }

    #[test]
    fn round_robin_covers_all_loops() {
        let group = EventLoopGroup::new(small_options(3)).unwrap();
        let indices: Vec<usize> = (0..6).map(|_| group.next_loop().index()).collect();
        assert_eq!(indices, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn submit_after_shutdown_is_refused() {
        let group = EventLoopGroup::new(small_options(1)).unwrap();
        group.shutdown();

        let err = group.next_loop().submit(|_| {}).unwrap_err();
        assert!(matches!(err, CoreError::LoopClosed));
        assert_eq!(group.next_loop().state(), LoopState::Stopped);
    }

    #[test]
    fn shutdown_is_idempotent() {
        let group = EventLoopGroup::new(small_options(2)).unwrap();
        group.shutdown();
        group.shutdown();
        for event_loop in group.loops() {
            assert_eq!(event_loop.state(), LoopState::Stopped);
        }
    }

    #[test]
    fn context_exposes_pool_and_options() {
        let group = EventLoopGroup::new(small_options(1)).unwrap();
        let (tx, rx) = flume::bounded(1);
        group
            .next_loop()
            .submit(move |ctx| {
                let _ = tx.send((ctx.pool().unit(), ctx.options().workers, ctx.is_stopping()));
            })
            .unwrap();
        let (unit, workers, stopping) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(unit, 512);
        assert_eq!(workers, 1);
        assert!(!stopping);
    }
}
