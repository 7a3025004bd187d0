//! Fan-out over a sequence of lazy sequences using a bounded, shared worker pool.

use std::collections::VecDeque;
use std::sync::mpsc::{sync_channel, SyncSender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock};
use std::thread;

use tracing::{debug, warn};

use crate::iter::Closeable;
use crate::FloeResult;

/// Queue slots between producers and the consumer. Producers block when the queue is full, which
/// is the backpressure that keeps lazy semantics under parallel planning.
const QUEUE_CAPACITY: usize = 256;

type Job = Box<dyn FnOnce() + Send>;

/// A fixed-size pool of worker threads shared by every scan in the process.
pub struct WorkerPool {
    sender: Mutex<SyncSender<Job>>,
    parallelism: usize,
}

impl WorkerPool {
    fn new(parallelism: usize) -> Self {
        // Jobs queue up behind the workers; a deep backlog is fine because each job is one
        // manifest drain and the per-item queue provides the actual backpressure.
        let (sender, receiver) = sync_channel::<Job>(1024);
        let receiver = Arc::new(Mutex::new(receiver));
        for i in 0..parallelism {
            let receiver = Arc::clone(&receiver);
            thread::Builder::new()
                .name(format!("floe-plan-{i}"))
                .spawn(move || loop {
                    let job = {
                        let Ok(guard) = receiver.lock() else {
                            return;
                        };
                        guard.recv()
                    };
                    match job {
                        Ok(job) => job(),
                        Err(_) => return,
                    }
                })
                .expect("failed to spawn planning worker");
        }
        Self {
            sender: Mutex::new(sender),
            parallelism,
        }
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    fn submit(&self, job: Job) {
        let Ok(sender) = self.sender.lock() else {
            return;
        };
        if sender.send(job).is_err() {
            warn!("Worker pool is shut down; dropping planning job");
        }
    }
}

/// The process-wide planning pool. Sized by `FLOE_PLANNING_THREADS` when set, otherwise by the
/// machine's available parallelism.
pub fn get_worker_pool() -> &'static WorkerPool {
    static POOL: OnceLock<WorkerPool> = OnceLock::new();
    POOL.get_or_init(|| {
        let default_parallelism = thread::available_parallelism().map(|p| p.get()).unwrap_or(4);
        let parallelism = std::env::var("FLOE_PLANNING_THREADS")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|&p: &usize| p > 0)
            .unwrap_or(default_parallelism);
        debug!("Starting planning worker pool with {parallelism} threads");
        WorkerPool::new(parallelism)
    })
}

struct QueueInner<T> {
    items: VecDeque<FloeResult<T>>,
    /// Producers that have not yet called [`SharedQueue::producer_done`].
    producers: usize,
    cancelled: bool,
}

/// The bounded queue between producing workers and the consuming iterator.
///
/// Producers block on `not_full` while the queue is at capacity; the consumer blocks on
/// `not_empty` while it is empty and producers remain. Cancellation wakes both sides, so a
/// blocked producer never outlives a cancelled stream and nothing busy-waits.
struct SharedQueue<T> {
    inner: Mutex<QueueInner<T>>,
    not_full: Condvar,
    not_empty: Condvar,
    capacity: usize,
}

impl<T> SharedQueue<T> {
    fn new(capacity: usize, producers: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                items: VecDeque::new(),
                producers,
                cancelled: false,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            capacity,
        }
    }

    // A worker panicking while holding the lock must not wedge planning; the queue state stays
    // consistent under every code path, so recover the guard and keep going.
    fn lock(&self) -> MutexGuard<'_, QueueInner<T>> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn is_cancelled(&self) -> bool {
        self.lock().cancelled
    }

    /// Blocks until there is room, the stream is cancelled, or the consumer is gone. Returns
    /// false when the producer should stop.
    fn push(&self, item: FloeResult<T>) -> bool {
        let mut inner = self.lock();
        loop {
            if inner.cancelled {
                return false;
            }
            if inner.items.len() < self.capacity {
                inner.items.push_back(item);
                self.not_empty.notify_one();
                return true;
            }
            inner = self
                .not_full
                .wait(inner)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
    }

    fn producer_done(&self) {
        let mut inner = self.lock();
        inner.producers = inner.producers.saturating_sub(1);
        if inner.producers == 0 {
            // the consumer may be waiting for a producer that will never push again
            self.not_empty.notify_all();
        }
    }

    /// Blocks until an item arrives. Returns `None` once every producer is done and the queue is
    /// drained, or immediately after cancellation.
    fn pop(&self) -> Option<FloeResult<T>> {
        let mut inner = self.lock();
        loop {
            if inner.cancelled {
                return None;
            }
            if let Some(item) = inner.items.pop_front() {
                self.not_full.notify_one();
                return Some(item);
            }
            if inner.producers == 0 {
                return None;
            }
            inner = self
                .not_empty
                .wait(inner)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
    }

    /// Stops the stream: discards queued items and wakes both sides.
    fn cancel(&self) {
        let mut inner = self.lock();
        inner.cancelled = true;
        inner.items.clear();
        self.not_full.notify_all();
        self.not_empty.notify_all();
    }
}

/// Draws items from many inner sequences concurrently, preserving order only within each inner
/// sequence.
///
/// One pool job is submitted per inner sequence; each job materializes its sequence (this is
/// where manifest readers actually open) and drains it into a bounded queue the consumer pulls
/// from. When the queue is full, producers block until the consumer pulls. Inner-sequence errors
/// flow through the queue and are re-raised from [`Iterator::next`]. Closing cancels pending
/// jobs and discards queued items; jobs not yet started become no-ops, and blocked producers are
/// woken to stop.
pub struct ParallelIterator<T> {
    queue: Arc<SharedQueue<T>>,
}

impl<T: Send + 'static> ParallelIterator<T> {
    /// `sources` are thunks so that opening the underlying resource happens on a worker, not at
    /// construction.
    pub fn new<F, I>(sources: Vec<F>, pool: &WorkerPool) -> Self
    where
        F: FnOnce() -> I + Send + 'static,
        I: Iterator<Item = FloeResult<T>>,
    {
        let queue = Arc::new(SharedQueue::new(QUEUE_CAPACITY, sources.len()));
        for source in sources {
            let queue = Arc::clone(&queue);
            pool.submit(Box::new(move || drain_source(source, &queue)));
        }
        Self { queue }
    }

    /// Stops scheduling, unblocks producers, and discards queued items.
    pub fn cancel(&mut self) {
        self.queue.cancel();
    }

    /// A handle that cancels this iterator when closed. The planner registers it ahead of the
    /// readers in its close list, so closing the task stream stops scheduling before the readers
    /// are released.
    pub fn cancel_handle(&self) -> CancelHandle<T> {
        CancelHandle {
            queue: Arc::clone(&self.queue),
        }
    }
}

/// Cross-thread cancellation handle for a [`ParallelIterator`].
pub struct CancelHandle<T> {
    queue: Arc<SharedQueue<T>>,
}

impl<T: Send> Closeable for CancelHandle<T> {
    fn close(&mut self) -> FloeResult<()> {
        self.queue.cancel();
        Ok(())
    }
}

fn drain_source<T, F, I>(source: F, queue: &SharedQueue<T>)
where
    F: FnOnce() -> I,
    I: Iterator<Item = FloeResult<T>>,
{
    if !queue.is_cancelled() {
        for item in source() {
            let failed = item.is_err();
            // an error terminates this source; the consumer sees it on the next pull
            if !queue.push(item) || failed {
                break;
            }
        }
    }
    queue.producer_done();
}

impl<T> Iterator for ParallelIterator<T> {
    type Item = FloeResult<T>;

    fn next(&mut self) -> Option<Self::Item> {
        self.queue.pop()
    }
}

impl<T> Drop for ParallelIterator<T> {
    fn drop(&mut self) {
        self.queue.cancel();
    }
}
