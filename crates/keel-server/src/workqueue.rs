// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Work queue with deferred deletion.
//!
//! Jobs run through an [`Executor`]: [`InlineExecutor`] runs them on the
//! calling thread, [`PooledExecutor`] hands them to a fixed pool of worker
//! threads over a `crossbeam-channel`. Both share one sequence tracker.
//!
//! # Deferred Deletion
//!
//! Every job gets a sequence number when it is enqueued. A delayed job
//! records the next sequence number as its barrier and becomes ready once
//! every job numbered below the barrier has finished. Releasing a resource
//! through [`WorkQueue::enqueue_delayed`] therefore never races with work
//! that was already queued or running when the release was requested.
//!
//! ```text
//! seq:      1   2   3   [delayed, barrier=4]   4   5
//! ready when 1, 2 and 3 are done; 4 and 5 do not hold it back
//! ```

use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{unbounded, Receiver, Sender};
use keel_core::UaError;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, info, trace};

use crate::error::{ServerError, ServerResult};

/// A unit of work.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

// =============================================================================
// Sequence tracking
// =============================================================================

struct DelayedJob {
    barrier: u64,
    job: Job,
}

#[derive(Default)]
struct TrackerState {
    next_seq: u64,
    unfinished: BTreeSet<u64>,
    delayed: VecDeque<DelayedJob>,
}

/// Shared bookkeeping of in-flight and delayed work.
#[derive(Default)]
pub struct Tracker {
    state: Mutex<TrackerState>,
    executed: AtomicU64,
    delayed_executed: AtomicU64,
    panicked: AtomicU64,
}

impl Tracker {
    fn begin(&self) -> u64 {
        let mut state = self.state.lock();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.unfinished.insert(seq);
        seq
    }

    fn finish(&self, seq: u64) {
        self.state.lock().unfinished.remove(&seq);
        self.executed.fetch_add(1, Ordering::Relaxed);
    }

    fn defer(&self, job: Job) -> ServerResult<()> {
        let mut state = self.state.lock();
        state
            .delayed
            .try_reserve(1)
            .map_err(|_| UaError::out_of_memory("deferred deletion queue"))?;
        let barrier = state.next_seq;
        state.delayed.push_back(DelayedJob { barrier, job });
        Ok(())
    }

    /// Removes the delayed jobs whose barrier has been passed.
    fn take_ready(&self) -> Vec<Job> {
        let mut state = self.state.lock();
        let oldest = state.unfinished.first().copied().unwrap_or(u64::MAX);
        let mut ready = Vec::new();
        // Barriers grow in queue order, so the ready jobs form a prefix.
        while state.delayed.front().is_some_and(|d| d.barrier <= oldest) {
            if let Some(delayed) = state.delayed.pop_front() {
                ready.push(delayed.job);
            }
        }
        ready
    }

    fn take_all(&self) -> Vec<Job> {
        self.state.lock().delayed.drain(..).map(|d| d.job).collect()
    }

    fn run(&self, job: Job) {
        if catch_unwind(AssertUnwindSafe(job)).is_err() {
            self.panicked.fetch_add(1, Ordering::Relaxed);
            error!("Work queue job panicked");
        }
    }

    fn run_delayed(&self, jobs: Vec<Job>) -> usize {
        let count = jobs.len();
        for job in jobs {
            self.run(job);
        }
        self.delayed_executed.fetch_add(count as u64, Ordering::Relaxed);
        count
    }

    /// Runs one sequenced job and then whatever delayed work it unblocked.
    fn execute(&self, seq: u64, job: Job) {
        self.run(job);
        self.finish(seq);
        let ready = self.take_ready();
        if !ready.is_empty() {
            self.run_delayed(ready);
        }
    }
}

impl fmt::Debug for Tracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Tracker")
            .field("in_flight", &state.unfinished.len())
            .field("delayed", &state.delayed.len())
            .finish()
    }
}

// =============================================================================
// Executors
// =============================================================================

/// Execution strategy of a [`WorkQueue`].
pub trait Executor: Send + Sync + fmt::Debug {
    /// Starts the strategy.
    fn start(&self, tracker: &Arc<Tracker>) -> ServerResult<()>;

    /// Runs or dispatches one sequenced job.
    fn submit(&self, tracker: &Arc<Tracker>, seq: u64, job: Job) -> ServerResult<()>;

    /// Stops accepting jobs and waits for every in-flight job.
    fn stop(&self);

    /// Returns `true` if jobs run on threads other than the caller's.
    fn is_concurrent(&self) -> bool;
}

/// Runs every job synchronously on the calling thread.
#[derive(Debug, Default)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn start(&self, _tracker: &Arc<Tracker>) -> ServerResult<()> {
        Ok(())
    }

    fn submit(&self, tracker: &Arc<Tracker>, seq: u64, job: Job) -> ServerResult<()> {
        tracker.run(job);
        tracker.finish(seq);
        Ok(())
    }

    fn stop(&self) {}

    fn is_concurrent(&self) -> bool {
        false
    }
}

struct Task {
    seq: u64,
    job: Job,
}

/// A fixed pool of worker threads pulling from one FIFO channel.
pub struct PooledExecutor {
    worker_count: usize,
    sender: Mutex<Option<Sender<Task>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl PooledExecutor {
    /// Creates a pool of `worker_count` threads (started by `start`).
    pub fn new(worker_count: usize) -> Self {
        Self {
            worker_count: worker_count.max(1),
            sender: Mutex::new(None),
            workers: Mutex::new(Vec::new()),
        }
    }

    fn worker_loop(index: usize, receiver: Receiver<Task>, tracker: Arc<Tracker>) {
        trace!(worker = index, "Worker started");
        for task in receiver.iter() {
            tracker.execute(task.seq, task.job);
        }
        trace!(worker = index, "Worker exiting");
    }
}

impl Executor for PooledExecutor {
    fn start(&self, tracker: &Arc<Tracker>) -> ServerResult<()> {
        let mut sender = self.sender.lock();
        if sender.is_some() {
            return Ok(());
        }

        let (tx, rx) = unbounded::<Task>();
        let mut workers = self.workers.lock();
        for index in 0..self.worker_count {
            let rx = rx.clone();
            let tracker = Arc::clone(tracker);
            let handle = std::thread::Builder::new()
                .name(format!("keel-worker-{index}"))
                .spawn(move || Self::worker_loop(index, rx, tracker))
                .map_err(|e| UaError::internal(format!("failed to spawn worker: {e}")))?;
            workers.push(handle);
        }
        *sender = Some(tx);
        info!(workers = self.worker_count, "Worker pool started");
        Ok(())
    }

    fn submit(&self, _tracker: &Arc<Tracker>, seq: u64, job: Job) -> ServerResult<()> {
        let sender = self.sender.lock();
        let tx = sender.as_ref().ok_or(ServerError::WorkQueueStopped)?;
        tx.send(Task { seq, job })
            .map_err(|_| ServerError::WorkQueueStopped)
    }

    fn stop(&self) {
        // Dropping the sender disconnects the channel once it is drained.
        drop(self.sender.lock().take());
        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        let count = workers.len();
        let current = std::thread::current().id();
        for handle in workers {
            // A worker dropping the last server handle cannot join itself.
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                error!("Worker thread panicked");
            }
        }
        if count > 0 {
            info!(workers = count, "Worker pool stopped");
        }
    }

    fn is_concurrent(&self) -> bool {
        true
    }
}

impl fmt::Debug for PooledExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledExecutor")
            .field("worker_count", &self.worker_count)
            .field("running", &self.sender.lock().is_some())
            .finish()
    }
}

// =============================================================================
// WorkQueue
// =============================================================================

/// Work queue statistics.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct WorkQueueStats {
    /// Sequenced jobs executed.
    pub executed: u64,
    /// Delayed jobs executed.
    pub delayed_executed: u64,
    /// Jobs that panicked.
    pub panicked: u64,
    /// Jobs enqueued but not finished.
    pub in_flight: usize,
    /// Delayed jobs waiting for their barrier.
    pub delayed_pending: usize,
}

/// Dispatches jobs and owns the deferred-deletion queue.
#[derive(Debug)]
pub struct WorkQueue {
    executor: Box<dyn Executor>,
    tracker: Arc<Tracker>,
    stopped: AtomicBool,
}

impl WorkQueue {
    /// Creates a queue over the given strategy.
    pub fn new(executor: Box<dyn Executor>) -> Self {
        Self {
            executor,
            tracker: Arc::new(Tracker::default()),
            stopped: AtomicBool::new(false),
        }
    }

    /// Creates a single-threaded queue.
    pub fn inline() -> Self {
        Self::new(Box::new(InlineExecutor))
    }

    /// Creates a queue backed by `worker_count` threads.
    pub fn pooled(worker_count: usize) -> Self {
        Self::new(Box::new(PooledExecutor::new(worker_count)))
    }

    /// Returns `true` for the pooled strategy.
    pub fn is_concurrent(&self) -> bool {
        self.executor.is_concurrent()
    }

    /// Starts worker threads (no-op for the inline strategy).
    pub fn start(&self) -> ServerResult<()> {
        self.executor.start(&self.tracker)?;
        self.stopped.store(false, Ordering::Release);
        Ok(())
    }

    /// Runs `job` now (inline) or on a worker (pooled).
    pub fn enqueue(&self, job: impl FnOnce() + Send + 'static) -> ServerResult<()> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(ServerError::WorkQueueStopped);
        }
        let seq = self.tracker.begin();
        let result = self.executor.submit(&self.tracker, seq, Box::new(job));
        if result.is_err() {
            self.tracker.finish(seq);
        }
        result
    }

    /// Schedules `job` to run once all work enqueued before it has finished.
    pub fn enqueue_delayed(&self, job: impl FnOnce() + Send + 'static) -> ServerResult<()> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(ServerError::WorkQueueStopped);
        }
        self.tracker.defer(Box::new(job))?;

        // Workers check delayed work after each job; make sure one comes.
        if self.executor.is_concurrent() {
            let seq = self.tracker.begin();
            if self.executor.submit(&self.tracker, seq, Box::new(|| {})).is_err() {
                self.tracker.finish(seq);
            }
        }
        Ok(())
    }

    /// Runs the delayed jobs whose barrier has passed. Returns how many ran.
    pub fn manually_process_delayed(&self) -> usize {
        let ready = self.tracker.take_ready();
        if ready.is_empty() {
            return 0;
        }
        let count = self.tracker.run_delayed(ready);
        trace!(count, "Processed delayed jobs");
        count
    }

    /// Stops accepting work and joins every worker.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.executor.stop();
        debug!("Work queue stopped");
    }

    /// Runs every delayed job regardless of barriers.
    ///
    /// Call after [`stop`](Self::stop): nothing is in flight any more.
    pub fn cleanup(&self) -> usize {
        let mut total = 0;
        // Delayed jobs may defer further work.
        loop {
            let jobs = self.tracker.take_all();
            if jobs.is_empty() {
                break;
            }
            total += self.tracker.run_delayed(jobs);
        }
        if total > 0 {
            debug!(count = total, "Flushed delayed jobs");
        }
        total
    }

    /// Current statistics.
    pub fn stats(&self) -> WorkQueueStats {
        let state = self.tracker.state.lock();
        WorkQueueStats {
            executed: self.tracker.executed.load(Ordering::Relaxed),
            delayed_executed: self.tracker.delayed_executed.load(Ordering::Relaxed),
            panicked: self.tracker.panicked.load(Ordering::Relaxed),
            in_flight: state.unfinished.len(),
            delayed_pending: state.delayed.len(),
        }
    }
}

impl Drop for WorkQueue {
    fn drop(&mut self) {
        self.stop();
        self.cleanup();
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn test_inline_runs_synchronously() {
        let queue = WorkQueue::inline();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        queue.enqueue(move || {
            h.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(queue.stats().executed, 1);
    }

    #[test]
    fn test_inline_delayed_waits_for_manual_processing() {
        let queue = WorkQueue::inline();
        let released = Arc::new(AtomicBool::new(false));
        let r = Arc::clone(&released);
        queue.enqueue_delayed(move || r.store(true, Ordering::SeqCst)).unwrap();
        assert!(!released.load(Ordering::SeqCst));

        assert_eq!(queue.manually_process_delayed(), 1);
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn test_delayed_from_running_job_waits_for_it() {
        let queue = Arc::new(WorkQueue::inline());
        let order = Arc::new(Mutex::new(Vec::new()));

        let q = Arc::clone(&queue);
        let o = Arc::clone(&order);
        queue
            .enqueue(move || {
                let inner = Arc::clone(&o);
                q.enqueue_delayed(move || inner.lock().push("release")).unwrap();
                // Still inside the job: the barrier is not passed.
                assert_eq!(q.manually_process_delayed(), 0);
                o.lock().push("job");
            })
            .unwrap();

        assert_eq!(queue.manually_process_delayed(), 1);
        assert_eq!(*order.lock(), vec!["job", "release"]);
    }

    #[test]
    fn test_pooled_delayed_after_in_flight() {
        let queue = WorkQueue::pooled(4);
        queue.start().unwrap();

        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..16 {
            let d = Arc::clone(&done);
            queue
                .enqueue(move || {
                    std::thread::sleep(Duration::from_millis(2));
                    d.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        }

        let seen = Arc::new(AtomicUsize::new(usize::MAX));
        let (d, s) = (Arc::clone(&done), Arc::clone(&seen));
        queue
            .enqueue_delayed(move || s.store(d.load(Ordering::SeqCst), Ordering::SeqCst))
            .unwrap();

        queue.stop();
        queue.cleanup();
        assert_eq!(seen.load(Ordering::SeqCst), 16);
        assert_eq!(done.load(Ordering::SeqCst), 16);
    }

    #[test]
    fn test_enqueue_after_stop_fails() {
        let queue = WorkQueue::pooled(2);
        queue.start().unwrap();
        queue.stop();
        assert!(matches!(queue.enqueue(|| {}), Err(ServerError::WorkQueueStopped)));
        assert!(matches!(
            queue.enqueue_delayed(|| {}),
            Err(ServerError::WorkQueueStopped)
        ));
    }

    #[test]
    fn test_stop_joins_in_flight_work() {
        let queue = WorkQueue::pooled(2);
        queue.start().unwrap();
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..4 {
            let d = Arc::clone(&done);
            queue
                .enqueue(move || {
                    std::thread::sleep(Duration::from_millis(5));
                    d.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        }
        queue.stop();
        assert_eq!(done.load(Ordering::SeqCst), 4);
        assert_eq!(queue.stats().in_flight, 0);
    }

    #[test]
    fn test_panicking_job_does_not_block_barrier() {
        let queue = WorkQueue::inline();
        queue.enqueue(|| panic!("boom")).unwrap();
        let released = Arc::new(AtomicBool::new(false));
        let r = Arc::clone(&released);
        queue.enqueue_delayed(move || r.store(true, Ordering::SeqCst)).unwrap();
        queue.manually_process_delayed();
        assert!(released.load(Ordering::SeqCst));
        assert_eq!(queue.stats().panicked, 1);
    }

    #[test]
    fn test_cleanup_drains_nested_deferrals() {
        let queue = Arc::new(WorkQueue::inline());
        let hits = Arc::new(AtomicUsize::new(0));
        let (q, h) = (Arc::clone(&queue), Arc::clone(&hits));
        queue
            .enqueue_delayed(move || {
                h.fetch_add(1, Ordering::SeqCst);
                let h2 = Arc::clone(&h);
                // Accepted because the queue is inline and not yet stopped.
                let _ = q.enqueue_delayed(move || {
                    h2.fetch_add(1, Ordering::SeqCst);
                });
            })
            .unwrap();
        assert_eq!(queue.cleanup(), 2);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}
