//! Prioritized task pool for dispatching user callbacks.
//!
//! The assembly engine never runs user code on transport threads; completed
//! samples and writer events are handed to a [`TaskPool`] and executed on
//! worker threads in priority order (`High` > `Medium` > `Low`, FIFO within
//! a band). The pool is constructed by the application at startup and
//! injected wherever adapters need it; there is no process-wide instance.
//!
//! Cancellation is best-effort: a task cancelled before a worker claims it
//! never runs; one already running completes. Recurring tasks are
//! re-enqueued by a scheduler thread at their interval until their handle is
//! cancelled or the pool stops. Worker panics are caught, logged, and do not
//! take the worker down.

use std::collections::BinaryHeap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Dispatch bands, highest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    fn rank(self) -> u8 {
        match self {
            Priority::High => 0,
            Priority::Medium => 1,
            Priority::Low => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("task pool is not running")]
    NotRunning,
}

/// Submission contract the engine codes against.
pub trait TaskPool: Send + Sync {
    fn submit(
        &self,
        job: Box<dyn FnOnce() + Send>,
        priority: Priority,
    ) -> Result<TaskHandle, PoolError>;

    fn submit_recurring(
        &self,
        job: Arc<dyn Fn() + Send + Sync>,
        interval: Duration,
        priority: Priority,
    ) -> Result<RecurringHandle, PoolError>;
}

#[derive(Debug, Default)]
struct TaskState {
    done: bool,
}

#[derive(Debug, Default)]
struct TaskShared {
    cancelled: AtomicBool,
    state: Mutex<TaskState>,
    done_cv: Condvar,
}

impl TaskShared {
    fn mark_done(&self) {
        let mut state = self.state.lock().expect("task state lock");
        state.done = true;
        self.done_cv.notify_all();
    }
}

/// Cancellable handle to one submitted task.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    shared: Arc<TaskShared>,
}

impl TaskHandle {
    /// Request cancellation. Returns whether the request was recorded before
    /// completion; a task already running still runs to completion.
    pub fn cancel(&self) -> bool {
        if self.is_done() {
            return false;
        }
        self.shared.cancelled.store(true, Ordering::SeqCst);
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::SeqCst)
    }

    /// Done means the worker is finished with the task: executed, skipped as
    /// cancelled, or dropped during shutdown.
    pub fn is_done(&self) -> bool {
        self.shared.state.lock().expect("task state lock").done
    }

    /// Block until done or `timeout` elapses; returns completion status.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock().expect("task state lock");
        while !state.done {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (next, _) = self
                .shared
                .done_cv
                .wait_timeout(state, deadline - now)
                .expect("task state lock");
            state = next;
        }
        true
    }
}

/// Cancellation handle for a recurring task.
#[derive(Debug, Clone)]
pub struct RecurringHandle {
    cancelled: Arc<AtomicBool>,
}

impl RecurringHandle {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

enum JobKind {
    Run(Box<dyn FnOnce() + Send>),
    /// Worker-exit sentinel, queued once per worker at shutdown.
    Exit,
}

struct QueuedTask {
    rank: u8,
    seq: u64,
    job: JobKind,
    shared: Arc<TaskShared>,
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.rank == other.rank && self.seq == other.seq
    }
}

impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    // BinaryHeap is a max-heap; invert so the lowest (rank, seq) pops first.
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (other.rank, other.seq).cmp(&(self.rank, self.seq))
    }
}

struct RecurringEntry {
    next_run: Instant,
    interval: Duration,
    priority: Priority,
    seq: u64,
    job: Arc<dyn Fn() + Send + Sync>,
    cancelled: Arc<AtomicBool>,
}

impl PartialEq for RecurringEntry {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for RecurringEntry {}

impl PartialOrd for RecurringEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RecurringEntry {
    // Earliest next_run pops first.
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (other.next_run, other.seq).cmp(&(self.next_run, self.seq))
    }
}

struct PoolInner {
    queue: Mutex<BinaryHeap<QueuedTask>>,
    queue_cv: Condvar,
    recurring: Mutex<BinaryHeap<RecurringEntry>>,
    recurring_cv: Condvar,
    running: AtomicBool,
    sequence: AtomicU64,
    resolution: Duration,
}

impl PoolInner {
    fn next_seq(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn enqueue(&self, task: QueuedTask) {
        let mut queue = self.queue.lock().expect("queue lock");
        queue.push(task);
        self.queue_cv.notify_one();
    }
}

/// Worker-pool implementation of [`TaskPool`].
pub struct EventPool {
    inner: Arc<PoolInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    scheduler: Mutex<Option<JoinHandle<()>>>,
}

impl EventPool {
    pub fn new(workers: usize) -> Self {
        EventPool::with_resolution(workers, Duration::from_millis(1))
    }

    /// `resolution` bounds how long the scheduler sleeps between recurring
    /// due-date checks.
    pub fn with_resolution(workers: usize, resolution: Duration) -> Self {
        let inner = Arc::new(PoolInner {
            queue: Mutex::new(BinaryHeap::new()),
            queue_cv: Condvar::new(),
            recurring: Mutex::new(BinaryHeap::new()),
            recurring_cv: Condvar::new(),
            running: AtomicBool::new(true),
            sequence: AtomicU64::new(0),
            resolution,
        });

        let worker_count = workers.max(1);
        let mut handles = Vec::with_capacity(worker_count);
        for i in 0..worker_count {
            let inner = inner.clone();
            handles.push(
                std::thread::Builder::new()
                    .name(format!("pool-worker-{i}"))
                    .spawn(move || worker_loop(&inner))
                    .expect("spawn pool worker"),
            );
        }
        let scheduler = {
            let inner = inner.clone();
            std::thread::Builder::new()
                .name("pool-scheduler".into())
                .spawn(move || scheduler_loop(&inner))
                .expect("spawn pool scheduler")
        };
        tracing::debug!(target: "runtime.pool", workers = worker_count, "event pool started");

        EventPool {
            inner,
            workers: Mutex::new(handles),
            scheduler: Mutex::new(Some(scheduler)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running()
    }

    pub fn pending_tasks(&self) -> usize {
        self.inner.queue.lock().expect("queue lock").len()
    }

    /// Stop accepting work, signal every thread, and (optionally) join them.
    /// Pending tasks that never ran are marked done so waiters wake up.
    pub fn shutdown(&self, wait: bool) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        {
            let mut queue = self.inner.queue.lock().expect("queue lock");
            for task in queue.drain() {
                task.shared.mark_done();
            }
            let workers = self.workers.lock().expect("workers lock");
            for _ in workers.iter() {
                queue.push(QueuedTask {
                    rank: u8::MAX,
                    seq: self.inner.next_seq(),
                    job: JobKind::Exit,
                    shared: Arc::new(TaskShared::default()),
                });
            }
            self.inner.queue_cv.notify_all();
        }
        self.inner.recurring_cv.notify_all();

        if wait {
            for handle in self.workers.lock().expect("workers lock").drain(..) {
                let _ = handle.join();
            }
            if let Some(handle) = self.scheduler.lock().expect("scheduler lock").take() {
                let _ = handle.join();
            }
        }
        tracing::debug!(target: "runtime.pool", "event pool stopped");
    }
}

impl Drop for EventPool {
    fn drop(&mut self) {
        self.shutdown(false);
    }
}

impl TaskPool for EventPool {
    fn submit(
        &self,
        job: Box<dyn FnOnce() + Send>,
        priority: Priority,
    ) -> Result<TaskHandle, PoolError> {
        if !self.inner.running() {
            return Err(PoolError::NotRunning);
        }
        let shared = Arc::new(TaskShared::default());
        self.inner.enqueue(QueuedTask {
            rank: priority.rank(),
            seq: self.inner.next_seq(),
            job: JobKind::Run(job),
            shared: shared.clone(),
        });
        Ok(TaskHandle { shared })
    }

    fn submit_recurring(
        &self,
        job: Arc<dyn Fn() + Send + Sync>,
        interval: Duration,
        priority: Priority,
    ) -> Result<RecurringHandle, PoolError> {
        if !self.inner.running() {
            return Err(PoolError::NotRunning);
        }
        let cancelled = Arc::new(AtomicBool::new(false));
        {
            let mut recurring = self.inner.recurring.lock().expect("recurring lock");
            recurring.push(RecurringEntry {
                next_run: Instant::now() + interval,
                interval,
                priority,
                seq: self.inner.next_seq(),
                job,
                cancelled: cancelled.clone(),
            });
            self.inner.recurring_cv.notify_one();
        }
        Ok(RecurringHandle { cancelled })
    }
}

fn worker_loop(inner: &PoolInner) {
    loop {
        let task = {
            let mut queue = inner.queue.lock().expect("queue lock");
            loop {
                if let Some(task) = queue.pop() {
                    break task;
                }
                if !inner.running() {
                    return;
                }
                queue = inner.queue_cv.wait(queue).expect("queue lock");
            }
        };
        match task.job {
            JobKind::Exit => return,
            JobKind::Run(job) => {
                if task.shared.cancelled.load(Ordering::SeqCst) {
                    task.shared.mark_done();
                    continue;
                }
                if catch_unwind(AssertUnwindSafe(job)).is_err() {
                    tracing::warn!(target: "runtime.pool", "task panicked; worker continues");
                }
                task.shared.mark_done();
            }
        }
    }
}

fn scheduler_loop(inner: &PoolInner) {
    while inner.running() {
        let mut recurring = inner.recurring.lock().expect("recurring lock");
        let now = Instant::now();
        while let Some(entry) = recurring.peek() {
            if entry.next_run > now {
                break;
            }
            let mut entry = recurring.pop().expect("peeked entry");
            if entry.cancelled.load(Ordering::SeqCst) {
                continue;
            }
            let job = entry.job.clone();
            inner.enqueue(QueuedTask {
                rank: entry.priority.rank(),
                seq: inner.next_seq(),
                job: JobKind::Run(Box::new(move || job())),
                shared: Arc::new(TaskShared::default()),
            });
            entry.next_run = now + entry.interval;
            recurring.push(entry);
        }
        let mut timeout = inner.resolution;
        if let Some(next) = recurring.peek() {
            timeout = timeout.min(next.next_run.saturating_duration_since(now));
        }
        let _ = inner
            .recurring_cv
            .wait_timeout(recurring, timeout.max(Duration::from_micros(100)))
            .expect("recurring lock");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;

    fn record_order(order: &Arc<Mutex<Vec<&'static str>>>, label: &'static str) {
        order.lock().expect("order lock").push(label);
    }

    #[test]
    fn priority_bands_drain_high_first() {
        let pool = EventPool::new(1);
        let (gate_tx, gate_rx) = bounded::<()>(0);
        let order = Arc::new(Mutex::new(Vec::new()));

        // Occupy the single worker so subsequent tasks queue up.
        let blocker = pool
            .submit(
                Box::new(move || {
                    gate_rx.recv().expect("gate");
                }),
                Priority::High,
            )
            .expect("submit");

        let o = order.clone();
        pool.submit(Box::new(move || record_order(&o, "low")), Priority::Low)
            .expect("submit");
        let o = order.clone();
        pool.submit(Box::new(move || record_order(&o, "medium")), Priority::Medium)
            .expect("submit");
        let o = order.clone();
        let last = pool
            .submit(Box::new(move || record_order(&o, "high")), Priority::High)
            .expect("submit");

        gate_tx.send(()).expect("release blocker");
        assert!(blocker.wait_timeout(Duration::from_secs(2)));
        // The queue drains high -> medium -> low regardless of submit order;
        // waiting on "low" is not enough since it runs last.
        assert!(last.wait_timeout(Duration::from_secs(2)));
        let deadline = Instant::now() + Duration::from_secs(2);
        while order.lock().expect("order lock").len() < 3 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(
            *order.lock().expect("order lock"),
            vec!["high", "medium", "low"]
        );
        pool.shutdown(true);
    }

    #[test]
    fn cancel_before_run_skips_execution() {
        let pool = EventPool::new(1);
        let (gate_tx, gate_rx) = bounded::<()>(0);
        let blocker = pool
            .submit(
                Box::new(move || {
                    gate_rx.recv().expect("gate");
                }),
                Priority::High,
            )
            .expect("submit");

        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let handle = pool
            .submit(
                Box::new(move || flag.store(true, Ordering::SeqCst)),
                Priority::Medium,
            )
            .expect("submit");
        assert!(handle.cancel());

        gate_tx.send(()).expect("release blocker");
        assert!(blocker.wait_timeout(Duration::from_secs(2)));
        assert!(handle.wait_timeout(Duration::from_secs(2)), "skipped tasks still complete");
        assert!(!ran.load(Ordering::SeqCst), "cancelled task must not run");
        pool.shutdown(true);
    }

    #[test]
    fn recurring_fires_until_cancelled() {
        let pool = EventPool::new(2);
        let count = Arc::new(AtomicU64::new(0));
        let c = count.clone();
        let handle = pool
            .submit_recurring(
                Arc::new(move || {
                    c.fetch_add(1, Ordering::SeqCst);
                }),
                Duration::from_millis(10),
                Priority::Medium,
            )
            .expect("submit recurring");

        let deadline = Instant::now() + Duration::from_secs(2);
        while count.load(Ordering::SeqCst) < 3 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(count.load(Ordering::SeqCst) >= 3, "recurring task keeps firing");

        handle.cancel();
        let settled = count.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(60));
        // One in-flight tick may still land after cancel; growth must stop.
        assert!(count.load(Ordering::SeqCst) <= settled + 1);
        pool.shutdown(true);
    }

    #[test]
    fn panicking_task_does_not_kill_worker() {
        let pool = EventPool::new(1);
        pool.submit(Box::new(|| panic!("boom")), Priority::High)
            .expect("submit");
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let after = pool
            .submit(
                Box::new(move || flag.store(true, Ordering::SeqCst)),
                Priority::Medium,
            )
            .expect("submit");
        assert!(after.wait_timeout(Duration::from_secs(2)));
        assert!(ran.load(Ordering::SeqCst));
        pool.shutdown(true);
    }

    #[test]
    fn shutdown_rejects_new_work() {
        let pool = EventPool::new(1);
        pool.shutdown(true);
        let err = pool.submit(Box::new(|| {}), Priority::Low).unwrap_err();
        assert_eq!(err, PoolError::NotRunning);
    }
}
