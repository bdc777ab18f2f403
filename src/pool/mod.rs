//! Worker pool: fixed OS threads draining a shared FIFO task queue
//!
//! Shared state (queue, lifecycle, live worker count) sits behind one mutex.
//! One condition variable means "a task is pending or shutdown was
//! requested":
//! - `submit` wakes exactly one waiter, since each dequeue takes one task
//! - `shutdown` wakes every waiter so all workers observe the new state
//!
//! Tasks run outside the lock. `submit` never waits for a free worker; a
//! full queue is reported as [`PoolError::QueueFull`] and the retry policy
//! belongs to the caller.

mod queue;
mod task;

pub use task::Task;

use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, error, warn};
use parking_lot::{Condvar, Mutex};

use self::queue::TaskQueue;
use crate::config::PoolConfig;
use crate::error::{PoolError, PoolResult};

/// How a pool stops.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownMode {
    /// Workers exit as soon as they wake; queued tasks are discarded.
    Immediate,
    /// Workers drain the queue, then exit.
    Leisurely,
}

/// Transitions once, from `Running` to `Stopping`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Lifecycle {
    Running,
    Stopping(ShutdownMode),
}

struct State {
    queue: TaskQueue,
    lifecycle: Lifecycle,
    /// Workers still inside their run loop
    started: usize,
}

struct Shared {
    state: Mutex<State>,
    notify: Condvar,
    max_queue_size: usize,
}

/// Fixed-size pool of worker threads with an elastic, bounded task queue.
pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    thread_count: usize,
}

impl WorkerPool {
    /// Start `thread_count` workers over a queue of `queue_size` slots.
    ///
    /// The queue may grow up to [`MAX_QUEUE`](crate::MAX_QUEUE).
    pub fn new(thread_count: usize, queue_size: usize) -> PoolResult<Self> {
        let config = PoolConfig::new()
            .thread_count(thread_count)
            .queue_size(queue_size);
        Self::with_config(&config)
    }

    /// Start a pool from `config`.
    ///
    /// If any worker fails to spawn, the ones already running are stopped
    /// and joined before the error is returned.
    pub fn with_config(config: &PoolConfig) -> PoolResult<Self> {
        config.validate()?;

        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                queue: TaskQueue::new(config.queue_size),
                lifecycle: Lifecycle::Running,
                started: 0,
            }),
            notify: Condvar::new(),
            max_queue_size: config.max_queue_size,
        });

        let mut handles = Vec::with_capacity(config.thread_count);
        for id in 0..config.thread_count {
            shared.state.lock().started += 1;

            let worker_shared = Arc::clone(&shared);
            let spawned = thread::Builder::new()
                .name(format!("{}-worker-{}", config.thread_name, id))
                .spawn(move || run_worker(worker_shared, id));

            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    shared.state.lock().started -= 1;
                    error!("failed to spawn worker {}: {}", id, e);

                    let pool = Self {
                        shared,
                        workers: Mutex::new(handles),
                        thread_count: id,
                    };
                    if let Err(teardown) = pool.shutdown(ShutdownMode::Immediate) {
                        warn!("teardown after spawn failure: {}", teardown);
                    }
                    return Err(PoolError::ThreadSpawn(e));
                }
            }
        }

        debug!(
            "worker pool started: {} threads, queue {} (max {})",
            config.thread_count, config.queue_size, config.max_queue_size
        );

        Ok(Self {
            shared,
            workers: Mutex::new(handles),
            thread_count: config.thread_count,
        })
    }

    /// Queue `task` for execution.
    ///
    /// When the queue is one slot from full it is doubled (up to the
    /// configured ceiling) before the task is added. Never blocks waiting for
    /// a worker.
    pub fn submit(&self, task: Task) -> PoolResult<()> {
        let mut state = self.shared.state.lock();

        if state.lifecycle != Lifecycle::Running {
            warn!("task rejected: worker pool is shutting down");
            return Err(PoolError::ShuttingDown);
        }

        if state.queue.is_full() {
            return Err(PoolError::QueueFull {
                capacity: state.queue.size(),
            });
        }

        let size = state.queue.size();
        if state.queue.pending() + 1 == size && size < self.shared.max_queue_size {
            let new_size = size.saturating_mul(2).min(self.shared.max_queue_size);
            if state.queue.grow(new_size) {
                debug!("task queue grown {} -> {}", size, new_size);
            } else {
                warn!("task queue growth {} -> {} failed", size, new_size);
            }
        }

        state.queue.push(task);
        self.shared.notify.notify_one();
        Ok(())
    }

    /// Queue a closure.
    pub fn execute<F>(&self, job: F) -> PoolResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit(Task::new(job))
    }

    /// Queue `entry(input, output)`.
    pub fn submit_with<F, I, O>(&self, entry: F, input: I, output: O) -> PoolResult<()>
    where
        F: FnOnce(I, O) + Send + 'static,
        I: Send + 'static,
        O: Send + 'static,
    {
        self.submit(Task::with_args(entry, input, output))
    }

    /// Stop accepting tasks and join every worker.
    ///
    /// In-flight tasks always run to completion. Blocks until all workers
    /// have exited, except the calling worker when invoked from inside a
    /// task. A second call reports
    /// [`PoolError::AlreadyShuttingDown`] without waiting.
    pub fn shutdown(&self, mode: ShutdownMode) -> PoolResult<()> {
        let discarded = {
            let mut state = self.shared.state.lock();
            if state.lifecycle != Lifecycle::Running {
                return Err(PoolError::AlreadyShuttingDown);
            }
            state.lifecycle = Lifecycle::Stopping(mode);
            self.shared.notify.notify_all();

            match mode {
                ShutdownMode::Immediate => state.queue.take_all(),
                ShutdownMode::Leisurely => Vec::new(),
            }
        };

        if !discarded.is_empty() {
            debug!("immediate shutdown discarded {} queued task(s)", discarded.len());
        }
        // Dropped outside the lock: a task's captures may do arbitrary work on drop
        drop(discarded);

        // A task may shut down (or drop the last handle to) its own pool; that
        // worker cannot join itself and exits on its own once the task returns
        let current = thread::current().id();
        let handles = std::mem::take(&mut *self.workers.lock());
        let mut failed = 0;
        for handle in handles {
            if handle.thread().id() == current {
                debug!("shutdown called from a worker; leaving it detached");
                continue;
            }
            if handle.join().is_err() {
                failed += 1;
            }
        }

        if failed > 0 {
            error!("{} worker thread(s) panicked", failed);
            return Err(PoolError::ThreadFailure { failed });
        }

        debug!("worker pool shut down ({:?})", mode);
        Ok(())
    }

    /// Release the pool. Refuses, handing the pool back, while any worker
    /// is still running; call [`shutdown`](Self::shutdown) first.
    pub fn destroy(self) -> Result<(), WorkerPool> {
        if self.active_workers() > 0 {
            return Err(self);
        }
        Ok(())
    }

    pub fn thread_count(&self) -> usize {
        self.thread_count
    }

    /// Current queue length in slots.
    pub fn queue_size(&self) -> usize {
        self.shared.state.lock().queue.size()
    }

    /// Tasks queued but not yet picked up by a worker.
    pub fn pending(&self) -> usize {
        self.shared.state.lock().queue.pending()
    }

    /// Workers that have not yet left their run loop.
    pub fn active_workers(&self) -> usize {
        self.shared.state.lock().started
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shared.state.lock().lifecycle != Lifecycle::Running
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if !self.is_shutting_down() {
            if let Err(e) = self.shutdown(ShutdownMode::Immediate) {
                error!("worker pool shutdown on drop failed: {}", e);
            }
        }
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("WorkerPool")
            .field("thread_count", &self.thread_count)
            .field("active_workers", &state.started)
            .field("queue_size", &state.queue.size())
            .field("pending", &state.queue.pending())
            .field("lifecycle", &state.lifecycle)
            .finish()
    }
}

/// Decrements the live worker count however the run loop ends, including
/// unwinding out of a panicking task.
struct ExitGuard<'a> {
    shared: &'a Shared,
    id: usize,
}

impl Drop for ExitGuard<'_> {
    fn drop(&mut self) {
        self.shared.state.lock().started -= 1;
        if thread::panicking() {
            error!("worker {} terminated by a panicking task", self.id);
        } else {
            debug!("worker {} exiting", self.id);
        }
    }
}

fn run_worker(shared: Arc<Shared>, id: usize) {
    let _exit = ExitGuard {
        shared: &shared,
        id,
    };

    loop {
        let task = {
            let mut state = shared.state.lock();

            while state.queue.pending() == 0 && state.lifecycle == Lifecycle::Running {
                shared.notify.wait(&mut state);
            }

            match state.lifecycle {
                Lifecycle::Stopping(ShutdownMode::Immediate) => break,
                Lifecycle::Stopping(ShutdownMode::Leisurely) if state.queue.pending() == 0 => {
                    break
                }
                _ => {}
            }

            match state.queue.pop() {
                Some(task) => task,
                None => continue,
            }
        };

        task.run();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn test_rejects_invalid_parameters() {
        assert!(matches!(
            WorkerPool::new(0, 4),
            Err(PoolError::InvalidParameters(_))
        ));
        assert!(matches!(
            WorkerPool::new(crate::MAX_THREADS + 1, 4),
            Err(PoolError::InvalidParameters(_))
        ));
        assert!(matches!(
            WorkerPool::new(2, 0),
            Err(PoolError::InvalidParameters(_))
        ));
        assert!(matches!(
            WorkerPool::new(2, crate::MAX_QUEUE + 1),
            Err(PoolError::InvalidParameters(_))
        ));
    }

    #[test]
    fn test_runs_submitted_tasks() {
        let pool = WorkerPool::new(4, 16).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..10 {
            let counter = Arc::clone(&counter);
            pool.execute(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }

        pool.shutdown(ShutdownMode::Leisurely).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 10);
        assert_eq!(pool.active_workers(), 0);
    }

    #[test]
    fn test_submit_with_output_slot() {
        let pool = WorkerPool::new(2, 4).unwrap();
        let (tx, rx) = mpsc::channel();

        pool.submit_with(|n: u64, out: mpsc::Sender<u64>| out.send(n * n).unwrap(), 12, tx)
            .unwrap();

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 144);
        pool.shutdown(ShutdownMode::Leisurely).unwrap();
    }

    #[test]
    fn test_second_shutdown_is_reported() {
        let pool = WorkerPool::new(2, 4).unwrap();
        pool.shutdown(ShutdownMode::Immediate).unwrap();
        assert!(matches!(
            pool.shutdown(ShutdownMode::Leisurely),
            Err(PoolError::AlreadyShuttingDown)
        ));
    }

    #[test]
    fn test_submit_after_shutdown() {
        let pool = WorkerPool::new(1, 4).unwrap();
        pool.shutdown(ShutdownMode::Leisurely).unwrap();
        assert!(matches!(
            pool.execute(|| {}),
            Err(PoolError::ShuttingDown)
        ));
    }

    #[test]
    fn test_destroy_requires_shutdown() {
        let pool = WorkerPool::new(2, 4).unwrap();
        let pool = pool.destroy().unwrap_err();
        assert_eq!(pool.active_workers(), 2);

        pool.shutdown(ShutdownMode::Leisurely).unwrap();
        assert!(pool.destroy().is_ok());
    }

    #[test]
    fn test_queue_grows_one_slot_before_full() {
        let pool = WorkerPool::new(1, 2).unwrap();
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        pool.execute(move || {
            started_tx.send(()).unwrap();
            release_rx.recv().ok();
        })
        .unwrap();
        started_rx.recv().unwrap();

        assert_eq!(pool.queue_size(), 2);
        pool.execute(|| {}).unwrap();
        assert_eq!(pool.queue_size(), 2);

        // pending == size - 1 triggers doubling before the push
        pool.execute(|| {}).unwrap();
        assert_eq!(pool.queue_size(), 4);
        assert_eq!(pool.pending(), 2);

        release_tx.send(()).unwrap();
        pool.shutdown(ShutdownMode::Leisurely).unwrap();
    }

    #[test]
    fn test_panicking_task_is_reported_on_shutdown() {
        let pool = WorkerPool::new(2, 4).unwrap();
        let (done_tx, done_rx) = mpsc::channel::<()>();

        pool.execute(move || {
            let _done = done_tx;
            panic!("task failure");
        })
        .unwrap();

        // Sender dropped during unwind
        assert!(done_rx.recv_timeout(Duration::from_secs(5)).is_err());

        assert!(matches!(
            pool.shutdown(ShutdownMode::Leisurely),
            Err(PoolError::ThreadFailure { failed: 1 })
        ));
        assert_eq!(pool.active_workers(), 0);
    }
}
