//! The executor facade: mesh construction, worker lifecycle, and the
//! task-context entry points.

use crate::expression;
use crate::future::Future;
use crate::idle::Idle;
use crate::interconnect::Mesh;
use crate::worker::{self, Worker};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

const DEFAULT_SENTINEL_CACHE: usize = 32;

struct Handle {
    idle: Arc<Idle>,
    thread: Option<JoinHandle<()>>,
}

/// A pool of index-pinned workers joined by a lock-free mailbox mesh.
///
/// Tasks are addressed to a worker index in `[0, concurrency)` and run
/// to completion there. From inside a task, [`spawn`] fans further work
/// out to any worker and [`defer`] migrates the running task's
/// completion; from outside, [`inject`](Executor::inject) is the only
/// door in.
///
/// Dropping the executor shuts the pool down: workers finish the task
/// they are on, queued tasks that never started are released unrun, and
/// every thread is joined before `drop` returns.
///
/// # Example
///
/// ```rust
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::{mpsc, Arc};
///
/// let executor = petek::Executor::with_workers(2);
/// let counter = Arc::new(AtomicUsize::new(0));
/// let (tx, rx) = mpsc::channel();
///
/// let seen = counter.clone();
/// executor.inject(0, move || {
///     petek::spawn(1, move || {
///         seen.fetch_add(1, Ordering::Relaxed);
///     })
///     .then(move |_| tx.send(()).unwrap());
/// });
///
/// rx.recv().unwrap();
/// assert_eq!(counter.load(Ordering::Relaxed), 1);
/// ```
pub struct Executor {
    mesh: Arc<Mesh>,
    workers: Vec<Handle>,
}

impl Executor {
    /// An executor with one worker per hardware thread.
    pub fn new() -> Self {
        let workers = thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1);
        Self::with_workers(workers)
    }

    /// An executor with exactly `workers` workers.
    pub fn with_workers(workers: usize) -> Self {
        Self::with_config(workers, DEFAULT_SENTINEL_CACHE)
    }

    /// Full construction: worker count plus the advisory per-worker
    /// wake-sentinel cache capacity.
    pub fn with_config(workers: usize, sentinel_cache: usize) -> Self {
        assert!(workers >= 1, "executor requires at least one worker");
        let mesh = Arc::new(Mesh::new(workers));
        let handles = (0..workers)
            .map(|index| {
                let idle = Arc::new(Idle::new());
                let worker_mesh = mesh.clone();
                let worker_idle = idle.clone();
                let thread = thread::Builder::new()
                    .name(format!("petek-worker-{index}"))
                    .spawn(move || {
                        Worker::new(worker_mesh, index, worker_idle, sentinel_cache).run()
                    })
                    .expect("failed to spawn worker thread");
                Handle {
                    idle,
                    thread: Some(thread),
                }
            })
            .collect();
        Self {
            mesh,
            workers: handles,
        }
    }

    /// Number of workers in the pool.
    pub fn concurrency(&self) -> usize {
        self.mesh.workers()
    }

    /// Submit `function` to worker `target` from outside the pool.
    ///
    /// Returns once the task is enqueued; the closure runs later on the
    /// target worker. Out-of-range targets panic.
    pub fn inject<F>(&self, target: usize, function: F)
    where
        F: FnOnce() + Send + 'static,
    {
        assert!(
            target < self.mesh.workers(),
            "target {target} out of range for {} workers",
            self.mesh.workers()
        );
        let node = expression::task(function, Some(target));
        self.mesh.node(0).route(target).send(node);
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        for handle in &self.workers {
            handle.idle.enable(false);
        }
        let mut panic = None;
        for handle in &mut self.workers {
            if let Some(thread) = handle.thread.take() {
                if let Err(payload) = thread.join() {
                    panic.get_or_insert(payload);
                }
            }
        }
        // With every thread joined the mesh is quiescent; releasing the
        // undelivered nodes collapses whatever graph is left.
        self.mesh.drain();
        if let Some(payload) = panic {
            std::panic::resume_unwind(payload);
        }
    }
}

/// Submit `function` to worker `target` from inside a running task and
/// get a future on its result.
///
/// Self-addressed spawns bypass the interconnect entirely. Panics when
/// called off the pool or with an out-of-range target.
pub fn spawn<R, F>(target: usize, function: F) -> Future<R>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + Sync + 'static,
{
    worker::with_current(|current| {
        let current = current.expect("spawn requires a pool thread");
        let node = expression::task(function, Some(target));
        let future = Future::from_node(node.clone());
        current.forward_from(target, node);
        future
    })
}

/// Migrate the currently running task to worker `target`.
///
/// The closure keeps running here; once it returns, the task's
/// completion — and with it every continuation not routed elsewhere —
/// fires on `target` instead. At most one `defer` per evaluation.
pub fn defer(target: usize) {
    worker::with_current(|current| {
        let current = current.expect("defer requires a pool thread");
        assert!(
            target < current.concurrency(),
            "target {target} out of range for {} workers",
            current.concurrency()
        );
    });
    worker::request_defer(target);
}

/// Index of the worker running the current thread.
///
/// Panics off the pool; see [`available`].
pub fn current() -> usize {
    worker::with_current(|current| current.expect("no worker on this thread").index())
}

/// Pool size, queried from inside a task. Panics off the pool.
pub fn concurrency() -> usize {
    worker::with_current(|current| current.expect("no worker on this thread").concurrency())
}

/// Whether the current thread is a pool worker.
pub fn available() -> bool {
    worker::with_current(|current| current.is_some())
}
