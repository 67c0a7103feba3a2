//! The per-worker event loop.
//!
//! A worker sweeps its incoming edges, evaluates whatever it claims,
//! and backs off through a two-pass handshake before parking:
//!
//! 1. An empty sweep flips `prepare_idle` on.
//! 2. The next sweep re-claims every edge while leaving a
//!    `Reverse`-tagged sentinel armed in each head. Any producer that
//!    lands afterwards observes the sentinel, unhooks it, and runs its
//!    closure — [`Idle::interrupt`] for this worker.
//! 3. Only if that sweep is empty too does the worker park. A producer
//!    that raced the window is caught either by the sentinel it claimed
//!    or by the `armed` flag inside [`Idle::park`].
//!
//! Sentinels that flow back unclaimed (tag still `Reverse`) were never
//! executed; their closures are intact, so they go to a small reuse
//! cache instead of the allocator.
//!
//! Self-addressed work never touches the interconnect: it lands on a
//! plain local backlog drained at the end of every sweep.

use crate::counted::Ref;
use crate::expression::{self, RawExpr};
use crate::idle::Idle;
use crate::interconnect::Mesh;
use crate::intrusive::List;
use crate::tag::{Tag, TaggedPtr};
use std::cell::{Cell, RefCell};
use std::ptr;
use std::sync::Arc;

thread_local! {
    /// The worker owning this thread, set for the duration of `run`.
    static CURRENT: Cell<*const Worker> = const { Cell::new(ptr::null()) };
    /// Pending migration target recorded by `defer` mid-evaluation.
    static DEFERRED: Cell<Option<usize>> = const { Cell::new(None) };
}

pub(crate) struct Worker {
    mesh: Arc<Mesh>,
    index: usize,
    idle: Arc<Idle>,
    /// Unused wake sentinels, closures intact, ready to re-arm.
    cache: RefCell<Vec<Ref<RawExpr>>>,
    cache_capacity: usize,
    /// Self-addressed tasks; drained every sweep, no atomics involved.
    backlog: RefCell<List<RawExpr>>,
}

impl Worker {
    pub(crate) fn new(
        mesh: Arc<Mesh>,
        index: usize,
        idle: Arc<Idle>,
        cache_capacity: usize,
    ) -> Self {
        Self {
            mesh,
            index,
            idle,
            cache: RefCell::new(Vec::with_capacity(cache_capacity)),
            cache_capacity,
            backlog: RefCell::new(List::new()),
        }
    }

    #[inline]
    pub(crate) fn index(&self) -> usize {
        self.index
    }

    #[inline]
    pub(crate) fn concurrency(&self) -> usize {
        self.mesh.workers()
    }

    /// The event loop. Returns once the idle object is disabled.
    pub(crate) fn run(&self) {
        CURRENT.with(|current| current.set(self as *const Worker));
        let node = self.mesh.node(self.index);
        let mut prepare_idle = false;
        loop {
            let mut processed = 0usize;
            for peer in 0..self.mesh.workers() {
                let sentinel = if prepare_idle {
                    self.armed_sentinel()
                } else {
                    TaggedPtr::null(Tag::Normal)
                };
                let mut batch = node.route(peer).receive(sentinel);
                // SAFETY: the claimed chain carries one reference per
                // node; we adopt each as we pop it.
                unsafe {
                    while let Some(message) = batch.pop() {
                        match message.tag() {
                            Tag::Normal => {
                                // Adopt the in-flight reference only once
                                // evaluation returns; a panicking task
                                // leaks its node instead of corrupting it.
                                expression::run(message.ptr());
                                drop(Ref::usurp(message.ptr()));
                                processed += 1;
                            }
                            Tag::Reverse => self.recache(Ref::usurp(message.ptr())),
                            Tag::Delay => unreachable!("delay tag is reserved"),
                        }
                    }
                }
            }
            processed += self.drain_backlog();

            if processed > 0 {
                prepare_idle = false;
            } else if prepare_idle {
                if !self.idle.park() {
                    break;
                }
            } else {
                prepare_idle = true;
            }
        }
        CURRENT.with(|current| current.set(ptr::null()));
    }

    /// Route a node to `index`, consuming the caller's reference.
    pub(crate) fn forward_from(&self, index: usize, node: Ref<RawExpr>) {
        assert!(
            index < self.mesh.workers(),
            "target {index} out of range for {} workers",
            self.mesh.workers()
        );
        if index == self.index {
            let message = TaggedPtr::new(node.leak(), Tag::Normal);
            // SAFETY: we own the reference carried by `message` and the
            // node is on no other list.
            unsafe { self.backlog.borrow_mut().push(message) };
        } else {
            self.mesh.node(self.index).route(index).send(node);
        }
    }

    fn drain_backlog(&self) -> usize {
        let mut processed = 0usize;
        loop {
            // The borrow must end before the task runs: evaluation may
            // push more self-addressed work.
            let message = unsafe { self.backlog.borrow_mut().pop() };
            let Some(message) = message else { break };
            // SAFETY: backlog entries carry one reference each, adopted
            // after evaluation returns.
            unsafe {
                expression::run(message.ptr());
                drop(Ref::usurp(message.ptr()));
            }
            processed += 1;
        }
        processed
    }

    /// A `Reverse`-tagged sentinel ready to arm a mailbox head, drawn
    /// from the cache when possible.
    fn armed_sentinel(&self) -> TaggedPtr<RawExpr> {
        let sentinel = self.cache.borrow_mut().pop().unwrap_or_else(|| {
            let idle = self.idle.clone();
            expression::task(move || idle.interrupt(), None)
        });
        TaggedPtr::new(sentinel.leak(), Tag::Reverse)
    }

    fn recache(&self, sentinel: Ref<RawExpr>) {
        let mut cache = self.cache.borrow_mut();
        if cache.len() < self.cache_capacity {
            cache.push(sentinel);
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        // Self-addressed tasks that never ran are released unevaluated.
        let mut backlog = self.backlog.borrow_mut();
        // SAFETY: the worker thread is exiting; nothing else reaches
        // this backlog.
        unsafe {
            while let Some(message) = backlog.pop() {
                drop(Ref::usurp(message.ptr()));
            }
        }
    }
}

/// Call `f` with the worker bound to this thread, if any.
pub(crate) fn with_current<T>(f: impl FnOnce(Option<&Worker>) -> T) -> T {
    CURRENT.with(|current| {
        let worker = current.get();
        if worker.is_null() {
            f(None)
        } else {
            // SAFETY: CURRENT is only set while the worker runs on this
            // very thread.
            f(Some(unsafe { &*worker }))
        }
    })
}

/// Route `node` to worker `index` from the current pool thread,
/// consuming the reference.
///
/// # Safety
///
/// `node` must carry exactly the reference being transferred.
pub(crate) unsafe fn forward(index: usize, node: Ref<RawExpr>) {
    with_current(|worker| {
        let worker = worker.expect("routed dispatch requires a pool thread");
        worker.forward_from(index, node);
    })
}

/// Swap the thread's pending-migration slot. Evaluation brackets itself
/// with this so nested evaluations cannot observe an outer `defer`.
pub(crate) fn swap_deferred(value: Option<usize>) -> Option<usize> {
    DEFERRED.with(|deferred| deferred.replace(value))
}

/// Record a migration target for the evaluation in progress.
pub(crate) fn request_defer(target: usize) {
    DEFERRED.with(|deferred| {
        assert!(
            deferred.replace(Some(target)).is_none(),
            "defer called twice in one evaluation"
        );
    });
}
