//! The joint future/continuation node and its lock-free protocol.
//!
//! One allocation is both "the computation" and "the place its value will
//! live". A node starts with a closure, is delivered to some thread,
//! evaluates once, and from then on serves as the immutable result its
//! dependants read. Keeping both roles in one object halves the
//! allocation and reference-count traffic of the classic split
//! future/promise pair.
//!
//! The handshake is a single atomic word per node (`pending`):
//!
//! - `null`: not completed, nobody waiting.
//! - node pointer: not completed, chain of waiting dependants.
//! - the node's own address: completed. The word never leaves this state.
//!
//! `chain` CAS-prepends a dependant, or — when it observes the
//! self-sentinel — dispatches it on the spot. `complete` swaps the
//! sentinel in and dispatches everything it claimed. Whichever side wins
//! the race, a dependant is dispatched exactly once.
//!
//! Node layout is `#[repr(C)]`: a uniform [`RawExpr`] header, then the
//! result slot, then the captured closure. The result sits first in the
//! payload so its offset depends only on the result type — a dependant
//! can locate its argument inside its supplier knowing nothing about the
//! supplier's closure. The header carries type-erased `evaluate`/`drop`
//! function pointers, so no fat pointers ever enter a mailbox word.

use crate::counted::{self, Counted, Ref};
use crate::intrusive::Linked;
use crate::tag::{Tag, TaggedPtr, TAG_BITS};
use crate::worker;
use crossbeam_utils::Backoff;
use std::cell::{Cell, UnsafeCell};
use std::mem::{self, ManuallyDrop, MaybeUninit};
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

/// Process-wide count of live nodes, balanced across alloc and destroy.
static LIVE: AtomicUsize = AtomicUsize::new(0);

/// Number of expression nodes currently allocated.
pub(crate) fn live_nodes() -> usize {
    LIVE.load(Ordering::Relaxed)
}

/// Type-erased entry points of a concrete node shape.
pub(crate) struct ExprVTable {
    /// Consume the closure, populate the result, fire dependants.
    evaluate: unsafe fn(*mut RawExpr),
    /// Destroy whichever of closure/result is live, then free the node.
    drop: unsafe fn(*mut RawExpr),
}

/// Uniform node header. Every expression is addressed as `*mut RawExpr`.
#[repr(C, align(8))]
pub(crate) struct RawExpr {
    /// Wait-list head; the node's own address is the completed sentinel.
    pending: AtomicPtr<RawExpr>,
    /// List linkage while queued in a mailbox, wait list, or local batch.
    link: UnsafeCell<TaggedPtr<RawExpr>>,
    /// Owning edge to the node whose result is this node's input.
    /// Written by the dispatching thread, consumed by evaluation.
    supplier: UnsafeCell<*mut RawExpr>,
    refs: AtomicUsize,
    /// `None` evaluates on the dispatching thread; `Some(k)` routes to
    /// worker `k` through the interconnect.
    target: Cell<Option<usize>>,
    /// Set when the closure already ran but completion migrated to
    /// another worker. The result slot is live from that point on.
    migrated: Cell<bool>,
    vtable: &'static ExprVTable,
}

// Three tag bits ride in the low bits of every node address.
const _: () = assert!(mem::align_of::<RawExpr>() >= 1 << TAG_BITS);

unsafe impl Linked for RawExpr {
    #[inline]
    unsafe fn next(this: *mut Self) -> TaggedPtr<Self> {
        unsafe { *(*this).link.get() }
    }

    #[inline]
    unsafe fn set_next(this: *mut Self, next: TaggedPtr<Self>) {
        unsafe { *(*this).link.get() = next };
    }
}

unsafe impl Counted for RawExpr {
    #[inline]
    fn counter(&self) -> &AtomicUsize {
        &self.refs
    }

    #[inline]
    unsafe fn destroy(this: *mut Self) {
        unsafe { ((*this).vtable.drop)(this) }
    }
}

/// Concrete storage behind a [`RawExpr`]: result slot first so its
/// offset is a function of `R` alone, closure after it.
#[repr(C)]
struct Node<R, F> {
    raw: RawExpr,
    result: UnsafeCell<MaybeUninit<R>>,
    func: UnsafeCell<ManuallyDrop<F>>,
}

/// Locate the result slot of a node whose result type is `R`.
///
/// # Safety
///
/// `raw` must head an allocation whose result type is exactly `R`.
#[inline]
pub(crate) unsafe fn result_slot<R>(raw: *mut RawExpr) -> *mut R {
    let base = raw as usize + mem::size_of::<RawExpr>();
    let align = mem::align_of::<R>();
    ((base + align - 1) & !(align - 1)) as *mut R
}

fn alloc<R, F>(function: F, target: Option<usize>, vtable: &'static ExprVTable) -> Ref<RawExpr> {
    let node = Box::into_raw(Box::new(Node::<R, F> {
        raw: RawExpr {
            pending: AtomicPtr::new(ptr::null_mut()),
            link: UnsafeCell::new(TaggedPtr::null(Tag::Normal)),
            supplier: UnsafeCell::new(ptr::null_mut()),
            refs: AtomicUsize::new(1),
            target: Cell::new(target),
            migrated: Cell::new(false),
            vtable,
        },
        result: UnsafeCell::new(MaybeUninit::uninit()),
        func: UnsafeCell::new(ManuallyDrop::new(function)),
    }));
    LIVE.fetch_add(1, Ordering::Relaxed);
    let raw = node.cast::<RawExpr>();
    // The offset arithmetic in `result_slot` must agree with repr(C).
    debug_assert_eq!(unsafe { result_slot::<R>(raw) }, unsafe {
        (*node).result.get().cast::<R>()
    });
    // SAFETY: the allocation starts with one reference, adopted here.
    unsafe { Ref::usurp(raw) }
}

/// A root task: no input, evaluates `function` when it reaches its
/// target.
pub(crate) fn task<R, F>(function: F, target: Option<usize>) -> Ref<RawExpr>
where
    F: FnOnce() -> R,
{
    alloc::<R, F>(function, target, &Task::<R, F>::VTABLE)
}

/// A continuation: evaluates `function` over its supplier's result.
pub(crate) fn continuation<A, R, F>(function: F, target: Option<usize>) -> Ref<RawExpr>
where
    F: FnOnce(&A) -> R,
{
    alloc::<R, F>(function, target, &Continuation::<A, R, F>::VTABLE)
}

/// A value placeholder: no closure; some external party stores the
/// result and completes it.
pub(crate) fn argument<R>() -> Ref<RawExpr> {
    alloc::<R, ()>((), None, &Argument::<R>::VTABLE)
}

/// Run a node's evaluation entry point on the current thread.
///
/// # Safety
///
/// The caller must hold a reference to `raw` and be the unique party
/// evaluating it (the dispatch protocol guarantees uniqueness).
#[inline]
pub(crate) unsafe fn run(raw: *mut RawExpr) {
    unsafe { ((*raw).vtable.evaluate)(raw) }
}

/// Deliver a node: inline when unaddressed, through the mesh otherwise.
/// Consumes the caller's reference either way.
///
/// # Safety
///
/// `node` must be dispatched by exactly one party.
pub(crate) unsafe fn dispatch(node: Ref<RawExpr>) {
    let raw = node.get();
    match unsafe { (*raw).target.get() } {
        None => {
            // The reference is re-adopted only after evaluation returns:
            // a panicking closure leaves the node leaked rather than
            // double-destroying its half-consumed payload.
            let raw = node.leak();
            unsafe {
                run(raw);
                drop(Ref::usurp(raw));
            }
        }
        Some(index) => unsafe { worker::forward(index, node) },
    }
}

/// Register `dependant` on `source`, consuming the caller's reference to
/// the dependant.
///
/// If `source` already completed, the dependant is dispatched
/// immediately from this thread; otherwise the reference moves onto the
/// wait list and completion will dispatch it later.
///
/// # Safety
///
/// `source` must be live and `dependant` must not be on any list.
pub(crate) unsafe fn chain(source: *mut RawExpr, dependant: Ref<RawExpr>) {
    let dep = dependant.get();
    let backoff = Backoff::new();
    loop {
        // Acquire pairs with the completing swap so the fast path below
        // reads a fully published result through `supplier`.
        let prior = unsafe { (*source).pending.load(Ordering::Acquire) };
        if prior == source {
            unsafe {
                debug_assert!((*dep).supplier.get().read().is_null());
                *(*dep).supplier.get() = source;
                counted::acquire(source);
                dispatch(dependant);
            }
            return;
        }
        unsafe { *(*dep).link.get() = TaggedPtr::new(prior, Tag::Normal) };
        match unsafe {
            (*source)
                .pending
                .compare_exchange(prior, dep, Ordering::Release, Ordering::Relaxed)
        } {
            Ok(_) => {
                // The wait list owns the reference now.
                dependant.leak();
                return;
            }
            Err(_) => backoff.spin(),
        }
    }
}

/// Seal the node with the self-sentinel and dispatch every claimed
/// dependant, transferring the wait list's references into flight.
///
/// # Safety
///
/// Must be called exactly once per node, by the evaluating thread, with
/// the result slot already populated.
pub(crate) unsafe fn complete(raw: *mut RawExpr) {
    let mut waiting = unsafe { (*raw).pending.swap(raw, Ordering::AcqRel) };
    debug_assert!(waiting != raw, "expression completed twice");
    while !waiting.is_null() {
        unsafe {
            let next = (*(*waiting).link.get()).ptr();
            debug_assert!((*waiting).supplier.get().read().is_null());
            *(*waiting).supplier.get() = raw;
            counted::acquire(raw);
            dispatch(Ref::usurp(waiting));
            waiting = next;
        }
    }
}

/// Re-route the just-evaluated node so completion fires on `target`.
unsafe fn migrate(raw: *mut RawExpr, target: usize) {
    unsafe {
        (*raw).migrated.set(true);
        (*raw).target.set(Some(target));
        worker::forward(target, Ref::acquired(raw));
    }
}

/// Release every node on an unclaimed wait-list chain.
unsafe fn release_chain(mut pending: *mut RawExpr) {
    while !pending.is_null() {
        unsafe {
            let next = (*(*pending).link.get()).ptr();
            counted::release(pending);
            pending = next;
        }
    }
}

/// Shared teardown: destroy whichever payload half is live, drop any
/// references the node still holds, free the allocation.
unsafe fn drop_node<R, F>(raw: *mut RawExpr) {
    let node = raw.cast::<Node<R, F>>();
    unsafe {
        let pending = (*raw).pending.load(Ordering::Relaxed);
        let completed = pending == raw;
        if completed || (*raw).migrated.get() {
            ptr::drop_in_place((*(*node).result.get()).as_mut_ptr());
        } else {
            ManuallyDrop::drop(&mut *(*node).func.get());
        }
        if !completed {
            release_chain(pending);
        }
        counted::release((*raw).supplier.get().read());
        LIVE.fetch_sub(1, Ordering::Relaxed);
        drop(Box::from_raw(node));
    }
}

struct Task<R, F>(std::marker::PhantomData<(R, F)>);

impl<R, F: FnOnce() -> R> Task<R, F> {
    const VTABLE: ExprVTable = ExprVTable {
        evaluate: Self::evaluate,
        drop: drop_node::<R, F>,
    };

    unsafe fn evaluate(raw: *mut RawExpr) {
        unsafe {
            if (*raw).migrated.get() {
                complete(raw);
                return;
            }
            let node = raw.cast::<Node<R, F>>();
            // SAFETY: dispatch uniqueness; the closure is taken once.
            let function = ManuallyDrop::take(&mut *(*node).func.get());
            let saved = worker::swap_deferred(None);
            let value = function();
            let deferred = worker::swap_deferred(saved);
            (*(*node).result.get()).write(value);
            match deferred {
                Some(target) => migrate(raw, target),
                None => complete(raw),
            }
        }
    }
}

struct Continuation<A, R, F>(std::marker::PhantomData<(A, R, F)>);

impl<A, R, F: FnOnce(&A) -> R> Continuation<A, R, F> {
    const VTABLE: ExprVTable = ExprVTable {
        evaluate: Self::evaluate,
        drop: drop_node::<R, F>,
    };

    unsafe fn evaluate(raw: *mut RawExpr) {
        unsafe {
            if (*raw).migrated.get() {
                complete(raw);
                return;
            }
            let node = raw.cast::<Node<R, F>>();
            let function = ManuallyDrop::take(&mut *(*node).func.get());
            let supplier = (*raw).supplier.get().read();
            debug_assert!(!supplier.is_null(), "continuation dispatched without a supplier");
            let saved = worker::swap_deferred(None);
            let value = function(&*result_slot::<A>(supplier));
            let deferred = worker::swap_deferred(saved);
            (*(*node).result.get()).write(value);
            *(*raw).supplier.get() = ptr::null_mut();
            counted::release(supplier);
            match deferred {
                Some(target) => migrate(raw, target),
                None => complete(raw),
            }
        }
    }
}

struct Argument<R>(std::marker::PhantomData<R>);

impl<R> Argument<R> {
    const VTABLE: ExprVTable = ExprVTable {
        evaluate: Self::evaluate,
        drop: drop_node::<R, ()>,
    };

    unsafe fn evaluate(raw: *mut RawExpr) {
        unsafe { complete(raw) }
    }
}
