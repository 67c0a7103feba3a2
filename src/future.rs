//! Promises, futures, and continuation chaining.
//!
//! [`Future<T>`] is a counted handle on an expression node viewed as
//! "the value it will produce"; [`Promise<T>`] is a handle on a
//! placeholder node whose value arrives from outside. Chaining with
//! [`then`](Future::then) allocates one node per continuation — there is
//! no separate callback registration object, the continuation *is* the
//! next future.
//!
//! Without a target, continuations use immediate dispatch: they run on
//! whichever thread completes their supplier, promise completions
//! included. [`then_on`](Future::then_on) routes the continuation to a
//! specific worker instead, which requires the supplier to complete on a
//! pool thread.

use crate::counted::Ref;
use crate::expression::{self, RawExpr};
use std::marker::PhantomData;

/// A handle on the eventual result of an expression.
///
/// Cloning is cheap (one reference-count increment) and clones may be
/// chained independently; every continuation observes the same result.
///
/// # Example
///
/// ```rust
/// use petek::Promise;
/// use std::sync::mpsc;
///
/// let (tx, rx) = mpsc::channel();
/// let promise = Promise::new();
/// promise
///     .future()
///     .then(|value: &i32| value * 2)
///     .then(move |value| tx.send(*value).unwrap());
/// promise.complete(21);
/// assert_eq!(rx.recv().unwrap(), 42);
/// ```
pub struct Future<T> {
    node: Ref<RawExpr>,
    marker: PhantomData<fn(&T)>,
}

// SAFETY: the handle only permits chaining, which is lock-free and safe
// from any thread; the result is read as &T across threads, hence the
// Sync bound, and may be dropped on another thread, hence Send.
unsafe impl<T: Send + Sync> Send for Future<T> {}
unsafe impl<T: Send + Sync> Sync for Future<T> {}

impl<T> Clone for Future<T> {
    fn clone(&self) -> Self {
        Self {
            node: self.node.clone(),
            marker: PhantomData,
        }
    }
}

impl<T: Send + Sync + 'static> Future<T> {
    pub(crate) fn from_node(node: Ref<RawExpr>) -> Self {
        Self {
            node,
            marker: PhantomData,
        }
    }

    /// Chain a continuation with immediate dispatch: it runs on
    /// whichever thread completes this future.
    pub fn then<R, F>(&self, function: F) -> Future<R>
    where
        F: FnOnce(&T) -> R + Send + 'static,
        R: Send + Sync + 'static,
    {
        self.chain_to(None, function)
    }

    /// Chain a continuation routed to worker `target`.
    ///
    /// The chain must complete on a pool thread; completing a supplier
    /// of a routed continuation from outside the pool is a programmer
    /// error.
    pub fn then_on<R, F>(&self, target: usize, function: F) -> Future<R>
    where
        F: FnOnce(&T) -> R + Send + 'static,
        R: Send + Sync + 'static,
    {
        self.chain_to(Some(target), function)
    }

    fn chain_to<R, F>(&self, target: Option<usize>, function: F) -> Future<R>
    where
        F: FnOnce(&T) -> R + Send + 'static,
        R: Send + Sync + 'static,
    {
        let node = expression::continuation::<T, R, F>(function, target);
        let future = Future {
            node: node.clone(),
            marker: PhantomData,
        };
        // SAFETY: `node` is fresh, on no list; the reference we hand
        // over is consumed by the protocol.
        unsafe { expression::chain(self.node.get(), node) };
        future
    }
}

/// The writing end of a [`Future`].
///
/// `complete` consumes the promise, so a value can be supplied exactly
/// once; the borrow checker enforces what would otherwise be a runtime
/// assertion. Dropping an uncompleted promise releases the placeholder
/// and every continuation chained on it without running any of them.
pub struct Promise<T> {
    node: Ref<RawExpr>,
    marker: PhantomData<fn(T)>,
}

// SAFETY: same reasoning as Future; the stored value additionally moves
// in from the completing thread.
unsafe impl<T: Send + Sync> Send for Promise<T> {}
unsafe impl<T: Send + Sync> Sync for Promise<T> {}

impl<T: Send + Sync + 'static> Promise<T> {
    /// A promise with no value yet.
    pub fn new() -> Self {
        Self {
            node: expression::argument::<T>(),
            marker: PhantomData,
        }
    }

    /// A future observing this promise.
    pub fn future(&self) -> Future<T> {
        Future {
            node: self.node.clone(),
            marker: PhantomData,
        }
    }

    /// Supply the value and fire every chained continuation from this
    /// thread.
    pub fn complete(self, value: T) {
        // SAFETY: consuming self makes this the unique completion; the
        // slot is written before the node is sealed.
        unsafe {
            expression::result_slot::<T>(self.node.get()).write(value);
            expression::run(self.node.get());
        }
    }
}

impl<T: Send + Sync + 'static> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}
