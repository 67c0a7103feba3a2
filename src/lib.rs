//! Petek: a per-core task executor with continuation-style futures.
//! Lock-free dispatch, bounded wake-up cost, predictable shutdown.
//!
//! Petek pins one worker thread to each index of a small address space
//! `[0, N)` and connects every pair of workers with its own
//! single-consumer mailbox. A task is one allocation that is
//! simultaneously the closure to run, the slot its result will live in,
//! and the wait list of continuations to fire — completing a task
//! dispatches its dependants straight into the mailbox fabric, so
//! continuation fan-out runs in parallel without a scheduler in the
//! middle.
//!
//! # Key Features
//!
//! - **Lock-Free Dispatch**: producers CAS-prepend, the owning worker
//!   claims an entire batch with a single swap
//! - **Joint Future/Continuation Nodes**: one allocation and one
//!   reference count per task, result included
//! - **Debounced Wake-Ups**: a sleeping worker costs its producers at
//!   most one mutex/notify among all of them
//! - **Explicit Placement**: every task names the worker it runs on;
//!   [`defer`] migrates a running task without copying it
//!
//! # Example
//!
//! ```rust
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::{mpsc, Arc};
//!
//! let executor = petek::Executor::with_workers(2);
//! let counter = Arc::new(AtomicUsize::new(0));
//! let (tx, rx) = mpsc::channel();
//!
//! let seen = counter.clone();
//! executor.inject(0, move || {
//!     // Runs on worker 0; fan one hop out to worker 1.
//!     let hop = petek::spawn(1, move || seen.fetch_add(1, Ordering::Relaxed));
//!     hop.then(move |_| tx.send(()).unwrap());
//! });
//!
//! rx.recv().unwrap();
//! assert_eq!(counter.load(Ordering::Relaxed), 1);
//! ```
//!
//! Standalone promises work without an executor; continuations then run
//! inline on the completing thread:
//!
//! ```rust
//! let promise = petek::Promise::new();
//! let future = promise.future().then(|value: &u32| value + 1);
//! promise.complete(41);
//! drop(future);
//! ```
//!
//! # Panics
//!
//! There is no in-band error channel. Addressing a worker outside
//! `[0, N)`, calling [`spawn`]/[`defer`]/[`current`] off the pool, or
//! calling [`defer`] twice in one task are programmer errors and panic.
//! A task closure that panics unwinds its worker thread: the remaining
//! workers keep running, the panicking task's dependants are stranded,
//! and dropping the [`Executor`] re-raises the panic after every thread
//! has been joined.

#![warn(missing_docs)]

mod counted;
mod executor;
mod expression;
mod future;
mod idle;
mod interconnect;
mod intrusive;
mod tag;
mod utils;
mod worker;

pub use executor::{available, concurrency, current, defer, spawn, Executor};
pub use future::{Future, Promise};

/// Number of expression nodes currently alive in the process.
///
/// Every task, continuation, promise, and wake sentinel is one node.
/// After an executor is dropped and all future handles released the
/// count returns to its prior value; leak tests key off this.
pub fn live_expressions() -> usize {
    expression::live_nodes()
}
