//! Behavioral tests for the executor facade: placement, chaining,
//! migration, wake-up after idle, and shutdown.

use petek::Executor;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

fn wait_for(counter: &AtomicUsize, expected: usize) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while counter.load(Ordering::SeqCst) < expected {
        assert!(
            Instant::now() < deadline,
            "timed out waiting for {expected}, saw {}",
            counter.load(Ordering::SeqCst)
        );
        thread::yield_now();
    }
}

#[test]
fn single_worker_runs_an_injected_task() {
    let executor = Executor::with_workers(1);
    let counter = Arc::new(AtomicUsize::new(0));

    let seen = counter.clone();
    executor.inject(0, move || {
        seen.fetch_add(1, Ordering::SeqCst);
    });

    wait_for(&counter, 1);
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[test]
fn fan_out_reaches_every_worker_exactly_where_addressed() {
    let workers = thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
        .max(2);
    let executor = Executor::with_workers(workers);
    let counter = Arc::new(AtomicUsize::new(0));

    let seen = counter.clone();
    executor.inject(0, move || {
        for index in 0..petek::concurrency() {
            let seen = seen.clone();
            petek::spawn(index, move || {
                // Placement is part of the contract, not best effort.
                assert_eq!(petek::current(), index);
                seen.fetch_add(1, Ordering::SeqCst);
            });
        }
    });

    wait_for(&counter, workers);
    assert_eq!(counter.load(Ordering::SeqCst), workers);
}

#[test]
fn chained_continuations_observe_the_final_value() {
    let executor = Executor::with_workers(2);
    let (tx, rx) = mpsc::channel();

    executor.inject(0, move || {
        petek::spawn(1, || 1u32)
            .then(|value| value + 1)
            .then(|value| value + 1)
            .then(move |value| tx.send(*value).unwrap());
    });

    assert_eq!(rx.recv_timeout(Duration::from_secs(10)).unwrap(), 3);
}

#[test]
fn clones_of_a_future_all_observe_the_same_result() {
    let executor = Executor::with_workers(2);
    let (tx, rx) = mpsc::channel();

    executor.inject(0, move || {
        let future = petek::spawn(1, || 7u32);
        for _ in 0..4 {
            let tx = tx.clone();
            future.then(move |value| tx.send(*value).unwrap());
        }
    });

    for _ in 0..4 {
        assert_eq!(rx.recv_timeout(Duration::from_secs(10)).unwrap(), 7);
    }
}

#[test]
fn defer_runs_the_closure_here_and_completes_there() {
    let executor = Executor::with_workers(2);
    let (tx, rx) = mpsc::channel();

    executor.inject(0, move || {
        let task = petek::spawn(0, || {
            assert_eq!(petek::current(), 0);
            petek::defer(1);
            // Still on worker 0: defer moves completion, not the body.
            assert_eq!(petek::current(), 0);
            9u32
        });
        task.then(move |value| {
            assert_eq!(petek::current(), 1);
            tx.send(*value).unwrap();
        });
    });

    assert_eq!(rx.recv_timeout(Duration::from_secs(10)).unwrap(), 9);
}

#[test]
fn then_on_routes_the_continuation() {
    let executor = Executor::with_workers(3);
    let (tx, rx) = mpsc::channel();

    executor.inject(0, move || {
        petek::spawn(1, || 5u32).then_on(2, move |value| {
            assert_eq!(petek::current(), 2);
            tx.send(*value).unwrap();
        });
    });

    assert_eq!(rx.recv_timeout(Duration::from_secs(10)).unwrap(), 5);
}

#[test]
fn parked_workers_wake_for_late_traffic() {
    let executor = Executor::with_workers(2);
    let counter = Arc::new(AtomicUsize::new(0));

    // Give both workers ample time to run their edges dry and park.
    thread::sleep(Duration::from_millis(200));

    let seen = counter.clone();
    executor.inject(1, move || {
        let seen = seen.clone();
        petek::spawn(0, move || {
            seen.fetch_add(1, Ordering::SeqCst);
        });
    });

    wait_for(&counter, 1);

    // And again, once everything has gone quiet a second time.
    thread::sleep(Duration::from_millis(200));
    let seen = counter.clone();
    executor.inject(0, move || {
        seen.fetch_add(1, Ordering::SeqCst);
    });
    wait_for(&counter, 2);
}

#[test]
fn queries_reflect_pool_membership() {
    assert!(!petek::available());

    let executor = Executor::with_workers(2);
    assert_eq!(executor.concurrency(), 2);
    let (tx, rx) = mpsc::channel();

    executor.inject(1, move || {
        tx.send((petek::available(), petek::current(), petek::concurrency()))
            .unwrap();
    });

    let (available, current, concurrency) = rx.recv_timeout(Duration::from_secs(10)).unwrap();
    assert!(available);
    assert_eq!(current, 1);
    assert_eq!(concurrency, 2);
}

#[test]
fn dropping_the_executor_stops_the_pool() {
    let counter = Arc::new(AtomicUsize::new(0));
    {
        let executor = Executor::with_workers(2);
        let seen = counter.clone();
        executor.inject(0, move || {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        wait_for(&counter, 1);
    }
    // Pool is gone; the count can never move again.
    let snapshot = counter.load(Ordering::SeqCst);
    thread::sleep(Duration::from_millis(100));
    assert_eq!(counter.load(Ordering::SeqCst), snapshot);
}

#[test]
fn a_panicking_task_surfaces_at_shutdown() {
    let executor = Executor::with_workers(2);
    let (tx, rx) = mpsc::channel();

    executor.inject(0, move || {
        tx.send(()).unwrap();
        panic!("task failure");
    });
    rx.recv_timeout(Duration::from_secs(10)).unwrap();
    // Give the unwinding worker a moment to actually die.
    thread::sleep(Duration::from_millis(100));

    let result = catch_unwind(AssertUnwindSafe(move || drop(executor)));
    assert!(result.is_err(), "shutdown must re-raise the task panic");
}

#[test]
#[should_panic(expected = "out of range")]
fn injecting_past_the_pool_panics() {
    let executor = Executor::with_workers(2);
    executor.inject(2, || {});
}

#[test]
#[should_panic(expected = "requires a pool thread")]
fn spawning_off_the_pool_panics() {
    let _executor = Executor::with_workers(1);
    petek::spawn(0, || {});
}

#[test]
#[should_panic(expected = "at least one worker")]
fn zero_workers_is_rejected() {
    let _ = Executor::with_workers(0);
}
