//! Node accounting. A single test keeps the process-wide live counter
//! free of interference from parallel tests.

use petek::{Executor, Promise};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn every_allocation_path_returns_to_zero() {
    let baseline = petek::live_expressions();

    // Promise chains created and abandoned without ever completing.
    for _ in 0..10_000 {
        let promise = Promise::new();
        let tail = promise
            .future()
            .then(|value: &usize| value + 1)
            .then(|value| value * 2);
        drop(tail);
        drop(promise);
    }
    assert_eq!(petek::live_expressions(), baseline, "abandoned chains leaked");

    // Completed chains, handles dropped afterwards.
    for _ in 0..10_000 {
        let promise = Promise::new();
        let tail = promise.future().then(|value: &usize| value + 1);
        promise.complete(1);
        drop(tail);
    }
    assert_eq!(petek::live_expressions(), baseline, "completed chains leaked");

    // A full executor run: tasks, fan-out, migration, wake sentinels.
    let counter = Arc::new(AtomicUsize::new(0));
    {
        let executor = Executor::with_workers(4);
        for round in 0..100 {
            let seen = counter.clone();
            executor.inject(round % 4, move || {
                for index in 0..petek::concurrency() {
                    let seen = seen.clone();
                    petek::spawn(index, move || {
                        petek::defer((petek::current() + 1) % petek::concurrency());
                        seen.fetch_add(1, Ordering::SeqCst);
                    });
                }
            });
        }
        let deadline = Instant::now() + Duration::from_secs(30);
        while counter.load(Ordering::SeqCst) < 100 * 4 {
            assert!(Instant::now() < deadline, "executor stalled");
            thread::yield_now();
        }
        // Let the pool go fully idle so sentinels are in flight too.
        thread::sleep(Duration::from_millis(200));
    }
    assert_eq!(
        petek::live_expressions(),
        baseline,
        "executor shutdown leaked nodes"
    );
}
