//! Stress tests for the executor
//!
//! These tests push task churn, cross-worker hopping, and the idle
//! protocol hard enough to surface lost wake-ups and accounting bugs.

use petek::Executor;
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn wait_for(counter: &AtomicUsize, expected: usize, what: &str) {
    let deadline = Instant::now() + Duration::from_secs(60);
    while counter.load(Ordering::SeqCst) < expected {
        assert!(
            Instant::now() < deadline,
            "{what}: timed out at {} of {expected}",
            counter.load(Ordering::SeqCst)
        );
        thread::yield_now();
    }
}

fn hop(executed: Arc<AtomicUsize>, finished: Arc<AtomicUsize>, remaining: usize) {
    executed.fetch_add(1, Ordering::Relaxed);
    if remaining > 0 {
        let next = (petek::current() + 1) % petek::concurrency();
        petek::spawn(next, move || hop(executed, finished, remaining - 1));
    } else {
        finished.fetch_add(1, Ordering::Relaxed);
    }
}

#[test]
fn test_ring_hops() {
    // K root tasks per worker, each hopping M times around the ring.
    const TASKS_PER_WORKER: usize = 64;
    const HOPS: usize = 256;

    let workers = thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
        .max(2);
    let executor = Executor::with_workers(workers);
    let executed = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicUsize::new(0));

    let start = Instant::now();
    for index in 0..workers {
        for _ in 0..TASKS_PER_WORKER {
            let executed = executed.clone();
            let finished = finished.clone();
            executor.inject(index, move || hop(executed, finished, HOPS));
        }
    }

    wait_for(&finished, workers * TASKS_PER_WORKER, "ring");
    let elapsed = start.elapsed();

    let total = workers * TASKS_PER_WORKER * (HOPS + 1);
    assert_eq!(executed.load(Ordering::SeqCst), total);

    let throughput = total as f64 / elapsed.as_secs_f64();
    println!("Ring hops:");
    println!("  {} task executions in {:?}", total, elapsed);
    println!("  Throughput: {:.0} tasks/sec", throughput);
}

#[test]
fn test_burst_workload() {
    // Alternating periods of high activity and silence: every quiet
    // period parks the pool, every burst has to wake it again.
    const BURSTS: usize = 10;
    const TASKS_PER_BURST: usize = 2000;

    let executor = Executor::with_workers(4);
    let counter = Arc::new(AtomicUsize::new(0));

    for burst in 0..BURSTS {
        for task in 0..TASKS_PER_BURST {
            let seen = counter.clone();
            executor.inject(task % 4, move || {
                seen.fetch_add(1, Ordering::Relaxed);
            });
        }
        wait_for(&counter, (burst + 1) * TASKS_PER_BURST, "burst");

        // Quiet period
        thread::sleep(Duration::from_millis(50));
    }

    assert_eq!(counter.load(Ordering::SeqCst), BURSTS * TASKS_PER_BURST);
    println!("Burst workload test: PASS");
}

#[test]
fn test_random_migration() {
    // Tasks defer to random workers; each continuation checks it fired
    // on the worker its task migrated to.
    const TASKS: usize = 5000;

    let workers = 4;
    let executor = Executor::with_workers(workers);
    let verified = Arc::new(AtomicUsize::new(0));

    for task in 0..TASKS {
        let verified = verified.clone();
        executor.inject(task % workers, move || {
            let destination = rand::thread_rng().gen_range(0..petek::concurrency());
            petek::spawn(petek::current(), move || {
                petek::defer(destination);
                destination
            })
            .then(move |destination| {
                assert_eq!(petek::current(), *destination);
                verified.fetch_add(1, Ordering::Relaxed);
            });
        });
    }

    wait_for(&verified, TASKS, "migration");
    println!("Random migration test: PASS");
}

#[test]
fn test_external_injection_contention() {
    // Many outside threads hammer inject concurrently; all of their
    // traffic shares worker 0's outbound row.
    const THREADS: usize = 8;
    const TASKS_PER_THREAD: usize = 10000;

    let executor = Arc::new(Executor::with_workers(4));
    let counter = Arc::new(AtomicUsize::new(0));
    let mut handles = vec![];

    let start = Instant::now();
    for tid in 0..THREADS {
        let executor = executor.clone();
        let counter = counter.clone();
        handles.push(thread::spawn(move || {
            for task in 0..TASKS_PER_THREAD {
                let seen = counter.clone();
                executor.inject((tid + task) % 4, move || {
                    seen.fetch_add(1, Ordering::Relaxed);
                });
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }
    wait_for(&counter, THREADS * TASKS_PER_THREAD, "contention");
    let elapsed = start.elapsed();

    let total = THREADS * TASKS_PER_THREAD;
    let throughput = total as f64 / elapsed.as_secs_f64();
    println!("External injection contention:");
    println!("  {} tasks in {:?}", total, elapsed);
    println!("  Throughput: {:.0} tasks/sec", throughput);
}
