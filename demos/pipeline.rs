//! Simple example demonstrating petek's basic API

use std::sync::mpsc;

fn main() {
    let executor = petek::Executor::new();
    println!("Pool size: {}", executor.concurrency());

    let (tx, rx) = mpsc::channel();

    // Stage a small pipeline: each step runs on the next worker over.
    executor.inject(0, move || {
        let here = petek::current();
        let next = (here + 1) % petek::concurrency();
        println!("stage 0 on worker {here}");

        petek::spawn(next, || {
            println!("stage 1 on worker {}", petek::current());
            10u64
        })
        .then(|value| {
            println!("stage 2 on worker {}", petek::current());
            value * 4
        })
        .then(move |value| {
            println!("stage 3 on worker {}", petek::current());
            tx.send(*value + 2).unwrap();
        });
    });

    let result = rx.recv().unwrap();
    println!("pipeline result: {result}");
    assert_eq!(result, 42);

    println!("Example completed successfully!");
}
