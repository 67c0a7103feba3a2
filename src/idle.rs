//! The worker sleep/wake handshake.
//!
//! A worker that has swept its edges empty twice parks here. Producers
//! wake it through [`Idle::interrupt`], which the reverse-sentinel
//! closure calls. The `armed` flag debounces a stampede of producers:
//! exactly one of them wins the swap and pays for the mutex and the
//! notify, the rest see `false` and skip the syscall.
//!
//! No wake-up is lost: a producer that read `armed == true` locks the
//! mutex before notifying, so either the worker is already on the
//! condvar when the notify lands, or the worker observes `armed ==
//! false` under the lock and never goes to sleep at all.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};

pub(crate) struct Idle {
    armed: AtomicBool,
    /// Guards the terminal `enabled` flag.
    state: Mutex<bool>,
    condvar: Condvar,
}

impl Idle {
    pub(crate) fn new() -> Self {
        Self {
            armed: AtomicBool::new(true),
            state: Mutex::new(true),
            condvar: Condvar::new(),
        }
    }

    /// Owner-only. Block until interrupted, unless a wake-up is already
    /// pending. Returns `false` once shut down.
    pub(crate) fn park(&self) -> bool {
        let mut enabled = self.state.lock().unwrap();
        if !*enabled {
            return false;
        }
        if self.armed.load(Ordering::Relaxed) {
            enabled = self.condvar.wait(enabled).unwrap();
        }
        self.armed.store(true, Ordering::Relaxed);
        *enabled
    }

    /// Any-thread. Wake the owner if it is parked or about to park.
    pub(crate) fn interrupt(&self) {
        if self.armed.swap(false, Ordering::AcqRel) {
            // Taking and dropping the lock orders us against a parking
            // owner that already passed its armed check.
            drop(self.state.lock().unwrap());
            self.condvar.notify_one();
        }
    }

    /// Shutdown switch. After `enable(false)` every `park` returns
    /// `false` forever.
    pub(crate) fn enable(&self, value: bool) {
        let mut state = self.state.lock().unwrap();
        *state = value;
        drop(state);
        self.condvar.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn interrupt_before_park_skips_the_sleep() {
        let idle = Idle::new();
        idle.interrupt();
        // The pending wake-up must be consumed without blocking.
        assert!(idle.park());
        assert!(idle.armed.load(Ordering::Relaxed));
    }

    #[test]
    fn interrupt_wakes_a_parked_owner() {
        let idle = Arc::new(Idle::new());
        let parked = {
            let idle = idle.clone();
            thread::spawn(move || idle.park())
        };
        thread::sleep(Duration::from_millis(50));
        idle.interrupt();
        assert!(parked.join().unwrap());
    }

    #[test]
    fn disable_unblocks_and_stays_terminal() {
        let idle = Arc::new(Idle::new());
        let parked = {
            let idle = idle.clone();
            thread::spawn(move || idle.park())
        };
        thread::sleep(Duration::from_millis(50));
        idle.enable(false);
        assert!(!parked.join().unwrap());
        assert!(!idle.park());
    }
}
