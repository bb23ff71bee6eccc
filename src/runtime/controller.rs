//! Main-thread controller (spec.md §4.10, C10): tracks whether the
//! process still has outstanding work and wakes the main thread once it
//! doesn't, so `gotsc run` can exit instead of hanging on idle worker
//! threads.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Condvar, Mutex};

pub struct MainController {
    active_goroutines: AtomicI64,
    pending_timers: AtomicI64,
    active_io: AtomicI64,
    mutex: Mutex<()>,
    condvar: Condvar,
}

impl MainController {
    pub fn new() -> Self {
        MainController {
            active_goroutines: AtomicI64::new(0),
            pending_timers: AtomicI64::new(0),
            active_io: AtomicI64::new(0),
            mutex: Mutex::new(()),
            condvar: Condvar::new(),
        }
    }

    pub fn goroutine_started(&self) {
        self.active_goroutines.fetch_add(1, Ordering::SeqCst);
    }

    pub fn goroutine_finished(&self) {
        self.active_goroutines.fetch_sub(1, Ordering::SeqCst);
        self.wake_if_quiescent();
    }

    pub fn timer_scheduled(&self) {
        self.pending_timers.fetch_add(1, Ordering::SeqCst);
    }

    pub fn timer_settled(&self) {
        self.pending_timers.fetch_sub(1, Ordering::SeqCst);
        self.wake_if_quiescent();
    }

    pub fn io_started(&self) {
        self.active_io.fetch_add(1, Ordering::SeqCst);
    }

    pub fn io_finished(&self) {
        self.active_io.fetch_sub(1, Ordering::SeqCst);
        self.wake_if_quiescent();
    }

    fn total(&self) -> i64 {
        self.active_goroutines.load(Ordering::SeqCst)
            + self.pending_timers.load(Ordering::SeqCst)
            + self.active_io.load(Ordering::SeqCst)
    }

    fn wake_if_quiescent(&self) {
        if self.total() <= 0 {
            let _hold = self.mutex.lock().unwrap();
            self.condvar.notify_all();
        }
    }

    /// Block the calling (main) thread until every tracked counter has
    /// returned to zero (spec.md §4.10 "process-exit eligibility").
    pub fn wait_for_quiescence(&self) {
        loop {
            if self.total() <= 0 {
                return;
            }
            let guard = self.mutex.lock().unwrap();
            if self.total() <= 0 {
                return;
            }
            let _ = self
                .condvar
                .wait_timeout(guard, std::time::Duration::from_millis(50))
                .unwrap();
        }
    }
}

impl Default for MainController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiescent_immediately_with_no_outstanding_work() {
        let controller = MainController::new();
        controller.wait_for_quiescence();
    }

    #[test]
    fn waits_until_goroutine_finishes() {
        let controller = std::sync::Arc::new(MainController::new());
        controller.goroutine_started();
        let c = controller.clone();
        std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            c.goroutine_finished();
        });
        controller.wait_for_quiescence();
        assert_eq!(controller.total(), 0);
    }
}
