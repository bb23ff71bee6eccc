//! Global timer system (spec.md §4.9 renumbered as C9): a min-heap keyed
//! by expiry, serviced by a single dedicated event-loop thread that sleeps
//! until the next deadline.
//!
//! Cancellation doesn't touch the heap — removing an arbitrary element
//! from a binary heap is O(n), and timers are cancelled far more often
//! than they fire in steady-state server workloads. Instead a cancelled
//! id is recorded in a side set; the event loop thread checks it and
//! silently drops the timer when its turn comes up.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

pub type TimerId = u64;

const MIN_SLEEP: Duration = Duration::from_millis(1);
const MAX_SLEEP: Duration = Duration::from_secs(60);

struct TimerEntry {
    id: TimerId,
    deadline: Instant,
    interval: Option<Duration>,
    callback: Box<dyn FnMut() + Send>,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline
    }
}
impl Eq for TimerEntry {}
impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // `BinaryHeap` is a max-heap; reverse so the earliest deadline
        // surfaces first.
        other.deadline.cmp(&self.deadline)
    }
}

struct Shared {
    heap: Mutex<BinaryHeap<TimerEntry>>,
    cancelled: Mutex<HashSet<TimerId>>,
    pending_count: AtomicU64,
    wake: Condvar,
    wake_mutex: Mutex<()>,
    shutdown: std::sync::atomic::AtomicBool,
}

pub struct TimerSystem {
    shared: Arc<Shared>,
    next_id: AtomicU64,
    thread: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl TimerSystem {
    pub fn new() -> Arc<Self> {
        let shared = Arc::new(Shared {
            heap: Mutex::new(BinaryHeap::new()),
            cancelled: Mutex::new(HashSet::new()),
            pending_count: AtomicU64::new(0),
            wake: Condvar::new(),
            wake_mutex: Mutex::new(()),
            shutdown: std::sync::atomic::AtomicBool::new(false),
        });
        let worker_shared = shared.clone();
        let thread = std::thread::spawn(move || event_loop(worker_shared));
        Arc::new(TimerSystem { shared, next_id: AtomicU64::new(1), thread: Mutex::new(Some(thread)) })
    }

    pub fn set_timeout(&self, delay: Duration, callback: impl FnMut() + Send + 'static) -> TimerId {
        self.schedule(delay, None, callback)
    }

    pub fn set_interval(&self, interval: Duration, callback: impl FnMut() + Send + 'static) -> TimerId {
        self.schedule(interval, Some(interval), callback)
    }

    fn schedule(
        &self,
        delay: Duration,
        interval: Option<Duration>,
        callback: impl FnMut() + Send + 'static,
    ) -> TimerId {
        let id = self.next_id.fetch_add(1, AtomicOrdering::Relaxed);
        let entry = TimerEntry { id, deadline: Instant::now() + delay, interval, callback: Box::new(callback) };
        self.shared.heap.lock().unwrap().push(entry);
        self.shared.pending_count.fetch_add(1, AtomicOrdering::SeqCst);
        let _hold = self.shared.wake_mutex.lock().unwrap();
        self.shared.wake.notify_one();
        id
    }

    pub fn clear(&self, id: TimerId) {
        self.shared.cancelled.lock().unwrap().insert(id);
    }

    pub fn pending_count(&self) -> u64 {
        self.shared.pending_count.load(AtomicOrdering::SeqCst)
    }

    pub fn shutdown(&self) {
        self.shared.shutdown.store(true, AtomicOrdering::SeqCst);
        let _hold = self.shared.wake_mutex.lock().unwrap();
        self.shared.wake.notify_all();
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

fn event_loop(shared: Arc<Shared>) {
    loop {
        if shared.shutdown.load(AtomicOrdering::SeqCst) {
            return;
        }
        let next_deadline = shared.heap.lock().unwrap().peek().map(|e| e.deadline);
        let sleep_for = match next_deadline {
            None => MAX_SLEEP,
            Some(deadline) => {
                let now = Instant::now();
                if deadline <= now {
                    Duration::ZERO
                } else {
                    (deadline - now).clamp(MIN_SLEEP, MAX_SLEEP)
                }
            }
        };

        if sleep_for > Duration::ZERO {
            let guard = shared.wake_mutex.lock().unwrap();
            let _ = shared.wake.wait_timeout(guard, sleep_for).unwrap();
            continue;
        }

        let ready = {
            let mut heap = shared.heap.lock().unwrap();
            match heap.peek() {
                Some(e) if e.deadline <= Instant::now() => heap.pop(),
                _ => None,
            }
        };

        let Some(mut entry) = ready else { continue };
        if shared.cancelled.lock().unwrap().remove(&entry.id) {
            shared.pending_count.fetch_sub(1, AtomicOrdering::SeqCst);
            continue;
        }

        (entry.callback)();

        match entry.interval {
            Some(interval) => {
                // Re-requeue once with a fresh deadline; an interval timer
                // cancelled mid-callback is caught by the cancelled-set
                // check the next time it's popped, so this doesn't need to
                // re-check here.
                entry.deadline = Instant::now() + interval;
                shared.heap.lock().unwrap().push(entry);
            }
            None => {
                shared.pending_count.fetch_sub(1, AtomicOrdering::SeqCst);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn timeout_fires_after_its_delay() {
        let timers = TimerSystem::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        timers.set_timeout(Duration::from_millis(5), move || {
            f.fetch_add(1, AtomicOrdering::SeqCst);
        });
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(fired.load(AtomicOrdering::SeqCst), 1);
        timers.shutdown();
    }

    #[test]
    fn cancelled_timeout_never_fires() {
        let timers = TimerSystem::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        let id = timers.set_timeout(Duration::from_millis(20), move || {
            f.fetch_add(1, AtomicOrdering::SeqCst);
        });
        timers.clear(id);
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(fired.load(AtomicOrdering::SeqCst), 0);
        timers.shutdown();
    }

    #[test]
    fn interval_fires_more_than_once() {
        let timers = TimerSystem::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        let id = timers.set_interval(Duration::from_millis(5), move || {
            f.fetch_add(1, AtomicOrdering::SeqCst);
        });
        std::thread::sleep(Duration::from_millis(60));
        timers.clear(id);
        let seen = fired.load(AtomicOrdering::SeqCst);
        assert!(seen >= 2, "expected multiple interval firings, saw {seen}");
        timers.shutdown();
    }
}
