//! Goroutine scheduler (spec.md §4.7, C7): an M:N thread pool with
//! per-worker work-stealing queues, one worker per hardware core.
//!
//! Consolidates what the original prototype split across two overlapping
//! scheduler modules into a single queue/worker design; tasks run to
//! completion once picked up, there is no preemption within a goroutine.

use crate::runtime::promise::Promise;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

pub type GoroutineId = u64;

/// A unit of work: a boxed closure returning the value its `Promise`
/// resolves with. The compiled function the closure wraps is a raw
/// function pointer resolved at JIT time; `go f(...)` spill-loads its
/// arguments and hands the scheduler this thunk.
pub type GoroutineTask = Box<dyn FnOnce() -> i64 + Send + 'static>;

struct ScheduledGoroutine {
    id: GoroutineId,
    task: GoroutineTask,
    promise: Promise,
}

/// Work-stealing queue: the owning worker pops from the front (FIFO for
/// its own work), idle workers steal from the back so they take the
/// oldest, least-recently-queued work rather than racing the owner for
/// the task it's about to run next.
struct WorkQueue {
    queue: VecDeque<ScheduledGoroutine>,
}

impl WorkQueue {
    fn new() -> Self {
        WorkQueue { queue: VecDeque::new() }
    }

    fn push(&mut self, g: ScheduledGoroutine) {
        self.queue.push_back(g);
    }

    fn pop(&mut self) -> Option<ScheduledGoroutine> {
        self.queue.pop_front()
    }

    fn steal(&mut self) -> Option<ScheduledGoroutine> {
        self.queue.pop_back()
    }
}

/// Shared scheduler state, cloned into every worker thread via `Arc`.
struct Shared {
    queues: Vec<Mutex<WorkQueue>>,
    condvar: Condvar,
    condvar_mutex: Mutex<()>,
    shutdown: std::sync::atomic::AtomicBool,
    active_count: AtomicUsize,
}

pub struct GoroutineScheduler {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
    next_id: AtomicU64,
    round_robin: AtomicUsize,
}

impl GoroutineScheduler {
    /// One worker per hardware core (spec.md §4.7), matching the teacher's
    /// `num_cpus::get()` sizing rather than a hardcoded pool size.
    pub fn new() -> Arc<Self> {
        let num_workers = num_cpus::get().max(1);
        let shared = Arc::new(Shared {
            queues: (0..num_workers).map(|_| Mutex::new(WorkQueue::new())).collect(),
            condvar: Condvar::new(),
            condvar_mutex: Mutex::new(()),
            shutdown: std::sync::atomic::AtomicBool::new(false),
            active_count: AtomicUsize::new(0),
        });

        let mut workers = Vec::with_capacity(num_workers);
        for worker_index in 0..num_workers {
            let shared = shared.clone();
            workers.push(thread::spawn(move || worker_loop(worker_index, shared)));
        }

        Arc::new(GoroutineScheduler {
            shared,
            workers,
            next_id: AtomicU64::new(1),
            round_robin: AtomicUsize::new(0),
        })
    }

    /// Queue `task` on the least-loaded worker's queue (approximated by
    /// round-robin, spec.md §4.7) and return a [`Promise`] that resolves
    /// with the task's return value once a worker runs it to completion.
    pub fn spawn(&self, task: GoroutineTask) -> Promise {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let promise = Promise::new();
        let target = self.round_robin.fetch_add(1, Ordering::Relaxed) % self.shared.queues.len();
        {
            let mut queue = self.shared.queues[target].lock().unwrap();
            queue.push(ScheduledGoroutine { id, task, promise: promise.clone() });
        }
        self.shared.active_count.fetch_add(1, Ordering::SeqCst);
        let _hold = self.shared.condvar_mutex.lock().unwrap();
        self.shared.condvar.notify_one();
        promise
    }

    pub fn active_goroutines(&self) -> usize {
        self.shared.active_count.load(Ordering::SeqCst)
    }

    pub fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        let _hold = self.shared.condvar_mutex.lock().unwrap();
        self.shared.condvar.notify_all();
    }
}

impl Drop for GoroutineScheduler {
    fn drop(&mut self) {
        self.shutdown();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn worker_loop(worker_index: usize, shared: Arc<Shared>) {
    loop {
        if shared.shutdown.load(Ordering::SeqCst) {
            return;
        }
        let found = take_own_work(worker_index, &shared).or_else(|| steal_work(worker_index, &shared));
        match found {
            Some(goroutine) => {
                let result = (goroutine.task)();
                goroutine.promise.resolve(result);
                shared.active_count.fetch_sub(1, Ordering::SeqCst);
            }
            None => {
                let guard = shared.condvar_mutex.lock().unwrap();
                let _ = shared
                    .condvar
                    .wait_timeout(guard, std::time::Duration::from_millis(10))
                    .unwrap();
            }
        }
    }
}

fn take_own_work(worker_index: usize, shared: &Shared) -> Option<ScheduledGoroutine> {
    shared.queues[worker_index].lock().unwrap().pop()
}

fn steal_work(worker_index: usize, shared: &Shared) -> Option<ScheduledGoroutine> {
    let n = shared.queues.len();
    for offset in 1..n {
        let victim = (worker_index + offset) % n;
        if let Some(g) = shared.queues[victim].lock().unwrap().steal() {
            return Some(g);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI64;

    #[test]
    fn spawned_task_runs_and_resolves_the_promise() {
        let scheduler = GoroutineScheduler::new();
        let promise = scheduler.spawn(Box::new(|| 42));
        promise.block_until_resolved();
        assert_eq!(promise.try_value(), Some(42));
    }

    #[test]
    fn many_tasks_all_complete() {
        let scheduler = GoroutineScheduler::new();
        let counter = Arc::new(AtomicI64::new(0));
        let mut promises = Vec::new();
        for _ in 0..64 {
            let counter = counter.clone();
            promises.push(scheduler.spawn(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                0
            })));
        }
        for p in promises {
            p.block_until_resolved();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 64);
    }
}
