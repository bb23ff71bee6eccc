//! Global event loop (spec.md §4.11, C11): the single runtime instance
//! that wires the goroutine scheduler, timer system, and main-thread
//! controller together behind the `__gots_*` ABI entry points.

use crate::runtime::controller::MainController;
use crate::runtime::goroutine::{GoroutineScheduler, GoroutineTask};
use crate::runtime::promise::Promise;
use crate::runtime::timers::{TimerId, TimerSystem};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

pub struct EventLoop {
    pub scheduler: Arc<GoroutineScheduler>,
    pub timers: Arc<TimerSystem>,
    pub controller: Arc<MainController>,
}

static GLOBAL: OnceLock<EventLoop> = OnceLock::new();

impl EventLoop {
    fn new() -> Self {
        EventLoop {
            scheduler: GoroutineScheduler::new(),
            timers: TimerSystem::new(),
            controller: Arc::new(MainController::new()),
        }
    }

    /// Lazily initializes the process-wide runtime on first use; matches
    /// `__runtime_init`'s contract of being idempotent (spec.md §6).
    pub fn global() -> &'static EventLoop {
        GLOBAL.get_or_init(EventLoop::new)
    }

    pub fn spawn(&self, task: GoroutineTask) -> Promise {
        self.controller.goroutine_started();
        let controller = self.controller.clone();
        let wrapped: GoroutineTask = Box::new(move || {
            let result = task();
            controller.goroutine_finished();
            result
        });
        self.scheduler.spawn(wrapped)
    }

    pub fn set_timeout(&self, delay_ms: u64, callback: impl FnMut() + Send + 'static) -> TimerId {
        self.controller.timer_scheduled();
        let controller = self.controller.clone();
        let mut callback = callback;
        let wrapped = move || {
            callback();
            controller.timer_settled();
        };
        self.timers.set_timeout(Duration::from_millis(delay_ms), wrapped)
    }

    pub fn set_interval(&self, interval_ms: u64, callback: impl FnMut() + Send + 'static) -> TimerId {
        self.controller.timer_scheduled();
        self.timers.set_interval(Duration::from_millis(interval_ms), callback)
    }

    pub fn clear_timer(&self, id: TimerId) {
        self.timers.clear(id);
    }

    pub fn wait_for_completion(&self) {
        self.controller.wait_for_quiescence();
    }

    pub fn shutdown(&self) {
        self.scheduler.shutdown();
        self.timers.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawned_goroutine_counts_toward_quiescence() {
        let event_loop = EventLoop::new();
        let promise = event_loop.spawn(Box::new(|| 1));
        promise.block_until_resolved();
        event_loop.wait_for_completion();
    }
}
