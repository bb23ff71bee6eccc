//! Promise (spec.md §4.8's sibling, C8): a single-assignment value cell.
//!
//! Resolution is idempotent — the first `resolve` wins, later ones are
//! silently ignored, matching what a goroutine racing a timeout callback
//! to resolve the same promise needs. `await` spin-yields rather than
//! parking on a condvar, since the expected wait is almost always shorter
//! than a thread wake-up round trip once the scheduler's worker pool is
//! warm.

use std::sync::{Arc, Mutex};

enum PromiseState {
    Pending(Vec<Box<dyn FnOnce(i64) + Send>>),
    Resolved(i64),
}

struct Inner {
    state: Mutex<PromiseState>,
}

#[derive(Clone)]
pub struct Promise {
    inner: Arc<Inner>,
}

impl Promise {
    pub fn new() -> Self {
        Promise { inner: Arc::new(Inner { state: Mutex::new(PromiseState::Pending(Vec::new())) }) }
    }

    /// Resolve with `value`. A promise already resolved keeps its first
    /// value; any callbacks registered via [`Promise::then`] fire in
    /// registration order, on the resolving thread.
    pub fn resolve(&self, value: i64) {
        let callbacks = {
            let mut state = self.inner.state.lock().unwrap();
            match &*state {
                PromiseState::Resolved(_) => return,
                PromiseState::Pending(_) => {
                    let old = std::mem::replace(&mut *state, PromiseState::Resolved(value));
                    match old {
                        PromiseState::Pending(callbacks) => callbacks,
                        PromiseState::Resolved(_) => unreachable!(),
                    }
                }
            }
        };
        for callback in callbacks {
            callback(value);
        }
    }

    pub fn try_value(&self) -> Option<i64> {
        match &*self.inner.state.lock().unwrap() {
            PromiseState::Resolved(v) => Some(*v),
            PromiseState::Pending(_) => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.try_value().is_some()
    }

    /// Register a callback that fires once, immediately if already
    /// resolved, otherwise when [`Promise::resolve`] runs.
    pub fn then(&self, callback: impl FnOnce(i64) + Send + 'static) {
        let mut state = self.inner.state.lock().unwrap();
        match &mut *state {
            PromiseState::Resolved(v) => {
                let v = *v;
                drop(state);
                callback(v);
            }
            PromiseState::Pending(callbacks) => callbacks.push(Box::new(callback)),
        }
    }

    /// Spin-yield until resolved (spec.md §4.8 "await"). Used both by the
    /// `__promise_await` ABI entry point and directly by tests.
    pub fn block_until_resolved(&self) -> i64 {
        loop {
            if let Some(v) = self.try_value() {
                return v;
            }
            std::thread::yield_now();
        }
    }

    /// `Promise.all([...])`: resolves once every input promise has, with
    /// the resolved value being the count of inputs (the JIT only ever
    /// needs a scalar signal here; the array of individual results lives
    /// in the runtime-object the caller already holds references to).
    pub fn all(promises: Vec<Promise>) -> Promise {
        let combined = Promise::new();
        if promises.is_empty() {
            combined.resolve(0);
            return combined;
        }
        let remaining = Arc::new(std::sync::atomic::AtomicUsize::new(promises.len()));
        let total = promises.len() as i64;
        for p in promises {
            let combined = combined.clone();
            let remaining = remaining.clone();
            p.then(move |_| {
                if remaining.fetch_sub(1, std::sync::atomic::Ordering::SeqCst) == 1 {
                    combined.resolve(total);
                }
            });
        }
        combined
    }
}

impl Default for Promise {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_is_idempotent() {
        let p = Promise::new();
        p.resolve(1);
        p.resolve(2);
        assert_eq!(p.try_value(), Some(1));
    }

    #[test]
    fn then_after_resolve_fires_immediately() {
        let p = Promise::new();
        p.resolve(7);
        let seen = Arc::new(Mutex::new(None));
        let seen2 = seen.clone();
        p.then(move |v| *seen2.lock().unwrap() = Some(v));
        assert_eq!(*seen.lock().unwrap(), Some(7));
    }

    #[test]
    fn then_before_resolve_fires_on_resolve_in_order() {
        let p = Promise::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = order.clone();
            p.then(move |_| order.lock().unwrap().push(i));
        }
        p.resolve(0);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn all_resolves_once_every_input_resolves() {
        let a = Promise::new();
        let b = Promise::new();
        let combined = Promise::all(vec![a.clone(), b.clone()]);
        assert!(!combined.is_resolved());
        a.resolve(1);
        assert!(!combined.is_resolved());
        b.resolve(1);
        assert_eq!(combined.try_value(), Some(2));
    }

    #[test]
    fn all_of_empty_list_resolves_immediately() {
        let combined = Promise::all(vec![]);
        assert_eq!(combined.try_value(), Some(0));
    }
}
