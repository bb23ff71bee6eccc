//! Heap value representations the runtime ABI hands out as opaque handles
//! (spec.md §3, §6): strings with small-string optimization and a plain
//! growable array. Both live behind a process-wide interning/allocation
//! table so a JIT-compiled `i64` handle is all a compiled function ever
//! needs to carry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::RwLock;

pub type Handle = i64;

/// Inline storage big enough to hold most identifiers and short literals
/// without a heap allocation; longer strings spill to `Heap`.
const SSO_CAPACITY: usize = 22;

enum StringRepr {
    Small { bytes: [u8; SSO_CAPACITY], len: u8 },
    Heap(String),
}

impl StringRepr {
    fn from_str(s: &str) -> Self {
        if s.len() <= SSO_CAPACITY {
            let mut bytes = [0u8; SSO_CAPACITY];
            bytes[..s.len()].copy_from_slice(s.as_bytes());
            StringRepr::Small { bytes, len: s.len() as u8 }
        } else {
            StringRepr::Heap(s.to_string())
        }
    }

    fn as_str(&self) -> &str {
        match self {
            StringRepr::Small { bytes, len } => std::str::from_utf8(&bytes[..*len as usize]).unwrap(),
            StringRepr::Heap(s) => s.as_str(),
        }
    }
}

pub struct ValueHeap {
    strings: RwLock<HashMap<Handle, StringRepr>>,
    arrays: RwLock<HashMap<Handle, Vec<i64>>>,
    interned_literals: RwLock<HashMap<String, Handle>>,
    /// Pattern and flags behind a `__regex_*`-family handle (spec.md §6).
    /// Not a real regex engine — no `regex` crate dependency is carried for
    /// this surface, so matching is a literal substring check; see
    /// `regex_test`/`regex_exec` below.
    regexes: RwLock<HashMap<Handle, (String, String)>>,
    next_handle: AtomicI64,
}

impl ValueHeap {
    pub fn new() -> Self {
        ValueHeap {
            strings: RwLock::new(HashMap::new()),
            arrays: RwLock::new(HashMap::new()),
            interned_literals: RwLock::new(HashMap::new()),
            regexes: RwLock::new(HashMap::new()),
            next_handle: AtomicI64::new(1),
        }
    }

    fn fresh_handle(&self) -> Handle {
        self.next_handle.fetch_add(1, Ordering::SeqCst)
    }

    pub fn create_string(&self, s: &str) -> Handle {
        let handle = self.fresh_handle();
        self.strings.write().unwrap().insert(handle, StringRepr::from_str(s));
        handle
    }

    pub fn create_empty_string(&self) -> Handle {
        self.create_string("")
    }

    /// Equal string literals share one heap instance (spec.md §4.5):
    /// looked up by exact byte content, not by compiled call site.
    pub fn intern_literal(&self, s: &str) -> Handle {
        if let Some(&handle) = self.interned_literals.read().unwrap().get(s) {
            return handle;
        }
        let handle = self.create_string(s);
        self.interned_literals.write().unwrap().insert(s.to_string(), handle);
        handle
    }

    pub fn string_value(&self, handle: Handle) -> Option<String> {
        self.strings.read().unwrap().get(&handle).map(|r| r.as_str().to_string())
    }

    pub fn string_length(&self, handle: Handle) -> i64 {
        self.strings.read().unwrap().get(&handle).map(|r| r.as_str().len() as i64).unwrap_or(0)
    }

    pub fn concat(&self, a: Handle, b: Handle) -> Handle {
        let left = self.string_value(a).unwrap_or_default();
        let right = self.string_value(b).unwrap_or_default();
        self.create_string(&format!("{}{}", left, right))
    }

    pub fn create_array(&self) -> Handle {
        let handle = self.fresh_handle();
        self.arrays.write().unwrap().insert(handle, Vec::new());
        handle
    }

    pub fn array_push(&self, handle: Handle, value: i64) {
        if let Some(array) = self.arrays.write().unwrap().get_mut(&handle) {
            array.push(value);
        }
    }

    pub fn array_pop(&self, handle: Handle) -> i64 {
        self.arrays.write().unwrap().get_mut(&handle).and_then(|a| a.pop()).unwrap_or(0)
    }

    pub fn array_get(&self, handle: Handle, index: i64) -> i64 {
        self.arrays
            .read()
            .unwrap()
            .get(&handle)
            .and_then(|a| a.get(index as usize).copied())
            .unwrap_or(0)
    }

    pub fn array_length(&self, handle: Handle) -> i64 {
        self.arrays.read().unwrap().get(&handle).map(|a| a.len() as i64).unwrap_or(0)
    }

    /// Clamped `[start, end)` copy into a fresh array (spec.md §6
    /// `__simple_array_slice`); out-of-range bounds saturate rather than
    /// panicking, matching `array_get`'s default-to-zero leniency elsewhere
    /// in this heap.
    pub fn array_slice(&self, handle: Handle, start: i64, end: i64) -> Handle {
        let source = self.arrays.read().unwrap().get(&handle).cloned().unwrap_or_default();
        let len = source.len() as i64;
        let start = start.clamp(0, len) as usize;
        let end = end.clamp(0, len) as usize;
        let slice = if start < end { source[start..end].to_vec() } else { Vec::new() };
        let out = self.fresh_handle();
        self.arrays.write().unwrap().insert(out, slice);
        out
    }

    fn with_elements_as_f64<T>(&self, handle: Handle, f: impl FnOnce(&[f64]) -> T, default: T) -> T {
        let elements = self.arrays.read().unwrap().get(&handle).cloned();
        match elements {
            Some(values) if !values.is_empty() => {
                let floats: Vec<f64> = values.iter().map(|&v| f64::from_bits(v as u64)).collect();
                f(&floats)
            }
            _ => default,
        }
    }

    pub fn array_sum(&self, handle: Handle) -> i64 {
        self.with_elements_as_f64(handle, |v| v.iter().sum::<f64>().to_bits() as i64, 0.0f64.to_bits() as i64)
    }

    pub fn array_mean(&self, handle: Handle) -> i64 {
        self.with_elements_as_f64(
            handle,
            |v| (v.iter().sum::<f64>() / v.len() as f64).to_bits() as i64,
            0.0f64.to_bits() as i64,
        )
    }

    pub fn array_max(&self, handle: Handle) -> i64 {
        self.with_elements_as_f64(
            handle,
            |v| v.iter().cloned().fold(f64::NEG_INFINITY, f64::max).to_bits() as i64,
            0.0f64.to_bits() as i64,
        )
    }

    pub fn array_min(&self, handle: Handle) -> i64 {
        self.with_elements_as_f64(
            handle,
            |v| v.iter().cloned().fold(f64::INFINITY, f64::min).to_bits() as i64,
            0.0f64.to_bits() as i64,
        )
    }

    pub fn array_to_string(&self, handle: Handle) -> Handle {
        let joined = self
            .arrays
            .read()
            .unwrap()
            .get(&handle)
            .map(|a| a.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(","))
            .unwrap_or_default();
        self.create_string(&joined)
    }

    /// Not a real regex engine (no `regex` crate dependency is carried for
    /// this surface) — `regex_test`/`regex_exec` fall back to a literal
    /// substring match against `pattern`, which is enough for the
    /// non-goal-bounded surface spec.md §6 names here but will silently
    /// under-match any program relying on actual regex syntax.
    pub fn create_regex(&self, pattern: &str, flags: &str) -> Handle {
        let handle = self.fresh_handle();
        self.regexes.write().unwrap().insert(handle, (pattern.to_string(), flags.to_string()));
        handle
    }

    fn regex_pattern(&self, handle: Handle) -> String {
        self.regexes.read().unwrap().get(&handle).map(|(p, _)| p.clone()).unwrap_or_default()
    }

    fn regex_flags(&self, handle: Handle) -> String {
        self.regexes.read().unwrap().get(&handle).map(|(_, f)| f.clone()).unwrap_or_default()
    }

    pub fn regex_source(&self, handle: Handle) -> Handle {
        self.create_string(&self.regex_pattern(handle))
    }

    pub fn regex_is_global(&self, handle: Handle) -> bool {
        self.regex_flags(handle).contains('g')
    }

    pub fn regex_is_ignore_case(&self, handle: Handle) -> bool {
        self.regex_flags(handle).contains('i')
    }

    pub fn regex_test(&self, handle: Handle, subject: Handle) -> bool {
        let pattern = self.regex_pattern(handle);
        if pattern.is_empty() {
            return false;
        }
        let text = self.string_value(subject).unwrap_or_default();
        if self.regex_is_ignore_case(handle) {
            text.to_lowercase().contains(&pattern.to_lowercase())
        } else {
            text.contains(&pattern)
        }
    }

    pub fn regex_exec(&self, handle: Handle, subject: Handle) -> Handle {
        let result = self.create_array();
        if self.regex_test(handle, subject) {
            let pattern = self.regex_pattern(handle);
            let matched = self.create_string(&pattern);
            self.array_push(result, matched);
        }
        result
    }
}

impl Default for ValueHeap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_strings_round_trip() {
        let heap = ValueHeap::new();
        let h = heap.create_string("hi");
        assert_eq!(heap.string_value(h).as_deref(), Some("hi"));
    }

    #[test]
    fn long_strings_spill_to_heap_repr() {
        let heap = ValueHeap::new();
        let long = "x".repeat(SSO_CAPACITY + 5);
        let h = heap.create_string(&long);
        assert_eq!(heap.string_length(h), long.len() as i64);
    }

    #[test]
    fn interning_same_literal_twice_returns_same_handle() {
        let heap = ValueHeap::new();
        let a = heap.intern_literal("hello");
        let b = heap.intern_literal("hello");
        assert_eq!(a, b);
    }

    #[test]
    fn concat_produces_a_new_string() {
        let heap = ValueHeap::new();
        let a = heap.create_string("foo");
        let b = heap.create_string("bar");
        let c = heap.concat(a, b);
        assert_eq!(heap.string_value(c).as_deref(), Some("foobar"));
    }

    #[test]
    fn array_push_pop_and_index() {
        let heap = ValueHeap::new();
        let arr = heap.create_array();
        heap.array_push(arr, 1);
        heap.array_push(arr, 2);
        assert_eq!(heap.array_length(arr), 2);
        assert_eq!(heap.array_get(arr, 0), 1);
        assert_eq!(heap.array_pop(arr), 2);
        assert_eq!(heap.array_length(arr), 1);
    }
}
