//! Type inference / variable-slot allocator (spec.md §4.3, C3).
//!
//! One of these lives per function being compiled. It is the single source
//! of truth the emitters (§4.5) consult to turn an identifier into a
//! `[rbp+offset]` memory operand, and the single place stack-frame layout
//! is decided.

use crate::types::DataType;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct VariableSlot {
    pub name: String,
    pub data_type: DataType,
    pub frame_offset: i64,
    pub class_name: Option<String>,
}

pub struct SlotAllocator {
    types: HashMap<String, DataType>,
    offsets: HashMap<String, i64>,
    class_names: HashMap<String, String>,
    /// Insertion order, so callers needing deterministic enumeration (e.g.
    /// computing stack size) don't depend on hash iteration order.
    order: Vec<String>,
    current_offset: i64,
    temp_counter: u64,
}

impl SlotAllocator {
    pub fn new() -> Self {
        SlotAllocator {
            types: HashMap::new(),
            offsets: HashMap::new(),
            class_names: HashMap::new(),
            order: Vec::new(),
            current_offset: -16,
            temp_counter: 0,
        }
    }

    /// Position `current_offset` below the parameter area, leaving one
    /// 8-byte word of safety padding below the last parameter slot, and
    /// clear all locals from a previous function's compilation.
    pub fn reset_for_function_with_params(&mut self, n_params: usize) {
        self.types.clear();
        self.offsets.clear();
        self.class_names.clear();
        self.order.clear();
        self.current_offset = -((n_params as i64 + 1) * 8 + 8);
        self.temp_counter = 0;
    }

    pub fn reset_for_function(&mut self) {
        self.reset_for_function_with_params(0);
    }

    /// Assign a parameter its fixed slot. Parameters occupy
    /// `-8, -16, ..., -8*n` regardless of where locals start, matching the
    /// prologue's spill order (spec.md §4.4).
    pub fn bind_param(&mut self, name: &str, data_type: DataType, index: usize) -> i64 {
        let offset = -8 * (index as i64 + 1);
        self.types.insert(name.to_string(), data_type);
        self.offsets.insert(name.to_string(), offset);
        if !self.order.iter().any(|n| n == name) {
            self.order.push(name.to_string());
        }
        offset
    }

    /// If `name` already has a slot, update its type in place and return
    /// the existing offset; otherwise allocate the next descending local
    /// offset. Slots never move once assigned (spec.md §3 invariant).
    pub fn allocate(&mut self, name: &str, data_type: DataType) -> i64 {
        if let Some(&offset) = self.offsets.get(name) {
            self.types.insert(name.to_string(), data_type);
            return offset;
        }
        let offset = self.current_offset;
        self.current_offset -= 8;
        self.types.insert(name.to_string(), data_type);
        self.offsets.insert(name.to_string(), offset);
        self.order.push(name.to_string());
        offset
    }

    /// Allocate a slot for a compiler-internal temporary (binop spills, call
    /// argument spills, loop induction state, ...) that is guaranteed unique
    /// for this call, unlike [`Self::allocate`]'s by-name reuse. Each
    /// emission site that needs a scratch slot must go through here rather
    /// than inventing its own fixed name: a fixed name reused across a
    /// nested live range (a binary op whose right side is itself a binary
    /// op, a call whose argument is itself a call, ...) would silently
    /// alias the same frame offset and clobber the outer value.
    pub fn allocate_temp(&mut self, data_type: DataType) -> i64 {
        self.temp_counter += 1;
        let name = format!("__temp_{}", self.temp_counter);
        self.allocate(&name, data_type)
    }

    pub fn set_class_name(&mut self, name: &str, class_name: &str) {
        self.class_names.insert(name.to_string(), class_name.to_string());
    }

    pub fn get(&self, name: &str) -> Option<VariableSlot> {
        let data_type = *self.types.get(name)?;
        let frame_offset = *self.offsets.get(name)?;
        Some(VariableSlot {
            name: name.to_string(),
            data_type,
            frame_offset,
            class_name: self.class_names.get(name).cloned(),
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.offsets.contains_key(name)
    }

    pub fn local_count(&self) -> usize {
        self.order.len()
    }

    /// Widest of two numeric types by rank; STRING dominates, UNKNOWN
    /// propagates. Delegates to [`DataType::widen`].
    pub fn get_cast_type(&self, a: DataType, b: DataType) -> DataType {
        a.widen(b)
    }

    pub fn needs_casting(&self, from: DataType, to: DataType) -> bool {
        DataType::needs_casting(from, to)
    }

    /// Lowest (most negative) offset handed out so far; used by the stack
    /// size estimate in spec.md §4.5's FunctionDecl emitter.
    pub fn lowest_offset(&self) -> i64 {
        self.current_offset
    }
}

impl Default for SlotAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_twice_returns_same_offset_and_updates_type() {
        let mut slots = SlotAllocator::new();
        let first = slots.allocate("x", DataType::Int32);
        let second = slots.allocate("x", DataType::Int64);
        assert_eq!(first, second);
        assert_eq!(slots.get("x").unwrap().data_type, DataType::Int64);
    }

    #[test]
    fn locals_descend_by_eight() {
        let mut slots = SlotAllocator::new();
        slots.reset_for_function_with_params(0);
        let a = slots.allocate("a", DataType::Int64);
        let b = slots.allocate("b", DataType::Int64);
        assert_eq!(b, a - 8);
    }

    #[test]
    fn params_positioned_below_safety_padding() {
        let mut slots = SlotAllocator::new();
        slots.reset_for_function_with_params(2);
        slots.bind_param("p0", DataType::Int64, 0);
        slots.bind_param("p1", DataType::Int64, 1);
        let first_local = slots.allocate("local", DataType::Int64);
        assert_eq!(slots.get("p0").unwrap().frame_offset, -8);
        assert_eq!(slots.get("p1").unwrap().frame_offset, -16);
        // current_offset starts at -(2+1)*8-8 = -32, well below params.
        assert_eq!(first_local, -32);
    }

    #[test]
    fn allocate_temp_never_collides_across_calls() {
        let mut slots = SlotAllocator::new();
        let first = slots.allocate_temp(DataType::Int64);
        let second = slots.allocate_temp(DataType::Int64);
        assert_ne!(first, second);
    }

    #[test]
    fn reset_clears_prior_function_locals() {
        let mut slots = SlotAllocator::new();
        slots.allocate("x", DataType::Int64);
        slots.reset_for_function();
        assert!(!slots.contains("x"));
    }
}
