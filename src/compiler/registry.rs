//! Function registry (spec.md §4.2, C2): two parallel lookup structures
//! shared by every compiled function and by goroutine dispatch.

use crate::error::{GotsError, Result};
use std::collections::HashMap;
use std::sync::RwLock;

pub const MAX_FAST_IDS: usize = 65536;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallingConvention {
    SysV,
}

#[derive(Debug, Clone, Copy)]
pub struct FastEntry {
    pub address: usize,
    pub arg_count: u8,
    pub calling_convention: CallingConvention,
    pub flags: u32,
}

/// Name table (symbol -> address) plus the dense uint16 ID table used for
/// O(1) goroutine dispatch (spec.md §4.2). Registration takes a single
/// mutex; `lookup_fast` takes a read lock, which never contends with other
/// readers, approximating the spec's "lookup is lock-free" property
/// without hand-rolling atomics for a four-word entry.
pub struct FunctionRegistry {
    names: RwLock<HashMap<String, usize>>,
    fast_ids: RwLock<Vec<Option<FastEntry>>>,
    next_id: RwLock<u16>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        FunctionRegistry {
            names: RwLock::new(HashMap::new()),
            fast_ids: RwLock::new(vec![None; MAX_FAST_IDS]),
            next_id: RwLock::new(1),
        }
    }

    /// Resolve a runtime-library or user-function symbol to its address.
    pub fn resolve_name(&self, name: &str) -> Option<usize> {
        self.names.read().unwrap().get(name).copied()
    }

    pub fn register_name(&self, name: &str, address: usize) {
        self.names.write().unwrap().insert(name.to_string(), address);
    }

    /// Append-only: assigns the next dense ID in `[1, 65535]` and stores
    /// the entry. The 65536th registration is a fatal error (spec.md §8).
    pub fn register_fast(
        &self,
        address: usize,
        arg_count: u8,
        calling_convention: CallingConvention,
    ) -> Result<u16> {
        let mut next_id = self.next_id.write().unwrap();
        let id = *next_id;
        if id == 0 || id as usize >= MAX_FAST_IDS {
            return Err(GotsError::CompileError(
                "function ID space exhausted (max 65535 registrations)".to_string(),
            ));
        }
        let mut table = self.fast_ids.write().unwrap();
        table[id as usize] = Some(FastEntry {
            address,
            arg_count,
            calling_convention,
            flags: 0,
        });
        *next_id = id + 1;
        Ok(id)
    }

    pub fn lookup_fast(&self, id: u16) -> Option<FastEntry> {
        if id == 0 {
            return None;
        }
        self.fast_ids.read().unwrap().get(id as usize).copied().flatten()
    }

    /// Re-publish the resolved absolute address for an ID assigned during
    /// discovery (spec.md §4.6 phase 3: "publish the absolute address").
    pub fn update_fast_address(&self, id: u16, address: usize) {
        if let Some(slot) = self.fast_ids.write().unwrap().get_mut(id as usize) {
            if let Some(entry) = slot {
                entry.address = address;
            }
        }
    }

    pub fn registered_count(&self) -> u16 {
        self.next_id.read().unwrap().saturating_sub(1)
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        let reg = FunctionRegistry::new();
        reg.register_name("__console_log", 0x1000);
        assert_eq!(reg.resolve_name("__console_log"), Some(0x1000));
        assert_eq!(reg.resolve_name("__missing"), None);
    }

    #[test]
    fn fast_ids_are_dense_and_start_at_one() {
        let reg = FunctionRegistry::new();
        let a = reg.register_fast(0x2000, 1, CallingConvention::SysV).unwrap();
        let b = reg.register_fast(0x3000, 2, CallingConvention::SysV).unwrap();
        assert_eq!(a, 1);
        assert_eq!(b, 2);
        assert_eq!(reg.lookup_fast(a).unwrap().address, 0x2000);
        assert_eq!(reg.lookup_fast(0).map(|_| ()), None);
    }

    #[test]
    fn update_fast_address_republishes_in_place() {
        let reg = FunctionRegistry::new();
        let id = reg.register_fast(0, 0, CallingConvention::SysV).unwrap();
        reg.update_fast_address(id, 0xDEAD);
        assert_eq!(reg.lookup_fast(id).unwrap().address, 0xDEAD);
    }

    #[test]
    fn exhausting_id_space_is_fatal() {
        let reg = FunctionRegistry::new();
        for _ in 1..MAX_FAST_IDS {
            reg.register_fast(0, 0, CallingConvention::SysV).unwrap();
        }
        assert!(reg.register_fast(0, 0, CallingConvention::SysV).is_err());
    }
}
