//! Executable memory arena (spec.md §4.1, C1).
//!
//! A single RWX page-aligned mapping that all compiled functions share.
//! Bytes accumulate in a growing `Vec<u8>` while the arena is `Writable`;
//! only [`Arena::finalize`] copies that buffer into the real mmap'd page
//! and flips the arena to `Executable`. Design note §9 calls out raw RWX
//! memory and relocations as a hazard to re-architect behind a typed
//! `Writable -> Executable` state transition rather than a bag of
//! `unsafe` scattered through the emitter; this is that wrapper.

use crate::error::{GotsError, Result};
use std::sync::atomic::{AtomicBool, Ordering};

/// A pending call-site relocation: the emitter didn't know the target
/// address yet, so it left a placeholder and recorded where to patch it.
#[derive(Debug, Clone)]
pub struct Relocation {
    /// Byte offset within the arena buffer where a 32-bit rel32
    /// displacement (or, for `Absolute`, a 64-bit address) needs patching.
    pub patch_offset: usize,
    pub kind: RelocationKind,
    pub target_symbol: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocationKind {
    /// `call rel32` / `jmp rel32`: displacement is relative to the byte
    /// immediately following the 4-byte field.
    Rel32 { instruction_end_offset: usize },
    /// A 64-bit absolute address embedded via `movabs`.
    Absolute64,
}

enum ArenaState {
    Writable {
        buffer: Vec<u8>,
        relocations: Vec<Relocation>,
        symbols: std::collections::HashMap<String, usize>,
    },
    Executable {
        base: *mut u8,
        size: usize,
        /// Kept alive only so the mapping is unmapped on drop.
        _map_len: usize,
    },
}

pub struct Arena {
    state: ArenaState,
}

unsafe impl Send for Arena {}
unsafe impl Sync for Arena {}

static ANY_ARENA_EXECUTING: AtomicBool = AtomicBool::new(false);

impl Arena {
    pub fn new() -> Self {
        Arena {
            state: ArenaState::Writable {
                buffer: Vec::new(),
                relocations: Vec::new(),
                symbols: std::collections::HashMap::new(),
            },
        }
    }

    /// Reserve `n` bytes at the end of the growing buffer, returning the
    /// offset they start at. Only valid while `Writable`.
    pub fn reserve(&mut self, n: usize) -> Result<usize> {
        match &mut self.state {
            ArenaState::Writable { buffer, .. } => {
                let offset = buffer.len();
                buffer.resize(offset + n, 0);
                Ok(offset)
            }
            ArenaState::Executable { .. } => {
                Err(GotsError::codegen("arena is no longer writable"))
            }
        }
    }

    pub fn write_at(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        match &mut self.state {
            ArenaState::Writable { buffer, .. } => {
                buffer[offset..offset + bytes.len()].copy_from_slice(bytes);
                Ok(())
            }
            ArenaState::Executable { .. } => {
                Err(GotsError::codegen("cannot write to an executable arena"))
            }
        }
    }

    pub fn append(&mut self, bytes: &[u8]) -> Result<usize> {
        let offset = self.reserve(bytes.len())?;
        self.write_at(offset, bytes)?;
        Ok(offset)
    }

    pub fn define_symbol(&mut self, name: &str, offset: usize) -> Result<()> {
        match &mut self.state {
            ArenaState::Writable { symbols, .. } => {
                symbols.insert(name.to_string(), offset);
                Ok(())
            }
            ArenaState::Executable { .. } => {
                Err(GotsError::codegen("cannot define symbols after finalize"))
            }
        }
    }

    pub fn symbol_offset(&self, name: &str) -> Option<usize> {
        match &self.state {
            ArenaState::Writable { symbols, .. } => symbols.get(name).copied(),
            ArenaState::Executable { .. } => None,
        }
    }

    pub fn add_relocation(&mut self, reloc: Relocation) -> Result<()> {
        match &mut self.state {
            ArenaState::Writable { relocations, .. } => {
                relocations.push(reloc);
                Ok(())
            }
            ArenaState::Executable { .. } => {
                Err(GotsError::codegen("cannot add relocations after finalize"))
            }
        }
    }

    pub fn len(&self) -> usize {
        match &self.state {
            ArenaState::Writable { buffer, .. } => buffer.len(),
            ArenaState::Executable { size, .. } => *size,
        }
    }

    /// Patch every recorded relocation against `symbols`, mmap a fresh RWX
    /// page, copy the buffer in, and transition to `Executable`. Any
    /// relocation whose symbol is still unresolved is a fatal link error
    /// (spec.md §7).
    pub fn finalize(
        &mut self,
        resolve_external: impl Fn(&str) -> Option<usize>,
    ) -> Result<()> {
        let (mut buffer, relocations, internal_symbols) = match &mut self.state {
            ArenaState::Writable { buffer, relocations, symbols } => (
                std::mem::take(buffer),
                std::mem::take(relocations),
                std::mem::take(symbols),
            ),
            ArenaState::Executable { .. } => {
                return Err(GotsError::codegen("arena already finalized"))
            }
        };

        // mmap first: rel32 displacements to host-resident runtime symbols
        // need the real absolute call-site address, which only exists once
        // the page is mapped.
        let size = buffer.len().max(1);
        let page_size = page_size();
        let map_len = (size + page_size - 1) / page_size * page_size;

        let base = unsafe {
            let ptr = libc::mmap(
                std::ptr::null_mut(),
                map_len,
                libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            );
            if ptr == libc::MAP_FAILED {
                return Err(GotsError::codegen("mmap of executable arena failed"));
            }
            ptr as *mut u8
        };
        let base_addr = base as usize;

        for reloc in &relocations {
            // Labels and function bodies defined within this arena resolve
            // relative to `base`; runtime-library and as-yet-external
            // symbols are resolved to their own absolute address.
            let target = if let Some(&offset) = internal_symbols.get(&reloc.target_symbol) {
                base_addr + offset
            } else if let Some(addr) = resolve_external(&reloc.target_symbol) {
                addr
            } else {
                unsafe {
                    libc::munmap(base as *mut libc::c_void, map_len);
                }
                return Err(GotsError::link(reloc.target_symbol.clone()));
            };
            match reloc.kind {
                RelocationKind::Rel32 { instruction_end_offset } => {
                    let site_end_addr = base_addr + instruction_end_offset;
                    let disp = target as i64 - site_end_addr as i64;
                    if disp < i32::MIN as i64 || disp > i32::MAX as i64 {
                        unsafe {
                            libc::munmap(base as *mut libc::c_void, map_len);
                        }
                        return Err(GotsError::codegen(format!(
                            "relocation to '{}' out of rel32 range",
                            reloc.target_symbol
                        )));
                    }
                    let bytes = (disp as i32).to_le_bytes();
                    buffer[reloc.patch_offset..reloc.patch_offset + 4].copy_from_slice(&bytes);
                }
                RelocationKind::Absolute64 => {
                    let bytes = (target as u64).to_le_bytes();
                    buffer[reloc.patch_offset..reloc.patch_offset + 8].copy_from_slice(&bytes);
                }
            }
        }

        unsafe {
            std::ptr::copy_nonoverlapping(buffer.as_ptr(), base, buffer.len());
        }

        ANY_ARENA_EXECUTING.store(true, Ordering::SeqCst);
        self.state = ArenaState::Executable { base, size, _map_len: map_len };
        Ok(())
    }

    pub fn base_ptr(&self) -> Option<*const u8> {
        match &self.state {
            ArenaState::Writable { .. } => None,
            ArenaState::Executable { base, .. } => Some(*base as *const u8),
        }
    }

    /// Resolve an offset within the finalized arena to an absolute address.
    pub fn address_of(&self, offset: usize) -> Option<usize> {
        match &self.state {
            ArenaState::Writable { .. } => None,
            ArenaState::Executable { base, .. } => Some(*base as usize + offset),
        }
    }

    pub fn is_executable(&self) -> bool {
        matches!(self.state, ArenaState::Executable { .. })
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        if let ArenaState::Executable { base, _map_len, .. } = &self.state {
            unsafe {
                libc::munmap(*base as *mut libc::c_void, *_map_len);
            }
        }
    }
}

fn page_size() -> usize {
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_hands_out_growing_offsets() {
        let mut arena = Arena::new();
        let a = arena.reserve(4).unwrap();
        let b = arena.reserve(8).unwrap();
        assert_eq!(a, 0);
        assert_eq!(b, 4);
        assert_eq!(arena.len(), 12);
    }

    #[test]
    fn finalize_executes_a_ret_stub() {
        let mut arena = Arena::new();
        // `ret` (0xC3): a trivial function that just returns.
        arena.append(&[0xC3]).unwrap();
        arena.finalize(|_| None).unwrap();
        assert!(arena.is_executable());
        let base = arena.base_ptr().unwrap();
        let f: extern "C" fn() -> i64 = unsafe { std::mem::transmute(base) };
        // Returns whatever garbage is in RAX, but must not crash.
        let _ = f();
    }

    #[test]
    fn unresolved_relocation_is_a_link_error() {
        let mut arena = Arena::new();
        arena.append(&[0xE8, 0, 0, 0, 0]).unwrap();
        arena
            .add_relocation(Relocation {
                patch_offset: 1,
                kind: RelocationKind::Rel32 { instruction_end_offset: 5 },
                target_symbol: "__missing".to_string(),
            })
            .unwrap();
        let err = arena.finalize(|_| None).unwrap_err();
        assert!(matches!(err, GotsError::LinkError { .. }));
    }

    #[test]
    fn cannot_write_after_finalize() {
        let mut arena = Arena::new();
        arena.append(&[0xC3]).unwrap();
        arena.finalize(|_| None).unwrap();
        assert!(arena.append(&[0x90]).is_err());
    }
}
