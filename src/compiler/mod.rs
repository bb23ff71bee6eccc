//! JIT compiler for GoTS: AST in, executable machine code out, with no
//! assembler, object-file format, or separate intermediate representation
//! in between (spec.md §1, §9).
//!
//! Pipeline: [`arena`] owns the RWX page every function lands in,
//! [`registry`] tracks where each function ended up, [`slots`] assigns
//! every local a fixed stack offset, [`codegen`] turns that into x86-64
//! bytes, [`emit`] walks the AST driving `codegen` node by node, and
//! [`manager`] orchestrates the three-phase discovery/emission/finalize
//! protocol that ties them together into one compiled program.

pub mod arena;
pub mod codegen;
pub mod emit;
pub mod manager;
pub mod modules;
pub mod overloads;
pub mod registry;
pub mod slots;

pub use arena::Arena;
pub use codegen::CodeGenerator;
pub use manager::CompilationManager;
pub use modules::ModuleLoader;
pub use overloads::OverloadTable;
pub use registry::FunctionRegistry;
pub use slots::SlotAllocator;
