//! GoTS: a JIT compiler and concurrent runtime for a TypeScript-like
//! language with explicit numeric types, Go-style concurrency, and operator
//! overloading (spec.md §1).
//!
//! The lexer and parser that turn source text into the [`ast::Program`]
//! this crate compiles are out of scope (spec.md §1 "Out of scope"); a
//! `Program` is the boundary this crate consumes, typically deserialized
//! from the JSON an external front end emits (see [`load_program`]).

pub mod ast;
pub mod compiler;
pub mod config;
pub mod error;
pub mod runtime;
pub mod types;

pub use config::GotsConfig;
pub use error::{GotsError, Result};

/// Parse a JSON-encoded [`ast::Program`] from disk. Stands in for the
/// external parser spec.md §1 assumes a front end provides.
pub fn load_program(path: &std::path::Path) -> Result<ast::Program> {
    let text = std::fs::read_to_string(path)?;
    serde_json::from_str(&text).map_err(|e| GotsError::Other(e.to_string()))
}

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const GOTS_EXTENSION: &str = "gots.json";