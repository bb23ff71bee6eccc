//! Error handling for the GoTS JIT compiler and runtime.
//!
//! Mirrors the error-kind split spec.md §7 asks for: parse/emit errors and
//! link errors are fatal and carry a source position; execution faults and
//! runtime-library preconditions never propagate as `GotsError` because
//! they are contained at their own boundaries (the goroutine spawn wrapper,
//! the ABI function itself) per spec.md §7's propagation policy.

use std::fmt;

pub type Result<T> = std::result::Result<T, GotsError>;

#[derive(Debug, Clone)]
pub struct SourcePos {
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone)]
pub enum GotsError {
    /// Unknown token, unknown operator, or any other AST-shape the emitter
    /// does not recognize (spec.md §7 "Parse/emit errors").
    CodegenError { message: String, pos: Option<SourcePos> },
    /// Unresolved label or missing runtime symbol at patch time
    /// (spec.md §7 "Link errors").
    LinkError { symbol: String },
    /// Fatal during the function-compilation manager's three phases
    /// (spec.md §4.6), e.g. the 65536th function-ID registration.
    CompileError(String),
    IoError(String),
    Other(String),
}

impl fmt::Display for GotsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GotsError::CodegenError { message, pos } => {
                if let Some(p) = pos {
                    write!(f, "codegen error at {}:{}: {}", p.line, p.column, message)
                } else {
                    write!(f, "codegen error: {}", message)
                }
            }
            GotsError::LinkError { symbol } => {
                write!(f, "link error: unresolved symbol '{}'", symbol)
            }
            GotsError::CompileError(message) => write!(f, "compile error: {}", message),
            GotsError::IoError(message) => write!(f, "I/O error: {}", message),
            GotsError::Other(message) => write!(f, "error: {}", message),
        }
    }
}

impl std::error::Error for GotsError {}

impl GotsError {
    pub fn codegen(message: impl Into<String>) -> Self {
        GotsError::CodegenError { message: message.into(), pos: None }
    }

    pub fn codegen_at(message: impl Into<String>, line: usize, column: usize) -> Self {
        GotsError::CodegenError {
            message: message.into(),
            pos: Some(SourcePos { line, column }),
        }
    }

    pub fn link(symbol: impl Into<String>) -> Self {
        GotsError::LinkError { symbol: symbol.into() }
    }
}

impl From<std::io::Error> for GotsError {
    fn from(err: std::io::Error) -> Self {
        GotsError::IoError(err.to_string())
    }
}

impl From<String> for GotsError {
    fn from(message: String) -> Self {
        GotsError::Other(message)
    }
}

impl From<&str> for GotsError {
    fn from(message: &str) -> Self {
        GotsError::Other(message.to_string())
    }
}
