//! Traceframe: a register-based bytecode query engine over columnar dataframes.
//!
//! Logical query plans (filter, sort, limit, project, aggregate) are lowered
//! into programs over a typed register file, then interpreted against an
//! immutable, columnar dataframe.
//!
//! # Architecture
//! - Typed register handles and the register file (`registers`)
//! - Instructions and finished programs (`bytecode`)
//! - Low-level program construction (`builder`) and identity-keyed register
//!   reuse (`cache`)
//! - Columnar storage with lazily built sorted indexes (`column`, `index`,
//!   `dataframe`)
//! - Plan lowering (`compiler`), execution (`interpreter`) and results
//!   (`cursor`)
//! - A compile-and-run facade (`engine`)

mod bitmap;
mod builder;
mod bytecode;
mod cache;
mod column;
mod compiler;
mod config;
mod cursor;
mod dataframe;
mod engine;
mod index;
mod interpreter;
mod plan;
mod registers;
mod types;

pub use bitmap::*;
pub use builder::*;
pub use bytecode::*;
pub use cache::*;
pub use column::*;
pub use compiler::*;
pub use config::*;
pub use cursor::*;
pub use dataframe::*;
pub use engine::*;
pub use index::*;
pub use interpreter::*;
pub use plan::*;
pub use registers::*;
pub use types::*;

use thiserror::Error;

/// Unified error type for traceframe operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TraceframeError {
    #[error("Unknown column: {0}")]
    UnknownColumn(String),
    #[error("Duplicate column: {0}")]
    DuplicateColumn(String),
    #[error("Column {column} has {got} rows, expected {expected}")]
    LengthMismatch { column: String, expected: usize, got: usize },
    #[error("Type error: {0}")]
    TypeError(String),
    #[error("Invalid plan: {0}")]
    InvalidPlan(String),
    /// An instruction was emitted against a register that was never
    /// allocated, or allocated with another kind.
    #[error("Contract violation: {0}")]
    ContractViolation(String),
    #[error("Plan too large: {0}")]
    PlanTooLarge(String),
    #[error("Execution error: {0}")]
    ExecutionError(String),
}

pub type Result<T> = std::result::Result<T, TraceframeError>;
