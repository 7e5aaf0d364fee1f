//! Config module: compile and execution options.
//!
//! Every field has a default, so partial configs deserialize cleanly.

use crate::builder::DEFAULT_REGISTER_LIMIT;
use serde::{Serialize, Deserialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    /// Ceiling on registers per program; exceeding it fails the compile
    /// with `PlanTooLarge`.
    pub register_limit: usize,
    /// Route column and index registers through the register cache. Turning
    /// this off allocates a fresh register (and load) per reference.
    pub register_caching: bool,
    /// Lower single-key ascending, nulls-first sorts to an index walk.
    pub index_sorts: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            register_limit: DEFAULT_REGISTER_LIMIT,
            register_caching: true,
            index_sorts: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecOptions {
    /// Largest row list any instruction may produce. `None` is unbounded.
    pub max_rows: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub compile: CompileOptions,
    pub exec: ExecOptions,
}
