//! Engine module: compile-and-run facade over one dataframe.

use crate::bytecode::Program;
use crate::compiler::QueryCompiler;
use crate::config::EngineConfig;
use crate::cursor::Cursor;
use crate::dataframe::Dataframe;
use crate::interpreter::Interpreter;
use crate::plan::QueryPlan;
use crate::Result;
use std::sync::Arc;

/// Owns a shared dataframe and the options used to query it.
///
/// `compile` and `execute` take `&self`; independent plans can be compiled
/// and run from many threads at once.
#[derive(Debug, Clone)]
pub struct QueryEngine {
    dataframe: Arc<Dataframe>,
    config: EngineConfig,
}

impl QueryEngine {
    pub fn new(dataframe: Arc<Dataframe>) -> Self {
        Self::with_config(dataframe, EngineConfig::default())
    }

    pub fn with_config(dataframe: Arc<Dataframe>, config: EngineConfig) -> Self {
        Self { dataframe, config }
    }

    pub fn dataframe(&self) -> &Arc<Dataframe> {
        &self.dataframe
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn compile(&self, plan: &QueryPlan) -> Result<Arc<Program>> {
        QueryCompiler::compile(plan, &self.dataframe, &self.config.compile).map(Arc::new)
    }

    pub fn execute(&self, program: &Program) -> Result<Cursor> {
        Interpreter::new(program, &self.dataframe, &self.config.exec).run()
    }

    /// Compiles and runs `plan` in one step.
    pub fn query(&self, plan: &QueryPlan) -> Result<Cursor> {
        let program = self.compile(plan)?;
        self.execute(&program)
    }
}
