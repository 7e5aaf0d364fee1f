//! Compiler module: lowers a logical query plan into a register program.
//!
//! Filters evaluate into selection registers (one bit per dataframe row);
//! sorts, limits and output materialize a row list. Column and index
//! registers are requested through the register cache, so each column is
//! loaded at most once per program no matter how many operators read it.

use crate::builder::BytecodeBuilder;
use crate::bytecode::{Instruction, OutputColumn, Program, SortOperand, StringPattern};
use crate::cache::RegisterCache;
use crate::column::Column;
use crate::config::CompileOptions;
use crate::dataframe::Dataframe;
use crate::plan::{
    AggregateFunc, AggregateSpec, CompareOp, NullOrder, Operand, Predicate, QueryOp, QueryPlan,
    SortDirection, SortKey,
};
use crate::registers::{Batch, ColumnRef, IndexRef, ReadHandle, RowList, RwHandle, Scalar, Selection};
use crate::types::{ColumnType, Value};
use crate::{Result, TraceframeError};
use std::sync::Arc;
use tracing::debug;

pub struct QueryCompiler;

impl QueryCompiler {
    /// Compiles `plan` against `dataframe`.
    ///
    /// Column names and literal kinds are checked here; on any error no
    /// program is produced.
    pub fn compile(plan: &QueryPlan, dataframe: &Dataframe, options: &CompileOptions) -> Result<Program> {
        let mut builder = BytecodeBuilder::new(options.register_limit);
        let (outputs, cache_hits) = {
            let mut lowering = Lowering::new(dataframe, options, RegisterCache::new(&mut builder), plan);
            let outputs = lowering.lower(plan)?;
            (outputs, lowering.cache.hits())
        };
        let program = builder.finalize(outputs, dataframe.row_count());
        debug!(
            ops = plan.ops.len(),
            instructions = program.instructions().len(),
            registers = program.register_count(),
            cache_hits,
            caching = options.register_caching,
            "compiled query plan"
        );
        Ok(program)
    }
}

/// Where the rows selected so far live.
#[derive(Debug, Clone, Copy)]
enum RowState {
    /// No operator has narrowed or ordered the rows yet.
    All,
    /// A selection over dataframe rows, in row order.
    Selected(RwHandle<Selection>),
    /// An explicit, possibly reordered, row list.
    Rows(RwHandle<RowList>),
}

struct Lowering<'a, 'b> {
    dataframe: &'a Dataframe,
    options: &'a CompileOptions,
    cache: RegisterCache<'b>,
    state: RowState,
    has_aggregate: bool,
    projection: Option<Vec<String>>,
}

impl<'a, 'b> Lowering<'a, 'b> {
    fn new(
        dataframe: &'a Dataframe,
        options: &'a CompileOptions,
        cache: RegisterCache<'b>,
        plan: &QueryPlan,
    ) -> Self {
        Self {
            dataframe,
            options,
            cache,
            state: RowState::All,
            has_aggregate: plan.has_aggregate(),
            projection: None,
        }
    }

    fn builder(&mut self) -> &mut BytecodeBuilder {
        self.cache.builder()
    }

    fn emit(&mut self, instruction: Instruction) -> Result<()> {
        self.builder().emit(instruction)
    }

    fn row_count(&self) -> usize {
        self.dataframe.row_count()
    }

    fn lower(&mut self, plan: &QueryPlan) -> Result<Vec<OutputColumn>> {
        let last = plan.ops.len().saturating_sub(1);
        for (i, op) in plan.ops.iter().enumerate() {
            match op {
                QueryOp::Filter(predicate) => {
                    self.filter(|this, dest| this.predicate(predicate, dest))?;
                }
                QueryOp::IndexedFilter { column, op, value } => {
                    self.filter(|this, dest| this.indexed_compare(column, *op, value, dest))?;
                }
                QueryOp::Sort(keys) => self.sort(keys)?,
                QueryOp::Limit { limit, offset } => {
                    let rows = self.materialize_rows()?;
                    self.emit(Instruction::LimitRows { rows, offset: *offset, limit: *limit })?;
                }
                QueryOp::Project(columns) => self.project(columns)?,
                QueryOp::Aggregate(specs) => {
                    if i != last {
                        return Err(TraceframeError::InvalidPlan(
                            "aggregate must be the last operation of a plan".into(),
                        ));
                    }
                    return self.aggregate(specs);
                }
            }
        }
        self.emit_cursor()
    }

    /// Applies one filter to the current rows. `eval` writes the filter's
    /// full selection into the register it is given.
    fn filter<F>(&mut self, eval: F) -> Result<()>
    where
        F: FnOnce(&mut Self, RwHandle<Selection>) -> Result<()>,
    {
        match self.state {
            RowState::All => {
                let selection = self.builder().allocate_register::<Selection>()?;
                eval(&mut *self, selection)?;
                self.state = RowState::Selected(selection);
                self.exit_if_empty(selection)
            }
            RowState::Selected(selection) => {
                let n = self.row_count();
                let scratch = self.builder().allocate_scratch(n)?;
                eval(&mut *self, scratch.selection)?;
                self.emit(Instruction::AndSelection { dest: selection, src: scratch.selection.read() })?;
                self.builder().release_scratch(scratch);
                self.exit_if_empty(selection)
            }
            RowState::Rows(rows) => {
                let n = self.row_count();
                let scratch = self.builder().allocate_scratch(n)?;
                eval(&mut *self, scratch.selection)?;
                self.emit(Instruction::FilterRows { rows, selection: scratch.selection.read() })?;
                self.builder().release_scratch(scratch);
                Ok(())
            }
        }
    }

    // An aggregate must still run over an empty input to report `count = 0`.
    fn exit_if_empty(&mut self, selection: RwHandle<Selection>) -> Result<()> {
        if self.has_aggregate {
            return Ok(());
        }
        self.emit(Instruction::ExitIfEmpty { selection: selection.read() })
    }

    fn predicate(&mut self, predicate: &Predicate, dest: RwHandle<Selection>) -> Result<()> {
        match predicate {
            Predicate::Compare { column, op, operand: Operand::Literal(value) } => {
                self.compare_literal(column, *op, value, dest)
            }
            Predicate::Compare { column, op, operand: Operand::Column(other) } => {
                self.compare_columns(column, *op, other, dest)
            }
            Predicate::IsNull(column) | Predicate::IsNotNull(column) => {
                let (reg, _) = self.column(column)?;
                let negated = matches!(predicate, Predicate::IsNotNull(_));
                self.emit(Instruction::IsNull { column: reg, negated, dest })
            }
            Predicate::And(left, right) | Predicate::Or(left, right) => {
                self.predicate(left, dest)?;
                let n = self.row_count();
                let scratch = self.builder().allocate_scratch(n)?;
                self.predicate(right, scratch.selection)?;
                let src = scratch.selection.read();
                if matches!(predicate, Predicate::And(..)) {
                    self.emit(Instruction::AndSelection { dest, src })?;
                } else {
                    self.emit(Instruction::OrSelection { dest, src })?;
                }
                self.builder().release_scratch(scratch);
                Ok(())
            }
            Predicate::Not(inner) => {
                self.predicate(inner, dest)?;
                self.emit(Instruction::NotSelection { dest })
            }
        }
    }

    fn compare_literal(
        &mut self,
        column: &str,
        op: CompareOp,
        value: &Value,
        dest: RwHandle<Selection>,
    ) -> Result<()> {
        let (reg, col) = self.column(column)?;
        let ty = col.column_type();
        if matches!(op, CompareOp::Glob | CompareOp::Regex) {
            let pattern = match (ty, value) {
                (ColumnType::String, Value::String(pattern)) => string_pattern(op, pattern)?,
                _ => {
                    return Err(TraceframeError::TypeError(format!(
                        "{} needs a string column and a string pattern, got {} column `{}` and {}",
                        op.symbol(),
                        ty,
                        column,
                        value
                    )))
                }
            };
            return self.emit(Instruction::MatchPattern { column: reg, pattern, dest });
        }
        let value = check_literal(column, ty, value)?;
        self.emit(Instruction::Compare { column: reg, op, value, dest })
    }

    fn compare_columns(
        &mut self,
        left: &str,
        op: CompareOp,
        right: &str,
        dest: RwHandle<Selection>,
    ) -> Result<()> {
        if !op.is_ordering() {
            return Err(TraceframeError::TypeError(format!(
                "{} cannot compare two columns",
                op.symbol()
            )));
        }
        let (lreg, lcol) = self.column(left)?;
        let (rreg, rcol) = self.column(right)?;
        let (lty, rty) = (lcol.column_type(), rcol.column_type());
        if lty != rty && !(lty.is_numeric() && rty.is_numeric()) {
            return Err(TraceframeError::TypeError(format!(
                "cannot compare {} column `{}` with {} column `{}`",
                lty, left, rty, right
            )));
        }
        self.emit(Instruction::CompareColumns { left: lreg, op, right: rreg, dest })
    }

    fn indexed_compare(
        &mut self,
        column: &str,
        op: CompareOp,
        value: &Value,
        dest: RwHandle<Selection>,
    ) -> Result<()> {
        if !op.is_ordering() {
            return Err(TraceframeError::InvalidPlan(format!(
                "{} cannot be answered from an index",
                op.symbol()
            )));
        }
        let index = self.index(column)?;
        let (reg, col) = self.column(column)?;
        let value = check_literal(column, col.column_type(), value)?;
        self.emit(Instruction::IndexedCompare { index, column: reg, op, value, dest })
    }

    fn sort(&mut self, keys: &[SortKey]) -> Result<()> {
        if keys.is_empty() {
            return Err(TraceframeError::InvalidPlan("sort needs at least one key".into()));
        }
        if let [key] = keys {
            let walkable = key.direction == SortDirection::Asc && key.nulls == NullOrder::NullsFirst;
            if self.options.index_sorts && walkable {
                let selection = match self.state {
                    RowState::All => Some(None),
                    RowState::Selected(selection) => Some(Some(selection.read())),
                    RowState::Rows(_) => None,
                };
                if let Some(selection) = selection {
                    let index = self.index(&key.column)?;
                    let dest = self.builder().allocate_register::<RowList>()?;
                    self.emit(Instruction::SortByIndex { index, selection, dest })?;
                    self.state = RowState::Rows(dest);
                    return Ok(());
                }
            }
        }
        let mut operands = Vec::with_capacity(keys.len());
        for key in keys {
            let (column, _) = self.column(&key.column)?;
            operands.push(SortOperand { column, direction: key.direction, nulls: key.nulls });
        }
        let rows = self.materialize_rows()?;
        self.emit(Instruction::SortRows { rows, keys: operands })
    }

    fn project(&mut self, columns: &[String]) -> Result<()> {
        if self.has_aggregate {
            return Err(TraceframeError::InvalidPlan("project cannot be combined with aggregate".into()));
        }
        if self.projection.is_some() {
            return Err(TraceframeError::InvalidPlan("plan has more than one project".into()));
        }
        if columns.is_empty() {
            return Err(TraceframeError::InvalidPlan("project needs at least one column".into()));
        }
        for name in columns {
            self.dataframe.column_index(name)?;
        }
        self.projection = Some(columns.to_vec());
        Ok(())
    }

    fn aggregate(&mut self, specs: &[AggregateSpec]) -> Result<Vec<OutputColumn>> {
        if specs.is_empty() {
            return Err(TraceframeError::InvalidPlan("aggregate needs at least one function".into()));
        }
        let rows = self.materialize_rows()?.read();
        let mut scalars = Vec::with_capacity(specs.len());
        let mut outputs = Vec::with_capacity(specs.len());
        for spec in specs {
            let (column, ty) = match (&spec.column, spec.func) {
                (None, AggregateFunc::Count) => (None, ColumnType::Int64),
                (None, func) => {
                    return Err(TraceframeError::InvalidPlan(format!("{:?} needs a column", func)))
                }
                (Some(name), func) => {
                    let (reg, col) = self.column(name)?;
                    (Some(reg), aggregate_type(func, name, col.column_type())?)
                }
            };
            let dest = self.builder().allocate_register::<Scalar>()?;
            self.emit(Instruction::Aggregate { func: spec.func, column, rows, dest })?;
            scalars.push(dest.read());
            outputs.push(OutputColumn { name: spec.output_name(), ty });
        }
        self.emit(Instruction::EmitScalars { scalars })?;
        Ok(outputs)
    }

    fn emit_cursor(&mut self) -> Result<Vec<OutputColumn>> {
        let rows = self.materialize_rows()?;
        let df = self.dataframe;
        let names = match self.projection.take() {
            Some(names) => names,
            None => df.column_names().to_vec(),
        };
        let mut columns = Vec::with_capacity(names.len());
        let mut outputs = Vec::with_capacity(names.len());
        for name in names {
            let (reg, col) = self.column(&name)?;
            columns.push(reg);
            outputs.push(OutputColumn { name, ty: col.column_type() });
        }
        let batch = self.builder().allocate_register::<Batch>()?;
        self.emit(Instruction::Project { columns, rows: rows.read(), dest: batch })?;
        self.emit(Instruction::EmitCursor { rows, batch })?;
        Ok(outputs)
    }

    /// Turns the current state into an explicit row list.
    fn materialize_rows(&mut self) -> Result<RwHandle<RowList>> {
        let rows = match self.state {
            RowState::Rows(rows) => return Ok(rows),
            RowState::All => {
                let dest = self.builder().allocate_register::<RowList>()?;
                let len = self.row_count();
                self.emit(Instruction::AllRows { len, dest })?;
                dest
            }
            RowState::Selected(selection) => {
                let dest = self.builder().allocate_register::<RowList>()?;
                self.emit(Instruction::SelectionToRows { selection: selection.read(), dest })?;
                dest
            }
        };
        self.state = RowState::Rows(rows);
        Ok(rows)
    }

    /// Resolves a column and returns its register, emitting the load the
    /// first time the column is referenced.
    fn column(&mut self, name: &str) -> Result<(ReadHandle<ColumnRef>, &'a Arc<Column>)> {
        let df = self.dataframe;
        let pos = df.column_index(name)?;
        let col = df
            .column_at(pos)
            .ok_or_else(|| TraceframeError::UnknownColumn(name.to_string()))?;
        let dest = if self.options.register_caching {
            let cached = self.cache.get_or_allocate::<ColumnRef>(col.id())?;
            if !cached.inserted {
                return Ok((cached.reg.read(), col));
            }
            cached.reg
        } else {
            self.builder().allocate_register::<ColumnRef>()?
        };
        self.emit(Instruction::LoadColumn { column: pos, id: col.id(), dest })?;
        Ok((dest.read(), col))
    }

    /// Like `column`, for the column's sorted index.
    fn index(&mut self, name: &str) -> Result<ReadHandle<IndexRef>> {
        let df = self.dataframe;
        let pos = df.column_index(name)?;
        let col = df
            .column_at(pos)
            .ok_or_else(|| TraceframeError::UnknownColumn(name.to_string()))?;
        let dest = if self.options.register_caching {
            let cached = self.cache.get_or_allocate::<IndexRef>(col.id())?;
            if !cached.inserted {
                return Ok(cached.reg.read());
            }
            cached.reg
        } else {
            self.builder().allocate_register::<IndexRef>()?
        };
        self.emit(Instruction::LoadIndex { column: pos, id: col.id(), dest })?;
        Ok(dest.read())
    }
}

fn check_literal(column: &str, ty: ColumnType, value: &Value) -> Result<Value> {
    match value.column_type() {
        None => Err(TraceframeError::TypeError(format!(
            "cannot compare `{}` with NULL; use IsNull",
            column
        ))),
        Some(lit) if ty.accepts(lit) => Ok(value.clone().widen_to(ty)),
        Some(lit) => Err(TraceframeError::TypeError(format!(
            "cannot compare {} column `{}` with {} literal {}",
            ty, column, lit, value
        ))),
    }
}

fn aggregate_type(func: AggregateFunc, column: &str, ty: ColumnType) -> Result<ColumnType> {
    match func {
        AggregateFunc::Count => Ok(ColumnType::Int64),
        AggregateFunc::Sum | AggregateFunc::Avg if !ty.is_numeric() => Err(TraceframeError::TypeError(
            format!("{:?} needs a numeric column, `{}` is {}", func, column, ty),
        )),
        AggregateFunc::Avg => Ok(ColumnType::Float64),
        AggregateFunc::Sum | AggregateFunc::Min | AggregateFunc::Max => Ok(ty),
    }
}

fn string_pattern(op: CompareOp, pattern: &str) -> Result<StringPattern> {
    match op {
        CompareOp::Glob => Ok(StringPattern::Glob(pattern.to_string())),
        #[cfg(feature = "regex")]
        CompareOp::Regex => regex::Regex::new(pattern)
            .map(StringPattern::Regex)
            .map_err(|e| TraceframeError::TypeError(format!("invalid regex {:?}: {}", pattern, e))),
        #[cfg(not(feature = "regex"))]
        CompareOp::Regex => Err(TraceframeError::TypeError(
            "regex comparisons need the `regex` feature".into(),
        )),
        other => Err(TraceframeError::ContractViolation(format!(
            "{} is not a pattern operator",
            other.symbol()
        ))),
    }
}
