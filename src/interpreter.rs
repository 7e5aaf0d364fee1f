//! Interpreter module: executes a compiled program against a dataframe.
//!
//! Each run gets a fresh register file, so one program may be run many
//! times, from many threads, against the dataframe it was compiled for.

use crate::bitmap::Bitmap;
use crate::bytecode::{Instruction, Program, SortOperand};
use crate::column::{Column, ColumnData, ObjectId};
use crate::config::ExecOptions;
use crate::cursor::Cursor;
use crate::dataframe::Dataframe;
use crate::index::Index;
use crate::plan::{AggregateFunc, CompareOp, NullOrder, SortDirection};
use crate::registers::RegisterFile;
use crate::types::{compare_values, Value};
use crate::{Result, TraceframeError};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, trace};

enum Step {
    Continue,
    /// A selection came up empty; the result is empty.
    Exit,
    Done(Cursor),
}

pub struct Interpreter<'a> {
    program: &'a Program,
    dataframe: &'a Dataframe,
    options: &'a ExecOptions,
}

impl<'a> Interpreter<'a> {
    pub fn new(program: &'a Program, dataframe: &'a Dataframe, options: &'a ExecOptions) -> Self {
        Self { program, dataframe, options }
    }

    /// Runs the program to its terminal instruction.
    pub fn run(&self) -> Result<Cursor> {
        if self.program.row_count() != self.dataframe.row_count() {
            return Err(TraceframeError::ExecutionError(format!(
                "program was compiled for {} rows, dataframe has {}",
                self.program.row_count(),
                self.dataframe.row_count()
            )));
        }
        let mut regs = RegisterFile::new(self.program.layout());
        for (pc, instruction) in self.program.instructions().iter().enumerate() {
            trace!(pc, %instruction, "exec");
            match self.step(instruction, &mut regs)? {
                Step::Continue => {}
                Step::Exit => {
                    debug!(pc, "selection empty, exiting early");
                    return Ok(Cursor::empty(self.program.outputs().to_vec()));
                }
                Step::Done(cursor) => {
                    debug!(pc, rows = cursor.row_count(), "program finished");
                    return Ok(cursor);
                }
            }
        }
        debug!("program ended without emitting rows");
        Ok(Cursor::empty(self.program.outputs().to_vec()))
    }

    fn step(&self, instruction: &Instruction, regs: &mut RegisterFile) -> Result<Step> {
        match instruction {
            Instruction::LoadColumn { column, id, dest } => {
                let col = self.column_at(*column, *id)?;
                regs.write(*dest, Arc::clone(col))?;
            }
            Instruction::LoadIndex { column, id, dest } => {
                let col = self.column_at(*column, *id)?;
                regs.write(*dest, col.index())?;
            }
            Instruction::InitSelection { len, value, dest } => {
                regs.write(*dest, Bitmap::new_with_val(*value, *len))?;
            }
            Instruction::Compare { column, op, value, dest } => {
                let col = regs.read(*column)?;
                if !op.is_ordering() {
                    return Err(unsupported(*op, "Compare"));
                }
                let selection = Bitmap::from_bools(
                    (0..col.len()).map(|row| col.compare_to(row, value).is_some_and(|o| op_matches(*op, o))),
                );
                regs.write(*dest, selection)?;
            }
            Instruction::MatchPattern { column, pattern, dest } => {
                let col = regs.read(*column)?;
                let ColumnData::String { ids, pool } = col.data() else {
                    return Err(TraceframeError::ExecutionError(format!(
                        "{} applied to a {} column",
                        pattern,
                        col.column_type()
                    )));
                };
                let hits = pool.matches(|s| pattern.is_match(s));
                let selection = Bitmap::from_bools(ids.iter().enumerate().map(|(row, id)| {
                    !col.is_null(row) && hits.get(id.0 as usize).copied().unwrap_or(false)
                }));
                regs.write(*dest, selection)?;
            }
            Instruction::CompareColumns { left, op, right, dest } => {
                if !op.is_ordering() {
                    return Err(unsupported(*op, "CompareColumns"));
                }
                let (l, r) = (regs.read(*left)?, regs.read(*right)?);
                let selection = Bitmap::from_bools((0..l.len().min(r.len())).map(|row| {
                    compare_values(&l.value(row), &r.value(row)).is_some_and(|o| op_matches(*op, o))
                }));
                regs.write(*dest, selection)?;
            }
            Instruction::IsNull { column, negated, dest } => {
                let col = regs.read(*column)?;
                let selection = Bitmap::from_bools((0..col.len()).map(|row| col.is_null(row) != *negated));
                regs.write(*dest, selection)?;
            }
            Instruction::IndexedCompare { index, column, op, value, dest } => {
                let selection = indexed_compare(regs.read(*index)?, regs.read(*column)?, *op, value)?;
                regs.write(*dest, selection)?;
            }
            Instruction::AndSelection { dest, src } | Instruction::OrSelection { dest, src } => {
                let mut selection = regs.take(*dest)?;
                let other = regs.read(*src)?;
                if selection.len() != other.len() {
                    return Err(TraceframeError::ExecutionError(format!(
                        "{} combines selections of {} and {} rows",
                        instruction.name(),
                        selection.len(),
                        other.len()
                    )));
                }
                if matches!(instruction, Instruction::AndSelection { .. }) {
                    selection.and_with(other);
                } else {
                    selection.or_with(other);
                }
                regs.write(*dest, selection)?;
            }
            Instruction::NotSelection { dest } => {
                regs.get_mut(*dest)?.negate();
            }
            Instruction::SelectionToRows { selection, dest } => {
                let rows: Vec<u32> = regs.read(*selection)?.iter_set().map(|r| r as u32).collect();
                self.check_rows(rows.len())?;
                regs.write(*dest, rows)?;
            }
            Instruction::AllRows { len, dest } => {
                self.check_rows(*len)?;
                regs.write(*dest, (0..*len as u32).collect())?;
            }
            Instruction::FilterRows { rows, selection } => {
                let mut list = regs.take(*rows)?;
                let sel = regs.read(*selection)?;
                list.retain(|&r| (r as usize) < sel.len() && sel.value(r as usize));
                regs.write(*rows, list)?;
            }
            Instruction::SortRows { rows, keys } => {
                let columns = keys
                    .iter()
                    .map(|k| regs.read(k.column).map(Arc::clone))
                    .collect::<Result<Vec<_>>>()?;
                let mut list = regs.take(*rows)?;
                check_in_bounds(&list, &columns)?;
                list.sort_by(|&a, &b| compare_sort_keys(keys, &columns, a as usize, b as usize));
                regs.write(*rows, list)?;
            }
            Instruction::SortByIndex { index, selection, dest } => {
                let idx = regs.read(*index)?;
                let sel = match selection {
                    Some(sel) => Some(regs.read(*sel)?),
                    None => None,
                };
                let rows = index_walk(idx, sel, self.dataframe.row_count())?;
                self.check_rows(rows.len())?;
                regs.write(*dest, rows)?;
            }
            Instruction::LimitRows { rows, offset, limit } => {
                let list = regs.get_mut(*rows)?;
                let skip = (*offset).min(list.len());
                list.drain(..skip);
                if let Some(limit) = limit {
                    list.truncate(*limit);
                }
            }
            Instruction::Project { columns, rows, dest } => {
                let list = regs.read(*rows)?;
                let mut batch = Vec::with_capacity(columns.len());
                for column in columns {
                    let col = regs.read(*column)?;
                    check_in_bounds(list, std::slice::from_ref(col))?;
                    batch.push(col.gather(list));
                }
                regs.write(*dest, batch)?;
            }
            Instruction::Aggregate { func, column, rows, dest } => {
                let list = regs.read(*rows)?;
                let col = match column {
                    Some(c) => Some(regs.read(*c)?),
                    None => None,
                };
                if let Some(col) = col {
                    check_in_bounds(list, std::slice::from_ref(col))?;
                }
                let value = aggregate(*func, col.map(|c| &**c), list)?;
                regs.write(*dest, value)?;
            }
            Instruction::ExitIfEmpty { selection } => {
                if !regs.read(*selection)?.any() {
                    return Ok(Step::Exit);
                }
            }
            Instruction::EmitCursor { rows, batch } => {
                let rows = regs.take(*rows)?;
                let columns = regs.take(*batch)?;
                return Ok(Step::Done(Cursor::new(self.program.outputs().to_vec(), columns, rows)));
            }
            Instruction::EmitScalars { scalars } => {
                let outputs = self.program.outputs();
                if outputs.len() != scalars.len() {
                    return Err(TraceframeError::ExecutionError(format!(
                        "{} scalars for {} output columns",
                        scalars.len(),
                        outputs.len()
                    )));
                }
                let columns = scalars
                    .iter()
                    .zip(outputs)
                    .map(|(s, out)| regs.read(*s).map(|v| Column::from_scalar(v, out.ty)))
                    .collect::<Result<Vec<_>>>()?;
                return Ok(Step::Done(Cursor::new(outputs.to_vec(), columns, vec![0])));
            }
        }
        Ok(Step::Continue)
    }

    // The recorded identity guards against running a program on a dataframe
    // it was not compiled for.
    fn column_at(&self, pos: usize, id: ObjectId) -> Result<&'a Arc<Column>> {
        let df = self.dataframe;
        match df.column_at(pos) {
            Some(col) if col.id() == id => Ok(col),
            Some(col) => Err(TraceframeError::ExecutionError(format!(
                "column {} is {}, program expects {}; wrong dataframe",
                pos,
                col.id(),
                id
            ))),
            None => Err(TraceframeError::ExecutionError(format!(
                "column {} does not exist ({} columns)",
                pos,
                df.num_columns()
            ))),
        }
    }

    fn check_rows(&self, n: usize) -> Result<()> {
        match self.options.max_rows {
            Some(max) if n > max => Err(TraceframeError::PlanTooLarge(format!(
                "row list of {} rows exceeds the limit of {}",
                n, max
            ))),
            _ => Ok(()),
        }
    }
}

fn op_matches(op: CompareOp, ord: Ordering) -> bool {
    match op {
        CompareOp::Eq => ord == Ordering::Equal,
        CompareOp::Ne => ord != Ordering::Equal,
        CompareOp::Lt => ord == Ordering::Less,
        CompareOp::Le => ord != Ordering::Greater,
        CompareOp::Gt => ord == Ordering::Greater,
        CompareOp::Ge => ord != Ordering::Less,
        CompareOp::Glob | CompareOp::Regex => false,
    }
}

fn unsupported(op: CompareOp, instruction: &str) -> TraceframeError {
    TraceframeError::ExecutionError(format!("{} does not support {}", instruction, op.symbol()))
}

fn indexed_compare(index: &Index, column: &Column, op: CompareOp, value: &Value) -> Result<Bitmap> {
    check_permutation(index, column.len())?;
    let perm = index.permutation();
    let mut selection = Bitmap::new_with_val(false, column.len());
    if op == CompareOp::Ne {
        // No contiguous range: every non-null row outside the `Eq` range.
        let eq = index.range_for(column, CompareOp::Eq, value)?;
        for &row in perm[index.null_count()..eq.start].iter().chain(&perm[eq.end..]) {
            selection.set(row as usize, true);
        }
    } else {
        let range = index.range_for(column, op, value)?;
        for &row in &perm[range] {
            selection.set(row as usize, true);
        }
    }
    Ok(selection)
}

// A permutation must list every row of a `len`-row column exactly once.
fn check_permutation(index: &Index, len: usize) -> Result<()> {
    let perm = index.permutation();
    let max = perm.iter().max().map_or(0, |&r| r as usize + 1);
    if perm.len() != len || max > len || index.null_count() > len {
        return Err(TraceframeError::ExecutionError(format!(
            "index {} is corrupt: {} entries up to row {} for a {}-row column",
            index.id(),
            perm.len(),
            max.saturating_sub(1),
            len
        )));
    }
    Ok(())
}

/// Rows of the index permutation, in index order, that are set in
/// `selection` (all rows when there is none).
fn index_walk(index: &Index, selection: Option<&Bitmap>, len: usize) -> Result<Vec<u32>> {
    check_permutation(index, len)?;
    let perm = index.permutation();
    match selection {
        Some(sel) if sel.len() != len => Err(TraceframeError::ExecutionError(format!(
            "selection of {} rows applied to a {}-row index",
            sel.len(),
            len
        ))),
        Some(sel) => Ok(perm.iter().copied().filter(|&r| sel.value(r as usize)).collect()),
        None => Ok(perm.to_vec()),
    }
}

fn check_in_bounds(rows: &[u32], columns: &[Arc<Column>]) -> Result<()> {
    let Some(&max) = rows.iter().max() else {
        return Ok(());
    };
    match columns.iter().find(|c| max as usize >= c.len()) {
        Some(col) => Err(TraceframeError::ExecutionError(format!(
            "row {} is outside column {} ({} rows)",
            max,
            col.id(),
            col.len()
        ))),
        None => Ok(()),
    }
}

fn compare_sort_keys(keys: &[SortOperand], columns: &[Arc<Column>], a: usize, b: usize) -> Ordering {
    for (key, col) in keys.iter().zip(columns) {
        let ord = match (col.is_null(a), col.is_null(b)) {
            (true, true) => Ordering::Equal,
            (true, false) => nulls_first_ordering(key.nulls),
            (false, true) => nulls_first_ordering(key.nulls).reverse(),
            (false, false) => {
                let ord = col.compare_rows(a, b);
                match key.direction {
                    SortDirection::Asc => ord,
                    SortDirection::Desc => ord.reverse(),
                }
            }
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

// Ordering of a null against a non-null value.
fn nulls_first_ordering(nulls: NullOrder) -> Ordering {
    match nulls {
        NullOrder::NullsFirst => Ordering::Less,
        NullOrder::NullsLast => Ordering::Greater,
    }
}

fn aggregate(func: AggregateFunc, column: Option<&Column>, rows: &[u32]) -> Result<Value> {
    let Some(col) = column else {
        return match func {
            AggregateFunc::Count => Ok(Value::Int(rows.len() as i64)),
            other => Err(TraceframeError::ExecutionError(format!("{:?} needs a column", other))),
        };
    };
    let mut valid = rows.iter().map(|&r| r as usize).filter(|&r| !col.is_null(r));
    match func {
        AggregateFunc::Count => Ok(Value::Int(valid.count() as i64)),
        AggregateFunc::Min => Ok(valid.min_by(|&a, &b| col.compare_rows(a, b)).map_or(Value::Null, |r| col.value(r))),
        AggregateFunc::Max => Ok(valid.max_by(|&a, &b| col.compare_rows(a, b)).map_or(Value::Null, |r| col.value(r))),
        AggregateFunc::Sum => match col.data() {
            ColumnData::Int64(v) => {
                let mut sum: Option<i64> = None;
                for r in valid {
                    let next = sum.unwrap_or(0).checked_add(v[r]).ok_or_else(|| {
                        TraceframeError::ExecutionError(format!("integer overflow summing column {}", col.id()))
                    })?;
                    sum = Some(next);
                }
                Ok(sum.map_or(Value::Null, Value::Int))
            }
            ColumnData::Float64(v) => {
                let mut sum: Option<f64> = None;
                for r in valid {
                    sum = Some(sum.unwrap_or(0.0) + v[r]);
                }
                Ok(sum.map_or(Value::Null, Value::Float))
            }
            ColumnData::String { .. } => Err(non_numeric(func, col)),
        },
        AggregateFunc::Avg => {
            let (sum, count) = match col.data() {
                ColumnData::Int64(v) => valid.by_ref().fold((0.0, 0usize), |(s, n), r| (s + v[r] as f64, n + 1)),
                ColumnData::Float64(v) => valid.by_ref().fold((0.0, 0usize), |(s, n), r| (s + v[r], n + 1)),
                ColumnData::String { .. } => return Err(non_numeric(func, col)),
            };
            if count == 0 {
                Ok(Value::Null)
            } else {
                Ok(Value::Float(sum / count as f64))
            }
        }
    }
}

fn non_numeric(func: AggregateFunc, col: &Column) -> TraceframeError {
    TraceframeError::ExecutionError(format!("{:?} over {} column {}", func, col.column_type(), col.id()))
}
