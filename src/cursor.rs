//! Cursor module: forward iteration over a query result.

use crate::bytecode::OutputColumn;
use crate::column::{Column, ColumnData};
use crate::types::{ColumnType, Value};
use crate::{Result, TraceframeError};

/// Result rows of one program run.
///
/// A cursor starts before its first row; call `advance` to move onto it.
/// Output columns are materialized, so the cursor does not borrow the
/// dataframe it came from.
#[derive(Debug)]
pub struct Cursor {
    outputs: Vec<OutputColumn>,
    columns: Vec<Column>,
    rows: Vec<u32>,
    position: Option<usize>,
}

impl Cursor {
    /// `columns[i]` holds one value per entry of `rows`, in the same order.
    pub(crate) fn new(outputs: Vec<OutputColumn>, columns: Vec<Column>, rows: Vec<u32>) -> Self {
        Self { outputs, columns, rows, position: None }
    }

    /// A cursor with the given schema and no rows.
    pub(crate) fn empty(outputs: Vec<OutputColumn>) -> Self {
        Self::new(outputs, Vec::new(), Vec::new())
    }

    /// Moves to the next row. Returns false once the rows are exhausted.
    pub fn advance(&mut self) -> bool {
        let next = self.position.map_or(0, |p| p + 1);
        if next < self.rows.len() {
            self.position = Some(next);
            true
        } else {
            self.position = Some(self.rows.len());
            false
        }
    }

    /// Dataframe row id of the current row, if positioned on one.
    pub fn current_row(&self) -> Option<u32> {
        self.position.and_then(|p| self.rows.get(p).copied())
    }

    pub fn reset(&mut self) {
        self.position = None;
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn outputs(&self) -> &[OutputColumn] {
        &self.outputs
    }

    pub fn column_index(&self, name: &str) -> Result<usize> {
        self.outputs
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| TraceframeError::UnknownColumn(name.to_string()))
    }

    pub fn value(&self, col: usize) -> Result<Value> {
        let (column, pos) = self.cell(col)?;
        Ok(column.value(pos))
    }

    pub fn is_null(&self, col: usize) -> Result<bool> {
        let (column, pos) = self.cell(col)?;
        Ok(column.is_null(pos))
    }

    /// Integer at `col`; `None` for null.
    pub fn get_i64(&self, col: usize) -> Result<Option<i64>> {
        let (column, pos) = self.typed_cell(col, ColumnType::Int64)?;
        match column.data() {
            ColumnData::Int64(v) if !column.is_null(pos) => Ok(Some(v[pos])),
            _ => Ok(None),
        }
    }

    pub fn get_f64(&self, col: usize) -> Result<Option<f64>> {
        let (column, pos) = self.typed_cell(col, ColumnType::Float64)?;
        match column.data() {
            ColumnData::Float64(v) if !column.is_null(pos) => Ok(Some(v[pos])),
            _ => Ok(None),
        }
    }

    pub fn get_str(&self, col: usize) -> Result<Option<&str>> {
        let (column, pos) = self.typed_cell(col, ColumnType::String)?;
        Ok(column.string_at(pos))
    }

    /// Row ids of the remaining rows, advancing to the end.
    pub fn collect_rows(&mut self) -> Vec<u32> {
        let mut rows = Vec::with_capacity(self.rows.len());
        while self.advance() {
            rows.extend(self.current_row());
        }
        rows
    }

    fn cell(&self, col: usize) -> Result<(&Column, usize)> {
        let pos = self
            .position
            .filter(|&p| p < self.rows.len())
            .ok_or_else(|| TraceframeError::ExecutionError("cursor is not positioned on a row".into()))?;
        let column = self.columns.get(col).ok_or_else(|| {
            TraceframeError::ExecutionError(format!(
                "output column {} out of range ({} columns)",
                col,
                self.columns.len()
            ))
        })?;
        Ok((column, pos))
    }

    fn typed_cell(&self, col: usize, expected: ColumnType) -> Result<(&Column, usize)> {
        let (column, pos) = self.cell(col)?;
        if column.column_type() != expected {
            return Err(TraceframeError::TypeError(format!(
                "output column {} is {}, not {}",
                col,
                column.column_type(),
                expected
            )));
        }
        Ok((column, pos))
    }
}
