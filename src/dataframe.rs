//! Dataframe module: the read-only columnar table queries run against.
//!
//! This module provides the Dataframe type and a builder importers use to
//! assemble one.

use crate::column::{Column, StringId, StringPool};
use crate::types::ColumnType;
use crate::{Result, TraceframeError};
use ahash::AHashMap;
use serde::{Serialize, Deserialize};
use std::sync::Arc;

/// Name, kind and nullability of one column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub ty: ColumnType,
    pub nullable: bool,
}

/// An ordered set of uniquely named columns of equal length.
#[derive(Debug)]
pub struct Dataframe {
    names: Vec<String>,
    columns: Vec<Arc<Column>>,
    positions: AHashMap<String, usize>,
    row_count: usize,
    strings: Arc<StringPool>,
}

impl Dataframe {
    /// Looks up a column by name.
    pub fn column(&self, name: &str) -> Result<&Arc<Column>> {
        let pos = self.column_index(name)?;
        Ok(&self.columns[pos])
    }

    pub fn column_index(&self, name: &str) -> Result<usize> {
        self.positions
            .get(name)
            .copied()
            .ok_or_else(|| TraceframeError::UnknownColumn(name.to_string()))
    }

    pub fn column_at(&self, pos: usize) -> Option<&Arc<Column>> {
        self.columns.get(pos)
    }

    pub fn column_name(&self, pos: usize) -> Option<&str> {
        self.names.get(pos).map(|s| s.as_str())
    }

    pub fn column_names(&self) -> &[String] {
        &self.names
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn strings(&self) -> &Arc<StringPool> {
        &self.strings
    }

    pub fn schema(&self) -> Vec<ColumnSchema> {
        self.names
            .iter()
            .zip(&self.columns)
            .map(|(name, col)| ColumnSchema {
                name: name.clone(),
                ty: col.column_type(),
                nullable: col.is_nullable(),
            })
            .collect()
    }
}

enum PendingColumn {
    Built(Column),
    Strings(Vec<Option<String>>),
}

// String columns wait for the shared pool to be complete.
enum InternedColumn {
    Built(Column),
    Interned(Vec<Option<StringId>>),
}

/// Builds a dataframe column by column. String columns share one pool,
/// interned when `build` runs.
#[derive(Default)]
pub struct DataframeBuilder {
    columns: Vec<(String, PendingColumn)>,
}

impl DataframeBuilder {
    pub fn new() -> Self {
        Self { columns: Vec::new() }
    }

    pub fn column(mut self, name: impl Into<String>, column: Column) -> Self {
        self.columns.push((name.into(), PendingColumn::Built(column)));
        self
    }

    pub fn int_column(self, name: impl Into<String>, values: Vec<i64>) -> Self {
        self.column(name, Column::from_i64(values))
    }

    pub fn nullable_int_column(self, name: impl Into<String>, values: Vec<Option<i64>>) -> Self {
        self.column(name, Column::from_opt_i64(values))
    }

    pub fn float_column(self, name: impl Into<String>, values: Vec<f64>) -> Self {
        self.column(name, Column::from_f64(values))
    }

    pub fn nullable_float_column(self, name: impl Into<String>, values: Vec<Option<f64>>) -> Self {
        self.column(name, Column::from_opt_f64(values))
    }

    pub fn string_column<S: AsRef<str>>(mut self, name: impl Into<String>, values: Vec<Option<S>>) -> Self {
        let values = values
            .into_iter()
            .map(|v| v.map(|s| s.as_ref().to_string()))
            .collect();
        self.columns.push((name.into(), PendingColumn::Strings(values)));
        self
    }

    /// Finishes the dataframe. Fails on duplicate names or columns of
    /// differing lengths.
    pub fn build(self) -> Result<Dataframe> {
        let mut pool = StringPool::new();
        let mut pending = Vec::with_capacity(self.columns.len());
        for (name, column) in self.columns {
            let column = match column {
                PendingColumn::Built(col) => InternedColumn::Built(col),
                PendingColumn::Strings(values) => InternedColumn::Interned(
                    values.iter().map(|v| v.as_deref().map(|s| pool.intern(s))).collect(),
                ),
            };
            pending.push((name, column));
        }
        let strings = Arc::new(pool);
        let built: Vec<(String, Column)> = pending
            .into_iter()
            .map(|(name, column)| {
                let column = match column {
                    InternedColumn::Built(col) => col,
                    InternedColumn::Interned(ids) => Column::from_string_ids(ids, Arc::clone(&strings)),
                };
                (name, column)
            })
            .collect();

        let mut names = Vec::with_capacity(built.len());
        let mut columns = Vec::with_capacity(built.len());
        let mut positions = AHashMap::new();
        let mut row_count = None;
        for (name, column) in built {
            if positions.contains_key(&name) {
                return Err(TraceframeError::DuplicateColumn(name));
            }
            let expected = *row_count.get_or_insert(column.len());
            if column.len() != expected {
                return Err(TraceframeError::LengthMismatch {
                    column: name,
                    expected,
                    got: column.len(),
                });
            }
            positions.insert(name.clone(), names.len());
            names.push(name);
            columns.push(Arc::new(column));
        }
        Ok(Dataframe {
            names,
            columns,
            positions,
            row_count: row_count.unwrap_or(0),
            strings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;

    fn slices() -> Dataframe {
        DataframeBuilder::new()
            .int_column("ts", vec![10, 20, 30])
            .nullable_int_column("dur", vec![Some(5), None, Some(1)])
            .string_column("name", vec![Some("a"), Some("b"), Some("a")])
            .build()
            .unwrap()
    }

    #[test]
    fn test_column_lookup() {
        let df = slices();
        assert_eq!(df.row_count(), 3);
        assert_eq!(df.num_columns(), 3);
        assert_eq!(df.column_index("dur").unwrap(), 1);
        assert_eq!(df.column("name").unwrap().value(2), Value::string("a"));
        assert_eq!(df.column_name(0), Some("ts"));
        assert!(df.column_at(3).is_none());
    }

    #[test]
    fn test_unknown_column() {
        let df = slices();
        let res = df.column("cpu");
        assert!(matches!(res, Err(TraceframeError::UnknownColumn(ref c)) if c == "cpu"));
    }

    #[test]
    fn test_schema() {
        let schema = slices().schema();
        assert_eq!(schema[1], ColumnSchema { name: "dur".into(), ty: ColumnType::Int64, nullable: true });
        assert_eq!(schema[2].ty, ColumnType::String);
        assert!(!schema[0].nullable);
    }

    #[test]
    fn test_strings_share_one_pool() {
        let df = DataframeBuilder::new()
            .string_column("a", vec![Some("x"), Some("y")])
            .string_column("b", vec![Some("y"), None::<&str>])
            .build()
            .unwrap();
        assert_eq!(df.strings().len(), 2);
        assert_eq!(df.column("b").unwrap().value(1), Value::Null);
    }

    #[test]
    fn test_string_columns_keep_declared_order() {
        let df = DataframeBuilder::new()
            .string_column("name", vec![Some("a"), Some("b")])
            .int_column("ts", vec![1, 2])
            .string_column("cat", vec![Some("b"), Some("c")])
            .build()
            .unwrap();
        let names: Vec<_> = df.schema().iter().map(|c| c.name.clone()).collect();
        assert_eq!(names, vec!["name", "ts", "cat"]);
        assert_eq!(df.strings().len(), 3);
        assert_eq!(df.column("cat").unwrap().value(1), Value::from("c"));
    }

    #[test]
    fn test_duplicate_column() {
        let res = DataframeBuilder::new()
            .int_column("ts", vec![1])
            .int_column("ts", vec![2])
            .build();
        assert!(matches!(res, Err(TraceframeError::DuplicateColumn(_))));
    }

    #[test]
    fn test_length_mismatch() {
        let res = DataframeBuilder::new()
            .int_column("ts", vec![1, 2])
            .float_column("v", vec![1.0])
            .build();
        assert!(matches!(res, Err(TraceframeError::LengthMismatch { expected: 2, got: 1, .. })));
    }

    #[test]
    fn test_empty_dataframe() {
        let df = DataframeBuilder::new().build().unwrap();
        assert_eq!(df.row_count(), 0);
        assert!(df.schema().is_empty());
    }
}
