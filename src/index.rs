//! Index module: sorted permutations over a single column.

use crate::column::{Column, ObjectId};
use crate::plan::CompareOp;
use crate::types::Value;
use crate::{Result, TraceframeError};
use std::cmp::Ordering;
use std::ops::Range;

/// A stable sorted permutation of a column's row ids.
///
/// Null rows come first, followed by the non-null rows in ascending value
/// order. Rows with equal values keep their original relative order.
#[derive(Debug)]
pub struct Index {
    id: ObjectId,
    permutation: Vec<u32>,
    null_count: usize,
}

impl Index {
    pub fn build(column: &Column) -> Self {
        let mut permutation: Vec<u32> = (0..column.len() as u32).collect();
        // Stable, so equal values keep row order.
        permutation.sort_by(|&a, &b| column.compare_rows(a as usize, b as usize));
        Self {
            id: ObjectId::next(),
            permutation,
            null_count: column.null_count(),
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn permutation(&self) -> &[u32] {
        &self.permutation
    }

    pub fn null_count(&self) -> usize {
        self.null_count
    }

    pub fn non_null_rows(&self) -> &[u32] {
        &self.permutation[self.null_count..]
    }

    /// Positions in the permutation whose rows satisfy `row <op> value`.
    ///
    /// Only meaningful for the column the index was built from. `Ne` has no
    /// contiguous range; callers take the complement of the `Eq` range.
    pub fn range_for(&self, column: &Column, op: CompareOp, value: &Value) -> Result<Range<usize>> {
        let rows = self.non_null_rows();
        let len = column.len();
        let mut corrupt = false;
        let mut cmp = |row: u32| -> Ordering {
            let row = row as usize;
            if row >= len {
                corrupt = true;
                return Ordering::Equal;
            }
            column.compare_to(row, value).unwrap_or(Ordering::Less)
        };
        let lower = rows.partition_point(|&r| cmp(r) == Ordering::Less);
        let upper = rows.partition_point(|&r| cmp(r) != Ordering::Greater);
        if corrupt {
            return Err(TraceframeError::ExecutionError(format!(
                "index {} references a row outside column {} ({} rows)",
                self.id,
                column.id(),
                len
            )));
        }
        let range = match op {
            CompareOp::Eq => lower..upper,
            CompareOp::Lt => 0..lower,
            CompareOp::Le => 0..upper,
            CompareOp::Gt => upper..rows.len(),
            CompareOp::Ge => lower..rows.len(),
            other => {
                return Err(TraceframeError::ExecutionError(format!(
                    "operator {:?} has no index range",
                    other
                )))
            }
        };
        Ok(range.start + self.null_count..range.end + self.null_count)
    }

    #[cfg(test)]
    pub(crate) fn from_raw(permutation: Vec<u32>, null_count: usize) -> Self {
        Self {
            id: ObjectId::next(),
            permutation,
            null_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_is_stable_with_nulls_first() {
        let col = Column::from_opt_i64(vec![Some(5), Some(1), None, Some(5), Some(3), None]);
        let index = Index::build(&col);
        assert_eq!(index.null_count(), 2);
        assert_eq!(index.permutation(), &[2, 5, 1, 4, 0, 3]);
        assert_eq!(index.non_null_rows(), &[1, 4, 0, 3]);
    }

    #[test]
    fn test_range_for_ops() {
        let col = Column::from_i64(vec![5, 1, 5, 3]);
        let index = Index::build(&col);
        let perm = index.permutation().to_vec();
        let rows = |r: Range<usize>| perm[r].to_vec();
        let five = Value::Int(5);
        assert_eq!(rows(index.range_for(&col, CompareOp::Eq, &five).unwrap()), vec![0, 2]);
        assert_eq!(rows(index.range_for(&col, CompareOp::Lt, &five).unwrap()), vec![1, 3]);
        assert_eq!(rows(index.range_for(&col, CompareOp::Le, &Value::Int(3)).unwrap()), vec![1, 3]);
        assert_eq!(rows(index.range_for(&col, CompareOp::Gt, &Value::Int(2)).unwrap()), vec![3, 0, 2]);
        assert_eq!(rows(index.range_for(&col, CompareOp::Ge, &Value::Int(6)).unwrap()), Vec::<u32>::new());
    }

    #[test]
    fn test_range_skips_nulls() {
        let col = Column::from_opt_i64(vec![None, Some(2), Some(1)]);
        let index = Index::build(&col);
        let range = index.range_for(&col, CompareOp::Lt, &Value::Int(10)).unwrap();
        assert_eq!(range, 1..3);
    }

    #[test]
    fn test_corrupt_index_is_reported() {
        let col = Column::from_i64(vec![1, 2]);
        let index = Index::from_raw(vec![0, 7], 0);
        let res = index.range_for(&col, CompareOp::Eq, &Value::Int(2));
        assert!(matches!(res, Err(TraceframeError::ExecutionError(_))));
    }
}
