//! Column module: typed, densely packed column storage.
//!
//! Columns are populated once by an importer and never mutated afterwards,
//! except for the lazily attached sorted index.

use crate::bitmap::Bitmap;
use crate::index::Index;
use crate::types::{compare_f64, compare_values, ColumnType, Value};
use crate::{Result, TraceframeError};
use ahash::AHashMap;
use once_cell::sync::OnceCell;
use std::cmp::Ordering;
use std::fmt;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use tracing::debug;

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a column or index.
///
/// Ids come from a monotonic counter and are never handed out twice, so a
/// dropped column can never share an identity with one created later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(NonZeroU64);

impl ObjectId {
    pub fn next() -> Self {
        let id = NEXT_OBJECT_ID.fetch_add(1, AtomicOrdering::Relaxed);
        // Starts at 1 and would need 2^64 allocations to wrap.
        ObjectId(NonZeroU64::new(id).unwrap_or(NonZeroU64::MIN))
    }

    pub fn get(&self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Dense id of an interned string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StringId(pub u32);

/// Interns the strings of a dataframe. Filled while the dataframe is built,
/// read-only once shared.
#[derive(Debug, Default)]
pub struct StringPool {
    strings: Vec<Arc<str>>,
    ids: AHashMap<Arc<str>, StringId>,
}

impl StringPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, s: &str) -> StringId {
        if let Some(id) = self.ids.get(s) {
            return *id;
        }
        let id = StringId(self.strings.len() as u32);
        let s: Arc<str> = Arc::from(s);
        self.strings.push(Arc::clone(&s));
        self.ids.insert(s, id);
        id
    }

    pub fn lookup(&self, s: &str) -> Option<StringId> {
        self.ids.get(s).copied()
    }

    pub fn get(&self, id: StringId) -> Option<&Arc<str>> {
        self.strings.get(id.0 as usize)
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    /// Evaluates `pred` once per distinct string; the result is indexed by
    /// string id.
    pub fn matches<F>(&self, pred: F) -> Vec<bool>
    where
        F: Fn(&str) -> bool,
    {
        self.strings.iter().map(|s| pred(s)).collect()
    }
}

#[derive(Debug, Clone)]
pub enum ColumnData {
    Int64(Vec<i64>),
    Float64(Vec<f64>),
    String { ids: Vec<StringId>, pool: Arc<StringPool> },
}

impl ColumnData {
    fn len(&self) -> usize {
        match self {
            ColumnData::Int64(v) => v.len(),
            ColumnData::Float64(v) => v.len(),
            ColumnData::String { ids, .. } => ids.len(),
        }
    }
}

/// A typed column. Null slots are tracked by an optional validity bitmap;
/// the data slot under a null holds a placeholder.
pub struct Column {
    id: ObjectId,
    data: ColumnData,
    validity: Option<Bitmap>,
    index: OnceCell<Arc<Index>>,
}

impl Column {
    pub fn new(data: ColumnData, validity: Option<Bitmap>) -> Result<Self> {
        if let Some(validity) = &validity {
            if validity.len() != data.len() {
                return Err(TraceframeError::LengthMismatch {
                    column: "<validity>".to_string(),
                    expected: data.len(),
                    got: validity.len(),
                });
            }
        }
        Ok(Self {
            id: ObjectId::next(),
            data,
            validity,
            index: OnceCell::new(),
        })
    }

    pub fn from_i64(values: Vec<i64>) -> Self {
        Self::from_parts(ColumnData::Int64(values), None)
    }

    pub fn from_opt_i64(values: Vec<Option<i64>>) -> Self {
        let validity = Bitmap::from_bools(values.iter().map(Option::is_some));
        let data = values.into_iter().map(|v| v.unwrap_or_default()).collect();
        Self::from_parts(ColumnData::Int64(data), Some(validity))
    }

    pub fn from_f64(values: Vec<f64>) -> Self {
        Self::from_parts(ColumnData::Float64(values), None)
    }

    pub fn from_opt_f64(values: Vec<Option<f64>>) -> Self {
        let validity = Bitmap::from_bools(values.iter().map(Option::is_some));
        let data = values.into_iter().map(|v| v.unwrap_or_default()).collect();
        Self::from_parts(ColumnData::Float64(data), Some(validity))
    }

    /// Builds a string column; `None` entries become nulls.
    pub fn from_string_ids(ids: Vec<Option<StringId>>, pool: Arc<StringPool>) -> Self {
        let validity = Bitmap::from_bools(ids.iter().map(Option::is_some));
        let ids = ids.into_iter().map(|v| v.unwrap_or(StringId(0))).collect();
        Self::from_parts(ColumnData::String { ids, pool }, Some(validity))
    }

    fn from_parts(data: ColumnData, validity: Option<Bitmap>) -> Self {
        // Drop all-valid bitmaps so non-null columns stay on the fast path.
        let validity = validity.filter(|v| v.count_trues() != v.len());
        Self {
            id: ObjectId::next(),
            data,
            validity,
            index: OnceCell::new(),
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn data(&self) -> &ColumnData {
        &self.data
    }

    pub fn column_type(&self) -> ColumnType {
        match self.data {
            ColumnData::Int64(_) => ColumnType::Int64,
            ColumnData::Float64(_) => ColumnType::Float64,
            ColumnData::String { .. } => ColumnType::String,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_nullable(&self) -> bool {
        self.validity.is_some()
    }

    #[inline]
    pub fn is_null(&self, row: usize) -> bool {
        self.validity.as_ref().is_some_and(|v| !v.value(row))
    }

    pub fn null_count(&self) -> usize {
        self.validity.as_ref().map_or(0, |v| v.len() - v.count_trues())
    }

    /// Value at `row`. Panics if `row` is out of bounds.
    pub fn value(&self, row: usize) -> Value {
        if self.is_null(row) {
            return Value::Null;
        }
        match &self.data {
            ColumnData::Int64(v) => Value::Int(v[row]),
            ColumnData::Float64(v) => Value::Float(v[row]),
            ColumnData::String { ids, pool } => match pool.get(ids[row]) {
                Some(s) => Value::String(Arc::clone(s)),
                None => Value::Null,
            },
        }
    }

    pub fn string_at(&self, row: usize) -> Option<&str> {
        match &self.data {
            ColumnData::String { ids, pool } if !self.is_null(row) => {
                pool.get(ids[row]).map(|s| s.as_ref())
            }
            _ => None,
        }
    }

    /// Compares two rows of this column. Nulls compare less than any value.
    pub fn compare_rows(&self, a: usize, b: usize) -> Ordering {
        match (self.is_null(a), self.is_null(b)) {
            (true, true) => return Ordering::Equal,
            (true, false) => return Ordering::Less,
            (false, true) => return Ordering::Greater,
            (false, false) => {}
        }
        match &self.data {
            ColumnData::Int64(v) => v[a].cmp(&v[b]),
            ColumnData::Float64(v) => compare_f64(v[a], v[b]),
            ColumnData::String { ids, pool } => {
                if ids[a] == ids[b] {
                    return Ordering::Equal;
                }
                let sa = pool.get(ids[a]).map(|s| s.as_bytes()).unwrap_or_default();
                let sb = pool.get(ids[b]).map(|s| s.as_bytes()).unwrap_or_default();
                sa.cmp(sb)
            }
        }
    }

    /// Compares the non-null value at `row` with `value`. Returns `None` if
    /// the row is null or the kinds are incompatible.
    #[inline]
    pub fn compare_to(&self, row: usize, value: &Value) -> Option<Ordering> {
        if self.is_null(row) {
            return None;
        }
        match (&self.data, value) {
            (ColumnData::Int64(v), Value::Int(x)) => Some(v[row].cmp(x)),
            (ColumnData::Float64(v), Value::Float(x)) => Some(compare_f64(v[row], *x)),
            (ColumnData::String { ids, pool }, Value::String(x)) => {
                pool.get(ids[row]).map(|s| s.as_bytes().cmp(x.as_bytes()))
            }
            _ => compare_values(&self.value(row), value),
        }
    }

    /// Returns the sorted index over this column, building it on first use.
    ///
    /// Concurrent callers wait on a single build; every caller observes the
    /// same `Arc<Index>`.
    pub fn index(&self) -> Arc<Index> {
        Arc::clone(self.index.get_or_init(|| {
            let index = Index::build(self);
            debug!(column = %self.id, index = %index.id(), rows = self.len(), "built column index");
            Arc::new(index)
        }))
    }

    pub fn has_index(&self) -> bool {
        self.index.get().is_some()
    }

    /// Materializes a new column holding `rows` of this one, in order.
    /// Panics if a row is out of bounds.
    pub fn gather(&self, rows: &[u32]) -> Column {
        let data = match &self.data {
            ColumnData::Int64(v) => ColumnData::Int64(rows.iter().map(|&r| v[r as usize]).collect()),
            ColumnData::Float64(v) => {
                ColumnData::Float64(rows.iter().map(|&r| v[r as usize]).collect())
            }
            ColumnData::String { ids, pool } => ColumnData::String {
                ids: rows.iter().map(|&r| ids[r as usize]).collect(),
                pool: Arc::clone(pool),
            },
        };
        let validity = self
            .validity
            .as_ref()
            .map(|v| Bitmap::from_bools(rows.iter().map(|&r| v.value(r as usize))));
        Column::from_parts(data, validity)
    }

    /// Builds a single-row column from a scalar.
    pub fn from_scalar(value: &Value, ty: ColumnType) -> Column {
        match (value, ty) {
            (Value::Int(v), _) => Column::from_i64(vec![*v]),
            (Value::Float(v), _) => Column::from_f64(vec![*v]),
            (Value::String(s), _) => {
                let mut pool = StringPool::new();
                let id = pool.intern(s);
                Column::from_string_ids(vec![Some(id)], Arc::new(pool))
            }
            (Value::Null, ColumnType::Int64) => Column::from_opt_i64(vec![None]),
            (Value::Null, ColumnType::Float64) => Column::from_opt_f64(vec![None]),
            (Value::Null, ColumnType::String) => {
                Column::from_string_ids(vec![None], Arc::new(StringPool::new()))
            }
        }
    }
}

impl fmt::Debug for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Column")
            .field("id", &self.id)
            .field("type", &self.column_type())
            .field("len", &self.len())
            .field("nulls", &self.null_count())
            .field("indexed", &self.has_index())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_ids_are_unique() {
        let a = Column::from_i64(vec![1]);
        let b = Column::from_i64(vec![1]);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_nullable_values() {
        let col = Column::from_opt_i64(vec![Some(4), None, Some(-1)]);
        assert!(col.is_nullable());
        assert_eq!(col.null_count(), 1);
        assert_eq!(col.value(0), Value::Int(4));
        assert_eq!(col.value(1), Value::Null);
        assert_eq!(col.compare_to(1, &Value::Int(0)), None);
        assert_eq!(col.compare_rows(1, 2), Ordering::Less);
    }

    #[test]
    fn test_all_valid_bitmap_is_dropped() {
        let col = Column::from_opt_f64(vec![Some(1.0), Some(2.0)]);
        assert!(!col.is_nullable());
    }

    #[test]
    fn test_string_pool_and_column() {
        let mut pool = StringPool::new();
        let a = pool.intern("sched_switch");
        let b = pool.intern("sched_wakeup");
        assert_eq!(pool.intern("sched_switch"), a);
        assert_eq!(pool.len(), 2);
        let col = Column::from_string_ids(vec![Some(b), None, Some(a)], Arc::new(pool));
        assert_eq!(col.column_type(), ColumnType::String);
        assert_eq!(col.string_at(0), Some("sched_wakeup"));
        assert_eq!(col.string_at(1), None);
        assert_eq!(col.compare_rows(0, 2), Ordering::Greater);
        assert_eq!(col.compare_to(2, &Value::string("sched_switch")), Some(Ordering::Equal));
    }

    #[test]
    fn test_gather_keeps_nulls_and_order() {
        let col = Column::from_opt_i64(vec![Some(1), None, Some(3), Some(4)]);
        let out = col.gather(&[3, 1, 0]);
        assert_eq!(out.len(), 3);
        assert_eq!(out.value(0), Value::Int(4));
        assert_eq!(out.value(1), Value::Null);
        assert_eq!(out.value(2), Value::Int(1));
        assert_ne!(out.id(), col.id());
    }

    #[test]
    fn test_index_is_built_once() {
        let col = Column::from_i64(vec![3, 1, 2]);
        assert!(!col.has_index());
        let a = col.index();
        let b = col.index();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(col.has_index());
    }

    #[test]
    fn test_concurrent_index_requests_share_one_index() {
        let col = Column::from_i64((0..10_000).rev().collect());
        let indexes: Vec<Arc<Index>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8).map(|_| s.spawn(|| col.index())).collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        for idx in &indexes[1..] {
            assert!(Arc::ptr_eq(&indexes[0], idx));
        }
    }

    #[test]
    fn test_new_rejects_bad_validity() {
        let res = Column::new(ColumnData::Int64(vec![1, 2]), Some(Bitmap::new_with_val(true, 3)));
        assert!(matches!(res, Err(TraceframeError::LengthMismatch { .. })));
    }
}
