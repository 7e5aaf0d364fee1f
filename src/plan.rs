//! Plan module: the logical operation tree handed over by a query front-end.
//!
//! Operations apply in order. Column names are resolved against the
//! dataframe at compile time.

use crate::types::Value;
use serde::{Serialize, Deserialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// Wildcard match on strings: `*` matches any run, `?` one character.
    Glob,
    /// Regular expression match on strings. Requires the `regex` feature.
    Regex,
}

impl CompareOp {
    /// Operators that order values and so can be answered from an index.
    pub fn is_ordering(&self) -> bool {
        matches!(
            self,
            CompareOp::Eq | CompareOp::Ne | CompareOp::Lt | CompareOp::Le | CompareOp::Gt | CompareOp::Ge
        )
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Glob => "glob",
            CompareOp::Regex => "regexp",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operand {
    Literal(Value),
    Column(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Predicate {
    Compare {
        column: String,
        op: CompareOp,
        operand: Operand,
    },
    IsNull(String),
    IsNotNull(String),
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn compare(column: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        Predicate::Compare {
            column: column.into(),
            op,
            operand: Operand::Literal(value.into()),
        }
    }

    pub fn compare_columns(column: impl Into<String>, op: CompareOp, other: impl Into<String>) -> Self {
        Predicate::Compare {
            column: column.into(),
            op,
            operand: Operand::Column(other.into()),
        }
    }

    pub fn and(self, other: Predicate) -> Self {
        Predicate::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Predicate) -> Self {
        Predicate::Or(Box::new(self), Box::new(other))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Predicate::Not(Box::new(self))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// Placement of nulls in a sort. Nulls sort first unless a plan asks
/// otherwise, regardless of direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NullOrder {
    #[default]
    NullsFirst,
    NullsLast,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub column: String,
    #[serde(default)]
    pub direction: SortDirection,
    #[serde(default)]
    pub nulls: NullOrder,
}

impl SortKey {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: SortDirection::Asc,
            nulls: NullOrder::NullsFirst,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: SortDirection::Desc,
            nulls: NullOrder::NullsFirst,
        }
    }

    pub fn nulls_last(mut self) -> Self {
        self.nulls = NullOrder::NullsLast;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregateFunc {
    Count,
    Sum,
    Min,
    Max,
    Avg,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateSpec {
    pub func: AggregateFunc,
    /// `None` only for `Count`, counting rows rather than non-null values.
    #[serde(default)]
    pub column: Option<String>,
    #[serde(default)]
    pub alias: Option<String>,
}

impl AggregateSpec {
    pub fn count_rows() -> Self {
        Self { func: AggregateFunc::Count, column: None, alias: None }
    }

    pub fn new(func: AggregateFunc, column: impl Into<String>) -> Self {
        Self { func, column: Some(column.into()), alias: None }
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Output column name: the alias, else `func(column)` / `count`.
    pub fn output_name(&self) -> String {
        if let Some(alias) = &self.alias {
            return alias.clone();
        }
        let func = match self.func {
            AggregateFunc::Count => "count",
            AggregateFunc::Sum => "sum",
            AggregateFunc::Min => "min",
            AggregateFunc::Max => "max",
            AggregateFunc::Avg => "avg",
        };
        match &self.column {
            Some(col) => format!("{}({})", func, col),
            None => func.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum QueryOp {
    Filter(Predicate),
    /// A single comparison answered by binary search over the column index.
    IndexedFilter {
        column: String,
        op: CompareOp,
        value: Value,
    },
    Sort(Vec<SortKey>),
    Limit {
        limit: Option<usize>,
        #[serde(default)]
        offset: usize,
    },
    Project(Vec<String>),
    Aggregate(Vec<AggregateSpec>),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryPlan {
    pub ops: Vec<QueryOp>,
}

impl QueryPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.ops.push(QueryOp::Filter(predicate));
        self
    }

    pub fn indexed_filter(mut self, column: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        self.ops.push(QueryOp::IndexedFilter {
            column: column.into(),
            op,
            value: value.into(),
        });
        self
    }

    pub fn sort(mut self, keys: Vec<SortKey>) -> Self {
        self.ops.push(QueryOp::Sort(keys));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.ops.push(QueryOp::Limit { limit: Some(limit), offset: 0 });
        self
    }

    pub fn limit_offset(mut self, limit: Option<usize>, offset: usize) -> Self {
        self.ops.push(QueryOp::Limit { limit, offset });
        self
    }

    pub fn project<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.ops.push(QueryOp::Project(columns.into_iter().map(Into::into).collect()));
        self
    }

    pub fn aggregate(mut self, specs: Vec<AggregateSpec>) -> Self {
        self.ops.push(QueryOp::Aggregate(specs));
        self
    }

    pub fn has_aggregate(&self) -> bool {
        self.ops.iter().any(|op| matches!(op, QueryOp::Aggregate(_)))
    }
}
