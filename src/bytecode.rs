//! Bytecode module: instructions and finished programs.
//!
//! Instructions address registers through typed handles. A program is the
//! instruction list plus the register-file layout it was compiled against.

use crate::column::ObjectId;
use crate::plan::{AggregateFunc, CompareOp, NullOrder, SortDirection};
use crate::registers::{
    Batch, ColumnRef, IndexRef, ReadHandle, RegisterKind, RegisterLayout, RowList, RwHandle, Scalar,
    Selection,
};
use crate::types::{ColumnType, Value};
use serde::{Serialize, Deserialize};
use std::fmt;

/// A compiled string pattern for `Glob` and `Regex` comparisons.
#[derive(Debug, Clone)]
pub enum StringPattern {
    Glob(String),
    #[cfg(feature = "regex")]
    Regex(regex::Regex),
}

impl StringPattern {
    pub fn is_match(&self, s: &str) -> bool {
        match self {
            StringPattern::Glob(pat) => glob_match(s, pat),
            #[cfg(feature = "regex")]
            StringPattern::Regex(re) => re.is_match(s),
        }
    }
}

impl fmt::Display for StringPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StringPattern::Glob(pat) => write!(f, "glob {:?}", pat),
            #[cfg(feature = "regex")]
            StringPattern::Regex(re) => write!(f, "regexp {:?}", re.as_str()),
        }
    }
}

// Case-sensitive wildcard match over chars: `*` matches any run, `?`
// exactly one char. Backtracks to the most recent `*` only, so it runs in
// O(n * m).
fn glob_match(s: &str, pat: &str) -> bool {
    let s: Vec<char> = s.chars().collect();
    let pat: Vec<char> = pat.chars().collect();
    let (mut si, mut pi) = (0, 0);
    let mut star: Option<(usize, usize)> = None;
    while si < s.len() {
        if pi < pat.len() && pat[pi] == '*' {
            star = Some((pi, si));
            pi += 1;
        } else if pi < pat.len() && (pat[pi] == '?' || pat[pi] == s[si]) {
            si += 1;
            pi += 1;
        } else if let Some((star_pi, star_si)) = star {
            pi = star_pi + 1;
            si = star_si + 1;
            star = Some((star_pi, star_si + 1));
        } else {
            return false;
        }
    }
    pat[pi..].iter().all(|&c| c == '*')
}

/// One key of a multi-key sort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortOperand {
    pub column: ReadHandle<ColumnRef>,
    pub direction: SortDirection,
    pub nulls: NullOrder,
}

/// A single bytecode instruction.
#[derive(Debug, Clone)]
pub enum Instruction {
    /// Point a register at the dataframe column at `column`. `id` is the
    /// identity the program was compiled against.
    LoadColumn { column: usize, id: ObjectId, dest: RwHandle<ColumnRef> },
    /// Load (building on first use) the sorted index of a column.
    LoadIndex { column: usize, id: ObjectId, dest: RwHandle<IndexRef> },
    InitSelection { len: usize, value: bool, dest: RwHandle<Selection> },
    /// `dest = column <op> value` for ordering operators.
    Compare { column: ReadHandle<ColumnRef>, op: CompareOp, value: Value, dest: RwHandle<Selection> },
    /// `dest = column matches pattern` for string columns.
    MatchPattern { column: ReadHandle<ColumnRef>, pattern: StringPattern, dest: RwHandle<Selection> },
    CompareColumns {
        left: ReadHandle<ColumnRef>,
        op: CompareOp,
        right: ReadHandle<ColumnRef>,
        dest: RwHandle<Selection>,
    },
    /// `dest = column IS NULL`, or `IS NOT NULL` when negated.
    IsNull { column: ReadHandle<ColumnRef>, negated: bool, dest: RwHandle<Selection> },
    /// Binary search over an index instead of a scan.
    IndexedCompare {
        index: ReadHandle<IndexRef>,
        column: ReadHandle<ColumnRef>,
        op: CompareOp,
        value: Value,
        dest: RwHandle<Selection>,
    },
    AndSelection { dest: RwHandle<Selection>, src: ReadHandle<Selection> },
    OrSelection { dest: RwHandle<Selection>, src: ReadHandle<Selection> },
    NotSelection { dest: RwHandle<Selection> },
    SelectionToRows { selection: ReadHandle<Selection>, dest: RwHandle<RowList> },
    AllRows { len: usize, dest: RwHandle<RowList> },
    /// Keep the rows whose bit is set, preserving row-list order.
    FilterRows { rows: RwHandle<RowList>, selection: ReadHandle<Selection> },
    /// Stable multi-key sort, in place.
    SortRows { rows: RwHandle<RowList>, keys: Vec<SortOperand> },
    /// Walk an index permutation, keeping selected rows.
    SortByIndex {
        index: ReadHandle<IndexRef>,
        selection: Option<ReadHandle<Selection>>,
        dest: RwHandle<RowList>,
    },
    LimitRows { rows: RwHandle<RowList>, offset: usize, limit: Option<usize> },
    Project { columns: Vec<ReadHandle<ColumnRef>>, rows: ReadHandle<RowList>, dest: RwHandle<Batch> },
    Aggregate {
        func: AggregateFunc,
        column: Option<ReadHandle<ColumnRef>>,
        rows: ReadHandle<RowList>,
        dest: RwHandle<Scalar>,
    },
    /// Stop with an empty result if no row is selected.
    ExitIfEmpty { selection: ReadHandle<Selection> },
    /// Terminal: package rows and projected columns into a cursor.
    EmitCursor { rows: RwHandle<RowList>, batch: RwHandle<Batch> },
    /// Terminal: package scalars into a one-row cursor.
    EmitScalars { scalars: Vec<ReadHandle<Scalar>> },
}

impl Instruction {
    /// Every register this instruction touches, with the kind it expects.
    pub fn registers(&self) -> Vec<(RegisterKind, u32)> {
        fn r<T: crate::registers::RegisterType>(h: ReadHandle<T>) -> (RegisterKind, u32) {
            (T::KIND, h.index)
        }
        fn w<T: crate::registers::RegisterType>(h: RwHandle<T>) -> (RegisterKind, u32) {
            (T::KIND, h.index)
        }
        match self {
            Instruction::LoadColumn { dest, .. } => vec![w(*dest)],
            Instruction::LoadIndex { dest, .. } => vec![w(*dest)],
            Instruction::InitSelection { dest, .. } => vec![w(*dest)],
            Instruction::Compare { column, dest, .. } => vec![r(*column), w(*dest)],
            Instruction::MatchPattern { column, dest, .. } => vec![r(*column), w(*dest)],
            Instruction::CompareColumns { left, right, dest, .. } => vec![r(*left), r(*right), w(*dest)],
            Instruction::IsNull { column, dest, .. } => vec![r(*column), w(*dest)],
            Instruction::IndexedCompare { index, column, dest, .. } => {
                vec![r(*index), r(*column), w(*dest)]
            }
            Instruction::AndSelection { dest, src } | Instruction::OrSelection { dest, src } => {
                vec![w(*dest), r(*src)]
            }
            Instruction::NotSelection { dest } => vec![w(*dest)],
            Instruction::SelectionToRows { selection, dest } => vec![r(*selection), w(*dest)],
            Instruction::AllRows { dest, .. } => vec![w(*dest)],
            Instruction::FilterRows { rows, selection } => vec![w(*rows), r(*selection)],
            Instruction::SortRows { rows, keys } => {
                let mut regs = vec![w(*rows)];
                regs.extend(keys.iter().map(|k| r(k.column)));
                regs
            }
            Instruction::SortByIndex { index, selection, dest } => {
                let mut regs = vec![r(*index), w(*dest)];
                regs.extend(selection.map(r));
                regs
            }
            Instruction::LimitRows { rows, .. } => vec![w(*rows)],
            Instruction::Project { columns, rows, dest } => {
                let mut regs: Vec<_> = columns.iter().map(|c| r(*c)).collect();
                regs.push(r(*rows));
                regs.push(w(*dest));
                regs
            }
            Instruction::Aggregate { column, rows, dest, .. } => {
                let mut regs = vec![r(*rows), w(*dest)];
                regs.extend(column.map(r));
                regs
            }
            Instruction::ExitIfEmpty { selection } => vec![r(*selection)],
            Instruction::EmitCursor { rows, batch } => vec![w(*rows), w(*batch)],
            Instruction::EmitScalars { scalars } => scalars.iter().map(|s| r(*s)).collect(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Instruction::EmitCursor { .. } | Instruction::EmitScalars { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Instruction::LoadColumn { .. } => "LoadColumn",
            Instruction::LoadIndex { .. } => "LoadIndex",
            Instruction::InitSelection { .. } => "InitSelection",
            Instruction::Compare { .. } => "Compare",
            Instruction::MatchPattern { .. } => "MatchPattern",
            Instruction::CompareColumns { .. } => "CompareColumns",
            Instruction::IsNull { .. } => "IsNull",
            Instruction::IndexedCompare { .. } => "IndexedCompare",
            Instruction::AndSelection { .. } => "AndSelection",
            Instruction::OrSelection { .. } => "OrSelection",
            Instruction::NotSelection { .. } => "NotSelection",
            Instruction::SelectionToRows { .. } => "SelectionToRows",
            Instruction::AllRows { .. } => "AllRows",
            Instruction::FilterRows { .. } => "FilterRows",
            Instruction::SortRows { .. } => "SortRows",
            Instruction::SortByIndex { .. } => "SortByIndex",
            Instruction::LimitRows { .. } => "LimitRows",
            Instruction::Project { .. } => "Project",
            Instruction::Aggregate { .. } => "Aggregate",
            Instruction::ExitIfEmpty { .. } => "ExitIfEmpty",
            Instruction::EmitCursor { .. } => "EmitCursor",
            Instruction::EmitScalars { .. } => "EmitScalars",
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let regs: Vec<String> = self.registers().iter().map(|(_, i)| format!("r{}", i)).collect();
        write!(f, "{}", self.name())?;
        match self {
            Instruction::LoadColumn { column, id, .. } | Instruction::LoadIndex { column, id, .. } => {
                write!(f, " col={} id={}", column, id)?
            }
            Instruction::Compare { op, value, .. } | Instruction::IndexedCompare { op, value, .. } => {
                write!(f, " {} {}", op.symbol(), value)?
            }
            Instruction::MatchPattern { pattern, .. } => write!(f, " {}", pattern)?,
            Instruction::CompareColumns { op, .. } => write!(f, " {}", op.symbol())?,
            Instruction::LimitRows { offset, limit, .. } => write!(f, " offset={} limit={:?}", offset, limit)?,
            Instruction::Aggregate { func, .. } => write!(f, " {:?}", func)?,
            _ => {}
        }
        write!(f, " [{}]", regs.join(", "))
    }
}

/// Name and kind of one output column of a program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputColumn {
    pub name: String,
    pub ty: ColumnType,
}

/// A finished, immutable program. Safe to share between threads and to run
/// any number of times against the dataframe it was compiled for.
#[derive(Debug, Clone)]
pub struct Program {
    instructions: Vec<Instruction>,
    layout: RegisterLayout,
    outputs: Vec<OutputColumn>,
    row_count: usize,
}

impl Program {
    pub(crate) fn new(
        instructions: Vec<Instruction>,
        layout: RegisterLayout,
        outputs: Vec<OutputColumn>,
        row_count: usize,
    ) -> Self {
        Self { instructions, layout, outputs, row_count }
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn layout(&self) -> &RegisterLayout {
        &self.layout
    }

    pub fn register_count(&self) -> usize {
        self.layout.len()
    }

    pub fn outputs(&self) -> &[OutputColumn] {
        &self.outputs
    }

    /// Row count of the dataframe this program was compiled against.
    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn count_matching<F>(&self, pred: F) -> usize
    where
        F: Fn(&Instruction) -> bool,
    {
        self.instructions.iter().filter(|i| pred(i)).count()
    }

    pub fn count_named(&self, name: &str) -> usize {
        self.count_matching(|i| i.name() == name)
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "; {} registers, {} rows", self.layout.len(), self.row_count)?;
        for (pc, instr) in self.instructions.iter().enumerate() {
            writeln!(f, "{:>4}: {}", pc, instr)?;
        }
        Ok(())
    }
}
