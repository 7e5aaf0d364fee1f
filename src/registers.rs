//! Registers module: register kinds, typed handles and the register file.
//!
//! A handle's kind is part of its type, so an instruction that reads a
//! `ReadHandle<Selection>` can only ever be given a selection register. The
//! register file checks kinds again at runtime, catching programs that were
//! assembled by hand or corrupted.

use crate::bitmap::Bitmap;
use crate::column::Column;
use crate::index::Index;
use crate::types::Value;
use crate::{Result, TraceframeError};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use serde::{Serialize, Deserialize};

/// The closed set of register kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegisterKind {
    RowList,
    Selection,
    Scalar,
    ColumnRef,
    IndexRef,
    Batch,
}

/// Runtime contents of one register slot.
#[derive(Debug, Default)]
pub enum RegisterValue {
    #[default]
    Empty,
    RowList(Vec<u32>),
    Selection(Bitmap),
    Scalar(Value),
    ColumnRef(Arc<Column>),
    IndexRef(Arc<Index>),
    Batch(Vec<Column>),
}

impl RegisterValue {
    pub fn kind(&self) -> Option<RegisterKind> {
        match self {
            RegisterValue::Empty => None,
            RegisterValue::RowList(_) => Some(RegisterKind::RowList),
            RegisterValue::Selection(_) => Some(RegisterKind::Selection),
            RegisterValue::Scalar(_) => Some(RegisterKind::Scalar),
            RegisterValue::ColumnRef(_) => Some(RegisterKind::ColumnRef),
            RegisterValue::IndexRef(_) => Some(RegisterKind::IndexRef),
            RegisterValue::Batch(_) => Some(RegisterKind::Batch),
        }
    }
}

/// Implemented by the marker type of each register kind.
pub trait RegisterType: 'static {
    const KIND: RegisterKind;
    type Value;

    fn wrap(value: Self::Value) -> RegisterValue;
    fn as_ref(slot: &RegisterValue) -> Option<&Self::Value>;
    fn as_mut(slot: &mut RegisterValue) -> Option<&mut Self::Value>;
    /// Moves the payload out, handing the slot back on a kind mismatch.
    fn unwrap(slot: RegisterValue) -> std::result::Result<Self::Value, RegisterValue>;
}

macro_rules! register_types {
    ($( $(#[$meta:meta])* $name:ident => $variant:ident($value:ty) ),* $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq)]
            pub enum $name {}

            impl RegisterType for $name {
                const KIND: RegisterKind = RegisterKind::$variant;
                type Value = $value;

                fn wrap(value: $value) -> RegisterValue {
                    RegisterValue::$variant(value)
                }

                fn as_ref(slot: &RegisterValue) -> Option<&$value> {
                    match slot {
                        RegisterValue::$variant(v) => Some(v),
                        _ => None,
                    }
                }

                fn as_mut(slot: &mut RegisterValue) -> Option<&mut $value> {
                    match slot {
                        RegisterValue::$variant(v) => Some(v),
                        _ => None,
                    }
                }

                fn unwrap(slot: RegisterValue) -> std::result::Result<$value, RegisterValue> {
                    match slot {
                        RegisterValue::$variant(v) => Ok(v),
                        other => Err(other),
                    }
                }
            }
        )*
    };
}

register_types! {
    /// Ordered list of row ids.
    RowList => RowList(Vec<u32>),
    /// One bit per dataframe row.
    Selection => Selection(Bitmap),
    Scalar => Scalar(Value),
    ColumnRef => ColumnRef(Arc<Column>),
    IndexRef => IndexRef(Arc<Index>),
    /// Materialized output columns.
    Batch => Batch(Vec<Column>),
}

/// A handle that may be written. Returned by register allocation.
pub struct RwHandle<T> {
    pub index: u32,
    _marker: PhantomData<fn() -> T>,
}

/// A read-only view of a register.
pub struct ReadHandle<T> {
    pub index: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T: RegisterType> RwHandle<T> {
    pub(crate) fn new(index: u32) -> Self {
        Self { index, _marker: PhantomData }
    }

    pub fn read(self) -> ReadHandle<T> {
        ReadHandle::new(self.index)
    }

    pub fn kind(&self) -> RegisterKind {
        T::KIND
    }
}

impl<T: RegisterType> ReadHandle<T> {
    pub(crate) fn new(index: u32) -> Self {
        Self { index, _marker: PhantomData }
    }

    pub fn kind(&self) -> RegisterKind {
        T::KIND
    }
}

impl<T: RegisterType> From<RwHandle<T>> for ReadHandle<T> {
    fn from(h: RwHandle<T>) -> Self {
        h.read()
    }
}

// Manual impls: derives would demand the bounds on the marker type.
macro_rules! handle_impls {
    ($handle:ident, $prefix:literal) => {
        impl<T> Clone for $handle<T> {
            fn clone(&self) -> Self {
                *self
            }
        }

        impl<T> Copy for $handle<T> {}

        impl<T> PartialEq for $handle<T> {
            fn eq(&self, other: &Self) -> bool {
                self.index == other.index
            }
        }

        impl<T> Eq for $handle<T> {}

        impl<T> std::hash::Hash for $handle<T> {
            fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
                self.index.hash(state)
            }
        }

        impl<T: RegisterType> fmt::Debug for $handle<T> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}{:?}#{}", $prefix, T::KIND, self.index)
            }
        }

        impl<T: RegisterType> fmt::Display for $handle<T> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "r{}", self.index)
            }
        }
    };
}

handle_impls!(RwHandle, "rw:");
handle_impls!(ReadHandle, "r:");

/// The shape of a register file: the kind of each register, in allocation
/// order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterLayout {
    kinds: Vec<RegisterKind>,
}

impl RegisterLayout {
    pub(crate) fn push(&mut self, kind: RegisterKind) -> u32 {
        self.kinds.push(kind);
        (self.kinds.len() - 1) as u32
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    pub fn kind(&self, index: u32) -> Option<RegisterKind> {
        self.kinds.get(index as usize).copied()
    }

    pub fn count_of(&self, kind: RegisterKind) -> usize {
        self.kinds.iter().filter(|k| **k == kind).count()
    }

    pub fn kinds(&self) -> &[RegisterKind] {
        &self.kinds
    }
}

/// Runtime register storage for one program execution.
#[derive(Debug)]
pub struct RegisterFile {
    slots: Vec<RegisterValue>,
}

impl RegisterFile {
    pub fn new(layout: &RegisterLayout) -> Self {
        let mut slots = Vec::with_capacity(layout.len());
        slots.resize_with(layout.len(), RegisterValue::default);
        Self { slots }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn write<T: RegisterType>(&mut self, handle: RwHandle<T>, value: T::Value) -> Result<()> {
        let slot = self.slot_mut(handle.index)?;
        *slot = T::wrap(value);
        Ok(())
    }

    pub fn read<T: RegisterType>(&self, handle: ReadHandle<T>) -> Result<&T::Value> {
        let slot = self.slots.get(handle.index as usize).ok_or_else(|| out_of_range(handle.index))?;
        T::as_ref(slot).ok_or_else(|| kind_mismatch(handle.index, T::KIND, slot.kind()))
    }

    pub fn get_mut<T: RegisterType>(&mut self, handle: RwHandle<T>) -> Result<&mut T::Value> {
        let slot = self.slot_mut(handle.index)?;
        let found = slot.kind();
        T::as_mut(slot).ok_or_else(|| kind_mismatch(handle.index, T::KIND, found))
    }

    /// Moves the value out, leaving the slot empty.
    pub fn take<T: RegisterType>(&mut self, handle: RwHandle<T>) -> Result<T::Value> {
        let slot = self.slot_mut(handle.index)?;
        match T::unwrap(std::mem::take(slot)) {
            Ok(value) => Ok(value),
            Err(other) => {
                let found = other.kind();
                *slot = other;
                Err(kind_mismatch(handle.index, T::KIND, found))
            }
        }
    }

    fn slot_mut(&mut self, index: u32) -> Result<&mut RegisterValue> {
        self.slots.get_mut(index as usize).ok_or_else(|| out_of_range(index))
    }
}

fn out_of_range(index: u32) -> TraceframeError {
    TraceframeError::ExecutionError(format!("register r{} is outside the register file", index))
}

fn kind_mismatch(index: u32, expected: RegisterKind, found: Option<RegisterKind>) -> TraceframeError {
    TraceframeError::ExecutionError(format!(
        "register r{} holds {:?}, expected {:?}",
        index, found, expected
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> RegisterLayout {
        let mut layout = RegisterLayout::default();
        layout.push(RegisterKind::Selection);
        layout.push(RegisterKind::RowList);
        layout.push(RegisterKind::Scalar);
        layout
    }

    #[test]
    fn test_layout_shape() {
        let layout = layout();
        assert_eq!(layout.len(), 3);
        assert_eq!(layout.kind(1), Some(RegisterKind::RowList));
        assert_eq!(layout.kind(3), None);
        assert_eq!(layout.count_of(RegisterKind::Scalar), 1);
    }

    #[test]
    fn test_file_starts_empty() {
        let file = RegisterFile::new(&layout());
        assert_eq!(file.len(), 3);
        let res = file.read(ReadHandle::<Selection>::new(0));
        assert!(matches!(res, Err(TraceframeError::ExecutionError(_))));
    }

    #[test]
    fn test_write_read_take() {
        let mut file = RegisterFile::new(&layout());
        let rows = RwHandle::<RowList>::new(1);
        file.write(rows, vec![3, 1]).unwrap();
        assert_eq!(file.read(rows.read()).unwrap(), &vec![3, 1]);
        file.get_mut(rows).unwrap().push(7);
        assert_eq!(file.take(rows).unwrap(), vec![3, 1, 7]);
        assert!(file.read(rows.read()).is_err());
    }

    #[test]
    fn test_kind_mismatch_is_an_error() {
        let mut file = RegisterFile::new(&layout());
        file.write(RwHandle::<Scalar>::new(2), Value::Int(1)).unwrap();
        // A hand-built handle of the wrong kind.
        let bad = RwHandle::<RowList>::new(2);
        assert!(file.get_mut(bad).is_err());
        assert!(file.take(bad).is_err());
        // The slot survives a failed take.
        assert_eq!(file.read(ReadHandle::<Scalar>::new(2)).unwrap(), &Value::Int(1));
    }

    #[test]
    fn test_out_of_range() {
        let mut file = RegisterFile::new(&layout());
        assert!(file.write(RwHandle::<Scalar>::new(9), Value::Null).is_err());
    }

    #[test]
    fn test_handle_debug_names_kind() {
        let h = RwHandle::<Selection>::new(4);
        assert_eq!(format!("{:?}", h), "rw:Selection#4");
        assert_eq!(format!("{}", h.read()), "r4");
    }
}
