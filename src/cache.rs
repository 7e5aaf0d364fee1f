//! Cache module: identity-keyed register memoization for one compile session.
//!
//! Wraps `BytecodeBuilder::allocate_register` with a map keyed by
//! (register kind, object identity), so every operator that touches the same
//! column or index gets the same register and the load is emitted once.
//!
//! The cache is only correct while each cached identity keeps denoting the
//! same object. `ObjectId`s are never reused, but a cache must still be
//! cleared (or dropped) before its builder is used for an unrelated plan.

use crate::builder::BytecodeBuilder;
use crate::column::ObjectId;
use crate::registers::{RegisterKind, RegisterType, RwHandle};
use crate::Result;
use ahash::AHashMap;
use std::fmt;

/// Result of `RegisterCache::get_or_allocate`.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct CachedRegister<T> {
    pub reg: RwHandle<T>,
    /// True only when the register was allocated by this call.
    pub inserted: bool,
}

impl<T: RegisterType> fmt::Debug for CachedRegister<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedRegister")
            .field("reg", &self.reg)
            .field("inserted", &self.inserted)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct CacheKey {
    kind: RegisterKind,
    object: ObjectId,
}

/// Borrows the builder for the duration of a compile session; it cannot
/// outlive it.
#[derive(Debug)]
pub struct RegisterCache<'b> {
    builder: &'b mut BytecodeBuilder,
    entries: AHashMap<CacheKey, u32>,
    hits: usize,
}

impl<'b> RegisterCache<'b> {
    pub fn new(builder: &'b mut BytecodeBuilder) -> Self {
        Self {
            builder,
            entries: AHashMap::new(),
            hits: 0,
        }
    }

    /// Returns the register cached for `(T::KIND, object)`, allocating one
    /// through the builder on first request.
    pub fn get_or_allocate<T: RegisterType>(&mut self, object: ObjectId) -> Result<CachedRegister<T>> {
        let key = CacheKey { kind: T::KIND, object };
        if let Some(&index) = self.entries.get(&key) {
            self.hits += 1;
            return Ok(CachedRegister { reg: RwHandle::new(index), inserted: false });
        }
        let reg = self.builder.allocate_register::<T>()?;
        self.entries.insert(key, reg.index);
        Ok(CachedRegister { reg, inserted: true })
    }

    /// Forgets every cached register. Programs already finalized are not
    /// affected.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.hits = 0;
    }

    pub fn builder(&mut self) -> &mut BytecodeBuilder {
        self.builder
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of lookups answered from the cache since creation or `clear`.
    pub fn hits(&self) -> usize {
        self.hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::{ColumnRef, IndexRef};

    #[test]
    fn test_get_or_allocate_is_idempotent() {
        let mut builder = BytecodeBuilder::default();
        let mut cache = RegisterCache::new(&mut builder);
        let id = ObjectId::next();
        let first = cache.get_or_allocate::<ColumnRef>(id).unwrap();
        let second = cache.get_or_allocate::<ColumnRef>(id).unwrap();
        let third = cache.get_or_allocate::<ColumnRef>(id).unwrap();
        assert!(first.inserted);
        assert!(!second.inserted);
        assert!(!third.inserted);
        assert_eq!(first.reg, second.reg);
        assert_eq!(first.reg, third.reg);
        assert_eq!(cache.hits(), 2);
        assert_eq!(cache.builder().register_count(), 1);
    }

    #[test]
    fn test_distinct_identities_get_distinct_registers() {
        let mut builder = BytecodeBuilder::default();
        let mut cache = RegisterCache::new(&mut builder);
        let a = cache.get_or_allocate::<ColumnRef>(ObjectId::next()).unwrap();
        let b = cache.get_or_allocate::<ColumnRef>(ObjectId::next()).unwrap();
        assert!(a.inserted && b.inserted);
        assert_ne!(a.reg, b.reg);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_kind_is_part_of_the_key() {
        let mut builder = BytecodeBuilder::default();
        let mut cache = RegisterCache::new(&mut builder);
        let id = ObjectId::next();
        let col = cache.get_or_allocate::<ColumnRef>(id).unwrap();
        let idx = cache.get_or_allocate::<IndexRef>(id).unwrap();
        assert!(idx.inserted);
        assert_ne!(col.reg.index, idx.reg.index);
    }

    #[test]
    fn test_clear_resets_state() {
        let mut builder = BytecodeBuilder::default();
        let mut cache = RegisterCache::new(&mut builder);
        let id = ObjectId::next();
        let before = cache.get_or_allocate::<ColumnRef>(id).unwrap();
        cache.clear();
        assert!(cache.is_empty());
        let after = cache.get_or_allocate::<ColumnRef>(id).unwrap();
        assert!(after.inserted);
        assert_ne!(before.reg, after.reg);
    }

    #[test]
    fn test_builder_ceiling_propagates() {
        let mut builder = BytecodeBuilder::new(1);
        let mut cache = RegisterCache::new(&mut builder);
        cache.get_or_allocate::<ColumnRef>(ObjectId::next()).unwrap();
        assert!(cache.get_or_allocate::<ColumnRef>(ObjectId::next()).is_err());
    }
}
