//! Deduplicating type pool.
//!
//! `TyId` is the canonical type representation: a 32-bit index into the
//! session's [`TyPool`]. Primitive types have fixed indices for O(1) access
//! and type equality is O(1) index comparison.

use std::fmt;

use rustc_hash::FxHashMap;

use crate::DeclId;

/// A 32-bit index into the type pool.
///
/// Types are compared by index equality, not structural comparison.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
#[repr(transparent)]
pub struct TyId(u32);

impl TyId {
    // === Primitive types (indices 0-4) ===
    // Pre-interned at pool creation for O(1) access.

    /// The `Int` type (64-bit signed integer).
    pub const INT: Self = TyId(0);
    /// The `Bool` type.
    pub const BOOL: Self = TyId(1);
    /// The `String` type.
    pub const STRING: Self = TyId(2);
    /// The unit type.
    pub const UNIT: Self = TyId(3);
    /// The error type (placeholder after a reported error, propagates
    /// silently).
    pub const ERROR: Self = TyId(4);

    /// First index handed out for interned non-primitive types.
    pub const FIRST_DYNAMIC: u32 = 5;

    /// Create from a raw pool index.
    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        TyId(raw)
    }

    /// The raw pool index.
    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// True for the error placeholder type.
    #[inline]
    pub const fn is_error(self) -> bool {
        self.0 == Self::ERROR.0
    }
}

impl fmt::Debug for TyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            TyId::INT => write!(f, "TyId(Int)"),
            TyId::BOOL => write!(f, "TyId(Bool)"),
            TyId::STRING => write!(f, "TyId(String)"),
            TyId::UNIT => write!(f, "TyId(Unit)"),
            TyId::ERROR => write!(f, "TyId(Error)"),
            TyId(raw) => write!(f, "TyId({raw})"),
        }
    }
}

/// Structural data for one pooled type.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub enum TyData {
    Int,
    Bool,
    String,
    Unit,
    /// Placeholder after a reported error.
    Error,
    /// A nominal type: class, enum, protocol or associated type.
    Nominal(DeclId),
    /// A function type.
    Fn { params: Vec<TyId>, ret: TyId },
}

/// Deduplicating storage for types.
///
/// Interning the same [`TyData`] twice yields the same [`TyId`], which makes
/// signature comparison an index comparison.
#[derive(Debug)]
pub struct TyPool {
    items: Vec<TyData>,
    dedup: FxHashMap<TyData, TyId>,
}

impl TyPool {
    /// Create a pool with the primitive types pre-interned at their fixed
    /// indices.
    pub fn new() -> Self {
        let items = vec![
            TyData::Int,
            TyData::Bool,
            TyData::String,
            TyData::Unit,
            TyData::Error,
        ];
        let mut dedup = FxHashMap::default();
        for (idx, data) in items.iter().enumerate() {
            dedup.insert(data.clone(), TyId::from_raw(idx as u32));
        }
        debug_assert_eq!(items.len() as u32, TyId::FIRST_DYNAMIC);
        TyPool { items, dedup }
    }

    /// Intern a type, returning its canonical handle.
    pub fn intern(&mut self, data: TyData) -> TyId {
        if let Some(&id) = self.dedup.get(&data) {
            return id;
        }
        let raw = u32::try_from(self.items.len())
            .unwrap_or_else(|_| panic!("type pool exceeded {} entries", u32::MAX));
        let id = TyId::from_raw(raw);
        self.items.push(data.clone());
        self.dedup.insert(data, id);
        id
    }

    /// The structural data behind a handle.
    ///
    /// Panics if `id` was not produced by this pool.
    pub fn data(&self, id: TyId) -> &TyData {
        let idx = id.raw() as usize;
        assert!(idx < self.items.len(), "{id:?} does not belong to this pool");
        &self.items[idx]
    }

    /// Number of interned types.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Always false: primitives are pre-interned.
    pub fn is_empty(&self) -> bool {
        false
    }
}

impl Default for TyPool {
    fn default() -> Self {
        TyPool::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn primitives_have_fixed_indices() {
        let pool = TyPool::new();
        assert_eq!(pool.data(TyId::INT), &TyData::Int);
        assert_eq!(pool.data(TyId::BOOL), &TyData::Bool);
        assert_eq!(pool.data(TyId::STRING), &TyData::String);
        assert_eq!(pool.data(TyId::UNIT), &TyData::Unit);
        assert_eq!(pool.data(TyId::ERROR), &TyData::Error);
    }

    #[test]
    fn interning_deduplicates() {
        let mut pool = TyPool::new();
        let nominal = TyData::Nominal(DeclId::from_raw(3));
        let a = pool.intern(nominal.clone());
        let b = pool.intern(nominal);
        assert_eq!(a, b);
        assert_eq!(pool.len() as u32, TyId::FIRST_DYNAMIC + 1);
    }

    #[test]
    fn interning_a_primitive_returns_the_fixed_index() {
        let mut pool = TyPool::new();
        assert_eq!(pool.intern(TyData::Int), TyId::INT);
    }

    #[test]
    fn function_types_compare_by_handle() {
        let mut pool = TyPool::new();
        let f1 = pool.intern(TyData::Fn {
            params: vec![TyId::INT],
            ret: TyId::BOOL,
        });
        let f2 = pool.intern(TyData::Fn {
            params: vec![TyId::INT],
            ret: TyId::BOOL,
        });
        let g = pool.intern(TyData::Fn {
            params: vec![TyId::BOOL],
            ret: TyId::BOOL,
        });
        assert_eq!(f1, f2);
        assert_ne!(f1, g);
    }
}
