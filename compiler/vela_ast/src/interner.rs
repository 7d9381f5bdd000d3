//! String interner for identifier storage.
//!
//! Provides O(1) interning and lookup behind a single `RwLock`. A front-end
//! session interns at most a few thousand identifiers, so one lock is
//! preferred over a sharded table.

// Arc is needed here for SharedInterner - the interner is shared between the
// AST context and every backend capability of a session.
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::Name;

/// A string interner shared across a compilation session.
pub type SharedInterner = Arc<StringInterner>;

struct InternerState {
    /// Map from string content to index.
    map: FxHashMap<&'static str, u32>,
    /// Storage for string contents, indexed by `Name::raw`.
    strings: Vec<&'static str>,
}

/// String interner with O(1) lookup and equality comparison.
///
/// Interned strings are leaked into `'static` storage; an interner lives for
/// the whole session, so the set of leaked strings is bounded by the source
/// being compiled.
pub struct StringInterner {
    state: RwLock<InternerState>,
}

impl StringInterner {
    /// Create an interner with the empty string pre-interned at index 0.
    pub fn new() -> Self {
        let mut state = InternerState {
            map: FxHashMap::default(),
            strings: Vec::with_capacity(64),
        };
        state.map.insert("", 0);
        state.strings.push("");
        StringInterner {
            state: RwLock::new(state),
        }
    }

    /// Intern a string, returning its stable [`Name`].
    pub fn intern(&self, text: &str) -> Name {
        {
            let state = self.state.read();
            if let Some(&idx) = state.map.get(text) {
                return Name::from_raw(idx);
            }
        }

        let mut state = self.state.write();
        // Re-check: another caller may have interned between the locks.
        if let Some(&idx) = state.map.get(text) {
            return Name::from_raw(idx);
        }
        let leaked: &'static str = Box::leak(text.to_owned().into_boxed_str());
        let idx = u32::try_from(state.strings.len())
            .unwrap_or_else(|_| panic!("interner exceeded {} strings", u32::MAX));
        state.strings.push(leaked);
        state.map.insert(leaked, idx);
        Name::from_raw(idx)
    }

    /// Resolve a [`Name`] back to its string content.
    ///
    /// Panics if `name` was not produced by this interner.
    pub fn resolve(&self, name: Name) -> &'static str {
        let state = self.state.read();
        let idx = name.raw() as usize;
        assert!(
            idx < state.strings.len(),
            "name {name:?} does not belong to this interner"
        );
        state.strings[idx]
    }

    /// Number of interned strings (including the pre-interned empty string).
    pub fn len(&self) -> usize {
        self.state.read().strings.len()
    }

    /// Always false: the empty string is pre-interned.
    pub fn is_empty(&self) -> bool {
        false
    }
}

impl Default for StringInterner {
    fn default() -> Self {
        StringInterner::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn intern_is_stable() {
        let interner = StringInterner::new();
        let a = interner.intern("superclass");
        let b = interner.intern("superclass");
        assert_eq!(a, b);
        assert_eq!(interner.resolve(a), "superclass");
    }

    #[test]
    fn distinct_strings_get_distinct_names() {
        let interner = StringInterner::new();
        let a = interner.intern("Foo");
        let b = interner.intern("Bar");
        assert_ne!(a, b);
    }

    #[test]
    fn empty_string_is_pre_interned() {
        let interner = StringInterner::new();
        assert_eq!(interner.intern(""), Name::EMPTY);
        assert_eq!(interner.len(), 1);
    }

    #[test]
    #[should_panic(expected = "does not belong to this interner")]
    fn foreign_name_panics() {
        let interner = StringInterner::new();
        let _ = interner.resolve(Name::from_raw(999));
    }
}
