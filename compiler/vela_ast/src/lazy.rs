//! Lazy fact slots and context-data records.
//!
//! A semantic fact that can be deferred lives in a [`LazySlot`]: a write-once
//! cell with an explicit in-progress state that doubles as the re-entrancy
//! guard. Deferred *contents* (members, conformances, generic environments)
//! instead live behind a context-data record: a non-owning reference to the
//! loader responsible for the node plus opaque tokens that only that loader
//! may decode.
//!
//! Tokens are plain 64-bit values to the AST layer - typically a record
//! index or byte offset into the loader's serialized data. Each concern gets
//! its own token newtype so a token can never be fed to the wrong query.

use std::fmt;
use std::sync::Arc;

use crate::resolve::MemberLoader;

/// A write-once slot for a lazily resolved fact.
///
/// State machine: `Unresolved -> InProgress -> Resolved`. Entering
/// resolution twice, or resolving twice, is a caller contract violation and
/// panics. "Absent but valid" answers are modeled as `Resolved(None)` of a
/// `LazySlot<Option<T>>`, never by staying unresolved.
#[derive(Debug, Default)]
pub enum LazySlot<T> {
    /// Resolution has not been requested yet.
    #[default]
    Unresolved,
    /// Resolution is currently executing. Observing this state from a new
    /// query means the fact depends on itself.
    InProgress,
    /// The fact is permanently available.
    Resolved(T),
}

impl<T> LazySlot<T> {
    /// The resolved value, if resolution has completed.
    #[inline]
    pub fn get(&self) -> Option<&T> {
        match self {
            LazySlot::Resolved(value) => Some(value),
            _ => None,
        }
    }

    #[inline]
    pub fn is_resolved(&self) -> bool {
        matches!(self, LazySlot::Resolved(_))
    }

    #[inline]
    pub fn is_in_progress(&self) -> bool {
        matches!(self, LazySlot::InProgress)
    }

    #[inline]
    pub fn is_unresolved(&self) -> bool {
        matches!(self, LazySlot::Unresolved)
    }

    /// Mark resolution of this fact as in progress.
    ///
    /// Panics on re-entry: a fact whose resolution triggers a query of the
    /// same fact on the same node is a resolution cycle, and cycles are
    /// contract violations rather than recoverable conditions.
    pub fn begin(&mut self, what: &str) {
        match self {
            LazySlot::Unresolved => *self = LazySlot::InProgress,
            LazySlot::InProgress => {
                panic!("circular resolution: {what} depends on itself")
            }
            LazySlot::Resolved(_) => {
                panic!("re-resolution of already resolved {what}")
            }
        }
    }

    /// Store the resolved value.
    ///
    /// Valid from `InProgress` (guarded resolution) or directly from
    /// `Unresolved` (single-step facts that cannot recurse). Panics if the
    /// fact was already resolved: facts are write-once.
    pub fn fulfill(&mut self, value: T, what: &str) {
        match self {
            LazySlot::Unresolved | LazySlot::InProgress => *self = LazySlot::Resolved(value),
            LazySlot::Resolved(_) => {
                panic!("re-resolution of already resolved {what}")
            }
        }
    }

    /// The resolved value; panics with a backend-blaming message otherwise.
    ///
    /// Used by accessors after invoking a capability: a resolver that
    /// returns without establishing the fact has broken the boundary
    /// contract.
    pub fn expect_resolved(&self, what: &str) -> &T {
        match self {
            LazySlot::Resolved(value) => value,
            _ => panic!("resolver returned without establishing {what}"),
        }
    }
}

// ── Opaque tokens ───────────────────────────────────────────────────

/// Opaque per-declaration token, decoded only by the paired loader.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
#[repr(transparent)]
pub struct DeclToken(u64);

impl DeclToken {
    #[inline]
    pub const fn new(raw: u64) -> Self {
        DeclToken(raw)
    }

    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Opaque token locating a context's generic environment.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
#[repr(transparent)]
pub struct GenericEnvToken(u64);

impl GenericEnvToken {
    #[inline]
    pub const fn new(raw: u64) -> Self {
        GenericEnvToken(raw)
    }

    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Opaque token locating a context's member list.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
#[repr(transparent)]
pub struct MemberToken(u64);

impl MemberToken {
    #[inline]
    pub const fn new(raw: u64) -> Self {
        MemberToken(raw)
    }

    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Opaque token locating a context's conformance list, or one conformance's
/// witness table.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
#[repr(transparent)]
pub struct ConformanceToken(u64);

impl ConformanceToken {
    #[inline]
    pub const fn new(raw: u64) -> Self {
        ConformanceToken(raw)
    }

    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

// ── Context-data records ────────────────────────────────────────────

/// Context data for a lazily loaded declaration.
///
/// Pairs the loader responsible for the declaration with the opaque token
/// that locates the declaration in the loader's data. Loader and token are
/// installed together at construction and never reassigned; the AST layer
/// never interprets the token.
pub struct ContextData {
    loader: Arc<dyn MemberLoader>,
    token: DeclToken,
}

impl ContextData {
    pub fn new(loader: Arc<dyn MemberLoader>, token: DeclToken) -> Self {
        ContextData { loader, token }
    }

    /// The loader this record was constructed with.
    #[inline]
    pub fn loader(&self) -> &Arc<dyn MemberLoader> {
        &self.loader
    }

    #[inline]
    pub fn token(&self) -> DeclToken {
        self.token
    }
}

impl fmt::Debug for ContextData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextData")
            .field("token", &self.token)
            .finish_non_exhaustive()
    }
}

/// Context data for generic contexts: adds the generic-environment token.
#[derive(Debug)]
pub struct GenericContextData {
    context: ContextData,
    generic_env: GenericEnvToken,
}

impl GenericContextData {
    pub fn new(context: ContextData, generic_env: GenericEnvToken) -> Self {
        GenericContextData {
            context,
            generic_env,
        }
    }

    #[inline]
    pub fn loader(&self) -> &Arc<dyn MemberLoader> {
        self.context.loader()
    }

    #[inline]
    pub fn decl_token(&self) -> DeclToken {
        self.context.token()
    }

    #[inline]
    pub fn generic_env_token(&self) -> GenericEnvToken {
        self.generic_env
    }
}

/// Context data for iterable contexts: adds member and conformance tokens.
///
/// Installed (at most once) on declarations whose contents were not built
/// from live syntax - the member and conformance lists materialize on first
/// query through the paired loader.
#[derive(Debug)]
pub struct IterableContextData {
    generic: GenericContextData,
    members: MemberToken,
    conformances: ConformanceToken,
}

impl IterableContextData {
    pub fn new(
        generic: GenericContextData,
        members: MemberToken,
        conformances: ConformanceToken,
    ) -> Self {
        IterableContextData {
            generic,
            members,
            conformances,
        }
    }

    #[inline]
    pub fn loader(&self) -> &Arc<dyn MemberLoader> {
        self.generic.loader()
    }

    #[inline]
    pub fn decl_token(&self) -> DeclToken {
        self.generic.decl_token()
    }

    #[inline]
    pub fn generic_env_token(&self) -> GenericEnvToken {
        self.generic.generic_env_token()
    }

    #[inline]
    pub fn members_token(&self) -> MemberToken {
        self.members
    }

    #[inline]
    pub fn conformances_token(&self) -> ConformanceToken {
        self.conformances
    }
}

#[cfg(test)]
mod tests;
