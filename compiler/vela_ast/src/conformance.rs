//! Protocol conformance records and witness tables.
//!
//! A [`NormalConformance`] binds a nominal type to a protocol. The record is
//! usable - referencable from other declarations, markable as used - in
//! every completion state; its witness tables may be populated entry by
//! entry (resolver path) or all at once (loader path), only when queried.

use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::resolve::ConformanceLoader;
use crate::{ConformanceId, ConformanceToken, DeclId, Span, TyId};

/// A reference to a conformance: either a concrete record, or the abstract
/// statement that some value of protocol type conforms.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum ConformanceRef {
    Concrete(ConformanceId),
    /// Conformance through a value of the protocol's own type; no concrete
    /// record exists.
    Abstract(DeclId),
}

/// Completion state of a conformance's witness tables.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum ConformanceState {
    /// Witness tables may be partially populated.
    Incomplete,
    /// The conformance loader is currently populating the tables.
    /// Observing this state from a new witness query is a resolution cycle.
    Completing,
    /// All witness data from the conformance's source is installed.
    Complete,
}

/// Pairing of a conformance loader with the opaque token locating one
/// conformance's witness data. Installed at construction, never reassigned.
pub struct ConformanceSource {
    loader: Arc<dyn ConformanceLoader>,
    token: ConformanceToken,
}

impl ConformanceSource {
    pub fn new(loader: Arc<dyn ConformanceLoader>, token: ConformanceToken) -> Self {
        ConformanceSource { loader, token }
    }

    #[inline]
    pub fn loader(&self) -> &Arc<dyn ConformanceLoader> {
        &self.loader
    }

    #[inline]
    pub fn token(&self) -> ConformanceToken {
        self.token
    }
}

impl fmt::Debug for ConformanceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConformanceSource")
            .field("token", &self.token)
            .finish_non_exhaustive()
    }
}

/// A (possibly not-yet-complete) binding of a nominal type to a protocol.
#[derive(Debug)]
pub struct NormalConformance {
    /// The protocol being conformed to.
    pub protocol: DeclId,
    /// The conforming nominal.
    pub conforming: DeclId,
    /// The context that declares the conformance: the nominal itself or one
    /// of its extensions.
    pub context: DeclId,
    /// Location of the conformance clause entry.
    pub span: Span,
    /// Associated-type requirement -> satisfying type.
    pub type_witnesses: FxHashMap<DeclId, TyId>,
    /// Value requirement -> satisfying declaration. An entry holding `None`
    /// records that resolution ran and found no witness (diagnosed
    /// elsewhere); a missing entry means the requirement was never forced.
    pub witnesses: FxHashMap<DeclId, Option<DeclId>>,
    /// Contexts that referenced this conformance, recorded independently of
    /// completion.
    used_from: Vec<DeclId>,
    state: ConformanceState,
    source: Option<ConformanceSource>,
}

impl NormalConformance {
    /// A conformance built from live syntax; no loader is involved.
    pub fn new(protocol: DeclId, conforming: DeclId, context: DeclId, span: Span) -> Self {
        NormalConformance {
            protocol,
            conforming,
            context,
            span,
            type_witnesses: FxHashMap::default(),
            witnesses: FxHashMap::default(),
            used_from: Vec::new(),
            state: ConformanceState::Incomplete,
            source: None,
        }
    }

    /// A conformance whose witness tables live behind a loader.
    pub fn with_source(
        protocol: DeclId,
        conforming: DeclId,
        context: DeclId,
        span: Span,
        source: ConformanceSource,
    ) -> Self {
        let mut conformance = NormalConformance::new(protocol, conforming, context, span);
        conformance.source = Some(source);
        conformance
    }

    #[inline]
    pub fn state(&self) -> ConformanceState {
        self.state
    }

    #[inline]
    pub fn source(&self) -> Option<&ConformanceSource> {
        self.source.as_ref()
    }

    /// Contexts that referenced this conformance.
    #[inline]
    pub fn used_from(&self) -> &[DeclId] {
        &self.used_from
    }

    /// Record a referencing context, independent of completion state.
    pub fn mark_used_from(&mut self, context: DeclId) {
        if !self.used_from.contains(&context) {
            self.used_from.push(context);
        }
    }

    pub(crate) fn begin_completion(&mut self) {
        match self.state {
            ConformanceState::Incomplete => self.state = ConformanceState::Completing,
            ConformanceState::Completing => {
                panic!("circular resolution: conformance completion depends on itself")
            }
            ConformanceState::Complete => {
                panic!("re-completion of an already complete conformance")
            }
        }
    }

    pub(crate) fn finish_completion(&mut self) {
        debug_assert_eq!(self.state, ConformanceState::Completing);
        self.state = ConformanceState::Complete;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn conformance() -> NormalConformance {
        NormalConformance::new(
            DeclId::from_raw(0),
            DeclId::from_raw(1),
            DeclId::from_raw(1),
            Span::DUMMY,
        )
    }

    #[test]
    fn usage_is_recorded_while_incomplete() {
        let mut c = conformance();
        assert_eq!(c.state(), ConformanceState::Incomplete);
        c.mark_used_from(DeclId::from_raw(9));
        c.mark_used_from(DeclId::from_raw(9));
        c.mark_used_from(DeclId::from_raw(10));
        assert_eq!(c.used_from(), &[DeclId::from_raw(9), DeclId::from_raw(10)]);
        // Recording usage never advances completion.
        assert_eq!(c.state(), ConformanceState::Incomplete);
    }

    #[test]
    fn completion_state_machine() {
        let mut c = conformance();
        c.begin_completion();
        assert_eq!(c.state(), ConformanceState::Completing);
        c.finish_completion();
        assert_eq!(c.state(), ConformanceState::Complete);
    }

    #[test]
    #[should_panic(expected = "conformance completion depends on itself")]
    fn reentrant_completion_panics() {
        let mut c = conformance();
        c.begin_completion();
        c.begin_completion();
    }
}
