//! The lazy resolution boundary: backend capability traits.
//!
//! Three narrow capabilities decouple the AST from the systems that compute
//! semantic facts:
//!
//! - [`Resolver`] - completes one fact about one node per call, synchronously
//!   (implemented by the type checker against live syntax)
//! - [`MemberLoader`] - materializes the contents of a context from its
//!   opaque tokens (implemented by the module reader against serialized data)
//! - [`ConformanceLoader`] - completes one conformance's witness tables
//!
//! Capability objects are shared, read-mostly and injected per compilation
//! session; they must not keep node-specific mutable state between calls.
//! All per-node state lives in the node's own slots and records.

use smallvec::SmallVec;

use crate::{AstContext, ConformanceId, ConformanceRef, ConformanceToken, DeclId, DeclToken};
use crate::{GenericEnvId, GenericEnvToken, MemberToken, Name, Span, TyId};

/// One protocol named in an extension's conformance clause, with the source
/// position of the clause entry.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct ConformanceConstructionEntry {
    pub span: Span,
    pub protocol: DeclId,
}

/// Result of a named-member query against a loader.
///
/// `Unsupported` (the loader cannot answer narrow queries for this context)
/// is deliberately distinct from `Empty` (the loader answered: no member of
/// that name exists). Callers fall back to a full member load plus filter on
/// `Unsupported` only.
#[derive(Clone, Eq, PartialEq, Debug)]
pub enum NamedMembers {
    /// Named lookup is not available for this loader or context.
    Unsupported,
    /// Named lookup succeeded and found nothing.
    Empty,
    /// Named lookup succeeded with at least one match.
    Found(Vec<DeclId>),
}

impl NamedMembers {
    /// Wrap a successful lookup result, normalizing zero matches to
    /// [`NamedMembers::Empty`].
    pub fn from_members(members: Vec<DeclId>) -> Self {
        if members.is_empty() {
            NamedMembers::Empty
        } else {
            NamedMembers::Found(members)
        }
    }

    #[inline]
    pub fn is_unsupported(&self) -> bool {
        matches!(self, NamedMembers::Unsupported)
    }
}

/// Capability that completes one semantic fact about one node per call.
///
/// Every method either establishes the fact (possibly as an explicit
/// "absent" value) before returning, or panics on a contract violation; a
/// resolver is never permitted to return with the fact still unset.
/// Established facts are cached on the node, so calling any method
/// redundantly is safe and cheap.
pub trait Resolver {
    /// Establish the node's type/signature from its syntactic form.
    ///
    /// Performs only the consistency checks needed to assign a type, not
    /// full checking.
    fn resolve_decl_signature(&self, ctx: &mut AstContext, decl: DeclId);

    /// Assign an access level. Independent of signature resolution; may run
    /// before or after it.
    fn resolve_access(&self, ctx: &mut AstContext, decl: DeclId);

    /// Determine which ancestor declaration, if any, this node overrides.
    ///
    /// May recursively trigger signature resolution on override candidates.
    fn resolve_overridden(&self, ctx: &mut AstContext, decl: DeclId);

    /// Compute the host-runtime bridging bit.
    ///
    /// Isolated so that checking it never forces signature or override
    /// resolution beyond what its own rule requires.
    fn resolve_is_bridged(&self, ctx: &mut AstContext, decl: DeclId);

    /// The resolved superclass of a class or protocol.
    ///
    /// Absence is a valid, cacheable answer, not an error.
    fn superclass(&self, ctx: &mut AstContext, decl: DeclId) -> Option<TyId>;

    /// The resolved underlying raw type of an enum, absent if none declared.
    fn raw_type(&self, ctx: &mut AstContext, decl: DeclId) -> Option<TyId>;

    /// Resolve one entry of an inheritance/conformance clause by position.
    ///
    /// `index` must be within the number of syntactic entries; an
    /// out-of-range index is a programming error and panics.
    fn inherited_type(&self, ctx: &mut AstContext, decl: DeclId, index: usize) -> TyId;

    /// Resolve the constraints written after a protocol body, in place on
    /// the node.
    fn resolve_trailing_where(&self, ctx: &mut AstContext, proto: DeclId);

    /// Associate an extension with the nominal type it extends.
    ///
    /// Must run before any member of the extension is treated as a member
    /// of that type. Idempotent.
    fn bind_extension(&self, ctx: &mut AstContext, ext: DeclId);

    /// Fully resolve the extension's applicability (extended type and
    /// generic requirements) so its members can be iterated as first-class
    /// members of the target type.
    fn resolve_extension(&self, ctx: &mut AstContext, ext: DeclId);

    /// Resolve only which protocols the extension's conformance clause
    /// names, with source positions.
    ///
    /// A partial resolution: conformance construction must enumerate
    /// protocols before full extension resolution is safe to run.
    fn extension_conformance_protocols(
        &self,
        ctx: &mut AstContext,
        ext: DeclId,
    ) -> SmallVec<[ConformanceConstructionEntry; 4]>;

    /// Synthesize any implicitly-declared constructors of the nominal.
    fn resolve_implicit_constructors(&self, ctx: &mut AstContext, nominal: DeclId);

    /// Synthesize the implicitly-generated member with the given name.
    ///
    /// Safe to call when no implicit member of that name exists: a no-op,
    /// not an error.
    fn resolve_implicit_member(&self, ctx: &mut AstContext, nominal: DeclId, name: Name);

    /// Complete one type-witness entry of a conformance.
    ///
    /// `assoc` must be a requirement of the conformance's protocol; that is
    /// the caller's contract.
    fn resolve_type_witness(&self, ctx: &mut AstContext, conformance: ConformanceId, assoc: DeclId);

    /// Complete one value-witness entry of a conformance.
    ///
    /// `requirement` must belong to the conformance's protocol; that is the
    /// caller's contract.
    fn resolve_witness(
        &self,
        ctx: &mut AstContext,
        conformance: ConformanceId,
        requirement: DeclId,
    );

    /// Record that a conformance was referenced from the given context.
    ///
    /// Usage tracking and resolution are orthogonal: this must work for
    /// conformances that are not yet complete, and must never force
    /// completion as a side effect.
    fn mark_conformance_used(&self, ctx: &mut AstContext, conformance: ConformanceRef, from: DeclId);
}

/// Capability that materializes the contents of a context from its stored
/// representation, keyed by the opaque tokens installed in the context's
/// record.
pub trait MemberLoader {
    /// Reconstruct the complete member set of `decl`.
    ///
    /// The returned declarations are allocated in `ctx` but not attached;
    /// the caller installs them. Backend failures surface as an empty list.
    fn load_all_members(
        &self,
        ctx: &mut AstContext,
        decl: DeclId,
        token: MemberToken,
    ) -> Vec<DeclId>;

    /// Reconstruct the subset of members matching `name`, or report that
    /// narrow lookup is unsupported for this loader/context.
    fn load_named_members(
        &self,
        ctx: &mut AstContext,
        decl: DeclId,
        name: Name,
        token: MemberToken,
    ) -> NamedMembers;

    /// Reconstruct the conformance records of `decl` into `out`.
    ///
    /// Fetch only: the implementation must not attach the records to the
    /// node - the caller controls installation order and deduplication.
    fn load_all_conformances(
        &self,
        ctx: &mut AstContext,
        decl: DeclId,
        token: ConformanceToken,
        out: &mut Vec<ConformanceId>,
    );

    /// The declared default type of an associated-type requirement, absent
    /// if none was declared.
    fn load_associated_type_default(
        &self,
        ctx: &mut AstContext,
        assoc: DeclId,
        token: DeclToken,
    ) -> Option<TyId>;

    /// Reconstruct the generic environment of a generic context.
    fn load_generic_environment(
        &self,
        ctx: &mut AstContext,
        decl: DeclId,
        token: GenericEnvToken,
    ) -> Option<GenericEnvId>;
}

/// Capability that completes exactly one conformance's witness tables from
/// its opaque token.
pub trait ConformanceLoader {
    /// Populate the witness tables of `conformance`.
    ///
    /// Invoked lazily the first time any witness of the conformance is
    /// queried while its record still carries a source.
    fn finish_conformance(
        &self,
        ctx: &mut AstContext,
        conformance: ConformanceId,
        token: ConformanceToken,
    );
}
