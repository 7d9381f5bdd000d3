//! Declaration nodes.
//!
//! A [`Decl`] is one named program construct: a nominal type, an extension,
//! an associated-type requirement or a value member. Declarations are stored
//! in the [`AstContext`](crate::AstContext) arena and reference each other by
//! [`DeclId`].
//!
//! Lazily resolved facts (signature, access, override, bridging bit,
//! superclass, raw type, associated-type default) live in [`LazySlot`]s on
//! the node. Lazily loaded *contents* (members, conformances, generic
//! environment) are controlled by a [`LoadState`] plus the node's installed
//! [`IterableContextData`] record.

use bitflags::bitflags;
use rustc_hash::FxHashMap;

use crate::{
    ConformanceId, DeclId, GenericEnvId, IterableContextData, LazySlot, Name, Span, TyId,
};

/// Access level of a declaration, from least to most visible.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub enum Access {
    Private,
    Internal,
    Public,
}

bitflags! {
    /// Per-declaration flag set.
    #[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
    pub struct DeclFlags: u8 {
        /// Synthesized by the compiler, not written in source.
        const IMPLICIT = 1 << 0;
        /// Carries a `@bridge` attribute (host-runtime bridging).
        const BRIDGE_ATTR = 1 << 1;
        /// Declared with the `override` keyword.
        const OVERRIDE = 1 << 2;
        /// Implicit constructors have been synthesized for this nominal.
        const IMPLICIT_CTORS_DONE = 1 << 3;
    }
}

/// An unresolved syntactic type reference.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub enum TypeRepr {
    /// A type spelled by name: `Int`, `Drawable`, `Shape`.
    Named(Name, Span),
    /// A function type: `(Int, Bool) -> String`.
    Fn {
        params: Vec<TypeRepr>,
        ret: Box<TypeRepr>,
        span: Span,
    },
}

impl TypeRepr {
    /// Source location of the reference.
    pub fn span(&self) -> Span {
        match self {
            TypeRepr::Named(_, span) => *span,
            TypeRepr::Fn { span, .. } => *span,
        }
    }
}

/// One entry of an inheritance/conformance clause, with its per-entry
/// resolution cache.
#[derive(Debug)]
pub struct InheritedEntry {
    pub repr: TypeRepr,
    pub span: Span,
    /// Resolved type, cached on first position-based query. Failed
    /// resolution caches the error type; `None` means not yet queried.
    pub resolved: Option<TyId>,
}

impl InheritedEntry {
    pub fn new(repr: TypeRepr) -> Self {
        let span = repr.span();
        InheritedEntry {
            repr,
            span,
            resolved: None,
        }
    }
}

/// Whether lazily loadable contents have been materialized.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum LoadState {
    /// Contents are present; queries never consult a loader.
    Complete,
    /// Contents live behind the node's context-data record.
    Pending,
}

/// Member list of an iterable context.
///
/// Contexts built from live syntax start [`LoadState::Complete`];
/// deserialized stubs start [`LoadState::Pending`] and flip to complete when
/// the full member list is installed. Named-subset queries answered by the
/// loader are cached per name so each name hits the backend at most once.
#[derive(Debug)]
pub struct MemberStorage {
    members: Vec<DeclId>,
    state: LoadState,
    named: FxHashMap<Name, Vec<DeclId>>,
}

impl MemberStorage {
    /// Storage for a context whose members came from syntax.
    pub fn parsed(members: Vec<DeclId>) -> Self {
        MemberStorage {
            members,
            state: LoadState::Complete,
            named: FxHashMap::default(),
        }
    }

    /// Storage for a context whose members will be loaded on demand.
    pub fn pending() -> Self {
        MemberStorage {
            members: Vec::new(),
            state: LoadState::Pending,
            named: FxHashMap::default(),
        }
    }

    #[inline]
    pub fn state(&self) -> LoadState {
        self.state
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        self.state() == LoadState::Complete
    }

    /// Members currently present, without consulting any loader.
    #[inline]
    pub fn installed(&self) -> &[DeclId] {
        &self.members
    }

    /// Append a member (parsing, synthesis, or lazy installation).
    pub fn push(&mut self, member: DeclId) {
        self.members.push(member);
    }

    /// Install the complete member list and mark the context loaded.
    pub fn install_loaded(&mut self, members: Vec<DeclId>) {
        debug_assert!(
            self.state == LoadState::Pending,
            "installing members on an already complete context"
        );
        self.members.extend(members);
        self.state = LoadState::Complete;
    }

    /// Cached result of a named-subset query, if one was answered before.
    pub fn cached_named(&self, name: Name) -> Option<&[DeclId]> {
        self.named.get(&name).map(Vec::as_slice)
    }

    /// Cache the result of a named-subset query.
    pub fn cache_named(&mut self, name: Name, members: Vec<DeclId>) {
        self.named.insert(name, members);
    }
}

/// Conformance records installed on a nominal.
#[derive(Debug)]
pub struct ConformanceStorage {
    ids: Vec<ConformanceId>,
    state: LoadState,
}

impl ConformanceStorage {
    pub fn parsed() -> Self {
        ConformanceStorage {
            ids: Vec::new(),
            state: LoadState::Complete,
        }
    }

    pub fn pending() -> Self {
        ConformanceStorage {
            ids: Vec::new(),
            state: LoadState::Pending,
        }
    }

    #[inline]
    pub fn state(&self) -> LoadState {
        self.state
    }

    #[inline]
    pub fn installed(&self) -> &[ConformanceId] {
        &self.ids
    }

    /// Attach a conformance record, skipping duplicates.
    pub fn install(&mut self, id: ConformanceId) {
        if !self.ids.contains(&id) {
            self.ids.push(id);
        }
    }

    pub fn mark_complete(&mut self) {
        self.state = LoadState::Complete;
    }
}

/// A generic requirement reconstructed for a context.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct Requirement {
    /// The constrained parameter.
    pub subject: Name,
    pub kind: RequirementKind,
    pub bound: TyId,
}

/// Kind of a generic requirement.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum RequirementKind {
    /// `T: SomeProtocol`
    Conforms,
    /// `T: SomeClass`
    Superclass,
    /// `T == SomeType`
    SameType,
}

/// Generic environment of a context: its parameters and requirements.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct GenericEnv {
    pub owner: DeclId,
    pub params: Vec<Name>,
    pub requirements: Vec<Requirement>,
}

/// One unresolved `where` constraint.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct WhereRepr {
    pub subject: Name,
    pub kind: RequirementKind,
    pub bound: TypeRepr,
    pub span: Span,
}

/// A function parameter.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct Param {
    pub name: Name,
    pub repr: TypeRepr,
    pub span: Span,
}

// ── Kind payloads ───────────────────────────────────────────────────

#[derive(Debug)]
pub struct ClassDecl {
    pub inherited: Vec<InheritedEntry>,
    pub members: MemberStorage,
    pub conformances: ConformanceStorage,
    /// Extensions bound to this class.
    pub extensions: Vec<DeclId>,
    /// Resolved superclass; `None` (inside the slot) is the cached "no
    /// superclass" answer.
    pub superclass: LazySlot<Option<TyId>>,
}

impl ClassDecl {
    pub fn new(inherited: Vec<InheritedEntry>, members: MemberStorage) -> Self {
        ClassDecl {
            inherited,
            members,
            conformances: ConformanceStorage::parsed(),
            extensions: Vec::new(),
            superclass: LazySlot::Unresolved,
        }
    }
}

#[derive(Debug)]
pub struct EnumDecl {
    pub inherited: Vec<InheritedEntry>,
    pub members: MemberStorage,
    pub conformances: ConformanceStorage,
    pub extensions: Vec<DeclId>,
    /// Resolved underlying raw type, absent if none declared.
    pub raw_type: LazySlot<Option<TyId>>,
}

impl EnumDecl {
    pub fn new(inherited: Vec<InheritedEntry>, members: MemberStorage) -> Self {
        EnumDecl {
            inherited,
            members,
            conformances: ConformanceStorage::parsed(),
            extensions: Vec::new(),
            raw_type: LazySlot::Unresolved,
        }
    }
}

#[derive(Debug)]
pub struct ProtocolDecl {
    pub inherited: Vec<InheritedEntry>,
    /// Requirement declarations.
    pub members: MemberStorage,
    pub extensions: Vec<DeclId>,
    /// Constraints written after the protocol body.
    pub where_reprs: Vec<WhereRepr>,
    /// Requirements resolved in place from `where_reprs`.
    pub resolved_where: Vec<Requirement>,
    pub where_resolved: bool,
    /// A protocol may constrain conformers to a class.
    pub superclass: LazySlot<Option<TyId>>,
}

impl ProtocolDecl {
    pub fn new(inherited: Vec<InheritedEntry>, members: MemberStorage) -> Self {
        ProtocolDecl {
            inherited,
            members,
            extensions: Vec::new(),
            where_reprs: Vec::new(),
            resolved_where: Vec::new(),
            where_resolved: false,
            superclass: LazySlot::Unresolved,
        }
    }
}

#[derive(Debug)]
pub struct ExtensionDecl {
    /// The syntactic reference to the extended type.
    pub extended_repr: TypeRepr,
    pub inherited: Vec<InheritedEntry>,
    pub members: MemberStorage,
    pub where_reprs: Vec<WhereRepr>,
    pub resolved_where: Vec<Requirement>,
    /// The nominal this extension is bound to. `None` (inside the slot) is
    /// the cached answer for an extension whose extended type did not
    /// resolve; such an extension stays unbound after diagnosis.
    pub extended: LazySlot<Option<DeclId>>,
    /// Whether the extension's applicability has been fully resolved.
    pub fully_resolved: bool,
}

impl ExtensionDecl {
    pub fn new(
        extended_repr: TypeRepr,
        inherited: Vec<InheritedEntry>,
        members: MemberStorage,
    ) -> Self {
        ExtensionDecl {
            extended_repr,
            inherited,
            members,
            where_reprs: Vec::new(),
            resolved_where: Vec::new(),
            extended: LazySlot::Unresolved,
            fully_resolved: false,
        }
    }
}

#[derive(Debug)]
pub struct AssocTypeDecl {
    /// Declared default, if the requirement has one.
    pub default_repr: Option<TypeRepr>,
    /// Resolved default type; `None` (inside the slot) means no default.
    pub default_ty: LazySlot<Option<TyId>>,
}

#[derive(Debug)]
pub struct TypeAliasDecl {
    pub repr: TypeRepr,
    pub aliased: LazySlot<TyId>,
}

#[derive(Debug)]
pub struct FuncDecl {
    pub params: Vec<Param>,
    /// Declared result type; `None` means unit.
    pub ret: Option<TypeRepr>,
}

#[derive(Debug)]
pub struct VarDecl {
    pub repr: Option<TypeRepr>,
}

#[derive(Debug)]
pub struct CtorDecl {
    pub params: Vec<Param>,
}

/// Kind-specific payload of a declaration.
#[derive(Debug)]
pub enum DeclKind {
    Class(ClassDecl),
    Enum(EnumDecl),
    Protocol(ProtocolDecl),
    Extension(ExtensionDecl),
    AssocType(AssocTypeDecl),
    TypeAlias(TypeAliasDecl),
    Func(FuncDecl),
    Var(VarDecl),
    Ctor(CtorDecl),
}

impl DeclKind {
    /// Human-readable kind name for messages.
    pub fn name(&self) -> &'static str {
        match self {
            DeclKind::Class(_) => "class",
            DeclKind::Enum(_) => "enum",
            DeclKind::Protocol(_) => "protocol",
            DeclKind::Extension(_) => "extension",
            DeclKind::AssocType(_) => "associated type",
            DeclKind::TypeAlias(_) => "type alias",
            DeclKind::Func(_) => "function",
            DeclKind::Var(_) => "variable",
            DeclKind::Ctor(_) => "constructor",
        }
    }
}

/// A declaration node.
#[derive(Debug)]
pub struct Decl {
    pub name: Name,
    pub span: Span,
    /// Containing context, if any.
    pub parent: Option<DeclId>,
    pub kind: DeclKind,
    pub flags: DeclFlags,
    /// Access keyword written in source, if any.
    pub declared_access: Option<Access>,
    /// Resolved access level.
    pub access: LazySlot<Access>,
    /// Resolved type/signature.
    pub signature: LazySlot<TyId>,
    /// The ancestor declaration this one overrides; `None` (inside the
    /// slot) is the cached "overrides nothing" answer.
    pub overridden: LazySlot<Option<DeclId>>,
    /// Whether the declaration is exposed to the host runtime bridge.
    pub bridged: LazySlot<bool>,
    /// Reconstructed generic environment, for deserialized generic
    /// contexts.
    pub generic_env: LazySlot<Option<GenericEnvId>>,
    /// Lazy-loading record; present only on deserialized contexts.
    lazy: Option<IterableContextData>,
}

impl Decl {
    /// Create a declaration with every lazy fact unresolved.
    pub fn new(name: Name, span: Span, kind: DeclKind) -> Self {
        Decl {
            name,
            span,
            parent: None,
            kind,
            flags: DeclFlags::empty(),
            declared_access: None,
            access: LazySlot::Unresolved,
            signature: LazySlot::Unresolved,
            overridden: LazySlot::Unresolved,
            bridged: LazySlot::Unresolved,
            generic_env: LazySlot::Unresolved,
            lazy: None,
        }
    }

    /// Attach the lazy-loading record. The association is made exactly once
    /// per node; reattaching is a contract violation.
    pub fn install_lazy_data(&mut self, data: IterableContextData) {
        assert!(
            self.lazy.is_none(),
            "context data installed twice on the same declaration"
        );
        self.lazy = Some(data);
    }

    /// The node's lazy-loading record, if one is installed.
    #[inline]
    pub fn lazy_data(&self) -> Option<&IterableContextData> {
        self.lazy.as_ref()
    }

    /// True for class, enum and protocol declarations.
    pub fn is_nominal(&self) -> bool {
        matches!(
            self.kind,
            DeclKind::Class(_) | DeclKind::Enum(_) | DeclKind::Protocol(_)
        )
    }

    /// The inheritance/conformance clause, for kinds that carry one.
    pub fn inherited_entries(&self) -> Option<&[InheritedEntry]> {
        match &self.kind {
            DeclKind::Class(c) => Some(&c.inherited),
            DeclKind::Enum(e) => Some(&e.inherited),
            DeclKind::Protocol(p) => Some(&p.inherited),
            DeclKind::Extension(x) => Some(&x.inherited),
            _ => None,
        }
    }

    pub fn inherited_entries_mut(&mut self) -> Option<&mut [InheritedEntry]> {
        match &mut self.kind {
            DeclKind::Class(c) => Some(&mut c.inherited),
            DeclKind::Enum(e) => Some(&mut e.inherited),
            DeclKind::Protocol(p) => Some(&mut p.inherited),
            DeclKind::Extension(x) => Some(&mut x.inherited),
            _ => None,
        }
    }

    /// Member storage, for iterable contexts.
    pub fn member_storage(&self) -> Option<&MemberStorage> {
        match &self.kind {
            DeclKind::Class(c) => Some(&c.members),
            DeclKind::Enum(e) => Some(&e.members),
            DeclKind::Protocol(p) => Some(&p.members),
            DeclKind::Extension(x) => Some(&x.members),
            _ => None,
        }
    }

    pub fn member_storage_mut(&mut self) -> Option<&mut MemberStorage> {
        match &mut self.kind {
            DeclKind::Class(c) => Some(&mut c.members),
            DeclKind::Enum(e) => Some(&mut e.members),
            DeclKind::Protocol(p) => Some(&mut p.members),
            DeclKind::Extension(x) => Some(&mut x.members),
            _ => None,
        }
    }

    /// Conformance storage, for kinds that can conform.
    pub fn conformance_storage(&self) -> Option<&ConformanceStorage> {
        match &self.kind {
            DeclKind::Class(c) => Some(&c.conformances),
            DeclKind::Enum(e) => Some(&e.conformances),
            _ => None,
        }
    }

    pub fn conformance_storage_mut(&mut self) -> Option<&mut ConformanceStorage> {
        match &mut self.kind {
            DeclKind::Class(c) => Some(&mut c.conformances),
            DeclKind::Enum(e) => Some(&mut e.conformances),
            _ => None,
        }
    }

    /// The extension payload; panics for other kinds.
    pub fn extension(&self) -> &ExtensionDecl {
        match &self.kind {
            DeclKind::Extension(x) => x,
            other => panic!("extension access on {}", other.name()),
        }
    }

    /// The extension payload, mutably; panics for other kinds.
    pub fn extension_mut(&mut self) -> &mut ExtensionDecl {
        match &mut self.kind {
            DeclKind::Extension(x) => x,
            other => panic!("extension access on {}", other.name()),
        }
    }

    /// Extensions bound to this nominal.
    pub fn bound_extensions(&self) -> &[DeclId] {
        match &self.kind {
            DeclKind::Class(c) => &c.extensions,
            DeclKind::Enum(e) => &e.extensions,
            DeclKind::Protocol(p) => &p.extensions,
            _ => &[],
        }
    }
}
