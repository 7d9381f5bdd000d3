//! Vela AST - declaration nodes and the lazy resolution boundary.
//!
//! This crate contains the front-end core data structures for the Vela
//! compiler:
//! - Spans for source locations
//! - Names for interned identifiers
//! - Declaration nodes (classes, enums, protocols, extensions, members)
//! - A deduplicating type pool with `TyId` handles
//! - Protocol conformance records and witness tables
//! - The lazy resolution boundary: [`Resolver`], [`MemberLoader`] and
//!   [`ConformanceLoader`]
//!
//! # Lazy resolution
//!
//! Declarations are safe to inspect and walk while some of their semantic
//! facts (signature, access level, superclass, members, witnesses) are still
//! unresolved. Each such fact lives in a write-once [`LazySlot`] on the node,
//! or behind a context-data record pointing at a pluggable loader. An
//! [`AstContext`] accessor that observes an unresolved fact invokes the
//! session's installed capability, caches the answer on the node, and returns
//! it; a second query never reaches the backend again.
//!
//! # Design Philosophy
//!
//! - **Intern Everything**: identifiers become `Name(u32)`, types become
//!   `TyId(u32)` handles into a pool
//! - **Flatten Everything**: declarations live in one arena and reference
//!   each other by `DeclId(u32)`, never by `Box`
//! - **Capabilities over globals**: the resolver and loaders are injected per
//!   compilation session and shared by many nodes; all per-node state stays
//!   in the node itself

mod conformance;
mod context;
mod decl;
mod ids;
mod interner;
mod lazy;
mod name;
mod resolve;
mod span;
mod ty;

pub use conformance::{
    ConformanceRef, ConformanceSource, ConformanceState, NormalConformance,
};
pub use context::AstContext;
pub use decl::{
    Access, AssocTypeDecl, ClassDecl, ConformanceStorage, CtorDecl, Decl, DeclFlags, DeclKind,
    EnumDecl, ExtensionDecl, FuncDecl, GenericEnv, InheritedEntry, LoadState, MemberStorage,
    Param, ProtocolDecl, Requirement, RequirementKind, TypeAliasDecl, TypeRepr, VarDecl,
    WhereRepr,
};
pub use ids::{ConformanceId, DeclId, GenericEnvId};
pub use interner::{SharedInterner, StringInterner};
pub use lazy::{
    ConformanceToken, ContextData, DeclToken, GenericContextData, GenericEnvToken,
    IterableContextData, LazySlot, MemberToken,
};
pub use name::Name;
pub use resolve::{
    ConformanceConstructionEntry, ConformanceLoader, MemberLoader, NamedMembers, Resolver,
};
pub use span::Span;
pub use ty::{TyData, TyId, TyPool};
