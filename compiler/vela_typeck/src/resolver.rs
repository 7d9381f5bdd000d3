//! The eager resolver.
//!
//! One capability object per compilation session. The resolver holds the
//! session's diagnostic sink and nothing else: every per-node fact it
//! computes is cached on the node itself, so redundant calls are cheap
//! no-ops and the object can be shared freely.

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use rustc_hash::FxHashSet;
use smallvec::SmallVec;

use vela_ast::{
    Access, AstContext, ConformanceConstructionEntry, ConformanceId, ConformanceRef, CtorDecl,
    Decl, DeclFlags, DeclId, DeclKind, Name, Resolver, TyData, TyId, VarDecl,
};
use vela_diagnostic::{Diagnostic, DiagnosticQueue, ErrorCode};

/// Owned copy of the syntactic data a signature is computed from.
enum SignatureForm {
    Nominal,
    Assoc {
        default_repr: Option<vela_ast::TypeRepr>,
        needs_default: bool,
    },
    Alias {
        repr: vela_ast::TypeRepr,
    },
    Fn {
        params: Vec<vela_ast::TypeRepr>,
        ret: Option<vela_ast::TypeRepr>,
    },
    Ctor {
        params: Vec<vela_ast::TypeRepr>,
        parent: Option<DeclId>,
    },
    Var {
        repr: Option<vela_ast::TypeRepr>,
    },
    Extension,
}

/// Resolver backend over live syntax.
pub struct CheckResolver {
    diagnostics: Mutex<DiagnosticQueue>,
}

impl CheckResolver {
    pub fn new() -> Self {
        CheckResolver {
            diagnostics: Mutex::new(DiagnosticQueue::new()),
        }
    }

    /// Create a resolver and install it as the context's session resolver.
    pub fn install(ctx: &mut AstContext) -> Arc<CheckResolver> {
        let resolver = Arc::new(CheckResolver::new());
        ctx.install_resolver(resolver.clone());
        resolver
    }

    /// The session's diagnostic queue.
    pub fn diagnostics(&self) -> MutexGuard<'_, DiagnosticQueue> {
        self.diagnostics.lock()
    }

    pub(crate) fn emit(&self, diagnostic: Diagnostic) {
        self.diagnostics.lock().emit(diagnostic);
    }

    // ── Lookup helpers ──────────────────────────────────────────────

    /// The nominal behind a type, if it is a nominal type.
    fn nominal_of_ty(ctx: &AstContext, ty: TyId) -> Option<DeclId> {
        match ctx.ty_data(ty) {
            TyData::Nominal(decl) => Some(*decl),
            _ => None,
        }
    }

    /// The first inheritance-clause entry naming a class, resolved by name
    /// lookup only. Used for superclass chain walking without forcing any
    /// slot.
    fn direct_superclass(ctx: &AstContext, decl: DeclId) -> Option<DeclId> {
        let entries = ctx.decl(decl).inherited_entries()?;
        for entry in entries {
            if let vela_ast::TypeRepr::Named(name, _) = &entry.repr {
                if let Some(candidate) = ctx.lookup_top_level(*name) {
                    if matches!(ctx.decl(candidate).kind, DeclKind::Class(_)) {
                        return Some(candidate);
                    }
                }
            }
        }
        None
    }

    /// Member search across a nominal and its bound extensions.
    fn members_including_extensions(&self, ctx: &mut AstContext, nominal: DeclId) -> Vec<DeclId> {
        let mut members = ctx.members_of(nominal).to_vec();
        for ext in ctx.decl(nominal).bound_extensions().to_vec() {
            members.extend(ctx.members_of(ext).iter().copied());
        }
        members
    }

    /// Walk the superclass chain looking for the member this declaration
    /// overrides: same name, same kind, same signature.
    ///
    /// Forces signature resolution on candidates, so override resolution is
    /// deliberately re-entrant into signature resolution of *other* nodes.
    fn find_overridden(&self, ctx: &mut AstContext, decl: DeclId) -> Option<DeclId> {
        let parent = ctx.decl(decl).parent?;
        if !matches!(ctx.decl(parent).kind, DeclKind::Class(_)) {
            return None;
        }
        if !matches!(
            ctx.decl(decl).kind,
            DeclKind::Func(_) | DeclKind::Var(_) | DeclKind::Ctor(_)
        ) {
            return None;
        }
        let name = ctx.decl(decl).name;
        let signature = ctx.signature_of(decl);

        let mut current = parent;
        loop {
            let superclass = ctx.superclass_of(current)?;
            let ancestor = Self::nominal_of_ty(ctx, superclass)?;
            let found = self
                .members_including_extensions(ctx, ancestor)
                .into_iter()
                .find(|&member| {
                    let matches_shape = {
                        let candidate = ctx.decl(member);
                        candidate.name == name
                            && std::mem::discriminant(&candidate.kind)
                                == std::mem::discriminant(&ctx.decl(decl).kind)
                    };
                    matches_shape && ctx.signature_of(member) == signature
                });
            if found.is_some() {
                return found;
            }
            current = ancestor;
        }
    }
}

impl Default for CheckResolver {
    fn default() -> Self {
        CheckResolver::new()
    }
}

impl Resolver for CheckResolver {
    #[tracing::instrument(level = "trace", skip(self, ctx))]
    fn resolve_decl_signature(&self, ctx: &mut AstContext, decl: DeclId) {
        if ctx.decl(decl).signature.is_resolved() {
            return;
        }
        ctx.decl_mut(decl)
            .signature
            .begin("declaration signature");

        // Copy the syntactic form out of the node before resolving: repr
        // resolution needs the context mutably.
        let form = match &ctx.decl(decl).kind {
            DeclKind::Class(_) | DeclKind::Enum(_) | DeclKind::Protocol(_) => {
                SignatureForm::Nominal
            }
            DeclKind::AssocType(assoc) => SignatureForm::Assoc {
                default_repr: assoc.default_repr.clone(),
                needs_default: assoc.default_ty.is_unresolved(),
            },
            DeclKind::TypeAlias(alias) => SignatureForm::Alias {
                repr: alias.repr.clone(),
            },
            DeclKind::Func(func) => SignatureForm::Fn {
                params: func.params.iter().map(|p| p.repr.clone()).collect(),
                ret: func.ret.clone(),
            },
            DeclKind::Ctor(ctor) => SignatureForm::Ctor {
                params: ctor.params.iter().map(|p| p.repr.clone()).collect(),
                parent: ctx.decl(decl).parent,
            },
            DeclKind::Var(var) => SignatureForm::Var {
                repr: var.repr.clone(),
            },
            DeclKind::Extension(_) => SignatureForm::Extension,
        };

        let ty = match form {
            SignatureForm::Nominal => ctx.intern_ty(TyData::Nominal(decl)),
            SignatureForm::Assoc {
                default_repr,
                needs_default,
            } => {
                if needs_default {
                    let default = default_repr.map(|repr| self.resolve_type_repr(ctx, &repr));
                    let DeclKind::AssocType(assoc) = &mut ctx.decl_mut(decl).kind else {
                        unreachable!()
                    };
                    assoc.default_ty.fulfill(default, "associated type default");
                }
                ctx.intern_ty(TyData::Nominal(decl))
            }
            SignatureForm::Alias { repr } => {
                let ty = self.resolve_type_repr(ctx, &repr);
                let DeclKind::TypeAlias(alias) = &mut ctx.decl_mut(decl).kind else {
                    unreachable!()
                };
                if alias.aliased.is_unresolved() {
                    alias.aliased.fulfill(ty, "type alias target");
                }
                ty
            }
            SignatureForm::Fn { params, ret } => {
                let params: Vec<TyId> = params
                    .iter()
                    .map(|repr| self.resolve_type_repr(ctx, repr))
                    .collect();
                let ret = ret.map_or(TyId::UNIT, |repr| self.resolve_type_repr(ctx, &repr));
                ctx.intern_ty(TyData::Fn { params, ret })
            }
            SignatureForm::Ctor { params, parent } => {
                let params: Vec<TyId> = params
                    .iter()
                    .map(|repr| self.resolve_type_repr(ctx, repr))
                    .collect();
                let produced =
                    parent.map_or(TyId::ERROR, |parent| ctx.intern_ty(TyData::Nominal(parent)));
                ctx.intern_ty(TyData::Fn {
                    params,
                    ret: produced,
                })
            }
            SignatureForm::Var { repr } => match repr {
                Some(repr) => self.resolve_type_repr(ctx, &repr),
                None => {
                    let (name, span) = {
                        let d = ctx.decl(decl);
                        (ctx.name_text(d.name), d.span)
                    };
                    self.emit(Diagnostic::error(
                        ErrorCode::E2003,
                        format!("variable `{name}` needs a type annotation"),
                        span,
                    ));
                    TyId::ERROR
                }
            },
            SignatureForm::Extension => {
                self.bind_extension(ctx, decl);
                let extended = *ctx
                    .decl(decl)
                    .extension()
                    .extended
                    .expect_resolved("extension binding");
                extended.map_or(TyId::ERROR, |nominal| {
                    ctx.intern_ty(TyData::Nominal(nominal))
                })
            }
        };
        ctx.decl_mut(decl)
            .signature
            .fulfill(ty, "declaration signature");
    }

    fn resolve_access(&self, ctx: &mut AstContext, decl: DeclId) {
        if ctx.decl(decl).access.is_resolved() {
            return;
        }
        let declared = ctx.decl(decl).declared_access.unwrap_or(Access::Internal);
        // Members are capped at their container's access level.
        let effective = match ctx.decl(decl).parent {
            Some(parent) => declared.min(ctx.access_of(parent)),
            None => declared,
        };
        ctx.decl_mut(decl)
            .access
            .fulfill(effective, "access level");
    }

    #[tracing::instrument(level = "trace", skip(self, ctx))]
    fn resolve_overridden(&self, ctx: &mut AstContext, decl: DeclId) {
        if ctx.decl(decl).overridden.is_resolved() {
            return;
        }
        ctx.decl_mut(decl)
            .overridden
            .begin("overridden declaration");

        let overridden = self.find_overridden(ctx, decl);
        if overridden.is_none() && ctx.decl(decl).flags.contains(DeclFlags::OVERRIDE) {
            let (name, span) = {
                let d = ctx.decl(decl);
                (ctx.name_text(d.name), d.span)
            };
            self.emit(Diagnostic::error(
                ErrorCode::E2005,
                format!("`{name}` is marked override but overrides nothing"),
                span,
            ));
        }
        ctx.decl_mut(decl)
            .overridden
            .fulfill(overridden, "overridden declaration");
    }

    fn resolve_is_bridged(&self, ctx: &mut AstContext, decl: DeclId) {
        if ctx.decl(decl).bridged.is_resolved() {
            return;
        }
        ctx.decl_mut(decl).bridged.begin("bridging bit");

        let bridged = if ctx.decl(decl).flags.contains(DeclFlags::BRIDGE_ATTR) {
            true
        } else if ctx.decl(decl).is_nominal() {
            // Classes inherit bridging from their superclass.
            match &ctx.decl(decl).kind {
                DeclKind::Class(_) => match ctx.superclass_of(decl) {
                    Some(superclass) => Self::nominal_of_ty(ctx, superclass)
                        .is_some_and(|parent| ctx.is_bridged(parent)),
                    None => false,
                },
                _ => false,
            }
        } else {
            // Members are bridged along with their container.
            ctx.decl(decl)
                .parent
                .is_some_and(|parent| ctx.is_bridged(parent))
        };
        ctx.decl_mut(decl).bridged.fulfill(bridged, "bridging bit");
    }

    #[tracing::instrument(level = "trace", skip(self, ctx))]
    fn superclass(&self, ctx: &mut AstContext, decl: DeclId) -> Option<TyId> {
        {
            let d = ctx.decl(decl);
            let slot = match &d.kind {
                DeclKind::Class(c) => &c.superclass,
                DeclKind::Protocol(p) => &p.superclass,
                other => panic!("superclass resolution on {}", other.name()),
            };
            if let Some(&cached) = slot.get() {
                return cached;
            }
        }
        match &mut ctx.decl_mut(decl).kind {
            DeclKind::Class(c) => c.superclass.begin("superclass"),
            DeclKind::Protocol(p) => p.superclass.begin("superclass"),
            _ => unreachable!(),
        }

        // Walk the syntactic superclass chain with a visited set; a repeat
        // is an inheritance cycle, reported once and resolved to "no
        // superclass" so downstream queries terminate.
        let direct = Self::direct_superclass(ctx, decl);
        let mut visited = FxHashSet::default();
        visited.insert(decl);
        let mut cycle = false;
        let mut current = direct;
        while let Some(next) = current {
            if !visited.insert(next) {
                cycle = true;
                let (name, span) = {
                    let d = ctx.decl(decl);
                    (ctx.name_text(d.name), d.span)
                };
                self.emit(Diagnostic::error(
                    ErrorCode::E2002,
                    format!("circular inheritance through `{name}`"),
                    span,
                ));
                break;
            }
            current = Self::direct_superclass(ctx, next);
        }

        let result = if cycle {
            None
        } else {
            direct.map(|superclass| ctx.intern_ty(TyData::Nominal(superclass)))
        };
        match &mut ctx.decl_mut(decl).kind {
            DeclKind::Class(c) => c.superclass.fulfill(result, "superclass"),
            DeclKind::Protocol(p) => p.superclass.fulfill(result, "superclass"),
            _ => unreachable!(),
        }
        result
    }

    fn raw_type(&self, ctx: &mut AstContext, decl: DeclId) -> Option<TyId> {
        {
            let d = ctx.decl(decl);
            let DeclKind::Enum(e) = &d.kind else {
                panic!("raw type resolution on {}", d.kind.name());
            };
            if let Some(&cached) = e.raw_type.get() {
                return cached;
            }
        }
        match &mut ctx.decl_mut(decl).kind {
            DeclKind::Enum(e) => e.raw_type.begin("raw type"),
            _ => unreachable!(),
        }

        // The raw type is the first clause entry naming a primitive;
        // protocol entries are conformances, not raw types.
        let reprs: Vec<_> = ctx
            .decl(decl)
            .inherited_entries()
            .map(|entries| entries.iter().map(|e| e.repr.clone()).collect())
            .unwrap_or_default();
        let mut raw = None;
        for repr in &reprs {
            let ty = match repr {
                vela_ast::TypeRepr::Named(name, _) => match ctx.name_text(*name) {
                    "Int" => Some(TyId::INT),
                    "String" => Some(TyId::STRING),
                    _ => None,
                },
                vela_ast::TypeRepr::Fn { .. } => None,
            };
            if ty.is_some() {
                raw = ty;
                break;
            }
        }
        match &mut ctx.decl_mut(decl).kind {
            DeclKind::Enum(e) => e.raw_type.fulfill(raw, "raw type"),
            _ => unreachable!(),
        }
        raw
    }

    fn inherited_type(&self, ctx: &mut AstContext, decl: DeclId, index: usize) -> TyId {
        let len = ctx.decl(decl).inherited_entries().map_or(0, <[_]>::len);
        assert!(
            index < len,
            "inherited type index {index} out of range for clause of length {len}"
        );
        let cached = ctx
            .decl(decl)
            .inherited_entries()
            .and_then(|entries| entries[index].resolved);
        if let Some(ty) = cached {
            return ty;
        }
        let repr = ctx
            .decl(decl)
            .inherited_entries()
            .map(|entries| entries[index].repr.clone())
            .unwrap_or_else(|| unreachable!());
        let ty = self.resolve_type_repr(ctx, &repr);
        if let Some(entries) = ctx.decl_mut(decl).inherited_entries_mut() {
            entries[index].resolved = Some(ty);
        }
        ty
    }

    fn resolve_trailing_where(&self, ctx: &mut AstContext, proto: DeclId) {
        {
            let d = ctx.decl(proto);
            let DeclKind::Protocol(p) = &d.kind else {
                panic!("trailing where resolution on {}", d.kind.name());
            };
            if p.where_resolved {
                return;
            }
        }
        let reprs = match &ctx.decl(proto).kind {
            DeclKind::Protocol(p) => p.where_reprs.clone(),
            _ => unreachable!(),
        };
        let requirements: Vec<_> = reprs
            .iter()
            .map(|clause| vela_ast::Requirement {
                subject: clause.subject,
                kind: clause.kind,
                bound: self.resolve_type_repr(ctx, &clause.bound),
            })
            .collect();
        let DeclKind::Protocol(p) = &mut ctx.decl_mut(proto).kind else {
            unreachable!()
        };
        p.resolved_where = requirements;
        p.where_resolved = true;
    }

    fn bind_extension(&self, ctx: &mut AstContext, ext: DeclId) {
        if ctx.decl(ext).extension().extended.is_resolved() {
            return;
        }
        let repr = ctx.decl(ext).extension().extended_repr.clone();
        let bound = match &repr {
            vela_ast::TypeRepr::Named(name, _) => ctx
                .lookup_top_level(*name)
                .filter(|&candidate| ctx.decl(candidate).is_nominal()),
            vela_ast::TypeRepr::Fn { .. } => None,
        };
        match bound {
            Some(nominal) => {
                ctx.decl_mut(ext)
                    .extension_mut()
                    .extended
                    .fulfill(Some(nominal), "extension binding");
                // Binding is what makes the extension's members visible as
                // members of the nominal.
                match &mut ctx.decl_mut(nominal).kind {
                    DeclKind::Class(c) => c.extensions.push(ext),
                    DeclKind::Enum(e) => e.extensions.push(ext),
                    DeclKind::Protocol(p) => p.extensions.push(ext),
                    _ => unreachable!(),
                }
                tracing::debug!(ext = ext.raw(), nominal = nominal.raw(), "bound extension");
            }
            None => {
                let span = repr.span();
                self.emit(Diagnostic::error(
                    ErrorCode::E2004,
                    "extension of an unknown type",
                    span,
                ));
                ctx.decl_mut(ext)
                    .extension_mut()
                    .extended
                    .fulfill(None, "extension binding");
            }
        }
    }

    #[tracing::instrument(level = "trace", skip(self, ctx))]
    fn resolve_extension(&self, ctx: &mut AstContext, ext: DeclId) {
        self.bind_extension(ctx, ext);
        if ctx.decl(ext).extension().fully_resolved {
            return;
        }
        // Resolve the extension's generic requirements.
        let reprs = ctx.decl(ext).extension().where_reprs.clone();
        let requirements: Vec<_> = reprs
            .iter()
            .map(|clause| vela_ast::Requirement {
                subject: clause.subject,
                kind: clause.kind,
                bound: self.resolve_type_repr(ctx, &clause.bound),
            })
            .collect();
        // Resolve every clause entry so conformance checking can iterate
        // the extension's members as members of the target type.
        let clause_len = ctx.decl(ext).inherited_entries().map_or(0, <[_]>::len);
        for index in 0..clause_len {
            let _ = self.inherited_type(ctx, ext, index);
        }
        let x = ctx.decl_mut(ext).extension_mut();
        x.resolved_where = requirements;
        x.fully_resolved = true;
    }

    fn extension_conformance_protocols(
        &self,
        ctx: &mut AstContext,
        ext: DeclId,
    ) -> SmallVec<[ConformanceConstructionEntry; 4]> {
        // Partial resolution: only the clause names are consulted, so this
        // is safe to run before (and without) full extension resolution.
        let entries: Vec<(Name, vela_ast::Span)> = ctx
            .decl(ext)
            .extension()
            .inherited
            .iter()
            .filter_map(|entry| match &entry.repr {
                vela_ast::TypeRepr::Named(name, _) => Some((*name, entry.span)),
                vela_ast::TypeRepr::Fn { .. } => None,
            })
            .collect();
        let mut protocols = SmallVec::new();
        for (name, span) in entries {
            if let Some(candidate) = ctx.lookup_top_level(name) {
                if matches!(ctx.decl(candidate).kind, DeclKind::Protocol(_)) {
                    protocols.push(ConformanceConstructionEntry {
                        span,
                        protocol: candidate,
                    });
                }
            }
        }
        protocols
    }

    fn resolve_implicit_constructors(&self, ctx: &mut AstContext, nominal: DeclId) {
        assert!(
            ctx.decl(nominal).is_nominal(),
            "implicit constructor synthesis on {}",
            ctx.decl(nominal).kind.name()
        );
        if ctx
            .decl(nominal)
            .flags
            .contains(DeclFlags::IMPLICIT_CTORS_DONE)
        {
            return;
        }
        // Only classes get a default constructor; protocols and enums have
        // none, but the query is still answered (and cached) for them.
        if matches!(ctx.decl(nominal).kind, DeclKind::Class(_)) {
            let has_explicit_ctor = ctx
                .members_of(nominal)
                .to_vec()
                .into_iter()
                .any(|member| matches!(ctx.decl(member).kind, DeclKind::Ctor(_)));
            if !has_explicit_ctor {
                let name = ctx.intern("init");
                let span = ctx.decl(nominal).span;
                let mut ctor = Decl::new(name, span, DeclKind::Ctor(CtorDecl { params: Vec::new() }));
                ctor.parent = Some(nominal);
                ctor.flags |= DeclFlags::IMPLICIT;
                let ctor = ctx.alloc_decl(ctor);
                if let Some(storage) = ctx.decl_mut(nominal).member_storage_mut() {
                    storage.push(ctor);
                }
                tracing::debug!(nominal = nominal.raw(), "synthesized default constructor");
            }
        }
        ctx.decl_mut(nominal).flags |= DeclFlags::IMPLICIT_CTORS_DONE;
    }

    fn resolve_implicit_member(&self, ctx: &mut AstContext, nominal: DeclId, name: Name) {
        match ctx.name_text(name) {
            "init" => self.resolve_implicit_constructors(ctx, nominal),
            "raw" => {
                // Raw-typed enums expose a synthesized `raw` accessor.
                if !matches!(ctx.decl(nominal).kind, DeclKind::Enum(_)) {
                    return;
                }
                let Some(raw_ty) = ctx.raw_type_of(nominal) else {
                    return;
                };
                let already_present = ctx
                    .members_of(nominal)
                    .to_vec()
                    .into_iter()
                    .any(|member| ctx.decl(member).name == name);
                if already_present {
                    return;
                }
                let span = ctx.decl(nominal).span;
                let mut accessor = Decl::new(name, span, DeclKind::Var(VarDecl { repr: None }));
                accessor.parent = Some(nominal);
                accessor.flags |= DeclFlags::IMPLICIT;
                accessor.signature.fulfill(raw_ty, "declaration signature");
                let accessor = ctx.alloc_decl(accessor);
                if let Some(storage) = ctx.decl_mut(nominal).member_storage_mut() {
                    storage.push(accessor);
                }
            }
            // No implicit member of that name exists: a no-op, not an error.
            _ => {}
        }
    }

    #[tracing::instrument(level = "trace", skip(self, ctx))]
    fn resolve_type_witness(
        &self,
        ctx: &mut AstContext,
        conformance: ConformanceId,
        assoc: DeclId,
    ) {
        let protocol = ctx.conformance(conformance).protocol;
        assert_eq!(
            ctx.decl(assoc).parent,
            Some(protocol),
            "associated type does not belong to the conformance's protocol"
        );
        if ctx
            .conformance(conformance)
            .type_witnesses
            .contains_key(&assoc)
        {
            return;
        }

        let conforming = ctx.conformance(conformance).conforming;
        let assoc_name = ctx.decl(assoc).name;
        let candidate = self
            .members_including_extensions(ctx, conforming)
            .into_iter()
            .find(|&member| {
                ctx.decl(member).name == assoc_name
                    && matches!(
                        ctx.decl(member).kind,
                        DeclKind::TypeAlias(_) | DeclKind::AssocType(_)
                    )
            });

        let witness = match candidate {
            Some(member) => ctx.signature_of(member),
            None => match ctx.associated_type_default_of(assoc) {
                Some(default) => default,
                None => {
                    let (assoc_text, span) = {
                        let conf = ctx.conformance(conformance);
                        (ctx.name_text(assoc_name), conf.span)
                    };
                    self.emit(Diagnostic::error(
                        ErrorCode::E2006,
                        format!("no type witness for associated type `{assoc_text}`"),
                        span,
                    ));
                    TyId::ERROR
                }
            },
        };
        ctx.conformance_mut(conformance)
            .type_witnesses
            .insert(assoc, witness);
    }

    #[tracing::instrument(level = "trace", skip(self, ctx))]
    fn resolve_witness(
        &self,
        ctx: &mut AstContext,
        conformance: ConformanceId,
        requirement: DeclId,
    ) {
        let protocol = ctx.conformance(conformance).protocol;
        assert_eq!(
            ctx.decl(requirement).parent,
            Some(protocol),
            "requirement does not belong to the conformance's protocol"
        );
        if ctx
            .conformance(conformance)
            .witnesses
            .contains_key(&requirement)
        {
            return;
        }

        let conforming = ctx.conformance(conformance).conforming;
        let requirement_name = ctx.decl(requirement).name;
        let requirement_sig = ctx.signature_of(requirement);
        let witness = self
            .members_including_extensions(ctx, conforming)
            .into_iter()
            .find(|&member| {
                let matches_shape = {
                    let candidate = ctx.decl(member);
                    candidate.name == requirement_name
                        && std::mem::discriminant(&candidate.kind)
                            == std::mem::discriminant(&ctx.decl(requirement).kind)
                };
                matches_shape && ctx.signature_of(member) == requirement_sig
            });

        if witness.is_none() {
            let (requirement_text, span) = {
                let conf = ctx.conformance(conformance);
                (ctx.name_text(requirement_name), conf.span)
            };
            self.emit(Diagnostic::error(
                ErrorCode::E2007,
                format!("no witness for requirement `{requirement_text}`"),
                span,
            ));
        }
        ctx.conformance_mut(conformance)
            .witnesses
            .insert(requirement, witness);
    }

    fn mark_conformance_used(
        &self,
        ctx: &mut AstContext,
        conformance: ConformanceRef,
        from: DeclId,
    ) {
        // Usage tracking must work for incomplete conformances and must not
        // advance completion.
        if let ConformanceRef::Concrete(id) = conformance {
            ctx.conformance_mut(id).mark_used_from(from);
        }
    }
}
