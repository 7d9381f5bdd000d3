use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use pretty_assertions::assert_eq;
use smallvec::SmallVec;

use super::*;
use crate::{
    ClassDecl, ConformanceSource, ContextData, DeclToken, EnumDecl, GenericContextData,
    GenericEnvToken, IterableContextData, MemberStorage, NormalConformance, ProtocolDecl, Span,
    TypeRepr,
};
use crate::{AssocTypeDecl, ConformanceLoader, FuncDecl, LazySlot, VarDecl};

// ── Stub backends ───────────────────────────────────────────────────

/// Resolver that counts backend invocations and resolves every fact to a
/// fixed answer.
#[derive(Default)]
struct CountingResolver {
    signature_calls: AtomicUsize,
    superclass_calls: AtomicUsize,
    raw_type_calls: AtomicUsize,
    witness_calls: AtomicUsize,
    usage_calls: AtomicUsize,
}

impl CountingResolver {
    fn count(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

impl Resolver for CountingResolver {
    fn resolve_decl_signature(&self, ctx: &mut AstContext, decl: DeclId) {
        Self::count(&self.signature_calls);
        let slot = &mut ctx.decl_mut(decl).signature;
        slot.begin("declaration signature");
        slot.fulfill(TyId::UNIT, "declaration signature");
    }

    fn resolve_access(&self, ctx: &mut AstContext, decl: DeclId) {
        ctx.decl_mut(decl)
            .access
            .fulfill(Access::Internal, "access level");
    }

    fn resolve_overridden(&self, ctx: &mut AstContext, decl: DeclId) {
        ctx.decl_mut(decl)
            .overridden
            .fulfill(None, "overridden declaration");
    }

    fn resolve_is_bridged(&self, ctx: &mut AstContext, decl: DeclId) {
        ctx.decl_mut(decl).bridged.fulfill(false, "bridging bit");
    }

    fn superclass(&self, ctx: &mut AstContext, decl: DeclId) -> Option<TyId> {
        Self::count(&self.superclass_calls);
        match &mut ctx.decl_mut(decl).kind {
            DeclKind::Class(c) => c.superclass.fulfill(None, "superclass"),
            DeclKind::Protocol(p) => p.superclass.fulfill(None, "superclass"),
            other => panic!("superclass resolution on {}", other.name()),
        }
        None
    }

    fn raw_type(&self, ctx: &mut AstContext, decl: DeclId) -> Option<TyId> {
        Self::count(&self.raw_type_calls);
        match &mut ctx.decl_mut(decl).kind {
            DeclKind::Enum(e) => e.raw_type.fulfill(None, "raw type"),
            other => panic!("raw type resolution on {}", other.name()),
        }
        None
    }

    fn inherited_type(&self, ctx: &mut AstContext, decl: DeclId, index: usize) -> TyId {
        let entries = ctx
            .decl_mut(decl)
            .inherited_entries_mut()
            .expect("clause present");
        entries[index].resolved = Some(TyId::ERROR);
        TyId::ERROR
    }

    fn resolve_trailing_where(&self, ctx: &mut AstContext, proto: DeclId) {
        match &mut ctx.decl_mut(proto).kind {
            DeclKind::Protocol(p) => p.where_resolved = true,
            other => panic!("trailing where resolution on {}", other.name()),
        }
    }

    fn bind_extension(&self, ctx: &mut AstContext, ext: DeclId) {
        ctx.decl_mut(ext)
            .extension_mut()
            .extended
            .fulfill(None, "extension binding");
    }

    fn resolve_extension(&self, ctx: &mut AstContext, ext: DeclId) {
        ctx.decl_mut(ext).extension_mut().fully_resolved = true;
    }

    fn extension_conformance_protocols(
        &self,
        _ctx: &mut AstContext,
        _ext: DeclId,
    ) -> SmallVec<[ConformanceConstructionEntry; 4]> {
        SmallVec::new()
    }

    fn resolve_implicit_constructors(&self, ctx: &mut AstContext, nominal: DeclId) {
        ctx.decl_mut(nominal).flags |= DeclFlags::IMPLICIT_CTORS_DONE;
    }

    fn resolve_implicit_member(&self, _ctx: &mut AstContext, _nominal: DeclId, _name: Name) {}

    fn resolve_type_witness(
        &self,
        ctx: &mut AstContext,
        conformance: ConformanceId,
        assoc: DeclId,
    ) {
        Self::count(&self.witness_calls);
        ctx.conformance_mut(conformance)
            .type_witnesses
            .insert(assoc, TyId::UNIT);
    }

    fn resolve_witness(
        &self,
        ctx: &mut AstContext,
        conformance: ConformanceId,
        requirement: DeclId,
    ) {
        Self::count(&self.witness_calls);
        ctx.conformance_mut(conformance)
            .witnesses
            .insert(requirement, None);
    }

    fn mark_conformance_used(
        &self,
        ctx: &mut AstContext,
        conformance: ConformanceRef,
        from: DeclId,
    ) {
        Self::count(&self.usage_calls);
        if let ConformanceRef::Concrete(id) = conformance {
            ctx.conformance_mut(id).mark_used_from(from);
        }
    }
}

/// Member loader with scripted behavior and invocation counters.
struct ScriptedLoader {
    all_members_calls: AtomicUsize,
    named_calls: AtomicUsize,
    conformance_calls: AtomicUsize,
    env_calls: AtomicUsize,
    /// Whether named lookup is supported for this loader.
    supports_named: bool,
    /// Names of members handed out by `load_all_members`.
    member_names: Vec<&'static str>,
    /// Protocol backing fetched conformance records, if any.
    conformance_protocol: Option<DeclId>,
}

impl ScriptedLoader {
    fn new(member_names: Vec<&'static str>, supports_named: bool) -> Self {
        ScriptedLoader {
            all_members_calls: AtomicUsize::new(0),
            named_calls: AtomicUsize::new(0),
            conformance_calls: AtomicUsize::new(0),
            env_calls: AtomicUsize::new(0),
            supports_named,
            member_names,
            conformance_protocol: None,
        }
    }

    fn alloc_member(ctx: &mut AstContext, parent: DeclId, name: &str) -> DeclId {
        let name = ctx.intern(name);
        let mut decl = Decl::new(
            name,
            Span::DUMMY,
            DeclKind::Var(VarDecl { repr: None }),
        );
        decl.parent = Some(parent);
        ctx.alloc_decl(decl)
    }
}

impl MemberLoader for ScriptedLoader {
    fn load_all_members(
        &self,
        ctx: &mut AstContext,
        decl: DeclId,
        _token: MemberToken,
    ) -> Vec<DeclId> {
        self.all_members_calls.fetch_add(1, Ordering::Relaxed);
        self.member_names
            .iter()
            .map(|name| Self::alloc_member(ctx, decl, name))
            .collect()
    }

    fn load_named_members(
        &self,
        ctx: &mut AstContext,
        decl: DeclId,
        name: Name,
        _token: MemberToken,
    ) -> NamedMembers {
        self.named_calls.fetch_add(1, Ordering::Relaxed);
        if !self.supports_named {
            return NamedMembers::Unsupported;
        }
        let candidates: Vec<&'static str> = self
            .member_names
            .iter()
            .copied()
            .filter(|&candidate| ctx.intern(candidate) == name)
            .collect();
        let matches: Vec<DeclId> = candidates
            .into_iter()
            .map(|candidate| Self::alloc_member(ctx, decl, candidate))
            .collect();
        NamedMembers::from_members(matches)
    }

    fn load_all_conformances(
        &self,
        ctx: &mut AstContext,
        decl: DeclId,
        _token: ConformanceToken,
        out: &mut Vec<ConformanceId>,
    ) {
        self.conformance_calls.fetch_add(1, Ordering::Relaxed);
        if let Some(protocol) = self.conformance_protocol {
            let conformance = NormalConformance::new(protocol, decl, decl, Span::DUMMY);
            out.push(ctx.alloc_conformance(conformance));
        }
    }

    fn load_associated_type_default(
        &self,
        _ctx: &mut AstContext,
        _assoc: DeclId,
        _token: DeclToken,
    ) -> Option<TyId> {
        Some(TyId::INT)
    }

    fn load_generic_environment(
        &self,
        ctx: &mut AstContext,
        decl: DeclId,
        _token: GenericEnvToken,
    ) -> Option<GenericEnvId> {
        self.env_calls.fetch_add(1, Ordering::Relaxed);
        let param = ctx.intern("T");
        Some(ctx.alloc_generic_env(GenericEnv {
            owner: decl,
            params: vec![param],
            requirements: Vec::new(),
        }))
    }
}

/// Conformance loader that fills a fixed witness entry.
struct ScriptedConformanceLoader {
    finish_calls: AtomicUsize,
    requirement: DeclId,
}

impl ConformanceLoader for ScriptedConformanceLoader {
    fn finish_conformance(
        &self,
        ctx: &mut AstContext,
        conformance: ConformanceId,
        _token: ConformanceToken,
    ) {
        self.finish_calls.fetch_add(1, Ordering::Relaxed);
        ctx.conformance_mut(conformance)
            .witnesses
            .insert(self.requirement, None);
    }
}

// ── Construction helpers ────────────────────────────────────────────

fn record_for(loader: Arc<dyn MemberLoader>) -> IterableContextData {
    IterableContextData::new(
        GenericContextData::new(
            ContextData::new(loader, DeclToken::new(0)),
            GenericEnvToken::new(0),
        ),
        MemberToken::new(0),
        ConformanceToken::new(0),
    )
}

fn alloc_class(ctx: &mut AstContext, name: &str) -> DeclId {
    let name = ctx.intern(name);
    let decl = Decl::new(
        name,
        Span::DUMMY,
        DeclKind::Class(ClassDecl::new(Vec::new(), MemberStorage::parsed(Vec::new()))),
    );
    let id = ctx.alloc_decl(decl);
    ctx.declare_top_level(id);
    id
}

fn alloc_lazy_class(ctx: &mut AstContext, name: &str, loader: Arc<dyn MemberLoader>) -> DeclId {
    let name = ctx.intern(name);
    let mut class = ClassDecl::new(Vec::new(), MemberStorage::pending());
    class.conformances = crate::ConformanceStorage::pending();
    let mut decl = Decl::new(name, Span::DUMMY, DeclKind::Class(class));
    decl.install_lazy_data(record_for(loader));
    ctx.alloc_decl(decl)
}

fn alloc_protocol(ctx: &mut AstContext, name: &str) -> DeclId {
    let name = ctx.intern(name);
    let decl = Decl::new(
        name,
        Span::DUMMY,
        DeclKind::Protocol(ProtocolDecl::new(Vec::new(), MemberStorage::parsed(Vec::new()))),
    );
    let id = ctx.alloc_decl(decl);
    ctx.declare_top_level(id);
    id
}

fn alloc_requirement(ctx: &mut AstContext, protocol: DeclId, name: &str) -> DeclId {
    let name = ctx.intern(name);
    let mut decl = Decl::new(
        name,
        Span::DUMMY,
        DeclKind::Func(FuncDecl {
            params: Vec::new(),
            ret: None,
        }),
    );
    decl.parent = Some(protocol);
    ctx.alloc_decl(decl)
}

fn install_counting_resolver(ctx: &mut AstContext) -> Arc<CountingResolver> {
    let resolver = Arc::new(CountingResolver::default());
    ctx.install_resolver(resolver.clone());
    resolver
}

// ── Resolver-path properties ────────────────────────────────────────

#[test]
fn absent_superclass_is_cached_after_one_backend_call() {
    let mut ctx = AstContext::new();
    let resolver = install_counting_resolver(&mut ctx);
    let class = alloc_class(&mut ctx, "Orphan");

    assert_eq!(ctx.superclass_of(class), None);
    assert_eq!(ctx.superclass_of(class), None);
    assert_eq!(resolver.superclass_calls.load(Ordering::Relaxed), 1);
}

#[test]
fn signature_resolution_is_idempotent() {
    let mut ctx = AstContext::new();
    let resolver = install_counting_resolver(&mut ctx);
    let class = alloc_class(&mut ctx, "Point");

    assert_eq!(ctx.signature_of(class), TyId::UNIT);
    assert_eq!(ctx.signature_of(class), TyId::UNIT);
    assert_eq!(resolver.signature_calls.load(Ordering::Relaxed), 1);
}

#[test]
fn absent_raw_type_is_cached() {
    let mut ctx = AstContext::new();
    let resolver = install_counting_resolver(&mut ctx);
    let name = ctx.intern("Direction");
    let decl = Decl::new(
        name,
        Span::DUMMY,
        DeclKind::Enum(EnumDecl::new(Vec::new(), MemberStorage::parsed(Vec::new()))),
    );
    let id = ctx.alloc_decl(decl);

    assert_eq!(ctx.raw_type_of(id), None);
    assert_eq!(ctx.raw_type_of(id), None);
    assert_eq!(resolver.raw_type_calls.load(Ordering::Relaxed), 1);
}

#[test]
#[should_panic(expected = "inherited type index 1 out of range for clause of length 1")]
fn out_of_range_inherited_index_is_fatal() {
    let mut ctx = AstContext::new();
    install_counting_resolver(&mut ctx);
    let name = ctx.intern("Shape");
    let entry = crate::InheritedEntry::new(TypeRepr::Named(ctx.intern("Base"), Span::DUMMY));
    let decl = Decl::new(
        name,
        Span::DUMMY,
        DeclKind::Class(ClassDecl::new(vec![entry], MemberStorage::parsed(Vec::new()))),
    );
    let id = ctx.alloc_decl(decl);

    let _ = ctx.inherited_type_of(id, 1);
}

#[test]
#[should_panic(expected = "no resolver installed")]
fn unresolved_fact_without_resolver_is_fatal() {
    let mut ctx = AstContext::new();
    let class = alloc_class(&mut ctx, "Stray");
    let _ = ctx.signature_of(class);
}

#[test]
#[should_panic(expected = "session resolver installed twice")]
fn reinstalling_the_resolver_is_fatal() {
    let mut ctx = AstContext::new();
    ctx.install_resolver(Arc::new(CountingResolver::default()));
    ctx.install_resolver(Arc::new(CountingResolver::default()));
}

#[test]
#[should_panic(expected = "circular resolution: declaration signature depends on itself")]
fn in_progress_fact_query_is_fatal() {
    let mut ctx = AstContext::new();
    install_counting_resolver(&mut ctx);
    let class = alloc_class(&mut ctx, "Selfish");
    ctx.decl_mut(class).signature.begin("declaration signature");
    let _ = ctx.signature_of(class);
}

// ── Loader-path properties ──────────────────────────────────────────

#[test]
fn member_list_loads_once() {
    let mut ctx = AstContext::new();
    install_counting_resolver(&mut ctx);
    let loader = Arc::new(ScriptedLoader::new(vec!["x", "y"], false));
    let class = alloc_lazy_class(&mut ctx, "Stored", loader.clone());

    assert_eq!(ctx.members_of(class).len(), 2);
    assert_eq!(ctx.members_of(class).len(), 2);
    assert_eq!(loader.all_members_calls.load(Ordering::Relaxed), 1);
}

#[test]
fn named_lookup_unsupported_falls_back_to_full_load() {
    let mut ctx = AstContext::new();
    install_counting_resolver(&mut ctx);
    let loader = Arc::new(ScriptedLoader::new(vec!["x", "y", "x"], false));
    let class = alloc_lazy_class(&mut ctx, "Stored", loader.clone());

    let x = ctx.intern("x");
    let found = ctx.named_members_of(class, x);
    assert_eq!(found.len(), 2);
    // The fallback ran the broad query.
    assert_eq!(loader.named_calls.load(Ordering::Relaxed), 1);
    assert_eq!(loader.all_members_calls.load(Ordering::Relaxed), 1);
}

#[test]
fn named_lookup_supported_empty_does_not_fall_back() {
    let mut ctx = AstContext::new();
    install_counting_resolver(&mut ctx);
    let loader = Arc::new(ScriptedLoader::new(vec!["x"], true));
    let class = alloc_lazy_class(&mut ctx, "Stored", loader.clone());

    let missing = ctx.intern("missing");
    assert!(ctx.named_members_of(class, missing).is_empty());
    // Supported-but-empty must not trigger the broad query.
    assert_eq!(loader.all_members_calls.load(Ordering::Relaxed), 0);
    // The empty answer is cached per name.
    assert!(ctx.named_members_of(class, missing).is_empty());
    assert_eq!(loader.named_calls.load(Ordering::Relaxed), 1);
}

#[test]
fn fetching_conformances_does_not_attach_them() {
    let mut ctx = AstContext::new();
    install_counting_resolver(&mut ctx);
    let protocol = alloc_protocol(&mut ctx, "Drawable");
    let mut loader = ScriptedLoader::new(Vec::new(), false);
    loader.conformance_protocol = Some(protocol);
    let loader = Arc::new(loader);
    let class = alloc_lazy_class(&mut ctx, "Stored", loader.clone());

    // Direct fetch: records are allocated but the node is untouched.
    let (member_loader, token) = {
        let data = ctx.decl(class).lazy_data().expect("record installed");
        (data.loader().clone(), data.conformances_token())
    };
    let mut fetched = Vec::new();
    member_loader.load_all_conformances(&mut ctx, class, token, &mut fetched);
    assert_eq!(fetched.len(), 1);
    assert!(ctx.installed_conformances(class).is_empty());

    // The accessor fetches and installs.
    let installed = ctx.conformances_of(class);
    assert_eq!(installed.len(), 1);
    assert_eq!(loader.conformance_calls.load(Ordering::Relaxed), 2);

    // Once installed, repeat queries skip the loader.
    let _ = ctx.conformances_of(class);
    assert_eq!(loader.conformance_calls.load(Ordering::Relaxed), 2);
}

#[test]
fn generic_environment_loads_through_the_record() {
    let mut ctx = AstContext::new();
    install_counting_resolver(&mut ctx);
    let loader = Arc::new(ScriptedLoader::new(Vec::new(), false));
    let class = alloc_lazy_class(&mut ctx, "Stored", loader.clone());

    let env = ctx.generic_environment_of(class).expect("env loaded");
    assert_eq!(ctx.generic_env(env).owner, class);
    let again = ctx.generic_environment_of(class);
    assert_eq!(again, Some(env));
    assert_eq!(loader.env_calls.load(Ordering::Relaxed), 1);
}

#[test]
fn live_context_has_no_reconstructed_environment() {
    let mut ctx = AstContext::new();
    install_counting_resolver(&mut ctx);
    let class = alloc_class(&mut ctx, "Live");
    assert_eq!(ctx.generic_environment_of(class), None);
}

#[test]
fn associated_type_default_loads_through_the_record() {
    let mut ctx = AstContext::new();
    install_counting_resolver(&mut ctx);
    let protocol = alloc_protocol(&mut ctx, "Sequence");
    let loader: Arc<dyn MemberLoader> = Arc::new(ScriptedLoader::new(Vec::new(), false));
    let name = ctx.intern("Element");
    let mut decl = Decl::new(
        name,
        Span::DUMMY,
        DeclKind::AssocType(AssocTypeDecl {
            default_repr: None,
            default_ty: LazySlot::Unresolved,
        }),
    );
    decl.parent = Some(protocol);
    decl.install_lazy_data(record_for(loader));
    let assoc = ctx.alloc_decl(decl);

    assert_eq!(ctx.associated_type_default_of(assoc), Some(TyId::INT));
    assert_eq!(ctx.associated_type_default_of(assoc), Some(TyId::INT));
}

// ── Witness and usage properties ────────────────────────────────────

#[test]
fn witness_query_finishes_the_conformance_once() {
    let mut ctx = AstContext::new();
    install_counting_resolver(&mut ctx);
    let protocol = alloc_protocol(&mut ctx, "Drawable");
    let requirement = alloc_requirement(&mut ctx, protocol, "draw");
    let class = alloc_class(&mut ctx, "Circle");

    let loader = Arc::new(ScriptedConformanceLoader {
        finish_calls: AtomicUsize::new(0),
        requirement,
    });
    let conformance = ctx.alloc_conformance(NormalConformance::with_source(
        protocol,
        class,
        class,
        Span::DUMMY,
        ConformanceSource::new(loader.clone(), ConformanceToken::new(7)),
    ));

    assert_eq!(ctx.witness(conformance, requirement), None);
    assert_eq!(ctx.conformance(conformance).state(), ConformanceState::Complete);
    assert_eq!(ctx.witness(conformance, requirement), None);
    assert_eq!(loader.finish_calls.load(Ordering::Relaxed), 1);
}

#[test]
fn witness_query_falls_through_to_the_resolver() {
    let mut ctx = AstContext::new();
    let resolver = install_counting_resolver(&mut ctx);
    let protocol = alloc_protocol(&mut ctx, "Drawable");
    let requirement = alloc_requirement(&mut ctx, protocol, "draw");
    let class = alloc_class(&mut ctx, "Circle");
    let conformance =
        ctx.alloc_conformance(NormalConformance::new(protocol, class, class, Span::DUMMY));

    assert_eq!(ctx.witness(conformance, requirement), None);
    assert_eq!(ctx.witness(conformance, requirement), None);
    assert_eq!(resolver.witness_calls.load(Ordering::Relaxed), 1);
}

#[test]
#[should_panic(expected = "requirement does not belong to the conformance's protocol")]
fn witness_for_a_foreign_requirement_is_fatal() {
    let mut ctx = AstContext::new();
    install_counting_resolver(&mut ctx);
    let drawable = alloc_protocol(&mut ctx, "Drawable");
    let hashable = alloc_protocol(&mut ctx, "Hashable");
    let foreign = alloc_requirement(&mut ctx, hashable, "hash");
    let class = alloc_class(&mut ctx, "Circle");
    let conformance =
        ctx.alloc_conformance(NormalConformance::new(drawable, class, class, Span::DUMMY));

    let _ = ctx.witness(conformance, foreign);
}

#[test]
fn usage_is_recorded_without_forcing_completion() {
    let mut ctx = AstContext::new();
    let resolver = install_counting_resolver(&mut ctx);
    let protocol = alloc_protocol(&mut ctx, "Drawable");
    let requirement = alloc_requirement(&mut ctx, protocol, "draw");
    let class = alloc_class(&mut ctx, "Circle");
    let loader = Arc::new(ScriptedConformanceLoader {
        finish_calls: AtomicUsize::new(0),
        requirement,
    });
    let conformance = ctx.alloc_conformance(NormalConformance::with_source(
        protocol,
        class,
        class,
        Span::DUMMY,
        ConformanceSource::new(loader.clone(), ConformanceToken::new(7)),
    ));

    ctx.mark_conformance_used(ConformanceRef::Concrete(conformance), class);
    assert_eq!(ctx.conformance(conformance).used_from(), &[class]);
    // Usage tracking is orthogonal to completion.
    assert_eq!(ctx.conformance(conformance).state(), ConformanceState::Incomplete);
    assert_eq!(loader.finish_calls.load(Ordering::Relaxed), 0);
    assert_eq!(resolver.usage_calls.load(Ordering::Relaxed), 1);
}

#[test]
fn abstract_usage_is_a_no_op() {
    let mut ctx = AstContext::new();
    install_counting_resolver(&mut ctx);
    let protocol = alloc_protocol(&mut ctx, "Drawable");
    let class = alloc_class(&mut ctx, "Circle");
    // No concrete record exists to attribute the use to.
    ctx.mark_conformance_used(ConformanceRef::Abstract(protocol), class);
}
