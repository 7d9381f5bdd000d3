//! The AST context: arenas, the session resolver, and lazy accessors.
//!
//! `AstContext` owns every declaration, conformance record, generic
//! environment and pooled type of a compilation unit. Its accessors
//! implement the consumer side of the lazy resolution boundary: on
//! observing an unresolved fact they invoke the installed capability
//! (the session [`Resolver`], or the loader paired with the node's
//! context-data record), cache the answer on the node, and return it.
//! Requesting an already-resolved fact is side-effect-free.

use std::collections::BTreeMap;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::decl::LoadState;
use crate::resolve::{ConformanceConstructionEntry, MemberLoader, NamedMembers, Resolver};
use crate::{
    Access, ConformanceId, ConformanceRef, ConformanceState, ConformanceToken, Decl, DeclFlags,
    DeclId, DeclKind, GenericEnv, GenericEnvId, MemberToken, Name, NormalConformance,
    SharedInterner, StringInterner, TyData, TyId, TyPool,
};

/// Owner of all AST state for one compilation unit.
pub struct AstContext {
    interner: SharedInterner,
    decls: Vec<Decl>,
    conformances: Vec<NormalConformance>,
    generic_envs: Vec<GenericEnv>,
    tys: TyPool,
    /// Module scope: top-level declarations by name. `BTreeMap` for
    /// deterministic iteration.
    top_level: BTreeMap<Name, DeclId>,
    resolver: Option<Arc<dyn Resolver>>,
}

impl AstContext {
    pub fn new() -> Self {
        AstContext::with_interner(Arc::new(StringInterner::new()))
    }

    /// Create a context sharing an existing interner (e.g. with a module
    /// reader that interns names while decoding).
    pub fn with_interner(interner: SharedInterner) -> Self {
        AstContext {
            interner,
            decls: Vec::new(),
            conformances: Vec::new(),
            generic_envs: Vec::new(),
            tys: TyPool::new(),
            top_level: BTreeMap::new(),
            resolver: None,
        }
    }

    // ── Session capabilities ────────────────────────────────────────

    /// Install the session resolver. The association is made exactly once
    /// per context; reinstalling is a contract violation.
    pub fn install_resolver(&mut self, resolver: Arc<dyn Resolver>) {
        assert!(self.resolver.is_none(), "session resolver installed twice");
        self.resolver = Some(resolver);
    }

    #[inline]
    pub fn has_resolver(&self) -> bool {
        self.resolver.is_some()
    }

    fn session_resolver(&self, what: &str) -> Arc<dyn Resolver> {
        self.resolver
            .clone()
            .unwrap_or_else(|| panic!("no resolver installed for lazy resolution of {what}"))
    }

    // ── Arenas ──────────────────────────────────────────────────────

    pub fn alloc_decl(&mut self, decl: Decl) -> DeclId {
        let raw = u32::try_from(self.decls.len())
            .unwrap_or_else(|_| panic!("declaration arena exceeded {} entries", u32::MAX));
        self.decls.push(decl);
        DeclId::from_raw(raw)
    }

    pub fn decl(&self, id: DeclId) -> &Decl {
        let idx = id.raw() as usize;
        assert!(idx < self.decls.len(), "{id:?} does not belong to this context");
        &self.decls[idx]
    }

    pub fn decl_mut(&mut self, id: DeclId) -> &mut Decl {
        let idx = id.raw() as usize;
        assert!(idx < self.decls.len(), "{id:?} does not belong to this context");
        &mut self.decls[idx]
    }

    pub fn decl_count(&self) -> usize {
        self.decls.len()
    }

    pub fn decl_ids(&self) -> impl Iterator<Item = DeclId> {
        (0..self.decls.len()).map(|raw| DeclId::from_raw(raw as u32))
    }

    pub fn alloc_conformance(&mut self, conformance: NormalConformance) -> ConformanceId {
        let raw = u32::try_from(self.conformances.len())
            .unwrap_or_else(|_| panic!("conformance arena exceeded {} entries", u32::MAX));
        self.conformances.push(conformance);
        ConformanceId::from_raw(raw)
    }

    pub fn conformance(&self, id: ConformanceId) -> &NormalConformance {
        let idx = id.raw() as usize;
        assert!(
            idx < self.conformances.len(),
            "{id:?} does not belong to this context"
        );
        &self.conformances[idx]
    }

    pub fn conformance_mut(&mut self, id: ConformanceId) -> &mut NormalConformance {
        let idx = id.raw() as usize;
        assert!(
            idx < self.conformances.len(),
            "{id:?} does not belong to this context"
        );
        &mut self.conformances[idx]
    }

    pub fn conformance_count(&self) -> usize {
        self.conformances.len()
    }

    pub fn alloc_generic_env(&mut self, env: GenericEnv) -> GenericEnvId {
        let raw = u32::try_from(self.generic_envs.len())
            .unwrap_or_else(|_| panic!("generic environment arena exceeded {} entries", u32::MAX));
        self.generic_envs.push(env);
        GenericEnvId::from_raw(raw)
    }

    pub fn generic_env(&self, id: GenericEnvId) -> &GenericEnv {
        let idx = id.raw() as usize;
        assert!(
            idx < self.generic_envs.len(),
            "{id:?} does not belong to this context"
        );
        &self.generic_envs[idx]
    }

    // ── Names, scope, types ─────────────────────────────────────────

    #[inline]
    pub fn interner(&self) -> &SharedInterner {
        &self.interner
    }

    pub fn intern(&self, text: &str) -> Name {
        self.interner.intern(text)
    }

    pub fn name_text(&self, name: Name) -> &'static str {
        self.interner.resolve(name)
    }

    /// Register a declaration in the module scope under its own name.
    pub fn declare_top_level(&mut self, id: DeclId) {
        let name = self.decl(id).name;
        self.top_level.insert(name, id);
    }

    pub fn lookup_top_level(&self, name: Name) -> Option<DeclId> {
        self.top_level.get(&name).copied()
    }

    pub fn intern_ty(&mut self, data: TyData) -> TyId {
        self.tys.intern(data)
    }

    pub fn ty_data(&self, id: TyId) -> &TyData {
        self.tys.data(id)
    }

    // ── Lazy facts resolved by the session resolver ─────────────────

    /// The declaration's type/signature, resolving it on first query.
    pub fn signature_of(&mut self, id: DeclId) -> TyId {
        {
            let slot = &self.decl(id).signature;
            if let Some(&ty) = slot.get() {
                return ty;
            }
            assert!(
                !slot.is_in_progress(),
                "circular resolution: declaration signature depends on itself"
            );
        }
        let resolver = self.session_resolver("declaration signature");
        resolver.resolve_decl_signature(self, id);
        *self.decl(id).signature.expect_resolved("declaration signature")
    }

    /// The declaration's access level, resolving it on first query.
    pub fn access_of(&mut self, id: DeclId) -> Access {
        {
            let slot = &self.decl(id).access;
            if let Some(&access) = slot.get() {
                return access;
            }
            assert!(
                !slot.is_in_progress(),
                "circular resolution: access level depends on itself"
            );
        }
        let resolver = self.session_resolver("access level");
        resolver.resolve_access(self, id);
        *self.decl(id).access.expect_resolved("access level")
    }

    /// The ancestor declaration this one overrides, resolving on first
    /// query. `None` is the cached "overrides nothing" answer.
    pub fn overridden_of(&mut self, id: DeclId) -> Option<DeclId> {
        {
            let slot = &self.decl(id).overridden;
            if let Some(&overridden) = slot.get() {
                return overridden;
            }
            assert!(
                !slot.is_in_progress(),
                "circular resolution: overridden declaration depends on itself"
            );
        }
        let resolver = self.session_resolver("overridden declaration");
        resolver.resolve_overridden(self, id);
        *self.decl(id).overridden.expect_resolved("overridden declaration")
    }

    /// Whether the declaration is exposed to the host-runtime bridge.
    pub fn is_bridged(&mut self, id: DeclId) -> bool {
        {
            let slot = &self.decl(id).bridged;
            if let Some(&bridged) = slot.get() {
                return bridged;
            }
            assert!(
                !slot.is_in_progress(),
                "circular resolution: bridging bit depends on itself"
            );
        }
        let resolver = self.session_resolver("bridging bit");
        resolver.resolve_is_bridged(self, id);
        *self.decl(id).bridged.expect_resolved("bridging bit")
    }

    /// The superclass of a class or protocol; `None` is the cached "no
    /// superclass" answer.
    pub fn superclass_of(&mut self, id: DeclId) -> Option<TyId> {
        {
            let decl = self.decl(id);
            let slot = match &decl.kind {
                DeclKind::Class(c) => &c.superclass,
                DeclKind::Protocol(p) => &p.superclass,
                other => panic!("superclass query on {}", other.name()),
            };
            if let Some(&cached) = slot.get() {
                return cached;
            }
            assert!(
                !slot.is_in_progress(),
                "circular resolution: superclass depends on itself"
            );
        }
        let resolver = self.session_resolver("superclass");
        let superclass = resolver.superclass(self, id);
        debug_assert!(
            match &self.decl(id).kind {
                DeclKind::Class(c) => c.superclass.is_resolved(),
                DeclKind::Protocol(p) => p.superclass.is_resolved(),
                _ => false,
            },
            "resolver returned without establishing superclass"
        );
        superclass
    }

    /// The underlying raw type of an enum; `None` is the cached "no raw
    /// type" answer.
    pub fn raw_type_of(&mut self, id: DeclId) -> Option<TyId> {
        {
            let decl = self.decl(id);
            let DeclKind::Enum(e) = &decl.kind else {
                panic!("raw type query on {}", decl.kind.name());
            };
            if let Some(&cached) = e.raw_type.get() {
                return cached;
            }
            assert!(
                !e.raw_type.is_in_progress(),
                "circular resolution: raw type depends on itself"
            );
        }
        let resolver = self.session_resolver("raw type");
        let raw = resolver.raw_type(self, id);
        debug_assert!(
            matches!(&self.decl(id).kind, DeclKind::Enum(e) if e.raw_type.is_resolved()),
            "resolver returned without establishing raw type"
        );
        raw
    }

    /// Resolve one entry of an inheritance/conformance clause by position.
    ///
    /// `index` must be within the number of syntactic entries; out of range
    /// is a programming error, not a recoverable condition.
    pub fn inherited_type_of(&mut self, id: DeclId, index: usize) -> TyId {
        let len = self.decl(id).inherited_entries().map_or(0, <[_]>::len);
        assert!(
            index < len,
            "inherited type index {index} out of range for clause of length {len}"
        );
        if let Some(entries) = self.decl(id).inherited_entries() {
            if let Some(ty) = entries[index].resolved {
                return ty;
            }
        }
        let resolver = self.session_resolver("inherited type");
        resolver.inherited_type(self, id, index)
    }

    /// Resolve a protocol's trailing `where` clause in place. Idempotent.
    pub fn ensure_trailing_where_resolved(&mut self, id: DeclId) {
        {
            let decl = self.decl(id);
            let DeclKind::Protocol(p) = &decl.kind else {
                panic!("trailing where clause query on {}", decl.kind.name());
            };
            if p.where_resolved {
                return;
            }
        }
        let resolver = self.session_resolver("trailing where clause");
        resolver.resolve_trailing_where(self, id);
    }

    // ── Extensions ──────────────────────────────────────────────────

    /// The nominal an extension extends, binding the extension on first
    /// query. `None` is the cached answer for an unbindable extension.
    pub fn extended_nominal_of(&mut self, id: DeclId) -> Option<DeclId> {
        {
            let decl = self.decl(id);
            let DeclKind::Extension(x) = &decl.kind else {
                panic!("extension binding query on {}", decl.kind.name());
            };
            if let Some(&bound) = x.extended.get() {
                return bound;
            }
            assert!(
                !x.extended.is_in_progress(),
                "circular resolution: extension binding depends on itself"
            );
        }
        let resolver = self.session_resolver("extension binding");
        resolver.bind_extension(self, id);
        *self
            .decl(id)
            .extension()
            .extended
            .expect_resolved("extension binding")
    }

    /// Fully resolve an extension's applicability. Idempotent.
    pub fn ensure_extension_resolved(&mut self, id: DeclId) {
        if self.decl(id).extension().fully_resolved {
            return;
        }
        let resolver = self.session_resolver("extension resolution");
        resolver.resolve_extension(self, id);
    }

    /// The protocols named in an extension's conformance clause, with
    /// source positions, without requiring full extension resolution.
    pub fn extension_conformance_protocols(
        &mut self,
        id: DeclId,
    ) -> SmallVec<[ConformanceConstructionEntry; 4]> {
        let resolver = self.session_resolver("extension conformance clause");
        resolver.extension_conformance_protocols(self, id)
    }

    // ── Implicit members ────────────────────────────────────────────

    /// Synthesize any implicitly-declared constructors of a nominal.
    /// Idempotent.
    pub fn ensure_implicit_constructors(&mut self, id: DeclId) {
        if self.decl(id).flags.contains(DeclFlags::IMPLICIT_CTORS_DONE) {
            return;
        }
        let resolver = self.session_resolver("implicit constructors");
        resolver.resolve_implicit_constructors(self, id);
    }

    /// Synthesize the implicitly-generated member with the given name, if
    /// the nominal has one. Unknown names are a no-op.
    pub fn ensure_implicit_member(&mut self, id: DeclId, name: Name) {
        let resolver = self.session_resolver("implicit member");
        resolver.resolve_implicit_member(self, id, name);
    }

    // ── Members and conformances behind loaders ─────────────────────

    fn member_load_source(&self, id: DeclId) -> (Arc<dyn MemberLoader>, MemberToken) {
        let decl = self.decl(id);
        let data = decl.lazy_data().unwrap_or_else(|| {
            panic!(
                "{} `{}` has pending members but no context data record",
                decl.kind.name(),
                self.name_text(decl.name)
            )
        });
        (data.loader().clone(), data.members_token())
    }

    fn conformance_load_source(&self, id: DeclId) -> (Arc<dyn MemberLoader>, ConformanceToken) {
        let decl = self.decl(id);
        let data = decl.lazy_data().unwrap_or_else(|| {
            panic!(
                "{} `{}` has pending conformances but no context data record",
                decl.kind.name(),
                self.name_text(decl.name)
            )
        });
        (data.loader().clone(), data.conformances_token())
    }

    /// The complete member list of an iterable context, loading it through
    /// the node's record on first query.
    pub fn members_of(&mut self, id: DeclId) -> &[DeclId] {
        let pending = {
            let decl = self.decl(id);
            let storage = decl
                .member_storage()
                .unwrap_or_else(|| panic!("member query on {}", decl.kind.name()));
            storage.state() == LoadState::Pending
        };
        if pending {
            let (loader, token) = self.member_load_source(id);
            let members = loader.load_all_members(self, id, token);
            tracing::debug!(decl = id.raw(), count = members.len(), "loaded member list");
            self.decl_mut(id)
                .member_storage_mut()
                .unwrap_or_else(|| unreachable!())
                .install_loaded(members);
        }
        self.decl(id)
            .member_storage()
            .unwrap_or_else(|| unreachable!())
            .installed()
    }

    /// Members currently present, without consulting any loader.
    pub fn installed_members(&self, id: DeclId) -> &[DeclId] {
        let decl = self.decl(id);
        decl.member_storage()
            .unwrap_or_else(|| panic!("member query on {}", decl.kind.name()))
            .installed()
    }

    /// The members of an iterable context matching `name`.
    ///
    /// Prefers the loader's narrow query; falls back to a full member load
    /// plus filter when the loader reports the query unsupported. Results
    /// answered by the loader are cached per name.
    pub fn named_members_of(&mut self, id: DeclId, name: Name) -> Vec<DeclId> {
        let state = {
            let decl = self.decl(id);
            let storage = decl
                .member_storage()
                .unwrap_or_else(|| panic!("member query on {}", decl.kind.name()));
            if let Some(cached) = storage.cached_named(name) {
                return cached.to_vec();
            }
            storage.state()
        };

        if state == LoadState::Complete {
            return self.filter_installed_by_name(id, name);
        }

        let (loader, token) = self.member_load_source(id);
        match loader.load_named_members(self, id, name, token) {
            NamedMembers::Found(members) => {
                self.decl_mut(id)
                    .member_storage_mut()
                    .unwrap_or_else(|| unreachable!())
                    .cache_named(name, members.clone());
                members
            }
            NamedMembers::Empty => {
                self.decl_mut(id)
                    .member_storage_mut()
                    .unwrap_or_else(|| unreachable!())
                    .cache_named(name, Vec::new());
                Vec::new()
            }
            NamedMembers::Unsupported => {
                tracing::debug!(decl = id.raw(), "named lookup unsupported, loading all members");
                let _ = self.members_of(id);
                self.filter_installed_by_name(id, name)
            }
        }
    }

    fn filter_installed_by_name(&self, id: DeclId, name: Name) -> Vec<DeclId> {
        self.installed_members(id)
            .iter()
            .copied()
            .filter(|&member| self.decl(member).name == name)
            .collect()
    }

    /// The conformance records of a nominal, fetching them through the
    /// node's record on first query and installing them with deduplication.
    pub fn conformances_of(&mut self, id: DeclId) -> Vec<ConformanceId> {
        let pending = {
            let decl = self.decl(id);
            let storage = decl
                .conformance_storage()
                .unwrap_or_else(|| panic!("conformance query on {}", decl.kind.name()));
            storage.state() == LoadState::Pending
        };
        if pending {
            let (loader, token) = self.conformance_load_source(id);
            let mut fetched = Vec::new();
            loader.load_all_conformances(self, id, token, &mut fetched);
            tracing::debug!(decl = id.raw(), count = fetched.len(), "loaded conformances");
            let storage = self
                .decl_mut(id)
                .conformance_storage_mut()
                .unwrap_or_else(|| unreachable!());
            for conformance in fetched {
                storage.install(conformance);
            }
            storage.mark_complete();
        }
        self.decl(id)
            .conformance_storage()
            .unwrap_or_else(|| unreachable!())
            .installed()
            .to_vec()
    }

    /// Conformances currently installed, without consulting any loader.
    pub fn installed_conformances(&self, id: DeclId) -> &[ConformanceId] {
        let decl = self.decl(id);
        decl.conformance_storage()
            .unwrap_or_else(|| panic!("conformance query on {}", decl.kind.name()))
            .installed()
    }

    // ── Witnesses ───────────────────────────────────────────────────

    fn ensure_conformance_finished(&mut self, id: ConformanceId) {
        let (loader, token) = {
            let conformance = self.conformance(id);
            match conformance.state() {
                ConformanceState::Complete => return,
                ConformanceState::Completing => {
                    panic!("circular resolution: conformance completion depends on itself")
                }
                ConformanceState::Incomplete => match conformance.source() {
                    None => return,
                    Some(source) => (source.loader().clone(), source.token()),
                },
            }
        };
        self.conformance_mut(id).begin_completion();
        loader.finish_conformance(self, id, token);
        self.conformance_mut(id).finish_completion();
        tracing::debug!(conformance = id.raw(), "finished conformance from source");
    }

    /// The type satisfying an associated-type requirement for a
    /// conformance, completing the conformance and resolving the entry as
    /// needed.
    ///
    /// `assoc` must be a requirement of the conformance's protocol.
    pub fn type_witness(&mut self, id: ConformanceId, assoc: DeclId) -> TyId {
        let protocol = self.conformance(id).protocol;
        assert_eq!(
            self.decl(assoc).parent,
            Some(protocol),
            "associated type does not belong to the conformance's protocol"
        );
        if let Some(&ty) = self.conformance(id).type_witnesses.get(&assoc) {
            return ty;
        }
        self.ensure_conformance_finished(id);
        if let Some(&ty) = self.conformance(id).type_witnesses.get(&assoc) {
            return ty;
        }
        let resolver = self.session_resolver("type witness");
        resolver.resolve_type_witness(self, id, assoc);
        self.conformance(id)
            .type_witnesses
            .get(&assoc)
            .copied()
            .unwrap_or_else(|| panic!("resolver returned without establishing type witness"))
    }

    /// The declaration satisfying a value requirement for a conformance.
    /// `None` records that resolution ran and found no witness.
    ///
    /// `requirement` must belong to the conformance's protocol.
    pub fn witness(&mut self, id: ConformanceId, requirement: DeclId) -> Option<DeclId> {
        let protocol = self.conformance(id).protocol;
        assert_eq!(
            self.decl(requirement).parent,
            Some(protocol),
            "requirement does not belong to the conformance's protocol"
        );
        if let Some(&witness) = self.conformance(id).witnesses.get(&requirement) {
            return witness;
        }
        self.ensure_conformance_finished(id);
        if let Some(&witness) = self.conformance(id).witnesses.get(&requirement) {
            return witness;
        }
        let resolver = self.session_resolver("witness");
        resolver.resolve_witness(self, id, requirement);
        self.conformance(id)
            .witnesses
            .get(&requirement)
            .copied()
            .unwrap_or_else(|| panic!("resolver returned without establishing witness"))
    }

    /// Record that a conformance was referenced from `from`. Never forces
    /// completion.
    pub fn mark_conformance_used(&mut self, conformance: ConformanceRef, from: DeclId) {
        let resolver = self.session_resolver("conformance usage");
        resolver.mark_conformance_used(self, conformance, from);
    }

    // ── Associated-type defaults and generic environments ───────────

    /// The declared default type of an associated-type requirement, absent
    /// if none was declared.
    pub fn associated_type_default_of(&mut self, id: DeclId) -> Option<TyId> {
        {
            let decl = self.decl(id);
            let DeclKind::AssocType(a) = &decl.kind else {
                panic!("associated type default query on {}", decl.kind.name());
            };
            if let Some(&cached) = a.default_ty.get() {
                return cached;
            }
            assert!(
                !a.default_ty.is_in_progress(),
                "circular resolution: associated type default depends on itself"
            );
        }
        if self.decl(id).lazy_data().is_some() {
            let (loader, token) = {
                let data = self.decl(id).lazy_data().unwrap_or_else(|| unreachable!());
                (data.loader().clone(), data.decl_token())
            };
            let default = loader.load_associated_type_default(self, id, token);
            let DeclKind::AssocType(a) = &mut self.decl_mut(id).kind else {
                unreachable!()
            };
            a.default_ty.fulfill(default, "associated type default");
            return default;
        }
        // Live syntax: the resolver materializes the default alongside the
        // signature.
        let _ = self.signature_of(id);
        let DeclKind::AssocType(a) = &self.decl(id).kind else {
            unreachable!()
        };
        *a.default_ty.expect_resolved("associated type default")
    }

    /// The reconstructed generic environment of a deserialized generic
    /// context. Live contexts resolve to `None`; their environments are
    /// built during full checking, outside this boundary.
    pub fn generic_environment_of(&mut self, id: DeclId) -> Option<GenericEnvId> {
        {
            let slot = &self.decl(id).generic_env;
            if let Some(&cached) = slot.get() {
                return cached;
            }
            assert!(
                !slot.is_in_progress(),
                "circular resolution: generic environment depends on itself"
            );
        }
        let env = if self.decl(id).lazy_data().is_some() {
            let (loader, token) = {
                let data = self.decl(id).lazy_data().unwrap_or_else(|| unreachable!());
                (data.loader().clone(), data.generic_env_token())
            };
            loader.load_generic_environment(self, id, token)
        } else {
            None
        };
        self.decl_mut(id)
            .generic_env
            .fulfill(env, "generic environment");
        env
    }
}

impl Default for AstContext {
    fn default() -> Self {
        AstContext::new()
    }
}

#[cfg(test)]
mod tests;
