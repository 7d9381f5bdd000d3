//! Module document reader.
//!
//! Decodes a module document and serves its contents to a consuming
//! compilation through the AST's loader capabilities. Declarations attach
//! as stubs whose member and conformance lists are still behind their
//! opaque tokens; the contents materialize on first query.

use std::sync::Arc;

use vela_ast::{
    AssocTypeDecl, AstContext, ClassDecl, ConformanceId, ConformanceLoader, ConformanceSource,
    ConformanceStorage, ConformanceToken, ContextData, CtorDecl, Decl, DeclId, DeclKind,
    DeclToken, EnumDecl, FuncDecl, GenericContextData, GenericEnv, GenericEnvId, GenericEnvToken,
    IterableContextData, LazySlot, MemberLoader, MemberStorage, MemberToken, NamedMembers,
    NormalConformance, ProtocolDecl, Requirement, RequirementKind, Span, TyData, TyId,
    TypeAliasDecl, VarDecl,
};

use crate::format::{
    DeclRecord, DeclRecordKind, ModuleDoc, ModuleError, RequirementKindRecord, TyRecord, MAGIC,
    NO_DATA, VERSION,
};

/// Reader over one decoded module document.
///
/// Implements [`MemberLoader`] and [`ConformanceLoader`]; the loader
/// references installed on AST nodes share the decoded document.
pub struct ModuleReader {
    doc: Arc<ModuleDoc>,
}

impl ModuleReader {
    /// Decode and validate a module document.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ModuleError> {
        let doc: ModuleDoc = bincode::deserialize(bytes)
            .map_err(|err| ModuleError::Malformed(err.to_string()))?;
        if doc.magic != MAGIC {
            return Err(ModuleError::BadMagic(doc.magic));
        }
        if doc.version != VERSION {
            return Err(ModuleError::UnsupportedVersion(doc.version));
        }
        Ok(ModuleReader { doc: Arc::new(doc) })
    }

    /// The serialized module's name.
    pub fn module_name(&self) -> &str {
        &self.doc.name
    }

    /// Number of serialized declaration records.
    pub fn decl_count(&self) -> usize {
        self.doc.decls.len()
    }

    /// A fresh loader handle over the same document.
    fn handle(&self) -> Arc<ModuleReader> {
        Arc::new(ModuleReader {
            doc: self.doc.clone(),
        })
    }

    /// Attach every top-level nominal of the document to `ctx` as lazy
    /// stubs, registering them in the module scope.
    pub fn attach_all(&self, ctx: &mut AstContext) -> Vec<DeclId> {
        (0..self.doc.decls.len() as u64)
            .filter_map(|index| self.attach_nominal(ctx, index))
            .collect()
    }

    /// Attach the nominal at `index` to `ctx` as a lazy stub.
    ///
    /// The stub carries a context-data record pairing this reader with the
    /// record's tokens; members, conformances and the generic environment
    /// stay unloaded until queried. Returns `None` for indices that do not
    /// name a nominal record.
    pub fn attach_nominal(&self, ctx: &mut AstContext, index: u64) -> Option<DeclId> {
        let record = self.doc.decls.get(index as usize)?;
        let name = ctx.intern(&record.name);
        let (kind, member_list, conformance_list, generic_env) = match &record.kind {
            DeclRecordKind::Class {
                member_list,
                conformance_list,
                generic_env,
            } => {
                let mut class = ClassDecl::new(Vec::new(), MemberStorage::pending());
                class.conformances = if *conformance_list == NO_DATA {
                    ConformanceStorage::parsed()
                } else {
                    ConformanceStorage::pending()
                };
                (
                    DeclKind::Class(class),
                    *member_list,
                    *conformance_list,
                    *generic_env,
                )
            }
            DeclRecordKind::Enum {
                raw,
                member_list,
                conformance_list,
            } => {
                let mut payload = EnumDecl::new(Vec::new(), MemberStorage::pending());
                // The raw type was resolved by the producing compilation;
                // install it as an already resolved fact.
                let raw = raw.as_ref().map(|record| self.resolve_ty(ctx, record));
                payload.raw_type.fulfill(raw, "raw type");
                payload.conformances = if *conformance_list == NO_DATA {
                    ConformanceStorage::parsed()
                } else {
                    ConformanceStorage::pending()
                };
                (
                    DeclKind::Enum(payload),
                    *member_list,
                    *conformance_list,
                    NO_DATA,
                )
            }
            DeclRecordKind::Protocol {
                member_list,
                generic_env,
            } => (
                DeclKind::Protocol(ProtocolDecl::new(Vec::new(), MemberStorage::pending())),
                *member_list,
                NO_DATA,
                *generic_env,
            ),
            _ => return None,
        };

        let mut decl = Decl::new(name, Span::DUMMY, kind);
        decl.install_lazy_data(IterableContextData::new(
            GenericContextData::new(
                ContextData::new(self.handle(), DeclToken::new(index)),
                GenericEnvToken::new(generic_env),
            ),
            MemberToken::new(member_list),
            ConformanceToken::new(conformance_list),
        ));
        let id = ctx.alloc_decl(decl);
        ctx.declare_top_level(id);
        tracing::debug!(module = %self.doc.name, decl = %record.name, "attached lazy stub");
        Some(id)
    }

    // ── Record materialization ──────────────────────────────────────

    fn resolve_ty(&self, ctx: &mut AstContext, record: &TyRecord) -> TyId {
        match record {
            TyRecord::Int => TyId::INT,
            TyRecord::Bool => TyId::BOOL,
            TyRecord::String => TyId::STRING,
            TyRecord::Unit => TyId::UNIT,
            TyRecord::Error => TyId::ERROR,
            TyRecord::Named(name) => {
                let name = ctx.intern(name);
                match ctx.lookup_top_level(name) {
                    Some(decl) => ctx.intern_ty(TyData::Nominal(decl)),
                    None => {
                        tracing::debug!(
                            ty = ctx.name_text(name),
                            "serialized type does not resolve in the consuming module"
                        );
                        TyId::ERROR
                    }
                }
            }
            TyRecord::Fn { params, ret } => {
                let params: Vec<TyId> = params
                    .iter()
                    .map(|param| self.resolve_ty(ctx, param))
                    .collect();
                let ret = self.resolve_ty(ctx, ret);
                ctx.intern_ty(TyData::Fn { params, ret })
            }
        }
    }

    /// Materialize one member record as a declaration with its serialized
    /// facts already resolved.
    fn materialize_member(
        &self,
        ctx: &mut AstContext,
        parent: DeclId,
        index: u64,
    ) -> Option<DeclId> {
        let record: &DeclRecord = self.doc.decls.get(index as usize)?;
        let name = ctx.intern(&record.name);
        let kind = record.kind.clone();
        let mut decl = match kind {
            DeclRecordKind::Func { params, ret } => {
                let params: Vec<TyId> = params
                    .iter()
                    .map(|param| self.resolve_ty(ctx, param))
                    .collect();
                let ret = self.resolve_ty(ctx, &ret);
                let signature = ctx.intern_ty(TyData::Fn { params, ret });
                let mut decl = Decl::new(
                    name,
                    Span::DUMMY,
                    DeclKind::Func(FuncDecl {
                        params: Vec::new(),
                        ret: None,
                    }),
                );
                decl.signature.fulfill(signature, "declaration signature");
                decl
            }
            DeclRecordKind::Ctor { params } => {
                let params: Vec<TyId> = params
                    .iter()
                    .map(|param| self.resolve_ty(ctx, param))
                    .collect();
                let produced = ctx.intern_ty(TyData::Nominal(parent));
                let signature = ctx.intern_ty(TyData::Fn {
                    params,
                    ret: produced,
                });
                let mut decl = Decl::new(
                    name,
                    Span::DUMMY,
                    DeclKind::Ctor(CtorDecl { params: Vec::new() }),
                );
                decl.signature.fulfill(signature, "declaration signature");
                decl
            }
            DeclRecordKind::Var { ty } => {
                let ty = self.resolve_ty(ctx, &ty);
                let mut decl = Decl::new(name, Span::DUMMY, DeclKind::Var(VarDecl { repr: None }));
                decl.signature.fulfill(ty, "declaration signature");
                decl
            }
            DeclRecordKind::TypeAlias { target } => {
                let target = self.resolve_ty(ctx, &target);
                let mut alias = TypeAliasDecl {
                    repr: vela_ast::TypeRepr::Named(name, Span::DUMMY),
                    aliased: LazySlot::Unresolved,
                };
                alias.aliased.fulfill(target, "type alias target");
                let mut decl = Decl::new(name, Span::DUMMY, DeclKind::TypeAlias(alias));
                decl.signature.fulfill(target, "declaration signature");
                decl
            }
            DeclRecordKind::AssocType { .. } => {
                // The default stays behind the record's token and loads on
                // demand through `load_associated_type_default`.
                let mut decl = Decl::new(
                    name,
                    Span::DUMMY,
                    DeclKind::AssocType(AssocTypeDecl {
                        default_repr: None,
                        default_ty: LazySlot::Unresolved,
                    }),
                );
                decl.install_lazy_data(IterableContextData::new(
                    GenericContextData::new(
                        ContextData::new(self.handle(), DeclToken::new(index)),
                        GenericEnvToken::new(NO_DATA),
                    ),
                    MemberToken::new(NO_DATA),
                    ConformanceToken::new(NO_DATA),
                ));
                decl
            }
            DeclRecordKind::Class { .. }
            | DeclRecordKind::Enum { .. }
            | DeclRecordKind::Protocol { .. } => {
                tracing::debug!(
                    member = %record.name,
                    "nominal record referenced as a member, skipping"
                );
                return None;
            }
        };
        decl.parent = Some(parent);
        Some(ctx.alloc_decl(decl))
    }

    /// Find a declaration among a context's members by name, loading the
    /// members if needed.
    fn find_member_by_name(
        &self,
        ctx: &mut AstContext,
        container: DeclId,
        name: &str,
    ) -> Option<DeclId> {
        let name = ctx.intern(name);
        ctx.named_members_of(container, name).first().copied()
    }
}

impl MemberLoader for ModuleReader {
    fn load_all_members(
        &self,
        ctx: &mut AstContext,
        decl: DeclId,
        token: MemberToken,
    ) -> Vec<DeclId> {
        let Some(list) = self.doc.member_lists.get(token.raw() as usize) else {
            tracing::debug!(token = token.raw(), "member list token out of range");
            return Vec::new();
        };
        let indices = list.members.clone();
        indices
            .into_iter()
            .filter_map(|index| self.materialize_member(ctx, decl, index))
            .collect()
    }

    fn load_named_members(
        &self,
        ctx: &mut AstContext,
        decl: DeclId,
        name: vela_ast::Name,
        token: MemberToken,
    ) -> NamedMembers {
        let Some(list) = self.doc.member_lists.get(token.raw() as usize) else {
            tracing::debug!(token = token.raw(), "member list token out of range");
            return NamedMembers::Empty;
        };
        // Documents written without a name index cannot answer narrow
        // queries; the caller falls back to a full load.
        let Some(by_name) = &list.by_name else {
            return NamedMembers::Unsupported;
        };
        let text = ctx.name_text(name);
        let indices: Vec<u64> = by_name
            .iter()
            .find(|(entry, _)| entry == text)
            .map(|(_, indices)| indices.clone())
            .unwrap_or_default();
        let members: Vec<DeclId> = indices
            .into_iter()
            .filter_map(|index| self.materialize_member(ctx, decl, index))
            .collect();
        NamedMembers::from_members(members)
    }

    fn load_all_conformances(
        &self,
        ctx: &mut AstContext,
        decl: DeclId,
        token: ConformanceToken,
        out: &mut Vec<ConformanceId>,
    ) {
        let Some(records) = self.doc.conformance_lists.get(token.raw() as usize) else {
            tracing::debug!(token = token.raw(), "conformance list token out of range");
            return;
        };
        for record in records.clone() {
            let protocol_name = ctx.intern(&record.protocol);
            let Some(protocol) = ctx.lookup_top_level(protocol_name) else {
                tracing::debug!(
                    protocol = %record.protocol,
                    "serialized conformance names an unknown protocol, skipping"
                );
                continue;
            };
            if !matches!(ctx.decl(protocol).kind, DeclKind::Protocol(_)) {
                continue;
            }
            let conformance = NormalConformance::with_source(
                protocol,
                decl,
                decl,
                Span::DUMMY,
                ConformanceSource::new(self.handle(), ConformanceToken::new(record.witness_table)),
            );
            out.push(ctx.alloc_conformance(conformance));
        }
    }

    fn load_associated_type_default(
        &self,
        ctx: &mut AstContext,
        _assoc: DeclId,
        token: DeclToken,
    ) -> Option<TyId> {
        let record = self.doc.decls.get(token.raw() as usize)?;
        match record.kind.clone() {
            DeclRecordKind::AssocType { default } => {
                default.map(|record| self.resolve_ty(ctx, &record))
            }
            _ => {
                tracing::debug!(token = token.raw(), "token is not an associated type record");
                None
            }
        }
    }

    fn load_generic_environment(
        &self,
        ctx: &mut AstContext,
        decl: DeclId,
        token: GenericEnvToken,
    ) -> Option<GenericEnvId> {
        let record = self.doc.generic_envs.get(token.raw() as usize)?.clone();
        let params: Vec<vela_ast::Name> = record
            .params
            .iter()
            .map(|param| ctx.intern(param))
            .collect();
        let requirements: Vec<Requirement> = record
            .requirements
            .iter()
            .map(|requirement| Requirement {
                subject: ctx.intern(&requirement.subject),
                kind: match requirement.kind {
                    RequirementKindRecord::Conforms => RequirementKind::Conforms,
                    RequirementKindRecord::Superclass => RequirementKind::Superclass,
                    RequirementKindRecord::SameType => RequirementKind::SameType,
                },
                bound: self.resolve_ty(ctx, &requirement.bound),
            })
            .collect();
        Some(ctx.alloc_generic_env(GenericEnv {
            owner: decl,
            params,
            requirements,
        }))
    }
}

impl ConformanceLoader for ModuleReader {
    fn finish_conformance(
        &self,
        ctx: &mut AstContext,
        conformance: ConformanceId,
        token: ConformanceToken,
    ) {
        let Some(table) = self.doc.witness_tables.get(token.raw() as usize).cloned() else {
            tracing::debug!(token = token.raw(), "witness table token out of range");
            return;
        };
        let (protocol, conforming) = {
            let record = ctx.conformance(conformance);
            (record.protocol, record.conforming)
        };

        for (assoc_name, ty) in &table.type_witnesses {
            let Some(assoc) = self.find_member_by_name(ctx, protocol, assoc_name) else {
                tracing::debug!(
                    requirement = %assoc_name,
                    "serialized type witness names an unknown requirement, skipping"
                );
                continue;
            };
            let witness = self.resolve_ty(ctx, ty);
            ctx.conformance_mut(conformance)
                .type_witnesses
                .insert(assoc, witness);
        }

        for (requirement_name, witness_name) in &table.witnesses {
            let Some(requirement) = self.find_member_by_name(ctx, protocol, requirement_name)
            else {
                tracing::debug!(
                    requirement = %requirement_name,
                    "serialized witness names an unknown requirement, skipping"
                );
                continue;
            };
            let witness = witness_name
                .as_ref()
                .and_then(|name| self.find_member_by_name(ctx, conforming, name));
            ctx.conformance_mut(conformance)
                .witnesses
                .insert(requirement, witness);
        }
    }
}
