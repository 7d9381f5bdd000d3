//! Module document writer.
//!
//! Serializes checked top-level nominals - their members, conformances and
//! generic environments - into the flat record tables of a [`ModuleDoc`].
//! The writer reads facts through the context's accessors, so anything not
//! yet resolved is resolved on the way out; a session resolver must be
//! installed on the context being written.

use vela_ast::{AstContext, DeclId, DeclKind, RequirementKind, TyData, TyId};

use crate::format::{
    ConformanceRecord, DeclRecord, DeclRecordKind, GenericEnvRecord, MemberList, ModuleDoc,
    ModuleError, RequirementKindRecord, RequirementRecord, TyRecord, WitnessTable, NO_DATA,
};

/// Serializes declarations into a module document.
pub struct ModuleWriter {
    doc: ModuleDoc,
    name_index: bool,
}

impl ModuleWriter {
    pub fn new(module_name: &str) -> Self {
        ModuleWriter {
            doc: ModuleDoc::new(module_name),
            name_index: true,
        }
    }

    /// Write member lists without a per-name index; readers will report
    /// narrow member queries as unsupported.
    #[must_use]
    pub fn without_name_index(mut self) -> Self {
        self.name_index = false;
        self
    }

    /// Serialize a top-level nominal with its members, conformances and
    /// generic environment. Returns the declaration's record index.
    pub fn add_nominal(&mut self, ctx: &mut AstContext, decl: DeclId) -> u64 {
        let record_index = self.doc.decls.len() as u64;
        // Reserve the slot so member records follow their container.
        self.doc.decls.push(DeclRecord {
            name: ctx.name_text(ctx.decl(decl).name).to_owned(),
            kind: DeclRecordKind::Var { ty: TyRecord::Error },
        });

        let member_list = self.write_members(ctx, decl);
        let generic_env = self.write_generic_env(ctx, decl);
        enum Shape {
            Class,
            Enum,
            Protocol,
        }
        let shape = match &ctx.decl(decl).kind {
            DeclKind::Class(_) => Shape::Class,
            DeclKind::Enum(_) => Shape::Enum,
            DeclKind::Protocol(_) => Shape::Protocol,
            other => panic!("serializing {} as a top-level nominal", other.name()),
        };
        let kind = match shape {
            Shape::Class => DeclRecordKind::Class {
                member_list,
                conformance_list: self.write_conformances(ctx, decl),
                generic_env,
            },
            Shape::Enum => {
                let raw = ctx.raw_type_of(decl).map(|ty| self.ty_record(ctx, ty));
                DeclRecordKind::Enum {
                    raw,
                    member_list,
                    conformance_list: self.write_conformances(ctx, decl),
                }
            }
            Shape::Protocol => DeclRecordKind::Protocol {
                member_list,
                generic_env,
            },
        };
        self.doc.decls[record_index as usize].kind = kind;
        record_index
    }

    /// Encode the document.
    pub fn finish(self) -> Result<Vec<u8>, ModuleError> {
        bincode::serialize(&self.doc).map_err(|err| ModuleError::Malformed(err.to_string()))
    }

    fn write_members(&mut self, ctx: &mut AstContext, container: DeclId) -> u64 {
        let members = ctx.members_of(container).to_vec();
        let mut list = MemberList::default();
        let mut by_name: Vec<(String, Vec<u64>)> = Vec::new();
        for member in members {
            let index = self.write_member(ctx, member);
            list.members.push(index);
            let name = ctx.name_text(ctx.decl(member).name).to_owned();
            match by_name.iter_mut().find(|(entry, _)| *entry == name) {
                Some((_, indices)) => indices.push(index),
                None => by_name.push((name, vec![index])),
            }
        }
        if self.name_index {
            list.by_name = Some(by_name);
        }
        let list_index = self.doc.member_lists.len() as u64;
        self.doc.member_lists.push(list);
        list_index
    }

    fn write_member(&mut self, ctx: &mut AstContext, member: DeclId) -> u64 {
        enum Shape {
            Func,
            Ctor,
            Var,
            TypeAlias,
            AssocType,
        }
        let shape = match &ctx.decl(member).kind {
            DeclKind::Func(_) => Shape::Func,
            DeclKind::Ctor(_) => Shape::Ctor,
            DeclKind::Var(_) => Shape::Var,
            DeclKind::TypeAlias(_) => Shape::TypeAlias,
            DeclKind::AssocType(_) => Shape::AssocType,
            other => panic!("serializing {} as a member", other.name()),
        };
        let kind = match shape {
            Shape::Func => {
                let signature = ctx.signature_of(member);
                let (params, ret) = self.fn_parts(ctx, signature);
                DeclRecordKind::Func { params, ret }
            }
            Shape::Ctor => {
                let signature = ctx.signature_of(member);
                let (params, _) = self.fn_parts(ctx, signature);
                DeclRecordKind::Ctor { params }
            }
            Shape::Var => {
                let ty = ctx.signature_of(member);
                DeclRecordKind::Var {
                    ty: self.ty_record(ctx, ty),
                }
            }
            Shape::TypeAlias => {
                let target = ctx.signature_of(member);
                DeclRecordKind::TypeAlias {
                    target: self.ty_record(ctx, target),
                }
            }
            Shape::AssocType => {
                let default = ctx
                    .associated_type_default_of(member)
                    .map(|ty| self.ty_record(ctx, ty));
                DeclRecordKind::AssocType { default }
            }
        };
        let record = DeclRecord {
            name: ctx.name_text(ctx.decl(member).name).to_owned(),
            kind,
        };
        let index = self.doc.decls.len() as u64;
        self.doc.decls.push(record);
        index
    }

    fn write_conformances(&mut self, ctx: &mut AstContext, decl: DeclId) -> u64 {
        let conformances = ctx.conformances_of(decl);
        if conformances.is_empty() {
            return NO_DATA;
        }
        let mut records = Vec::new();
        for id in conformances {
            let mut table = WitnessTable::default();
            let (protocol, type_witnesses, witnesses) = {
                let conformance = ctx.conformance(id);
                (
                    conformance.protocol,
                    conformance.type_witnesses.clone(),
                    conformance.witnesses.clone(),
                )
            };
            for (assoc, ty) in type_witnesses {
                table.type_witnesses.push((
                    ctx.name_text(ctx.decl(assoc).name).to_owned(),
                    self.ty_record(ctx, ty),
                ));
            }
            for (requirement, witness) in witnesses {
                table.witnesses.push((
                    ctx.name_text(ctx.decl(requirement).name).to_owned(),
                    witness.map(|member| ctx.name_text(ctx.decl(member).name).to_owned()),
                ));
            }
            let table_index = self.doc.witness_tables.len() as u64;
            self.doc.witness_tables.push(table);
            records.push(ConformanceRecord {
                protocol: ctx.name_text(ctx.decl(protocol).name).to_owned(),
                witness_table: table_index,
            });
        }
        let list_index = self.doc.conformance_lists.len() as u64;
        self.doc.conformance_lists.push(records);
        list_index
    }

    fn write_generic_env(&mut self, ctx: &mut AstContext, decl: DeclId) -> u64 {
        let Some(env) = ctx.generic_environment_of(decl) else {
            return NO_DATA;
        };
        let (params, requirements) = {
            let env = ctx.generic_env(env);
            (env.params.clone(), env.requirements.clone())
        };
        let record = GenericEnvRecord {
            params: params
                .into_iter()
                .map(|param| ctx.name_text(param).to_owned())
                .collect(),
            requirements: requirements
                .into_iter()
                .map(|requirement| RequirementRecord {
                    subject: ctx.name_text(requirement.subject).to_owned(),
                    kind: match requirement.kind {
                        RequirementKind::Conforms => RequirementKindRecord::Conforms,
                        RequirementKind::Superclass => RequirementKindRecord::Superclass,
                        RequirementKind::SameType => RequirementKindRecord::SameType,
                    },
                    bound: self.ty_record(ctx, requirement.bound),
                })
                .collect(),
        };
        let index = self.doc.generic_envs.len() as u64;
        self.doc.generic_envs.push(record);
        index
    }

    fn fn_parts(&self, ctx: &AstContext, signature: TyId) -> (Vec<TyRecord>, TyRecord) {
        match ctx.ty_data(signature) {
            TyData::Fn { params, ret } => {
                let params = params.clone();
                let ret = *ret;
                (
                    params.iter().map(|&param| self.ty_record(ctx, param)).collect(),
                    self.ty_record(ctx, ret),
                )
            }
            _ => (Vec::new(), TyRecord::Error),
        }
    }

    fn ty_record(&self, ctx: &AstContext, ty: TyId) -> TyRecord {
        match ctx.ty_data(ty) {
            TyData::Int => TyRecord::Int,
            TyData::Bool => TyRecord::Bool,
            TyData::String => TyRecord::String,
            TyData::Unit => TyRecord::Unit,
            TyData::Error => TyRecord::Error,
            TyData::Nominal(decl) => {
                TyRecord::Named(ctx.name_text(ctx.decl(*decl).name).to_owned())
            }
            TyData::Fn { params, ret } => {
                let (params, ret) = (params.clone(), *ret);
                TyRecord::Fn {
                    params: params
                        .iter()
                        .map(|&param| self.ty_record(ctx, param))
                        .collect(),
                    ret: Box::new(self.ty_record(ctx, ret)),
                }
            }
        }
    }
}
