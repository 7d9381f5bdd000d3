use std::sync::Arc;

use pretty_assertions::assert_eq;

use vela_ast::{
    AssocTypeDecl, AstContext, ClassDecl, ConformanceState, Decl, DeclId, DeclKind, EnumDecl,
    FuncDecl, GenericEnv, InheritedEntry, LazySlot, MemberStorage, NormalConformance, Param,
    ProtocolDecl, Requirement, RequirementKind, Span, TyData, TyId, TypeAliasDecl, TypeRepr,
    VarDecl,
};
use vela_typeck::CheckResolver;

use crate::format::ModuleDoc;
use crate::{ModuleError, ModuleReader, ModuleWriter};

// ── Builders ────────────────────────────────────────────────────────

fn named_repr(ctx: &AstContext, name: &str) -> TypeRepr {
    TypeRepr::Named(ctx.intern(name), Span::DUMMY)
}

fn add_member(ctx: &mut AstContext, parent: DeclId, mut decl: Decl) -> DeclId {
    decl.parent = Some(parent);
    let id = ctx.alloc_decl(decl);
    ctx.decl_mut(parent)
        .member_storage_mut()
        .expect("iterable context")
        .push(id);
    id
}

fn add_drawable_protocol(ctx: &mut AstContext) -> (DeclId, DeclId, DeclId) {
    let decl = Decl::new(
        ctx.intern("Drawable"),
        Span::DUMMY,
        DeclKind::Protocol(ProtocolDecl::new(Vec::new(), MemberStorage::parsed(Vec::new()))),
    );
    let protocol = ctx.alloc_decl(decl);
    ctx.declare_top_level(protocol);

    let canvas_default = named_repr(ctx, "String");
    let canvas_decl = Decl::new(
        ctx.intern("Canvas"),
        Span::DUMMY,
        DeclKind::AssocType(AssocTypeDecl {
            default_repr: Some(canvas_default),
            default_ty: LazySlot::Unresolved,
        }),
    );
    let canvas = add_member(ctx, protocol, canvas_decl);
    let draw_ret = named_repr(ctx, "Int");
    let draw_decl = Decl::new(
        ctx.intern("draw"),
        Span::DUMMY,
        DeclKind::Func(FuncDecl {
            params: Vec::new(),
            ret: Some(draw_ret),
        }),
    );
    let draw = add_member(ctx, protocol, draw_decl);
    (protocol, canvas, draw)
}

/// A producing session: `Drawable` protocol, a conforming `Circle` class
/// with resolved witnesses and a generic environment, and a raw-typed
/// `Direction` enum.
fn producing_session() -> (AstContext, Vec<u8>) {
    let mut ctx = AstContext::new();
    let _resolver = CheckResolver::install(&mut ctx);
    let (drawable, canvas, draw_req) = add_drawable_protocol(&mut ctx);

    let circle = {
        let decl = Decl::new(
            ctx.intern("Circle"),
            Span::DUMMY,
            DeclKind::Class(ClassDecl::new(Vec::new(), MemberStorage::parsed(Vec::new()))),
        );
        let id = ctx.alloc_decl(decl);
        ctx.declare_top_level(id);
        id
    };
    let radius_decl = Decl::new(
        ctx.intern("radius"),
        Span::DUMMY,
        DeclKind::Var(VarDecl {
            repr: Some(named_repr(&ctx, "Int")),
        }),
    );
    add_member(&mut ctx, circle, radius_decl);
    let alias_decl = Decl::new(
        ctx.intern("Canvas"),
        Span::DUMMY,
        DeclKind::TypeAlias(TypeAliasDecl {
            repr: named_repr(&ctx, "Int"),
            aliased: LazySlot::Unresolved,
        }),
    );
    add_member(&mut ctx, circle, alias_decl);
    let draw_decl = Decl::new(
        ctx.intern("draw"),
        Span::DUMMY,
        DeclKind::Func(FuncDecl {
            params: Vec::new(),
            ret: Some(named_repr(&ctx, "Int")),
        }),
    );
    add_member(&mut ctx, circle, draw_decl);
    let scale_decl = Decl::new(
        ctx.intern("scale"),
        Span::DUMMY,
        DeclKind::Func(FuncDecl {
            params: vec![Param {
                name: ctx.intern("factor"),
                repr: named_repr(&ctx, "Int"),
                span: Span::DUMMY,
            }],
            ret: None,
        }),
    );
    add_member(&mut ctx, circle, scale_decl);

    // Conformance with both witness kinds resolved.
    let conformance =
        ctx.alloc_conformance(NormalConformance::new(drawable, circle, circle, Span::DUMMY));
    ctx.decl_mut(circle)
        .conformance_storage_mut()
        .expect("class conforms")
        .install(conformance);
    let _ = ctx.type_witness(conformance, canvas);
    let _ = ctx.witness(conformance, draw_req);

    // A generic environment, as the producing checker would have built it.
    let param = ctx.intern("T");
    let bound = ctx.intern_ty(TyData::Nominal(drawable));
    let env = ctx.alloc_generic_env(GenericEnv {
        owner: circle,
        params: vec![param],
        requirements: vec![Requirement {
            subject: param,
            kind: RequirementKind::Conforms,
            bound,
        }],
    });
    ctx.decl_mut(circle)
        .generic_env
        .fulfill(Some(env), "generic environment");

    // A raw-typed enum.
    let direction = {
        let clause = vec![InheritedEntry::new(named_repr(&ctx, "Int"))];
        let decl = Decl::new(
            ctx.intern("Direction"),
            Span::DUMMY,
            DeclKind::Enum(EnumDecl::new(clause, MemberStorage::parsed(Vec::new()))),
        );
        let id = ctx.alloc_decl(decl);
        ctx.declare_top_level(id);
        id
    };

    let mut writer = ModuleWriter::new("geometry");
    writer.add_nominal(&mut ctx, circle);
    writer.add_nominal(&mut ctx, direction);
    let bytes = writer.finish().expect("encode");
    (ctx, bytes)
}

/// A consuming session with the protocol declared live and the module's
/// nominals attached as lazy stubs.
fn consuming_session(bytes: &[u8]) -> (AstContext, Arc<ModuleReader>, Vec<DeclId>) {
    let mut ctx = AstContext::new();
    let _resolver = CheckResolver::install(&mut ctx);
    add_drawable_protocol(&mut ctx);
    let reader = Arc::new(ModuleReader::from_bytes(bytes).expect("valid module"));
    let attached = reader.attach_all(&mut ctx);
    (ctx, reader, attached)
}

fn stub_named(ctx: &AstContext, attached: &[DeclId], name: &str) -> DeclId {
    let name = ctx.intern(name);
    attached
        .iter()
        .copied()
        .find(|&decl| ctx.decl(decl).name == name)
        .expect("stub attached")
}

// ── Round-trip behavior ─────────────────────────────────────────────

#[test]
fn stubs_attach_without_loading_contents() {
    let (_producer, bytes) = producing_session();
    let (ctx, reader, attached) = consuming_session(&bytes);

    assert_eq!(reader.module_name(), "geometry");
    assert_eq!(attached.len(), 2);
    let circle = stub_named(&ctx, &attached, "Circle");
    assert!(ctx.installed_members(circle).is_empty());
    assert!(ctx.installed_conformances(circle).is_empty());
}

#[test]
fn members_materialize_on_first_query_with_their_facts() {
    let (_producer, bytes) = producing_session();
    let (mut ctx, _reader, attached) = consuming_session(&bytes);
    let circle = stub_named(&ctx, &attached, "Circle");

    let members = ctx.members_of(circle).to_vec();
    assert_eq!(members.len(), 4);

    let radius = ctx
        .named_members_of(circle, ctx.intern("radius"))
        .first()
        .copied()
        .expect("radius loads");
    // The serialized signature is already resolved; no resolver runs.
    assert_eq!(ctx.signature_of(radius), TyId::INT);

    let scale = {
        let name = ctx.intern("scale");
        members
            .iter()
            .copied()
            .find(|&m| ctx.decl(m).name == name)
            .expect("scale loads")
    };
    let scale_sig = ctx.signature_of(scale);
    assert_eq!(
        ctx.ty_data(scale_sig),
        &TyData::Fn {
            params: vec![TyId::INT],
            ret: TyId::UNIT,
        }
    );
}

#[test]
fn named_queries_use_the_name_index_without_a_full_load() {
    let (_producer, bytes) = producing_session();
    let (mut ctx, _reader, attached) = consuming_session(&bytes);
    let circle = stub_named(&ctx, &attached, "Circle");

    let radius_name = ctx.intern("radius");
    let found = ctx.named_members_of(circle, radius_name);
    assert_eq!(found.len(), 1);
    // The narrow query did not install the full member list.
    assert!(ctx.installed_members(circle).is_empty());

    // Absent names answer "empty", also without a full load.
    let missing = ctx.intern("missing");
    assert!(ctx.named_members_of(circle, missing).is_empty());
    assert!(ctx.installed_members(circle).is_empty());
}

#[test]
fn documents_without_a_name_index_fall_back_to_a_full_load() {
    let mut ctx = AstContext::new();
    let _resolver = CheckResolver::install(&mut ctx);
    add_drawable_protocol(&mut ctx);
    let circle = {
        let decl = Decl::new(
            ctx.intern("Circle"),
            Span::DUMMY,
            DeclKind::Class(ClassDecl::new(Vec::new(), MemberStorage::parsed(Vec::new()))),
        );
        let id = ctx.alloc_decl(decl);
        ctx.declare_top_level(id);
        id
    };
    let radius_decl = Decl::new(
        ctx.intern("radius"),
        Span::DUMMY,
        DeclKind::Var(VarDecl {
            repr: Some(named_repr(&ctx, "Int")),
        }),
    );
    add_member(&mut ctx, circle, radius_decl);
    let mut writer = ModuleWriter::new("geometry").without_name_index();
    writer.add_nominal(&mut ctx, circle);
    let bytes = writer.finish().expect("encode");

    let (mut consumer, _reader, attached) = consuming_session(&bytes);
    let stub = stub_named(&consumer, &attached, "Circle");
    let found = consumer.named_members_of(stub, consumer.intern("radius"));
    assert_eq!(found.len(), 1);
    // The fallback installed the complete member list.
    assert_eq!(consumer.installed_members(stub).len(), 1);
}

#[test]
fn conformances_and_witnesses_load_through_their_tokens() {
    let (_producer, bytes) = producing_session();
    let (mut ctx, _reader, attached) = consuming_session(&bytes);
    let circle = stub_named(&ctx, &attached, "Circle");

    let conformances = ctx.conformances_of(circle);
    assert_eq!(conformances.len(), 1);
    let conformance = conformances[0];
    assert_eq!(
        ctx.conformance(conformance).state(),
        ConformanceState::Incomplete
    );

    // Requirement handles in the consuming session.
    let drawable = ctx
        .lookup_top_level(ctx.intern("Drawable"))
        .expect("declared live");
    let canvas = ctx
        .named_members_of(drawable, ctx.intern("Canvas"))
        .first()
        .copied()
        .expect("requirement present");
    let draw = ctx
        .named_members_of(drawable, ctx.intern("draw"))
        .first()
        .copied()
        .expect("requirement present");

    // First witness query finishes the conformance from its table.
    assert_eq!(ctx.type_witness(conformance, canvas), TyId::INT);
    assert_eq!(
        ctx.conformance(conformance).state(),
        ConformanceState::Complete
    );
    let witness = ctx.witness(conformance, draw).expect("witness recorded");
    let draw_name = ctx.intern("draw");
    assert_eq!(ctx.decl(witness).name, draw_name);
    assert_eq!(ctx.decl(witness).parent, Some(circle));
}

#[test]
fn enum_raw_type_arrives_pre_resolved() {
    let (_producer, bytes) = producing_session();
    let (mut ctx, _reader, attached) = consuming_session(&bytes);
    let direction = stub_named(&ctx, &attached, "Direction");

    // Resolved by the producing compilation; the slot is already full.
    assert_eq!(ctx.raw_type_of(direction), Some(TyId::INT));
}

#[test]
fn generic_environment_reconstructs_from_its_token() {
    let (_producer, bytes) = producing_session();
    let (mut ctx, _reader, attached) = consuming_session(&bytes);
    let circle = stub_named(&ctx, &attached, "Circle");

    let env = ctx.generic_environment_of(circle).expect("env serialized");
    let env = ctx.generic_env(env);
    assert_eq!(env.owner, circle);
    assert_eq!(env.params, vec![ctx.intern("T")]);
    assert_eq!(env.requirements.len(), 1);
    assert_eq!(env.requirements[0].kind, RequirementKind::Conforms);
}

#[test]
fn associated_type_defaults_load_on_demand() {
    let mut ctx = AstContext::new();
    let _resolver = CheckResolver::install(&mut ctx);
    let (protocol, canvas, _draw) = add_drawable_protocol(&mut ctx);
    let mut writer = ModuleWriter::new("geometry");
    writer.add_nominal(&mut ctx, protocol);
    let bytes = writer.finish().expect("encode");

    // Consume the serialized protocol itself.
    let mut consumer = AstContext::new();
    let _resolver = CheckResolver::install(&mut consumer);
    let reader = Arc::new(ModuleReader::from_bytes(&bytes).expect("valid module"));
    let attached = reader.attach_all(&mut consumer);
    let stub = stub_named(&consumer, &attached, "Drawable");

    let loaded_canvas = consumer
        .named_members_of(stub, consumer.intern("Canvas"))
        .first()
        .copied()
        .expect("requirement loads");
    assert_eq!(
        consumer.associated_type_default_of(loaded_canvas),
        Some(TyId::STRING)
    );
    // Sanity: the producing session resolves the same default.
    assert_eq!(ctx.associated_type_default_of(canvas), Some(TyId::STRING));
}

// ── Document validation ─────────────────────────────────────────────

#[test]
fn garbage_bytes_fail_to_open() {
    let result = ModuleReader::from_bytes(&[0x01, 0x02, 0x03]);
    assert!(matches!(result, Err(ModuleError::Malformed(_))));
}

#[test]
fn wrong_magic_fails_to_open() {
    let mut doc = ModuleDoc::new("geometry");
    doc.magic = 0x0BAD_F00D;
    let bytes = bincode::serialize(&doc).expect("encode");
    assert_eq!(
        ModuleReader::from_bytes(&bytes).err(),
        Some(ModuleError::BadMagic(0x0BAD_F00D))
    );
}

#[test]
fn wrong_version_fails_to_open() {
    let mut doc = ModuleDoc::new("geometry");
    doc.version = 9;
    let bytes = bincode::serialize(&doc).expect("encode");
    assert_eq!(
        ModuleReader::from_bytes(&bytes).err(),
        Some(ModuleError::UnsupportedVersion(9))
    );
}

#[test]
fn tokens_out_of_range_surface_as_empty() {
    let mut doc = ModuleDoc::new("geometry");
    doc.decls.push(crate::format::DeclRecord {
        name: "Circle".to_owned(),
        kind: crate::format::DeclRecordKind::Class {
            member_list: 999,
            conformance_list: 999,
            generic_env: 999,
        },
    });
    let bytes = bincode::serialize(&doc).expect("encode");
    let (mut ctx, _reader, attached) = consuming_session(&bytes);
    let stub = stub_named(&ctx, &attached, "Circle");

    // Malformed references degrade to empty results, not panics.
    assert!(ctx.members_of(stub).is_empty());
    assert!(ctx.conformances_of(stub).is_empty());
    assert_eq!(ctx.generic_environment_of(stub), None);
}
