//! Syntactic type reference resolution.
//!
//! Turns a [`TypeRepr`] into a pooled [`TyId`] using only name lookup
//! through the module scope - no inference, no constraint solving.

use vela_ast::{AstContext, DeclKind, Resolver, TyData, TyId, TypeRepr};
use vela_diagnostic::{Diagnostic, ErrorCode};

use crate::resolver::CheckResolver;

impl CheckResolver {
    /// Resolve a syntactic type reference.
    ///
    /// Unknown names diagnose and resolve to the error type; resolution is
    /// total.
    pub(crate) fn resolve_type_repr(&self, ctx: &mut AstContext, repr: &TypeRepr) -> TyId {
        match repr {
            TypeRepr::Named(name, span) => {
                if let Some(primitive) = Self::primitive_ty(ctx.name_text(*name)) {
                    return primitive;
                }
                match ctx.lookup_top_level(*name) {
                    Some(decl) if ctx.decl(decl).is_nominal() => {
                        ctx.intern_ty(TyData::Nominal(decl))
                    }
                    Some(decl) if matches!(ctx.decl(decl).kind, DeclKind::TypeAlias(_)) => {
                        // Aliases resolve through to their target.
                        self.resolve_decl_signature(ctx, decl);
                        *ctx.decl(decl).signature.expect_resolved("type alias target")
                    }
                    _ => {
                        self.emit(Diagnostic::error(
                            ErrorCode::E2001,
                            format!("unknown type `{}`", ctx.name_text(*name)),
                            *span,
                        ));
                        TyId::ERROR
                    }
                }
            }
            TypeRepr::Fn { params, ret, .. } => {
                let params: Vec<TyId> = params
                    .iter()
                    .map(|param| self.resolve_type_repr(ctx, param))
                    .collect();
                let ret = self.resolve_type_repr(ctx, ret);
                ctx.intern_ty(TyData::Fn { params, ret })
            }
        }
    }

    fn primitive_ty(name: &str) -> Option<TyId> {
        match name {
            "Int" => Some(TyId::INT),
            "Bool" => Some(TyId::BOOL),
            "String" => Some(TyId::STRING),
            "Unit" => Some(TyId::UNIT),
            _ => None,
        }
    }
}
