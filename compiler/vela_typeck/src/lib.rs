//! Eager type resolution for Vela.
//!
//! [`CheckResolver`] implements the AST's [`Resolver`](vela_ast::Resolver)
//! capability against live syntax: when an accessor observes an unresolved
//! fact, the call lands here, the fact is computed from the declaration's
//! syntactic form, cached on the node, and never computed again.
//!
//! Semantic problems found along the way (unknown type names, inheritance
//! cycles, missing witnesses) are reported through a
//! [`DiagnosticQueue`](vela_diagnostic::DiagnosticQueue) and resolved to
//! explicit error/absent values; only caller contract violations panic.

mod repr;
mod resolver;

pub use resolver::CheckResolver;
