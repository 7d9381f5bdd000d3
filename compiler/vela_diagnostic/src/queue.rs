//! Diagnostic queue for collecting diagnostics.
//!
//! Features:
//! - Error limit to prevent overwhelming output
//! - Deduplication of identical diagnostics
//! - `ErrorGuaranteed` proof that errors were emitted

use crate::{Diagnostic, ErrorGuaranteed, Severity};

/// Collects diagnostics emitted during resolution and checking.
#[derive(Debug, Default)]
pub struct DiagnosticQueue {
    diagnostics: Vec<Diagnostic>,
    error_count: usize,
    /// Maximum number of errors before further errors are dropped
    /// (0 = unlimited).
    error_limit: usize,
}

impl DiagnosticQueue {
    pub fn new() -> Self {
        DiagnosticQueue::default()
    }

    /// A queue that stops collecting errors after `limit` of them.
    pub fn with_error_limit(limit: usize) -> Self {
        DiagnosticQueue {
            error_limit: limit,
            ..DiagnosticQueue::default()
        }
    }

    /// Emit a diagnostic. Returns proof when it was an error.
    ///
    /// Identical diagnostics (same code, span and message) are recorded
    /// once; the proof is still returned for duplicates of an error, since
    /// the error condition did occur.
    pub fn emit(&mut self, diagnostic: Diagnostic) -> Option<ErrorGuaranteed> {
        let is_error = diagnostic.is_error();
        if is_error {
            self.error_count += 1;
            let over_limit = self.error_limit != 0 && self.error_count > self.error_limit;
            if !over_limit && !self.diagnostics.contains(&diagnostic) {
                self.diagnostics.push(diagnostic);
            }
            return Some(ErrorGuaranteed::new_unchecked());
        }
        if !self.diagnostics.contains(&diagnostic) {
            self.diagnostics.push(diagnostic);
        }
        None
    }

    /// Number of errors emitted (including any dropped over the limit).
    pub fn error_count(&self) -> usize {
        self.error_count
    }

    pub fn has_errors(&self) -> bool {
        self.error_count > 0
    }

    /// All recorded diagnostics, in emission order.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Proof that errors were emitted, if any were.
    pub fn guarantee(&self) -> Option<ErrorGuaranteed> {
        ErrorGuaranteed::from_error_count(self.error_count)
    }

    /// Recorded diagnostics of a given severity.
    pub fn with_severity(&self, severity: Severity) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(move |d| d.severity == severity)
    }
}
