use std::fmt;

/// Error codes for front-end diagnostics.
///
/// Format: E#### where the first digit indicates the phase:
/// - E2xxx: Semantic resolution errors
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum ErrorCode {
    /// Unknown type name
    E2001,
    /// Circular inheritance
    E2002,
    /// Variable without a type annotation
    E2003,
    /// Extension of an unknown type
    E2004,
    /// `override` member overrides nothing
    E2005,
    /// Missing type witness for an associated-type requirement
    E2006,
    /// Missing witness for a protocol requirement
    E2007,
}

impl ErrorCode {
    /// Short description for error indexes and tooling.
    pub fn description(self) -> &'static str {
        match self {
            ErrorCode::E2001 => "unknown type name",
            ErrorCode::E2002 => "circular inheritance",
            ErrorCode::E2003 => "variable without a type annotation",
            ErrorCode::E2004 => "extension of an unknown type",
            ErrorCode::E2005 => "override member overrides nothing",
            ErrorCode::E2006 => "missing type witness",
            ErrorCode::E2007 => "missing witness",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}
