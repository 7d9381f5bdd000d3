//! On-disk record tables.
//!
//! The document is a set of flat tables referenced by index. Every opaque
//! token handed to the AST is an index into one of these tables:
//!
//! - `DeclToken`: index into `decls`
//! - `MemberToken`: index into `member_lists`
//! - `ConformanceToken` on a context record: index into `conformance_lists`
//! - `ConformanceToken` on a conformance source: index into `witness_tables`
//! - `GenericEnvToken`: index into `generic_envs`
//!
//! Types are stored structurally with nominals referenced by name; names
//! are resolved against the consuming context's module scope at load time.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies a Vela module document.
pub(crate) const MAGIC: u32 = 0x564c_4d44; // "VLMD"

/// Current document version.
pub(crate) const VERSION: u32 = 1;

/// Token value for "no data in this table".
pub(crate) const NO_DATA: u64 = u64::MAX;

/// Error opening a module document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleError {
    /// The document does not start with the module magic.
    BadMagic(u32),
    /// The document version is outside the supported range.
    UnsupportedVersion(u32),
    /// The document failed to encode or decode.
    Malformed(String),
}

impl fmt::Display for ModuleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleError::BadMagic(found) => {
                write!(f, "bad module magic 0x{found:08X}, expected 0x{MAGIC:08X}")
            }
            ModuleError::UnsupportedVersion(version) => write!(
                f,
                "unsupported module version {version}, expected {VERSION}"
            ),
            ModuleError::Malformed(detail) => write!(f, "malformed module document: {detail}"),
        }
    }
}

impl std::error::Error for ModuleError {}

/// Structural type record; nominals are referenced by name.
#[derive(Clone, Eq, PartialEq, Hash, Debug, Serialize, Deserialize)]
pub(crate) enum TyRecord {
    Int,
    Bool,
    String,
    Unit,
    Error,
    Named(String),
    Fn {
        params: Vec<TyRecord>,
        ret: Box<TyRecord>,
    },
}

/// One serialized declaration.
#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub(crate) struct DeclRecord {
    pub name: String,
    pub kind: DeclRecordKind,
}

#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub(crate) enum DeclRecordKind {
    Class {
        member_list: u64,
        conformance_list: u64,
        generic_env: u64,
    },
    Enum {
        raw: Option<TyRecord>,
        member_list: u64,
        conformance_list: u64,
    },
    Protocol {
        member_list: u64,
        generic_env: u64,
    },
    Func {
        params: Vec<TyRecord>,
        ret: TyRecord,
    },
    Var {
        ty: TyRecord,
    },
    Ctor {
        params: Vec<TyRecord>,
    },
    AssocType {
        default: Option<TyRecord>,
    },
    TypeAlias {
        target: TyRecord,
    },
}

/// Member list of one context: indices into `decls`, plus an optional
/// per-name index for narrow lookups.
#[derive(Clone, Eq, PartialEq, Debug, Default, Serialize, Deserialize)]
pub(crate) struct MemberList {
    pub members: Vec<u64>,
    /// Name -> member indices. Writers may omit the index to keep documents
    /// small; readers answer narrow queries with "unsupported" then.
    pub by_name: Option<Vec<(String, Vec<u64>)>>,
}

/// One serialized conformance clause entry.
#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub(crate) struct ConformanceRecord {
    /// Protocol name, resolved against the consuming context.
    pub protocol: String,
    /// Index into `witness_tables`.
    pub witness_table: u64,
}

/// Serialized witness tables of one conformance.
#[derive(Clone, Eq, PartialEq, Debug, Default, Serialize, Deserialize)]
pub(crate) struct WitnessTable {
    /// Associated-type requirement name -> witnessing type.
    pub type_witnesses: Vec<(String, TyRecord)>,
    /// Value requirement name -> witnessing member name, `None` when the
    /// source compilation recorded an absent witness.
    pub witnesses: Vec<(String, Option<String>)>,
}

/// Serialized generic environment.
#[derive(Clone, Eq, PartialEq, Debug, Default, Serialize, Deserialize)]
pub(crate) struct GenericEnvRecord {
    pub params: Vec<String>,
    pub requirements: Vec<RequirementRecord>,
}

#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub(crate) struct RequirementRecord {
    pub subject: String,
    pub kind: RequirementKindRecord,
    pub bound: TyRecord,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub(crate) enum RequirementKindRecord {
    Conforms,
    Superclass,
    SameType,
}

/// A complete module document.
#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub(crate) struct ModuleDoc {
    pub magic: u32,
    pub version: u32,
    pub name: String,
    pub decls: Vec<DeclRecord>,
    pub member_lists: Vec<MemberList>,
    pub conformance_lists: Vec<Vec<ConformanceRecord>>,
    pub witness_tables: Vec<WitnessTable>,
    pub generic_envs: Vec<GenericEnvRecord>,
}

impl ModuleDoc {
    pub fn new(name: &str) -> Self {
        ModuleDoc {
            magic: MAGIC,
            version: VERSION,
            name: name.to_owned(),
            decls: Vec::new(),
            member_lists: Vec::new(),
            conformance_lists: Vec::new(),
            witness_tables: Vec::new(),
            generic_envs: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_render_the_offending_values() {
        assert_eq!(
            ModuleError::BadMagic(0xDEAD_BEEF).to_string(),
            "bad module magic 0xDEADBEEF, expected 0x564C4D44"
        );
        assert_eq!(
            ModuleError::UnsupportedVersion(99).to_string(),
            "unsupported module version 99, expected 1"
        );
    }

    #[test]
    fn documents_round_trip_through_bincode() {
        let mut doc = ModuleDoc::new("geometry");
        doc.decls.push(DeclRecord {
            name: "Circle".to_owned(),
            kind: DeclRecordKind::Class {
                member_list: 0,
                conformance_list: NO_DATA,
                generic_env: NO_DATA,
            },
        });
        doc.member_lists.push(MemberList {
            members: vec![1],
            by_name: Some(vec![("radius".to_owned(), vec![1])]),
        });
        doc.decls.push(DeclRecord {
            name: "radius".to_owned(),
            kind: DeclRecordKind::Var { ty: TyRecord::Int },
        });

        let bytes = bincode::serialize(&doc).expect("serialize");
        let decoded: ModuleDoc = bincode::deserialize(&bytes).expect("deserialize");
        assert_eq!(decoded, doc);
    }
}
