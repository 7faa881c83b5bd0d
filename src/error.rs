//! Error kinds, following `spec.md` §7.
//!
//! Mirrors how `surrealdb` (the closest example in this pack with an
//! application-shaped error surface) models its errors: one `thiserror` enum
//! with a variant per failure category, each carrying the context needed to
//! explain *why* without the caller re-deriving it from a generic message.

use crate::value::Key;

/// The three error kinds named in `spec.md` §7.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Surfaced synchronously from graph construction (`Compiler::compile`).
    #[error("compile error: {0}")]
    Compile(#[from] CompileError),

    /// The materializer (or an operator) observed state that should be
    /// unreachable under I1–I4; the query is aborted.
    #[error("internal invariant violated: {0}")]
    InvariantViolation(#[from] InvariantViolation),

    /// A source collection's `subscribe_changes` call failed.
    #[error("upstream error from collection {collection}: {source}")]
    Upstream {
        collection: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// `spec.md` §7.1.
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("LIMIT/OFFSET specified without ORDER BY")]
    LimitWithoutOrderBy,

    #[error("WHERE-pushdown expression for collection {collection} could not be converted after the optimizer assumed it could")]
    PushdownConversionFailed { collection: String },

    #[error("unknown source collection {0:?} referenced by the query")]
    UnknownCollection(String),
}

/// `spec.md` §7.2.
#[derive(Debug, thiserror::Error)]
pub enum InvariantViolation {
    #[error("materializer saw an impossible (inserts={inserts}, deletes={deletes}) combination for key {key}")]
    ImpossibleMaterializerCombination { key: Key, inserts: i64, deletes: i64 },

    #[error("operator {operator} received a retraction for a tuple it has no record of (key {key})")]
    RetractionWithoutRecord { operator: &'static str, key: Key },

    #[error("top-k window invariant violated: {0}")]
    TopKWindow(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
