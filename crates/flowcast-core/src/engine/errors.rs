//! Error types for Flowcast engine operations.

use thiserror::Error;

/// Errors that can occur while loading matrices, deserializing graph
/// payloads, or running predictions.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in the future without breaking changes.
///
/// Structural input problems (bad payload shape, missing table columns,
/// dangling edge references) fail fast with a typed variant. Statistical
/// degeneracies (empty denominators, zero support) are *not* errors: every
/// metric formula defines an explicit fallback value instead.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum EngineError {
    /// The delimited matrix table is missing required columns or contains
    /// rows that cannot be decoded.
    #[error("malformed table: {0}")]
    MalformedTable(String),

    /// The graph payload could not be parsed into the expected shape.
    #[error("invalid graph payload: {0}")]
    InvalidGraphPayload(String),

    /// An edge in the payload references a node id that is not in the node
    /// list.
    #[error("dangling edge reference: {0}")]
    DanglingEdge(String),

    /// A named matrix was requested that is not known to the store.
    #[error("matrix not found: {0}")]
    MatrixNotFound(String),

    /// A session handle was used that the store does not know.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// A snapshot was produced by a different engine version or with feature
    /// flags this build does not have.
    #[error("incompatible snapshot: {0}")]
    IncompatibleSnapshot(String),

    /// Internal engine error (programmer error, not user error).
    #[error("internal error: {0}")]
    Internal(String),
}
