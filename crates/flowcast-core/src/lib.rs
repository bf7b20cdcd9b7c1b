//! # Flowcast Core
//!
//! Incremental process-model prediction and conformance scoring over prefix
//! matrices mined from event logs.

pub mod engine;
pub mod metrics;
pub mod net;
pub mod session;

// Re-export commonly used types
pub use engine::errors::EngineError;
pub use engine::graph::{FlowGraph, GraphPayload, NodeId};
pub use engine::matrix::PrefixMatrix;
pub use engine::prediction::{PredictionEngine, PredictionResult};
pub use session::{SessionId, SessionStore};

/// Parse a delimited matrix table and load it.
///
/// This is a convenience function that combines table parsing and matrix
/// loading with the default delimiter.
pub fn load_matrix(source: &str) -> Result<PrefixMatrix, EngineError> {
    let table = engine::table::parse_table(source, engine::table::DEFAULT_DELIMITER)?;
    PrefixMatrix::load(&table)
}
