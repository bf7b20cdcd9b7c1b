//! Snapshot and serialization functionality.
//!
//! Checkpoints a [`FlowGraph`] together with its matrix selection and version
//! metadata, so a session can be persisted and restored across engine
//! restarts with a compatibility check on load.

use serde::{Deserialize, Serialize};

use crate::engine::errors::EngineError;
use crate::engine::graph::FlowGraph;

/// Metadata included in snapshots for compatibility checking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    /// Engine version string.
    pub version: String,
    /// Feature flags enabled when the snapshot was created.
    pub features: Vec<String>,
}

/// A snapshot of a flow graph with metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// The full graph state, preview nodes and free list included.
    pub graph: FlowGraph,
    /// Name of the matrix the graph was predicted against, if any.
    pub matrix: Option<String>,
    /// Metadata for compatibility checking.
    pub metadata: SnapshotMetadata,
}

impl Snapshot {
    /// Creates a snapshot of a graph, recording the current engine version
    /// and feature flags.
    pub fn new(graph: FlowGraph) -> Self {
        let matrix = graph.matrix_name().map(|m| m.to_string());
        let metadata = SnapshotMetadata {
            version: env!("CARGO_PKG_VERSION").to_string(),
            features: get_enabled_features(),
        };
        Self {
            graph,
            matrix,
            metadata,
        }
    }

    /// Validates that this snapshot is compatible with the current engine:
    /// the version must match exactly and every feature the snapshot was
    /// created with must be enabled in this build.
    pub fn validate_compatibility(&self) -> Result<(), EngineError> {
        let current_version = env!("CARGO_PKG_VERSION");
        if self.metadata.version != current_version {
            return Err(EngineError::IncompatibleSnapshot(format!(
                "version mismatch: snapshot was created with version {}, current version is {}",
                self.metadata.version, current_version
            )));
        }

        let current_features = get_enabled_features();
        for required in &self.metadata.features {
            if !current_features.contains(required) {
                return Err(EngineError::IncompatibleSnapshot(format!(
                    "requires feature '{required}' which is not enabled"
                )));
            }
        }

        Ok(())
    }
}

/// Returns a list of enabled feature flags.
fn get_enabled_features() -> Vec<String> {
    #[allow(unused_mut)] // mut is needed when features are enabled
    let mut features = Vec::new();

    #[cfg(feature = "parallel")]
    {
        features.push("parallel".to_string());
    }

    #[cfg(feature = "tracing")]
    {
        features.push("tracing".to_string());
    }

    features
}

/// Saves a snapshot to a JSON string.
pub fn save_snapshot_json(snapshot: &Snapshot) -> Result<String, EngineError> {
    serde_json::to_string_pretty(snapshot)
        .map_err(|e| EngineError::Internal(format!("failed to serialize snapshot: {e}")))
}

/// Loads a snapshot from a JSON string and validates its compatibility.
pub fn load_snapshot_json(json: &str) -> Result<Snapshot, EngineError> {
    let snapshot: Snapshot = serde_json::from_str(json)
        .map_err(|e| EngineError::Internal(format!("failed to deserialize snapshot: {e}")))?;
    snapshot.validate_compatibility()?;
    Ok(snapshot)
}

/// Saves a snapshot to a binary format (bincode).
pub fn save_snapshot_binary(snapshot: &Snapshot) -> Result<Vec<u8>, EngineError> {
    bincode::serialize(snapshot)
        .map_err(|e| EngineError::Internal(format!("failed to serialize snapshot: {e}")))
}

/// Loads a snapshot from binary format (bincode) and validates its
/// compatibility.
pub fn load_snapshot_binary(data: &[u8]) -> Result<Snapshot, EngineError> {
    let snapshot: Snapshot = bincode::deserialize(data)
        .map_err(|e| EngineError::Internal(format!("failed to deserialize snapshot: {e}")))?;
    snapshot.validate_compatibility()?;
    Ok(snapshot)
}
