//! Session and matrix catalog management.
//!
//! A [`SessionStore`] owns the loaded matrices and one [`FlowGraph`] per
//! active session. Matrices come in two kinds: predefined ones registered at
//! startup, which can never be removed, and custom ones uploaded at runtime.
//! Loaded matrices are immutable and shared behind [`Arc`], so removing one
//! from the catalog never invalidates a computation already holding it.
//!
//! The store itself is a plain single-threaded structure; callers that serve
//! concurrent requests put it behind their own lock. Only the graph of the
//! addressed session is ever mutated.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::errors::EngineError;
use crate::engine::graph::FlowGraph;
use crate::engine::matrix::{PrefixMatrix, Variant, VariantCoverage};
use crate::engine::prediction::{auto_position, PredictionEngine, PredictionResult};
use crate::engine::snapshot::Snapshot;
use crate::engine::table::{parse_table, DEFAULT_DELIMITER};
use crate::metrics::{
    compute, EventLog, LogConformance, LogMetrics, MetricsReport, METRIC_UNAVAILABLE,
};

/// Opaque session handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Catalog entry describing one available matrix.
#[derive(Debug, Clone, Serialize)]
pub struct MatrixInfo {
    /// Matrix name.
    pub name: String,
    /// Whether the matrix was uploaded at runtime.
    pub custom: bool,
    /// Normalization constant of the matrix.
    #[serde(rename = "maxSupport")]
    pub max_support: u64,
}

struct Session {
    graph: FlowGraph,
    matrix: String,
    log: Option<EventLog>,
}

/// Owner of the matrix catalog and all live sessions.
pub struct SessionStore {
    predefined: FxHashMap<String, Arc<PrefixMatrix>>,
    custom: FxHashMap<String, Arc<PrefixMatrix>>,
    default_matrix: String,
    sessions: FxHashMap<SessionId, Session>,
}

impl SessionStore {
    /// Creates a store with one predefined default matrix.
    pub fn new(default_name: impl Into<String>, matrix: PrefixMatrix) -> Self {
        let default_matrix = default_name.into();
        let mut predefined = FxHashMap::default();
        predefined.insert(default_matrix.clone(), Arc::new(matrix));
        Self {
            predefined,
            custom: FxHashMap::default(),
            default_matrix,
            sessions: FxHashMap::default(),
        }
    }

    /// Registers an additional predefined matrix.
    pub fn register_matrix(&mut self, name: impl Into<String>, matrix: PrefixMatrix) {
        self.predefined.insert(name.into(), Arc::new(matrix));
    }

    /// Parses and registers a custom matrix from delimited table text.
    pub fn add_custom_matrix(
        &mut self,
        name: impl Into<String>,
        source: &str,
    ) -> Result<(), EngineError> {
        let matrix = PrefixMatrix::load(&parse_table(source, DEFAULT_DELIMITER)?)?;
        self.custom.insert(name.into(), Arc::new(matrix));
        Ok(())
    }

    /// Removes a custom matrix. Predefined matrices cannot be removed; a
    /// name matching one is reported as not found among the custom set.
    /// Sessions bound to the removed matrix fall back to the default.
    pub fn remove_custom_matrix(&mut self, name: &str) -> Result<(), EngineError> {
        if self.custom.remove(name).is_none() {
            return Err(EngineError::MatrixNotFound(name.to_string()));
        }
        for session in self.sessions.values_mut() {
            if session.matrix == name {
                session.matrix = self.default_matrix.clone();
            }
        }
        Ok(())
    }

    /// All available matrices, sorted by name, predefined first.
    pub fn available_matrices(&self) -> Vec<MatrixInfo> {
        let mut out: Vec<MatrixInfo> = self
            .predefined
            .iter()
            .map(|(name, m)| MatrixInfo {
                name: name.clone(),
                custom: false,
                max_support: m.max_support(),
            })
            .chain(self.custom.iter().map(|(name, m)| MatrixInfo {
                name: name.clone(),
                custom: true,
                max_support: m.max_support(),
            }))
            .collect();
        out.sort_by(|a, b| a.custom.cmp(&b.custom).then(a.name.cmp(&b.name)));
        out
    }

    /// Opens a new session with a fresh graph bound to the default matrix.
    pub fn start_session(&mut self) -> SessionId {
        let id = SessionId::generate();
        self.sessions.insert(
            id,
            Session {
                graph: FlowGraph::new(),
                matrix: self.default_matrix.clone(),
                log: None,
            },
        );
        #[cfg(feature = "tracing")]
        tracing::debug!(session = %id, "session started");
        id
    }

    /// Closes a session.
    pub fn end_session(&mut self, id: SessionId) -> Result<(), EngineError> {
        self.sessions
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| EngineError::SessionNotFound(id.to_string()))
    }

    /// Binds a session to a named matrix. Unknown names are an error here,
    /// unlike the per-request selector which falls back silently.
    pub fn change_matrix(&mut self, id: SessionId, name: &str) -> Result<(), EngineError> {
        if !self.predefined.contains_key(name) && !self.custom.contains_key(name) {
            return Err(EngineError::MatrixNotFound(name.to_string()));
        }
        let session = self.session_mut(id)?;
        session.matrix = name.to_string();
        Ok(())
    }

    fn resolve(&self, name: &str) -> Option<Arc<PrefixMatrix>> {
        self.predefined
            .get(name)
            .or_else(|| self.custom.get(name))
            .cloned()
    }

    fn session_mut(&mut self, id: SessionId) -> Result<&mut Session, EngineError> {
        self.sessions
            .get_mut(&id)
            .ok_or_else(|| EngineError::SessionNotFound(id.to_string()))
    }

    fn session(&self, id: SessionId) -> Result<&Session, EngineError> {
        self.sessions
            .get(&id)
            .ok_or_else(|| EngineError::SessionNotFound(id.to_string()))
    }

    /// Matrix currently bound to a session, following the catalog.
    fn session_matrix(&self, id: SessionId) -> Result<Arc<PrefixMatrix>, EngineError> {
        let session = self.session(id)?;
        self.resolve(&session.matrix)
            .or_else(|| self.resolve(&self.default_matrix))
            .ok_or_else(|| EngineError::MatrixNotFound(session.matrix.clone()))
    }

    /// Runs one prediction pass for a session over a full graph payload.
    ///
    /// The payload's matrix selector, when present and known, rebinds the
    /// session; a selector naming an unknown matrix is not fatal and the
    /// previously bound matrix is used instead.
    pub fn get_predictions(
        &mut self,
        id: SessionId,
        payload_json: &str,
    ) -> Result<PredictionResult, EngineError> {
        self.session(id)?;
        let mut graph = FlowGraph::new();
        graph.load_json(payload_json)?;

        // Resolve the effective matrix up front; the session is only
        // rebound once the pass has succeeded, so a failed request leaves
        // its graph and binding exactly as they were.
        let effective = match graph.matrix_name() {
            Some(name) if self.resolve(name).is_some() => name.to_string(),
            #[cfg(feature = "tracing")]
            Some(name) => {
                tracing::debug!(matrix = %name, "unknown matrix selector, keeping current");
                self.session(id)?.matrix.clone()
            }
            _ => self.session(id)?.matrix.clone(),
        };
        let matrix = self
            .resolve(&effective)
            .or_else(|| self.resolve(&self.default_matrix))
            .ok_or_else(|| EngineError::MatrixNotFound(effective.clone()))?;

        let result = PredictionEngine::new(&matrix).predict(&mut graph)?;

        let session = self.session_mut(id)?;
        session.graph = graph;
        session.matrix = effective;
        Ok(result)
    }

    /// Conformance report of a session's current graph.
    pub fn get_metrics(&self, id: SessionId) -> Result<MetricsReport, EngineError> {
        let matrix = self.session_matrix(id)?;
        Ok(compute(&self.session(id)?.graph, &matrix))
    }

    /// Parses an event log from JSON and binds it to a session, replacing
    /// any previously bound log.
    pub fn add_log(&mut self, id: SessionId, log_json: &str) -> Result<(), EngineError> {
        let log = EventLog::from_json(log_json)?;
        self.session_mut(id)?.log = Some(log);
        Ok(())
    }

    /// Conformance of a session's bound event log against its matrix. With
    /// no log bound every metric carries the unavailable sentinel.
    pub fn get_log_metrics(&self, id: SessionId) -> Result<LogMetrics, EngineError> {
        let session = self.session(id)?;
        match &session.log {
            Some(log) => {
                let matrix = self.session_matrix(id)?;
                Ok(log.conformance(&matrix, &session.graph))
            }
            None => Ok(LogMetrics {
                fitness: METRIC_UNAVAILABLE,
                simplicity: METRIC_UNAVAILABLE,
                precision: METRIC_UNAVAILABLE,
                generalization: METRIC_UNAVAILABLE,
            }),
        }
    }

    /// Historical variants of a session's matrix.
    pub fn get_variants(&self, id: SessionId) -> Result<Vec<Variant>, EngineError> {
        Ok(self.session_matrix(id)?.get_variants())
    }

    /// Variant coverage of a session's current graph.
    pub fn get_variant_coverage(
        &self,
        id: SessionId,
    ) -> Result<(Vec<VariantCoverage>, f64), EngineError> {
        let matrix = self.session_matrix(id)?;
        let edges = self.session(id)?.graph.label_edges();
        Ok(matrix.get_variant_coverage(&edges))
    }

    /// Recomputes node positions of a session's graph as a breadth-first
    /// layering and returns them keyed by wire id.
    pub fn auto_position(
        &mut self,
        id: SessionId,
    ) -> Result<BTreeMap<String, (i64, i64)>, EngineError> {
        Ok(auto_position(&mut self.session_mut(id)?.graph))
    }

    /// Checkpoints a session's graph and matrix binding.
    pub fn snapshot(&self, id: SessionId) -> Result<Snapshot, EngineError> {
        let session = self.session(id)?;
        let mut snapshot = Snapshot::new(session.graph.clone());
        snapshot.matrix = Some(session.matrix.clone());
        Ok(snapshot)
    }

    /// Restores a snapshot into a new session. The snapshot's matrix binding
    /// is kept when still in the catalog, otherwise the default applies.
    pub fn restore(&mut self, snapshot: Snapshot) -> Result<SessionId, EngineError> {
        snapshot.validate_compatibility()?;
        let matrix = snapshot
            .matrix
            .filter(|name| self.resolve(name).is_some())
            .unwrap_or_else(|| self.default_matrix.clone());
        let id = SessionId::generate();
        self.sessions.insert(
            id,
            Session {
                graph: snapshot.graph,
                matrix,
                log: None,
            },
        );
        Ok(id)
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}
