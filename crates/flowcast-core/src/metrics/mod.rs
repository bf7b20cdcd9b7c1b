//! Conformance metric evaluation.
//!
//! Bundles the matrix's conformance formulas into one report over a graph:
//! replay fitness, simplicity, precision, generalization, variant coverage
//! and event-log coverage. The sequence enumeration runs once and is shared
//! by every formula that replays traces.
//!
//! ## Feature gating
//!
//! With the `parallel` feature the six independent formulas are fanned out
//! over `rayon::join`; without it they run sequentially with identical
//! results. The matrix is read-only throughout, so no synchronization is
//! needed.

use serde::{Deserialize, Serialize};

use crate::engine::graph::FlowGraph;
use crate::engine::matrix::{ActivityId, PrefixMatrix};
use crate::engine::sequences::enumerate_sequences;

/// Sentinel for a metric that cannot be computed for the given input.
pub const METRIC_UNAVAILABLE: f64 = -1.0;

/// One full conformance report of a graph against a matrix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricsReport {
    /// Cost-based replay fitness of every enumerated model path.
    pub fitness: f64,
    /// Structural simplicity of the model.
    pub simplicity: f64,
    /// Support-weighted precision of the model's edges.
    pub precision: f64,
    /// Generalization over the model's confirmed activities.
    pub generalization: f64,
    /// Fraction of historical variants the model reproduces end to end.
    #[serde(rename = "variantCoverage")]
    pub variant_coverage: f64,
    /// Fraction of matrix prefixes the model's edges cover.
    #[serde(rename = "eventLogCoverage")]
    pub event_log_coverage: f64,
}

/// Computes the full conformance report for a graph. Preview nodes never
/// contribute: enumeration, edges and labels all exclude them.
pub fn compute(graph: &FlowGraph, matrix: &PrefixMatrix) -> MetricsReport {
    let sequences = enumerate_sequences(graph);
    let edges = graph.label_edges();
    let labels = graph.confirmed_labels();
    let nodes_in_tree = graph.confirmed_node_count();

    #[cfg(feature = "parallel")]
    let (((fitness, simplicity), (precision, generalization)), (variant_coverage, event_log_coverage)) =
        rayon::join(
            || {
                rayon::join(
                    || {
                        rayon::join(
                            || matrix.replay_fitness(&sequences),
                            || matrix.simplicity(&sequences, nodes_in_tree),
                        )
                    },
                    || {
                        rayon::join(
                            || matrix.precision(&edges),
                            || matrix.generalization(&labels, nodes_in_tree),
                        )
                    },
                )
            },
            || {
                rayon::join(
                    || matrix.get_variant_coverage(&edges).1,
                    || matrix.get_event_log_coverage(&edges),
                )
            },
        );

    #[cfg(not(feature = "parallel"))]
    let (fitness, simplicity, precision, generalization, variant_coverage, event_log_coverage) = (
        matrix.replay_fitness(&sequences),
        matrix.simplicity(&sequences, nodes_in_tree),
        matrix.precision(&edges),
        matrix.generalization(&labels, nodes_in_tree),
        matrix.get_variant_coverage(&edges).1,
        matrix.get_event_log_coverage(&edges),
    );

    #[cfg(feature = "tracing")]
    tracing::debug!(
        sequences = sequences.len(),
        nodes = nodes_in_tree,
        fitness,
        precision,
        "metrics computed"
    );

    MetricsReport {
        fitness,
        simplicity,
        precision,
        generalization,
        variant_coverage,
        event_log_coverage,
    }
}

/// An uploaded event log: one trace per historical case.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventLog {
    /// Ordered activity traces.
    pub traces: Vec<Vec<ActivityId>>,
}

impl EventLog {
    /// Parses a log from a JSON array of traces.
    pub fn from_json(json: &str) -> Result<Self, crate::engine::errors::EngineError> {
        let traces: Vec<Vec<ActivityId>> = serde_json::from_str(json).map_err(|e| {
            crate::engine::errors::EngineError::InvalidGraphPayload(format!("event log: {e}"))
        })?;
        Ok(Self { traces })
    }
}

/// Conformance report for an uploaded log. Metrics that are properties of a
/// model rather than of a log carry [`METRIC_UNAVAILABLE`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LogMetrics {
    /// Replay fitness of the uploaded traces against the matrix.
    pub fitness: f64,
    /// Simplicity of the uploaded traces against the matrix vocabulary.
    pub simplicity: f64,
    /// Not defined for a raw log; always [`METRIC_UNAVAILABLE`].
    pub precision: f64,
    /// Not defined for a raw log; always [`METRIC_UNAVAILABLE`].
    pub generalization: f64,
}

/// Anything that can be scored against a matrix as an event log.
pub trait LogConformance {
    /// Scores the log against a matrix and the current model size.
    fn conformance(&self, matrix: &PrefixMatrix, graph: &FlowGraph) -> LogMetrics;
}

impl LogConformance for EventLog {
    fn conformance(&self, matrix: &PrefixMatrix, graph: &FlowGraph) -> LogMetrics {
        LogMetrics {
            fitness: matrix.replay_fitness(&self.traces),
            simplicity: matrix.simplicity(&self.traces, graph.confirmed_node_count()),
            precision: METRIC_UNAVAILABLE,
            generalization: METRIC_UNAVAILABLE,
        }
    }
}
