//! # Prediction engine
//!
//! Turns matrix lookups into graph mutations: one prediction pass clears the
//! previous previews, queries the matrix with the graph's confirmed
//! label edges, and materializes the surviving candidates as preview nodes.
//!
//! ## Merge semantics
//!
//! For every predicted `(target, source)` pair, the engine first looks at the
//! source node's existing successors. A confirmed successor with the target's
//! label means the edge already exists and nothing happens; a preview
//! successor with the label only has its stored probability raised to the
//! maximum of old and new. Only otherwise is a fresh preview node added.
//!
//! ## Automatic mode
//!
//! With `auto` set the probability threshold drops to a near-zero floor so
//! every attested continuation is considered, and two pruning passes keep the
//! result readable: a per-source cap of [`MAX_PREVIEW_SUCCESSORS`] preview
//! successors (lowest support evicted first), then a global budget of
//! [`preview_budget`] preview nodes derived from the graph size before the
//! pass, keeping the best-supported nodes.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::engine::errors::EngineError;
use crate::engine::graph::{FlowGraph, GraphNode, NodeId};
use crate::engine::matrix::{ActivityId, PredictionStat, PrefixMatrix, START_SENTINEL};
use crate::net::{dfg_description, NetConverter, PetriNet, StructuralConverter};

/// Probability floor used in automatic mode instead of the caller threshold.
/// Near zero rather than zero so all-zero probability columns stay out.
pub const AUTO_PROB_MIN: f64 = 1e-6;

/// Maximum preview successors per source node in automatic mode.
pub const MAX_PREVIEW_SUCCESSORS: usize = 3;

const BUDGET_COEFFICIENT: f64 = 2.0;
const BUDGET_BASELINE: f64 = 3.0;

/// Global preview budget in automatic mode for a graph that had
/// `nodes_before` nodes going into the prediction pass. Grows with the
/// squared logarithm of the graph size, never below 3.
pub fn preview_budget(nodes_before: usize) -> usize {
    let n = nodes_before.max(1) as f64;
    (BUDGET_COEFFICIENT * n.ln().powi(2) + BUDGET_BASELINE).round() as usize
}

/// One preview node of a prediction response, keyed in the response by the
/// node's wire id.
#[derive(Debug, Clone, Serialize)]
pub struct PreviewEntry {
    /// Wire id of the node the preview hangs off.
    #[serde(rename = "edgeStart")]
    pub edge_start: NodeId,
    /// The preview node itself, with its grid position.
    pub node: GraphNode,
    /// Aggregated prediction probability.
    pub probability: f64,
    /// Aggregated prediction support.
    pub support: u64,
}

/// The full response of one prediction pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PredictionResult {
    /// Surviving preview nodes, keyed by wire id.
    #[serde(rename = "returnNodes")]
    pub return_nodes: BTreeMap<String, PreviewEntry>,
    /// Free list of retired preview indices after the pass, ascending.
    #[serde(rename = "deletedKeys")]
    pub deleted_keys: Vec<u64>,
    /// Structural Petri net of the graph's confirmed edges.
    pub net: PetriNet,
    /// Per-activity fraction of historical complete cases containing it.
    #[serde(rename = "subTraceCoverage")]
    pub sub_trace_coverage: BTreeMap<ActivityId, f64>,
}

/// Stateless prediction pass over a borrowed matrix. The graph is the only
/// thing mutated; the matrix is shared and read-only.
#[derive(Debug, Clone, Copy)]
pub struct PredictionEngine<'m> {
    matrix: &'m PrefixMatrix,
}

impl<'m> PredictionEngine<'m> {
    /// Creates an engine over a loaded matrix.
    pub fn new(matrix: &'m PrefixMatrix) -> Self {
        Self { matrix }
    }

    /// Runs one prediction pass, mutating `graph` in place and returning the
    /// serializable response.
    pub fn predict(&self, graph: &mut FlowGraph) -> Result<PredictionResult, EngineError> {
        graph.clear_preview_nodes();
        let nodes_before = graph.node_count();

        let label_edges = graph.label_edges();
        let prob_min = if graph.auto() {
            AUTO_PROB_MIN
        } else {
            graph.probability_min()
        };
        let predictions =
            self.matrix
                .predict_using_edges(&label_edges, prob_min, graph.support_min());

        #[cfg(feature = "tracing")]
        tracing::debug!(
            candidates = predictions.len(),
            auto = graph.auto(),
            prob_min,
            "prediction pass"
        );

        // Strongest candidates first so they claim grid cells closest to
        // their source; ties break on the key for reproducible layout.
        let mut candidates: Vec<((ActivityId, ActivityId), PredictionStat)> =
            predictions.into_iter().collect();
        candidates.sort_by(|a, b| {
            b.1.probability
                .total_cmp(&a.1.probability)
                .then(b.1.support.cmp(&a.1.support))
                .then(a.0.cmp(&b.0))
        });

        for ((target, source), stat) in candidates {
            let source_id = if source == START_SENTINEL {
                NodeId::Start
            } else {
                // The source label came from this graph's own edges, but a
                // preview-only representative must not anchor predictions.
                match graph.node_for_key(&source) {
                    Some(id) if !graph.is_preview(id) => id.clone(),
                    _ => continue,
                }
            };

            let existing = graph
                .successors(&source_id)
                .iter()
                .find(|succ| {
                    graph
                        .node(succ)
                        .is_some_and(|n| n.actual_key == target)
                })
                .cloned();
            match existing {
                Some(succ) if graph.is_preview(&succ) => {
                    graph.raise_probability(&succ, stat.probability);
                }
                Some(_) => {} // Confirmed edge already covers this prediction.
                None => {
                    graph.add_node(&source_id, true, &target, stat.probability, stat.support)?;
                }
            }
        }

        if graph.auto() {
            prune_previews(graph, nodes_before);
        }

        let mut return_nodes = BTreeMap::new();
        let preview_ids: Vec<NodeId> = graph.preview_node_ids().cloned().collect();
        for id in preview_ids {
            let node = graph
                .node(&id)
                .cloned()
                .ok_or_else(|| EngineError::Internal(format!("preview node {id} vanished")))?;
            let edge_start = graph
                .predecessor(&id)
                .cloned()
                .ok_or_else(|| EngineError::Internal(format!("preview node {id} is orphaned")))?;
            return_nodes.insert(
                id.to_string(),
                PreviewEntry {
                    edge_start,
                    probability: graph.probability_of(&id).unwrap_or(0.0),
                    support: graph.support_of(&id).unwrap_or(0),
                    node,
                },
            );
        }

        let net = StructuralConverter.convert(&dfg_description(graph, self.matrix))?;
        let sub_trace_coverage: BTreeMap<ActivityId, f64> =
            self.matrix.sub_trace_coverage().into_iter().collect();
        let mut deleted_keys = graph.deleted_keys().to_vec();
        deleted_keys.sort_unstable();

        Ok(PredictionResult {
            return_nodes,
            deleted_keys,
            net,
            sub_trace_coverage,
        })
    }
}

/// Automatic-mode pruning: per-source preview cap, then the global budget.
fn prune_previews(graph: &mut FlowGraph, nodes_before: usize) {
    let sources: Vec<NodeId> = graph.node_ids().cloned().collect();
    for source in sources {
        loop {
            let previews: Vec<(NodeId, u64)> = graph
                .successors(&source)
                .iter()
                .filter(|s| graph.is_preview(s))
                .map(|s| (s.clone(), graph.support_of(s).unwrap_or(0)))
                .collect();
            if previews.len() <= MAX_PREVIEW_SUCCESSORS {
                break;
            }
            let Some(victim) = previews
                .iter()
                .min_by_key(|(_, support)| *support)
                .map(|(id, _)| id.clone())
            else {
                break;
            };
            graph.remove_preview_node(&victim);
        }
    }

    let budget = preview_budget(nodes_before);
    let mut previews: Vec<(NodeId, u64)> = graph
        .preview_node_ids()
        .map(|id| (id.clone(), graph.support_of(id).unwrap_or(0)))
        .collect();
    if previews.len() <= budget {
        return;
    }
    previews.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    // Keep everything at or above the budget-th largest support; ties at the
    // threshold all survive.
    let threshold = previews[budget - 1].1;
    for (id, support) in previews {
        if support < threshold {
            graph.remove_preview_node(&id);
        }
    }
}

/// Recomputes every node position as a breadth-first layering from the start
/// node: column = depth + 1, rows assigned top-down in id order within a
/// layer. Nodes unreachable from the start land one column past the deepest
/// layer. Returns the new positions keyed by wire id.
pub fn auto_position(graph: &mut FlowGraph) -> BTreeMap<String, (i64, i64)> {
    use std::collections::VecDeque;

    let mut depth: BTreeMap<NodeId, usize> = BTreeMap::new();
    let mut queue = VecDeque::new();
    depth.insert(NodeId::Start, 0);
    queue.push_back(NodeId::Start);

    while let Some(id) = queue.pop_front() {
        let d = depth[&id];
        for succ in graph.successors(&id).to_vec() {
            if let std::collections::btree_map::Entry::Vacant(e) = depth.entry(succ.clone()) {
                e.insert(d + 1);
                queue.push_back(succ);
            }
        }
    }

    let max_depth = depth.values().copied().max().unwrap_or(0);
    let orphans: Vec<NodeId> = graph
        .node_ids()
        .filter(|id| !depth.contains_key(id))
        .cloned()
        .collect();
    for id in orphans {
        depth.insert(id, max_depth + 1);
    }

    let mut layers: BTreeMap<usize, Vec<NodeId>> = BTreeMap::new();
    for (id, d) in &depth {
        layers.entry(*d).or_default().push(id.clone());
    }

    let mut positions = BTreeMap::new();
    for (d, ids) in layers {
        // BTreeMap iteration already yields ids in sorted order per layer.
        for (row, id) in ids.into_iter().enumerate() {
            let (x, y) = (d as i64 + 1, row as i64 + 3);
            graph.set_position(&id, x, y);
            positions.insert(id.to_string(), (x, y));
        }
    }
    positions
}
