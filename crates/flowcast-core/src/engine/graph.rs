//! # Flow graph
//!
//! The in-memory directed graph of confirmed and preview nodes that the
//! prediction engine mutates.
//!
//! ## Key components
//!
//! - **Tagged node ids**: [`NodeId`] distinguishes the start node, confirmed
//!   activity nodes and synthetic preview nodes as a tagged union instead of
//!   sniffing string prefixes. On the wire each variant still encodes to the
//!   historical flat string form so payloads stay primitive-only.
//! - **Preview lifecycle**: preview nodes carry probability and support
//!   provenance from the matrix lookup, are excluded from enumeration, and
//!   return their synthetic index to a free list when pruned.
//! - **Position matrix**: an occupied-cell grid used to place new nodes
//!   without collisions, grouped near their source node.
//!
//! Mutation of one graph instance is not thread-safe and is confined to a
//! single request.

use std::fmt;
use std::str::FromStr;

use rustc_hash::{FxHashMap, FxHashSet};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use smallvec::SmallVec;

use crate::engine::errors::EngineError;
use crate::engine::matrix::{ActivityId, LabelEdges, PROBABILITY_MIN_DEFAULT, START_SENTINEL, SUPPORT_MIN_DEFAULT};

/// Wire prefix for synthetic preview ids.
const PREVIEW_PREFIX: &str = "pvw:";

/// Caption of the start node.
const START_CAPTION: &str = "Start";

/// Default grid position of the start node.
const START_POSITION: (i64, i64) = (1, 3);

/// Identifier of a node in the flow graph.
///
/// `Real` ids equal the confirmed activity label. `Preview` ids are
/// synthetic indices drawn from the free list. The start node has its own
/// variant; its wire form is the historical start sentinel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeId {
    /// The designated start node.
    Start,
    /// A confirmed activity node; the id equals the activity label.
    Real(ActivityId),
    /// A predicted-but-unconfirmed node with a synthetic index.
    Preview(u64),
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeId::Start => f.write_str(START_SENTINEL),
            NodeId::Real(label) => f.write_str(label),
            NodeId::Preview(n) => write!(f, "{PREVIEW_PREFIX}{n}"),
        }
    }
}

impl FromStr for NodeId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == START_SENTINEL {
            return Ok(NodeId::Start);
        }
        if let Some(rest) = s.strip_prefix(PREVIEW_PREFIX) {
            if let Ok(n) = rest.parse::<u64>() {
                return Ok(NodeId::Preview(n));
            }
        }
        Ok(NodeId::Real(s.to_string()))
    }
}

impl Serialize for NodeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

/// A node of the flow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    /// Unique node id.
    pub id: NodeId,
    /// Grid column.
    pub x: i64,
    /// Grid row.
    pub y: i64,
    /// The real activity label this node stands for. Equals the id's label
    /// for confirmed nodes; for preview nodes it is the predicted label.
    #[serde(rename = "actualKey")]
    pub actual_key: ActivityId,
    /// Whether this node is an unconfirmed prediction.
    #[serde(rename = "isPreview", default)]
    pub is_preview: bool,
}

/// One node entry of an incoming graph payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodePayload {
    /// Node id in wire form.
    pub id: NodeId,
    /// Grid column.
    pub x: i64,
    /// Grid row.
    pub y: i64,
    /// Real activity label.
    #[serde(rename = "actualKey")]
    pub actual_key: ActivityId,
    /// Preview flag; absent means confirmed.
    #[serde(rename = "isPreview", default)]
    pub is_preview: bool,
    /// Prediction probability carried by preview nodes.
    #[serde(default)]
    pub probability: Option<f64>,
    /// Prediction support carried by preview nodes.
    #[serde(default)]
    pub support: Option<u64>,
}

fn default_probability_min() -> f64 {
    PROBABILITY_MIN_DEFAULT
}

fn default_support_min() -> u64 {
    SUPPORT_MIN_DEFAULT
}

/// The serialized graph a caller submits for prediction: nodes, edges and
/// mode flags. Every call is a full graph replacement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphPayload {
    /// Node list.
    #[serde(default)]
    pub nodes: Vec<NodePayload>,
    /// Edge list as ordered `[source, target]` pairs.
    #[serde(default)]
    pub edges: Vec<(NodeId, NodeId)>,
    /// Free list of retired preview indices.
    #[serde(rename = "deletedKeys", default)]
    pub deleted_keys: Vec<u64>,
    /// Probability threshold for predictions.
    #[serde(default = "default_probability_min")]
    pub probability: f64,
    /// Support threshold for predictions.
    #[serde(default = "default_support_min")]
    pub support: u64,
    /// Automatic mode: near-zero probability threshold plus budget pruning.
    #[serde(default)]
    pub auto: bool,
    /// Selected matrix name, if any.
    #[serde(default)]
    pub matrix: Option<String>,
}

/// Serializable full graph state, used for session snapshots and round
/// trips. Flat structure: sequences and mappings of primitives only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphState {
    /// All nodes, confirmed and preview.
    pub nodes: Vec<NodePayload>,
    /// All edges.
    pub edges: Vec<(NodeId, NodeId)>,
    /// Free list of retired preview indices.
    #[serde(rename = "deletedKeys")]
    pub deleted_keys: Vec<u64>,
    /// Probability threshold.
    pub probability: f64,
    /// Support threshold.
    pub support: u64,
    /// Automatic mode flag.
    pub auto: bool,
    /// Selected matrix name.
    pub matrix: Option<String>,
}

/// The in-memory directed flow graph.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(try_from = "GraphState", into = "GraphState")]
pub struct FlowGraph {
    nodes: FxHashMap<NodeId, GraphNode>,
    edges: FxHashMap<NodeId, SmallVec<[NodeId; 4]>>,
    preview_nodes: FxHashSet<NodeId>,
    probability: FxHashMap<NodeId, f64>,
    support: FxHashMap<NodeId, u64>,
    actual_keys: FxHashMap<ActivityId, NodeId>,
    pos_matrix: FxHashMap<(i64, i64), NodeId>,
    deleted_keys: Vec<u64>,
    prob_min: f64,
    support_min: u64,
    auto: bool,
    matrix_name: Option<String>,
}

impl FlowGraph {
    /// Creates a graph containing only the start node.
    pub fn new() -> Self {
        let mut graph = FlowGraph {
            prob_min: PROBABILITY_MIN_DEFAULT,
            support_min: SUPPORT_MIN_DEFAULT,
            ..Default::default()
        };
        graph.insert_start_node();
        graph
    }

    fn insert_start_node(&mut self) {
        let (x, y) = START_POSITION;
        self.nodes.insert(
            NodeId::Start,
            GraphNode {
                id: NodeId::Start,
                x,
                y,
                actual_key: START_CAPTION.to_string(),
                is_preview: false,
            },
        );
        self.edges.entry(NodeId::Start).or_default();
        self.pos_matrix.insert((x, y), NodeId::Start);
    }

    /// Parses a JSON payload and loads it, replacing all current state.
    pub fn load_json(&mut self, payload: &str) -> Result<(), EngineError> {
        let payload: GraphPayload = serde_json::from_str(payload)
            .map_err(|e| EngineError::InvalidGraphPayload(e.to_string()))?;
        self.load_payload(&payload)
    }

    /// Loads a payload, replacing all current state. Isolated nodes are
    /// fine; an edge endpoint missing from the node list is a
    /// [`EngineError::DanglingEdge`].
    pub fn load_payload(&mut self, payload: &GraphPayload) -> Result<(), EngineError> {
        *self = FlowGraph {
            prob_min: payload.probability,
            support_min: payload.support,
            auto: payload.auto,
            matrix_name: payload.matrix.clone(),
            deleted_keys: payload.deleted_keys.clone(),
            ..Default::default()
        };

        for node in &payload.nodes {
            let n = GraphNode {
                id: node.id.clone(),
                x: node.x,
                y: node.y,
                actual_key: node.actual_key.clone(),
                is_preview: node.is_preview,
            };
            self.pos_matrix.insert((n.x, n.y), n.id.clone());
            self.claim_actual_key(&n.actual_key, &n.id, n.is_preview);
            if n.is_preview {
                self.preview_nodes.insert(n.id.clone());
                if let Some(p) = node.probability {
                    self.probability.insert(n.id.clone(), p);
                }
                if let Some(s) = node.support {
                    self.support.insert(n.id.clone(), s);
                }
            }
            // Every declared node gets an (empty) successor list.
            self.edges.entry(n.id.clone()).or_default();
            self.nodes.insert(n.id.clone(), n);
        }

        if !self.nodes.contains_key(&NodeId::Start) {
            self.insert_start_node();
        }

        for (source, target) in &payload.edges {
            if !self.nodes.contains_key(source) {
                return Err(EngineError::DanglingEdge(source.to_string()));
            }
            if !self.nodes.contains_key(target) {
                return Err(EngineError::DanglingEdge(target.to_string()));
            }
            self.add_edge(source.clone(), target.clone());
        }

        Ok(())
    }

    /// Number of nodes, preview nodes included.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of confirmed (non-preview) nodes, start node included.
    pub fn confirmed_node_count(&self) -> usize {
        self.nodes.len() - self.preview_nodes.len()
    }

    /// Looks up a node.
    pub fn node(&self, id: &NodeId) -> Option<&GraphNode> {
        self.nodes.get(id)
    }

    /// All node ids in unspecified order.
    pub fn node_ids(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes.keys()
    }

    /// Successors of a node, in insertion order.
    pub fn successors(&self, id: &NodeId) -> &[NodeId] {
        self.edges.get(id).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Whether the node is a preview node.
    pub fn is_preview(&self, id: &NodeId) -> bool {
        self.preview_nodes.contains(id)
    }

    /// Ids of all live preview nodes.
    pub fn preview_node_ids(&self) -> impl Iterator<Item = &NodeId> {
        self.preview_nodes.iter()
    }

    /// Stored prediction probability of a preview node.
    pub fn probability_of(&self, id: &NodeId) -> Option<f64> {
        self.probability.get(id).copied()
    }

    /// Stored prediction support of a preview node.
    pub fn support_of(&self, id: &NodeId) -> Option<u64> {
        self.support.get(id).copied()
    }

    /// The node currently representing an activity label, if any. A label
    /// carried by a confirmed node always maps to that confirmed node; a
    /// preview node only represents a label no confirmed node carries.
    pub fn node_for_key(&self, actual_key: &str) -> Option<&NodeId> {
        self.actual_keys.get(actual_key)
    }

    /// Registers `id` as the representative of `key`. A confirmed node takes
    /// the slot from a preview node; otherwise the first claim stands.
    fn claim_actual_key(&mut self, key: &str, id: &NodeId, is_preview: bool) {
        let replace = match self.actual_keys.get(key) {
            None => true,
            Some(current) => !is_preview && self.preview_nodes.contains(current),
        };
        if replace {
            self.actual_keys.insert(key.to_string(), id.clone());
        }
    }

    /// The probability threshold carried by the payload.
    pub fn probability_min(&self) -> f64 {
        self.prob_min
    }

    /// The support threshold carried by the payload.
    pub fn support_min(&self) -> u64 {
        self.support_min
    }

    /// Whether automatic mode (budget pruning) is on.
    pub fn auto(&self) -> bool {
        self.auto
    }

    /// The matrix selector carried by the payload.
    pub fn matrix_name(&self) -> Option<&str> {
        self.matrix_name.as_deref()
    }

    /// The free list of retired preview indices, ascending.
    pub fn deleted_keys(&self) -> &[u64] {
        &self.deleted_keys
    }

    /// Adds a directed edge. Parallel duplicate targets are the caller's
    /// responsibility to avoid.
    pub fn add_edge(&mut self, source: NodeId, target: NodeId) {
        self.edges.entry(source).or_default().push(target);
    }

    /// Removes one directed edge if present.
    pub fn remove_edge(&mut self, source: &NodeId, target: &NodeId) {
        if let Some(succ) = self.edges.get_mut(source) {
            if let Some(pos) = succ.iter().position(|t| t == target) {
                succ.remove(pos);
            }
        }
    }

    /// Allocates a synthetic preview id: the smallest retired index if the
    /// free list is non-empty, otherwise a fresh index probed to be distinct
    /// from every live preview id.
    pub fn available_key(&mut self) -> NodeId {
        if !self.deleted_keys.is_empty() {
            self.deleted_keys.sort_unstable();
            return NodeId::Preview(self.deleted_keys.remove(0));
        }
        let mut n = self.nodes.len() as u64;
        while self.nodes.contains_key(&NodeId::Preview(n)) {
            n += 1;
        }
        NodeId::Preview(n)
    }

    /// Adds a node with an edge from `edge_start` and returns its id.
    ///
    /// Preview nodes get a synthetic id from [`Self::available_key`] and
    /// record their probability/support provenance; confirmed nodes are
    /// identified by their activity label. The new node is placed on the
    /// first free grid cell near its source. A confirmed node takes the
    /// actual-key mapping for its label even when a preview claimed it
    /// earlier; a preview never displaces an existing representative.
    pub fn add_node(
        &mut self,
        edge_start: &NodeId,
        is_preview: bool,
        given_key: &str,
        probability: f64,
        support: u64,
    ) -> Result<NodeId, EngineError> {
        let source = self
            .nodes
            .get(edge_start)
            .ok_or_else(|| EngineError::DanglingEdge(edge_start.to_string()))?;
        let (x, y) = self.free_cell_near(source.x, source.y);

        let id = if is_preview {
            self.available_key()
        } else {
            NodeId::Real(given_key.to_string())
        };

        self.nodes.insert(
            id.clone(),
            GraphNode {
                id: id.clone(),
                x,
                y,
                actual_key: given_key.to_string(),
                is_preview,
            },
        );
        self.edges.entry(id.clone()).or_default();
        self.add_edge(edge_start.clone(), id.clone());
        self.pos_matrix.insert((x, y), id.clone());
        self.claim_actual_key(given_key, &id, is_preview);

        if is_preview {
            self.preview_nodes.insert(id.clone());
            self.probability.insert(id.clone(), probability);
            self.support.insert(id.clone(), support);
        }

        Ok(id)
    }

    /// First unoccupied grid cell scanning right of `(x, y)`, drifting down
    /// then up within a column before moving to the next column.
    fn free_cell_near(&self, x: i64, y: i64) -> (i64, i64) {
        let mut cx = x + 1;
        let mut cy = y;
        while self.pos_matrix.contains_key(&(cx, cy)) {
            if !self.pos_matrix.contains_key(&(cx, cy + 1)) {
                cy += 1;
            } else if !self.pos_matrix.contains_key(&(cx, cy - 1)) {
                cy -= 1;
            } else {
                cx += 1;
                cy = y;
            }
        }
        (cx, cy)
    }

    /// Moves a node to a new grid cell and updates the occupied-cell index.
    /// Unknown ids are ignored.
    pub fn set_position(&mut self, id: &NodeId, x: i64, y: i64) {
        if let Some(node) = self.nodes.get_mut(id) {
            if self.pos_matrix.get(&(node.x, node.y)) == Some(id) {
                self.pos_matrix.remove(&(node.x, node.y));
            }
            node.x = x;
            node.y = y;
            self.pos_matrix.insert((x, y), id.clone());
        }
    }

    /// Updates a stored preview probability to the maximum of the old and
    /// new value (merge semantics for repeated predictions of one label).
    pub fn raise_probability(&mut self, id: &NodeId, probability: f64) {
        let entry = self.probability.entry(id.clone()).or_insert(probability);
        if probability > *entry {
            *entry = probability;
        }
    }

    /// Removes a preview node: deletes it from every store, strips every
    /// edge referencing it, and returns its index to the free list.
    pub fn remove_preview_node(&mut self, id: &NodeId) {
        if !self.preview_nodes.remove(id) {
            return;
        }
        if let Some(node) = self.nodes.remove(id) {
            if self.pos_matrix.get(&(node.x, node.y)) == Some(id) {
                self.pos_matrix.remove(&(node.x, node.y));
            }
            if self.actual_keys.get(&node.actual_key) == Some(id) {
                // Hand the label back to a live confirmed node if one
                // carries it.
                let confirmed = self
                    .nodes
                    .values()
                    .find(|n| !n.is_preview && n.actual_key == node.actual_key)
                    .map(|n| n.id.clone());
                match confirmed {
                    Some(heir) => {
                        self.actual_keys.insert(node.actual_key.clone(), heir);
                    }
                    None => {
                        self.actual_keys.remove(&node.actual_key);
                    }
                }
            }
        }
        self.probability.remove(id);
        self.support.remove(id);
        self.edges.remove(id);
        for succ in self.edges.values_mut() {
            succ.retain(|t| t != id);
        }
        if let NodeId::Preview(n) = id {
            self.deleted_keys.push(*n);
        }
    }

    /// Removes every preview node. Predictions are recomputed from scratch
    /// each call, never merged with stale previews.
    pub fn clear_preview_nodes(&mut self) {
        let ids: Vec<NodeId> = self.preview_nodes.iter().cloned().collect();
        for id in ids {
            self.remove_preview_node(&id);
        }
    }

    /// Source node of the (single) incoming edge of a node, if any.
    pub fn predecessor(&self, id: &NodeId) -> Option<&NodeId> {
        self.edges
            .iter()
            .find(|(_, succ)| succ.contains(id))
            .map(|(source, _)| source)
    }

    /// Label-keyed adjacency of confirmed nodes only, for matrix queries.
    /// The start node appears under the start sentinel. Only sources with at
    /// least one confirmed successor get a key.
    pub fn label_edges(&self) -> LabelEdges {
        let mut out = LabelEdges::default();
        for (source, succ) in &self.edges {
            if self.preview_nodes.contains(source) {
                continue;
            }
            let targets: Vec<ActivityId> = succ
                .iter()
                .filter(|t| !self.preview_nodes.contains(t))
                .filter_map(|t| self.nodes.get(t))
                .map(|n| n.actual_key.clone())
                .collect();
            if targets.is_empty() {
                continue;
            }
            let key = match source {
                NodeId::Start => START_SENTINEL.to_string(),
                other => self
                    .nodes
                    .get(other)
                    .map(|n| n.actual_key.clone())
                    .unwrap_or_else(|| other.to_string()),
            };
            out.entry(key).or_default().extend(targets);
        }
        out
    }

    /// Labels of confirmed, non-start nodes (input to generalization).
    pub fn confirmed_labels(&self) -> Vec<ActivityId> {
        let mut labels: Vec<ActivityId> = self
            .nodes
            .values()
            .filter(|n| !n.is_preview && n.id != NodeId::Start)
            .map(|n| n.actual_key.clone())
            .collect();
        labels.sort_unstable();
        labels
    }

    /// Full state extraction for snapshots and round trips. Nodes and edges
    /// are emitted in sorted order so the output is deterministic.
    pub fn to_state(&self) -> GraphState {
        let mut nodes: Vec<NodePayload> = self
            .nodes
            .values()
            .map(|n| NodePayload {
                id: n.id.clone(),
                x: n.x,
                y: n.y,
                actual_key: n.actual_key.clone(),
                is_preview: n.is_preview,
                probability: self.probability.get(&n.id).copied(),
                support: self.support.get(&n.id).copied(),
            })
            .collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));

        let mut edges: Vec<(NodeId, NodeId)> = self
            .edges
            .iter()
            .flat_map(|(s, succ)| succ.iter().map(move |t| (s.clone(), t.clone())))
            .collect();
        edges.sort();

        let mut deleted_keys = self.deleted_keys.clone();
        deleted_keys.sort_unstable();

        GraphState {
            nodes,
            edges,
            deleted_keys,
            probability: self.prob_min,
            support: self.support_min,
            auto: self.auto,
            matrix: self.matrix_name.clone(),
        }
    }
}

impl TryFrom<GraphState> for FlowGraph {
    type Error = EngineError;

    /// Snapshot states pass through the same structural validation as live
    /// payloads, so a hand-edited snapshot with a dangling edge fails to
    /// deserialize instead of coming back as a different graph.
    fn try_from(state: GraphState) -> Result<Self, Self::Error> {
        let mut graph = FlowGraph::default();
        graph.load_payload(&GraphPayload {
            nodes: state.nodes,
            edges: state.edges,
            deleted_keys: state.deleted_keys,
            probability: state.probability,
            support: state.support,
            auto: state.auto,
            matrix: state.matrix,
        })?;
        Ok(graph)
    }
}

impl From<FlowGraph> for GraphState {
    fn from(graph: FlowGraph) -> Self {
        graph.to_state()
    }
}
