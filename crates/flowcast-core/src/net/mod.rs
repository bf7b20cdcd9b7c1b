//! Petri-net conversion contract.
//!
//! The engine emits a flow-graph description (directly-follows edges plus
//! designated start and end activity sets) and consumes back a structural
//! net: places, transitions and arcs, each with a position slot filled in by
//! an external layout collaborator. Layout itself is out of scope here; the
//! default converter produces a structurally sound net with zeroed
//! coordinates.

use serde::{Deserialize, Serialize};

use crate::engine::errors::EngineError;
use crate::engine::graph::FlowGraph;
use crate::engine::matrix::{ActivityId, PrefixMatrix, END_OF_CASE};

/// One weighted directly-follows edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DfgEdge {
    /// Source activity label.
    pub source: ActivityId,
    /// Target activity label.
    pub target: ActivityId,
    /// Historical support of the target activity.
    pub support: u64,
}

/// The flow-graph description handed to a net converter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DfgDescription {
    /// Directly-follows edges between confirmed activities.
    pub edges: Vec<DfgEdge>,
    /// Activities directly following the start node.
    pub start_activities: Vec<ActivityId>,
    /// Activities with no confirmed successor, or with an edge into the
    /// end-of-case marker.
    pub end_activities: Vec<ActivityId>,
}

/// A net place with layout coordinates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Place {
    /// Place id.
    pub id: String,
    /// Layout column (0 until a layout collaborator fills it in).
    pub x: i64,
    /// Layout row.
    pub y: i64,
}

/// A net transition with label and layout coordinates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transition {
    /// Transition id.
    pub id: String,
    /// Activity label shown for this transition.
    pub label: ActivityId,
    /// Layout column.
    pub x: i64,
    /// Layout row.
    pub y: i64,
}

/// A directed arc between a place and a transition (either direction).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetArc {
    /// Source element id.
    pub source: String,
    /// Target element id.
    pub target: String,
}

/// The structural net received back from a converter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PetriNet {
    /// Places.
    pub places: Vec<Place>,
    /// Transitions.
    pub transitions: Vec<Transition>,
    /// Arcs.
    pub arcs: Vec<NetArc>,
}

/// Converter collaborator contract: DFG description in, structural net out.
pub trait NetConverter {
    /// Converts a directly-follows description into a Petri net.
    fn convert(&self, dfg: &DfgDescription) -> Result<PetriNet, EngineError>;
}

/// Builds the directly-follows description of a graph's confirmed edges.
/// Start/end activity sets and per-edge support come from the label edges
/// and the matrix's support cache.
pub fn dfg_description(graph: &FlowGraph, matrix: &PrefixMatrix) -> DfgDescription {
    let edges = graph.label_edges();

    let mut dfg_edges: Vec<DfgEdge> = Vec::new();
    let mut start_activities: Vec<ActivityId> = Vec::new();
    let mut has_outgoing: std::collections::BTreeMap<&str, bool> = Default::default();
    let mut ends_case: Vec<ActivityId> = Vec::new();

    for (source, targets) in &edges {
        if source == crate::engine::matrix::START_SENTINEL {
            start_activities.extend(targets.iter().cloned());
            continue;
        }
        for target in targets {
            if target == END_OF_CASE {
                ends_case.push(source.clone());
                continue;
            }
            dfg_edges.push(DfgEdge {
                source: source.clone(),
                target: target.clone(),
                support: matrix.support_of(target),
            });
            has_outgoing.insert(source.as_str(), true);
            has_outgoing.entry(target.as_str()).or_insert(false);
        }
    }
    for a in &start_activities {
        has_outgoing.entry(a.as_str()).or_insert(false);
    }

    let mut end_activities: Vec<ActivityId> = has_outgoing
        .iter()
        .filter(|(_, &out)| !out)
        .map(|(a, _)| a.to_string())
        .collect();
    for a in ends_case {
        if !end_activities.contains(&a) {
            end_activities.push(a);
        }
    }

    dfg_edges.sort_by(|a, b| (&a.source, &a.target).cmp(&(&b.source, &b.target)));
    start_activities.sort_unstable();
    end_activities.sort_unstable();
    DfgDescription {
        edges: dfg_edges,
        start_activities,
        end_activities,
    }
}

/// Default structural converter: one transition per activity, a source and a
/// sink place, and one place per directly-follows edge. No layout.
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuralConverter;

impl NetConverter for StructuralConverter {
    fn convert(&self, dfg: &DfgDescription) -> Result<PetriNet, EngineError> {
        let mut net = PetriNet::default();

        let mut activities: Vec<&ActivityId> = dfg
            .edges
            .iter()
            .flat_map(|e| [&e.source, &e.target])
            .chain(dfg.start_activities.iter())
            .chain(dfg.end_activities.iter())
            .collect();
        activities.sort_unstable();
        activities.dedup();

        for a in &activities {
            net.transitions.push(Transition {
                id: format!("t_{a}"),
                label: (*a).clone(),
                x: 0,
                y: 0,
            });
        }

        net.places.push(Place {
            id: "p_source".into(),
            x: 0,
            y: 0,
        });
        net.places.push(Place {
            id: "p_sink".into(),
            x: 0,
            y: 0,
        });
        for a in &dfg.start_activities {
            net.arcs.push(NetArc {
                source: "p_source".into(),
                target: format!("t_{a}"),
            });
        }
        for a in &dfg.end_activities {
            net.arcs.push(NetArc {
                source: format!("t_{a}"),
                target: "p_sink".into(),
            });
        }

        for edge in &dfg.edges {
            let place_id = format!("p_{}__{}", edge.source, edge.target);
            net.places.push(Place {
                id: place_id.clone(),
                x: 0,
                y: 0,
            });
            net.arcs.push(NetArc {
                source: format!("t_{}", edge.source),
                target: place_id.clone(),
            });
            net.arcs.push(NetArc {
                source: place_id,
                target: format!("t_{}", edge.target),
            });
        }

        Ok(net)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::graph::NodeId;
    use crate::engine::table::{parse_table, DEFAULT_DELIMITER};

    fn matrix() -> PrefixMatrix {
        let src = "prefixes;targets;Support;A;B;[EOC]\n();A;5;1.0;0.0;0.0\n('A',);B;5;0.0;1.0;0.0\n";
        PrefixMatrix::load(&parse_table(src, DEFAULT_DELIMITER).unwrap()).unwrap()
    }

    fn chain_graph() -> FlowGraph {
        let mut g = FlowGraph::new();
        let a = g.add_node(&NodeId::Start, false, "A", 0.0, 0).unwrap();
        g.add_node(&a, false, "B", 0.0, 0).unwrap();
        g
    }

    #[test]
    fn dfg_description_collects_edges_and_boundaries() {
        let dfg = dfg_description(&chain_graph(), &matrix());
        assert_eq!(dfg.start_activities, vec!["A"]);
        assert_eq!(dfg.end_activities, vec!["B"]);
        assert_eq!(dfg.edges.len(), 1);
        assert_eq!(dfg.edges[0].source, "A");
        assert_eq!(dfg.edges[0].target, "B");
        assert_eq!(dfg.edges[0].support, 5);
    }

    #[test]
    fn structural_converter_builds_sound_net() {
        let dfg = dfg_description(&chain_graph(), &matrix());
        let net = StructuralConverter.convert(&dfg).unwrap();

        assert_eq!(net.transitions.len(), 2);
        // Source, sink, and one place per edge.
        assert_eq!(net.places.len(), 3);
        // Every arc endpoint must exist.
        let ids: Vec<&str> = net
            .places
            .iter()
            .map(|p| p.id.as_str())
            .chain(net.transitions.iter().map(|t| t.id.as_str()))
            .collect();
        for arc in &net.arcs {
            assert!(ids.contains(&arc.source.as_str()));
            assert!(ids.contains(&arc.target.as_str()));
        }
    }

    #[test]
    fn eoc_edges_mark_end_activities() {
        let mut g = chain_graph();
        let b = NodeId::Real("B".into());
        g.add_node(&b, false, END_OF_CASE, 0.0, 0).unwrap();
        let dfg = dfg_description(&g, &matrix());
        assert!(dfg.end_activities.contains(&"B".to_string()));
        assert!(!dfg.edges.iter().any(|e| e.target == END_OF_CASE));
    }
}
