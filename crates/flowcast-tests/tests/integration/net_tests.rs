//! Structural checks on the Petri nets emitted with prediction responses.

use flowcast_core::engine::graph::NodeId;
use flowcast_core::net::{dfg_description, NetConverter, StructuralConverter};
use flowcast_core::{load_matrix, FlowGraph};

const MATRIX: &str = concat!(
    "prefixes;targets;Support;A;B;C;[EOC]\n",
    "();A;10;1.0;0.0;0.0;0.0\n",
    "('A',);B;6;0.0;0.8;0.2;0.0\n",
    "('A', 'B');[EOC];6;0.0;0.0;0.0;1.0\n",
    "('A', 'C');[EOC];4;0.0;0.0;0.0;1.0\n",
);

fn branching_model() -> FlowGraph {
    let mut g = FlowGraph::new();
    let a = g.add_node(&NodeId::Start, false, "A", 0.0, 0).unwrap();
    let b = g.add_node(&a, false, "B", 0.0, 0).unwrap();
    g.add_node(&a, false, "C", 0.0, 0).unwrap();
    g.add_node(&b, false, "[EOC]", 0.0, 0).unwrap();
    g
}

#[test]
fn dfg_reflects_confirmed_structure() {
    let matrix = load_matrix(MATRIX).unwrap();
    let dfg = dfg_description(&branching_model(), &matrix);

    assert_eq!(dfg.start_activities, vec!["A"]);
    // C has no outgoing edge; B ends the case via the end-of-case marker.
    assert!(dfg.end_activities.contains(&"B".to_string()));
    assert!(dfg.end_activities.contains(&"C".to_string()));

    let pairs: Vec<(&str, &str)> = dfg
        .edges
        .iter()
        .map(|e| (e.source.as_str(), e.target.as_str()))
        .collect();
    assert_eq!(pairs, vec![("A", "B"), ("A", "C")]);
    // Per-edge support is the matrix's aggregate target support; C only
    // ever appears inside prefixes, so its edge carries no support mass.
    assert_eq!(dfg.edges[0].support, 6);
    assert_eq!(dfg.edges[1].support, 0);
}

#[test]
fn previews_never_reach_the_net() {
    let matrix = load_matrix(MATRIX).unwrap();
    let mut g = branching_model();
    let b = NodeId::Real("B".into());
    g.add_node(&b, true, "Ghost", 0.5, 2).unwrap();

    let dfg = dfg_description(&g, &matrix);
    assert!(!dfg.edges.iter().any(|e| e.target == "Ghost"));
    let net = StructuralConverter.convert(&dfg).unwrap();
    assert!(!net.transitions.iter().any(|t| t.label == "Ghost"));
}

#[test]
fn every_transition_is_connected() {
    let matrix = load_matrix(MATRIX).unwrap();
    let net = StructuralConverter
        .convert(&dfg_description(&branching_model(), &matrix))
        .unwrap();

    for t in &net.transitions {
        let touched = net
            .arcs
            .iter()
            .any(|arc| arc.source == t.id || arc.target == t.id);
        assert!(touched, "transition {} has no arcs", t.id);
    }
    // Exactly one source and one sink place beyond the per-edge places.
    assert_eq!(net.places.len(), 2 + net.transitions.len().saturating_sub(1));
}

#[test]
fn empty_graph_converts_to_an_empty_net() {
    let matrix = load_matrix(MATRIX).unwrap();
    let dfg = dfg_description(&FlowGraph::new(), &matrix);
    let net = StructuralConverter.convert(&dfg).unwrap();

    assert!(net.transitions.is_empty());
    // The boundary places exist even when nothing connects them.
    assert_eq!(net.places.len(), 2);
    assert!(net.arcs.is_empty());
}
