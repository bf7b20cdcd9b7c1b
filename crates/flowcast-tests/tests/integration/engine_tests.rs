//! End-to-end prediction passes over JSON payloads, exercising the full
//! matrix -> graph -> prediction pipeline the way a serving layer would.

use flowcast_core::engine::prediction::{preview_budget, PredictionEngine};
use flowcast_core::metrics;
use flowcast_core::{load_matrix, EngineError, FlowGraph};

const TICKET_MATRIX: &str = concat!(
    "prefixes;targets;Support;Open;Classify;Resolve;Close;[EOC]\n",
    "();Open;100;0.95;0.0;0.0;0.0;0.0\n",
    "('Open',);Classify;80;0.0;0.8;0.15;0.0;0.0\n",
    "('Open', 'Classify');Resolve;70;0.0;0.0;0.85;0.1;0.0\n",
    "('Open', 'Classify', 'Resolve');Close;65;0.0;0.0;0.0;0.9;0.05\n",
    "('Open', 'Classify', 'Resolve', 'Close');[EOC];65;0.0;0.0;0.0;0.0;1.0\n",
    "('Open', 'Resolve');Close;10;0.0;0.0;0.0;0.7;0.2\n",
);

fn payload(nodes: &str, edges: &str, probability: f64, auto: bool) -> String {
    format!(
        r#"{{"nodes": {nodes}, "edges": {edges}, "deletedKeys": [],
             "probability": {probability}, "support": 1, "auto": {auto}}}"#
    )
}

const START_ONLY: &str =
    r#"[{"id": "starting_with_key:0", "x": 1, "y": 3, "actualKey": "Start"}]"#;

#[test]
fn prediction_from_empty_model_suggests_first_activity() {
    let matrix = load_matrix(TICKET_MATRIX).unwrap();
    let mut graph = FlowGraph::new();
    graph.load_json(&payload(START_ONLY, "[]", 0.3, false)).unwrap();

    let result = PredictionEngine::new(&matrix).predict(&mut graph).unwrap();

    assert_eq!(result.return_nodes.len(), 1);
    let entry = result.return_nodes.values().next().unwrap();
    assert_eq!(entry.node.actual_key, "Open");
    assert_eq!(entry.support, 100);
}

#[test]
fn prediction_follows_confirmed_edges() {
    let matrix = load_matrix(TICKET_MATRIX).unwrap();
    let mut graph = FlowGraph::new();
    graph
        .load_json(&payload(
            r#"[{"id": "starting_with_key:0", "x": 1, "y": 3, "actualKey": "Start"},
                {"id": "Open", "x": 2, "y": 3, "actualKey": "Open"}]"#,
            r#"[["starting_with_key:0", "Open"]]"#,
            0.1,
            false,
        ))
        .unwrap();

    let result = PredictionEngine::new(&matrix).predict(&mut graph).unwrap();

    // Covered prefixes: (), ('Open',). Start -> Open already exists, so the
    // only preview is Classify off Open; the ('Open', 'Resolve') row stays
    // uncovered without an Open -> Resolve edge.
    let labels: Vec<&str> = result
        .return_nodes
        .values()
        .map(|e| e.node.actual_key.as_str())
        .collect();
    assert_eq!(labels, vec!["Classify"]);
    for entry in result.return_nodes.values() {
        assert_eq!(entry.edge_start.to_string(), "Open");
    }
}

#[test]
fn rejecting_a_preview_keeps_it_out_until_edges_change() {
    let matrix = load_matrix(TICKET_MATRIX).unwrap();
    let mut graph = FlowGraph::new();
    graph.load_json(&payload(START_ONLY, "[]", 0.3, false)).unwrap();

    let engine = PredictionEngine::new(&matrix);
    let first = engine.predict(&mut graph).unwrap();
    let key = first.return_nodes.keys().next().unwrap().clone();

    // A second pass over the unchanged model reproduces the same preview
    // under the same recycled key.
    let second = engine.predict(&mut graph).unwrap();
    assert!(second.return_nodes.contains_key(&key));
    assert_eq!(second.deleted_keys, Vec::<u64>::new());
}

#[test]
fn auto_mode_respects_the_global_budget() {
    let matrix = load_matrix(TICKET_MATRIX).unwrap();
    let mut graph = FlowGraph::new();
    graph.load_json(&payload(START_ONLY, "[]", 0.99, true)).unwrap();

    let result = PredictionEngine::new(&matrix).predict(&mut graph).unwrap();

    // Threshold 0.99 would block everything in manual mode; auto mode
    // ignores it and prunes by budget instead.
    assert!(!result.return_nodes.is_empty());
    assert!(result.return_nodes.len() <= preview_budget(1));
}

#[test]
fn dangling_payload_edges_fail_before_prediction() {
    let mut graph = FlowGraph::new();
    let err = graph
        .load_json(&payload(
            START_ONLY,
            r#"[["starting_with_key:0", "Ghost"]]"#,
            0.3,
            false,
        ))
        .unwrap_err();
    assert!(matches!(err, EngineError::DanglingEdge(_)));
}

#[test]
fn full_ticket_model_scores_high_conformance() {
    let matrix = load_matrix(TICKET_MATRIX).unwrap();
    let mut graph = FlowGraph::new();
    graph
        .load_json(&payload(
            r#"[{"id": "starting_with_key:0", "x": 1, "y": 3, "actualKey": "Start"},
                {"id": "Open", "x": 2, "y": 3, "actualKey": "Open"},
                {"id": "Classify", "x": 3, "y": 3, "actualKey": "Classify"},
                {"id": "Resolve", "x": 4, "y": 3, "actualKey": "Resolve"},
                {"id": "Close", "x": 5, "y": 3, "actualKey": "Close"},
                {"id": "[EOC]", "x": 6, "y": 3, "actualKey": "[EOC]"}]"#,
            r#"[["starting_with_key:0", "Open"], ["Open", "Classify"],
                ["Classify", "Resolve"], ["Resolve", "Close"], ["Close", "[EOC]"]]"#,
            0.3,
            false,
        ))
        .unwrap();

    let report = metrics::compute(&graph, &matrix);

    // The model replays the main variant end to end.
    assert_eq!(report.variant_coverage, 1.0);
    assert!(report.fitness > 0.9, "fitness was {}", report.fitness);
    assert!(report.event_log_coverage > 0.8);
    for value in [report.simplicity, report.precision, report.generalization] {
        assert!(value <= 1.0 && value > 0.0, "metric out of range: {value}");
    }
}

#[test]
fn prediction_response_serializes_with_wire_field_names() {
    let matrix = load_matrix(TICKET_MATRIX).unwrap();
    let mut graph = FlowGraph::new();
    graph.load_json(&payload(START_ONLY, "[]", 0.3, false)).unwrap();

    let result = PredictionEngine::new(&matrix).predict(&mut graph).unwrap();
    let json: serde_json::Value =
        serde_json::from_str(&serde_json::to_string(&result).unwrap()).unwrap();

    let nodes = json["returnNodes"].as_object().unwrap();
    let (key, entry) = nodes.iter().next().unwrap();
    assert!(key.starts_with("pvw:"));
    assert!(entry["edgeStart"].is_string());
    assert!(entry["node"]["actualKey"].is_string());
    assert!(entry["node"]["isPreview"].as_bool().unwrap());
    assert!(json["deletedKeys"].is_array());
    assert!(json["net"]["places"].is_array());
    assert!(json["subTraceCoverage"].is_object());
}
