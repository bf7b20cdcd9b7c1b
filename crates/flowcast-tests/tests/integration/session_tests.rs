//! Session store behavior: catalog management, per-session graphs and the
//! request surface a serving layer drives.

use flowcast_core::engine::matrix::PrefixMatrix;
use flowcast_core::engine::table::{parse_table, DEFAULT_DELIMITER};
use flowcast_core::{EngineError, SessionStore};

const INCIDENTS: &str = concat!(
    "prefixes;targets;Support;Triage;Fix;Verify;[EOC]\n",
    "();Triage;50;0.9;0.0;0.0;0.0\n",
    "('Triage',);Fix;40;0.0;0.85;0.1;0.0\n",
    "('Triage', 'Fix');Verify;35;0.0;0.0;0.8;0.1\n",
    "('Triage', 'Fix', 'Verify');[EOC];35;0.0;0.0;0.0;1.0\n",
);

const RELEASES: &str = concat!(
    "prefixes;targets;Support;Build;Ship;[EOC]\n",
    "();Build;20;1.0;0.0;0.0\n",
    "('Build',);Ship;18;0.0;0.9;0.0\n",
    "('Build', 'Ship');[EOC];18;0.0;0.0;1.0\n",
);

fn store() -> SessionStore {
    let matrix =
        PrefixMatrix::load(&parse_table(INCIDENTS, DEFAULT_DELIMITER).unwrap()).unwrap();
    SessionStore::new("incidents", matrix)
}

fn payload(matrix: Option<&str>) -> String {
    let matrix = matrix
        .map(|m| format!("\"{m}\""))
        .unwrap_or_else(|| "null".to_string());
    format!(
        r#"{{"nodes": [{{"id": "starting_with_key:0", "x": 1, "y": 3, "actualKey": "Start"}}],
             "edges": [], "deletedKeys": [], "probability": 0.3, "support": 1,
             "auto": false, "matrix": {matrix}}}"#
    )
}

#[test]
fn full_session_lifecycle() {
    let mut store = store();
    let id = store.start_session();

    let prediction = store.get_predictions(id, &payload(None)).unwrap();
    assert_eq!(prediction.return_nodes.len(), 1);
    assert_eq!(
        prediction
            .return_nodes
            .values()
            .next()
            .unwrap()
            .node
            .actual_key,
        "Triage"
    );

    let report = store.get_metrics(id).unwrap();
    assert!(report.fitness <= 1.0);

    store.end_session(id).unwrap();
    assert!(matches!(
        store.get_metrics(id),
        Err(EngineError::SessionNotFound(_))
    ));
}

#[test]
fn per_request_matrix_switch_is_sticky() {
    let mut store = store();
    store.add_custom_matrix("releases", RELEASES).unwrap();
    let id = store.start_session();

    // First request selects the custom matrix explicitly.
    let result = store.get_predictions(id, &payload(Some("releases"))).unwrap();
    let label = &result.return_nodes.values().next().unwrap().node.actual_key;
    assert_eq!(label, "Build");

    // The next request without a selector stays on it.
    let result = store.get_predictions(id, &payload(None)).unwrap();
    let label = &result.return_nodes.values().next().unwrap().node.actual_key;
    assert_eq!(label, "Build");
}

#[test]
fn bad_custom_matrix_upload_is_rejected() {
    let mut store = store();
    let err = store
        .add_custom_matrix("broken", "prefixes;Support\n();1\n")
        .unwrap_err();
    assert!(matches!(err, EngineError::MalformedTable(_)));
    assert_eq!(store.available_matrices().len(), 1);
}

#[test]
fn removing_a_custom_matrix_rebinds_its_sessions() {
    let mut store = store();
    store.add_custom_matrix("releases", RELEASES).unwrap();
    let id = store.start_session();
    store.change_matrix(id, "releases").unwrap();

    store.remove_custom_matrix("releases").unwrap();

    // The session falls back to the default matrix, not an error.
    let variants = store.get_variants(id).unwrap();
    assert_eq!(variants[0].variant, vec!["Triage", "Fix", "Verify"]);
}

#[test]
fn catalog_reports_max_support_per_matrix() {
    let mut store = store();
    store.add_custom_matrix("releases", RELEASES).unwrap();

    let infos = store.available_matrices();
    assert_eq!(infos.len(), 2);
    assert_eq!(infos[0].name, "incidents");
    assert_eq!(infos[0].max_support, 50);
    assert_eq!(infos[1].name, "releases");
    assert_eq!(infos[1].max_support, 20);
}

#[test]
fn uploaded_log_is_scored_against_the_session_matrix() {
    let mut store = store();
    let id = store.start_session();

    store
        .add_log(id, r#"[["Triage"], ["Triage", "Fix"]]"#)
        .unwrap();
    let scores = store.get_log_metrics(id).unwrap();
    assert_eq!(scores.fitness, 1.0);

    // Rebinding with a log of unknown activities replays badly.
    store.add_log(id, r#"[["Foo", "Bar"]]"#).unwrap();
    let scores = store.get_log_metrics(id).unwrap();
    assert!(scores.fitness < 1.0);
}

#[test]
fn unbound_log_metrics_are_sentinels() {
    let mut store = store();
    let id = store.start_session();
    let scores = store.get_log_metrics(id).unwrap();
    assert_eq!(scores.fitness, -1.0);
    assert_eq!(scores.simplicity, -1.0);
}

#[test]
fn auto_position_yields_one_column_per_depth() {
    let mut store = store();
    let id = store.start_session();
    store
        .get_predictions(
            id,
            r#"{"nodes": [{"id": "starting_with_key:0", "x": 1, "y": 3, "actualKey": "Start"},
                          {"id": "Triage", "x": 7, "y": 9, "actualKey": "Triage"}],
                "edges": [["starting_with_key:0", "Triage"]], "deletedKeys": [],
                "probability": 0.3, "support": 1, "auto": false}"#,
        )
        .unwrap();

    let positions = store.auto_position(id).unwrap();
    assert_eq!(positions["starting_with_key:0"].0, 1);
    // Triage sits one column after the start regardless of its payload
    // position.
    assert_eq!(positions["Triage"].0, 2);
}

#[test]
fn variant_coverage_tracks_the_session_graph() {
    let mut store = store();
    let id = store.start_session();
    store.get_predictions(id, &payload(None)).unwrap();

    // Previews do not cover anything.
    let (_, ratio) = store.get_variant_coverage(id).unwrap();
    assert_eq!(ratio, 0.0);

    store
        .get_predictions(
            id,
            r#"{"nodes": [{"id": "starting_with_key:0", "x": 1, "y": 3, "actualKey": "Start"},
                          {"id": "Triage", "x": 2, "y": 3, "actualKey": "Triage"},
                          {"id": "Fix", "x": 3, "y": 3, "actualKey": "Fix"},
                          {"id": "Verify", "x": 4, "y": 3, "actualKey": "Verify"},
                          {"id": "[EOC]", "x": 5, "y": 3, "actualKey": "[EOC]"}],
                "edges": [["starting_with_key:0", "Triage"], ["Triage", "Fix"],
                          ["Fix", "Verify"], ["Verify", "[EOC]"]],
                "deletedKeys": [], "probability": 0.3, "support": 1, "auto": false}"#,
        )
        .unwrap();

    let (list, ratio) = store.get_variant_coverage(id).unwrap();
    assert_eq!(ratio, 1.0);
    assert!(list.iter().all(|v| v.covered));
}
