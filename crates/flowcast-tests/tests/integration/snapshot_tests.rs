//! Snapshot persistence across the session surface: JSON and binary round
//! trips, compatibility rejection, and restore-time matrix fallback.

use flowcast_core::engine::matrix::PrefixMatrix;
use flowcast_core::engine::snapshot::{
    load_snapshot_binary, load_snapshot_json, save_snapshot_binary, save_snapshot_json,
};
use flowcast_core::engine::table::{parse_table, DEFAULT_DELIMITER};
use flowcast_core::{EngineError, SessionStore};

const MATRIX: &str = concat!(
    "prefixes;targets;Support;A;B;[EOC]\n",
    "();A;10;0.8;0.0;0.0\n",
    "('A',);B;10;0.0;0.7;0.0\n",
    "('A', 'B');[EOC];10;0.0;0.0;1.0\n",
);

const OTHER: &str = concat!(
    "prefixes;targets;Support;X;[EOC]\n",
    "();X;3;0.9;0.0\n",
    "('X',);[EOC];3;0.0;1.0\n",
);

fn store() -> SessionStore {
    let matrix = PrefixMatrix::load(&parse_table(MATRIX, DEFAULT_DELIMITER).unwrap()).unwrap();
    SessionStore::new("default", matrix)
}

const PAYLOAD: &str =
    r#"{"nodes": [{"id": "starting_with_key:0", "x": 1, "y": 3, "actualKey": "Start"}],
        "edges": [], "deletedKeys": [], "probability": 0.3, "support": 1, "auto": false}"#;

#[test]
fn json_snapshot_survives_a_session_restart() {
    let mut store = store();
    let id = store.start_session();
    store.get_predictions(id, PAYLOAD).unwrap();

    let json = save_snapshot_json(&store.snapshot(id).unwrap()).unwrap();
    store.end_session(id).unwrap();

    let restored = store.restore(load_snapshot_json(&json).unwrap()).unwrap();
    let report = store.get_metrics(restored).unwrap();
    assert_eq!(report.fitness, 1.0);
    // The preview node survived the round trip in the session graph.
    let (_, coverage) = store.get_variant_coverage(restored).unwrap();
    assert_eq!(coverage, 0.0);
}

#[test]
fn binary_snapshot_round_trips() {
    let mut store = store();
    let id = store.start_session();
    store.get_predictions(id, PAYLOAD).unwrap();

    let snapshot = store.snapshot(id).unwrap();
    let bytes = save_snapshot_binary(&snapshot).unwrap();
    let back = load_snapshot_binary(&bytes).unwrap();

    assert_eq!(back.graph.to_state(), snapshot.graph.to_state());
    assert_eq!(back.matrix, snapshot.matrix);
}

#[test]
fn foreign_version_snapshots_are_rejected() {
    let mut store = store();
    let id = store.start_session();
    let mut snapshot = store.snapshot(id).unwrap();
    snapshot.metadata.version = "0.1.0-ancient".to_string();

    let json = save_snapshot_json(&snapshot).unwrap();
    assert!(matches!(
        load_snapshot_json(&json),
        Err(EngineError::IncompatibleSnapshot(_))
    ));
}

#[test]
fn restore_falls_back_when_the_matrix_is_gone() {
    let mut store = store();
    store.add_custom_matrix("uploaded", OTHER).unwrap();
    let id = store.start_session();
    store.change_matrix(id, "uploaded").unwrap();

    let snapshot = store.snapshot(id).unwrap();
    store.remove_custom_matrix("uploaded").unwrap();

    let restored = store.restore(snapshot).unwrap();
    // The restored session answers from the default matrix.
    let variants = store.get_variants(restored).unwrap();
    assert_eq!(variants[0].variant, vec!["A", "B"]);
}

#[test]
fn corrupt_snapshot_data_is_an_error() {
    assert!(load_snapshot_json("{not json").is_err());
    assert!(load_snapshot_binary(&[0x00, 0x01, 0x02]).is_err());
}
