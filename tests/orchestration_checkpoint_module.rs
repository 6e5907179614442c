mod support;

use scanward::config::CheckpointBackend;
use scanward::orchestration::checkpoint::{
    open_checkpoint_store, CheckpointError, CheckpointStore, FileCheckpointStore,
    MemoryCheckpointStore, SqliteCheckpointStore,
};
use scanward::orchestration::node::NodeId;
use scanward::orchestration::state::{
    DraftNotification, Plan, PlanAction, ProgressEntry, RequestInput, ScanOutcome, WorkflowState,
};
use scanward::shared::ReportId;
use std::collections::BTreeMap;
use std::fs;
use support::{finding, session, settings, target};
use tempfile::tempdir;

fn populated_state(raw_session: &str) -> WorkflowState {
    let kafka = target("vm-1", "kafka-1", Some("10.0.0.1"));
    let broker = target("vm-2", "kafka-2", None);
    let mut state = WorkflowState::new(
        session(raw_session),
        RequestInput::text("scan the kafka cluster"),
        1_700_000_000,
    );
    state.plan = Some(Plan {
        action: PlanAction::SecurityScan,
        scan_profile: Some("openscap_scan.yml".to_string()),
        filters: BTreeMap::from([("project".to_string(), "kafka".to_string())]),
    });
    state.targets = vec![kafka.clone(), broker.clone()];
    state.scan_outcomes = vec![
        ScanOutcome::successful(&kafka, "/reports/10.0.0.1_report.json"),
        ScanOutcome::skipped(&broker, "no addressable endpoint"),
    ];
    state.findings = BTreeMap::from([(
        "kafka-1".to_string(),
        vec![finding("oval:1", "OpenSSL overflow")],
    )]);
    state.error_log = vec!["scan failed on kafka-2: no addressable endpoint".to_string()];
    state.progress_log = vec![ProgressEntry::system("Discovery complete.")];
    state.awaiting_acknowledgment = true;
    state.draft_notification = Some(DraftNotification {
        subject: "Scanward Scan Report: 1 host".to_string(),
        body: "See attachment".to_string(),
        attachment_ref: Some("/reports/findings.csv".to_string()),
    });
    state.pending_clone_targets = Some(vec![kafka]);
    state.route_decision = Some(NodeId::Analyze);
    state.report_id = Some(ReportId::parse("report-1").expect("report id"));
    state
}

fn assert_round_trip(store: &dyn CheckpointStore) {
    let state = populated_state("round-trip");
    store.put(&state.session_id, &state).expect("put");
    let loaded = store
        .get(&state.session_id)
        .expect("get")
        .expect("checkpoint present");
    assert_eq!(loaded, state);

    let mut updated = state.clone();
    updated.error_log.push("later".to_string());
    updated.route_decision = None;
    store.put(&updated.session_id, &updated).expect("overwrite");
    assert_eq!(
        store.get(&updated.session_id).expect("get").expect("present"),
        updated
    );

    assert!(store.get(&session("absent")).expect("get").is_none());
}

fn assert_report_index(store: &dyn CheckpointStore) {
    let report = ReportId::parse("report-abc").expect("report id");
    assert_eq!(store.session_for_report(&report).expect("lookup"), None);
    store
        .bind_report(&report, &session("owner"))
        .expect("bind");
    assert_eq!(
        store.session_for_report(&report).expect("lookup"),
        Some(session("owner"))
    );
}

#[test]
fn file_store_round_trips_full_state() {
    let dir = tempdir().expect("tempdir");
    let store = FileCheckpointStore::new(dir.path());
    assert_round_trip(&store);
    assert_report_index(&store);
    assert!(store.session_path(&session("round-trip")).is_file());
    assert!(dir.path().join("index/reports/report-abc.json").is_file());
    assert_eq!(store.backend_name(), "file");
}

#[test]
fn sqlite_store_round_trips_full_state() {
    let dir = tempdir().expect("tempdir");
    let store = SqliteCheckpointStore::open(&dir.path().join("checkpoints.sqlite3")).expect("open");
    assert_round_trip(&store);
    assert_report_index(&store);
    assert_eq!(store.backend_name(), "sqlite");
}

#[test]
fn sqlite_store_survives_reopen() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("checkpoints.sqlite3");
    let state = populated_state("durable");
    {
        let store = SqliteCheckpointStore::open(&path).expect("open");
        store.put(&state.session_id, &state).expect("put");
    }
    let reopened = SqliteCheckpointStore::open(&path).expect("reopen");
    assert_eq!(
        reopened.get(&state.session_id).expect("get"),
        Some(state)
    );
}

#[test]
fn memory_store_round_trips_full_state() {
    let store = MemoryCheckpointStore::new();
    assert_round_trip(&store);
    assert_report_index(&store);
}

#[test]
fn checkpoint_is_stored_in_camel_case() {
    let dir = tempdir().expect("tempdir");
    let store = FileCheckpointStore::new(dir.path());
    let state = populated_state("wire");
    store.put(&state.session_id, &state).expect("put");
    let raw = fs::read_to_string(store.session_path(&state.session_id)).expect("read");
    let value: serde_json::Value = serde_json::from_str(&raw).expect("json");
    assert_eq!(value["awaitingAcknowledgment"], true);
    assert_eq!(value["requestInput"]["kind"], "text");
    assert_eq!(value["routeDecision"], "analyze");
    assert_eq!(value["scanOutcomes"][1]["status"], "skipped");
}

#[test]
fn put_rejects_state_for_another_session() {
    let store = MemoryCheckpointStore::new();
    let state = populated_state("alpha");
    let err = store.put(&session("beta"), &state).expect_err("mismatch");
    assert!(matches!(err, CheckpointError::SessionMismatch { .. }));
}

#[test]
fn corrupt_checkpoint_is_reported_with_session() {
    let dir = tempdir().expect("tempdir");
    let store = FileCheckpointStore::new(dir.path());
    let path = store.session_path(&session("broken"));
    fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    fs::write(&path, "{not json").expect("write");
    let err = store.get(&session("broken")).expect_err("corrupt");
    match err {
        CheckpointError::Corrupt { session_id, .. } => assert_eq!(session_id, "broken"),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn settings_choose_the_backend() {
    let dir = tempdir().expect("tempdir");
    let mut settings = settings(dir.path());
    assert_eq!(open_checkpoint_store(&settings).expect("file").backend_name(), "file");

    settings.checkpoint.backend = CheckpointBackend::Sqlite;
    let store = open_checkpoint_store(&settings).expect("sqlite");
    assert_eq!(store.backend_name(), "sqlite");
    assert!(settings.checkpoint_db_path().is_file());
}
