mod support;

use scanward::collaborators::{
    ArtifactWriter, CollaboratorError, Collaborators, CommandScanExecutor, CsvArtifactWriter,
    FindingRow, JsonReportParser, OutboundNotification, ReportParser, ScanCredentials,
    ScanExecutor,
};
use scanward::config::{ConfigError, InventoryConfig};
use scanward::orchestration::state::ScanStatus;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;
use support::{session, settings};
use tempfile::tempdir;

const FAKE_SCANNER: &str = r#"#!/bin/sh
profile="$1"
dir="$(dirname "$profile")/reports"
mkdir -p "$dir"
printf '{"definitions":[{"id":"oval:9","title":"Heartbleed","class":"vulnerability","references":"[CVE-2014-0160]","result":"true"},{"id":"oval:10","title":"Clean","result":false}]}' > "$dir/${SCANWARD_SCAN_TARGET}_report.json"
"#;

fn credentials() -> ScanCredentials {
    ScanCredentials {
        user: "auditor".to_string(),
        password: None,
    }
}

fn executor(root: &Path, script: &str, timeout: Duration) -> CommandScanExecutor {
    let script_path = root.join("scanner.sh");
    fs::write(&script_path, script).expect("write script");
    fs::write(root.join("profiles/openscap_scan.yml"), "- hosts: all\n").expect("write profile");
    CommandScanExecutor::new(
        vec!["sh".to_string(), script_path.display().to_string()],
        root.join("profiles"),
        timeout,
    )
}

fn prepare(root: &Path) {
    fs::create_dir_all(root.join("profiles")).expect("profiles dir");
}

#[cfg(unix)]
#[test]
fn command_scan_produces_a_parseable_report() {
    let dir = tempdir().expect("tempdir");
    prepare(dir.path());
    let scanner = executor(dir.path(), FAKE_SCANNER, Duration::from_secs(10));

    let report = scanner
        .scan("openscap_scan.yml", "10.0.0.7", &credentials())
        .expect("scan");
    assert_eq!(report.status, ScanStatus::Successful);
    let artifact = report.artifact_ref.expect("artifact");
    assert!(artifact.ends_with("profiles/reports/10.0.0.7_report.json"));

    let findings = JsonReportParser.parse(&artifact).expect("parse");
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].title, "Heartbleed");
    assert_eq!(findings[0].classification, "vulnerability");
    assert_eq!(findings[0].references, "CVE-2014-0160");
}

#[cfg(unix)]
#[test]
fn command_scan_failure_carries_stderr() {
    let dir = tempdir().expect("tempdir");
    prepare(dir.path());
    let scanner = executor(
        dir.path(),
        "#!/bin/sh\necho 'host unreachable' >&2\nexit 4\n",
        Duration::from_secs(10),
    );
    let report = scanner
        .scan("openscap_scan.yml", "10.0.0.8", &credentials())
        .expect("scan");
    assert_eq!(report.status, ScanStatus::Failed);
    let error = report.error.expect("error");
    assert!(error.contains("status 4"));
    assert!(error.contains("host unreachable"));
}

#[cfg(unix)]
#[test]
fn command_scan_without_report_is_a_failure() {
    let dir = tempdir().expect("tempdir");
    prepare(dir.path());
    let scanner = executor(dir.path(), "#!/bin/sh\nexit 0\n", Duration::from_secs(10));
    let report = scanner
        .scan("openscap_scan.yml", "10.0.0.9", &credentials())
        .expect("scan");
    assert_eq!(report.status, ScanStatus::Failed);
    assert!(report.error.expect("error").contains("no report"));
}

#[cfg(unix)]
#[test]
fn command_scan_is_bounded_by_timeout() {
    let dir = tempdir().expect("tempdir");
    prepare(dir.path());
    let scanner = executor(dir.path(), "#!/bin/sh\nexec sleep 5\n", Duration::from_millis(200));
    let err = scanner
        .scan("openscap_scan.yml", "10.0.0.10", &credentials())
        .expect_err("timeout");
    assert!(matches!(err, CollaboratorError::Timeout { .. }));
}

#[test]
fn command_scan_reports_missing_profile() {
    let dir = tempdir().expect("tempdir");
    prepare(dir.path());
    let scanner = executor(dir.path(), "#!/bin/sh\nexit 0\n", Duration::from_secs(10));
    let report = scanner
        .scan("missing.yml", "10.0.0.11", &credentials())
        .expect("scan");
    assert_eq!(report.status, ScanStatus::Failed);
    assert!(report.error.expect("error").contains("not found"));
}

#[test]
fn csv_writer_stores_table_per_session() {
    let dir = tempdir().expect("tempdir");
    let writer = CsvArtifactWriter::new(dir.path().join("reports"));
    let rows = vec![FindingRow {
        target_name: "kafka-1".to_string(),
        finding_id: "oval:9".to_string(),
        title: "Heartbleed".to_string(),
        classification: "vulnerability".to_string(),
        references: "CVE-2014-0160".to_string(),
    }];
    let artifact = writer
        .write_findings_table(&session("csv"), &rows)
        .expect("write");
    assert_eq!(
        Path::new(&artifact),
        dir.path().join("reports/csv/findings.csv")
    );
    let content = fs::read_to_string(&artifact).expect("read");
    assert!(content.starts_with("VM Name,Vulnerability ID,Title,Classification,References\n"));
    assert!(content.contains("kafka-1,oval:9,Heartbleed,vulnerability,CVE-2014-0160"));
}

#[test]
fn unconfigured_sections_fail_only_when_used() {
    let dir = tempdir().expect("tempdir");
    let mut settings = settings(dir.path());
    settings.llm.api_key_env = "SCANWARD_TEST_UNSET_LLM_KEY".to_string();
    let collaborators = Collaborators::from_settings(&settings).expect("collaborators");

    let err = collaborators.planner.plan("scan").expect_err("no llm");
    assert!(matches!(err, CollaboratorError::NotConfigured { .. }));
    assert!(err.to_string().contains("SCANWARD_TEST_UNSET_LLM_KEY"));
    assert!(matches!(
        collaborators.inventory.list_machines(&BTreeMap::new()),
        Err(CollaboratorError::NotConfigured { .. })
    ));
    let notification = OutboundNotification {
        recipients: vec!["soc@example.com".to_string()],
        subject: "s".to_string(),
        body: "b".to_string(),
        attachment_ref: None,
    };
    assert!(matches!(
        collaborators.transport.send(&notification),
        Err(CollaboratorError::NotConfigured { .. })
    ));
    assert!(matches!(
        collaborators.cloud.ensure_network("forensics-x"),
        Err(CollaboratorError::NotConfigured { .. })
    ));
}

#[test]
fn configured_inventory_requires_its_secret() {
    let dir = tempdir().expect("tempdir");
    let mut settings = settings(dir.path());
    settings.inventory = Some(InventoryConfig {
        url: "http://inventory.local/vms".to_string(),
        username: "ops".to_string(),
        password_env: "SCANWARD_TEST_UNSET_INVENTORY_PASSWORD".to_string(),
    });
    let err = match Collaborators::from_settings(&settings) {
        Ok(_) => panic!("missing secret should fail"),
        Err(err) => err,
    };
    match err {
        ConfigError::MissingEnv { name } => {
            assert_eq!(name, "SCANWARD_TEST_UNSET_INVENTORY_PASSWORD")
        }
        other => panic!("unexpected error: {other}"),
    }
}
