#![allow(dead_code)]

use scanward::collaborators::{
    ArtifactWriter, CloudResources, CollaboratorError, Collaborators, FindingRow, Inventory,
    NetworkHandle, NotificationTransport, OutboundNotification, Planner, ReportParser,
    ResourceStatus, ScanCredentials, ScanExecutor, ScanReport, Summarizer, SummaryTemplate,
};
use scanward::config::Settings;
use scanward::orchestration::state::{Finding, Target};
use scanward::shared::SessionId;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};

pub const SCAN_PLAN: &str =
    r#"{"action":"security_scan","scanProfile":"openscap_scan.yml","filters":{}}"#;
pub const LIST_PLAN: &str = r#"{"action":"list_vms","scanProfile":null,"filters":{}}"#;
pub const INVALID_PLAN: &str = r#"{"action":"invalid","scanProfile":null,"filters":{}}"#;

pub fn target(id: &str, name: &str, address: Option<&str>) -> Target {
    Target {
        id: id.to_string(),
        name: name.to_string(),
        address: address.map(str::to_string),
        status: "ACTIVE".to_string(),
    }
}

pub fn finding(id: &str, title: &str) -> Finding {
    Finding {
        id: id.to_string(),
        title: title.to_string(),
        classification: "vulnerability".to_string(),
        references: format!("{id}-ref"),
    }
}

pub fn session(raw: &str) -> SessionId {
    SessionId::parse(raw).expect("session id")
}

pub fn settings(state_root: &Path) -> Settings {
    let mut settings = Settings::with_state_root(state_root);
    settings.notification.recipients = vec!["soc@example.com".to_string()];
    settings.clone.poll_interval_seconds = 0;
    settings.clone.snapshot_timeout_seconds = 1;
    settings.clone.instance_timeout_seconds = 1;
    settings
}

pub fn report_ref(address: &str) -> String {
    format!("report://{address}")
}

#[derive(Clone)]
pub struct FakePlanner {
    pub reply: Arc<Mutex<Result<String, String>>>,
    pub calls: Arc<AtomicUsize>,
}

impl Default for FakePlanner {
    fn default() -> Self {
        Self {
            reply: Arc::new(Mutex::new(Ok(INVALID_PLAN.to_string()))),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl FakePlanner {
    pub fn set_reply(&self, reply: &str) {
        *self.reply.lock().expect("planner lock") = Ok(reply.to_string());
    }

    pub fn fail_with(&self, reason: &str) {
        *self.reply.lock().expect("planner lock") = Err(reason.to_string());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Planner for FakePlanner {
    fn plan(&self, _request: &str) -> Result<String, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.reply
            .lock()
            .expect("planner lock")
            .clone()
            .map_err(|reason| CollaboratorError::failed("planner", reason))
    }
}

#[derive(Clone, Default)]
pub struct FakeInventory {
    pub machines: Arc<Mutex<Vec<Target>>>,
    pub unreachable: Arc<Mutex<bool>>,
    pub calls: Arc<AtomicUsize>,
}

impl FakeInventory {
    pub fn set_machines(&self, machines: Vec<Target>) {
        *self.machines.lock().expect("inventory lock") = machines;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Inventory for FakeInventory {
    fn list_machines(
        &self,
        _filters: &BTreeMap<String, String>,
    ) -> Result<Vec<Target>, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if *self.unreachable.lock().expect("inventory lock") {
            return Err(CollaboratorError::Connectivity {
                service: "inventory".to_string(),
                reason: "connection refused".to_string(),
            });
        }
        Ok(self.machines.lock().expect("inventory lock").clone())
    }
}

/// Succeeds with `report://<address>` unless the address is marked failing
/// or panicking.
#[derive(Clone, Default)]
pub struct FakeScanner {
    pub failing: Arc<Mutex<BTreeSet<String>>>,
    pub panicking: Arc<Mutex<BTreeSet<String>>>,
    pub without_artifact: Arc<Mutex<BTreeSet<String>>>,
    pub scanned: Arc<Mutex<Vec<String>>>,
    pub seen_credentials: Arc<Mutex<Vec<ScanCredentials>>>,
    pub gate: Arc<(Mutex<bool>, Condvar)>,
}

impl FakeScanner {
    /// Scans block after recording the call until `open_gate`.
    pub fn close_gate(&self) {
        *self.gate.0.lock().expect("gate lock") = true;
    }

    pub fn open_gate(&self) {
        *self.gate.0.lock().expect("gate lock") = false;
        self.gate.1.notify_all();
    }

    pub fn scan_count(&self) -> usize {
        self.scanned.lock().expect("scanner lock").len()
    }

    pub fn fail(&self, address: &str) {
        self.failing
            .lock()
            .expect("scanner lock")
            .insert(address.to_string());
    }

    pub fn panic_on(&self, address: &str) {
        self.panicking
            .lock()
            .expect("scanner lock")
            .insert(address.to_string());
    }

    pub fn scanned(&self) -> Vec<String> {
        let mut scanned = self.scanned.lock().expect("scanner lock").clone();
        scanned.sort();
        scanned
    }
}

impl ScanExecutor for FakeScanner {
    fn scan(
        &self,
        _profile: &str,
        address: &str,
        credentials: &ScanCredentials,
    ) -> Result<ScanReport, CollaboratorError> {
        self.scanned
            .lock()
            .expect("scanner lock")
            .push(address.to_string());
        self.seen_credentials
            .lock()
            .expect("scanner lock")
            .push(credentials.clone());
        {
            let (closed, opened) = &*self.gate;
            let mut closed = closed.lock().expect("gate lock");
            while *closed {
                closed = opened.wait(closed).expect("gate lock");
            }
        }
        if self.panicking.lock().expect("scanner lock").contains(address) {
            panic!("scanner crashed on {address}");
        }
        if self.failing.lock().expect("scanner lock").contains(address) {
            return Err(CollaboratorError::Connectivity {
                service: "scan".to_string(),
                reason: "ssh unreachable".to_string(),
            });
        }
        if self
            .without_artifact
            .lock()
            .expect("scanner lock")
            .contains(address)
        {
            return Ok(ScanReport {
                artifact_ref: None,
                ..ScanReport::completed("unused")
            });
        }
        Ok(ScanReport::completed(report_ref(address)))
    }
}

#[derive(Clone, Default)]
pub struct FakeParser {
    pub findings: Arc<Mutex<BTreeMap<String, Vec<Finding>>>>,
    pub broken: Arc<Mutex<BTreeSet<String>>>,
}

impl FakeParser {
    pub fn set_findings(&self, address: &str, findings: Vec<Finding>) {
        self.findings
            .lock()
            .expect("parser lock")
            .insert(report_ref(address), findings);
    }
}

impl ReportParser for FakeParser {
    fn parse(&self, artifact_ref: &str) -> Result<Vec<Finding>, CollaboratorError> {
        if self.broken.lock().expect("parser lock").contains(artifact_ref) {
            return Err(CollaboratorError::invalid("report parser", "truncated report"));
        }
        Ok(self
            .findings
            .lock()
            .expect("parser lock")
            .get(artifact_ref)
            .cloned()
            .unwrap_or_default())
    }
}

#[derive(Clone, Default)]
pub struct FakeSummarizer {
    pub calls: Arc<Mutex<Vec<SummaryTemplate>>>,
    pub payloads: Arc<Mutex<Vec<Value>>>,
    pub failing: Arc<Mutex<Option<SummaryTemplate>>>,
    pub omit_link: Arc<Mutex<bool>>,
}

impl FakeSummarizer {
    pub fn fail_on(&self, template: SummaryTemplate) {
        *self.failing.lock().expect("summarizer lock") = Some(template);
    }

    pub fn calls(&self) -> Vec<SummaryTemplate> {
        self.calls.lock().expect("summarizer lock").clone()
    }
}

impl Summarizer for FakeSummarizer {
    fn render(
        &self,
        template: SummaryTemplate,
        payload: &Value,
    ) -> Result<String, CollaboratorError> {
        self.calls.lock().expect("summarizer lock").push(template);
        self.payloads
            .lock()
            .expect("summarizer lock")
            .push(payload.clone());
        if *self.failing.lock().expect("summarizer lock") == Some(template) {
            return Err(CollaboratorError::EmptyResponse {
                service: "llm".to_string(),
            });
        }
        let text = match template {
            SummaryTemplate::StructuredSummary => json!({
                "overall_summary": "Vulnerabilities found on scanned hosts",
                "vulnerability_details": payload["vulnerability_details"].clone(),
            })
            .to_string(),
            SummaryTemplate::NotificationBody => {
                let link = payload["acknowledgment_link"].as_str().unwrap_or_default();
                if *self.omit_link.lock().expect("summarizer lock") {
                    "Dear SOC team, findings attached.".to_string()
                } else {
                    format!("Dear SOC team, findings attached. Acknowledge here: {link}")
                }
            }
            SummaryTemplate::UiSummary => "### Scan summary\nHosts need patching.".to_string(),
            SummaryTemplate::Subject => {
                "Scanward Scan Report: Vulnerabilities found\nignored second line".to_string()
            }
        };
        Ok(text)
    }
}

#[derive(Clone, Default)]
pub struct FakeTransport {
    pub sent: Arc<Mutex<Vec<OutboundNotification>>>,
    pub failing: Arc<Mutex<bool>>,
}

impl FakeTransport {
    pub fn sent(&self) -> Vec<OutboundNotification> {
        self.sent.lock().expect("transport lock").clone()
    }
}

impl NotificationTransport for FakeTransport {
    fn send(&self, notification: &OutboundNotification) -> Result<(), CollaboratorError> {
        if *self.failing.lock().expect("transport lock") {
            return Err(CollaboratorError::failed("mail relay", "http 502: bad gateway"));
        }
        self.sent
            .lock()
            .expect("transport lock")
            .push(notification.clone());
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct FakeArtifacts {
    pub tables: Arc<Mutex<Vec<(String, Vec<FindingRow>)>>>,
    pub failing: Arc<Mutex<bool>>,
}

impl ArtifactWriter for FakeArtifacts {
    fn write_findings_table(
        &self,
        session_id: &SessionId,
        rows: &[FindingRow],
    ) -> Result<String, CollaboratorError> {
        if *self.failing.lock().expect("artifacts lock") {
            return Err(CollaboratorError::failed("findings table", "disk full"));
        }
        self.tables
            .lock()
            .expect("artifacts lock")
            .push((session_id.to_string(), rows.to_vec()));
        Ok(format!("artifact://{session_id}/findings.csv"))
    }
}

#[derive(Clone, Default)]
pub struct FakeCloud {
    pub networks: Arc<Mutex<Vec<String>>>,
    pub snapshots: Arc<Mutex<Vec<String>>>,
    pub launched: Arc<Mutex<Vec<String>>>,
    pub failing_snapshots: Arc<Mutex<BTreeSet<String>>>,
    pub stuck_instances: Arc<Mutex<bool>>,
    pub network_down: Arc<Mutex<bool>>,
}

impl FakeCloud {
    pub fn launched(&self) -> Vec<String> {
        let mut launched = self.launched.lock().expect("cloud lock").clone();
        launched.sort();
        launched
    }
}

impl CloudResources for FakeCloud {
    fn ensure_network(&self, name: &str) -> Result<NetworkHandle, CollaboratorError> {
        if *self.network_down.lock().expect("cloud lock") {
            return Err(CollaboratorError::Connectivity {
                service: "cloud".to_string(),
                reason: "network api unavailable".to_string(),
            });
        }
        let mut networks = self.networks.lock().expect("cloud lock");
        let reused = networks.iter().any(|existing| existing == name);
        if !reused {
            networks.push(name.to_string());
        }
        Ok(NetworkHandle {
            id: format!("net-{name}"),
            name: name.to_string(),
            reused,
        })
    }

    fn create_snapshot(
        &self,
        target: &Target,
        snapshot_name: &str,
    ) -> Result<String, CollaboratorError> {
        self.snapshots
            .lock()
            .expect("cloud lock")
            .push(snapshot_name.to_string());
        Ok(format!("img-{}", target.id))
    }

    fn snapshot_status(&self, snapshot_id: &str) -> Result<ResourceStatus, CollaboratorError> {
        if self
            .failing_snapshots
            .lock()
            .expect("cloud lock")
            .contains(snapshot_id)
        {
            return Ok(ResourceStatus::Failed("image entered status `killed`".to_string()));
        }
        Ok(ResourceStatus::Ready)
    }

    fn launch_from_snapshot(
        &self,
        snapshot_id: &str,
        network_id: &str,
        instance_name: &str,
    ) -> Result<String, CollaboratorError> {
        self.launched
            .lock()
            .expect("cloud lock")
            .push(format!("{instance_name}@{network_id}"));
        Ok(format!("srv-{snapshot_id}"))
    }

    fn instance_status(&self, _instance_id: &str) -> Result<ResourceStatus, CollaboratorError> {
        if *self.stuck_instances.lock().expect("cloud lock") {
            return Ok(ResourceStatus::Pending);
        }
        Ok(ResourceStatus::Ready)
    }
}

/// Shared handles to every fake; `collaborators()` hands out boxed clones.
#[derive(Clone, Default)]
pub struct Fakes {
    pub planner: FakePlanner,
    pub inventory: FakeInventory,
    pub scanner: FakeScanner,
    pub parser: FakeParser,
    pub summarizer: FakeSummarizer,
    pub transport: FakeTransport,
    pub artifacts: FakeArtifacts,
    pub cloud: FakeCloud,
}

impl Fakes {
    /// Two active hosts and one stopped host; each active host has one finding.
    pub fn with_two_vulnerable_hosts() -> Self {
        let fakes = Self::default();
        fakes.planner.set_reply(SCAN_PLAN);
        let mut stopped = target("vm-3", "kafka-3", Some("10.0.0.3"));
        stopped.status = "SHUTOFF".to_string();
        fakes.inventory.set_machines(vec![
            target("vm-1", "kafka-1", Some("10.0.0.1")),
            target("vm-2", "kafka-2", Some("10.0.0.2")),
            stopped,
        ]);
        fakes
            .parser
            .set_findings("10.0.0.1", vec![finding("oval:1", "OpenSSL overflow")]);
        fakes
            .parser
            .set_findings("10.0.0.2", vec![finding("oval:2", "Kernel privilege escalation")]);
        fakes
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            planner: Box::new(self.planner.clone()),
            inventory: Box::new(self.inventory.clone()),
            scanner: Box::new(self.scanner.clone()),
            report_parser: Box::new(self.parser.clone()),
            summarizer: Box::new(self.summarizer.clone()),
            transport: Box::new(self.transport.clone()),
            artifacts: Box::new(self.artifacts.clone()),
            cloud: Box::new(self.cloud.clone()),
        }
    }
}
