use super::{resolve_env_secret, ConfigError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointBackend {
    #[default]
    File,
    Sqlite,
}

impl CheckpointBackend {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Sqlite => "sqlite",
        }
    }
}

impl std::fmt::Display for CheckpointBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CheckpointConfig {
    #[serde(default)]
    pub backend: CheckpointBackend,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AcknowledgmentConfig {
    #[serde(default = "default_ack_base_url")]
    pub base_url: String,
}

impl Default for AcknowledgmentConfig {
    fn default() -> Self {
        Self {
            base_url: default_ack_base_url(),
        }
    }
}

impl AcknowledgmentConfig {
    pub fn link_for(&self, report_id: &str) -> String {
        format!(
            "{}/v1/acknowledge/{report_id}",
            self.base_url.trim_end_matches('/')
        )
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct NotificationConfig {
    #[serde(default)]
    pub recipients: Vec<String>,
    #[serde(default)]
    pub relay_url: Option<String>,
    #[serde(default)]
    pub sender: Option<String>,
}

impl NotificationConfig {
    pub fn resolved_recipients(&self) -> Vec<String> {
        self.recipients
            .iter()
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DiscoveryConfig {
    /// Lifecycle status a machine must report to be kept. `None` keeps everything.
    #[serde(default = "default_required_status")]
    pub required_status: Option<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            required_status: default_required_status(),
        }
    }
}

impl DiscoveryConfig {
    pub fn accepts_status(&self, status: &str) -> bool {
        match self.required_status.as_deref() {
            Some(required) => status.trim().eq_ignore_ascii_case(required.trim()),
            None => true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScanConfig {
    /// Ceiling on concurrent per-target scans. `None` runs every target at once.
    #[serde(default)]
    pub max_concurrency: Option<usize>,
    #[serde(default)]
    pub target_name_prefix: Option<String>,
    #[serde(default = "default_profile_root")]
    pub profile_root: PathBuf,
    #[serde(default = "default_scan_command")]
    pub command: Vec<String>,
    #[serde(default = "default_scan_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_ssh_user")]
    pub ssh_user: String,
    #[serde(default)]
    pub ssh_password_env: Option<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_concurrency: None,
            target_name_prefix: None,
            profile_root: default_profile_root(),
            command: default_scan_command(),
            timeout_seconds: default_scan_timeout_seconds(),
            ssh_user: default_ssh_user(),
            ssh_password_env: None,
        }
    }
}

impl ScanConfig {
    pub fn selects_name(&self, name: &str) -> bool {
        match self.target_name_prefix.as_deref() {
            Some(prefix) => name
                .to_ascii_lowercase()
                .starts_with(&prefix.to_ascii_lowercase()),
            None => true,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CloneConfig {
    #[serde(default)]
    pub max_concurrency: Option<usize>,
    #[serde(default = "default_network_prefix")]
    pub network_prefix: String,
    #[serde(default = "default_snapshot_timeout_seconds")]
    pub snapshot_timeout_seconds: u64,
    #[serde(default = "default_instance_timeout_seconds")]
    pub instance_timeout_seconds: u64,
    #[serde(default = "default_poll_interval_seconds")]
    pub poll_interval_seconds: u64,
}

impl Default for CloneConfig {
    fn default() -> Self {
        Self {
            max_concurrency: None,
            network_prefix: default_network_prefix(),
            snapshot_timeout_seconds: default_snapshot_timeout_seconds(),
            instance_timeout_seconds: default_instance_timeout_seconds(),
            poll_interval_seconds: default_poll_interval_seconds(),
        }
    }
}

impl CloneConfig {
    pub fn network_name(&self, session_id: &str) -> String {
        format!("{}-{session_id}", self.network_prefix)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_llm_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_llm_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            api_key_env: default_llm_api_key_env(),
            timeout_seconds: default_llm_timeout_seconds(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InventoryConfig {
    pub url: String,
    pub username: String,
    pub password_env: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CloudConfig {
    pub compute_url: String,
    pub image_url: String,
    pub network_url: String,
    pub token_env: String,
    pub flavor_ref: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    pub state_root: PathBuf,
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
    #[serde(default)]
    pub acknowledgment: AcknowledgmentConfig,
    #[serde(default)]
    pub notification: NotificationConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub clone: CloneConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub inventory: Option<InventoryConfig>,
    #[serde(default)]
    pub cloud: Option<CloudConfig>,
}

impl Settings {
    pub fn with_state_root(state_root: impl Into<PathBuf>) -> Self {
        Self {
            state_root: state_root.into(),
            checkpoint: CheckpointConfig::default(),
            acknowledgment: AcknowledgmentConfig::default(),
            notification: NotificationConfig::default(),
            discovery: DiscoveryConfig::default(),
            scan: ScanConfig::default(),
            clone: CloneConfig::default(),
            llm: LlmConfig::default(),
            inventory: None,
            cloud: None,
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.state_root.is_absolute() {
            return Err(ConfigError::Settings(
                "`state_root` must be an absolute path".to_string(),
            ));
        }
        if self.scan.max_concurrency == Some(0) {
            return Err(ConfigError::Settings(
                "`scan.max_concurrency` must be at least 1 when set".to_string(),
            ));
        }
        if self.clone.max_concurrency == Some(0) {
            return Err(ConfigError::Settings(
                "`clone.max_concurrency` must be at least 1 when set".to_string(),
            ));
        }
        if self.scan.command.is_empty() {
            return Err(ConfigError::Settings(
                "`scan.command` must name a program".to_string(),
            ));
        }
        for (field, value) in [
            ("scan.timeout_seconds", self.scan.timeout_seconds),
            (
                "clone.snapshot_timeout_seconds",
                self.clone.snapshot_timeout_seconds,
            ),
            (
                "clone.instance_timeout_seconds",
                self.clone.instance_timeout_seconds,
            ),
            ("llm.timeout_seconds", self.llm.timeout_seconds),
        ] {
            if value == 0 {
                return Err(ConfigError::Settings(format!(
                    "`{field}` must be greater than zero"
                )));
            }
        }
        if self.clone.network_prefix.trim().is_empty() {
            return Err(ConfigError::Settings(
                "`clone.network_prefix` must be non-empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolves the scan password from its configured environment variable.
    pub fn scan_password(&self) -> Result<Option<String>, ConfigError> {
        self.scan
            .ssh_password_env
            .as_deref()
            .map(resolve_env_secret)
            .transpose()
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.state_root.join("sessions")
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.state_root.join("reports")
    }

    pub fn checkpoint_db_path(&self) -> PathBuf {
        self.state_root.join("checkpoints.sqlite3")
    }
}

fn default_ack_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_required_status() -> Option<String> {
    Some("active".to_string())
}

fn default_profile_root() -> PathBuf {
    PathBuf::from("playbooks/security")
}

fn default_scan_command() -> Vec<String> {
    vec!["ansible-playbook".to_string()]
}

fn default_scan_timeout_seconds() -> u64 {
    1800
}

fn default_ssh_user() -> String {
    "root".to_string()
}

fn default_network_prefix() -> String {
    "forensics".to_string()
}

fn default_snapshot_timeout_seconds() -> u64 {
    900
}

fn default_instance_timeout_seconds() -> u64 {
    600
}

fn default_poll_interval_seconds() -> u64 {
    5
}

fn default_llm_base_url() -> String {
    "https://api.mistral.ai/v1".to_string()
}

fn default_llm_model() -> String {
    "mistral-large-latest".to_string()
}

fn default_llm_api_key_env() -> String {
    "MISTRAL_API_KEY".to_string()
}

fn default_llm_timeout_seconds() -> u64 {
    120
}
