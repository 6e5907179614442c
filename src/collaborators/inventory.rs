use super::{CollaboratorError, Inventory};
use crate::config::{resolve_env_secret, ConfigError, InventoryConfig};
use crate::orchestration::state::Target;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

const SERVICE: &str = "inventory";
const INVENTORY_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ListingBody {
    Wrapped { servers: Vec<MachineRecord> },
    Bare(Vec<MachineRecord>),
}

#[derive(Debug, Deserialize)]
struct MachineRecord {
    id: String,
    name: String,
    #[serde(default, alias = "ip_address")]
    address: Option<String>,
    #[serde(default)]
    addresses: BTreeMap<String, Vec<AddressEntry>>,
    #[serde(default)]
    status: String,
}

#[derive(Debug, Deserialize)]
struct AddressEntry {
    addr: String,
}

impl MachineRecord {
    fn into_target(self) -> Target {
        let address = self
            .address
            .filter(|address| !address.trim().is_empty())
            .or_else(|| {
                self.addresses
                    .into_values()
                    .flatten()
                    .map(|entry| entry.addr)
                    .find(|addr| !addr.trim().is_empty())
            });
        Target {
            id: self.id,
            name: self.name,
            address,
            status: self.status,
        }
    }
}

/// Machine listing over HTTP with basic auth. Filters become query parameters.
#[derive(Clone)]
pub struct HttpInventory {
    agent: ureq::Agent,
    url: String,
    authorization: String,
}

impl HttpInventory {
    pub fn from_config(config: &InventoryConfig) -> Result<Self, ConfigError> {
        let password = resolve_env_secret(&config.password_env)?;
        Ok(Self::new(&config.url, &config.username, &password))
    }

    pub fn new(url: &str, username: &str, password: &str) -> Self {
        let credentials = STANDARD.encode(format!("{username}:{password}"));
        Self {
            agent: ureq::AgentBuilder::new().timeout(INVENTORY_TIMEOUT).build(),
            url: url.to_string(),
            authorization: format!("Basic {credentials}"),
        }
    }

    fn listing_url(&self, filters: &BTreeMap<String, String>) -> String {
        if filters.is_empty() {
            return self.url.clone();
        }
        let encoded = filters
            .iter()
            .map(|(key, value)| {
                format!(
                    "{}={}",
                    urlencoding::encode(key),
                    urlencoding::encode(value)
                )
            })
            .collect::<Vec<_>>()
            .join("&");
        let separator = if self.url.contains('?') { '&' } else { '?' };
        format!("{}{separator}{encoded}", self.url)
    }
}

pub fn parse_listing(raw: &str) -> Result<Vec<Target>, CollaboratorError> {
    let body: ListingBody =
        serde_json::from_str(raw).map_err(|err| CollaboratorError::invalid(SERVICE, err.to_string()))?;
    let records = match body {
        ListingBody::Wrapped { servers } => servers,
        ListingBody::Bare(records) => records,
    };
    Ok(records.into_iter().map(MachineRecord::into_target).collect())
}

impl Inventory for HttpInventory {
    fn list_machines(
        &self,
        filters: &BTreeMap<String, String>,
    ) -> Result<Vec<Target>, CollaboratorError> {
        let url = self.listing_url(filters);
        let response = self
            .agent
            .get(&url)
            .set("Authorization", &self.authorization)
            .set("Accept", "application/json")
            .call()
            .map_err(|err| CollaboratorError::from_ureq(SERVICE, err))?;
        let raw = response
            .into_string()
            .map_err(|err| CollaboratorError::invalid(SERVICE, err.to_string()))?;
        let targets = parse_listing(&raw)?;
        tracing::info!(count = targets.len(), "inventory listing received");
        Ok(targets)
    }
}

/// Inventory used when no `inventory` section is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredInventory;

impl Inventory for UnconfiguredInventory {
    fn list_machines(
        &self,
        _filters: &BTreeMap<String, String>,
    ) -> Result<Vec<Target>, CollaboratorError> {
        Err(CollaboratorError::NotConfigured {
            service: SERVICE.to_string(),
            reason: "add an `inventory` section to discover machines".to_string(),
        })
    }
}
