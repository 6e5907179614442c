use super::{CloudResources, CollaboratorError, NetworkHandle, ResourceStatus};
use crate::config::{resolve_env_secret, CloudConfig, ConfigError};
use crate::orchestration::state::Target;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

const SERVICE: &str = "cloud";
const CLOUD_TIMEOUT: Duration = Duration::from_secs(60);
const COMPUTE_MICROVERSION: &str = "2.45";
const ISOLATED_SUBNET_CIDR: &str = "192.168.250.0/24";

#[derive(Debug, Deserialize)]
struct NetworkList {
    #[serde(default)]
    networks: Vec<NetworkBody>,
}

#[derive(Debug, Deserialize)]
struct NetworkEnvelope {
    network: NetworkBody,
}

#[derive(Debug, Deserialize)]
struct NetworkBody {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct CreateImageReply {
    image_id: String,
}

#[derive(Debug, Deserialize)]
struct ImageBody {
    status: String,
}

#[derive(Debug, Deserialize)]
struct ServerEnvelope {
    server: ServerBody,
}

#[derive(Debug, Deserialize)]
struct ServerBody {
    id: String,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Serialize)]
struct LaunchRequest<'a> {
    server: LaunchServer<'a>,
}

#[derive(Debug, Serialize)]
struct LaunchServer<'a> {
    name: &'a str,
    #[serde(rename = "imageRef")]
    image_ref: &'a str,
    #[serde(rename = "flavorRef")]
    flavor_ref: &'a str,
    networks: Vec<NetworkAttachment<'a>>,
}

#[derive(Debug, Serialize)]
struct NetworkAttachment<'a> {
    uuid: &'a str,
}

/// Maps an image status to readiness. Glance reports `active` once a
/// snapshot is usable.
pub fn image_status(raw: &str) -> ResourceStatus {
    match raw.to_ascii_lowercase().as_str() {
        "active" => ResourceStatus::Ready,
        "killed" | "deleted" | "pending_delete" | "deactivated" => {
            ResourceStatus::Failed(format!("image entered status `{raw}`"))
        }
        _ => ResourceStatus::Pending,
    }
}

pub fn server_status(raw: &str) -> ResourceStatus {
    match raw.to_ascii_uppercase().as_str() {
        "ACTIVE" => ResourceStatus::Ready,
        "ERROR" | "DELETED" | "SOFT_DELETED" => {
            ResourceStatus::Failed(format!("server entered status `{raw}`"))
        }
        _ => ResourceStatus::Pending,
    }
}

/// Compute, image and network API client authenticated with a pre-issued token.
#[derive(Clone)]
pub struct OpenStackCloud {
    agent: ureq::Agent,
    compute_url: String,
    image_url: String,
    network_url: String,
    token: String,
    flavor_ref: String,
}

impl OpenStackCloud {
    pub fn from_config(config: &CloudConfig) -> Result<Self, ConfigError> {
        let token = resolve_env_secret(&config.token_env)?;
        Ok(Self {
            agent: ureq::AgentBuilder::new().timeout(CLOUD_TIMEOUT).build(),
            compute_url: config.compute_url.trim_end_matches('/').to_string(),
            image_url: config.image_url.trim_end_matches('/').to_string(),
            network_url: config.network_url.trim_end_matches('/').to_string(),
            token,
            flavor_ref: config.flavor_ref.clone(),
        })
    }

    fn get<T: DeserializeOwned>(&self, url: &str) -> Result<T, CollaboratorError> {
        let response = self
            .agent
            .get(url)
            .set("X-Auth-Token", &self.token)
            .set("X-OpenStack-Nova-API-Version", COMPUTE_MICROVERSION)
            .call()
            .map_err(|err| CollaboratorError::from_ureq(SERVICE, err))?;
        response
            .into_json::<T>()
            .map_err(|err| CollaboratorError::invalid(SERVICE, err.to_string()))
    }

    fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<T, CollaboratorError> {
        let response = self
            .agent
            .post(url)
            .set("X-Auth-Token", &self.token)
            .set("X-OpenStack-Nova-API-Version", COMPUTE_MICROVERSION)
            .send_json(body)
            .map_err(|err| CollaboratorError::from_ureq(SERVICE, err))?;
        response
            .into_json::<T>()
            .map_err(|err| CollaboratorError::invalid(SERVICE, err.to_string()))
    }
}

impl CloudResources for OpenStackCloud {
    fn ensure_network(&self, name: &str) -> Result<NetworkHandle, CollaboratorError> {
        let lookup = format!(
            "{}/v2.0/networks?name={}",
            self.network_url,
            urlencoding::encode(name)
        );
        let existing: NetworkList = self.get(&lookup)?;
        if let Some(network) = existing.networks.into_iter().find(|net| net.name == name) {
            return Ok(NetworkHandle {
                id: network.id,
                name: network.name,
                reused: true,
            });
        }

        let created: NetworkEnvelope = self.post(
            &format!("{}/v2.0/networks", self.network_url),
            &json!({ "network": { "name": name, "admin_state_up": true } }),
        )?;
        let _: serde_json::Value = self.post(
            &format!("{}/v2.0/subnets", self.network_url),
            &json!({
                "subnet": {
                    "name": format!("{name}-subnet"),
                    "network_id": created.network.id,
                    "ip_version": 4,
                    "cidr": ISOLATED_SUBNET_CIDR,
                }
            }),
        )?;
        tracing::info!(network = name, id = %created.network.id, "created isolated network");
        Ok(NetworkHandle {
            id: created.network.id,
            name: created.network.name,
            reused: false,
        })
    }

    fn create_snapshot(
        &self,
        target: &Target,
        snapshot_name: &str,
    ) -> Result<String, CollaboratorError> {
        let reply: CreateImageReply = self.post(
            &format!("{}/servers/{}/action", self.compute_url, target.id),
            &json!({ "createImage": { "name": snapshot_name } }),
        )?;
        Ok(reply.image_id)
    }

    fn snapshot_status(&self, snapshot_id: &str) -> Result<ResourceStatus, CollaboratorError> {
        let image: ImageBody = self.get(&format!("{}/v2/images/{snapshot_id}", self.image_url))?;
        Ok(image_status(&image.status))
    }

    fn launch_from_snapshot(
        &self,
        snapshot_id: &str,
        network_id: &str,
        instance_name: &str,
    ) -> Result<String, CollaboratorError> {
        let request = LaunchRequest {
            server: LaunchServer {
                name: instance_name,
                image_ref: snapshot_id,
                flavor_ref: &self.flavor_ref,
                networks: vec![NetworkAttachment { uuid: network_id }],
            },
        };
        let reply: ServerEnvelope =
            self.post(&format!("{}/servers", self.compute_url), &request)?;
        Ok(reply.server.id)
    }

    fn instance_status(&self, instance_id: &str) -> Result<ResourceStatus, CollaboratorError> {
        let reply: ServerEnvelope =
            self.get(&format!("{}/servers/{instance_id}", self.compute_url))?;
        let status = reply.server.status.unwrap_or_default();
        Ok(server_status(&status))
    }
}

/// Cloud used when no `cloud` section is configured; every call fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredCloud;

impl UnconfiguredCloud {
    fn refuse<T>(&self) -> Result<T, CollaboratorError> {
        Err(CollaboratorError::NotConfigured {
            service: SERVICE.to_string(),
            reason: "add a `cloud` section to enable forensic cloning".to_string(),
        })
    }
}

impl CloudResources for UnconfiguredCloud {
    fn ensure_network(&self, _name: &str) -> Result<NetworkHandle, CollaboratorError> {
        self.refuse()
    }

    fn create_snapshot(&self, _target: &Target, _name: &str) -> Result<String, CollaboratorError> {
        self.refuse()
    }

    fn snapshot_status(&self, _snapshot_id: &str) -> Result<ResourceStatus, CollaboratorError> {
        self.refuse()
    }

    fn launch_from_snapshot(
        &self,
        _snapshot_id: &str,
        _network_id: &str,
        _instance_name: &str,
    ) -> Result<String, CollaboratorError> {
        self.refuse()
    }

    fn instance_status(&self, _instance_id: &str) -> Result<ResourceStatus, CollaboratorError> {
        self.refuse()
    }
}
