//! Azure Container Instances provider.
//!
//! Each unit is one container group named after the unit, holding a single
//! `trainer` container. Talks to the Azure Resource Manager REST API directly.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::error::{ProviderError, Result};
use super::unit::{Inspection, ProviderHandle, ProvisioningState, RawUnitState, RunState, UnitSpec};
use super::ResourceProvider;
use crate::config::AciConfig;

/// Name of the single container inside each container group.
pub const CONTAINER_NAME: &str = "trainer";

const MANAGEMENT_SCOPE: &str = "https://management.azure.com/.default";
/// Refresh tokens this long before they expire.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

struct CachedToken {
    value: String,
    expires_at: Instant,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

/// ACI-backed provider.
pub struct AciProvider {
    client: Client,
    config: AciConfig,
    token: Mutex<Option<CachedToken>>,
}

impl AciProvider {
    /// Creates a provider from configuration.
    ///
    /// # Errors
    /// Returns error if neither a static access token nor a complete set of
    /// client credentials is configured.
    pub fn new(config: AciConfig) -> Result<Self> {
        let has_static = config.access_token.as_deref().is_some_and(|t| !t.is_empty());
        let has_client_credentials =
            config.tenant_id.is_some() && config.client_id.is_some() && config.client_secret.is_some();
        if !has_static && !has_client_credentials {
            return Err(ProviderError::Auth(
                "configure provider.aci.access_token or tenant_id/client_id/client_secret".to_string(),
            ));
        }

        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { client, config, token: Mutex::new(None) })
    }

    fn group_url(&self, name: &str) -> String {
        format!(
            "{}/subscriptions/{}/resourceGroups/{}/providers/Microsoft.ContainerInstance/containerGroups/{}",
            self.config.management_url.trim_end_matches('/'),
            self.config.subscription_id,
            self.config.resource_group,
            name
        )
    }

    /// Returns a bearer token, fetching a new one with client credentials when needed.
    async fn bearer(&self) -> Result<String> {
        if let Some(token) = self.config.access_token.as_deref().filter(|t| !t.is_empty()) {
            return Ok(token.to_string());
        }

        let mut cached = self.token.lock().await;
        if let Some(ref token) = *cached {
            if Instant::now() + TOKEN_REFRESH_MARGIN < token.expires_at {
                return Ok(token.value.clone());
            }
        }

        let (Some(tenant), Some(client_id), Some(secret)) =
            (&self.config.tenant_id, &self.config.client_id, &self.config.client_secret)
        else {
            return Err(ProviderError::Auth("client credentials are not configured".to_string()));
        };

        let url = format!("{}/{}/oauth2/v2.0/token", self.config.authority_url.trim_end_matches('/'), tenant);
        debug!(url = %url, "Requesting management token");
        let response = self
            .client
            .post(&url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", client_id.as_str()),
                ("client_secret", secret.as_str()),
                ("scope", MANAGEMENT_SCOPE),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Auth(error_text(status, &body)));
        }

        let token: TokenResponse = response.json().await?;
        let value = token.access_token.clone();
        *cached = Some(CachedToken {
            value: token.access_token,
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        });
        Ok(value)
    }

    fn share_for(&self, volume: &str) -> Option<&str> {
        match volume {
            "datasets" => Some(&self.config.dataset_share),
            "models" => Some(&self.config.model_share),
            "outputs" => Some(&self.config.output_share),
            _ => None,
        }
    }

    /// Builds the container group resource body for a unit.
    fn container_group_body(&self, spec: &UnitSpec) -> Result<Value> {
        let mut volumes = Vec::new();
        let mut volume_mounts = Vec::new();
        for mount in &spec.mounts {
            let share = self.share_for(&mount.name).ok_or_else(|| {
                ProviderError::Allocation(format!("no file share configured for volume '{}'", mount.name))
            })?;
            volumes.push(json!({
                "name": mount.name,
                "azureFile": {
                    "shareName": share,
                    "storageAccountName": self.config.storage_account_name,
                    "storageAccountKey": self.config.storage_account_key,
                    "readOnly": mount.read_only,
                },
            }));
            volume_mounts.push(json!({
                "name": mount.name,
                "mountPath": mount.mount_path,
                "readOnly": mount.read_only,
            }));
        }

        let mut requests = json!({
            "cpu": spec.resources.cpu,
            "memoryInGB": spec.resources.memory_gb,
        });
        if let Some(ref gpu) = spec.resources.gpu {
            requests["gpu"] = json!({ "count": gpu.count, "sku": gpu.sku });
        }

        let command: Vec<&str> = self
            .config
            .entrypoint
            .iter()
            .map(String::as_str)
            .chain(spec.args.iter().map(String::as_str))
            .collect();

        let environment: Vec<Value> =
            spec.env.iter().map(|(name, value)| json!({ "name": name, "value": value })).collect();

        let mut properties = json!({
            "osType": "Linux",
            "restartPolicy": "Never",
            "containers": [{
                "name": CONTAINER_NAME,
                "properties": {
                    "image": spec.image,
                    "command": command,
                    "environmentVariables": environment,
                    "resources": { "requests": requests },
                    "volumeMounts": volume_mounts,
                },
            }],
            "volumes": volumes,
        });

        if let Some(ref registry) = self.config.registry {
            properties["imageRegistryCredentials"] = json!([{
                "server": registry.server,
                "username": registry.username,
                "password": registry.password,
            }]);
        }

        Ok(json!({
            "location": self.config.location,
            "tags": spec.labels,
            "properties": properties,
        }))
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Response> {
        let token = self.bearer().await?;
        Ok(request
            .bearer_auth(token)
            .query(&[("api-version", self.config.api_version.as_str())])
            .send()
            .await?)
    }
}

#[async_trait]
impl ResourceProvider for AciProvider {
    fn kind(&self) -> &'static str {
        "aci"
    }

    async fn allocate(&self, spec: &UnitSpec) -> Result<ProviderHandle> {
        let body = self.container_group_body(spec)?;
        let url = self.group_url(&spec.name);
        info!(unit = %spec.name, "Creating container group");

        let response = self.send(self.client.put(&url).json(&body)).await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Allocation(error_text(status, &body)));
        }

        let accepted: Value = response.json().await.unwrap_or(Value::Null);
        debug!(
            unit = %spec.name,
            provisioning_state = %accepted["properties"]["provisioningState"].as_str().unwrap_or("unknown"),
            "Container group accepted"
        );
        Ok(ProviderHandle(spec.name.clone()))
    }

    async fn inspect(&self, handle: &ProviderHandle) -> Result<Inspection> {
        let response = self.send(self.client.get(self.group_url(handle.as_str()))).await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(Inspection::NotFound);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Inspect(error_text(status, &body)));
        }

        let text = response.text().await?;
        Ok(Inspection::Present(parse_group(&text)?))
    }

    async fn fetch_logs(&self, handle: &ProviderHandle, tail: usize) -> Result<String> {
        let url = format!("{}/containers/{}/logs", self.group_url(handle.as_str()), CONTAINER_NAME);
        let tail = tail.to_string();
        let response = self.send(self.client.get(url).query(&[("tail", tail.as_str())])).await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Logs(error_text(status, &body)));
        }

        #[derive(Deserialize)]
        struct Logs {
            #[serde(default)]
            content: Option<String>,
        }
        let logs: Logs = response.json().await?;
        Ok(logs.content.unwrap_or_default())
    }

    async fn release(&self, handle: &ProviderHandle) -> Result<()> {
        info!(handle = %handle, "Deleting container group");
        let response = self.send(self.client.delete(self.group_url(handle.as_str()))).await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            warn!(handle = %handle, "Container group already gone at release");
            return Ok(());
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Release(error_text(status, &body)));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct ContainerGroup {
    properties: GroupProperties,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroupProperties {
    #[serde(default)]
    provisioning_state: Option<String>,
    #[serde(default)]
    containers: Vec<Container>,
}

#[derive(Debug, Deserialize)]
struct Container {
    properties: ContainerProperties,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContainerProperties {
    #[serde(default)]
    instance_view: Option<InstanceView>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstanceView {
    #[serde(default)]
    current_state: Option<CurrentState>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CurrentState {
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    exit_code: Option<i64>,
    #[serde(default)]
    detail_status: Option<String>,
}

fn parse_group(json: &str) -> Result<RawUnitState> {
    let group: ContainerGroup = serde_json::from_str(json)?;

    let provisioning = match group.properties.provisioning_state.as_deref() {
        Some("Pending" | "Creating" | "Repairing" | "Updating") | None => ProvisioningState::Pending,
        Some("Succeeded") => ProvisioningState::Succeeded,
        Some("Failed" | "Canceled") => ProvisioningState::Failed,
        Some(other) => ProvisioningState::Other(other.to_string()),
    };

    let current = group
        .properties
        .containers
        .into_iter()
        .next()
        .and_then(|c| c.properties.instance_view)
        .and_then(|v| v.current_state);

    let Some(current) = current else {
        return Ok(RawUnitState { provisioning, run: None, exit_code: None, detail: None });
    };

    let run = current.state.as_deref().map(|state| match state {
        "Waiting" => RunState::Waiting,
        "Running" => RunState::Running,
        "Terminated" => RunState::Terminated,
        other => RunState::Other(other.to_string()),
    });

    Ok(RawUnitState {
        provisioning,
        run,
        exit_code: current.exit_code,
        detail: current.detail_status.filter(|d| !d.is_empty()),
    })
}

/// Extracts `code: message` from an ARM error body, falling back to the raw body.
fn error_text(status: StatusCode, body: &str) -> String {
    #[derive(Deserialize)]
    struct ArmError {
        error: ArmErrorBody,
    }
    #[derive(Deserialize)]
    struct ArmErrorBody {
        #[serde(default)]
        code: String,
        #[serde(default)]
        message: String,
    }

    match serde_json::from_str::<ArmError>(body) {
        Ok(err) if !err.error.code.is_empty() => format!("{}: {}", err.error.code, err.error.message),
        _ if body.trim().is_empty() => status.to_string(),
        _ => format!("{}: {}", status, body.trim()),
    }
}
