//! vCenter REST client

use super::{ControlPlane, ControlPlaneEndpoint, SessionToken};
use crate::error::{GuardError, GuardResult};
use crate::models::{PowerState, VmInventoryEntry};
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Header carrying the session id on every authenticated call
const SESSION_HEADER: &str = "vmware-api-session-id";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// VM summary as returned by `GET /api/vcenter/vm`
#[derive(Debug, Deserialize)]
struct VmSummary {
    vm: String,
    name: String,
    power_state: PowerState,
}

impl From<VmSummary> for VmInventoryEntry {
    fn from(summary: VmSummary) -> Self {
        Self {
            id: summary.vm,
            name: summary.name,
            power_state: summary.power_state,
        }
    }
}

/// Control plane backed by the vCenter Automation REST API
pub struct VcenterClient {
    client: Client,
}

impl VcenterClient {
    /// Build a client; appliances usually ship self-signed certificates
    pub fn new(accept_invalid_certs: bool) -> GuardResult<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .danger_accept_invalid_certs(accept_invalid_certs)
            .build()
            .map_err(|e| GuardError::config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    fn url(host: &str, path: &str) -> Result<Url, String> {
        base_url(host)?
            .join(path)
            .map_err(|e| format!("invalid request path {}: {}", path, e))
    }
}

/// `https://{host}/` unless the host already names a scheme
pub(crate) fn base_url(host: &str) -> Result<Url, String> {
    let host = host.trim();
    let raw = if host.contains("://") {
        host.to_string()
    } else {
        format!("https://{}", host)
    };

    let mut url = Url::parse(&raw).map_err(|e| format!("invalid control plane host '{}': {}", host, e))?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

async fn error_body(response: Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    format!("status {}: {}", status, body.trim())
}

#[async_trait]
impl ControlPlane for VcenterClient {
    async fn create_session(&self, endpoint: &ControlPlaneEndpoint) -> GuardResult<SessionToken> {
        let session_error = |message: String| GuardError::ControlPlaneSession {
            host: endpoint.host.clone(),
            message,
        };

        let url = Self::url(&endpoint.host, "api/session").map_err(session_error)?;
        let response = self
            .client
            .post(url)
            .basic_auth(&endpoint.username, Some(&endpoint.password))
            .send()
            .await
            .map_err(|e| session_error(format!("connection failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(session_error(error_body(response).await));
        }

        let header_id = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        let id = match header_id {
            Some(id) => id,
            None => response
                .json::<String>()
                .await
                .map_err(|e| session_error(format!("no session id in response: {}", e)))?,
        };

        debug!(host = %endpoint.host, "Control plane session established");
        Ok(SessionToken::new(endpoint.host.clone(), id))
    }

    async fn list_powered_on_vms(&self, session: &SessionToken) -> GuardResult<Vec<VmInventoryEntry>> {
        const OPERATION: &str = "list_powered_on_vms";
        let api_error = |message: String| GuardError::api(session.host(), OPERATION, message);

        let url = Self::url(session.host(), "api/vcenter/vm").map_err(api_error)?;
        let response = self
            .client
            .get(url)
            .query(&[("power_states", "POWERED_ON")])
            .header(SESSION_HEADER, session.id())
            .send()
            .await
            .map_err(|e| api_error(e.to_string()))?;

        if !response.status().is_success() {
            return Err(api_error(error_body(response).await));
        }

        let vms: Vec<VmSummary> = response
            .json()
            .await
            .map_err(|e| api_error(format!("invalid inventory response: {}", e)))?;

        Ok(vms.into_iter().map(VmInventoryEntry::from).collect())
    }

    async fn request_guest_shutdown(&self, session: &SessionToken, vm_id: &str) -> GuardResult<()> {
        const OPERATION: &str = "guest_shutdown";
        let api_error =
            |message: String| GuardError::api(session.host(), OPERATION, format!("{}: {}", vm_id, message));

        let path = format!("api/vcenter/vm/{}/guest/power", vm_id);
        let url = Self::url(session.host(), &path).map_err(api_error)?;
        let response = self
            .client
            .post(url)
            .query(&[("action", "shutdown")])
            .header(SESSION_HEADER, session.id())
            .send()
            .await
            .map_err(|e| api_error(e.to_string()))?;

        if !response.status().is_success() {
            return Err(api_error(error_body(response).await));
        }

        Ok(())
    }
}
