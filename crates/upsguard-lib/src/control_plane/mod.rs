//! Virtualization control plane access
//!
//! The orchestrator only needs three calls: open a session, list powered-on
//! VMs and request a guest shutdown. `VcenterClient` implements them against
//! the vCenter REST API; tests substitute in-memory fakes. Standalone ESXi
//! hosts are instead powered off whole through [`HostShutdown`].

pub(crate) mod esxi;
mod vcenter;

pub use esxi::{HostShutdown, VicfgHostOps};

pub(crate) use vcenter::base_url;
pub use vcenter::VcenterClient;

use crate::config::{DeploymentConfig, DeploymentKind};
use crate::error::GuardResult;
use crate::models::VmInventoryEntry;
use async_trait::async_trait;
use std::fmt;

/// Connection details for one deployment's control plane
#[derive(Clone)]
pub struct ControlPlaneEndpoint {
    pub host: String,
    pub username: String,
    pub password: String,
}

impl From<&DeploymentConfig> for ControlPlaneEndpoint {
    fn from(deployment: &DeploymentConfig) -> Self {
        match deployment.kind {
            DeploymentKind::Vcenter => Self {
                host: deployment.vcenter_host.clone(),
                username: deployment.vcenter_username.clone(),
                password: deployment.vcenter_password.clone(),
            },
            DeploymentKind::Esxi => Self {
                host: deployment.esxi_host.clone(),
                username: deployment.esxi_username.clone(),
                password: deployment.esxi_password.clone(),
            },
        }
    }
}

impl fmt::Debug for ControlPlaneEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlPlaneEndpoint")
            .field("host", &self.host)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Authenticated session bound to the host that issued it
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken {
    host: String,
    id: String,
}

impl SessionToken {
    pub fn new(host: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            id: id.into(),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionToken")
            .field("host", &self.host)
            .field("id", &"<redacted>")
            .finish()
    }
}

/// Remote operations the shutdown sequence depends on
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn create_session(&self, endpoint: &ControlPlaneEndpoint) -> GuardResult<SessionToken>;

    async fn list_powered_on_vms(&self, session: &SessionToken) -> GuardResult<Vec<VmInventoryEntry>>;

    /// Ask the guest OS of one VM to shut down; returns once the request is accepted
    async fn request_guest_shutdown(&self, session: &SessionToken, vm_id: &str) -> GuardResult<()>;
}
