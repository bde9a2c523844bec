//! Component health for the daemon's liveness and readiness endpoints
//!
//! Each collaborator the engine talks to gets a component entry. Per-cycle
//! errors mark a component degraded; fatal errors mark it unhealthy.

use crate::error::GuardError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Last cycle failed, next poll will retry
    Degraded,
    Unhealthy,
}

impl ComponentStatus {
    pub fn is_operational(&self) -> bool {
        matches!(self, ComponentStatus::Healthy | ComponentStatus::Degraded)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    fn with_status(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn healthy() -> Self {
        Self::with_status(ComponentStatus::Healthy, None)
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::with_status(ComponentStatus::Degraded, Some(message.into()))
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::with_status(ComponentStatus::Unhealthy, Some(message.into()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: BTreeMap<String, ComponentHealth>,
}

impl HealthResponse {
    /// Worst status across all components
    pub fn compute_status(components: &BTreeMap<String, ComponentHealth>) -> ComponentStatus {
        let mut degraded = false;
        for health in components.values() {
            match health.status {
                ComponentStatus::Unhealthy => return ComponentStatus::Unhealthy,
                ComponentStatus::Degraded => degraded = true,
                ComponentStatus::Healthy => {}
            }
        }

        if degraded {
            ComponentStatus::Degraded
        } else {
            ComponentStatus::Healthy
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Component names
pub mod components {
    pub const TELEMETRY: &str = "telemetry";
    pub const CONTROL_PLANE: &str = "control_plane";
    pub const STATE_STORE: &str = "state_store";
    pub const LOCAL_SHUTDOWN: &str = "local_shutdown";
    pub const CONFIG: &str = "config";

    pub const ALL: [&str; 5] = [TELEMETRY, CONTROL_PLANE, STATE_STORE, LOCAL_SHUTDOWN, CONFIG];
}

/// Component a given error is attributed to
pub fn component_for(error: &GuardError) -> &'static str {
    match error {
        GuardError::TelemetryUnreachable { .. } | GuardError::TelemetryMalformed { .. } => {
            components::TELEMETRY
        }
        GuardError::ControlPlaneSession { .. } | GuardError::ControlPlaneApi { .. } => {
            components::CONTROL_PLANE
        }
        GuardError::PersistenceReadFailed { .. } | GuardError::PersistenceWriteFailed { .. } => {
            components::STATE_STORE
        }
        GuardError::Config { .. } => components::CONFIG,
        GuardError::LocalShutdownFailed { .. } => components::LOCAL_SHUTDOWN,
    }
}

/// Shared, cloneable health state
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    components: Arc<RwLock<BTreeMap<String, ComponentHealth>>>,
    ready: Arc<RwLock<bool>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every daemon component registered healthy
    pub async fn with_default_components() -> Self {
        let registry = Self::new();
        for name in components::ALL {
            registry.set_healthy(name).await;
        }
        registry
    }

    pub async fn update(&self, name: &str, health: ComponentHealth) {
        self.components
            .write()
            .await
            .insert(name.to_string(), health);
    }

    pub async fn set_healthy(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::degraded(message)).await;
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::unhealthy(message)).await;
    }

    /// Attribute an error to its component, unhealthy if fatal
    pub async fn record_error(&self, error: &GuardError) {
        let name = component_for(error);
        if error.is_fatal() {
            self.set_unhealthy(name, error.to_string()).await;
        } else {
            self.set_degraded(name, error.to_string()).await;
        }
    }

    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    pub async fn health(&self) -> HealthResponse {
        let components = self.components.read().await.clone();
        let status = HealthResponse::compute_status(&components);
        HealthResponse { status, components }
    }

    pub async fn readiness(&self) -> ReadinessResponse {
        let ready = *self.ready.read().await;
        let health = self.health().await;

        let reason = if !ready {
            Some("No evaluation pass completed yet".to_string())
        } else if health.status == ComponentStatus::Unhealthy {
            Some("Critical component unhealthy".to_string())
        } else {
            None
        };

        ReadinessResponse {
            ready: reason.is_none(),
            reason,
        }
    }
}
