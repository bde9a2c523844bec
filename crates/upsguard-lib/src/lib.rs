//! UPS-driven shutdown orchestration for vCenter deployments
//!
//! This crate provides:
//! - UPS telemetry over SNMP with per-vendor normalization
//! - A fenced shutdown decision per deployment
//! - Ordered VM shutdown through the vCenter REST API
//! - Durable shutdown history and the poll loop driving it all
//! - Health checks and observability

pub mod config;
pub mod control_plane;
pub mod decision;
pub mod engine;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod orchestrator;
pub mod self_shutdown;
pub mod state;
pub mod telemetry;

pub use config::{DeploymentConfig, DeploymentKind, GeneralConfig, GuardConfig, SnmpVersion, UpsType};
pub use engine::{Engine, EngineDeps, EngineOptions, RunMode, RunOutcome};
pub use error::{GuardError, GuardResult};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{EventLogger, GuardMetrics};
