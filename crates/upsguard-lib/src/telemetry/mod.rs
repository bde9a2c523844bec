//! UPS telemetry
//!
//! This module turns vendor-specific SNMP readings into a uniform
//! [`UpsStats`] record:
//! - `TelemetryReader` is the capability the engine depends on
//! - `SnmpTransport` is the raw GET primitive underneath it
//! - `UpsVendor` holds each vendor's OIDs and unit conversions
//!
//! Reading telemetry never mutates anything; every error is recoverable by
//! skipping the deployment for one cycle.

mod net;
mod vendor;

pub use net::NetSnmpTransport;
pub use vendor::{UpsVendor, VendorOids};

use crate::config::{DeploymentConfig, SnmpVersion};
use crate::error::{GuardError, GuardResult};
use crate::models::UpsStats;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Standard SNMP agent port
pub const DEFAULT_SNMP_PORT: u16 = 161;

/// Produces a normalized stats snapshot for a deployment's UPS
#[async_trait]
pub trait TelemetryReader: Send + Sync {
    async fn read_stats(&self, deployment: &DeploymentConfig) -> GuardResult<UpsStats>;
}

/// Raw SNMP GET against one agent
#[async_trait]
pub trait SnmpTransport: Send + Sync {
    /// Fetch the given objects in one session, returning values in request order
    async fn get(&self, target: &SnmpTarget, oids: &[Oid]) -> GuardResult<Vec<SnmpValue>>;
}

/// Where and how to reach an SNMP agent
#[derive(Clone, PartialEq, Eq)]
pub struct SnmpTarget {
    pub host: String,
    pub port: u16,
    pub community: String,
    pub version: SnmpVersion,
}

impl SnmpTarget {
    /// Build a target from `host` or `host:port`
    pub fn parse(address: &str, community: &str) -> GuardResult<Self> {
        let address = address.trim();
        let (host, port) = match address.rsplit_once(':') {
            Some((host, port)) if !host.contains(':') => {
                let port = port.parse::<u16>().map_err(|_| {
                    GuardError::config(format!("invalid SNMP port in '{}'", address))
                })?;
                (host.to_string(), port)
            }
            _ => (address.to_string(), DEFAULT_SNMP_PORT),
        };

        Ok(Self {
            host,
            port,
            community: community.to_string(),
            version: SnmpVersion::default(),
        })
    }

    pub fn with_version(mut self, version: SnmpVersion) -> Self {
        self.version = version;
        self
    }

    /// `host:port` for socket resolution
    pub fn socket_addr(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl std::fmt::Debug for SnmpTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnmpTarget")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

/// Numeric object identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Oid {
    text: String,
    arcs: Vec<u32>,
}

impl Oid {
    /// Parse dotted notation, with or without the leading dot
    pub fn parse(text: &str) -> GuardResult<Self> {
        let trimmed = text.trim().trim_start_matches('.');
        let arcs = trimmed
            .split('.')
            .map(|arc| arc.parse::<u32>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| GuardError::config(format!("invalid OID '{}'", text)))?;

        if arcs.len() < 2 {
            return Err(GuardError::config(format!("OID '{}' is too short", text)));
        }

        Ok(Self {
            text: format!(".{}", trimmed),
            arcs,
        })
    }

    pub fn arcs(&self) -> &[u32] {
        &self.arcs
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}

/// Owned SNMP value, detached from the transport's buffers
#[derive(Debug, Clone, PartialEq)]
pub enum SnmpValue {
    Integer(i64),
    Gauge(u64),
    Counter(u64),
    Timeticks(u64),
    Text(String),
    /// Any other value type (Null, Boolean, ObjectIdentifier, IpAddress, Opaque)
    Other(String),
}

impl SnmpValue {
    /// Numeric interpretation, if the value has one
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SnmpValue::Integer(v) => Some(*v as f64),
            SnmpValue::Gauge(v) | SnmpValue::Counter(v) | SnmpValue::Timeticks(v) => {
                Some(*v as f64)
            }
            SnmpValue::Text(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
            SnmpValue::Other(_) => None,
        }
    }
}

/// Telemetry reader that dispatches on the configured vendor
pub struct SnmpTelemetryReader {
    transport: Arc<dyn SnmpTransport>,
}

impl SnmpTelemetryReader {
    pub fn new(transport: Arc<dyn SnmpTransport>) -> Self {
        Self { transport }
    }

    /// Reader backed by the network SNMP transport
    pub fn with_network_transport() -> Self {
        Self::new(Arc::new(NetSnmpTransport::default()))
    }
}

#[async_trait]
impl TelemetryReader for SnmpTelemetryReader {
    async fn read_stats(&self, deployment: &DeploymentConfig) -> GuardResult<UpsStats> {
        let vendor = UpsVendor::from(deployment.ups_type);
        let target = SnmpTarget::parse(&deployment.ups_host, &deployment.ups_snmpv1_community)?
            .with_version(deployment.ups_snmp_version);

        let oids = vendor
            .oids()
            .as_list()
            .iter()
            .map(|oid| Oid::parse(oid))
            .collect::<GuardResult<Vec<_>>>()?;

        debug!(
            ups_type = %deployment.ups_type,
            ups_host = %target.host,
            ups_port = target.port,
            snmp_version = %target.version,
            "Reading power state from UPS"
        );

        let values = self.transport.get(&target, &oids).await?;
        vendor.normalize(&target.host, &values)
    }
}
