//! Network SNMP transport
//!
//! Uses the blocking session from the `snmp2` crate on the blocking thread
//! pool. One short-lived session per read keeps request ids and sockets
//! from leaking across polls. The session speaks the protocol version
//! configured on the target; v1 unless a deployment opts into v2c.

use super::{Oid, SnmpTarget, SnmpTransport, SnmpValue};
use crate::config::SnmpVersion;
use crate::error::{GuardError, GuardResult};
use async_trait::async_trait;
use std::time::Duration;

/// Default per-request timeout
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// SNMP GET over UDP
#[derive(Debug, Clone)]
pub struct NetSnmpTransport {
    timeout: Duration,
}

impl Default for NetSnmpTransport {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl NetSnmpTransport {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl SnmpTransport for NetSnmpTransport {
    async fn get(&self, target: &SnmpTarget, oids: &[Oid]) -> GuardResult<Vec<SnmpValue>> {
        let target = target.clone();
        let oids = oids.to_vec();
        let timeout = self.timeout;
        let host = target.host.clone();

        tokio::task::spawn_blocking(move || blocking_get(&target, &oids, timeout))
            .await
            .map_err(|e| GuardError::unreachable(host, format!("SNMP worker failed: {}", e)))?
    }
}

fn blocking_get(target: &SnmpTarget, oids: &[Oid], timeout: Duration) -> GuardResult<Vec<SnmpValue>> {
    let addr = target.socket_addr();
    let community = target.community.as_bytes();
    let session = match target.version {
        SnmpVersion::V1 => snmp2::SyncSession::new_v1(addr.as_str(), community, Some(timeout), 0),
        SnmpVersion::V2c => snmp2::SyncSession::new_v2c(addr.as_str(), community, Some(timeout), 0),
    };
    let mut session =
        session.map_err(|e| GuardError::unreachable(&target.host, format!("{:?}", e)))?;

    let mut values = Vec::with_capacity(oids.len());
    for oid in oids {
        let arcs: Vec<u64> = oid.arcs().iter().map(|arc| u64::from(*arc)).collect();
        let name = snmp2::Oid::from(&arcs)
            .map_err(|e| GuardError::config(format!("invalid OID {}: {:?}", oid.as_str(), e)))?;

        let mut pdu = session.get(&name).map_err(|e| {
            GuardError::unreachable(&target.host, format!("GET {} failed: {:?}", oid.as_str(), e))
        })?;

        if pdu.error_status != 0 {
            return Err(GuardError::malformed(
                &target.host,
                oid.as_str(),
                format!("agent returned error status {}", pdu.error_status),
            ));
        }

        let value = match pdu.varbinds.next() {
            Some((_name, value)) => convert(value),
            None => {
                return Err(GuardError::malformed(
                    &target.host,
                    oid.as_str(),
                    "response carried no varbind",
                ))
            }
        };
        values.push(value);
    }

    Ok(values)
}

fn convert(value: snmp2::Value<'_>) -> SnmpValue {
    use snmp2::Value;

    match value {
        Value::Integer(v) => SnmpValue::Integer(v),
        Value::Unsigned32(v) => SnmpValue::Gauge(u64::from(v)),
        Value::Counter32(v) => SnmpValue::Counter(u64::from(v)),
        Value::Counter64(v) => SnmpValue::Counter(v),
        Value::Timeticks(v) => SnmpValue::Timeticks(u64::from(v)),
        Value::OctetString(bytes) => SnmpValue::Text(String::from_utf8_lossy(bytes).into_owned()),
        other => SnmpValue::Other(format!("{:?}", other)),
    }
}
