//! Vendor OID tables and unit normalization
//!
//! Each vendor maps the same three readings to different objects and, for
//! runtime, different units. Everything leaving this module is in minutes
//! and percent.

use super::SnmpValue;
use crate::config::UpsType;
use crate::error::{GuardError, GuardResult};
use crate::models::UpsStats;

/// Cyberpower reports runtime in TimeTicks (1/100 s)
const CYBERPOWER_TICKS_PER_MINUTE: f64 = 6000.0;

/// Object identifiers for the readings a vendor exposes
#[derive(Debug, Clone, Copy)]
pub struct VendorOids {
    pub input_voltage: &'static str,
    pub runtime_remaining: &'static str,
    pub capacity_remaining_pct: &'static str,
}

impl VendorOids {
    /// OIDs in the order `normalize` expects their values
    pub fn as_list(&self) -> [&'static str; 3] {
        [
            self.input_voltage,
            self.runtime_remaining,
            self.capacity_remaining_pct,
        ]
    }
}

/// UPS-MIB objects (RFC 1628) as implemented by Tripplite cards
const TRIPPLITE: VendorOids = VendorOids {
    input_voltage: ".1.3.6.1.2.1.33.1.3.3.1.3.1",
    runtime_remaining: ".1.3.6.1.2.1.33.1.2.3.0",
    capacity_remaining_pct: ".1.3.6.1.2.1.33.1.2.4.0",
};

/// CyberPower enterprise MIB objects
const CYBERPOWER: VendorOids = VendorOids {
    input_voltage: ".1.3.6.1.4.1.3808.1.1.1.3.2.1.0",
    runtime_remaining: ".1.3.6.1.4.1.3808.1.1.1.2.2.4.0",
    capacity_remaining_pct: ".1.3.6.1.4.1.3808.1.1.1.2.2.1.0",
};

/// Closed set of supported vendors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsVendor {
    Tripplite,
    Cyberpower,
}

impl From<UpsType> for UpsVendor {
    fn from(ups_type: UpsType) -> Self {
        match ups_type {
            UpsType::Tripplite => UpsVendor::Tripplite,
            UpsType::Cyberpower => UpsVendor::Cyberpower,
        }
    }
}

impl UpsVendor {
    pub fn oids(&self) -> VendorOids {
        match self {
            UpsVendor::Tripplite => TRIPPLITE,
            UpsVendor::Cyberpower => CYBERPOWER,
        }
    }

    /// Convert a raw runtime reading into minutes
    pub fn runtime_minutes(&self, raw: f64) -> f64 {
        match self {
            UpsVendor::Tripplite => raw,
            UpsVendor::Cyberpower => raw / CYBERPOWER_TICKS_PER_MINUTE,
        }
    }

    /// Build normalized stats from values fetched in `oids().as_list()` order
    pub fn normalize(&self, host: &str, values: &[SnmpValue]) -> GuardResult<UpsStats> {
        let oids = self.oids();
        let [voltage_oid, runtime_oid, pct_oid] = oids.as_list();

        if values.len() != 3 {
            return Err(GuardError::malformed(
                host,
                voltage_oid,
                format!("expected 3 values, got {}", values.len()),
            ));
        }

        let input_voltage = numeric(host, voltage_oid, &values[0])?;
        let runtime_raw = numeric(host, runtime_oid, &values[1])?;
        let pct_left = numeric(host, pct_oid, &values[2])?;

        if !(0.0..=100.0).contains(&pct_left) {
            return Err(GuardError::malformed(
                host,
                pct_oid,
                format!("capacity {} outside [0, 100]", pct_left),
            ));
        }
        if runtime_raw < 0.0 {
            return Err(GuardError::malformed(
                host,
                runtime_oid,
                format!("negative runtime {}", runtime_raw),
            ));
        }

        let input_voltage = input_voltage as i64;

        Ok(UpsStats {
            input_voltage,
            // Input voltage drops to zero when the unit runs from battery
            is_discharging: input_voltage == 0,
            minutes_left: self.runtime_minutes(runtime_raw),
            pct_left,
        })
    }
}

fn numeric(host: &str, oid: &str, value: &SnmpValue) -> GuardResult<f64> {
    value
        .as_f64()
        .ok_or_else(|| GuardError::malformed(host, oid, format!("non-numeric value {:?}", value)))
}
