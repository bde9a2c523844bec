//! Core data models for UPS Guard

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Normalized UPS reading, produced fresh on every poll
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpsStats {
    /// Raw input-line voltage as reported by the unit
    pub input_voltage: i64,
    /// Derived from the vendor discharge signal (zero input voltage)
    pub is_discharging: bool,
    /// Estimated runtime remaining, in minutes
    pub minutes_left: f64,
    /// Battery capacity remaining, in [0, 100]
    pub pct_left: f64,
}

/// Power state tag reported by the control plane
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PowerState {
    PoweredOn,
    PoweredOff,
    Suspended,
    #[serde(other)]
    Unknown,
}

/// A VM as seen in the control plane inventory; never persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VmInventoryEntry {
    pub id: String,
    pub name: String,
    pub power_state: PowerState,
}

/// Outcome of the most recent shutdown attempt
///
/// Stored as `true` / `false` / `null` so state files written by earlier
/// tooling remain readable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Option<bool>", into = "Option<bool>")]
pub enum AttemptOutcome {
    #[default]
    NotAttempted,
    Succeeded,
    Failed,
}

impl From<Option<bool>> for AttemptOutcome {
    fn from(value: Option<bool>) -> Self {
        match value {
            None => AttemptOutcome::NotAttempted,
            Some(true) => AttemptOutcome::Succeeded,
            Some(false) => AttemptOutcome::Failed,
        }
    }
}

impl From<AttemptOutcome> for Option<bool> {
    fn from(value: AttemptOutcome) -> Self {
        match value {
            AttemptOutcome::NotAttempted => None,
            AttemptOutcome::Succeeded => Some(true),
            AttemptOutcome::Failed => Some(false),
        }
    }
}

impl AttemptOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            AttemptOutcome::NotAttempted => "not attempted",
            AttemptOutcome::Succeeded => "succeeded",
            AttemptOutcome::Failed => "failed",
        }
    }
}

/// Persisted shutdown history of one deployment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShutdownRecord {
    /// Append-only, strictly increasing epoch seconds
    #[serde(default)]
    pub shutdown_times: Vec<i64>,
    #[serde(default)]
    pub last_shutdown_result: AttemptOutcome,
}

impl ShutdownRecord {
    /// Timestamp of the most recent attempt, if any
    pub fn last_attempt(&self) -> Option<i64> {
        self.shutdown_times.last().copied()
    }

    /// Append an attempt timestamp, returning the value actually stored.
    ///
    /// The sequence stays strictly increasing: if the wall clock stepped
    /// backwards, the attempt is stored one second after the previous one.
    pub fn record_attempt(&mut self, now: i64) -> i64 {
        let stamp = match self.last_attempt() {
            Some(last) if now <= last => {
                tracing::warn!(
                    now = now,
                    last = last,
                    "Wall clock is not ahead of the last recorded attempt"
                );
                last + 1
            }
            _ => now,
        };
        self.shutdown_times.push(stamp);
        stamp
    }
}

/// Deployment name to shutdown record; sorted so serialization is stable
pub type StateMap = BTreeMap<String, ShutdownRecord>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_attempt_appends() {
        let mut record = ShutdownRecord::default();
        assert_eq!(record.last_attempt(), None);

        assert_eq!(record.record_attempt(1_000), 1_000);
        assert_eq!(record.record_attempt(2_000), 2_000);
        assert_eq!(record.shutdown_times, vec![1_000, 2_000]);
        assert_eq!(record.last_attempt(), Some(2_000));
    }

    #[test]
    fn test_record_attempt_stays_strictly_increasing() {
        let mut record = ShutdownRecord::default();
        record.record_attempt(5_000);

        // Clock stepped backwards
        assert_eq!(record.record_attempt(4_000), 5_001);
        // Same second
        assert_eq!(record.record_attempt(5_001), 5_002);
        assert!(record.shutdown_times.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_attempt_outcome_wire_format() {
        let record = ShutdownRecord {
            shutdown_times: vec![1],
            last_shutdown_result: AttemptOutcome::Succeeded,
        };
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json, r#"{"shutdown_times":[1],"last_shutdown_result":true}"#);

        let unset: ShutdownRecord =
            serde_json::from_str(r#"{"shutdown_times":[],"last_shutdown_result":null}"#).unwrap();
        assert_eq!(unset.last_shutdown_result, AttemptOutcome::NotAttempted);

        let failed: ShutdownRecord =
            serde_json::from_str(r#"{"shutdown_times":[7],"last_shutdown_result":false}"#).unwrap();
        assert_eq!(failed.last_shutdown_result, AttemptOutcome::Failed);
    }

    #[test]
    fn test_missing_fields_default() {
        let record: ShutdownRecord = serde_json::from_str("{}").unwrap();
        assert!(record.shutdown_times.is_empty());
        assert_eq!(record.last_shutdown_result, AttemptOutcome::NotAttempted);
    }

    #[test]
    fn test_power_state_parsing() {
        let vm: VmInventoryEntry = serde_json::from_str(
            r#"{"id":"vm-1","name":"web","power_state":"POWERED_ON"}"#,
        )
        .unwrap();
        assert_eq!(vm.power_state, PowerState::PoweredOn);

        let odd: PowerState = serde_json::from_str(r#""SOMETHING_NEW""#).unwrap();
        assert_eq!(odd, PowerState::Unknown);
    }
}
