//! Shutdown decision rules
//!
//! A pure function of the latest UPS reading, the persisted record, the
//! deployment threshold, the current time and the dry-run flag. Rules are
//! checked in order and the first match wins:
//!
//! 1. an attempt within the last [`REPEAT_FENCE_PERIOD_SECS`] defers
//! 2. mains power defers
//! 3. battery above the threshold defers
//! 4. otherwise initiate
//!
//! Rules 1 and 2 are bypassed in dry-run. That makes dry-run an operator
//! self-test: it reports "would initiate" without a real power event, so it
//! does not mirror production decisions.

use crate::config::DeploymentConfig;
use crate::models::{ShutdownRecord, UpsStats};
use std::fmt;

/// Minimum seconds between two shutdown attempts for one deployment
pub const REPEAT_FENCE_PERIOD_SECS: i64 = 3600;

/// Why a shutdown was not initiated this cycle
#[derive(Debug, Clone, PartialEq)]
pub enum DeferReason {
    /// An attempt was recorded inside the fence period
    RecentAttempt { seconds_ago: i64 },
    /// The UPS is not discharging
    OnMainsPower,
    /// Battery is discharging but still above the configured threshold
    AboveThreshold { pct_left: f64, threshold_pct: f64 },
}

impl fmt::Display for DeferReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeferReason::RecentAttempt { seconds_ago } => write!(
                f,
                "recent shutdown already attempted ({}s ago)",
                seconds_ago
            ),
            DeferReason::OnMainsPower => write!(f, "on mains power"),
            DeferReason::AboveThreshold {
                pct_left,
                threshold_pct,
            } => write!(
                f,
                "battery level still above threshold ({}% > {}%)",
                pct_left, threshold_pct
            ),
        }
    }
}

/// Result of evaluating one deployment
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Defer(DeferReason),
    Initiate,
}

impl Verdict {
    pub fn is_initiate(&self) -> bool {
        matches!(self, Verdict::Initiate)
    }
}

/// Decide whether to start a shutdown now
pub fn decide(
    stats: &UpsStats,
    record: &ShutdownRecord,
    deployment: &DeploymentConfig,
    now: i64,
    dry_run: bool,
) -> Verdict {
    if !dry_run {
        if let Some(last) = record.last_attempt() {
            let seconds_ago = now - last;
            // A negative age (clock stepped back) also stays fenced
            if seconds_ago < REPEAT_FENCE_PERIOD_SECS {
                return Verdict::Defer(DeferReason::RecentAttempt { seconds_ago });
            }
        }
    }

    if !dry_run && !stats.is_discharging {
        return Verdict::Defer(DeferReason::OnMainsPower);
    }

    let threshold_pct = deployment.threshold_pct();
    if stats.pct_left > threshold_pct {
        return Verdict::Defer(DeferReason::AboveThreshold {
            pct_left: stats.pct_left,
            threshold_pct,
        });
    }

    Verdict::Initiate
}

/// Seconds until the fence lifts, if one is active at `now`
pub fn fence_remaining(record: &ShutdownRecord, now: i64) -> Option<i64> {
    let last = record.last_attempt()?;
    let remaining = REPEAT_FENCE_PERIOD_SECS - (now - last);
    (remaining > 0).then_some(remaining)
}
