//! Metrics and structured lifecycle events
//!
//! Provides:
//! - Prometheus metrics per deployment (battery, runtime, shutdown attempts)
//! - An event logger emitting `tracing` records with a stable `event` field

use crate::decision::Verdict;
use crate::models::UpsStats;
use crate::orchestrator::{OrchestrationError, ShutdownReport};
use crate::self_shutdown::SelfShutdownOutcome;
use prometheus::{
    register_gauge_vec, register_histogram, register_int_counter_vec, register_int_gauge,
    register_int_gauge_vec, GaugeVec, Histogram, IntCounterVec, IntGauge, IntGaugeVec,
};
use std::path::Path;
use std::sync::OnceLock;
use tracing::{error, info, warn};

/// Pass duration buckets in seconds; a pass with a shutdown waits minutes
const PASS_DURATION_BUCKETS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 180.0];

static GLOBAL_METRICS: OnceLock<GuardMetricsInner> = OnceLock::new();

struct GuardMetricsInner {
    battery_pct: GaugeVec,
    runtime_minutes: GaugeVec,
    on_battery: IntGaugeVec,
    telemetry_errors: IntCounterVec,
    shutdown_attempts: IntCounterVec,
    shutdown_failures: IntCounterVec,
    pass_duration_seconds: Histogram,
    last_pass_timestamp: IntGauge,
}

impl GuardMetricsInner {
    fn new() -> Self {
        Self {
            battery_pct: register_gauge_vec!(
                "upsguard_battery_pct",
                "Battery capacity remaining as last reported by the UPS",
                &["deployment"]
            )
            .expect("Failed to register battery_pct"),

            runtime_minutes: register_gauge_vec!(
                "upsguard_runtime_minutes",
                "Estimated runtime remaining as last reported by the UPS",
                &["deployment"]
            )
            .expect("Failed to register runtime_minutes"),

            on_battery: register_int_gauge_vec!(
                "upsguard_on_battery",
                "1 while the UPS is discharging",
                &["deployment"]
            )
            .expect("Failed to register on_battery"),

            telemetry_errors: register_int_counter_vec!(
                "upsguard_telemetry_errors_total",
                "UPS reads that failed or returned malformed data",
                &["deployment"]
            )
            .expect("Failed to register telemetry_errors"),

            shutdown_attempts: register_int_counter_vec!(
                "upsguard_shutdown_attempts_total",
                "Deployment shutdowns initiated",
                &["deployment"]
            )
            .expect("Failed to register shutdown_attempts"),

            shutdown_failures: register_int_counter_vec!(
                "upsguard_shutdown_failures_total",
                "Deployment shutdowns that did not complete",
                &["deployment"]
            )
            .expect("Failed to register shutdown_failures"),

            pass_duration_seconds: register_histogram!(
                "upsguard_pass_duration_seconds",
                "Time spent evaluating all deployments once",
                PASS_DURATION_BUCKETS.to_vec()
            )
            .expect("Failed to register pass_duration_seconds"),

            last_pass_timestamp: register_int_gauge!(
                "upsguard_last_pass_timestamp_seconds",
                "Unix time of the last completed evaluation pass"
            )
            .expect("Failed to register last_pass_timestamp"),
        }
    }
}

/// Handle to the process-wide metrics; clones share the same series
#[derive(Clone)]
pub struct GuardMetrics {
    inner: &'static GuardMetricsInner,
}

impl Default for GuardMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl GuardMetrics {
    pub fn new() -> Self {
        Self {
            inner: GLOBAL_METRICS.get_or_init(GuardMetricsInner::new),
        }
    }

    pub fn observe_stats(&self, deployment: &str, stats: &UpsStats) {
        let labels = &[deployment];
        self.inner.battery_pct.with_label_values(labels).set(stats.pct_left);
        self.inner
            .runtime_minutes
            .with_label_values(labels)
            .set(stats.minutes_left);
        self.inner
            .on_battery
            .with_label_values(labels)
            .set(i64::from(stats.is_discharging));
    }

    pub fn inc_telemetry_errors(&self, deployment: &str) {
        self.inner
            .telemetry_errors
            .with_label_values(&[deployment])
            .inc();
    }

    pub fn inc_shutdown_attempts(&self, deployment: &str) {
        self.inner
            .shutdown_attempts
            .with_label_values(&[deployment])
            .inc();
    }

    pub fn inc_shutdown_failures(&self, deployment: &str) {
        self.inner
            .shutdown_failures
            .with_label_values(&[deployment])
            .inc();
    }

    pub fn observe_pass(&self, duration_secs: f64, finished_at: i64) {
        self.inner.pass_duration_seconds.observe(duration_secs);
        self.inner.last_pass_timestamp.set(finished_at);
    }
}

/// Emits the daemon's significant lifecycle events
#[derive(Clone, Default)]
pub struct EventLogger {
    dry_run: bool,
}

impl EventLogger {
    pub fn new(dry_run: bool) -> Self {
        Self { dry_run }
    }

    pub fn log_startup(&self, version: &str, deployments: usize, mode: &str) {
        info!(
            event = "daemon_started",
            version = %version,
            deployments = deployments,
            mode = %mode,
            dry_run = self.dry_run,
            "UPS guard started"
        );
    }

    pub fn log_stats(&self, deployment: &str, stats: &UpsStats, threshold_pct: f64) {
        info!(
            event = "ups_stats",
            deployment = %deployment,
            pct_left = stats.pct_left,
            threshold_pct = threshold_pct,
            minutes_left = stats.minutes_left,
            input_voltage = stats.input_voltage,
            is_discharging = stats.is_discharging,
            "UPS reading"
        );
    }

    pub fn log_telemetry_error(&self, deployment: &str, error: &dyn std::error::Error) {
        warn!(
            event = "telemetry_failed",
            deployment = %deployment,
            error = %error,
            "Skipping deployment this cycle"
        );
    }

    pub fn log_verdict(&self, deployment: &str, verdict: &Verdict) {
        match verdict {
            Verdict::Defer(reason) => info!(
                event = "shutdown_deferred",
                deployment = %deployment,
                reason = %reason,
                "Not making shutdown request"
            ),
            Verdict::Initiate => info!(
                event = "shutdown_due",
                deployment = %deployment,
                dry_run = self.dry_run,
                "Shutdown conditions met"
            ),
        }
    }

    pub fn log_shutdown_initiated(&self, deployment: &str, stats: &UpsStats, threshold_pct: f64) {
        warn!(
            event = "shutdown_initiated",
            deployment = %deployment,
            pct_left = stats.pct_left,
            threshold_pct = threshold_pct,
            dry_run = self.dry_run,
            "SHUTDOWN {}INITIATED",
            if self.dry_run { "DRY RUN " } else { "" }
        );
    }

    pub fn log_orchestration(
        &self,
        deployment: &str,
        result: &Result<ShutdownReport, OrchestrationError>,
    ) {
        match result {
            Ok(report) => info!(
                event = "orchestration_succeeded",
                deployment = %deployment,
                ordinary_requested = report.ordinary_requested.len(),
                ordinary_failed = report.ordinary_failed.len(),
                control_plane_vm = %report.control_plane_vm,
                checks_used = report.checks_used,
                dry_run = report.dry_run,
                "Deployment shutdown sequence completed"
            ),
            Err(e) => error!(
                event = "orchestration_failed",
                deployment = %deployment,
                error = %e,
                dry_run = self.dry_run,
                "Deployment shutdown sequence failed"
            ),
        }
    }

    pub fn log_self_shutdown(&self, deployment: &str, outcome: &SelfShutdownOutcome) {
        match outcome {
            SelfShutdownOutcome::NotApplicable => {}
            SelfShutdownOutcome::Scheduled | SelfShutdownOutcome::DryRun => info!(
                event = "self_shutdown_scheduled",
                deployment = %deployment,
                dry_run = self.dry_run,
                "Local host shutdown scheduled"
            ),
            SelfShutdownOutcome::Failed(message) => error!(
                event = "self_shutdown_failed",
                deployment = %deployment,
                error = %message,
                "Local host shutdown failed"
            ),
        }
    }

    pub fn log_state_persisted(&self, path: &Path, deployments: usize) {
        info!(
            event = "state_persisted",
            path = %path.display(),
            deployments = deployments,
            "Shutdown history saved"
        );
    }

    pub fn log_exit(&self, success: bool, reason: &str) {
        if success {
            info!(event = "daemon_exiting", success = success, reason = %reason, "UPS guard exiting");
        } else {
            error!(event = "daemon_exiting", success = success, reason = %reason, "UPS guard exiting");
        }
    }
}
