//! Poll loop driver
//!
//! Evaluates every configured deployment once per pass, in name order. The
//! shutdown history is loaded once at startup and kept as an in-memory
//! working copy. It is written back after every record mutation and again at
//! the end of each pass. Any write failure aborts the run.

use crate::config::{DeploymentConfig, DeploymentKind, GuardConfig};
use crate::control_plane::{ControlPlane, ControlPlaneEndpoint, HostShutdown};
use crate::decision::{decide, DeferReason, Verdict};
use crate::error::GuardResult;
use crate::health::{components, HealthRegistry};
use crate::models::{AttemptOutcome, StateMap};
use crate::observability::{EventLogger, GuardMetrics};
use crate::orchestrator::{OrchestrationError, ShutdownOrchestrator, ShutdownReport, WaitPolicy};
use crate::self_shutdown::{maybe_shutdown_self, LocalShutdownTrigger, SelfShutdownOutcome};
use crate::state::StateStore;
use crate::telemetry::TelemetryReader;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Remote and local collaborators the engine drives
#[derive(Clone)]
pub struct EngineDeps {
    pub telemetry: Arc<dyn TelemetryReader>,
    pub control_plane: Arc<dyn ControlPlane>,
    /// Powers off standalone ESXi deployments
    pub host_shutdown: Arc<dyn HostShutdown>,
    pub local_shutdown: Arc<dyn LocalShutdownTrigger>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Loop every `check_period` seconds
    Daemon,
    /// Evaluate once and exit
    Once,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Daemon => "daemon",
            RunMode::Once => "once",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    pub dry_run: bool,
    pub mode: RunMode,
    pub wait: WaitPolicy,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            mode: RunMode::Daemon,
            wait: WaitPolicy::default(),
        }
    }
}

/// What happened to one deployment during a pass
#[derive(Debug, Clone, PartialEq)]
pub enum DeploymentOutcome {
    /// Telemetry could not be read; retried next pass
    TelemetryUnavailable(String),
    Deferred(DeferReason),
    Attempted(AttemptSummary),
}

impl DeploymentOutcome {
    pub fn failed(&self) -> bool {
        matches!(self, DeploymentOutcome::Attempted(attempt) if !attempt.succeeded())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttemptSummary {
    pub report: Option<ShutdownReport>,
    pub orchestration_error: Option<String>,
    pub self_shutdown: SelfShutdownOutcome,
}

impl AttemptSummary {
    /// Remote sequence finished and the local step, if any, did not fail
    pub fn succeeded(&self) -> bool {
        self.orchestration_error.is_none() && self.self_shutdown.decided() != Some(false)
    }
}

/// Result of evaluating all deployments once
#[derive(Debug, Clone, Default)]
pub struct PassSummary {
    pub outcomes: BTreeMap<String, DeploymentOutcome>,
    /// Set when any deployment reached a self-shutdown decision
    pub self_shutdown: Option<bool>,
}

impl PassSummary {
    pub fn any_failure(&self) -> bool {
        self.outcomes.values().any(DeploymentOutcome::failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    SelfShutdown,
    SinglePass,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOutcome {
    pub success: bool,
    pub reason: StopReason,
}

pub struct Engine {
    config: GuardConfig,
    telemetry: Arc<dyn TelemetryReader>,
    orchestrator: ShutdownOrchestrator,
    host_shutdown: Arc<dyn HostShutdown>,
    local_shutdown: Arc<dyn LocalShutdownTrigger>,
    store: StateStore,
    state: StateMap,
    options: EngineOptions,
    metrics: GuardMetrics,
    health: HealthRegistry,
    events: EventLogger,
}

impl Engine {
    /// Build an engine and load the persisted shutdown history
    pub fn new(
        config: GuardConfig,
        deps: EngineDeps,
        options: EngineOptions,
        health: HealthRegistry,
    ) -> GuardResult<Self> {
        let store = StateStore::new(config.general.state_file.clone());
        let state = store.load()?;

        Ok(Self {
            config,
            telemetry: deps.telemetry,
            orchestrator: ShutdownOrchestrator::new(deps.control_plane).with_wait_policy(options.wait),
            host_shutdown: deps.host_shutdown,
            local_shutdown: deps.local_shutdown,
            store,
            state,
            options,
            metrics: GuardMetrics::new(),
            health,
            events: EventLogger::new(options.dry_run),
        })
    }

    pub fn state(&self) -> &StateMap {
        &self.state
    }

    /// Run passes until a terminal outcome
    pub async fn run(&mut self) -> GuardResult<RunOutcome> {
        self.events.log_startup(
            env!("CARGO_PKG_VERSION"),
            self.config.deployments.len(),
            self.options.mode.as_str(),
        );

        let check_period = Duration::from_secs(self.config.general.check_period);
        let mut any_failure = false;

        loop {
            let started = Instant::now();
            let now = chrono::Utc::now().timestamp();

            let summary = match self.run_pass(now).await {
                Ok(summary) => summary,
                Err(e) => {
                    self.health.record_error(&e).await;
                    self.events.log_exit(false, &e.to_string());
                    return Err(e);
                }
            };

            self.metrics
                .observe_pass(started.elapsed().as_secs_f64(), chrono::Utc::now().timestamp());
            self.health.set_ready(true).await;
            any_failure |= summary.any_failure();

            if let Some(decision) = summary.self_shutdown {
                let success = decision && !any_failure;
                self.events.log_exit(success, "self-shutdown decision reached");
                return Ok(RunOutcome {
                    success,
                    reason: StopReason::SelfShutdown,
                });
            }

            if self.options.mode == RunMode::Once {
                self.events.log_exit(!any_failure, "single pass completed");
                return Ok(RunOutcome {
                    success: !any_failure,
                    reason: StopReason::SinglePass,
                });
            }

            info!(
                check_period_secs = check_period.as_secs(),
                "Waiting until checking again"
            );
            tokio::time::sleep(check_period).await;
        }
    }

    /// Evaluate every deployment once at `now`
    ///
    /// Only persistence failures are returned as errors; every per-deployment
    /// failure is captured in the summary.
    pub async fn run_pass(&mut self, now: i64) -> GuardResult<PassSummary> {
        let mut summary = PassSummary::default();
        let deployments: Vec<(String, DeploymentConfig)> = self
            .config
            .deployments
            .iter()
            .map(|(name, deployment)| (name.clone(), deployment.clone()))
            .collect();

        for (name, deployment) in deployments {
            info!(deployment = %name, "Processing deployment");
            let outcome = self.evaluate(&name, &deployment, now).await?;

            if let DeploymentOutcome::Attempted(attempt) = &outcome {
                if let Some(decision) = attempt.self_shutdown.decided() {
                    summary.self_shutdown = Some(summary.self_shutdown.unwrap_or(true) && decision);
                }
            }
            summary.outcomes.insert(name, outcome);
        }

        if !self.options.dry_run {
            self.persist().await?;
            self.events
                .log_state_persisted(self.store.path(), self.state.len());
        }

        Ok(summary)
    }

    async fn evaluate(
        &mut self,
        name: &str,
        deployment: &DeploymentConfig,
        now: i64,
    ) -> GuardResult<DeploymentOutcome> {
        let dry_run = self.options.dry_run;
        if !dry_run {
            self.state.entry(name.to_string()).or_default();
        }

        let stats = match self.telemetry.read_stats(deployment).await {
            Ok(stats) => stats,
            Err(e) => {
                self.metrics.inc_telemetry_errors(name);
                self.health.record_error(&e).await;
                self.events.log_telemetry_error(name, &e);
                return Ok(DeploymentOutcome::TelemetryUnavailable(e.to_string()));
            }
        };
        self.health.set_healthy(components::TELEMETRY).await;
        self.metrics.observe_stats(name, &stats);
        self.events
            .log_stats(name, &stats, deployment.threshold_pct());

        let record = self.state.get(name).cloned().unwrap_or_default();
        let verdict = decide(&stats, &record, deployment, now, dry_run);
        self.events.log_verdict(name, &verdict);

        if let Verdict::Defer(reason) = verdict {
            return Ok(DeploymentOutcome::Deferred(reason));
        }

        self.events
            .log_shutdown_initiated(name, &stats, deployment.threshold_pct());
        self.metrics.inc_shutdown_attempts(name);

        // Fence is durable before the first remote call
        if !dry_run {
            let stamp = self
                .state
                .entry(name.to_string())
                .or_default()
                .record_attempt(now);
            debug!(deployment = %name, stamp = stamp, "Recorded shutdown attempt");
            self.persist().await?;
        }

        let result = self.shutdown_deployment(deployment, dry_run).await;
        self.events.log_orchestration(name, &result);
        match &result {
            Ok(_) => self.health.set_healthy(components::CONTROL_PLANE).await,
            Err(OrchestrationError::ControlPlane(e)) => self.health.record_error(e).await,
            Err(e) => {
                self.health
                    .set_degraded(components::CONTROL_PLANE, e.to_string())
                    .await
            }
        }

        let self_shutdown = maybe_shutdown_self(
            self.local_shutdown.as_ref(),
            deployment,
            result.is_ok(),
            dry_run,
        )
        .await;
        self.events.log_self_shutdown(name, &self_shutdown);
        if let SelfShutdownOutcome::Failed(message) = &self_shutdown {
            self.health
                .set_degraded(components::LOCAL_SHUTDOWN, message.clone())
                .await;
        }

        let (report, orchestration_error) = match result {
            Ok(report) => (Some(report), None),
            Err(e) => (None, Some(e.to_string())),
        };
        let attempt = AttemptSummary {
            report,
            orchestration_error,
            self_shutdown,
        };

        if !attempt.succeeded() {
            self.metrics.inc_shutdown_failures(name);
        }

        if !dry_run {
            let record = self.state.entry(name.to_string()).or_default();
            record.last_shutdown_result = if attempt.succeeded() {
                AttemptOutcome::Succeeded
            } else {
                AttemptOutcome::Failed
            };
            self.persist().await?;
        }

        Ok(DeploymentOutcome::Attempted(attempt))
    }

    async fn shutdown_deployment(
        &self,
        deployment: &DeploymentConfig,
        dry_run: bool,
    ) -> Result<ShutdownReport, OrchestrationError> {
        match deployment.kind {
            DeploymentKind::Vcenter => self.orchestrator.shutdown(deployment, dry_run).await,
            DeploymentKind::Esxi => {
                let endpoint = ControlPlaneEndpoint::from(deployment);
                info!(esxi_host = %endpoint.host, dry_run = dry_run, "Requesting ESXi host shutdown");
                let output = self.host_shutdown.shutdown_host(&endpoint, dry_run).await?;
                debug!(esxi_host = %endpoint.host, output = %output, "vicfg-hostops succeeded");

                Ok(ShutdownReport {
                    dry_run,
                    ..Default::default()
                })
            }
        }
    }

    async fn persist(&self) -> GuardResult<()> {
        match self.store.save(&self.state) {
            Ok(()) => {
                self.health.set_healthy(components::STATE_STORE).await;
                Ok(())
            }
            Err(e) => {
                self.health.record_error(&e).await;
                Err(e)
            }
        }
    }
}
