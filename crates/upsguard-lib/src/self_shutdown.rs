//! Local shutdown of the host running the daemon
//!
//! When the daemon runs on a VM inside the deployment it just shut down, the
//! control plane can no longer stop that VM. The host is halted locally after
//! a short delay, leaving time to persist state and exit.

use crate::config::DeploymentConfig;
use crate::error::{GuardError, GuardResult};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{error, info};

/// Minutes between scheduling and the actual halt
pub const SELF_SHUTDOWN_DELAY_MINUTES: u32 = 1;

/// Schedules a delayed power-off of the local host
#[async_trait]
pub trait LocalShutdownTrigger: Send + Sync {
    async fn schedule_shutdown(&self, delay_minutes: u32) -> GuardResult<()>;
}

/// Runs `[sudo] shutdown -P +<minutes>`
#[derive(Debug, Clone)]
pub struct SystemShutdown {
    program: String,
    use_sudo: bool,
}

impl SystemShutdown {
    pub fn new(use_sudo: bool) -> Self {
        Self {
            program: "shutdown".to_string(),
            use_sudo,
        }
    }

    /// Use a different shutdown binary
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn command(&self, delay_minutes: u32) -> Command {
        let mut command = if self.use_sudo {
            let mut sudo = Command::new("sudo");
            sudo.arg("-n").arg(&self.program);
            sudo
        } else {
            Command::new(&self.program)
        };
        command.arg("-P").arg(format!("+{}", delay_minutes));
        command
    }
}

#[async_trait]
impl LocalShutdownTrigger for SystemShutdown {
    async fn schedule_shutdown(&self, delay_minutes: u32) -> GuardResult<()> {
        let output = self
            .command(delay_minutes)
            .output()
            .await
            .map_err(|e| GuardError::LocalShutdownFailed {
                message: format!("failed to run {}: {}", self.program, e),
            })?;

        if !output.status.success() {
            let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
            text.push_str(&String::from_utf8_lossy(&output.stderr));
            return Err(GuardError::LocalShutdownFailed {
                message: format!("{} exited with {}: {}", self.program, output.status, text.trim()),
            });
        }

        Ok(())
    }
}

/// Result of the self-shutdown step for one deployment
#[derive(Debug, Clone, PartialEq)]
pub enum SelfShutdownOutcome {
    /// No executing host configured, or orchestration did not succeed
    NotApplicable,
    Scheduled,
    /// Would have scheduled, but dry-run
    DryRun,
    Failed(String),
}

impl SelfShutdownOutcome {
    /// Definitive outcome that ends the run, if one was reached
    pub fn decided(&self) -> Option<bool> {
        match self {
            SelfShutdownOutcome::NotApplicable => None,
            SelfShutdownOutcome::Scheduled | SelfShutdownOutcome::DryRun => Some(true),
            SelfShutdownOutcome::Failed(_) => Some(false),
        }
    }
}

/// Halt the local host if it belongs to a deployment that was just shut down
pub async fn maybe_shutdown_self(
    trigger: &dyn LocalShutdownTrigger,
    deployment: &DeploymentConfig,
    orchestration_succeeded: bool,
    dry_run: bool,
) -> SelfShutdownOutcome {
    let Some(host_vm) = deployment.executing_host() else {
        return SelfShutdownOutcome::NotApplicable;
    };
    if !orchestration_succeeded {
        return SelfShutdownOutcome::NotApplicable;
    }

    info!(
        vm = host_vm,
        delay_minutes = SELF_SHUTDOWN_DELAY_MINUTES,
        dry_run = dry_run,
        "Shutting down this system via local command"
    );

    if dry_run {
        return SelfShutdownOutcome::DryRun;
    }

    match trigger.schedule_shutdown(SELF_SHUTDOWN_DELAY_MINUTES).await {
        Ok(()) => SelfShutdownOutcome::Scheduled,
        Err(e) => {
            error!(vm = host_vm, error = %e, "Local shutdown could not be scheduled");
            SelfShutdownOutcome::Failed(e.to_string())
        }
    }
}
