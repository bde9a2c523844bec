//! UPS guard daemon
//!
//! Polls the configured UPS units and, when one runs low on battery, shuts
//! down the vCenter deployment it protects. Exits non-zero if any shutdown or
//! self-shutdown failed, or on a fatal configuration or persistence error.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use upsguard::api::{self, AppState};
use upsguard::logging::{self, LogFormat};
use upsguard_lib::config::DEFAULT_CONFIG_PATH;
use upsguard_lib::control_plane::{VcenterClient, VicfgHostOps};
use upsguard_lib::orchestrator::WaitPolicy;
use upsguard_lib::self_shutdown::SystemShutdown;
use upsguard_lib::telemetry::SnmpTelemetryReader;
use upsguard_lib::{
    Engine, EngineDeps, EngineOptions, GuardConfig, GuardMetrics, HealthRegistry, RunMode,
};

#[derive(Debug, Parser)]
#[command(name = "upsguard", version, about = "UPS-driven shutdown of vCenter deployments")]
struct Args {
    /// Configuration file
    #[arg(short, long, env = "UPSGUARD_CONFIG_FILE", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Override general.state_file
    #[arg(long)]
    state_file: Option<PathBuf>,

    /// Verbose logging
    #[arg(long)]
    debug: bool,

    /// Evaluate and log everything, but never shut anything down or write state
    #[arg(long)]
    dry_run: bool,

    /// Run a single pass instead of looping
    #[arg(long)]
    once: bool,

    /// Serve /healthz, /readyz and /metrics on this port
    #[arg(long)]
    metrics_port: Option<u16>,

    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    logging::init(args.debug, args.log_format);

    match run(args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!(error = %format!("{:#}", e), "Fatal error");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<bool> {
    let mut config = GuardConfig::load(&args.config)
        .with_context(|| format!("failed to load configuration from {}", args.config.display()))?;

    if let Some(state_file) = args.state_file {
        config.general.state_file = state_file;
    }

    info!(
        config = %args.config.display(),
        state_file = %config.general.state_file.display(),
        deployments = config.deployments.len(),
        "Configuration loaded"
    );
    if args.dry_run {
        warn!("Dry run: decisions bypass the fence and mains-power checks, nothing is shut down");
    }

    let health = HealthRegistry::with_default_components().await;
    let metrics = GuardMetrics::new();

    if let Some(port) = args.metrics_port.or(config.general.metrics_port) {
        let state = Arc::new(AppState::new(health.clone(), metrics));
        tokio::spawn(async move {
            if let Err(e) = api::serve(port, state).await {
                error!(error = %e, "Health/metrics server stopped");
            }
        });
    }

    let control_plane = VcenterClient::new(config.general.control_plane_accept_invalid_certs)
        .context("failed to build control plane client")?;
    let deps = EngineDeps {
        telemetry: Arc::new(SnmpTelemetryReader::with_network_transport()),
        control_plane: Arc::new(control_plane),
        host_shutdown: Arc::new(VicfgHostOps::default()),
        local_shutdown: Arc::new(SystemShutdown::new(config.general.local_shutdown_use_sudo)),
    };
    let options = EngineOptions {
        dry_run: args.dry_run,
        mode: if args.once { RunMode::Once } else { RunMode::Daemon },
        wait: WaitPolicy::default(),
    };

    let mut engine =
        Engine::new(config, deps, options, health).context("failed to initialize engine")?;
    let outcome = engine.run().await?;

    info!(success = outcome.success, reason = ?outcome.reason, "Run finished");
    Ok(outcome.success)
}
