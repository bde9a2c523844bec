//! One-off UPS reads with the decision the daemon would make

use crate::output::{self, OutputFormat};
use anyhow::{bail, Result};
use serde::Serialize;
use tabled::Tabled;
use upsguard_lib::decision::{decide, Verdict};
use upsguard_lib::state::StateStore;
use upsguard_lib::telemetry::{SnmpTelemetryReader, TelemetryReader};
use upsguard_lib::{DeploymentConfig, GuardConfig, ShutdownRecord, UpsStats};

#[derive(Tabled, Serialize)]
struct UpsRow {
    #[tabled(rename = "Deployment")]
    deployment: String,
    #[tabled(rename = "UPS")]
    ups: String,
    #[tabled(rename = "On battery")]
    on_battery: String,
    #[tabled(rename = "Battery")]
    battery: String,
    #[tabled(rename = "Runtime")]
    runtime: String,
    #[tabled(rename = "Decision")]
    decision: String,
}

fn describe(verdict: &Verdict) -> String {
    match verdict {
        Verdict::Initiate => "initiate".to_string(),
        Verdict::Defer(reason) => format!("deferred: {}", reason),
    }
}

fn row(name: &str, deployment: &DeploymentConfig, result: &Result<(UpsStats, Verdict)>) -> UpsRow {
    let ups = format!("{} ({})", deployment.ups_host, deployment.ups_type);
    match result {
        Ok((stats, verdict)) => UpsRow {
            deployment: name.to_string(),
            ups,
            on_battery: if stats.is_discharging { "yes" } else { "no" }.to_string(),
            battery: output::color_battery(stats.pct_left, deployment.threshold_pct()),
            runtime: format!("{:.1} min", stats.minutes_left),
            decision: describe(verdict),
        },
        Err(e) => UpsRow {
            deployment: name.to_string(),
            ups,
            on_battery: "-".to_string(),
            battery: "-".to_string(),
            runtime: "-".to_string(),
            decision: output::color_status("error") + &format!(": {:#}", e),
        },
    }
}

pub async fn run(config: &GuardConfig, only: Option<&str>, format: OutputFormat) -> Result<()> {
    if let Some(name) = only {
        if config.deployment(name).is_none() {
            bail!("unknown deployment '{}'", name);
        }
    }

    let state = StateStore::new(&config.general.state_file).load()?;
    let reader = SnmpTelemetryReader::with_network_transport();
    let now = chrono::Utc::now().timestamp();
    let empty = ShutdownRecord::default();

    let mut rows = Vec::new();
    let mut failures = 0;
    for (name, deployment) in &config.deployments {
        if only.is_some_and(|wanted| wanted != name.as_str()) {
            continue;
        }

        let record = state.get(name).unwrap_or(&empty);
        let result = reader
            .read_stats(deployment)
            .await
            .map(|stats| {
                let verdict = decide(&stats, record, deployment, now, false);
                (stats, verdict)
            })
            .map_err(anyhow::Error::from);
        if result.is_err() {
            failures += 1;
        }
        rows.push(row(name, deployment, &result));
    }

    match format {
        OutputFormat::Json => output::print_json(&rows)?,
        OutputFormat::Table => output::print_rows(rows, "No deployments configured"),
    }

    if failures > 0 {
        bail!("{} UPS read(s) failed", failures);
    }
    Ok(())
}
