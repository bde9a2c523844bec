//! Configuration checks

use crate::output::{self, OutputFormat};
use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;
use tabled::Tabled;
use upsguard_lib::{DeploymentKind, GuardConfig};

#[derive(Tabled, Serialize)]
struct DeploymentRow {
    #[tabled(rename = "Deployment")]
    name: String,
    #[tabled(rename = "UPS")]
    ups: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Shutdown target")]
    target: String,
    #[tabled(rename = "Control plane VM")]
    control_plane_vm: String,
    #[tabled(rename = "Executing host")]
    executing_host: String,
    #[tabled(rename = "Threshold")]
    threshold: String,
}

pub fn run(path: &Path, format: OutputFormat) -> Result<()> {
    let config = GuardConfig::load(path)
        .with_context(|| format!("{} is not a valid configuration", path.display()))?;

    let rows: Vec<DeploymentRow> = config
        .deployments
        .iter()
        .map(|(name, d)| DeploymentRow {
            name: name.clone(),
            ups: format!("{} ({}, {})", d.ups_host, d.ups_type, d.ups_snmp_version),
            kind: d.kind.to_string(),
            target: d.shutdown_target().to_string(),
            control_plane_vm: match d.kind {
                DeploymentKind::Vcenter => d.vcenter_vm_name.clone(),
                DeploymentKind::Esxi => "-".to_string(),
            },
            executing_host: d.executing_host().unwrap_or("-").to_string(),
            threshold: output::format_pct(d.threshold_pct()),
        })
        .collect();

    match format {
        OutputFormat::Json => output::print_json(&rows)?,
        OutputFormat::Table => {
            output::print_success(&format!(
                "{} is valid, check period {}s, state file {}",
                path.display(),
                config.general.check_period,
                config.general.state_file.display()
            ));
            output::print_rows(rows, "No deployments configured");
        }
    }

    Ok(())
}
