//! Read-only preview of a deployment shutdown

use crate::output::{self, OutputFormat};
use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::sync::Arc;
use tabled::Tabled;
use upsguard_lib::control_plane::VcenterClient;
use upsguard_lib::orchestrator::{ControlPlaneMatch, ShutdownOrchestrator, ShutdownPlan};
use upsguard_lib::{DeploymentKind, GuardConfig, VmInventoryEntry};

#[derive(Tabled, Serialize)]
struct PlanRow {
    #[tabled(rename = "Step")]
    step: String,
    #[tabled(rename = "VM")]
    name: String,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Role")]
    role: String,
}

fn plan_row(step: &str, vm: &VmInventoryEntry, role: &str) -> PlanRow {
    PlanRow {
        step: step.to_string(),
        name: vm.name.clone(),
        id: vm.id.clone(),
        role: role.to_string(),
    }
}

fn rows(plan: &ShutdownPlan) -> Vec<PlanRow> {
    let mut rows: Vec<PlanRow> = plan
        .ordinary
        .iter()
        .map(|vm| plan_row("1", vm, "ordinary"))
        .collect();

    if let ControlPlaneMatch::Found { vm } = &plan.control_plane {
        rows.push(plan_row("2", vm, "control plane"));
    }

    rows.extend(
        plan.executing_host
            .iter()
            .map(|vm| plan_row("3", vm, "executing host")),
    );
    rows
}

pub async fn run(config: &GuardConfig, name: &str, format: OutputFormat) -> Result<()> {
    let deployment = config
        .deployment(name)
        .with_context(|| format!("unknown deployment '{}'", name))?;

    if deployment.kind != DeploymentKind::Vcenter {
        bail!(
            "deployment '{}' is a standalone ESXi host, which is shut down as a whole",
            name
        );
    }

    let client = VcenterClient::new(config.general.control_plane_accept_invalid_certs)?;
    let orchestrator = ShutdownOrchestrator::new(Arc::new(client));
    let (_session, plan) = orchestrator.plan(deployment).await?;

    match format {
        OutputFormat::Json => output::print_json(&plan)?,
        OutputFormat::Table => {
            output::print_info(&format!(
                "vCenter {} for deployment '{}'",
                deployment.vcenter_host, name
            ));
            output::print_rows(rows(&plan), "No powered-on VMs");

            match &plan.control_plane {
                ControlPlaneMatch::Found { .. } => {}
                ControlPlaneMatch::Missing => output::print_warning(&format!(
                    "Control plane VM '{}' is not powered on",
                    deployment.vcenter_vm_name
                )),
                ControlPlaneMatch::Ambiguous { vms } => output::print_warning(&format!(
                    "{} powered-on VMs are named '{}', shutdown would fail",
                    vms.len(),
                    deployment.vcenter_vm_name
                )),
            }
        }
    }

    Ok(())
}
