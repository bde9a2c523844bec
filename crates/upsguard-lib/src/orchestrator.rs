//! Shutdown sequencing for one deployment
//!
//! Ordinary VMs go first, the control-plane VM last. The executing-host VM is
//! never shut down remotely: once the control plane is gone, only a local
//! shutdown can stop it. The control-plane VM is left running whenever member
//! VMs are still confirmed powered on after the wait budget.

use crate::config::DeploymentConfig;
use crate::control_plane::{ControlPlane, ControlPlaneEndpoint, SessionToken};
use crate::error::GuardError;
use crate::models::VmInventoryEntry;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

/// Why a shutdown sequence did not complete
#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error(transparent)]
    ControlPlane(#[from] GuardError),

    #[error("control plane VM '{name}' not found among powered-on VMs")]
    ControlPlaneVmNotFound { name: String },

    #[error("{count} powered-on VMs are named '{name}', refusing to pick one")]
    AmbiguousControlPlaneVm { name: String, count: usize },

    #[error("VMs still powered on after {checks} checks: {}", remaining.join(", "))]
    TimeoutWaitingForVms { checks: u32, remaining: Vec<String> },
}

/// Bounded wait-and-recheck budget after ordinary VM shutdown
#[derive(Debug, Clone, Copy)]
pub struct WaitPolicy {
    pub max_checks: u32,
    pub interval: Duration,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            max_checks: 10,
            interval: Duration::from_secs(15),
        }
    }
}

/// How the configured control-plane VM name resolved against the inventory
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ControlPlaneMatch {
    Found { vm: VmInventoryEntry },
    Missing,
    Ambiguous { vms: Vec<VmInventoryEntry> },
}

/// Powered-on inventory classified by role
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShutdownPlan {
    /// Shut down first, in any order
    pub ordinary: Vec<VmInventoryEntry>,
    /// Shut down last
    pub control_plane: ControlPlaneMatch,
    /// Left for the local self-shutdown
    pub executing_host: Vec<VmInventoryEntry>,
}

impl ShutdownPlan {
    pub fn partition(vms: Vec<VmInventoryEntry>, deployment: &DeploymentConfig) -> Self {
        let control_name = deployment.vcenter_vm_name.as_str();
        let executing_name = deployment.executing_host();

        let mut ordinary = Vec::new();
        let mut control = Vec::new();
        let mut executing_host = Vec::new();

        for vm in vms {
            if vm.name == control_name {
                control.push(vm);
            } else if executing_name == Some(vm.name.as_str()) {
                executing_host.push(vm);
            } else {
                ordinary.push(vm);
            }
        }

        let control_plane = match control.len() {
            0 => ControlPlaneMatch::Missing,
            1 => ControlPlaneMatch::Found {
                vm: control.remove(0),
            },
            _ => ControlPlaneMatch::Ambiguous { vms: control },
        };

        Self {
            ordinary,
            control_plane,
            executing_host,
        }
    }

    /// The single control-plane VM, or why there is none
    pub fn control_plane_vm(&self, name: &str) -> Result<&VmInventoryEntry, OrchestrationError> {
        match &self.control_plane {
            ControlPlaneMatch::Found { vm } => Ok(vm),
            ControlPlaneMatch::Missing => Err(OrchestrationError::ControlPlaneVmNotFound {
                name: name.to_string(),
            }),
            ControlPlaneMatch::Ambiguous { vms } => Err(OrchestrationError::AmbiguousControlPlaneVm {
                name: name.to_string(),
                count: vms.len(),
            }),
        }
    }

    pub fn ordinary_names(&self) -> Vec<String> {
        self.ordinary.iter().map(|vm| vm.name.clone()).collect()
    }
}

/// What a completed sequence did
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ShutdownReport {
    /// Ordinary VMs whose shutdown request was accepted
    pub ordinary_requested: Vec<String>,
    /// Ordinary VMs whose shutdown request failed
    pub ordinary_failed: Vec<String>,
    pub control_plane_vm: String,
    /// Re-checks used before the ordinary set drained
    pub checks_used: u32,
    pub dry_run: bool,
}

/// Drives the control plane through one deployment's shutdown
pub struct ShutdownOrchestrator {
    control_plane: Arc<dyn ControlPlane>,
    wait: WaitPolicy,
}

impl ShutdownOrchestrator {
    pub fn new(control_plane: Arc<dyn ControlPlane>) -> Self {
        Self {
            control_plane,
            wait: WaitPolicy::default(),
        }
    }

    pub fn with_wait_policy(mut self, wait: WaitPolicy) -> Self {
        self.wait = wait;
        self
    }

    /// Open a session and classify the powered-on inventory
    pub async fn plan(
        &self,
        deployment: &DeploymentConfig,
    ) -> Result<(SessionToken, ShutdownPlan), OrchestrationError> {
        let endpoint = ControlPlaneEndpoint::from(deployment);
        let session = self.control_plane.create_session(&endpoint).await?;
        let vms = self.control_plane.list_powered_on_vms(&session).await?;

        info!(
            vcenter_host = %deployment.vcenter_host,
            powered_on = vms.len(),
            "Fetched powered-on inventory"
        );

        Ok((session, ShutdownPlan::partition(vms, deployment)))
    }

    /// Run the full sequence; in dry-run no VM power state is touched
    pub async fn shutdown(
        &self,
        deployment: &DeploymentConfig,
        dry_run: bool,
    ) -> Result<ShutdownReport, OrchestrationError> {
        let (session, plan) = self.plan(deployment).await?;
        let control_name = deployment.vcenter_vm_name.as_str();

        if !plan.executing_host.is_empty() {
            info!(
                vm = deployment.executing_host_vm_name.as_str(),
                "Executing host excluded from remote shutdown"
            );
        }

        let mut report = ShutdownReport {
            dry_run,
            ..Default::default()
        };

        if dry_run {
            for vm in &plan.ordinary {
                info!(vm = %vm.name, vm_id = %vm.id, "Would shut down VM (dry run)");
            }
            report.ordinary_requested = plan.ordinary_names();
            let control_vm = plan.control_plane_vm(control_name).map_err(|e| {
                error!(error = %e, "Control plane VM cannot be resolved");
                e
            })?;
            info!(vm = %control_vm.name, vm_id = %control_vm.id, "Would shut down control plane VM (dry run)");
            report.control_plane_vm = control_vm.name.clone();
            return Ok(report);
        }

        for vm in &plan.ordinary {
            info!(vm = %vm.name, vm_id = %vm.id, "Requesting guest shutdown");
            match self.control_plane.request_guest_shutdown(&session, &vm.id).await {
                Ok(()) => report.ordinary_requested.push(vm.name.clone()),
                Err(e) => {
                    warn!(vm = %vm.name, error = %e, "Guest shutdown request failed, continuing");
                    report.ordinary_failed.push(vm.name.clone());
                }
            }
        }

        if !plan.ordinary.is_empty() {
            report.checks_used = self.wait_for_ordinary(&session, deployment).await?;
        }

        let control_vm = plan.control_plane_vm(control_name).map_err(|e| {
            error!(error = %e, "Skipping control plane shutdown");
            e
        })?;

        info!(vm = %control_vm.name, vm_id = %control_vm.id, "Requesting control plane VM shutdown");
        self.control_plane
            .request_guest_shutdown(&session, &control_vm.id)
            .await?;
        report.control_plane_vm = control_vm.name.clone();

        Ok(report)
    }

    /// Re-fetch the powered-on set until no ordinary VM remains
    async fn wait_for_ordinary(
        &self,
        session: &SessionToken,
        deployment: &DeploymentConfig,
    ) -> Result<u32, OrchestrationError> {
        let mut remaining = Vec::new();

        for check in 1..=self.wait.max_checks {
            info!(
                check = check,
                max_checks = self.wait.max_checks,
                wait_secs = self.wait.interval.as_secs(),
                "Waiting before checking VM power state"
            );
            tokio::time::sleep(self.wait.interval).await;

            let vms = self.control_plane.list_powered_on_vms(session).await?;
            remaining = ShutdownPlan::partition(vms, deployment).ordinary_names();

            if remaining.is_empty() {
                info!(checks = check, "All ordinary VMs are powered off");
                return Ok(check);
            }
            info!(
                remaining = remaining.len(),
                vms = %remaining.join(","),
                "Still waiting on VMs to shut down"
            );
        }

        error!(
            vms = %remaining.join(","),
            "VMs did not shut down in the allowed time, leaving control plane running"
        );
        Err(OrchestrationError::TimeoutWaitingForVms {
            checks: self.wait.max_checks,
            remaining,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::tests::sample_deployment;
    use crate::error::GuardResult;
    use crate::models::PowerState;
    use async_trait::async_trait;
    use std::collections::{HashSet, VecDeque};
    use std::sync::Mutex;

    pub(crate) fn vm(id: &str, name: &str) -> VmInventoryEntry {
        VmInventoryEntry {
            id: id.to_string(),
            name: name.to_string(),
            power_state: PowerState::PoweredOn,
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    pub(crate) enum Call {
        Session,
        List,
        Shutdown(String),
    }

    /// In-memory control plane recording every call
    ///
    /// VMs whose shutdown is accepted disappear from the powered-on list
    /// unless listed in `stuck`.
    #[derive(Default)]
    pub(crate) struct FakeControlPlane {
        pub powered_on: Mutex<Vec<VmInventoryEntry>>,
        pub calls: Mutex<Vec<Call>>,
        pub stuck: HashSet<String>,
        pub failing: HashSet<String>,
        pub session_fails: bool,
        /// Inventory responses served before falling back to `powered_on`
        pub scripted_lists: Mutex<VecDeque<GuardResult<Vec<VmInventoryEntry>>>>,
    }

    impl FakeControlPlane {
        pub(crate) fn with_vms(vms: Vec<VmInventoryEntry>) -> Self {
            Self {
                powered_on: Mutex::new(vms),
                ..Default::default()
            }
        }

        pub(crate) fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        pub(crate) fn shutdown_ids(&self) -> Vec<String> {
            self.calls()
                .into_iter()
                .filter_map(|call| match call {
                    Call::Shutdown(id) => Some(id),
                    _ => None,
                })
                .collect()
        }
    }

    #[async_trait]
    impl ControlPlane for FakeControlPlane {
        async fn create_session(&self, endpoint: &ControlPlaneEndpoint) -> GuardResult<SessionToken> {
            self.calls.lock().unwrap().push(Call::Session);
            if self.session_fails {
                return Err(GuardError::ControlPlaneSession {
                    host: endpoint.host.clone(),
                    message: "connection refused".to_string(),
                });
            }
            Ok(SessionToken::new(endpoint.host.clone(), "fake-session"))
        }

        async fn list_powered_on_vms(&self, _session: &SessionToken) -> GuardResult<Vec<VmInventoryEntry>> {
            self.calls.lock().unwrap().push(Call::List);
            if let Some(scripted) = self.scripted_lists.lock().unwrap().pop_front() {
                return scripted;
            }
            Ok(self.powered_on.lock().unwrap().clone())
        }

        async fn request_guest_shutdown(&self, session: &SessionToken, vm_id: &str) -> GuardResult<()> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Shutdown(vm_id.to_string()));
            if self.failing.contains(vm_id) {
                return Err(GuardError::api(session.host(), "guest_shutdown", "503"));
            }
            if !self.stuck.contains(vm_id) {
                self.powered_on.lock().unwrap().retain(|vm| vm.id != vm_id);
            }
            Ok(())
        }
    }

    pub(crate) fn instant_wait() -> WaitPolicy {
        WaitPolicy {
            max_checks: 10,
            interval: Duration::ZERO,
        }
    }

    fn orchestrator(fake: &Arc<FakeControlPlane>) -> ShutdownOrchestrator {
        ShutdownOrchestrator::new(fake.clone()).with_wait_policy(instant_wait())
    }

    fn guarded_deployment() -> DeploymentConfig {
        let mut deployment = sample_deployment();
        deployment.executing_host_vm_name = "guard".to_string();
        deployment
    }

    #[test]
    fn test_partition() {
        let plan = ShutdownPlan::partition(
            vec![vm("vm-1", "web"), vm("vm-2", "vcsa"), vm("vm-3", "guard"), vm("vm-4", "db")],
            &guarded_deployment(),
        );

        assert_eq!(plan.ordinary_names(), vec!["web", "db"]);
        assert_eq!(
            plan.control_plane,
            ControlPlaneMatch::Found {
                vm: vm("vm-2", "vcsa")
            }
        );
        assert_eq!(plan.executing_host, vec![vm("vm-3", "guard")]);
    }

    #[test]
    fn test_partition_without_executing_host() {
        let plan = ShutdownPlan::partition(vec![vm("vm-1", "web"), vm("vm-3", "guard")], &sample_deployment());
        assert_eq!(plan.ordinary_names(), vec!["web", "guard"]);
        assert_eq!(plan.control_plane, ControlPlaneMatch::Missing);
        assert!(plan.executing_host.is_empty());
    }

    #[test]
    fn test_partition_ambiguous_control_plane() {
        let plan = ShutdownPlan::partition(
            vec![vm("vm-2", "vcsa"), vm("vm-9", "vcsa")],
            &sample_deployment(),
        );
        assert!(plan.ordinary.is_empty());
        assert!(matches!(
            plan.control_plane_vm("vcsa"),
            Err(OrchestrationError::AmbiguousControlPlaneVm { count: 2, .. })
        ));
    }

    #[test]
    fn test_partition_matches_names_exactly() {
        let plan = ShutdownPlan::partition(
            vec![vm("vm-1", "vcsa "), vm("vm-2", "VCSA"), vm("vm-3", "guard ")],
            &guarded_deployment(),
        );
        assert_eq!(plan.ordinary_names(), vec!["vcsa ", "VCSA", "guard "]);
        assert_eq!(plan.control_plane, ControlPlaneMatch::Missing);
        assert!(plan.executing_host.is_empty());
    }

    #[tokio::test]
    async fn test_ambiguous_control_plane_after_draining_ordinary() {
        let fake = Arc::new(FakeControlPlane::with_vms(vec![
            vm("vm-1", "web"),
            vm("vm-2", "vcsa"),
            vm("vm-5", "vcsa"),
            vm("vm-4", "db"),
        ]));

        let result = orchestrator(&fake).shutdown(&sample_deployment(), false).await;

        assert_eq!(fake.shutdown_ids(), vec!["vm-1", "vm-4"]);
        match result {
            Err(OrchestrationError::AmbiguousControlPlaneVm { name, count }) => {
                assert_eq!(name, "vcsa");
                assert_eq!(count, 2);
            }
            other => panic!("expected an ambiguous control plane VM, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_ordinary_first_then_control_plane() {
        let fake = Arc::new(FakeControlPlane::with_vms(vec![
            vm("vm-2", "vcsa"),
            vm("vm-1", "web"),
            vm("vm-3", "guard"),
            vm("vm-4", "db"),
        ]));

        let report = orchestrator(&fake)
            .shutdown(&guarded_deployment(), false)
            .await
            .unwrap();

        assert_eq!(fake.shutdown_ids(), vec!["vm-1", "vm-4", "vm-2"]);
        assert_eq!(report.ordinary_requested, vec!["web", "db"]);
        assert_eq!(report.control_plane_vm, "vcsa");
        assert_eq!(report.checks_used, 1);

        // Control plane call comes after the re-check that saw the set drained
        let calls = fake.calls();
        let last_list = calls.iter().rposition(|c| *c == Call::List).unwrap();
        assert_eq!(calls[last_list + 1], Call::Shutdown("vm-2".to_string()));
    }

    #[tokio::test]
    async fn test_timeout_never_touches_control_plane() {
        let mut fake = FakeControlPlane::with_vms(vec![vm("vm-1", "web"), vm("vm-2", "vcsa")]);
        fake.stuck.insert("vm-1".to_string());
        let fake = Arc::new(fake);

        let err = orchestrator(&fake)
            .shutdown(&sample_deployment(), false)
            .await
            .unwrap_err();

        match err {
            OrchestrationError::TimeoutWaitingForVms { checks, remaining } => {
                assert_eq!(checks, 10);
                assert_eq!(remaining, vec!["web"]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(fake.shutdown_ids(), vec!["vm-1"]);

        // session + initial list + 10 re-checks
        let lists = fake.calls().iter().filter(|c| **c == Call::List).count();
        assert_eq!(lists, 11);
    }

    #[tokio::test]
    async fn test_vms_drain_after_several_checks() {
        let fake = FakeControlPlane::with_vms(vec![vm("vm-1", "web"), vm("vm-2", "vcsa")]);
        {
            let mut scripted = fake.scripted_lists.lock().unwrap();
            // initial inventory, then two checks where web is still shutting down
            scripted.push_back(Ok(vec![vm("vm-1", "web"), vm("vm-2", "vcsa")]));
            scripted.push_back(Ok(vec![vm("vm-1", "web"), vm("vm-2", "vcsa")]));
            scripted.push_back(Ok(vec![vm("vm-1", "web"), vm("vm-2", "vcsa")]));
        }
        let fake = Arc::new(fake);

        let report = orchestrator(&fake)
            .shutdown(&sample_deployment(), false)
            .await
            .unwrap();

        assert_eq!(report.checks_used, 3);
        assert_eq!(fake.shutdown_ids(), vec!["vm-1", "vm-2"]);
    }

    #[tokio::test]
    async fn test_missing_control_plane_still_shuts_down_ordinary() {
        let fake = Arc::new(FakeControlPlane::with_vms(vec![vm("vm-1", "web"), vm("vm-4", "db")]));

        let err = orchestrator(&fake)
            .shutdown(&sample_deployment(), false)
            .await
            .unwrap_err();

        assert!(matches!(err, OrchestrationError::ControlPlaneVmNotFound { .. }));
        assert_eq!(fake.shutdown_ids(), vec!["vm-1", "vm-4"]);
    }

    #[tokio::test]
    async fn test_ordinary_failure_is_best_effort() {
        let mut fake = FakeControlPlane::with_vms(vec![
            vm("vm-1", "web"),
            vm("vm-4", "db"),
            vm("vm-2", "vcsa"),
        ]);
        fake.failing.insert("vm-1".to_string());
        {
            let mut scripted = fake.scripted_lists.lock().unwrap();
            scripted.push_back(Ok(vec![vm("vm-1", "web"), vm("vm-4", "db"), vm("vm-2", "vcsa")]));
            // The rejected VM went down on its own before the first check
            scripted.push_back(Ok(vec![vm("vm-2", "vcsa")]));
        }
        let fake = Arc::new(fake);

        let report = orchestrator(&fake)
            .shutdown(&sample_deployment(), false)
            .await
            .unwrap();

        assert_eq!(report.ordinary_failed, vec!["web"]);
        assert_eq!(report.ordinary_requested, vec!["db"]);
        assert_eq!(fake.shutdown_ids(), vec!["vm-1", "vm-4", "vm-2"]);
    }

    #[tokio::test]
    async fn test_no_ordinary_vms_skips_wait() {
        let fake = Arc::new(FakeControlPlane::with_vms(vec![vm("vm-2", "vcsa")]));

        let report = orchestrator(&fake)
            .shutdown(&sample_deployment(), false)
            .await
            .unwrap();

        assert_eq!(report.checks_used, 0);
        assert_eq!(fake.calls(), vec![Call::Session, Call::List, Call::Shutdown("vm-2".to_string())]);
    }

    #[tokio::test]
    async fn test_session_failure() {
        let fake = Arc::new(FakeControlPlane {
            session_fails: true,
            ..Default::default()
        });

        let err = orchestrator(&fake)
            .shutdown(&sample_deployment(), false)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            OrchestrationError::ControlPlane(GuardError::ControlPlaneSession { .. })
        ));
        assert_eq!(fake.calls(), vec![Call::Session]);
    }

    #[tokio::test]
    async fn test_control_plane_call_failure_is_failure() {
        let mut fake = FakeControlPlane::with_vms(vec![vm("vm-2", "vcsa")]);
        fake.failing.insert("vm-2".to_string());
        let fake = Arc::new(fake);

        let err = orchestrator(&fake)
            .shutdown(&sample_deployment(), false)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OrchestrationError::ControlPlane(GuardError::ControlPlaneApi { .. })
        ));
    }

    #[tokio::test]
    async fn test_dry_run_reads_but_never_mutates() {
        let fake = Arc::new(FakeControlPlane::with_vms(vec![
            vm("vm-1", "web"),
            vm("vm-2", "vcsa"),
        ]));

        let report = orchestrator(&fake)
            .shutdown(&sample_deployment(), true)
            .await
            .unwrap();

        assert!(report.dry_run);
        assert_eq!(report.ordinary_requested, vec!["web"]);
        assert_eq!(report.control_plane_vm, "vcsa");
        assert_eq!(fake.calls(), vec![Call::Session, Call::List]);
    }

    #[tokio::test]
    async fn test_dry_run_reports_missing_control_plane() {
        let fake = Arc::new(FakeControlPlane::with_vms(vec![vm("vm-1", "web")]));

        let err = orchestrator(&fake)
            .shutdown(&sample_deployment(), true)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::ControlPlaneVmNotFound { .. }));
        assert!(fake.shutdown_ids().is_empty());
    }
}
