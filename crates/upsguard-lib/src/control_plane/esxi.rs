//! Standalone ESXi hosts
//!
//! A host without vCenter is powered off as a whole through `vicfg-hostops`
//! from the vSphere CLI. Its guests stop according to the host's own
//! autostart policy. The password is passed in `VI_PASSWORD`, never on the
//! command line.

use super::ControlPlaneEndpoint;
use crate::error::{GuardError, GuardResult};
use async_trait::async_trait;
use tokio::process::Command;

/// Powers off a whole virtualization host
#[async_trait]
pub trait HostShutdown: Send + Sync {
    /// Force the host down, or only query it in dry-run. Returns the tool output.
    async fn shutdown_host(&self, endpoint: &ControlPlaneEndpoint, dry_run: bool)
        -> GuardResult<String>;
}

/// Runs `vicfg-hostops --operation shutdown --force` (`--operation info` in dry-run)
#[derive(Debug, Clone)]
pub struct VicfgHostOps {
    program: String,
}

impl Default for VicfgHostOps {
    fn default() -> Self {
        Self {
            program: "vicfg-hostops".to_string(),
        }
    }
}

impl VicfgHostOps {
    /// Use a different `vicfg-hostops` binary
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn command(&self, endpoint: &ControlPlaneEndpoint, dry_run: bool) -> Command {
        let mut command = Command::new(&self.program);
        command
            .arg("--server")
            .arg(&endpoint.host)
            .arg("--username")
            .arg(&endpoint.username)
            .env("VI_PASSWORD", &endpoint.password);

        if dry_run {
            command.args(["--operation", "info"]);
        } else {
            command.args(["--operation", "shutdown", "--force"]);
        }
        command
    }
}

#[async_trait]
impl HostShutdown for VicfgHostOps {
    async fn shutdown_host(
        &self,
        endpoint: &ControlPlaneEndpoint,
        dry_run: bool,
    ) -> GuardResult<String> {
        let operation = if dry_run { "host_info" } else { "host_shutdown" };

        let output = self
            .command(endpoint, dry_run)
            .output()
            .await
            .map_err(|e| {
                GuardError::api(
                    &endpoint.host,
                    operation,
                    format!("failed to run {}: {}", self.program, e),
                )
            })?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        let text = text.trim().to_string();

        if !output.status.success() {
            return Err(GuardError::api(
                &endpoint.host,
                operation,
                format!("{} exited with {}: {}", self.program, output.status, text),
            ));
        }

        Ok(text)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::ffi::OsStr;
    use std::sync::Mutex;

    /// Records (host, dry_run) per call; fails when `fail` is set
    #[derive(Default)]
    pub(crate) struct FakeHostShutdown {
        pub fail: bool,
        pub calls: Mutex<Vec<(String, bool)>>,
    }

    #[async_trait]
    impl HostShutdown for FakeHostShutdown {
        async fn shutdown_host(
            &self,
            endpoint: &ControlPlaneEndpoint,
            dry_run: bool,
        ) -> GuardResult<String> {
            self.calls
                .lock()
                .unwrap()
                .push((endpoint.host.clone(), dry_run));
            if self.fail {
                return Err(GuardError::api(
                    &endpoint.host,
                    "host_shutdown",
                    "Connection refused",
                ));
            }
            Ok("Host esxi01.lab shutdown successfully".to_string())
        }
    }

    fn endpoint() -> ControlPlaneEndpoint {
        ControlPlaneEndpoint {
            host: "esxi01.lab".to_string(),
            username: "root".to_string(),
            password: "hunter2".to_string(),
        }
    }

    #[test]
    fn test_shutdown_command_line() {
        let command = VicfgHostOps::default().command(&endpoint(), false);
        let std_cmd = command.as_std();
        assert_eq!(std_cmd.get_program(), "vicfg-hostops");

        let args: Vec<_> = std_cmd.get_args().collect();
        assert_eq!(
            args,
            [
                "--server",
                "esxi01.lab",
                "--username",
                "root",
                "--operation",
                "shutdown",
                "--force"
            ]
        );
        assert!(!args.iter().any(|arg| *arg == "hunter2"));

        let password = std_cmd
            .get_envs()
            .find(|(key, _)| *key == OsStr::new("VI_PASSWORD"))
            .and_then(|(_, value)| value);
        assert_eq!(password, Some(OsStr::new("hunter2")));
    }

    #[test]
    fn test_dry_run_only_queries_host() {
        let command = VicfgHostOps::default().command(&endpoint(), true);
        let args: Vec<_> = command.as_std().get_args().collect();
        assert_eq!(&args[4..], ["--operation", "info"]);
    }

    #[tokio::test]
    async fn test_exit_status() {
        let ok = VicfgHostOps::default().with_program("true");
        assert!(ok.shutdown_host(&endpoint(), false).await.is_ok());

        let failing = VicfgHostOps::default().with_program("false");
        let err = failing.shutdown_host(&endpoint(), false).await.unwrap_err();
        assert!(matches!(
            err,
            GuardError::ControlPlaneApi { ref operation, .. } if operation == "host_shutdown"
        ));

        let missing = VicfgHostOps::default().with_program("/nonexistent/vicfg-hostops");
        assert!(missing.shutdown_host(&endpoint(), true).await.is_err());
    }
}
