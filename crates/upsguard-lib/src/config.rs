//! Configuration model and loader
//!
//! The configuration is a YAML file layered with `UPSGUARD_`-prefixed
//! environment variables (`__` separates nested keys), so credentials can be
//! injected without writing them to disk:
//!
//! ```text
//! UPSGUARD_DEPLOYMENTS__LAB__VCENTER_PASSWORD=secret
//! ```
//!
//! Validation runs before any telemetry or control plane traffic; every
//! failure here is fatal.

use crate::control_plane::base_url;
use crate::error::{GuardError, GuardResult};
use crate::telemetry::SnmpTarget;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "UPSGUARD";

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/upsguard/upsguard.yaml";

/// Default state file location
pub const DEFAULT_STATE_FILE: &str = "/var/lib/upsguard/upsguard.state";

/// Full daemon configuration
#[derive(Debug, Clone, Deserialize)]
pub struct GuardConfig {
    pub general: GeneralConfig,
    pub deployments: BTreeMap<String, DeploymentConfig>,
}

/// Process-wide settings
#[derive(Debug, Clone, Deserialize)]
pub struct GeneralConfig {
    /// Seconds between evaluation passes in daemon mode
    pub check_period: u64,

    /// Where shutdown history is persisted
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,

    /// Port for the health/metrics endpoint; disabled when absent
    #[serde(default)]
    pub metrics_port: Option<u16>,

    /// Prefix the local shutdown command with sudo
    #[serde(default = "default_true")]
    pub local_shutdown_use_sudo: bool,

    /// Accept self-signed control plane certificates
    #[serde(default = "default_true")]
    pub control_plane_accept_invalid_certs: bool,
}

fn default_state_file() -> PathBuf {
    PathBuf::from(DEFAULT_STATE_FILE)
}

fn default_true() -> bool {
    true
}

/// Supported UPS vendors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsType {
    Tripplite,
    Cyberpower,
}

impl fmt::Display for UpsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpsType::Tripplite => write!(f, "tripplite"),
            UpsType::Cyberpower => write!(f, "cyberpower"),
        }
    }
}

/// SNMP protocol version spoken to the UPS
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnmpVersion {
    #[default]
    V1,
    V2c,
}

impl fmt::Display for SnmpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnmpVersion::V1 => write!(f, "v1"),
            SnmpVersion::V2c => write!(f, "v2c"),
        }
    }
}

/// What a deployment shutdown drives
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentKind {
    /// VMs managed by a vCenter appliance, shut down one by one
    #[default]
    Vcenter,
    /// A standalone ESXi host, shut down as a whole
    Esxi,
}

impl fmt::Display for DeploymentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeploymentKind::Vcenter => write!(f, "vcenter"),
            DeploymentKind::Esxi => write!(f, "esxi"),
        }
    }
}

/// One UPS paired with the deployment it protects
#[derive(Clone, Deserialize)]
pub struct DeploymentConfig {
    #[serde(default)]
    pub kind: DeploymentKind,
    pub ups_type: UpsType,
    pub ups_host: String,
    pub ups_snmpv1_community: String,
    #[serde(default)]
    pub ups_snmp_version: SnmpVersion,
    #[serde(default)]
    pub vcenter_host: String,
    #[serde(default)]
    pub vcenter_username: String,
    #[serde(default)]
    pub vcenter_password: String,
    /// Name of the VM running vCenter itself; shut down last.
    /// Matched exactly against inventory names, whitespace included.
    #[serde(default)]
    pub vcenter_vm_name: String,
    #[serde(default)]
    pub esxi_host: String,
    #[serde(default)]
    pub esxi_username: String,
    #[serde(default)]
    pub esxi_password: String,
    /// Name of the VM this process runs on, if it lives inside the deployment.
    /// Matched exactly, like `vcenter_vm_name`.
    #[serde(default)]
    pub executing_host_vm_name: String,
    pub initiate_shutdown_at_batt_pct_remaining: f64,
}

impl DeploymentConfig {
    /// Threshold below which shutdown is initiated
    pub fn threshold_pct(&self) -> f64 {
        self.initiate_shutdown_at_batt_pct_remaining
    }

    /// Executing-host VM name, if configured
    pub fn executing_host(&self) -> Option<&str> {
        if self.executing_host_vm_name.is_empty() {
            None
        } else {
            Some(&self.executing_host_vm_name)
        }
    }

    /// Host the shutdown is sent to
    pub fn shutdown_target(&self) -> &str {
        match self.kind {
            DeploymentKind::Vcenter => &self.vcenter_host,
            DeploymentKind::Esxi => &self.esxi_host,
        }
    }

    fn validate(&self, name: &str) -> GuardResult<()> {
        let mut required = vec![
            ("ups_host", &self.ups_host),
            ("ups_snmpv1_community", &self.ups_snmpv1_community),
        ];
        match self.kind {
            DeploymentKind::Vcenter => required.extend([
                ("vcenter_host", &self.vcenter_host),
                ("vcenter_username", &self.vcenter_username),
                ("vcenter_password", &self.vcenter_password),
                ("vcenter_vm_name", &self.vcenter_vm_name),
            ]),
            DeploymentKind::Esxi => required.extend([
                ("esxi_host", &self.esxi_host),
                ("esxi_username", &self.esxi_username),
                ("esxi_password", &self.esxi_password),
            ]),
        }
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(GuardError::config(format!(
                    "deployment '{}': missing or empty property '{}'",
                    name, field
                )));
            }
        }

        let threshold = self.initiate_shutdown_at_batt_pct_remaining;
        if !(threshold > 0.0 && threshold <= 100.0) {
            return Err(GuardError::config(format!(
                "deployment '{}': initiate_shutdown_at_batt_pct_remaining must be in (0, 100], got {}",
                name, threshold
            )));
        }

        SnmpTarget::parse(&self.ups_host, &self.ups_snmpv1_community).map_err(|e| match e {
            GuardError::Config { message } => {
                GuardError::config(format!("deployment '{}': {}", name, message))
            }
            other => other,
        })?;

        base_url(self.shutdown_target())
            .map_err(|message| GuardError::config(format!("deployment '{}': {}", name, message)))?;

        for (field, value) in [
            ("vcenter_vm_name", &self.vcenter_vm_name),
            ("executing_host_vm_name", &self.executing_host_vm_name),
        ] {
            if value.trim() != value.as_str() {
                return Err(GuardError::config(format!(
                    "deployment '{}': {} must not start or end with whitespace",
                    name, field
                )));
            }
        }

        if self.kind == DeploymentKind::Vcenter
            && self.executing_host() == Some(self.vcenter_vm_name.as_str())
        {
            return Err(GuardError::config(format!(
                "deployment '{}': executing_host_vm_name must differ from vcenter_vm_name",
                name
            )));
        }

        Ok(())
    }
}

// Credentials stay out of debug logs
impl fmt::Debug for DeploymentConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeploymentConfig")
            .field("kind", &self.kind)
            .field("ups_type", &self.ups_type)
            .field("ups_host", &self.ups_host)
            .field("ups_snmpv1_community", &"<redacted>")
            .field("ups_snmp_version", &self.ups_snmp_version)
            .field("vcenter_host", &self.vcenter_host)
            .field("vcenter_username", &self.vcenter_username)
            .field("vcenter_password", &"<redacted>")
            .field("vcenter_vm_name", &self.vcenter_vm_name)
            .field("esxi_host", &self.esxi_host)
            .field("esxi_username", &self.esxi_username)
            .field("esxi_password", &"<redacted>")
            .field("executing_host_vm_name", &self.executing_host_vm_name)
            .field(
                "initiate_shutdown_at_batt_pct_remaining",
                &self.initiate_shutdown_at_batt_pct_remaining,
            )
            .finish()
    }
}

impl GuardConfig {
    /// Load configuration from a YAML file plus environment overrides
    pub fn load(path: &Path) -> GuardResult<Self> {
        let builder = ::config::Config::builder()
            .add_source(
                ::config::File::from(path)
                    .format(::config::FileFormat::Yaml)
                    .required(true),
            )
            .add_source(env_source());

        Self::build(builder)
    }

    /// Parse configuration from YAML text plus environment overrides
    pub fn from_yaml_str(yaml: &str) -> GuardResult<Self> {
        let builder = ::config::Config::builder()
            .add_source(::config::File::from_str(yaml, ::config::FileFormat::Yaml))
            .add_source(env_source());

        Self::build(builder)
    }

    fn build(
        builder: ::config::ConfigBuilder<::config::builder::DefaultState>,
    ) -> GuardResult<Self> {
        let settings = builder
            .build()
            .map_err(|e| GuardError::config(e.to_string()))?;

        let config: GuardConfig = settings
            .try_deserialize()
            .map_err(|e| GuardError::config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field invariants serde cannot express
    pub fn validate(&self) -> GuardResult<()> {
        if self.general.check_period == 0 {
            return Err(GuardError::config("general.check_period must be > 0"));
        }

        if self.deployments.is_empty() {
            return Err(GuardError::config("no deployments configured"));
        }

        for (name, deployment) in &self.deployments {
            deployment.validate(name)?;
        }

        Ok(())
    }

    /// Look up a deployment by name
    pub fn deployment(&self, name: &str) -> Option<&DeploymentConfig> {
        self.deployments.get(name)
    }
}

fn env_source() -> ::config::Environment {
    ::config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;

    pub(crate) const SAMPLE: &str = r#"
general:
  check_period: 30
  state_file: /tmp/upsguard-test.state
deployments:
  lab:
    ups_type: tripplite
    ups_host: 10.0.0.5
    ups_snmpv1_community: public
    vcenter_host: vcenter.lab
    vcenter_username: administrator@vsphere.local
    vcenter_password: hunter2
    vcenter_vm_name: vcsa
    executing_host_vm_name: guard-vm
    initiate_shutdown_at_batt_pct_remaining: 20
  office:
    ups_type: cyberpower
    ups_host: 10.1.0.5
    ups_snmpv1_community: private
    vcenter_host: vcenter.office
    vcenter_username: admin
    vcenter_password: secret
    vcenter_vm_name: vc-office
    initiate_shutdown_at_batt_pct_remaining: 35.5
"#;

    pub(crate) fn sample_deployment() -> DeploymentConfig {
        DeploymentConfig {
            kind: DeploymentKind::Vcenter,
            ups_type: UpsType::Tripplite,
            ups_host: "10.0.0.5".to_string(),
            ups_snmpv1_community: "public".to_string(),
            ups_snmp_version: SnmpVersion::V1,
            vcenter_host: "vcenter.lab".to_string(),
            vcenter_username: "admin".to_string(),
            vcenter_password: "secret".to_string(),
            vcenter_vm_name: "vcsa".to_string(),
            esxi_host: String::new(),
            esxi_username: String::new(),
            esxi_password: String::new(),
            executing_host_vm_name: String::new(),
            initiate_shutdown_at_batt_pct_remaining: 20.0,
        }
    }

    #[test]
    fn test_parse_sample() {
        let config = GuardConfig::from_yaml_str(SAMPLE).unwrap();

        assert_eq!(config.general.check_period, 30);
        assert_eq!(
            config.general.state_file,
            PathBuf::from("/tmp/upsguard-test.state")
        );
        assert_eq!(config.general.metrics_port, None);
        assert!(config.general.local_shutdown_use_sudo);
        assert_eq!(config.deployments.len(), 2);

        let lab = config.deployment("lab").unwrap();
        assert_eq!(lab.ups_type, UpsType::Tripplite);
        assert_eq!(lab.executing_host(), Some("guard-vm"));
        assert_eq!(lab.threshold_pct(), 20.0);

        assert_eq!(lab.kind, DeploymentKind::Vcenter);
        assert_eq!(lab.ups_snmp_version, SnmpVersion::V1);

        let office = config.deployment("office").unwrap();
        assert_eq!(office.ups_type, UpsType::Cyberpower);
        assert_eq!(office.executing_host(), None);
        assert_eq!(office.threshold_pct(), 35.5);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = GuardConfig::load(file.path()).unwrap();
        assert_eq!(config.deployments.len(), 2);
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = GuardConfig::load(Path::new("/nonexistent/upsguard.yaml")).unwrap_err();
        assert!(matches!(err, GuardError::Config { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_invalid_ups_type_rejected() {
        let yaml = SAMPLE.replace("ups_type: tripplite", "ups_type: apc");
        let err = GuardConfig::from_yaml_str(&yaml).unwrap_err();
        assert!(matches!(err, GuardError::Config { .. }));
    }

    #[test]
    fn test_missing_required_field_rejected() {
        let yaml = SAMPLE.replace("    vcenter_vm_name: vcsa\n", "");
        assert!(GuardConfig::from_yaml_str(&yaml).is_err());
    }

    #[test]
    fn test_empty_required_field_rejected() {
        let yaml = SAMPLE.replace("ups_snmpv1_community: public", "ups_snmpv1_community: \"\"");
        let err = GuardConfig::from_yaml_str(&yaml).unwrap_err();
        assert!(err.to_string().contains("ups_snmpv1_community"));
    }

    #[test]
    fn test_threshold_bounds() {
        let mut deployment = sample_deployment();

        deployment.initiate_shutdown_at_batt_pct_remaining = 0.0;
        assert!(deployment.validate("lab").is_err());

        deployment.initiate_shutdown_at_batt_pct_remaining = 100.5;
        assert!(deployment.validate("lab").is_err());

        deployment.initiate_shutdown_at_batt_pct_remaining = 100.0;
        assert!(deployment.validate("lab").is_ok());
    }

    #[test]
    fn test_executing_host_must_differ_from_vcenter() {
        let mut deployment = sample_deployment();
        deployment.executing_host_vm_name = "vcsa".to_string();
        assert!(deployment.validate("lab").is_err());
    }

    #[test]
    fn test_zero_check_period_rejected() {
        let yaml = SAMPLE.replace("check_period: 30", "check_period: 0");
        let err = GuardConfig::from_yaml_str(&yaml).unwrap_err();
        assert!(err.to_string().contains("check_period"));
    }

    /// A standalone ESXi host instead of a vCenter deployment
    pub(crate) fn esxi_deployment() -> DeploymentConfig {
        DeploymentConfig {
            kind: DeploymentKind::Esxi,
            vcenter_host: String::new(),
            vcenter_username: String::new(),
            vcenter_password: String::new(),
            vcenter_vm_name: String::new(),
            esxi_host: "esxi01.lab".to_string(),
            esxi_username: "root".to_string(),
            esxi_password: "secret".to_string(),
            ..sample_deployment()
        }
    }

    #[test]
    fn test_unparseable_ups_host_rejected() {
        let yaml = SAMPLE.replace("ups_host: 10.0.0.5", "ups_host: 10.0.0.5:notaport");
        let err = GuardConfig::from_yaml_str(&yaml).unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("deployment 'lab'"));
        assert!(err.to_string().contains("invalid SNMP port"));
    }

    #[test]
    fn test_unparseable_vcenter_host_rejected() {
        let yaml = SAMPLE.replace("vcenter_host: vcenter.lab", "vcenter_host: vcenter.lab:99999");
        let err = GuardConfig::from_yaml_str(&yaml).unwrap_err();
        assert!(matches!(err, GuardError::Config { .. }));
        assert!(err.to_string().contains("invalid control plane host"));

        let mut deployment = sample_deployment();
        deployment.vcenter_host = "vcenter lab".to_string();
        assert!(deployment.validate("lab").is_err());
    }

    #[test]
    fn test_snmp_version_option() {
        let yaml = SAMPLE.replace(
            "    ups_snmpv1_community: private\n",
            "    ups_snmpv1_community: private\n    ups_snmp_version: v2c\n",
        );
        let config = GuardConfig::from_yaml_str(&yaml).unwrap();
        assert_eq!(
            config.deployment("office").unwrap().ups_snmp_version,
            SnmpVersion::V2c
        );
        assert_eq!(
            config.deployment("lab").unwrap().ups_snmp_version,
            SnmpVersion::V1
        );

        let bad = SAMPLE.replace(
            "    ups_snmpv1_community: private\n",
            "    ups_snmpv1_community: private\n    ups_snmp_version: v3\n",
        );
        assert!(GuardConfig::from_yaml_str(&bad).is_err());
    }

    #[test]
    fn test_esxi_deployment() {
        let yaml = r#"
general:
  check_period: 60
deployments:
  garage:
    kind: esxi
    ups_type: cyberpower
    ups_host: 10.2.0.5
    ups_snmpv1_community: public
    esxi_host: esxi01.lab
    esxi_username: root
    esxi_password: hunter2
    initiate_shutdown_at_batt_pct_remaining: 30
"#;
        let config = GuardConfig::from_yaml_str(yaml).unwrap();
        let garage = config.deployment("garage").unwrap();
        assert_eq!(garage.kind, DeploymentKind::Esxi);
        assert_eq!(garage.shutdown_target(), "esxi01.lab");
        assert!(!format!("{:?}", garage).contains("hunter2"));

        let missing = yaml.replace("    esxi_password: hunter2\n", "");
        let err = GuardConfig::from_yaml_str(&missing).unwrap_err();
        assert!(err.to_string().contains("esxi_password"));
    }

    #[test]
    fn test_esxi_deployment_needs_no_vcenter_fields() {
        assert!(esxi_deployment().validate("garage").is_ok());
    }

    #[test]
    fn test_vm_names_with_surrounding_whitespace_rejected() {
        let mut deployment = sample_deployment();
        deployment.vcenter_vm_name = "vcsa ".to_string();
        let err = deployment.validate("lab").unwrap_err();
        assert!(err.to_string().contains("vcenter_vm_name"));

        let mut deployment = sample_deployment();
        deployment.executing_host_vm_name = " guard-vm".to_string();
        assert!(deployment.validate("lab").is_err());
    }

    #[test]
    fn test_debug_redacts_credentials() {
        let rendered = format!("{:?}", sample_deployment());
        assert!(!rendered.contains("secret"));
        assert!(!rendered.contains("public"));
        assert!(rendered.contains("<redacted>"));
    }
}
