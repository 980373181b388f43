//! Orchestrator configuration
//!
//! Describes the extension objects of one managed cluster: where they live,
//! how long to wait for them and which extensions are wanted. Loaded from
//! YAML or TOML, chosen by file extension:
//!
//! ```yaml
//! namespace: shoot--garden--dev
//! shootName: dev
//! wait:
//!   intervalSeconds: 5
//!   severeThresholdSeconds: 30
//!   timeoutSeconds: 180
//! auditBackend:
//!   type: local
//! controlPlane:
//!   type: local
//!   region: eu-west-1
//!   exposure: true
//! extensions:
//!   shoot-dns-service:
//!     timeoutSeconds: 300
//!     lifecycle:
//!       reconcile: BeforeKubeAPIServer
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use k8s_openapi::apimachinery::pkg::runtime::RawExtension;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::component::{
    AuditBackendValues, ControlPlaneValues, ExtensionConfig, ExtensionsValues, Lifecycle,
};
use crate::controller::wait::{
    WaitConfig, DEFAULT_INTERVAL, DEFAULT_SEVERE_THRESHOLD, DEFAULT_TIMEOUT,
};
use crate::crd::validation::{is_dns_subdomain, join_errors};
use crate::crd::{Purpose, SpecValidationError};
use crate::error::{Error, Result};

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorConfig {
    /// Namespace of the managed cluster on the hosting cluster
    pub namespace: String,
    /// Name of the managed cluster; control plane objects are named after it
    pub shoot_name: String,
    #[serde(default)]
    pub wait: WaitSettings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit_backend: Option<ComponentSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_plane: Option<ControlPlaneSettings>,
    /// Wanted extensions by type
    #[serde(default)]
    pub extensions: BTreeMap<String, ExtensionSettings>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitSettings {
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,
    #[serde(default = "default_severe_threshold_seconds")]
    pub severe_threshold_seconds: u64,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_interval_seconds() -> u64 {
    DEFAULT_INTERVAL.as_secs()
}

fn default_severe_threshold_seconds() -> u64 {
    DEFAULT_SEVERE_THRESHOLD.as_secs()
}

fn default_timeout_seconds() -> u64 {
    DEFAULT_TIMEOUT.as_secs()
}

impl Default for WaitSettings {
    fn default() -> Self {
        Self {
            interval_seconds: default_interval_seconds(),
            severe_threshold_seconds: default_severe_threshold_seconds(),
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

impl From<WaitSettings> for WaitConfig {
    fn from(settings: WaitSettings) -> Self {
        WaitConfig {
            interval: Duration::from_secs(settings.interval_seconds),
            severe_threshold: Duration::from_secs(settings.severe_threshold_seconds),
            timeout: Duration::from_secs(settings.timeout_seconds),
        }
    }
}

/// Settings of a single-instance component
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentSettings {
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_config: Option<serde_json::Value>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlPlaneSettings {
    #[serde(rename = "type")]
    pub type_: String,
    pub region: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_config: Option<serde_json::Value>,
    /// Also deploy an exposure control plane
    #[serde(default)]
    pub exposure: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_config: Option<serde_json::Value>,
    /// Overrides `wait.timeoutSeconds` for this extension
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub lifecycle: Lifecycle,
}

impl OrchestratorConfig {
    /// Load and validate a configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::ConfigError(format!("Failed to read {}: {e}", path.display()))
        })?;

        let config = match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml_str(&raw)?,
            Some("toml") => Self::from_toml_str(&raw)?,
            _ => {
                return Err(Error::ConfigError(format!(
                    "Unsupported configuration format for {}, expected .yaml, .yml or .toml",
                    path.display()
                )))
            }
        };
        debug!(
            path = %path.display(),
            extensions = config.extensions.len(),
            "Loaded orchestrator configuration"
        );
        Ok(config)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(raw)
            .map_err(|e| Error::ConfigError(format!("Failed to parse YAML configuration: {e}")))?;
        config.validated()
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)
            .map_err(|e| Error::ConfigError(format!("Failed to parse TOML configuration: {e}")))?;
        config.validated()
    }

    fn validated(self) -> Result<Self> {
        self.validate()
            .map_err(|errors| Error::ValidationError(join_errors(&errors)))?;
        Ok(self)
    }

    /// Check the configuration for values no store would accept
    pub fn validate(&self) -> std::result::Result<(), Vec<SpecValidationError>> {
        let mut errors = Vec::new();

        if !is_dns_subdomain(&self.namespace) {
            errors.push(SpecValidationError::new(
                "namespace",
                format!("{:?} is not a valid namespace", self.namespace),
                "Use the namespace of the managed cluster, e.g. shoot--project--name.",
            ));
        }
        if !is_dns_subdomain(&self.shoot_name) {
            errors.push(SpecValidationError::new(
                "shootName",
                format!("{:?} is not a valid object name", self.shoot_name),
                "Use lowercase alphanumeric characters or '-'.",
            ));
        }

        if self.wait.interval_seconds == 0 {
            errors.push(SpecValidationError::new(
                "wait.intervalSeconds",
                "must be greater than 0",
                "Set a polling interval of at least one second.",
            ));
        }
        if self.wait.timeout_seconds < self.wait.interval_seconds {
            errors.push(SpecValidationError::new(
                "wait.timeoutSeconds",
                "must not be shorter than the polling interval",
                "Increase wait.timeoutSeconds or decrease wait.intervalSeconds.",
            ));
        }

        if let Some(audit_backend) = &self.audit_backend {
            if audit_backend.type_.is_empty() {
                errors.push(SpecValidationError::new(
                    "auditBackend.type",
                    "type is required",
                    "Set the audit backend type handled by an actuator.",
                ));
            }
        }
        if let Some(control_plane) = &self.control_plane {
            if control_plane.type_.is_empty() {
                errors.push(SpecValidationError::new(
                    "controlPlane.type",
                    "type is required",
                    "Set the control plane type handled by an actuator.",
                ));
            }
        }

        for (type_, settings) in &self.extensions {
            if !is_dns_subdomain(type_) {
                errors.push(SpecValidationError::new(
                    format!("extensions.{type_}"),
                    "extension type must be a valid object name",
                    "Use lowercase alphanumeric characters or '-'.",
                ));
            }
            if settings.timeout_seconds == Some(0) {
                errors.push(SpecValidationError::new(
                    format!("extensions.{type_}.timeoutSeconds"),
                    "must be greater than 0",
                    "Remove the override or set a positive timeout.",
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    pub fn wait_config(&self) -> WaitConfig {
        self.wait.into()
    }

    pub fn audit_backend_values(&self) -> Option<AuditBackendValues> {
        self.audit_backend.as_ref().map(|settings| AuditBackendValues {
            namespace: self.namespace.clone(),
            name: self.shoot_name.clone(),
            type_: settings.type_.clone(),
            provider_config: settings.provider_config.clone().map(RawExtension),
        })
    }

    /// Control plane values for every wanted purpose
    pub fn control_plane_values(&self) -> Vec<ControlPlaneValues> {
        let Some(settings) = &self.control_plane else {
            return Vec::new();
        };

        let mut purposes = vec![Purpose::Normal];
        if settings.exposure {
            purposes.push(Purpose::Exposure);
        }
        purposes
            .into_iter()
            .map(|purpose| ControlPlaneValues {
                namespace: self.namespace.clone(),
                name: self.shoot_name.clone(),
                type_: settings.type_.clone(),
                region: settings.region.clone(),
                purpose,
                provider_config: settings.provider_config.clone().map(RawExtension),
            })
            .collect()
    }

    pub fn extensions_values(&self) -> ExtensionsValues {
        ExtensionsValues {
            namespace: self.namespace.clone(),
            extensions: self
                .extensions
                .iter()
                .map(|(type_, settings)| {
                    let config = ExtensionConfig {
                        provider_config: settings.provider_config.clone().map(RawExtension),
                        timeout: settings.timeout_seconds.map(Duration::from_secs),
                        lifecycle: settings.lifecycle,
                    };
                    (type_.clone(), config)
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::LifecycleStage;
    use std::io::Write;

    const YAML: &str = r#"
namespace: shoot--garden--dev
shootName: dev
wait:
  intervalSeconds: 2
auditBackend:
  type: local
controlPlane:
  type: local
  region: eu-west-1
  exposure: true
  providerConfig:
    zones: [a, b]
extensions:
  shoot-dns-service:
    timeoutSeconds: 300
    lifecycle:
      reconcile: BeforeKubeAPIServer
  shoot-cert-service: {}
"#;

    #[test]
    fn test_yaml_defaults_and_lifecycle() {
        let config = OrchestratorConfig::from_yaml_str(YAML).unwrap();

        assert_eq!(
            config.wait_config(),
            WaitConfig {
                interval: Duration::from_secs(2),
                severe_threshold: DEFAULT_SEVERE_THRESHOLD,
                timeout: DEFAULT_TIMEOUT,
            }
        );

        let values = config.extensions_values();
        let dns = &values.extensions["shoot-dns-service"];
        assert_eq!(dns.timeout, Some(Duration::from_secs(300)));
        assert_eq!(dns.lifecycle.reconcile, LifecycleStage::BeforeKubeAPIServer);
        // unset stages keep their defaults
        assert_eq!(dns.lifecycle.delete, LifecycleStage::BeforeKubeAPIServer);
        assert_eq!(dns.lifecycle.migrate, LifecycleStage::AfterKubeAPIServer);
        assert_eq!(values.extensions["shoot-cert-service"].lifecycle, Lifecycle::default());

        let control_planes = config.control_plane_values();
        assert_eq!(control_planes.len(), 2);
        assert_eq!(control_planes[1].purpose, Purpose::Exposure);
        assert_eq!(
            control_planes[0].provider_config.as_ref().unwrap().0["zones"][1],
            "b"
        );
        assert_eq!(config.audit_backend_values().unwrap().name, "dev");
    }

    #[test]
    fn test_toml_file_loading() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(
            file,
            r#"
namespace = "shoot--garden--dev"
shootName = "dev"

[extensions.shoot-networking]
timeoutSeconds = 60

[extensions.shoot-networking.lifecycle]
delete = "AfterKubeAPIServer"
"#
        )
        .unwrap();

        let config = OrchestratorConfig::from_file(file.path()).unwrap();
        assert!(config.control_plane.is_none());
        assert_eq!(config.wait, WaitSettings::default());
        assert_eq!(
            config.extensions["shoot-networking"].lifecycle.delete,
            LifecycleStage::AfterKubeAPIServer
        );
    }

    #[test]
    fn test_unsupported_file_format_is_rejected() {
        let file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        let err = OrchestratorConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, Error::ConfigError(_)));
    }

    #[test]
    fn test_validation_reports_every_problem() {
        let err = OrchestratorConfig::from_yaml_str(
            r#"
namespace: Not_Valid
shootName: dev
wait:
  intervalSeconds: 10
  timeoutSeconds: 5
extensions:
  dns:
    timeoutSeconds: 0
"#,
        )
        .unwrap_err();

        assert_eq!(
            err.to_string(),
            "Validation error: namespace: \"Not_Valid\" is not a valid namespace, \
             wait.timeoutSeconds: must not be shorter than the polling interval, \
             extensions.dns.timeoutSeconds: must be greater than 0"
        );
    }

    #[test]
    fn test_invalid_lifecycle_stage_fails_to_parse() {
        let err = OrchestratorConfig::from_yaml_str(
            r#"
namespace: shoot--garden--dev
shootName: dev
extensions:
  dns:
    lifecycle:
      reconcile: Sometime
"#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::ConfigError(_)));
    }
}
