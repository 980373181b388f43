//! Shared types for extension resource specifications and status
//!
//! Every extension kind embeds [`DefaultSpec`] and reports [`DefaultStatus`].
//! The status is written exclusively by the actuator owning the object; the
//! orchestrator only reads it (apart from injecting [`DefaultStatus::state`]
//! during restore).

use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::runtime::RawExtension;
use schemars::gen::SchemaGenerator;
use schemars::schema::{InstanceType, Schema, SchemaObject};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Schema for opaque JSON blobs interpreted only by actuators
pub(crate) fn raw_extension_schema(_: &mut SchemaGenerator) -> Schema {
    let mut schema = SchemaObject {
        instance_type: Some(InstanceType::Object.into()),
        ..Default::default()
    };
    schema.extensions.insert(
        "x-kubernetes-preserve-unknown-fields".to_string(),
        serde_json::Value::Bool(true),
    );
    schema.extensions.insert(
        "nullable".to_string(),
        serde_json::Value::Bool(true),
    );
    Schema::Object(schema)
}

/// Fields common to the spec of every extension kind
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DefaultSpec {
    /// Selects the actuator responsible for this object.
    /// Immutable once deletion of the object has been requested.
    #[serde(rename = "type")]
    pub type_: String,

    /// Actuator specific configuration, never interpreted by the orchestrator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "raw_extension_schema")]
    pub provider_config: Option<RawExtension>,
}

impl DefaultSpec {
    pub fn new(type_: impl Into<String>, provider_config: Option<RawExtension>) -> Self {
        Self {
            type_: type_.into(),
            provider_config,
        }
    }
}

/// Observed state reported by the actuator
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DefaultStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<LastError>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_operation: Option<LastOperation>,

    /// Last spec generation handled by the actuator
    #[serde(default)]
    pub observed_generation: i64,

    /// Actuator internal state, persisted for restore after migration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "raw_extension_schema")]
    pub state: Option<RawExtension>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "raw_extension_schema")]
    pub provider_status: Option<RawExtension>,
}

/// State of the last operation performed by an actuator
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum LastOperationState {
    #[default]
    Pending,
    Processing,
    Succeeded,
    Error,
    Failed,
    Aborted,
}

impl std::fmt::Display for LastOperationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LastOperationState::Pending => write!(f, "Pending"),
            LastOperationState::Processing => write!(f, "Processing"),
            LastOperationState::Succeeded => write!(f, "Succeeded"),
            LastOperationState::Error => write!(f, "Error"),
            LastOperationState::Failed => write!(f, "Failed"),
            LastOperationState::Aborted => write!(f, "Aborted"),
        }
    }
}

/// Kind of the last operation performed by an actuator
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum LastOperationType {
    Create,
    #[default]
    Reconcile,
    Delete,
    Migrate,
    Restore,
}

impl std::fmt::Display for LastOperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LastOperationType::Create => write!(f, "Create"),
            LastOperationType::Reconcile => write!(f, "Reconcile"),
            LastOperationType::Delete => write!(f, "Delete"),
            LastOperationType::Migrate => write!(f, "Migrate"),
            LastOperationType::Restore => write!(f, "Restore"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LastOperation {
    #[serde(default)]
    pub description: String,
    pub last_update_time: DateTime<Utc>,
    #[serde(default)]
    pub progress: i32,
    pub state: LastOperationState,
    #[serde(rename = "type")]
    pub type_: LastOperationType,
}

impl LastOperation {
    pub fn new(
        type_: LastOperationType,
        state: LastOperationState,
        description: impl Into<String>,
        last_update_time: DateTime<Utc>,
    ) -> Self {
        let progress = if state == LastOperationState::Succeeded {
            100
        } else {
            0
        };
        Self {
            description: description.into(),
            last_update_time,
            progress,
            state,
            type_,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.state == LastOperationState::Succeeded
    }
}

/// Error reported by an actuator, present only while the object is in error
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LastError {
    pub description: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub codes: Vec<ErrorCode>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<DateTime<Utc>>,
}

impl LastError {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Default::default()
        }
    }
}

/// Well-known error codes attached to [`LastError`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum ErrorCode {
    #[serde(rename = "ERR_INFRA_UNAUTHENTICATED")]
    InfraUnauthenticated,
    #[serde(rename = "ERR_INFRA_UNAUTHORIZED")]
    InfraUnauthorized,
    #[serde(rename = "ERR_INFRA_QUOTA_EXCEEDED")]
    InfraQuotaExceeded,
    #[serde(rename = "ERR_INFRA_RATE_LIMITS_EXCEEDED")]
    InfraRateLimitsExceeded,
    #[serde(rename = "ERR_INFRA_DEPENDENCIES")]
    InfraDependencies,
    #[serde(rename = "ERR_RETRYABLE_INFRA_DEPENDENCIES")]
    RetryableInfraDependencies,
    #[serde(rename = "ERR_INFRA_RESOURCES_DEPLETED")]
    InfraResourcesDepleted,
    #[serde(rename = "ERR_CLEANUP_CLUSTER_RESOURCES")]
    CleanupClusterResources,
    #[serde(rename = "ERR_CONFIGURATION_PROBLEM")]
    ConfigurationProblem,
    #[serde(rename = "ERR_RETRYABLE_CONFIGURATION_PROBLEM")]
    RetryableConfigurationProblem,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InfraUnauthenticated => "ERR_INFRA_UNAUTHENTICATED",
            ErrorCode::InfraUnauthorized => "ERR_INFRA_UNAUTHORIZED",
            ErrorCode::InfraQuotaExceeded => "ERR_INFRA_QUOTA_EXCEEDED",
            ErrorCode::InfraRateLimitsExceeded => "ERR_INFRA_RATE_LIMITS_EXCEEDED",
            ErrorCode::InfraDependencies => "ERR_INFRA_DEPENDENCIES",
            ErrorCode::RetryableInfraDependencies => "ERR_RETRYABLE_INFRA_DEPENDENCIES",
            ErrorCode::InfraResourcesDepleted => "ERR_INFRA_RESOURCES_DEPLETED",
            ErrorCode::CleanupClusterResources => "ERR_CLEANUP_CLUSTER_RESOURCES",
            ErrorCode::ConfigurationProblem => "ERR_CONFIGURATION_PROBLEM",
            ErrorCode::RetryableConfigurationProblem => "ERR_RETRYABLE_CONFIGURATION_PROBLEM",
        }
    }
}

/// Purpose of a control plane object
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Purpose {
    #[default]
    Normal,
    Exposure,
}

impl Purpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            Purpose::Normal => "normal",
            Purpose::Exposure => "exposure",
        }
    }
}

impl std::fmt::Display for Purpose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
