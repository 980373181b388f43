//! Operation annotations shared between the orchestrator and actuators
//!
//! The orchestrator signals a new unit of work by stamping two annotations
//! on an extension object: the operation to perform and the time it was
//! triggered. Actuators remove the operation annotation once they picked the
//! work up. The values are untyped strings on the wire and are decoded into
//! [`OperationTag`] at the boundary.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use kube::api::ObjectMeta;

use crate::error::{Error, Result};

/// Annotation carrying the operation the actuator should perform
pub const OPERATION_ANNOTATION: &str = "fleetplane.io/operation";

/// Annotation carrying the time the operation was triggered
pub const TIMESTAMP_ANNOTATION: &str = "fleetplane.io/timestamp";

/// Annotation confirming that a deletion was requested on purpose
pub const CONFIRM_DELETION_ANNOTATION: &str = "confirmation.fleetplane.io/deletion";

/// Operation requested from an actuator
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    Reconcile,
    Restore,
    Migrate,
    /// Placeholder created by restore; the actuator must not act on it yet
    WaitForState,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Reconcile => "reconcile",
            Operation::Restore => "restore",
            Operation::Migrate => "migrate",
            Operation::WaitForState => "wait-for-state",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "reconcile" => Ok(Operation::Reconcile),
            "restore" => Ok(Operation::Restore),
            "migrate" => Ok(Operation::Migrate),
            "wait-for-state" => Ok(Operation::WaitForState),
            other => Err(Error::InvalidAnnotation {
                key: OPERATION_ANNOTATION.to_string(),
                value: other.to_string(),
                message: "unknown operation".to_string(),
            }),
        }
    }
}

/// Stamp written by the engine when it triggers an operation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Trigger {
    pub operation: Operation,
    pub timestamp: DateTime<Utc>,
}

impl Trigger {
    pub fn new(operation: Operation, timestamp: DateTime<Utc>) -> Self {
        Self {
            operation,
            timestamp,
        }
    }

    /// Write both annotations into `meta`
    pub fn apply(&self, meta: &mut ObjectMeta) {
        let annotations = meta.annotations.get_or_insert_with(BTreeMap::new);
        annotations.insert(
            OPERATION_ANNOTATION.to_string(),
            self.operation.as_str().to_string(),
        );
        annotations.insert(
            TIMESTAMP_ANNOTATION.to_string(),
            format_timestamp(&self.timestamp),
        );
    }
}

/// Decoded operation annotations of an object
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OperationTag {
    pub operation: Option<Operation>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl OperationTag {
    pub fn from_meta(meta: &ObjectMeta) -> Result<Self> {
        let Some(annotations) = meta.annotations.as_ref() else {
            return Ok(Self::default());
        };

        let operation = annotations
            .get(OPERATION_ANNOTATION)
            .map(|value| value.parse::<Operation>())
            .transpose()?;

        let timestamp = annotations
            .get(TIMESTAMP_ANNOTATION)
            .map(|value| parse_timestamp(value))
            .transpose()?;

        Ok(Self {
            operation,
            timestamp,
        })
    }
}

pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| Error::InvalidAnnotation {
            key: TIMESTAMP_ANNOTATION.to_string(),
            value: value.to_string(),
            message: e.to_string(),
        })
}

/// Whether the deletion of an object has been confirmed
pub fn deletion_confirmed(meta: &ObjectMeta) -> bool {
    meta.annotations
        .as_ref()
        .and_then(|a| a.get(CONFIRM_DELETION_ANNOTATION))
        .is_some_and(|v| v == "true")
}
