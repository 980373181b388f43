//! Actuator side of the extension contract
//!
//! An actuator is the out-of-process party that acts on extension objects:
//! it picks up the operation annotation, does the provider specific work and
//! reports the outcome in the object's status. [`ActuatorController`] drives
//! an [`Actuator`] implementation against an [`crate::store::ObjectStore`] and
//! owns all status bookkeeping, so actuators only implement the work itself.

mod controller;

pub use controller::{Action, ActuatorController};

use async_trait::async_trait;
use thiserror::Error;

use crate::crd::{ErrorCode, ExtensionObject};
use crate::error::Error as EngineError;

/// Failure reported by an actuator, recorded as the object's `lastError`
#[derive(Error, Clone, Debug, PartialEq)]
#[error("{description}")]
pub struct ActuatorError {
    pub description: String,
    pub codes: Vec<ErrorCode>,
}

impl ActuatorError {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            codes: Vec::new(),
        }
    }

    pub fn with_codes(mut self, codes: impl IntoIterator<Item = ErrorCode>) -> Self {
        self.codes.extend(codes);
        self
    }
}

impl From<EngineError> for ActuatorError {
    fn from(e: EngineError) -> Self {
        ActuatorError::new(e.to_string())
    }
}

pub type ActuatorResult = std::result::Result<(), ActuatorError>;

/// Provider specific handling of one extension kind
///
/// Every method receives the object as read at the time the operation was
/// picked up. For restore the object carries the snapshot state in
/// `status.state`.
#[async_trait]
pub trait Actuator<K: ExtensionObject>: Send + Sync + 'static {
    async fn reconcile(&self, obj: &K) -> ActuatorResult;

    async fn delete(&self, obj: &K) -> ActuatorResult;

    async fn restore(&self, obj: &K) -> ActuatorResult;

    /// Release the object on this cluster while keeping what it provisioned
    async fn migrate(&self, obj: &K) -> ActuatorResult;
}
