//! Validation of extension objects on create and update
//!
//! Mirrors the admission checks the API server applies to extension kinds.
//! [`crate::store::MemoryStore`] runs these on every write so that the engine
//! observes the same rejections it would get from a real cluster.

use std::fmt;

use super::object::ExtensionObject;

/// Structured validation error for extension objects
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpecValidationError {
    pub field: String,
    pub message: String,
    pub how_to_fix: String,
}

impl SpecValidationError {
    pub fn new(
        field: impl Into<String>,
        message: impl Into<String>,
        how_to_fix: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            how_to_fix: how_to_fix.into(),
        }
    }
}

impl fmt::Display for SpecValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Render a list of validation errors as a single message
pub fn join_errors(errors: &[SpecValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Validate a new object in isolation
pub fn validate_object<K: ExtensionObject>(obj: &K) -> Result<(), Vec<SpecValidationError>> {
    let mut errors = Vec::new();

    match obj.meta().name.as_deref() {
        Some(name) if !name.is_empty() => {
            if !is_dns_subdomain(name) {
                errors.push(SpecValidationError::new(
                    "metadata.name",
                    format!("{name:?} is not a valid DNS subdomain"),
                    "Use lowercase alphanumeric characters, '-' or '.', at most 253 characters.",
                ));
            }
        }
        _ => errors.push(SpecValidationError::new(
            "metadata.name",
            "name is required",
            "Set metadata.name for the object.",
        )),
    }

    if obj.extension_type().is_empty() {
        errors.push(SpecValidationError::new(
            "spec.type",
            "type is required",
            "Set spec.type to the extension type handled by an actuator.",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate an update of `old` into `new`
///
/// Once deletion has been requested the whole spec is immutable.
pub fn validate_update<K: ExtensionObject>(
    new: &K,
    old: &K,
) -> Result<(), Vec<SpecValidationError>> {
    let mut errors = match validate_object(new) {
        Ok(()) => Vec::new(),
        Err(errors) => errors,
    };

    if old.meta().deletion_timestamp.is_some() {
        let spec_changed = new.extension_spec() != old.extension_spec()
            || new.extension_purpose() != old.extension_purpose();
        if spec_changed {
            errors.push(SpecValidationError::new(
                "spec",
                "spec is immutable once deletion has been requested",
                "Wait for the deletion to complete before changing the spec.",
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

pub(crate) fn is_dns_subdomain(name: &str) -> bool {
    name.len() <= 253
        && name.split('.').all(|label| {
            !label.is_empty()
                && label
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
                && !label.starts_with('-')
                && !label.ends_with('-')
        })
}
