//! Error types for the extension lifecycle engine

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::crd::ErrorCode;

/// Lifecycle phase an error occurred in, used to prefix surfaced errors
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    Deploy,
    Wait,
    Destroy,
    WaitCleanup,
    Migrate,
    WaitMigrate,
    Restore,
    DeleteStale,
    WaitCleanupStale,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Deploy => "deploy",
            Phase::Wait => "wait",
            Phase::Destroy => "destroy",
            Phase::WaitCleanup => "wait-cleanup",
            Phase::Migrate => "migrate",
            Phase::WaitMigrate => "wait-migrate",
            Phase::Restore => "restore",
            Phase::DeleteStale => "delete-stale",
            Phase::WaitCleanupStale => "wait-cleanup-stale",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    /// The object does not exist in the store
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: String,
        namespace: String,
        name: String,
    },

    /// The store rejected a write because the object failed validation
    #[error("{kind} {namespace}/{name} is invalid: {message}")]
    Invalid {
        kind: String,
        namespace: String,
        name: String,
        message: String,
    },

    /// The store rejected a write because of a concurrent modification
    #[error("{kind} {namespace}/{name} conflict: {message}")]
    Conflict {
        kind: String,
        namespace: String,
        name: String,
        message: String,
    },

    /// Generic store failure (transport, injected faults)
    #[error("Store error: {0}")]
    StoreError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Operation annotation could not be decoded
    #[error("Invalid annotation {key}={value:?}: {message}")]
    InvalidAnnotation {
        key: String,
        value: String,
        message: String,
    },

    /// Actuator reported an error for longer than the severe threshold
    #[error("error during reconciliation: {description}{}", format_codes(.codes))]
    Severe {
        description: String,
        codes: Vec<ErrorCode>,
    },

    /// Polling exceeded its budget without reaching a terminal state
    #[error("operation timed out after {after:?}: {reason}")]
    Timeout { after: Duration, reason: String },

    /// The caller cancelled the operation
    #[error("operation cancelled")]
    Cancelled,

    /// Error raised while running a lifecycle phase for one object
    #[error("{phase} {kind} {namespace}/{name}: {source}")]
    Operation {
        phase: Phase,
        kind: String,
        namespace: String,
        name: String,
        #[source]
        source: Box<Error>,
    },

    /// Failures of several concurrently executed tasks
    #[error("{} errors occurred: {}", .0.len(), join_errors(.0))]
    Multiple(Vec<Error>),
}

fn format_codes(codes: &[ErrorCode]) -> String {
    if codes.is_empty() {
        return String::new();
    }
    let codes: Vec<&str> = codes.iter().map(ErrorCode::as_str).collect();
    format!(" (codes: {})", codes.join(", "))
}

fn join_errors(errors: &[Error]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    pub fn not_found(kind: impl Into<String>, namespace: &str, name: &str) -> Self {
        Error::NotFound {
            kind: kind.into(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    /// Attach lifecycle phase and object identity to this error
    pub fn in_operation(self, phase: Phase, kind: &str, namespace: &str, name: &str) -> Self {
        match self {
            // the task already carries its own identity
            Error::Operation { .. } | Error::Multiple(_) | Error::Cancelled => self,
            other => Error::Operation {
                phase,
                kind: kind.to_string(),
                namespace: namespace.to_string(),
                name: name.to_string(),
                source: Box::new(other),
            },
        }
    }

    /// Join task failures into one error, `None` when there are none
    pub fn aggregate(mut errors: Vec<Error>) -> Option<Self> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Error::Multiple(errors)),
        }
    }

    /// Innermost error, skipping operation context
    pub fn root(&self) -> &Error {
        match self {
            Error::Operation { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self.root() {
            Error::NotFound { .. } => true,
            Error::KubeError(kube::Error::Api(e)) => e.code == 404,
            _ => false,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.root(), Error::Timeout { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        match self.root() {
            Error::Cancelled => true,
            Error::Multiple(errors) => errors.iter().all(Error::is_cancelled),
            _ => false,
        }
    }

    pub fn is_severe(&self) -> bool {
        matches!(self.root(), Error::Severe { .. })
    }

    /// Whether a caller may reasonably retry the whole operation
    pub fn is_retriable(&self) -> bool {
        match self.root() {
            Error::KubeError(_) | Error::StoreError(_) | Error::Conflict { .. } => true,
            Error::Timeout { .. } | Error::Cancelled => true,
            Error::Multiple(errors) => errors.iter().all(Error::is_retriable),
            _ => false,
        }
    }

    /// Short machine-readable reason used for metric labels
    pub fn reason(&self) -> &'static str {
        match self.root() {
            Error::KubeError(_) => "kube",
            Error::NotFound { .. } => "not_found",
            Error::Invalid { .. } => "invalid",
            Error::Conflict { .. } => "conflict",
            Error::StoreError(_) => "store",
            Error::SerializationError(_) => "serialization",
            Error::ConfigError(_) => "config",
            Error::ValidationError(_) => "validation",
            Error::InvalidAnnotation { .. } => "annotation",
            Error::Severe { .. } => "severe",
            Error::Timeout { .. } => "timeout",
            Error::Cancelled => "cancelled",
            Error::Operation { .. } => "operation",
            Error::Multiple(_) => "multiple",
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_context_prefixes_message() {
        let err = Error::Severe {
            description: "backend unreachable".to_string(),
            codes: vec![ErrorCode::InfraDependencies],
        }
        .in_operation(Phase::Wait, "AuditBackend", "shoot--foo", "foo");

        assert_eq!(
            err.to_string(),
            "wait AuditBackend shoot--foo/foo: error during reconciliation: backend unreachable (codes: ERR_INFRA_DEPENDENCIES)"
        );
        assert!(err.is_severe());
    }

    #[test]
    fn test_operation_context_is_not_nested() {
        let err = Error::not_found("Extension", "ns", "a")
            .in_operation(Phase::Wait, "Extension", "ns", "a")
            .in_operation(Phase::Deploy, "Extension", "ns", "b");

        match err {
            Error::Operation { phase, name, .. } => {
                assert_eq!(phase, Phase::Wait);
                assert_eq!(name, "a");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_timeout_and_cancel_are_distinguishable() {
        let timeout = Error::Timeout {
            after: Duration::from_secs(1),
            reason: "not ready".to_string(),
        };
        assert!(timeout.is_timeout());
        assert!(!timeout.is_cancelled());
        assert!(Error::Cancelled.is_cancelled());
        assert!(!Error::Cancelled.is_timeout());
    }

    #[test]
    fn test_aggregate() {
        assert!(Error::aggregate(vec![]).is_none());

        let single = Error::aggregate(vec![Error::Cancelled]).unwrap();
        assert!(matches!(single, Error::Cancelled));

        let multi = Error::aggregate(vec![
            Error::StoreError("a".to_string()),
            Error::StoreError("b".to_string()),
        ])
        .unwrap();
        assert_eq!(
            multi.to_string(),
            "2 errors occurred: Store error: a; Store error: b"
        );
        assert!(multi.is_retriable());
    }
}
