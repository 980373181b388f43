//! Prometheus metrics for extension lifecycle operations
//!
//! # Exported metrics
//! - `fleetplane_extension_operation_duration_seconds` (histogram): duration of a lifecycle phase labeled by kind and phase.
//! - `fleetplane_extension_operation_errors_total` (counter): failed lifecycle phases labeled by kind, phase and reason.
//! - `fleetplane_extension_severe_errors_total` (counter): waits aborted by the severe threshold labeled by kind.

use std::sync::atomic::AtomicU64;

use once_cell::sync::Lazy;
use prometheus_client::encoding::text::encode as encode_text;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

use crate::error::Phase;

/// Labels for lifecycle operation durations
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OperationLabels {
    /// Extension kind, e.g. "Extension"
    pub kind: String,
    /// Lifecycle phase, e.g. "deploy", "wait"
    pub phase: String,
}

/// Labels for lifecycle operation errors
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ErrorLabels {
    pub kind: String,
    pub phase: String,
    /// Error category, e.g. "timeout", "severe", "store"
    pub reason: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct KindLabels {
    pub kind: String,
}

/// Histogram tracking lifecycle phase duration (seconds)
pub static OPERATION_DURATION_SECONDS: Lazy<Family<OperationLabels, Histogram>> =
    Lazy::new(|| {
        fn operation_histogram() -> Histogram {
            // 10ms .. ~5.5min across 16 buckets.
            Histogram::new(exponential_buckets(0.01, 2.0, 16))
        }

        Family::new_with_constructor(operation_histogram)
    });

/// Counter tracking failed lifecycle phases
pub static OPERATION_ERRORS_TOTAL: Lazy<Family<ErrorLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

/// Counter tracking waits aborted because an error outlived the severe threshold
pub static SEVERE_ERRORS_TOTAL: Lazy<Family<KindLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

/// Global metrics registry
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let mut registry = Registry::default();

    registry.register(
        "fleetplane_extension_operation_duration_seconds",
        "Duration of extension lifecycle phases in seconds",
        OPERATION_DURATION_SECONDS.clone(),
    );
    // counters get the `_total` suffix appended on encoding
    registry.register(
        "fleetplane_extension_operation_errors",
        "Total number of failed extension lifecycle phases",
        OPERATION_ERRORS_TOTAL.clone(),
    );
    registry.register(
        "fleetplane_extension_severe_errors",
        "Total number of waits aborted by the severe error threshold",
        SEVERE_ERRORS_TOTAL.clone(),
    );

    registry
});

/// Observe the duration of a lifecycle phase in seconds.
pub fn observe_operation_duration_seconds(kind: &str, phase: Phase, seconds: f64) {
    let labels = OperationLabels {
        kind: kind.to_string(),
        phase: phase.as_str().to_string(),
    };
    OPERATION_DURATION_SECONDS
        .get_or_create(&labels)
        .observe(seconds);
}

/// Increment the lifecycle error counter.
pub fn inc_operation_error(kind: &str, phase: Phase, reason: &str) {
    let labels = ErrorLabels {
        kind: kind.to_string(),
        phase: phase.as_str().to_string(),
        reason: reason.to_string(),
    };
    OPERATION_ERRORS_TOTAL.get_or_create(&labels).inc();
}

/// Increment the severe error counter.
pub fn inc_severe_error(kind: &str) {
    let labels = KindLabels {
        kind: kind.to_string(),
    };
    SEVERE_ERRORS_TOTAL.get_or_create(&labels).inc();
}

/// Render the registry in the OpenMetrics text format.
pub fn encode() -> String {
    let mut buffer = String::new();
    if encode_text(&mut buffer, &REGISTRY).is_err() {
        return String::new();
    }
    buffer
}
