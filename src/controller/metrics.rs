//! Prometheus metrics for the VDB operator
//!
//! # Exported metrics
//! The `/metrics` endpoint (when built with `--features metrics`) exports the following metrics:
//! - `vdb_reconcile_duration_seconds` (histogram): reconcile duration labeled by controller.
//! - `vdb_reconcile_errors_total` (counter): reconcile errors labeled by controller and kind.
//! - `vdb_phase_transitions_total` (counter): phase changes labeled by namespace/name/phase.
//! - `vdb_redeploys_total` (counter): spec changes that restarted the pipeline.
//! - `vdb_config_drift_rollouts_total` (counter): rolling updates caused by referenced configuration.

use std::sync::atomic::AtomicU64;

use once_cell::sync::Lazy;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

/// Labels for operator reconcile metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ReconcileLabels {
    /// Controller name, e.g. "virtualdatabase"
    pub controller: String,
}

/// Labels for operator error metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ErrorLabels {
    pub controller: String,
    /// Error kind/category, e.g. "kube", "conflict", "timeout"
    pub kind: String,
}

/// Labels identifying one VirtualDatabase
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct VdbLabels {
    pub namespace: String,
    pub name: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct PhaseLabels {
    pub namespace: String,
    pub name: String,
    /// Phase that was entered
    pub phase: String,
}

/// Histogram tracking reconcile duration (seconds)
pub static RECONCILE_DURATION_SECONDS: Lazy<Family<ReconcileLabels, Histogram>> = Lazy::new(|| {
    fn reconcile_histogram() -> Histogram {
        // 1ms .. ~32s across 16 buckets; the route wait bounds the upper end.
        Histogram::new(exponential_buckets(0.001, 2.0, 16))
    }

    Family::new_with_constructor(reconcile_histogram)
});

pub static RECONCILE_ERRORS_TOTAL: Lazy<Family<ErrorLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

pub static PHASE_TRANSITIONS_TOTAL: Lazy<Family<PhaseLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

pub static REDEPLOYS_TOTAL: Lazy<Family<VdbLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

pub static CONFIG_DRIFT_ROLLOUTS_TOTAL: Lazy<Family<VdbLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

/// Global metrics registry
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let mut registry = Registry::default();

    registry.register(
        "vdb_reconcile_duration_seconds",
        "Duration of reconcile loops in seconds",
        RECONCILE_DURATION_SECONDS.clone(),
    );
    registry.register(
        "vdb_reconcile_errors_total",
        "Total number of reconcile errors",
        RECONCILE_ERRORS_TOTAL.clone(),
    );
    registry.register(
        "vdb_phase_transitions_total",
        "Phase transitions persisted by the reconciler",
        PHASE_TRANSITIONS_TOTAL.clone(),
    );
    registry.register(
        "vdb_redeploys_total",
        "Spec changes that restarted the build pipeline",
        REDEPLOYS_TOTAL.clone(),
    );
    registry.register(
        "vdb_config_drift_rollouts_total",
        "Rolling updates triggered by changed secret or config map values",
        CONFIG_DRIFT_ROLLOUTS_TOTAL.clone(),
    );

    registry
});

fn vdb_labels(namespace: &str, name: &str) -> VdbLabels {
    VdbLabels {
        namespace: namespace.to_string(),
        name: name.to_string(),
    }
}

/// Observe a reconcile duration in seconds.
pub fn observe_reconcile_duration_seconds(controller: &str, seconds: f64) {
    let labels = ReconcileLabels {
        controller: controller.to_string(),
    };
    RECONCILE_DURATION_SECONDS
        .get_or_create(&labels)
        .observe(seconds);
}

/// Increment the reconcile error counter.
pub fn inc_reconcile_error(controller: &str, kind: &str) {
    let labels = ErrorLabels {
        controller: controller.to_string(),
        kind: kind.to_string(),
    };
    RECONCILE_ERRORS_TOTAL.get_or_create(&labels).inc();
}

pub fn inc_phase_transition(namespace: &str, name: &str, phase: &str) {
    let labels = PhaseLabels {
        namespace: namespace.to_string(),
        name: name.to_string(),
        phase: phase.to_string(),
    };
    PHASE_TRANSITIONS_TOTAL.get_or_create(&labels).inc();
}

pub fn inc_redeploy(namespace: &str, name: &str) {
    REDEPLOYS_TOTAL.get_or_create(&vdb_labels(namespace, name)).inc();
}

pub fn inc_config_drift(namespace: &str, name: &str) {
    CONFIG_DRIFT_ROLLOUTS_TOTAL
        .get_or_create(&vdb_labels(namespace, name))
        .inc();
}
