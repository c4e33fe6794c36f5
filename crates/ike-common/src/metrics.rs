//! Metrics for ike observability
//!
//! Provides OpenTelemetry metrics for:
//! - Resources processed and failed by the session engine
//! - Session reconciliation duration
//!
//! The engine does not touch the globals directly; it reports through a
//! [`MetricsRecorder`] so tests can observe what was counted.

use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::KeyValue;

/// Global meter for ike metrics
static METER: Lazy<Meter> = Lazy::new(|| global::meter("ike"));

// ============================================================================
// Session Engine Metrics
// ============================================================================

/// Counter of resources successfully handled by a modificator
///
/// Labels:
/// - `namespace`: namespace of the session
/// - `kind`: Deployment, Gateway, VirtualService, ...
/// - `action`: create, delete, modify, revert
pub static RESOURCES_PROCESSED: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("ike_resources_processed_total")
        .with_description("Total number of resources processed by sessions")
        .with_unit("{resources}")
        .build()
});

/// Counter of resources a modificator failed to handle
///
/// Labels: same as [`RESOURCES_PROCESSED`]
pub static RESOURCES_FAILED: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("ike_resources_failed_total")
        .with_description("Total number of resources sessions failed to process")
        .with_unit("{resources}")
        .build()
});

/// Histogram of session reconciliation duration
///
/// Labels:
/// - `result`: success, error
pub static SESSION_RECONCILE_DURATION: Lazy<Histogram<f64>> = Lazy::new(|| {
    METER
        .f64_histogram("ike_session_reconcile_duration_seconds")
        .with_description("Duration of session reconciliation in seconds")
        .with_unit("s")
        .build()
});

// ============================================================================
// Recorder
// ============================================================================

/// Sink for per-resource outcomes of the session engine
pub trait MetricsRecorder: Send + Sync {
    /// A resource was handled successfully
    fn processed(&self, namespace: &str, kind: &str, action: &str);
    /// Handling a resource failed
    fn failed(&self, namespace: &str, kind: &str, action: &str);
}

fn resource_labels(namespace: &str, kind: &str, action: &str) -> [KeyValue; 3] {
    [
        KeyValue::new("namespace", namespace.to_string()),
        KeyValue::new("kind", kind.to_string()),
        KeyValue::new("action", action.to_string()),
    ]
}

/// Recorder writing to the global OpenTelemetry counters
#[derive(Clone, Copy, Debug, Default)]
pub struct OtelMetricsRecorder;

impl MetricsRecorder for OtelMetricsRecorder {
    fn processed(&self, namespace: &str, kind: &str, action: &str) {
        RESOURCES_PROCESSED.add(1, &resource_labels(namespace, kind, action));
    }

    fn failed(&self, namespace: &str, kind: &str, action: &str) {
        RESOURCES_FAILED.add(1, &resource_labels(namespace, kind, action));
    }
}

/// Outcome recorded by [`CapturingRecorder`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedOutcome {
    /// Session namespace
    pub namespace: String,
    /// Resource kind
    pub kind: String,
    /// Action taken
    pub action: String,
    /// Whether the resource was handled
    pub success: bool,
}

/// Recorder keeping every outcome in memory
#[derive(Clone, Debug, Default)]
pub struct CapturingRecorder {
    outcomes: Arc<Mutex<Vec<RecordedOutcome>>>,
}

impl CapturingRecorder {
    /// Everything recorded so far
    pub fn outcomes(&self) -> Vec<RecordedOutcome> {
        self.outcomes
            .lock()
            .map(|o| o.clone())
            .unwrap_or_default()
    }

    /// Number of recorded outcomes matching `success`
    pub fn count(&self, success: bool) -> usize {
        self.outcomes()
            .iter()
            .filter(|o| o.success == success)
            .count()
    }

    fn push(&self, namespace: &str, kind: &str, action: &str, success: bool) {
        if let Ok(mut outcomes) = self.outcomes.lock() {
            outcomes.push(RecordedOutcome {
                namespace: namespace.to_string(),
                kind: kind.to_string(),
                action: action.to_string(),
                success,
            });
        }
    }
}

impl MetricsRecorder for CapturingRecorder {
    fn processed(&self, namespace: &str, kind: &str, action: &str) {
        self.push(namespace, kind, action, true);
    }

    fn failed(&self, namespace: &str, kind: &str, action: &str) {
        self.push(namespace, kind, action, false);
    }
}

// ============================================================================
// Metric Recording Helpers
// ============================================================================

/// Record a session reconciliation with timing
pub struct ReconcileTimer {
    start: std::time::Instant,
}

impl ReconcileTimer {
    /// Start timing a reconciliation
    pub fn start() -> Self {
        Self {
            start: std::time::Instant::now(),
        }
    }

    /// Record successful completion
    pub fn success(self) {
        self.record("success");
    }

    /// Record error completion
    pub fn error(self) {
        self.record("error");
    }

    fn record(self, result: &'static str) {
        let duration = self.start.elapsed().as_secs_f64();
        SESSION_RECONCILE_DURATION.record(duration, &[KeyValue::new("result", result)]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_otel_recorder_does_not_panic_without_provider() {
        let recorder = OtelMetricsRecorder;
        recorder.processed("bookinfo", "Deployment", "create");
        recorder.failed("bookinfo", "Gateway", "modify");
    }

    #[test]
    fn test_capturing_recorder_counts_outcomes() {
        let recorder = CapturingRecorder::default();
        recorder.processed("bookinfo", "Deployment", "create");
        recorder.processed("bookinfo", "VirtualService", "modify");
        recorder.failed("bookinfo", "Gateway", "modify");

        assert_eq!(recorder.count(true), 2);
        assert_eq!(recorder.count(false), 1);
        assert_eq!(recorder.outcomes()[2].kind, "Gateway");
    }

    #[test]
    fn test_capturing_recorder_clones_share_state() {
        let recorder = CapturingRecorder::default();
        let clone = recorder.clone();
        clone.processed("ns", "Service", "located");
        assert_eq!(recorder.count(true), 1);
    }

    #[test]
    fn test_reconcile_timer() {
        ReconcileTimer::start().success();
        ReconcileTimer::start().error();
    }
}
