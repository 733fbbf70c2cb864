use prometheus::{HistogramVec, IntCounterVec, Opts, Registry, register_histogram_vec_with_registry, register_int_counter_vec_with_registry};

/// Prometheus instrumentation for the Console controller. One instance is
/// held by `ContextData` and shared across every reconcile call.
pub struct ControllerMetrics {
    pub registry: Registry,
    pub reconcile_counter: IntCounterVec,
    pub action_counter: IntCounterVec,
    pub read_histogram: HistogramVec,
    pub write_histogram: HistogramVec,
    pub reconcile_errors_total: IntCounterVec,
}

impl ControllerMetrics {
    pub fn new(subsystem: &str) -> Self {
        let registry = Registry::new();
        let reconcile_counter = register_int_counter_vec_with_registry!(
            Opts::new("reconcile_total", "total number of reconciliations").subsystem(subsystem),
            &["name", "namespace"],
            registry
        )
        .unwrap();
        let action_counter = register_int_counter_vec_with_registry!(
            Opts::new("reconcile_action_total", "reconciliations by chosen action").subsystem(subsystem),
            &["name", "namespace", "action"],
            registry
        )
        .unwrap();
        let read_histogram = register_histogram_vec_with_registry!(
            "reconcile_read_seconds",
            "time spent determining the next action",
            &["name", "namespace", "action"],
            registry
        )
        .unwrap();
        let write_histogram = register_histogram_vec_with_registry!(
            "reconcile_write_seconds",
            "time spent applying the chosen action",
            &["name", "namespace", "action"],
            registry
        )
        .unwrap();
        let reconcile_errors_total = register_int_counter_vec_with_registry!(
            Opts::new("reconcile_errors_total", "non-conflict errors encountered during reconciliation")
                .subsystem(subsystem),
            &["kind"],
            registry
        )
        .unwrap();
        ControllerMetrics {
            registry,
            reconcile_counter,
            action_counter,
            read_histogram,
            write_histogram,
            reconcile_errors_total,
        }
    }

    pub fn gather(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }
}
