use metrics::{counter, histogram};

/// Reconcile-loop instrumentation for the [`NamespaceMapping`] controller,
/// generalized from the per-`Cluster` counters the teacher controller used to
/// keep: a reconcile counter, a per-action counter, and read/write phase
/// histograms. Recorded through the `metrics` facade so they surface on the
/// same `/metrics` endpoint `dr_syncer_common::metrics` serves, rather than a
/// second, separate Prometheus registry.
#[derive(Clone)]
pub struct ControllerMetrics {
    scope: &'static str,
}

impl ControllerMetrics {
    pub fn new(scope: &'static str) -> Self {
        Self { scope }
    }

    pub fn record_reconcile(&self, name: &str, namespace: &str) {
        counter!(
            "dr_syncer_reconcile_total",
            "scope" => self.scope,
            "name" => name.to_owned(),
            "namespace" => namespace.to_owned()
        )
        .increment(1);
    }

    pub fn record_action(&self, name: &str, namespace: &str, action: &str) {
        counter!(
            "dr_syncer_reconcile_action_total",
            "scope" => self.scope,
            "name" => name.to_owned(),
            "namespace" => namespace.to_owned(),
            "action" => action.to_owned()
        )
        .increment(1);
    }

    pub fn observe_read(&self, name: &str, namespace: &str, action: &str, secs: f64) {
        histogram!(
            "dr_syncer_reconcile_read_seconds",
            "scope" => self.scope,
            "name" => name.to_owned(),
            "namespace" => namespace.to_owned(),
            "action" => action.to_owned()
        )
        .record(secs);
    }

    pub fn observe_write(&self, name: &str, namespace: &str, action: &str, secs: f64) {
        histogram!(
            "dr_syncer_reconcile_write_seconds",
            "scope" => self.scope,
            "name" => name.to_owned(),
            "namespace" => namespace.to_owned(),
            "action" => action.to_owned()
        )
        .record(secs);
    }
}
