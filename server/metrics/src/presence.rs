use metrics::counter;

/// Metric names under: {ns}_presence_*, covering `PresenceCore` operations.
pub struct PresenceMetrics {
    ns: &'static str,
}

impl PresenceMetrics {
    pub fn new(namespace: &'static str) -> Self {
        Self { ns: namespace }
    }

    pub fn op_total(&self, op: &'static str) {
        counter!(format!("{}_presence_ops_total", self.ns), "op" => op).increment(1);
    }

    pub fn op_error_total(&self, op: &'static str) {
        counter!(format!("{}_presence_op_errors_total", self.ns), "op" => op).increment(1);
    }

    pub fn fanout_dropped(&self) {
        counter!(format!("{}_presence_fanout_dropped_total", self.ns)).increment(1);
    }
}
