use bken_metrics::{GatewayMetrics, LabelPolicy, PresenceMetrics, VoiceMetrics};

pub const NAMESPACE: &str = "bken";

/// One instance per process, shared by every connection handler.
pub struct Metrics {
    pub gateway: GatewayMetrics,
    pub voice: VoiceMetrics,
    pub presence: PresenceMetrics,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            gateway: GatewayMetrics::new(NAMESPACE),
            voice: VoiceMetrics::new(NAMESPACE, LabelPolicy::default()),
            presence: PresenceMetrics::new(NAMESPACE),
        }
    }
}
