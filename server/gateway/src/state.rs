use std::sync::Arc;
use std::time::Duration;

use bken_presence::{PresenceConfig, PresenceCore};

use crate::metrics::Metrics;
use crate::voice_relay::VoiceRelay;

#[derive(Clone)]
pub struct AppState {
    pub presence: PresenceCore,
    pub voice: VoiceRelay,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(outbound_queue_size: usize) -> Self {
        let config = PresenceConfig { outbound_queue_size, ..PresenceConfig::default() };
        Self {
            presence: PresenceCore::new(config),
            voice: VoiceRelay::new(Duration::from_millis(50)),
            metrics: Arc::new(Metrics::new()),
        }
    }
}
