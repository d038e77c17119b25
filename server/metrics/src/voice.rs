use metrics::{counter, histogram};

use crate::labels::LabelPolicy;

/// Metric names under: {ns}_voice_*, covering the datagram relay.
pub struct VoiceMetrics {
    ns: &'static str,
    policy: LabelPolicy,
}

impl VoiceMetrics {
    pub fn new(namespace: &'static str, policy: LabelPolicy) -> Self {
        Self { ns: namespace, policy }
    }

    #[inline]
    pub fn rx_packet(&self) {
        counter!(format!("{}_voice_rx_packets_total", self.ns)).increment(1);
    }

    #[inline]
    pub fn rx_bytes(&self, n: usize) {
        counter!(format!("{}_voice_rx_bytes_total", self.ns)).increment(n as u64);
    }

    #[inline]
    pub fn forwarded(&self, fanout: usize) {
        counter!(format!("{}_voice_forwarded_total", self.ns)).increment(1);
        histogram!(format!("{}_voice_fanout", self.ns)).record(fanout as f64);
    }

    #[inline]
    pub fn drop_reason(&self, reason: &'static str) {
        counter!(
            format!("{}_voice_drops_total", self.ns),
            "reason" => self.policy.reason(reason).as_str().to_string()
        )
        .increment(1);
    }

    #[inline]
    pub fn per_channel_rx(&self, channel_id: i64) {
        counter!(
            format!("{}_voice_rx_packets_by_channel_total", self.ns),
            "ch" => self.policy.channel_bucket(channel_id).as_str().to_string()
        )
        .increment(1);
    }
}
