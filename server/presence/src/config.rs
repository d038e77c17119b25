#[derive(Clone, Debug)]
pub struct PresenceConfig {
    /// Default bound on a session's outbound envelope queue.
    pub outbound_queue_size: usize,
    /// Fan-out enqueue budget before a slow subscriber is dropped for that send.
    pub fanout_budget: std::time::Duration,
    /// Name seeded into a ServerScope's channel list the moment its first session joins.
    pub seed_channel_name: &'static str,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            outbound_queue_size: 64,
            fanout_budget: std::time::Duration::from_millis(50),
            seed_channel_name: "General",
        }
    }
}
