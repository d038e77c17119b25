use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "bken-gateway", about = "bken presence & voice-relay gateway")]
pub struct Config {
    /// Address the WebSocket endpoint (`/ws`) binds to.
    #[arg(long, env = "BKEN_LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: String,

    /// Address the Prometheus `/metrics` endpoint binds to.
    #[arg(long, env = "BKEN_METRICS_LISTEN", default_value = "0.0.0.0:9100")]
    pub metrics_listen: String,

    /// Bound on each session's outbound control queue.
    #[arg(long, default_value_t = 64)]
    pub outbound_queue_size: usize,
}
