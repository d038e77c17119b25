pub mod config;
pub mod gateway;
pub mod http;
pub mod labels;
pub mod presence;
pub mod voice;

pub use config::MetricsConfig;
pub use gateway::GatewayMetrics;
pub use http::MetricsServer;
pub use labels::{BoundedLabel, LabelPolicy};
pub use presence::PresenceMetrics;
pub use voice::VoiceMetrics;
