pub mod config;
pub mod core;
pub mod errors;
pub mod ids;
pub mod scope;
pub mod session;

pub use config::PresenceConfig;
pub use core::PresenceCore;
pub use errors::{PresenceError, PresenceResult};
pub use ids::{next_channel_id, next_session_id, ChannelId, SessionId};
pub use scope::{Channel, ServerScope};
pub use session::{Session, VoiceBinding};
