use thiserror::Error;

pub type PresenceResult<T> = Result<T, PresenceError>;

/// Validation and state-precondition failures per the error design: each
/// maps to one `error` envelope addressed only to the caller, with no state
/// change.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PresenceError {
    #[error("username must not be empty or whitespace")]
    EmptyUsername,

    #[error("server id must not be empty")]
    EmptyServerId,

    #[error("channel name must not be empty")]
    EmptyChannelName,

    #[error("channel name exceeds 50 bytes")]
    ChannelNameTooLong,

    #[error("unknown session")]
    UnknownSession,

    #[error("session is not connected to server {0}")]
    NotConnectedToServer(String),

    #[error("channel {0} not found")]
    ChannelNotFound(i64),

    #[error("session is in zero or multiple servers; a single-server context could not be resolved")]
    AmbiguousServerContext,
}
