use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Opaque, strictly monotonic session identifier. Never reused within a
/// process lifetime, even after the session is removed.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(String);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl SessionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

pub fn next_session_id() -> SessionId {
    let n = NEXT_SESSION.fetch_add(1, Ordering::Relaxed);
    SessionId(format!("sess-{n}"))
}

/// Strictly monotonic channel identifier, never reused even after
/// `deleteChannel`. Scoped to the whole process, not per server.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub i64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

static NEXT_CHANNEL: AtomicI64 = AtomicI64::new(1);

pub fn next_channel_id() -> ChannelId {
    ChannelId(NEXT_CHANNEL.fetch_add(1, Ordering::Relaxed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_are_monotonic_and_unique() {
        let a = next_session_id();
        let b = next_session_id();
        assert_ne!(a, b);
    }

    #[test]
    fn channel_ids_are_monotonic() {
        let a = next_channel_id();
        let b = next_channel_id();
        assert!(b.0 > a.0);
    }
}
