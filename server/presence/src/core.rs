use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use bken_wire::ControlEnvelope;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::warn;

use crate::config::PresenceConfig;
use crate::errors::{PresenceError, PresenceResult};
use crate::ids::{next_session_id, ChannelId, SessionId};
use crate::scope::ServerScope;
use crate::session::{Session, VoiceBinding};

struct Inner {
    sessions: HashMap<SessionId, Session>,
    scopes: HashMap<String, ServerScope>,
}

/// The authoritative in-memory registry of connected sessions, the servers
/// they've joined, and the channel catalog and voice bindings per server.
/// Every mutation happens under the write lock; every fan-out collects the
/// outbound handles it needs under a read (or write) lock and then sends
/// after releasing it, so a slow subscriber never holds up the registry.
#[derive(Clone)]
pub struct PresenceCore {
    inner: Arc<RwLock<Inner>>,
    config: PresenceConfig,
}

impl PresenceCore {
    pub fn new(config: PresenceConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner { sessions: HashMap::new(), scopes: HashMap::new() })),
            config,
        }
    }

    pub fn config(&self) -> &PresenceConfig {
        &self.config
    }

    /// Registers a new session with a bounded outbound queue sized per config
    /// and returns its id, the receiving half of that queue, and a snapshot
    /// of every currently connected user (including the one just added).
    pub fn add(&self, username: String) -> PresenceResult<(SessionId, mpsc::Receiver<ControlEnvelope>, Vec<bken_wire::User>)> {
        if username.trim().is_empty() {
            return Err(PresenceError::EmptyUsername);
        }
        let id = next_session_id();
        let (tx, rx) = mpsc::channel(self.config.outbound_queue_size);
        let session = Session {
            id: id.clone(),
            username,
            outbound: tx,
            servers: Default::default(),
            voice: None,
            last_activity: Instant::now(),
        };
        let mut inner = self.inner.write();
        inner.sessions.insert(id.clone(), session);
        let users = inner.sessions.values().map(|s| s.to_wire()).collect();
        Ok((id, rx, users))
    }

    /// Removes a session, releasing its voice binding and membership, and
    /// returns the set of (server_id, departing user) pairs the caller
    /// should broadcast `user_left` for.
    pub fn remove(&self, session_id: &SessionId) -> Vec<(String, bken_wire::User)> {
        let mut inner = self.inner.write();
        let Some(session) = inner.sessions.remove(session_id) else {
            return Vec::new();
        };
        let user = session.to_wire();
        session.servers.iter().map(|s| (s.clone(), user.clone())).collect()
    }

    /// Snapshot of one session's wire-facing user record, reflecting its
    /// current server membership and voice binding.
    pub fn user_snapshot(&self, session_id: &SessionId) -> Option<bken_wire::User> {
        self.inner.read().sessions.get(session_id).map(|s| s.to_wire())
    }

    pub fn connect_server(&self, session_id: &SessionId, server_id: &str) -> PresenceResult<()> {
        if server_id.trim().is_empty() {
            return Err(PresenceError::EmptyServerId);
        }
        let mut inner = self.inner.write();
        inner
            .scopes
            .entry(server_id.to_string())
            .or_insert_with(|| ServerScope::seeded(self.config.seed_channel_name));
        let session = inner.sessions.get_mut(session_id).ok_or(PresenceError::UnknownSession)?;
        session.servers.insert(server_id.to_string());
        session.last_activity = Instant::now();
        Ok(())
    }

    /// Leaves a server, releasing the session's voice binding if it was
    /// parked in a channel on that server. Returns whether a voice binding
    /// was released so the caller can broadcast its cleared state.
    pub fn disconnect_server(&self, session_id: &SessionId, server_id: &str) -> PresenceResult<bool> {
        let mut inner = self.inner.write();
        let session = inner.sessions.get_mut(session_id).ok_or(PresenceError::UnknownSession)?;
        session.servers.remove(server_id);
        if session.voice.as_ref().map(|v| v.server_id.as_str()) == Some(server_id) {
            session.voice.take();
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Binds a session's voice to a channel, releasing any previous binding
    /// (even if it was in a different server). Exactly one voice binding may
    /// be live per session at a time. Returns the binding that was just
    /// released, if any, so the caller can broadcast its cleared state to
    /// the server it belonged to.
    pub fn join_voice(
        &self,
        session_id: &SessionId,
        server_id: &str,
        channel_id: ChannelId,
    ) -> PresenceResult<Option<VoiceBinding>> {
        let mut inner = self.inner.write();
        {
            let scope = inner.scopes.get(server_id).ok_or_else(|| PresenceError::NotConnectedToServer(server_id.to_string()))?;
            if !scope.has_channel(channel_id) {
                return Err(PresenceError::ChannelNotFound(channel_id.0));
            }
        }
        let session = inner.sessions.get_mut(session_id).ok_or(PresenceError::UnknownSession)?;
        if !session.servers.contains(server_id) {
            return Err(PresenceError::NotConnectedToServer(server_id.to_string()));
        }
        let previous = session.voice.take();
        session.voice = Some(VoiceBinding {
            server_id: server_id.to_string(),
            channel_id,
            muted: false,
            deafened: false,
        });
        Ok(previous)
    }

    /// Releases a session's voice binding, if any. A no-op (not an error) if
    /// the session was not in voice, since a client may race a disconnect
    /// against its own hang-up.
    pub fn disconnect_voice(&self, session_id: &SessionId) -> PresenceResult<Option<VoiceBinding>> {
        let mut inner = self.inner.write();
        let session = inner.sessions.get_mut(session_id).ok_or(PresenceError::UnknownSession)?;
        Ok(session.voice.take())
    }

    pub fn set_voice_flags(&self, session_id: &SessionId, muted: Option<bool>, deafened: Option<bool>) -> PresenceResult<()> {
        let mut inner = self.inner.write();
        let session = inner.sessions.get_mut(session_id).ok_or(PresenceError::UnknownSession)?;
        let voice = session.voice.as_mut().ok_or(PresenceError::UnknownSession)?;
        if let Some(m) = muted {
            voice.muted = m;
        }
        if let Some(d) = deafened {
            voice.deafened = d;
        }
        Ok(())
    }

    pub fn can_send_text(&self, session_id: &SessionId, server_id: &str) -> bool {
        self.inner
            .read()
            .sessions
            .get(session_id)
            .map(|s| s.servers.contains(server_id))
            .unwrap_or(false)
    }

    pub fn create_channel(&self, server_id: &str, name: String) -> PresenceResult<ChannelId> {
        validate_channel_name(&name)?;
        let mut inner = self.inner.write();
        let scope = inner.scopes.entry(server_id.to_string()).or_insert_with(|| ServerScope::seeded(self.config.seed_channel_name));
        Ok(scope.create_channel(name).id)
    }

    pub fn rename_channel(&self, server_id: &str, channel_id: ChannelId, name: String) -> PresenceResult<()> {
        validate_channel_name(&name)?;
        let mut inner = self.inner.write();
        let scope = inner.scopes.get_mut(server_id).ok_or_else(|| PresenceError::NotConnectedToServer(server_id.to_string()))?;
        if scope.rename_channel(channel_id, name) {
            Ok(())
        } else {
            Err(PresenceError::ChannelNotFound(channel_id.0))
        }
    }

    /// Deletes a channel and releases the voice binding of every session
    /// still parked in it, returning their ids so the caller can notify them.
    pub fn delete_channel(&self, server_id: &str, channel_id: ChannelId) -> PresenceResult<Vec<SessionId>> {
        let mut inner = self.inner.write();
        {
            let scope = inner.scopes.get_mut(server_id).ok_or_else(|| PresenceError::NotConnectedToServer(server_id.to_string()))?;
            if !scope.delete_channel(channel_id) {
                return Err(PresenceError::ChannelNotFound(channel_id.0));
            }
        }
        let mut evicted = Vec::new();
        for session in inner.sessions.values_mut() {
            if session.voice.as_ref().map(|v| v.channel_id) == Some(channel_id) {
                session.voice = None;
                evicted.push(session.id.clone());
            }
        }
        Ok(evicted)
    }

    pub fn channels(&self, server_id: &str) -> Vec<bken_wire::Channel> {
        self.inner
            .read()
            .scopes
            .get(server_id)
            .map(|s| s.channels().iter().map(|c| c.to_wire()).collect())
            .unwrap_or_default()
    }

    pub fn users_in_server(&self, server_id: &str) -> Vec<bken_wire::User> {
        self.inner
            .read()
            .sessions
            .values()
            .filter(|s| s.servers.contains(server_id))
            .map(|s| s.to_wire())
            .collect()
    }

    /// Resolves the single server a session is currently connected to. Used
    /// by operations whose envelope carries no explicit `server_id`.
    pub fn user_server(&self, session_id: &SessionId) -> PresenceResult<String> {
        let inner = self.inner.read();
        let session = inner.sessions.get(session_id).ok_or(PresenceError::UnknownSession)?;
        let mut it = session.servers.iter();
        match (it.next(), it.next()) {
            (Some(only), None) => Ok(only.clone()),
            _ => Err(PresenceError::AmbiguousServerContext),
        }
    }

    /// Sends one envelope directly to a session's outbound queue, dropping it
    /// (and logging) if the session is gone or its queue is saturated past
    /// the fan-out budget.
    pub async fn send_to(&self, session_id: &SessionId, envelope: ControlEnvelope) {
        let handle = self.inner.read().sessions.get(session_id).map(|s| s.outbound.clone());
        let Some(handle) = handle else {
            return;
        };
        send_bounded(&handle, envelope, self.config.fanout_budget, session_id.as_str()).await;
    }

    /// Sends one envelope to every connected session.
    pub async fn broadcast(&self, envelope: ControlEnvelope) {
        let handles: Vec<_> = self.inner.read().sessions.values().map(|s| (s.id.clone(), s.outbound.clone())).collect();
        fanout(handles, envelope, self.config.fanout_budget).await;
    }

    /// Sends one envelope to every connected session except `exclude`.
    pub async fn broadcast_except(&self, exclude: &SessionId, envelope: ControlEnvelope) {
        let handles: Vec<_> = self
            .inner
            .read()
            .sessions
            .values()
            .filter(|s| &s.id != exclude)
            .map(|s| (s.id.clone(), s.outbound.clone()))
            .collect();
        fanout(handles, envelope, self.config.fanout_budget).await;
    }

    /// Sends one envelope to every session connected to `server_id`.
    pub async fn broadcast_to_server(&self, server_id: &str, envelope: ControlEnvelope) {
        let handles: Vec<_> = self
            .inner
            .read()
            .sessions
            .values()
            .filter(|s| s.servers.contains(server_id))
            .map(|s| (s.id.clone(), s.outbound.clone()))
            .collect();
        fanout(handles, envelope, self.config.fanout_budget).await;
    }
}

fn validate_channel_name(name: &str) -> PresenceResult<()> {
    if name.trim().is_empty() {
        return Err(PresenceError::EmptyChannelName);
    }
    if name.len() > 50 {
        return Err(PresenceError::ChannelNameTooLong);
    }
    Ok(())
}

async fn send_bounded(tx: &mpsc::Sender<ControlEnvelope>, envelope: ControlEnvelope, budget: std::time::Duration, who: &str) {
    if tokio::time::timeout(budget, tx.send(envelope)).await.is_err() {
        warn!(session = who, "dropped envelope: outbound queue saturated past fan-out budget");
    }
}

async fn fanout(handles: Vec<(SessionId, mpsc::Sender<ControlEnvelope>)>, envelope: ControlEnvelope, budget: std::time::Duration) {
    for (id, tx) in handles {
        send_bounded(&tx, envelope.clone(), budget, id.as_str()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn core() -> PresenceCore {
        PresenceCore::new(PresenceConfig::default())
    }

    #[tokio::test]
    async fn add_then_connect_server_seeds_general_channel() {
        let core = core();
        let (id, _rx, _users) = core.add("alice".into()).unwrap();
        core.connect_server(&id, "srv1").unwrap();
        let chans = core.channels("srv1");
        assert_eq!(chans.len(), 1);
        assert_eq!(chans[0].name, "General");
    }

    #[tokio::test]
    async fn add_returns_a_snapshot_including_the_new_user() {
        let core = core();
        let (id, _rx, users) = core.add("alice".into()).unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].username, "alice");
        assert_eq!(users[0].id, id.to_string());

        let (_id2, _rx2, users) = core.add("bob".into()).unwrap();
        assert_eq!(users.len(), 2);
    }

    #[tokio::test]
    async fn join_voice_requires_server_membership() {
        let core = core();
        let (id, _rx, _users) = core.add("bob".into()).unwrap();
        let err = core.join_voice(&id, "srv1", ChannelId(1)).unwrap_err();
        assert_eq!(err, PresenceError::NotConnectedToServer("srv1".into()));
    }

    #[tokio::test]
    async fn voice_binding_moves_across_servers_releasing_the_prior_one() {
        let core = core();
        let (id, _rx, _users) = core.add("carol".into()).unwrap();
        core.connect_server(&id, "srv1").unwrap();
        core.connect_server(&id, "srv2").unwrap();
        let chan1 = core.channels("srv1")[0].id;
        let chan2 = core.channels("srv2")[0].id;
        let previous = core.join_voice(&id, "srv1", ChannelId(chan1)).unwrap();
        assert!(previous.is_none());
        let previous = core.join_voice(&id, "srv2", ChannelId(chan2)).unwrap();
        assert_eq!(previous.unwrap().server_id, "srv1");

        let users = core.users_in_server("srv2");
        let me = users.iter().find(|u| u.id == id.to_string()).unwrap();
        assert_eq!(me.voice.as_ref().unwrap().server_id, "srv2");
    }

    #[tokio::test]
    async fn create_channel_yields_two_channels_in_scope() {
        let core = core();
        let (id, _rx, _users) = core.add("dave".into()).unwrap();
        core.connect_server(&id, "srv1").unwrap();
        core.create_channel("srv1", "voice-1".into()).unwrap();
        assert_eq!(core.channels("srv1").len(), 2);
    }

    #[tokio::test]
    async fn remove_reports_every_server_the_session_had_joined() {
        let core = core();
        let (id, _rx, _users) = core.add("erin".into()).unwrap();
        core.connect_server(&id, "srv1").unwrap();
        core.connect_server(&id, "srv2").unwrap();
        let mut departures = core.remove(&id);
        departures.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(departures.len(), 2);
        assert_eq!(departures[0].0, "srv1");
        assert_eq!(departures[1].0, "srv2");
        assert!(departures.iter().all(|(_, u)| u.id == id.to_string()));
    }

    #[tokio::test]
    async fn disconnect_server_reports_whether_voice_was_released() {
        let core = core();
        let (id, _rx, _users) = core.add("frank".into()).unwrap();
        core.connect_server(&id, "srv1").unwrap();
        core.connect_server(&id, "srv2").unwrap();
        let chan1 = core.channels("srv1")[0].id;
        core.join_voice(&id, "srv1", ChannelId(chan1)).unwrap();

        let released = core.disconnect_server(&id, "srv2").unwrap();
        assert!(!released, "srv2 never held the voice binding");

        let released = core.disconnect_server(&id, "srv1").unwrap();
        assert!(released, "srv1 held the voice binding that just left");
    }
}
