use std::collections::BTreeSet;
use std::time::Instant;

use bken_wire::{User, VoiceBinding as WireVoiceBinding};
use tokio::sync::mpsc;

use crate::ids::{ChannelId, SessionId};

/// At most one voice binding per session, mutated only under the registry
/// write lock.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VoiceBinding {
    pub server_id: String,
    pub channel_id: ChannelId,
    pub muted: bool,
    pub deafened: bool,
}

/// One connected client, owned exclusively by `PresenceCore`. Never handed
/// out by reference; every accessor returns a snapshot copy.
pub struct Session {
    pub id: SessionId,
    pub username: String,
    pub outbound: mpsc::Sender<bken_wire::ControlEnvelope>,
    pub servers: BTreeSet<String>,
    pub voice: Option<VoiceBinding>,
    pub last_activity: Instant,
}

impl Session {
    pub fn to_wire(&self) -> User {
        User {
            id: self.id.to_string(),
            username: self.username.clone(),
            connected_servers: self.servers.iter().cloned().collect(),
            voice: self.voice.as_ref().map(|v| WireVoiceBinding {
                server_id: v.server_id.clone(),
                channel_id: v.channel_id.to_string(),
                muted: v.muted,
                deafened: v.deafened,
            }),
        }
    }
}
