use bken_wire::Channel as WireChannel;

use crate::ids::{next_channel_id, ChannelId};

#[derive(Clone, Debug)]
pub struct Channel {
    pub id: ChannelId,
    pub name: String,
    pub max_users: Option<i64>,
}

impl Channel {
    pub fn to_wire(&self) -> WireChannel {
        WireChannel { id: self.id.0, name: self.name.clone(), max_users: self.max_users }
    }
}

/// A logical sub-community, created implicitly when the first session joins
/// it. Holds an ordered list of channels, seeded with "General" at creation.
#[derive(Clone, Debug, Default)]
pub struct ServerScope {
    channels: Vec<Channel>,
}

impl ServerScope {
    pub fn seeded(seed_name: &str) -> Self {
        let mut scope = Self::default();
        scope.channels.push(Channel { id: next_channel_id(), name: seed_name.to_string(), max_users: None });
        scope
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn create_channel(&mut self, name: String) -> &Channel {
        self.channels.push(Channel { id: next_channel_id(), name, max_users: None });
        self.channels.last().unwrap()
    }

    pub fn rename_channel(&mut self, id: ChannelId, name: String) -> bool {
        if let Some(ch) = self.channels.iter_mut().find(|c| c.id == id) {
            ch.name = name;
            true
        } else {
            false
        }
    }

    pub fn delete_channel(&mut self, id: ChannelId) -> bool {
        let before = self.channels.len();
        self.channels.retain(|c| c.id != id);
        self.channels.len() != before
    }

    pub fn has_channel(&self, id: ChannelId) -> bool {
        self.channels.iter().any(|c| c.id == id)
    }
}
