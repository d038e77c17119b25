use serde::{Deserialize, Deserializer, Serialize};

/// Maximum size of one newline-framed envelope, including the trailing `\n`.
pub const MAX_ENVELOPE_BYTES: usize = 1024 * 1024;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VoiceBinding {
    pub server_id: String,
    pub channel_id: String,
    #[serde(default)]
    pub muted: bool,
    #[serde(default)]
    pub deafened: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub connected_servers: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<VoiceBinding>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Channel {
    pub id: i64,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_users: Option<i64>,
}

/// The polymorphic control envelope. On the wire this is one flat JSON object
/// per line; callers should match on `kind` first and only then look at the
/// fields relevant to that type, rather than treating every field as always
/// meaningful.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ControlEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_opt_channel_id"
    )]
    pub channel_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub self_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ts: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msg_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub users: Option<Vec<User>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channels: Option<Vec<Channel>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<VoiceBinding>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub muted: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deafened: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missing: Option<Vec<u16>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    S(String),
    N(i64),
}

fn deserialize_opt_channel_id<'de, D>(de: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let v: Option<StringOrNumber> = Option::deserialize(de)?;
    Ok(v.map(|x| match x {
        StringOrNumber::S(s) => s,
        StringOrNumber::N(n) => n.to_string(),
    }))
}

impl ControlEnvelope {
    pub fn new(kind: impl Into<String>) -> Self {
        Self { kind: kind.into(), ..Default::default() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self { kind: "error".into(), error: Some(message.into()), ..Default::default() }
    }

    pub fn with_username(mut self, v: impl Into<String>) -> Self {
        self.username = Some(v.into());
        self
    }

    pub fn with_server_id(mut self, v: impl Into<String>) -> Self {
        self.server_id = Some(v.into());
        self
    }

    pub fn with_channel_id(mut self, v: impl Into<String>) -> Self {
        self.channel_id = Some(v.into());
        self
    }

    pub fn with_message(mut self, v: impl Into<String>) -> Self {
        self.message = Some(v.into());
        self
    }

    /// Serialize to a single newline-terminated JSON line.
    pub fn to_line(&self) -> serde_json::Result<Vec<u8>> {
        let mut buf = serde_json::to_vec(self)?;
        buf.push(b'\n');
        Ok(buf)
    }

    /// Parse one line (without the trailing newline). Rejects oversized input.
    pub fn from_line(line: &[u8]) -> Result<Self, EnvelopeError> {
        if line.len() > MAX_ENVELOPE_BYTES {
            return Err(EnvelopeError::TooLarge(line.len()));
        }
        Ok(serde_json::from_slice(line)?)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum EnvelopeError {
    #[error("envelope of {0} bytes exceeds the 1 MiB limit")]
    TooLarge(usize),
    #[error("malformed envelope: {0}")]
    Json(#[from] serde_json::Error),
}
