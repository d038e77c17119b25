//! Wire formats shared between the presence server and the desktop client:
//! the newline-delimited JSON control envelope and the binary voice datagram.

mod envelope;
mod voice;

pub use envelope::{
    Channel, ControlEnvelope, EnvelopeError, User, VoiceBinding, MAX_ENVELOPE_BYTES,
};
pub use voice::{parse_voice_datagram, write_voice_datagram, VoiceDatagramError, MAX_OPUS_BYTES};
