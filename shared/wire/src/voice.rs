use bytes::{BufMut, Bytes, BytesMut};

/// `senderID(2) ‖ seq(2) ‖ opus payload`, big-endian, minimum 4 bytes total.
pub const HEADER_LEN: usize = 4;
pub const MAX_OPUS_BYTES: usize = 1275;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum VoiceDatagramError {
    #[error("datagram of {0} bytes is shorter than the 4-byte header")]
    TooShort(usize),
    #[error("opus payload of {0} bytes exceeds the 1275-byte maximum")]
    PayloadTooLarge(usize),
}

pub fn write_voice_datagram(sender_id: u16, seq: u16, opus: &[u8]) -> Result<Bytes, VoiceDatagramError> {
    if opus.len() > MAX_OPUS_BYTES {
        return Err(VoiceDatagramError::PayloadTooLarge(opus.len()));
    }
    let mut b = BytesMut::with_capacity(HEADER_LEN + opus.len());
    b.put_u16(sender_id);
    b.put_u16(seq);
    b.extend_from_slice(opus);
    Ok(b.freeze())
}

/// Returns `(senderID, seq, opus payload)`, or an error if `data` is shorter than 4 bytes.
pub fn parse_voice_datagram(data: &[u8]) -> Result<(u16, u16, &[u8]), VoiceDatagramError> {
    if data.len() < HEADER_LEN {
        return Err(VoiceDatagramError::TooShort(data.len()));
    }
    let sender_id = u16::from_be_bytes([data[0], data[1]]);
    let seq = u16::from_be_bytes([data[2], data[3]]);
    Ok((sender_id, seq, &data[HEADER_LEN..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let payload = [0xDE, 0xAD, 0xBE, 0xEF];
        let d = write_voice_datagram(42, 7, &payload).unwrap();
        assert_eq!(d.len(), 8);
        let (sender, seq, p) = parse_voice_datagram(&d).unwrap();
        assert_eq!((sender, seq, p), (42, 7, &payload[..]));
    }

    #[test]
    fn rejects_short_input() {
        for len in 0..HEADER_LEN {
            let buf = vec![0u8; len];
            assert_eq!(parse_voice_datagram(&buf), Err(VoiceDatagramError::TooShort(len)));
        }
    }

    #[test]
    fn rejects_oversized_payload() {
        let payload = vec![0u8; MAX_OPUS_BYTES + 1];
        assert!(write_voice_datagram(1, 1, &payload).is_err());
    }
}
