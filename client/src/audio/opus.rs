use anyhow::Result;

/// Wraps the Opus encoder/decoder at the one point in the pipeline where
/// samples are int16: everything upstream and downstream of this struct is
/// f32.
pub struct OpusCodec {
    enc: opus::Encoder,
    dec: opus::Decoder,
}

impl OpusCodec {
    pub fn new(sample_rate: u32, channels: u8) -> Result<Self> {
        let ch = if channels == 2 { opus::Channels::Stereo } else { opus::Channels::Mono };
        let mut enc = opus::Encoder::new(sample_rate, ch, opus::Application::Voip)?;
        enc.set_bitrate(opus::Bitrate::Bits(32_000))?;
        enc.set_inband_fec(true)?;
        enc.set_packet_loss_perc(10)?;
        enc.set_dtx(true)?;
        let dec = opus::Decoder::new(sample_rate, ch)?;
        Ok(Self { enc, dec })
    }

    pub fn set_bitrate(&mut self, bits_per_sec: i32) -> Result<()> {
        Ok(self.enc.set_bitrate(opus::Bitrate::Bits(bits_per_sec))?)
    }

    pub fn set_packet_loss_hint(&mut self, percent: u8) -> Result<()> {
        Ok(self.enc.set_packet_loss_perc(percent)?)
    }

    pub fn encode(&mut self, pcm: &[f32], out: &mut [u8]) -> Result<usize> {
        Ok(self.enc.encode_float(pcm, out)?)
    }

    /// Decodes one frame normally.
    pub fn decode(&mut self, data: &[u8], pcm_out: &mut [f32]) -> Result<usize> {
        Ok(self.dec.decode_float(data, pcm_out, false)?)
    }

    /// Recovers a lost frame from the in-band FEC carried by the *next*
    /// frame's bytes. Caller must already hold the next packet.
    pub fn decode_fec(&mut self, next_frame: &[u8], pcm_out: &mut [f32]) -> Result<usize> {
        Ok(self.dec.decode_float(next_frame, pcm_out, true)?)
    }

    /// Packet-loss concealment: synthesizes a plausible frame with no
    /// payload at all, for when neither the frame nor FEC recovery is
    /// available.
    pub fn decode_plc(&mut self, pcm_out: &mut [f32]) -> Result<usize> {
        Ok(self.dec.decode_float(&[], pcm_out, false)?)
    }
}
