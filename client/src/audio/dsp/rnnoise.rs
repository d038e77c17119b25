//! RNNoise-based noise suppression using the `nnnoiseless` crate.
//!
//! RNNoise processes 480-sample frames (10ms at 48kHz) and, per its C
//! heritage, expects samples on the int16 amplitude scale rather than the
//! normalized `[-1.0, 1.0]` range the rest of this pipeline uses — this
//! module is the one place that rescales across that boundary.

use nnnoiseless::DenoiseState;

const SCALE: f32 = 32768.0;

pub struct Denoiser {
    state: Box<DenoiseState<'static>>,
    last_vad: f32,
    scaled_buf: Vec<f32>,
}

impl Denoiser {
    pub fn new() -> Self {
        Self { state: DenoiseState::new(), last_vad: 0.0, scaled_buf: vec![0.0; DenoiseState::FRAME_SIZE] }
    }

    /// Process a frame of normalized f32 PCM in-place. The frame length
    /// must be a multiple of 480 (RNNoise's frame size). Returns the VAD
    /// probability of the last sub-frame processed.
    pub fn process_frame(&mut self, pcm: &mut [f32]) -> f32 {
        let frame_size = DenoiseState::FRAME_SIZE; // 480
        let mut vad = 0.0f32;

        for chunk in pcm.chunks_mut(frame_size) {
            if chunk.len() < frame_size {
                break; // skip partial tail
            }

            for (i, &s) in chunk.iter().enumerate() {
                self.scaled_buf[i] = s * SCALE;
            }

            let mut output = vec![0.0f32; frame_size];
            vad = self.state.process_frame(&mut output, &self.scaled_buf);

            for (i, out) in output.iter().enumerate() {
                chunk[i] = (out / SCALE).clamp(-1.0, 1.0);
            }
        }

        self.last_vad = vad;
        vad
    }

    /// Last VAD probability from the most recent `process_frame` call.
    pub fn last_vad(&self) -> f32 {
        self.last_vad
    }
}
