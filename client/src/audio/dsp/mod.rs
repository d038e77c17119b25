//! DSP pipeline: AEC, noise gate, RNNoise suppression, and AGC.
//!
//! Processing chain (capture path), per the 20ms capture loop:
//!   Mic PCM → AEC (echo cancellation) → noise gate (energy VAD) →
//!   RNNoise (suppression + VAD) → AGC (normalize) → output
//!
//! Processing chain (playout path):
//!   Network PCM → AGC (normalize) → speaker
//!
//! All stages operate on normalized `f32` in `[-1.0, 1.0]`.

pub mod aec;
pub mod agc;
pub mod rnnoise;
pub mod vad;

use anyhow::Result;

use aec::Aec;
use agc::Agc;
use rnnoise::Denoiser;

/// Full DSP pipeline for the capture (microphone) path.
pub struct CaptureDsp {
    aec: Aec,
    denoiser: Denoiser,
    agc: Agc,
    gate_threshold_db: f32,
    vad_threshold: f32,
}

impl CaptureDsp {
    /// Create a new capture DSP pipeline.
    /// `sample_rate` must be 48000 (RNNoise requirement).
    pub fn new(sample_rate: u32) -> Result<Self> {
        anyhow::ensure!(sample_rate == 48000, "RNNoise requires 48kHz");
        Ok(Self {
            aec: Aec::new(4800, 0.5),
            denoiser: Denoiser::new(),
            agc: Agc::new(-18.0, 0.3),
            gate_threshold_db: -50.0,
            vad_threshold: 0.5,
        })
    }

    /// Feed reference (playout) audio to the AEC so it can model the echo
    /// path. Call whenever audio is pushed to the speaker.
    pub fn feed_reference(&mut self, reference: &[f32]) {
        self.aec.feed_reference(reference);
    }

    /// Process a frame of normalized f32 PCM in-place, through the full
    /// AEC → gate → suppression → AGC chain. Frame must be a multiple of
    /// 480 samples (10ms at 48kHz) for RNNoise. Returns the RNNoise VAD
    /// probability of the last sub-frame processed.
    pub fn process_frame(&mut self, pcm: &mut [f32]) -> f32 {
        self.aec.process(pcm);

        let pre_gate_voice = vad::energy_vad(pcm, self.gate_threshold_db);
        vad::gate(pcm, pre_gate_voice);

        let vad_prob = self.denoiser.process_frame(pcm);
        self.agc.process(pcm);
        vad_prob
    }

    /// Returns true if the last processed frame had voice activity.
    pub fn is_voice_active(&self) -> bool {
        self.denoiser.last_vad() >= self.vad_threshold
    }

    /// Set the VAD threshold (0.0 = always active, 1.0 = very strict).
    pub fn set_vad_threshold(&mut self, threshold: f32) {
        self.vad_threshold = threshold.clamp(0.0, 1.0);
    }

    /// Set the AGC target level in dBFS (e.g., -18.0).
    pub fn set_agc_target(&mut self, target_db: f32) {
        self.agc.set_target(target_db);
    }

    pub fn last_vad_probability(&self) -> f32 {
        self.denoiser.last_vad()
    }
}

/// DSP pipeline for the playout (speaker) path.
pub struct PlayoutDsp {
    agc: Agc,
}

impl PlayoutDsp {
    pub fn new() -> Self {
        Self { agc: Agc::new(-14.0, 0.2) }
    }

    /// Normalize playout volume.
    pub fn process_frame(&mut self, pcm: &mut [f32]) {
        self.agc.process(pcm);
    }
}
