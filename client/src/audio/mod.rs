pub mod capture;
pub mod dsp;
pub mod jitter;
pub mod opus;
pub mod playout;

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

use anyhow::Result;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::{interval, Duration};

use capture::Capture;
use dsp::{CaptureDsp, PlayoutDsp};
use jitter::JitterBuffer;
use opus::OpusCodec;
use playout::Playout;

pub const SAMPLE_RATE: u32 = 48_000;
pub const CHANNELS: u16 = 1;
pub const FRAME_MS: u32 = 20;
pub const FRAME_SAMPLES: usize = (SAMPLE_RATE as usize * FRAME_MS as usize / 1000) * CHANNELS as usize;

/// A 20ms frame of encoded Opus ready to send over the voice channel.
pub struct EncodedFrame {
    pub seq: u16,
    pub opus: Bytes,
}

/// A datagram received off the wire, ready for jitter-buffered playback.
pub struct ReceivedFrame {
    pub sender_id: u16,
    pub seq: u16,
    pub opus: Bytes,
}

/// Owns the capture, DSP, encode, jitter, decode, and playout chain. One
/// capture task produces `EncodedFrame`s on a channel the transport drains;
/// one playback task drains `ReceivedFrame`s the transport's reader pushes.
pub struct AudioEngine {
    capture: Arc<Capture>,
    playout: Arc<Playout>,
    encode_seq: AtomicU16,
    capture_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    playback_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl AudioEngine {
    pub fn start(encoded_tx: mpsc::Sender<EncodedFrame>, mut received_rx: mpsc::Receiver<ReceivedFrame>) -> Result<Arc<Self>> {
        let capture = Arc::new(Capture::start(SAMPLE_RATE, CHANNELS, FRAME_MS)?);
        let playout = Arc::new(Playout::start(SAMPLE_RATE, CHANNELS)?);

        let engine = Arc::new(Self {
            capture: capture.clone(),
            playout: playout.clone(),
            encode_seq: AtomicU16::new(0),
            capture_task: Mutex::new(None),
            playback_task: Mutex::new(None),
        });

        let capture_handle = {
            let capture = capture.clone();
            let engine = engine.clone();
            tokio::spawn(async move {
                let mut codec = match OpusCodec::new(SAMPLE_RATE, CHANNELS as u8) {
                    Ok(c) => c,
                    Err(e) => {
                        tracing::warn!(error = %e, "opus encoder init failed, capture task exiting");
                        return;
                    }
                };
                let mut dsp = match CaptureDsp::new(SAMPLE_RATE) {
                    Ok(d) => d,
                    Err(e) => {
                        tracing::warn!(error = %e, "capture dsp init failed, capture task exiting");
                        return;
                    }
                };
                let mut pcm = vec![0f32; FRAME_SAMPLES];
                let mut enc_out = vec![0u8; 4000];
                let mut tick = interval(Duration::from_millis(FRAME_MS as u64));

                loop {
                    tick.tick().await;
                    if !capture.read_frame(&mut pcm) {
                        continue; // underrun: skip this tick, don't stall the loop
                    }
                    dsp.process_frame(&mut pcm);
                    if !dsp.is_voice_active() {
                        continue;
                    }
                    let n = match codec.encode(&pcm, &mut enc_out) {
                        Ok(n) => n,
                        Err(e) => {
                            tracing::warn!(error = %e, "opus encode failed, dropping frame");
                            continue;
                        }
                    };
                    let seq = engine.encode_seq.fetch_add(1, Ordering::Relaxed);
                    let frame = EncodedFrame { seq, opus: Bytes::copy_from_slice(&enc_out[..n]) };
                    if encoded_tx.send(frame).await.is_err() {
                        return; // transport gone
                    }
                }
            })
        };

        let playback_handle = {
            let playout = playout.clone();
            tokio::spawn(async move {
                let mut codec = match OpusCodec::new(SAMPLE_RATE, CHANNELS as u8) {
                    Ok(c) => c,
                    Err(e) => {
                        tracing::warn!(error = %e, "opus decoder init failed, playback task exiting");
                        return;
                    }
                };
                let mut dsp = PlayoutDsp::new();
                let mut jitter = JitterBuffer::new(2);
                let mut pcm_out = vec![0f32; FRAME_SAMPLES];
                let mut tick = interval(Duration::from_millis(FRAME_MS as u64));

                loop {
                    tokio::select! {
                        frame = received_rx.recv() => {
                            match frame {
                                Some(f) => jitter.push(f.sender_id, f.seq, f.opus),
                                None => return,
                            }
                        }
                        _ = tick.tick() => {
                            for tagged in jitter.pop() {
                                let decoded = match (tagged.opus, tagged.fec_source) {
                                    (Some(bytes), _) => codec.decode(&bytes, &mut pcm_out),
                                    (None, Some(next)) => codec.decode_fec(&next, &mut pcm_out),
                                    (None, None) => codec.decode_plc(&mut pcm_out),
                                };
                                match decoded {
                                    Ok(n) if n > 0 => {
                                        dsp.process_frame(&mut pcm_out[..n]);
                                        playout.push_pcm(&pcm_out[..n]);
                                    }
                                    Ok(_) => {}
                                    Err(e) => tracing::warn!(error = %e, "opus decode failed, skipping frame"),
                                }
                            }
                        }
                    }
                }
            })
        };

        *engine.capture_task.lock() = Some(capture_handle);
        *engine.playback_task.lock() = Some(playback_handle);
        Ok(engine)
    }

    /// Stop-then-join-then-close: pauses both audio streams, aborts the
    /// capture/playback tasks, and awaits them before returning.
    pub async fn stop(&self) {
        let _ = self.capture.stop();
        let _ = self.playout.stop();
        if let Some(h) = self.capture_task.lock().take() {
            h.abort();
            let _ = h.await;
        }
        if let Some(h) = self.playback_task.lock().take() {
            h.abort();
            let _ = h.await;
        }
    }
}
