//! bken-client: a demonstration binary for the audio pipeline and
//! transport crates. No GUI; no CLI flags. Connects, exchanges voice with
//! whoever else joins the same channel, and reconnects with backoff on
//! failure.

mod audio;
mod config;
mod net;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use bken_wire::ControlEnvelope;
use config::Config;
use net::ClientTransport;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into())).init();

    let cfg = Config::from_env()?;
    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("ctrl-c received, shutting down");
            shutdown.store(true, Ordering::Relaxed);
        });
    }

    let mut backoff = Backoff::new(Duration::from_millis(250), Duration::from_secs(10));
    while !shutdown.load(Ordering::Relaxed) {
        match run_session(&cfg, &shutdown).await {
            Ok(()) => backoff.reset(),
            Err(e) => {
                warn!(error = %e, "session ended, reconnecting");
                backoff.sleep().await;
            }
        }
    }
    Ok(())
}

async fn run_session(cfg: &Config, shutdown: &Arc<AtomicBool>) -> Result<()> {
    let (events_tx, mut events_rx) = mpsc::channel::<ControlEnvelope>(256);
    let (voice_tx, voice_rx) = mpsc::channel(256);
    let (encoded_tx, mut encoded_rx) = mpsc::channel(64);

    let transport = Arc::new(ClientTransport::connect(&cfg.addr, &cfg.username, events_tx, voice_tx).await?);
    info!(addr = %cfg.addr, username = %cfg.username, "connected");

    let engine = audio::AudioEngine::start(encoded_tx, voice_rx)?;

    let send_task = {
        let transport = transport.clone();
        tokio::spawn(async move {
            while let Some(mut frame) = encoded_rx.recv().await {
                frame.seq = transport.next_seq();
                if transport.send_audio(frame).await.is_err() {
                    return;
                }
            }
        })
    };

    loop {
        tokio::select! {
            env = events_rx.recv() => {
                match env {
                    Some(env) => handle_event(env),
                    None => break,
                }
            }
            _ = sleep(Duration::from_millis(500)) => {
                if shutdown.load(Ordering::Relaxed) {
                    break;
                }
            }
        }
    }

    send_task.abort();
    engine.stop().await;
    if let Ok(transport) = Arc::try_unwrap(transport) {
        transport.disconnect().await;
    }
    Ok(())
}

fn handle_event(env: ControlEnvelope) {
    match env.kind.as_str() {
        "error" => warn!(error = ?env.error, "server error"),
        "snapshot" | "user_joined" | "user_left" | "user_state" | "channel_list" | "text_message" | "message_history" | "server_info" => {
            info!(kind = %env.kind, "{:?}", env);
        }
        "speaking" | "nack" | "pong" => {} // high-frequency, not worth logging
        _ => {}
    }
}

/// Exponential backoff with jitter.
struct Backoff {
    min: Duration,
    max: Duration,
    cur: Duration,
}

impl Backoff {
    fn new(min: Duration, max: Duration) -> Self {
        Self { min, max, cur: min }
    }
    fn reset(&mut self) {
        self.cur = self.min;
    }
    async fn sleep(&mut self) {
        let jitter = rand::random::<u64>() % 150;
        sleep(self.cur + Duration::from_millis(jitter)).await;
        self.cur = (self.cur * 2).min(self.max);
    }
}
