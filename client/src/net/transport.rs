use std::collections::HashMap;
use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use bken_wire::{parse_voice_datagram, write_voice_datagram, ControlEnvelope};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex as SyncMutex;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{interval, timeout, Instant};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::warn;

use crate::audio::{EncodedFrame, ReceivedFrame};

const DIAL_TIMEOUT: Duration = Duration::from_secs(10);
const PING_INTERVAL: Duration = Duration::from_secs(2);
const PONG_TIMEOUT: Duration = Duration::from_secs(6);
const SPEAKING_THROTTLE: Duration = Duration::from_millis(80);
const PRUNE_EVERY_PACKETS: u32 = 500;
const SILENCE_PRUNE: Duration = Duration::from_secs(30);
const RTT_ALPHA: f64 = 0.125;
const JITTER_GAIN: f64 = 1.0 / 16.0;
const NACK_MAX_GAP: i32 = 5;

pub enum DisconnectReason {
    PongTimeout,
    SocketClosed,
    SendFailure,
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PongTimeout => write!(f, "pong timeout"),
            Self::SocketClosed => write!(f, "socket closed"),
            Self::SendFailure => write!(f, "send failure"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionQuality {
    Good,
    Moderate,
    Poor,
}

#[derive(Clone, Debug, Default)]
pub struct TransportMetrics {
    pub rtt_ms: f64,
    pub jitter_ms: f64,
    pub loss_fraction: f64,
}

impl TransportMetrics {
    pub fn quality(&self) -> ConnectionQuality {
        if self.loss_fraction < 0.02 && self.rtt_ms < 150.0 && self.jitter_ms < 30.0 {
            ConnectionQuality::Good
        } else if self.loss_fraction < 0.05 && self.rtt_ms < 300.0 && self.jitter_ms < 60.0 {
            ConnectionQuality::Moderate
        } else {
            ConnectionQuality::Poor
        }
    }
}

struct SenderStats {
    last_seq: Option<u16>,
    last_arrival: Instant,
    jitter_ms: f64,
    received: u64,
    expected: u64,
    packets_since_prune: u32,
}

impl SenderStats {
    fn new() -> Self {
        Self { last_seq: None, last_arrival: Instant::now(), jitter_ms: 0.0, received: 0, expected: 0, packets_since_prune: 0 }
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Control channel (reliable, newline-JSON) plus voice datagram channel
/// (binary), both multiplexed over one WebSocket connection. One shared
/// writer serializes every outbound frame; one reader task dispatches
/// inbound text to a push-event channel and inbound binary to the audio
/// engine's playback queue.
pub struct ClientTransport {
    writer: Arc<Mutex<futures_util::stream::SplitSink<WsStream, Message>>>,
    sender_id: u16,
    seq: AtomicU16,
    metrics: Arc<SyncMutex<TransportMetrics>>,
    last_pong: Arc<AtomicU64>,
    reader_task: tokio::task::JoinHandle<()>,
    ping_task: tokio::task::JoinHandle<()>,
}

impl ClientTransport {
    /// Dials `addr`, sends `hello`, and launches the reader and ping-loop
    /// tasks. `events_tx` receives every non-voice `ControlEnvelope` the
    /// server pushes; `voice_tx` receives decoded datagrams for the audio
    /// engine's jitter buffer.
    pub async fn connect(
        addr: &str,
        username: &str,
        events_tx: mpsc::Sender<ControlEnvelope>,
        voice_tx: mpsc::Sender<ReceivedFrame>,
    ) -> Result<Self> {
        let url = format!("ws://{addr}/ws");
        let (ws, _resp) = timeout(DIAL_TIMEOUT, tokio_tungstenite::connect_async(&url))
            .await
            .context("dial timed out")??;

        let (mut sink, mut stream) = ws.split();

        let hello = ControlEnvelope::new("hello").with_username(username);
        let mut line = hello.to_line()?;
        line.pop(); // WS framing already delimits messages
        sink.send(Message::Text(String::from_utf8_lossy(&line).into_owned())).await.context("send hello")?;

        let snapshot = timeout(DIAL_TIMEOUT, stream.next()).await.context("snapshot timed out")?.ok_or_else(|| anyhow!("server closed during hello"))??;
        let snapshot = match snapshot {
            Message::Text(t) => ControlEnvelope::from_line(t.as_bytes())?,
            _ => return Err(anyhow!("expected text snapshot after hello")),
        };
        if snapshot.kind == "error" {
            return Err(anyhow!("hello rejected: {}", snapshot.error.unwrap_or_default()));
        }

        let writer = Arc::new(Mutex::new(sink));
        let metrics = Arc::new(SyncMutex::new(TransportMetrics::default()));
        let last_pong = Arc::new(AtomicU64::new(now_ms() as u64));
        let last_ping_sent = Arc::new(AtomicU64::new(now_ms() as u64));

        let reader_task = spawn_reader(stream, events_tx, voice_tx, metrics.clone(), last_pong.clone(), last_ping_sent.clone());
        let ping_task = spawn_ping_loop(writer.clone(), last_pong.clone(), last_ping_sent.clone());

        Ok(Self { writer, sender_id: rand::random(), seq: AtomicU16::new(0), metrics, last_pong, reader_task, ping_task })
    }

    pub fn sender_id(&self) -> u16 {
        self.sender_id
    }

    pub async fn send_control(&self, env: &ControlEnvelope) -> Result<()> {
        let mut line = env.to_line()?;
        line.pop();
        let mut w = self.writer.lock().await;
        w.send(Message::Text(String::from_utf8_lossy(&line).into_owned())).await.context("send control")?;
        Ok(())
    }

    /// Builds the 4-byte voice header with a locally-assigned sender id
    /// and atomic sequence number, then sends it as a binary WS frame. The
    /// server never trusts this sender id; it rewrites it at relay time.
    pub async fn send_audio(&self, frame: EncodedFrame) -> Result<()> {
        let datagram = write_voice_datagram(self.sender_id, frame.seq, &frame.opus)?;
        let mut w = self.writer.lock().await;
        w.send(Message::Binary(datagram.to_vec())).await.context("send audio")?;
        Ok(())
    }

    pub fn next_seq(&self) -> u16 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    pub fn get_metrics(&self) -> TransportMetrics {
        self.metrics.lock().clone()
    }

    /// Closes the control socket and cancels the reader/ping tasks.
    pub async fn disconnect(self) {
        let _ = self.writer.lock().await.close().await;
        self.reader_task.abort();
        self.ping_task.abort();
    }
}

fn spawn_ping_loop(
    writer: Arc<Mutex<futures_util::stream::SplitSink<WsStream, Message>>>,
    last_pong: Arc<AtomicU64>,
    last_ping_sent: Arc<AtomicU64>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(PING_INTERVAL);
        loop {
            ticker.tick().await;
            let sent_at = now_ms();
            let ping = ControlEnvelope { kind: "ping".into(), ts: Some(sent_at), ..Default::default() };
            let mut line = match ping.to_line() {
                Ok(l) => l,
                Err(_) => continue,
            };
            line.pop();
            last_ping_sent.store(sent_at as u64, Ordering::Relaxed);
            {
                let mut w = writer.lock().await;
                if w.send(Message::Text(String::from_utf8_lossy(&line).into_owned())).await.is_err() {
                    return;
                }
            }
            let last = last_pong.load(Ordering::Relaxed) as i64;
            if sent_at - last > PONG_TIMEOUT.as_millis() as i64 {
                warn!("no pong within {:?}, disconnecting", PONG_TIMEOUT);
                let _ = writer.lock().await.close().await;
                return;
            }
        }
    })
}

fn spawn_reader(
    mut stream: futures_util::stream::SplitStream<WsStream>,
    events_tx: mpsc::Sender<ControlEnvelope>,
    voice_tx: mpsc::Sender<ReceivedFrame>,
    metrics: Arc<SyncMutex<TransportMetrics>>,
    last_pong: Arc<AtomicU64>,
    last_ping_sent: Arc<AtomicU64>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut stats: HashMap<u16, SenderStats> = HashMap::new();
        let mut last_speaking_update: HashMap<u16, Instant> = HashMap::new();

        while let Some(msg) = stream.next().await {
            let msg = match msg {
                Ok(m) => m,
                Err(e) => {
                    warn!(error = %e, "transport read error");
                    return;
                }
            };
            match msg {
                Message::Text(t) => {
                    let env = match ControlEnvelope::from_line(t.as_bytes()) {
                        Ok(e) => e,
                        Err(e) => {
                            warn!(error = %e, "malformed envelope");
                            continue;
                        }
                    };
                    if env.kind == "pong" {
                        let now = now_ms();
                        last_pong.store(now as u64, Ordering::Relaxed);
                        let sent = last_ping_sent.load(Ordering::Relaxed) as i64;
                        let rtt = (now - sent).max(0) as f64;
                        let mut m = metrics.lock();
                        m.rtt_ms = m.rtt_ms * (1.0 - RTT_ALPHA) + rtt * RTT_ALPHA;
                        continue;
                    }
                    if events_tx.send(env).await.is_err() {
                        return;
                    }
                }
                Message::Binary(data) => {
                    let (sender_id, seq, opus) = match parse_voice_datagram(&data) {
                        Ok(v) => v,
                        Err(e) => {
                            warn!(error = %e, "malformed voice datagram");
                            continue;
                        }
                    };
                    let now = Instant::now();

                    // Drop senders that have gone quiet before folding in this packet.
                    stats.retain(|_, s| now.duration_since(s.last_arrival) <= SILENCE_PRUNE);

                    let entry = stats.entry(sender_id).or_insert_with(SenderStats::new);
                    entry.received += 1;
                    entry.packets_since_prune += 1;

                    if let Some(last_seq) = entry.last_seq {
                        let gap = (seq.wrapping_sub(last_seq) as i16) as i32;
                        if gap > 1 && gap - 1 <= NACK_MAX_GAP {
                            entry.expected += (gap - 1) as u64;
                            // a nack for a short, recoverable gap: the sender
                            // may still have these frames' FEC payload on the wire
                            let missing: Vec<u16> = (1..gap).map(|d| last_seq.wrapping_add(d as u16)).collect();
                            let nack = ControlEnvelope { kind: "nack".into(), missing: Some(missing), ..Default::default() };
                            let _ = events_tx.try_send(nack);
                        }
                        let inter_arrival = now.duration_since(entry.last_arrival).as_secs_f64() * 1000.0;
                        let expected_interval = 20.0; // ms, one frame per tick
                        let d = (inter_arrival - expected_interval).abs();
                        entry.jitter_ms += (d - entry.jitter_ms) * JITTER_GAIN;
                    }
                    entry.last_seq = Some(seq);
                    entry.last_arrival = now;

                    if entry.packets_since_prune >= PRUNE_EVERY_PACKETS {
                        entry.packets_since_prune = 0;
                        entry.received = 0;
                        entry.expected = 0;
                    }

                    let worst_jitter = stats.values().map(|s| s.jitter_ms).fold(0.0, f64::max);
                    let total_loss = {
                        let (recv, exp): (u64, u64) = stats.values().map(|s| (s.received, s.received + s.expected)).fold((0, 0), |(ar, ae), (r, e)| (ar + r, ae + e));
                        if exp == 0 { 0.0 } else { 1.0 - (recv as f64 / exp as f64) }
                    };
                    {
                        let mut m = metrics.lock();
                        m.jitter_ms = worst_jitter;
                        m.loss_fraction = total_loss;
                    }

                    let should_notify_speaking = last_speaking_update
                        .get(&sender_id)
                        .map(|t| now.duration_since(*t) >= SPEAKING_THROTTLE)
                        .unwrap_or(true);
                    if should_notify_speaking {
                        last_speaking_update.insert(sender_id, now);
                        let speaking = ControlEnvelope { kind: "speaking".into(), self_id: Some(sender_id.to_string()), ..Default::default() };
                        let _ = events_tx.try_send(speaking);
                    }

                    let frame = ReceivedFrame { sender_id, seq, opus: Bytes::copy_from_slice(opus) };
                    if voice_tx.send(frame).await.is_err() {
                        return;
                    }
                }
                Message::Close(_) => return,
                _ => {}
            }
        }
    })
}

fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as i64
}
