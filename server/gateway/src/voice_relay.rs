use std::collections::HashMap;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bken_metrics::VoiceMetrics;
use bken_presence::ChannelId;
use bken_wire::write_voice_datagram;
use bytes::Bytes;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::time::timeout;

#[derive(Default)]
struct Inner {
    channels: HashMap<ChannelId, HashMap<u16, mpsc::Sender<Bytes>>>,
}

static NEXT_SENDER_ID: AtomicU16 = AtomicU16::new(1);

/// Forwards VoiceDatagram frames between the sessions sharing a voice
/// channel. Independent of `PresenceCore`: it only needs to know which
/// channel a seat belongs to, not the rest of the presence graph.
#[derive(Clone)]
pub struct VoiceRelay {
    inner: Arc<RwLock<Inner>>,
    fanout_budget: Duration,
}

/// A registered seat in a voice channel. Dropping it unregisters the seat,
/// so callers can rely on scope-exit cleanup on disconnect or channel
/// switch rather than remembering to call `leave` explicitly.
pub struct VoiceSeat {
    pub sender_id: u16,
    channel_id: ChannelId,
    relay: VoiceRelay,
}

impl VoiceRelay {
    pub fn new(fanout_budget: Duration) -> Self {
        Self { inner: Arc::new(RwLock::new(Inner::default())), fanout_budget }
    }

    /// Assigns a fresh, process-wide unique (modulo wraparound) numeric
    /// sender id and registers it in `channel_id`'s fan-out table.
    pub fn join(&self, channel_id: ChannelId, tx: mpsc::Sender<Bytes>) -> VoiceSeat {
        let sender_id = loop {
            let id = NEXT_SENDER_ID.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                break id;
            }
        };
        self.inner.write().channels.entry(channel_id).or_default().insert(sender_id, tx);
        VoiceSeat { sender_id, channel_id, relay: self.clone() }
    }

    fn leave(&self, channel_id: ChannelId, sender_id: u16) {
        if let Some(members) = self.inner.write().channels.get_mut(&channel_id) {
            members.remove(&sender_id);
        }
    }

    /// Relays one inbound datagram to every other seat in `channel_id`,
    /// always stamping the sender id the relay itself assigned (never the
    /// one read off the wire) and passing the sequence number through.
    pub async fn relay(&self, channel_id: ChannelId, sender_id: u16, seq: u16, opus: &[u8], metrics: &VoiceMetrics) {
        let Ok(framed) = write_voice_datagram(sender_id, seq, opus) else {
            metrics.drop_reason("invalid");
            return;
        };
        let handles: Vec<mpsc::Sender<Bytes>> = {
            let inner = self.inner.read();
            inner
                .channels
                .get(&channel_id)
                .map(|members| members.iter().filter(|(id, _)| **id != sender_id).map(|(_, tx)| tx.clone()).collect())
                .unwrap_or_default()
        };
        let fanout = handles.len();
        for tx in handles {
            if timeout(self.fanout_budget, tx.send(framed.clone())).await.is_err() {
                metrics.drop_reason("send_queue_full");
            }
        }
        metrics.rx_packet();
        metrics.rx_bytes(opus.len());
        metrics.per_channel_rx(channel_id.0);
        metrics.forwarded(fanout);
    }
}

impl VoiceSeat {
    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }
}

impl Drop for VoiceSeat {
    fn drop(&mut self) {
        self.relay.leave(self.channel_id, self.sender_id);
    }
}
