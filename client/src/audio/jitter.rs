use std::collections::HashMap;
use std::time::{Duration, Instant};

use bytes::Bytes;

const DEFAULT_RING_SIZE: usize = 16;
const DEFAULT_STALE_TIMEOUT: Duration = Duration::from_millis(500);

/// One decoded-or-missing frame handed to the playback mixer.
/// `opus == None` is the loss signal the caller feeds to PLC/FEC: if
/// `fec_source` is `Some`, it's the next packet's payload, which carries
/// enough redundancy to recover the missing frame via Opus FEC instead of
/// falling back to pure concealment.
pub struct TaggedFrame {
    pub sender_id: u16,
    pub opus: Option<Bytes>,
    pub fec_source: Option<Bytes>,
}

#[derive(Clone)]
struct Slot {
    seq: u16,
    data: Bytes,
    present: bool,
}

impl Default for Slot {
    fn default() -> Self {
        Self { seq: 0, data: Bytes::new(), present: false }
    }
}

struct Stream {
    ring: Vec<Slot>,
    next_play: u16,
    primed: bool,
    priming_count: usize,
    last_recv: Instant,
}

impl Stream {
    fn new(ring_size: usize, start_seq: u16) -> Self {
        Self {
            ring: vec![Slot::default(); ring_size],
            next_play: start_seq,
            primed: false,
            priming_count: 0,
            last_recv: Instant::now(),
        }
    }

    fn write(&mut self, seq: u16, data: Bytes) {
        let idx = seq as usize % self.ring.len();
        self.ring[idx] = Slot { seq, data, present: true };
    }
}

/// Per-sender ring + dispatcher. Not safe for concurrent use: the single
/// playback task is the sole reader of `pop`, the single receive task is
/// the sole writer of `push`.
pub struct JitterBuffer {
    streams: HashMap<u16, Stream>,
    ring_size: usize,
    depth: usize,
    stale_timeout: Duration,
}

impl JitterBuffer {
    pub fn new(depth: usize) -> Self {
        Self { streams: HashMap::new(), ring_size: DEFAULT_RING_SIZE, depth: depth.max(1), stale_timeout: DEFAULT_STALE_TIMEOUT }
    }

    /// Reconfigures priming depth. Affects only streams created afterward.
    pub fn set_depth(&mut self, depth: usize) {
        self.depth = depth.max(1);
    }

    pub fn reset(&mut self) {
        self.streams.clear();
    }

    pub fn active_senders(&self) -> usize {
        self.streams.values().filter(|s| s.primed).count()
    }

    pub fn push(&mut self, sender_id: u16, seq: u16, opus: Bytes) {
        let ring_size = self.ring_size;
        let depth = self.depth;
        let stream = self.streams.entry(sender_id).or_insert_with(|| Stream::new(ring_size, seq));
        stream.last_recv = Instant::now();

        if !stream.primed {
            stream.write(seq, opus);
            stream.priming_count += 1;
            if stream.priming_count >= depth {
                stream.primed = true;
            }
            return;
        }

        let d = (seq.wrapping_sub(stream.next_play) as i16) as i32;
        if d < 0 {
            return; // late arrival, discard
        }
        if d as usize >= ring_size {
            // Sender restart, or a gap wider than the ring: re-prime.
            let mut fresh = Stream::new(ring_size, seq);
            fresh.write(seq, opus);
            fresh.priming_count = 1;
            if fresh.priming_count >= depth {
                fresh.primed = true;
            }
            self.streams.insert(sender_id, fresh);
            return;
        }
        stream.write(seq, opus);
    }

    /// Returns at most one frame per active stream; each call represents
    /// one 20 ms playback tick.
    pub fn pop(&mut self) -> Vec<TaggedFrame> {
        let now = Instant::now();
        let stale_timeout = self.stale_timeout;
        self.streams.retain(|_, s| now.duration_since(s.last_recv) <= stale_timeout);

        let mut out = Vec::with_capacity(self.streams.len());
        for (&sender_id, stream) in self.streams.iter_mut() {
            if !stream.primed {
                continue;
            }
            let idx = stream.next_play as usize % stream.ring.len();
            let slot = &mut stream.ring[idx];
            if slot.present && slot.seq == stream.next_play {
                out.push(TaggedFrame { sender_id, opus: Some(slot.data.clone()), fec_source: None });
                slot.present = false;
            } else {
                let next_idx = (stream.next_play.wrapping_add(1)) as usize % stream.ring.len();
                let next_slot = &stream.ring[next_idx];
                let fec_source = if next_slot.present && next_slot.seq == stream.next_play.wrapping_add(1) {
                    Some(next_slot.data.clone())
                } else {
                    None
                };
                out.push(TaggedFrame { sender_id, opus: None, fec_source });
            }
            stream.next_play = stream.next_play.wrapping_add(1);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(tag: u8) -> Bytes {
        Bytes::from(vec![tag])
    }

    #[test]
    fn depth_two_loss_then_recovery_on_next_pop() {
        let mut jb = JitterBuffer::new(2);
        jb.push(1, 50, payload(50));
        jb.push(1, 51, payload(51));

        let first = jb.pop();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].opus.as_deref(), Some(&[50][..]));

        let second = jb.pop();
        assert_eq!(second[0].opus.as_deref(), Some(&[51][..]));

        jb.push(1, 53, payload(53)); // 52 skipped

        let third = jb.pop();
        assert!(third[0].opus.is_none(), "missing 52 must surface as a loss signal");

        let fourth = jb.pop();
        assert_eq!(fourth[0].opus.as_deref(), Some(&[53][..]));
    }

    #[test]
    fn pop_never_reemits_a_seq_and_next_play_is_monotone() {
        let mut jb = JitterBuffer::new(1);
        jb.push(7, 10, payload(10));
        let mut seen = Vec::new();
        for _ in 0..5 {
            let frames = jb.pop();
            seen.push(frames[0].opus.clone());
        }
        assert_eq!(seen[0].as_deref(), Some(&[10][..]));
        assert!(seen[1..].iter().all(|f| f.is_none()));
    }

    #[test]
    fn wide_gap_reprimes_the_stream() {
        let mut jb = JitterBuffer::new(1);
        jb.push(1, 0, payload(0));
        assert_eq!(jb.active_senders(), 1);
        jb.push(1, 1000, payload(100)); // far beyond ring size, triggers re-prime
        assert_eq!(jb.active_senders(), 1);
    }

    #[test]
    fn loss_exposes_next_packet_as_fec_source_when_available() {
        let mut jb = JitterBuffer::new(2);
        jb.push(1, 50, payload(50));
        jb.push(1, 51, payload(51));
        jb.pop(); // prime drain: seq 50
        jb.pop(); // seq 51

        jb.push(1, 53, payload(53)); // 52 skipped, but 53 is in hand

        let loss = jb.pop();
        assert!(loss[0].opus.is_none());
        assert_eq!(loss[0].fec_source.as_deref(), Some(&[53][..]));
    }

    #[test]
    fn stale_stream_is_pruned() {
        let mut jb = JitterBuffer::new(1);
        jb.stale_timeout = Duration::from_millis(0);
        jb.push(1, 0, payload(0));
        std::thread::sleep(Duration::from_millis(2));
        let frames = jb.pop();
        assert!(frames.is_empty());
        assert_eq!(jb.active_senders(), 0);
    }
}
