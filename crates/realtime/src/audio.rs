//! PCM16 wire codec and the remote-audio sink.

use base64::Engine;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

/// Sample rate of PCM16 audio on the realtime wire, both directions.
pub const WIRE_SAMPLE_RATE: u32 = 24_000;

/// Samples the sink retains beyond the largest analysis window.
const WINDOW_CAPACITY: usize = 2048;

/// Decodes a base64 PCM16 fragment into f32 samples in [-1.0, 1.0].
pub fn decode_pcm16(base64_fragment: &str) -> Vec<f32> {
    match base64::engine::general_purpose::STANDARD.decode(base64_fragment) {
        Ok(bytes) => bytes
            .chunks_exact(2)
            .map(|chunk| {
                let v = i16::from_le_bytes([chunk[0], chunk[1]]);
                (v as f32 / 32768.0).clamp(-1.0, 1.0)
            })
            .collect(),
        Err(err) => {
            tracing::debug!(%err, "dropping undecodable audio fragment");
            Vec::new()
        }
    }
}

/// Encodes f32 samples as base64 PCM16, clamping out-of-range values.
pub fn encode_pcm16(samples: &[f32]) -> String {
    let bytes: Vec<u8> = samples
        .iter()
        .flat_map(|&sample| {
            let v = (sample * 32768.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
            v.to_le_bytes()
        })
        .collect();
    base64::engine::general_purpose::STANDARD.encode(&bytes)
}

/// Receives decoded remote audio from the transport. Keeps a sliding sample
/// window for loudness analysis and optionally forwards chunks to a playback
/// consumer. Cheap to clone; all clones share the same buffer.
#[derive(Clone)]
pub struct AudioSink {
    shared: Arc<SinkShared>,
}

struct SinkShared {
    window: Mutex<VecDeque<f32>>,
    playback: Mutex<Option<mpsc::Sender<Vec<f32>>>>,
    detached: AtomicBool,
}

impl AudioSink {
    pub fn new() -> Self {
        AudioSink {
            shared: Arc::new(SinkShared {
                window: Mutex::new(VecDeque::with_capacity(WINDOW_CAPACITY)),
                playback: Mutex::new(None),
                detached: AtomicBool::new(false),
            }),
        }
    }

    /// Appends decoded samples. The analysis window always advances; playback
    /// chunks are dropped when the consumer falls behind.
    pub fn push(&self, samples: &[f32]) {
        if samples.is_empty() || self.is_detached() {
            return;
        }
        {
            let mut window = recover(self.shared.window.lock());
            window.extend(samples.iter().copied());
            while window.len() > WINDOW_CAPACITY {
                window.pop_front();
            }
        }
        let playback = recover(self.shared.playback.lock());
        if let Some(tx) = playback.as_ref() {
            if tx.try_send(samples.to_vec()).is_err() {
                tracing::trace!(dropped = samples.len(), "playback consumer behind");
            }
        }
    }

    /// The latest `n` samples, zero-padded at the front when fewer have
    /// arrived. Newest sample last.
    pub fn window(&self, n: usize) -> Vec<f32> {
        let window = recover(self.shared.window.lock());
        let mut out = vec![0.0f32; n];
        let have = window.len().min(n);
        let start = window.len() - have;
        for (slot, sample) in out[n - have..].iter_mut().zip(window.iter().skip(start)) {
            *slot = *sample;
        }
        out
    }

    /// True once any samples have arrived.
    pub fn has_signal(&self) -> bool {
        !recover(self.shared.window.lock()).is_empty()
    }

    /// Routes every subsequently pushed chunk to `tx` as well.
    pub fn attach_playback(&self, tx: mpsc::Sender<Vec<f32>>) {
        *recover(self.shared.playback.lock()) = Some(tx);
    }

    /// True once the sink has been detached by session teardown.
    pub fn is_detached(&self) -> bool {
        self.shared.detached.load(Ordering::Acquire)
    }

    /// Detaches the sink: drops the playback route, clears the window and
    /// refuses further samples. Safe to call more than once.
    pub fn detach(&self) {
        self.shared.detached.store(true, Ordering::Release);
        recover(self.shared.playback.lock()).take();
        recover(self.shared.window.lock()).clear();
    }
}

impl Default for AudioSink {
    fn default() -> Self {
        Self::new()
    }
}

fn recover<'a, T>(result: Result<MutexGuard<'a, T>, PoisonError<MutexGuard<'a, T>>>) -> MutexGuard<'a, T> {
    result.unwrap_or_else(PoisonError::into_inner)
}
