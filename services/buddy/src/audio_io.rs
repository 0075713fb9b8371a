//! Local audio devices: microphone capture resampled onto the wire, and
//! playback of remote session audio through a ring buffer.

use anyhow::Context;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use prattle_realtime::audio::WIRE_SAMPLE_RATE;
use prattle_realtime::error::MediaError;
use prattle_realtime::media::{CaptureSource, MicrophoneTrack};
use ringbuf::HeapRb;
use ringbuf::traits::{Consumer, Producer, Split};
use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Samples per resampler block, at the rate feeding the block.
const CAPTURE_CHUNK: usize = 512;
const PLAYBACK_CHUNK: usize = 512;

/// Queued capture chunks before the oldest get dropped.
const CAPTURE_QUEUE: usize = 64;

/// How long device threads get to report a working stream.
const READY_TIMEOUT: Duration = Duration::from_secs(5);

const THREAD_POLL: Duration = Duration::from_millis(50);
const FEED_BACKOFF: Duration = Duration::from_millis(5);

/// Consecutive zero-progress writes before stalled playback gives up.
const STALL_LIMIT: u32 = 400;

/// Captures the default input device with cpal. Each [`open`] call claims the
/// device on a fresh worker thread and streams mono chunks at the wire rate
/// until the returned track is stopped.
///
/// [`open`]: CaptureSource::open
pub struct CpalCapture;

impl CaptureSource for CpalCapture {
    fn open(&self) -> Result<MicrophoneTrack, MediaError> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| MediaError::AccessDenied("no input device available".to_string()))?;
        let supported = device
            .default_input_config()
            .map_err(|err| MediaError::AccessDenied(err.to_string()))?;
        let name = device.name().unwrap_or_else(|_| "unknown".to_string());
        info!(
            device = %name,
            rate = supported.sample_rate().0,
            channels = supported.channels(),
            "opening microphone"
        );

        let (tx, rx) = mpsc::channel(CAPTURE_QUEUE);
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();

        let worker = thread::spawn(move || {
            // cpal streams are not Send; this one lives and dies on this thread.
            let config: StreamConfig = supported.config();
            let channels = config.channels as usize;
            let rate = config.sample_rate.0;
            let resampler = match mono_resampler(rate, WIRE_SAMPLE_RATE, CAPTURE_CHUNK) {
                Ok(resampler) => resampler,
                Err(err) => {
                    let _ = ready_tx.send(Err(format!("capture resampler: {err}")));
                    return;
                }
            };
            let forwarder = ChunkForwarder {
                tx,
                resampler,
                pending: Vec::new(),
                channels,
            };

            let built = match supported.sample_format() {
                SampleFormat::F32 => device.build_input_stream(
                    &config,
                    {
                        let mut forwarder = forwarder;
                        move |data: &[f32], _: &cpal::InputCallbackInfo| forwarder.push(data)
                    },
                    |err| error!(%err, "microphone stream error"),
                    None,
                ),
                SampleFormat::I16 => device.build_input_stream(
                    &config,
                    {
                        let mut forwarder = forwarder;
                        move |data: &[i16], _: &cpal::InputCallbackInfo| {
                            let samples: Vec<f32> =
                                data.iter().map(|&s| s as f32 / 32768.0).collect();
                            forwarder.push(&samples);
                        }
                    },
                    |err| error!(%err, "microphone stream error"),
                    None,
                ),
                other => {
                    let _ =
                        ready_tx.send(Err(format!("unsupported input sample format {other:?}")));
                    return;
                }
            };
            let stream = match built {
                Ok(stream) => stream,
                Err(err) => {
                    let _ = ready_tx.send(Err(format!("could not open the input stream: {err}")));
                    return;
                }
            };
            if let Err(err) = stream.play() {
                let _ = ready_tx.send(Err(format!("could not start the input stream: {err}")));
                return;
            }
            let _ = ready_tx.send(Ok(()));

            while !flag.load(Ordering::Acquire) {
                thread::sleep(THREAD_POLL);
            }
            drop(stream);
            debug!("microphone capture thread exiting");
        });

        match ready_rx.recv_timeout(READY_TIMEOUT) {
            Ok(Ok(())) => Ok(MicrophoneTrack::new(rx, stop, Some(worker))),
            Ok(Err(message)) => {
                let _ = worker.join();
                Err(MediaError::Stack(message))
            }
            Err(_) => {
                stop.store(true, Ordering::Release);
                Err(MediaError::Stack(
                    "the capture thread did not report readiness".to_string(),
                ))
            }
        }
    }
}

/// Folds interleaved device samples down to mono, resamples onto the wire
/// rate and ships full chunks. Partial blocks wait for the next callback.
struct ChunkForwarder {
    tx: mpsc::Sender<Vec<f32>>,
    resampler: Option<FastFixedIn<f32>>,
    pending: Vec<f32>,
    channels: usize,
}

impl ChunkForwarder {
    fn push(&mut self, samples: &[f32]) {
        if self.channels <= 1 {
            self.pending.extend_from_slice(samples);
        } else {
            for frame in samples.chunks_exact(self.channels) {
                self.pending
                    .push(frame.iter().sum::<f32>() / self.channels as f32);
            }
        }
        loop {
            let take = self
                .resampler
                .as_ref()
                .map_or(CAPTURE_CHUNK, Resampler::input_frames_next);
            if self.pending.len() < take {
                break;
            }
            let block: Vec<f32> = self.pending.drain(..take).collect();
            let chunk = match self.resampler.as_mut() {
                Some(resampler) => match resampler.process(&[block], None) {
                    Ok(mut frames) => frames.remove(0),
                    Err(err) => {
                        debug!(%err, "dropping an unresamplable capture block");
                        continue;
                    }
                },
                None => block,
            };
            if self.tx.try_send(chunk).is_err() {
                debug!("capture queue full, dropping samples");
            }
        }
    }
}

/// Plays remote session audio on the default output device.
///
/// Chunks arrive at the wire rate and are resampled to whatever the device
/// wants; the ring buffer between the feeder and the device callback absorbs
/// bursts from the wire, and the callback plays silence on underrun. The
/// returned thread ends once the chunk sender is dropped.
pub fn start_playback(chunks: mpsc::Receiver<Vec<f32>>) -> anyhow::Result<thread::JoinHandle<()>> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .context("no output device available")?;
    let supported = device
        .default_output_config()
        .context("could not query the output device")?;
    let name = device.name().unwrap_or_else(|_| "unknown".to_string());
    info!(
        device = %name,
        rate = supported.sample_rate().0,
        channels = supported.channels(),
        "opening speaker"
    );

    let (ready_tx, ready_rx) = std::sync::mpsc::channel();
    let worker = thread::spawn(move || run_playback(device, supported, chunks, ready_tx));

    match ready_rx.recv_timeout(READY_TIMEOUT) {
        Ok(Ok(())) => Ok(worker),
        Ok(Err(message)) => {
            let _ = worker.join();
            anyhow::bail!("could not start playback: {message}")
        }
        Err(_) => anyhow::bail!("the playback thread did not report readiness"),
    }
}

fn run_playback(
    device: cpal::Device,
    supported: cpal::SupportedStreamConfig,
    mut chunks: mpsc::Receiver<Vec<f32>>,
    ready_tx: std::sync::mpsc::Sender<Result<(), String>>,
) {
    let config: StreamConfig = supported.config();
    let channels = config.channels as usize;
    let rate = config.sample_rate.0;

    let mut resampler = match mono_resampler(WIRE_SAMPLE_RATE, rate, PLAYBACK_CHUNK) {
        Ok(resampler) => resampler,
        Err(err) => {
            let _ = ready_tx.send(Err(format!("playback resampler: {err}")));
            return;
        }
    };

    // One second of device-rate mono between the feeder and the callback.
    let ring = HeapRb::<f32>::new(rate as usize);
    let (mut producer, consumer) = ring.split();

    let built = match supported.sample_format() {
        SampleFormat::F32 => device.build_output_stream(
            &config,
            {
                let mut consumer = consumer;
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    for frame in data.chunks_mut(channels) {
                        let sample = consumer.try_pop().unwrap_or(0.0);
                        for slot in frame {
                            *slot = sample;
                        }
                    }
                }
            },
            |err| error!(%err, "playback stream error"),
            None,
        ),
        SampleFormat::I16 => device.build_output_stream(
            &config,
            {
                let mut consumer = consumer;
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    for frame in data.chunks_mut(channels) {
                        let sample = consumer.try_pop().unwrap_or(0.0);
                        let value =
                            (sample * 32768.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
                        for slot in frame {
                            *slot = value;
                        }
                    }
                }
            },
            |err| error!(%err, "playback stream error"),
            None,
        ),
        other => {
            let _ = ready_tx.send(Err(format!("unsupported output sample format {other:?}")));
            return;
        }
    };
    let stream = match built {
        Ok(stream) => stream,
        Err(err) => {
            let _ = ready_tx.send(Err(format!("could not open the output stream: {err}")));
            return;
        }
    };
    if let Err(err) = stream.play() {
        let _ = ready_tx.send(Err(format!("could not start the output stream: {err}")));
        return;
    }
    let _ = ready_tx.send(Ok(()));

    let mut pending: Vec<f32> = Vec::new();
    while let Some(chunk) = chunks.blocking_recv() {
        pending.extend_from_slice(&chunk);
        loop {
            let take = resampler
                .as_ref()
                .map_or(PLAYBACK_CHUNK, Resampler::input_frames_next);
            if pending.len() < take {
                break;
            }
            let block: Vec<f32> = pending.drain(..take).collect();
            let out = match resampler.as_mut() {
                Some(resampler) => match resampler.process(&[block], None) {
                    Ok(mut frames) => frames.remove(0),
                    Err(err) => {
                        debug!(%err, "dropping an unresamplable playback block");
                        continue;
                    }
                },
                None => block,
            };
            feed(&mut producer, &out);
        }
    }
    drop(stream);
    debug!("playback thread exiting");
}

/// Writes into the ring, sleeping while it is full so wire bursts spread out
/// to realtime. Gives up when the callback stops draining.
fn feed<P: Producer<Item = f32>>(producer: &mut P, samples: &[f32]) {
    let mut offset = 0;
    let mut stalled = 0u32;
    while offset < samples.len() {
        let written = producer.push_slice(&samples[offset..]);
        offset += written;
        if written == 0 {
            stalled += 1;
            if stalled > STALL_LIMIT {
                warn!(dropped = samples.len() - offset, "playback stalled, dropping audio");
                return;
            }
            thread::sleep(FEED_BACKOFF);
        } else {
            stalled = 0;
        }
    }
}

/// Mono resampler between `from` and `to` Hz, or `None` when the rates
/// already agree.
fn mono_resampler(
    from: u32,
    to: u32,
    chunk: usize,
) -> Result<Option<FastFixedIn<f32>>, rubato::ResamplerConstructionError> {
    if from == to {
        return Ok(None);
    }
    FastFixedIn::<f32>::new(
        f64::from(to) / f64::from(from),
        1.0,
        PolynomialDegree::Cubic,
        chunk,
        1,
    )
    .map(Some)
}
