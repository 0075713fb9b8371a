//! Media and transport seams: capture sources, peer sessions, and the live
//! handle bundle a connected session yields.

use crate::audio::AudioSink;
use crate::error::{MediaError, NegotiationError};
use crate::events::SessionConfig;
use crate::token::Credential;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// An opaque session description. Offer and answer text traverse the
/// negotiation endpoints verbatim; nothing here parses their syntax.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription(String);

impl SessionDescription {
    pub fn new(text: impl Into<String>) -> Self {
        SessionDescription(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

/// Transport notifications delivered to the interpreter, in arrival order.
#[derive(Debug)]
pub enum ChannelSignal {
    /// The control channel is open and ready for traffic.
    Opened,
    /// One inbound wire object.
    Message(Value),
    /// The channel closed; nothing further will arrive.
    Closed,
}

/// A live microphone capture. Sample chunks arrive on the held receiver
/// until the owner calls [`MicrophoneTrack::stop`].
pub struct MicrophoneTrack {
    samples: Option<mpsc::Receiver<Vec<f32>>>,
    stop: Arc<AtomicBool>,
    worker: Option<std::thread::JoinHandle<()>>,
}

impl MicrophoneTrack {
    pub fn new(
        samples: mpsc::Receiver<Vec<f32>>,
        stop: Arc<AtomicBool>,
        worker: Option<std::thread::JoinHandle<()>>,
    ) -> Self {
        MicrophoneTrack {
            samples: Some(samples),
            stop,
            worker,
        }
    }

    /// A track that never produces samples, for transports where capture is
    /// owned by the platform media stack rather than this process.
    pub fn unmanaged() -> Self {
        let (_tx, rx) = mpsc::channel(1);
        MicrophoneTrack {
            samples: Some(rx),
            stop: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    /// Hands the sample stream to the transport. `None` once taken.
    pub fn take_samples(&mut self) -> Option<mpsc::Receiver<Vec<f32>>> {
        self.samples.take()
    }

    /// Signals the capture worker to stop and release the device. Idempotent;
    /// never panics even when the worker already went away.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::warn!("microphone capture thread ended with a panic");
            }
        }
    }
}

/// Everything a live session hands back to its owner: the outbound control
/// sender, the inbound signal stream, decoded remote audio, the microphone,
/// and the transport tasks to abort on teardown.
pub struct PeerHandles {
    pub control_tx: mpsc::Sender<Value>,
    pub signals: mpsc::Receiver<ChannelSignal>,
    pub audio: AudioSink,
    pub microphone: MicrophoneTrack,
    pub tasks: Vec<JoinHandle<()>>,
}

/// Acquires the local microphone. Implemented by the cpal capture in the
/// native client and by synthetic sources in tests.
pub trait CaptureSource: Send + Sync {
    fn open(&self) -> Result<MicrophoneTrack, MediaError>;
}

/// A platform peer-connection stack able to run SDP offer/answer sessions.
#[async_trait]
pub trait MediaStack: Send + Sync {
    async fn new_session(&self) -> Result<Box<dyn PeerSession>, MediaError>;
}

/// One in-flight peer session: produces the local offer, then completes with
/// the remote answer.
#[async_trait]
pub trait PeerSession: Send {
    /// Creates the local offer covering one audio stream in each direction
    /// plus one ordered, reliable control channel, with the microphone track
    /// attached.
    async fn create_offer(
        &mut self,
        microphone: &MicrophoneTrack,
    ) -> Result<SessionDescription, MediaError>;

    /// Applies the remote answer, completing negotiation. On failure the
    /// implementation releases the microphone before returning.
    async fn apply_answer(
        self: Box<Self>,
        answer: SessionDescription,
        microphone: MicrophoneTrack,
    ) -> Result<PeerHandles, MediaError>;
}

/// Builds a connected session from a credential. Both the SDP negotiator and
/// the socket transport implement this, so callers stay transport-agnostic.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        credential: Credential,
        session: &SessionConfig,
    ) -> Result<PeerHandles, NegotiationError>;
}

/// A capture source that always succeeds with an [`MicrophoneTrack::unmanaged`]
/// track, for peer stacks that own capture end to end.
pub struct UnmanagedCapture;

impl CaptureSource for UnmanagedCapture {
    fn open(&self) -> Result<MicrophoneTrack, MediaError> {
        Ok(MicrophoneTrack::unmanaged())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn microphone_stop_is_idempotent() {
        let (_tx, rx) = mpsc::channel(1);
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let worker = std::thread::spawn(move || {
            while !flag.load(Ordering::Acquire) {
                std::thread::sleep(std::time::Duration::from_millis(1));
            }
        });
        let mut track = MicrophoneTrack::new(rx, stop.clone(), Some(worker));
        track.stop();
        assert!(stop.load(Ordering::Acquire));
        track.stop();
    }

    #[test]
    fn samples_can_only_be_taken_once() {
        let mut track = MicrophoneTrack::unmanaged();
        assert!(track.take_samples().is_some());
        assert!(track.take_samples().is_none());
    }
}
