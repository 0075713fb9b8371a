//! Realtime transport layer for the prattle session engine: credential
//! fetch, SDP and socket negotiation, the control-channel vocabulary, and
//! PCM plumbing shared across the workspace.

pub mod audio;
pub mod error;
pub mod events;
pub mod media;
pub mod negotiate;
pub mod socket;
pub mod token;

pub use audio::AudioSink;
pub use error::{MediaError, NegotiationError, TokenBrokerError};
pub use media::{
    CaptureSource, ChannelSignal, Connector, MediaStack, MicrophoneTrack, PeerHandles,
    PeerSession, SessionDescription, UnmanagedCapture,
};
pub use token::{Credential, TokenBroker};
