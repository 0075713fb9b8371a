//! Engine-level error taxonomy.

use prattle_realtime::{MediaError, NegotiationError, TokenBrokerError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// `start()` was called while a session is already underway.
    #[error("a session is already active")]
    AlreadyActive,
    /// Microphone permission refused. Fatal to the attempt; the user retries
    /// manually.
    #[error("microphone access denied: {0}")]
    MediaAccessDenied(String),
    /// Offer/answer exchange or transport connect failed.
    #[error(transparent)]
    Negotiation(NegotiationError),
    /// The broker refused or failed to mint a credential.
    #[error(transparent)]
    TokenBroker(#[from] TokenBrokerError),
    /// A send was attempted with no open control channel.
    #[error("control channel unavailable")]
    ChannelUnavailable,
    /// The control channel went away mid-session.
    #[error("control channel closed unexpectedly")]
    ChannelLost,
}

impl From<NegotiationError> for EngineError {
    fn from(err: NegotiationError) -> Self {
        match err {
            NegotiationError::Media(MediaError::AccessDenied(message)) => {
                EngineError::MediaAccessDenied(message)
            }
            other => EngineError::Negotiation(other),
        }
    }
}
