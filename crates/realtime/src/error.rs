//! Error types for credential fetch, media acquisition and negotiation.

use thiserror::Error;

/// Failure while exchanging for a short-lived session credential.
#[derive(Debug, Error)]
pub enum TokenBrokerError {
    /// The broker answered with a non-success status.
    #[error("token broker returned {status}: {message}")]
    Rejected { status: u16, message: String },
    /// The broker could not be reached at all.
    #[error("token broker unreachable: {0}")]
    Network(#[from] reqwest::Error),
    /// The broker answered with success but the body was not the expected shape.
    #[error("token broker returned an unexpected body: {0}")]
    Malformed(String),
}

/// Failure while acquiring or driving local media devices.
#[derive(Debug, Error)]
pub enum MediaError {
    /// The user or platform refused microphone access. Fatal to the attempt;
    /// there is no silent fallback.
    #[error("microphone access denied: {0}")]
    AccessDenied(String),
    /// Any other capture or peer stack failure.
    #[error("media stack failure: {0}")]
    Stack(String),
}

/// Failure during the offer/answer exchange or transport connect.
#[derive(Debug, Error)]
pub enum NegotiationError {
    /// The session endpoint refused the offer.
    #[error("session endpoint rejected the offer with {status}: {body}")]
    Rejected { status: u16, body: String },
    /// HTTP-level failure talking to the session endpoint.
    #[error("offer/answer transport failed: {0}")]
    Transport(#[from] reqwest::Error),
    /// WebSocket-level failure while connecting the realtime socket.
    #[error("realtime socket connect failed: {0}")]
    Socket(#[from] tokio_tungstenite::tungstenite::Error),
    /// The credential could not be encoded into a request header.
    #[error("invalid negotiation request: {0}")]
    Request(#[from] tokio_tungstenite::tungstenite::http::header::InvalidHeaderValue),
    /// Local media failure surfaced during negotiation.
    #[error(transparent)]
    Media(#[from] MediaError),
}
