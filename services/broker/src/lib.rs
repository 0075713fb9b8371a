//! Prattle Broker Library Crate
//!
//! The serving side of the token and negotiation endpoints the realtime
//! client consumes: mints short-lived session credentials with the
//! server-held key, relays SDP offers to the remote calls endpoint, and
//! serves the static client. The binaries are thin wrappers around this
//! library.

pub mod config;
pub mod handlers;
pub mod router;
pub mod state;
pub mod upstream;
