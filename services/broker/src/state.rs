//! Shared Application State

use crate::config::Config;
use crate::upstream::RealtimeUpstream;
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all
/// handlers.
#[derive(Clone)]
pub struct AppState {
    pub upstream: Arc<RealtimeUpstream>,
    pub config: Arc<Config>,
}
