//! Shared session state.
//!
//! The interpreter owns the expressive state, the history and the Active
//! transition; the lifecycle controller owns every other state transition
//! and the star count. Readers poll or watch and may observe a value one
//! tick stale, which is fine for animation.

use crate::avatar::EmotionTarget;
use prattle_realtime::events::ControlEvent;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

/// Lifecycle of one conversation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Negotiating,
    Active,
    Closing,
    Closed,
    Failed,
}

/// Handle to the engine's shared mutable state. Cheap to clone; all clones
/// view the same underlying cells.
#[derive(Clone)]
pub struct SharedState {
    inner: Arc<Shared>,
}

struct Shared {
    emotion: watch::Sender<EmotionTarget>,
    session_state: watch::Sender<SessionState>,
    speaking: AtomicBool,
    response_in_flight: AtomicBool,
    history: Mutex<VecDeque<ControlEvent>>,
    session_id: Mutex<Option<String>>,
    stars: AtomicU32,
}

impl SharedState {
    pub fn new() -> Self {
        let (emotion, _) = watch::channel(EmotionTarget::Neutral);
        let (session_state, _) = watch::channel(SessionState::Idle);
        SharedState {
            inner: Arc::new(Shared {
                emotion,
                session_state,
                speaking: AtomicBool::new(false),
                response_in_flight: AtomicBool::new(false),
                history: Mutex::new(VecDeque::new()),
                session_id: Mutex::new(None),
                stars: AtomicU32::new(0),
            }),
        }
    }

    pub fn set_emotion(&self, emotion: EmotionTarget) {
        self.inner.emotion.send_replace(emotion);
    }

    pub fn emotion(&self) -> EmotionTarget {
        *self.inner.emotion.borrow()
    }

    pub fn emotion_watch(&self) -> watch::Receiver<EmotionTarget> {
        self.inner.emotion.subscribe()
    }

    pub fn set_session_state(&self, state: SessionState) {
        self.inner.session_state.send_replace(state);
    }

    pub fn session_state(&self) -> SessionState {
        *self.inner.session_state.borrow()
    }

    pub fn session_state_watch(&self) -> watch::Receiver<SessionState> {
        self.inner.session_state.subscribe()
    }

    pub fn set_speaking(&self, speaking: bool) {
        self.inner.speaking.store(speaking, Ordering::Release);
    }

    /// Whether the child is currently talking, per the remote turn detector.
    pub fn speaking(&self) -> bool {
        self.inner.speaking.load(Ordering::Acquire)
    }

    pub fn set_response_in_flight(&self, in_flight: bool) {
        self.inner.response_in_flight.store(in_flight, Ordering::Release);
    }

    /// Whether a model response is being generated right now.
    pub fn response_in_flight(&self) -> bool {
        self.inner.response_in_flight.load(Ordering::Acquire)
    }

    /// Prepends one event to the history. Newest entries sit at the front.
    pub fn record(&self, event: ControlEvent) {
        recover(self.inner.history.lock()).push_front(event);
    }

    pub fn clear_history(&self) {
        recover(self.inner.history.lock()).clear();
    }

    /// Snapshot of the recorded events, newest first.
    pub fn history(&self) -> Vec<ControlEvent> {
        recover(self.inner.history.lock()).iter().cloned().collect()
    }

    pub fn history_len(&self) -> usize {
        recover(self.inner.history.lock()).len()
    }

    pub fn set_session_id(&self, id: impl Into<String>) {
        *recover(self.inner.session_id.lock()) = Some(id.into());
    }

    pub fn session_id(&self) -> Option<String> {
        recover(self.inner.session_id.lock()).clone()
    }

    /// Adds one completion star and returns the new total.
    pub fn award_star(&self) -> u32 {
        self.inner.stars.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn stars(&self) -> u32 {
        self.inner.stars.load(Ordering::SeqCst)
    }
}

impl Default for SharedState {
    fn default() -> Self {
        SharedState::new()
    }
}

fn recover<'a, T>(result: Result<MutexGuard<'a, T>, PoisonError<MutexGuard<'a, T>>>) -> MutexGuard<'a, T> {
    result.unwrap_or_else(PoisonError::into_inner)
}
