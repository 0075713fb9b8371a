//! Session lifecycle orchestration.
//!
//! One engine manages at most one live session. Start runs the credential
//! fetch and negotiation under the session lock, so concurrent callers either
//! wait the attempt out or fail fast once a session exists. Teardown releases
//! every resource in order and is safe to call at any time.

use crate::avatar::{Animator, EmotionTarget};
use crate::error::EngineError;
use crate::interpret::{Interpreter, InterpreterCommand, Timings};
use crate::persona::PersonaMode;
use crate::state::{SessionState, SharedState};
use chrono::{DateTime, Utc};
use prattle_realtime::AudioSink;
use prattle_realtime::events::SessionConfig;
use prattle_realtime::media::{Connector, MicrophoneTrack, PeerHandles};
use prattle_realtime::token::TokenBroker;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Engine-wide settings fixed at construction.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Model and voice used at negotiation and configuration time.
    pub session: SessionConfig,
    pub timings: Timings,
}

impl EngineSettings {
    pub fn new(session: SessionConfig) -> Self {
        EngineSettings {
            session,
            timings: Timings::default(),
        }
    }
}

struct ActiveSession {
    mode: PersonaMode,
    started_at: DateTime<Utc>,
    commands: mpsc::Sender<InterpreterCommand>,
    audio: AudioSink,
    microphone: MicrophoneTrack,
    transport_tasks: Vec<JoinHandle<()>>,
    interpreter: tokio::task::AbortHandle,
    watchdog: JoinHandle<()>,
}

/// Orchestrates sessions end to end: credential fetch, negotiation, the
/// interpreter loop, teardown, and the completion star.
pub struct SessionEngine {
    shared: SharedState,
    broker: TokenBroker,
    connector: Arc<dyn Connector>,
    settings: EngineSettings,
    current: Arc<Mutex<Option<ActiveSession>>>,
}

impl SessionEngine {
    pub fn new(broker: TokenBroker, connector: Arc<dyn Connector>, settings: EngineSettings) -> Self {
        SessionEngine {
            shared: SharedState::new(),
            broker,
            connector,
            settings,
            current: Arc::new(Mutex::new(None)),
        }
    }

    /// Starts a session in `mode`.
    ///
    /// Exactly one session can exist at a time; further calls fail with
    /// [`EngineError::AlreadyActive`] until teardown completes. The session
    /// slot stays locked for the whole negotiation, so a concurrent `stop()`
    /// waits for the attempt to settle rather than racing it.
    pub async fn start(&self, mode: PersonaMode) -> Result<(), EngineError> {
        let mut slot = self.current.lock().await;
        if slot.is_some() {
            return Err(EngineError::AlreadyActive);
        }
        info!(%mode, "starting session");
        self.shared.set_session_state(SessionState::Negotiating);
        self.shared.set_speaking(false);
        self.shared.set_response_in_flight(false);
        self.shared.set_emotion(EmotionTarget::Neutral);

        let credential = match self.broker.fetch().await {
            Ok(credential) => credential,
            Err(err) => {
                self.shared.set_session_state(SessionState::Failed);
                return Err(err.into());
            }
        };
        let handles = match self.connector.connect(credential, &self.settings.session).await {
            Ok(handles) => handles,
            Err(err) => {
                self.shared.set_session_state(SessionState::Failed);
                return Err(err.into());
            }
        };
        let PeerHandles {
            control_tx,
            signals,
            audio,
            microphone,
            tasks,
        } = handles;

        let (command_tx, command_rx) = mpsc::channel(16);
        let interpreter = Interpreter::new(
            self.shared.clone(),
            control_tx,
            self.settings.session.clone(),
            mode,
            self.settings.timings,
        );
        let interpreter_task = tokio::spawn(interpreter.run(signals, command_rx));
        let interpreter_abort = interpreter_task.abort_handle();
        let watchdog = tokio::spawn(watch_session(
            interpreter_task,
            self.current.clone(),
            self.shared.clone(),
        ));

        *slot = Some(ActiveSession {
            mode,
            started_at: Utc::now(),
            commands: command_tx,
            audio,
            microphone,
            transport_tasks: tasks,
            interpreter: interpreter_abort,
            watchdog,
        });
        Ok(())
    }

    /// Tears the session down. Idempotent: with nothing active this logs and
    /// returns. A session that reached Active earns exactly one star.
    pub async fn stop(&self) {
        let mut slot = self.current.lock().await;
        let Some(mut session) = slot.take() else {
            debug!("stop with no active session");
            return;
        };
        let was_active = self.shared.session_state() == SessionState::Active;
        self.shared.set_session_state(SessionState::Closing);
        info!(mode = %session.mode, "stopping session");

        let _ = session.commands.try_send(InterpreterCommand::Close);
        session.watchdog.abort();
        release(&mut session);

        self.shared.set_speaking(false);
        self.shared.set_response_in_flight(false);
        self.shared.set_emotion(EmotionTarget::Neutral);
        if was_active {
            let stars = self.shared.award_star();
            let elapsed = (Utc::now() - session.started_at).num_seconds();
            info!(stars, elapsed_secs = elapsed, "session complete");
        }
        self.shared.set_session_state(SessionState::Closed);
    }

    /// Requests a topic turn on the live session.
    ///
    /// Returns `Ok(false)` when the request was dropped because a response is
    /// already in flight, and [`EngineError::ChannelUnavailable`] when no
    /// session is live.
    pub async fn request_topic(&self, prompt: impl Into<String>) -> Result<bool, EngineError> {
        let slot = self.current.lock().await;
        let Some(session) = slot.as_ref() else {
            return Err(EngineError::ChannelUnavailable);
        };
        if self.shared.response_in_flight() {
            debug!("topic rejected: a response is in flight");
            return Ok(false);
        }
        session
            .commands
            .try_send(InterpreterCommand::Topic {
                prompt: prompt.into(),
            })
            .map_err(|_| EngineError::ChannelUnavailable)?;
        Ok(true)
    }

    /// The remote-audio sink of the live session, if any.
    pub async fn audio_sink(&self) -> Option<AudioSink> {
        self.current
            .lock()
            .await
            .as_ref()
            .map(|session| session.audio.clone())
    }

    /// When the live session was started, if any.
    pub async fn started_at(&self) -> Option<DateTime<Utc>> {
        self.current
            .lock()
            .await
            .as_ref()
            .map(|session| session.started_at)
    }

    /// Builds an animator wired to this engine's shared state.
    pub fn animator(&self) -> Animator {
        Animator::new(self.shared.clone())
    }

    pub fn shared(&self) -> &SharedState {
        &self.shared
    }

    pub fn state(&self) -> SessionState {
        self.shared.session_state()
    }

    pub fn stars(&self) -> u32 {
        self.shared.stars()
    }
}

/// Awaits the interpreter and, when it fails, releases the session and marks
/// the engine failed. A clean return or a cancellation is not a failure.
async fn watch_session(
    interpreter: JoinHandle<Result<(), EngineError>>,
    current: Arc<Mutex<Option<ActiveSession>>>,
    shared: SharedState,
) {
    let failure = match interpreter.await {
        Ok(Ok(())) => None,
        Ok(Err(err)) => Some(err.to_string()),
        Err(join_err) if join_err.is_cancelled() => None,
        Err(join_err) => {
            error!(%join_err, "interpreter task panicked");
            Some(join_err.to_string())
        }
    };
    let Some(reason) = failure else {
        return;
    };
    warn!(%reason, "session failed, releasing resources");
    let mut slot = current.lock().await;
    if let Some(mut session) = slot.take() {
        release(&mut session);
        shared.set_speaking(false);
        shared.set_response_in_flight(false);
        shared.set_emotion(EmotionTarget::Neutral);
        shared.set_session_state(SessionState::Failed);
    }
}

/// Releases everything a session holds. Every step is individually safe to
/// repeat or to run against an already-dead resource.
fn release(session: &mut ActiveSession) {
    session.interpreter.abort();
    for task in session.transport_tasks.drain(..) {
        task.abort();
    }
    session.microphone.stop();
    session.audio.detach();
}
