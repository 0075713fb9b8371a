//! The control-channel interpreter.
//!
//! One interpreter runs per session. It consumes transport signals and
//! caller commands, drives the shared expressive state, performs the
//! one-time configuration handshake, and records every control message
//! into the history.

use crate::avatar::EmotionTarget;
use crate::error::EngineError;
use crate::persona::PersonaMode;
use crate::state::{SessionState, SharedState};
use prattle_realtime::events::{self, ClientEvent, ControlEvent, ServerEvent, SessionConfig};
use prattle_realtime::media::ChannelSignal;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Delays for the interpreter's deferred actions. Injectable so tests can
/// run against short real waits.
#[derive(Debug, Clone, Copy)]
pub struct Timings {
    /// Pause between the configuration event and the first response request,
    /// giving the remote end time to apply the instructions.
    pub configure_delay: Duration,
    /// How long the encouraging expression lingers after a response.
    pub emotion_decay: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Timings {
            configure_delay: Duration::from_millis(500),
            emotion_decay: Duration::from_secs(2),
        }
    }
}

/// Requests the lifecycle controller forwards into the interpreter loop.
#[derive(Debug)]
pub enum InterpreterCommand {
    /// Inject a user turn for a picked topic and request a response.
    Topic { prompt: String },
    /// Wind the loop down ahead of transport teardown.
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    AwaitingOpen,
    AwaitingSessionCreated,
    Configuring,
    Live,
    Closed,
}

pub struct Interpreter {
    shared: SharedState,
    control_tx: mpsc::Sender<Value>,
    config: SessionConfig,
    mode: PersonaMode,
    timings: Timings,
    phase: Phase,
    configured: bool,
    configure_task: Option<JoinHandle<()>>,
    decay_task: Option<JoinHandle<()>>,
}

impl Interpreter {
    pub fn new(
        shared: SharedState,
        control_tx: mpsc::Sender<Value>,
        config: SessionConfig,
        mode: PersonaMode,
        timings: Timings,
    ) -> Self {
        Interpreter {
            shared,
            control_tx,
            config,
            mode,
            timings,
            phase: Phase::AwaitingOpen,
            configured: false,
            configure_task: None,
            decay_task: None,
        }
    }

    /// Runs until the caller closes the loop or the channel goes away. A
    /// remote close or transport death before [`InterpreterCommand::Close`]
    /// is a failure.
    pub async fn run(
        mut self,
        mut signals: mpsc::Receiver<ChannelSignal>,
        mut commands: mpsc::Receiver<InterpreterCommand>,
    ) -> Result<(), EngineError> {
        loop {
            tokio::select! {
                signal = signals.recv() => match signal {
                    Some(ChannelSignal::Opened) => self.on_open(),
                    Some(ChannelSignal::Message(value)) => self.on_message(value),
                    Some(ChannelSignal::Closed) | None => {
                        let lost = self.phase != Phase::Closed;
                        self.phase = Phase::Closed;
                        return if lost { Err(EngineError::ChannelLost) } else { Ok(()) };
                    }
                },
                command = commands.recv() => match command {
                    Some(InterpreterCommand::Topic { prompt }) => self.on_topic(prompt),
                    Some(InterpreterCommand::Close) | None => {
                        self.phase = Phase::Closed;
                        return Ok(());
                    }
                },
            }
        }
    }

    fn on_open(&mut self) {
        info!("control channel open");
        self.phase = Phase::AwaitingSessionCreated;
        self.shared.clear_history();
        self.shared.set_session_state(SessionState::Active);
    }

    fn on_message(&mut self, value: Value) {
        let mut configured_now = false;
        match ServerEvent::from_value(&value) {
            Some(ServerEvent::SessionCreated { session }) => {
                if let Some(id) = session.and_then(|meta| meta.id) {
                    self.shared.set_session_id(id);
                }
                if self.phase == Phase::AwaitingSessionCreated && !self.configured {
                    self.configure();
                    configured_now = true;
                }
            }
            Some(ServerEvent::ResponseCreated {}) => {
                self.shared.set_response_in_flight(true);
                self.cancel_decay();
                self.shared.set_emotion(EmotionTarget::Happy);
            }
            Some(ServerEvent::ResponseAudioDelta { .. }) => {
                // the transport already routed the samples; settle the face
                // so the mouth animation reads cleanly over it
                self.shared.set_emotion(EmotionTarget::Neutral);
            }
            Some(ServerEvent::ResponseAudioTranscriptDelta { .. }) => {}
            Some(ServerEvent::SpeechStarted {}) => {
                self.shared.set_speaking(true);
            }
            Some(ServerEvent::SpeechStopped {}) => {
                self.shared.set_speaking(false);
                self.shared.set_emotion(EmotionTarget::Thinking);
            }
            Some(ServerEvent::ResponseDone { response }) => {
                self.shared.set_response_in_flight(false);
                self.shared.set_emotion(EmotionTarget::Encouraging);
                self.schedule_decay();
                if let Some("failed") =
                    response.as_ref().and_then(|meta| meta.status.as_deref())
                {
                    warn!("response finished with status failed");
                }
            }
            Some(ServerEvent::Error { error }) => {
                error!(
                    code = error.code.as_deref().unwrap_or("unknown"),
                    message = error.message.as_deref().unwrap_or(""),
                    "control channel error event"
                );
            }
            None => {
                debug!(
                    event_type = value
                        .get("type")
                        .and_then(serde_json::Value::as_str)
                        .unwrap_or("unknown"),
                    "ignoring unrecognized control event"
                );
            }
        }
        // any traffic after the handshake means the session is fully live
        if self.phase == Phase::Configuring && !configured_now {
            self.phase = Phase::Live;
        }
        self.shared.record(ControlEvent::inbound(value));
    }

    /// The one-time configuration handshake: persona instructions now, the
    /// first response request after a delay. Duplicate `session.created`
    /// events never re-trigger it.
    fn configure(&mut self) {
        let session = self
            .config
            .clone()
            .with_instructions(self.mode.instructions());
        if self.send(ClientEvent::SessionUpdate { session }).is_err() {
            return;
        }
        self.configured = true;
        self.phase = Phase::Configuring;

        let control_tx = self.control_tx.clone();
        let shared = self.shared.clone();
        let delay = self.timings.configure_delay;
        self.configure_task = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = transmit(&control_tx, &shared, ClientEvent::ResponseCreate {});
        }));
        info!(mode = %self.mode, "session configured");
    }

    fn on_topic(&mut self, prompt: String) {
        if self.shared.response_in_flight() {
            debug!("ignoring topic request while a response is in flight");
            return;
        }
        if self.send(ClientEvent::user_text(prompt)).is_err() {
            return;
        }
        let _ = self.send(ClientEvent::ResponseCreate {});
    }

    /// Transmits one client event. With no open channel this logs and leaves
    /// the history untouched.
    fn send(&self, event: ClientEvent) -> Result<(), EngineError> {
        if matches!(self.phase, Phase::AwaitingOpen | Phase::Closed) {
            warn!("dropping outbound event: control channel unavailable");
            return Err(EngineError::ChannelUnavailable);
        }
        transmit(&self.control_tx, &self.shared, event)
    }

    /// Queues the encouraging-to-neutral reversion, replacing any pending
    /// one so only the latest response decays.
    fn schedule_decay(&mut self) {
        self.cancel_decay();
        let shared = self.shared.clone();
        let delay = self.timings.emotion_decay;
        self.decay_task = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            shared.set_emotion(EmotionTarget::Neutral);
        }));
    }

    fn cancel_decay(&mut self) {
        if let Some(task) = self.decay_task.take() {
            task.abort();
        }
    }
}

impl Drop for Interpreter {
    fn drop(&mut self) {
        if let Some(task) = self.configure_task.take() {
            task.abort();
        }
        if let Some(task) = self.decay_task.take() {
            task.abort();
        }
    }
}

/// Assigns an event id, pushes the wire object at the transport, and records
/// it in history once actually handed over.
fn transmit(
    control_tx: &mpsc::Sender<Value>,
    shared: &SharedState,
    event: ClientEvent,
) -> Result<(), EngineError> {
    let wire = event.into_wire(events::new_event_id());
    if control_tx.try_send(wire.clone()).is_err() {
        warn!("dropping outbound event: control channel unavailable");
        return Err(EngineError::ChannelUnavailable);
    }
    shared.record(ControlEvent::outbound(wire));
    Ok(())
}
