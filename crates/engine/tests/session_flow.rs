//! End-to-end session flows over a scripted in-memory transport.

use async_trait::async_trait;
use axum::{Json, Router, http::StatusCode, routing::get};
use prattle_engine::{
    EmotionTarget, EngineError, EngineSettings, PersonaMode, SessionEngine, SessionState, Timings,
};
use prattle_realtime::AudioSink;
use prattle_realtime::error::{NegotiationError, TokenBrokerError};
use prattle_realtime::events::SessionConfig;
use prattle_realtime::media::{ChannelSignal, Connector, MicrophoneTrack, PeerHandles};
use prattle_realtime::token::{Credential, TokenBroker};
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

/// Transport ends the test script drives for one connected session.
struct ScriptEnds {
    signal_tx: mpsc::Sender<ChannelSignal>,
    control_rx: mpsc::Receiver<Value>,
    audio: AudioSink,
}

/// Hands out in-memory transports and keeps the script-side ends.
struct ScriptedConnector {
    handoff: Arc<Mutex<VecDeque<ScriptEnds>>>,
    connects: Arc<AtomicUsize>,
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(
        &self,
        _credential: Credential,
        _session: &SessionConfig,
    ) -> Result<PeerHandles, NegotiationError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let (control_tx, control_rx) = mpsc::channel(32);
        let (signal_tx, signals) = mpsc::channel(32);
        let audio = AudioSink::new();
        self.handoff.lock().unwrap().push_back(ScriptEnds {
            signal_tx,
            control_rx,
            audio: audio.clone(),
        });
        Ok(PeerHandles {
            control_tx,
            signals,
            audio,
            microphone: MicrophoneTrack::unmanaged(),
            tasks: Vec::new(),
        })
    }
}

async fn spawn_broker(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}/token")
}

async fn granting_broker() -> String {
    spawn_broker(Router::new().route(
        "/token",
        get(|| async { Json(json!({"value": "ek_scripted"})) }),
    ))
    .await
}

struct Fixture {
    engine: SessionEngine,
    handoff: Arc<Mutex<VecDeque<ScriptEnds>>>,
    connects: Arc<AtomicUsize>,
}

async fn fixture() -> Fixture {
    let broker_url = granting_broker().await;
    let handoff = Arc::new(Mutex::new(VecDeque::new()));
    let connects = Arc::new(AtomicUsize::new(0));
    let connector = Arc::new(ScriptedConnector {
        handoff: handoff.clone(),
        connects: connects.clone(),
    });
    let mut settings = EngineSettings::new(SessionConfig::new("gpt-realtime", "marin"));
    settings.timings = Timings {
        configure_delay: Duration::from_millis(30),
        emotion_decay: Duration::from_millis(80),
    };
    Fixture {
        engine: SessionEngine::new(TokenBroker::new(broker_url), connector, settings),
        handoff,
        connects,
    }
}

impl Fixture {
    fn take_ends(&self) -> ScriptEnds {
        self.handoff
            .lock()
            .unwrap()
            .pop_front()
            .expect("no transport was handed out")
    }
}

impl ScriptEnds {
    async fn open(&self) {
        self.signal_tx.send(ChannelSignal::Opened).await.unwrap();
    }

    async fn inject(&self, event: Value) {
        self.signal_tx
            .send(ChannelSignal::Message(event))
            .await
            .unwrap();
    }

    async fn next_outbound(&mut self) -> Value {
        timeout(Duration::from_secs(2), self.control_rx.recv())
            .await
            .expect("timed out waiting for an outbound event")
            .expect("control channel closed")
    }
}

async fn wait_state(engine: &SessionEngine, want: SessionState) {
    let mut rx = engine.shared().session_state_watch();
    timeout(Duration::from_secs(2), rx.wait_for(|state| *state == want))
        .await
        .unwrap_or_else(|_| panic!("state never became {want:?}"))
        .unwrap();
}

async fn wait_emotion(engine: &SessionEngine, want: EmotionTarget) {
    let mut rx = engine.shared().emotion_watch();
    timeout(Duration::from_secs(2), rx.wait_for(|emotion| *emotion == want))
        .await
        .unwrap_or_else(|_| panic!("emotion never became {want:?}"))
        .unwrap();
}

async fn wait_speaking(engine: &SessionEngine, want: bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while engine.shared().speaking() != want {
        assert!(
            tokio::time::Instant::now() < deadline,
            "speaking flag never became {want}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn handshake_stop_and_single_star() {
    let fixture = fixture().await;
    fixture.engine.start(PersonaMode::Narrative).await.unwrap();
    let mut ends = fixture.take_ends();

    ends.open().await;
    wait_state(&fixture.engine, SessionState::Active).await;

    ends.inject(json!({"type": "session.created", "session": {"id": "sess_demo"}}))
        .await;
    let update = ends.next_outbound().await;
    assert_eq!(update["type"], "session.update");
    assert!(
        update["session"]["instructions"]
            .as_str()
            .unwrap()
            .contains(PersonaMode::Narrative.greeting())
    );
    let first_response = ends.next_outbound().await;
    assert_eq!(first_response["type"], "response.create");

    assert!(fixture.engine.audio_sink().await.is_some());
    assert!(fixture.engine.started_at().await.is_some());
    assert_eq!(
        fixture.engine.shared().session_id().as_deref(),
        Some("sess_demo")
    );

    fixture.engine.stop().await;
    assert_eq!(fixture.engine.state(), SessionState::Closed);
    assert_eq!(fixture.engine.stars(), 1);
    assert!(ends.audio.is_detached());
    assert!(fixture.engine.audio_sink().await.is_none());
    assert!(fixture.engine.started_at().await.is_none());

    // a second stop must change nothing
    fixture.engine.stop().await;
    assert_eq!(fixture.engine.stars(), 1);
    assert_eq!(fixture.engine.state(), SessionState::Closed);
}

#[tokio::test]
async fn emotions_follow_the_conversation() {
    let fixture = fixture().await;
    fixture.engine.start(PersonaMode::Upbeat).await.unwrap();
    let mut ends = fixture.take_ends();
    ends.open().await;
    ends.inject(json!({"type": "session.created"})).await;
    ends.next_outbound().await;
    ends.next_outbound().await;

    ends.inject(json!({"type": "response.created"})).await;
    wait_emotion(&fixture.engine, EmotionTarget::Happy).await;

    ends.inject(json!({"type": "response.audio.delta", "delta": ""}))
        .await;
    wait_emotion(&fixture.engine, EmotionTarget::Neutral).await;

    ends.inject(json!({"type": "input_audio_buffer.speech_started"}))
        .await;
    wait_speaking(&fixture.engine, true).await;

    ends.inject(json!({"type": "input_audio_buffer.speech_stopped"}))
        .await;
    wait_speaking(&fixture.engine, false).await;
    wait_emotion(&fixture.engine, EmotionTarget::Thinking).await;

    ends.inject(json!({"type": "response.done", "response": {"status": "completed"}}))
        .await;
    wait_emotion(&fixture.engine, EmotionTarget::Encouraging).await;
    // the encouragement decays back to neutral on its own
    wait_emotion(&fixture.engine, EmotionTarget::Neutral).await;

    fixture.engine.stop().await;
}

#[tokio::test]
async fn second_start_is_rejected() {
    let fixture = fixture().await;
    fixture.engine.start(PersonaMode::Upbeat).await.unwrap();

    let result = fixture.engine.start(PersonaMode::Inquisitive).await;
    assert!(matches!(result, Err(EngineError::AlreadyActive)));
    assert_eq!(fixture.connects.load(Ordering::SeqCst), 1);

    fixture.engine.stop().await;
}

#[tokio::test]
async fn stopping_before_active_earns_no_star() {
    let fixture = fixture().await;
    fixture.engine.start(PersonaMode::Upbeat).await.unwrap();
    // never open the channel; the session is still negotiating
    fixture.engine.stop().await;
    assert_eq!(fixture.engine.stars(), 0);
    assert_eq!(fixture.engine.state(), SessionState::Closed);
}

#[tokio::test]
async fn topic_turns_respect_response_in_flight() {
    let fixture = fixture().await;
    fixture.engine.start(PersonaMode::Upbeat).await.unwrap();
    let mut ends = fixture.take_ends();
    ends.open().await;
    ends.inject(json!({"type": "session.created"})).await;
    ends.next_outbound().await;
    ends.next_outbound().await;

    assert!(fixture.engine.request_topic("Let's talk about school!").await.unwrap());
    let item = ends.next_outbound().await;
    assert_eq!(item["type"], "conversation.item.create");
    assert_eq!(item["item"]["role"], "user");
    let request = ends.next_outbound().await;
    assert_eq!(request["type"], "response.create");

    ends.inject(json!({"type": "response.created"})).await;
    wait_emotion(&fixture.engine, EmotionTarget::Happy).await;
    assert!(!fixture.engine.request_topic("Another topic").await.unwrap());

    ends.inject(json!({"type": "response.done"})).await;
    wait_emotion(&fixture.engine, EmotionTarget::Encouraging).await;
    assert!(fixture.engine.request_topic("Let's talk about food!").await.unwrap());

    fixture.engine.stop().await;
}

#[tokio::test]
async fn topic_after_stop_is_unavailable() {
    let fixture = fixture().await;
    fixture.engine.start(PersonaMode::Upbeat).await.unwrap();
    let ends = fixture.take_ends();
    ends.open().await;
    wait_state(&fixture.engine, SessionState::Active).await;
    fixture.engine.stop().await;

    let before = fixture.engine.shared().history_len();
    let result = fixture.engine.request_topic("anyone there?").await;
    assert!(matches!(result, Err(EngineError::ChannelUnavailable)));
    assert_eq!(fixture.engine.shared().history_len(), before);
}

#[tokio::test]
async fn remote_close_fails_the_session_without_reward() {
    let fixture = fixture().await;
    fixture.engine.start(PersonaMode::Upbeat).await.unwrap();
    let ends = fixture.take_ends();
    ends.open().await;
    wait_state(&fixture.engine, SessionState::Active).await;

    ends.signal_tx.send(ChannelSignal::Closed).await.unwrap();
    wait_state(&fixture.engine, SessionState::Failed).await;
    assert_eq!(fixture.engine.stars(), 0);
    assert!(fixture.engine.audio_sink().await.is_none());

    // a failed engine accepts a fresh start
    fixture.engine.start(PersonaMode::Upbeat).await.unwrap();
    assert_eq!(fixture.connects.load(Ordering::SeqCst), 2);
    fixture.engine.stop().await;
}

#[tokio::test]
async fn broker_rejection_fails_the_start() {
    let broker_url = spawn_broker(Router::new().route(
        "/token",
        get(|| async {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "upstream rejected the request"})),
            )
        }),
    ))
    .await;
    let handoff = Arc::new(Mutex::new(VecDeque::new()));
    let connects = Arc::new(AtomicUsize::new(0));
    let connector = Arc::new(ScriptedConnector {
        handoff,
        connects: connects.clone(),
    });
    let engine = SessionEngine::new(
        TokenBroker::new(broker_url),
        connector,
        EngineSettings::new(SessionConfig::new("gpt-realtime", "marin")),
    );

    let result = engine.start(PersonaMode::Upbeat).await;
    assert!(matches!(
        result,
        Err(EngineError::TokenBroker(TokenBrokerError::Rejected { status: 500, .. }))
    ));
    assert_eq!(engine.state(), SessionState::Failed);
    assert_eq!(connects.load(Ordering::SeqCst), 0);
    assert_eq!(engine.stars(), 0);
}
