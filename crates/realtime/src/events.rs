//! The control-channel vocabulary and the recorded event form.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Events the client writes to the control channel.
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Applies session configuration, including the persona instructions.
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionConfig },
    /// Appends a conversation item ahead of the next response.
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: ConversationItem },
    /// Asks the model to produce a response.
    #[serde(rename = "response.create")]
    ResponseCreate {},
    /// A chunk of microphone audio, base64 PCM16. Produced by the transport,
    /// not by callers, and never recorded in history.
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend { audio: String },
}

impl ClientEvent {
    /// Builds the conversation item event for a user text turn.
    pub fn user_text(text: impl Into<String>) -> Self {
        ClientEvent::ConversationItemCreate {
            item: ConversationItem::user_text(text),
        }
    }

    /// Serializes into the wire object, attaching the client-generated
    /// `event_id` every outbound message must carry.
    pub fn into_wire(self, event_id: String) -> Value {
        let mut value = serde_json::to_value(&self).unwrap_or(Value::Null);
        if let Value::Object(map) = &mut value {
            map.insert("event_id".to_string(), Value::String(event_id));
        }
        value
    }
}

/// The session configuration document. The broker sends the same shape when
/// minting credentials; the client sends it inside `session.update`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Session kind; always `"realtime"`.
    #[serde(rename = "type")]
    pub kind: String,
    pub model: String,
    pub audio: AudioSettings,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AudioSettings {
    pub output: OutputAudio,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct OutputAudio {
    pub voice: String,
}

impl SessionConfig {
    pub fn new(model: impl Into<String>, voice: impl Into<String>) -> Self {
        SessionConfig {
            kind: "realtime".to_string(),
            model: model.into(),
            audio: AudioSettings {
                output: OutputAudio {
                    voice: voice.into(),
                },
            },
            instructions: None,
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }
}

#[derive(Serialize, Debug, Clone)]
pub struct ConversationItem {
    #[serde(rename = "type")]
    pub kind: String,
    pub role: String,
    pub content: Vec<ContentPart>,
}

#[derive(Serialize, Debug, Clone)]
pub struct ContentPart {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}

impl ConversationItem {
    pub fn user_text(text: impl Into<String>) -> Self {
        ConversationItem {
            kind: "message".to_string(),
            role: "user".to_string(),
            content: vec![ContentPart {
                kind: "input_text".to_string(),
                text: text.into(),
            }],
        }
    }
}

/// Events the remote service writes to the control channel. Messages outside
/// this vocabulary decode to `None` and are ignored by the interpreter.
#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// The remote session object now exists.
    #[serde(rename = "session.created")]
    SessionCreated { session: Option<SessionMeta> },
    /// The model began producing a response.
    #[serde(rename = "response.created")]
    ResponseCreated {},
    /// A chunk of response audio, base64 PCM16.
    #[serde(rename = "response.audio.delta")]
    ResponseAudioDelta { delta: String },
    /// A chunk of the response transcript.
    #[serde(rename = "response.audio_transcript.delta")]
    ResponseAudioTranscriptDelta { delta: String },
    /// Voice activity detected on the user's microphone.
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted {},
    /// Voice activity ended on the user's microphone.
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped {},
    /// The response finished.
    #[serde(rename = "response.done")]
    ResponseDone { response: Option<ResponseMeta> },
    /// A protocol-level error report.
    #[serde(rename = "error")]
    Error { error: ErrorDetail },
}

#[derive(Deserialize, Debug, Clone)]
pub struct SessionMeta {
    pub id: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ResponseMeta {
    pub status: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ErrorDetail {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub code: Option<String>,
    pub message: Option<String>,
}

impl ServerEvent {
    /// Decodes a wire object against the recognized vocabulary. `None` means
    /// unknown type or malformed shape; never an error.
    pub fn from_value(value: &Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }
}

/// A single recorded control-channel message. Entries are immutable once
/// recorded and kept newest-first for display only.
#[derive(Serialize, Debug, Clone)]
pub struct ControlEvent {
    pub event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub payload: Value,
    pub outbound: bool,
}

impl ControlEvent {
    /// Records an inbound wire object, stamping arrival time whenever the
    /// payload carries no timestamp of its own.
    pub fn inbound(payload: Value) -> Self {
        let timestamp = payload
            .get("timestamp")
            .and_then(Value::as_str)
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|parsed| parsed.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        ControlEvent {
            event_type: event_type_of(&payload),
            event_id: event_id_of(&payload),
            timestamp,
            payload,
            outbound: false,
        }
    }

    /// Records an outbound wire object after transmission.
    pub fn outbound(payload: Value) -> Self {
        ControlEvent {
            event_type: event_type_of(&payload),
            event_id: event_id_of(&payload),
            timestamp: Utc::now(),
            payload,
            outbound: true,
        }
    }
}

fn event_type_of(payload: &Value) -> String {
    payload
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string()
}

fn event_id_of(payload: &Value) -> Option<String> {
    payload
        .get("event_id")
        .and_then(Value::as_str)
        .map(str::to_owned)
}

/// Produces a fresh client-side event id.
pub fn new_event_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_session_created() {
        let value = json!({"type": "session.created", "session": {"id": "sess_abc"}});
        match ServerEvent::from_value(&value) {
            Some(ServerEvent::SessionCreated { session }) => {
                assert_eq!(session.and_then(|s| s.id).as_deref(), Some("sess_abc"));
            }
            other => panic!("unexpected decode: {other:?}"),
        }
    }

    #[test]
    fn decodes_audio_delta() {
        let value = json!({"type": "response.audio.delta", "delta": "AAAA"});
        match ServerEvent::from_value(&value) {
            Some(ServerEvent::ResponseAudioDelta { delta }) => assert_eq!(delta, "AAAA"),
            other => panic!("unexpected decode: {other:?}"),
        }
    }

    #[test]
    fn unknown_type_decodes_to_none() {
        let value = json!({"type": "rate_limits.updated", "rate_limits": []});
        assert!(ServerEvent::from_value(&value).is_none());
    }

    #[test]
    fn malformed_known_type_decodes_to_none() {
        // delta must be a string
        let value = json!({"type": "response.audio.delta", "delta": 17});
        assert!(ServerEvent::from_value(&value).is_none());
    }

    #[test]
    fn session_update_wire_shape() {
        let event = ClientEvent::SessionUpdate {
            session: SessionConfig::new("gpt-realtime", "marin")
                .with_instructions("Keep every answer short."),
        };
        let wire = event.into_wire("evt_1".to_string());
        assert_eq!(wire["type"], "session.update");
        assert_eq!(wire["event_id"], "evt_1");
        assert_eq!(wire["session"]["type"], "realtime");
        assert_eq!(wire["session"]["model"], "gpt-realtime");
        assert_eq!(wire["session"]["audio"]["output"]["voice"], "marin");
        assert_eq!(wire["session"]["instructions"], "Keep every answer short.");
    }

    #[test]
    fn user_text_wire_shape() {
        let wire = ClientEvent::user_text("Tell me about dinosaurs").into_wire(new_event_id());
        assert_eq!(wire["type"], "conversation.item.create");
        assert_eq!(wire["item"]["type"], "message");
        assert_eq!(wire["item"]["role"], "user");
        assert_eq!(wire["item"]["content"][0]["type"], "input_text");
        assert_eq!(wire["item"]["content"][0]["text"], "Tell me about dinosaurs");
        assert!(wire["event_id"].is_string());
    }

    #[test]
    fn response_create_wire_shape() {
        let wire = ClientEvent::ResponseCreate {}.into_wire("evt_2".to_string());
        assert_eq!(wire, json!({"type": "response.create", "event_id": "evt_2"}));
    }

    #[test]
    fn inbound_event_is_stamped_on_arrival() {
        let before = Utc::now();
        let recorded = ControlEvent::inbound(json!({"type": "response.done"}));
        assert_eq!(recorded.event_type, "response.done");
        assert!(!recorded.outbound);
        assert!(recorded.timestamp >= before);
    }

    #[test]
    fn inbound_event_keeps_existing_timestamp() {
        let recorded = ControlEvent::inbound(json!({
            "type": "error",
            "timestamp": "2024-05-01T10:00:00Z"
        }));
        assert_eq!(recorded.timestamp.to_rfc3339(), "2024-05-01T10:00:00+00:00");
    }

    #[test]
    fn outbound_event_captures_id() {
        let recorded =
            ControlEvent::outbound(json!({"type": "response.create", "event_id": "evt_9"}));
        assert!(recorded.outbound);
        assert_eq!(recorded.event_id.as_deref(), Some("evt_9"));
    }
}
