//! Socket transport: control events and both audio directions multiplexed
//! over one WebSocket connection to the realtime endpoint.

use crate::audio::{self, AudioSink};
use crate::error::NegotiationError;
use crate::events::{ClientEvent, SessionConfig};
use crate::media::{CaptureSource, ChannelSignal, Connector, MicrophoneTrack, PeerHandles};
use crate::token::Credential;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, http::HeaderValue, protocol::Message as WsMessage},
};
use tracing::{debug, info, warn};

const CONTROL_BUFFER: usize = 64;
const SIGNAL_BUFFER: usize = 256;

/// Connects to the realtime endpoint over a WebSocket and adapts it to the
/// same handle bundle the SDP shape produces: microphone chunks go out as
/// audio-append events, response audio lands in the sink, and every inbound
/// wire object is surfaced as a channel signal.
pub struct SocketConnector {
    url: String,
    capture: Arc<dyn CaptureSource>,
}

impl SocketConnector {
    /// `url` is the realtime WebSocket endpoint without the model query,
    /// e.g. `wss://api.openai.com/v1/realtime`.
    pub fn new(url: impl Into<String>, capture: Arc<dyn CaptureSource>) -> Self {
        SocketConnector {
            url: url.into(),
            capture,
        }
    }
}

#[async_trait]
impl Connector for SocketConnector {
    async fn connect(
        &self,
        credential: Credential,
        session: &SessionConfig,
    ) -> Result<PeerHandles, NegotiationError> {
        let mut microphone = self.capture.open()?;

        let url = format!("{}?model={}", self.url, session.model);
        let mut request = match url.into_client_request() {
            Ok(request) => request,
            Err(err) => {
                microphone.stop();
                return Err(err.into());
            }
        };
        let bearer = match format!("Bearer {}", credential.expose()).parse::<HeaderValue>() {
            Ok(value) => value,
            Err(err) => {
                microphone.stop();
                return Err(err.into());
            }
        };
        request.headers_mut().insert("Authorization", bearer);
        request
            .headers_mut()
            .insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

        let (stream, _) = match connect_async(request).await {
            Ok(connected) => connected,
            Err(err) => {
                microphone.stop();
                return Err(err.into());
            }
        };
        info!(model = %session.model, "connected to realtime socket");
        let (mut ws_tx, mut ws_rx) = stream.split();

        let (control_tx, mut control_rx) = mpsc::channel::<Value>(CONTROL_BUFFER);
        let (signal_tx, signals) = mpsc::channel::<ChannelSignal>(SIGNAL_BUFFER);
        let sink = AudioSink::new();

        let mut mic_rx = match microphone.take_samples() {
            Some(rx) => rx,
            None => {
                let (_tx, rx) = mpsc::channel(1);
                rx
            }
        };

        // A successful handshake doubles as the channel-open signal.
        let _ = signal_tx.try_send(ChannelSignal::Opened);

        let writer = tokio::spawn(async move {
            let mut mic_open = true;
            loop {
                tokio::select! {
                    outbound = control_rx.recv() => match outbound {
                        Some(value) => {
                            let text = match serde_json::to_string(&value) {
                                Ok(text) => text,
                                Err(err) => {
                                    warn!(%err, "dropping unserializable outbound event");
                                    continue;
                                }
                            };
                            if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                    chunk = mic_rx.recv(), if mic_open => match chunk {
                        Some(samples) => {
                            let event = ClientEvent::InputAudioBufferAppend {
                                audio: audio::encode_pcm16(&samples),
                            };
                            let text = match serde_json::to_string(&event) {
                                Ok(text) => text,
                                Err(_) => continue,
                            };
                            if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        None => mic_open = false,
                    },
                }
            }
            let _ = ws_tx.close().await;
        });

        let reader_sink = sink.clone();
        let reader = tokio::spawn(async move {
            while let Some(message) = ws_rx.next().await {
                match message {
                    Ok(WsMessage::Text(text)) => {
                        let value: Value = match serde_json::from_str(&text) {
                            Ok(value) => value,
                            Err(err) => {
                                debug!(%err, "ignoring unparseable control message");
                                continue;
                            }
                        };
                        if value.get("type").and_then(Value::as_str)
                            == Some("response.audio.delta")
                        {
                            if let Some(delta) = value.get("delta").and_then(Value::as_str) {
                                reader_sink.push(&audio::decode_pcm16(delta));
                            }
                        }
                        if signal_tx.send(ChannelSignal::Message(value)).await.is_err() {
                            break;
                        }
                    }
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        warn!(%err, "realtime socket read failed");
                        break;
                    }
                }
            }
            let _ = signal_tx.send(ChannelSignal::Closed).await;
        });

        Ok(PeerHandles {
            control_tx,
            signals,
            audio: sink,
            microphone,
            tasks: vec![writer, reader],
        })
    }
}
