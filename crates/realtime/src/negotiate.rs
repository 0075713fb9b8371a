//! SDP offer/answer negotiation against the realtime calls endpoint.

use crate::error::NegotiationError;
use crate::events::SessionConfig;
use crate::media::{CaptureSource, Connector, MediaStack, PeerHandles, SessionDescription};
use crate::token::Credential;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

/// Where the answer comes from. Offer and answer text pass through verbatim
/// on either route.
#[derive(Debug, Clone)]
pub enum ExchangeRoute {
    /// Two-step flow: POST the bare offer to the remote calls endpoint,
    /// `Content-Type: application/sdp`, the model as a query parameter and
    /// the short-lived credential as bearer.
    Direct { calls_url: String },
    /// Combined flow relayed through the local broker, which holds the
    /// long-lived key and submits offer and session document together.
    Brokered { session_url: String },
}

/// Performs the offer/answer HTTP exchange.
#[derive(Clone)]
pub struct SdpExchange {
    http: reqwest::Client,
    route: ExchangeRoute,
}

impl SdpExchange {
    pub fn new(route: ExchangeRoute) -> Self {
        SdpExchange {
            http: reqwest::Client::new(),
            route,
        }
    }

    /// Submits the offer and returns the answer, both verbatim.
    pub async fn swap(
        &self,
        offer: &SessionDescription,
        credential: &Credential,
        session: &SessionConfig,
    ) -> Result<SessionDescription, NegotiationError> {
        let request = match &self.route {
            ExchangeRoute::Direct { calls_url } => self
                .http
                .post(calls_url)
                .query(&[("model", session.model.as_str())])
                .bearer_auth(credential.expose())
                .header(reqwest::header::CONTENT_TYPE, "application/sdp")
                .body(offer.as_str().to_owned()),
            ExchangeRoute::Brokered { session_url } => self
                .http
                .post(session_url)
                .header(reqwest::header::CONTENT_TYPE, "application/sdp")
                .body(offer.as_str().to_owned()),
        };
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(NegotiationError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(SessionDescription::new(body))
    }
}

/// The four-step negotiation: acquire capture, create the local offer,
/// exchange it for an answer, apply the answer. Generic over the platform
/// media stack; never retries on its own.
pub struct RtcNegotiator {
    capture: Arc<dyn CaptureSource>,
    media: Arc<dyn MediaStack>,
    exchange: SdpExchange,
}

impl RtcNegotiator {
    pub fn new(
        capture: Arc<dyn CaptureSource>,
        media: Arc<dyn MediaStack>,
        exchange: SdpExchange,
    ) -> Self {
        RtcNegotiator {
            capture,
            media,
            exchange,
        }
    }
}

#[async_trait]
impl Connector for RtcNegotiator {
    async fn connect(
        &self,
        credential: Credential,
        session: &SessionConfig,
    ) -> Result<PeerHandles, NegotiationError> {
        let mut microphone = self.capture.open()?;

        let mut peer = match self.media.new_session().await {
            Ok(peer) => peer,
            Err(err) => {
                microphone.stop();
                return Err(err.into());
            }
        };

        let offer = match peer.create_offer(&microphone).await {
            Ok(offer) => offer,
            Err(err) => {
                microphone.stop();
                return Err(err.into());
            }
        };
        debug!(offer_len = offer.as_str().len(), "created local offer");

        let answer = match self.exchange.swap(&offer, &credential, session).await {
            Ok(answer) => answer,
            Err(err) => {
                microphone.stop();
                return Err(err);
            }
        };
        debug!(answer_len = answer.as_str().len(), "received remote answer");

        let handles = peer.apply_answer(answer, microphone).await?;
        info!(model = %session.model, "negotiation complete");
        Ok(handles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioSink;
    use crate::error::MediaError;
    use crate::media::{ChannelSignal, MicrophoneTrack, PeerSession, UnmanagedCapture};
    use axum::extract::Query;
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::IntoResponse;
    use axum::routing::post;
    use axum::Router;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    struct DeniedCapture;

    impl CaptureSource for DeniedCapture {
        fn open(&self) -> Result<MicrophoneTrack, MediaError> {
            Err(MediaError::AccessDenied("user declined".to_string()))
        }
    }

    struct FakeStack {
        sessions: AtomicUsize,
    }

    #[async_trait]
    impl MediaStack for FakeStack {
        async fn new_session(&self) -> Result<Box<dyn PeerSession>, MediaError> {
            self.sessions.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakePeer))
        }
    }

    struct FakePeer;

    #[async_trait]
    impl PeerSession for FakePeer {
        async fn create_offer(
            &mut self,
            _microphone: &MicrophoneTrack,
        ) -> Result<SessionDescription, MediaError> {
            Ok(SessionDescription::new("v=0 offer"))
        }

        async fn apply_answer(
            self: Box<Self>,
            answer: SessionDescription,
            microphone: MicrophoneTrack,
        ) -> Result<PeerHandles, MediaError> {
            assert_eq!(answer.as_str(), "v=0 answer");
            let (control_tx, _control_rx) = mpsc::channel(4);
            let (_signal_tx, signals) = mpsc::channel::<ChannelSignal>(4);
            Ok(PeerHandles {
                control_tx,
                signals,
                audio: AudioSink::new(),
                microphone,
                tasks: Vec::new(),
            })
        }
    }

    async fn spawn(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn calls_router() -> Router {
        Router::new().route(
            "/v1/realtime/calls",
            post(
                |headers: HeaderMap, Query(params): Query<HashMap<String, String>>, body: String| async move {
                    let authorized = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .map(|v| v == "Bearer ek_test")
                        .unwrap_or(false);
                    let sdp_typed = headers
                        .get("content-type")
                        .and_then(|v| v.to_str().ok())
                        .map(|v| v.starts_with("application/sdp"))
                        .unwrap_or(false);
                    if !authorized || !sdp_typed {
                        return (StatusCode::UNAUTHORIZED, "bad headers").into_response();
                    }
                    if params.get("model").map(String::as_str) != Some("gpt-realtime") {
                        return (StatusCode::BAD_REQUEST, "missing model").into_response();
                    }
                    if body != "v=0 offer" {
                        return (StatusCode::BAD_REQUEST, "unexpected offer").into_response();
                    }
                    "v=0 answer".into_response()
                },
            ),
        )
    }

    fn negotiator(calls_url: String, capture: Arc<dyn CaptureSource>, stack: Arc<FakeStack>) -> RtcNegotiator {
        RtcNegotiator::new(
            capture,
            stack,
            SdpExchange::new(ExchangeRoute::Direct { calls_url }),
        )
    }

    #[tokio::test]
    async fn direct_route_exchanges_offer_for_answer() {
        let base = spawn(calls_router()).await;
        let stack = Arc::new(FakeStack {
            sessions: AtomicUsize::new(0),
        });
        let negotiator = negotiator(
            format!("{base}/v1/realtime/calls"),
            Arc::new(UnmanagedCapture),
            stack.clone(),
        );
        let handles = negotiator
            .connect(
                Credential::new("ek_test"),
                &SessionConfig::new("gpt-realtime", "marin"),
            )
            .await
            .unwrap();
        assert_eq!(stack.sessions.load(Ordering::SeqCst), 1);
        drop(handles);
    }

    #[tokio::test]
    async fn rejected_offer_surfaces_status_and_body() {
        let base = spawn(Router::new().route(
            "/v1/realtime/calls",
            post(|| async { (StatusCode::BAD_GATEWAY, "upstream sad") }),
        ))
        .await;
        let stack = Arc::new(FakeStack {
            sessions: AtomicUsize::new(0),
        });
        let negotiator = negotiator(
            format!("{base}/v1/realtime/calls"),
            Arc::new(UnmanagedCapture),
            stack,
        );
        match negotiator
            .connect(
                Credential::new("ek_test"),
                &SessionConfig::new("gpt-realtime", "marin"),
            )
            .await
        {
            Err(NegotiationError::Rejected { status, body }) => {
                assert_eq!(status, 502);
                assert_eq!(body, "upstream sad");
            }
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn denied_capture_fails_before_any_network_io() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let base = spawn(Router::new().route(
            "/v1/realtime/calls",
            post(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { "v=0 answer" }
            }),
        ))
        .await;
        let stack = Arc::new(FakeStack {
            sessions: AtomicUsize::new(0),
        });
        let negotiator = negotiator(
            format!("{base}/v1/realtime/calls"),
            Arc::new(DeniedCapture),
            stack.clone(),
        );
        let result = negotiator
            .connect(
                Credential::new("ek_test"),
                &SessionConfig::new("gpt-realtime", "marin"),
            )
            .await;
        assert!(matches!(
            result,
            Err(NegotiationError::Media(MediaError::AccessDenied(_)))
        ));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(stack.sessions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn brokered_route_posts_offer_without_credential() {
        let base = spawn(Router::new().route(
            "/session",
            post(|headers: HeaderMap, body: String| async move {
                assert!(headers.get("authorization").is_none());
                assert_eq!(body, "v=0 offer");
                "v=0 answer"
            }),
        ))
        .await;
        let exchange = SdpExchange::new(ExchangeRoute::Brokered {
            session_url: format!("{base}/session"),
        });
        let answer = exchange
            .swap(
                &SessionDescription::new("v=0 offer"),
                &Credential::new("unused"),
                &SessionConfig::new("gpt-realtime", "marin"),
            )
            .await
            .unwrap();
        assert_eq!(answer.as_str(), "v=0 answer");
    }
}
