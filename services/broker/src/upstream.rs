//! Client for the remote realtime REST surface.
//!
//! Both endpoints pass the upstream's verdict back to the caller: a non-2xx
//! status is data here, not an error. Only transport-level failure surfaces
//! as `Err`.

use crate::config::Config;
use prattle_realtime::events::SessionConfig;
use reqwest::multipart::Form;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};

pub struct RealtimeUpstream {
    base: String,
    api_key: SecretString,
    session: SessionConfig,
    http: reqwest::Client,
}

impl RealtimeUpstream {
    pub fn new(base: impl Into<String>, api_key: SecretString, session: SessionConfig) -> Self {
        RealtimeUpstream {
            base: base.into(),
            api_key,
            session,
            http: reqwest::Client::new(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        RealtimeUpstream::new(
            config.upstream_base.clone(),
            config.openai_api_key.clone(),
            SessionConfig::new(config.realtime_model.clone(), config.realtime_voice.clone()),
        )
    }

    /// The session document minted credentials are scoped to.
    pub fn session_document(&self) -> &SessionConfig {
        &self.session
    }

    /// Asks the credential-minting endpoint for a short-lived token scoped to
    /// the configured session document. Returns the upstream status and JSON
    /// body as-is.
    pub async fn mint_credential(&self) -> anyhow::Result<(u16, Value)> {
        let response = self
            .http
            .post(format!("{}/client_secrets", self.base))
            .bearer_auth(self.api_key.expose_secret())
            .json(&json!({ "session": self.session }))
            .send()
            .await?;
        let status = response.status().as_u16();
        let body: Value = response.json().await?;
        Ok((status, body))
    }

    /// Forwards one SDP offer to the calls endpoint as a multipart form with
    /// `sdp` and `session` fields. Returns the upstream status and the answer
    /// text verbatim.
    pub async fn exchange_offer(&self, offer: String) -> anyhow::Result<(u16, String)> {
        let form = Form::new()
            .text("sdp", offer)
            .text("session", serde_json::to_string(&self.session)?);
        let response = self
            .http
            .post(format!("{}/calls", self.base))
            .bearer_auth(self.api_key.expose_secret())
            .header("OpenAI-Beta", "realtime=v1")
            .multipart(form)
            .send()
            .await?;
        let status = response.status().as_u16();
        let answer = response.text().await?;
        Ok((status, answer))
    }
}
