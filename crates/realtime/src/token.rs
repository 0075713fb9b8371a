//! Client for the token broker endpoint.

use crate::error::TokenBrokerError;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

/// A short-lived session credential. Owned for the duration of one
/// negotiation, never persisted, never reused across sessions.
pub struct Credential {
    value: SecretString,
}

impl Credential {
    pub fn new(value: impl Into<String>) -> Self {
        Credential {
            value: SecretString::from(value.into()),
        }
    }

    /// Exposes the raw token for an Authorization header.
    pub fn expose(&self) -> &str {
        self.value.expose_secret()
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential(****)")
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    value: String,
}

#[derive(Deserialize)]
struct BrokerErrorBody {
    error: Option<String>,
}

/// Fetches short-lived credentials from the broker endpoint.
#[derive(Clone)]
pub struct TokenBroker {
    endpoint: String,
    http: reqwest::Client,
}

impl TokenBroker {
    pub fn new(endpoint: impl Into<String>) -> Self {
        TokenBroker {
            endpoint: endpoint.into(),
            http: reqwest::Client::new(),
        }
    }

    /// Requests one fresh credential.
    ///
    /// Non-2xx broker responses surface their status and error message;
    /// transport failures surface as [`TokenBrokerError::Network`].
    pub async fn fetch(&self) -> Result<Credential, TokenBrokerError> {
        let response = self.http.get(&self.endpoint).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<BrokerErrorBody>(&body)
                .ok()
                .and_then(|parsed| parsed.error)
                .unwrap_or(body);
            tracing::error!(status = status.as_u16(), %message, "token broker rejected the request");
            return Err(TokenBrokerError::Rejected {
                status: status.as_u16(),
                message,
            });
        }
        let token: TokenResponse = response
            .json()
            .await
            .map_err(|err| TokenBrokerError::Malformed(err.to_string()))?;
        Ok(Credential::new(token.value))
    }
}
