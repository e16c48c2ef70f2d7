use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;

use winback_core::config::TwilioConfig;

#[derive(Clone, Debug, Error)]
pub enum TransportError {
    #[error("sms provider unreachable: {0}")]
    Unreachable(String),
    #[error("sms provider rejected the message: {0}")]
    Rejected(String),
    #[error("sms transport is not configured")]
    NotConfigured,
}

/// Outbound delivery boundary. One logical send per call; retries belong to
/// the carrier integration outside the core.
#[async_trait]
pub trait SmsTransport: Send + Sync {
    /// Send `body` to `to` and return the provider's delivery id.
    async fn send(&self, to: &str, body: &str) -> Result<String, TransportError>;
}

/// Twilio Messages REST client using a messaging service SID.
pub struct TwilioRestClient {
    http: reqwest::Client,
    base_url: String,
    account_sid: String,
    auth_token: SecretString,
    messaging_service_sid: String,
}

impl TwilioRestClient {
    pub fn from_config(config: &TwilioConfig) -> Result<Self, TransportError> {
        let (Some(account_sid), Some(auth_token), Some(messaging_service_sid)) =
            (&config.account_sid, &config.auth_token, &config.messaging_service_sid)
        else {
            return Err(TransportError::NotConfigured);
        };

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|error| TransportError::Unreachable(error.to_string()))?;

        Ok(Self {
            http,
            base_url: "https://api.twilio.com".to_owned(),
            account_sid: account_sid.clone(),
            auth_token: auth_token.clone(),
            messaging_service_sid: messaging_service_sid.clone(),
        })
    }

    /// Point the client at a different API host. Test hook.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[derive(Debug, Deserialize)]
struct TwilioMessageResponse {
    sid: String,
}

#[async_trait]
impl SmsTransport for TwilioRestClient {
    async fn send(&self, to: &str, body: &str) -> Result<String, TransportError> {
        let url = format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.base_url.trim_end_matches('/'),
            self.account_sid
        );

        let response = self
            .http
            .post(url)
            .basic_auth(&self.account_sid, Some(self.auth_token.expose_secret()))
            .form(&[
                ("To", to),
                ("MessagingServiceSid", self.messaging_service_sid.as_str()),
                ("Body", body),
            ])
            .send()
            .await
            .map_err(|error| TransportError::Unreachable(error.to_string()))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(TransportError::Unreachable(format!("provider returned {status}")));
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(TransportError::Rejected(format!("{status}: {detail}")));
        }

        let message: TwilioMessageResponse = response
            .json()
            .await
            .map_err(|error| TransportError::Rejected(format!("undecodable response: {error}")))?;
        Ok(message.sid)
    }
}

/// Records every send instead of delivering. Used by tests and offline
/// console runs.
#[derive(Default)]
pub struct NoopSmsTransport {
    sent: Mutex<Vec<(String, String)>>,
}

impl NoopSmsTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        match self.sent.lock() {
            Ok(sent) => sent.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl SmsTransport for NoopSmsTransport {
    async fn send(&self, to: &str, body: &str) -> Result<String, TransportError> {
        let mut sent = match self.sent.lock() {
            Ok(sent) => sent,
            Err(poisoned) => poisoned.into_inner(),
        };
        sent.push((to.to_owned(), body.to_owned()));
        Ok(format!("noop-{}", sent.len()))
    }
}
