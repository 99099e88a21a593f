use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::github::USER_AGENT;
use crate::model::NotificationPayload;
use crate::retry::{Cancelled, RetryPolicy, Service, TransientError};

/// Single-attempt webhook delivery.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn post(&self, webhook_url: &str, payload: &NotificationPayload) -> Result<(), TransientError>;
}

#[derive(Clone)]
pub struct DiscordClient {
    http: Client,
}

impl fmt::Debug for DiscordClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscordClient").finish_non_exhaustive()
    }
}

impl DiscordClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .context("failed to build Discord HTTP client")?;
        Ok(Self { http })
    }

    pub fn build_request(
        &self,
        webhook_url: &str,
        payload: &NotificationPayload,
    ) -> Result<reqwest::Request, reqwest::Error> {
        self.http.post(webhook_url).json(payload).build()
    }
}

#[async_trait]
impl NotificationSink for DiscordClient {
    async fn post(&self, webhook_url: &str, payload: &NotificationPayload) -> Result<(), TransientError> {
        let request = self.build_request(webhook_url, payload)?;
        let res = self.http.execute(request).await?;
        let status = res.status();
        if status == StatusCode::NO_CONTENT {
            return Ok(());
        }
        let body = res.text().await.unwrap_or_default();
        Err(TransientError::Status { status, body })
    }
}

/// Sink client: delivers a payload, retrying until it is accepted or the watch
/// is cancelled. Spacing between deliveries is left to the caller.
#[derive(Clone)]
pub struct SinkClient {
    sink: Arc<dyn NotificationSink>,
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl SinkClient {
    pub fn new(sink: Arc<dyn NotificationSink>, policy: RetryPolicy, cancel: CancellationToken) -> Self {
        Self { sink, policy, cancel }
    }

    #[instrument(skip_all, fields(username = %payload.username))]
    pub async fn deliver(&self, webhook_url: &str, payload: &NotificationPayload) -> Result<(), Cancelled> {
        if tracing::enabled!(tracing::Level::DEBUG) {
            let pretty = serde_json::to_string_pretty(payload).unwrap_or_else(|_| format!("{payload:?}"));
            debug!("Webhook payload: {}", pretty);
        }
        self.policy
            .run(Service::Discord, "post webhook", &self.cancel, move || {
                self.sink.post(webhook_url, payload)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Embed;

    fn payload() -> NotificationPayload {
        NotificationPayload {
            content: "> **added**: `a.rs`".into(),
            username: "acme/widgets".into(),
            avatar_url: Some("https://avatars.example/u/1".into()),
            embeds: vec![Embed {
                description: "[`abc1234`](https://x) by me".into(),
                color: 7506394,
            }],
        }
    }

    #[test]
    fn build_request_posts_json_body() {
        let client = DiscordClient::new(Duration::from_secs(5)).unwrap();
        let request = client
            .build_request("https://discord.com/api/webhooks/1/tok", &payload())
            .unwrap();

        assert_eq!(request.method(), reqwest::Method::POST);
        assert_eq!(request.url().path(), "/api/webhooks/1/tok");
        assert_eq!(
            request
                .headers()
                .get("Content-Type")
                .and_then(|h| h.to_str().ok())
                .unwrap(),
            "application/json"
        );
        let bytes = request.body().and_then(|b| b.as_bytes()).unwrap();
        let body: serde_json::Value = serde_json::from_slice(bytes).unwrap();
        assert_eq!(body["username"], "acme/widgets");
        assert_eq!(body["avatar_url"], "https://avatars.example/u/1");
        assert_eq!(body["embeds"][0]["color"], 7506394);
    }

    #[test]
    fn build_request_rejects_garbage_url() {
        let client = DiscordClient::new(Duration::from_secs(5)).unwrap();
        assert!(client.build_request("not a url", &payload()).is_err());
    }
}
