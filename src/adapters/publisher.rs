use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::Publisher;
use crate::types::PublishReceipt;

/// Publishes a post and a reply to it through a JSON webhook API:
///
/// - `POST {base}/posts` with `{"text": ..}` returns `{"id": ..}`
/// - `POST {base}/posts` with `{"text": .., "reply_to": id}` for the reply
/// - `DELETE {base}/posts/{id}` rolls the first post back when the reply fails
#[derive(Clone)]
pub struct WebhookPublisher {
    base: String,
    token: String,
    client: Client,
    timeout: Duration,
    max_retries: u8,
}

#[derive(Serialize)]
struct PostBody<'a> {
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to: Option<&'a str>,
}

#[derive(Deserialize)]
struct PostResp {
    id: String,
}

impl WebhookPublisher {
    pub fn new(base: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base: base.into().trim_end_matches('/').to_string(),
            token: token.into(),
            client: Client::new(),
            timeout: Duration::from_secs(10),
            max_retries: 2,
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    /// Total attempts per request, including the first one.
    pub fn with_retries(mut self, retries: u8) -> Self {
        self.max_retries = retries.max(1);
        self
    }

    fn retryable(status: StatusCode) -> bool {
        status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
    }

    async fn create(&self, text: &str, reply_to: Option<&str>) -> Result<String> {
        let body = PostBody { text, reply_to };
        let url = format!("{}/posts", self.base);
        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            let res = self
                .client
                .post(&url)
                .bearer_auth(&self.token)
                .timeout(self.timeout)
                .json(&body)
                .send()
                .await;
            match res {
                Ok(rsp) if rsp.status().is_success() => {
                    let parsed: PostResp = rsp.json().await?;
                    if parsed.id.trim().is_empty() {
                        return Err(anyhow!("publish response without id"));
                    }
                    return Ok(parsed.id);
                }
                Ok(rsp) => {
                    let status = rsp.status();
                    if Self::retryable(status) && attempt < self.max_retries {
                        tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1))).await;
                        continue;
                    }
                    return Err(anyhow!("publish HTTP error: {status}"));
                }
                Err(e) => {
                    if attempt < self.max_retries {
                        tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1))).await;
                        continue;
                    }
                    return Err(anyhow!("publish request failed: {e}"));
                }
            }
        }
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let rsp = self
            .client
            .delete(format!("{}/posts/{id}", self.base))
            .bearer_auth(&self.token)
            .timeout(self.timeout)
            .send()
            .await?;
        rsp.error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl Publisher for WebhookPublisher {
    async fn publish(&self, primary: &str, secondary: &str) -> Option<PublishReceipt> {
        let post_ref = match self.create(primary, None).await {
            Ok(id) => id,
            Err(e) => {
                tracing::error!(error = %format!("{e:#}"), "publisher: first post failed");
                return None;
            }
        };
        match self.create(secondary, Some(&post_ref)).await {
            Ok(reply_ref) => {
                tracing::info!(post_ref = %post_ref, reply_ref = %reply_ref, "publisher: posted");
                Some(PublishReceipt {
                    post_ref,
                    reply_ref,
                })
            }
            Err(e) => {
                tracing::error!(error = %format!("{e:#}"), post_ref = %post_ref, "publisher: reply failed, rolling back");
                if let Err(e) = self.delete(&post_ref).await {
                    tracing::error!(error = %format!("{e:#}"), post_ref = %post_ref, "publisher: rollback failed");
                }
                None
            }
        }
    }

    fn name(&self) -> &'static str {
        "webhook"
    }
}

/// Logs what would be posted and reports failure, so nothing is marked posted.
pub struct DryRunPublisher;

#[async_trait]
impl Publisher for DryRunPublisher {
    async fn publish(&self, primary: &str, secondary: &str) -> Option<PublishReceipt> {
        tracing::info!(primary, secondary, "publisher: dry run, not publishing");
        None
    }

    fn name(&self) -> &'static str {
        "dry-run"
    }
}
