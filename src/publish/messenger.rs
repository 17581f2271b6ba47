//! Messenger webhook: the secondary channel. Pushes a short text message per
//! published piece and carries the review-queue pings.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use super::{PublishError, Publisher};
use crate::draft::Draft;
use crate::settings::PublishSettings;

#[derive(Clone)]
pub struct MessengerPublisher {
    webhook: Option<String>,
    /// Language whose title goes into the announcement text.
    primary_lang: String,
    client: Client,
    timeout: Duration,
    max_retries: u8,
}

#[derive(Serialize)]
struct WebhookMessage<'a> {
    text: &'a str,
}

impl MessengerPublisher {
    pub fn from_settings(cfg: &PublishSettings, primary_lang: &str) -> Self {
        let webhook = if cfg.webhook_url.is_empty() {
            None
        } else {
            Some(cfg.webhook_url.clone())
        };
        Self {
            webhook,
            primary_lang: primary_lang.to_string(),
            client: Client::new(),
            timeout: Duration::from_secs(5),
            max_retries: 2,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.webhook.is_some()
    }

    /// One ping for the whole review queue; the cooldown lives with the caller.
    pub async fn notify_review_queue(&self, waiting: usize) -> Result<(), PublishError> {
        let text = format!("{waiting} draft(s) awaiting editorial review");
        self.send_text(&text).await
    }

    async fn send_text(&self, text: &str) -> Result<(), PublishError> {
        let Some(webhook) = self.webhook.as_ref() else {
            return Err(PublishError::Disabled);
        };

        let payload = WebhookMessage { text };
        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            let res = self
                .client
                .post(webhook)
                .timeout(self.timeout)
                .json(&payload)
                .send()
                .await;

            match res {
                Ok(rsp) => {
                    if let Err(e) = rsp.error_for_status_ref() {
                        if attempt < self.max_retries {
                            tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1)))
                                .await;
                            continue;
                        }
                        return Err(PublishError::Channel(format!("webhook http error: {e}")));
                    }
                    return Ok(());
                }
                Err(e) if e.is_timeout() => {
                    if attempt < self.max_retries {
                        tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1))).await;
                        continue;
                    }
                    return Err(PublishError::Timeout);
                }
                Err(e) => {
                    if attempt < self.max_retries {
                        tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1))).await;
                        continue;
                    }
                    return Err(PublishError::Channel(format!("webhook request failed: {e}")));
                }
            }
        }
    }
}

#[async_trait]
impl Publisher for MessengerPublisher {
    /// Webhook responses carry no id, so the event fingerprint stands in as
    /// the message id; it is stable across redelivery.
    async fn publish(&self, draft: &Draft) -> Result<String, PublishError> {
        let title = draft
            .title
            .get(&self.primary_lang)
            .map(String::as_str)
            .unwrap_or(&draft.raw_title);
        let link = draft
            .source_links
            .first()
            .map(String::as_str)
            .unwrap_or("");
        let text = if link.is_empty() {
            format!("Published: {title}")
        } else {
            format!("Published: {title}\n{link}")
        };
        self.send_text(&text).await?;
        Ok(format!("webhook-{}", draft.event_key))
    }

    fn channel(&self) -> &'static str {
        "messenger"
    }
}
