//! CMS publisher: POSTs the finished piece to the CMS REST endpoint and
//! returns the article id the CMS assigned.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{PublishError, Publisher};
use crate::draft::{Draft, LangMap};
use crate::settings::PublishSettings;

#[derive(Clone)]
pub struct CmsPublisher {
    endpoint: String,
    token: String,
    client: Client,
    timeout: Duration,
    max_retries: u8,
}

impl CmsPublisher {
    pub fn from_settings(cfg: &PublishSettings) -> Self {
        Self {
            endpoint: cfg.cms_url.clone(),
            token: cfg.cms_token.clone(),
            client: Client::new(),
            timeout: Duration::from_secs(10),
            max_retries: 3,
        }
    }

}

/// Article payload. `external_ref` is the event fingerprint: the CMS is
/// expected to upsert on it, which makes at-least-once dispatch safe.
#[derive(Debug, Serialize)]
struct CmsArticle<'a> {
    external_ref: &'a str,
    title: &'a LangMap,
    lead: &'a LangMap,
    body: &'a LangMap,
    category: &'a str,
    tags: &'a [String],
    source_links: &'a [String],
    image_url: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct CmsCreated {
    id: String,
}

#[async_trait]
impl Publisher for CmsPublisher {
    async fn publish(&self, draft: &Draft) -> Result<String, PublishError> {
        if self.endpoint.is_empty() {
            return Err(PublishError::Disabled);
        }

        let payload = CmsArticle {
            external_ref: &draft.event_key,
            title: &draft.title,
            lead: &draft.lead,
            body: &draft.body,
            category: draft.category.as_str(),
            tags: &draft.risk_flags,
            source_links: &draft.source_links,
            image_url: draft.image_url.as_deref(),
        };

        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            let res = self
                .client
                .post(&self.endpoint)
                .bearer_auth(&self.token)
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
                        return Err(PublishError::Channel(format!("cms http error: {e}")));
                    }
                    let created: CmsCreated = rsp
                        .json()
                        .await
                        .map_err(|e| PublishError::Channel(format!("cms response body: {e}")))?;
                    return Ok(created.id);
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
                    return Err(PublishError::Channel(format!("cms request failed: {e}")));
                }
            }
        }
    }

    fn channel(&self) -> &'static str {
        "cms"
    }
}
