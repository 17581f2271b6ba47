use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quick_xml::de::from_str;
use serde::Deserialize;
use time::{format_description::well_known::Rfc2822, OffsetDateTime, UtcOffset};

use super::{FeedSource, FetchError, RawItem};
use crate::sources::Source;

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}
#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}
#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
}

fn parse_rfc2822(ts: &str) -> Option<DateTime<Utc>> {
    let unix = OffsetDateTime::parse(ts, &Rfc2822)
        .ok()
        .map(|dt| dt.to_offset(UtcOffset::UTC).unix_timestamp())?;
    DateTime::<Utc>::from_timestamp(unix, 0)
}

/// Reference feed adapter: plain RSS 2.0 over HTTP, or a canned XML string
/// for tests and the demo binary.
pub struct RssFeed {
    mode: Mode,
}

enum Mode {
    Fixture(String),
    Http { client: reqwest::Client },
}

impl RssFeed {
    pub fn from_fixture(xml: &str) -> Self {
        Self {
            mode: Mode::Fixture(xml.to_string()),
        }
    }

    pub fn over_http(timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("newsdesk-autopilot/0.1")
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            mode: Mode::Http { client },
        })
    }

    fn parse_items(xml: &str, source_id: &str) -> Result<Vec<RawItem>, FetchError> {
        let cleaned = scrub_html_entities_for_xml(xml);
        let rss: Rss =
            from_str(&cleaned).map_err(|e| FetchError::Malformed(e.to_string()))?;

        let mut out = Vec::with_capacity(rss.channel.item.len());
        for it in rss.channel.item {
            let title = it.title.unwrap_or_default();
            if title.trim().is_empty() {
                continue;
            }
            out.push(RawItem {
                title,
                link: it.link.unwrap_or_default(),
                published: it.pub_date.as_deref().and_then(parse_rfc2822),
                excerpt: it.description.unwrap_or_default(),
                source_id: source_id.to_string(),
            });
        }
        Ok(out)
    }
}

#[async_trait]
impl FeedSource for RssFeed {
    async fn fetch(&self, source: &Source) -> Result<Vec<RawItem>, FetchError> {
        match &self.mode {
            Mode::Fixture(xml) => Self::parse_items(xml, &source.id),
            Mode::Http { client } => {
                if source.feed_url.is_empty() {
                    return Err(FetchError::Unreachable("no feed_url configured".into()));
                }
                let resp = client.get(&source.feed_url).send().await.map_err(|e| {
                    if e.is_timeout() {
                        FetchError::Timeout
                    } else {
                        FetchError::Unreachable(e.to_string())
                    }
                })?;
                if !resp.status().is_success() {
                    return Err(FetchError::Unreachable(format!(
                        "status {}",
                        resp.status()
                    )));
                }
                let body = resp
                    .text()
                    .await
                    .map_err(|e| FetchError::Malformed(e.to_string()))?;
                Self::parse_items(&body, &source.id)
            }
        }
    }

    fn name(&self) -> &'static str {
        "rss"
    }
}

// RSS feeds in the wild carry bare HTML entities that are invalid XML.
fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::SourceCategory;

    const SAMPLE: &str = r#"<?xml version="1.0"?>
<rss version="2.0">
  <channel>
    <title>Sample Wire</title>
    <item>
      <title>Flood warning for the river district</title>
      <link>https://wire.example/flood</link>
      <pubDate>Mon, 12 Aug 2024 09:30:00 GMT</pubDate>
      <description>Water levels are expected to rise overnight.</description>
    </item>
    <item>
      <title>Council approves&nbsp;new budget</title>
      <link>https://wire.example/budget</link>
      <pubDate>Mon, 12 Aug 2024 10:00:00 GMT</pubDate>
      <description>The budget passes after a long session.</description>
    </item>
    <item>
      <title></title>
      <link>https://wire.example/empty</link>
    </item>
  </channel>
</rss>"#;

    fn source() -> Source {
        Source {
            id: "wire".into(),
            name: "Sample Wire".into(),
            trust: 0.8,
            category: SourceCategory::Media,
            active: true,
            feed_url: String::new(),
            last_fetched: None,
        }
    }

    #[tokio::test]
    async fn fixture_parses_items_and_dates() {
        let feed = RssFeed::from_fixture(SAMPLE);
        let items = feed.fetch(&source()).await.unwrap();
        assert_eq!(items.len(), 2, "empty-title item dropped");
        assert_eq!(items[0].title, "Flood warning for the river district");
        assert_eq!(items[0].source_id, "wire");
        let ts = items[0].published.unwrap();
        assert_eq!(ts.timestamp(), 1723455000);
    }

    #[tokio::test]
    async fn malformed_xml_is_a_typed_error() {
        let feed = RssFeed::from_fixture("<rss><channel><item>");
        let err = feed.fetch(&source()).await.unwrap_err();
        assert!(matches!(err, FetchError::Malformed(_)));
    }

    #[test]
    fn rfc2822_parse_handles_offsets() {
        let dt = parse_rfc2822("Mon, 12 Aug 2024 11:30:00 +0200").unwrap();
        assert_eq!(dt.timestamp(), 1723455000);
    }
}
