// src/adapters/rss.rs
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use once_cell::sync::Lazy;
use quick_xml::de::from_str;
use regex::Regex;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::time::Duration;
use time::{format_description::well_known::Rfc2822, OffsetDateTime};

use super::Fetcher;
use crate::domains::DomainRanker;
use crate::types::CandidateItem;

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
    guid: Option<Guid>,
}

#[derive(Debug, Deserialize)]
struct Guid {
    #[serde(rename = "$text", default)]
    value: String,
}

/// Decode entities, strip tags, normalize quotes, collapse whitespace, drop trailing
/// sentence punctuation, cap at 1500 chars.
pub fn normalize_text(s: &str) -> String {
    static RE_TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)</?[^>]+>").expect("static regex"));
    static RE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static regex"));

    let decoded = html_escape::decode_html_entities(s).to_string();
    let mut out = RE_TAGS.replace_all(&decoded, "").to_string();
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");
    out = RE_WS.replace_all(&out, " ").trim().to_string();

    while let Some(last) = out.chars().last() {
        if matches!(last, '!' | '?' | '.' | ',') {
            out.pop();
        } else {
            break;
        }
    }
    if out.chars().count() > 1500 {
        out = out.chars().take(1500).collect();
    }
    out
}

fn parse_pub_date(ts: &str) -> Option<DateTime<Utc>> {
    let dt = OffsetDateTime::parse(ts.trim(), &Rfc2822).ok()?;
    DateTime::<Utc>::from_timestamp(dt.unix_timestamp(), 0)
}

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "from", "that", "this", "into", "over", "after", "will",
    "your", "their", "they", "but", "are", "not", "you", "its", "our", "out", "has", "have",
];

const PRIORITY_TERMS: &[&str] = &[
    "bitcoin", "mining", "miner", "miners", "hashrate", "difficulty", "asic", "earnings",
    "revenue", "quarter", "expansion", "capacity", "acquisition", "merger", "treasury",
];

/// Content fingerprint: sha256 over the priority terms and leading significant tokens
/// of the title and text, so rewrites of one wire story collide.
pub fn content_fingerprint(title: &str, text: &str) -> Option<String> {
    static RE_TOKEN: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"[a-z0-9$]+(?:[./,][a-z0-9]+)?").expect("static regex"));

    let lower = format!("{title} {text}").to_lowercase();
    let tokens: Vec<&str> = RE_TOKEN
        .find_iter(&lower)
        .map(|m| m.as_str())
        .filter(|t| t.len() > 2 && !STOPWORDS.contains(t))
        .collect();
    if tokens.is_empty() {
        return None;
    }

    let mut keep: Vec<&str> = tokens
        .iter()
        .copied()
        .filter(|t| PRIORITY_TERMS.contains(t))
        .collect();
    keep.extend(tokens.iter().copied().take(8));
    let mut seen = Vec::with_capacity(keep.len());
    for k in keep {
        if !seen.contains(&k) {
            seen.push(k);
        }
    }
    seen.truncate(20);
    seen.sort_unstable();

    let digest = Sha256::digest(seen.join(" ").as_bytes());
    Some(digest.iter().take(12).map(|b| format!("{b:02x}")).collect())
}

fn matches_query(text: &str, query: &str) -> bool {
    let hay = text.to_lowercase();
    query
        .split_whitespace()
        .map(str::to_lowercase)
        .all(|term| hay.contains(&term))
}

enum FeedSource {
    Url(String),
    Fixture(String),
}

/// RSS fetcher over a fixed list of feeds. Items come out in feed order, feeds in
/// configured order.
pub struct RssFetcher {
    http: reqwest::Client,
    feeds: Vec<FeedSource>,
    ranker: DomainRanker,
}

impl RssFetcher {
    pub fn new(feed_urls: Vec<String>, ranker: DomainRanker) -> Self {
        let http = reqwest::Client::builder()
            .user_agent("news-relay/0.1")
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(20))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            feeds: feed_urls.into_iter().map(FeedSource::Url).collect(),
            ranker,
        }
    }

    /// Parse canned XML instead of fetching; used by tests and offline runs.
    pub fn from_fixture(content: &str, ranker: DomainRanker) -> Self {
        Self {
            http: reqwest::Client::new(),
            feeds: vec![FeedSource::Fixture(content.to_string())],
            ranker,
        }
    }

    async fn load(&self, feed: &FeedSource) -> Result<String> {
        match feed {
            FeedSource::Fixture(s) => Ok(s.clone()),
            FeedSource::Url(url) => {
                let resp = self
                    .http
                    .get(url)
                    .send()
                    .await
                    .with_context(|| format!("requesting {url}"))?;
                let resp = resp
                    .error_for_status()
                    .with_context(|| format!("feed status {url}"))?;
                resp.text().await.with_context(|| format!("reading {url}"))
            }
        }
    }

    fn parse(&self, xml: &str) -> Result<Vec<CandidateItem>> {
        let t0 = std::time::Instant::now();
        let rss: Rss = from_str(xml).context("parsing rss xml")?;
        let mut out = Vec::with_capacity(rss.channel.item.len());

        for it in rss.channel.item {
            let Some(url) = it.link.map(|l| l.trim().to_string()).filter(|l| !l.is_empty())
            else {
                continue;
            };
            if self.ranker.is_banned(&url) {
                tracing::debug!(url = %url, "rss: banned domain");
                continue;
            }
            let title = normalize_text(it.title.as_deref().unwrap_or_default());
            let body = normalize_text(it.description.as_deref().unwrap_or_default());
            if title.is_empty() && body.is_empty() {
                continue;
            }

            let mut item = CandidateItem::new(url.clone()).titled(title.clone()).body(body.clone());
            if let Some(g) = it.guid.map(|g| g.value.trim().to_string()).filter(|g| !g.is_empty()) {
                item = item.article(g);
            }
            if let Some(fp) = content_fingerprint(&title, &body) {
                item = item.fingerprint(fp);
            }
            item.published_at = it.pub_date.as_deref().and_then(parse_pub_date);
            item.domain_score = Some(self.ranker.score(&url));
            out.push(item);
        }

        histogram!("relay_fetch_parse_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        Ok(out)
    }
}

#[async_trait]
impl Fetcher for RssFetcher {
    async fn fetch(&self, limit: usize, query: &str) -> Result<Vec<CandidateItem>> {
        if self.feeds.is_empty() {
            return Err(anyhow!("no feeds configured"));
        }
        let mut out = Vec::new();
        let mut failures = 0usize;
        for feed in &self.feeds {
            let parsed = match self.load(feed).await {
                Ok(xml) => self.parse(&xml),
                Err(e) => Err(e),
            };
            match parsed {
                Ok(items) => out.extend(
                    items
                        .into_iter()
                        .filter(|i| matches_query(&format!("{} {}", i.title, i.body), query)),
                ),
                Err(e) => {
                    failures += 1;
                    counter!("relay_fetch_errors_total").increment(1);
                    tracing::warn!(error = %format!("{e:#}"), "rss: feed failed");
                }
            }
        }
        if failures == self.feeds.len() {
            return Err(anyhow!("all {failures} feeds failed"));
        }
        out.truncate(limit);
        counter!("relay_fetch_items_total").increment(out.len() as u64);
        Ok(out)
    }

    fn name(&self) -> &'static str {
        "rss"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>Wire</title>
<item>
  <title>Riot expands bitcoin mining in Texas</title>
  <link>https://www.reuters.com/riot-texas?utm=rss</link>
  <guid isPermaLink="false">r-123</guid>
  <pubDate>Mon, 06 Oct 2025 14:00:00 +0000</pubDate>
  <description>&lt;p&gt;Riot Platforms adds 5 EH/s of bitcoin mining capacity.&lt;/p&gt;</description>
</item>
<item>
  <title>Ethereum staking update</title>
  <link>https://ethereum.org/news/1</link>
  <description>Bitcoin mining not mentioned</description>
</item>
<item>
  <title>Fed holds rates</title>
  <link>https://wsj.com/fed</link>
  <description>Markets steady.</description>
</item>
</channel></rss>"#;

    #[test]
    fn normalize_text_collapses_ws_and_punct() {
        assert_eq!(normalize_text("  Hello,&nbsp;&nbsp; world!!!  "), "Hello, world");
        assert_eq!(normalize_text("<b>Bold</b> \u{201C}q\u{201D}"), "Bold \"q\"");
    }

    #[test]
    fn fingerprint_is_order_insensitive_for_rewrites() {
        let a = content_fingerprint("Riot expands mining", "capacity up");
        let b = content_fingerprint("Mining capacity expands", "at Riot");
        assert_eq!(a, b);
        assert_ne!(a, content_fingerprint("Marathon sells bitcoin", "treasury"));
        assert_eq!(content_fingerprint("", "a b"), None);
    }

    #[tokio::test]
    async fn fixture_parses_filters_and_scores() {
        let f = RssFetcher::from_fixture(FIXTURE, DomainRanker::default());
        let items = f.fetch(10, "bitcoin mining").await.unwrap();
        assert_eq!(items.len(), 1);
        let it = &items[0];
        assert_eq!(it.normalized_url, "https://www.reuters.com/riot-texas");
        assert_eq!(it.article_id.as_deref(), Some("r-123"));
        assert_eq!(it.domain_score, Some(5));
        assert!(it.fingerprint.is_some());
        assert!(it.published_at.is_some());
        assert_eq!(it.body, "Riot Platforms adds 5 EH/s of bitcoin mining capacity");
    }

    #[tokio::test]
    async fn malformed_feed_is_an_error() {
        let f = RssFetcher::from_fixture("<rss><channel>", DomainRanker::default());
        assert!(f.fetch(5, "").await.is_err());
    }
}
