//! Summarizers: an OpenAI-backed one, a file cache + daily budget wrapper around any
//! summarizer, and a title-only one for runs without an LLM.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use super::Summarizer;
use crate::registry::hours;
use crate::store;
use crate::types::{CandidateItem, Summary};

pub const CACHE_WINDOW_HOURS: f64 = 72.0;
pub const CACHE_MAX_ENTRIES: usize = 2000;
pub const DEFAULT_DAILY_LIMIT: u32 = 250;
const TITLE_HEADLINE_LEN: usize = 120;

// ------------------------------------------------------------
// OpenAI provider
// ------------------------------------------------------------

/// Chat Completions summarizer. Requires `OPENAI_API_KEY`; without it every call is `None`.
pub struct OpenAiSummarizer {
    http: reqwest::Client,
    api_key: String,
    model: String,
    endpoint: String,
}

impl OpenAiSummarizer {
    pub fn from_env() -> Self {
        let api_key = std::env::var("OPENAI_API_KEY").unwrap_or_default();
        let model = std::env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
        let endpoint = std::env::var("OPENAI_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let http = reqwest::Client::builder()
            .user_agent("news-relay/0.1")
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            api_key,
            model,
            endpoint: format!("{}/chat/completions", endpoint.trim_end_matches('/')),
        }
    }

    fn prompt(item: &CandidateItem) -> String {
        let text: String = item.body.chars().take(6000).collect();
        format!(
            "Decide if this article is directly relevant to Bitcoin miners (operations, hashrate, \
             difficulty, energy costs, hardware, policy, miner revenue). If not, answer \
             {{\"relevant\": false}}. Otherwise answer {{\"relevant\": true, \"headline\": ..., \
             \"bullets\": [...]}} with a factual headline of 70-80 characters that does not repeat \
             the title, and exactly 3 bullets of at most 14 words without trailing periods.\n\n\
             Title: {}\nArticle:\n{}",
            item.title, text
        )
    }

    async fn call_once(&self, item: &CandidateItem) -> Result<Option<Summary>, CallError> {
        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: Vec<Msg<'a>>,
            temperature: f32,
            response_format: serde_json::Value,
        }
        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMsg,
        }
        #[derive(Deserialize)]
        struct ChoiceMsg {
            content: String,
        }

        let user = Self::prompt(item);
        let req = Req {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: "You write for professional Bitcoin miners. Reply with JSON only.",
                },
                Msg {
                    role: "user",
                    content: &user,
                },
            ],
            temperature: 0.4,
            response_format: serde_json::json!({ "type": "json_object" }),
        };

        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await
            .map_err(|e| CallError::Transient(e.to_string()))?;

        let status = resp.status();
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(CallError::Transient(format!("status {status}")));
        }
        if !status.is_success() {
            return Err(CallError::Fatal(format!("status {status}")));
        }
        let body: Resp = resp
            .json()
            .await
            .map_err(|e| CallError::Fatal(e.to_string()))?;
        let content = body
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .unwrap_or("");
        Ok(parse_reply(content))
    }
}

enum CallError {
    Transient(String),
    Fatal(String),
}

#[derive(Debug, Deserialize)]
struct Reply {
    #[serde(default)]
    relevant: bool,
    #[serde(default)]
    headline: String,
    #[serde(default)]
    bullets: Vec<String>,
}

/// Parse the model's JSON reply. An irrelevant verdict is an empty summary;
/// unparseable output is `None`.
fn parse_reply(content: &str) -> Option<Summary> {
    let trimmed = content
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    let reply: Reply = serde_json::from_str(trimmed).ok()?;
    if !reply.relevant {
        return Some(Summary::default());
    }
    let bullets = reply
        .bullets
        .into_iter()
        .map(|b| b.trim().to_string())
        .filter(|b| !b.is_empty())
        .take(3)
        .collect();
    Some(Summary::new(reply.headline.trim(), bullets))
}

#[async_trait]
impl Summarizer for OpenAiSummarizer {
    async fn summarize(&self, item: &CandidateItem) -> Option<Summary> {
        if self.api_key.is_empty() {
            tracing::warn!("summarizer: OPENAI_API_KEY not set");
            return None;
        }
        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            match self.call_once(item).await {
                Ok(s) => return s,
                Err(CallError::Transient(e)) if attempt < 2 => {
                    tracing::warn!(error = %e, attempt, "summarizer: transient failure, retrying");
                    tokio::time::sleep(Duration::from_millis(1_000 << (attempt - 1))).await;
                }
                Err(CallError::Transient(e)) | Err(CallError::Fatal(e)) => {
                    tracing::warn!(error = %e, url = %item.url, "summarizer: call failed");
                    return None;
                }
            }
        }
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

// ------------------------------------------------------------
// Cache + daily budget
// ------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedSummary {
    summary: Summary,
    at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheFile {
    #[serde(default)]
    entries: HashMap<String, CachedSummary>,
    /// UTC day (`YYYY-MM-DD`) the counter belongs to.
    #[serde(default)]
    day: String,
    #[serde(default)]
    calls: u32,
}

impl CacheFile {
    fn roll_day(&mut self, now: DateTime<Utc>) {
        let today = now.date_naive().to_string();
        if self.day != today {
            self.day = today;
            self.calls = 0;
        }
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = now - hours(CACHE_WINDOW_HOURS);
        self.entries.retain(|_, v| v.at >= cutoff);
        if self.entries.len() > CACHE_MAX_ENTRIES {
            let mut by_age: Vec<(String, DateTime<Utc>)> =
                self.entries.iter().map(|(k, v)| (k.clone(), v.at)).collect();
            by_age.sort_by_key(|(_, at)| *at);
            let excess = self.entries.len() - CACHE_MAX_ENTRIES;
            for (k, _) in by_age.into_iter().take(excess) {
                self.entries.remove(&k);
            }
        }
    }
}

/// Cache key: fingerprint, else normalized URL.
fn cache_key(item: &CandidateItem) -> Option<String> {
    item.fingerprint_key()
        .map(|fp| format!("fp:{fp}"))
        .or_else(|| Some(item.canonical_url()).filter(|u| !u.is_empty()).map(|u| format!("url:{u}")))
}

/// Wraps a summarizer with a fingerprint-keyed file cache and a per-UTC-day call limit.
/// Cache hits do not count against the limit; only real calls that returned do.
pub struct CachingSummarizer<S: Summarizer> {
    inner: S,
    path: PathBuf,
    daily_limit: u32,
}

impl<S: Summarizer> CachingSummarizer<S> {
    pub fn new(inner: S, path: impl Into<PathBuf>, daily_limit: u32) -> Self {
        Self {
            inner,
            path: path.into(),
            daily_limit,
        }
    }

    fn load(&self, now: DateTime<Utc>) -> CacheFile {
        let mut f: CacheFile = store::load_or_default(&self.path);
        f.roll_day(now);
        f.prune(now);
        f
    }

    fn save(&self, f: &CacheFile) {
        if let Err(e) = store::save_atomic(&self.path, f) {
            tracing::warn!(error = %format!("{e:#}"), "summary cache not persisted");
        }
    }

    async fn summarize_at(&self, item: &CandidateItem, now: DateTime<Utc>) -> Option<Summary> {
        let key = cache_key(item);
        let mut f = self.load(now);
        if let Some(hit) = key.as_ref().and_then(|k| f.entries.get(k)) {
            tracing::debug!(url = %item.url, "summarizer: cache hit");
            return Some(hit.summary.clone());
        }
        if f.calls >= self.daily_limit {
            tracing::warn!(limit = self.daily_limit, "summarizer: daily budget exhausted");
            return None;
        }

        let fresh = self.inner.summarize(item).await?;
        f.calls = f.calls.saturating_add(1);
        if let Some(k) = key {
            f.entries.insert(
                k,
                CachedSummary {
                    summary: fresh.clone(),
                    at: now,
                },
            );
            f.prune(now);
        }
        self.save(&f);
        Some(fresh)
    }
}

#[async_trait]
impl<S: Summarizer> Summarizer for CachingSummarizer<S> {
    async fn summarize(&self, item: &CandidateItem) -> Option<Summary> {
        self.summarize_at(item, Utc::now()).await
    }

    fn remaining_budget(&self) -> Option<u32> {
        let f = self.load(Utc::now());
        Some(self.daily_limit.saturating_sub(f.calls))
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }
}

// ------------------------------------------------------------
// Title-only
// ------------------------------------------------------------

/// Headline = source title (cut to 120 chars), no bullets. Never reports "not relevant".
pub struct TitleSummarizer;

#[async_trait]
impl Summarizer for TitleSummarizer {
    async fn summarize(&self, item: &CandidateItem) -> Option<Summary> {
        let title = item.title.trim();
        let headline = if title.is_empty() {
            "News update".to_string()
        } else {
            title.chars().take(TITLE_HEADLINE_LEN).collect()
        };
        Some(Summary::new(headline, Vec::new()))
    }

    fn name(&self) -> &'static str {
        "title"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Counting {
        calls: AtomicU32,
    }

    #[async_trait]
    impl Summarizer for Counting {
        async fn summarize(&self, item: &CandidateItem) -> Option<Summary> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Some(Summary::new(format!("H {}", item.title), vec!["b".into()]))
        }
        fn name(&self) -> &'static str {
            "counting"
        }
    }

    #[test]
    fn parse_reply_variants() {
        assert_eq!(parse_reply(r#"{"relevant": false}"#), Some(Summary::default()));
        let s = parse_reply("```json\n{\"relevant\":true,\"headline\":\" H \",\"bullets\":[\"a\",\"\",\"b\",\"c\",\"d\"]}\n```")
            .unwrap();
        assert_eq!(s.headline, "H");
        assert_eq!(s.bullets, vec!["a", "b", "c"]);
        assert_eq!(parse_reply("not json"), None);
    }

    #[tokio::test]
    async fn cache_hits_skip_inner_and_budget() {
        let dir = tempfile::tempdir().unwrap();
        let s = CachingSummarizer::new(
            Counting {
                calls: AtomicU32::new(0),
            },
            dir.path().join("cache.json"),
            2,
        );
        let a = CandidateItem::new("https://e.com/a").titled("A").fingerprint("fa");
        let b = CandidateItem::new("https://e.com/b").titled("B");
        let c = CandidateItem::new("https://e.com/c").titled("C");

        assert_eq!(s.summarize(&a).await.unwrap().headline, "H A");
        assert_eq!(s.summarize(&a).await.unwrap().headline, "H A");
        assert_eq!(s.remaining_budget(), Some(1));
        assert!(s.summarize(&b).await.is_some());
        assert_eq!(s.remaining_budget(), Some(0));
        assert!(s.summarize(&c).await.is_none());
        assert_eq!(s.inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cache_entries_expire_and_counter_rolls_over() {
        let dir = tempfile::tempdir().unwrap();
        let s = CachingSummarizer::new(
            Counting {
                calls: AtomicU32::new(0),
            },
            dir.path().join("cache.json"),
            1,
        );
        let a = CandidateItem::new("https://e.com/a").titled("A");
        let t0 = Utc::now();
        s.summarize_at(&a, t0).await.unwrap();
        assert!(s.summarize_at(&a, t0 + hours(1.0)).await.is_some());
        assert_eq!(s.inner.calls.load(Ordering::SeqCst), 1);

        let later = t0 + hours(CACHE_WINDOW_HOURS + 1.0);
        assert!(s.summarize_at(&a, later).await.is_some());
        assert_eq!(s.inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn title_summarizer_truncates_and_defaults() {
        let long = "x".repeat(300);
        let s = TitleSummarizer
            .summarize(&CandidateItem::new("u").titled(long))
            .await
            .unwrap();
        assert_eq!(s.headline.chars().count(), 120);
        let s = TitleSummarizer.summarize(&CandidateItem::new("u")).await.unwrap();
        assert_eq!(s.headline, "News update");
        assert!(s.bullets.is_empty());
    }
}
