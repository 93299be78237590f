// src/types.rs
//! Records shared by the registry, the work queue and the orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::normalize_url;

/// A prospective piece of content to publish.
///
/// Identity fields are `url` (plus its derived `normalized_url`), `event_id`, `story_id`,
/// `article_id` and `fingerprint`. Empty strings are treated exactly like `None`.
/// The `*_uri`, `text` and `social_score` aliases read queue files written before the rename.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateItem {
    #[serde(default)]
    pub url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub normalized_url: String,
    #[serde(default, alias = "event_uri", skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(default, alias = "story_uri", skip_serializing_if = "Option::is_none")]
    pub story_id: Option<String>,
    #[serde(default, alias = "article_uri", skip_serializing_if = "Option::is_none")]
    pub article_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,

    /// Source title as fetched.
    #[serde(default)]
    pub title: String,
    /// Source body text (used as a completeness proxy and as summarizer input).
    #[serde(default, alias = "text", skip_serializing_if = "String::is_empty")]
    pub body: String,

    /// Filled in by the summarizer.
    #[serde(default)]
    pub headline: String,
    #[serde(default)]
    pub bullets: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    /// Source authority, lower is better.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain_score: Option<u32>,
    /// Engagement signal supplied by the fetch layer, higher is better.
    #[serde(default, alias = "social_score", skip_serializing_if = "Option::is_none")]
    pub engagement: Option<f64>,
}

impl CandidateItem {
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            normalized_url: normalize_url(&url),
            url,
            ..Self::default()
        }
    }

    pub fn titled(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn event(mut self, id: impl Into<String>) -> Self {
        self.event_id = Some(id.into());
        self
    }

    pub fn story(mut self, id: impl Into<String>) -> Self {
        self.story_id = Some(id.into());
        self
    }

    pub fn article(mut self, id: impl Into<String>) -> Self {
        self.article_id = Some(id.into());
        self
    }

    pub fn fingerprint(mut self, fp: impl Into<String>) -> Self {
        self.fingerprint = Some(fp.into());
        self
    }

    pub fn scored(mut self, domain_score: u32, engagement: f64) -> Self {
        self.domain_score = Some(domain_score);
        self.engagement = Some(engagement);
        self
    }

    /// Normalized URL, derived on the fly when the stored copy is missing
    /// (e.g. items written by an older queue file).
    pub fn canonical_url(&self) -> String {
        if self.normalized_url.is_empty() {
            normalize_url(&self.url)
        } else {
            self.normalized_url.clone()
        }
    }

    pub fn event_key(&self) -> Option<&str> {
        non_empty(&self.event_id)
    }

    pub fn story_key(&self) -> Option<&str> {
        non_empty(&self.story_id)
    }

    pub fn article_key(&self) -> Option<&str> {
        non_empty(&self.article_id)
    }

    pub fn fingerprint_key(&self) -> Option<&str> {
        non_empty(&self.fingerprint)
    }

    pub fn url_key(&self) -> Option<&str> {
        let u = self.url.trim();
        (!u.is_empty()).then_some(u)
    }

    /// At least one identity field is non-empty.
    pub fn is_identifiable(&self) -> bool {
        self.article_key().is_some()
            || self.story_key().is_some()
            || self.event_key().is_some()
            || self.fingerprint_key().is_some()
            || self.url_key().is_some()
    }

    pub fn has_summary(&self) -> bool {
        !self.headline.trim().is_empty()
    }

    pub fn apply_summary(&mut self, summary: &Summary) {
        self.headline = summary.headline.clone();
        self.bullets = summary.bullets.clone();
    }

    pub fn summary(&self) -> Summary {
        Summary {
            headline: self.headline.clone(),
            bullets: self.bullets.clone(),
        }
    }
}

pub(crate) fn non_empty(v: &Option<String>) -> Option<&str> {
    v.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// A record of a successfully published identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostedEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normalized_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub story_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub article_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    pub posted_at: DateTime<Utc>,
    #[serde(default)]
    pub post_ref: String,
}

impl PostedEntry {
    pub fn from_candidate(item: &CandidateItem, post_ref: &str, now: DateTime<Utc>) -> Self {
        let own = |v: Option<&str>| v.map(str::to_string);
        let norm = item.canonical_url();
        Self {
            url: own(item.url_key()),
            normalized_url: (!norm.is_empty()).then_some(norm),
            event_id: own(item.event_key()),
            story_id: own(item.story_key()),
            article_id: own(item.article_key()),
            fingerprint: own(item.fingerprint_key()),
            posted_at: now,
            post_ref: post_ref.to_string(),
        }
    }

    pub fn event_key(&self) -> Option<&str> {
        non_empty(&self.event_id)
    }

    pub fn story_key(&self) -> Option<&str> {
        non_empty(&self.story_id)
    }

    pub fn article_key(&self) -> Option<&str> {
        non_empty(&self.article_id)
    }

    pub fn fingerprint_key(&self) -> Option<&str> {
        non_empty(&self.fingerprint)
    }

    pub fn url_key(&self) -> Option<&str> {
        non_empty(&self.url)
    }

    /// Stored normalized URL, or one derived from the raw URL for migrated entries.
    pub fn normalized_url_key(&self) -> Option<String> {
        match non_empty(&self.normalized_url) {
            Some(n) => Some(n.to_string()),
            None => self
                .url_key()
                .map(normalize_url)
                .filter(|n| !n.is_empty()),
        }
    }

    pub fn is_identifiable(&self) -> bool {
        self.article_key().is_some()
            || self.story_key().is_some()
            || self.event_key().is_some()
            || self.fingerprint_key().is_some()
            || self.url_key().is_some()
            || self.normalized_url_key().is_some()
    }
}

/// A queued candidate plus the moment it entered the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    #[serde(flatten)]
    pub item: CandidateItem,
    /// Older queue files carry unix seconds under `ts`; missing means the epoch.
    #[serde(default, alias = "ts", deserialize_with = "enqueued_at_compat")]
    pub enqueued_at: DateTime<Utc>,
}

fn enqueued_at_compat<'de, D>(de: D) -> Result<DateTime<Utc>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Stamp {
        At(DateTime<Utc>),
        Unix(i64),
    }
    match Stamp::deserialize(de)? {
        Stamp::At(at) => Ok(at),
        Stamp::Unix(secs) => Ok(DateTime::from_timestamp(secs, 0).unwrap_or_default()),
    }
}

/// Summarizer output. An empty headline means "not relevant".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub headline: String,
    #[serde(default)]
    pub bullets: Vec<String>,
}

impl Summary {
    pub fn new(headline: impl Into<String>, bullets: Vec<String>) -> Self {
        Self {
            headline: headline.into(),
            bullets,
        }
    }

    pub fn is_relevant(&self) -> bool {
        !self.headline.trim().is_empty()
    }
}

/// Identifiers returned by a successful publish.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishReceipt {
    pub post_ref: String,
    #[serde(default)]
    pub reply_ref: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_strings_do_not_count_as_identity() {
        let mut it = CandidateItem::default();
        it.event_id = Some("  ".into());
        it.fingerprint = Some(String::new());
        assert!(!it.is_identifiable());

        let it = CandidateItem::new("https://e.com/a?x=1");
        assert!(it.is_identifiable());
        assert_eq!(it.normalized_url, "https://e.com/a");
    }

    #[test]
    fn posted_entry_copies_only_present_fields() {
        let it = CandidateItem::new("https://e.com/a#top").article("42");
        let e = PostedEntry::from_candidate(&it, "p1", Utc::now());
        assert_eq!(e.article_id.as_deref(), Some("42"));
        assert_eq!(e.normalized_url.as_deref(), Some("https://e.com/a"));
        assert!(e.event_id.is_none());
        assert_eq!(e.post_ref, "p1");
    }

    #[test]
    fn queue_entry_flattens_item_fields() {
        let entry = QueueEntry {
            item: CandidateItem::new("https://e.com/a").event("e1"),
            enqueued_at: Utc::now(),
        };
        let v = serde_json::to_value(&entry).unwrap();
        assert_eq!(v["event_id"], "e1");
        assert_eq!(v["url"], "https://e.com/a");
        assert!(v.get("enqueued_at").is_some());
    }
}
