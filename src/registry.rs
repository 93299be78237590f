// src/registry.rs
//! # Posted Registry
//!
//! Durable set of previously published identities with timestamps.
//!
//! - `already_posted` / `posted_match` answer "have we published something equivalent
//!   within the window?" by checking, in fixed order: article, story, event (own window),
//!   fingerprint, then normalized or raw URL.
//! - `mark_posted` merges: every existing entry that shares any identity field with the
//!   new one is replaced, so one real-world item never accumulates several entries.
//! - Every call prunes entries older than the retention ceiling and enforces the entry cap.
//!   There is no background scheduler, so pruning piggybacks on each access.
//! - A corrupt file loads as an empty registry. Legacy documents
//!   (`posted_urls` / `posted_events` / `posted_fingerprints`) are migrated on load.

use anyhow::Result;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::identity::identity_equal;
use crate::store;
use crate::types::{CandidateItem, PostedEntry};

pub const DEFAULT_RETENTION_HOURS: f64 = 168.0;
pub const DEFAULT_MAX_ENTRIES: usize = 1000;

/// Time windows for `already_posted`. `event_window_hours` defaults to `window_hours`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DedupWindows {
    pub window_hours: f64,
    pub event_window_hours: Option<f64>,
}

impl DedupWindows {
    pub fn new(window_hours: f64) -> Self {
        Self {
            window_hours,
            event_window_hours: None,
        }
    }

    pub fn with_event_hours(mut self, event_window_hours: f64) -> Self {
        self.event_window_hours = Some(event_window_hours);
        self
    }

    fn identity(&self) -> Duration {
        hours(self.window_hours)
    }

    fn event(&self) -> Duration {
        hours(self.event_window_hours.unwrap_or(self.window_hours))
    }
}

pub(crate) fn hours(h: f64) -> Duration {
    Duration::milliseconds((h.max(0.0) * 3_600_000.0) as i64)
}

/// Which identity field produced an "already posted" hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Article,
    Story,
    Event,
    Fingerprint,
    Url,
}

/// Result of `mark_posted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkOutcome {
    Recorded { replaced: usize },
    /// Candidate carried no identity field; nothing was written.
    Unidentifiable,
}

// ---- on-disk shapes ----

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    items: Vec<PostedEntry>,
    #[serde(default)]
    legacy_migrated: bool,
}

#[derive(Debug, Default, Deserialize)]
struct LegacyState {
    #[serde(default)]
    posted_urls: Vec<LegacyRecord>,
    #[serde(default)]
    posted_events: Vec<LegacyRecord>,
    #[serde(default)]
    posted_fingerprints: Vec<LegacyRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LegacyRecord {
    Url {
        url: String,
        #[serde(default)]
        ts: i64,
    },
    Event {
        event: String,
        #[serde(default)]
        ts: i64,
    },
    Fingerprint {
        fp: String,
        #[serde(default)]
        ts: i64,
    },
    // Bare strings predate timestamps and are treated as expired, like any other shape.
    Other(IgnoredAny),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RegistryDoc {
    Current(RegistryFile),
    Bare(Vec<PostedEntry>),
    Legacy(LegacyState),
}

impl Default for RegistryDoc {
    fn default() -> Self {
        RegistryDoc::Current(RegistryFile::default())
    }
}

impl LegacyState {
    fn into_entries(self) -> Vec<PostedEntry> {
        self.posted_urls
            .into_iter()
            .chain(self.posted_events)
            .chain(self.posted_fingerprints)
            .filter_map(LegacyRecord::into_entry)
            .collect()
    }
}

impl LegacyRecord {
    fn into_entry(self) -> Option<PostedEntry> {
        let (item, ts) = match self {
            LegacyRecord::Url { url, ts } => (CandidateItem::new(url), ts),
            LegacyRecord::Event { event, ts } => (CandidateItem::default().event(event), ts),
            LegacyRecord::Fingerprint { fp, ts } => {
                (CandidateItem::default().fingerprint(fp), ts)
            }
            LegacyRecord::Other(_) => return None,
        };
        if ts <= 0 || !item.is_identifiable() {
            return None;
        }
        let at = Utc.timestamp_opt(ts, 0).single()?;
        Some(PostedEntry::from_candidate(&item, "", at))
    }
}

/// Registry snapshot as loaded (already pruned and capped).
struct Loaded {
    entries: Vec<PostedEntry>,
    legacy_migrated: bool,
    dirty: bool,
}

pub struct PostedRegistry {
    path: PathBuf,
    legacy_path: Option<PathBuf>,
    retention: Duration,
    max_entries: usize,
}

impl PostedRegistry {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            legacy_path: None,
            retention: hours(DEFAULT_RETENTION_HOURS),
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }

    /// Older single-document state file whose posted lists are merged once.
    pub fn with_legacy_source(mut self, path: impl Into<PathBuf>) -> Self {
        self.legacy_path = Some(path.into());
        self
    }

    pub fn with_retention_hours(mut self, h: f64) -> Self {
        self.retention = hours(h);
        self
    }

    pub fn with_max_entries(mut self, n: usize) -> Self {
        self.max_entries = n.max(1);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Pruned snapshot of all live entries, oldest first.
    pub fn entries(&self, now: DateTime<Utc>) -> Vec<PostedEntry> {
        self.load_pruned(now).entries
    }

    pub fn already_posted(
        &self,
        item: &CandidateItem,
        windows: DedupWindows,
        now: DateTime<Utc>,
    ) -> bool {
        self.posted_match(item, windows, now).is_some()
    }

    /// First matching identity field, checked in fixed priority order.
    pub fn posted_match(
        &self,
        item: &CandidateItem,
        windows: DedupWindows,
        now: DateTime<Utc>,
    ) -> Option<MatchKind> {
        let loaded = self.load_pruned(now);
        if loaded.dirty {
            if let Err(e) = self.save(&loaded) {
                tracing::warn!(error = %format!("{e:#}"), "registry prune not persisted");
            }
        }
        let hit = match_in(&loaded.entries, item, windows, now);
        if let Some(kind) = hit {
            tracing::debug!(?kind, url = %item.url, "already posted");
        }
        hit
    }

    /// Record a successful publish, replacing every identity-equal entry.
    pub fn mark_posted(
        &self,
        item: &CandidateItem,
        post_ref: &str,
        now: DateTime<Utc>,
    ) -> Result<MarkOutcome> {
        if !item.is_identifiable() {
            tracing::warn!(headline = %item.headline, "mark_posted: candidate has no identity, skipped");
            return Ok(MarkOutcome::Unidentifiable);
        }
        let entry = PostedEntry::from_candidate(item, post_ref, now);

        let mut loaded = self.load_pruned(now);
        let before = loaded.entries.len();
        loaded.entries.retain(|e| !identity_equal(e, &entry));
        let replaced = before - loaded.entries.len();
        loaded.entries.push(entry);
        self.enforce_cap(&mut loaded.entries);
        self.save(&loaded)?;

        tracing::info!(
            post_ref,
            replaced,
            event_id = item.event_key().unwrap_or(""),
            url = %item.url,
            "registry: marked posted"
        );
        Ok(MarkOutcome::Recorded { replaced })
    }

    fn load_pruned(&self, now: DateTime<Utc>) -> Loaded {
        let (mut entries, mut legacy_migrated, mut dirty) =
            match store::load_or_default::<RegistryDoc>(&self.path) {
                RegistryDoc::Current(f) => (f.items, f.legacy_migrated, false),
                RegistryDoc::Bare(items) => (items, false, true),
                RegistryDoc::Legacy(l) => (l.into_entries(), true, true),
            };

        if !legacy_migrated {
            if let Some(lp) = self.legacy_path.as_deref().filter(|p| p.exists()) {
                let legacy: LegacyState = store::load_or_default(lp);
                let mut merged = 0usize;
                for old in legacy.into_entries() {
                    if !entries.iter().any(|e| identity_equal(e, &old)) {
                        entries.push(old);
                        merged += 1;
                    }
                }
                tracing::info!(merged, legacy = %lp.display(), "registry: migrated legacy state");
                legacy_migrated = true;
                dirty = true;
            }
        }

        let before = entries.len();
        entries.retain(|e| e.is_identifiable() && now.signed_duration_since(e.posted_at) <= self.retention);
        entries.sort_by_key(|e| e.posted_at);
        self.enforce_cap(&mut entries);
        if entries.len() != before {
            dirty = true;
        }

        Loaded {
            entries,
            legacy_migrated,
            dirty,
        }
    }

    fn enforce_cap(&self, entries: &mut Vec<PostedEntry>) {
        if entries.len() > self.max_entries {
            let excess = entries.len() - self.max_entries;
            entries.drain(0..excess);
        }
    }

    fn save(&self, loaded: &Loaded) -> Result<()> {
        #[derive(Serialize)]
        struct Out<'a> {
            items: &'a [PostedEntry],
            legacy_migrated: bool,
        }
        store::save_atomic(
            &self.path,
            &Out {
                items: &loaded.entries,
                legacy_migrated: loaded.legacy_migrated,
            },
        )
    }
}

/// Pure matching over an in-memory snapshot. Each check ignores entries outside its own window.
pub fn match_in(
    entries: &[PostedEntry],
    item: &CandidateItem,
    windows: DedupWindows,
    now: DateTime<Utc>,
) -> Option<MatchKind> {
    let identity_w = windows.identity();
    let event_w = windows.event();
    let fresh = |e: &PostedEntry, w: Duration| now.signed_duration_since(e.posted_at) <= w;

    if let Some(a) = item.article_key() {
        if entries
            .iter()
            .any(|e| e.article_key() == Some(a) && fresh(e, identity_w))
        {
            return Some(MatchKind::Article);
        }
    }
    if let Some(s) = item.story_key() {
        if entries
            .iter()
            .any(|e| e.story_key() == Some(s) && fresh(e, identity_w))
        {
            return Some(MatchKind::Story);
        }
    }
    if let Some(ev) = item.event_key() {
        if entries
            .iter()
            .any(|e| e.event_key() == Some(ev) && fresh(e, event_w))
        {
            return Some(MatchKind::Event);
        }
    }
    if let Some(fp) = item.fingerprint_key() {
        if entries
            .iter()
            .any(|e| e.fingerprint_key() == Some(fp) && fresh(e, identity_w))
        {
            return Some(MatchKind::Fingerprint);
        }
    }

    let norm = item.canonical_url();
    let raw = item.url_key();
    let url_hit = entries.iter().any(|e| {
        fresh(e, identity_w)
            && ((!norm.is_empty() && e.normalized_url_key().as_deref() == Some(norm.as_str()))
                || (raw.is_some() && e.url_key() == raw))
    });
    url_hit.then_some(MatchKind::Url)
}
