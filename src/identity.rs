// src/identity.rs
//! Identity normalization: canonical keys derived from heterogeneous candidate data.
//!
//! Priority when a single key must stand for an item (queue dedup, in-run dedup):
//! `article_id > story_id > event_id > fingerprint > normalized_url`.
//! The more specific the identifier, the less prone it is to false collisions.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::{CandidateItem, PostedEntry};

/// Identity fields in descending specificity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IdentityField {
    Article,
    Story,
    Event,
    Fingerprint,
    Url,
}

impl IdentityField {
    pub const PRIORITY: [IdentityField; 5] = [
        IdentityField::Article,
        IdentityField::Story,
        IdentityField::Event,
        IdentityField::Fingerprint,
        IdentityField::Url,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IdentityField::Article => "article",
            IdentityField::Story => "story",
            IdentityField::Event => "event",
            IdentityField::Fingerprint => "fingerprint",
            IdentityField::Url => "url",
        }
    }
}

/// Strip query string and fragment. Tracking parameters vary per source; the path does not.
pub fn normalize_url(url: &str) -> String {
    let u = url.trim();
    let end = u.find(|c: char| c == '?' || c == '#').unwrap_or(u.len());
    u[..end].to_string()
}

/// Value of one identity field on a candidate, if present.
pub fn field_value(item: &CandidateItem, field: IdentityField) -> Option<String> {
    match field {
        IdentityField::Article => item.article_key().map(str::to_string),
        IdentityField::Story => item.story_key().map(str::to_string),
        IdentityField::Event => item.event_key().map(str::to_string),
        IdentityField::Fingerprint => item.fingerprint_key().map(str::to_string),
        IdentityField::Url => Some(item.canonical_url()).filter(|u| !u.is_empty()),
    }
}

/// All present identity keys of a candidate, most specific first.
pub fn identity_keys(item: &CandidateItem) -> Vec<(IdentityField, String)> {
    IdentityField::PRIORITY
        .iter()
        .filter_map(|f| field_value(item, *f).map(|v| (*f, v)))
        .collect()
}

/// The single strongest key, tagged with its field and lowercased
/// (`"article:123"`, `"url:https://e.com/p"`). `None` for unidentifiable items.
pub fn primary_key(item: &CandidateItem) -> Option<String> {
    identity_keys(item)
        .into_iter()
        .next()
        .map(|(f, v)| format!("{}:{}", f.as_str(), v.to_lowercase()))
}

fn posted_field(entry: &PostedEntry, field: IdentityField) -> Option<String> {
    match field {
        IdentityField::Article => entry.article_key().map(str::to_string),
        IdentityField::Story => entry.story_key().map(str::to_string),
        IdentityField::Event => entry.event_key().map(str::to_string),
        IdentityField::Fingerprint => entry.fingerprint_key().map(str::to_string),
        IdentityField::Url => entry.normalized_url_key(),
    }
}

/// Two registry entries describe the same identity cluster when any single
/// non-empty identity field matches.
pub fn identity_equal(a: &PostedEntry, b: &PostedEntry) -> bool {
    IdentityField::PRIORITY.iter().any(|f| {
        matches!(
            (posted_field(a, *f), posted_field(b, *f)),
            (Some(x), Some(y)) if x == y
        )
    }) || matches!((a.url_key(), b.url_key()), (Some(x), Some(y)) if x == y)
}

static RE_NON_ALNUM: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9\s]").expect("static regex"));
static RE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static regex"));

/// Title signature: lowercase, alphanumeric only, whitespace collapsed.
pub fn title_signature(title: &str) -> String {
    let lower = title.to_lowercase();
    let stripped = RE_NON_ALNUM.replace_all(&lower, " ");
    RE_WS.replace_all(&stripped, " ").trim().to_string()
}
