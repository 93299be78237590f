//! # Domain Ranker
//!
//! Maps a source URL to an authority score, **lower is better**.
//!
//! - Loads from JSON config (`preferred`, `deny`, `banned`), or uses `default_seed()`.
//! - Hosts are lowercased with a leading `www.` stripped before lookup.
//! - Order: banned → deny list → preferred order → common news TLD → everything else.
//! - Env lists (`SOURCE_DOMAIN_ALLOWLIST`, `SOURCE_DOMAIN_DENYLIST`, `SOURCE_BANNED_DOMAINS`)
//!   replace / extend the seed, comma-separated.
//!
//! Used to pick cluster representatives and to resolve same-company duplicates in the queue.

use serde::Deserialize;
use std::{fs, path::Path};

pub const SCORE_BANNED: u32 = 1_000_000;
pub const SCORE_DENY_BASE: u32 = 10_000;
pub const SCORE_COMMON_TLD: u32 = 500;
pub const SCORE_OTHER: u32 = 800;
pub const SCORE_UNPARSEABLE: u32 = 9_999;

#[derive(Debug, Clone, Deserialize)]
pub struct DomainRanker {
    /// Preferred hosts, best first.
    #[serde(default)]
    pub preferred: Vec<String>,
    /// Deprioritized hosts, used only when nothing else exists.
    #[serde(default)]
    pub deny: Vec<String>,
    /// Never acceptable.
    #[serde(default)]
    pub banned: Vec<String>,
}

impl Default for DomainRanker {
    fn default() -> Self {
        Self::default_seed()
    }
}

impl DomainRanker {
    /// Load from a JSON file. Falls back to `default_seed()` on error.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        let mut r = match fs::read_to_string(path) {
            Ok(s) => serde_json::from_str(&s).unwrap_or_else(|_| Self::default_seed()),
            Err(_) => Self::default_seed(),
        };
        r.normalize_lists();
        r
    }

    /// Seed plus env overrides.
    pub fn from_env() -> Self {
        let mut r = Self::default_seed();
        let allow = env_list("SOURCE_DOMAIN_ALLOWLIST");
        if !allow.is_empty() {
            r.preferred = allow;
        }
        r.deny.extend(env_list("SOURCE_DOMAIN_DENYLIST"));
        r.banned.extend(env_list("SOURCE_BANNED_DOMAINS"));
        r.normalize_lists();
        r
    }

    fn normalize_lists(&mut self) {
        for list in [&mut self.preferred, &mut self.deny, &mut self.banned] {
            for h in list.iter_mut() {
                *h = normalize_host(h);
            }
            list.retain(|h| !h.is_empty());
        }
    }

    /// Authority score for a URL.
    pub fn score(&self, url: &str) -> u32 {
        let host = match host_of(url) {
            Some(h) => h,
            None => return SCORE_UNPARSEABLE,
        };
        if self.is_banned_host(&host) {
            return SCORE_BANNED;
        }
        if let Some(i) = self.deny.iter().position(|d| *d == host) {
            return SCORE_DENY_BASE + i as u32;
        }
        if let Some(i) = self.preferred.iter().position(|d| *d == host) {
            return i as u32;
        }
        if [".com", ".co", ".org", ".net"]
            .iter()
            .any(|tld| host.ends_with(tld))
        {
            return SCORE_COMMON_TLD;
        }
        SCORE_OTHER
    }

    pub fn is_banned(&self, url: &str) -> bool {
        host_of(url).is_some_and(|h| self.is_banned_host(&h))
    }

    fn is_banned_host(&self, host: &str) -> bool {
        self.banned.iter().any(|b| b == host) || is_eth_host(host)
    }

    /// Built-in seed used when no config is found.
    pub(crate) fn default_seed() -> Self {
        let owned = |xs: &[&str]| xs.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        Self {
            preferred: owned(&[
                "wsj.com",
                "ft.com",
                "blockspace.media",
                "beincrypto.com",
                "bloomberg.com",
                "reuters.com",
                "coindesk.com",
                "theblock.co",
                "blockworks.co",
                "bitcoinmagazine.com",
                "braiins.com",
                "cointelegraph.com",
            ]),
            deny: owned(&[
                "coinmarketcap.com",
                "crypto.news",
                "streetinsider.com",
                "seekingalpha.com",
                "benzinga.com",
                "ambcrypto.com",
                "hashrateindex.com",
            ]),
            banned: owned(&["hashrateindex.com"]),
        }
    }
}

/// Lowercase, trim, strip a leading `www.`.
pub fn normalize_host(h: &str) -> String {
    let h = h.trim().to_ascii_lowercase();
    h.strip_prefix("www.").map(str::to_string).unwrap_or(h)
}

/// Host part of an absolute URL (no scheme → `None`).
pub fn host_of(url: &str) -> Option<String> {
    let rest = url.trim().split_once("://")?.1;
    let authority = rest
        .split(|c: char| c == '/' || c == '?' || c == '#')
        .next()
        .unwrap_or_default();
    let authority = authority.rsplit('@').next().unwrap_or_default();
    let host = authority.split(':').next().unwrap_or_default();
    let host = normalize_host(host);
    (!host.is_empty()).then_some(host)
}

/// Hosts that clearly reference Ethereum: a label equal to `eth`, `ethereum` anywhere,
/// or a left-most label starting with `eth`.
fn is_eth_host(host: &str) -> bool {
    if host.contains("ethereum") {
        return true;
    }
    let labels: Vec<&str> = host.split('.').filter(|l| !l.is_empty()).collect();
    labels.iter().any(|l| *l == "eth") || labels.first().is_some_and(|l| l.starts_with("eth"))
}

fn env_list(name: &str) -> Vec<String> {
    std::env::var(name)
        .unwrap_or_default()
        .split(',')
        .map(normalize_host)
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_extraction_handles_noise() {
        assert_eq!(host_of("https://WWW.Reuters.com/x?y=1").as_deref(), Some("reuters.com"));
        assert_eq!(host_of("http://user@ft.com:8080/a").as_deref(), Some("ft.com"));
        assert_eq!(host_of("not a url"), None);
    }

    #[test]
    fn scoring_order() {
        let r = DomainRanker::default_seed();
        assert_eq!(r.score("https://wsj.com/a"), 0);
        assert!(r.score("https://reuters.com/a") < r.score("https://random.com/a"));
        assert_eq!(r.score("https://random.com/a"), SCORE_COMMON_TLD);
        assert_eq!(r.score("https://random.io/a"), SCORE_OTHER);
        assert_eq!(r.score("https://benzinga.com/a"), SCORE_DENY_BASE + 4);
        assert_eq!(r.score("https://hashrateindex.com/a"), SCORE_BANNED);
        assert_eq!(r.score("https://etherscan.io/tx"), SCORE_BANNED);
        assert_eq!(r.score("https://health.com/a"), SCORE_COMMON_TLD);
        assert_eq!(r.score("garbage"), SCORE_UNPARSEABLE);
    }

    #[test]
    fn missing_file_uses_seed() {
        let r = DomainRanker::load_from_file("/definitely/not/here.json");
        assert_eq!(r.score("https://wsj.com/"), 0);
    }
}
