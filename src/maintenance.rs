// src/maintenance.rs
//! Queue cleanup run at the start of every pipeline run.
//!
//! Each step is best-effort: its error is captured as `StepOutcome::Failed` and the
//! next step still runs. Nothing here can abort a run.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::domains::DomainRanker;
use crate::identity::primary_key;
use crate::queue::WorkQueue;
use crate::registry::{DedupWindows, PostedRegistry};
use crate::types::QueueEntry;

/// Window used when purging queue entries that were posted in the meantime.
pub const POSTED_PURGE_WINDOW_HOURS: f64 = 168.0;

/// Typed soft-failure result of one cleanup step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum StepOutcome {
    Removed(usize),
    Skipped(&'static str),
    Failed(String),
}

impl StepOutcome {
    fn from_result(step: &'static str, r: Result<usize>) -> Self {
        match r {
            Ok(n) => {
                if n > 0 {
                    tracing::info!(step, removed = n, "maintenance: step removed entries");
                    metrics::counter!("relay_queue_purged_total", "step" => step)
                        .increment(n as u64);
                }
                StepOutcome::Removed(n)
            }
            Err(e) => {
                tracing::warn!(step, error = %format!("{e:#}"), "maintenance: step failed");
                StepOutcome::Failed(format!("{e:#}"))
            }
        }
    }

    pub fn removed(&self) -> usize {
        match self {
            StepOutcome::Removed(n) => *n,
            _ => 0,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, StepOutcome::Failed(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    pub dedupe: StepOutcome,
    pub banned: StepOutcome,
    pub posted: StepOutcome,
    pub company_duplicates: StepOutcome,
    pub queue_len: usize,
}

impl MaintenanceReport {
    fn steps(&self) -> [&StepOutcome; 4] {
        [
            &self.dedupe,
            &self.banned,
            &self.posted,
            &self.company_duplicates,
        ]
    }

    pub fn total_removed(&self) -> usize {
        self.steps().iter().map(|s| s.removed()).sum()
    }

    pub fn failed_steps(&self) -> usize {
        self.steps().iter().filter(|s| s.is_failed()).count()
    }
}

/// Content rules for the cleanup pass.
#[derive(Debug, Clone)]
pub struct MaintenanceRules {
    pub banned: Vec<Regex>,
    /// Lowercase company needles; the first one found in a headline is the company key.
    pub companies: Vec<String>,
}

/// File shape for `config/maintenance.{toml,json}`. Missing keys keep the defaults.
#[derive(Debug, Default, Deserialize)]
pub struct RulesFile {
    #[serde(default)]
    pub banned_patterns: Option<Vec<String>>,
    #[serde(default)]
    pub companies: Option<Vec<String>>,
}

const DEFAULT_BANNED: &[&str] = &[r"\bcrypto\b", r"crypto-", r"cryptocurrenc"];

const DEFAULT_COMPANIES: &[&str] = &[
    "terawulf",
    "wulf",
    "riot",
    "marathon",
    "mara",
    "ciphers",
    "cipher",
    "cleanspark",
    "hut",
    "bitfarms",
    "corescientific",
    "core scientific",
    "cango",
    "iren",
    "iris",
    "alps",
    "bitdeer",
];

impl Default for MaintenanceRules {
    fn default() -> Self {
        Self::from_file(RulesFile::default()).unwrap_or(Self {
            banned: Vec::new(),
            companies: Vec::new(),
        })
    }
}

impl MaintenanceRules {
    /// Compile a rules file, filling gaps with the built-in lists.
    pub fn from_file(file: RulesFile) -> Result<Self> {
        let patterns: Vec<String> = file
            .banned_patterns
            .unwrap_or_else(|| DEFAULT_BANNED.iter().map(|s| s.to_string()).collect());
        let banned = patterns
            .iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .map(|p| Regex::new(p).with_context(|| format!("invalid banned pattern {p:?}")))
            .collect::<Result<Vec<_>>>()?;

        let mut seen = HashSet::new();
        let companies = file
            .companies
            .unwrap_or_else(|| DEFAULT_COMPANIES.iter().map(|s| s.to_string()).collect())
            .into_iter()
            .map(|c| c.trim().to_lowercase())
            .filter(|c| !c.is_empty() && seen.insert(c.clone()))
            .collect();

        Ok(Self { banned, companies })
    }

    pub fn is_banned(&self, entry: &QueueEntry) -> bool {
        let it = &entry.item;
        let fields = [
            it.headline.to_lowercase(),
            it.title.to_lowercase(),
            it.url.to_lowercase(),
        ];
        self.banned
            .iter()
            .any(|re| fields.iter().any(|f| re.is_match(f)))
    }

    /// Company key of an entry: the first configured needle found in the headline
    /// (or title when unsummarized). "core scientific" folds into "corescientific".
    pub fn company_key(&self, entry: &QueueEntry) -> Option<String> {
        let text = if entry.item.has_summary() {
            entry.item.headline.to_lowercase()
        } else {
            entry.item.title.to_lowercase()
        };
        self.companies
            .iter()
            .find(|c| text.contains(c.as_str()))
            .map(|c| c.replace(' ', ""))
    }
}

/// Everything the cleanup pass needs.
pub struct Maintenance<'a> {
    pub queue: &'a WorkQueue,
    pub registry: &'a PostedRegistry,
    pub rules: &'a MaintenanceRules,
    pub ranker: &'a DomainRanker,
    /// Event window for the posted purge.
    pub event_window_hours: f64,
}

impl Maintenance<'_> {
    /// Dedupe, purge banned content, purge already-posted, collapse company duplicates.
    pub fn run(&self, now: DateTime<Utc>) -> MaintenanceReport {
        let dedupe = StepOutcome::from_result("dedupe", self.queue.dedupe());
        let banned = if self.rules.banned.is_empty() {
            StepOutcome::Skipped("no banned patterns")
        } else {
            StepOutcome::from_result("banned", self.queue.purge(|e| self.rules.is_banned(e)))
        };
        let posted = StepOutcome::from_result("posted", self.purge_posted(now));
        let company_duplicates = if self.rules.companies.is_empty() {
            StepOutcome::Skipped("no companies configured")
        } else {
            StepOutcome::from_result("company_duplicates", self.purge_company_duplicates())
        };
        let queue_len = self.queue.len();
        metrics::gauge!("relay_queue_len").set(queue_len as f64);

        let report = MaintenanceReport {
            dedupe,
            banned,
            posted,
            company_duplicates,
            queue_len,
        };
        tracing::info!(
            queue_len,
            removed = report.total_removed(),
            failed = report.failed_steps(),
            "maintenance: queue cleanup done"
        );
        report
    }

    fn purge_posted(&self, now: DateTime<Utc>) -> Result<usize> {
        let windows =
            DedupWindows::new(POSTED_PURGE_WINDOW_HOURS).with_event_hours(self.event_window_hours);
        self.queue
            .purge(|e| self.registry.already_posted(&e.item, windows, now))
    }

    /// Per company, keep only the entry with the best (lowest) domain score.
    fn purge_company_duplicates(&self) -> Result<usize> {
        let snapshot = self.queue.snapshot();
        let mut best: HashMap<String, (u32, usize)> = HashMap::new();
        let mut members: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, e) in snapshot.iter().enumerate() {
            let Some(company) = self.rules.company_key(e) else {
                continue;
            };
            let score = self.ranker.score(&e.item.url);
            members.entry(company.clone()).or_default().push(i);
            best.entry(company)
                .and_modify(|b| {
                    if score < b.0 {
                        *b = (score, i);
                    }
                })
                .or_insert((score, i));
        }

        let mut drop_keys: HashSet<String> = HashSet::new();
        for (company, idxs) in &members {
            if idxs.len() < 2 {
                continue;
            }
            let keep = best.get(company).map(|b| b.1);
            for &i in idxs {
                if Some(i) == keep {
                    continue;
                }
                if let Some(k) = primary_key(&snapshot[i].item) {
                    tracing::debug!(company = %company, url = %snapshot[i].item.url, "maintenance: weaker company duplicate");
                    drop_keys.insert(k);
                }
            }
        }
        if drop_keys.is_empty() {
            return Ok(0);
        }
        self.queue.purge(|e| {
            primary_key(&e.item).is_some_and(|k| drop_keys.contains(&k))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CandidateItem;

    fn entry(url: &str, headline: &str) -> QueueEntry {
        let mut item = CandidateItem::new(url).titled(headline);
        item.headline = headline.to_string();
        QueueEntry {
            item,
            enqueued_at: Utc::now(),
        }
    }

    #[test]
    fn default_rules_ban_crypto_tokens() {
        let r = MaintenanceRules::default();
        assert!(r.is_banned(&entry("https://a.com/x", "Crypto market slides")));
        assert!(r.is_banned(&entry("https://a.com/crypto-news/1", "Miners expand")));
        assert!(r.is_banned(&entry("https://a.com/x", "Cryptocurrency bill passes")));
        assert!(!r.is_banned(&entry("https://a.com/x", "Cryptographer joins miner")));
    }

    #[test]
    fn company_key_folds_spaces() {
        let r = MaintenanceRules::default();
        assert_eq!(
            r.company_key(&entry("https://a.com/x", "Core Scientific adds 20 EH/s")),
            Some("corescientific".to_string())
        );
        assert_eq!(r.company_key(&entry("https://a.com/x", "Hashprice falls")), None);
    }

    #[test]
    fn invalid_pattern_is_an_error() {
        let file = RulesFile {
            banned_patterns: Some(vec!["(".into()]),
            companies: None,
        };
        assert!(MaintenanceRules::from_file(file).is_err());
    }

    #[test]
    fn run_collapses_company_duplicates_and_purges_posted() {
        let dir = tempfile::tempdir().unwrap();
        let queue = WorkQueue::open(dir.path().join("queue.json"));
        let registry = PostedRegistry::open(dir.path().join("posted.json"));
        let now = Utc::now();

        registry
            .mark_posted(&CandidateItem::new("https://done.com/x"), "p1", now)
            .unwrap();
        queue
            .push_many(
                vec![
                    entry("https://random.io/riot", "Riot expands Texas site").item,
                    entry("https://reuters.com/riot", "Riot expands in Texas").item,
                    entry("https://done.com/x", "Already out").item,
                    entry("https://x.com/c", "crypto winter returns").item,
                    entry("https://wsj.com/b", "Bitdeer ships rigs").item,
                ],
                now,
            )
            .unwrap();

        let rules = MaintenanceRules::default();
        let ranker = DomainRanker::default();
        let report = Maintenance {
            queue: &queue,
            registry: &registry,
            rules: &rules,
            ranker: &ranker,
            event_window_hours: 72.0,
        }
        .run(now);

        assert_eq!(report.banned, StepOutcome::Removed(1));
        assert_eq!(report.posted, StepOutcome::Removed(1));
        assert_eq!(report.company_duplicates, StepOutcome::Removed(1));
        assert_eq!(report.queue_len, 2);
        let urls: Vec<String> = queue.snapshot().into_iter().map(|e| e.item.url).collect();
        assert_eq!(urls, vec!["https://reuters.com/riot", "https://wsj.com/b"]);
    }
}
