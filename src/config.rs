// src/config.rs
use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::adapters::summarizer::DEFAULT_DAILY_LIMIT;
use crate::maintenance::{MaintenanceRules, RulesFile};
use crate::registry::{DedupWindows, DEFAULT_MAX_ENTRIES, DEFAULT_RETENTION_HOURS};

pub const ENV_RULES_PATH: &str = "MAINTENANCE_RULES_PATH";

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_path(name: &str, default: &str) -> PathBuf {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(default))
}

/// `1`, `true`, `yes`, `on` (any case).
pub fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| {
            matches!(
                v.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(false)
}

/// Everything one run needs, read from the environment with defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub window_hours: f64,
    pub event_window_hours: f64,
    pub post_event_skip_hours: f64,
    pub queue_file: PathBuf,
    pub posted_file: PathBuf,
    pub legacy_state_file: PathBuf,
    pub summary_cache_file: PathBuf,
    pub articles_limit: usize,
    pub topic_query: String,
    pub feed_urls: Vec<String>,
    pub fallback_attempts: usize,
    pub retention_hours: f64,
    pub max_entries: usize,
    pub skip_summarizer: bool,
    pub dry_run: bool,
    pub summary_daily_limit: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            window_hours: 72.0,
            event_window_hours: 72.0,
            post_event_skip_hours: 72.0,
            queue_file: PathBuf::from(".state/queue.json"),
            posted_file: PathBuf::from(".state/posted.json"),
            legacy_state_file: PathBuf::from(".state/state.json"),
            summary_cache_file: PathBuf::from(".state/summary_cache.json"),
            articles_limit: 5,
            topic_query: "bitcoin mining".to_string(),
            feed_urls: Vec::new(),
            fallback_attempts: 3,
            retention_hours: DEFAULT_RETENTION_HOURS,
            max_entries: DEFAULT_MAX_ENTRIES,
            skip_summarizer: false,
            dry_run: false,
            summary_daily_limit: DEFAULT_DAILY_LIMIT,
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        let window_hours = env_parse("DEDUP_WINDOW_HOURS", d.window_hours);
        let event_window_hours = Some(env_parse("EVENT_DEDUP_HOURS", window_hours))
            .filter(|h| *h > 0.0)
            .unwrap_or(window_hours);
        let topic_query = std::env::var("TOPIC_QUERY")
            .ok()
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty())
            .unwrap_or(d.topic_query);
        let feed_urls = std::env::var("FEED_URLS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Self {
            window_hours,
            event_window_hours,
            post_event_skip_hours: env_parse("POST_EVENT_SKIP_HOURS", d.post_event_skip_hours),
            queue_file: env_path("QUEUE_FILE", ".state/queue.json"),
            posted_file: env_path("POSTED_FILE", ".state/posted.json"),
            legacy_state_file: env_path("LEGACY_STATE_FILE", ".state/state.json"),
            summary_cache_file: env_path("SUMMARY_CACHE_FILE", ".state/summary_cache.json"),
            articles_limit: env_parse("ARTICLES_LIMIT", d.articles_limit).max(1),
            topic_query,
            feed_urls,
            fallback_attempts: env_parse("FALLBACK_ATTEMPTS", d.fallback_attempts),
            retention_hours: env_parse("REGISTRY_RETENTION_HOURS", d.retention_hours),
            max_entries: env_parse("REGISTRY_MAX_ENTRIES", d.max_entries).max(1),
            skip_summarizer: env_flag("SKIP_SUMMARIZER"),
            dry_run: env_flag("DRY_RUN"),
            summary_daily_limit: env_parse("SUMMARY_DAILY_LIMIT", d.summary_daily_limit),
        }
    }

    /// Windows for the fresh-candidate filter.
    pub fn select_windows(&self) -> DedupWindows {
        DedupWindows::new(self.window_hours).with_event_hours(self.event_window_hours)
    }

    /// Windows for the queue fallback (event window from `POST_EVENT_SKIP_HOURS`).
    pub fn fallback_windows(&self) -> DedupWindows {
        DedupWindows::new(self.window_hours).with_event_hours(self.post_event_skip_hours)
    }
}

/// Load maintenance rules from an explicit path. TOML or JSON.
pub fn load_rules_from(path: &Path) -> Result<MaintenanceRules> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading maintenance rules from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    let file = parse_rules(&content, ext.as_str())?;
    MaintenanceRules::from_file(file)
}

/// Load maintenance rules using env var + fallbacks:
/// 1) $MAINTENANCE_RULES_PATH
/// 2) config/maintenance.toml
/// 3) config/maintenance.json
/// 4) built-in defaults
pub fn load_rules_default() -> Result<MaintenanceRules> {
    if let Ok(p) = std::env::var(ENV_RULES_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_rules_from(&pb);
        }
        return Err(anyhow!("{ENV_RULES_PATH} points to non-existent path"));
    }
    let toml_p = PathBuf::from("config/maintenance.toml");
    if toml_p.exists() {
        return load_rules_from(&toml_p);
    }
    let json_p = PathBuf::from("config/maintenance.json");
    if json_p.exists() {
        return load_rules_from(&json_p);
    }
    Ok(MaintenanceRules::default())
}

fn parse_rules(s: &str, hint_ext: &str) -> Result<RulesFile> {
    if hint_ext == "json" {
        return serde_json::from_str(s).context("parsing maintenance rules json");
    }
    match toml::from_str(s) {
        Ok(v) => Ok(v),
        Err(toml_err) => serde_json::from_str(s)
            .map_err(|_| anyhow!("unsupported maintenance rules format: {toml_err}")),
    }
}
