// src/pipeline.rs
//! # Orchestrator
//!
//! One run: budget cap → fetch → queue maintenance → select fresh → selection loop →
//! queue fallback. Exactly one item is published per run at most.
//!
//! Every external failure is local. A fetch error is an empty batch, a failed
//! maintenance step is a `StepOutcome::Failed`, a failed publish re-queues (fresh
//! candidate) or buries (queue item) the one item involved. `run_once` itself
//! cannot fail.

use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use crate::adapters::{Fetcher, Publisher, Summarizer};
use crate::compose::{compose_primary, compose_secondary, MAX_POST_LEN};
use crate::config::PipelineConfig;
use crate::domains::DomainRanker;
use crate::identity::primary_key;
use crate::maintenance::{Maintenance, MaintenanceReport, MaintenanceRules};
use crate::queue::WorkQueue;
use crate::registry::{MarkOutcome, PostedRegistry};
use crate::select::select_fresh;
use crate::types::{CandidateItem, PublishReceipt};

/// One-time metrics registration so the series show up in the exposition.
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("relay_runs_total", "Pipeline runs started.");
        describe_counter!("relay_posted_total", "Items published, by origin.");
        describe_counter!(
            "relay_publish_failures_total",
            "Publish attempts that failed or were rolled back."
        );
        describe_counter!(
            "relay_queue_purged_total",
            "Queue entries removed by maintenance, by step."
        );
        describe_counter!(
            "relay_candidates_total",
            "Fresh candidates left after selection."
        );
        describe_counter!("relay_fetch_items_total", "Items returned by the fetcher.");
        describe_counter!("relay_fetch_errors_total", "Feed fetch/parse errors.");
        describe_histogram!("relay_fetch_parse_ms", "Feed parse time in milliseconds.");
        describe_gauge!("relay_queue_len", "Work queue length after maintenance.");
    });
}

/// Terminal state of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunOutcome {
    Posted {
        post_ref: String,
        reply_ref: String,
        url: String,
        from_queue: bool,
    },
    /// Nothing published; this many items were re-queued or buried for later runs.
    Queued { queued: usize },
    NoOp,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub maintenance: MaintenanceReport,
    pub fetch_limit: usize,
    pub fetched: usize,
    pub fresh: usize,
    pub attempts: usize,
    pub fallback_attempts: usize,
}

impl RunReport {
    pub fn posted(&self) -> bool {
        matches!(self.outcome, RunOutcome::Posted { .. })
    }
}

/// How one candidate's summarize + publish attempt ended.
enum Attempt {
    Published(PublishReceipt),
    /// Summarizer says it is not relevant; drop it.
    Irrelevant,
    /// Summarizer or publisher failed; keep it for a later run.
    Failed,
}

pub struct Pipeline {
    config: PipelineConfig,
    registry: PostedRegistry,
    queue: WorkQueue,
    rules: MaintenanceRules,
    ranker: DomainRanker,
    fetcher: Arc<dyn Fetcher>,
    summarizer: Arc<dyn Summarizer>,
    publisher: Arc<dyn Publisher>,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        fetcher: Arc<dyn Fetcher>,
        summarizer: Arc<dyn Summarizer>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        let registry = PostedRegistry::open(&config.posted_file)
            .with_legacy_source(&config.legacy_state_file)
            .with_retention_hours(config.retention_hours)
            .with_max_entries(config.max_entries);
        let queue = WorkQueue::open(&config.queue_file);
        Self {
            config,
            registry,
            queue,
            rules: MaintenanceRules::default(),
            ranker: DomainRanker::default(),
            fetcher,
            summarizer,
            publisher,
        }
    }

    pub fn with_rules(mut self, rules: MaintenanceRules) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_ranker(mut self, ranker: DomainRanker) -> Self {
        self.ranker = ranker;
        self
    }

    pub fn registry(&self) -> &PostedRegistry {
        &self.registry
    }

    pub fn queue(&self) -> &WorkQueue {
        &self.queue
    }

    pub async fn run_once(&self) -> RunReport {
        self.run_at(Utc::now()).await
    }

    /// `run_once` with an explicit clock.
    pub async fn run_at(&self, now: DateTime<Utc>) -> RunReport {
        ensure_metrics_described();
        counter!("relay_runs_total").increment(1);

        let fetch_limit = self.fetch_limit();
        let raw = match self
            .fetcher
            .fetch(fetch_limit, &self.config.topic_query)
            .await
        {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %format!("{e:#}"), fetcher = self.fetcher.name(), "fetch failed, continuing with empty batch");
                Vec::new()
            }
        };
        let fetched = raw.len();

        let maintenance = Maintenance {
            queue: &self.queue,
            registry: &self.registry,
            rules: &self.rules,
            ranker: &self.ranker,
            event_window_hours: self.config.post_event_skip_hours,
        }
        .run(now);

        let fresh = select_fresh(
            raw,
            fetch_limit,
            &self.registry,
            self.config.select_windows(),
            now,
        );
        counter!("relay_candidates_total").increment(fresh.len() as u64);
        tracing::info!(fetched, fresh = fresh.len(), limit = fetch_limit, "candidates selected");

        let mut report = RunReport {
            outcome: RunOutcome::NoOp,
            maintenance,
            fetch_limit,
            fetched,
            fresh: fresh.len(),
            attempts: 0,
            fallback_attempts: 0,
        };

        let mut tried: HashSet<String> = HashSet::new();
        let mut queued = 0usize;
        let mut remaining: VecDeque<CandidateItem> = fresh.into();

        while let Some(mut item) = remaining.pop_front() {
            report.attempts += 1;
            if let Some(k) = primary_key(&item) {
                tried.insert(k);
            }
            match self.attempt(&mut item).await {
                Attempt::Published(receipt) => {
                    self.record_posted(&item, &receipt, now, "fresh");
                    // Best remaining candidate ends at the tail, so it pops first next run.
                    let rest: Vec<CandidateItem> = remaining.drain(..).rev().collect();
                    if !rest.is_empty() {
                        match self.queue.push_many(rest, now) {
                            Ok(n) => tracing::info!(queued = n, "remaining candidates queued"),
                            Err(e) => {
                                tracing::warn!(error = %format!("{e:#}"), "queueing remaining candidates failed")
                            }
                        }
                    }
                    report.outcome = RunOutcome::Posted {
                        post_ref: receipt.post_ref,
                        reply_ref: receipt.reply_ref,
                        url: item.url,
                        from_queue: false,
                    };
                    return report;
                }
                Attempt::Irrelevant => {
                    tracing::info!(url = %item.url, "candidate not relevant, skipped");
                }
                Attempt::Failed => match self.queue.push_many([item], now) {
                    Ok(n) => queued += n,
                    Err(e) => tracing::warn!(error = %format!("{e:#}"), "re-queue failed"),
                },
            }
        }

        let (posted, buried, fallback_attempts) = self.fallback(&tried, now).await;
        report.fallback_attempts = fallback_attempts;
        queued += buried;
        report.outcome = match posted {
            Some(outcome) => outcome,
            None if queued > 0 => RunOutcome::Queued { queued },
            None => RunOutcome::NoOp,
        };
        report
    }

    fn fetch_limit(&self) -> usize {
        let limit = self.config.articles_limit.max(1);
        match self.summarizer.remaining_budget() {
            Some(remaining) => {
                let capped = limit.min(remaining as usize).max(1);
                if capped < limit {
                    tracing::info!(limit, remaining, capped, "fetch limit capped by summary budget");
                }
                capped
            }
            None => limit,
        }
    }

    /// Summarize when needed, then publish. A stored summary is reused as-is.
    async fn attempt(&self, item: &mut CandidateItem) -> Attempt {
        if !item.has_summary() {
            match self.summarizer.summarize(item).await {
                Some(s) if s.is_relevant() => item.apply_summary(&s),
                Some(_) => return Attempt::Irrelevant,
                None => {
                    tracing::warn!(url = %item.url, summarizer = self.summarizer.name(), "no summary");
                    return Attempt::Failed;
                }
            }
        }
        let primary = compose_primary(&item.headline, &item.bullets, MAX_POST_LEN);
        let secondary = compose_secondary(&item.url);
        match self.publisher.publish(&primary, &secondary).await {
            Some(r) if !r.post_ref.trim().is_empty() => Attempt::Published(r),
            _ => {
                counter!("relay_publish_failures_total").increment(1);
                tracing::warn!(url = %item.url, publisher = self.publisher.name(), "publish failed");
                Attempt::Failed
            }
        }
    }

    fn record_posted(
        &self,
        item: &CandidateItem,
        receipt: &PublishReceipt,
        now: DateTime<Utc>,
        origin: &'static str,
    ) {
        counter!("relay_posted_total", "origin" => origin).increment(1);
        match self.registry.mark_posted(item, &receipt.post_ref, now) {
            Ok(MarkOutcome::Recorded { replaced }) => tracing::info!(
                url = %item.url,
                event_id = item.event_id.as_deref().unwrap_or_default(),
                post_ref = %receipt.post_ref,
                replaced,
                origin,
                "posted"
            ),
            Ok(MarkOutcome::Unidentifiable) => {
                tracing::warn!(post_ref = %receipt.post_ref, "posted item has no identity, not recorded")
            }
            Err(e) => tracing::error!(
                error = %format!("{e:#}"),
                post_ref = %receipt.post_ref,
                "posted but registry write failed"
            ),
        }
    }

    /// Pop from the queue up to `fallback_attempts` times. Items already tried this run
    /// are set aside untouched and restored afterwards; failures are buried.
    /// Returns (posted outcome, buried count, attempts).
    async fn fallback(
        &self,
        tried: &HashSet<String>,
        now: DateTime<Utc>,
    ) -> (Option<RunOutcome>, usize, usize) {
        let windows = self.config.fallback_windows();
        let mut attempts = 0usize;
        let mut deferred: Vec<CandidateItem> = Vec::new();
        let mut failed: Vec<CandidateItem> = Vec::new();
        let mut posted = None;

        while attempts < self.config.fallback_attempts {
            let Some(mut item) = self.queue.pop_one() else {
                break;
            };
            if primary_key(&item).is_some_and(|k| tried.contains(&k)) {
                deferred.push(item);
                continue;
            }
            if let Some(kind) = self.registry.posted_match(&item, windows, now) {
                tracing::info!(url = %item.url, ?kind, "queued item already posted, dropped");
                continue;
            }
            attempts += 1;
            match self.attempt(&mut item).await {
                Attempt::Published(receipt) => {
                    self.record_posted(&item, &receipt, now, "queue");
                    posted = Some(RunOutcome::Posted {
                        post_ref: receipt.post_ref,
                        reply_ref: receipt.reply_ref,
                        url: item.url,
                        from_queue: true,
                    });
                    break;
                }
                Attempt::Irrelevant => {
                    tracing::info!(url = %item.url, "queued item not relevant, dropped");
                }
                Attempt::Failed => failed.push(item),
            }
        }

        if !deferred.is_empty() {
            if let Err(e) = self.queue.push_many(deferred.into_iter().rev(), now) {
                tracing::warn!(error = %format!("{e:#}"), "restoring deferred queue items failed");
            }
        }
        let mut buried = 0;
        if !failed.is_empty() {
            match self.queue.bury_many(failed, now) {
                Ok(n) => buried = n,
                Err(e) => tracing::warn!(error = %format!("{e:#}"), "burying failed items failed"),
            }
        }
        if posted.is_none() && attempts == 0 {
            tracing::info!("fallback: nothing to try");
        }
        (posted, buried, attempts)
    }
}
