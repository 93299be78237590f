// tests/pipeline_e2e.rs
//
// Whole-run behaviour with in-test adapters: selection loop, queue fallback,
// poison-item containment, soft failures.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;

use news_relay::adapters::{Fetcher, Publisher, Summarizer};
use news_relay::maintenance::StepOutcome;
use news_relay::types::PublishReceipt;
use news_relay::{
    CandidateItem, DedupWindows, Pipeline, PipelineConfig, RunOutcome, Summary, WorkQueue,
};

#[derive(Default)]
struct StubFetcher {
    batch: Vec<CandidateItem>,
    fail: bool,
    seen_limit: Mutex<Option<usize>>,
}

#[async_trait]
impl Fetcher for StubFetcher {
    async fn fetch(&self, limit: usize, _query: &str) -> Result<Vec<CandidateItem>> {
        *self.seen_limit.lock().unwrap() = Some(limit);
        if self.fail {
            return Err(anyhow!("upstream down"));
        }
        Ok(self.batch.iter().take(limit).cloned().collect())
    }
    fn name(&self) -> &'static str {
        "stub"
    }
}

#[derive(Default)]
struct StubSummarizer {
    irrelevant: HashSet<String>,
    failing: HashSet<String>,
    budget: Option<u32>,
    calls: Mutex<Vec<String>>,
}

#[async_trait]
impl Summarizer for StubSummarizer {
    async fn summarize(&self, item: &CandidateItem) -> Option<Summary> {
        self.calls.lock().unwrap().push(item.url.clone());
        if self.failing.contains(&item.url) {
            return None;
        }
        if self.irrelevant.contains(&item.url) {
            return Some(Summary::default());
        }
        Some(Summary::new(
            format!("Headline for {}", item.title),
            vec!["first fact".into(), "second fact".into()],
        ))
    }
    fn remaining_budget(&self) -> Option<u32> {
        self.budget
    }
    fn name(&self) -> &'static str {
        "stub"
    }
}

#[derive(Default)]
struct StubPublisher {
    failing: HashSet<String>,
    attempts: Mutex<Vec<String>>,
}

#[async_trait]
impl Publisher for StubPublisher {
    async fn publish(&self, primary: &str, secondary: &str) -> Option<PublishReceipt> {
        assert!(primary.starts_with("Headline for "), "unexpected text {primary:?}");
        let mut attempts = self.attempts.lock().unwrap();
        attempts.push(secondary.to_string());
        if self.failing.contains(secondary) {
            return None;
        }
        Some(PublishReceipt {
            post_ref: format!("post-{}", attempts.len()),
            reply_ref: format!("reply-{}", attempts.len()),
        })
    }
    fn name(&self) -> &'static str {
        "stub"
    }
}

fn config(dir: &tempfile::TempDir) -> PipelineConfig {
    PipelineConfig {
        queue_file: dir.path().join("queue.json"),
        posted_file: dir.path().join("posted.json"),
        legacy_state_file: dir.path().join("state.json"),
        summary_cache_file: dir.path().join("summary_cache.json"),
        ..PipelineConfig::default()
    }
}

fn item(slug: &str) -> CandidateItem {
    CandidateItem::new(format!("https://news.example.com/{slug}"))
        .titled(format!("Difficulty update {slug}"))
        .fingerprint(format!("fp-{slug}"))
}

fn pipeline(
    cfg: PipelineConfig,
    f: &Arc<StubFetcher>,
    s: &Arc<StubSummarizer>,
    p: &Arc<StubPublisher>,
) -> Pipeline {
    Pipeline::new(cfg, f.clone(), s.clone(), p.clone())
}

#[tokio::test]
async fn shared_event_publishes_once_and_is_remembered() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(StubFetcher {
        batch: vec![
            CandidateItem::new("https://a.example.com/1")
                .titled("Hashrate hits record")
                .event("e1")
                .fingerprint("fp1"),
            CandidateItem::new("https://b.example.com/2")
                .titled("Network hashrate at new high")
                .event("e1")
                .fingerprint("fp2"),
            item("other"),
        ],
        ..Default::default()
    });
    let summarizer = Arc::new(StubSummarizer::default());
    let publisher = Arc::new(StubPublisher::default());
    let p = pipeline(config(&dir), &fetcher, &summarizer, &publisher);

    let now = Utc::now();
    let report = p.run_at(now).await;

    assert!(report.posted());
    assert_eq!(report.fresh, 2);
    match &report.outcome {
        RunOutcome::Posted {
            url, from_queue, ..
        } => {
            assert_eq!(url, "https://a.example.com/1");
            assert!(!from_queue);
        }
        other => panic!("expected Posted, got {other:?}"),
    }
    assert_eq!(publisher.attempts.lock().unwrap().len(), 1);

    let probe = CandidateItem::new("https://elsewhere.example.com/x").event("e1");
    assert!(p
        .registry()
        .already_posted(&probe, DedupWindows::new(72.0), now));

    let queued: Vec<String> = p.queue().snapshot().into_iter().map(|e| e.item.url).collect();
    assert_eq!(queued, vec!["https://news.example.com/other"]);

    // Second run with the same batch: e1 is filtered, "other" is fresh again and wins.
    let report = p.run_at(now).await;
    match report.outcome {
        RunOutcome::Posted { url, .. } => assert_eq!(url, "https://news.example.com/other"),
        other => panic!("expected Posted, got {other:?}"),
    }
    assert_eq!(report.fresh, 1);

    // The queued copy of "other" is now stale; the next cleanup pass drops it.
    let report = p.run_at(now).await;
    assert_eq!(report.outcome, RunOutcome::NoOp);
    assert_eq!(report.maintenance.posted, StepOutcome::Removed(1));
    assert!(p.queue().is_empty());
}

#[tokio::test]
async fn remaining_candidates_are_queued_best_first() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(StubFetcher {
        batch: vec![item("a"), item("b"), item("c")],
        ..Default::default()
    });
    let summarizer = Arc::new(StubSummarizer::default());
    let publisher = Arc::new(StubPublisher::default());
    let p = pipeline(config(&dir), &fetcher, &summarizer, &publisher);

    assert!(p.run_at(Utc::now()).await.posted());
    let q = WorkQueue::open(dir.path().join("queue.json"));
    assert_eq!(q.pop_one().unwrap().url, "https://news.example.com/b");
    assert_eq!(q.pop_one().unwrap().url, "https://news.example.com/c");
    // Only the published candidate was summarized.
    assert_eq!(summarizer.calls.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn irrelevant_candidates_are_skipped_not_queued() {
    let dir = tempfile::tempdir().unwrap();
    let a = item("a");
    let fetcher = Arc::new(StubFetcher {
        batch: vec![a.clone(), item("b")],
        ..Default::default()
    });
    let summarizer = Arc::new(StubSummarizer {
        irrelevant: HashSet::from([a.url.clone()]),
        ..Default::default()
    });
    let publisher = Arc::new(StubPublisher::default());
    let p = pipeline(config(&dir), &fetcher, &summarizer, &publisher);

    let report = p.run_at(Utc::now()).await;
    match report.outcome {
        RunOutcome::Posted { url, .. } => assert_eq!(url, "https://news.example.com/b"),
        other => panic!("expected Posted, got {other:?}"),
    }
    assert_eq!(report.attempts, 2);
    assert!(p.queue().is_empty());
}

#[tokio::test]
async fn poison_item_is_buried_and_the_next_run_serves_another() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = PipelineConfig {
        fallback_attempts: 1,
        ..config(&dir)
    };
    let good = item("good");
    let bad = item("bad");
    WorkQueue::open(&cfg.queue_file)
        .push_many(vec![good.clone(), bad.clone()], Utc::now())
        .unwrap();

    let fetcher = Arc::new(StubFetcher::default());
    let summarizer = Arc::new(StubSummarizer::default());
    let publisher = Arc::new(StubPublisher {
        failing: HashSet::from([bad.url.clone()]),
        ..Default::default()
    });
    let p = pipeline(cfg, &fetcher, &summarizer, &publisher);

    let first = p.run_at(Utc::now()).await;
    assert_eq!(first.outcome, RunOutcome::Queued { queued: 1 });
    assert_eq!(first.fallback_attempts, 1);
    let snap = p.queue().snapshot();
    assert_eq!(snap[0].item.url, bad.url);
    assert!(snap[0].item.has_summary(), "summary kept on the buried item");

    let second = p.run_at(Utc::now()).await;
    match second.outcome {
        RunOutcome::Posted {
            url, from_queue, ..
        } => {
            assert_eq!(url, good.url);
            assert!(from_queue);
        }
        other => panic!("expected Posted, got {other:?}"),
    }
    let attempts = publisher.attempts.lock().unwrap().clone();
    assert_eq!(attempts, vec![bad.url.clone(), good.url.clone()]);
    assert_eq!(p.queue().len(), 1);
}

#[tokio::test]
async fn failed_fresh_item_is_requeued_and_not_retried_in_same_run() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(&dir);
    let old = item("old");
    WorkQueue::open(&cfg.queue_file)
        .push_many(vec![old.clone()], Utc::now())
        .unwrap();
    let fresh = item("fresh");
    let fetcher = Arc::new(StubFetcher {
        batch: vec![fresh.clone()],
        ..Default::default()
    });
    let summarizer = Arc::new(StubSummarizer::default());
    let publisher = Arc::new(StubPublisher {
        failing: HashSet::from([fresh.url.clone()]),
        ..Default::default()
    });
    let p = pipeline(cfg, &fetcher, &summarizer, &publisher);

    let report = p.run_at(Utc::now()).await;
    match report.outcome {
        RunOutcome::Posted {
            url, from_queue, ..
        } => {
            assert_eq!(url, old.url);
            assert!(from_queue);
        }
        other => panic!("expected Posted, got {other:?}"),
    }
    assert_eq!(
        publisher.attempts.lock().unwrap().clone(),
        vec![fresh.url.clone(), old.url.clone()]
    );
    let left: Vec<String> = p.queue().snapshot().into_iter().map(|e| e.item.url).collect();
    assert_eq!(left, vec![fresh.url]);
}

#[tokio::test]
async fn fetch_failure_still_runs_maintenance() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(&dir);
    WorkQueue::open(&cfg.queue_file)
        .push_many(
            vec![CandidateItem::new("https://x.example.com/crypto-winter").titled("Markets slide")],
            Utc::now(),
        )
        .unwrap();
    let fetcher = Arc::new(StubFetcher {
        fail: true,
        ..Default::default()
    });
    let summarizer = Arc::new(StubSummarizer::default());
    let publisher = Arc::new(StubPublisher::default());
    let p = pipeline(cfg, &fetcher, &summarizer, &publisher);

    let report = p.run_at(Utc::now()).await;
    assert_eq!(report.outcome, RunOutcome::NoOp);
    assert_eq!(report.fetched, 0);
    assert_eq!(report.maintenance.banned, StepOutcome::Removed(1));
    assert_eq!(report.maintenance.queue_len, 0);
    assert!(publisher.attempts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn fetch_limit_is_capped_by_summary_budget() {
    for (budget, expected) in [(Some(2), 2), (Some(0), 1), (None, 5)] {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(StubFetcher::default());
        let summarizer = Arc::new(StubSummarizer {
            budget,
            ..Default::default()
        });
        let publisher = Arc::new(StubPublisher::default());
        let p = pipeline(config(&dir), &fetcher, &summarizer, &publisher);

        let report = p.run_at(Utc::now()).await;
        assert_eq!(report.fetch_limit, expected);
        assert_eq!(*fetcher.seen_limit.lock().unwrap(), Some(expected));
    }
}

#[tokio::test]
async fn failing_cleanup_step_is_reported_and_run_continues() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = PipelineConfig {
        fallback_attempts: 0,
        ..config(&dir)
    };
    WorkQueue::open(&cfg.queue_file)
        .push_many(
            vec![CandidateItem::new("https://x.example.com/crypto-winter").titled("Markets slide")],
            Utc::now(),
        )
        .unwrap();
    // Occupy the temp path used for atomic saves so every queue write fails.
    std::fs::create_dir(cfg.queue_file.with_extension("json.tmp")).unwrap();

    let fetcher = Arc::new(StubFetcher::default());
    let summarizer = Arc::new(StubSummarizer::default());
    let publisher = Arc::new(StubPublisher::default());
    let p = pipeline(cfg, &fetcher, &summarizer, &publisher);

    let report = p.run_at(Utc::now()).await;
    assert!(report.maintenance.banned.is_failed());
    assert_eq!(report.maintenance.failed_steps(), 1);
    assert!(!report.maintenance.dedupe.is_failed());
    assert!(!report.maintenance.posted.is_failed());
    assert_eq!(report.maintenance.total_removed(), 0);
    assert_eq!(report.maintenance.queue_len, 1);
    assert_eq!(report.outcome, RunOutcome::NoOp);
}

#[tokio::test]
async fn summarizer_failure_keeps_the_item_queued() {
    let dir = tempfile::tempdir().unwrap();
    let a = item("a");
    let fetcher = Arc::new(StubFetcher {
        batch: vec![a.clone()],
        ..Default::default()
    });
    let summarizer = Arc::new(StubSummarizer {
        failing: HashSet::from([a.url.clone()]),
        ..Default::default()
    });
    let publisher = Arc::new(StubPublisher::default());
    let p = pipeline(config(&dir), &fetcher, &summarizer, &publisher);

    let report = p.run_at(Utc::now()).await;
    assert_eq!(report.outcome, RunOutcome::Queued { queued: 1 });
    assert!(publisher.attempts.lock().unwrap().is_empty());
    let left: Vec<String> = p.queue().snapshot().into_iter().map(|e| e.item.url).collect();
    assert_eq!(left, vec![a.url]);
}
