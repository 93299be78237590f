//! news-relay: one pipeline run per invocation.
//! Schedule it externally (cron, systemd timer); concurrent runs must be serialized there.

use std::sync::Arc;

use news_relay::adapters::{
    CachingSummarizer, DryRunPublisher, Fetcher, OpenAiSummarizer, Publisher, RssFetcher,
    Summarizer, TitleSummarizer, WebhookPublisher,
};
use news_relay::config::{load_rules_default, PipelineConfig};
use news_relay::domains::DomainRanker;
use news_relay::maintenance::MaintenanceRules;
use news_relay::telemetry::{init_tracing, TextfileMetrics};
use news_relay::Pipeline;

fn build_summarizer(cfg: &PipelineConfig) -> Arc<dyn Summarizer> {
    if cfg.skip_summarizer {
        tracing::info!("summarizer: title-only");
        return Arc::new(TitleSummarizer);
    }
    Arc::new(CachingSummarizer::new(
        OpenAiSummarizer::from_env(),
        &cfg.summary_cache_file,
        cfg.summary_daily_limit,
    ))
}

fn build_publisher(cfg: &PipelineConfig) -> Arc<dyn Publisher> {
    if cfg.dry_run {
        return Arc::new(DryRunPublisher);
    }
    match std::env::var("PUBLISH_ENDPOINT") {
        Ok(base) if !base.trim().is_empty() => {
            let token = std::env::var("PUBLISH_TOKEN").unwrap_or_default();
            Arc::new(WebhookPublisher::new(base.trim(), token))
        }
        _ => {
            tracing::warn!("PUBLISH_ENDPOINT not set; running as dry run");
            Arc::new(DryRunPublisher)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();
    let metrics = TextfileMetrics::from_env()?;

    let cfg = PipelineConfig::from_env();
    let ranker = match std::env::var("DOMAIN_RANKS_PATH") {
        Ok(p) => DomainRanker::load_from_file(p),
        Err(_) => DomainRanker::from_env(),
    };
    let rules = load_rules_default().unwrap_or_else(|e| {
        tracing::warn!(error = %format!("{e:#}"), "maintenance rules unusable, using defaults");
        MaintenanceRules::default()
    });

    let fetcher: Arc<dyn Fetcher> = Arc::new(RssFetcher::new(cfg.feed_urls.clone(), ranker.clone()));
    let summarizer = build_summarizer(&cfg);
    let publisher = build_publisher(&cfg);
    tracing::info!(
        fetcher = fetcher.name(),
        summarizer = summarizer.name(),
        publisher = publisher.name(),
        queue = %cfg.queue_file.display(),
        posted = %cfg.posted_file.display(),
        "starting run"
    );

    let pipeline = Pipeline::new(cfg, fetcher, summarizer, publisher)
        .with_rules(rules)
        .with_ranker(ranker);
    let report = pipeline.run_once().await;

    tracing::info!(
        outcome = %serde_json::to_string(&report.outcome).unwrap_or_default(),
        fetched = report.fetched,
        fresh = report.fresh,
        attempts = report.attempts,
        fallback_attempts = report.fallback_attempts,
        queue_len = report.maintenance.queue_len,
        purged = report.maintenance.total_removed(),
        "run finished"
    );

    if let Some(m) = metrics {
        if let Err(e) = m.flush() {
            tracing::warn!(error = %format!("{e:#}"), "metrics textfile not written");
        }
    }
    Ok(())
}
