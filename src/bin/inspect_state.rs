//! Operator view of the relay state.
//!
//! ```text
//! inspect_state                 # queue (next pop first) and registry
//! inspect_state queue
//! inspect_state posted
//! inspect_state remove-url <url>...
//! inspect_state remove-title <substring>
//! ```

use anyhow::{bail, Result};
use chrono::Utc;

use news_relay::config::PipelineConfig;
use news_relay::{PostedRegistry, WorkQueue};

fn print_queue(queue: &WorkQueue) {
    let entries = queue.snapshot();
    println!("queue: {} item(s), next pop first", entries.len());
    for (i, e) in entries.iter().rev().enumerate() {
        let label = if e.item.headline.trim().is_empty() {
            &e.item.title
        } else {
            &e.item.headline
        };
        println!(
            "{:>3}. [{}] {} | {}",
            i + 1,
            e.enqueued_at.format("%Y-%m-%d %H:%M"),
            label,
            e.item.url
        );
    }
}

fn print_posted(registry: &PostedRegistry) {
    let entries = registry.entries(Utc::now());
    println!("posted: {} entr(ies), newest first", entries.len());
    for e in entries.iter().rev() {
        let ids = [
            e.article_id.as_deref().map(|v| format!("article={v}")),
            e.story_id.as_deref().map(|v| format!("story={v}")),
            e.event_id.as_deref().map(|v| format!("event={v}")),
            e.fingerprint.as_deref().map(|v| format!("fp={v}")),
        ]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" ");
        println!(
            "[{}] {} {} {}",
            e.posted_at.format("%Y-%m-%d %H:%M"),
            e.post_ref,
            e.url.as_deref().unwrap_or("-"),
            ids
        );
    }
}

fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cfg = PipelineConfig::from_env();
    let queue = WorkQueue::open(&cfg.queue_file);
    let registry = PostedRegistry::open(&cfg.posted_file)
        .with_legacy_source(&cfg.legacy_state_file)
        .with_retention_hours(cfg.retention_hours)
        .with_max_entries(cfg.max_entries);

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        None => {
            print_queue(&queue);
            println!();
            print_posted(&registry);
        }
        Some("queue") => print_queue(&queue),
        Some("posted") => print_posted(&registry),
        Some("remove-url") => {
            let urls = &args[1..];
            if urls.is_empty() {
                bail!("remove-url needs at least one URL");
            }
            let removed = queue.remove_by_urls(urls)?;
            println!("removed {removed} item(s)");
        }
        Some("remove-title") => {
            let needle = args[1..].join(" ");
            if needle.trim().is_empty() {
                bail!("remove-title needs a substring");
            }
            let removed = queue.remove_by_title_substr(&needle)?;
            println!("removed {removed} item(s) matching {needle:?}");
        }
        Some(other) => bail!(
            "unknown command {other:?} (expected queue, posted, remove-url, remove-title)"
        ),
    }
    Ok(())
}
