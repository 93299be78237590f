// src/adapters/mod.rs
//! External collaborators: where candidates come from, how they are summarized,
//! and where posts go. The pipeline only sees these traits.

pub mod publisher;
pub mod rss;
pub mod summarizer;

use anyhow::Result;

use crate::types::{CandidateItem, PublishReceipt, Summary};

#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    /// Up to `limit` candidates for `query`, best first. Errors are logged by the
    /// caller and treated as an empty batch.
    async fn fetch(&self, limit: usize, query: &str) -> Result<Vec<CandidateItem>>;
    fn name(&self) -> &'static str;
}

#[async_trait::async_trait]
pub trait Summarizer: Send + Sync {
    /// `None` is a failure: the caller re-queues or buries the item.
    /// An empty headline means "not relevant, skip".
    async fn summarize(&self, item: &CandidateItem) -> Option<Summary>;

    /// Calls left in the current budget period, when the summarizer is metered.
    fn remaining_budget(&self) -> Option<u32> {
        None
    }

    fn name(&self) -> &'static str;
}

#[async_trait::async_trait]
pub trait Publisher: Send + Sync {
    /// Publish a post and its reply as one unit. `None` on any failure, including a
    /// partial one that was rolled back.
    async fn publish(&self, primary: &str, secondary: &str) -> Option<PublishReceipt>;
    fn name(&self) -> &'static str;
}

pub use publisher::{DryRunPublisher, WebhookPublisher};
pub use rss::RssFetcher;
pub use summarizer::{CachingSummarizer, OpenAiSummarizer, TitleSummarizer};
