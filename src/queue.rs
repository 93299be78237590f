// src/queue.rs
//! # Work Queue
//!
//! Durable LIFO list of pending candidates, stored as one JSON array (head first).
//!
//! - `push_many` appends at the tail, then dedupes the whole queue keeping the most
//!   recently enqueued occurrence of each identity key.
//! - `pop_one` takes the tail: newest first, so a backlog never pushes stale stories
//!   ahead of breaking ones.
//! - `bury_many` puts failed items back at the head, the end farthest from the next pop.
//!   A poison item that always fails therefore sinks below every alternative.
//! - Every mutation is a single load-modify-save of the whole file.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::identity::primary_key;
use crate::store;
use crate::types::{CandidateItem, QueueEntry};

pub struct WorkQueue {
    path: PathBuf,
}

impl WorkQueue {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Vec<QueueEntry> {
        store::load_or_default(&self.path)
    }

    fn save(&self, entries: &[QueueEntry]) -> Result<()> {
        store::save_atomic(&self.path, entries)
    }

    /// Current contents, head first (the last element pops next).
    pub fn snapshot(&self) -> Vec<QueueEntry> {
        self.load()
    }

    pub fn len(&self) -> usize {
        self.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append at the tail, then dedupe. Unidentifiable items are dropped.
    /// Returns how many items were accepted.
    pub fn push_many<I>(&self, items: I, now: DateTime<Utc>) -> Result<usize>
    where
        I: IntoIterator<Item = CandidateItem>,
    {
        let fresh = stamp(items, now);
        let accepted = fresh.len();
        let mut q = self.load();
        q.extend(fresh);
        let q = dedupe_entries(q);
        self.save(&q)?;
        tracing::debug!(accepted, len = q.len(), "queue: pushed");
        Ok(accepted)
    }

    /// Remove and return the tail element. `None` on an empty (or unreadable) queue.
    pub fn pop_one(&self) -> Option<CandidateItem> {
        let mut q = self.load();
        let entry = q.pop()?;
        if let Err(e) = self.save(&q) {
            // The item stays on disk; push-side dedup absorbs the duplicate later.
            tracing::warn!(error = %format!("{e:#}"), "queue: pop not persisted");
        }
        Some(entry.item)
    }

    /// Re-insert failed items at the head so the next pop serves something else.
    pub fn bury_many<I>(&self, items: I, now: DateTime<Utc>) -> Result<usize>
    where
        I: IntoIterator<Item = CandidateItem>,
    {
        let mut q = stamp(items, now);
        let buried = q.len();
        q.extend(self.load());
        let q = dedupe_entries(q);
        self.save(&q)?;
        tracing::info!(buried, len = q.len(), "queue: buried failed items");
        Ok(buried)
    }

    /// Remove every entry matching `pred`; returns the removal count.
    pub fn purge<F>(&self, pred: F) -> Result<usize>
    where
        F: Fn(&QueueEntry) -> bool,
    {
        let q = self.load();
        let before = q.len();
        let kept: Vec<QueueEntry> = q.into_iter().filter(|e| !pred(e)).collect();
        let removed = before - kept.len();
        if removed > 0 {
            self.save(&kept)?;
        }
        Ok(removed)
    }

    /// Dedupe the stored queue in place; returns how many duplicates were dropped.
    pub fn dedupe(&self) -> Result<usize> {
        let q = self.load();
        let before = q.len();
        let q = dedupe_entries(q);
        let removed = before - q.len();
        if removed > 0 {
            self.save(&q)?;
        }
        Ok(removed)
    }

    pub fn remove_by_urls(&self, urls: &[String]) -> Result<usize> {
        let set: HashSet<&str> = urls
            .iter()
            .map(|u| u.trim())
            .filter(|u| !u.is_empty())
            .collect();
        self.purge(|e| set.contains(e.item.url.trim()))
    }

    /// Case-insensitive substring match on the headline (or source title when unsummarized).
    pub fn remove_by_title_substr(&self, needle: &str) -> Result<usize> {
        let n = needle.trim().to_lowercase();
        if n.is_empty() {
            return Ok(0);
        }
        self.purge(|e| {
            e.item.headline.to_lowercase().contains(&n) || e.item.title.to_lowercase().contains(&n)
        })
    }
}

fn stamp<I>(items: I, now: DateTime<Utc>) -> Vec<QueueEntry>
where
    I: IntoIterator<Item = CandidateItem>,
{
    items
        .into_iter()
        .filter(|it| {
            let ok = it.is_identifiable();
            if !ok {
                tracing::warn!(title = %it.title, "queue: candidate has no identity, dropped");
            }
            ok
        })
        .map(|item| QueueEntry {
            item,
            enqueued_at: now,
        })
        .collect()
}

/// Keep the tail-most occurrence of each primary identity key, preserving the
/// relative order of survivors.
pub fn dedupe_entries(entries: Vec<QueueEntry>) -> Vec<QueueEntry> {
    let mut seen = HashSet::new();
    let mut out_rev = Vec::with_capacity(entries.len());
    for e in entries.into_iter().rev() {
        if let Some(k) = primary_key(&e.item) {
            if !seen.insert(k) {
                continue;
            }
        }
        out_rev.push(e);
    }
    out_rev.reverse();
    out_rev
}
