// src/select.rs
//! Candidate selection: turn one raw fetch batch into a minimal, cluster-representative,
//! not-yet-posted list, preserving fetch order (assumed best-first).

use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use crate::identity::{identity_keys, title_signature, IdentityField};
use crate::registry::{DedupWindows, PostedRegistry};
use crate::types::CandidateItem;

/// Grouping key: shared event, else shared fingerprint, else title signature.
/// Items lacking all three fall back to their normalized URL so they never lump together.
pub fn group_key(item: &CandidateItem, index: usize) -> String {
    if let Some(ev) = item.event_key() {
        return format!("event:{ev}");
    }
    if let Some(fp) = item.fingerprint_key() {
        return format!("fp:{fp}");
    }
    let sig = title_signature(&item.title);
    if !sig.is_empty() {
        return format!("sig:{sig}");
    }
    let url = item.canonical_url();
    if !url.is_empty() {
        return format!("url:{url}");
    }
    format!("idx:{index}")
}

/// Groups in order of first appearance; members keep their batch order.
pub fn group_by_identity(candidates: Vec<CandidateItem>) -> Vec<Vec<CandidateItem>> {
    let mut slots: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<Vec<CandidateItem>> = Vec::new();
    for (i, it) in candidates.into_iter().enumerate() {
        let key = group_key(&it, i);
        match slots.get(&key) {
            Some(&g) => groups[g].push(it),
            None => {
                slots.insert(key, groups.len());
                groups.push(vec![it]);
            }
        }
    }
    groups
}

fn rank(a: &CandidateItem, b: &CandidateItem) -> Ordering {
    let da = a.domain_score.unwrap_or(u32::MAX);
    let db = b.domain_score.unwrap_or(u32::MAX);
    da.cmp(&db)
        .then_with(|| {
            let ea = a.engagement.unwrap_or(0.0);
            let eb = b.engagement.unwrap_or(0.0);
            eb.total_cmp(&ea)
        })
        .then_with(|| b.body.chars().count().cmp(&a.body.chars().count()))
}

/// Best item of a group: lowest domain score, then highest engagement, then longest body.
/// Full ties keep list order.
pub fn pick_representative(group: &[CandidateItem]) -> Option<&CandidateItem> {
    group.iter().min_by(|a, b| rank(a, b))
}

/// One representative per group, up to `limit`.
pub fn pick_group_representatives(
    groups: &[Vec<CandidateItem>],
    limit: usize,
) -> Vec<CandidateItem> {
    groups
        .iter()
        .filter_map(|g| pick_representative(g).cloned())
        .take(limit)
        .collect()
}

/// Collapse items sharing any identity key with an earlier item; first occurrence wins.
/// Unidentifiable items are dropped.
pub fn dedupe_in_run(candidates: Vec<CandidateItem>) -> Vec<CandidateItem> {
    let mut seen: HashSet<(IdentityField, String)> = HashSet::new();
    let mut out = Vec::with_capacity(candidates.len());
    for it in candidates {
        let keys = identity_keys(&it);
        if keys.is_empty() {
            tracing::warn!(title = %it.title, "select: candidate has no identity, dropped");
            continue;
        }
        if keys.iter().any(|k| seen.contains(k)) {
            tracing::debug!(url = %it.url, "select: duplicate within run");
            continue;
        }
        seen.extend(keys);
        out.push(it);
    }
    out
}

/// Drop candidates the registry already knows, preserving order.
pub fn filter_unposted(
    candidates: Vec<CandidateItem>,
    registry: &PostedRegistry,
    windows: DedupWindows,
    now: DateTime<Utc>,
) -> Vec<CandidateItem> {
    candidates
        .into_iter()
        .filter(|it| !registry.already_posted(it, windows, now))
        .collect()
}

/// Group, pick representatives, dedupe within the batch, then filter against the registry.
pub fn select_fresh(
    raw: Vec<CandidateItem>,
    limit: usize,
    registry: &PostedRegistry,
    windows: DedupWindows,
    now: DateTime<Utc>,
) -> Vec<CandidateItem> {
    let groups = group_by_identity(raw);
    let reps = pick_group_representatives(&groups, limit);
    filter_unposted(dedupe_in_run(reps), registry, windows, now)
}
