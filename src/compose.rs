// src/compose.rs
//! Post text composition.
//!
//! Primary text layout:
//! ```text
//! Headline
//!
//! • bullet one
//! • bullet two
//! ```
//! Fitted within the limit by dropping bullets from the end, then word-trimming the headline.

pub const MAX_POST_LEN: usize = 280;
pub const MAX_BULLETS: usize = 3;
pub const BULLET_LEN: usize = 90;

/// Collapse whitespace, then cut at the last word boundary within `limit` chars.
pub fn word_trim(text: &str, limit: usize) -> String {
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if text.chars().count() <= limit {
        return text;
    }
    let cut: String = text.chars().take(limit).collect();
    if limit <= 1 {
        return cut;
    }
    match cut.rfind(' ') {
        Some(i) => cut[..i].trim().to_string(),
        None => cut.trim().to_string(),
    }
}

fn clean_bullet(b: &str) -> Option<String> {
    let b = b
        .trim()
        .trim_matches(|c: char| c == '•' || c == '-' || c.is_whitespace())
        .trim_end_matches(['.', '!']);
    let b = word_trim(b, BULLET_LEN);
    (!b.is_empty()).then_some(b)
}

fn layout(headline: &str, bullets: &[String], limit: usize) -> String {
    let head = word_trim(headline, limit);
    if bullets.is_empty() {
        return head;
    }
    let body = bullets
        .iter()
        .map(|b| format!("• {b}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!("{head}\n\n{body}").trim().to_string()
}

/// Headline plus up to three bullets, within `limit` chars.
pub fn compose_primary(headline: &str, bullets: &[String], limit: usize) -> String {
    let bs: Vec<String> = bullets
        .iter()
        .filter_map(|b| clean_bullet(b))
        .take(MAX_BULLETS)
        .collect();
    for n in (0..=bs.len()).rev() {
        let cand = layout(headline, &bs[..n], limit);
        if cand.chars().count() <= limit {
            return cand;
        }
    }
    word_trim(headline, limit)
}

/// The reply text: the source link.
pub fn compose_secondary(url: &str) -> String {
    word_trim(url, MAX_POST_LEN)
}
