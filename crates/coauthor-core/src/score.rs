//! Keyword relevance scoring and the index-free slice selector.
//!
//! This is the retrieval fallback for material that has no persisted
//! embedding index (freshly pasted text, transient uploads): chunk the
//! source at a small window, score every chunk against the query by
//! token overlap, and return the best slices.
//!
//! The scorer is an intentionally cheap heuristic — case-insensitive
//! substring matching of distinct query tokens, no stemming, no fuzz.
//! Token boundaries treat the Hebrew block as word characters alongside
//! ASCII alphanumerics.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

use crate::chunk::chunk_text;
use crate::models::ScoredChunk;

/// Splits a query into tokens: runs of anything that is neither a word
/// character nor a Hebrew letter separate tokens.
static WORD_SPLIT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\w\u{0590}-\u{05FF}]+").expect("valid token-split regex"));

/// Baseline score of a non-empty chunk with zero matching tokens.
/// Keeps non-relevant text sorting above nothing at all; the slice
/// selector uses it as its exclusion threshold.
pub const EMPTY_CHUNK_EPSILON: f64 = 0.1;

/// Points awarded per distinct query token found in the chunk.
const TOKEN_WEIGHT: f64 = 2.0;

/// Score a chunk against a query.
///
/// 2 points per distinct query token appearing (case-insensitively) as a
/// substring of the chunk, plus [`EMPTY_CHUNK_EPSILON`] when the chunk is
/// non-empty. Pure and deterministic.
pub fn score_chunk(chunk: &str, query: &str) -> f64 {
    let chunk_lower = chunk.to_lowercase();
    let query_lower = query.to_lowercase();

    let tokens: BTreeSet<&str> = WORD_SPLIT
        .split(&query_lower)
        .filter(|t| !t.is_empty())
        .collect();

    let matched = tokens.iter().filter(|t| chunk_lower.contains(**t)).count();

    let base = if chunk.is_empty() {
        0.0
    } else {
        EMPTY_CHUNK_EPSILON
    };
    TOKEN_WEIGHT * matched as f64 + base
}

/// Tuning for [`select_slices`]. Smaller windows than review chunking —
/// retrieval granularity, not generation-call budgets.
#[derive(Debug, Clone)]
pub struct SliceParams {
    pub window: usize,
    pub overlap: usize,
    pub top_k: usize,
}

impl Default for SliceParams {
    fn default() -> Self {
        Self {
            window: 1200,
            overlap: 200,
            top_k: 8,
        }
    }
}

/// Pick the `top_k` most query-relevant slices of `source_text`.
///
/// Chunks, scores, and ranks in one pass. Only chunks scoring strictly
/// above the epsilon baseline count as relevant; when nothing does but
/// the source is non-empty, the first `top_k` chunks are returned in
/// original order so callers always get *some* context from a non-empty
/// source. Ties keep original text order (stable sort).
pub fn select_slices(source_text: &str, query: &str, params: &SliceParams) -> Vec<String> {
    let chunks = chunk_text(source_text, params.window, params.overlap);
    if chunks.is_empty() {
        return Vec::new();
    }

    let mut scored: Vec<ScoredChunk> = chunks
        .iter()
        .map(|c| ScoredChunk {
            score: score_chunk(&c.content, query),
            chunk: c.clone(),
        })
        .collect();

    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

    let top: Vec<String> = scored
        .iter()
        .take(params.top_k)
        .filter(|sc| sc.score > EMPTY_CHUNK_EPSILON)
        .map(|sc| sc.chunk.content.clone())
        .collect();

    if !top.is_empty() {
        return top;
    }

    chunks
        .into_iter()
        .take(params.top_k)
        .map(|c| c.content)
        .collect()
}
