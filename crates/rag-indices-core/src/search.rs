//! Ranking of similarity-search hits.
//!
//! Vector stores return raw candidates in whatever order their backend
//! produces; [`rank_hits`] gives every query tool the same ordering and
//! truncation regardless of the store behind it.

use std::cmp::Ordering;

use crate::models::QueryHit;

/// Round a similarity score to four decimal places.
pub fn round_score(score: f64) -> f64 {
    (score * 10_000.0).round() / 10_000.0
}

/// Sort hits by descending score, keep the best `top_k`, and round scores.
///
/// Ties are broken by filename and then chunk index so the output is
/// deterministic. NaN scores are dropped.
pub fn rank_hits(mut hits: Vec<QueryHit>, top_k: usize) -> Vec<QueryHit> {
    hits.retain(|h| !h.score.is_nan());
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.filename.cmp(&b.filename))
            .then_with(|| a.chunk_index.cmp(&b.chunk_index))
    });
    hits.truncate(top_k);
    for hit in &mut hits {
        hit.score = round_score(hit.score);
    }
    hits
}
