//! Vector similarity utilities.
//!
//! Pure-Rust implementations of:
//! - Cosine similarity
//! - Deterministic top-k ranking of stored exchanges against a query vector

use crate::exchange::ExchangeRecord;
use tracing::debug;

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1, 1] where 1 = identical, 0 = orthogonal, -1 = opposite.
/// Returns 0.0 if either vector is empty, zero-length or the lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 {
        return 0.0;
    }

    (dot / denom) as f32
}

/// A record position paired with its similarity to the query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scored {
    /// Index into the slice that was ranked (storage order).
    pub index: usize,
    pub similarity: f32,
}

/// Rank records by cosine similarity to a query embedding.
///
/// Returns at most `limit` entries sorted by descending similarity; equal
/// scores keep storage order, so the result is deterministic. Records
/// without an embedding, or whose dimension differs from the query, cannot
/// be scored and are left out.
pub fn vector_search(records: &[ExchangeRecord], query_embedding: &[f32], limit: usize) -> Vec<Scored> {
    let mut scored: Vec<Scored> = records
        .iter()
        .enumerate()
        .filter_map(|(index, record)| {
            if record.embedding.is_empty() || record.embedding.len() != query_embedding.len() {
                debug!(
                    exchange_id = record.id,
                    dimensions = record.embedding.len(),
                    expected = query_embedding.len(),
                    "Skipping exchange without a comparable embedding"
                );
                return None;
            }
            Some(Scored {
                index,
                similarity: cosine_similarity(&record.embedding, query_embedding),
            })
        })
        .collect();

    // Stable sort: ties stay in storage order.
    scored.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
    scored.truncate(limit);
    scored
}
