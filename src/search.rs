//! Vector search over hunks that already sit in a group.
//!
//! Candidates are scored by cosine similarity between the query embedding
//! and each hunk's embedding, filtered by a floor, sorted descending, and
//! truncated to `top_k`. Ties keep candidate order.

use serde::Serialize;

use crate::embedding::cosine_similarity;
use crate::models::VectorHunkEntry;

/// One search result, as shown to the grouping oracle.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub group_id: String,
    pub file_path: String,
    pub summary: String,
    pub similarity: f32,
}

/// Rank `(group_id, hunk)` candidates against a query vector.
pub fn rank_hunks<'a>(
    query: &[f32],
    candidates: impl IntoIterator<Item = (&'a str, &'a VectorHunkEntry)>,
    top_k: usize,
    floor: f32,
) -> Vec<SearchHit> {
    let mut hits: Vec<SearchHit> = candidates
        .into_iter()
        .filter_map(|(group_id, hunk)| {
            let similarity = cosine_similarity(query, &hunk.embedding);
            (similarity >= floor).then(|| SearchHit {
                group_id: group_id.to_string(),
                file_path: hunk.file_path.clone(),
                summary: hunk.summary.clone(),
                similarity,
            })
        })
        .collect();

    hits.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    hits.truncate(top_k);
    hits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HunkType, Operation};

    fn entry(hash: &str, embedding: Vec<f32>) -> VectorHunkEntry {
        VectorHunkEntry {
            hunk_type: HunkType::Text,
            file_path: format!("{hash}.rs"),
            previous_file_path: None,
            operation: Operation::Modified,
            content: String::new(),
            summary: format!("summary {hash}"),
            embedding,
            complete_patch: String::new(),
            lines_added: 1,
            lines_removed: 0,
            hash: hash.to_string(),
        }
    }

    #[test]
    fn ranks_descending_and_applies_floor() {
        let a = entry("a", vec![1.0, 0.0]);
        let b = entry("b", vec![0.7, 0.7]);
        let c = entry("c", vec![0.0, 1.0]);
        let hits = rank_hunks(&[1.0, 0.0], [("g1", &a), ("g2", &b), ("g2", &c)], 10, 0.1);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].file_path, "a.rs");
        assert_eq!(hits[0].group_id, "g1");
        assert_eq!(hits[1].file_path, "b.rs");
        assert!(hits[1].similarity < hits[0].similarity);
    }

    #[test]
    fn truncates_to_top_k() {
        let entries: Vec<VectorHunkEntry> = (0..20).map(|i| entry(&i.to_string(), vec![1.0, i as f32 / 20.0])).collect();
        let hits = rank_hunks(&[1.0, 0.0], entries.iter().map(|e| ("g", e)), 10, 0.1);
        assert_eq!(hits.len(), 10);
        assert_eq!(hits[0].file_path, "0.rs");
    }

    #[test]
    fn empty_candidates() {
        let hits = rank_hunks(&[1.0], std::iter::empty(), 10, 0.1);
        assert!(hits.is_empty());
    }
}
