//! Hunk identity and aggregation.
//!
//! A hunk's identity is the first 8 hex chars of SHA-256 over its complete
//! patch followed by its file path. Identical patch text in two different
//! files therefore yields two different hashes.

use sha2::{Digest, Sha256};

use crate::diff::operation_of;
use crate::models::{FileStatistics, TextHunk};

const HASH_LEN: usize = 8;

pub fn hash_hunk(complete_patch: &str, file_path: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(complete_patch.as_bytes());
    hasher.update(file_path.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..HASH_LEN].to_string()
}

/// Merge all hunks of one file into a single hunk at index 0.
///
/// Contents are joined in `index` order and line counts summed. The
/// operation is re-read from the header, since a combined patch can still be
/// an addition or deletion. Returns `None` for an empty slice.
pub fn combine_hunks(hunks: &[TextHunk]) -> Option<TextHunk> {
    let mut sorted: Vec<&TextHunk> = hunks.iter().collect();
    sorted.sort_by_key(|h| h.index);
    let first = *sorted.first()?;

    let content = sorted
        .iter()
        .map(|h| h.content.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    let header = first.header.clone();
    let operation = operation_of(&format!("{header}\n{content}")).unwrap_or(first.operation);

    Some(TextHunk {
        file_path: first.file_path.clone(),
        previous_file_path: first.previous_file_path.clone(),
        operation,
        complete_patch: format!("{header}\n{content}\n"),
        header,
        content,
        lines_added: sorted.iter().map(|h| h.lines_added).sum(),
        lines_removed: sorted.iter().map(|h| h.lines_removed).sum(),
        index: 0,
    })
}

/// Aggregate text hunks per file, in the order files first appear.
pub fn file_statistics(hunks: &[TextHunk]) -> Vec<FileStatistics> {
    let mut stats: Vec<FileStatistics> = Vec::new();
    for hunk in hunks {
        match stats.iter_mut().find(|s| s.file_path == hunk.file_path) {
            Some(s) => {
                s.lines_added += hunk.lines_added;
                s.lines_removed += hunk.lines_removed;
                s.hunks.push(hunk.clone());
            }
            None => stats.push(FileStatistics {
                file_path: hunk.file_path.clone(),
                lines_added: hunk.lines_added,
                lines_removed: hunk.lines_removed,
                sample: hunk.content.clone(),
                hunks: vec![hunk.clone()],
            }),
        }
    }
    stats
}
