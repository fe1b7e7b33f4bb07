//! Turn parsed hunks into searchable [`VectorHunkEntry`] values.
//!
//! | Hunk                | Content                                 | Summary                 | Lines    |
//! |---------------------|-----------------------------------------|-------------------------|----------|
//! | binary              | `[Binary hunk content]`                 | `<operation> <path>`    | 0 / 0    |
//! | unrecognized        | patch preview + `[N lines hidden]`      | oracle, from preview    | 0 / 0    |
//! | text, opaque file   | `[Removed X lines, added Y lines, in f]`| `<operation> <path>`    | combined |
//! | text, summarizable  | hunk body                               | oracle, from hunk body  | hunk     |
//!
//! Entries come out in parse order. An opaque file's combined entry takes
//! the position of that file's first hunk. The summary, not the content, is
//! what gets embedded.

use anyhow::Result;
use std::collections::{HashMap, HashSet};

use crate::config::{EmbeddingConfig, GroupingConfig};
use crate::embedding::{embed_texts, Embedder};
use crate::hunk::{combine_hunks, hash_hunk};
use crate::models::{FileStatisticsAndTag, FileTag, HunkType, ParsedHunk, TextHunk, VectorHunkEntry};
use crate::oracle::{NoTools, OracleRequest, ReasoningOracle};
use crate::progress::{SplitProgressEvent, SplitProgressReporter};
use crate::usage::{LlmUsage, ModelTier, TokenUsage};

const BINARY_CONTENT: &str = "[Binary hunk content]";

#[derive(Debug, Clone)]
pub struct VectorizeOptions {
    pub summary_batch_size: usize,
    pub summary_max_tokens: u32,
    pub summary_input_chars: usize,
    pub unrecognized_preview_chars: usize,
    pub embedding_batch_size: usize,
}

impl VectorizeOptions {
    pub fn new(grouping: &GroupingConfig, embedding: &EmbeddingConfig) -> Self {
        Self {
            summary_batch_size: grouping.summary_batch_size,
            summary_max_tokens: grouping.summary_max_tokens,
            summary_input_chars: grouping.summary_input_chars,
            unrecognized_preview_chars: grouping.unrecognized_preview_chars,
            embedding_batch_size: embedding.batch_size,
        }
    }
}

impl Default for VectorizeOptions {
    fn default() -> Self {
        Self::new(&GroupingConfig::default(), &EmbeddingConfig::default())
    }
}

#[derive(Debug, Clone)]
pub struct VectorizationOutcome {
    pub entries: Vec<VectorHunkEntry>,
    pub usage: LlmUsage,
}

/// An entry waiting for its summary and embedding.
struct Pending {
    entry: VectorHunkEntry,
    /// Diff text to summarize; `None` when the summary is fixed.
    summarize: Option<String>,
}

pub async fn vectorize_hunks(
    hunks: &[ParsedHunk],
    files: &[FileStatisticsAndTag],
    oracle: &dyn ReasoningOracle,
    embedder: &dyn Embedder,
    options: &VectorizeOptions,
    progress: &dyn SplitProgressReporter,
) -> Result<VectorizationOutcome> {
    let mut pending = plan_entries(hunks, files, options);
    let mut usage = LlmUsage::default();

    let to_summarize: Vec<usize> = pending
        .iter()
        .enumerate()
        .filter(|(_, p)| p.summarize.is_some())
        .map(|(i, _)| i)
        .collect();
    tracing::info!(
        entries = pending.len(),
        summaries = to_summarize.len(),
        "vectorizing hunks"
    );

    for batch in to_summarize.chunks(options.summary_batch_size.max(1)) {
        let futures = batch.iter().map(|&i| {
            let p = &pending[i];
            summarize_diff(
                oracle,
                &p.entry.file_path,
                p.summarize.as_deref().unwrap_or_default(),
                options,
            )
        });
        let results = futures::future::join_all(futures).await;
        for (&i, result) in batch.iter().zip(results) {
            let (summary, tokens) = result?;
            usage.record(ModelTier::Standard, tokens);
            progress.report(SplitProgressEvent::Usage {
                tier: ModelTier::Standard,
                usage: tokens,
            });
            pending[i].entry.summary = summary;
        }
    }

    let total = pending.len() as u64;
    let mut entries: Vec<VectorHunkEntry> = Vec::with_capacity(pending.len());
    for chunk in pending.chunks(options.embedding_batch_size.max(1)) {
        let texts: Vec<String> = chunk.iter().map(|p| p.entry.summary.clone()).collect();
        let vectors = embed_texts(embedder, &texts).await?;
        for (p, embedding) in chunk.iter().zip(vectors) {
            let mut entry = p.entry.clone();
            entry.embedding = embedding;
            entry.hash = hash_hunk(&entry.complete_patch, &entry.file_path);
            entries.push(entry);
        }
        progress.report(SplitProgressEvent::Vectorized {
            n: entries.len() as u64,
            total,
        });
    }

    Ok(VectorizationOutcome { entries, usage })
}

fn plan_entries(
    hunks: &[ParsedHunk],
    files: &[FileStatisticsAndTag],
    options: &VectorizeOptions,
) -> Vec<Pending> {
    let opaque: HashMap<&str, &FileStatisticsAndTag> = files
        .iter()
        .filter(|f| f.tag == FileTag::Opaque)
        .map(|f| (f.stats.file_path.as_str(), f))
        .collect();
    let mut emitted: HashSet<&str> = HashSet::new();
    let mut pending = Vec::with_capacity(hunks.len());

    for hunk in hunks {
        match hunk {
            ParsedHunk::Binary(patch) => pending.push(Pending {
                entry: base_entry(
                    HunkType::Binary,
                    hunk,
                    BINARY_CONTENT.to_string(),
                    fixed_summary(hunk.operation().as_str(), &patch.file_path),
                    0,
                    0,
                ),
                summarize: None,
            }),
            ParsedHunk::Unrecognized(patch) => {
                let preview: String = patch
                    .complete_patch
                    .chars()
                    .take(options.unrecognized_preview_chars)
                    .collect();
                let hidden = patch.complete_patch.split('\n').count() - preview.split('\n').count();
                pending.push(Pending {
                    entry: base_entry(
                        HunkType::Unrecognized,
                        hunk,
                        format!("{}\n[{} lines hidden]", preview, hidden),
                        String::new(),
                        0,
                        0,
                    ),
                    summarize: Some(preview),
                });
            }
            ParsedHunk::Text(text) => match opaque.get(text.file_path.as_str()) {
                Some(file) => {
                    if !emitted.insert(file.stats.file_path.as_str()) {
                        continue;
                    }
                    if let Some(combined) = combine_hunks(&file.stats.hunks) {
                        pending.push(Pending {
                            entry: opaque_entry(&combined),
                            summarize: None,
                        });
                    }
                }
                None => pending.push(Pending {
                    entry: base_entry(
                        HunkType::Text,
                        hunk,
                        text.content.clone(),
                        String::new(),
                        text.lines_added,
                        text.lines_removed,
                    ),
                    summarize: Some(text.content.chars().take(options.summary_input_chars).collect()),
                }),
            },
        }
    }
    pending
}

fn fixed_summary(operation: &str, file_path: &str) -> String {
    format!("{} {}", operation, file_path)
}

fn base_entry(
    hunk_type: HunkType,
    hunk: &ParsedHunk,
    content: String,
    summary: String,
    lines_added: u32,
    lines_removed: u32,
) -> VectorHunkEntry {
    VectorHunkEntry {
        hunk_type,
        file_path: hunk.file_path().to_string(),
        previous_file_path: hunk.previous_file_path().map(str::to_string),
        operation: hunk.operation(),
        content,
        summary,
        embedding: Vec::new(),
        complete_patch: hunk.complete_patch().to_string(),
        lines_added,
        lines_removed,
        hash: String::new(),
    }
}

fn opaque_entry(combined: &TextHunk) -> VectorHunkEntry {
    let file_name = combined
        .file_path
        .rsplit('/')
        .next()
        .unwrap_or(&combined.file_path);
    VectorHunkEntry {
        hunk_type: HunkType::Text,
        file_path: combined.file_path.clone(),
        previous_file_path: combined.previous_file_path.clone(),
        operation: combined.operation,
        content: format!(
            "[Removed {} lines, added {} lines, in {}]",
            combined.lines_removed, combined.lines_added, file_name
        ),
        summary: fixed_summary(combined.operation.as_str(), &combined.file_path),
        embedding: Vec::new(),
        complete_patch: combined.complete_patch.clone(),
        lines_added: combined.lines_added,
        lines_removed: combined.lines_removed,
        hash: String::new(),
    }
}

/// Ask the standard tier for a search-term summary of one diff.
pub async fn summarize_diff(
    oracle: &dyn ReasoningOracle,
    file_path: &str,
    diff: &str,
    options: &VectorizeOptions,
) -> Result<(String, TokenUsage)> {
    let prompt = format!(
        "You are an expert code reviewer and analyst. Your goal is to create a list of top level \
constructs that have been modified in this hunk (so as to understand how this hunk affects the rest \
of the codebase and file), and a list of symbols that have been newly used, whose usage has changed, \
or whose usage was removed, so as to understand how this hunk's dependencies have changed.

**ONLY** include the list of exports and imports in your response.
**DO NOT** include any other text in your response.

File: {file_path}

Hunk:
{diff}

Provide the summary as a list of search terms that will be vectorized and used to search for similar hunks.

Summary:"
    );
    let request = OracleRequest::new(ModelTier::Standard, prompt, 1)
        .with_max_tokens(options.summary_max_tokens)
        .with_temperature(0.0);
    let response = oracle.run(&request, &mut NoTools).await?;
    tracing::debug!(file = %file_path, "hunk summarized");
    Ok((response.text.trim().to_string(), response.usage))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::parse_diff;
    use crate::hunk::file_statistics;
    use crate::models::{FileStatistics, Operation};
    use crate::oracle::{OracleResponse, ToolBox};
    use crate::progress::NoProgress;
    use async_trait::async_trait;

    struct Echo;

    #[async_trait]
    impl ReasoningOracle for Echo {
        async fn run(&self, request: &OracleRequest, _tools: &mut dyn ToolBox) -> Result<OracleResponse> {
            let file = request
                .prompt
                .lines()
                .find_map(|l| l.strip_prefix("File: "))
                .unwrap_or_default();
            Ok(OracleResponse {
                text: format!("  symbols in {}\n", file),
                steps: 1,
                usage: TokenUsage::new(7, 3),
                ..Default::default()
            })
        }
    }

    struct Constant;

    #[async_trait]
    impl Embedder for Constant {
        fn model_name(&self) -> &str {
            "constant"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![3.0, 4.0]).collect())
        }
    }

    const MIXED: &str = "\
diff --git a/yarn.lock b/yarn.lock
index 1111111..2222222 100644
--- a/yarn.lock
+++ b/yarn.lock
@@ -1,2 +1,2 @@
-a@1
+a@2
 b@1
@@ -10,2 +10,3 @@
 c@1
+d@1
 e@1
diff --git a/logo.png b/logo.png
new file mode 100644
index 0000000..3333333
GIT binary patch
literal 4
LcmZ?wbhEHbFaQ7m

diff --git a/src/lib.rs b/src/lib.rs
index 4444444..5555555 100644
--- a/src/lib.rs
+++ b/src/lib.rs
@@ -1,3 +1,4 @@
 mod a;
+mod b;
 mod c;
 mod d;
diff --git a/old.txt b/new.txt
similarity index 100%
rename from old.txt
rename to new.txt
";

    fn tagged(hunks: &[ParsedHunk]) -> Vec<FileStatisticsAndTag> {
        let text: Vec<TextHunk> = hunks.iter().filter_map(|h| h.as_text().cloned()).collect();
        file_statistics(&text)
            .into_iter()
            .map(|stats: FileStatistics| {
                let tag = if stats.file_path.ends_with(".lock") {
                    FileTag::Opaque
                } else {
                    FileTag::Summarizable
                };
                FileStatisticsAndTag { stats, tag }
            })
            .collect()
    }

    #[tokio::test]
    async fn entries_follow_parse_order() {
        let hunks = parse_diff(MIXED).unwrap();
        let files = tagged(&hunks);
        let outcome = vectorize_hunks(&hunks, &files, &Echo, &Constant, &VectorizeOptions::default(), &NoProgress)
            .await
            .unwrap();
        let e = &outcome.entries;
        assert_eq!(e.len(), 4);

        assert_eq!(e[0].file_path, "yarn.lock");
        assert_eq!(e[0].content, "[Removed 4 lines, added 5 lines, in yarn.lock]");
        assert_eq!(e[0].summary, "modified yarn.lock");
        assert_eq!((e[0].lines_added, e[0].lines_removed), (5, 4));

        assert_eq!(e[1].hunk_type, HunkType::Binary);
        assert_eq!(e[1].content, "[Binary hunk content]");
        assert_eq!(e[1].summary, "added logo.png");
        assert_eq!(e[1].changed_lines(), 0);

        assert_eq!(e[2].hunk_type, HunkType::Text);
        assert_eq!(e[2].summary, "symbols in src/lib.rs");

        assert_eq!(e[3].hunk_type, HunkType::Unrecognized);
        assert_eq!(e[3].operation, Operation::Renamed);
        assert_eq!(e[3].previous_file_path.as_deref(), Some("old.txt"));
        assert!(e[3].content.ends_with("[0 lines hidden]"));

        // Two oracle summaries: the text hunk and the rename.
        assert_eq!(outcome.usage.standard, TokenUsage::new(14, 6));
        for entry in e {
            assert_eq!(entry.hash.len(), 8);
            assert!((entry.embedding[0] - 0.6).abs() < 1e-6);
        }
    }

    #[test]
    fn long_unrecognized_patch_is_previewed() {
        let body: String = (0..500).map(|i| format!("line {i}\n")).collect();
        let patch = format!("diff --git a/x b/x\nold mode 100644\nnew mode 100755\n{body}");
        let hunks = parse_diff(&patch).unwrap();
        let pending = plan_entries(&hunks, &[], &VectorizeOptions::default());
        let preview = pending[0].summarize.as_deref().unwrap();
        assert_eq!(preview.chars().count(), 1000);
        let hidden = hunks[0].complete_patch().split('\n').count() - preview.split('\n').count();
        assert!(pending[0].entry.content.ends_with(&format!("[{} lines hidden]", hidden)));
        assert!(hidden > 0);
    }
}
