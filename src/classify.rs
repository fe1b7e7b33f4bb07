//! Per-file classification: opaque (combine all hunks) or summarizable.
//!
//! Files matching `classification.opaque_globs` are tagged without a model
//! call. Every other file gets one standard-tier decision loop with a single
//! `setIsHumanReadable` tool. Batches run concurrently.

use anyhow::{Context, Result};
use async_trait::async_trait;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde_json::{json, Value};

use crate::config::ClassificationConfig;
use crate::error::SplitError;
use crate::models::{FileStatistics, FileStatisticsAndTag, FileTag};
use crate::oracle::{OracleRequest, ReasoningOracle, ToolBox, ToolDefinition};
use crate::progress::{SplitProgressEvent, SplitProgressReporter};
use crate::usage::{LlmUsage, ModelTier, TokenUsage};

#[derive(Debug, Clone)]
pub struct ClassificationOutcome {
    pub files: Vec<FileStatisticsAndTag>,
    pub usage: LlmUsage,
}

pub fn build_opaque_globs(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).with_context(|| format!("Invalid opaque glob: {}", pattern))?;
        builder.add(glob);
    }
    Ok(builder.build()?)
}

/// Tag every file, preserving input order.
pub async fn classify_files(
    files: Vec<FileStatistics>,
    oracle: &dyn ReasoningOracle,
    config: &ClassificationConfig,
    progress: &dyn SplitProgressReporter,
) -> Result<ClassificationOutcome> {
    let globs = &build_opaque_globs(&config.opaque_globs)?;
    let total = files.len() as u64;
    let mut usage = LlmUsage::default();
    let mut tagged = Vec::with_capacity(files.len());

    for batch in files.chunks(config.batch_size.max(1)) {
        let futures = batch.iter().map(|stats| async move {
            if globs.is_match(&stats.file_path) {
                tracing::debug!(file = %stats.file_path, "opaque by glob");
                return Ok((FileTag::Opaque, None));
            }
            let (tag, tokens) = classify_one(stats, oracle, config).await?;
            Ok::<_, anyhow::Error>((tag, Some(tokens)))
        });
        let results = futures::future::join_all(futures).await;

        for (stats, result) in batch.iter().zip(results) {
            let (tag, tokens) = result?;
            if let Some(tokens) = tokens {
                usage.record(ModelTier::Standard, tokens);
                progress.report(SplitProgressEvent::Usage {
                    tier: ModelTier::Standard,
                    usage: tokens,
                });
            }
            tagged.push(FileStatisticsAndTag {
                stats: stats.clone(),
                tag,
            });
        }
        progress.report(SplitProgressEvent::Classified {
            n: tagged.len() as u64,
            total,
        });
    }

    let opaque = tagged.iter().filter(|f| f.tag == FileTag::Opaque).count();
    tracing::info!(files = tagged.len(), opaque, "files classified");
    Ok(ClassificationOutcome {
        files: tagged,
        usage,
    })
}

async fn classify_one(
    stats: &FileStatistics,
    oracle: &dyn ReasoningOracle,
    config: &ClassificationConfig,
) -> Result<(FileTag, TokenUsage)> {
    let request = OracleRequest::new(
        ModelTier::Standard,
        classification_prompt(stats, config.sample_chars),
        config.max_steps,
    );
    let mut tools = TagTool::new(&stats.file_path);
    let response = oracle.run(&request, &mut tools).await?;
    match tools.tag {
        Some(tag) => Ok((tag, response.usage)),
        None => Err(SplitError::ClassificationIncomplete {
            file_path: stats.file_path.clone(),
        }
        .into()),
    }
}

fn classification_prompt(stats: &FileStatistics, sample_chars: usize) -> String {
    let sample: String = stats.sample.chars().take(sample_chars).collect();
    format!(
        "You are an expert code reviewer and analyst. Your goal is to determine whether this file diff \
contains human readable content.
Examples of non-human readable files:
  - Binary files
  - SVG files
  - Generated files like `package-lock.json`, `yarn.lock`, `pnpm-lock.yaml`, `bun.lockb`, `Cargo.lock`, \
`Pipfile.lock`, `poetry.lock`, `go.sum`, `Gemfile.lock`, `composer.lock`, `Package.resolved`
Examples of human readable files:
  - Code files
  - Config files
  - Markdown files

The name of the file is {path}. There are {added} line(s) added and {removed} line(s) removed.

The beginning of the first change:
{sample}

**DO NOT** under **any circumstances** stop until the file has been categorized by either calling \
`setIsHumanReadable(true)` or `setIsHumanReadable(false)`.",
        path = stats.file_path,
        added = stats.lines_added,
        removed = stats.lines_removed,
    )
}

struct TagTool<'a> {
    file_path: &'a str,
    tag: Option<FileTag>,
}

impl<'a> TagTool<'a> {
    fn new(file_path: &'a str) -> Self {
        Self {
            file_path,
            tag: None,
        }
    }
}

#[async_trait]
impl ToolBox for TagTool<'_> {
    fn definitions(&self) -> Vec<ToolDefinition> {
        vec![ToolDefinition::new(
            "setIsHumanReadable",
            "Categorize the file as human readable or not",
            json!({
                "type": "object",
                "properties": {
                    "humanReadable": {"type": "boolean"}
                },
                "required": ["humanReadable"]
            }),
        )]
    }

    async fn call(&mut self, name: &str, arguments: Value) -> String {
        if name != "setIsHumanReadable" {
            return format!("Unknown tool: {}", name);
        }
        let Some(readable) = arguments.get("humanReadable").and_then(|v| v.as_bool()) else {
            return "Invalid arguments for setIsHumanReadable: expected boolean field humanReadable"
                .to_string();
        };
        let tag = if readable {
            FileTag::Summarizable
        } else {
            FileTag::Opaque
        };
        self.tag = Some(tag);
        format!(
            "File {} tagged as {}",
            self.file_path,
            match tag {
                FileTag::Summarizable => "summarizable",
                FileTag::Opaque => "opaque",
            }
        )
    }

    fn finished(&self) -> bool {
        self.tag.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::OracleResponse;
    use crate::progress::NoProgress;

    /// Tags lockfiles opaque, everything else readable, optionally forgetting.
    struct Tagger {
        forget: bool,
    }

    #[async_trait]
    impl ReasoningOracle for Tagger {
        async fn run(&self, request: &OracleRequest, tools: &mut dyn ToolBox) -> Result<OracleResponse> {
            if !self.forget {
                let readable = !request.prompt.contains(".lock. There are");
                tools
                    .call("setIsHumanReadable", json!({"humanReadable": readable}))
                    .await;
            }
            Ok(OracleResponse {
                steps: 1,
                usage: TokenUsage::new(5, 1),
                ..Default::default()
            })
        }
    }

    fn stats(path: &str) -> FileStatistics {
        FileStatistics {
            file_path: path.to_string(),
            lines_added: 2,
            lines_removed: 1,
            sample: "@@ -1 +1,2 @@\n-a\n+b\n+c".to_string(),
            hunks: Vec::new(),
        }
    }

    #[tokio::test]
    async fn tags_in_input_order() {
        let files: Vec<FileStatistics> = ["src/a.rs", "Cargo.lock", "README.md", "src/b.rs", "yarn.lock", "src/c.rs"]
            .iter()
            .map(|p| stats(p))
            .collect();
        let config = ClassificationConfig::default();
        let outcome = classify_files(files, &Tagger { forget: false }, &config, &NoProgress)
            .await
            .unwrap();
        let tags: Vec<FileTag> = outcome.files.iter().map(|f| f.tag).collect();
        assert_eq!(
            tags,
            vec![
                FileTag::Summarizable,
                FileTag::Opaque,
                FileTag::Summarizable,
                FileTag::Summarizable,
                FileTag::Opaque,
                FileTag::Summarizable
            ]
        );
        assert_eq!(outcome.files[1].stats.file_path, "Cargo.lock");
        assert_eq!(outcome.usage.standard, TokenUsage::new(30, 6));
    }

    #[tokio::test]
    async fn untagged_file_is_fatal() {
        let config = ClassificationConfig::default();
        let err = classify_files(vec![stats("src/a.rs")], &Tagger { forget: true }, &config, &NoProgress)
            .await
            .unwrap_err();
        match err.downcast_ref::<SplitError>() {
            Some(SplitError::ClassificationIncomplete { file_path }) => assert_eq!(file_path, "src/a.rs"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn globs_skip_the_oracle() {
        let config = ClassificationConfig {
            opaque_globs: vec!["**/*.svg".to_string()],
            ..Default::default()
        };
        // The forgetful oracle would fail any file it is asked about.
        let outcome = classify_files(
            vec![stats("assets/logo.svg")],
            &Tagger { forget: true },
            &config,
            &NoProgress,
        )
        .await
        .unwrap();
        assert_eq!(outcome.files[0].tag, FileTag::Opaque);
        assert_eq!(outcome.usage, LlmUsage::default());
    }

    #[test]
    fn bad_glob_is_rejected() {
        assert!(build_opaque_globs(&["[".to_string()]).is_err());
    }

    #[test]
    fn prompt_truncates_sample() {
        let mut s = stats("src/a.rs");
        s.sample = "x".repeat(2000);
        let prompt = classification_prompt(&s, 10);
        assert!(prompt.contains(&"x".repeat(10)));
        assert!(!prompt.contains(&"x".repeat(11)));
    }
}
