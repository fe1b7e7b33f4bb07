//! Pipeline orchestration and the CLI command bodies.
//!
//! ```text
//! diff ─▶ parse ─▶ classify ─▶ vectorize ─▶ group ─▶ refine ─▶ SplitPlan
//!                                                                 │
//!                       commit chain ◀── (optional) ◀─────────────┘
//!                            │
//!                push ─▶ create PRs ─▶ close original
//! ```
//!
//! A [`SplitPlan`] is the hand-off between planning and reconstruction. It
//! can be written to JSON, reviewed, and replayed later with `apply`.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::classify::classify_files;
use crate::config::Config;
use crate::diff::parse_diff;
use crate::embedding::{create_embedder, Embedder};
use crate::git::{commit_groups, push_branches, GitRepo};
use crate::github::{parse_pull_request_url, GitHubClient};
use crate::grouping::{group_hunks, refine_groups, verify_partition, GroupingOptions, RefinementOptions};
use crate::hunk::{file_statistics, hash_hunk};
use crate::models::{CommittedHunkGroup, HunkGroup, ParsedHunk, PullRequestRef, TextHunk};
use crate::oracle::{create_oracle, ReasoningOracle};
use crate::progress::{SplitProgressEvent, SplitProgressReporter, SplitStage};
use crate::retry::RetryPolicy;
use crate::usage::{LlmUsage, ModelTier};
use crate::vectorize::{vectorize_hunks, VectorizeOptions};

/// The reviewed-or-not output of planning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitPlan {
    pub created_at: DateTime<Utc>,
    pub pull_request: PullRequestRef,
    pub groups: Vec<HunkGroup>,
    #[serde(default)]
    pub usage: LlmUsage,
}

impl SplitPlan {
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write plan file: {}", path.display()))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read plan file: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse plan file: {}", path.display()))
    }
}

/// Flags shared by `split` and `split-local`.
#[derive(Debug, Clone, Default)]
pub struct SplitOptions {
    pub instructions: Option<String>,
    pub plan_out: Option<PathBuf>,
    pub commit: bool,
    pub push: bool,
    pub create_prs: bool,
    pub close_original: bool,
}

/// Run every planning stage over a diff.
pub async fn plan_from_diff(
    diff: &str,
    pull_request: PullRequestRef,
    config: &Config,
    instructions: Option<&str>,
    oracle: &dyn ReasoningOracle,
    embedder: &dyn Embedder,
    progress: &dyn SplitProgressReporter,
) -> Result<SplitPlan> {
    let mut usage = LlmUsage::default();

    progress.report(SplitProgressEvent::Stage {
        stage: SplitStage::Parsing,
    });
    let hunks = parse_diff(diff)?;
    let text: Vec<TextHunk> = hunks.iter().filter_map(|h| h.as_text().cloned()).collect();
    tracing::info!(hunks = hunks.len(), text = text.len(), "diff parsed");

    progress.report(SplitProgressEvent::Stage {
        stage: SplitStage::Classifying,
    });
    let classified = classify_files(file_statistics(&text), oracle, &config.classification, progress).await?;
    usage.merge(classified.usage);

    progress.report(SplitProgressEvent::Stage {
        stage: SplitStage::Vectorizing,
    });
    let vectorized = vectorize_hunks(
        &hunks,
        &classified.files,
        oracle,
        embedder,
        &VectorizeOptions::new(&config.grouping, &config.embedding),
        progress,
    )
    .await?;
    usage.merge(vectorized.usage);
    let entries = vectorized.entries;

    progress.report(SplitProgressEvent::Stage {
        stage: SplitStage::Grouping,
    });
    let mut grouping_options = GroupingOptions::from(&config.grouping);
    if let Some(text) = instructions {
        grouping_options.instructions = Some(text.to_string());
    }
    let grouped = group_hunks(entries.clone(), oracle, embedder, &grouping_options, progress).await?;
    usage.merge(grouped.usage);
    let mut groups = grouped.groups;
    verify_partition(&entries, &groups.groups())?;

    if config.refinement.enabled {
        progress.report(SplitProgressEvent::Stage {
            stage: SplitStage::Refining,
        });
        let options = RefinementOptions::new(&config.refinement, &config.grouping);
        let refined = refine_groups(&groups, oracle, embedder, &options, progress).await?;
        usage.merge(refined.usage);
        groups = refined.groups;
        verify_partition(&entries, &groups.groups())?;
    }

    tracing::info!(groups = groups.len(), hunks = entries.len(), "split planned");
    Ok(SplitPlan {
        created_at: Utc::now(),
        pull_request,
        groups: groups.into_groups(),
        usage,
    })
}

fn log_usage(config: &Config, usage: &LlmUsage) {
    let standard = usage.get(ModelTier::Standard);
    let premium = usage.get(ModelTier::Premium);
    tracing::info!(
        provider = %config.llm.provider,
        standard_prompt = standard.prompt_tokens,
        standard_completion = standard.completion_tokens,
        premium_prompt = premium.prompt_tokens,
        premium_completion = premium.completion_tokens,
        estimated_cost_usd = format!("{:.4}", usage.estimated_cost(config.llm.provider)),
        "llm usage"
    );
}

fn print_plan(plan: &SplitPlan) {
    for (i, group) in plan.groups.iter().enumerate() {
        println!(
            "Group {}  (+{} -{}, {} hunks)  {}",
            i + 1,
            group.lines_added(),
            group.lines_removed(),
            group.hunks.len(),
            group.description
        );
        for hunk in &group.hunks {
            println!("    {}  {}  {}", hunk.hash, hunk.operation, hunk.file_path);
        }
    }
}

fn print_committed(committed: &[CommittedHunkGroup]) {
    for group in committed {
        println!("{}  {}", &group.commit_sha[..group.commit_sha.len().min(12)], group.branch_name);
    }
}

/// `parse`: list every hunk with its identity hash.
pub fn run_parse(path: &Path, json: bool) -> Result<()> {
    let diff = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read diff file: {}", path.display()))?;
    let hunks = parse_diff(&diff)?;
    let rows: Vec<serde_json::Value> = hunks.iter().map(hunk_row).collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if hunks.is_empty() {
        println!("No hunks found.");
        return Ok(());
    }
    for hunk in &hunks {
        let (added, removed) = line_counts(hunk);
        println!(
            "{}  {:<12} {:<9} +{:<5} -{:<5} {}",
            hash_hunk(hunk.complete_patch(), hunk.file_path()),
            hunk.hunk_type().as_str(),
            hunk.operation().as_str(),
            added,
            removed,
            hunk.file_path()
        );
    }
    println!("\n{} hunks", hunks.len());
    Ok(())
}

fn line_counts(hunk: &ParsedHunk) -> (u32, u32) {
    match hunk {
        ParsedHunk::Text(t) => (t.lines_added, t.lines_removed),
        _ => (0, 0),
    }
}

fn hunk_row(hunk: &ParsedHunk) -> serde_json::Value {
    let (added, removed) = line_counts(hunk);
    serde_json::json!({
        "hash": hash_hunk(hunk.complete_patch(), hunk.file_path()),
        "type": hunk.hunk_type(),
        "operation": hunk.operation(),
        "filePath": hunk.file_path(),
        "previousFilePath": hunk.previous_file_path(),
        "linesAdded": added,
        "linesRemoved": removed,
    })
}

fn work_dir(config: &Config) -> PathBuf {
    let parent = config.git.workdir.clone().unwrap_or_else(std::env::temp_dir);
    parent.join(format!("pr-splitter-{}", uuid::Uuid::new_v4()))
}

/// `split`: the full pipeline against a GitHub pull request.
pub async fn run_split(
    config: &Config,
    url: &str,
    options: &SplitOptions,
    progress: &dyn SplitProgressReporter,
) -> Result<()> {
    let retry = RetryPolicy::from(&config.retry);
    let github = GitHubClient::from_env(retry.clone())?;
    let publish = options.create_prs || options.close_original;
    if publish {
        let login = github.verify_token().await?;
        tracing::info!(login = %login, "GitHub token verified");
    }

    let info = parse_pull_request_url(url, github.token())?;
    let pr = github.fetch_pull_request(info).await?;
    tracing::info!(
        number = pr.info.number,
        base = %pr.base_branch,
        head = %pr.head_branch,
        title = %pr.title,
        "pull request loaded"
    );

    progress.report(SplitProgressEvent::Stage {
        stage: SplitStage::Cloning,
    });
    let dest = work_dir(config);
    let repo = GitRepo::clone_from(&pr.info.repo_url, &dest, &config.git.remote)?;
    repo.fetch_pull_request(pr.info.number, &pr.base_branch)?;
    let diff = repo.diff(&pr.base_sha, &pr.head_sha)?;
    tracing::info!(workdir = %dest.display(), bytes = diff.len(), "repository ready");

    let oracle = create_oracle(&config.llm, retry.clone())?;
    let embedder = create_embedder(&config.embedding, retry)?;
    let plan = plan_from_diff(
        &diff,
        PullRequestRef::from(&pr),
        config,
        options.instructions.as_deref(),
        oracle.as_ref(),
        embedder.as_ref(),
        progress,
    )
    .await?;
    log_usage(config, &plan.usage);
    print_plan(&plan);
    if let Some(path) = &options.plan_out {
        plan.save(path)?;
        println!("Plan written to {}", path.display());
    }

    if !(options.commit || options.push || publish) {
        return Ok(());
    }

    progress.report(SplitProgressEvent::Stage {
        stage: SplitStage::Committing,
    });
    let committed = commit_groups(
        &repo,
        &plan.pull_request,
        &plan.groups,
        &config.git.branch_prefix,
        progress,
    )?;
    print_committed(&committed);

    if !(options.push || publish) {
        return Ok(());
    }
    progress.report(SplitProgressEvent::Stage {
        stage: SplitStage::Pushing,
    });
    push_branches(&repo, &committed)?;

    if !publish {
        return Ok(());
    }
    progress.report(SplitProgressEvent::Stage {
        stage: SplitStage::CreatingPullRequests,
    });
    let created = github.create_split_pull_requests(&pr, &committed).await?;
    for new_pr in &created {
        println!("#{}  {}", new_pr.number, new_pr.url);
    }
    if options.close_original {
        github.close_original(&pr, &created).await?;
        println!("Closed original pull request #{}", pr.info.number);
    }
    Ok(())
}

/// `split-local`: the pipeline against two revisions of a local repository.
pub async fn run_split_local(
    config: &Config,
    repo_dir: &Path,
    base: &str,
    head: &str,
    number: u64,
    options: &SplitOptions,
    progress: &dyn SplitProgressReporter,
) -> Result<()> {
    let repo = GitRepo::open(repo_dir, &config.git.remote)?;
    if options.commit {
        // Fail before any model calls are paid for.
        repo.ensure_clean()?;
    }
    let pull_request = PullRequestRef {
        number,
        base_sha: repo.rev_parse(base)?,
        head_sha: repo.rev_parse(head)?,
        owner: None,
        repo: None,
        base_branch: None,
        link: None,
    };
    let diff = repo.diff(&pull_request.base_sha, &pull_request.head_sha)?;

    let retry = RetryPolicy::from(&config.retry);
    let oracle = create_oracle(&config.llm, retry.clone())?;
    let embedder = create_embedder(&config.embedding, retry)?;
    let plan = plan_from_diff(
        &diff,
        pull_request,
        config,
        options.instructions.as_deref(),
        oracle.as_ref(),
        embedder.as_ref(),
        progress,
    )
    .await?;
    log_usage(config, &plan.usage);
    print_plan(&plan);
    if let Some(path) = &options.plan_out {
        plan.save(path)?;
        println!("Plan written to {}", path.display());
    }

    if options.commit {
        progress.report(SplitProgressEvent::Stage {
            stage: SplitStage::Committing,
        });
        let committed = commit_groups(
            &repo,
            &plan.pull_request,
            &plan.groups,
            &config.git.branch_prefix,
            progress,
        )?;
        print_committed(&committed);
    }
    Ok(())
}

/// `apply`: replay a saved plan as a commit chain.
pub fn run_apply(
    config: &Config,
    plan_path: &Path,
    repo_dir: &Path,
    push: bool,
    progress: &dyn SplitProgressReporter,
) -> Result<Vec<CommittedHunkGroup>> {
    let plan = SplitPlan::load(plan_path)?;
    let repo = GitRepo::open(repo_dir, &config.git.remote)?;
    tracing::info!(
        groups = plan.groups.len(),
        number = plan.pull_request.number,
        created_at = %plan.created_at,
        "applying plan"
    );

    progress.report(SplitProgressEvent::Stage {
        stage: SplitStage::Committing,
    });
    let committed = commit_groups(
        &repo,
        &plan.pull_request,
        &plan.groups,
        &config.git.branch_prefix,
        progress,
    )?;
    print_committed(&committed);

    if push {
        progress.report(SplitProgressEvent::Stage {
            stage: SplitStage::Pushing,
        });
        push_branches(&repo, &committed)?;
    }
    Ok(committed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HunkType, Operation, VectorHunkEntry};

    #[test]
    fn plan_round_trips_without_embeddings() {
        let entry = VectorHunkEntry {
            hunk_type: HunkType::Text,
            file_path: "src/lib.rs".to_string(),
            previous_file_path: None,
            operation: Operation::Modified,
            content: "+x".to_string(),
            summary: "x".to_string(),
            embedding: vec![0.5, 0.5],
            complete_patch: "diff --git a/src/lib.rs b/src/lib.rs\n".to_string(),
            lines_added: 1,
            lines_removed: 0,
            hash: "abcd1234".to_string(),
        };
        let plan = SplitPlan {
            created_at: Utc::now(),
            pull_request: PullRequestRef {
                number: 3,
                base_sha: "base".to_string(),
                head_sha: "head".to_string(),
                owner: None,
                repo: None,
                base_branch: None,
                link: None,
            },
            groups: vec![HunkGroup {
                description: "lib".to_string(),
                hunks: vec![entry],
            }],
            usage: LlmUsage::default(),
        };

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plan.json");
        plan.save(&path).unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"pullRequest\""));
        assert!(!raw.contains("embedding"));

        let loaded = SplitPlan::load(&path).unwrap();
        assert_eq!(loaded.groups[0].hunks[0].hash, "abcd1234");
        assert!(loaded.groups[0].hunks[0].embedding.is_empty());
        assert_eq!(loaded.pull_request.number, 3);
    }

    #[test]
    fn hunk_rows_carry_hashes() {
        let diff = "diff --git a/a.txt b/a.txt\n--- a/a.txt\n+++ b/a.txt\n@@ -1 +1 @@\n-a\n+b\n";
        let hunks = parse_diff(diff).unwrap();
        let row = hunk_row(&hunks[0]);
        assert_eq!(row["hash"].as_str().unwrap().len(), 8);
        assert_eq!(row["type"], "text");
        assert_eq!(row["linesAdded"], 1);
    }

    #[test]
    fn work_dirs_are_unique() {
        let config = Config::default();
        assert_ne!(work_dir(&config), work_dir(&config));
    }
}
