//! Premium-tier refinement of a finished group set.
//!
//! The oracle may only merge, list and search. Work happens on a clone of
//! the input so a failed loop leaves the caller's groups untouched.

use anyhow::Result;

use super::{GroupSet, RefinementTools};
use crate::config::{GroupingConfig, RefinementConfig};
use crate::embedding::Embedder;
use crate::models::HunkGroup;
use crate::oracle::{OracleRequest, ReasoningOracle};
use crate::progress::{SplitProgressEvent, SplitProgressReporter};
use crate::usage::{LlmUsage, ModelTier};

#[derive(Debug, Clone)]
pub struct RefinementOptions {
    pub max_steps: usize,
    pub min_group_lines: u32,
    pub max_group_lines: u32,
    pub search_top_k: usize,
    pub similarity_floor: f32,
}

impl RefinementOptions {
    pub fn new(refinement: &RefinementConfig, grouping: &GroupingConfig) -> Self {
        Self {
            max_steps: refinement.max_steps,
            min_group_lines: refinement.min_group_lines,
            max_group_lines: refinement.max_group_lines,
            search_top_k: grouping.search_top_k,
            similarity_floor: grouping.similarity_floor,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RefinementOutcome {
    pub groups: GroupSet,
    pub merges: usize,
    pub usage: LlmUsage,
}

/// Let the premium oracle merge groups. Fewer than two groups are returned
/// as-is without a model call.
pub async fn refine_groups(
    groups: &GroupSet,
    oracle: &dyn ReasoningOracle,
    embedder: &dyn Embedder,
    options: &RefinementOptions,
    progress: &dyn SplitProgressReporter,
) -> Result<RefinementOutcome> {
    let mut usage = LlmUsage::default();
    if groups.len() < 2 {
        return Ok(RefinementOutcome {
            groups: groups.clone(),
            merges: 0,
            usage,
        });
    }

    let mut working = groups.clone();
    let prompt = refinement_prompt(&working, options);
    let request = OracleRequest::new(ModelTier::Premium, prompt, options.max_steps);

    let mut tools = RefinementTools::new(
        &mut working,
        embedder,
        options.search_top_k,
        options.similarity_floor,
    );
    let response = oracle.run(&request, &mut tools).await?;
    let merges = tools.merges();

    usage.record(ModelTier::Premium, response.usage);
    progress.report(SplitProgressEvent::Usage {
        tier: ModelTier::Premium,
        usage: response.usage,
    });

    working.prune_empty();
    tracing::info!(
        before = groups.len(),
        after = working.len(),
        merges,
        steps = response.steps,
        "groups refined"
    );

    Ok(RefinementOutcome {
        groups: working,
        merges,
        usage,
    })
}

fn render_group(id: &str, group: &HunkGroup) -> String {
    let mut out = format!(
        "Group ID: {}\nDescription: {}\nLines added: {}\nLines removed: {}\nHunks:\n",
        id,
        group.description,
        group.lines_added(),
        group.lines_removed()
    );
    for hunk in &group.hunks {
        out.push_str(&format!(
            "  - File path: {}\n    Summary: {}\n    Content:\n{}\n",
            hunk.file_path, hunk.summary, hunk.content
        ));
    }
    out
}

fn refinement_prompt(groups: &GroupSet, options: &RefinementOptions) -> String {
    let rendered: Vec<String> = groups.iter().map(|(id, g)| render_group(id, g)).collect();
    format!(
        "You are an expert code reviewer. A pull request has been split into the groups of hunks below, \
each of which will become its own commit and pull request. Your task is to refine these groups.

Guidelines:
  - Merge groups that are closely related or depend on each other.
  - Aim for group sizes between {min} - {max} lines added/removed.
  - Keep groups that lay groundwork for later changes separate, unless merging them avoids an \
excessive review burden.
  - Do not merge unrelated groups only to reach the size target.
  - Use listGroups and search to inspect the current state before merging.

**DO NOT** stop until the groups have been refined.

Groups:
{groups}",
        min = options.min_group_lines,
        max = options.max_group_lines,
        groups = rendered.join("\n"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HunkType, Operation, VectorHunkEntry};

    fn entry(hash: &str, added: u32) -> VectorHunkEntry {
        VectorHunkEntry {
            hunk_type: HunkType::Text,
            file_path: format!("src/{hash}.rs"),
            previous_file_path: None,
            operation: Operation::Modified,
            content: format!("+{hash}"),
            summary: format!("{hash} summary"),
            embedding: vec![1.0],
            complete_patch: String::new(),
            lines_added: added,
            lines_removed: 0,
            hash: hash.to_string(),
        }
    }

    #[test]
    fn prompt_lists_groups_with_stats() {
        let mut groups = GroupSet::new();
        let id = groups.create("parser changes");
        groups.add(&id, entry("a", 4)).unwrap();
        groups.add(&id, entry("b", 3)).unwrap();
        let options = RefinementOptions::new(&RefinementConfig::default(), &GroupingConfig::default());
        let prompt = refinement_prompt(&groups, &options);
        assert!(prompt.contains(&format!("Group ID: {}", id)));
        assert!(prompt.contains("Lines added: 7"));
        assert!(prompt.contains("between 10 - 200 lines"));
        assert!(prompt.contains("File path: src/b.rs"));
    }
}
