//! Hunk grouping.
//!
//! Hunks are placed one at a time, in parse order. For each hunk a
//! standard-tier decision loop gets the hunk's summary, path and content,
//! the author's guidance if any, and five tools over the shared
//! [`GroupSet`]:
//!
//! | Tool          | Effect                                                   |
//! |---------------|----------------------------------------------------------|
//! | `search`      | top-K placed hunks by cosine similarity, with group ids  |
//! | `listGroups`  | ids and descriptions                                     |
//! | `createGroup` | new empty group, returns its id                          |
//! | `mergeGroups` | new group with A's hunks then B's; A and B are removed    |
//! | `addToGroup`  | moves the current hunk into a group                      |
//!
//! The loop succeeds only if `addToGroup` consumed the hunk. Otherwise the
//! whole run fails with [`SplitError::HunkNotGrouped`] and the partial group
//! set is dropped.
//!
//! A second, premium-tier pass ([`refine`]) may then merge groups.

pub mod refine;
pub mod tools;

use anyhow::{bail, Result};
use std::collections::HashMap;

use crate::config::GroupingConfig;
use crate::embedding::Embedder;
use crate::error::SplitError;
use crate::models::{HunkGroup, VectorHunkEntry};
use crate::oracle::{OracleRequest, ReasoningOracle};
use crate::progress::{SplitProgressEvent, SplitProgressReporter};
use crate::usage::{LlmUsage, ModelTier};

pub use refine::{refine_groups, RefinementOptions};
pub use tools::{GroupingTools, RefinementTools};

/// Ordered, id-addressed groups. Order is the commit-chain order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupSet {
    groups: Vec<(String, HunkGroup)>,
}

impl GroupSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&HunkGroup> {
        self.groups.iter().find(|(gid, _)| gid == id).map(|(_, g)| g)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &HunkGroup)> {
        self.groups.iter().map(|(id, g)| (id.as_str(), g))
    }

    /// Every placed hunk with its group id.
    pub fn placed(&self) -> impl Iterator<Item = (&str, &VectorHunkEntry)> {
        self.groups
            .iter()
            .flat_map(|(id, g)| g.hunks.iter().map(move |h| (id.as_str(), h)))
    }

    pub fn hunk_count(&self) -> usize {
        self.groups.iter().map(|(_, g)| g.hunks.len()).sum()
    }

    /// Create an empty group and return its id.
    pub fn create(&mut self, description: impl Into<String>) -> String {
        let id = new_group_id();
        self.groups.push((id.clone(), HunkGroup::new(description)));
        id
    }

    /// Append a hunk to a group. Hands the hunk back if the id is unknown.
    pub fn add(&mut self, id: &str, hunk: VectorHunkEntry) -> Result<(), VectorHunkEntry> {
        match self.groups.iter_mut().find(|(gid, _)| gid == id) {
            Some((_, group)) => {
                group.hunks.push(hunk);
                Ok(())
            }
            None => Err(hunk),
        }
    }

    /// Replace groups `a` and `b` with a new group holding a's hunks then
    /// b's, appended at the end. Errors are messages for the oracle.
    pub fn merge(&mut self, a: &str, b: &str, description: impl Into<String>) -> Result<String, String> {
        if a == b {
            return Err(format!("Cannot merge group {} with itself", a));
        }
        let pos_a = self
            .position(a)
            .ok_or_else(|| format!("Could not find group with ID {}", a))?;
        let pos_b = self
            .position(b)
            .ok_or_else(|| format!("Could not find group with ID {}", b))?;

        // Remove the later index first so the earlier one stays valid.
        let (first, second) = if pos_a > pos_b { (pos_a, pos_b) } else { (pos_b, pos_a) };
        let removed_first = self.groups.remove(first).1;
        let removed_second = self.groups.remove(second).1;
        let (group_a, group_b) = if pos_a > pos_b {
            (removed_first, removed_second)
        } else {
            (removed_second, removed_first)
        };

        let mut hunks = group_a.hunks;
        hunks.extend(group_b.hunks);
        let id = new_group_id();
        self.groups.push((
            id.clone(),
            HunkGroup {
                description: description.into(),
                hunks,
            },
        ));
        Ok(id)
    }

    /// Drop groups with no hunks. Returns how many were removed.
    pub fn prune_empty(&mut self) -> usize {
        let before = self.groups.len();
        self.groups.retain(|(_, g)| !g.hunks.is_empty());
        before - self.groups.len()
    }

    pub fn into_groups(self) -> Vec<HunkGroup> {
        self.groups.into_iter().map(|(_, g)| g).collect()
    }

    pub fn groups(&self) -> Vec<HunkGroup> {
        self.groups.iter().map(|(_, g)| g.clone()).collect()
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.groups.iter().position(|(gid, _)| gid == id)
    }
}

fn new_group_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Check that `groups` holds exactly the hashes of `hunks`, each once.
pub fn verify_partition(hunks: &[VectorHunkEntry], groups: &[HunkGroup]) -> Result<()> {
    let mut expected: HashMap<&str, usize> = HashMap::new();
    for h in hunks {
        *expected.entry(h.hash.as_str()).or_default() += 1;
    }
    let mut actual: HashMap<&str, usize> = HashMap::new();
    for g in groups {
        for h in &g.hunks {
            *actual.entry(h.hash.as_str()).or_default() += 1;
        }
    }
    if expected != actual {
        let missing: Vec<&str> = expected
            .keys()
            .filter(|k| actual.get(*k) != expected.get(*k))
            .copied()
            .collect();
        let extra: Vec<&str> = actual
            .keys()
            .filter(|k| !expected.contains_key(*k))
            .copied()
            .collect();
        bail!(
            "groups do not partition the hunks (mismatched: {:?}, unexpected: {:?})",
            missing,
            extra
        );
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct GroupingOptions {
    pub max_steps: usize,
    pub search_top_k: usize,
    pub similarity_floor: f32,
    pub instructions: Option<String>,
}

impl From<&GroupingConfig> for GroupingOptions {
    fn from(config: &GroupingConfig) -> Self {
        Self {
            max_steps: config.max_steps,
            search_top_k: config.search_top_k,
            similarity_floor: config.similarity_floor,
            instructions: config.instructions.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GroupingOutcome {
    pub groups: GroupSet,
    pub usage: LlmUsage,
}

/// Place every hunk into a group, in order.
pub async fn group_hunks(
    hunks: Vec<VectorHunkEntry>,
    oracle: &dyn ReasoningOracle,
    embedder: &dyn Embedder,
    options: &GroupingOptions,
    progress: &dyn SplitProgressReporter,
) -> Result<GroupingOutcome> {
    let total = hunks.len() as u64;
    let mut groups = GroupSet::new();
    let mut usage = LlmUsage::default();

    for (n, hunk) in hunks.into_iter().enumerate() {
        let prompt = grouping_prompt(&hunk, options.instructions.as_deref())?;
        let request = OracleRequest::new(ModelTier::Standard, prompt, options.max_steps);
        let file_path = hunk.file_path.clone();
        let summary = hunk.summary.clone();

        let mut tools = GroupingTools::new(
            &mut groups,
            hunk,
            embedder,
            options.search_top_k,
            options.similarity_floor,
        );
        let response = oracle.run(&request, &mut tools).await?;
        let unplaced = tools.into_current();

        usage.record(ModelTier::Standard, response.usage);
        progress.report(SplitProgressEvent::Usage {
            tier: ModelTier::Standard,
            usage: response.usage,
        });

        if unplaced.is_some() {
            return Err(SplitError::HunkNotGrouped {
                file_path,
                summary,
                steps: response.steps,
            }
            .into());
        }

        tracing::debug!(file = %file_path, steps = response.steps, groups = groups.len(), "hunk grouped");
        progress.report(SplitProgressEvent::HunkGrouped {
            n: n as u64 + 1,
            total,
        });
    }

    let pruned = groups.prune_empty();
    if pruned > 0 {
        tracing::info!(pruned, "dropped empty groups");
    }

    Ok(GroupingOutcome { groups, usage })
}

fn grouping_prompt(hunk: &VectorHunkEntry, instructions: Option<&str>) -> Result<String> {
    let guidance = match instructions.map(str::trim).filter(|s| !s.is_empty()) {
        Some(text) => format!(
            "\n\nThe pull request author has provided the following guidance for splitting the pull request: \"{}\"",
            text
        ),
        None => String::new(),
    };
    let current = serde_json::to_string_pretty(&serde_json::json!({
        "summary": hunk.summary,
        "filePath": hunk.file_path,
        "content": hunk.content,
    }))?;

    Ok(format!(
        "You are a senior software engineer tasked with separating diff hunks into groups. \
These groups of hunks will later be used to create a commit per group, so it is paramount that \
hunks that depend on one another are grouped together.{guidance}

General guidelines for grouping hunks:
  - If a hunk is generated by another hunk, e.g. a lockfile change caused by a manifest change, \
group the generated hunk with the hunk that caused it.

Some groups may already exist. Decide whether this hunk belongs in an existing group or in a new one:
  1. Use the search and listGroups tools to look for a suitable group. Search several times with \
different queries if needed. Hunks are indexed by their summaries, so symbols from the current \
hunk's summary make the best search terms.
  2. If a suitable group exists, add the hunk to it with addToGroup.
  3. Otherwise create a new group with createGroup and add the hunk to it.

**DO NOT** stop until the hunk is added to a group.

Current hunk:
{current}
"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HunkType, Operation};

    pub(crate) fn entry(hash: &str) -> VectorHunkEntry {
        VectorHunkEntry {
            hunk_type: HunkType::Text,
            file_path: format!("src/{hash}.rs"),
            previous_file_path: None,
            operation: Operation::Modified,
            content: format!("@@ -1 +1 @@\n-{hash}\n+{hash}!"),
            summary: format!("summary of {hash}"),
            embedding: vec![1.0, 0.0],
            complete_patch: String::new(),
            lines_added: 1,
            lines_removed: 1,
            hash: hash.to_string(),
        }
    }

    #[test]
    fn create_add_and_lookup() {
        let mut set = GroupSet::new();
        let id = set.create("parser");
        assert!(set.add(&id, entry("a")).is_ok());
        assert!(set.add(&id, entry("b")).is_ok());
        let group = set.get(&id).unwrap();
        assert_eq!(group.hunks[0].hash, "a");
        assert_eq!(group.hunks[1].hash, "b");
        let placed: Vec<(&str, &str)> = set.placed().map(|(gid, h)| (gid, h.hash.as_str())).collect();
        assert_eq!(placed, vec![(id.as_str(), "a"), (id.as_str(), "b")]);
        assert!(set.add("nope", entry("c")).is_err());
    }

    #[test]
    fn merge_orders_hunks_and_replaces_groups() {
        let mut set = GroupSet::new();
        let first = set.create("first");
        let a = set.create("a");
        let b = set.create("b");
        set.add(&a, entry("a1")).unwrap();
        set.add(&b, entry("b1")).unwrap();
        set.add(&b, entry("b2")).unwrap();

        // b before a in the call, so b's hunks lead.
        let merged = set.merge(&b, &a, "both").unwrap();
        assert_eq!(set.len(), 2);
        assert!(!set.contains(&a));
        assert!(!set.contains(&b));
        let hashes: Vec<&str> = set.get(&merged).unwrap().hunks.iter().map(|h| h.hash.as_str()).collect();
        assert_eq!(hashes, vec!["b1", "b2", "a1"]);
        let order: Vec<&str> = set.iter().map(|(id, _)| id).collect();
        assert_eq!(order, vec![first.as_str(), merged.as_str()]);
    }

    #[test]
    fn merge_failures_are_messages() {
        let mut set = GroupSet::new();
        let a = set.create("a");
        assert_eq!(
            set.merge(&a, "missing", "x").unwrap_err(),
            "Could not find group with ID missing"
        );
        assert!(set.merge(&a, &a, "x").unwrap_err().contains("itself"));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn prune_drops_empty_groups() {
        let mut set = GroupSet::new();
        let a = set.create("a");
        set.create("empty");
        set.add(&a, entry("x")).unwrap();
        assert_eq!(set.prune_empty(), 1);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn partition_check() {
        let hunks = vec![entry("a"), entry("b")];
        let good = vec![HunkGroup {
            description: "g".to_string(),
            hunks: vec![entry("b"), entry("a")],
        }];
        assert!(verify_partition(&hunks, &good).is_ok());
        let duplicated = vec![HunkGroup {
            description: "g".to_string(),
            hunks: vec![entry("a"), entry("a"), entry("b")],
        }];
        assert!(verify_partition(&hunks, &duplicated).is_err());
        let missing = vec![HunkGroup {
            description: "g".to_string(),
            hunks: vec![entry("a")],
        }];
        assert!(verify_partition(&hunks, &missing).is_err());
    }

    #[test]
    fn prompt_carries_hunk_and_guidance() {
        let prompt = grouping_prompt(&entry("a"), Some("keep tests separate")).unwrap();
        assert!(prompt.contains("\"filePath\": \"src/a.rs\""));
        assert!(prompt.contains("keep tests separate"));
        let prompt = grouping_prompt(&entry("a"), Some("  ")).unwrap();
        assert!(!prompt.contains("guidance for splitting"));
    }
}
