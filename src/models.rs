//! Core data models used throughout the splitter.
//!
//! These types represent the hunks, groups, and pull request metadata that
//! flow through the parse → vectorize → group → reconstruct pipeline.

use serde::{Deserialize, Serialize};

/// How a hunk is presented to the oracles. Only `Text` content is ever
/// sent to a language model verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HunkType {
    Text,
    Binary,
    Unrecognized,
}

impl HunkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            HunkType::Text => "text",
            HunkType::Binary => "binary",
            HunkType::Unrecognized => "unrecognized",
        }
    }
}

/// What happened to the file a hunk belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Added,
    Deleted,
    Modified,
    Renamed,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Added => "added",
            Operation::Deleted => "deleted",
            Operation::Modified => "modified",
            Operation::Renamed => "renamed",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `@@` hunk of a text file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextHunk {
    pub file_path: String,
    /// Set only when the file was renamed.
    pub previous_file_path: Option<String>,
    pub operation: Operation,
    /// Header + this hunk's lines + exactly one trailing newline.
    pub complete_patch: String,
    /// File header lines (`diff --git`, `index`, `---`, `+++`, ...).
    pub header: String,
    /// Hunk body including the `@@` line.
    pub content: String,
    pub lines_added: u32,
    pub lines_removed: u32,
    /// Position of this hunk within its file.
    pub index: usize,
}

/// A whole-file patch that is not split into `@@` hunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePatch {
    pub file_path: String,
    pub previous_file_path: Option<String>,
    pub operation: Operation,
    pub complete_patch: String,
}

/// A hunk as produced by the diff parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedHunk {
    Text(TextHunk),
    Binary(FilePatch),
    Unrecognized(FilePatch),
}

impl ParsedHunk {
    pub fn hunk_type(&self) -> HunkType {
        match self {
            ParsedHunk::Text(_) => HunkType::Text,
            ParsedHunk::Binary(_) => HunkType::Binary,
            ParsedHunk::Unrecognized(_) => HunkType::Unrecognized,
        }
    }

    pub fn file_path(&self) -> &str {
        match self {
            ParsedHunk::Text(h) => &h.file_path,
            ParsedHunk::Binary(p) | ParsedHunk::Unrecognized(p) => &p.file_path,
        }
    }

    pub fn previous_file_path(&self) -> Option<&str> {
        match self {
            ParsedHunk::Text(h) => h.previous_file_path.as_deref(),
            ParsedHunk::Binary(p) | ParsedHunk::Unrecognized(p) => p.previous_file_path.as_deref(),
        }
    }

    pub fn operation(&self) -> Operation {
        match self {
            ParsedHunk::Text(h) => h.operation,
            ParsedHunk::Binary(p) | ParsedHunk::Unrecognized(p) => p.operation,
        }
    }

    pub fn complete_patch(&self) -> &str {
        match self {
            ParsedHunk::Text(h) => &h.complete_patch,
            ParsedHunk::Binary(p) | ParsedHunk::Unrecognized(p) => &p.complete_patch,
        }
    }

    pub fn as_text(&self) -> Option<&TextHunk> {
        match self {
            ParsedHunk::Text(h) => Some(h),
            _ => None,
        }
    }
}

/// The canonical, post-vectorization form of a hunk.
///
/// `hash` is the identity used by grouping, plan files, and reconstruction.
/// The embedding is never written to plan files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorHunkEntry {
    #[serde(rename = "type")]
    pub hunk_type: HunkType,
    pub file_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_file_path: Option<String>,
    pub operation: Operation,
    /// Display/search content (hunk body, or a placeholder for opaque content).
    pub content: String,
    /// Search text that was embedded.
    pub summary: String,
    #[serde(default, skip_serializing)]
    pub embedding: Vec<f32>,
    pub complete_patch: String,
    pub lines_added: u32,
    pub lines_removed: u32,
    pub hash: String,
}

impl VectorHunkEntry {
    /// Paths that must be staged when this hunk is committed.
    pub fn touched_paths(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.file_path.as_str()).chain(self.previous_file_path.as_deref())
    }

    pub fn changed_lines(&self) -> u32 {
        self.lines_added + self.lines_removed
    }
}

/// A named cluster of hunks that becomes one commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HunkGroup {
    pub description: String,
    pub hunks: Vec<VectorHunkEntry>,
}

impl HunkGroup {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            hunks: Vec::new(),
        }
    }

    pub fn lines_added(&self) -> u32 {
        self.hunks.iter().map(|h| h.lines_added).sum()
    }

    pub fn lines_removed(&self) -> u32 {
        self.hunks.iter().map(|h| h.lines_removed).sum()
    }
}

/// A group after its commit has been created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommittedHunkGroup {
    pub hunk_group: HunkGroup,
    pub branch_name: String,
    pub commit_sha: String,
}

/// Result of applying one hunk to the working tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HunkApplication {
    Applied {
        message: String,
    },
    Conflict {
        message: String,
        conflict_details: String,
    },
}

/// Per-file aggregate of text hunks, input to the classifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStatistics {
    pub file_path: String,
    pub lines_added: u32,
    pub lines_removed: u32,
    pub sample: String,
    pub hunks: Vec<TextHunk>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileTag {
    Opaque,
    Summarizable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStatisticsAndTag {
    pub stats: FileStatistics,
    pub tag: FileTag,
}

/// Owner/repo/number parsed from a pull request URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestInfo {
    pub owner: String,
    pub repo: String,
    pub number: u64,
    /// Clone URL, token-authenticated when a token was supplied.
    pub repo_url: String,
}

/// Pull request metadata fetched from GitHub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnhancedPullRequestInfo {
    pub info: PullRequestInfo,
    pub base_branch: String,
    pub head_branch: String,
    pub base_sha: String,
    pub head_sha: String,
    pub link: String,
    pub title: String,
    pub description: String,
}

/// What the reconstructor needs to know about the pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequestRef {
    pub number: u64,
    pub base_sha: String,
    pub head_sha: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

impl From<&EnhancedPullRequestInfo> for PullRequestRef {
    fn from(pr: &EnhancedPullRequestInfo) -> Self {
        Self {
            number: pr.info.number,
            base_sha: pr.base_sha.clone(),
            head_sha: pr.head_sha.clone(),
            owner: Some(pr.info.owner.clone()),
            repo: Some(pr.info.repo.clone()),
            base_branch: Some(pr.base_branch.clone()),
            link: Some(pr.link.clone()),
        }
    }
}
