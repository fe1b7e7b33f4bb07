//! Git subprocess boundary and commit-chain reconstruction.
//!
//! Everything goes through the `git` binary. Each group becomes one commit
//! on its own branch, based on the previous group's commit:
//!
//! ```text
//! base ── group#1 ── group#2 ── … ── group#n   (tree of group#n == head)
//! ```
//!
//! Branches are named `<prefix>/pr#<N>-group#<k>`.

use anyhow::{bail, Context, Result};
use std::borrow::Cow;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use crate::error::SplitError;
use crate::models::{CommittedHunkGroup, HunkApplication, HunkGroup, PullRequestRef, VectorHunkEntry};
use crate::progress::{SplitProgressEvent, SplitProgressReporter};

/// A local clone the reconstructor owns for the duration of a run.
#[derive(Debug, Clone)]
pub struct GitRepo {
    dir: PathBuf,
    remote: String,
}

impl GitRepo {
    /// Open an existing working tree.
    pub fn open(dir: &Path, remote: &str) -> Result<Self> {
        let repo = Self {
            dir: dir.to_path_buf(),
            remote: remote.to_string(),
        };
        repo.git(&["rev-parse", "--git-dir"], "rev-parse")
            .with_context(|| format!("{} is not a git repository", dir.display()))?;
        Ok(repo)
    }

    /// Clone `url` into `dest`.
    pub fn clone_from(url: &str, dest: &Path, remote: &str) -> Result<Self> {
        std::fs::create_dir_all(dest)
            .with_context(|| format!("Failed to create work directory: {}", dest.display()))?;

        let output = Command::new("git")
            .args(["clone", "--origin", remote, url])
            .arg(dest)
            .output()
            .with_context(|| "Failed to execute 'git clone'. Is git installed?")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("git clone failed: {}", stderr.trim());
        }

        Ok(Self {
            dir: dest.to_path_buf(),
            remote: remote.to_string(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Fetch the pull request head as `pr-<N>` and the base branch.
    pub fn fetch_pull_request(&self, number: u64, base_branch: &str) -> Result<()> {
        let head_ref = format!("pull/{}/head:pr-{}", number, number);
        self.git(&["fetch", &self.remote, &head_ref], "fetch")?;
        self.git(&["fetch", &self.remote, base_branch], "fetch")?;
        Ok(())
    }

    pub fn rev_parse(&self, rev: &str) -> Result<String> {
        let out = self.git(&["rev-parse", "--verify", &format!("{}^{{commit}}", rev)], "rev-parse")?;
        Ok(stdout_string(&out).trim().to_string())
    }

    /// `git diff --binary base..head`.
    pub fn diff(&self, base: &str, head: &str) -> Result<String> {
        let range = format!("{}..{}", base, head);
        let out = self.git(&["diff", "--binary", &range], "diff")?;
        Ok(stdout_string(&out))
    }

    /// Fail unless `git status` is empty, untracked files included.
    /// Reconstruction resets the tree and cleans paths, so local work would be lost.
    pub fn ensure_clean(&self) -> Result<()> {
        let out = self.git(&["status", "--porcelain"], "status")?;
        let status = stdout_string(&out);
        if !status.trim().is_empty() {
            bail!(
                "Working tree at {} has uncommitted changes; commit or stash them first:\n{}",
                self.dir.display(),
                status.trim_end()
            );
        }
        Ok(())
    }

    /// Whether `path` is in the index.
    pub fn is_tracked(&self, path: &str) -> Result<bool> {
        let out = self.git(&["ls-files", "--", path], "ls-files")?;
        Ok(!stdout_string(&out).trim().is_empty())
    }

    /// Create or reset `branch` at `start` and check it out.
    pub fn checkout_branch(&self, branch: &str, start: &str) -> Result<()> {
        self.git(&["checkout", "-B", branch, start], "checkout")?;
        Ok(())
    }

    pub fn reset_hard(&self, rev: &str) -> Result<()> {
        self.git(&["reset", "--hard", rev], "reset")?;
        Ok(())
    }

    /// Check, then apply, one patch. A rejected patch is a
    /// [`HunkApplication::Conflict`], not an `Err`.
    pub fn apply_patch(&self, patch: &str, file_path: &str) -> Result<HunkApplication> {
        let mut file = tempfile::Builder::new()
            .prefix("pr-splitter-")
            .suffix(".patch")
            .tempfile()
            .with_context(|| "Failed to create patch file")?;
        file.write_all(patch.as_bytes())?;
        file.flush()?;
        let patch_path = file.path().to_string_lossy().to_string();

        for args in [vec!["apply", "--check", patch_path.as_str()], vec!["apply", patch_path.as_str()]] {
            let output = self.command(&args)?;
            if !output.status.success() {
                return Ok(HunkApplication::Conflict {
                    message: format!("Failed to apply hunk to {}", file_path),
                    conflict_details: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                });
            }
        }

        Ok(HunkApplication::Applied {
            message: format!("Applied hunk to {}", file_path),
        })
    }

    /// Stage exactly these paths, including deletions. Paths that are
    /// neither on disk nor in the index are skipped.
    pub fn stage(&self, paths: &[&str]) -> Result<()> {
        let mut args = vec!["add", "-A", "--"];
        for &path in paths {
            if self.dir.join(path).exists() || self.is_tracked(path)? {
                args.push(path);
            }
        }
        if args.len() > 3 {
            self.git(&args, "add")?;
        }
        Ok(())
    }

    /// Remove untracked files left behind at these paths.
    pub fn clean_paths(&self, paths: &[&str]) -> Result<()> {
        let mut args = vec!["clean", "-fdq", "--"];
        args.extend_from_slice(paths);
        self.git(&args, "clean")?;
        Ok(())
    }

    /// Commit what is staged and return the new sha.
    pub fn commit(&self, message: &str) -> Result<String> {
        self.git(&["commit", "-m", message], "commit")?;
        self.rev_parse("HEAD")
    }

    pub fn push(&self, branch: &str) -> Result<()> {
        self.git(&["push", &self.remote, branch, "--force", "--set-upstream"], "push")?;
        Ok(())
    }

    fn command(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.dir)
            .output()
            .with_context(|| format!("Failed to execute 'git {}'", args.first().unwrap_or(&"")))
    }

    fn git(&self, args: &[&str], what: &str) -> Result<Output> {
        let output = self.command(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("git {} failed: {}", what, stderr.trim());
        }
        Ok(output)
    }
}

fn stdout_string(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

/// Distinct paths a group's hunks touch, previous paths of renames included.
fn touched_paths(group: &HunkGroup) -> Vec<&str> {
    let mut paths: Vec<&str> = Vec::new();
    for path in group.hunks.iter().flat_map(|h| h.touched_paths()) {
        if !paths.contains(&path) {
            paths.push(path);
        }
    }
    paths
}

/// Header lines that only make sense while the old path still exists.
const RENAME_HEADER_LINES: [&str; 4] = ["similarity index ", "dissimilarity index ", "rename from ", "rename to "];

/// Rewrite a rename patch as a plain modification of `file_path`.
fn as_modification(patch: &str, file_path: &str) -> String {
    let mut out = String::with_capacity(patch.len());
    let mut in_header = true;
    for line in patch.split_inclusive('\n') {
        if in_header {
            if line.starts_with("@@") {
                in_header = false;
            } else if line.starts_with("diff --git ") {
                out.push_str(&format!("diff --git a/{0} b/{0}\n", file_path));
                continue;
            } else if line.starts_with("--- ") {
                out.push_str(&format!("--- a/{}\n", file_path));
                continue;
            } else if RENAME_HEADER_LINES.iter().any(|p| line.starts_with(p)) {
                continue;
            }
        }
        out.push_str(line);
    }
    out
}

/// Every hunk of a renamed file carries the rename header. Only the first
/// one applied may perform the rename; later ones modify the new path.
fn patch_for<'a>(repo: &GitRepo, hunk: &'a VectorHunkEntry) -> Cow<'a, str> {
    match hunk.previous_file_path.as_deref() {
        Some(previous)
            if previous != hunk.file_path
                && !repo.dir().join(previous).exists()
                && repo.dir().join(&hunk.file_path).exists() =>
        {
            Cow::Owned(as_modification(&hunk.complete_patch, &hunk.file_path))
        }
        _ => Cow::Borrowed(&hunk.complete_patch),
    }
}

pub fn branch_name(prefix: &str, number: u64, k: usize) -> String {
    format!("{}/pr#{}-group#{}", prefix, number, k)
}

/// Replay `groups` as a commit chain starting at the pull request's base.
///
/// The working tree must be clean. The first rejected patch aborts the run with
/// [`SplitError::HunkApplication`]; the group's paths are reset and cleaned
/// and no commit is made for that group. Branches of earlier groups stay in place.
pub fn commit_groups(
    repo: &GitRepo,
    pr: &PullRequestRef,
    groups: &[HunkGroup],
    branch_prefix: &str,
    progress: &dyn SplitProgressReporter,
) -> Result<Vec<CommittedHunkGroup>> {
    repo.ensure_clean()?;
    let total = groups.len() as u64;
    let mut cursor = pr.base_sha.clone();
    let mut committed = Vec::with_capacity(groups.len());

    for (i, group) in groups.iter().enumerate() {
        let branch = branch_name(branch_prefix, pr.number, i + 1);
        repo.checkout_branch(&branch, &cursor)?;
        repo.reset_hard(&cursor)?;

        for hunk in &group.hunks {
            match repo.apply_patch(&patch_for(repo, hunk), &hunk.file_path)? {
                HunkApplication::Applied { message } => {
                    tracing::debug!(branch = %branch, hash = %hunk.hash, "{}", message);
                }
                HunkApplication::Conflict {
                    message,
                    conflict_details,
                } => {
                    repo.reset_hard(&cursor)?;
                    repo.clean_paths(&touched_paths(group))?;
                    tracing::warn!(branch = %branch, hash = %hunk.hash, "{}", message);
                    return Err(SplitError::HunkApplication {
                        message,
                        conflict_details,
                    }
                    .into());
                }
            }
        }

        repo.stage(&touched_paths(group))?;
        let sha = repo.commit(&group.description)?;
        tracing::info!(branch = %branch, sha = %sha, hunks = group.hunks.len(), "group committed");
        progress.report(SplitProgressEvent::GroupCommitted {
            n: i as u64 + 1,
            total,
            branch: branch.clone(),
        });

        committed.push(CommittedHunkGroup {
            hunk_group: group.clone(),
            branch_name: branch,
            commit_sha: sha.clone(),
        });
        cursor = sha;
    }

    Ok(committed)
}

/// Force-push every committed branch.
pub fn push_branches(repo: &GitRepo, committed: &[CommittedHunkGroup]) -> Result<()> {
    for group in committed {
        repo.push(&group.branch_name)?;
        tracing::info!(branch = %group.branch_name, "pushed");
    }
    Ok(())
}
