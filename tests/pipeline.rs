use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use std::fs;
use std::path::Path;
use std::process::Command;
use std::sync::Mutex;
use tempfile::TempDir;

use pr_splitter::config::Config;
use pr_splitter::embedding::Embedder;
use pr_splitter::git::GitRepo;
use pr_splitter::grouping::verify_partition;
use pr_splitter::models::{HunkType, PullRequestRef};
use pr_splitter::oracle::{OracleRequest, OracleResponse, ReasoningOracle, ToolBox};
use pr_splitter::progress::NoProgress;
use pr_splitter::split::{plan_from_diff, run_apply};
use pr_splitter::usage::{ModelTier, TokenUsage};

fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap_or_else(|e| panic!("failed to run git {:?}: {}", args, e));
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

fn numbered(prefix: &str, n: usize) -> String {
    (1..=n).map(|i| format!("{} {}\n", prefix, i)).collect()
}

fn setup_repo() -> (TempDir, String, String) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    git(root, &["init", "-q"]);
    git(root, &["config", "user.email", "splitter@example.com"]);
    git(root, &["config", "user.name", "Splitter Test"]);
    git(root, &["config", "commit.gpgsign", "false"]);

    fs::create_dir_all(root.join("src")).unwrap();
    fs::create_dir_all(root.join("docs")).unwrap();
    fs::write(root.join("Cargo.toml"), "[dependencies]\nserde = \"1\"\n").unwrap();
    fs::write(root.join("Cargo.lock"), numbered("checksum", 40)).unwrap();
    fs::write(root.join("src/parser.rs"), numbered("// parser line", 40)).unwrap();
    fs::write(root.join("docs/guide.md"), "# Guide\n\nHow to parse.\n").unwrap();
    git(root, &["add", "-A"]);
    git(root, &["commit", "-q", "-m", "base"]);
    let base = git(root, &["rev-parse", "HEAD"]);

    fs::write(
        root.join("Cargo.toml"),
        "[dependencies]\nserde = \"1\"\nregex = \"1\"\n",
    )
    .unwrap();
    let lock = numbered("checksum", 40)
        .replace("checksum 3\n", "checksum 3\nregex 1.10\n")
        .replace("checksum 35\n", "checksum 35\nregex-syntax 0.8\n");
    fs::write(root.join("Cargo.lock"), lock).unwrap();
    let parser = numbered("// parser line", 40)
        .replace("// parser line 2\n", "use regex::Regex;\n// parser line 2\n")
        .replace("// parser line 38\n", "// parser line 38 (uses Regex)\n");
    fs::write(root.join("src/parser.rs"), parser).unwrap();
    fs::write(root.join("docs/guide.md"), "# Guide\n\nHow to parse with regular expressions.\n").unwrap();
    git(root, &["add", "-A"]);
    git(root, &["commit", "-q", "-m", "head"]);
    let head = git(root, &["rev-parse", "HEAD"]);

    (tmp, base, head)
}

fn between<'a>(text: &'a str, start: &str, end: &str) -> &'a str {
    let from = text.find(start).unwrap_or_else(|| panic!("missing {:?}", start)) + start.len();
    let rest = &text[from..];
    &rest[..rest.find(end).unwrap_or(rest.len())]
}

/// Manifest and lockfile go together; everything else groups by top-level directory.
fn topic(path: &str) -> &'static str {
    if path.starts_with("Cargo.") {
        "dependencies"
    } else if path.starts_with("docs/") {
        "documentation"
    } else {
        "source"
    }
}

/// Answers every prompt the pipeline sends, by prompt shape.
#[derive(Default)]
struct ScriptedOracle {
    classified: Mutex<Vec<String>>,
    summarized: Mutex<Vec<String>>,
}

#[async_trait]
impl ReasoningOracle for ScriptedOracle {
    async fn run(&self, request: &OracleRequest, tools: &mut dyn ToolBox) -> Result<OracleResponse> {
        let names: Vec<String> = tools.definitions().into_iter().map(|d| d.name).collect();
        let mut text = String::new();

        if request.tier == ModelTier::Premium {
            // Refinement: leave the groups as they are.
            tools.call("listGroups", json!({})).await;
        } else if names.iter().any(|n| n == "setIsHumanReadable") {
            let path = between(&request.prompt, "The name of the file is ", ". There are").to_string();
            let readable = !path.ends_with(".lock");
            tools.call("setIsHumanReadable", json!({"humanReadable": readable})).await;
            self.classified.lock().unwrap().push(path);
        } else if names.is_empty() {
            let path = between(&request.prompt, "File: ", "\n").to_string();
            text = format!("{} change in {}", topic(&path), path);
            self.summarized.lock().unwrap().push(path);
        } else {
            let path = between(&request.prompt, "\"filePath\": \"", "\"").to_string();
            let wanted = topic(&path);
            let listing = tools.call("listGroups", json!({})).await;
            let mut id = None;
            let mut last_id = None;
            for line in listing.lines() {
                if let Some(found) = line.strip_prefix("Group ID: ") {
                    last_id = Some(found.to_string());
                } else if line.trim() == format!("Description: {}", wanted) {
                    id = last_id.clone();
                }
            }
            let id = match id {
                Some(id) => id,
                None => tools
                    .call("createGroup", json!({"description": wanted}))
                    .await
                    .trim_start_matches("Created new group with id ")
                    .to_string(),
            };
            tools.call("addToGroup", json!({"groupId": id})).await;
        }

        Ok(OracleResponse {
            text,
            steps: 1,
            tool_calls: 1,
            usage: TokenUsage::new(10, 1),
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
        Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
    }
}

#[tokio::test]
async fn plan_and_apply_reproduce_head() {
    let (tmp, base, head) = setup_repo();
    let root = tmp.path();
    let repo = GitRepo::open(root, "origin").unwrap();
    let diff = repo.diff(&base, &head).unwrap();

    let oracle = ScriptedOracle::default();
    let config = Config::default();
    let pull_request = PullRequestRef {
        number: 9,
        base_sha: base.clone(),
        head_sha: head.clone(),
        owner: None,
        repo: None,
        base_branch: None,
        link: None,
    };
    let plan = plan_from_diff(
        &diff,
        pull_request,
        &config,
        Some("keep docs separate"),
        &oracle,
        &Constant,
        &NoProgress,
    )
    .await
    .unwrap();

    // Every text file is classified; only readable hunks are summarized.
    let mut classified = oracle.classified.lock().unwrap().clone();
    classified.sort();
    assert_eq!(classified, vec!["Cargo.lock", "Cargo.toml", "docs/guide.md", "src/parser.rs"]);
    let summarized = oracle.summarized.lock().unwrap().clone();
    assert!(!summarized.iter().any(|p| p == "Cargo.lock"));
    assert_eq!(summarized.iter().filter(|p| *p == "src/parser.rs").count(), 2);

    let descriptions: Vec<&str> = plan.groups.iter().map(|g| g.description.as_str()).collect();
    assert_eq!(descriptions, vec!["dependencies", "documentation", "source"]);

    // The lockfile's two hunks arrive as one combined entry.
    let lock: Vec<_> = plan.groups[0]
        .hunks
        .iter()
        .filter(|h| h.file_path == "Cargo.lock")
        .collect();
    assert_eq!(lock.len(), 1);
    assert_eq!(lock[0].hunk_type, HunkType::Text);
    assert_eq!(lock[0].content, "[Removed 12 lines, added 14 lines, in Cargo.lock]");

    let all: Vec<_> = plan.groups.iter().flat_map(|g| g.hunks.clone()).collect();
    verify_partition(&all, &plan.groups).unwrap();
    assert!(plan.usage.get(ModelTier::Standard).prompt_tokens > 0);
    assert_eq!(plan.usage.get(ModelTier::Premium), TokenUsage::new(10, 1));

    // Outside the worktree: apply refuses untracked files.
    let plan_dir = TempDir::new().unwrap();
    let plan_path = plan_dir.path().join("plan.json");
    plan.save(&plan_path).unwrap();
    let committed = run_apply(&config, &plan_path, root, false, &NoProgress).unwrap();

    assert_eq!(committed.len(), 3);
    assert_eq!(committed[2].branch_name, "pr-splitter/pr#9-group#3");
    assert_eq!(
        git(root, &["rev-parse", &format!("{}^{{tree}}", committed[2].commit_sha)]),
        git(root, &["rev-parse", &format!("{}^{{tree}}", head)])
    );
    assert_eq!(
        git(root, &["diff", "--name-only", &base, &committed[0].commit_sha]),
        "Cargo.lock\nCargo.toml"
    );
}

#[tokio::test]
async fn apply_refuses_a_dirty_tree() {
    let (tmp, base, head) = setup_repo();
    let root = tmp.path();
    let repo = GitRepo::open(root, "origin").unwrap();
    let diff = repo.diff(&base, &head).unwrap();
    let pull_request = PullRequestRef {
        number: 9,
        base_sha: base,
        head_sha: head.clone(),
        owner: None,
        repo: None,
        base_branch: None,
        link: None,
    };
    let config = Config::default();
    let plan = plan_from_diff(
        &diff,
        pull_request,
        &config,
        None,
        &ScriptedOracle::default(),
        &Constant,
        &NoProgress,
    )
    .await
    .unwrap();
    let plan_dir = TempDir::new().unwrap();
    let plan_path = plan_dir.path().join("plan.json");
    plan.save(&plan_path).unwrap();

    fs::write(root.join("docs/guide.md"), "UNCOMMITTED WORK\n").unwrap();
    let err = run_apply(&config, &plan_path, root, false, &NoProgress).unwrap_err();
    assert!(err.to_string().contains("uncommitted changes"), "{}", err);

    assert_eq!(fs::read_to_string(root.join("docs/guide.md")).unwrap(), "UNCOMMITTED WORK\n");
    assert_eq!(git(root, &["rev-parse", "HEAD"]), head);
    assert_eq!(git(root, &["branch", "--list", "pr-splitter/*"]), "");
}
