//! GitHub REST boundary: pull request URLs, metadata, and the chain of
//! split pull requests.
//!
//! Authentication uses `GITHUB_TOKEN` when set. Reads work anonymously for
//! public repositories; creating and closing pull requests need the token.

use anyhow::{bail, Result};
use regex::Regex;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::OnceLock;
use std::time::Duration;

use crate::models::{CommittedHunkGroup, EnhancedPullRequestInfo, PullRequestInfo};
use crate::retry::{read_json, with_retry, CallError, RetryPolicy};

pub const GITHUB_TOKEN_VAR: &str = "GITHUB_TOKEN";
const API_BASE: &str = "https://api.github.com";
const USER_AGENT: &str = "pr-splitter";

fn pull_request_url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"github\.com/([^/]+)/([^/]+)/pull/(\d+)").expect("valid regex"))
}

/// Parse `https://github.com/<owner>/<repo>/pull/<n>`.
pub fn parse_pull_request_url(url: &str, token: Option<&str>) -> Result<PullRequestInfo> {
    let Some(caps) = pull_request_url_regex().captures(url) else {
        bail!("Unsupported PR URL format. Please provide a GitHub PR URL.");
    };
    let owner = caps[1].to_string();
    let repo = caps[2].to_string();
    let number: u64 = caps[3].parse()?;
    let repo_url = match token.filter(|t| !t.is_empty()) {
        Some(token) => format!("https://{}@github.com/{}/{}.git", token, owner, repo),
        None => format!("https://github.com/{}/{}.git", owner, repo),
    };
    Ok(PullRequestInfo {
        owner,
        repo,
        number,
        repo_url,
    })
}

/// Body of a pull request to open for one committed group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewPullRequest {
    pub title: String,
    pub body: String,
    pub head: String,
    pub base: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreatedPullRequest {
    pub number: u64,
    pub url: String,
    pub head: String,
}

/// One pull request per group, each based on the previous group's branch.
pub fn split_pull_requests(
    pr: &EnhancedPullRequestInfo,
    committed: &[CommittedHunkGroup],
) -> Vec<NewPullRequest> {
    let mut drafts: Vec<NewPullRequest> = Vec::with_capacity(committed.len());
    for (i, group) in committed.iter().enumerate() {
        let base = match drafts.last() {
            Some(prev) => prev.head.clone(),
            None => pr.base_branch.clone(),
        };
        drafts.push(NewPullRequest {
            title: format!("Pull request #{}: Split {}", pr.info.number, i + 1),
            body: format!(
                "### Description:\n\n{}\n\n[Link to original pull request]({}).",
                group.hunk_group.description, pr.link
            ),
            head: group.branch_name.clone(),
            base,
        });
    }
    drafts
}

pub fn closing_body(created: &[CreatedPullRequest]) -> String {
    let links: Vec<String> = created.iter().map(|pr| format!("- {}", pr.url)).collect();
    format!(
        "This pull request has been split into {} smaller pull requests. The original pull request has been closed.\n\n{}",
        created.len(),
        links.join("\n")
    )
}

pub struct GitHubClient {
    client: reqwest::Client,
    token: Option<String>,
    api_base: String,
    retry: RetryPolicy,
}

impl GitHubClient {
    pub fn new(token: Option<String>, retry: RetryPolicy) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            token: token.filter(|t| !t.is_empty()),
            api_base: API_BASE.to_string(),
            retry,
        })
    }

    /// Read the token from `GITHUB_TOKEN`.
    pub fn from_env(retry: RetryPolicy) -> Result<Self> {
        Self::new(std::env::var(GITHUB_TOKEN_VAR).ok(), retry)
    }

    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    fn require_token(&self, action: &str) -> Result<()> {
        if self.token.is_none() {
            bail!("{} environment variable is required to {}", GITHUB_TOKEN_VAR, action);
        }
        Ok(())
    }

    async fn send(&self, method: reqwest::Method, path: &str, body: Option<&Value>) -> Result<Value> {
        let url = format!("{}{}", self.api_base, path);
        let client = &self.client;
        let token = self.token.as_deref();
        let url = url.as_str();
        let operation = format!("GitHub {} {}", method, path);

        with_retry(&self.retry, &operation, move || {
            let method = method.clone();
            async move {
                let mut request = client
                    .request(method, url)
                    .header("Accept", "application/vnd.github+json")
                    .header("X-GitHub-Api-Version", "2022-11-28");
                if let Some(token) = token {
                    request = request.bearer_auth(token);
                }
                if let Some(body) = body {
                    request = request.json(body);
                }
                let response = request.send().await.map_err(CallError::from)?;
                read_json("GitHub", response).await
            }
        })
        .await
    }

    /// Confirm the token authenticates.
    pub async fn verify_token(&self) -> Result<String> {
        self.require_token("verify GitHub access")?;
        let user = self.send(reqwest::Method::GET, "/user", None).await?;
        Ok(str_field(&user, &["login"]).unwrap_or_default())
    }

    /// Fetch branch names, shas and description of a pull request.
    ///
    /// The base sha is the parent of the pull request's first commit, which
    /// stays correct when the base branch has moved on since.
    pub async fn fetch_pull_request(&self, info: PullRequestInfo) -> Result<EnhancedPullRequestInfo> {
        let path = format!("/repos/{}/{}/pulls/{}", info.owner, info.repo, info.number);
        let pr = self.send(reqwest::Method::GET, &path, None).await?;
        let commits = self
            .send(reqwest::Method::GET, &format!("{}/commits", path), None)
            .await?;
        enhance(info, &pr, &commits)
    }

    pub async fn create_pull_request(
        &self,
        owner: &str,
        repo: &str,
        draft: &NewPullRequest,
    ) -> Result<CreatedPullRequest> {
        self.require_token("create pull requests")?;
        let body = json!({
            "title": draft.title,
            "body": draft.body,
            "head": draft.head,
            "base": draft.base,
        });
        let path = format!("/repos/{}/{}/pulls", owner, repo);
        let created = self.send(reqwest::Method::POST, &path, Some(&body)).await?;
        Ok(CreatedPullRequest {
            number: created.get("number").and_then(|n| n.as_u64()).unwrap_or(0),
            url: str_field(&created, &["html_url"]).unwrap_or_default(),
            head: draft.head.clone(),
        })
    }

    /// Open the chained pull requests, in group order.
    pub async fn create_split_pull_requests(
        &self,
        pr: &EnhancedPullRequestInfo,
        committed: &[CommittedHunkGroup],
    ) -> Result<Vec<CreatedPullRequest>> {
        let mut created = Vec::with_capacity(committed.len());
        for draft in split_pull_requests(pr, committed) {
            let result = self.create_pull_request(&pr.info.owner, &pr.info.repo, &draft).await?;
            tracing::info!(number = result.number, url = %result.url, base = %draft.base, "pull request created");
            created.push(result);
        }
        Ok(created)
    }

    /// Close the original pull request, listing its replacements.
    pub async fn close_original(
        &self,
        pr: &EnhancedPullRequestInfo,
        created: &[CreatedPullRequest],
    ) -> Result<()> {
        self.require_token("close the original pull request")?;
        let body = json!({
            "body": closing_body(created),
            "state": "closed",
        });
        let path = format!("/repos/{}/{}/pulls/{}", pr.info.owner, pr.info.repo, pr.info.number);
        self.send(reqwest::Method::PATCH, &path, Some(&body)).await?;
        tracing::info!(number = pr.info.number, "original pull request closed");
        Ok(())
    }
}

fn str_field(value: &Value, path: &[&str]) -> Option<String> {
    let mut current = value;
    for key in path {
        current = current.get(*key)?;
    }
    current.as_str().map(str::to_string)
}

pub(crate) fn enhance(info: PullRequestInfo, pr: &Value, commits: &Value) -> Result<EnhancedPullRequestInfo> {
    let required = |path: &[&str]| {
        str_field(pr, path)
            .ok_or_else(|| anyhow::anyhow!("GitHub pull request response is missing {}", path.join(".")))
    };
    let base_sha = commits
        .get(0)
        .and_then(|c| c.get("parents"))
        .and_then(|p| p.get(0))
        .and_then(|p| p.get("sha"))
        .and_then(|s| s.as_str())
        .ok_or_else(|| anyhow::anyhow!("Pull request #{} has no commits with a parent", info.number))?
        .to_string();

    Ok(EnhancedPullRequestInfo {
        base_branch: required(&["base", "ref"])?,
        head_branch: required(&["head", "ref"])?,
        base_sha,
        head_sha: required(&["head", "sha"])?,
        link: required(&["html_url"])?,
        title: str_field(pr, &["title"]).unwrap_or_default(),
        description: str_field(pr, &["body"]).unwrap_or_default(),
        info,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::HunkGroup;

    #[test]
    fn parses_pull_request_urls() {
        let info = parse_pull_request_url("https://github.com/acme/widgets/pull/42", None).unwrap();
        assert_eq!(info.owner, "acme");
        assert_eq!(info.repo, "widgets");
        assert_eq!(info.number, 42);
        assert_eq!(info.repo_url, "https://github.com/acme/widgets.git");

        let info = parse_pull_request_url("https://github.com/acme/widgets/pull/7/files", Some("tok")).unwrap();
        assert_eq!(info.number, 7);
        assert_eq!(info.repo_url, "https://tok@github.com/acme/widgets.git");
    }

    #[test]
    fn rejects_other_urls() {
        for url in [
            "https://gitlab.com/acme/widgets/-/merge_requests/1",
            "https://github.com/acme/widgets/issues/3",
            "not a url",
        ] {
            let err = parse_pull_request_url(url, None).unwrap_err();
            assert!(err.to_string().contains("Unsupported PR URL format"));
        }
    }

    fn enhanced() -> EnhancedPullRequestInfo {
        EnhancedPullRequestInfo {
            info: parse_pull_request_url("https://github.com/acme/widgets/pull/42", None).unwrap(),
            base_branch: "main".to_string(),
            head_branch: "feature".to_string(),
            base_sha: "b".repeat(40),
            head_sha: "h".repeat(40),
            link: "https://github.com/acme/widgets/pull/42".to_string(),
            title: "Big change".to_string(),
            description: String::new(),
        }
    }

    fn committed(k: usize, description: &str) -> CommittedHunkGroup {
        CommittedHunkGroup {
            hunk_group: HunkGroup::new(description),
            branch_name: format!("pr-splitter/pr#42-group#{}", k),
            commit_sha: format!("{:040}", k),
        }
    }

    #[test]
    fn split_pull_requests_chain_bases() {
        let drafts = split_pull_requests(&enhanced(), &[committed(1, "parser"), committed(2, "cli")]);
        assert_eq!(drafts.len(), 2);
        assert_eq!(drafts[0].base, "main");
        assert_eq!(drafts[0].head, "pr-splitter/pr#42-group#1");
        assert_eq!(drafts[1].base, "pr-splitter/pr#42-group#1");
        assert_eq!(drafts[1].title, "Pull request #42: Split 2");
        assert_eq!(
            drafts[0].body,
            "### Description:\n\nparser\n\n[Link to original pull request](https://github.com/acme/widgets/pull/42)."
        );
    }

    #[test]
    fn closing_body_lists_links() {
        let created = vec![
            CreatedPullRequest {
                number: 43,
                url: "https://github.com/acme/widgets/pull/43".to_string(),
                head: "a".to_string(),
            },
            CreatedPullRequest {
                number: 44,
                url: "https://github.com/acme/widgets/pull/44".to_string(),
                head: "b".to_string(),
            },
        ];
        let body = closing_body(&created);
        assert!(body.starts_with("This pull request has been split into 2 smaller pull requests."));
        assert!(body.ends_with("- https://github.com/acme/widgets/pull/43\n- https://github.com/acme/widgets/pull/44"));
    }

    #[test]
    fn enhance_reads_first_commit_parent() {
        let info = parse_pull_request_url("https://github.com/acme/widgets/pull/42", None).unwrap();
        let pr = json!({
            "base": {"ref": "main", "sha": "moved"},
            "head": {"ref": "feature", "sha": "headsha"},
            "html_url": "https://github.com/acme/widgets/pull/42",
            "title": "Big change",
            "body": null
        });
        let commits = json!([
            {"sha": "c1", "parents": [{"sha": "forkpoint"}]},
            {"sha": "c2", "parents": [{"sha": "c1"}]}
        ]);
        let enhanced = enhance(info.clone(), &pr, &commits).unwrap();
        assert_eq!(enhanced.base_sha, "forkpoint");
        assert_eq!(enhanced.head_sha, "headsha");
        assert_eq!(enhanced.base_branch, "main");
        assert_eq!(enhanced.description, "");

        assert!(enhance(info, &pr, &json!([])).is_err());
    }

    #[tokio::test]
    async fn writes_need_a_token() {
        let client = GitHubClient::new(None, RetryPolicy::none()).unwrap();
        let err = client.close_original(&enhanced(), &[]).await.unwrap_err();
        assert!(err.to_string().contains(GITHUB_TOKEN_VAR));
    }
}
