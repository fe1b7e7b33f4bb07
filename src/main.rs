//! # PR Splitter CLI (`pr-splitter`)
//!
//! Splits one large pull request into a chain of smaller, dependency-ordered
//! commits, branches, and (optionally) pull requests.
//!
//! ## Usage
//!
//! ```bash
//! pr-splitter --config ./config/pr-splitter.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `pr-splitter parse <diff>` | List hunks with their identity hashes |
//! | `pr-splitter split <pr-url>` | Plan (and optionally commit, push, open PRs) for a GitHub PR |
//! | `pr-splitter split-local` | Plan (and optionally commit) two revisions of a local repository |
//! | `pr-splitter apply <plan>` | Replay a saved plan as a commit chain |
//!
//! ## Examples
//!
//! ```bash
//! # Inspect a diff
//! git diff --binary main..feature > change.diff
//! pr-splitter parse change.diff
//!
//! # Plan a split, review it, then apply it
//! pr-splitter split-local --repo . --base main --head feature --plan-out plan.json
//! pr-splitter apply plan.json --repo .
//!
//! # Full run against GitHub
//! GITHUB_TOKEN=… OPENAI_API_KEY=… pr-splitter split https://github.com/acme/widgets/pull/42 --create-prs
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use pr_splitter::config;
use pr_splitter::progress::ProgressMode;
use pr_splitter::split::{self, SplitOptions};

/// Split a large pull request into a chain of small, reviewable ones.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. A missing file means built-in defaults.
#[derive(Parser)]
#[command(
    name = "pr-splitter",
    about = "Split a large pull request into a chain of small, reviewable ones",
    version,
    long_about = "pr-splitter parses a pull request's diff into hunks, summarizes and embeds them, \
    lets a language model cluster them into dependency-ordered groups, and replays each group as \
    a commit on its own branch, each based on the previous one."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/pr-splitter.toml`. LLM, embedding, grouping,
    /// and git settings are read from this file. Credentials come from the
    /// environment.
    #[arg(long, global = true, default_value = "./config/pr-splitter.toml")]
    config: PathBuf,

    /// Progress output on stderr: `auto`, `human`, `json`, or `off`.
    #[arg(long, global = true, default_value = "auto")]
    progress: String,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Parse a diff file and list its hunks.
    ///
    /// Prints type, operation, line counts, path, and the 8-character
    /// identity hash of every hunk.
    Parse {
        /// Path to a `git diff --binary` output file.
        diff: PathBuf,

        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Split a GitHub pull request.
    ///
    /// Clones the repository into a fresh work directory, plans the split,
    /// and by default only prints the plan. `--commit`, `--push` and
    /// `--create-prs` progressively publish the result.
    Split {
        /// Pull request URL, e.g. `https://github.com/<owner>/<repo>/pull/<n>`.
        url: String,

        /// Guidance for the grouping model, e.g. "keep migrations separate".
        #[arg(long)]
        instructions: Option<String>,

        /// Write the plan as JSON to this path.
        #[arg(long)]
        plan_out: Option<PathBuf>,

        /// Create the commit chain in the work directory.
        #[arg(long)]
        commit: bool,

        /// Commit and force-push the branches.
        #[arg(long)]
        push: bool,

        /// Commit, push, and open one pull request per group.
        #[arg(long)]
        create_prs: bool,

        /// After opening the new pull requests, close the original.
        #[arg(long)]
        close_original: bool,
    },

    /// Split the difference between two revisions of a local repository.
    ///
    /// With `--commit`, branches are created in the given repository and
    /// the last one is left checked out.
    SplitLocal {
        /// Repository working tree.
        #[arg(long, default_value = ".")]
        repo: PathBuf,

        /// Base revision.
        #[arg(long)]
        base: String,

        /// Head revision.
        #[arg(long)]
        head: String,

        /// Number used in branch names.
        #[arg(long, default_value_t = 0)]
        number: u64,

        /// Guidance for the grouping model.
        #[arg(long)]
        instructions: Option<String>,

        /// Write the plan as JSON to this path.
        #[arg(long)]
        plan_out: Option<PathBuf>,

        /// Create the commit chain.
        #[arg(long)]
        commit: bool,
    },

    /// Replay a saved plan as a commit chain.
    Apply {
        /// Plan file written by `split --plan-out` or `split-local --plan-out`.
        plan: PathBuf,

        /// Repository working tree that contains the plan's base commit.
        #[arg(long, default_value = ".")]
        repo: PathBuf,

        /// Force-push the created branches.
        #[arg(long)]
        push: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pr_splitter=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let progress = ProgressMode::from_flag(&cli.progress)?.reporter();

    match cli.command {
        Commands::Parse { diff, json } => {
            split::run_parse(&diff, json)?;
        }
        Commands::Split {
            url,
            instructions,
            plan_out,
            commit,
            push,
            create_prs,
            close_original,
        } => {
            let cfg = config::load_or_default(&cli.config)?;
            let options = SplitOptions {
                instructions,
                plan_out,
                commit,
                push,
                create_prs,
                close_original,
            };
            split::run_split(&cfg, &url, &options, progress.as_ref()).await?;
        }
        Commands::SplitLocal {
            repo,
            base,
            head,
            number,
            instructions,
            plan_out,
            commit,
        } => {
            let cfg = config::load_or_default(&cli.config)?;
            let options = SplitOptions {
                instructions,
                plan_out,
                commit,
                ..Default::default()
            };
            split::run_split_local(&cfg, &repo, &base, &head, number, &options, progress.as_ref()).await?;
        }
        Commands::Apply { plan, repo, push } => {
            let cfg = config::load_or_default(&cli.config)?;
            split::run_apply(&cfg, &plan, &repo, push, progress.as_ref())?;
        }
    }

    Ok(())
}
