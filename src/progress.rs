//! Split progress reporting.
//!
//! Reports observable progress while a pull request is split, so users see
//! which stage is running, how many hunks have been placed, and what the
//! model calls cost. Progress is emitted on **stderr** so stdout remains
//! parseable for scripts.

use std::io::Write;

use crate::usage::{ModelTier, TokenUsage};

/// Stage of the split pipeline.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SplitStage {
    Cloning,
    Parsing,
    Classifying,
    Vectorizing,
    Grouping,
    Refining,
    Committing,
    Pushing,
    CreatingPullRequests,
}

impl SplitStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            SplitStage::Cloning => "cloning",
            SplitStage::Parsing => "parsing",
            SplitStage::Classifying => "classifying",
            SplitStage::Vectorizing => "vectorizing",
            SplitStage::Grouping => "grouping",
            SplitStage::Refining => "refining",
            SplitStage::Committing => "committing",
            SplitStage::Pushing => "pushing",
            SplitStage::CreatingPullRequests => "creating-prs",
        }
    }
}

/// A single progress event for a split run.
#[derive(Clone, Debug, PartialEq)]
pub enum SplitProgressEvent {
    /// A pipeline stage started.
    Stage { stage: SplitStage },
    /// n files classified out of total.
    Classified { n: u64, total: u64 },
    /// n hunks summarized and embedded out of total.
    Vectorized { n: u64, total: u64 },
    /// n hunks placed into groups out of total.
    HunkGrouped { n: u64, total: u64 },
    /// Group n of total committed onto `branch`.
    GroupCommitted { n: u64, total: u64, branch: String },
    /// Tokens consumed by one oracle call.
    Usage { tier: ModelTier, usage: TokenUsage },
}

/// Reports split progress. Implementations write to stderr (human or JSON).
pub trait SplitProgressReporter: Send + Sync {
    fn report(&self, event: SplitProgressEvent);
}

/// Human-friendly progress on stderr: "split  grouping  12 / 40 hunks".
pub struct StderrProgress;

impl SplitProgressReporter for StderrProgress {
    fn report(&self, event: SplitProgressEvent) {
        let line = match &event {
            SplitProgressEvent::Stage { stage } => format!("split  {}...\n", stage.as_str()),
            SplitProgressEvent::Classified { n, total } => format!(
                "split  classifying  {} / {} files\n",
                format_number(*n),
                format_number(*total)
            ),
            SplitProgressEvent::Vectorized { n, total } => format!(
                "split  vectorizing  {} / {} hunks\n",
                format_number(*n),
                format_number(*total)
            ),
            SplitProgressEvent::HunkGrouped { n, total } => format!(
                "split  grouping  {} / {} hunks\n",
                format_number(*n),
                format_number(*total)
            ),
            SplitProgressEvent::GroupCommitted { n, total, branch } => format!(
                "split  committed  {} / {} groups  {}\n",
                format_number(*n),
                format_number(*total),
                branch
            ),
            // Per-call usage is too chatty for humans; the total is logged at the end.
            SplitProgressEvent::Usage { .. } => return,
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl JsonProgress {
    fn to_json(event: &SplitProgressEvent) -> serde_json::Value {
        match event {
            SplitProgressEvent::Stage { stage } => serde_json::json!({
                "event": "stage",
                "stage": stage.as_str()
            }),
            SplitProgressEvent::Classified { n, total } => serde_json::json!({
                "event": "progress",
                "phase": "classifying",
                "n": n,
                "total": total
            }),
            SplitProgressEvent::Vectorized { n, total } => serde_json::json!({
                "event": "progress",
                "phase": "vectorizing",
                "n": n,
                "total": total
            }),
            SplitProgressEvent::HunkGrouped { n, total } => serde_json::json!({
                "event": "progress",
                "phase": "grouping",
                "n": n,
                "total": total
            }),
            SplitProgressEvent::GroupCommitted { n, total, branch } => serde_json::json!({
                "event": "progress",
                "phase": "committing",
                "n": n,
                "total": total,
                "branch": branch
            }),
            SplitProgressEvent::Usage { tier, usage } => serde_json::json!({
                "event": "usage",
                "tier": tier.as_str(),
                "prompt_tokens": usage.prompt_tokens,
                "completion_tokens": usage.completion_tokens
            }),
        }
    }
}

impl SplitProgressReporter for JsonProgress {
    fn report(&self, event: SplitProgressEvent) {
        if let Ok(line) = serde_json::to_string(&Self::to_json(&event)) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl SplitProgressReporter for NoProgress {
    fn report(&self, _event: SplitProgressEvent) {}
}

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    /// Parse the `--progress` flag value. `auto` defers to the TTY check.
    pub fn from_flag(value: &str) -> anyhow::Result<Self> {
        match value {
            "auto" => Ok(Self::default_for_tty()),
            "human" => Ok(ProgressMode::Human),
            "json" => Ok(ProgressMode::Json),
            "off" => Ok(ProgressMode::Off),
            other => anyhow::bail!(
                "Unknown progress mode '{}'. Expected auto, human, json or off.",
                other
            ),
        }
    }

    pub fn reporter(&self) -> Box<dyn SplitProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
