//! Domain errors raised by the splitting pipeline.
//!
//! Each variant is fatal to the run that raised it. They travel inside
//! `anyhow::Error` through the orchestration layer and can be recovered
//! with `downcast_ref::<SplitError>()` when a caller needs to branch on
//! the failure kind.
//!
//! Tool-invocation failures inside a decision loop (an unknown group id,
//! for example) are deliberately *not* represented here: they are reported
//! back to the oracle as plain strings so it can correct itself.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SplitError {
    /// The input is not a `git diff` (empty, wrong prefix, or a file section
    /// whose `diff --git` line cannot be read).
    #[error("malformed diff: {0}")]
    MalformedDiff(String),

    /// An `@@` line that does not follow the unified hunk header grammar.
    #[error("invalid hunk header: {0}")]
    InvalidHunkHeader(String),

    /// The classification oracle returned without tagging the file.
    #[error("file {file_path} was not tagged as opaque or summarizable")]
    ClassificationIncomplete { file_path: String },

    /// The grouping decision loop ran out of steps with the hunk still unplaced.
    #[error("hunk in {file_path} was not added to a group after {steps} steps: {summary}")]
    HunkNotGrouped {
        file_path: String,
        summary: String,
        steps: usize,
    },

    /// `git apply` rejected a hunk while building a group's commit.
    #[error("{message}\n{conflict_details}")]
    HunkApplication {
        message: String,
        conflict_details: String,
    },
}

pub type SplitResult<T> = Result<T, SplitError>;
