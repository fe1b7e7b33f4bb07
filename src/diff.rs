//! Unified diff parser.
//!
//! Turns the output of `git diff --binary` into an ordered list of
//! [`ParsedHunk`]s, one per `@@` block for text files and one per file for
//! binary or unrecognized sections.
//!
//! # Layout
//!
//! ```text
//! diff --git a/src/lib.rs b/src/lib.rs   ┐
//! index 1a2b3c4..5d6e7f8 100644           │ header (shared by every hunk)
//! --- a/src/lib.rs                        │
//! +++ b/src/lib.rs                        ┘
//! @@ -1,3 +1,4 @@                         ┐ hunk 0
//!  ...                                    ┘
//! @@ -20,2 +21,2 @@ fn main() {          ┐ hunk 1
//!  ...                                    ┘
//! ```
//!
//! Every text hunk's `complete_patch` is the header followed by that hunk's
//! lines and a single newline, so it can be handed to `git apply` on its own.
//! Joining the header and each hunk's `content` with `\n` in `index` order
//! reproduces the file section exactly.
//!
//! Line counts are taken from the `@@ -a,b +c,d @@` header (`b` removed,
//! `d` added), with omitted counts defaulting to 1.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::{SplitError, SplitResult};
use crate::models::{FilePatch, Operation, ParsedHunk, TextHunk};

const DIFF_PREFIX: &str = "diff --git ";
const BINARY_MARKER: &str = "GIT binary patch";

fn diff_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^diff --git a/(.+) b/(.+)$").expect("valid regex"))
}

fn hunk_header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@(.*)$").expect("valid regex")
    })
}

/// Parse a whole diff into hunks, in file order and then hunk order.
pub fn parse_diff(input: &str) -> SplitResult<Vec<ParsedHunk>> {
    let sections = split_sections(input)?;
    let mut hunks = Vec::new();
    for section in &sections {
        hunks.extend(parse_section(section)?);
    }
    Ok(hunks)
}

/// Split a diff into per-file sections at every `diff --git` line.
///
/// The final newline of the input is not part of the last section. Binary
/// sections keep the blank line that terminates their payload.
pub fn split_sections(input: &str) -> SplitResult<Vec<String>> {
    if input.is_empty() {
        return Err(SplitError::MalformedDiff("empty diff".to_string()));
    }
    if !input.starts_with(DIFF_PREFIX) {
        return Err(SplitError::MalformedDiff(format!(
            "expected input to start with `diff --git`, got: {}",
            preview(input)
        )));
    }

    let body = input.strip_suffix('\n').unwrap_or(input);
    let mut sections = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in body.split('\n') {
        if line.starts_with(DIFF_PREFIX) && !current.is_empty() {
            sections.push(current.join("\n"));
            current.clear();
        }
        current.push(line);
    }
    if !current.is_empty() {
        sections.push(current.join("\n"));
    }
    Ok(sections)
}

/// Paths and operation read from a file section's header lines.
#[derive(Debug, Clone, PartialEq, Eq)]
struct FileHeader {
    file_path: String,
    previous_file_path: Option<String>,
    operation: Operation,
}

fn parse_file_header(lines: &[&str]) -> SplitResult<FileHeader> {
    let first = lines.first().copied().unwrap_or_default();
    let caps = diff_line_re()
        .captures(first)
        .ok_or_else(|| SplitError::MalformedDiff(format!("invalid file header: {}", preview(first))))?;
    let mut old_path = caps[1].to_string();
    let mut new_path = caps[2].to_string();

    // Only lines ahead of the payload describe the file.
    let header_lines: Vec<&str> = lines
        .iter()
        .skip(1)
        .copied()
        .take_while(|l| !l.starts_with("@@") && !l.starts_with(BINARY_MARKER))
        .collect();

    let mut new_file = false;
    let mut deleted_file = false;
    let mut rename_from = None;
    let mut rename_to = None;
    let mut minus_dev_null = false;
    let mut plus_dev_null = false;
    for line in &header_lines {
        if line.starts_with("new file mode") {
            new_file = true;
        } else if line.starts_with("deleted file mode") {
            deleted_file = true;
        } else if let Some(p) = line.strip_prefix("rename from ") {
            rename_from = Some(p.to_string());
        } else if let Some(p) = line.strip_prefix("rename to ") {
            rename_to = Some(p.to_string());
        } else if *line == "--- /dev/null" {
            minus_dev_null = true;
        } else if *line == "+++ /dev/null" {
            plus_dev_null = true;
        }
    }

    let operation = if new_file {
        Operation::Added
    } else if deleted_file {
        Operation::Deleted
    } else if let (Some(from), Some(to)) = (rename_from, rename_to) {
        old_path = from;
        new_path = to;
        Operation::Renamed
    } else if minus_dev_null || old_path == "/dev/null" {
        Operation::Added
    } else if plus_dev_null || new_path == "/dev/null" {
        Operation::Deleted
    } else if old_path == new_path {
        Operation::Modified
    } else {
        Operation::Renamed
    };

    let (file_path, previous_file_path) = match operation {
        Operation::Deleted => (old_path, None),
        Operation::Renamed => (new_path, Some(old_path)),
        Operation::Added | Operation::Modified => (new_path, None),
    };
    Ok(FileHeader {
        file_path,
        previous_file_path,
        operation,
    })
}

fn parse_section(section: &str) -> SplitResult<Vec<ParsedHunk>> {
    let lines: Vec<&str> = section.split('\n').collect();
    let header = parse_file_header(&lines)?;

    if lines.iter().any(|l| l.contains(BINARY_MARKER)) {
        return Ok(vec![ParsedHunk::Binary(whole_file(section, header))]);
    }
    if !lines.iter().any(|l| l.starts_with("@@")) {
        return Ok(vec![ParsedHunk::Unrecognized(whole_file(section, header))]);
    }
    parse_text_section(&lines, header)
}

fn whole_file(section: &str, header: FileHeader) -> FilePatch {
    FilePatch {
        file_path: header.file_path,
        previous_file_path: header.previous_file_path,
        operation: header.operation,
        complete_patch: format!("{section}\n"),
    }
}

fn parse_text_section(lines: &[&str], header: FileHeader) -> SplitResult<Vec<ParsedHunk>> {
    let first_hunk = lines
        .iter()
        .position(|l| l.starts_with("@@"))
        .unwrap_or(lines.len());
    let header_text = lines[..first_hunk].join("\n");

    let mut hunks = Vec::new();
    let mut i = first_hunk;
    while i < lines.len() {
        let start = i;
        let (lines_removed, lines_added) = parse_hunk_header(lines[start])?;
        i += 1;
        while i < lines.len() && !lines[i].starts_with("@@") {
            i += 1;
        }
        let content = lines[start..i].join("\n");
        let complete_patch = format!("{header_text}\n{content}\n");
        hunks.push(ParsedHunk::Text(TextHunk {
            file_path: header.file_path.clone(),
            previous_file_path: header.previous_file_path.clone(),
            operation: header.operation,
            complete_patch,
            header: header_text.clone(),
            content,
            lines_added,
            lines_removed,
            index: hunks.len(),
        }));
    }
    Ok(hunks)
}

/// Returns `(old_count, new_count)` from an `@@` line.
fn parse_hunk_header(line: &str) -> SplitResult<(u32, u32)> {
    let caps = hunk_header_re()
        .captures(line)
        .ok_or_else(|| SplitError::InvalidHunkHeader(line.to_string()))?;
    let count = |idx: usize| -> SplitResult<u32> {
        match caps.get(idx) {
            Some(m) => m
                .as_str()
                .parse()
                .map_err(|_| SplitError::InvalidHunkHeader(line.to_string())),
            None => Ok(1),
        }
    };
    Ok((count(2)?, count(4)?))
}

/// Recompute the operation of a patch from its text. Used when hunks are
/// combined and the result needs a fresh classification.
pub fn operation_of(patch: &str) -> SplitResult<Operation> {
    let lines: Vec<&str> = patch.split('\n').collect();
    Ok(parse_file_header(&lines)?.operation)
}

fn preview(s: &str) -> String {
    let first = s.lines().next().unwrap_or_default();
    if first.chars().count() > 80 {
        let cut: String = first.chars().take(80).collect();
        format!("{cut}...")
    } else {
        first.to_string()
    }
}
