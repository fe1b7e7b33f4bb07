//! # PR Splitter
//!
//! Splits one large pull request into a chain of smaller, dependency-ordered
//! commits that can be reviewed one at a time.
//!
//! A diff is parsed into hunks, each hunk is summarized and embedded, and a
//! language model places the hunks into groups one at a time using a small
//! tool protocol (search, list, create, merge, add). A second pass may merge
//! groups toward a target size. Each group is then replayed as a commit on
//! its own branch, based on the previous group's commit, so the last branch
//! has exactly the pull request's head tree.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌───────────┐   ┌──────────┐   ┌──────────┐
//! │   diff   │──▶│ classify │──▶│ vectorize │──▶│ grouping │──▶│   git    │
//! │  parser  │   │ opaque?  │   │ sum+embed │   │ + refine │   │  chain   │
//! └──────────┘   └──────────┘   └───────────┘   └──────────┘   └────┬─────┘
//!                                                                   ▼
//!                                                              ┌──────────┐
//!                                                              │  github  │
//!                                                              └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`diff`] | `git diff` parsing into text, binary and unrecognized hunks |
//! | [`hunk`] | Hunk identity hashes, combining, per-file statistics |
//! | [`classify`] | Opaque vs. summarizable file classification |
//! | [`vectorize`] | Summaries and embeddings for every hunk |
//! | [`grouping`] | Group set, grouping and refinement decision loops |
//! | [`search`] | Cosine ranking of grouped hunks |
//! | [`oracle`] | Tool-calling LLM loop over OpenAI, Anthropic and Gemini |
//! | [`embedding`] | Embedding providers (local, OpenAI, Ollama) |
//! | [`git`] | Git subprocess boundary and commit-chain reconstruction |
//! | [`github`] | Pull request URLs, metadata, and PR creation |
//! | [`split`] | Pipeline orchestration and split plans |
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |

pub mod classify;
pub mod config;
pub mod diff;
pub mod embedding;
pub mod error;
pub mod git;
pub mod github;
pub mod grouping;
pub mod hunk;
pub mod models;
pub mod oracle;
pub mod progress;
pub mod retry;
pub mod search;
pub mod split;
pub mod usage;
pub mod vectorize;
