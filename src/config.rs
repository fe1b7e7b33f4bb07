use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub classification: ClassificationConfig,
    #[serde(default)]
    pub grouping: GroupingConfig,
    #[serde(default)]
    pub refinement: RefinementConfig,
    #[serde(default)]
    pub git: GitConfig,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    #[default]
    #[serde(rename = "openai")]
    OpenAi,
    Anthropic,
    Gemini,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmProvider::OpenAi => "openai",
            LlmProvider::Anthropic => "anthropic",
            LlmProvider::Gemini => "gemini",
        }
    }

    /// Environment variable holding the API key.
    pub fn api_key_var(&self) -> &'static str {
        match self {
            LlmProvider::OpenAi => "OPENAI_API_KEY",
            LlmProvider::Anthropic => "ANTHROPIC_API_KEY",
            LlmProvider::Gemini => "GEMINI_API_KEY",
        }
    }

    pub fn default_endpoint(&self) -> &'static str {
        match self {
            LlmProvider::OpenAi => "https://api.openai.com/v1",
            LlmProvider::Anthropic => "https://api.anthropic.com/v1",
            LlmProvider::Gemini => "https://generativelanguage.googleapis.com/v1beta/openai",
        }
    }

    pub fn default_standard_model(&self) -> &'static str {
        match self {
            LlmProvider::OpenAi => "gpt-4.1-mini",
            LlmProvider::Anthropic => "claude-3-5-haiku-latest",
            LlmProvider::Gemini => "gemini-2.5-flash",
        }
    }

    pub fn default_premium_model(&self) -> &'static str {
        match self {
            LlmProvider::OpenAi => "gpt-4.1",
            LlmProvider::Anthropic => "claude-sonnet-4-20250514",
            LlmProvider::Gemini => "gemini-2.5-pro",
        }
    }
}

impl std::fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default)]
    pub provider: LlmProvider,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub standard_model: Option<String>,
    #[serde(default)]
    pub premium_model: Option<String>,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::default(),
            endpoint: None,
            standard_model: None,
            premium_model: None,
            timeout_secs: default_llm_timeout_secs(),
            max_output_tokens: default_max_output_tokens(),
        }
    }
}

impl LlmConfig {
    pub fn endpoint(&self) -> String {
        self.endpoint
            .clone()
            .unwrap_or_else(|| self.provider.default_endpoint().to_string())
            .trim_end_matches('/')
            .to_string()
    }

    pub fn standard_model(&self) -> String {
        self.standard_model
            .clone()
            .unwrap_or_else(|| self.provider.default_standard_model().to_string())
    }

    pub fn premium_model(&self) -> String {
        self.premium_model
            .clone()
            .unwrap_or_else(|| self.provider.default_premium_model().to_string())
    }
}

fn default_llm_timeout_secs() -> u64 {
    120
}
fn default_max_output_tokens() -> u32 {
    4096
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

fn default_max_retries() -> u32 {
    6
}
fn default_initial_delay_ms() -> u64 {
    1000
}
fn default_max_delay_ms() -> u64 {
    60_000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            timeout_secs: default_embedding_timeout_secs(),
        }
    }
}

fn default_embedding_provider() -> String {
    "local".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_embedding_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClassificationConfig {
    #[serde(default = "default_oracle_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_classification_max_steps")]
    pub max_steps: usize,
    #[serde(default = "default_sample_chars")]
    pub sample_chars: usize,
    /// Files matching any of these globs are opaque without asking the oracle.
    #[serde(default)]
    pub opaque_globs: Vec<String>,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            batch_size: default_oracle_batch_size(),
            max_steps: default_classification_max_steps(),
            sample_chars: default_sample_chars(),
            opaque_globs: Vec::new(),
        }
    }
}

fn default_oracle_batch_size() -> usize {
    5
}
fn default_classification_max_steps() -> usize {
    100
}
fn default_sample_chars() -> usize {
    500
}

#[derive(Debug, Deserialize, Clone)]
pub struct GroupingConfig {
    #[serde(default = "default_grouping_max_steps")]
    pub max_steps: usize,
    #[serde(default = "default_search_top_k")]
    pub search_top_k: usize,
    #[serde(default = "default_similarity_floor")]
    pub similarity_floor: f32,
    #[serde(default = "default_oracle_batch_size")]
    pub summary_batch_size: usize,
    #[serde(default = "default_summary_max_tokens")]
    pub summary_max_tokens: u32,
    #[serde(default = "default_summary_input_chars")]
    pub summary_input_chars: usize,
    #[serde(default = "default_unrecognized_preview_chars")]
    pub unrecognized_preview_chars: usize,
    /// Guidance from the pull request author, passed to every grouping prompt.
    #[serde(default)]
    pub instructions: Option<String>,
}

impl Default for GroupingConfig {
    fn default() -> Self {
        Self {
            max_steps: default_grouping_max_steps(),
            search_top_k: default_search_top_k(),
            similarity_floor: default_similarity_floor(),
            summary_batch_size: default_oracle_batch_size(),
            summary_max_tokens: default_summary_max_tokens(),
            summary_input_chars: default_summary_input_chars(),
            unrecognized_preview_chars: default_unrecognized_preview_chars(),
            instructions: None,
        }
    }
}

fn default_grouping_max_steps() -> usize {
    1000
}
fn default_search_top_k() -> usize {
    10
}
fn default_similarity_floor() -> f32 {
    0.1
}
fn default_summary_max_tokens() -> u32 {
    60
}
fn default_summary_input_chars() -> usize {
    8000
}
fn default_unrecognized_preview_chars() -> usize {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct RefinementConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_grouping_max_steps")]
    pub max_steps: usize,
    #[serde(default = "default_min_group_lines")]
    pub min_group_lines: u32,
    #[serde(default = "default_max_group_lines")]
    pub max_group_lines: u32,
}

impl Default for RefinementConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_steps: default_grouping_max_steps(),
            min_group_lines: default_min_group_lines(),
            max_group_lines: default_max_group_lines(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_min_group_lines() -> u32 {
    10
}
fn default_max_group_lines() -> u32 {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct GitConfig {
    #[serde(default = "default_branch_prefix")]
    pub branch_prefix: String,
    /// Parent directory for clones. Defaults to the system temp dir.
    #[serde(default)]
    pub workdir: Option<PathBuf>,
    #[serde(default = "default_remote")]
    pub remote: String,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            branch_prefix: default_branch_prefix(),
            workdir: None,
            remote: default_remote(),
        }
    }
}

fn default_branch_prefix() -> String {
    "pr-splitter".to_string()
}
fn default_remote() -> String {
    "origin".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config = parse_config(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Load the config file if it exists, otherwise use defaults.
pub fn load_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        Ok(Config::default())
    }
}

pub fn parse_config(content: &str) -> Result<Config> {
    Ok(toml::from_str(content)?)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.classification.batch_size == 0 {
        bail!("classification.batch_size must be > 0");
    }
    if config.classification.max_steps == 0 {
        bail!("classification.max_steps must be > 0");
    }
    if config.grouping.summary_batch_size == 0 {
        bail!("grouping.summary_batch_size must be > 0");
    }
    if config.grouping.max_steps == 0 {
        bail!("grouping.max_steps must be > 0");
    }
    if config.grouping.search_top_k == 0 {
        bail!("grouping.search_top_k must be > 0");
    }
    if !(-1.0..=1.0).contains(&config.grouping.similarity_floor) {
        bail!("grouping.similarity_floor must be in [-1.0, 1.0]");
    }
    if config.refinement.min_group_lines > config.refinement.max_group_lines {
        bail!("refinement.min_group_lines must be <= refinement.max_group_lines");
    }
    if config.retry.backoff_multiplier < 1.0 {
        bail!("retry.backoff_multiplier must be >= 1.0");
    }
    if config.retry.initial_delay_ms > config.retry.max_delay_ms {
        bail!("retry.initial_delay_ms must be <= retry.max_delay_ms");
    }
    if config.git.branch_prefix.trim().is_empty() {
        bail!("git.branch_prefix must not be empty");
    }
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }

    match config.embedding.provider.as_str() {
        "local" => {}
        "openai" | "ollama" => {
            if config.embedding.model.is_none() {
                bail!(
                    "embedding.model must be specified when provider is '{}'",
                    config.embedding.provider
                );
            }
        }
        other => bail!(
            "Unknown embedding provider: '{}'. Must be local, openai, or ollama.",
            other
        ),
    }

    Ok(())
}
