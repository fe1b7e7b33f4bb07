//! Reasoning oracle: a language model driven through a bounded tool loop.
//!
//! The pipeline only sees [`ReasoningOracle::run`]: a prompt, a tool box,
//! and a step ceiling in; final text and token usage out. One step is one
//! model call. After every step that requested tools, the calls are
//! executed against the [`ToolBox`] in order and their string results are
//! appended to the conversation.
//!
//! ```text
//!  prompt ─▶ call model ─▶ tool calls? ──no──▶ done
//!               ▲              │yes
//!               │              ▼
//!               └──── run tools, append results (until finished() or ceiling)
//! ```
//!
//! Running out of steps is not an error here. Callers decide whether the
//! loop achieved its goal by inspecting their own tool state.
//!
//! Wire formats live in [`openai`] (also used for Gemini's OpenAI-compatible
//! endpoint) and [`anthropic`].

pub mod anthropic;
pub mod openai;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::config::{LlmConfig, LlmProvider};
use crate::retry::RetryPolicy;
use crate::usage::{ModelTier, TokenUsage};

/// JSON-schema description of one tool offered to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolDefinition {
    pub fn new(name: &str, description: &str, parameters: Value) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            parameters,
        }
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// The tools available to one decision loop, plus the state they mutate.
#[async_trait]
pub trait ToolBox: Send {
    fn definitions(&self) -> Vec<ToolDefinition>;

    /// Execute one call. Failures are reported as the returned string so
    /// the model can correct itself.
    async fn call(&mut self, name: &str, arguments: Value) -> String;

    /// True once the loop's goal is reached and no further steps are needed.
    fn finished(&self) -> bool {
        false
    }
}

/// Plain text generation.
pub struct NoTools;

#[async_trait]
impl ToolBox for NoTools {
    fn definitions(&self) -> Vec<ToolDefinition> {
        Vec::new()
    }

    async fn call(&mut self, name: &str, _arguments: Value) -> String {
        format!("Unknown tool: {}", name)
    }
}

#[derive(Debug, Clone)]
pub struct OracleRequest {
    pub tier: ModelTier,
    pub prompt: String,
    pub max_steps: usize,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl OracleRequest {
    pub fn new(tier: ModelTier, prompt: impl Into<String>, max_steps: usize) -> Self {
        Self {
            tier,
            prompt: prompt.into(),
            max_steps,
            max_tokens: None,
            temperature: None,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OracleResponse {
    pub text: String,
    pub steps: usize,
    pub tool_calls: usize,
    pub usage: TokenUsage,
}

#[async_trait]
pub trait ReasoningOracle: Send + Sync {
    async fn run(&self, request: &OracleRequest, tools: &mut dyn ToolBox) -> Result<OracleResponse>;
}

/// One model reply.
#[derive(Debug, Clone, Default)]
pub struct Turn {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    /// Provider-specific assistant message, appended verbatim to the history.
    pub raw: Value,
}

/// Provider wire format for a tool-calling chat API.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Provider name for logging.
    fn name(&self) -> &'static str;

    fn init_conversation(&self, prompt: &str) -> Vec<Value>;

    /// One model call, retried per request on transient failures.
    async fn call(
        &self,
        messages: &[Value],
        request: &OracleRequest,
        tools: &[ToolDefinition],
    ) -> Result<(Turn, TokenUsage)>;

    fn add_assistant_turn(&self, messages: &mut Vec<Value>, turn: &Turn);

    fn add_tool_results(&self, messages: &mut Vec<Value>, results: Vec<(ToolCall, String)>);
}

/// [`ReasoningOracle`] over any [`ChatBackend`].
pub struct ChatOracle<B> {
    backend: B,
}

impl<B: ChatBackend> ChatOracle<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl<B: ChatBackend> ReasoningOracle for ChatOracle<B> {
    async fn run(&self, request: &OracleRequest, tools: &mut dyn ToolBox) -> Result<OracleResponse> {
        run_tool_loop(&self.backend, request, tools).await
    }
}

/// The bounded decision loop shared by every backend.
pub async fn run_tool_loop(
    backend: &dyn ChatBackend,
    request: &OracleRequest,
    tools: &mut dyn ToolBox,
) -> Result<OracleResponse> {
    let definitions = tools.definitions();
    let mut messages = backend.init_conversation(&request.prompt);
    let mut response = OracleResponse::default();

    for step in 0..request.max_steps {
        let (turn, usage) = backend.call(&messages, request, &definitions).await?;
        response.usage += usage;
        response.steps = step + 1;
        response.text = turn.text.clone();

        if turn.tool_calls.is_empty() {
            tracing::debug!(
                backend = backend.name(),
                steps = response.steps,
                tool_calls = response.tool_calls,
                "decision loop complete"
            );
            return Ok(response);
        }

        tracing::debug!(
            backend = backend.name(),
            step = step + 1,
            calls = ?turn.tool_calls.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
            "model requested tools"
        );

        backend.add_assistant_turn(&mut messages, &turn);
        let mut results = Vec::with_capacity(turn.tool_calls.len());
        for call in turn.tool_calls {
            let output = tools.call(&call.name, call.arguments.clone()).await;
            response.tool_calls += 1;
            results.push((call, output));
        }
        backend.add_tool_results(&mut messages, results);

        if tools.finished() {
            return Ok(response);
        }
    }

    tracing::warn!(
        backend = backend.name(),
        max_steps = request.max_steps,
        "decision loop hit its step ceiling"
    );
    Ok(response)
}

/// Build the oracle for the configured provider.
pub fn create_oracle(config: &LlmConfig, retry: RetryPolicy) -> Result<Box<dyn ReasoningOracle>> {
    let api_key = std::env::var(config.provider.api_key_var()).map_err(|_| {
        anyhow::anyhow!(
            "{} environment variable not set",
            config.provider.api_key_var()
        )
    })?;
    match config.provider {
        LlmProvider::OpenAi | LlmProvider::Gemini => Ok(Box::new(ChatOracle::new(
            openai::OpenAiBackend::new(config, api_key, retry)?,
        ))),
        LlmProvider::Anthropic => Ok(Box::new(ChatOracle::new(
            anthropic::AnthropicBackend::new(config, api_key, retry)?,
        ))),
    }
}

/// Parse tool arguments that some providers send as a JSON string.
pub(crate) fn parse_arguments(raw: &Value) -> Value {
    match raw {
        Value::String(s) if s.trim().is_empty() => Value::Object(Default::default()),
        Value::String(s) => serde_json::from_str(s).unwrap_or_else(|_| Value::String(s.clone())),
        Value::Null => Value::Object(Default::default()),
        other => other.clone(),
    }
}
