//! Anthropic Messages API wire format with `tool_use` / `tool_result` blocks.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

use super::{ChatBackend, OracleRequest, ToolCall, ToolDefinition, Turn};
use crate::config::LlmConfig;
use crate::retry::{read_json, with_retry, CallError, RetryPolicy};
use crate::usage::{ModelTier, TokenUsage};

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicBackend {
    client: reqwest::Client,
    api_key: String,
    url: String,
    standard_model: String,
    premium_model: String,
    max_output_tokens: u32,
    retry: RetryPolicy,
}

impl AnthropicBackend {
    pub fn new(config: &LlmConfig, api_key: String, retry: RetryPolicy) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_key,
            url: format!("{}/messages", config.endpoint()),
            standard_model: config.standard_model(),
            premium_model: config.premium_model(),
            max_output_tokens: config.max_output_tokens,
            retry,
        })
    }

    fn model(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Standard => &self.standard_model,
            ModelTier::Premium => &self.premium_model,
        }
    }
}

pub(crate) fn build_body(
    model: &str,
    default_max_tokens: u32,
    messages: &[Value],
    request: &OracleRequest,
    tools: &[ToolDefinition],
) -> Value {
    let mut body = json!({
        "model": model,
        "max_tokens": request.max_tokens.unwrap_or(default_max_tokens),
        "messages": messages,
    });
    if !tools.is_empty() {
        body["tools"] = Value::Array(
            tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "input_schema": t.parameters,
                    })
                })
                .collect(),
        );
    }
    if let Some(temperature) = request.temperature {
        body["temperature"] = json!(temperature);
    }
    body
}

pub(crate) fn parse_response(json: &Value) -> Result<(Turn, TokenUsage)> {
    if let Some(error) = json.get("error") {
        bail!("Anthropic error: {}", error);
    }
    let content = json
        .get("content")
        .and_then(|c| c.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Anthropic response: missing content"))?;

    let mut text = String::new();
    let mut tool_calls = Vec::new();
    for block in content {
        match block.get("type").and_then(|t| t.as_str()) {
            Some("text") => {
                if let Some(t) = block.get("text").and_then(|t| t.as_str()) {
                    text.push_str(t);
                }
            }
            Some("tool_use") => {
                let name = block
                    .get("name")
                    .and_then(|n| n.as_str())
                    .ok_or_else(|| anyhow::anyhow!("Invalid Anthropic response: tool_use without name"))?;
                tool_calls.push(ToolCall {
                    id: block
                        .get("id")
                        .and_then(|i| i.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    name: name.to_string(),
                    arguments: block.get("input").cloned().unwrap_or_else(|| json!({})),
                });
            }
            _ => {}
        }
    }

    let usage = json.get("usage");
    let tokens = |key: &str| {
        usage
            .and_then(|u| u.get(key))
            .and_then(|v| v.as_u64())
            .unwrap_or(0)
    };

    Ok((
        Turn {
            text,
            tool_calls,
            raw: Value::Array(content.clone()),
        },
        TokenUsage::new(tokens("input_tokens"), tokens("output_tokens")),
    ))
}

#[async_trait]
impl ChatBackend for AnthropicBackend {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn init_conversation(&self, prompt: &str) -> Vec<Value> {
        vec![json!({"role": "user", "content": prompt})]
    }

    async fn call(
        &self,
        messages: &[Value],
        request: &OracleRequest,
        tools: &[ToolDefinition],
    ) -> Result<(Turn, TokenUsage)> {
        let body = build_body(
            self.model(request.tier),
            self.max_output_tokens,
            messages,
            request,
            tools,
        );
        let body = &body;
        let client = &self.client;
        let url = self.url.as_str();
        let api_key = self.api_key.as_str();

        let json = with_retry(&self.retry, "Anthropic messages", move || async move {
            let response = client
                .post(url)
                .header("x-api-key", api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(body)
                .send()
                .await
                .map_err(CallError::from)?;
            read_json("Anthropic", response).await
        })
        .await?;

        parse_response(&json)
    }

    fn add_assistant_turn(&self, messages: &mut Vec<Value>, turn: &Turn) {
        messages.push(json!({"role": "assistant", "content": turn.raw}));
    }

    fn add_tool_results(&self, messages: &mut Vec<Value>, results: Vec<(ToolCall, String)>) {
        let blocks: Vec<Value> = results
            .into_iter()
            .map(|(call, output)| {
                json!({
                    "type": "tool_result",
                    "tool_use_id": call.id,
                    "content": output,
                })
            })
            .collect();
        messages.push(json!({"role": "user", "content": blocks}));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_uses_input_schema_and_default_max_tokens() {
        let req = OracleRequest::new(ModelTier::Standard, "hi", 1);
        let tools = vec![ToolDefinition::new(
            "setIsHumanReadable",
            "Categorize the file",
            json!({"type": "object"}),
        )];
        let body = build_body("claude-3-5-haiku-latest", 4096, &[], &req, &tools);
        assert_eq!(body["max_tokens"], 4096);
        assert_eq!(body["tools"][0]["input_schema"]["type"], "object");
    }

    #[test]
    fn parses_mixed_blocks() {
        let json = json!({
            "content": [
                {"type": "text", "text": "Looking at groups."},
                {"type": "tool_use", "id": "toolu_1", "name": "listGroups", "input": {}}
            ],
            "usage": {"input_tokens": 50, "output_tokens": 12}
        });
        let (turn, usage) = parse_response(&json).unwrap();
        assert_eq!(turn.text, "Looking at groups.");
        assert_eq!(turn.tool_calls[0].id, "toolu_1");
        assert_eq!(turn.tool_calls[0].name, "listGroups");
        assert_eq!(usage, TokenUsage::new(50, 12));
    }

    #[test]
    fn tool_results_are_one_user_message() {
        let backend = AnthropicBackend::new(
            &LlmConfig::default(),
            "key".to_string(),
            RetryPolicy::none(),
        )
        .unwrap();
        let mut messages = Vec::new();
        let call = ToolCall {
            id: "toolu_1".to_string(),
            name: "listGroups".to_string(),
            arguments: json!({}),
        };
        backend.add_tool_results(&mut messages, vec![(call.clone(), "No groups yet.".to_string()), (call, "x".to_string())]);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["role"], "user");
        assert_eq!(messages[0]["content"][0]["type"], "tool_result");
        assert_eq!(messages[0]["content"][0]["content"], "No groups yet.");
    }

    #[test]
    fn surfaces_api_errors() {
        let json = json!({"type": "error", "error": {"type": "overloaded_error"}});
        assert!(parse_response(&json).is_err());
    }
}
