//! OpenAI chat-completions wire format with function tools.
//!
//! Also serves Gemini through its OpenAI-compatible endpoint.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

use super::{parse_arguments, ChatBackend, OracleRequest, ToolCall, ToolDefinition, Turn};
use crate::config::LlmConfig;
use crate::retry::{read_json, with_retry, CallError, RetryPolicy};
use crate::usage::{ModelTier, TokenUsage};

pub struct OpenAiBackend {
    client: reqwest::Client,
    api_key: String,
    url: String,
    standard_model: String,
    premium_model: String,
    retry: RetryPolicy,
}

impl OpenAiBackend {
    pub fn new(config: &LlmConfig, api_key: String, retry: RetryPolicy) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_key,
            url: format!("{}/chat/completions", config.endpoint()),
            standard_model: config.standard_model(),
            premium_model: config.premium_model(),
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

/// Request body for one completion call.
pub(crate) fn build_body(
    model: &str,
    messages: &[Value],
    request: &OracleRequest,
    tools: &[ToolDefinition],
) -> Value {
    let mut body = json!({
        "model": model,
        "messages": messages,
    });
    if !tools.is_empty() {
        body["tools"] = Value::Array(
            tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect(),
        );
    }
    if let Some(max_tokens) = request.max_tokens {
        body["max_tokens"] = json!(max_tokens);
    }
    if let Some(temperature) = request.temperature {
        body["temperature"] = json!(temperature);
    }
    body
}

pub(crate) fn parse_response(json: &Value) -> Result<(Turn, TokenUsage)> {
    let message = json
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .ok_or_else(|| anyhow::anyhow!("Invalid chat response: missing choices[0].message"))?;

    let text = message
        .get("content")
        .and_then(|c| c.as_str())
        .unwrap_or_default()
        .to_string();

    let mut tool_calls = Vec::new();
    if let Some(calls) = message.get("tool_calls").and_then(|c| c.as_array()) {
        for call in calls {
            let Some(function) = call.get("function") else {
                continue;
            };
            let name = function
                .get("name")
                .and_then(|n| n.as_str())
                .ok_or_else(|| anyhow::anyhow!("Invalid chat response: tool call without name"))?;
            tool_calls.push(ToolCall {
                id: call
                    .get("id")
                    .and_then(|i| i.as_str())
                    .unwrap_or_default()
                    .to_string(),
                name: name.to_string(),
                arguments: parse_arguments(function.get("arguments").unwrap_or(&Value::Null)),
            });
        }
    }

    let usage = json.get("usage");
    let tokens = |key: &str| {
        usage
            .and_then(|u| u.get(key))
            .and_then(|v| v.as_u64())
            .unwrap_or(0)
    };
    let usage = TokenUsage::new(tokens("prompt_tokens"), tokens("completion_tokens"));

    Ok((
        Turn {
            text,
            tool_calls,
            raw: message.clone(),
        },
        usage,
    ))
}

#[async_trait]
impl ChatBackend for OpenAiBackend {
    fn name(&self) -> &'static str {
        "openai"
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
        let body = build_body(self.model(request.tier), messages, request, tools);
        let body = &body;
        let client = &self.client;
        let url = self.url.as_str();
        let api_key = self.api_key.as_str();

        let json = with_retry(&self.retry, "chat completion", move || async move {
            let response = client
                .post(url)
                .bearer_auth(api_key)
                .json(body)
                .send()
                .await
                .map_err(CallError::from)?;
            read_json("Chat completions", response).await
        })
        .await?;

        if let Some(error) = json.get("error") {
            bail!("Chat completions error: {}", error);
        }
        parse_response(&json)
    }

    fn add_assistant_turn(&self, messages: &mut Vec<Value>, turn: &Turn) {
        let mut raw = turn.raw.clone();
        if raw.is_object() && raw.get("role").is_none() {
            raw["role"] = json!("assistant");
        }
        messages.push(raw);
    }

    fn add_tool_results(&self, messages: &mut Vec<Value>, results: Vec<(ToolCall, String)>) {
        for (call, output) in results {
            messages.push(json!({
                "role": "tool",
                "tool_call_id": call.id,
                "content": output,
            }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_omits_tools_when_empty() {
        let req = OracleRequest::new(ModelTier::Standard, "hi", 1)
            .with_max_tokens(60)
            .with_temperature(0.0);
        let body = build_body("gpt-4.1-mini", &[json!({"role": "user", "content": "hi"})], &req, &[]);
        assert!(body.get("tools").is_none());
        assert_eq!(body["max_tokens"], 60);
        assert_eq!(body["model"], "gpt-4.1-mini");
    }

    #[test]
    fn body_includes_function_tools() {
        let req = OracleRequest::new(ModelTier::Premium, "hi", 1);
        let tools = vec![ToolDefinition::new(
            "listGroups",
            "List the groups",
            json!({"type": "object", "properties": {}}),
        )];
        let body = build_body("gpt-4.1", &[], &req, &tools);
        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["tools"][0]["function"]["name"], "listGroups");
        assert!(body.get("temperature").is_none());
    }

    #[test]
    fn parses_tool_calls_and_usage() {
        let json = json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "addToGroup", "arguments": "{\"groupId\":\"abc\"}"}
                    }]
                }
            }],
            "usage": {"prompt_tokens": 120, "completion_tokens": 7}
        });
        let (turn, usage) = parse_response(&json).unwrap();
        assert_eq!(turn.text, "");
        assert_eq!(turn.tool_calls.len(), 1);
        assert_eq!(turn.tool_calls[0].name, "addToGroup");
        assert_eq!(turn.tool_calls[0].arguments["groupId"], "abc");
        assert_eq!(usage, TokenUsage::new(120, 7));
    }

    #[test]
    fn parses_plain_text() {
        let json = json!({"choices": [{"message": {"role": "assistant", "content": "fn parse, struct Hunk"}}]});
        let (turn, usage) = parse_response(&json).unwrap();
        assert_eq!(turn.text, "fn parse, struct Hunk");
        assert!(turn.tool_calls.is_empty());
        assert_eq!(usage, TokenUsage::default());
    }

    #[test]
    fn rejects_missing_choices() {
        assert!(parse_response(&json!({})).is_err());
    }
}
