//! Anthropic Messages API client.
//!
//! Converts the OpenAI-shaped transcript into Anthropic's block format:
//! system messages become the top-level `system` prompt, assistant tool calls
//! become `tool_use` blocks, and tool results become `tool_result` blocks on a
//! user turn. Consecutive turns with the same role are merged because the API
//! requires alternation.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use super::error::{parse_retry_after, LlmError};
use super::{ChatMessage, ChatResponse, LlmClient, Role, TokenUsage, ToolCall, ToolDefinition};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 8192;

/// Anthropic Messages API client.
pub struct AnthropicClient {
    client: Client,
    api_key: String,
    max_tokens: u32,
}

impl AnthropicClient {
    pub fn new(api_key: String, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            api_key,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn chat_completion(
        &self,
        model: &str,
        messages: &[ChatMessage],
        tools: Option<&[ToolDefinition]>,
    ) -> Result<ChatResponse, LlmError> {
        let body = build_request(model, self.max_tokens, messages, tools);

        tracing::debug!(model = %model, "Sending request to Anthropic");

        let response = self
            .client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::from_transport(&e))?;

        let status = response.status();
        let retry_after = parse_retry_after(response.headers());
        let text = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(LlmError::from_status(status.as_u16(), &text, retry_after));
        }

        parse_response(&text)
    }
}

/// Build the Messages API request body.
pub(crate) fn build_request(
    model: &str,
    max_tokens: u32,
    messages: &[ChatMessage],
    tools: Option<&[ToolDefinition]>,
) -> Value {
    let system: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .filter_map(|m| m.text_content())
        .collect();

    let mut turns: Vec<(&'static str, Vec<Value>)> = Vec::new();
    for message in messages.iter().filter(|m| m.role != Role::System) {
        let (role, blocks) = convert_message(message);
        if blocks.is_empty() {
            continue;
        }
        if let Some((last_role, last_blocks)) = turns.last_mut() {
            if *last_role == role {
                last_blocks.extend(blocks);
                continue;
            }
        }
        turns.push((role, blocks));
    }

    let mut body = json!({
        "model": model,
        "max_tokens": max_tokens,
        "messages": turns
            .into_iter()
            .map(|(role, content)| json!({ "role": role, "content": content }))
            .collect::<Vec<_>>(),
    });

    if !system.is_empty() {
        body["system"] = json!(system.join("\n\n"));
    }

    if let Some(tools) = tools.filter(|t| !t.is_empty()) {
        body["tools"] = json!(tools
            .iter()
            .map(|t| json!({
                "name": t.function.name,
                "description": t.function.description,
                "input_schema": t.function.parameters,
            }))
            .collect::<Vec<_>>());
    }

    body
}

fn convert_message(message: &ChatMessage) -> (&'static str, Vec<Value>) {
    match message.role {
        Role::Tool => {
            let block = json!({
                "type": "tool_result",
                "tool_use_id": message.tool_call_id.clone().unwrap_or_default(),
                "content": message.content.clone().unwrap_or_default(),
            });
            ("user", vec![block])
        }
        Role::Assistant => {
            let mut blocks = Vec::new();
            if let Some(text) = message.text_content().filter(|t| !t.trim().is_empty()) {
                blocks.push(json!({ "type": "text", "text": text }));
            }
            for call in message.tool_calls.iter().flatten() {
                let input: Value = serde_json::from_str(&call.function.arguments)
                    .unwrap_or_else(|_| json!({}));
                blocks.push(json!({
                    "type": "tool_use",
                    "id": call.id,
                    "name": call.function.name,
                    "input": input,
                }));
            }
            ("assistant", blocks)
        }
        Role::User | Role::System => {
            let blocks = message
                .text_content()
                .filter(|t| !t.is_empty())
                .map(|text| vec![json!({ "type": "text", "text": text })])
                .unwrap_or_default();
            ("user", blocks)
        }
    }
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    usage: Option<MessagesUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct MessagesUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

/// Decode a Messages API response body.
pub(crate) fn parse_response(body: &str) -> Result<ChatResponse, LlmError> {
    let parsed: MessagesResponse = serde_json::from_str(body).map_err(|e| {
        LlmError::parse_error(format!("Failed to parse response: {}, body: {}", e, body))
    })?;

    let mut text = Vec::new();
    let mut tool_calls = Vec::new();
    for block in parsed.content {
        match block {
            ContentBlock::Text { text: t } => text.push(t),
            ContentBlock::ToolUse { id, name, input } => {
                tool_calls.push(ToolCall::new(id, name, input.to_string()));
            }
            ContentBlock::Other => {}
        }
    }

    Ok(ChatResponse {
        content: if text.is_empty() {
            None
        } else {
            Some(text.join("\n"))
        },
        tool_calls: if tool_calls.is_empty() {
            None
        } else {
            Some(tool_calls)
        },
        finish_reason: parsed.stop_reason,
        usage: parsed
            .usage
            .map(|u| TokenUsage::new(u.input_tokens, u.output_tokens)),
        model: parsed.model,
    })
}
