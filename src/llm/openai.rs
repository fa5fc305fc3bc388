//! OpenAI-compatible chat-completions client.
//!
//! Serves every provider that speaks the `/chat/completions` dialect: OpenAI
//! itself, OpenRouter, and Google's OpenAI-compatible Gemini endpoint. The
//! client makes exactly one request per call; fallback is the router's job.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::error::{parse_retry_after, LlmError};
use super::{ChatMessage, ChatResponse, LlmClient, TokenUsage, ToolCall, ToolDefinition};

pub const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";
pub const OPENROUTER_API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
pub const GOOGLE_OPENAI_API_URL: &str =
    "https://generativelanguage.googleapis.com/v1beta/openai/chat/completions";

/// Client for any OpenAI-compatible chat-completions endpoint.
pub struct OpenAiCompatibleClient {
    client: Client,
    api_key: String,
    endpoint: String,
}

impl OpenAiCompatibleClient {
    pub fn new(api_key: String, endpoint: impl Into<String>, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            api_key,
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Execute a single request without retry.
    async fn execute_request(&self, request: &ChatRequest<'_>) -> Result<ChatResponse, LlmError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| LlmError::from_transport(&e))?;

        let status = response.status();
        let retry_after = parse_retry_after(response.headers());
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(LlmError::from_status(status.as_u16(), &body, retry_after));
        }

        parse_response(&body, request.model)
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatibleClient {
    async fn chat_completion(
        &self,
        model: &str,
        messages: &[ChatMessage],
        tools: Option<&[ToolDefinition]>,
    ) -> Result<ChatResponse, LlmError> {
        let tools = tools.filter(|t| !t.is_empty());
        let request = ChatRequest {
            model,
            messages,
            tools,
            tool_choice: tools.map(|_| "auto"),
        };

        tracing::debug!(endpoint = %self.endpoint, model = %model, "Sending chat completion request");

        self.execute_request(&request).await
    }
}

/// Decode a chat-completions response body.
pub(crate) fn parse_response(body: &str, requested_model: &str) -> Result<ChatResponse, LlmError> {
    let parsed: ChatCompletionResponse = serde_json::from_str(body).map_err(|e| {
        LlmError::parse_error(format!("Failed to parse response: {}, body: {}", e, body))
    })?;

    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::parse_error("No choices in response".to_string()))?;

    // Some compatible endpoints omit call ids; tool results must still link back.
    let tool_calls = choice.message.tool_calls.map(|calls| {
        calls
            .into_iter()
            .map(|mut call| {
                if call.id.is_empty() {
                    call.id = format!("call_{}", uuid::Uuid::new_v4().simple());
                }
                call
            })
            .collect::<Vec<_>>()
    });

    Ok(ChatResponse {
        content: choice.message.content,
        tool_calls,
        finish_reason: choice.finish_reason,
        usage: parsed
            .usage
            .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens)),
        model: parsed.model.or_else(|| Some(requested_model.to_string())),
    })
}

/// Chat-completions request format.
#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [ToolDefinition]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}
