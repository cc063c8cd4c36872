use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::stream::StreamEvent;

/// A single message in the conversation history, in the shape the LLM API expects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// Tool definition sent to the LLM API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// A tool call extracted from the LLM response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

/// Request to an LLM provider.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub system: String,
    pub messages: Vec<Message>,
    pub max_tokens: u32,
    pub stream: bool,
    /// Tools to expose to the LLM. Empty means no tool-calling this turn.
    pub tools: Vec<ToolDefinition>,
    /// Raw JSON messages built by the graph's tool loop (overrides `messages`
    /// when set) — carries structured tool_use/tool_result content blocks
    /// that a plain `Message` can't represent.
    pub raw_messages: Option<Vec<serde_json::Value>>,
}

/// Response from an LLM provider (non-streaming).
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub model: String,
    pub tokens_in: u32,
    pub tokens_out: u32,
    pub stop_reason: String,
    /// Tool calls requested by the LLM. Empty when no tools are called.
    pub tool_calls: Vec<ToolCall>,
}

/// Common interface for LLM providers. The spec treats the LLM as a black box
/// behind this trait; `AnthropicProvider` is the one concrete adapter shipped.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name for logging and error messages.
    fn name(&self) -> &str;

    /// Send a non-streaming chat request, wait for full response.
    async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError>;

    /// Stream response events through a channel.
    /// Default: falls back to non-streaming send, emits TextDelta + Done.
    async fn send_stream(
        &self,
        req: &ChatRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), ProviderError> {
        let resp = self.send(req).await?;
        let _ = tx.send(StreamEvent::TextDelta { text: resp.content }).await;
        let _ = tx
            .send(StreamEvent::Done {
                model: resp.model,
                tokens_in: resp.tokens_in,
                tokens_out: resp.tokens_out,
                stop_reason: resp.stop_reason,
            })
            .await;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    #[error("operation cancelled")]
    Cancelled,
}
