pub mod anthropic;
pub mod anthropic_stream;
pub mod graph;
pub mod history;
pub mod provider;
pub mod segmenter;
pub mod stream;
pub mod tools;

pub use anthropic::AnthropicProvider;
pub use graph::{AgentGraph, Reason};
pub use history::HistoryMessage;
pub use provider::{ChatRequest, ChatResponse, LlmProvider, Message, ProviderError, Role, ToolCall, ToolDefinition};
pub use tools::{Tool, ToolResult};
