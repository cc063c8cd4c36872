//! The wire-agnostic events a streaming provider call emits, plus a small
//! SSE line parser shared by provider implementations (§4.3 "generate").

/// One increment of a streaming `generate` call. The agent graph's drain
/// loop (`graph.rs`) consumes these as they arrive; nothing here is
/// Anthropic-specific, so a second provider's `send_stream` can reuse it.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Incremental text content from the model.
    TextDelta { text: String },

    /// The model wants to call a tool.
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    /// Stream completed successfully.
    Done {
        model: String,
        tokens_in: u32,
        tokens_out: u32,
        stop_reason: String,
    },

    /// Error during streaming.
    Error { message: String },
}

/// One line of an `event: <type>` / `data: <json>` SSE frame.
#[derive(Debug)]
pub enum SseParsed {
    Event(String),
    Data(String),
}

pub fn parse_sse_line(line: &str) -> Option<SseParsed> {
    line.strip_prefix("event: ")
        .map(|event_type| SseParsed::Event(event_type.to_string()))
        .or_else(|| line.strip_prefix("data: ").map(|data| SseParsed::Data(data.to_string())))
}
