//! Anthropic SSE stream decoder — turns chunked response bytes into
//! `StreamEvent`s the agent graph drains incrementally (§4.3 "generate").
//!
//! Grounded on the teacher's Anthropic streaming client: buffer partial
//! lines across chunk boundaries, dispatch each `data:` block by whichever
//! `event:` line preceded it, accumulate tool-call JSON across deltas.

use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::stream::{parse_sse_line, SseParsed, StreamEvent};

pub async fn process_stream(resp: reqwest::Response, tx: mpsc::Sender<StreamEvent>) {
    use futures_util::StreamExt;

    let mut decoder = Decoder::default();
    let mut line_buf = String::new();
    let mut byte_stream = resp.bytes_stream();

    while let Some(chunk) = byte_stream.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                let _ = tx.send(StreamEvent::Error { message: e.to_string() }).await;
                return;
            }
        };
        let Ok(text) = std::str::from_utf8(&chunk) else {
            continue;
        };

        // Anthropic's SSE lines can straddle chunk boundaries — keep the
        // trailing partial line buffered until the next chunk completes it.
        line_buf.push_str(text);
        let mut lines: Vec<&str> = line_buf.split('\n').collect();
        let remainder = lines.pop().unwrap_or_default().to_string();

        for line in lines {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Some(parsed) = parse_sse_line(line) else {
                continue;
            };
            match parsed {
                SseParsed::Event(ev) => decoder.current_event = ev,
                SseParsed::Data(data) => {
                    if let Some(event) = decoder.handle_data_block(&data) {
                        if tx.send(event).await.is_err() {
                            return; // receiver dropped
                        }
                    }
                }
            }
        }

        line_buf = remainder;
    }

    let _ = tx
        .send(StreamEvent::Done {
            model: decoder.model,
            tokens_in: decoder.tokens_in,
            tokens_out: decoder.tokens_out,
            stop_reason: decoder.stop_reason,
        })
        .await;
}

/// Running state while decoding one response. Anthropic streams deltas for
/// exactly one open content block at a time, so a single `current_block`
/// slot (rather than a stack) is enough to know what a delta means.
#[derive(Default)]
struct Decoder {
    current_event: String,
    current_block: String,
    tool_use_id: String,
    tool_use_name: String,
    tool_use_input_json: String,
    model: String,
    tokens_in: u32,
    tokens_out: u32,
    stop_reason: String,
}

impl Decoder {
    fn handle_data_block(&mut self, data: &str) -> Option<StreamEvent> {
        match self.current_event.as_str() {
            "message_start" => {
                if let Ok(msg) = serde_json::from_str::<MessageStart>(data) {
                    self.model = msg.message.model;
                    self.tokens_in = msg.message.usage.input_tokens;
                }
                None
            }
            "content_block_start" => {
                if let Ok(start) = serde_json::from_str::<ContentBlockStart>(data) {
                    self.current_block = start.content_block.block_type;
                    if self.current_block == "tool_use" {
                        self.tool_use_id = start.content_block.id.unwrap_or_default();
                        self.tool_use_name = start.content_block.name.unwrap_or_default();
                        self.tool_use_input_json.clear();
                    }
                }
                None
            }
            "content_block_delta" => self.handle_delta(data),
            "content_block_stop" => self.handle_block_stop(),
            "message_delta" => {
                if let Ok(delta) = serde_json::from_str::<MessageDelta>(data) {
                    self.tokens_out = delta.usage.output_tokens;
                    if let Some(reason) = delta.delta.stop_reason {
                        self.stop_reason = reason;
                    }
                }
                None
            }
            "error" => {
                warn!(data, "anthropic stream error");
                Some(StreamEvent::Error { message: data.to_string() })
            }
            // message_stop and anything else need no action.
            _ => None,
        }
    }

    fn handle_delta(&mut self, data: &str) -> Option<StreamEvent> {
        let delta: ContentBlockDelta = serde_json::from_str(data).ok()?;
        match delta.delta.delta_type.as_str() {
            "text_delta" => {
                let text = delta.delta.text?;
                debug!(len = text.len(), "stream text delta");
                Some(StreamEvent::TextDelta { text })
            }
            "input_json_delta" => {
                if let Some(partial) = delta.delta.partial_json {
                    self.tool_use_input_json.push_str(&partial);
                }
                None
            }
            other => {
                debug!(delta_type = other, "unhandled delta type");
                None
            }
        }
    }

    fn handle_block_stop(&mut self) -> Option<StreamEvent> {
        if self.current_block != "tool_use" {
            self.current_block.clear();
            return None;
        }
        let input = serde_json::from_str(&self.tool_use_input_json)
            .unwrap_or(serde_json::Value::Object(Default::default()));
        let event = StreamEvent::ToolUse {
            id: std::mem::take(&mut self.tool_use_id),
            name: std::mem::take(&mut self.tool_use_name),
            input,
        };
        self.tool_use_input_json.clear();
        self.current_block.clear();
        Some(event)
    }
}

// Anthropic SSE payload shapes — deserialization only.

#[derive(Deserialize)]
struct MessageStart {
    message: MessageStartInner,
}

#[derive(Deserialize)]
struct MessageStartInner {
    model: String,
    usage: InputUsage,
}

#[derive(Deserialize)]
struct InputUsage {
    input_tokens: u32,
}

#[derive(Deserialize)]
struct ContentBlockStart {
    content_block: ContentBlockMeta,
}

#[derive(Deserialize)]
struct ContentBlockMeta {
    #[serde(rename = "type")]
    block_type: String,
    /// Populated for `tool_use` blocks: the tool call id.
    id: Option<String>,
    /// Populated for `tool_use` blocks: the tool name.
    name: Option<String>,
}

#[derive(Deserialize)]
struct ContentBlockDelta {
    delta: DeltaContent,
}

#[derive(Deserialize)]
struct DeltaContent {
    #[serde(rename = "type")]
    delta_type: String,
    /// Populated for `text_delta` events.
    text: Option<String>,
    /// Populated for `input_json_delta` events (tool input streaming).
    partial_json: Option<String>,
}

#[derive(Deserialize)]
struct MessageDelta {
    delta: MessageDeltaInner,
    usage: OutputUsage,
}

#[derive(Deserialize)]
struct MessageDeltaInner {
    stop_reason: Option<String>,
}

#[derive(Deserialize)]
struct OutputUsage {
    output_tokens: u32,
}
