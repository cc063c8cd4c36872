//! Conversation history — the process-wide, ordered message list the LLM
//! graph reads and rewrites (§3 "Conversation message").

use serde_json::Value;

use crate::provider::ToolCall;

/// One entry in the conversation history. Identity is positional — there is
/// no separate id space, matching the "ordered; identity by position"
/// invariant.
#[derive(Debug, Clone)]
pub enum HistoryMessage {
    /// A user turn: plain text plus any multimodal content blocks carried
    /// through unchanged from the parser (§3 "Parsed payload").
    User {
        content: String,
        content_blocks: Vec<Value>,
    },
    /// An assistant turn. `tool_calls` is non-empty exactly when this turn
    /// must be immediately followed by matching `ToolResult` entries
    /// (invariant 3).
    Assistant {
        content: String,
        tool_calls: Vec<ToolCall>,
        tokens_in: Option<u32>,
        tokens_out: Option<u32>,
    },
    /// Result of one tool call, keyed back to the assistant turn that made it.
    ToolResult {
        tool_call_id: String,
        content: String,
        is_error: bool,
    },
    /// A system-voice note: the `当前时间` stamp, a `<context-summary>` block,
    /// or a batched missed-task report.
    System { content: String },
}

impl HistoryMessage {
    /// True for `User` and `System` — the anchor kinds `summarize` splits on.
    pub fn is_human_or_system_anchor(&self) -> bool {
        matches!(self, HistoryMessage::User { .. } | HistoryMessage::System { .. })
    }

    pub fn is_tool_result(&self) -> bool {
        matches!(self, HistoryMessage::ToolResult { .. })
    }
}

/// Render the history into the raw JSON message list the provider expects,
/// the same shape `tool_loop` used to build inline.
pub fn to_raw_messages(history: &[HistoryMessage]) -> Vec<Value> {
    let mut out = Vec::with_capacity(history.len());
    let mut pending_tool_results: Vec<Value> = Vec::new();

    for msg in history {
        match msg {
            HistoryMessage::User {
                content,
                content_blocks,
            } => {
                flush_tool_results(&mut out, &mut pending_tool_results);
                if content_blocks.is_empty() {
                    out.push(serde_json::json!({ "role": "user", "content": content }));
                } else {
                    let mut blocks = vec![serde_json::json!({ "type": "text", "text": content })];
                    blocks.extend(content_blocks.iter().cloned());
                    out.push(serde_json::json!({ "role": "user", "content": blocks }));
                }
            }
            HistoryMessage::System { content } => {
                flush_tool_results(&mut out, &mut pending_tool_results);
                out.push(serde_json::json!({ "role": "user", "content": content }));
            }
            HistoryMessage::Assistant {
                content,
                tool_calls,
                ..
            } => {
                flush_tool_results(&mut out, &mut pending_tool_results);
                let mut blocks = Vec::new();
                if !content.is_empty() {
                    blocks.push(serde_json::json!({ "type": "text", "text": content }));
                }
                for call in tool_calls {
                    blocks.push(serde_json::json!({
                        "type": "tool_use",
                        "id": call.id,
                        "name": call.name,
                        "input": call.input,
                    }));
                }
                out.push(serde_json::json!({ "role": "assistant", "content": blocks }));
            }
            HistoryMessage::ToolResult {
                tool_call_id,
                content,
                is_error,
            } => {
                pending_tool_results.push(serde_json::json!({
                    "type": "tool_result",
                    "tool_use_id": tool_call_id,
                    "content": content,
                    "is_error": is_error,
                }));
            }
        }
    }
    flush_tool_results(&mut out, &mut pending_tool_results);
    out
}

fn flush_tool_results(out: &mut Vec<Value>, pending: &mut Vec<Value>) {
    if !pending.is_empty() {
        out.push(serde_json::json!({ "role": "user", "content": std::mem::take(pending) }));
    }
}

/// Strip an incomplete tool-call sequence from the tail of a slice: if the
/// last message is an `Assistant` turn with tool calls that aren't all
/// answered yet, drop it (and any partial `ToolResult`s after it). Used by
/// `summarize` to keep `head` well-formed (invariant 3).
pub fn safe_tail(msgs: &[HistoryMessage]) -> Vec<HistoryMessage> {
    let mut out = msgs.to_vec();
    while let Some(last) = out.last() {
        if let HistoryMessage::Assistant { tool_calls, .. } = last {
            if !tool_calls.is_empty() {
                out.pop();
                continue;
            }
        }
        if last.is_tool_result() {
            out.pop();
            continue;
        }
        break;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_raw_messages_groups_consecutive_tool_results() {
        let history = vec![
            HistoryMessage::User {
                content: "hi".into(),
                content_blocks: vec![],
            },
            HistoryMessage::Assistant {
                content: "".into(),
                tool_calls: vec![ToolCall {
                    id: "t1".into(),
                    name: "create_task".into(),
                    input: serde_json::json!({}),
                }],
                tokens_in: None,
                tokens_out: None,
            },
            HistoryMessage::ToolResult {
                tool_call_id: "t1".into(),
                content: "ok".into(),
                is_error: false,
            },
        ];
        let raw = to_raw_messages(&history);
        assert_eq!(raw.len(), 3);
        assert_eq!(raw[2]["role"], "user");
        assert!(raw[2]["content"][0]["tool_use_id"] == "t1");
    }

    #[test]
    fn safe_tail_drops_dangling_tool_call() {
        let msgs = vec![
            HistoryMessage::User {
                content: "hi".into(),
                content_blocks: vec![],
            },
            HistoryMessage::Assistant {
                content: "".into(),
                tool_calls: vec![ToolCall {
                    id: "t1".into(),
                    name: "x".into(),
                    input: serde_json::json!({}),
                }],
                tokens_in: None,
                tokens_out: None,
            },
        ];
        let safe = safe_tail(&msgs);
        assert_eq!(safe.len(), 1);
    }
}
