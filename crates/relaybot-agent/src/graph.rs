//! The LLM state machine: router → generate → tools → summarize/finalize
//! (§4.3 "Conversation state and LLM graph").
//!
//! The whole invocation — from router to whichever terminal node is
//! reached — runs with the history mutex held for its entire duration. That
//! mutex *is* the single-flight "agent lock": holding it is what it means
//! to be the one invocation currently running.

use std::sync::atomic::{AtomicU32, Ordering};

use chrono::Local;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::history::{self, HistoryMessage};
use crate::provider::{ChatRequest, LlmProvider, Message, ProviderError, Role, ToolCall};
use crate::segmenter::Segmenter;
use crate::stream::StreamEvent;
use crate::tools::{self, Tool, ToolResult};

/// Maximum generate↔tools round trips per invocation, a runaway-agent guard.
const MAX_ITERATIONS: usize = 25;

/// Why the graph is being invoked — decides the entry node (§4.3 `router`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    UserMessage,
    ScheduledTask,
    SessionTimeout,
}

enum Node {
    Generate,
    Tools,
    Summarize,
    SummarizeAll,
    Finalize,
}

/// Owns the conversation history and drives it through the LLM graph.
pub struct AgentGraph {
    provider: Box<dyn LlmProvider>,
    model: String,
    max_tokens: u32,
    context_limit_tokens: u32,
    system_prompt: RwLock<Option<String>>,
    history: Mutex<Vec<HistoryMessage>>,
    current_token_usage: AtomicU32,
}

impl AgentGraph {
    pub fn new(
        provider: Box<dyn LlmProvider>,
        model: String,
        max_tokens: u32,
        context_limit_tokens: u32,
        system_prompt: Option<String>,
    ) -> Self {
        Self {
            provider,
            model,
            max_tokens,
            context_limit_tokens,
            system_prompt: RwLock::new(system_prompt),
            history: Mutex::new(Vec::new()),
            current_token_usage: AtomicU32::new(0),
        }
    }

    pub fn current_token_usage(&self) -> u32 {
        self.current_token_usage.load(Ordering::Relaxed)
    }

    /// Replace the bound system prompt — used by `/reload config`.
    pub async fn set_system_prompt(&self, prompt: Option<String>) {
        *self.system_prompt.write().await = prompt;
    }

    pub async fn history_len(&self) -> usize {
        self.history.lock().await.len()
    }

    /// `/clear_context`, and the `session_clear` inactivity timer.
    pub async fn clear_history(&self) {
        self.history.lock().await.clear();
    }

    /// `/raw`: the last human turn and the last assistant turn, verbatim.
    pub async fn last_raw_turn(&self) -> Option<(String, String)> {
        let history = self.history.lock().await;
        let last_user = history.iter().rev().find_map(|m| match m {
            HistoryMessage::User { content, .. } => Some(content.clone()),
            _ => None,
        })?;
        let last_assistant = history.iter().rev().find_map(|m| match m {
            HistoryMessage::Assistant { content, .. } => Some(content.clone()),
            _ => None,
        })?;
        Some((last_user, last_assistant))
    }

    /// `/token`: prefer the provider's own counting when it has one (none of
    /// ours do today), else fall back to `len(content)//2` per message.
    pub async fn estimate_token_count(&self) -> usize {
        let history = self.history.lock().await;
        history::to_raw_messages(&history)
            .iter()
            .map(|m| m.to_string().len() / 2)
            .sum()
    }

    /// Export the full history as the same raw JSON the LLM sees — used by
    /// `/context`.
    pub async fn export_history(&self) -> Vec<Value> {
        let history = self.history.lock().await;
        history::to_raw_messages(&history)
    }

    /// Run the graph for `USER_MESSAGE` / `SCHEDULED_TASK` / `SESSION_TIMEOUT`
    /// (§4.3 `router`). `on_segment` is called once per emitted output
    /// segment, in order; streaming only happens on the `generate` node.
    pub async fn invoke(
        &self,
        reason: Reason,
        text: String,
        content_blocks: Vec<Value>,
        tools: &[Box<dyn Tool>],
        mut on_segment: impl FnMut(String) + Send,
    ) -> Result<(), ProviderError> {
        let mut history = self.history.lock().await;

        let mut node = match reason {
            Reason::UserMessage | Reason::ScheduledTask => {
                history.push(HistoryMessage::User {
                    content: text,
                    content_blocks,
                });
                Node::Generate
            }
            Reason::SessionTimeout => Node::SummarizeAll,
        };

        let mut iterations = 0usize;
        loop {
            node = match node {
                Node::Generate => {
                    iterations += 1;
                    if iterations > MAX_ITERATIONS {
                        warn!(iterations, "agent graph hit max generate/tools iterations");
                        Node::Finalize
                    } else {
                        self.run_generate(&mut history, tools, &mut on_segment)
                            .await?
                    }
                }
                Node::Tools => self.run_tools(&mut history, tools).await,
                Node::Summarize => self.run_summarize(&mut history, false).await?,
                Node::SummarizeAll => self.run_summarize(&mut history, true).await?,
                Node::Finalize => break,
            };
        }

        Ok(())
    }

    /// `COMPLEX_RESCHEDULE` → `utility` (§4.3). Does not touch history or
    /// `current_token_usage`; still runs under the agent lock so it can't
    /// interleave with a `generate` turn mutating the same model/account.
    pub async fn run_utility(
        &self,
        messages: Vec<Message>,
        schema: Value,
    ) -> Result<Value, ProviderError> {
        let _guard = self.history.lock().await;
        let system = self
            .system_prompt
            .read()
            .await
            .clone()
            .unwrap_or_default();
        let req = ChatRequest {
            model: self.model.clone(),
            system,
            messages,
            max_tokens: self.max_tokens,
            stream: false,
            tools: vec![crate::provider::ToolDefinition {
                name: "decide".to_string(),
                description: "Structured decision output.".to_string(),
                input_schema: schema,
            }],
            raw_messages: None,
        };
        let resp = self.provider.send(&req).await?;
        Ok(resp
            .tool_calls
            .into_iter()
            .next()
            .map(|call| call.input)
            .unwrap_or(Value::Null))
    }

    async fn run_generate(
        &self,
        history: &mut Vec<HistoryMessage>,
        tools: &[Box<dyn Tool>],
        on_segment: &mut (impl FnMut(String) + Send),
    ) -> Result<Node, ProviderError> {
        let tail_is_tool_result = history.last().map(|m| m.is_tool_result()).unwrap_or(false);
        if !tail_is_tool_result {
            history.push(HistoryMessage::System {
                content: format!("当前时间：{}", Local::now().format("%Y-%m-%d %H:%M:%S")),
            });
        }

        let system = self
            .system_prompt
            .read()
            .await
            .clone()
            .unwrap_or_default();
        let raw = history::to_raw_messages(history);
        let req = ChatRequest {
            model: self.model.clone(),
            system,
            messages: Vec::new(),
            max_tokens: self.max_tokens,
            stream: true,
            tools: tools::to_definitions(tools),
            raw_messages: Some(raw),
        };

        let (tx, mut rx) = tokio::sync::mpsc::channel::<StreamEvent>(64);

        let mut content = String::new();
        let mut tool_calls: Vec<ToolCall> = Vec::new();
        let mut tokens_in: u32 = 0;
        let mut tokens_out: u32 = 0;
        let mut segmenter = Segmenter::new();

        let drain = async {
            while let Some(event) = rx.recv().await {
                match event {
                    StreamEvent::TextDelta { text } => {
                        for seg in segmenter.feed(&text) {
                            on_segment(seg);
                        }
                        content.push_str(&text);
                    }
                    StreamEvent::ToolUse { id, name, input } => {
                        tool_calls.push(ToolCall { id, name, input });
                    }
                    StreamEvent::Done {
                        tokens_in: ti,
                        tokens_out: to,
                        ..
                    } => {
                        tokens_in = ti;
                        tokens_out = to;
                    }
                    StreamEvent::Error { message } => {
                        warn!(message, "generate: stream error event");
                    }
                }
            }
        };

        let (send_result, ()) = tokio::join!(self.provider.send_stream(&req, tx), drain);
        send_result?;

        if let Some(tail) = segmenter.finish() {
            on_segment(tail);
        }

        debug!(tokens_in, tokens_out, tool_calls = tool_calls.len(), "generate complete");

        let has_tool_calls = !tool_calls.is_empty();
        history.push(HistoryMessage::Assistant {
            content,
            tool_calls,
            tokens_in: Some(tokens_in),
            tokens_out: Some(tokens_out),
        });

        if has_tool_calls {
            Ok(Node::Tools)
        } else if tokens_in > self.context_limit_tokens {
            Ok(Node::Summarize)
        } else {
            self.current_token_usage
                .store(tokens_in + tokens_out, Ordering::Relaxed);
            Ok(Node::Finalize)
        }
    }

    async fn run_tools(&self, history: &mut Vec<HistoryMessage>, tools: &[Box<dyn Tool>]) -> Node {
        let calls = match history.last() {
            Some(HistoryMessage::Assistant { tool_calls, .. }) => tool_calls.clone(),
            _ => Vec::new(),
        };
        for call in calls {
            let result = execute_tool(tools, &call).await;
            history.push(HistoryMessage::ToolResult {
                tool_call_id: call.id,
                content: result.content,
                is_error: result.is_error,
            });
        }
        Node::Generate
    }

    async fn run_summarize(
        &self,
        history: &mut Vec<HistoryMessage>,
        all: bool,
    ) -> Result<Node, ProviderError> {
        let (head, tail) = if all {
            (history.clone(), Vec::new())
        } else {
            match history.iter().rposition(HistoryMessage::is_human_or_system_anchor) {
                Some(anchor) => {
                    let tail = history[anchor..].to_vec();
                    let head = history::safe_tail(&history[..anchor]);
                    (head, tail)
                }
                None => return Ok(Node::Finalize),
            }
        };

        if head.is_empty() {
            return Ok(Node::Finalize);
        }

        let transcript = history::to_raw_messages(&head)
            .iter()
            .map(|m| m.to_string())
            .collect::<Vec<_>>()
            .join("\n");

        let req = ChatRequest {
            model: self.model.clone(),
            system: String::new(),
            messages: vec![Message {
                role: Role::User,
                content: format!("请总结以下对话，保留关键信息：\n{transcript}"),
            }],
            max_tokens: self.max_tokens,
            stream: false,
            tools: Vec::new(),
            raw_messages: None,
        };

        let resp = self.provider.send(&req).await?;
        let summary_content = format!(
            "<context-summary summary_time=\"{}\">{}</context-summary>",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            resp.content
        );

        let mut new_history = vec![HistoryMessage::System {
            content: summary_content,
        }];
        new_history.extend(tail);
        *history = new_history;

        let previous = self.current_token_usage.load(Ordering::Relaxed) as i64;
        let updated = (previous - resp.tokens_in as i64 + resp.tokens_out as i64).max(0);
        self.current_token_usage
            .store(updated as u32, Ordering::Relaxed);

        info!(all, "history summarized");
        Ok(Node::Finalize)
    }
}

async fn execute_tool(tools: &[Box<dyn Tool>], call: &ToolCall) -> ToolResult {
    match tools.iter().find(|t| t.name() == call.name) {
        Some(tool) => tool.execute(call.input.clone()).await,
        None => ToolResult::error(format!("unknown tool: {}", call.name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct EchoProvider;

    #[async_trait]
    impl LlmProvider for EchoProvider {
        fn name(&self) -> &str {
            "echo"
        }
        async fn send(
            &self,
            req: &ChatRequest,
        ) -> Result<crate::provider::ChatResponse, ProviderError> {
            Ok(crate::provider::ChatResponse {
                content: format!("echo:{}", req.messages.first().map(|m| m.content.clone()).unwrap_or_default()),
                model: req.model.clone(),
                tokens_in: 10,
                tokens_out: 5,
                stop_reason: "end_turn".into(),
                tool_calls: Vec::new(),
            })
        }
        async fn send_stream(
            &self,
            req: &ChatRequest,
            tx: tokio::sync::mpsc::Sender<StreamEvent>,
        ) -> Result<(), ProviderError> {
            let text = "hello\nworld\n".to_string();
            let _ = req;
            let _ = tx.send(StreamEvent::TextDelta { text }).await;
            let _ = tx
                .send(StreamEvent::Done {
                    model: "echo".into(),
                    tokens_in: 10,
                    tokens_out: 5,
                    stop_reason: "end_turn".into(),
                })
                .await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn generate_with_no_tool_calls_finalizes_and_records_usage() {
        let graph = AgentGraph::new(Box::new(EchoProvider), "m".into(), 4096, 8000, None);
        let mut segments = Vec::new();
        graph
            .invoke(
                Reason::UserMessage,
                "hi".into(),
                vec![],
                &[],
                |s| segments.push(s),
            )
            .await
            .unwrap();
        assert_eq!(segments, vec!["hello", "world"]);
        assert_eq!(graph.current_token_usage(), 15);
        assert_eq!(graph.history_len().await, 3); // user + time-note + assistant
    }

    #[tokio::test]
    async fn session_timeout_summarizes_and_clears_tail() {
        let graph = AgentGraph::new(Box::new(EchoProvider), "m".into(), 4096, 8000, None);
        let mut segments = Vec::new();
        graph
            .invoke(Reason::UserMessage, "hi".into(), vec![], &[], |s| segments.push(s))
            .await
            .unwrap();
        graph
            .invoke(Reason::SessionTimeout, String::new(), vec![], &[], |_| {})
            .await
            .unwrap();
        assert_eq!(graph.history_len().await, 1);
    }
}
