//! `create_task` / `cancel_task` — the two tool calls exposed to the LLM
//! (§4.2 "Tools"). Implemented against `relaybot_agent::Tool` so the agent
//! crate never needs to know this crate exists.

use std::sync::Arc;

use async_trait::async_trait;
use relaybot_agent::{Tool, ToolResult};
use relaybot_core::SourceKey;
use relaybot_dispatcher::Dispatcher;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::engine::SchedulerEngine;
use crate::store;
use crate::types::{ScheduledTask, TaskKind};

/// `source` defaults to the dispatcher's `current_source` read fresh at
/// execute-time rather than a value captured once at wiring time — the
/// dispatcher sets it before the agent invocation that might call this tool
/// ever starts, and concurrent timer-driven invocations never share it.
pub struct CreateTaskTool {
    engine: Arc<SchedulerEngine>,
    dispatcher: Arc<Dispatcher>,
}

impl CreateTaskTool {
    pub fn new(engine: Arc<SchedulerEngine>, dispatcher: Arc<Dispatcher>) -> Self {
        Self { engine, dispatcher }
    }
}

#[derive(Deserialize)]
struct CreateTaskInput {
    kind: String,
    name: String,
    content: String,
    trigger: String,
    source: Option<SourceKey>,
    max_runs: Option<u32>,
    end_date: Option<chrono::NaiveDate>,
    original_prompt: Option<String>,
}

#[async_trait]
impl Tool for CreateTaskTool {
    fn name(&self) -> &str {
        "create_task"
    }

    fn description(&self) -> &str {
        "Create a scheduled task. kind: once|repeat|complex_repeat. trigger: timezone-naive \
         ISO datetime for once, or cron:<expr> for repeat/complex_repeat. source defaults to \
         the current chat. content is the task prompt in system voice; original_prompt is only \
         used for complex_repeat, also in system voice."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "kind": {"type": "string", "enum": ["once", "repeat", "complex_repeat"]},
                "name": {"type": "string"},
                "content": {"type": "string"},
                "trigger": {"type": "string"},
                "source": {"type": ["string", "null"]},
                "max_runs": {"type": ["integer", "null"]},
                "end_date": {"type": ["string", "null"]},
                "original_prompt": {"type": ["string", "null"]},
            },
            "required": ["kind", "name", "content", "trigger"],
        })
    }

    async fn execute(&self, input: Value) -> ToolResult {
        let input: CreateTaskInput = match serde_json::from_value(input) {
            Ok(i) => i,
            Err(e) => return ToolResult::error(format!("invalid create_task input: {e}")),
        };
        let kind = match input.kind.as_str() {
            "once" => TaskKind::Once,
            "repeat" => TaskKind::Repeat,
            "complex_repeat" => TaskKind::ComplexRepeat,
            other => return ToolResult::error(format!("unknown task kind: {other}")),
        };

        let tasks = match self.engine.store().load() {
            Ok(t) => t,
            Err(e) => return ToolResult::error(format!("failed to load task store: {e}")),
        };
        let unique = store::unique_name(&input.name, &tasks);

        let source = match input.source {
            Some(s) => s,
            None => match self.dispatcher.current_source().await {
                Some(s) => s,
                None => return ToolResult::error("no active chat to default the task source to"),
            },
        };

        let task = ScheduledTask {
            task_id: Uuid::new_v4(),
            kind,
            name: unique.clone(),
            content: input.content,
            trigger: input.trigger,
            source,
            run_count: 0,
            last_run: None,
            max_runs: input.max_runs,
            end_date: input.end_date,
            original_prompt: input.original_prompt,
        };

        let mut tasks = tasks;
        tasks.push(task.clone());
        if let Err(e) = self.engine.store().save(&tasks) {
            return ToolResult::error(format!("failed to persist task: {e}"));
        }
        self.engine.register(&task).await;

        ToolResult::success(json!({ "task_id": task.task_id, "name": unique }).to_string())
    }
}

pub struct CancelTaskTool {
    engine: Arc<SchedulerEngine>,
}

impl CancelTaskTool {
    pub fn new(engine: Arc<SchedulerEngine>) -> Self {
        Self { engine }
    }
}

#[derive(Deserialize)]
struct CancelTaskInput {
    task_id: Option<String>,
    name: Option<String>,
}

#[async_trait]
impl Tool for CancelTaskTool {
    fn name(&self) -> &str {
        "cancel_task"
    }

    fn description(&self) -> &str {
        "Cancel a scheduled task by task_id (preferred) or name."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task_id": {"type": ["string", "null"]},
                "name": {"type": ["string", "null"]},
            },
        })
    }

    async fn execute(&self, input: Value) -> ToolResult {
        let input: CancelTaskInput = match serde_json::from_value(input) {
            Ok(i) => i,
            Err(e) => return ToolResult::error(format!("invalid cancel_task input: {e}")),
        };

        let mut tasks = match self.engine.store().load() {
            Ok(t) => t,
            Err(e) => return ToolResult::error(format!("failed to load task store: {e}")),
        };

        let target_id = input
            .task_id
            .as_deref()
            .and_then(|id| Uuid::parse_str(id).ok())
            .and_then(|id| tasks.iter().find(|t| t.task_id == id).map(|t| t.task_id))
            .or_else(|| {
                input
                    .name
                    .as_deref()
                    .and_then(|name| tasks.iter().find(|t| t.name == name).map(|t| t.task_id))
            });

        let Some(target_id) = target_id else {
            return ToolResult::success(json!({ "error": "Task not found" }).to_string());
        };
        let name = tasks
            .iter()
            .find(|t| t.task_id == target_id)
            .map(|t| t.name.clone())
            .unwrap_or_default();
        tasks.retain(|t| t.task_id != target_id);
        if let Err(e) = self.engine.store().save(&tasks) {
            return ToolResult::error(format!("failed to persist task removal: {e}"));
        }
        self.engine.unregister(target_id).await;

        ToolResult::success(json!({ "cancelled": name }).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaybot_agent::{AgentGraph, ChatRequest, ChatResponse, LlmProvider, ProviderError};
    use relaybot_transport::{ChannelError, FriendInfo, GroupInfo, OutboundApi, RawMessage};
    use std::path::Path;

    struct EchoProvider;

    #[async_trait]
    impl LlmProvider for EchoProvider {
        fn name(&self) -> &str {
            "echo"
        }
        async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
            Ok(ChatResponse {
                content: "ok".into(),
                model: req.model.clone(),
                tokens_in: 1,
                tokens_out: 1,
                stop_reason: "end_turn".into(),
                tool_calls: vec![],
            })
        }
    }

    struct NullPoster;

    #[async_trait]
    impl OutboundApi for NullPoster {
        async fn post_group(&self, _: &str, _: &str) -> Result<(), ChannelError> {
            Ok(())
        }
        async fn post_private(&self, _: &str, _: &str) -> Result<(), ChannelError> {
            Ok(())
        }
        async fn upload_private_file(&self, _: &str, _: &Path, _: &str) -> Result<(), ChannelError> {
            Ok(())
        }
        async fn get_msg(&self, _: &str) -> Result<Option<RawMessage>, ChannelError> {
            Ok(None)
        }
        async fn get_group_info(&self, _: &str) -> Result<Option<GroupInfo>, ChannelError> {
            Ok(None)
        }
        async fn get_friend_list(&self) -> Result<Vec<FriendInfo>, ChannelError> {
            Ok(vec![])
        }
        async fn get_group_list(&self, _: bool) -> Result<Vec<GroupInfo>, ChannelError> {
            Ok(vec![])
        }
        async fn get_group_file_url(&self, _: &str, _: &str) -> Result<Option<String>, ChannelError> {
            Ok(None)
        }
        async fn get_private_file_url(&self, _: &str) -> Result<Option<String>, ChannelError> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn create_task_response_includes_task_id_and_name() {
        let dir = tempfile::tempdir().unwrap();
        let agent = Arc::new(AgentGraph::new(Box::new(EchoProvider), "m".into(), 4096, 8000, None));
        let dispatcher = Dispatcher::new(agent.clone(), 60);
        let engine = SchedulerEngine::new(dir.path().join("tasks.json"), dispatcher.clone(), agent, Arc::new(NullPoster));

        let tool = CreateTaskTool::new(engine, dispatcher);
        let result = tool
            .execute(json!({
                "kind": "once",
                "name": "reminder",
                "content": "ping",
                "trigger": "2099-01-01T00:00:00",
                "source": "group:g1",
            }))
            .await;

        let value: Value = serde_json::from_str(&result.content).unwrap();
        assert!(value.get("task_id").and_then(Value::as_str).is_some());
        assert_eq!(value.get("name").unwrap(), "reminder");
    }
}
