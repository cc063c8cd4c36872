//! Scheduled-task engine: persistence, the tick loop, the fire path, startup
//! recovery, and the `complex_repeat` reschedule workflow (§4.2).
//!
//! Grounded on `scheduler.py`'s module-level functions of the same names and
//! on this crate's own `run()` tick-loop idiom (`tokio::select!` over a
//! `watch::Receiver<bool>`). The SQLite polling table is replaced by an
//! in-memory `next_fire` map recomputed from the JSON-persisted trigger on
//! every fire — the declarative task fields are the source of truth on disk,
//! the map is just a cache of "when does each one fire next".

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use relaybot_agent::{AgentGraph, Message, Reason, Role};
use relaybot_core::{Priority, SourceKey};
use relaybot_dispatcher::{BoxFuture, Dispatcher, ReplyFn};
use relaybot_transport::OutboundApi;
use serde::Deserialize;
use tokio::sync::{watch, Mutex};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{Result, SchedulerError};
use crate::store::{self, TaskStore};
use crate::trigger::{self, Trigger};
use crate::types::{ScheduledTask, TaskKind};

pub struct SchedulerEngine {
    store: TaskStore,
    next_fire: Mutex<HashMap<Uuid, DateTime<Utc>>>,
    dispatcher: Arc<Dispatcher>,
    agent: Arc<AgentGraph>,
    poster: Arc<dyn OutboundApi>,
}

impl SchedulerEngine {
    pub fn new(
        path: impl AsRef<std::path::Path>,
        dispatcher: Arc<Dispatcher>,
        agent: Arc<AgentGraph>,
        poster: Arc<dyn OutboundApi>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store: TaskStore::new(path),
            next_fire: Mutex::new(HashMap::new()),
            dispatcher,
            agent,
            poster,
        })
    }

    /// §4.2 "Startup recovery". Loads the store, reports every missed task to
    /// the agent in one batched prompt, drops missed `ONCE` tasks, persists,
    /// and primes `next_fire` for everything that survives.
    pub async fn bootstrap(&self) -> Result<()> {
        let tasks = self.store.load()?;
        let now = Utc::now();

        let mut missed = Vec::new();
        for task in &tasks {
            if task_is_missed(task, now) {
                missed.push(task.clone());
            }
        }

        if !missed.is_empty() {
            let lines: Vec<String> = missed
                .iter()
                .map(|t| format!("- {} (原定时间：{}): {}", t.name, t.trigger, t.content))
                .collect();
            let report = format!("以下定时任务在离线期间已到期：\n{}", lines.join("\n"));
            if let Err(e) = self
                .agent
                .invoke(Reason::ScheduledTask, report, Vec::new(), &[], |_| {})
                .await
            {
                error!(error = %e, "failed to report missed tasks to the agent");
            }
        }

        let missed_once: std::collections::HashSet<Uuid> = missed
            .iter()
            .filter(|t| t.kind == TaskKind::Once)
            .map(|t| t.task_id)
            .collect();
        let surviving: Vec<ScheduledTask> = tasks
            .into_iter()
            .filter(|t| !missed_once.contains(&t.task_id))
            .collect();
        self.store.save(&surviving)?;

        let mut next_fire = self.next_fire.lock().await;
        for task in &surviving {
            if let Some(at) = initial_next_fire(task, now) {
                next_fire.insert(task.task_id, at);
            }
        }
        Ok(())
    }

    /// Register (or re-register) a task's next fire time after it was just
    /// created or rescheduled.
    pub async fn register(&self, task: &ScheduledTask) {
        if let Some(at) = initial_next_fire(task, Utc::now()) {
            self.next_fire.lock().await.insert(task.task_id, at);
        }
    }

    pub async fn unregister(&self, task_id: Uuid) {
        self.next_fire.lock().await.remove(&task_id);
    }

    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    /// §4.2 tick loop. Polls the in-memory `next_fire` map once a second.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!("scheduled-task engine started");
        if let Err(e) = self.bootstrap().await {
            error!(error = %e, "scheduler bootstrap failed");
        }

        let mut interval = tokio::time::interval(std::time::Duration::from_secs(1));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        error!(error = %e, "scheduler tick error");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("scheduled-task engine shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn tick(&self) -> Result<()> {
        let now = Utc::now();
        let due: Vec<Uuid> = {
            let next_fire = self.next_fire.lock().await;
            next_fire
                .iter()
                .filter(|(_, at)| **at <= now)
                .map(|(id, _)| *id)
                .collect()
        };
        for task_id in due {
            if let Err(e) = self.on_trigger(task_id).await {
                error!(task_id = %task_id, error = %e, "scheduled-task trigger error");
            }
        }
        Ok(())
    }

    /// §4.2 "Fire path".
    async fn on_trigger(&self, task_id: Uuid) -> Result<()> {
        let mut tasks = self.store.load()?;
        let Some(idx) = tasks.iter().position(|t| t.task_id == task_id) else {
            self.next_fire.lock().await.remove(&task_id);
            return Ok(());
        };

        let now = Utc::now();
        tasks[idx].run_count += 1;
        tasks[idx].last_run = Some(now.to_rfc3339());
        let expired = tasks[idx].is_expired(now.date_naive());

        let fired = tasks[idx].clone();
        if expired {
            tasks.remove(idx);
            self.next_fire.lock().await.remove(&task_id);
        } else {
            self.store_next_fire(&fired, now).await;
        }
        self.store.save(&tasks)?;

        let header = match fired.kind {
            TaskKind::Repeat => format!(
                "<scheduled_task>{}-第{}次</scheduled_task>",
                fired.name, fired.run_count
            ),
            TaskKind::Once | TaskKind::ComplexRepeat => {
                format!("<scheduled_task>{}</scheduled_task>", fired.name)
            }
        };
        let text = format!("{header}\n{}", fired.content);
        let reply_fn = reply_fn_for(self.poster.clone(), fired.source.clone());
        self.dispatcher
            .enqueue(Priority::Scheduled, fired.source.clone(), text, reply_fn, Vec::new())
            .await;

        if fired.kind == TaskKind::ComplexRepeat && !expired {
            self.reschedule_complex(fired).await?;
        }
        Ok(())
    }

    async fn store_next_fire(&self, task: &ScheduledTask, now: DateTime<Utc>) {
        if let Some(at) = trigger::parse(&task.trigger)
            .ok()
            .and_then(|t| trigger::next_after(&t, now))
        {
            self.next_fire.lock().await.insert(task.task_id, at);
        } else {
            self.next_fire.lock().await.remove(&task.task_id);
        }
    }

    /// §4.3 `utility` node driving the `complex_repeat` reschedule workflow.
    async fn reschedule_complex(&self, task: ScheduledTask) -> Result<()> {
        let today = Utc::now().format("%Y-%m-%d").to_string();
        let system = format!(
            "你是一个定时任务调度器。今天是{today}。根据任务信息决定下次触发时间或取消任务。\
             reschedule时提供trigger（ISO datetime或cron:表达式），其余字段如需更新则填写否则为null；\
             cancel时其余字段为null。"
        );
        let context = format!(
            "任务名称：{}\n已执行次数：{}\n原始提示：{}\n当前内容：{}\n当前触发器：{}",
            task.name,
            task.run_count,
            task.original_prompt.as_deref().unwrap_or(""),
            task.content,
            task.trigger,
        );
        let messages = vec![
            Message { role: Role::System, content: system },
            Message { role: Role::User, content: context },
        ];
        let schema = serde_json::json!({
            "type": "object",
            "properties": {
                "action": {"type": "string", "enum": ["reschedule", "cancel"]},
                "trigger": {"type": ["string", "null"]},
                "name": {"type": ["string", "null"]},
                "content": {"type": ["string", "null"]},
                "original_prompt": {"type": ["string", "null"]},
            },
            "required": ["action"],
        });
        let raw = self.agent.run_utility(messages, schema).await?;
        let decision: RescheduleDecision = serde_json::from_value(raw).map_err(SchedulerError::Json)?;

        let mut tasks = self.store.load()?;
        let Some(idx) = tasks.iter().position(|t| t.task_id == task.task_id) else {
            return Ok(());
        };

        match decision.action.as_str() {
            "cancel" => {
                tasks.remove(idx);
                self.store.save(&tasks)?;
                self.next_fire.lock().await.remove(&task.task_id);
            }
            "reschedule" => {
                if let Some(trigger) = decision.trigger {
                    tasks[idx].trigger = trigger;
                }
                if let Some(name) = decision.name {
                    tasks[idx].name = name;
                }
                if let Some(content) = decision.content {
                    tasks[idx].content = content;
                }
                if let Some(original_prompt) = decision.original_prompt {
                    tasks[idx].original_prompt = Some(original_prompt);
                }
                let updated = tasks[idx].clone();
                self.store.save(&tasks)?;
                self.register(&updated).await;
            }
            other => warn!(action = other, "unknown reschedule decision, leaving task as-is"),
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct RescheduleDecision {
    action: String,
    trigger: Option<String>,
    name: Option<String>,
    content: Option<String>,
    original_prompt: Option<String>,
}

/// §4.2 startup recovery predicate: a `ONCE` task that never ran and whose
/// trigger is in the past, or a `REPEAT`/`COMPLEX_REPEAT` whose next fire
/// relative to `last_run` would already be due.
fn task_is_missed(task: &ScheduledTask, now: DateTime<Utc>) -> bool {
    let Ok(parsed) = trigger::parse(&task.trigger) else {
        return false;
    };
    match parsed {
        Trigger::Once(at) => task.last_run.is_none() && at < now,
        Trigger::Cron(_) => {
            let reference = task
                .last_run
                .as_deref()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|| now - chrono::Duration::days(3650));
            trigger::next_after(&parsed, reference)
                .map(|next| next < now)
                .unwrap_or(false)
        }
    }
}

fn initial_next_fire(task: &ScheduledTask, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let parsed = trigger::parse(&task.trigger).ok()?;
    let reference = task
        .last_run
        .as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(now);
    trigger::next_after(&parsed, reference)
}

fn reply_fn_for(poster: Arc<dyn OutboundApi>, source: SourceKey) -> ReplyFn {
    Arc::new(move |text: String| -> Pin<Box<dyn Future<Output = ()> + Send>> {
        let poster = poster.clone();
        let source = source.clone();
        Box::pin(async move {
            let result = match &source {
                SourceKey::Group(id) => poster.post_group(id, &text).await,
                SourceKey::Private(id) => poster.post_private(id, &text).await,
            };
            if let Err(e) = result {
                warn!(source = %source, error = %e, "failed to deliver scheduled-task reply");
            }
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missed_once_task_with_past_trigger_is_flagged() {
        let task = ScheduledTask {
            task_id: Uuid::new_v4(),
            kind: TaskKind::Once,
            name: "t".into(),
            content: "c".into(),
            trigger: "2020-01-01T00:00:00".into(),
            source: SourceKey::group("g"),
            run_count: 0,
            last_run: None,
            max_runs: None,
            end_date: None,
            original_prompt: None,
        };
        assert!(task_is_missed(&task, Utc::now()));
    }

    #[test]
    fn once_task_with_future_trigger_is_not_missed() {
        let task = ScheduledTask {
            task_id: Uuid::new_v4(),
            kind: TaskKind::Once,
            name: "t".into(),
            content: "c".into(),
            trigger: "2099-01-01T00:00:00".into(),
            source: SourceKey::group("g"),
            run_count: 0,
            last_run: None,
            max_runs: None,
            end_date: None,
            original_prompt: None,
        };
        assert!(!task_is_missed(&task, Utc::now()));
    }
}
