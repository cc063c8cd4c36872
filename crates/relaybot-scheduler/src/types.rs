use chrono::NaiveDate;
use relaybot_core::SourceKey;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// `ONCE` fires and removes itself. `REPEAT` re-fires on the same trigger
/// until exhausted. `COMPLEX_REPEAT` additionally asks the agent to pick its
/// own next trigger after every firing (§4.2 "complex-reschedule").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Once,
    Repeat,
    ComplexRepeat,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskKind::Once => "once",
            TaskKind::Repeat => "repeat",
            TaskKind::ComplexRepeat => "complex_repeat",
        };
        write!(f, "{s}")
    }
}

/// A task record as it lives in `tasks.json`. `trigger` is kept as the raw
/// string the tool call supplied — either a bare ISO-8601 datetime or
/// `cron:<expr>` — and parsed on demand by [`crate::trigger`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub task_id: Uuid,
    pub kind: TaskKind,
    pub name: String,
    pub content: String,
    pub trigger: String,
    pub source: SourceKey,
    #[serde(default)]
    pub run_count: u32,
    #[serde(default)]
    pub last_run: Option<String>,
    #[serde(default)]
    pub max_runs: Option<u32>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub original_prompt: Option<String>,
}

impl ScheduledTask {
    /// §4.2 fire-path step 3.
    pub fn is_expired(&self, today: NaiveDate) -> bool {
        self.kind == TaskKind::Once
            || matches!(self.max_runs, Some(max) if self.run_count >= max)
            || matches!(self.end_date, Some(end) if today > end)
    }
}
