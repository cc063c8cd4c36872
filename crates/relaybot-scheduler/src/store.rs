//! Atomic JSON file persistence for the task list (§3 invariant 5).

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::types::ScheduledTask;

pub struct TaskStore {
    path: PathBuf,
}

impl TaskStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self { path: path.as_ref().to_path_buf() }
    }

    pub fn load(&self) -> Result<Vec<ScheduledTask>> {
        load(&self.path)
    }

    pub fn save(&self, tasks: &[ScheduledTask]) -> Result<()> {
        save(&self.path, tasks)
    }
}

pub fn load(path: &Path) -> Result<Vec<ScheduledTask>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let data = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&data)?)
}

/// Write-temp-then-rename: the file on disk is either the old contents or
/// the new ones in full, never a partial write.
pub fn save(path: &Path, tasks: &[ScheduledTask]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    let body = serde_json::to_string_pretty(tasks)?;
    std::fs::write(&tmp, body)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Append `"(1)"`, `"(2)"`, … until `name` no longer collides with an
/// existing task name (§3 invariant 6).
pub fn unique_name(name: &str, tasks: &[ScheduledTask]) -> String {
    if tasks.iter().all(|t| t.name != name) {
        return name.to_string();
    }
    let mut i = 1;
    loop {
        let candidate = format!("{name}({i})");
        if tasks.iter().all(|t| t.name != candidate) {
            return candidate;
        }
        i += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TaskKind;
    use relaybot_core::SourceKey;

    fn task(name: &str) -> ScheduledTask {
        ScheduledTask {
            task_id: uuid::Uuid::new_v4(),
            kind: TaskKind::Once,
            name: name.to_string(),
            content: String::new(),
            trigger: "2026-01-01T00:00:00".to_string(),
            source: SourceKey::group("g1"),
            run_count: 0,
            last_run: None,
            max_runs: None,
            end_date: None,
            original_prompt: None,
        }
    }

    #[test]
    fn round_trips_through_a_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json");
        let store = TaskStore::new(&path);
        let tasks = vec![task("提醒")];
        store.save(&tasks).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].name, "提醒");
    }

    #[test]
    fn dedupes_names_with_numeric_suffixes() {
        let existing = vec![task("提醒"), task("提醒(1)")];
        assert_eq!(unique_name("提醒", &existing), "提醒(2)");
        assert_eq!(unique_name("新任务", &existing), "新任务");
    }
}
