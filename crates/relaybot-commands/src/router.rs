//! Role-gated command dispatcher (§4.5).
//!
//! Grounded on `commands.py`'s `handle_command`: a `USER`-role caller never
//! even reaches the parser (falls through to normal chat), an unknown
//! command name replies `"未知指令: /{name}"`, and an under-privileged
//! caller replies `"权限不足"`. Every reply goes to the caller's private
//! channel regardless of where the command text arrived from, matching
//! `bot_api.post_private_msg(user_id=event.user_id, ...)`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use relaybot_agent::{AgentGraph, Reason};
use relaybot_core::{AgentSettings, Permissions, Role};
use relaybot_dispatcher::Dispatcher;
use relaybot_scheduler::{ContactRefresh, SchedulerEngine, SessionTimers};
use relaybot_transport::OutboundApi;
use tracing::{error, warn};

use crate::registry::{self, COMMANDS};

pub struct CommandRouter {
    permissions_path: PathBuf,
    settings_path: PathBuf,
    prompt_path: PathBuf,
    prompt_example_path: PathBuf,
    log_dir: PathBuf,
    agent: Arc<AgentGraph>,
    dispatcher: Arc<Dispatcher>,
    scheduler: Arc<SchedulerEngine>,
    session_timers: Option<Arc<SessionTimers>>,
    contacts: Option<Arc<dyn ContactRefresh>>,
    poster: Arc<dyn OutboundApi>,
}

#[allow(clippy::too_many_arguments)]
impl CommandRouter {
    pub fn new(
        permissions_path: impl AsRef<Path>,
        settings_path: impl AsRef<Path>,
        prompt_path: impl AsRef<Path>,
        prompt_example_path: impl AsRef<Path>,
        log_dir: impl AsRef<Path>,
        agent: Arc<AgentGraph>,
        dispatcher: Arc<Dispatcher>,
        scheduler: Arc<SchedulerEngine>,
        session_timers: Option<Arc<SessionTimers>>,
        contacts: Option<Arc<dyn ContactRefresh>>,
        poster: Arc<dyn OutboundApi>,
    ) -> Self {
        Self {
            permissions_path: permissions_path.as_ref().to_path_buf(),
            settings_path: settings_path.as_ref().to_path_buf(),
            prompt_path: prompt_path.as_ref().to_path_buf(),
            prompt_example_path: prompt_example_path.as_ref().to_path_buf(),
            log_dir: log_dir.as_ref().to_path_buf(),
            agent,
            dispatcher,
            scheduler,
            session_timers,
            contacts,
            poster,
        }
    }

    fn role_of(&self, user_id: &str) -> Role {
        match Permissions::load(&self.permissions_path) {
            Ok(perms) => perms.role_of(user_id),
            Err(e) => {
                warn!(error = %e, "permissions.yaml unreadable, treating caller as unprivileged");
                Role::User
            }
        }
    }

    /// Returns `true` when `text` was handled as a command (whether or not
    /// it succeeded) — the caller should not feed it to normal chat
    /// handling in that case. `false` means "not a command for me".
    pub async fn handle(&self, user_id: &str, text: &str) -> bool {
        let Some(rest) = text.strip_prefix('/') else {
            return false;
        };
        let role = self.role_of(user_id);
        if role == Role::User {
            return false;
        }

        let mut parts = rest.splitn(2, char::is_whitespace);
        let cmd_name = parts.next().unwrap_or_default();
        let args = parts.next().unwrap_or_default().trim();

        let reply = match registry::find(cmd_name) {
            None => Some(format!("未知指令: /{cmd_name}")),
            Some(spec) if role < spec.min_role => Some("权限不足".to_string()),
            Some(_) => self.dispatch(cmd_name, role, args, user_id).await,
        };

        if let Some(text) = reply {
            if let Err(e) = self.poster.post_private(user_id, &text).await {
                error!(error = %e, "failed to deliver command reply");
            }
        }
        true
    }

    async fn dispatch(&self, cmd_name: &str, role: Role, args: &str, user_id: &str) -> Option<String> {
        match cmd_name {
            "help" => Some(self.cmd_help(role, args)),
            "token" => Some(self.cmd_token().await),
            "raw" => Some(self.cmd_raw().await),
            "status" => Some(self.cmd_status().await),
            "tasks" => Some(self.cmd_tasks().await),
            "context" => self.cmd_context(user_id).await,
            "prompt" => self.cmd_prompt(user_id).await,
            "log" => self.cmd_log(user_id, args).await,
            "reload" => Some(self.cmd_reload(args).await),
            "summarize" => Some(self.cmd_summarize().await),
            "clear_context" => Some(self.cmd_clear_context().await),
            other => Some(format!("未知指令: /{other}")),
        }
    }

    fn cmd_help(&self, role: Role, args: &str) -> String {
        if !args.is_empty() {
            let name = args.trim_start_matches('/');
            return match registry::find(name) {
                Some(spec) => format!(
                    "/{name} - {}\n用法: {}",
                    spec.description,
                    if spec.usage.is_empty() { "无参数" } else { spec.usage }
                ),
                None => format!("未知指令: /{name}"),
            };
        }
        COMMANDS
            .iter()
            .filter(|c| role >= c.min_role)
            .map(|c| format!("/{} - {}", c.name, c.description))
            .collect::<Vec<_>>()
            .join("\n")
    }

    async fn cmd_token(&self) -> String {
        format!("当前上下文token估算: {}", self.agent.estimate_token_count().await)
    }

    async fn cmd_raw(&self) -> String {
        match self.agent.last_raw_turn().await {
            Some((human, ai)) => format!("[Human] {human}\n[AI] {ai}"),
            None => "该轮对话在上下文历史中已被清除".to_string(),
        }
    }

    async fn cmd_status(&self) -> String {
        let msg_count = self.agent.history_len().await;
        let task_count = self.scheduler.store().load().map(|t| t.len()).unwrap_or(0);
        let queue_depth = self.dispatcher.queue_depth().await;
        let timeout = match self.session_timers.as_ref().and_then(|t| t.remaining_summarize_seconds()) {
            Some(s) if s > 0 => format!("{s}s"),
            Some(_) => "即将触发".to_string(),
            None => "N/A".to_string(),
        };
        [
            format!("会话活跃: {}", if msg_count > 0 { "是" } else { "否" }),
            format!("上下文消息数: {msg_count}"),
            format!("活跃任务数: {task_count}"),
            format!("超时倒计时: {timeout}"),
            format!("队列深度: {queue_depth}"),
        ]
        .join("\n")
    }

    async fn cmd_tasks(&self) -> String {
        let tasks = match self.scheduler.store().load() {
            Ok(tasks) => tasks,
            Err(e) => return format!("读取任务列表失败: {e}"),
        };
        if tasks.is_empty() {
            return "无活跃任务".to_string();
        }
        tasks
            .iter()
            .map(|t| format!("{} [{}] trigger={} runs={}", t.name, t.kind, t.trigger, t.run_count))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Exports the full history as JSON and uploads it; no separate text
    /// reply (the file upload is the response).
    async fn cmd_context(&self, user_id: &str) -> Option<String> {
        let history = self.agent.export_history().await;
        let Ok(json) = serde_json::to_string_pretty(&history) else {
            return Some("导出上下文失败".to_string());
        };
        let Ok(dir) = tempfile::tempdir() else {
            return Some("导出上下文失败".to_string());
        };
        let path = dir.path().join("context.json");
        if let Err(e) = tokio::fs::write(&path, json).await {
            return Some(format!("导出上下文失败: {e}"));
        }
        if let Err(e) = self.poster.upload_private_file(user_id, &path, "context.json").await {
            warn!(error = %e, "failed to upload context export");
            return Some(format!("上传失败: {e}"));
        }
        None
    }

    async fn cmd_prompt(&self, user_id: &str) -> Option<String> {
        if !self.prompt_path.is_file() {
            return Some("未找到提示词文件".to_string());
        }
        if let Err(e) = self.poster.upload_private_file(user_id, &self.prompt_path, "prompt.txt").await {
            warn!(error = %e, "failed to upload prompt export");
            return Some(format!("上传失败: {e}"));
        }
        None
    }

    async fn cmd_log(&self, user_id: &str, args: &str) -> Option<String> {
        let filename = if args.is_empty() {
            "bot.log".to_string()
        } else {
            format!("bot.log.{}", args.replace('-', "_"))
        };
        let path = self.log_dir.join(&filename);
        if !path.is_file() {
            return Some(format!("未找到日志: {}", path.display()));
        }
        if let Err(e) = self.poster.upload_private_file(user_id, &path, &filename).await {
            warn!(error = %e, "failed to upload log export");
            return Some(format!("上传失败: {e}"));
        }
        None
    }

    async fn cmd_reload(&self, args: &str) -> String {
        match args.trim() {
            "config" => {
                match AgentSettings::load(&self.settings_path) {
                    Ok(_) => {}
                    Err(e) => {
                        error!(error = %e, "failed to reload settings.yaml");
                        return format!("配置重载失败: {e}");
                    }
                }
                match relaybot_core::config::load_prompt(&self.prompt_path, &self.prompt_example_path) {
                    Ok(prompt) => {
                        self.agent.set_system_prompt(prompt).await;
                        "配置已重载".to_string()
                    }
                    Err(e) => {
                        error!(error = %e, "failed to reload prompt.txt");
                        format!("配置重载失败: {e}")
                    }
                }
            }
            "contact" => {
                if let Some(contacts) = &self.contacts {
                    contacts.refresh_all().await;
                    "联系人缓存已刷新".to_string()
                } else {
                    "联系人缓存不可用".to_string()
                }
            }
            _ => "用法: /reload <config|contact>".to_string(),
        }
    }

    async fn cmd_summarize(&self) -> String {
        if let Err(e) = self
            .agent
            .invoke(Reason::SessionTimeout, String::new(), Vec::new(), &[], |_| {})
            .await
        {
            error!(error = %e, "forced summarize failed");
        }
        "上下文已总结".to_string()
    }

    async fn cmd_clear_context(&self) -> String {
        self.agent.clear_history().await;
        "上下文已清空".to_string()
    }
}
