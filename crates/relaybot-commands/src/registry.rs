//! Static command table (§4.5). Mirrors `commands.py`'s `_register`
//! decorator, but as a plain const slice rather than a runtime-populated
//! dict — the command set is fixed at compile time.

use relaybot_core::Role;

pub struct CommandSpec {
    pub name: &'static str,
    pub min_role: Role,
    pub description: &'static str,
    /// Empty string means "no arguments".
    pub usage: &'static str,
}

pub const COMMANDS: &[CommandSpec] = &[
    CommandSpec { name: "help", min_role: Role::Developer, description: "列出可用指令或查看指令详情", usage: "/help [指令名]" },
    CommandSpec { name: "token", min_role: Role::Developer, description: "显示当前上下文token数", usage: "" },
    CommandSpec { name: "raw", min_role: Role::Developer, description: "显示最后一轮对话", usage: "" },
    CommandSpec { name: "status", min_role: Role::Developer, description: "显示Bot状态", usage: "" },
    CommandSpec { name: "tasks", min_role: Role::Developer, description: "列出活跃的定时任务", usage: "" },
    CommandSpec { name: "context", min_role: Role::Developer, description: "导出当前上下文历史", usage: "" },
    CommandSpec { name: "prompt", min_role: Role::Developer, description: "导出当前系统提示词", usage: "" },
    CommandSpec { name: "log", min_role: Role::Developer, description: "导出日志文件", usage: "/log [YYYY-MM-DD]" },
    CommandSpec { name: "reload", min_role: Role::Admin, description: "重载配置", usage: "/reload <config|contact>" },
    CommandSpec { name: "summarize", min_role: Role::Admin, description: "立即总结上下文", usage: "" },
    CommandSpec { name: "clear_context", min_role: Role::Admin, description: "清空上下文历史", usage: "" },
];

pub fn find(name: &str) -> Option<&'static CommandSpec> {
    COMMANDS.iter().find(|c| c.name == name)
}
