use std::collections::HashSet;
use std::path::Path;

use figment::{
    providers::{Env, Format, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

fn default_context_limit_tokens() -> u32 {
    8000
}
fn default_timeout_summarize_seconds() -> u64 {
    1800
}
fn default_timeout_clear_seconds() -> u64 {
    3600
}
fn default_reply_max_length() -> usize {
    50
}
fn default_media_timeout() -> u64 {
    60
}

/// `agent/settings.yaml` — layered with `RELAYBOT_*` environment overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    #[serde(default = "default_context_limit_tokens")]
    pub context_limit_tokens: u32,
    #[serde(default = "default_timeout_summarize_seconds")]
    pub timeout_summarize_seconds: u64,
    #[serde(default = "default_timeout_clear_seconds")]
    pub timeout_clear_seconds: u64,
    #[serde(default = "default_reply_max_length")]
    pub reply_max_length: usize,
    #[serde(default)]
    pub media: MediaSettings,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            context_limit_tokens: default_context_limit_tokens(),
            timeout_summarize_seconds: default_timeout_summarize_seconds(),
            timeout_clear_seconds: default_timeout_clear_seconds(),
            reply_max_length: default_reply_max_length(),
            media: MediaSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MediaSettings {
    pub transcription_model: Option<String>,
    pub transcription_provider: Option<String>,
    #[serde(default = "default_media_timeout")]
    pub timeout: u64,
    pub sync_process_threshold_mb: Option<u64>,
    #[serde(default)]
    pub image: MediaTypeSettings,
    #[serde(default)]
    pub audio: MediaTypeSettings,
    #[serde(default)]
    pub video: MediaTypeSettings,
    #[serde(default)]
    pub document: MediaTypeSettings,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct MediaTypeSettings {
    #[serde(default)]
    pub transcribe: bool,
    #[serde(default)]
    pub passthrough: bool,
    pub max_duration: Option<u64>,
    #[serde(default)]
    pub trim_over_limit: bool,
}

impl AgentSettings {
    /// Load `agent/settings.yaml` with `RELAYBOT_*` env overrides. A missing
    /// file is not an error — every field has a default (§6).
    pub fn load(path: &Path) -> Result<Self> {
        let settings: AgentSettings = Figment::new()
            .merge(Yaml::file(path))
            .merge(Env::prefixed("RELAYBOT_").split("_"))
            .extract()
            .map_err(|e| CoreError::Config(e.to_string()))?;
        Ok(settings)
    }
}

/// `permissions.yaml` — reloaded from disk on every command check (cheap,
/// allows hot-edit per §4.5). A missing file yields an empty permission set
/// (everyone is `Role::User`).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Permissions {
    #[serde(default)]
    pub admin: Vec<String>,
    #[serde(default)]
    pub developer: Vec<String>,
}

impl Permissions {
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Ok(serde_yaml::from_str(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn role_of(&self, user_id: &str) -> crate::types::Role {
        if self.admin.iter().any(|id| id == user_id) {
            crate::types::Role::Admin
        } else if self.developer.iter().any(|id| id == user_id) {
            crate::types::Role::Developer
        } else {
            crate::types::Role::User
        }
    }

    /// All ids with elevated access, for surfaces that need to enumerate them.
    pub fn privileged_ids(&self) -> HashSet<&str> {
        self.admin
            .iter()
            .chain(self.developer.iter())
            .map(String::as_str)
            .collect()
    }
}

/// Load `agent/prompt.txt`, seeding from `prompt.txt.example` if missing.
/// An empty file means "no system prompt" (§6).
pub fn load_prompt(path: &Path, example_path: &Path) -> Result<Option<String>> {
    if !path.exists() {
        if example_path.exists() {
            std::fs::copy(example_path, path)?;
        } else {
            return Ok(None);
        }
    }
    let contents = std::fs::read_to_string(path)?;
    if contents.trim().is_empty() {
        Ok(None)
    } else {
        Ok(Some(contents))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_default_when_file_missing() {
        let settings = AgentSettings::load(Path::new("/nonexistent/settings.yaml")).unwrap();
        assert_eq!(settings.context_limit_tokens, 8000);
        assert_eq!(settings.timeout_summarize_seconds, 1800);
    }

    #[test]
    fn settings_load_from_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.yaml");
        std::fs::write(&path, "context_limit_tokens: 4000\nreply_max_length: 10\n").unwrap();
        let settings = AgentSettings::load(&path).unwrap();
        assert_eq!(settings.context_limit_tokens, 4000);
        assert_eq!(settings.reply_max_length, 10);
        // unset fields keep their defaults
        assert_eq!(settings.timeout_summarize_seconds, 1800);
    }

    #[test]
    fn permissions_role_lookup() {
        let perms = Permissions {
            admin: vec!["u1".to_string()],
            developer: vec!["u2".to_string()],
        };
        assert_eq!(perms.role_of("u1"), crate::types::Role::Admin);
        assert_eq!(perms.role_of("u2"), crate::types::Role::Developer);
        assert_eq!(perms.role_of("u3"), crate::types::Role::User);
    }

    #[test]
    fn permissions_missing_file_is_empty() {
        let perms = Permissions::load(Path::new("/nonexistent/permissions.yaml")).unwrap();
        assert!(perms.admin.is_empty());
        assert!(perms.developer.is_empty());
    }

    #[test]
    fn prompt_seeds_from_example_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let example = dir.path().join("prompt.txt.example");
        let target = dir.path().join("prompt.txt");
        std::fs::write(&example, "you are a bot").unwrap();
        let prompt = load_prompt(&target, &example).unwrap();
        assert_eq!(prompt.as_deref(), Some("you are a bot"));
        assert!(target.exists());
    }

    #[test]
    fn prompt_empty_file_means_none() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("prompt.txt");
        std::fs::write(&target, "   \n").unwrap();
        let prompt = load_prompt(&target, &dir.path().join("missing.example")).unwrap();
        assert_eq!(prompt, None);
    }
}
