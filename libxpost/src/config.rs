//! Configuration management for xpost
//!
//! The configuration file is re-read at the start of every sync cycle, so
//! everything here is cheap to construct and carries no live handles.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::compose::SAFETY_MARGIN;
use crate::error::{ConfigError, Result};

/// Failure count above which an item is no longer retried
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub user_list: Vec<UserConfig>,
    pub target_instance_url: String,
    pub toot_len_limit: usize,
    pub max_attachment_count: usize,
    pub include_repost: bool,
    #[serde(default)]
    pub external_media: bool,
    pub standalone_repost: bool,
    pub include_post_url: bool,
    pub delete_after_days: u32,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default = "default_token_file")]
    pub token_file: String,
    #[serde(default)]
    pub poll: PollConfig,
}

/// Per-author entry; every `Option` field overrides the global value
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserConfig {
    pub id: String,
    #[serde(default)]
    pub include_repost: Option<bool>,
    #[serde(default)]
    pub external_media: Option<bool>,
    #[serde(default)]
    pub standalone_repost: Option<bool>,
    #[serde(default)]
    pub include_post_url: Option<bool>,
    #[serde(default)]
    pub toot_len_limit: Option<usize>,
    #[serde(default)]
    pub max_attachment_count: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    pub min_sleep_minutes: u64,
    pub max_sleep_minutes: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            min_sleep_minutes: 5,
            max_sleep_minutes: 10,
        }
    }
}

impl PollConfig {
    /// Random pause before the next cycle, in whole minutes within the range
    pub fn next_sleep(&self) -> Duration {
        let minutes = rand::thread_rng().gen_range(self.min_sleep_minutes..=self.max_sleep_minutes);
        Duration::from_secs(minutes * 60)
    }
}

/// Settings for one author after applying overrides
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveSettings {
    pub toot_len_limit: usize,
    pub max_attachment_count: usize,
    pub include_repost: bool,
    pub external_media: bool,
    pub standalone_repost: bool,
    pub include_post_url: bool,
}

fn default_failure_threshold() -> u32 {
    DEFAULT_FAILURE_THRESHOLD
}

fn default_database_path() -> String {
    "~/.local/share/xpost/ledger.db".to_string()
}

fn default_token_file() -> String {
    "~/.config/xpost/token".to_string()
}

impl Config {
    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration text
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(ConfigError::ParseError)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.user_list.is_empty() {
            return Err(ConfigError::MissingField("user_list".to_string()).into());
        }
        if let Some(user) = self.user_list.iter().find(|u| u.id.trim().is_empty()) {
            return Err(ConfigError::InvalidValue {
                field: "user_list.id".to_string(),
                reason: format!("empty id in entry {:?}", user),
            }
            .into());
        }
        if self.target_instance_url.trim().is_empty() {
            return Err(ConfigError::MissingField("target_instance_url".to_string()).into());
        }

        let limits = std::iter::once(("toot_len_limit", self.toot_len_limit)).chain(
            self.user_list
                .iter()
                .filter_map(|u| u.toot_len_limit.map(|l| ("user_list.toot_len_limit", l))),
        );
        for (field, limit) in limits {
            if limit <= SAFETY_MARGIN {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    reason: format!("must be greater than {}", SAFETY_MARGIN),
                }
                .into());
            }
        }

        if self.poll.min_sleep_minutes > self.poll.max_sleep_minutes {
            return Err(ConfigError::InvalidValue {
                field: "poll".to_string(),
                reason: "min_sleep_minutes exceeds max_sleep_minutes".to_string(),
            }
            .into());
        }

        Ok(())
    }

    /// Find the per-author entry, if any
    pub fn user(&self, author_id: &str) -> Option<&UserConfig> {
        self.user_list.iter().find(|u| u.id == author_id)
    }

    /// Resolve the settings that apply to `author_id`
    ///
    /// Authors without an entry (e.g. the author of a reposted original) get
    /// the global values.
    pub fn effective(&self, author_id: &str) -> EffectiveSettings {
        let user = self.user(author_id);
        let pick = |f: fn(&UserConfig) -> Option<bool>, global: bool| -> bool {
            user.and_then(f).unwrap_or(global)
        };

        EffectiveSettings {
            toot_len_limit: user
                .and_then(|u| u.toot_len_limit)
                .unwrap_or(self.toot_len_limit),
            max_attachment_count: user
                .and_then(|u| u.max_attachment_count)
                .unwrap_or(self.max_attachment_count),
            include_repost: pick(|u| u.include_repost, self.include_repost),
            external_media: pick(|u| u.external_media, self.external_media),
            standalone_repost: pick(|u| u.standalone_repost, self.standalone_repost),
            include_post_url: pick(|u| u.include_post_url, self.include_post_url),
        }
    }

    /// Ensure the instance URL carries a scheme
    pub fn instance_url(&self) -> String {
        let url = self.target_instance_url.trim().trim_end_matches('/');
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            format!("https://{}", url)
        }
    }
}

/// Resolve the configuration file path following the XDG Base Directory layout
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("XPOST_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("xpost").join("config.toml"))
}
