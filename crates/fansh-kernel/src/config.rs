//! Configuration surface.
//!
//! fansh consumes its configuration; producing it (and everything about
//! credentials) belongs to the operator. The file is TOML: a `[shell]`
//! block for the interactive surface and one `[server.NAME]` table per
//! endpoint, consumed by the transport provider.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::output::DEFAULT_OPROMPT;

/// Default interactive prompt template.
pub const DEFAULT_PROMPT: &str = "[${COUNT}] <<< ";

/// Default on-disk command log.
pub const DEFAULT_HISTORY_FILE: &str = "~/.fansh_history";

/// The `[shell]` block.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    /// Prompt template; placeholders `${COUNT}`, `${HOSTNAME}`, `${USER}`, `${PWD}`.
    pub prompt: String,
    /// Per-host output prefix template; adds `${SERVER}`.
    pub oprompt: String,
    /// Command log path, `~`-expandable.
    pub history_file: String,
    /// Local shell snippet run before the editor starts.
    pub pre_cmd: String,
    /// Local shell snippet run when the shell exits, on every exit path.
    pub post_cmd: String,
    /// Color output prefixes per server.
    pub auto_color: bool,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            prompt: DEFAULT_PROMPT.to_string(),
            oprompt: DEFAULT_OPROMPT.to_string(),
            history_file: DEFAULT_HISTORY_FILE.to_string(),
            pre_cmd: String::new(),
            post_cmd: String::new(),
            auto_color: true,
        }
    }
}

/// One `[server.NAME]` table. Consumed by the transport provider; the core
/// never interprets these fields beyond building the connect argv.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    /// Override the transport argv entirely (the command is appended).
    #[serde(default)]
    pub connect_command: Option<Vec<String>>,
}

/// The whole config file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub shell: ShellConfig,
    pub server: BTreeMap<String, ServerConfig>,
}

impl Config {
    /// Load and parse a TOML config file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("failed to parse config {}", path.display()))
    }

    /// Configured server names, in declaration (name) order.
    pub fn server_names(&self) -> Vec<String> {
        self.server.keys().cloned().collect()
    }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(base) = directories::BaseDirs::new() {
            return base.home_dir().join(rest);
        }
    }
    PathBuf::from(path)
}
