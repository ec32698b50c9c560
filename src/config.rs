use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::addressing::DEFAULT_GLOBAL_CHANNEL;

pub const DEFAULT_CONFIG_PATH: &str = "config/chat.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Multiaddrs with a `/p2p/<PeerId>` suffix dialled at startup.
    pub bootstrap_nodes: Vec<String>,
    pub display_name: Option<String>,
    pub global_channel_name: String,
    pub topic: String,
    pub listen_addr: String,
    pub key_path: String,
    pub presence_interval_secs: u64,
    pub dedup_window: usize,
    /// List the sender among direct message recipients so it sees its own DMs.
    pub include_self_in_direct_messages: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bootstrap_nodes: Vec::new(),
            display_name: None,
            global_channel_name: DEFAULT_GLOBAL_CHANNEL.to_string(),
            topic: "distributed-chat".to_string(),
            listen_addr: "/ip4/0.0.0.0/tcp/0".to_string(),
            key_path: "data/chat_key.hex".to_string(),
            presence_interval_secs: 30,
            dedup_window: 1024,
            include_self_in_direct_messages: true,
        }
    }
}

impl AppConfig {
    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            presence_interval: Duration::from_secs(self.presence_interval_secs),
            dedup_window: self.dedup_window,
        }
    }

    /// Sets the display name and writes the whole config back to `path`.
    pub fn persist_display_name(&mut self, path: &str, name: &str) -> std::io::Result<()> {
        self.display_name = Some(name.to_string());
        save_config(path, self)
    }
}

/// Immutable settings handed to the controller at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Period of presence re-announcements. Zero disables them.
    pub presence_interval: Duration,
    /// Number of recent message ids remembered for duplicate suppression.
    /// Zero disables suppression.
    pub dedup_window: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        AppConfig::default().controller_config()
    }
}

pub fn load_config(path: &str) -> AppConfig {
    let path = Path::new(path);
    match fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<AppConfig>(&content) {
            Ok(config) => config,
            Err(err) => {
                log::warn!("Failed to parse config file {}: {err}", path.display());
                AppConfig::default()
            }
        },
        Err(err) => {
            log::info!(
                "Config file {} not found ({err}); using defaults",
                path.display()
            );
            AppConfig::default()
        }
    }
}

pub fn save_config(path: &str, config: &AppConfig) -> std::io::Result<()> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string_pretty(config)?;
    fs::write(path, json)
}
