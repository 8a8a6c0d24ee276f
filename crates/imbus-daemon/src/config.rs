//! Daemon configuration loaded from TOML.

use imbus_types::message::CAP_ALL;
use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub hotkey: HotkeyConfig,
    #[serde(default)]
    pub input: InputConfig,
}

/// Socket and runtime settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Bus socket path; resolved from the environment when unset.
    #[serde(default)]
    pub socket: Option<String>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Outbound frames buffered per connection before it is dropped.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket: None,
            log_level: default_log_level(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HotkeyConfig {
    #[serde(default = "default_trigger")]
    pub trigger: String,
}

impl Default for HotkeyConfig {
    fn default() -> Self {
        Self {
            trigger: default_trigger(),
        }
    }
}

/// Defaults for new input contexts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    #[serde(default = "default_capabilities")]
    pub capabilities: u32,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            capabilities: default_capabilities(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_trigger() -> String {
    "Control+space".to_string()
}

fn default_capabilities() -> u32 {
    CAP_ALL
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = Config::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("trigger = \"Control+space\""));
        assert!(toml_str.contains("capabilities = 15"));
    }

    #[test]
    fn parse_example_config() {
        let toml_str = r#"
[daemon]
socket = "/run/user/1000/imbus/bus"
log_level = "debug"
queue_capacity = 64

[hotkey]
trigger = "Shift+space"

[input]
capabilities = 14
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.daemon.socket.as_deref(), Some("/run/user/1000/imbus/bus"));
        assert_eq!(config.daemon.queue_capacity, 64);
        assert_eq!(config.hotkey.trigger, "Shift+space");
        assert_eq!(config.input.capabilities, 14);
    }

    #[test]
    fn missing_sections_use_defaults() {
        let config: Config = toml::from_str("[daemon]\nlog_level = \"warn\"\n").unwrap();
        assert_eq!(config.daemon.log_level, "warn");
        assert_eq!(config.daemon.queue_capacity, 1024);
        assert!(config.daemon.socket.is_none());
        assert_eq!(config.hotkey.trigger, "Control+space");
    }
}
