//! Config loading and runtime paths.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::config::Config;
use crate::error::DaemonError;

/// Environment variable overriding the bus socket path.
pub const ADDRESS_ENV: &str = "IMBUS_ADDRESS";

/// Load configuration from the given path, or the default location.
pub fn load_config(path: Option<&str>) -> Result<Config, DaemonError> {
    let config_path = match path {
        Some(p) => PathBuf::from(p),
        None => default_config_path(),
    };

    if config_path.exists() {
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| DaemonError::Config(format!("failed to read config: {e}")))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| DaemonError::Config(format!("failed to parse config: {e}")))?;
        info!(path = %config_path.display(), "loaded config");
        Ok(config)
    } else {
        info!("no config file found, using defaults");
        Ok(Config::default())
    }
}

/// Get the default config directory path.
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("~/.config"))
        .join("imbus")
}

fn default_config_path() -> PathBuf {
    config_dir().join("config.toml")
}

fn runtime_dir() -> PathBuf {
    dirs::runtime_dir()
        .or_else(dirs::state_dir)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
}

/// Resolve the bus socket: explicit flag, then `IMBUS_ADDRESS`, then the
/// config file, then the per-user runtime directory.
pub fn socket_path(flag: Option<&str>, config: &Config) -> PathBuf {
    if let Some(path) = flag {
        return PathBuf::from(path);
    }
    if let Some(path) = std::env::var_os(ADDRESS_ENV).filter(|p| !p.is_empty()) {
        return PathBuf::from(path);
    }
    if let Some(path) = &config.daemon.socket {
        return PathBuf::from(path);
    }
    runtime_dir().join("imbus").join("bus")
}

/// Get the PID file path.
pub fn pid_file_path() -> PathBuf {
    runtime_dir().join("imbus.pid")
}

/// Refuse to start when another daemon's PID file names a live process.
pub fn write_pid_file(path: &Path) -> Result<(), DaemonError> {
    if let Ok(content) = std::fs::read_to_string(path) {
        if let Ok(pid) = content.trim().parse::<u32>() {
            if Path::new(&format!("/proc/{pid}")).exists() && pid != std::process::id() {
                return Err(DaemonError::AlreadyRunning);
            }
        }
        warn!(path = %path.display(), "removing stale pid file");
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| DaemonError::Config(format!("failed to create runtime dir: {e}")))?;
    }
    std::fs::write(path, std::process::id().to_string())
        .map_err(|e| DaemonError::Config(format!("failed to write pid file: {e}")))?;
    Ok(())
}

pub fn remove_pid_file(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        warn!(path = %path.display(), error = %e, "failed to remove pid file");
    }
}
