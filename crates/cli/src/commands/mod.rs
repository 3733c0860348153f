//! Subcommand implementations.

pub mod assemble;
pub mod config_cmd;
pub mod init;
pub mod memory;
pub mod prompt;

use memtier_config::AppConfig;
use memtier_memory::MemoryManager;
use std::path::{Path, PathBuf};

/// Config file location: the `--config` flag, else the default path.
pub fn config_file(explicit: Option<&Path>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(|| AppConfig::config_dir().join("config.toml"))
}

/// Load configuration with environment overrides applied.
pub fn load_config(explicit: Option<&Path>) -> Result<AppConfig, Box<dyn std::error::Error>> {
    let mut config = AppConfig::load_from(&config_file(explicit))
        .map_err(|e| format!("Failed to load config: {e}"))?;
    config.apply_overrides(|name| std::env::var(name).ok())?;
    Ok(config)
}

pub fn build_manager(explicit: Option<&Path>) -> Result<MemoryManager, Box<dyn std::error::Error>> {
    let config = load_config(explicit)?;
    let manager = MemoryManager::from_config(&config)?;
    tracing::debug!(store = manager.store().name(), "Memory manager ready");
    Ok(manager)
}
