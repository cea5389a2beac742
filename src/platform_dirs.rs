/// Cross-platform directory management for hook-dispatch
///
/// Uses the `dirs` crate to handle platform-specific directories
/// following OS conventions:
/// - Linux/Unix: XDG Base Directory Specification
/// - macOS: Apple directory guidelines
/// - Windows: Windows directory standards
use anyhow::{anyhow, Result};
use std::fs;
use std::path::{Path, PathBuf};

const APP_NAME: &str = "hook-dispatch";

/// Get the data directory for hook-dispatch
///
/// Returns platform-specific data directory:
/// - Linux: `$XDG_DATA_HOME/hook-dispatch` or `~/.local/share/hook-dispatch`
/// - macOS: `~/Library/Application Support/hook-dispatch`
/// - Windows: `%LOCALAPPDATA%\hook-dispatch`
pub fn data_dir() -> Result<PathBuf> {
    let base_dir =
        dirs::data_local_dir().ok_or_else(|| anyhow!("Unable to determine data directory"))?;
    Ok(base_dir.join(APP_NAME))
}

/// Get the config directory for hook-dispatch
///
/// Returns platform-specific config directory:
/// - Linux: `$XDG_CONFIG_HOME/hook-dispatch` or `~/.config/hook-dispatch`
/// - macOS: `~/Library/Application Support/hook-dispatch`
/// - Windows: `%APPDATA%\hook-dispatch`
pub fn config_dir() -> Result<PathBuf> {
    let base_dir =
        dirs::config_dir().ok_or_else(|| anyhow!("Unable to determine config directory"))?;
    Ok(base_dir.join(APP_NAME))
}

/// Default configuration file
pub fn config_file() -> Result<PathBuf> {
    Ok(config_dir()?.join("hooks.toml"))
}

/// Root of the per-client state directories
pub fn state_dir() -> Result<PathBuf> {
    Ok(data_dir()?.join("state"))
}

/// Directory for rolling log files
pub fn logs_dir() -> Result<PathBuf> {
    Ok(data_dir()?.join("logs"))
}

/// Ensure a directory exists, creating it if necessary
pub fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)?;
    }
    Ok(())
}
