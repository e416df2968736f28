//! Initialize the configuration directory: create ~/.hearth, a default config, and the model directory.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config;

/// Create the config directory and default files if they do not exist.
/// - Creates the config directory (parent of config file path).
/// - Writes `config.json` with `{}` if missing.
/// - Creates the model directory the config resolves to.
pub fn init_config_dir(config_path: &Path) -> Result<PathBuf> {
    let config_dir = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(config_dir)
        .with_context(|| format!("creating config directory {}", config_dir.display()))?;

    if !config_path.exists() {
        std::fs::write(config_path, b"{}")
            .with_context(|| format!("writing default config to {}", config_path.display()))?;
        log::info!("created default config at {}", config_path.display());
    }

    let (cfg, _) = config::load_config(Some(config_path.to_path_buf()))?;
    let model_dir = config::resolve_model_dir(&cfg, config_path);
    if !model_dir.exists() {
        std::fs::create_dir_all(&model_dir)
            .with_context(|| format!("creating model directory {}", model_dir.display()))?;
        log::info!("created model directory at {}", model_dir.display());
    } else {
        log::debug!("model directory already exists at {}, skipping", model_dir.display());
    }

    Ok(config_dir.to_path_buf())
}
