//! `studyhub.toml` loading for the quiz side.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::engine::EngineConfig;
use crate::progress::ProgressConfig;

/// Quiz engine and progress settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuizConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub progress: ProgressConfig,
}

/// Resolve environment variable references like `${VAR_NAME}` in a string.
///
/// Unset variables resolve to the empty string.
pub fn resolve_env_vars(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find("${") {
        let Some(end) = rest[start..].find('}') else {
            break;
        };
        let var_name = &rest[start + 2..start + end];
        result.push_str(&rest[..start]);
        result.push_str(&std::env::var(var_name).unwrap_or_default());
        // Substituted values are not expanded again.
        rest = &rest[start + end + 1..];
    }
    result.push_str(rest);
    result
}

/// Find the config file to use.
///
/// Search order:
/// 1. the explicit path, which must exist
/// 2. `studyhub.toml` in the current directory
/// 3. `~/.config/studyhub/config.toml`
pub fn find_config_file(path: Option<&Path>) -> Result<Option<PathBuf>> {
    if let Some(p) = path {
        if p.exists() {
            return Ok(Some(p.to_path_buf()));
        }
        anyhow::bail!("config file not found: {}", p.display());
    }

    let local = PathBuf::from("studyhub.toml");
    if local.exists() {
        return Ok(Some(local));
    }
    Ok(config_dir()
        .map(|dir| dir.join("config.toml"))
        .filter(|global| global.exists()))
}

/// Read the raw config text, if a config file was found.
pub fn read_config_file(path: Option<&Path>) -> Result<Option<(PathBuf, String)>> {
    match find_config_file(path)? {
        Some(path) => {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config: {}", path.display()))?;
            Ok(Some((path, content)))
        }
        None => Ok(None),
    }
}

fn config_dir() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(|h| PathBuf::from(h).join(".config").join("studyhub"))
}

pub fn load_config() -> Result<QuizConfig> {
    load_config_from(None)
}

/// Load config from an explicit path, or search the default locations.
pub fn load_config_from(path: Option<&Path>) -> Result<QuizConfig> {
    let mut config = match read_config_file(path)? {
        Some((path, content)) => toml::from_str::<QuizConfig>(&content)
            .with_context(|| format!("failed to parse config: {}", path.display()))?,
        None => QuizConfig::default(),
    };
    config.progress.key_prefix = resolve_env_vars(&config.progress.key_prefix);
    Ok(config)
}
