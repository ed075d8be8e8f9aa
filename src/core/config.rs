//! Layered configuration: defaults, an optional JSON file, then CLI/env
//! overrides (highest precedence, since `clap`'s `env = ...` bindings
//! already fold environment variables into the parsed `CliConfig`).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use super::cli::{CliConfig, LogFormat};
use super::constants::{APP_DOT_FOLDER, CONFIG_FILE_NAME, DEFAULT_LISTEN};
use crate::broadcast::DEFAULT_QUEUE_DEPTH;
use crate::plugin::DEFAULT_DELIVERY_TIMEOUT_MS;

/// A plugin entry as it appears in the JSON config file.
#[derive(Debug, Clone, Deserialize)]
pub struct PluginFileConfig {
    pub name: String,
    pub path: PathBuf,
}

/// File-based configuration (JSON). Every field is optional so a
/// config file only needs to mention the settings it overrides.
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    pub listen: Option<String>,
    pub plugins: Option<Vec<PluginFileConfig>>,
    pub plugin_timeout_ms: Option<u64>,
    pub broadcast_queue_depth: Option<usize>,
    pub log_format: Option<LogFormat>,
    #[serde(default, flatten)]
    pub extra: serde_json::Value,
}

impl FileConfig {
    fn load_from_file(path: &Path) -> Result<Self> {
        tracing::debug!(path = %path.display(), "loading config file");
        let content = fs::read_to_string(path).with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = serde_json::from_str(&content).with_context(|| format!("failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    fn warn_unknown_fields(&self) {
        if let serde_json::Value::Object(map) = &self.extra
            && !map.is_empty()
        {
            let keys: String = map.keys().map(|k| k.as_str()).collect::<Vec<_>>().join(", ");
            tracing::warn!(fields = %keys, "unknown fields in config file (possible typos)");
        }
    }

    /// Merge `other` into `self`; fields present in `other` take
    /// precedence.
    fn merge(&mut self, other: FileConfig) {
        if other.listen.is_some() {
            self.listen = other.listen;
        }
        if other.plugins.is_some() {
            self.plugins = other.plugins;
        }
        if other.plugin_timeout_ms.is_some() {
            self.plugin_timeout_ms = other.plugin_timeout_ms;
        }
        if other.broadcast_queue_depth.is_some() {
            self.broadcast_queue_depth = other.broadcast_queue_depth;
        }
        if other.log_format.is_some() {
            self.log_format = other.log_format;
        }
    }
}

/// A plugin to load at startup, with its registration pattern left for
/// the caller to decide (the config surface only names plugins and
/// their module paths).
#[derive(Debug, Clone)]
pub struct PluginConfig {
    pub name: String,
    pub path: PathBuf,
}

/// Fully resolved application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen: String,
    pub plugins: Vec<PluginConfig>,
    pub plugin_timeout_ms: u64,
    pub broadcast_queue_depth: usize,
    pub log_format: LogFormat,
}

impl AppConfig {
    /// Load configuration from all sources.
    ///
    /// Priority (lowest to highest):
    /// 1. Defaults
    /// 2. Profile directory config (`~/.holomush/holomush.json`)
    /// 3. Local directory config, or the path given by `--config`
    /// 4. CLI arguments (which already fold in environment variables
    ///    via `clap`'s `env = ...` bindings)
    pub fn load(cli: &CliConfig) -> Result<Self> {
        let mut file_config = FileConfig::default();
        let mut found_configs: Vec<String> = Vec::new();

        if let Some(profile_path) = profile_config_path()
            && profile_path.exists()
        {
            let profile_config = FileConfig::load_from_file(&profile_path)?;
            profile_config.warn_unknown_fields();
            file_config.merge(profile_config);
            found_configs.push(profile_path.display().to_string());
        }

        let overlay_path = if let Some(ref path) = cli.config {
            if !path.exists() {
                anyhow::bail!("config file not found: {}", path.display());
            }
            Some(path.clone())
        } else {
            let local = PathBuf::from(CONFIG_FILE_NAME);
            local.exists().then_some(local)
        };

        if let Some(path) = overlay_path {
            let overlay_config = FileConfig::load_from_file(&path)?;
            overlay_config.warn_unknown_fields();
            file_config.merge(overlay_config);
            found_configs.push(path.display().to_string());
        }

        tracing::debug!(configs = ?found_configs, "config files loaded");

        let listen = cli.listen.clone().or(file_config.listen).unwrap_or_else(|| DEFAULT_LISTEN.to_string());

        let plugin_timeout_ms = cli.plugin_timeout_ms.or(file_config.plugin_timeout_ms).unwrap_or(DEFAULT_DELIVERY_TIMEOUT_MS);

        let broadcast_queue_depth = cli.broadcast_queue_depth.or(file_config.broadcast_queue_depth).unwrap_or(DEFAULT_QUEUE_DEPTH);

        let log_format = cli.log_format.or(file_config.log_format).unwrap_or_default();

        let plugins = if !cli.plugins.is_empty() {
            cli.plugins.iter().map(|p| PluginConfig { name: p.name.clone(), path: p.path.clone() }).collect()
        } else {
            file_config
                .plugins
                .unwrap_or_default()
                .into_iter()
                .map(|p| PluginConfig { name: p.name, path: p.path })
                .collect()
        };

        Ok(Self {
            listen,
            plugins,
            plugin_timeout_ms,
            broadcast_queue_depth,
            log_format,
        })
    }
}

fn profile_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(APP_DOT_FOLDER).join(CONFIG_FILE_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli_with(listen: Option<&str>) -> CliConfig {
        CliConfig {
            listen: listen.map(|s| s.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = AppConfig::load(&cli_with(None)).unwrap();
        assert_eq!(config.listen, DEFAULT_LISTEN);
        assert_eq!(config.plugin_timeout_ms, DEFAULT_DELIVERY_TIMEOUT_MS);
        assert_eq!(config.broadcast_queue_depth, DEFAULT_QUEUE_DEPTH);
        assert_eq!(config.log_format, LogFormat::Text);
    }

    #[test]
    fn cli_listen_overrides_default() {
        let config = AppConfig::load(&cli_with(Some("0.0.0.0:9000"))).unwrap();
        assert_eq!(config.listen, "0.0.0.0:9000");
    }

    #[test]
    fn file_config_merge_prefers_the_later_value() {
        let mut base = FileConfig { listen: Some("127.0.0.1:1".to_string()), ..Default::default() };
        let overlay = FileConfig { listen: Some("127.0.0.1:2".to_string()), ..Default::default() };
        base.merge(overlay);
        assert_eq!(base.listen.as_deref(), Some("127.0.0.1:2"));
    }

    #[test]
    fn file_config_merge_keeps_base_when_overlay_is_silent() {
        let mut base = FileConfig { listen: Some("127.0.0.1:1".to_string()), ..Default::default() };
        let overlay = FileConfig::default();
        base.merge(overlay);
        assert_eq!(base.listen.as_deref(), Some("127.0.0.1:1"));
    }
}
