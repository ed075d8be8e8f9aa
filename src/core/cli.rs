use clap::Parser;

use std::path::PathBuf;

use super::constants::{ENV_CONFIG, ENV_LISTEN, ENV_LOG_FORMAT, ENV_PLUGIN_TIMEOUT_MS, ENV_QUEUE_DEPTH};

#[derive(Parser)]
#[command(name = "holomush")]
#[command(version, about = "Real-time multi-user text MUSH server", long_about = None)]
pub struct Cli {
    /// Address to accept connections on
    #[arg(long, env = ENV_LISTEN)]
    pub listen: Option<String>,

    /// Load a plugin: `--plugin <name>=<path to .wasm>` (repeatable)
    #[arg(long = "plugin", value_parser = parse_plugin_spec)]
    pub plugins: Vec<PluginSpec>,

    /// Per-delivery plugin timeout, in milliseconds
    #[arg(long, env = ENV_PLUGIN_TIMEOUT_MS)]
    pub plugin_timeout_ms: Option<u64>,

    /// Per-subscriber broadcast queue depth
    #[arg(long, env = ENV_QUEUE_DEPTH)]
    pub broadcast_queue_depth: Option<usize>,

    /// Log output format
    #[arg(long, env = ENV_LOG_FORMAT, value_parser = parse_log_format)]
    pub log_format: Option<LogFormat>,

    /// Path to config file
    #[arg(long, short = 'c', env = ENV_CONFIG)]
    pub config: Option<PathBuf>,

    /// Enable debug-level logging regardless of RUST_LOG
    #[arg(long)]
    pub debug: bool,
}

#[derive(Debug, Clone)]
pub struct PluginSpec {
    pub name: String,
    pub path: PathBuf,
}

fn parse_plugin_spec(s: &str) -> Result<PluginSpec, String> {
    let (name, path) = s
        .split_once('=')
        .ok_or_else(|| format!("Invalid plugin spec '{s}'. Expected <name>=<path>"))?;
    if name.is_empty() {
        return Err(format!("Invalid plugin spec '{s}': name must not be empty"));
    }
    Ok(PluginSpec {
        name: name.to_string(),
        path: PathBuf::from(path),
    })
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

fn parse_log_format(s: &str) -> Result<LogFormat, String> {
    match s.to_lowercase().as_str() {
        "text" => Ok(LogFormat::Text),
        "json" => Ok(LogFormat::Json),
        _ => Err(format!("Invalid log format '{s}'. Valid options: text, json")),
    }
}

/// Configuration derived from CLI arguments, independent of `clap`'s
/// `Cli` type so the rest of the application never depends on it.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub listen: Option<String>,
    pub plugins: Vec<PluginSpec>,
    pub plugin_timeout_ms: Option<u64>,
    pub broadcast_queue_depth: Option<usize>,
    pub log_format: Option<LogFormat>,
    pub config: Option<PathBuf>,
    pub debug: bool,
}

/// Parse CLI arguments into a `CliConfig`.
pub fn parse() -> CliConfig {
    let cli = Cli::parse();
    CliConfig {
        listen: cli.listen,
        plugins: cli.plugins,
        plugin_timeout_ms: cli.plugin_timeout_ms,
        broadcast_queue_depth: cli.broadcast_queue_depth,
        log_format: cli.log_format,
        config: cli.config,
        debug: cli.debug,
    }
}
