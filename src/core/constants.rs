//! Named constants: application identity, environment variable names,
//! and defaults for every config input the server accepts.

// =============================================================================
// Application identity
// =============================================================================

pub const APP_NAME: &str = "HoloMUSH";
pub const APP_NAME_LOWER: &str = "holomush";

// =============================================================================
// Configuration file
// =============================================================================

pub const CONFIG_FILE_NAME: &str = "holomush.json";
pub const APP_DOT_FOLDER: &str = ".holomush";
pub const ENV_CONFIG: &str = "HOLOMUSH_CONFIG";

// =============================================================================
// Environment variables
// =============================================================================

pub const ENV_LISTEN: &str = "HOLOMUSH_LISTEN";
pub const ENV_LOG: &str = "HOLOMUSH_LOG";
pub const ENV_LOG_FORMAT: &str = "HOLOMUSH_LOG_FORMAT";
pub const ENV_PLUGIN_TIMEOUT_MS: &str = "HOLOMUSH_PLUGIN_TIMEOUT_MS";
pub const ENV_QUEUE_DEPTH: &str = "HOLOMUSH_QUEUE_DEPTH";

// =============================================================================
// Defaults
// =============================================================================

/// Default bind address: a concrete loopback address rather than a
/// bare port suffix.
pub const DEFAULT_LISTEN: &str = "127.0.0.1:2323";

/// Single location stream every connected character shares; this
/// binary does not model multiple rooms.
pub const DEFAULT_STREAM: &str = "location:lobby";

/// Replay limit applied on connect.
pub const REPLAY_LIMIT_ON_CONNECT: usize = 50;

/// How long `ShutdownService::shutdown` waits for background tasks to
/// finish before giving up and logging a timeout warning.
pub const SHUTDOWN_TIMEOUT_SECS: u64 = 5;
