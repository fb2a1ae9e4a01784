//! Hub Configuration Settings
//!
//! Configuration types for the hub, loaded from environment variables.
//! Every value has a default; garbage values fall back rather than
//! aborting startup, except a zero tick interval which is rejected.

use std::path::PathBuf;
use std::time::Duration;

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// REST + WebSocket API port.
    pub api_port: u16,
    /// Health check HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            api_port: 8080,
            health_port: 8081,
        }
    }
}

/// Price engine settings.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Tick period for the price walk.
    pub tick_interval: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
        }
    }
}

/// Observer continuity settings.
#[derive(Debug, Clone)]
pub struct ContinuitySettings {
    /// Staleness window before synthesis starts.
    pub staleness_window: Duration,
    /// Staleness check interval (shorter than the window).
    pub check_interval: Duration,
}

impl Default for ContinuitySettings {
    fn default() -> Self {
        Self {
            staleness_window: Duration::from_secs(2),
            check_interval: Duration::from_secs(1),
        }
    }
}

/// Per-channel queue settings.
#[derive(Debug, Clone)]
pub struct ChannelSettings {
    /// Outbound queue capacity per connection.
    pub queue_capacity: usize,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
        }
    }
}

/// Durable store settings.
#[derive(Debug, Clone, Default)]
pub struct StorageSettings {
    /// Path of the JSON subscription store; `None` keeps records in
    /// memory only.
    pub path: Option<PathBuf>,
}

/// Complete hub configuration.
#[derive(Debug, Clone, Default)]
pub struct HubConfig {
    /// Server port settings.
    pub server: ServerSettings,
    /// Price engine settings.
    pub engine: EngineSettings,
    /// Observer continuity settings.
    pub continuity: ContinuitySettings,
    /// Per-channel queue settings.
    pub channel: ChannelSettings,
    /// Durable store settings.
    pub storage: StorageSettings,
}

impl HubConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a value parses but is out of range (zero tick
    /// interval or check interval).
    pub fn from_env() -> Result<Self, ConfigError> {
        let server = ServerSettings {
            api_port: parse_env_u16("STREAM_HUB_API_PORT", ServerSettings::default().api_port),
            health_port: parse_env_u16(
                "STREAM_HUB_HEALTH_PORT",
                ServerSettings::default().health_port,
            ),
        };

        let engine = EngineSettings {
            tick_interval: parse_env_duration_millis(
                "STREAM_HUB_TICK_INTERVAL_MS",
                EngineSettings::default().tick_interval,
            ),
        };
        if engine.tick_interval.is_zero() {
            return Err(ConfigError::InvalidValue(
                "STREAM_HUB_TICK_INTERVAL_MS".to_string(),
            ));
        }

        let continuity = ContinuitySettings {
            staleness_window: parse_env_duration_millis(
                "STREAM_HUB_STALENESS_WINDOW_MS",
                ContinuitySettings::default().staleness_window,
            ),
            check_interval: parse_env_duration_millis(
                "STREAM_HUB_CHECK_INTERVAL_MS",
                ContinuitySettings::default().check_interval,
            ),
        };
        if continuity.check_interval.is_zero() {
            return Err(ConfigError::InvalidValue(
                "STREAM_HUB_CHECK_INTERVAL_MS".to_string(),
            ));
        }

        let channel = ChannelSettings {
            queue_capacity: parse_env_usize(
                "STREAM_HUB_CHANNEL_CAPACITY",
                ChannelSettings::default().queue_capacity,
            )
            .max(1),
        };

        let storage = StorageSettings {
            path: std::env::var("STREAM_HUB_STORE_PATH")
                .ok()
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
        };

        Ok(Self {
            server,
            engine,
            continuity,
            channel,
            storage,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has a value outside the accepted range.
    #[error("environment variable {0} has an invalid value")]
    InvalidValue(String),
}

fn parse_env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_duration_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}
