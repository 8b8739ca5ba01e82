//! Configuration structs with sensible defaults and RON persistence.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const CONFIG_FILE: &str = "config.ron";

/// Top-level client configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Transport and connection lifecycle settings.
    pub network: NetworkConfig,
    /// Throttling and interpolation tuning.
    pub sync: SyncConfig,
    /// Local participant defaults.
    pub player: PlayerConfig,
    /// Logging settings.
    pub debug: DebugConfig,
}

/// Connection settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    /// Host name or IP of the room server.
    pub server_address: String,
    /// Server port.
    pub server_port: u16,
    /// Wall-clock bound on a single connection attempt, in milliseconds.
    pub connect_timeout_ms: u64,
    /// Connection attempts before a terminal failure is reported.
    pub retry_attempts: u32,
    /// Delay before the second attempt, in milliseconds.
    pub retry_delay_ms: u64,
    /// Factor applied to the delay after each failed attempt. 1.0 keeps it fixed.
    pub retry_backoff_multiplier: f64,
    /// Random spread applied to each delay, as a fraction (0.0 to 1.0).
    pub retry_jitter: f64,
    /// Heartbeat interval in each direction, in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Silence tolerated before the link is declared dead, in heartbeat intervals.
    pub heartbeat_tolerance: f64,
    /// Largest accepted frame payload in bytes.
    pub max_frame_bytes: u32,
}

/// State-synchronization tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    /// Outbound movement transmit cadence, in milliseconds.
    pub transmit_cadence_ms: u64,
    /// Minimum per-axis position change worth transmitting.
    pub position_epsilon: f64,
    /// Interpolation window for remote entities, in milliseconds.
    pub interpolation_window_ms: u64,
    /// Snapshots arriving closer together than this are coalesced.
    pub min_snapshot_interval_ms: u64,
    /// Rendered displacement per tick above which an entity counts as moving.
    pub motion_epsilon: f64,
    /// Pause between subscribing to a room and registering, in milliseconds.
    pub settle_delay_ms: u64,
    /// Bound on create/join reply waits, in milliseconds.
    pub reply_timeout_ms: u64,
    /// Consecutive snapshots an id may be missing from before it is removed.
    pub leave_grace_snapshots: u32,
}

/// Local participant defaults, usually overridden from the CLI.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlayerConfig {
    /// Display name.
    pub username: String,
    /// Room to join; a new room is created when empty.
    pub room_id: Option<String>,
    /// Spawn X coordinate.
    pub spawn_x: f64,
    /// Spawn Y coordinate.
    pub spawn_y: f64,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log filter override (e.g. "debug", "info,hive_net=trace").
    pub log_level: String,
    /// Also write JSON logs to this directory in debug builds.
    pub log_dir: Option<PathBuf>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            server_address: "127.0.0.1".to_string(),
            server_port: 8080,
            connect_timeout_ms: 5_000,
            retry_attempts: 3,
            retry_delay_ms: 2_000,
            retry_backoff_multiplier: 1.0,
            retry_jitter: 0.0,
            heartbeat_interval_ms: 4_000,
            heartbeat_tolerance: 2.5,
            max_frame_bytes: 1_048_576,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            transmit_cadence_ms: 100,
            position_epsilon: 0.1,
            interpolation_window_ms: 100,
            min_snapshot_interval_ms: 33,
            motion_epsilon: 0.1,
            settle_delay_ms: 500,
            reply_timeout_ms: 5_000,
            leave_grace_snapshots: 0,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: None,
        }
    }
}

/// Platform config directory for the client (e.g. `~/.config/hive`).
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("hive")
}

// --- Load / Save / Validate ---

impl Config {
    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE);

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::Read)?;
            let config: Config = ron::from_str(&contents).map_err(ConfigError::Parse)?;
            config.validate()?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Save config to the given directory as `config.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(ConfigError::Write)?;

        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(3)
            .enumerate_arrays(false);
        let serialized = ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::Serialize)?;

        std::fs::write(config_dir.join(CONFIG_FILE), serialized).map_err(ConfigError::Write)?;
        Ok(())
    }

    /// Reject values that would stall or spin the client.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let net = &self.network;
        let checks: [(bool, &'static str, &'static str); 8] = [
            (net.server_port == 0, "network.server_port", "must be non-zero"),
            (net.retry_attempts == 0, "network.retry_attempts", "at least one attempt is required"),
            (net.retry_backoff_multiplier < 1.0, "network.retry_backoff_multiplier", "must be at least 1.0"),
            (!(0.0..=1.0).contains(&net.retry_jitter), "network.retry_jitter", "must be between 0.0 and 1.0"),
            (net.heartbeat_interval_ms == 0, "network.heartbeat_interval_ms", "must be non-zero"),
            (net.heartbeat_tolerance < 1.0, "network.heartbeat_tolerance", "must be at least one interval"),
            (self.sync.transmit_cadence_ms == 0, "sync.transmit_cadence_ms", "must be non-zero"),
            (self.sync.interpolation_window_ms == 0, "sync.interpolation_window_ms", "must be non-zero"),
        ];
        match checks.into_iter().find(|(failed, _, _)| *failed) {
            Some((_, field, reason)) => Err(ConfigError::Invalid { field, reason }),
            None => Ok(()),
        }
    }
}
