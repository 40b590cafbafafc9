// ============================
// crates/client-lib/src/config.rs
// ============================
//! Configuration management.
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Default config file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "slang.toml";

/// Prefix for environment overrides, e.g. `SLANG_SERVER_URL`
pub const ENV_PREFIX: &str = "SLANG_";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
const LOG_FORMATS: [&str; 2] = ["pretty", "json"];

/// Client settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Room server WebSocket URL
    pub server_url: String,
    /// Delay before the single pending reconnect attempt fires
    pub reconnect_delay_ms: u64,
    /// How long a notification stays visible
    pub notice_ttl_ms: u64,
    /// Roster size shown as the room maximum
    pub room_capacity: usize,
    /// Log level
    pub log_level: String,
    /// `pretty` or `json`
    pub log_format: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: "ws://localhost:8080".to_string(),
            reconnect_delay_ms: 3_000,
            notice_ttl_ms: 2_000,
            room_capacity: slang_common::ROOM_CAPACITY,
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

impl Settings {
    /// Load from `slang.toml` (if present) and `SLANG_*` variables
    pub fn load() -> Result<Self> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    /// Load from an explicit TOML file (if present) and `SLANG_*` variables
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let settings: Settings = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX))
            .extract()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Check settings for values the client cannot run with
    pub fn validate(&self) -> Result<()> {
        if !(self.server_url.starts_with("ws://") || self.server_url.starts_with("wss://")) {
            bail!("server_url must be a ws:// or wss:// URL, got {:?}", self.server_url);
        }
        if self.reconnect_delay_ms == 0 {
            bail!("reconnect_delay_ms must be greater than zero");
        }
        if self.notice_ttl_ms == 0 {
            bail!("notice_ttl_ms must be greater than zero");
        }
        if self.room_capacity == 0 {
            bail!("room_capacity must be greater than zero");
        }
        if !LOG_LEVELS.contains(&self.log_level.as_str()) {
            bail!("invalid log_level {:?}", self.log_level);
        }
        if !LOG_FORMATS.contains(&self.log_format.as_str()) {
            bail!("invalid log_format {:?}", self.log_format);
        }
        Ok(())
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn notice_ttl(&self) -> Duration {
        Duration::from_millis(self.notice_ttl_ms)
    }
}
