//! Endpoint configuration loading.
//!
//! TOML is the sole config source; every field has a default so a missing
//! file yields a usable host config. Joiner and spectator roles require
//! `host_addr`.
//!
//! # Defaults
//! - `role = "host"` (bind port 8888; joiner 8889, spectator 8890)
//! - `level = 50`
//! - `[reliability] timeout_ms = 500, max_retries = 3, tick_ms = 100`
//! - `connect_timeout_ms = 5000`
//! - `chat_enabled = true`

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const HOST_PORT: u16 = 8888;
pub const JOINER_PORT: u16 = 8889;
pub const SPECTATOR_PORT: u16 = 8890;

/// Which endpoint role this process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerRole {
    Host,
    Joiner,
    Spectator,
}

impl PeerRole {
    pub fn default_port(self) -> u16 {
        match self {
            PeerRole::Host => HOST_PORT,
            PeerRole::Joiner => JOINER_PORT,
            PeerRole::Spectator => SPECTATOR_PORT,
        }
    }
}

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ReliabilityConfig {
    pub timeout: Duration,
    pub max_retries: u32,
    pub tick: Duration,
}

impl Default for ReliabilityConfig {
    fn default() -> Self {
        ReliabilityConfig {
            timeout: Duration::from_millis(500),
            max_retries: 3,
            tick: Duration::from_millis(100),
        }
    }
}

/// Validated endpoint configuration.
#[derive(Debug, Clone)]
pub struct PeerConfig {
    pub role: PeerRole,
    pub bind_port: u16,
    /// Host address for joiner/spectator roles, e.g. "192.168.1.10:8888".
    pub host_addr: Option<String>,
    pub display_name: Option<String>,
    /// Creature CSV path; stores may also be injected directly.
    pub creature_csv: Option<PathBuf>,
    /// Battle level used in the damage formula.
    pub level: i32,
    /// Fixed damage seed for the host role; `None` draws randomly.
    pub seed: Option<u32>,
    pub reliability: ReliabilityConfig,
    pub connect_timeout: Duration,
    pub chat_enabled: bool,
}

impl PeerConfig {
    pub fn for_role(role: PeerRole) -> Self {
        PeerConfig {
            role,
            bind_port: role.default_port(),
            host_addr: None,
            display_name: None,
            creature_csv: None,
            level: 50,
            seed: None,
            reliability: ReliabilityConfig::default(),
            connect_timeout: Duration::from_secs(5),
            chat_enabled: true,
        }
    }
}

impl Default for PeerConfig {
    fn default() -> Self {
        PeerConfig::for_role(PeerRole::Host)
    }
}

// ---------------------------------------------------------------------------
// Raw TOML deserialization types (Option for every optional field)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawConfig {
    role: Option<String>,
    bind_port: Option<u16>,
    host_addr: Option<String>,
    display_name: Option<String>,
    creature_csv: Option<PathBuf>,
    level: Option<i32>,
    seed: Option<u32>,
    connect_timeout_ms: Option<u64>,
    chat_enabled: Option<bool>,
    reliability: Option<RawReliability>,
}

#[derive(Debug, Deserialize)]
struct RawReliability {
    timeout_ms: Option<u64>,
    max_retries: Option<u32>,
    tick_ms: Option<u64>,
}

// ---------------------------------------------------------------------------
// Errors and loading
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("unknown role: {0} (expected host, joiner, or spectator)")]
    UnknownRole(String),
    #[error("role {0:?} requires host_addr")]
    MissingHostAddr(PeerRole),
}

/// Load and validate a config file.
pub fn load_config(path: impl AsRef<Path>) -> Result<PeerConfig, ConfigError> {
    let text = std::fs::read_to_string(path)?;
    parse_config(&text)
}

fn parse_config(text: &str) -> Result<PeerConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(text)?;

    let role = match raw.role.as_deref() {
        None | Some("host") => PeerRole::Host,
        Some("joiner") => PeerRole::Joiner,
        Some("spectator") => PeerRole::Spectator,
        Some(other) => return Err(ConfigError::UnknownRole(other.to_owned())),
    };
    if role != PeerRole::Host && raw.host_addr.is_none() {
        return Err(ConfigError::MissingHostAddr(role));
    }

    let defaults = ReliabilityConfig::default();
    let reliability = match raw.reliability {
        Some(r) => ReliabilityConfig {
            timeout: r
                .timeout_ms
                .map_or(defaults.timeout, Duration::from_millis),
            max_retries: r.max_retries.unwrap_or(defaults.max_retries),
            tick: r.tick_ms.map_or(defaults.tick, Duration::from_millis),
        },
        None => defaults,
    };

    Ok(PeerConfig {
        bind_port: raw.bind_port.unwrap_or_else(|| role.default_port()),
        role,
        host_addr: raw.host_addr,
        display_name: raw.display_name,
        creature_csv: raw.creature_csv,
        level: raw.level.unwrap_or(50),
        seed: raw.seed,
        connect_timeout: Duration::from_millis(raw.connect_timeout_ms.unwrap_or(5_000)),
        chat_enabled: raw.chat_enabled.unwrap_or(true),
        reliability,
    })
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
