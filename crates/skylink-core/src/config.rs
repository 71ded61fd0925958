//! Configuration system for the Skylink ground station.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $SKYLINK_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/skylink/config.toml
//!   3. ~/.config/skylink/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StationConfig {
    pub network: NetworkConfig,
    pub video: VideoConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// This ground station's id, used as the source id on outbound packets.
    pub controller_id: u32,
    /// Where the radio router delivers raw received packets (UDP).
    pub radio_bind: String,
    /// Where outbound packets (requests, acks) are sent back to the radio.
    pub radio_peer: String,
    /// Where ordered video payload is forwarded for decoding (UDP).
    pub decoder_addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    /// Consider the vehicle link lost after this many ms without any packet.
    /// Retransmission requests stop while the link is lost.
    pub link_lost_ms: u32,
    /// Auto profile adjustment master switch.
    pub adaptive: bool,
    /// Auto-adjustment strength override, 1-10. 0 = use the vehicle model.
    pub adjustment_strength: u8,
    /// Keyframe interval to negotiate on connect, ms. 0 = leave as-is.
    pub requested_keyframe_interval_ms: u32,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            video: VideoConfig::default(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            controller_id: 1,
            radio_bind: "127.0.0.1:5700".into(),
            radio_peer: "127.0.0.1:5701".into(),
            decoder_addr: "127.0.0.1:5800".into(),
        }
    }
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            link_lost_ms: 1000,
            adaptive: true,
            adjustment_strength: 0,
            requested_keyframe_interval_ms: 0,
        }
    }
}

// ── Path helpers ─────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("skylink")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ──────────────────────────────────────────────────────────────────

impl StationConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            StationConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("SKYLINK_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&StationConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text)
                .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply SKYLINK_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("SKYLINK_NETWORK__RADIO_BIND") {
            self.network.radio_bind = v;
        }
        if let Ok(v) = std::env::var("SKYLINK_NETWORK__RADIO_PEER") {
            self.network.radio_peer = v;
        }
        if let Ok(v) = std::env::var("SKYLINK_NETWORK__DECODER_ADDR") {
            self.network.decoder_addr = v;
        }
        if let Ok(v) = std::env::var("SKYLINK_VIDEO__LINK_LOST_MS") {
            if let Ok(ms) = v.parse() {
                self.video.link_lost_ms = ms;
            }
        }
        if let Ok(v) = std::env::var("SKYLINK_VIDEO__ADAPTIVE") {
            self.video.adaptive = v == "true" || v == "1";
        }
        if let Ok(v) = std::env::var("SKYLINK_VIDEO__ADJUSTMENT_STRENGTH") {
            if let Ok(s) = v.parse() {
                self.video.adjustment_strength = s;
            }
        }
    }
}
