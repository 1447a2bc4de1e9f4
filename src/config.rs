//! Bridge configuration.
//!
//! Read from `datecs-printer.json` in the app config directory. Every field
//! has a default so a missing or partial file still yields a usable config;
//! a handful of `DATECS_*` environment variables override the file.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

pub const CONFIG_FILE: &str = "datecs-printer.json";

/// How transport sockets are constructed. `Auto` is resolved once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SocketStrategySetting {
    #[default]
    Auto,
    Serial,
    DeviceFile,
}

/// A paired printer and the local port its RFCOMM channel is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceBinding {
    pub address: String,
    #[serde(default)]
    pub name: String,
    /// e.g. `/dev/rfcomm0`, `COM5`
    pub port: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub poll_interval_ms: u64,
    pub settle_delay_ms: u64,
    pub text_feed_lines: u8,
    pub text_charset: String,
    pub notices_enabled: bool,
    pub auto_reconnect: bool,
    pub socket_strategy: SocketStrategySetting,
    pub baud_rate: u32,
    pub read_timeout_ms: u64,
    pub handshake_timeout_ms: u64,
    pub bindings: Vec<DeviceBinding>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 50,
            settle_delay_ms: 50,
            text_feed_lines: 110,
            text_charset: "ISO-8859-1".to_string(),
            notices_enabled: false,
            auto_reconnect: false,
            socket_strategy: SocketStrategySetting::Auto,
            baud_rate: 115_200,
            read_timeout_ms: 1000,
            handshake_timeout_ms: 300,
            bindings: Vec::new(),
        }
    }
}

impl BridgeConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Load from `dir/datecs-printer.json`, falling back to defaults when the
    /// file does not exist, then apply env overrides.
    pub fn load(dir: &Path) -> anyhow::Result<Self> {
        let path = dir.join(CONFIG_FILE);
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("read {}", path.display()))?;
            let parsed: BridgeConfig = serde_json::from_str(&raw)
                .with_context(|| format!("parse {}", path.display()))?;
            info!(path = %path.display(), bindings = parsed.bindings.len(), "Printer config loaded");
            parsed
        } else {
            info!(path = %path.display(), "No printer config file, using defaults");
            BridgeConfig::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply `DATECS_*` overrides from the given lookup.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("DATECS_NOTICES").and_then(|v| parse_flag(&v)) {
            self.notices_enabled = v;
        }
        if let Some(v) = lookup("DATECS_AUTO_RECONNECT").and_then(|v| parse_flag(&v)) {
            self.auto_reconnect = v;
        }
        if let Some(raw) = lookup("DATECS_POLL_INTERVAL_MS") {
            match raw.trim().parse::<u64>() {
                Ok(ms) => self.poll_interval_ms = ms,
                Err(e) => warn!(value = %raw, error = %e, "Ignoring DATECS_POLL_INTERVAL_MS"),
            }
        }
        if let Some(raw) = lookup("DATECS_SOCKET_STRATEGY") {
            match raw.trim().to_ascii_lowercase().as_str() {
                "auto" => self.socket_strategy = SocketStrategySetting::Auto,
                "serial" => self.socket_strategy = SocketStrategySetting::Serial,
                "device_file" | "file" => self.socket_strategy = SocketStrategySetting::DeviceFile,
                other => warn!(value = %other, "Ignoring DATECS_SOCKET_STRATEGY"),
            }
        }
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
