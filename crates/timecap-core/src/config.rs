//! TimeCap configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimecapConfig {
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub email: EmailConfig,
    #[serde(default)]
    pub sms: SmsConfig,
    #[serde(default)]
    pub push: PushConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub sweep: SweepConfig,
}

impl TimecapConfig {
    /// Load config from the default path (~/.timecap/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::error::TimecapError::Config(format!("Failed to read config: {e}"))
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| {
            crate::error::TimecapError::Config(format!("Failed to parse config: {e}"))
        })?;
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self).map_err(|e| {
            crate::error::TimecapError::Config(format!("Failed to serialize config: {e}"))
        })?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".timecap")
            .join("config.toml")
    }
}

/// Redis connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".into()
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
        }
    }
}

/// SMTP email configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_smtp_host")]
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// From header, e.g. "TimeCap <hello@timecap.app>".
    #[serde(default = "default_from")]
    pub from: String,
}

fn default_smtp_host() -> String {
    "smtp.gmail.com".into()
}
fn default_smtp_port() -> u16 {
    587
}
fn default_from() -> String {
    "TimeCap <onboarding@timecap.app>".into()
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            smtp_host: default_smtp_host(),
            smtp_port: default_smtp_port(),
            username: String::new(),
            password: String::new(),
            from: default_from(),
        }
    }
}

/// Twilio SMS configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SmsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub account_sid: String,
    #[serde(default)]
    pub auth_token: String,
    /// Sending phone number in E.164 form.
    #[serde(default)]
    pub from_number: String,
}

/// Web Push configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub vapid_public_key: String,
    #[serde(default)]
    pub vapid_private_key: String,
    /// Push message TTL in seconds.
    #[serde(default = "default_push_ttl")]
    pub ttl_secs: u32,
}

fn default_push_ttl() -> u32 {
    86400
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            vapid_public_key: String::new(),
            vapid_private_key: String::new(),
            ttl_secs: default_push_ttl(),
        }
    }
}

/// Gateway server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8321
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Background sweep loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Run the periodic sweep loop inside `timecap serve`.
    #[serde(default = "bool_true")]
    pub run_in_server: bool,
    #[serde(default = "default_sweep_interval")]
    pub interval_secs: u64,
}

fn bool_true() -> bool {
    true
}
fn default_sweep_interval() -> u64 {
    60
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            run_in_server: true,
            interval_secs: default_sweep_interval(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let cfg = TimecapConfig::default();
        let toml_str = toml::to_string_pretty(&cfg).unwrap();
        let parsed: TimecapConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.gateway.port, 8321);
        assert_eq!(parsed.redis.url, "redis://127.0.0.1:6379");
        assert!(parsed.sweep.run_in_server);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let cfg: TimecapConfig =
            toml::from_str("[gateway]\nport = 9000\n").unwrap();
        assert_eq!(cfg.gateway.port, 9000);
        assert_eq!(cfg.gateway.host, "0.0.0.0");
        assert_eq!(cfg.email.smtp_port, 587);
        assert_eq!(cfg.push.ttl_secs, 86400);
    }
}
