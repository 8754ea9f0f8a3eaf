//! Agent configuration
//!
//! Handles:
//! - Local server port
//! - Push target (authenticated ingress or open `/push-sse`)
//! - Stream / push cadences
//! - TOML file in the OS config dir, overridden by environment variables

use anyhow::{Context, Result};
use gpustats_core::parse_flag;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub server: ServerConfig,
    pub push: PushConfig,
    pub stream: StreamConfig,
    pub sampler: SamplerConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    pub enabled: bool,
    pub mode: PushMode,
    /// Defaults depend on `mode`, see [`PushConfig::url`]
    pub url: Option<String>,
    pub device_id: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub interval_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub interval_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    pub nvidia_smi: String,
    /// nvidia-smi is killed after this long
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PushMode {
    /// `POST {deviceId, stats}` with `x-api-key`
    Authenticated,
    /// `POST <snapshot>` without a key, rebroadcast by the kernel
    Open,
}

/// Resolved push destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushTarget {
    Authenticated {
        url: String,
        device_id: String,
        api_key: String,
    },
    Open {
        url: String,
    },
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("authenticated push requires an API key (set API_KEY)")]
    MissingApiKey,
    #[error("push device id is empty (set DEVICE_ID)")]
    MissingDeviceId,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 3001 }
    }
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: PushMode::Authenticated,
            url: None,
            device_id: gethostname::gethostname().to_string_lossy().to_string(),
            api_key: None,
            interval_ms: None,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self { interval_ms: 2000 }
    }
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            nvidia_smi: "nvidia-smi".to_string(),
            timeout_ms: 5000,
        }
    }
}

impl PushMode {
    pub fn default_url(self) -> &'static str {
        match self {
            PushMode::Authenticated => "http://localhost:3000/api/push",
            PushMode::Open => "http://localhost:3000/push-sse",
        }
    }

    pub fn default_interval(self) -> Duration {
        match self {
            PushMode::Authenticated => Duration::from_millis(10_000),
            PushMode::Open => Duration::from_millis(2_000),
        }
    }
}

impl std::str::FromStr for PushMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "authenticated" | "auth" => Ok(PushMode::Authenticated),
            "open" => Ok(PushMode::Open),
            other => Err(format!("unknown push mode '{other}'")),
        }
    }
}

impl PushConfig {
    pub fn url(&self) -> String {
        self.url.clone().unwrap_or_else(|| self.mode.default_url().to_string())
    }

    pub fn interval(&self) -> Duration {
        self.interval_ms
            .map(|ms| Duration::from_millis(ms.max(1)))
            .unwrap_or_else(|| self.mode.default_interval())
    }

    /// `Ok(None)` when push is disabled.
    pub fn target(&self) -> Result<Option<PushTarget>, ConfigError> {
        if !self.enabled {
            return Ok(None);
        }
        let url = self.url();
        match self.mode {
            PushMode::Open => Ok(Some(PushTarget::Open { url })),
            PushMode::Authenticated => {
                let api_key = self
                    .api_key
                    .clone()
                    .filter(|k| !k.is_empty())
                    .ok_or(ConfigError::MissingApiKey)?;
                if self.device_id.is_empty() {
                    return Err(ConfigError::MissingDeviceId);
                }
                Ok(Some(PushTarget::Authenticated {
                    url,
                    device_id: self.device_id.clone(),
                    api_key,
                }))
            }
        }
    }
}

impl AgentConfig {
    /// Load config file (if any) then apply environment overrides.
    /// An unreadable file falls back to defaults.
    pub async fn load() -> Self {
        let mut config = match Self::config_file_path() {
            Ok(path) => Self::load_from(&path).await.unwrap_or_else(|e| {
                warn!("Ignoring agent config {}: {:#}", path.display(), e);
                Self::default()
            }),
            Err(e) => {
                warn!("No config directory: {}", e);
                Self::default()
            }
        };
        config.apply_env(std::env::vars());
        config
    }

    pub async fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: AgentConfig = toml::from_str(&content).context("Invalid TOML")?;
        Ok(config)
    }

    /// `GPUSTATS_AGENT_CONFIG` or `<config dir>/gpustats-agent/config.toml`
    pub fn config_file_path() -> Result<PathBuf> {
        if let Ok(path) = std::env::var("GPUSTATS_AGENT_CONFIG") {
            return Ok(PathBuf::from(path));
        }
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        path.push("gpustats-agent");
        path.push("config.toml");
        Ok(path)
    }

    pub fn apply_env<I>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            match key.as_str() {
                "LOCAL_GPU_SERVER_PORT" => parse_into(&mut self.server.port, &key, &value),
                "CLOUD_BACKEND_URL" if !value.is_empty() => self.push.url = Some(value),
                "API_KEY" if !value.is_empty() => self.push.api_key = Some(value),
                "DEVICE_ID" if !value.is_empty() => self.push.device_id = value,
                "GPUSTATS_PUSH_MODE" => parse_into(&mut self.push.mode, &key, &value),
                "GPUSTATS_PUSH_ENABLED" => match parse_flag(&value) {
                    Some(flag) => self.push.enabled = flag,
                    None => warn!("Ignoring {}={}: expected a boolean", key, value),
                },
                "GPUSTATS_PUSH_INTERVAL_MS" => {
                    let mut ms = 0u64;
                    parse_into(&mut ms, &key, &value);
                    if ms > 0 {
                        self.push.interval_ms = Some(ms);
                    }
                }
                "GPUSTATS_STREAM_INTERVAL_MS" => parse_into(&mut self.stream.interval_ms, &key, &value),
                "GPUSTATS_SAMPLE_TIMEOUT_MS" => parse_into(&mut self.sampler.timeout_ms, &key, &value),
                "GPUSTATS_NVIDIA_SMI" if !value.is_empty() => self.sampler.nvidia_smi = value,
                _ => {}
            }
        }
    }
}

fn parse_into<T>(slot: &mut T, key: &str, value: &str)
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match value.trim().parse() {
        Ok(v) => *slot = v,
        Err(e) => warn!("Ignoring {}={}: {}", key, value, e),
    }
}
