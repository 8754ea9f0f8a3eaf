use gpustats_core::parse_flag;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, path::Path};
use tokio::fs;
use tracing::warn;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct KernelConfig {
    pub port: u16,
    /// device_id -> clé secrète
    pub api_keys: HashMap<String, String>,
    pub stream_interval_ms: u64,
    /// échantillonne aussi le GPU local pour /gpu/stream
    pub local_sampling: bool,
    pub nvidia_smi: String,
    /// délai max d'un appel nvidia-smi
    pub sample_timeout_ms: u64,
    /// active POST /push-sse (sans authentification)
    pub allow_open_push: bool,
    /// une clé ne peut lire/écrire que son propre device
    pub strict_device_binding: bool,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            api_keys: HashMap::new(),
            stream_interval_ms: 2000,
            local_sampling: true,
            nvidia_smi: "nvidia-smi".into(),
            sample_timeout_ms: 5000,
            allow_open_push: false,
            strict_device_binding: false,
        }
    }
}

impl KernelConfig {
    /// Surcharge via variables d'environnement (`API_KEY_<DEVICE>`, `PORT`, `GPUSTATS_*`).
    pub fn apply_env<I>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            if let Some(device) = key.strip_prefix("API_KEY_") {
                if !device.is_empty() && !value.is_empty() {
                    self.api_keys.insert(device.to_lowercase(), value);
                }
                continue;
            }
            match key.as_str() {
                "PORT" => set_parsed(&mut self.port, &key, &value),
                "GPUSTATS_STREAM_INTERVAL_MS" => set_parsed(&mut self.stream_interval_ms, &key, &value),
                "GPUSTATS_LOCAL_SAMPLING" => set_flag(&mut self.local_sampling, &key, &value),
                "GPUSTATS_ALLOW_OPEN_PUSH" => set_flag(&mut self.allow_open_push, &key, &value),
                "GPUSTATS_STRICT_DEVICE_BINDING" => set_flag(&mut self.strict_device_binding, &key, &value),
                "GPUSTATS_SAMPLE_TIMEOUT_MS" => set_parsed(&mut self.sample_timeout_ms, &key, &value),
                "GPUSTATS_NVIDIA_SMI" if !value.is_empty() => self.nvidia_smi = value,
                _ => {}
            }
        }
    }
}

fn set_parsed<T: std::str::FromStr>(slot: &mut T, key: &str, value: &str) {
    match value.trim().parse() {
        Ok(v) => *slot = v,
        Err(_) => warn!(key, value, "ignoring invalid numeric value"),
    }
}

fn set_flag(slot: &mut bool, key: &str, value: &str) {
    match parse_flag(value) {
        Some(v) => *slot = v,
        None => warn!(key, value, "ignoring invalid boolean value"),
    }
}

/// Lit le YAML (s'il existe) puis applique l'environnement.
pub async fn load_config() -> KernelConfig {
    let path = std::env::var("GPUSTATS_KERNEL_CONFIG").unwrap_or_else(|_| "kernel.yaml".into());
    let mut cfg = load_file(&path).await;
    cfg.apply_env(std::env::vars());
    cfg
}

async fn load_file(path: &str) -> KernelConfig {
    if !Path::new(path).exists() {
        warn!(path, "no kernel config file, using defaults");
        return KernelConfig::default();
    }
    let txt = match fs::read_to_string(path).await {
        Ok(txt) => txt,
        Err(e) => {
            warn!(path, error = %e, "unreadable kernel config, using defaults");
            return KernelConfig::default();
        }
    };
    if txt.trim().is_empty() {
        return KernelConfig::default();
    }
    serde_yaml::from_str(&txt).unwrap_or_else(|e| {
        warn!(path, error = %e, "invalid kernel config, using defaults");
        KernelConfig::default()
    })
}
