use serde::{Deserialize, Serialize};

/// Lecture instantanée d'un GPU.
///
/// Tous les champs sont optionnels : un capteur absent ou non supporté
/// n'apparaît simplement pas dans le JSON émis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GpuSnapshot {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
    /// MiB
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_total: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_used: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_free: Option<f64>,
    /// °C
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature_gpu: Option<f64>,
    /// pourcentages 0-100
    #[serde(skip_serializing_if = "Option::is_none")]
    pub utilization_gpu: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub utilization_memory: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fan_speed: Option<f64>,
    /// W
    #[serde(skip_serializing_if = "Option::is_none")]
    pub power_draw: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub power_limit: Option<f64>,
    /// MHz
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clock_core: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clock_memory: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver_version: Option<String>,
}
