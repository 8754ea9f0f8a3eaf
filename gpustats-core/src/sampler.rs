/**
 * SNAPSHOT PRODUCER - Lecture des capteurs GPU de la machine hôte
 *
 * RÔLE : fournir un GpuSnapshot à la demande. Trois issues possibles :
 * - Ok(Some(snapshot)) : un GPU NVIDIA a répondu
 * - Ok(None) : pas de GPU applicable (nvidia-smi absent ou aucune ligne)
 * - Err(SampleError) : le capteur a échoué
 *
 * Les appelants périodiques tolèrent les échecs : on saute le tick.
 */

use crate::snapshot::GpuSnapshot;
use futures::future::BoxFuture;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;

/// Délai max d'un appel `nvidia-smi` ; au-delà le process est tué.
pub const DEFAULT_SAMPLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Champs demandés à `nvidia-smi`, dans l'ordre de parsing.
const QUERY_FIELDS: &str = "name,memory.total,memory.used,memory.free,temperature.gpu,\
utilization.gpu,utilization.memory,fan.speed,power.draw,power.limit,clocks.sm,clocks.mem,driver_version";
const FIELD_COUNT: usize = 13;

#[derive(Debug, thiserror::Error)]
pub enum SampleError {
    #[error("failed to run {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{binary} exited with {status}: {stderr}")]
    CommandFailed {
        binary: String,
        status: std::process::ExitStatus,
        stderr: String,
    },
    #[error("{binary} did not answer within {timeout:?}")]
    Timeout { binary: String, timeout: Duration },
    #[error("unexpected nvidia-smi output: {0}")]
    Parse(String),
}

/// Source de snapshots, injectable pour les tests.
pub trait SnapshotSource: Send + Sync {
    fn sample(&self) -> BoxFuture<'_, Result<Option<GpuSnapshot>, SampleError>>;
}

/// Lecture via `nvidia-smi --query-gpu` (premier GPU listé).
#[derive(Debug, Clone)]
pub struct NvidiaSmi {
    binary: PathBuf,
    timeout: Duration,
}

impl NvidiaSmi {
    pub fn new() -> Self {
        Self::with_binary("nvidia-smi")
    }

    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            timeout: DEFAULT_SAMPLE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn query(&self) -> Result<Option<GpuSnapshot>, SampleError> {
        let binary = self.binary.display().to_string();
        let mut cmd = Command::new(&self.binary);
        cmd.arg(format!("--query-gpu={QUERY_FIELDS}"))
            .arg("--format=csv,noheader,nounits")
            .kill_on_drop(true);

        // kill_on_drop : le futur abandonné tue le process bloqué
        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Err(_) => {
                return Err(SampleError::Timeout {
                    binary,
                    timeout: self.timeout,
                })
            }
            Ok(Ok(output)) => output,
            // pas de driver NVIDIA installé = pas de device applicable
            Ok(Err(e)) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Ok(Err(source)) => return Err(SampleError::Spawn { binary, source }),
        };

        if !output.status.success() {
            return Err(SampleError::CommandFailed {
                binary,
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        match stdout.lines().find(|l| !l.trim().is_empty()) {
            Some(line) => parse_query_line(line).map(Some),
            None => Ok(None),
        }
    }
}

impl Default for NvidiaSmi {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotSource for NvidiaSmi {
    fn sample(&self) -> BoxFuture<'_, Result<Option<GpuSnapshot>, SampleError>> {
        Box::pin(self.query())
    }
}

/// Parse une ligne CSV `--format=csv,noheader,nounits`.
pub fn parse_query_line(line: &str) -> Result<GpuSnapshot, SampleError> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() != FIELD_COUNT {
        return Err(SampleError::Parse(format!(
            "expected {FIELD_COUNT} fields, got {}: {line}",
            fields.len()
        )));
    }

    Ok(GpuSnapshot {
        name: text(fields[0]),
        vendor: Some("NVIDIA".to_string()),
        memory_total: number(fields[1]),
        memory_used: number(fields[2]),
        memory_free: number(fields[3]),
        temperature_gpu: number(fields[4]),
        utilization_gpu: number(fields[5]),
        utilization_memory: number(fields[6]),
        fan_speed: number(fields[7]),
        power_draw: number(fields[8]),
        power_limit: number(fields[9]),
        clock_core: number(fields[10]),
        clock_memory: number(fields[11]),
        driver_version: text(fields[12]),
    })
}

/// nvidia-smi écrit `[N/A]` ou `[Not Supported]` pour un capteur absent.
fn is_unavailable(raw: &str) -> bool {
    raw.is_empty() || raw.starts_with('[') || raw.eq_ignore_ascii_case("N/A")
}

fn text(raw: &str) -> Option<String> {
    (!is_unavailable(raw)).then(|| raw.to_string())
}

fn number(raw: &str) -> Option<f64> {
    if is_unavailable(raw) {
        return None;
    }
    raw.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_line() {
        let line = "NVIDIA GeForce RTX 3080, 10240, 1532, 8458, 54, 12, 7, 30, 42.51, 320.00, 1710, 9501, 550.54.14";
        let snap = parse_query_line(line).unwrap();
        assert_eq!(snap.name.as_deref(), Some("NVIDIA GeForce RTX 3080"));
        assert_eq!(snap.vendor.as_deref(), Some("NVIDIA"));
        assert_eq!(snap.memory_total, Some(10240.0));
        assert_eq!(snap.memory_free, Some(8458.0));
        assert_eq!(snap.temperature_gpu, Some(54.0));
        assert_eq!(snap.power_draw, Some(42.51));
        assert_eq!(snap.clock_memory, Some(9501.0));
        assert_eq!(snap.driver_version.as_deref(), Some("550.54.14"));
    }

    #[test]
    fn test_unsupported_sensors_become_absent() {
        let line = "Tesla T4, 15360, 0, 15360, 33, 0, 0, [N/A], 9.87, 70.00, 300, 5000, 535.104.05";
        let snap = parse_query_line(line).unwrap();
        assert!(snap.fan_speed.is_none());
        let json = serde_json::to_value(&snap).unwrap();
        assert!(json.get("fanSpeed").is_none());

        let line = "GPU, [Not Supported], 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 1.0";
        assert!(parse_query_line(line).unwrap().memory_total.is_none());
    }

    #[test]
    fn test_wrong_field_count_is_parse_error() {
        let err = parse_query_line("only, three, fields").unwrap_err();
        assert!(matches!(err, SampleError::Parse(_)));
    }

    #[tokio::test]
    async fn test_missing_binary_means_no_device() {
        let smi = NvidiaSmi::with_binary("/nonexistent/bin/nvidia-smi");
        assert!(smi.sample().await.unwrap().is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_binary_is_an_error() {
        let smi = NvidiaSmi::with_binary("false");
        let err = smi.sample().await.unwrap_err();
        assert!(matches!(err, SampleError::CommandFailed { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_hung_binary_times_out() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("stuck-smi.sh");
        std::fs::write(&script, "#!/bin/sh\nsleep 30\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let smi = NvidiaSmi::with_binary(&script).with_timeout(Duration::from_millis(200));
        let started = std::time::Instant::now();
        let mut result = smi.sample().await;
        // ETXTBSY possible si un autre test fork pendant l'écriture du script
        for _ in 0..5 {
            if !matches!(result, Err(SampleError::Spawn { .. })) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
            result = smi.sample().await;
        }

        assert!(matches!(result, Err(SampleError::Timeout { .. })), "got {result:?}");
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_empty_output_means_no_device() {
        let smi = NvidiaSmi::with_binary("true");
        assert!(smi.sample().await.unwrap().is_none());
    }
}
