/**
 * LATEST-VALUE STORE - Dernier snapshot connu par device
 *
 * RÔLE : garde exactement une entrée par device id, remplacée à chaque écriture.
 * Pas d'éviction, pas de TTL : une entrée reste visible jusqu'à la prochaine
 * écriture ou au redémarrage du process (stale et frais sont indiscernables).
 *
 * CONCURRENCE : RwLock interne, l'écriture est un remplacement atomique de
 * l'entrée complète, un lecteur ne voit jamais un snapshot à moitié écrit.
 */

use parking_lot::RwLock;
use serde::{Serialize, Serializer};
use std::collections::HashMap;
use time::macros::format_description;
use time::OffsetDateTime;

/// Entrée stockée pour un device : snapshot + instant de la dernière écriture.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceEntry<T> {
    #[serde(rename = "stats")]
    pub snapshot: T,
    #[serde(serialize_with = "serialize_iso_millis")]
    pub updated_at: OffsetDateTime,
}

/// Format ISO-8601 UTC à la milliseconde, ex: `2025-03-01T12:00:00.123Z`
pub fn format_iso_millis(ts: OffsetDateTime) -> Result<String, time::error::Format> {
    ts.to_offset(time::UtcOffset::UTC).format(format_description!(
        "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z"
    ))
}

fn serialize_iso_millis<S: Serializer>(ts: &OffsetDateTime, s: S) -> Result<S::Ok, S::Error> {
    let txt = format_iso_millis(*ts).map_err(serde::ser::Error::custom)?;
    s.serialize_str(&txt)
}

pub struct LatestStore<T> {
    entries: RwLock<HashMap<String, DeviceEntry<T>>>,
}

impl<T: Clone> LatestStore<T> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Remplace l'entrée du device (jamais de merge) et renvoie l'horodatage écrit.
    pub fn set(&self, device_id: impl Into<String>, snapshot: T) -> OffsetDateTime {
        let updated_at = OffsetDateTime::now_utc();
        let entry = DeviceEntry { snapshot, updated_at };
        self.entries.write().insert(device_id.into(), entry);
        updated_at
    }

    /// `None` si aucune écriture n'a encore eu lieu pour ce device.
    pub fn get(&self, device_id: &str) -> Option<DeviceEntry<T>> {
        self.entries.read().get(device_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl<T: Clone> Default for LatestStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_get_after_set_returns_snapshot() {
        let store = LatestStore::new();
        let before = OffsetDateTime::now_utc();
        store.set("thebeast", json!({"temperatureGpu": 65}));

        let entry = store.get("thebeast").unwrap();
        assert_eq!(entry.snapshot, json!({"temperatureGpu": 65}));
        assert!(entry.updated_at >= before);
    }

    #[test]
    fn test_set_overwrites_without_merge() {
        let store = LatestStore::new();
        store.set("gpu-a", json!({"temperatureGpu": 65, "fanSpeed": 30}));
        store.set("gpu-a", json!({"utilizationGpu": 99}));

        let entry = store.get("gpu-a").unwrap();
        assert_eq!(entry.snapshot, json!({"utilizationGpu": 99}));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_unknown_device_is_absent() {
        let store: LatestStore<serde_json::Value> = LatestStore::new();
        assert!(store.get("ghost").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_entry_serializes_with_stats_wrapper() {
        let store = LatestStore::new();
        store.set("thebeast", json!({"utilizationGpu": 40}));
        let value = serde_json::to_value(store.get("thebeast").unwrap()).unwrap();

        assert_eq!(value["stats"], json!({"utilizationGpu": 40}));
        let ts = value["updatedAt"].as_str().unwrap();
        assert_eq!(ts.len(), "2025-01-01T00:00:00.000Z".len());
        assert!(ts.ends_with('Z'));
        assert_eq!(&ts[10..11], "T");
    }

    #[test]
    fn test_concurrent_writers_keep_one_entry_per_device() {
        let store = Arc::new(LatestStore::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for n in 0..200 {
                        store.set(format!("dev-{}", i % 2), json!({"writer": i, "n": n}));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(store.len(), 2);
        let entry = store.get("dev-0").unwrap();
        assert_eq!(entry.snapshot["n"], json!(199));
    }
}
