/**
 * AUTH - Table statique device -> clé secrète
 *
 * Correspondance par appartenance exacte de la clé : n'importe quelle clé
 * valide ouvre les routes /api, l'identité "device authentifié" est déduite
 * de la clé qui a matché.
 */

use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedDevice(pub String);

#[derive(Debug, Clone, Default)]
pub struct ApiKeyTable {
    by_key: HashMap<String, String>,
}

impl ApiKeyTable {
    /// `keys` : device_id -> clé. Les clés vides sont ignorées.
    pub fn from_device_keys(keys: &HashMap<String, String>) -> Self {
        let by_key = keys
            .iter()
            .filter(|(_, key)| !key.is_empty())
            .map(|(device, key)| (key.clone(), device.clone()))
            .collect();
        Self { by_key }
    }

    pub fn authenticate(&self, presented: Option<&str>) -> Option<AuthenticatedDevice> {
        let key = presented.filter(|k| !k.is_empty())?;
        self.by_key.get(key).map(|device| AuthenticatedDevice(device.clone()))
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}
