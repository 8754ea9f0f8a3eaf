//! Lecture des variables d'environnement partagée par le kernel et l'agent.

/// Booléen tolérant : `1/true/yes/on` et `0/false/no/off`, casse ignorée.
pub fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
