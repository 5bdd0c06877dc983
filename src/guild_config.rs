use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Ustawienia bezpieczeństwa jednej gildii.
/// Każde pole może być puste — brak wartości oznacza "funkcja wyłączona".
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct GuildSecurityConfig {
    pub alert_channel_id: Option<u64>,
    pub captcha_channel_id: Option<u64>,
    pub captcha_verified_role_id: Option<u64>,
    pub admin_role_id: Option<u64>,
    #[serde(default)]
    pub allowed_domains: Vec<String>,
    #[serde(default)]
    pub blacklisted_domains: Vec<String>,
    #[serde(default)]
    pub blacklisted_keywords: Vec<String>,
}

/// Czytnik pliku `server_config.json` (klucz = guild_id jako string).
/// Plik pisze dashboard; bot go wyłącznie czyta, przy każdym dostępie —
/// dzięki temu zmiany z panelu działają bez restartu.
#[derive(Debug, Clone)]
pub struct GuildConfigStore {
    path: PathBuf,
}

impl GuildConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Config gildii; brak pliku/wpisu/zepsuty JSON => domyślny (wszystko wyłączone).
    pub async fn get(&self, guild_id: u64) -> GuildSecurityConfig {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(b) => b,
            Err(_) => return GuildSecurityConfig::default(),
        };

        match serde_json::from_slice::<HashMap<String, GuildSecurityConfig>>(&bytes) {
            Ok(mut map) => map.remove(&guild_id.to_string()).unwrap_or_default(),
            Err(e) => {
                warn!(error=?e, path=%self.path.display(), "guild config parse failed");
                GuildSecurityConfig::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_entries_deserialize_with_defaults() {
        let raw = r#"{
            "123": { "alert_channel_id": 42 },
            "456": { "blacklisted_keywords": ["free nitro"] }
        }"#;
        let map: HashMap<String, GuildSecurityConfig> = serde_json::from_str(raw).unwrap();

        let a = &map["123"];
        assert_eq!(a.alert_channel_id, Some(42));
        assert!(a.captcha_channel_id.is_none());
        assert!(a.blacklisted_keywords.is_empty());

        let b = &map["456"];
        assert!(b.alert_channel_id.is_none());
        assert_eq!(b.blacklisted_keywords, vec!["free nitro".to_string()]);
    }
}
