use std::time::Duration;

use anyhow::Result;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use moka::sync::Cache;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::config::ReputationConfig;

/* =========================================
   Stałe
   ========================================= */

/// Jak długo trzymamy wynik (także negatywny) w cache.
pub const CACHE_TTL_SECS: u64 = 300;
/// Twardy limit na pojedyncze zapytanie do serwisu reputacji.
pub const LOOKUP_TIMEOUT_SECS: u64 = 10;

const DEFAULT_BASE_URL: &str = "https://www.virustotal.com";

/* =========================================
   Werdykt
   ========================================= */

/// Znormalizowany wynik skanu jednego URL-a: per-vendor kategorie + permalink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkVerdict {
    pub malicious_vendors: Vec<String>,
    pub suspicious_vendors: Vec<String>,
    pub harmless: u32,
    pub undetected: u32,
    pub total_vendors: u32,
    pub permalink: Option<String>,
}

impl LinkVerdict {
    pub fn malicious_count(&self) -> u32 {
        self.malicious_vendors.len() as u32
    }
    pub fn suspicious_count(&self) -> u32 {
        self.suspicious_vendors.len() as u32
    }
    /// Czy którykolwiek vendor oznaczył link jako groźny.
    pub fn is_flagged(&self) -> bool {
        !self.malicious_vendors.is_empty() || !self.suspicious_vendors.is_empty()
    }
}

/// Wynik lookupu. `Unavailable` = brak klucza, timeout, non-200 albo błąd sieci.
#[derive(Debug, Clone)]
pub enum Lookup {
    Verdict(LinkVerdict),
    Unavailable,
}

/* =========================================
   Cache (klucz = dokładny string URL-a)
   ========================================= */

/// Wyniki lookupów trzymamy krótko, żeby nie młócić zewnętrznego API.
/// Cache'ujemy też porażki — gdy serwis leży lub rate-limituje, nie dobijamy go.
pub struct ReputationCache {
    entries: Cache<String, Lookup>,
}

impl ReputationCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Cache::builder().time_to_live(ttl).build(),
        }
    }

    /// Wpis starszy niż TTL traktowany jak nieobecny.
    pub fn get(&self, url: &str) -> Option<Lookup> {
        self.entries.get(url)
    }

    pub fn put(&self, url: &str, value: Lookup) {
        self.entries.insert(url.to_string(), value);
    }
}

/* =========================================
   Klient serwisu reputacji
   ========================================= */

#[derive(Debug, Error)]
enum FetchError {
    #[error("service returned status {0}")]
    Status(u16),
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
}

pub struct ReputationService {
    api_key: Option<String>,
    base_url: String,
    http: reqwest::Client,
    cache: ReputationCache,
}

impl ReputationService {
    pub fn new(cfg: &ReputationConfig) -> Result<Self> {
        let timeout = cfg.timeout_secs.unwrap_or(LOOKUP_TIMEOUT_SECS);
        let ttl = cfg.cache_ttl_secs.unwrap_or(CACHE_TTL_SECS);

        let http = reqwest::Client::builder()
            .user_agent("Caracal-Security/1.0")
            .connect_timeout(Duration::from_millis(1500))
            .timeout(Duration::from_secs(timeout))
            .build()?;

        Ok(Self {
            api_key: cfg.api_key.clone(),
            base_url: cfg
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            http,
            cache: ReputationCache::new(Duration::from_secs(ttl)),
        })
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Jeden lookup, jedno zapytanie, bez retry. Trafienie w cache (pozytywne
    /// albo negatywne) w ogóle nie wychodzi do sieci.
    pub async fn lookup(&self, url: &str) -> Lookup {
        // Brak klucza = warunek konfiguracji, nie błąd per-call. Zero sieci.
        let Some(key) = self.api_key.clone() else {
            return Lookup::Unavailable;
        };

        if let Some(hit) = self.cache.get(url) {
            return hit;
        }

        match self.fetch(&key, url).await {
            Ok(verdict) => {
                let hit = Lookup::Verdict(verdict);
                self.cache.put(url, hit.clone());
                hit
            }
            Err(e) => {
                debug!(error=?e, url, "reputation lookup failed");
                self.cache.put(url, Lookup::Unavailable);
                Lookup::Unavailable
            }
        }
    }

    async fn fetch(&self, key: &str, url: &str) -> Result<LinkVerdict, FetchError> {
        let endpoint = format!("{}/api/v3/urls/{}", self.base_url, encode_url_id(url));
        let resp = self.http.get(&endpoint).header("x-apikey", key).send().await?;

        if resp.status() != reqwest::StatusCode::OK {
            return Err(FetchError::Status(resp.status().as_u16()));
        }

        let body: Value = resp.json().await?;
        Ok(parse_verdict(&body))
    }
}

/// Identyfikator URL-a w schemacie serwisu: url-safe base64 bez paddingu.
pub fn encode_url_id(url: &str) -> String {
    URL_SAFE_NO_PAD.encode(url.as_bytes())
}

/// Tolerancyjny parser odpowiedzi: liczymy kategorie per vendor,
/// nieznane kategorie pomijamy (to nie błąd).
pub fn parse_verdict(body: &Value) -> LinkVerdict {
    let data = body.get("data");
    let attributes = data.and_then(|d| d.get("attributes"));

    let mut malicious_vendors = Vec::new();
    let mut suspicious_vendors = Vec::new();
    let mut harmless = 0u32;
    let mut undetected = 0u32;
    let mut total_vendors = 0u32;

    if let Some(results) = attributes
        .and_then(|a| a.get("last_analysis_results"))
        .and_then(|r| r.as_object())
    {
        total_vendors = results.len() as u32;
        for (vendor, info) in results {
            match info.get("category").and_then(|c| c.as_str()) {
                Some("malicious") => malicious_vendors.push(vendor.clone()),
                Some("suspicious") => suspicious_vendors.push(vendor.clone()),
                Some("harmless") => harmless += 1,
                Some("undetected") => undetected += 1,
                _ => {}
            }
        }
    }

    let permalink = attributes
        .and_then(|a| a.get("permalink"))
        .and_then(|p| p.as_str())
        .map(str::to_string)
        .or_else(|| {
            data.and_then(|d| d.get("id"))
                .and_then(|id| id.as_str())
                .map(|id| format!("https://www.virustotal.com/gui/url/{id}"))
        });

    LinkVerdict {
        malicious_vendors,
        suspicious_vendors,
        harmless,
        undetected,
        total_vendors,
        permalink,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_id_has_no_padding() {
        // "ab" koduje się z '=' w wariancie z paddingiem
        let id = encode_url_id("ab");
        assert!(!id.contains('='));
        assert_eq!(id, "YWI");
    }

    #[test]
    fn verdict_from_empty_body_is_zeroed() {
        let v = parse_verdict(&serde_json::json!({}));
        assert_eq!(v.total_vendors, 0);
        assert!(!v.is_flagged());
        assert!(v.permalink.is_none());
    }
}
