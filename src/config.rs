use anyhow::Result;
use serde::{Deserialize, Serialize};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    pub env: String,
    pub app: App,
    pub discord: Discord,
    pub logging: Logging,
    pub guilds: Guilds,
    pub linkguard: LinkGuardConfig,
    pub reputation: ReputationConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct App {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Discord {
    pub token: String,
    pub app_id: Option<String>,
    pub intents: Vec<String>,
    #[serde(default)]
    pub owner_ids: Vec<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Logging {
    pub json: Option<bool>,
    pub level: Option<String>,
}

/// Skąd czytamy per-gildyjny config (plik należy do dashboardu, my tylko czytamy).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Guilds {
    pub config_path: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct LinkGuardConfig {
    #[serde(default)]
    pub allowed_domains: Vec<String>,
    #[serde(default)]
    pub blacklisted_domains: Vec<String>,
    #[serde(default)]
    pub blacklisted_keywords: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ReputationConfig {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub timeout_secs: Option<u64>,
    pub cache_ttl_secs: Option<u64>,
}

impl Settings {
    pub fn load() -> Result<Self> {
        // Które środowisko?
        let env = std::env::var("CSEC_ENV").unwrap_or_else(|_| "development".to_string());

        // Załaduj .env.<env> i .env (jeśli są)
        let _ = dotenvy::from_filename(format!(".env.{}", env));
        let _ = dotenvy::dotenv();

        // Domyślne wartości
        #[derive(Deserialize, Serialize)]
        struct Defaults {
            env: String,
            app: App,
            discord: Discord,
            logging: Logging,
            guilds: Guilds,
            linkguard: LinkGuardConfig,
            reputation: ReputationConfig,
        }

        let defaults = Defaults {
            env: env.clone(),
            app: App {
                name: "Caracal Security".into(),
            },
            discord: Discord {
                token: "".into(),
                app_id: None,
                intents: vec![
                    "GUILDS".into(),
                    "GUILD_MEMBERS".into(),
                    "GUILD_MESSAGES".into(),
                    "MESSAGE_CONTENT".into(),
                ],
                owner_ids: vec![],
            },
            logging: Logging {
                json: Some(false),
                level: Some("info".into()),
            },
            guilds: Guilds {
                config_path: "server_config.json".into(),
            },
            linkguard: LinkGuardConfig {
                allowed_domains: vec![
                    "youtube.com".into(),
                    "x.com".into(),
                    "tiktok.com".into(),
                ],
                blacklisted_domains: vec![
                    "grabify.link".into(),
                    "iplogger.org".into(),
                    "bmwforum.co".into(),
                    "yip.su".into(),
                ],
                blacklisted_keywords: vec![
                    "free nitro".into(),
                    "nitro giveaway".into(),
                    "free crypto".into(),
                    "btc giveaway".into(),
                    "free robux".into(),
                    "robux giveaway".into(),
                ],
            },
            reputation: ReputationConfig::default(),
        };

        // Warstwy: domyślne -> plik TOML -> zmienne środowiskowe CSEC_*
        let figment = Figment::from(Serialized::defaults(defaults))
            .merge(Toml::file(format!("config/{}.toml", env)))
            // CSEC_DISCORD_TOKEN => discord.token itd.
            .merge(Env::prefixed("CSEC_").split("_"));

        let mut s: Settings = figment.extract()?;
        s.env = env;

        // Klucz API nie przejdzie przez split("_") (dwuczłonowy liść) — bierzemy wprost z ENV.
        if let Ok(key) = std::env::var("CSEC_VT_API_KEY") {
            if !key.trim().is_empty() {
                s.reputation.api_key = Some(key);
            }
        }

        Ok(s)
    }
}
