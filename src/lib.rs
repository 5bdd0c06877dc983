// src/lib.rs

pub mod announce;
pub mod captcha;
pub mod config;
pub mod discord;
pub mod guild_config;
pub mod linkguard;
pub mod logging;
pub mod pubcmds;
pub mod reputation;
pub mod userinfo;

use anyhow::Result;
use once_cell::sync::OnceCell;
use std::sync::Arc;

use captcha::CaptchaGate;
use config::Settings;
use guild_config::GuildConfigStore;
use reputation::ReputationService;

use serenity::all::GatewayIntents;

/// Globalny kontekst aplikacji.
/// Trzymamy konfigurację, czytnik configów gildii i gotowe serwisy
/// (CaptchaGate, ReputationService) — żadnych globalnych słowników.
#[derive(Clone)]
pub struct AppContext {
    pub settings: Settings,
    pub guilds: GuildConfigStore,
    captcha: OnceCell<Arc<CaptchaGate>>,
    reputation: OnceCell<Arc<ReputationService>>,
}

impl AppContext {
    /// Bootstrap całej aplikacji:
    /// - logi
    /// - czytnik per-gildyjnego configu (plik dashboardu)
    /// - stworzenie i wstrzyknięcie CaptchaGate oraz ReputationService do OnceCell
    pub async fn bootstrap(settings: Settings) -> Result<Arc<Self>> {
        // 1) logi
        logging::init(&settings);

        // 2) store configów gildii
        let guilds = GuildConfigStore::new(settings.guilds.config_path.clone());

        // 3) kontekst (na razie z pustymi OnceCell)
        let ctx = Arc::new(Self {
            settings,
            guilds,
            captcha: OnceCell::new(),
            reputation: OnceCell::new(),
        });

        // 4) CAPTCHA
        let gate = CaptchaGate::new();
        let _ = ctx.captcha.set(gate); // set() można wołać tylko raz

        // 5) Reputation
        let rep = ReputationService::new(&ctx.settings.reputation)?;
        if !rep.has_api_key() {
            tracing::warn!(
                "no reputation API key configured; lookups will report the service as unavailable"
            );
        }
        let _ = ctx.reputation.set(Arc::new(rep));

        Ok(ctx)
    }

    /// Wygodny getter: daj mi CaptchaGate (Arc).
    pub fn captcha(&self) -> Arc<CaptchaGate> {
        self.captcha
            .get()
            .expect("CaptchaGate not initialized")
            .clone()
    }

    /// Wygodny getter: daj mi ReputationService (Arc).
    pub fn reputation(&self) -> Arc<ReputationService> {
        self.reputation
            .get()
            .expect("ReputationService not initialized")
            .clone()
    }
}

/// Gotowy zestaw intents do użycia w kliencie Discord:
/// - GUILDS, GUILD_MESSAGES, MESSAGE_CONTENT (konieczne do filtrowania treści),
/// - GUILD_MEMBERS (joiny – potrzebne do CAPTCHA).
pub fn default_gateway_intents() -> GatewayIntents {
    GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT
        | GatewayIntents::GUILD_MEMBERS
}

/// Start klienta Discorda (Gateway + slash commands).
pub async fn run(ctx: Arc<AppContext>) -> Result<()> {
    discord::run_bot(ctx).await
}
