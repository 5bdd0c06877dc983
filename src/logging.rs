use crate::config::Settings;
use tracing_subscriber::EnvFilter;

/// Inicjalizacja logowania: format tekstowy, poziom z configu,
/// ale RUST_LOG (jeśli ustawiony) wygrywa.
pub fn init(settings: &Settings) {
    let level = settings.logging.level.as_deref().unwrap_or("info");

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}
