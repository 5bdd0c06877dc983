use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{info, warn};
use unicode_normalization::UnicodeNormalization;
use url::Url;

use serenity::all::{
    ChannelId, Colour, CommandDataOptionValue, CommandInteraction, CommandOptionType, Context,
    CreateCommand, CreateCommandOption, CreateEmbed, CreateEmbedFooter, CreateInteractionResponse,
    CreateInteractionResponseMessage, CreateMessage, EditInteractionResponse, GuildId, Interaction,
    Message,
};

use crate::AppContext;
use crate::guild_config::GuildSecurityConfig;
use crate::reputation::Lookup;

/* =========================================
   Stałe / regexy
   ========================================= */

const BRAND_FOOTER: &str = "Caracal Security System™ • LinkGuard";

/// Próg heurystyki: oba warunki muszą zajść naraz (celowo konserwatywnie,
/// żeby nie strzelać do zwykłych URL-i z myślnikami).
const MIN_DASHES: usize = 2;
const MIN_KEYWORDS: usize = 2;

static RE_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?ix)\[[^\]]*\]\((https?://[^\s<>()]+)\)|(https?://[^\s<>()]+)"#).unwrap()
});

/* =========================================
   Czysty skan (bez side-effectów)
   ========================================= */

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanDecision {
    pub is_suspicious: bool,
    pub matched_url: Option<String>,
    pub matched_keywords: Vec<String>,
}

impl ScanDecision {
    fn clean() -> Self {
        Self::default()
    }
}

/// Wszystkie URL-e z tekstu: surowe `https?://…` oraz maskowane `[label](url)`.
pub fn extract_urls(text: &str) -> Vec<String> {
    RE_URL
        .captures_iter(text)
        .filter_map(|c| c.get(1).or_else(|| c.get(2)))
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Heurystyka: URL jest podejrzany gdy ma >= 2 myślniki ORAZ >= 2 różne
/// słowa z denylisty. Hosty z allowlisty w ogóle nie są oceniane.
/// Kończymy na pierwszym trafieniu. Zero side-effectów — egzekucję robi caller.
pub fn scan(text: &str, allowed_domains: &[String], deny_keywords: &[String]) -> ScanDecision {
    // NFKC niweluje fullwidth-owe uniki; dla ASCII bez zmian
    let folded: String = text.nfkc().collect();

    for url in extract_urls(&folded) {
        let url_lower = url.to_lowercase();
        if host_matches(&url_lower, allowed_domains) {
            continue;
        }

        let dashes = url_lower.matches('-').count();
        if dashes < MIN_DASHES {
            continue;
        }

        // Wielowyrazowe frazy w URL-ach występują z '-'/'_' zamiast spacji
        let haystack = url_lower.replace(['-', '_'], " ");
        let mut matched: Vec<String> = Vec::new();
        for kw in deny_keywords {
            let kw = kw.trim().to_lowercase();
            if kw.is_empty() || matched.contains(&kw) {
                continue;
            }
            if haystack.contains(&kw) {
                matched.push(kw);
            }
        }

        if matched.len() >= MIN_KEYWORDS {
            return ScanDecision {
                is_suspicious: true,
                matched_url: Some(url),
                matched_keywords: matched,
            };
        }
    }

    ScanDecision::clean()
}

/// Pierwszy URL, którego host łapie się na denylistę domen.
pub fn find_blacklisted_domain(text: &str, deny_domains: &[String]) -> Option<(String, String)> {
    let folded: String = text.nfkc().collect();
    for url in extract_urls(&folded) {
        let url_lower = url.to_lowercase();
        for d in deny_domains {
            let d = d.trim().to_lowercase();
            if d.is_empty() {
                continue;
            }
            if host_contains(&url_lower, &d) {
                return Some((url, d));
            }
        }
    }
    None
}

fn host_matches(url_lower: &str, domains: &[String]) -> bool {
    domains.iter().any(|d| {
        let d = d.trim().to_lowercase();
        !d.is_empty() && host_contains(url_lower, &d)
    })
}

/// Dopasowanie substringiem po hoście; gdy URL się nie parsuje,
/// zapasowo po całym stringu (regex potrafi złapać ogon z interpunkcją).
fn host_contains(url_lower: &str, needle: &str) -> bool {
    match Url::parse(url_lower).ok().and_then(|u| u.host_str().map(str::to_string)) {
        Some(host) => host.contains(needle),
        None => url_lower.contains(needle),
    }
}

fn merge_lists(global: &[String], guild: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(global.len() + guild.len());
    for s in global.iter().chain(guild) {
        let s = s.trim().to_lowercase();
        if !s.is_empty() && !out.contains(&s) {
            out.push(s);
        }
    }
    out
}

/* =========================================
   Publiczny interfejs LinkGuard
   ========================================= */

pub struct LinkGuard;

impl LinkGuard {
    pub async fn register_commands(ctx: &Context, guild_id: GuildId) -> Result<()> {
        guild_id
            .create_command(
                &ctx.http,
                CreateCommand::new("checklink")
                    .description("Check a link against the security vendors' verdicts")
                    .add_option(
                        CreateCommandOption::new(CommandOptionType::String, "url", "Link to check")
                            .required(true),
                    ),
            )
            .await?;
        guild_id
            .create_command(
                &ctx.http,
                CreateCommand::new("report")
                    .description("Report a suspicious link to the server moderators")
                    .add_option(
                        CreateCommandOption::new(CommandOptionType::String, "link", "Link to report")
                            .required(true),
                    ),
            )
            .await?;
        Ok(())
    }

    /// Wywoływane z EventHandler::message.
    pub async fn on_message(ctx: &Context, app: &AppContext, msg: &Message) {
        if msg.author.bot {
            return;
        }
        let Some(gid) = msg.guild_id else {
            return;
        };
        if msg.content.is_empty() {
            return;
        }

        let gcfg = app.guilds.get(gid.get()).await;
        let lg = &app.settings.linkguard;
        let allowed = merge_lists(&lg.allowed_domains, &gcfg.allowed_domains);
        let keywords = merge_lists(&lg.blacklisted_keywords, &gcfg.blacklisted_keywords);
        let domains = merge_lists(&lg.blacklisted_domains, &gcfg.blacklisted_domains);

        let decision = scan(&msg.content, &allowed, &keywords);
        if decision.is_suspicious {
            let url = decision.matched_url.as_deref().unwrap_or("");
            let reason = format!("Matched keywords: {}", decision.matched_keywords.join(", "));
            enforce(ctx, app, msg, &gcfg, url, &reason).await;
            return;
        }

        if let Some((url, domain)) = find_blacklisted_domain(&msg.content, &domains) {
            let reason = format!("Blacklisted domain: {domain}");
            enforce(ctx, app, msg, &gcfg, &url, &reason).await;
        }
    }

    /// Brama interakcji: /checklink i /report.
    pub async fn on_interaction(ctx: &Context, app: &AppContext, interaction: Interaction) {
        if let Some(cmd) = interaction.command() {
            match cmd.data.name.as_str() {
                "checklink" => {
                    if let Err(e) = handle_checklink(ctx, app, &cmd).await {
                        warn!(error=?e, "checklink failed");
                    }
                }
                "report" => {
                    if let Err(e) = handle_report(ctx, app, &cmd).await {
                        warn!(error=?e, "report failed");
                    }
                }
                _ => {}
            }
        }
    }
}

/* =========================================
   Egzekucja (delete + alert)
   ========================================= */

/// Delete może się nie udać (wiadomość już skasowana, brak uprawnień) —
/// połykamy; alert i tak wysyłamy, decyzja zawsze trafia do logów.
async fn enforce(
    ctx: &Context,
    app: &AppContext,
    msg: &Message,
    gcfg: &GuildSecurityConfig,
    url: &str,
    reason: &str,
) {
    let _ = msg.delete(&ctx.http).await;

    info!(
        guild_id = msg.guild_id.map(|g| g.get()).unwrap_or(0),
        author_id = msg.author.id.get(),
        url,
        reason,
        "suspicious link removed"
    );

    let Some(alert_channel) = gcfg.alert_channel_id else {
        return;
    };

    let embed = CreateEmbed::new()
        .title("🚨 LinkGuard: suspicious link blocked")
        .description(format!(
            "Author: <@{}>\nChannel: <#{}>\nLink: `{}`\n{}",
            msg.author.id.get(),
            msg.channel_id.get(),
            clamp(url, 256),
            reason
        ))
        .colour(Colour::RED)
        .footer(CreateEmbedFooter::new(BRAND_FOOTER));

    let mut out = CreateMessage::new().embed(embed);
    if let Some(admin_role) = gcfg.admin_role_id {
        out = out.content(format!("<@&{admin_role}>"));
    }

    if let Err(e) = ChannelId::new(alert_channel).send_message(&ctx.http, out).await {
        warn!(error=?e, alert_channel, "alert post failed");
    }
}

fn clamp(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut out = s[..max.saturating_sub(1)].to_string();
    out.push('…');
    out
}

/* =========================================
   /checklink (slash)
   ========================================= */

async fn handle_checklink(ctx: &Context, app: &AppContext, cmd: &CommandInteraction) -> Result<()> {
    let mut url: Option<String> = None;
    for o in &cmd.data.options {
        if let ("url", CommandDataOptionValue::String(s)) = (&o.name[..], &o.value) {
            url = Some(s.clone());
        }
    }
    let Some(url) = url else {
        let _ = cmd
            .create_response(
                &ctx.http,
                CreateInteractionResponse::Message(
                    CreateInteractionResponseMessage::new()
                        .content("Provide a URL.")
                        .ephemeral(true),
                ),
            )
            .await;
        return Ok(());
    };

    if !(url.starts_with("http://") || url.starts_with("https://")) {
        let _ = cmd
            .create_response(
                &ctx.http,
                CreateInteractionResponse::Message(
                    CreateInteractionResponseMessage::new()
                        .content("⚠️ Please provide a valid URL (starting with http:// or https://).")
                        .ephemeral(true),
                ),
            )
            .await;
        return Ok(());
    }

    // Defer — lookup ma budżet do 10 s
    let _ = cmd
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
        )
        .await;

    match app.reputation().lookup(&url).await {
        Lookup::Verdict(v) => {
            let colour = if v.is_flagged() { Colour::RED } else { Colour::DARK_GREEN };

            let malicious = if v.malicious_vendors.is_empty() {
                "0".to_string()
            } else {
                format!("{} ({})", v.malicious_count(), v.malicious_vendors.join(", "))
            };
            let suspicious = if v.suspicious_vendors.is_empty() {
                "0".to_string()
            } else {
                format!("{} ({})", v.suspicious_count(), v.suspicious_vendors.join(", "))
            };

            let mut embed = CreateEmbed::new()
                .title("🧪 Link Reputation Scan")
                .description(format!(
                    "**URL:** {}\n**Total vendors scanned:** {}",
                    clamp(&url, 256),
                    v.total_vendors
                ))
                .field("🦠 Malicious", clamp(&malicious, 1024), false)
                .field("⚠️ Suspicious", clamp(&suspicious, 1024), false)
                .field("✅ Harmless", v.harmless.to_string(), true)
                .field("❔ Undetected", v.undetected.to_string(), true)
                .colour(colour)
                .footer(CreateEmbedFooter::new(BRAND_FOOTER));

            if let Some(link) = &v.permalink {
                embed = embed.field("🔗 Full Report", format!("[View full report]({link})"), false);
            }

            let _ = cmd
                .edit_response(&ctx.http, EditInteractionResponse::new().embed(embed))
                .await;
        }
        Lookup::Unavailable => {
            let _ = cmd
                .edit_response(
                    &ctx.http,
                    EditInteractionResponse::new()
                        .content("❌ Failed to fetch results from the reputation service."),
                )
                .await;
        }
    }
    Ok(())
}

/* =========================================
   /report (slash)
   ========================================= */

async fn handle_report(ctx: &Context, app: &AppContext, cmd: &CommandInteraction) -> Result<()> {
    let Some(gid) = cmd.guild_id else {
        let _ = cmd
            .create_response(
                &ctx.http,
                CreateInteractionResponse::Message(
                    CreateInteractionResponseMessage::new()
                        .content("This command only works in a server.")
                        .ephemeral(true),
                ),
            )
            .await;
        return Ok(());
    };

    let mut link: Option<String> = None;
    for o in &cmd.data.options {
        if let ("link", CommandDataOptionValue::String(s)) = (&o.name[..], &o.value) {
            link = Some(s.clone());
        }
    }
    let Some(link) = link else {
        let _ = cmd
            .create_response(
                &ctx.http,
                CreateInteractionResponse::Message(
                    CreateInteractionResponseMessage::new()
                        .content("Provide a link.")
                        .ephemeral(true),
                ),
            )
            .await;
        return Ok(());
    };

    let gcfg = app.guilds.get(gid.get()).await;
    let Some(alert_channel) = gcfg.alert_channel_id else {
        let _ = cmd
            .create_response(
                &ctx.http,
                CreateInteractionResponse::Message(
                    CreateInteractionResponseMessage::new()
                        .content(
                            "❌ The alert channel is not set up for this server, so the report \
                             cannot be delivered. DM a server moderator to have them set it up.",
                        )
                        .ephemeral(true),
                ),
            )
            .await;
        return Ok(());
    };

    let embed = CreateEmbed::new()
        .title("New Reported Link")
        .description(format!(
            "<@{}> has reported the link `{}` as suspicious.\n\
             Use `/checklink` to verify it against the security vendors.",
            cmd.user.id.get(),
            clamp(&link, 256)
        ))
        .colour(Colour::BLUE)
        .footer(CreateEmbedFooter::new(BRAND_FOOTER));

    let mut out = CreateMessage::new().embed(embed);
    if let Some(admin_role) = gcfg.admin_role_id {
        out = out.content(format!("<@&{admin_role}>"));
    }

    match ChannelId::new(alert_channel).send_message(&ctx.http, out).await {
        Ok(_) => {
            let _ = cmd
                .create_response(
                    &ctx.http,
                    CreateInteractionResponse::Message(
                        CreateInteractionResponseMessage::new()
                            .content("✅ Your report has been sent to the moderators.")
                            .ephemeral(true),
                    ),
                )
                .await;
        }
        Err(e) => {
            warn!(error=?e, alert_channel, "report post failed");
            let _ = cmd
                .create_response(
                    &ctx.http,
                    CreateInteractionResponse::Message(
                        CreateInteractionResponseMessage::new()
                            .content("❌ Could not deliver the report — try again later.")
                            .ephemeral(true),
                    ),
                )
                .await;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn kws() -> Vec<String> {
        vec![
            "free nitro".into(),
            "free crypto".into(),
            "nitro".into(),
        ]
    }

    #[test]
    fn masked_and_raw_urls_are_both_extracted() {
        let urls = extract_urls("look [here](https://a.example/x) and https://b.example/y done");
        assert_eq!(urls, vec!["https://a.example/x", "https://b.example/y"]);
    }

    #[test]
    fn scan_stops_at_first_suspicious_url() {
        let text = "https://free-crypto-nitro.a.example https://free-crypto-nitro.b.example";
        let d = scan(text, &[], &kws());
        assert!(d.is_suspicious);
        assert_eq!(d.matched_url.as_deref(), Some("https://free-crypto-nitro.a.example"));
    }

    proptest! {
        // < 2 myślniki => nigdy podejrzane, niezależnie od słów kluczowych
        #[test]
        fn single_dash_urls_never_flagged(s in "[a-z0-9]{0,12}") {
            let url = format!("https://free-crypto{s}.example/nitro");
            let d = scan(&url, &[], &kws());
            prop_assert!(!d.is_suspicious);
        }

        // pusta denylista => nigdy podejrzane
        #[test]
        fn no_keywords_never_flagged(s in "[a-z0-9-]{0,24}") {
            let url = format!("https://a-b-{s}.example");
            let d = scan(&url, &[], &[]);
            prop_assert!(!d.is_suspicious);
        }
    }
}
