use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use anyhow::Result;
use tracing::warn;

use serenity::all::{
    Colour, CommandInteraction, Context, CreateCommand, CreateEmbed, CreateEmbedFooter,
    CreateInteractionResponse, CreateInteractionResponseMessage, EditInteractionResponse, GuildId,
    Interaction,
};

use crate::AppContext;

const BRAND_FOOTER: &str = "Caracal Security System™";

/// Porady rotują sekwencyjnie, nie losowo — każdy kolejny /securitytips
/// pokazuje następną z listy.
static TIPS_INDEX: AtomicUsize = AtomicUsize::new(0);

static TIPS: &[&str] = &[
    "Enable two-factor authentication on your Discord account — a stolen password alone then gets an attacker nothing.",
    "Never scan QR codes that promise free Nitro. QR login codes hand over your whole session.",
    "Check where a link really leads before clicking: markdown can mask `[steam.com](https://evil.example)`.",
    "No legitimate giveaway ever asks you to log in through a third-party site.",
    "Discord staff will never DM you asking for your password or token.",
    "If a friend suddenly sends you a 'game they made', their account is probably compromised — verify over another channel.",
    "Treat shortened links in DMs from strangers as hostile until proven otherwise.",
    "Report suspicious links with /report so moderators can act before someone clicks.",
    "Keep your client updated — old versions miss security fixes.",
    "A server asking you to 'verify' by entering your token is stealing your account. Close it.",
];

pub struct PubCmds;

impl PubCmds {
    pub async fn register_commands(ctx: &Context, guild_id: GuildId) -> Result<()> {
        guild_id
            .create_command(
                &ctx.http,
                CreateCommand::new("ping").description("Get the bot's ping"),
            )
            .await?;
        guild_id
            .create_command(
                &ctx.http,
                CreateCommand::new("securitytips")
                    .description("Get a security tip (rotates sequentially)"),
            )
            .await?;
        Ok(())
    }

    pub async fn on_interaction(ctx: &Context, _app: &AppContext, interaction: Interaction) {
        if let Some(cmd) = interaction.command() {
            match cmd.data.name.as_str() {
                "ping" => {
                    if let Err(e) = handle_ping(ctx, &cmd).await {
                        warn!(error=?e, "ping failed");
                    }
                }
                "securitytips" => {
                    if let Err(e) = handle_tip(ctx, &cmd).await {
                        warn!(error=?e, "securitytips failed");
                    }
                }
                _ => {}
            }
        }
    }
}

async fn handle_ping(ctx: &Context, cmd: &CommandInteraction) -> Result<()> {
    let start = Instant::now();
    cmd.create_response(
        &ctx.http,
        CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new().ephemeral(true)),
    )
    .await?;
    let latency_ms = start.elapsed().as_millis();

    let embed = CreateEmbed::new()
        .title("🏓 Pong!")
        .description(format!("Message latency: `{latency_ms} ms`"))
        .colour(Colour::DARK_GREEN)
        .footer(CreateEmbedFooter::new(BRAND_FOOTER));

    cmd.edit_response(&ctx.http, EditInteractionResponse::new().embed(embed))
        .await?;
    Ok(())
}

async fn handle_tip(ctx: &Context, cmd: &CommandInteraction) -> Result<()> {
    let idx = TIPS_INDEX.fetch_add(1, Ordering::Relaxed) % TIPS.len();

    let embed = CreateEmbed::new()
        .title("🔒 Security Tip")
        .description(TIPS[idx])
        .colour(Colour::BLUE)
        .footer(CreateEmbedFooter::new(BRAND_FOOTER));

    cmd.create_response(
        &ctx.http,
        CreateInteractionResponse::Message(CreateInteractionResponseMessage::new().embed(embed)),
    )
    .await?;
    Ok(())
}
