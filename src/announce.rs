use anyhow::Result;
use tracing::warn;

use serenity::all::{
    ChannelId, Colour, CommandDataOptionValue, CommandInteraction, CommandOptionType, Context,
    CreateCommand, CreateCommandOption, CreateEmbed, CreateEmbedFooter,
    CreateInteractionResponse, CreateInteractionResponseMessage, CreateMessage,
    EditInteractionResponse, GuildId, Interaction,
};

use crate::AppContext;

const BRAND_FOOTER: &str = "Caracal Security System™";

/// Broadcast od deweloperów do kanałów alertów wszystkich gildii.
/// Tylko dla właścicieli bota (lista w configu, nie hardcode).
pub struct Announce;

impl Announce {
    pub async fn register_commands(ctx: &Context, guild_id: GuildId) -> Result<()> {
        guild_id
            .create_command(
                &ctx.http,
                CreateCommand::new("announce")
                    .description("Broadcast a developer update to all servers' alert channels")
                    .add_option(
                        CreateCommandOption::new(CommandOptionType::String, "mode", "silent|loud")
                            .required(true)
                            .add_string_choice("silent", "silent")
                            .add_string_choice("loud", "loud"),
                    )
                    .add_option(
                        CreateCommandOption::new(CommandOptionType::String, "text", "Announcement text")
                            .required(true),
                    ),
            )
            .await?;
        Ok(())
    }

    pub async fn on_interaction(ctx: &Context, app: &AppContext, interaction: Interaction) {
        if let Some(cmd) = interaction.command() {
            if cmd.data.name == "announce" {
                if let Err(e) = handle_announce(ctx, app, &cmd).await {
                    warn!(error=?e, "announce failed");
                }
            }
        }
    }
}

async fn handle_announce(ctx: &Context, app: &AppContext, cmd: &CommandInteraction) -> Result<()> {
    // ACL: wyłącznie właściciele bota
    if !app.settings.discord.owner_ids.contains(&cmd.user.id.get()) {
        let _ = cmd
            .create_response(
                &ctx.http,
                CreateInteractionResponse::Message(
                    CreateInteractionResponseMessage::new()
                        .content("🚫 Only the bot owners can use this command.")
                        .ephemeral(true),
                ),
            )
            .await;
        return Ok(());
    }

    let mut mode = String::new();
    let mut text = String::new();
    for o in &cmd.data.options {
        match (&o.name[..], &o.value) {
            ("mode", CommandDataOptionValue::String(s)) => mode = s.clone(),
            ("text", CommandDataOptionValue::String(s)) => text = s.clone(),
            _ => {}
        }
    }

    let ping = match mode.as_str() {
        "silent" => String::new(),
        "loud" => "@everyone".to_string(),
        _ => {
            let _ = cmd
                .create_response(
                    &ctx.http,
                    CreateInteractionResponse::Message(
                        CreateInteractionResponseMessage::new()
                            .content("❌ Invalid mode. Use `silent` or `loud`.")
                            .ephemeral(true),
                    ),
                )
                .await;
            return Ok(());
        }
    };

    // Szybki ACK — rozesłanie po gildiach może chwilę potrwać
    let _ = cmd
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new()
                    .content("Broadcasting…")
                    .ephemeral(true),
            ),
        )
        .await;

    let embed = CreateEmbed::new()
        .title("Update from the Bot Developers")
        .description(text)
        .colour(Colour::DARK_GREEN)
        .footer(CreateEmbedFooter::new(BRAND_FOOTER));

    // Wysyłamy tylko tam, gdzie gildia ma skonfigurowany kanał alertów i rolę admina
    let mut sent = 0usize;
    for gid in ctx.cache.guilds() {
        let gcfg = app.guilds.get(gid.get()).await;
        let (Some(alert_channel), Some(_admin_role)) = (gcfg.alert_channel_id, gcfg.admin_role_id)
        else {
            continue;
        };

        let mut out = CreateMessage::new().embed(embed.clone());
        if !ping.is_empty() {
            out = out.content(ping.clone());
        }
        match ChannelId::new(alert_channel).send_message(&ctx.http, out).await {
            Ok(_) => sent += 1,
            Err(e) => warn!(error=?e, gid = gid.get(), "announcement send failed"),
        }
    }

    let _ = cmd
        .edit_response(
            &ctx.http,
            EditInteractionResponse::new()
                .content(format!("✅ Announcement sent to {sent} servers' alert channels.")),
        )
        .await;
    Ok(())
}
