// src/discord/mod.rs
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use futures_util::FutureExt;

use serenity::all::*;
use serenity::async_trait;

use crate::AppContext;
use crate::announce::Announce;
use crate::captcha::Captcha;
use crate::linkguard::LinkGuard;
use crate::pubcmds::PubCmds;
use crate::userinfo::UserInfo;

pub struct Handler {
    pub app: Arc<AppContext>,
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        tracing::info!("Logged in as {}", ready.user.name);

        // Rejestr komend slash dla wszystkich gildii
        for g in ready.guilds {
            if let Err(e) = register_commands_for_guild(&ctx, g.id).await {
                tracing::warn!(error=?e, gid=%g.id.get(), "register_commands_for_guild failed (ready)");
            }
        }
    }

    // _is_new zgodnie z Serenity 0.12
    async fn guild_create(&self, ctx: Context, guild: Guild, _is_new: Option<bool>) {
        if let Err(e) = register_commands_for_guild(&ctx, guild.id).await {
            tracing::warn!(error=?e, gid = guild.id.get(), "register_commands_for_guild failed (guild_create)");
        }
    }

    async fn message(&self, ctx: Context, msg: Message) {
        let Some(_gid) = msg.guild_id else {
            return;
        };
        if msg.author.bot {
            return;
        }

        LinkGuard::on_message(&ctx, &self.app, &msg).await;
    }

    async fn guild_member_addition(&self, ctx: Context, member: Member) {
        Captcha::on_member_join(&ctx, &self.app, &member).await;
    }

    /// Brama interakcji: slash + komponenty + modale
    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        let started = Instant::now();
        let cmd_copy = interaction.clone().command();

        let fut = async {
            // Klonujemy, bo ostatni handler konsumuje Interaction
            LinkGuard::on_interaction(&ctx, &self.app, interaction.clone()).await;
            Captcha::on_interaction(&ctx, &self.app, interaction.clone()).await;
            UserInfo::on_interaction(&ctx, &self.app, interaction.clone()).await;
            PubCmds::on_interaction(&ctx, &self.app, interaction.clone()).await;

            // Announce NA KOŃCU (konsumuje Interaction)
            Announce::on_interaction(&ctx, &self.app, interaction).await;
        };

        let result = AssertUnwindSafe(fut).catch_unwind().await;

        if let Some(cmd) = cmd_copy {
            let status = if result.is_ok() { "ok" } else { "panic" };
            tracing::info!(
                command = %cmd.data.name,
                elapsed_ms = started.elapsed().as_millis() as u64,
                status,
                "interaction handled"
            );
        }
    }
}

fn intents_from_settings(names: &[String]) -> GatewayIntents {
    let mut i = GatewayIntents::empty();
    for n in names {
        match n.as_str() {
            "GUILDS" => i |= GatewayIntents::GUILDS,
            "GUILD_MEMBERS" => i |= GatewayIntents::GUILD_MEMBERS,
            "GUILD_MESSAGES" => i |= GatewayIntents::GUILD_MESSAGES,
            "GUILD_MESSAGE_REACTIONS" => i |= GatewayIntents::GUILD_MESSAGE_REACTIONS,
            "GUILD_PRESENCES" => i |= GatewayIntents::GUILD_PRESENCES,
            "MESSAGE_CONTENT" => i |= GatewayIntents::MESSAGE_CONTENT,
            _ => {}
        }
    }
    i
}

pub async fn run_bot(ctx: Arc<AppContext>) -> Result<()> {
    let token = &ctx.settings.discord.token;
    if token.is_empty() {
        anyhow::bail!("Missing Discord token (CSEC_DISCORD_TOKEN). Fill it in .env.");
    }

    let intents = intents_from_settings(&ctx.settings.discord.intents);

    let handler = Handler { app: ctx.clone() };

    let mut client = serenity::Client::builder(token, intents)
        .event_handler(handler)
        .await?;

    tracing::info!("Discord client starting…");
    client.start().await?;
    Ok(())
}

/* ============================================================
   REJESTR KOMEND
   ============================================================ */
async fn register_commands_for_guild(ctx: &Context, guild_id: GuildId) -> Result<()> {
    // Każdą komendę rejestruj osobno, z nazwą w logu.
    if let Err(e) = LinkGuard::register_commands(ctx, guild_id).await {
        tracing::warn!(error=?e, gid=%guild_id.get(), "register linkguard failed");
    }
    if let Err(e) = Captcha::register_commands(ctx, guild_id).await {
        tracing::warn!(error=?e, gid=%guild_id.get(), "register captcha failed");
    }
    if let Err(e) = UserInfo::register_commands(ctx, guild_id).await {
        tracing::warn!(error=?e, gid=%guild_id.get(), "register whois failed");
    }
    if let Err(e) = PubCmds::register_commands(ctx, guild_id).await {
        tracing::warn!(error=?e, gid=%guild_id.get(), "register pubcmds failed");
    }
    if let Err(e) = Announce::register_commands(ctx, guild_id).await {
        tracing::warn!(error=?e, gid=%guild_id.get(), "register announce failed");
    }
    Ok(())
}
