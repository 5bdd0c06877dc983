use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;
use serenity::all::*;

use crate::AppContext;

const SYSTEM_NAME: &str = "Caracal Security System™";

pub struct UserInfo;

impl UserInfo {
    /* ===================== Komendy ===================== */

    pub async fn register_commands(ctx: &Context, gid: GuildId) -> Result<()> {
        // /whois – wymagane „user”, opcjonalne „public”
        gid.create_command(&ctx.http,
            CreateCommand::new("whois")
                .description("Show information about a user (profile + server membership).")
                .add_option(
                    CreateCommandOption::new(CommandOptionType::User, "user", "Which user to inspect")
                        .required(true)
                )
                .add_option(
                    CreateCommandOption::new(CommandOptionType::Boolean, "public", "Public reply (private by default)")
                )
        ).await?;
        Ok(())
    }

    pub async fn on_interaction(ctx: &Context, app: &AppContext, interaction: Interaction) {
        if let Some(cmd) = interaction.command() {
            if cmd.data.name.as_str() == "whois" {
                if let Err(e) = handle_whois(ctx, app, &cmd).await {
                    tracing::warn!(?e, "whois command failed");
                }
            }
        }
    }
}

/* ========================= Handler ========================= */

async fn handle_whois(ctx: &Context, _app: &AppContext, cmd: &CommandInteraction) -> Result<()> {
    let Some(gid) = cmd.guild_id else {
        cmd.create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new().content("Use this in a server.")
            )
        ).await?;
        return Ok(());
    };

    // Opcje zbieramy przed defer, żeby ustawić ephemeral zależnie od "public"
    let mut target: Option<UserId> = None;
    let mut want_public = false;
    for o in &cmd.data.options {
        match (&o.name[..], &o.value) {
            ("user",   CommandDataOptionValue::User(u))    => target = Some(*u),
            ("public", CommandDataOptionValue::Boolean(b)) => want_public = *b,
            _ => {}
        }
    }
    let Some(uid) = target else {
        cmd.create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new().content("Pick a user.")
            )
        ).await?;
        return Ok(());
    };

    // Defer
    cmd.create_response(
        &ctx.http,
        CreateInteractionResponse::Defer(
            CreateInteractionResponseMessage::new().ephemeral(!want_public)
        )
    ).await?;

    // Dane
    let user = uid.to_user(&ctx.http).await?;
    let member_opt = gid.member(&ctx.http, uid).await.ok();
    let member = member_opt.as_ref();

    /* ====== Profil ====== */
    let created_unix = to_unix(user.id.created_at());

    let mut e_profile = CreateEmbed::new()
        .title("👤 User")
        .colour(Colour::new(0x95A5A6))
        .field("ID", format!("`{}`", uid.get()), true)
        .field("Mention", format!("<@{}>", uid.get()), true)
        .field("Account created", format!("<t:{0}:F> • <t:{0}:R>", created_unix), true)
        .field("Bot?", if user.bot { "✅ yes" } else { "❌ no" }, true)
        .footer(CreateEmbedFooter::new(SYSTEM_NAME));

    if let Some(global) = &user.global_name {
        e_profile = e_profile.field("Global name", format!("`{}`", truncate(global, 100)), true);
    }
    e_profile = e_profile.field("Username", format!("`{}`", truncate(&user.name, 100)), true);

    if let Some(ava) = user.avatar_url() {
        e_profile = e_profile.thumbnail(ava);
    }

    /* ====== Serwer ====== */
    let mut e_guild = CreateEmbed::new()
        .title("🏠 Server membership")
        .colour(Colour::new(0x3498DB))
        .footer(CreateEmbedFooter::new(SYSTEM_NAME));

    if let Some(m) = member {
        if let Some(joined) = m.joined_at {
            let ts = to_unix(joined);
            e_guild = e_guild.field("Joined", format!("<t:{0}:F> • <t:{0}:R>", ts), true);
        }
        if let Some(nick) = &m.nick {
            e_guild = e_guild.field("Nickname", format!("`{}`", truncate(nick, 100)), true);
        }

        // Role
        let roles = &m.roles;
        let roles_txt = if roles.is_empty() {
            "_none_".to_string()
        } else {
            // Do ~900 znaków, mentions: <@&ID>
            let mentions: Vec<String> = roles.iter().map(|r| format!("<@&{}>", r.get())).collect();
            let mut acc = String::new();
            for (i, part) in mentions.iter().enumerate() {
                if acc.len() + part.len() + 1 > 900 { acc.push_str(" …"); break; }
                if i > 0 { acc.push(' '); }
                acc.push_str(part);
            }
            acc
        };
        e_guild = e_guild.field(format!("Roles ({})", roles.len()), roles_txt, false);

        // Uprawnienia (poziom gildii)
        if let Ok(p) = m.permissions(&ctx.cache) {
            let mut flags = Vec::new();
            if p.administrator()      { flags.push("administrator"); }
            if p.manage_guild()       { flags.push("manage_guild"); }
            if p.manage_channels()    { flags.push("manage_channels"); }
            if p.manage_roles()       { flags.push("manage_roles"); }
            if p.manage_messages()    { flags.push("manage_messages"); }
            if p.kick_members()       { flags.push("kick_members"); }
            if p.ban_members()        { flags.push("ban_members"); }
            if p.moderate_members()   { flags.push("moderate_members"); }
            let perms_txt = if flags.is_empty() { "_no notable flags_".into() } else { flags.join(", ") };
            e_guild = e_guild.field("Permissions (guild)", perms_txt, false);
        }

        // Timeout?
        if let Some(until) = m.communication_disabled_until {
            let ts = to_unix(until);
            if ts > now_unix() {
                e_guild = e_guild.field("Timed out until", format!("<t:{0}:F> • <t:{0}:R>", ts), true);
            }
        }
        // Boost?
        if let Some(ps) = m.premium_since {
            let ts = to_unix(ps);
            e_guild = e_guild.field("Boosting since", format!("<t:{0}:F> • <t:{0}:R>", ts), true);
        }
    } else {
        e_guild = e_guild.description("_This user is not a member of this guild._");
    }

    // Odpowiedź
    let embeds = vec![e_profile, e_guild];
    cmd.edit_response(&ctx.http, EditInteractionResponse::new().embeds(embeds)).await?;
    Ok(())
}

/* ========================= Helpers ========================= */

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max { s.to_string() } else {
        let mut t = s[..max.saturating_sub(1)].to_string();
        t.push('…');
        t
    }
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn to_unix(ts: Timestamp) -> i64 {
    ts.unix_timestamp()
}
