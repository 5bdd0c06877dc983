use std::io::Cursor;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use rand::Rng;
use subtle::ConstantTimeEq;
use tokio::task;
use tracing::{info, warn};

use serenity::all::{
    ActionRowComponent, ButtonStyle, ChannelId, Colour, CommandDataOptionValue,
    CommandInteraction, CommandOptionType, ComponentInteraction, Context, CreateActionRow,
    CreateAttachment, CreateButton, CreateCommand, CreateCommandOption, CreateEmbed,
    CreateEmbedFooter, CreateInputText, CreateInteractionResponse,
    CreateInteractionResponseMessage, CreateMessage, CreateModal, EditInteractionResponse,
    GuildId, InputTextStyle, Interaction, Member, ModalInteraction, Permissions, RoleId,
};

use crate::AppContext;

/* =========================================
   Stałe
   ========================================= */

const BRAND_FOOTER: &str = "Caracal Security System™ • Captcha";

pub const CODE_LEN: usize = 5;
const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

pub const CANVAS_W: u32 = 180;
pub const CANVAS_H: u32 = 60;
const TILE_W: u32 = 40;
const TILE_H: u32 = 50;
const GLYPH_SCALE: u32 = 6; // 5×7 -> 30×42 px
const X_START: i64 = 5;
const X_STEP: i64 = 32;
const MAX_ROTATION_DEG: i32 = 20;

/* =========================================
   Stan: wyzwania per użytkownik
   ========================================= */

/// Jedno aktywne wyzwanie na użytkownika; nowe `issue` nadpisuje stare.
#[derive(Debug, Clone)]
pub struct PendingChallenge {
    pub user_id: u64,
    pub expected_text: String,
    pub reward_role_id: u64,
    pub created_at: Instant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    Verified { reward_role_id: u64 },
    WrongAnswer,
    NoPendingChallenge,
}

/// Silnik CAPTCHA: generacja kodu, rendering, tabela pending, weryfikacja.
/// Żadnych typów SDK — glue niżej w tym module tłumaczy wyniki na akcje Discorda.
pub struct CaptchaGate {
    pending: DashMap<u64, PendingChallenge>,
}

impl CaptchaGate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            pending: DashMap::new(),
        })
    }

    fn generate_code() -> String {
        let mut rng = rand::rng();
        (0..CODE_LEN)
            .map(|_| CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())] as char)
            .collect()
    }

    /// Wydaje wyzwanie: wpis pending jest zapisany ZANIM funkcja odda obrazek.
    /// Ponowne `issue` dla tego samego user_id nadpisuje poprzedni wpis.
    pub fn issue(&self, user_id: u64, reward_role_id: u64) -> Result<(String, Vec<u8>)> {
        let code = Self::generate_code();
        self.pending.insert(
            user_id,
            PendingChallenge {
                user_id,
                expected_text: code.clone(),
                reward_role_id,
                created_at: Instant::now(),
            },
        );
        let png = render_code(&code)?;
        Ok((code, png))
    }

    pub fn has_pending(&self, user_id: u64) -> bool {
        self.pending.contains_key(&user_id)
    }

    /// Porównanie: trim + bez rozróżniania wielkości liter.
    /// Zła odpowiedź zostawia wpis bez zmian (nielimitowane próby, świadomie).
    /// Entry API DashMapy daje atomowość per klucz.
    pub fn verify(&self, user_id: u64, submitted: &str) -> VerifyOutcome {
        match self.pending.entry(user_id) {
            Entry::Occupied(occ) => {
                if answers_match(&occ.get().expected_text, submitted) {
                    let pending = occ.remove();
                    info!(
                        user_id,
                        age_secs = pending.created_at.elapsed().as_secs(),
                        "captcha verified"
                    );
                    VerifyOutcome::Verified {
                        reward_role_id: pending.reward_role_id,
                    }
                } else {
                    VerifyOutcome::WrongAnswer
                }
            }
            Entry::Vacant(_) => VerifyOutcome::NoPendingChallenge,
        }
    }
}

fn answers_match(expected: &str, submitted: &str) -> bool {
    let a = expected.trim().to_ascii_uppercase();
    let b = submitted.trim().to_ascii_uppercase();
    a.len() == b.len() && bool::from(a.as_bytes().ct_eq(b.as_bytes()))
}

/* =========================================
   Rendering obrazka
   ========================================= */

/// Renderuje kod jako PNG 180×60: każdy znak na osobnym kafelku,
/// obrócony o losowy kąt z [-20°, 20°] i wklejony z pionowym jitterem,
/// żeby proste OCR-y się wykładały.
pub fn render_code(code: &str) -> Result<Vec<u8>> {
    let mut rng = rand::rng();
    let mut canvas = RgbaImage::from_pixel(CANVAS_W, CANVAS_H, Rgba([255, 255, 255, 255]));

    let mut x = X_START;
    for ch in code.chars() {
        let tile = glyph_tile(ch);
        let angle = rng.random_range(-MAX_ROTATION_DEG..=MAX_ROTATION_DEG) as f32;
        let rotated = rotate_expand(&tile, angle);
        let y = rng.random_range(5..=15) as i64;
        paste_alpha(&mut canvas, &rotated, x, y);
        x += X_STEP;
    }

    let mut buf = Vec::new();
    DynamicImage::ImageRgba8(canvas).write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
    Ok(buf)
}

/// Kafelek 40×50 z czarnym glifem 30×42 na przezroczystym tle.
fn glyph_tile(ch: char) -> RgbaImage {
    let mut tile = RgbaImage::from_pixel(TILE_W, TILE_H, Rgba([0, 0, 0, 0]));
    let rows = glyph_rows(ch);
    let ox = (TILE_W - 5 * GLYPH_SCALE) / 2;
    let oy = (TILE_H - 7 * GLYPH_SCALE) / 2;
    for (ry, bits) in rows.iter().enumerate() {
        let bits = u32::from(*bits);
        for cx in 0..5u32 {
            if bits & (1 << (4 - cx)) != 0 {
                for dy in 0..GLYPH_SCALE {
                    for dx in 0..GLYPH_SCALE {
                        tile.put_pixel(
                            ox + cx * GLYPH_SCALE + dx,
                            oy + ry as u32 * GLYPH_SCALE + dy,
                            Rgba([0, 0, 0, 255]),
                        );
                    }
                }
            }
        }
    }
    tile
}

/// Obrót z powiększeniem płótna (odpowiednik rotate(expand=1)):
/// mapowanie odwrotne wokół środka, najbliższy sąsiad.
fn rotate_expand(src: &RgbaImage, angle_deg: f32) -> RgbaImage {
    let rad = angle_deg.to_radians();
    let (sin, cos) = rad.sin_cos();
    let (w, h) = (src.width() as f32, src.height() as f32);

    let new_w = (w * cos.abs() + h * sin.abs()).ceil() as u32;
    let new_h = (w * sin.abs() + h * cos.abs()).ceil() as u32;
    let mut out = RgbaImage::from_pixel(new_w, new_h, Rgba([0, 0, 0, 0]));

    let (cx, cy) = (w / 2.0, h / 2.0);
    let (ncx, ncy) = (new_w as f32 / 2.0, new_h as f32 / 2.0);

    for y in 0..new_h {
        for x in 0..new_w {
            let dx = x as f32 + 0.5 - ncx;
            let dy = y as f32 + 0.5 - ncy;
            let sx = (cos * dx + sin * dy + cx).floor();
            let sy = (-sin * dx + cos * dy + cy).floor();
            if sx >= 0.0 && sy >= 0.0 && (sx as u32) < src.width() && (sy as u32) < src.height() {
                out.put_pixel(x, y, *src.get_pixel(sx as u32, sy as u32));
            }
        }
    }
    out
}

fn paste_alpha(canvas: &mut RgbaImage, tile: &RgbaImage, at_x: i64, at_y: i64) {
    for (tx, ty, px) in tile.enumerate_pixels() {
        if px.0[3] == 0 {
            continue;
        }
        let x = at_x + tx as i64;
        let y = at_y + ty as i64;
        if x >= 0 && y >= 0 && (x as u32) < canvas.width() && (y as u32) < canvas.height() {
            canvas.put_pixel(x as u32, y as u32, *px);
        }
    }
}

/// Font bitmapowy 5×7 (bit 4 = lewa kolumna), tylko A–Z i 0–9.
fn glyph_rows(ch: char) -> [u8; 7] {
    match ch {
        'A' => [0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'B' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10001, 0b10001, 0b11110],
        'C' => [0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110],
        'D' => [0b11110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b11110],
        'E' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b11111],
        'F' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000],
        'G' => [0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01111],
        'H' => [0b10001, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'I' => [0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        'J' => [0b00111, 0b00010, 0b00010, 0b00010, 0b00010, 0b10010, 0b01100],
        'K' => [0b10001, 0b10010, 0b10100, 0b11000, 0b10100, 0b10010, 0b10001],
        'L' => [0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111],
        'M' => [0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001],
        'N' => [0b10001, 0b11001, 0b10101, 0b10011, 0b10001, 0b10001, 0b10001],
        'O' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'P' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000],
        'Q' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10101, 0b10010, 0b01101],
        'R' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001],
        'S' => [0b01111, 0b10000, 0b10000, 0b01110, 0b00001, 0b00001, 0b11110],
        'T' => [0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100],
        'U' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'V' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01010, 0b00100],
        'W' => [0b10001, 0b10001, 0b10001, 0b10101, 0b10101, 0b10101, 0b01010],
        'X' => [0b10001, 0b10001, 0b01010, 0b00100, 0b01010, 0b10001, 0b10001],
        'Y' => [0b10001, 0b10001, 0b01010, 0b00100, 0b00100, 0b00100, 0b00100],
        'Z' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b11111],
        '0' => [0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110],
        '1' => [0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        '2' => [0b01110, 0b10001, 0b00001, 0b00110, 0b01000, 0b10000, 0b11111],
        '3' => [0b01110, 0b10001, 0b00001, 0b00110, 0b00001, 0b10001, 0b01110],
        '4' => [0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010],
        '5' => [0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110],
        '6' => [0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110],
        '7' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000],
        '8' => [0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110],
        '9' => [0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100],
        // spoza alfabetu kodów — pełny blok
        _ => [0b11111; 7],
    }
}

/* =========================================
   Glue: join -> wyzwanie, przycisk -> modal, modal -> verify
   ========================================= */

pub struct Captcha;

impl Captcha {
    pub async fn register_commands(ctx: &Context, guild_id: GuildId) -> Result<()> {
        guild_id
            .create_command(
                &ctx.http,
                CreateCommand::new("captcha-test")
                    .description("Send a test CAPTCHA challenge to a user")
                    .add_option(
                        CreateCommandOption::new(
                            CommandOptionType::User,
                            "user",
                            "Who should receive the challenge",
                        )
                        .required(true),
                    )
                    .default_member_permissions(Permissions::MODERATE_MEMBERS),
            )
            .await?;
        Ok(())
    }

    /// Wywoływane z EventHandler::guild_member_addition.
    pub async fn on_member_join(ctx: &Context, app: &AppContext, member: &Member) {
        let gid = member.guild_id.get();
        let cfg = app.guilds.get(gid).await;

        let (Some(channel_id), Some(role_id)) =
            (cfg.captcha_channel_id, cfg.captcha_verified_role_id)
        else {
            info!(gid, "captcha not configured for guild; skipping");
            return;
        };

        Self::send_challenge(ctx, app, gid, member.user.id.get(), channel_id, role_id).await;
    }

    /// Brama interakcji: /captcha-test, przycisk Verify, modal z odpowiedzią.
    pub async fn on_interaction(ctx: &Context, app: &AppContext, interaction: Interaction) {
        if let Some(cmd) = interaction.clone().command() {
            if cmd.data.name == "captcha-test" {
                if let Err(e) = handle_captcha_test(ctx, app, &cmd).await {
                    warn!(error=?e, "captcha-test failed");
                }
            }
            return;
        }

        if let Some(comp) = interaction.clone().message_component() {
            if comp.data.custom_id.starts_with("captcha:") {
                if let Err(e) = on_component(ctx, app, &comp).await {
                    warn!(error=?e, "captcha component failed");
                }
            }
            return;
        }

        if let Some(modal) = interaction.modal_submit() {
            if modal.data.custom_id.starts_with("captcha:") {
                if let Err(e) = on_modal_submit(ctx, app, &modal).await {
                    warn!(error=?e, "captcha modal failed");
                }
            }
        }
    }

    /// Rendering to czysty CPU — schodzi na pulę blocking, żeby nie
    /// blokować pętli eventów. Wpis pending powstaje wewnątrz `issue`.
    async fn send_challenge(
        ctx: &Context,
        app: &AppContext,
        gid: u64,
        uid: u64,
        channel_id: u64,
        role_id: u64,
    ) {
        let gate = app.captcha();
        let issued = task::spawn_blocking(move || gate.issue(uid, role_id)).await;
        let png = match issued {
            Ok(Ok((_code, png))) => png,
            Ok(Err(e)) => {
                warn!(error=?e, uid, "captcha render failed");
                return;
            }
            Err(e) => {
                warn!(error=?e, uid, "captcha render task failed");
                return;
            }
        };

        let embed = CreateEmbed::new()
            .title("🔒 CAPTCHA Verification")
            .description("Click **Verify** and type the text from the image.")
            .attachment("captcha.png")
            .colour(Colour::ORANGE)
            .footer(CreateEmbedFooter::new(BRAND_FOOTER));

        let row = CreateActionRow::Buttons(vec![
            CreateButton::new(format!("captcha:{uid}:open"))
                .label("✅ Verify")
                .style(ButtonStyle::Success),
        ]);

        let msg = CreateMessage::new()
            .content(format!("<@{uid}>"))
            .embed(embed)
            .components(vec![row])
            .add_file(CreateAttachment::bytes(png, "captcha.png"));

        if let Err(e) = ChannelId::new(channel_id).send_message(&ctx.http, msg).await {
            warn!(error=?e, gid, channel_id, "captcha challenge send failed");
        }
    }
}

/* =========================================
   /captcha-test (slash)
   ========================================= */

async fn handle_captcha_test(ctx: &Context, app: &AppContext, cmd: &CommandInteraction) -> Result<()> {
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

    let mut target = None;
    for o in &cmd.data.options {
        if let ("user", CommandDataOptionValue::User(u)) = (&o.name[..], &o.value) {
            target = Some(*u);
        }
    }
    let Some(uid) = target else {
        let _ = cmd
            .create_response(
                &ctx.http,
                CreateInteractionResponse::Message(
                    CreateInteractionResponseMessage::new()
                        .content("Pick a user.")
                        .ephemeral(true),
                ),
            )
            .await;
        return Ok(());
    };

    // Szybki ACK, potem edit
    let _ = cmd
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new()
                    .content("Sending CAPTCHA…")
                    .ephemeral(true),
            ),
        )
        .await;

    let cfg = app.guilds.get(gid.get()).await;
    let (Some(channel_id), Some(role_id)) = (cfg.captcha_channel_id, cfg.captcha_verified_role_id)
    else {
        let _ = cmd
            .edit_response(
                &ctx.http,
                EditInteractionResponse::new()
                    .content("❌ CAPTCHA is not configured for this server (channel + verified role required)."),
            )
            .await;
        return Ok(());
    };

    Captcha::send_challenge(ctx, app, gid.get(), uid.get(), channel_id, role_id).await;

    let _ = cmd
        .edit_response(
            &ctx.http,
            EditInteractionResponse::new().content(format!("✅ CAPTCHA sent to <@{}>.", uid.get())),
        )
        .await;
    Ok(())
}

/* =========================================
   Przycisk Verify -> modal
   ========================================= */

async fn on_component(ctx: &Context, app: &AppContext, comp: &ComponentInteraction) -> Result<()> {
    // format: captcha:{uid}:open
    let parts: Vec<&str> = comp.data.custom_id.split(':').collect();
    if parts.len() != 3 || parts[2] != "open" {
        return Ok(());
    }
    let challenged: u64 = parts[1].parse().unwrap_or(0);

    // Tożsamość sprawdzamy PRZED pokazaniem modala; cudze kliknięcie nie rusza wpisu.
    if comp.user.id.get() != challenged {
        let _ = comp
            .create_response(
                &ctx.http,
                CreateInteractionResponse::Message(
                    CreateInteractionResponseMessage::new()
                        .content("❌ This CAPTCHA isn't for you!")
                        .ephemeral(true),
                ),
            )
            .await;
        return Ok(());
    }

    if !app.captcha().has_pending(challenged) {
        let _ = comp
            .create_response(
                &ctx.http,
                CreateInteractionResponse::Message(
                    CreateInteractionResponseMessage::new()
                        .content("⚠️ No pending CAPTCHA — ask a moderator to send a new one.")
                        .ephemeral(true),
                ),
            )
            .await;
        return Ok(());
    }

    let modal = CreateModal::new(format!("captcha:{challenged}:answer"), "CAPTCHA Verification")
        .components(vec![CreateActionRow::InputText(
            CreateInputText::new(InputTextStyle::Short, "answer", "Enter the text from the image")
                .required(true),
        )]);
    let _ = comp
        .create_response(&ctx.http, CreateInteractionResponse::Modal(modal))
        .await;
    Ok(())
}

/* =========================================
   Modal -> verify -> rola
   ========================================= */

async fn on_modal_submit(ctx: &Context, app: &AppContext, modal: &ModalInteraction) -> Result<()> {
    // format: captcha:{uid}:answer
    let parts: Vec<&str> = modal.data.custom_id.split(':').collect();
    if parts.len() != 3 || parts[2] != "answer" {
        return Ok(());
    }
    let challenged: u64 = parts[1].parse().unwrap_or(0);

    if modal.user.id.get() != challenged {
        let _ = modal
            .create_response(
                &ctx.http,
                CreateInteractionResponse::Message(
                    CreateInteractionResponseMessage::new()
                        .content("❌ This CAPTCHA isn't for you!")
                        .ephemeral(true),
                ),
            )
            .await;
        return Ok(());
    }

    let mut answer = String::new();
    for row in &modal.data.components {
        for comp in &row.components {
            if let ActionRowComponent::InputText(it) = comp {
                if let Some(v) = it.value.as_deref() {
                    answer = v.to_string();
                }
            }
        }
    }

    let reply = match app.captcha().verify(challenged, &answer) {
        VerifyOutcome::Verified { reward_role_id } => {
            let granted = match modal.guild_id {
                Some(gid) => grant_role(ctx, gid, challenged, reward_role_id).await,
                None => false,
            };
            if granted {
                "✅ Verified! Role added — welcome aboard.".to_string()
            } else {
                warn!(user_id = challenged, role_id = reward_role_id, "verified but role grant failed");
                "✅ Verified! (role could not be granted — contact staff)".to_string()
            }
        }
        VerifyOutcome::WrongAnswer => "❌ Wrong CAPTCHA — try again.".to_string(),
        VerifyOutcome::NoPendingChallenge => "⚠️ No pending CAPTCHA for you.".to_string(),
    };

    let _ = modal
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new()
                    .content(reply)
                    .ephemeral(true),
            ),
        )
        .await;
    Ok(())
}

async fn grant_role(ctx: &Context, gid: GuildId, uid: u64, role_id: u64) -> bool {
    match gid.member(&ctx.http, uid).await {
        Ok(member) => match member.add_role(&ctx.http, RoleId::new(role_id)).await {
            Ok(_) => true,
            Err(e) => {
                warn!(error=?e, uid, role_id, "add_role failed");
                false
            }
        },
        Err(e) => {
            warn!(error=?e, uid, "member fetch failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_codes_stick_to_alphabet() {
        for _ in 0..50 {
            let code = CaptchaGate::generate_code();
            assert_eq!(code.len(), CODE_LEN);
            assert!(code.bytes().all(|b| CODE_ALPHABET.contains(&b)));
        }
    }

    #[test]
    fn answers_match_is_case_and_whitespace_insensitive() {
        assert!(answers_match("A3K9Z", "  a3k9z \n"));
        assert!(!answers_match("A3K9Z", "A3K9"));
        assert!(!answers_match("A3K9Z", "A3K9X"));
    }

    #[test]
    fn rotate_expand_keeps_ink() {
        let tile = glyph_tile('H');
        let before = tile.pixels().filter(|p| p.0[3] != 0).count();
        let rotated = rotate_expand(&tile, 20.0);
        let after = rotated.pixels().filter(|p| p.0[3] != 0).count();
        // obrót nearest-neighbour nie zjada więcej niż pojedynczych pikseli na krawędzi
        assert!(after > before / 2);
        assert!(rotated.width() >= tile.width());
    }

    #[test]
    fn rendered_code_is_a_png_with_expected_dimensions() {
        let png = render_code("AB12Z").unwrap();
        let img = image::load_from_memory(&png).unwrap();
        assert_eq!(img.width(), CANVAS_W);
        assert_eq!(img.height(), CANVAS_H);
    }
}
