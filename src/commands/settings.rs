use crate::commands::send_error;
use crate::discord_text::discord_time;
use crate::error::BotError;
use crate::llm::ProviderSettings;
use crate::quota::QuotaStatus;
use crate::usage::Category;
use crate::{Context, Error};
use poise::serenity_prelude as serenity;
use poise::CreateReply;
use tracing::info;

/// Configure the OpenAI API for this server
#[poise::command(
    slash_command,
    rename = "config",
    default_member_permissions = "MANAGE_GUILD",
    required_permissions = "MANAGE_GUILD",
    ephemeral
)]
pub async fn configure(
    ctx: Context<'_>,
    #[description = "The OpenAI API key"] apikey: String,
    #[description = "An OpenAI-compatible base URL"] proxy: Option<String>,
    #[description = "The OpenAI organization ID"] organization: Option<String>,
) -> Result<(), Error> {
    let Some(guild_id) = ctx.guild_id() else {
        return send_error(ctx, &BotError::GuildOnly).await;
    };
    ctx.defer_ephemeral().await?;

    let settings = ProviderSettings {
        api_key: apikey,
        api_base: proxy.filter(|p| !p.trim().is_empty()),
        organization: organization.filter(|o| !o.trim().is_empty()),
    };
    ctx.data()
        .providers
        .configure_guild(guild_id.get(), &settings);

    let embed = serenity::CreateEmbed::new()
        .title("Updated OpenAI API config.")
        .field(
            "Base URL",
            settings.api_base.as_deref().unwrap_or("default"),
            true,
        )
        .field(
            "Organization",
            settings.organization.as_deref().unwrap_or("none"),
            true,
        )
        .color(serenity::Colour::DARK_GREEN);
    ctx.send(CreateReply::default().embed(embed).ephemeral(true))
        .await?;
    Ok(())
}

fn usage_line(status: &QuotaStatus) -> String {
    let mut line = format!("`{}/{}` remaining", status.remaining(), status.limit);
    if let Some(retry_at) = status.retry_at {
        line.push_str(&format!(", resets at {}", discord_time(retry_at.timestamp())));
    }
    line
}

/// Show how many requests you have left
#[poise::command(slash_command, ephemeral)]
pub async fn usage(ctx: Context<'_>) -> Result<(), Error> {
    let quota = ctx.data().chat.quota();
    let user_id = ctx.author().id.get();

    let embed = serenity::CreateEmbed::new()
        .title("Your usage")
        .field("Text", usage_line(&quota.status(user_id, Category::Text)), false)
        .field("Image", usage_line(&quota.status(user_id, Category::Image)), false)
        .color(serenity::Colour::BLURPLE);
    ctx.send(CreateReply::default().embed(embed).ephemeral(true))
        .await?;
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, poise::ChoiceParameter)]
pub enum UsageKind {
    #[name = "text"]
    Text,
    #[name = "image"]
    Image,
}

impl From<UsageKind> for Category {
    fn from(kind: UsageKind) -> Self {
        match kind {
            UsageKind::Text => Category::Text,
            UsageKind::Image => Category::Image,
        }
    }
}

/// Reset a user's request count
#[poise::command(slash_command, owners_only, ephemeral, rename = "resetusage")]
pub async fn reset_usage(
    ctx: Context<'_>,
    #[description = "The user to reset"] user: serenity::User,
    #[description = "Which count to reset"] kind: UsageKind,
) -> Result<(), Error> {
    let category = Category::from(kind);
    ctx.data().chat.quota().reset(user.id.get(), category);
    info!(user_id = user.id.get(), %category, "usage reset by {}", ctx.author().name);

    ctx.send(
        CreateReply::default()
            .content(format!("Reset {} usage for {}.", category, user.name))
            .ephemeral(true),
    )
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn usage_line_mentions_reset_only_when_exhausted() {
        let open = QuotaStatus {
            used: 3,
            limit: 20,
            retry_at: None,
        };
        assert_eq!(usage_line(&open), "`17/20` remaining");

        let exhausted = QuotaStatus {
            used: 1,
            limit: 1,
            retry_at: Some(chrono::Utc.timestamp_opt(1_700_000_000, 0).unwrap()),
        };
        assert_eq!(
            usage_line(&exhausted),
            "`0/1` remaining, resets at <t:1700000000:t>"
        );
    }
}
