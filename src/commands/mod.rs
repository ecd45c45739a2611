pub mod chat;
pub mod image;
pub mod prompts;
pub mod settings;

use crate::discord_text;
use crate::error::BotError;
use crate::llm::LlmClient;
use crate::quota::QuotaStatus;
use crate::usage::Category;
use crate::{Context, Error};
use poise::serenity_prelude as serenity;
use poise::CreateReply;
use std::sync::Arc;

pub const REMAINING_BUTTON_ID: &str = "requests_remaining";
pub const REPLY_BUTTON_ID: &str = "use_this_context";
pub const STALE_BUTTON_ID: &str = "new_conversation";
pub const REPLIED_BUTTON_ID: &str = "already_replied";

pub fn remaining_button(status: &QuotaStatus) -> serenity::CreateButton {
    serenity::CreateButton::new(REMAINING_BUTTON_ID)
        .label(discord_text::remaining_label(status))
        .style(serenity::ButtonStyle::Secondary)
        .disabled(true)
}

pub fn reply_button() -> serenity::CreateButton {
    serenity::CreateButton::new(REPLY_BUTTON_ID)
        .label("Reply")
        .style(serenity::ButtonStyle::Primary)
}

/// Label of the disabled requests-remaining counter under a message, if it has one.
pub fn counter_label(message: &serenity::Message) -> Option<String> {
    message
        .components
        .iter()
        .flat_map(|row| row.components.iter())
        .find_map(|component| match component {
            serenity::ActionRowComponent::Button(button) => match &button.data {
                serenity::ButtonKind::NonLink { custom_id, .. }
                    if custom_id == REMAINING_BUTTON_ID =>
                {
                    button.label.clone()
                }
                _ => None,
            },
            _ => None,
        })
}

/// The existing counter, if any, followed by `action`.
fn row_buttons(
    counter: Option<String>,
    action: serenity::CreateButton,
) -> Vec<serenity::CreateButton> {
    let mut buttons: Vec<_> = counter
        .map(|label| {
            serenity::CreateButton::new(REMAINING_BUTTON_ID)
                .label(label)
                .style(serenity::ButtonStyle::Secondary)
                .disabled(true)
        })
        .into_iter()
        .collect();
    buttons.push(action);
    buttons
}

/// Replaces the action button under `message`, keeping its counter.
pub fn swap_action(
    message: &serenity::Message,
    action: serenity::CreateButton,
) -> serenity::CreateActionRow {
    serenity::CreateActionRow::Buttons(row_buttons(counter_label(message), action))
}

pub fn stale_button() -> serenity::CreateButton {
    serenity::CreateButton::new(STALE_BUTTON_ID)
        .label("Started a new conversation, cannot reply")
        .style(serenity::ButtonStyle::Secondary)
        .disabled(true)
}

pub fn replied_button() -> serenity::CreateButton {
    serenity::CreateButton::new(REPLIED_BUTTON_ID)
        .label("Already replied")
        .style(serenity::ButtonStyle::Secondary)
        .disabled(true)
}

/// Quota counter, plus the Reply button for threads that can be continued.
pub fn response_row(status: &QuotaStatus, can_reply: bool) -> serenity::CreateActionRow {
    let mut buttons = vec![remaining_button(status)];
    if can_reply {
        buttons.push(reply_button());
    }
    serenity::CreateActionRow::Buttons(buttons)
}

pub fn response_embed(
    title: &str,
    description: &str,
    colour: serenity::Colour,
    footer: &str,
) -> serenity::CreateEmbed {
    serenity::CreateEmbed::new()
        .title(discord_text::embed_title(title))
        .description(discord_text::embed_description(description))
        .color(colour)
        .timestamp(serenity::Timestamp::now())
        .footer(serenity::CreateEmbedFooter::new(footer))
}

/// Errors go in the description so timestamp markup renders.
pub fn error_embed(err: &BotError) -> serenity::CreateEmbed {
    serenity::CreateEmbed::new()
        .description(err.to_string())
        .color(serenity::Colour::RED)
}

pub async fn send_error(ctx: Context<'_>, err: &BotError) -> Result<(), Error> {
    ctx.send(
        CreateReply::default()
            .embed(error_embed(err))
            .ephemeral(err.is_private()),
    )
    .await?;
    Ok(())
}

/// Follow-up telling the user they just used their last request.
pub async fn send_limit_notice(
    ctx: Context<'_>,
    category: Category,
    status: &QuotaStatus,
) -> Result<(), Error> {
    if let Some(notice) = ctx.data().chat.quota().limit_notice(category, status) {
        ctx.send(
            CreateReply::default()
                .embed(error_embed(&notice))
                .ephemeral(true),
        )
        .await?;
    }
    Ok(())
}

/// Refuses up front, before deferring, so quota errors stay private.
pub fn precheck_quota(ctx: Context<'_>, category: Category) -> Result<(), BotError> {
    ctx.data()
        .chat
        .quota()
        .acquire(ctx.author().id.get(), category)
        .map(drop)
}

pub fn backend_for(ctx: Context<'_>) -> Result<Arc<LlmClient>, BotError> {
    ctx.data()
        .providers
        .client_for(ctx.guild_id().map(|id| id.get()))
        .ok_or(BotError::NotConfigured)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swapped_row_keeps_the_counter() {
        let with_counter = row_buttons(Some("4/5 requests remaining".into()), replied_button());
        assert_eq!(with_counter.len(), 2);
        assert_eq!(
            with_counter[0],
            serenity::CreateButton::new(REMAINING_BUTTON_ID)
                .label("4/5 requests remaining")
                .style(serenity::ButtonStyle::Secondary)
                .disabled(true)
        );
        assert_eq!(with_counter[1], replied_button());

        let bare = row_buttons(None, stale_button());
        assert_eq!(bare, vec![stale_button()]);
    }
}
