//! Continuing a conversation through its Reply button
//!
//! Clicking Reply checks ownership and staleness and opens a modal; submitting
//! the modal runs the next turn and moves the thread to the new reply.

use crate::commands::{
    error_embed, replied_button, reply_button, response_embed, response_row, stale_button,
    swap_action, REPLY_BUTTON_ID,
};
use crate::discord_text::model_footer;
use crate::error::BotError;
use crate::llm::message::parse_image_urls;
use crate::usage::Category;
use crate::{Data, Error};
use poise::serenity_prelude as serenity;
use tracing::{debug, info, warn};

pub const REPLY_MODAL_ID: &str = "m_use_this_context";
const USER_INPUT_ID: &str = "use_this_context_user_input";
const IMAGE_INPUT_ID: &str = "use_this_context_image_input";

/// Interactions this module answers, keyed by custom id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentAction {
    OpenReplyModal,
    SubmitReply,
}

impl ComponentAction {
    pub fn parse(custom_id: &str) -> Option<Self> {
        match custom_id {
            REPLY_BUTTON_ID => Some(ComponentAction::OpenReplyModal),
            REPLY_MODAL_ID => Some(ComponentAction::SubmitReply),
            _ => None,
        }
    }
}

pub async fn handle_interaction(
    ctx: &serenity::Context,
    interaction: &serenity::Interaction,
    data: &Data,
) -> Result<(), Error> {
    match interaction {
        serenity::Interaction::Component(component) => {
            match ComponentAction::parse(&component.data.custom_id) {
                Some(ComponentAction::OpenReplyModal) => open_reply_modal(ctx, component, data).await,
                _ => Ok(()),
            }
        }
        serenity::Interaction::Modal(modal) => match ComponentAction::parse(&modal.data.custom_id) {
            Some(ComponentAction::SubmitReply) => submit_reply(ctx, modal, data).await,
            _ => Ok(()),
        },
        _ => Ok(()),
    }
}

fn private_notice(err: &BotError) -> serenity::CreateInteractionResponse {
    serenity::CreateInteractionResponse::Message(
        serenity::CreateInteractionResponseMessage::new()
            .embed(error_embed(err))
            .ephemeral(true),
    )
}

fn reply_modal() -> serenity::CreateModal {
    serenity::CreateModal::new(REPLY_MODAL_ID, "Use previous context").components(vec![
        serenity::CreateActionRow::InputText(
            serenity::CreateInputText::new(
                serenity::InputTextStyle::Paragraph,
                "User message",
                USER_INPUT_ID,
            )
            .placeholder("User message...")
            .required(true),
        ),
        serenity::CreateActionRow::InputText(
            serenity::CreateInputText::new(
                serenity::InputTextStyle::Paragraph,
                "Image URL",
                IMAGE_INPUT_ID,
            )
            .placeholder("Image URL, one for each line...")
            .required(false),
        ),
    ])
}

/// Swaps the action button under one of the bot's messages, keeping its counter.
async fn set_buttons(
    ctx: &serenity::Context,
    message: &serenity::Message,
    action: serenity::CreateButton,
) {
    let edit = serenity::EditMessage::new().components(vec![swap_action(message, action)]);
    if let Err(e) = message
        .channel_id
        .edit_message(&ctx.http, message.id, edit)
        .await
    {
        warn!("Failed to update buttons on message {}: {}", message.id, e);
    }
}

async fn open_reply_modal(
    ctx: &serenity::Context,
    component: &serenity::ComponentInteraction,
    data: &Data,
) -> Result<(), Error> {
    let user_id = component.user.id.get();
    match data.chat.check_reply(user_id, component.message.id.get()) {
        Ok(_) => {
            component
                .create_response(&ctx.http, serenity::CreateInteractionResponse::Modal(reply_modal()))
                .await?;
        }
        Err(e) => {
            debug!(user_id, message_id = component.message.id.get(), "Reply refused: {}", e);
            if matches!(e, BotError::StaleConversation) {
                set_buttons(ctx, &component.message, stale_button()).await;
            }
            component
                .create_response(&ctx.http, private_notice(&e))
                .await?;
        }
    }
    Ok(())
}

fn input_value(rows: &[serenity::ActionRow], custom_id: &str) -> Option<String> {
    rows.iter()
        .flat_map(|row| row.components.iter())
        .find_map(|component| match component {
            serenity::ActionRowComponent::InputText(input) if input.custom_id == custom_id => {
                input.value.clone()
            }
            _ => None,
        })
}

async fn submit_reply(
    ctx: &serenity::Context,
    modal: &serenity::ModalInteraction,
    data: &Data,
) -> Result<(), Error> {
    let Some(message) = modal.message.as_deref() else {
        return Ok(());
    };
    let user_id = modal.user.id.get();
    let text = input_value(&modal.data.components, USER_INPUT_ID).unwrap_or_default();
    let image_urls = input_value(&modal.data.components, IMAGE_INPUT_ID)
        .map(|raw| parse_image_urls(&raw))
        .unwrap_or_default();

    let checked = data
        .chat
        .claim_reply(user_id, message.id.get())
        .and_then(|claim| {
            data.chat
                .quota()
                .acquire(user_id, Category::Text)
                .map(|_| claim)
        })
        .and_then(|claim| {
            data.providers
                .client_for(modal.guild_id.map(|id| id.get()))
                .map(|backend| (claim, backend))
                .ok_or(BotError::NotConfigured)
        });
    let (claim, backend) = match checked {
        Ok(ready) => ready,
        Err(e) => {
            if matches!(e, BotError::StaleConversation) {
                set_buttons(ctx, message, stale_button()).await;
            }
            modal.create_response(&ctx.http, private_notice(&e)).await?;
            return Ok(());
        }
    };

    modal.defer(&ctx.http).await?;
    set_buttons(ctx, message, replied_button()).await;

    let done = match data
        .chat
        .continue_text(backend.as_ref(), &claim, &text, image_urls)
        .await
    {
        Ok(done) => done,
        Err(e) => {
            // The thread is unchanged, so the old message can still be replied to
            set_buttons(ctx, message, reply_button()).await;
            modal
                .edit_response(
                    &ctx.http,
                    serenity::EditInteractionResponse::new().embed(error_embed(&e)),
                )
                .await?;
            return Ok(());
        }
    };

    let model = claim.entry().model.clone();
    let embed = response_embed(
        &text,
        &data.config.output_filter.clean(&done.reply),
        serenity::Colour::BLURPLE,
        &model_footer(&model),
    );
    let sent = modal
        .edit_response(
            &ctx.http,
            serenity::EditInteractionResponse::new()
                .embed(embed)
                .components(vec![response_row(&done.quota, true)]),
        )
        .await?;

    match data.chat.record_turn(&claim, sent.id.get(), done.transcript) {
        Ok(()) => info!("Conversation reply sent to {} with {}", modal.user.name, model),
        Err(e) => {
            warn!(user_id, "Thread moved on while replying: {}", e);
            set_buttons(ctx, &sent, stale_button()).await;
        }
    }
    drop(claim);

    if let Some(notice) = data.chat.quota().limit_notice(Category::Text, &done.quota) {
        modal
            .create_followup(
                &ctx.http,
                serenity::CreateInteractionResponseFollowup::new()
                    .embed(error_embed(&notice))
                    .ephemeral(true),
            )
            .await?;
    }
    Ok(())
}
