use crate::commands::{
    backend_for, precheck_quota, response_embed, response_row, send_error, send_limit_notice,
};
use crate::discord_text::model_footer;
use crate::llm::{ChatMessage, CompletionOptions, Role};
use crate::services::chat::validate_prompt;
use crate::usage::Category;
use crate::{Context, Error};
use poise::serenity_prelude as serenity;
use poise::CreateReply;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, poise::ChoiceParameter)]
pub enum ChatModel {
    #[name = "gpt-4o-mini"]
    Gpt4oMini,
    #[name = "gpt-4o"]
    Gpt4o,
}

impl ChatModel {
    pub fn id(self) -> &'static str {
        match self {
            ChatModel::Gpt4oMini => "gpt-4o-mini",
            ChatModel::Gpt4o => "gpt-4o",
        }
    }

    /// Longest prompt or system message accepted, in characters. Also caps
    /// the reply length in tokens.
    pub fn char_limit(self) -> usize {
        match self {
            ChatModel::Gpt4oMini => 1024,
            ChatModel::Gpt4o => 256,
        }
    }
}

/// Chat with an OpenAI model
#[poise::command(slash_command)]
pub async fn chat(
    ctx: Context<'_>,
    #[description = "The model to use for the response"] model: ChatModel,
    #[description = "The prompt to communicate with the AI"] prompt: String,
    #[description = "The system message to alter the behaviour of the AI"] system: Option<String>,
) -> Result<(), Error> {
    let mut inputs = vec![prompt.as_str()];
    if let Some(system) = &system {
        inputs.push(system);
    }
    let checked = validate_prompt(&inputs, model.char_limit())
        .and_then(|()| precheck_quota(ctx, Category::Text))
        .and_then(|()| backend_for(ctx));
    let backend = match checked {
        Ok(backend) => backend,
        Err(e) => return send_error(ctx, &e).await,
    };

    ctx.defer().await?;

    let data = ctx.data();
    let user_id = ctx.author().id.get();
    let guild_id = ctx.guild_id().map(|id| id.get());

    let mut messages = Vec::with_capacity(2);
    if let Some(system) = system {
        messages.push(ChatMessage::text(Role::System, system));
    }
    messages.push(ChatMessage::text(Role::User, prompt.as_str()));

    let options = CompletionOptions {
        max_tokens: Some(model.char_limit() as u32),
        temperature: None,
    };
    let done = match data
        .chat
        .complete_text(backend.as_ref(), user_id, model.id(), messages, options)
        .await
    {
        Ok(done) => done,
        Err(e) => return send_error(ctx, &e).await,
    };

    let embed = response_embed(
        &prompt,
        &data.config.output_filter.clean(&done.reply),
        serenity::Colour::BLURPLE,
        &model_footer(model.id()),
    );
    let handle = ctx
        .send(
            CreateReply::default()
                .embed(embed)
                .components(vec![response_row(&done.quota, true)]),
        )
        .await?;
    let message = handle.message().await?;

    data.chat
        .open_thread(message.id.get(), user_id, guild_id, model.id(), done.transcript);
    info!(
        "Chat reply sent to {} with {} ({} requests left)",
        ctx.author().name,
        model.id(),
        done.quota.remaining()
    );

    send_limit_notice(ctx, Category::Text, &done.quota).await
}
