//! Single-shot commands built on a fixed prompt. Their replies cannot be continued.

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

const PROMPT_MODEL: &str = "gpt-4o-mini";
const PROMPT_LIMIT: usize = 256;
const PROMPT_MAX_TOKENS: u32 = 256;

const DAD_JOKE_REQUEST: &str = "Generate a random dad joke";
const SHAKESPEARE_SYSTEM: &str = "You are a bot that translates English to Shakespearean English. \
If the prompt is not in English, interpret it as best you can and then translate it into Shakespearean.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, poise::ChoiceParameter)]
pub enum Mood {
    #[name = "funny"]
    Funny,
    #[name = "flirty"]
    Flirty,
    #[name = "spicy"]
    Spicy,
    #[name = "teasing"]
    Teasing,
}

impl Mood {
    fn word(self) -> &'static str {
        match self {
            Mood::Funny => "funny",
            Mood::Flirty => "flirty",
            Mood::Spicy => "spicy",
            Mood::Teasing => "teasing",
        }
    }
}

/// A ready-to-send canned request.
struct CannedPrompt {
    title: String,
    messages: Vec<ChatMessage>,
    temperature: Option<f32>,
    colour: serenity::Colour,
}

fn dad_joke() -> CannedPrompt {
    CannedPrompt {
        title: DAD_JOKE_REQUEST.to_string(),
        messages: vec![ChatMessage::text(Role::User, DAD_JOKE_REQUEST)],
        temperature: Some(1.5),
        colour: serenity::Colour::DARK_GREEN,
    }
}

fn shakespeare_prompt(text: &str) -> CannedPrompt {
    CannedPrompt {
        title: text.to_string(),
        messages: vec![
            ChatMessage::text(Role::System, SHAKESPEARE_SYSTEM),
            ChatMessage::text(Role::User, text),
        ],
        temperature: None,
        colour: serenity::Colour::GOLD,
    }
}

fn pickup_line_prompt(text: &str, mood: Mood) -> CannedPrompt {
    let system = format!(
        "You are a bot that generates a single pickup line based on the prompt given by the user, \
         with a {} mood. Follow the mood very closely. If the prompt is not about a person or thing \
         that could be used in a pickup line, respond only with \
         'I cannot create a pickup line based on that prompt.'",
        mood.word()
    );
    CannedPrompt {
        title: text.to_string(),
        messages: vec![
            ChatMessage::text(Role::System, system),
            ChatMessage::text(Role::User, text),
        ],
        temperature: None,
        colour: serenity::Colour::MAGENTA,
    }
}

async fn run(ctx: Context<'_>, user_text: Option<&str>, prompt: CannedPrompt) -> Result<(), Error> {
    let checked = validate_prompt(user_text.as_slice(), PROMPT_LIMIT)
        .and_then(|()| precheck_quota(ctx, Category::Text))
        .and_then(|()| backend_for(ctx));
    let backend = match checked {
        Ok(backend) => backend,
        Err(e) => return send_error(ctx, &e).await,
    };

    ctx.defer().await?;

    let options = CompletionOptions {
        max_tokens: Some(PROMPT_MAX_TOKENS),
        temperature: prompt.temperature,
    };
    let done = match ctx
        .data()
        .chat
        .complete_text(
            backend.as_ref(),
            ctx.author().id.get(),
            PROMPT_MODEL,
            prompt.messages,
            options,
        )
        .await
    {
        Ok(done) => done,
        Err(e) => return send_error(ctx, &e).await,
    };

    let embed = response_embed(
        &prompt.title,
        &ctx.data().config.output_filter.clean(&done.reply),
        prompt.colour,
        &model_footer(PROMPT_MODEL),
    );
    ctx.send(
        CreateReply::default()
            .embed(embed)
            .components(vec![response_row(&done.quota, false)]),
    )
    .await?;

    send_limit_notice(ctx, Category::Text, &done.quota).await
}

/// Generate a dad joke
#[poise::command(slash_command)]
pub async fn dadjoke(ctx: Context<'_>) -> Result<(), Error> {
    run(ctx, None, dad_joke()).await
}

/// Translate text into Shakespearean English
#[poise::command(slash_command)]
pub async fn shakespeare(
    ctx: Context<'_>,
    #[description = "The prompt to translate"] prompt: String,
) -> Result<(), Error> {
    run(ctx, Some(&prompt), shakespeare_prompt(&prompt)).await
}

/// Generate a pickup line
#[poise::command(slash_command)]
pub async fn pickupline(
    ctx: Context<'_>,
    #[description = "Tell the bot about your crush!"] prompt: String,
    #[description = "The mood of the pickup line"] mood: Mood,
) -> Result<(), Error> {
    run(ctx, Some(&prompt), pickup_line_prompt(&prompt, mood)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pickup_line_carries_mood_into_system_message() {
        let prompt = pickup_line_prompt("my cat", Mood::Teasing);
        assert_eq!(prompt.messages.len(), 2);
        assert_eq!(prompt.messages[0].role, Role::System);
        assert!(prompt.messages[0].content.text().contains("teasing mood"));
        assert_eq!(prompt.messages[1], ChatMessage::text(Role::User, "my cat"));
    }

    #[test]
    fn dad_joke_runs_hot_without_user_input() {
        let prompt = dad_joke();
        assert_eq!(prompt.temperature, Some(1.5));
        assert_eq!(prompt.messages.len(), 1);
    }

    #[test]
    fn shakespeare_titles_with_the_input() {
        let prompt = shakespeare_prompt("hello there");
        assert_eq!(prompt.title, "hello there");
        assert_eq!(prompt.messages[0].role, Role::System);
    }
}
