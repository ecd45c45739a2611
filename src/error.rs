use crate::usage::Category;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Expected, user-facing outcomes of a request.
///
/// None of these are bugs; handlers render them into an embed and stop.
#[derive(Debug, Error)]
pub enum BotError {
    #[error("You have reached the maximum number of {category} requests ({limit}) for {window}! Please try again at: <t:{}:t>", .retry_at.timestamp())]
    QuotaExceeded {
        category: Category,
        limit: u32,
        window: humantime::Duration,
        retry_at: DateTime<Utc>,
    },

    #[error("You already have a {category} request in progress. Please wait for it to finish!")]
    RequestInProgress { category: Category },

    #[error("The prompt and system message must be less than {limit} characters!")]
    PromptTooLong { limit: usize },

    #[error("An error occurred while generating the response! {0}")]
    Upstream(String),

    #[error("Possibly inappropriate content detected!")]
    ContentPolicy,

    #[error("You started a new conversation and can no longer reply to this one.")]
    StaleConversation,

    #[error("You can't use this context!")]
    NotOwner,

    #[error("A reply to this message is already being generated.")]
    AlreadyReplying,

    #[error("This command can only be used in a server!")]
    GuildOnly,

    #[error("No OpenAI API key is configured. Ask a server admin to run /config.")]
    NotConfigured,
}

impl BotError {
    /// Whether the reply should only be visible to the invoking user.
    pub fn is_private(&self) -> bool {
        matches!(
            self,
            BotError::QuotaExceeded { .. }
                | BotError::RequestInProgress { .. }
                | BotError::StaleConversation
                | BotError::NotOwner
                | BotError::AlreadyReplying
                | BotError::GuildOnly
                | BotError::NotConfigured
        )
    }
}
