pub mod commands;
pub mod config;
pub mod conversation;
pub mod discord_text;
pub mod error;
pub mod filter;
pub mod llm;
pub mod quota;
pub mod reply;
pub mod services;
pub mod usage;

use std::sync::Arc;
use std::time::Duration;

/// Custom data passed to all commands
pub struct Data {
    pub config: config::Config,
    pub providers: llm::ProviderRegistry,
    pub chat: services::chat::ChatService,
}

impl Data {
    pub fn new(config: config::Config) -> anyhow::Result<Self> {
        let providers = llm::ProviderRegistry::new(&config)?;

        let quota = quota::QuotaGate::new(
            Arc::new(usage::UsageTracker::new()),
            quota::QuotaPolicies::from_config(&config),
        );
        let idle_ttl = (config.conversation_ttl_secs > 0)
            .then(|| Duration::from_secs(config.conversation_ttl_secs));
        let conversations = Arc::new(conversation::ConversationRegistry::new(
            idle_ttl,
            config.max_conversations,
        ));
        let chat =
            services::chat::ChatService::new(quota, conversations, config.count_rejected_images);

        Ok(Self {
            config,
            providers,
            chat,
        })
    }

    /// Background pruning of idle threads, if a TTL is configured.
    pub fn sweeper(&self) -> Option<conversation::ConversationSweeper> {
        (self.config.conversation_ttl_secs > 0 && self.config.sweep_interval_secs > 0).then(|| {
            conversation::ConversationSweeper::new(
                self.chat.conversations().clone(),
                Duration::from_secs(self.config.sweep_interval_secs),
            )
        })
    }
}

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;
