use crate::filter::OutputFilter;
use crate::llm::ProviderSettings;
use dotenvy::dotenv;
use std::env;

#[derive(Clone)]
pub struct Config {
    pub discord_token: String,
    pub application_id: u64,
    pub openai_api_key: Option<String>,
    pub openai_api_base: Option<String>,
    pub openai_organization: Option<String>,
    pub image_model: String,
    pub status_message: String,
    pub llm_timeout_secs: u64,
    pub dev_guild_id: Option<u64>,

    // Usage ceilings
    pub text_limit: u32,
    pub text_cooldown_secs: u64,
    pub image_limit: u32,
    pub image_cooldown_secs: u64,
    /// Whether an image prompt refused by the provider's safety system still uses up quota.
    pub count_rejected_images: bool,
    /// Which words are masked in displayed model output.
    pub output_filter: OutputFilter,

    // Conversation threads
    pub conversation_ttl_secs: u64,
    pub max_conversations: usize,
    pub sweep_interval_secs: u64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok();
        Self::build()
    }

    fn build() -> anyhow::Result<Self> {
        Ok(Config {
            discord_token: env::var("DISCORD_TOKEN")
                .map_err(|_| anyhow::anyhow!("DISCORD_TOKEN must be set"))?,
            application_id: env::var("APPLICATION_ID")
                .map_err(|_| anyhow::anyhow!("APPLICATION_ID must be set"))?
                .parse()
                .ok()
                .filter(|id| *id != 0)
                .ok_or_else(|| anyhow::anyhow!("APPLICATION_ID must be a non-zero u64"))?,
            openai_api_key: env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty()),
            openai_api_base: env::var("OPENAI_API_BASE").ok(),
            openai_organization: env::var("OPENAI_ORGANIZATION").ok(),
            image_model: env::var("IMAGE_MODEL").unwrap_or_else(|_| "dall-e-3".to_string()),
            status_message: env::var("STATUS_MESSAGE")
                .unwrap_or_else(|_| "Ready to chat!".to_string()),
            llm_timeout_secs: env::var("LLM_TIMEOUT_SECS")
                .unwrap_or_else(|_| "120".to_string())
                .parse()
                .unwrap_or(120),
            dev_guild_id: env::var("DEV_GUILD_ID").ok().and_then(|id| id.parse().ok()),
            text_limit: env::var("TEXT_LIMIT")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .unwrap_or(20),
            text_cooldown_secs: env::var("TEXT_COOLDOWN_SECS")
                .unwrap_or_else(|_| "3600".to_string())
                .parse()
                .unwrap_or(3600),
            image_limit: env::var("IMAGE_LIMIT")
                .unwrap_or_else(|_| "1".to_string())
                .parse()
                .unwrap_or(1),
            image_cooldown_secs: env::var("IMAGE_COOLDOWN_SECS")
                .unwrap_or_else(|_| "7200".to_string())
                .parse()
                .unwrap_or(7200),
            count_rejected_images: env::var("COUNT_REJECTED_IMAGES")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .unwrap_or(true),
            output_filter: env::var("OUTPUT_FILTER")
                .ok()
                .and_then(|v| OutputFilter::parse(&v))
                .unwrap_or_default(),
            conversation_ttl_secs: env::var("CONVERSATION_TTL_SECS")
                .unwrap_or_else(|_| "86400".to_string())
                .parse()
                .unwrap_or(86400),
            max_conversations: env::var("MAX_CONVERSATIONS")
                .unwrap_or_else(|_| "10000".to_string())
                .parse()
                .unwrap_or(10000),
            sweep_interval_secs: env::var("SWEEP_INTERVAL_SECS")
                .unwrap_or_else(|_| "300".to_string())
                .parse()
                .unwrap_or(300),
        })
    }

    /// Settings for the process-wide client, if an API key was provided.
    pub fn default_provider(&self) -> Option<ProviderSettings> {
        self.openai_api_key.as_ref().map(|key| ProviderSettings {
            api_key: key.clone(),
            api_base: self.openai_api_base.clone(),
            organization: self.openai_organization.clone(),
        })
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("discord_token", &"[REDACTED]")
            .field("application_id", &self.application_id)
            .field(
                "openai_api_key",
                &self.openai_api_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("openai_api_base", &self.openai_api_base)
            .field("openai_organization", &self.openai_organization)
            .field("image_model", &self.image_model)
            .field("status_message", &self.status_message)
            .field("llm_timeout_secs", &self.llm_timeout_secs)
            .field("dev_guild_id", &self.dev_guild_id)
            .field("text_limit", &self.text_limit)
            .field("text_cooldown_secs", &self.text_cooldown_secs)
            .field("image_limit", &self.image_limit)
            .field("image_cooldown_secs", &self.image_cooldown_secs)
            .field("count_rejected_images", &self.count_rejected_images)
            .field("output_filter", &self.output_filter)
            .field("conversation_ttl_secs", &self.conversation_ttl_secs)
            .field("max_conversations", &self.max_conversations)
            .field("sweep_interval_secs", &self.sweep_interval_secs)
            .finish()
    }
}

/// Embed title limit is 256 characters
pub const DISCORD_TITLE_LIMIT: usize = 256;
/// Embed description limit is 4096 characters
pub const DISCORD_EMBED_LIMIT: usize = 4096;

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_config_logic() {
        // 1. Test missing vars
        env::remove_var("DISCORD_TOKEN");
        env::remove_var("APPLICATION_ID");
        let result = Config::build();
        assert!(
            result.is_err(),
            "Should fail when required vars are missing"
        );

        env::set_var("DISCORD_TOKEN", "test_token");
        env::set_var("APPLICATION_ID", "0");
        assert!(Config::build().is_err(), "Application id 0 is not a snowflake");

        // 2. Test defaults
        env::set_var("DISCORD_TOKEN", "test_token");
        env::set_var("APPLICATION_ID", "12345");
        env::remove_var("OPENAI_API_KEY");
        let config = Config::build().unwrap();
        assert_eq!(config.discord_token, "test_token");
        assert_eq!(config.application_id, 12345);
        assert_eq!(config.text_limit, 20);
        assert_eq!(config.text_cooldown_secs, 3600);
        assert_eq!(config.image_limit, 1);
        assert_eq!(config.image_cooldown_secs, 7200);
        assert!(config.count_rejected_images);
        assert_eq!(config.output_filter, OutputFilter::Slurs);
        assert!(config.default_provider().is_none());

        // 3. Test debug redaction
        env::set_var("OPENAI_API_KEY", "secret_api_key");
        let config_redacted = Config::build().unwrap();
        assert!(config_redacted.default_provider().is_some());
        let debug_output = format!("{:?}", config_redacted);
        assert!(!debug_output.contains("test_token"));
        assert!(!debug_output.contains("secret_api_key"));
        assert!(debug_output.contains("[REDACTED]"));

        // Cleanup
        env::remove_var("DISCORD_TOKEN");
        env::remove_var("APPLICATION_ID");
        env::remove_var("OPENAI_API_KEY");
    }
}
