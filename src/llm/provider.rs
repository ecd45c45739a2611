use crate::config::Config;
use crate::llm::client::{LlmClient, ProviderSettings};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::info;

/// Picks the client for a request: a server's own `/config` settings if set,
/// otherwise the process-wide default.
pub struct ProviderRegistry {
    default: Option<Arc<LlmClient>>,
    overrides: RwLock<HashMap<u64, Arc<LlmClient>>>,
    http_client: reqwest::Client,
    image_model: String,
}

impl ProviderRegistry {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.llm_timeout_secs))
            .build()?;

        let default = config.default_provider().map(|settings| {
            Arc::new(LlmClient::new(
                &settings,
                http_client.clone(),
                &config.image_model,
            ))
        });

        Ok(Self {
            default,
            overrides: RwLock::new(HashMap::new()),
            http_client,
            image_model: config.image_model.clone(),
        })
    }

    pub fn configure_guild(&self, guild_id: u64, settings: &ProviderSettings) {
        let client = Arc::new(LlmClient::new(
            settings,
            self.http_client.clone(),
            &self.image_model,
        ));
        self.overrides
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(guild_id, client);
        info!(guild_id, "Updated provider settings for guild");
    }

    pub fn client_for(&self, guild_id: Option<u64>) -> Option<Arc<LlmClient>> {
        guild_id
            .and_then(|id| {
                self.overrides
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .get(&id)
                    .cloned()
            })
            .or_else(|| self.default.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(api_key: Option<&str>) -> Config {
        Config {
            discord_token: "token".to_string(),
            application_id: 1,
            openai_api_key: api_key.map(str::to_string),
            openai_api_base: None,
            openai_organization: None,
            image_model: "dall-e-3".to_string(),
            status_message: String::new(),
            llm_timeout_secs: 5,
            dev_guild_id: None,
            text_limit: 20,
            text_cooldown_secs: 3600,
            image_limit: 1,
            image_cooldown_secs: 7200,
            count_rejected_images: true,
            output_filter: crate::filter::OutputFilter::Slurs,
            conversation_ttl_secs: 0,
            max_conversations: 0,
            sweep_interval_secs: 0,
        }
    }

    fn settings(key: &str) -> ProviderSettings {
        ProviderSettings {
            api_key: key.to_string(),
            api_base: Some("http://localhost:8080/v1".to_string()),
            organization: None,
        }
    }

    #[test]
    fn test_no_key_means_no_client() {
        let registry = ProviderRegistry::new(&config(None)).unwrap();
        assert!(registry.client_for(None).is_none());
        assert!(registry.client_for(Some(42)).is_none());
    }

    #[test]
    fn test_guild_override_wins_over_default() {
        let registry = ProviderRegistry::new(&config(Some("sk-default"))).unwrap();
        let default = registry.client_for(Some(42)).unwrap();

        registry.configure_guild(42, &settings("sk-guild"));
        let guild = registry.client_for(Some(42)).unwrap();
        assert!(!Arc::ptr_eq(&default, &guild));

        // Other guilds and DMs keep the default
        assert!(Arc::ptr_eq(&registry.client_for(Some(7)).unwrap(), &default));
        assert!(Arc::ptr_eq(&registry.client_for(None).unwrap(), &default));
    }

    #[test]
    fn test_override_without_default() {
        let registry = ProviderRegistry::new(&config(None)).unwrap();
        registry.configure_guild(42, &settings("sk-guild"));
        assert!(registry.client_for(Some(42)).is_some());
        assert!(registry.client_for(None).is_none());
    }
}
