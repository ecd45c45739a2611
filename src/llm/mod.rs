pub mod client;
pub mod message;
pub mod provider;

pub use client::{CompletionBackend, CompletionOptions, LlmClient, LlmError, ProviderSettings};
pub use message::{ChatMessage, ContentPart, MessageContent, Role};
pub use provider::ProviderRegistry;
