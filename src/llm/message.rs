//! Provider-neutral chat transcript types
//!
//! Transcripts are stored in the conversation registry in this shape and only
//! converted to `async_openai` request messages when a call goes out.

use async_openai::error::OpenAIError;
use async_openai::types::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestMessageContentPartImageArgs,
    ChatCompletionRequestMessageContentPartTextArgs, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, ChatCompletionRequestUserMessageContentPart,
    ImageDetail, ImageUrlArgs,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentPart {
    Text(String),
    ImageUrl(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// Text only, image references dropped.
    pub fn text(&self) -> String {
        match self {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text(text) => Some(text.as_str()),
                    ContentPart::ImageUrl(_) => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: MessageContent,
}

impl ChatMessage {
    pub fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: MessageContent::Text(content.into()),
        }
    }

    /// A user turn with optional attached image URLs.
    pub fn user_with_images(text: impl Into<String>, image_urls: Vec<String>) -> Self {
        let text = text.into();
        if image_urls.is_empty() {
            return Self::text(Role::User, text);
        }

        let mut parts = Vec::with_capacity(image_urls.len() + 1);
        parts.push(ContentPart::Text(text));
        parts.extend(image_urls.into_iter().map(ContentPart::ImageUrl));
        Self {
            role: Role::User,
            content: MessageContent::Parts(parts),
        }
    }

    pub fn to_request(&self) -> Result<ChatCompletionRequestMessage, OpenAIError> {
        let message = match self.role {
            Role::System => ChatCompletionRequestSystemMessageArgs::default()
                .content(self.content.text())
                .build()?
                .into(),
            Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                .content(self.content.text())
                .build()?
                .into(),
            Role::User => match &self.content {
                MessageContent::Text(text) => ChatCompletionRequestUserMessageArgs::default()
                    .content(text.clone())
                    .build()?
                    .into(),
                MessageContent::Parts(parts) => {
                    let parts = parts
                        .iter()
                        .map(content_part_request)
                        .collect::<Result<Vec<_>, _>>()?;
                    ChatCompletionRequestUserMessageArgs::default()
                        .content(parts)
                        .build()?
                        .into()
                }
            },
        };
        Ok(message)
    }
}

fn content_part_request(
    part: &ContentPart,
) -> Result<ChatCompletionRequestUserMessageContentPart, OpenAIError> {
    let part = match part {
        ContentPart::Text(text) => ChatCompletionRequestMessageContentPartTextArgs::default()
            .text(text.clone())
            .build()?
            .into(),
        ContentPart::ImageUrl(url) => ChatCompletionRequestMessageContentPartImageArgs::default()
            .image_url(
                ImageUrlArgs::default()
                    .url(url.clone())
                    .detail(ImageDetail::Auto)
                    .build()?,
            )
            .build()?
            .into(),
    };
    Ok(part)
}

/// One URL per non-empty line.
pub fn parse_image_urls(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_message_without_images_is_plain_text() {
        let msg = ChatMessage::user_with_images("hi", Vec::new());
        assert_eq!(msg, ChatMessage::text(Role::User, "hi"));
    }

    #[test]
    fn test_user_message_with_images_has_parts() {
        let msg = ChatMessage::user_with_images(
            "what is this?",
            vec!["https://a/1.png".into(), "https://a/2.png".into()],
        );
        match &msg.content {
            MessageContent::Parts(parts) => {
                assert_eq!(parts.len(), 3);
                assert_eq!(parts[0], ContentPart::Text("what is this?".into()));
                assert_eq!(parts[2], ContentPart::ImageUrl("https://a/2.png".into()));
            }
            other => panic!("unexpected content {:?}", other),
        }
        assert_eq!(msg.content.text(), "what is this?");
        assert!(msg.to_request().is_ok());
    }

    #[test]
    fn test_parse_image_urls_skips_blank_lines() {
        let urls = parse_image_urls("https://x/a.png\n\n   https://x/b.png  \n");
        assert_eq!(urls, vec!["https://x/a.png", "https://x/b.png"]);
        assert!(parse_image_urls("  \n").is_empty());
    }

    #[test]
    fn test_all_roles_convert() {
        for role in [Role::System, Role::User, Role::Assistant] {
            assert!(ChatMessage::text(role, "x").to_request().is_ok());
        }
    }
}
