//! Request pipeline shared by every AI command
//!
//! Quota check, upstream call, usage accounting and thread bookkeeping, kept
//! apart from Discord so the ordering guarantees can be tested: nothing is
//! counted or recorded unless the upstream call succeeded.

use crate::conversation::{ConversationEntry, ConversationRegistry};
use crate::error::BotError;
use crate::llm::{ChatMessage, CompletionBackend, CompletionOptions, LlmError, Role};
use crate::quota::{QuotaGate, QuotaStatus};
use crate::usage::Category;
use async_openai::types::{ImageQuality, ImageSize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

/// A finished text request.
#[derive(Debug)]
pub struct Completion {
    pub reply: String,
    /// Request messages followed by the assistant reply.
    pub transcript: Vec<ChatMessage>,
    pub quota: QuotaStatus,
}

#[derive(Debug)]
pub enum ImageOutcome {
    Generated { png: Vec<u8>, quota: QuotaStatus },
    /// Refused by the provider's safety system; `quota` is set when the
    /// refusal was counted.
    Rejected { quota: Option<QuotaStatus> },
}

/// Exclusive right to continue a thread from one of its replies.
pub struct ReplyClaim {
    entry: ConversationEntry,
    replying: Arc<Mutex<HashSet<u64>>>,
}

impl ReplyClaim {
    pub fn entry(&self) -> &ConversationEntry {
        &self.entry
    }
}

impl Drop for ReplyClaim {
    fn drop(&mut self) {
        self.replying
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.entry.last_message_id);
    }
}

#[derive(Clone)]
pub struct ChatService {
    quota: QuotaGate,
    conversations: Arc<ConversationRegistry>,
    replying: Arc<Mutex<HashSet<u64>>>,
    count_rejected_images: bool,
}

/// Rejects user-supplied text longer than `limit` characters.
pub fn validate_prompt(inputs: &[&str], limit: usize) -> Result<(), BotError> {
    if inputs.iter().any(|input| input.chars().count() > limit) {
        return Err(BotError::PromptTooLong { limit });
    }
    Ok(())
}

fn upstream_error(err: LlmError) -> BotError {
    match err {
        LlmError::ContentPolicy(_) => BotError::ContentPolicy,
        other => BotError::Upstream(other.to_string()),
    }
}

impl ChatService {
    pub fn new(
        quota: QuotaGate,
        conversations: Arc<ConversationRegistry>,
        count_rejected_images: bool,
    ) -> Self {
        Self {
            quota,
            conversations,
            replying: Arc::new(Mutex::new(HashSet::new())),
            count_rejected_images,
        }
    }

    pub fn quota(&self) -> &QuotaGate {
        &self.quota
    }

    pub fn conversations(&self) -> &Arc<ConversationRegistry> {
        &self.conversations
    }

    /// Runs one text completion on behalf of `user_id`.
    pub async fn complete_text(
        &self,
        backend: &dyn CompletionBackend,
        user_id: u64,
        model: &str,
        messages: Vec<ChatMessage>,
        options: CompletionOptions,
    ) -> Result<Completion, BotError> {
        let permit = self.quota.acquire(user_id, Category::Text)?;

        let reply = backend
            .complete(model, &messages, options)
            .await
            .map_err(|e| {
                warn!(user_id, model, "Completion failed: {}", e);
                upstream_error(e)
            })?;

        let quota = permit.commit();
        debug!(user_id, used = quota.used, limit = quota.limit, "Text request counted");

        let mut transcript = messages;
        transcript.push(ChatMessage::text(Role::Assistant, reply.clone()));
        Ok(Completion {
            reply,
            transcript,
            quota,
        })
    }

    /// Registers a new thread rooted at the bot's reply, replacing the user's
    /// older threads in the same scope. Returns how many were superseded.
    pub fn open_thread(
        &self,
        root_id: u64,
        user_id: u64,
        scope_id: Option<u64>,
        model: &str,
        transcript: Vec<ChatMessage>,
    ) -> usize {
        let superseded = self.conversations.remove_by_owner(user_id, scope_id);
        if superseded > 0 {
            debug!(user_id, superseded, "Superseded previous conversations");
        }
        self.conversations.upsert(
            root_id,
            ConversationEntry::new(root_id, user_id, scope_id, model, transcript),
        );
        superseded
    }

    /// Checks that `user_id` may continue the thread ending at `message_id`.
    pub fn check_reply(
        &self,
        user_id: u64,
        message_id: u64,
    ) -> Result<ConversationEntry, BotError> {
        let entry = self
            .conversations
            .resolve(message_id)
            .ok_or(BotError::StaleConversation)?;
        if entry.owner_user_id != user_id {
            return Err(BotError::NotOwner);
        }
        Ok(entry)
    }

    /// Resolves the reply a user clicked back to its thread.
    pub fn claim_reply(&self, user_id: u64, message_id: u64) -> Result<ReplyClaim, BotError> {
        let entry = self.check_reply(user_id, message_id)?;

        let fresh = self
            .replying
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(message_id);
        if !fresh {
            return Err(BotError::AlreadyReplying);
        }

        Ok(ReplyClaim {
            entry,
            replying: self.replying.clone(),
        })
    }

    /// Asks the thread's model for the next turn. Nothing is recorded yet.
    pub async fn continue_text(
        &self,
        backend: &dyn CompletionBackend,
        claim: &ReplyClaim,
        text: &str,
        image_urls: Vec<String>,
    ) -> Result<Completion, BotError> {
        let entry = claim.entry();
        let mut messages = entry.messages.clone();
        messages.push(ChatMessage::user_with_images(text, image_urls));
        self.complete_text(
            backend,
            entry.owner_user_id,
            &entry.model,
            messages,
            CompletionOptions::default(),
        )
        .await
    }

    /// Moves the thread's latest reply to `new_leaf`.
    pub fn record_turn(
        &self,
        claim: &ReplyClaim,
        new_leaf: u64,
        transcript: Vec<ChatMessage>,
    ) -> Result<(), BotError> {
        let entry = claim.entry();
        if self
            .conversations
            .advance(entry.root_id, entry.last_message_id, new_leaf, transcript)
        {
            info!(
                root_id = entry.root_id,
                leaf = new_leaf,
                "Conversation continued"
            );
            Ok(())
        } else {
            Err(BotError::StaleConversation)
        }
    }

    pub async fn generate_image(
        &self,
        backend: &dyn CompletionBackend,
        user_id: u64,
        prompt: &str,
        size: ImageSize,
        quality: ImageQuality,
    ) -> Result<ImageOutcome, BotError> {
        let permit = self.quota.acquire(user_id, Category::Image)?;

        match backend.generate_image(prompt, size, quality).await {
            Ok(png) => Ok(ImageOutcome::Generated {
                png,
                quota: permit.commit(),
            }),
            Err(LlmError::ContentPolicy(reason)) => {
                info!(user_id, "Image prompt rejected: {}", reason);
                let quota = self.count_rejected_images.then(|| permit.commit());
                Ok(ImageOutcome::Rejected { quota })
            }
            Err(e) => {
                warn!(user_id, "Image generation failed: {}", e);
                Err(upstream_error(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quota::{QuotaPolicies, QuotaPolicy};
    use crate::usage::UsageTracker;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::time::Duration;

    /// Replays scripted results and records what it was sent.
    #[derive(Default)]
    struct MockBackend {
        replies: Mutex<VecDeque<Result<String, LlmError>>>,
        images: Mutex<VecDeque<Result<Vec<u8>, LlmError>>>,
        seen: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl MockBackend {
        fn replying(replies: Vec<Result<String, LlmError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                ..Default::default()
            }
        }

        fn imaging(images: Vec<Result<Vec<u8>, LlmError>>) -> Self {
            Self {
                images: Mutex::new(images.into()),
                ..Default::default()
            }
        }

        fn calls(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl CompletionBackend for MockBackend {
        async fn complete(
            &self,
            _model: &str,
            messages: &[ChatMessage],
            _options: CompletionOptions,
        ) -> Result<String, LlmError> {
            self.seen.lock().unwrap().push(messages.to_vec());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(LlmError::EmptyResponse))
        }

        async fn generate_image(
            &self,
            _prompt: &str,
            _size: ImageSize,
            _quality: ImageQuality,
        ) -> Result<Vec<u8>, LlmError> {
            self.images
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(LlmError::EmptyResponse))
        }
    }

    fn service(text_ceiling: u32, count_rejected_images: bool) -> ChatService {
        let quota = QuotaGate::new(
            Arc::new(UsageTracker::new()),
            QuotaPolicies {
                text: QuotaPolicy {
                    ceiling: text_ceiling,
                    cooldown: Duration::from_secs(3600),
                },
                image: QuotaPolicy {
                    ceiling: 1,
                    cooldown: Duration::from_secs(7200),
                },
            },
        );
        ChatService::new(
            quota,
            Arc::new(ConversationRegistry::default()),
            count_rejected_images,
        )
    }

    fn prompt(text: &str) -> Vec<ChatMessage> {
        vec![ChatMessage::text(Role::User, text)]
    }

    #[test]
    fn test_validate_prompt_counts_characters() {
        assert!(validate_prompt(&["héllo"], 5).is_ok());
        assert!(matches!(
            validate_prompt(&["short", "way too long"], 5),
            Err(BotError::PromptTooLong { limit: 5 })
        ));
    }

    #[tokio::test]
    async fn test_success_counts_and_appends_reply() {
        let svc = service(20, true);
        let backend = MockBackend::replying(vec![Ok("pong".into())]);

        let done = svc
            .complete_text(
                &backend,
                1,
                "gpt-4o-mini",
                prompt("ping"),
                CompletionOptions {
                    max_tokens: Some(1024),
                    temperature: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(done.reply, "pong");
        assert_eq!(done.transcript.len(), 2);
        assert_eq!(done.transcript[1], ChatMessage::text(Role::Assistant, "pong"));
        assert_eq!(done.quota.used, 1);
        assert_eq!(done.quota.remaining(), 19);
    }

    #[tokio::test]
    async fn test_upstream_failure_changes_nothing() {
        let svc = service(20, true);
        let backend = MockBackend::replying(vec![Err(LlmError::Api("boom".into()))]);

        let err = svc
            .complete_text(&backend, 1, "gpt-4o-mini", prompt("ping"), CompletionOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, BotError::Upstream(ref m) if m.contains("boom")));
        assert_eq!(svc.quota().tracker().get_count(1, Category::Text), 0);
        assert!(svc.conversations().is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_user_never_reaches_backend() {
        let svc = service(1, true);
        let backend = MockBackend::replying(vec![Ok("one".into()), Ok("two".into())]);

        let done = svc
            .complete_text(&backend, 1, "m", prompt("a"), CompletionOptions::default())
            .await
            .unwrap();
        assert!(done.quota.retry_at.is_some());

        let err = svc
            .complete_text(&backend, 1, "m", prompt("b"), CompletionOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BotError::QuotaExceeded { limit: 1, .. }));
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn test_reply_continues_thread_from_latest_leaf() {
        let svc = service(20, true);
        let backend = MockBackend::replying(vec![Ok("first".into()), Ok("second".into())]);

        let done = svc
            .complete_text(&backend, 7, "gpt-4o-mini", prompt("hello"), CompletionOptions::default())
            .await
            .unwrap();
        svc.open_thread(100, 7, Some(1), "gpt-4o-mini", done.transcript);

        let claim = svc.claim_reply(7, 100).unwrap();
        let next = svc
            .continue_text(&backend, &claim, "tell me more", vec!["https://x/y.png".into()])
            .await
            .unwrap();
        svc.record_turn(&claim, 101, next.transcript).unwrap();
        drop(claim);

        // The model saw the whole history plus the new turn
        let seen = backend.seen.lock().unwrap();
        assert_eq!(seen[1].len(), 3);
        assert_eq!(seen[1][1], ChatMessage::text(Role::Assistant, "first"));
        drop(seen);

        let entry = svc.conversations().get(100).unwrap();
        assert_eq!(entry.last_message_id, 101);
        assert_eq!(entry.messages.len(), 4);
        assert_eq!(svc.conversations().find_root(101), Some(100));
        assert!(matches!(
            svc.claim_reply(7, 100),
            Err(BotError::StaleConversation)
        ));
        assert_eq!(svc.quota().tracker().get_count(7, Category::Text), 2);
    }

    #[tokio::test]
    async fn test_only_owner_can_reply() {
        let svc = service(20, true);
        svc.open_thread(100, 7, None, "m", prompt("x"));
        assert!(matches!(svc.check_reply(8, 100), Err(BotError::NotOwner)));
        assert!(matches!(svc.claim_reply(8, 100), Err(BotError::NotOwner)));
        assert_eq!(svc.check_reply(7, 100).unwrap().model, "m");
    }

    #[tokio::test]
    async fn test_double_submitted_reply_is_refused() {
        let svc = service(20, true);
        svc.open_thread(100, 7, None, "m", prompt("x"));

        let claim = svc.claim_reply(7, 100).unwrap();
        assert!(matches!(
            svc.claim_reply(7, 100),
            Err(BotError::AlreadyReplying)
        ));
        drop(claim);
        assert!(svc.claim_reply(7, 100).is_ok());
    }

    #[tokio::test]
    async fn test_new_command_supersedes_old_thread() {
        let svc = service(20, true);
        svc.open_thread(100, 7, Some(1), "m", prompt("old"));
        svc.open_thread(200, 8, Some(1), "m", prompt("someone else"));

        assert_eq!(svc.open_thread(300, 7, Some(1), "m", prompt("new")), 1);
        assert!(matches!(
            svc.claim_reply(7, 100),
            Err(BotError::StaleConversation)
        ));
        assert!(svc.claim_reply(8, 200).is_ok());
        assert!(svc.claim_reply(7, 300).is_ok());
    }

    #[tokio::test]
    async fn test_failed_continuation_keeps_thread_intact() {
        let svc = service(20, true);
        svc.open_thread(100, 7, None, "m", prompt("x"));
        let backend = MockBackend::replying(vec![Err(LlmError::Transport("timeout".into()))]);

        let claim = svc.claim_reply(7, 100).unwrap();
        assert!(svc.continue_text(&backend, &claim, "more", Vec::new()).await.is_err());
        drop(claim);

        assert_eq!(svc.conversations().find_root(100), Some(100));
        assert_eq!(svc.quota().tracker().get_count(7, Category::Text), 0);
    }

    #[tokio::test]
    async fn test_rejected_image_counts_when_configured() {
        let svc = service(20, true);
        let backend = MockBackend::imaging(vec![Err(LlmError::ContentPolicy("nsfw".into()))]);

        let outcome = svc
            .generate_image(&backend, 3, "bad", ImageSize::S1024x1024, ImageQuality::Standard)
            .await
            .unwrap();
        match outcome {
            ImageOutcome::Rejected { quota: Some(q) } => assert!(q.retry_at.is_some()),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(svc.quota().tracker().get_count(3, Category::Image), 1);
    }

    #[tokio::test]
    async fn test_rejected_image_free_when_not_counted() {
        let svc = service(20, false);
        let backend = MockBackend::imaging(vec![
            Err(LlmError::ContentPolicy("nsfw".into())),
            Ok(vec![0x89, 0x50]),
        ]);

        let outcome = svc
            .generate_image(&backend, 3, "bad", ImageSize::S1024x1024, ImageQuality::Standard)
            .await
            .unwrap();
        assert!(matches!(outcome, ImageOutcome::Rejected { quota: None }));
        assert_eq!(svc.quota().tracker().get_count(3, Category::Image), 0);

        let outcome = svc
            .generate_image(&backend, 3, "fine", ImageSize::S1024x1024, ImageQuality::Standard)
            .await
            .unwrap();
        match outcome {
            ImageOutcome::Generated { png, quota } => {
                assert_eq!(png, vec![0x89, 0x50]);
                assert_eq!(quota.remaining(), 0);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
