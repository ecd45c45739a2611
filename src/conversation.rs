//! In-memory registry of threaded conversations
//!
//! Each conversation is keyed by its root message (the first bot reply) and
//! remembers the id of its latest reply. A "Reply" button only knows the
//! message it is attached to, so lookups from the UI go through
//! [`ConversationRegistry::find_root`], a scan over the latest-reply ids.
//!
//! Entries are kept in least-recently-active order so idle threads can be
//! evicted when a time-to-live is configured.

use crate::llm::ChatMessage;
use lru::LruCache;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::{interval, Instant};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq)]
pub struct ConversationEntry {
    pub messages: Vec<ChatMessage>,
    pub root_id: u64,
    pub last_message_id: u64,
    pub owner_user_id: u64,
    pub scope_id: Option<u64>,
    pub model: String,
}

impl ConversationEntry {
    /// A fresh thread whose root is also its latest reply.
    pub fn new(
        root_id: u64,
        owner_user_id: u64,
        scope_id: Option<u64>,
        model: impl Into<String>,
        messages: Vec<ChatMessage>,
    ) -> Self {
        Self {
            messages,
            root_id,
            last_message_id: root_id,
            owner_user_id,
            scope_id,
            model: model.into(),
        }
    }

    fn owned_by(&self, user_id: u64, scope_id: Option<u64>) -> bool {
        self.owner_user_id == user_id && scope_id.map_or(true, |scope| self.scope_id == Some(scope))
    }
}

struct Slot {
    entry: ConversationEntry,
    touched_at: Instant,
}

pub struct ConversationRegistry {
    entries: Mutex<LruCache<u64, Slot>>,
    idle_ttl: Option<Duration>,
    max_entries: usize,
}

impl Default for ConversationRegistry {
    fn default() -> Self {
        Self::new(None, 0)
    }
}

impl ConversationRegistry {
    /// `idle_ttl = None` keeps threads until they are superseded;
    /// `max_entries = 0` means no cap.
    pub fn new(idle_ttl: Option<Duration>, max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(LruCache::unbounded()),
            idle_ttl,
            max_entries,
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<u64, Slot>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn upsert(&self, root_id: u64, entry: ConversationEntry) {
        let mut entries = self.lock();
        entries.put(
            root_id,
            Slot {
                entry,
                touched_at: Instant::now(),
            },
        );

        if self.max_entries > 0 {
            while entries.len() > self.max_entries {
                if let Some((evicted, _)) = entries.pop_lru() {
                    debug!(root_id = evicted, "conversation registry full, evicted oldest thread");
                }
            }
        }
    }

    pub fn get(&self, root_id: u64) -> Option<ConversationEntry> {
        self.lock().peek(&root_id).map(|slot| slot.entry.clone())
    }

    /// Root of the thread whose latest reply is `message_id`.
    pub fn find_root(&self, message_id: u64) -> Option<u64> {
        self.lock()
            .iter()
            .find(|(_, slot)| slot.entry.last_message_id == message_id)
            .map(|(root, _)| *root)
    }

    /// `find_root` followed by `get` under one lock.
    pub fn resolve(&self, message_id: u64) -> Option<ConversationEntry> {
        self.lock()
            .iter()
            .find(|(_, slot)| slot.entry.last_message_id == message_id)
            .map(|(_, slot)| slot.entry.clone())
    }

    /// Appends a turn if nobody else advanced the thread since `expected_leaf`
    /// was read. Returns false for a superseded or already-continued thread.
    pub fn advance(
        &self,
        root_id: u64,
        expected_leaf: u64,
        new_leaf: u64,
        messages: Vec<ChatMessage>,
    ) -> bool {
        let mut entries = self.lock();
        match entries.get_mut(&root_id) {
            Some(slot) if slot.entry.last_message_id == expected_leaf => {
                slot.entry.last_message_id = new_leaf;
                slot.entry.messages = messages;
                slot.touched_at = Instant::now();
                true
            }
            _ => false,
        }
    }

    /// Drops every thread owned by `user_id`, restricted to `scope_id` when given.
    pub fn remove_by_owner(&self, user_id: u64, scope_id: Option<u64>) -> usize {
        let mut entries = self.lock();
        let doomed: Vec<u64> = entries
            .iter()
            .filter(|(_, slot)| slot.entry.owned_by(user_id, scope_id))
            .map(|(root, _)| *root)
            .collect();
        for root in &doomed {
            entries.pop(root);
        }
        doomed.len()
    }

    /// Removes threads idle for longer than the configured time-to-live.
    pub fn evict_idle(&self) -> usize {
        let Some(ttl) = self.idle_ttl else {
            return 0;
        };
        let now = Instant::now();
        let mut entries = self.lock();
        let mut evicted = 0;
        while let Some((_, slot)) = entries.peek_lru() {
            if now.duration_since(slot.touched_at) < ttl {
                break;
            }
            entries.pop_lru();
            evicted += 1;
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Periodically evicts idle conversations.
pub struct ConversationSweeper {
    registry: Arc<ConversationRegistry>,
    interval: Duration,
}

impl ConversationSweeper {
    pub fn new(registry: Arc<ConversationRegistry>, interval: Duration) -> Self {
        Self { registry, interval }
    }

    pub async fn run(self) {
        let mut ticker = interval(self.interval);
        loop {
            ticker.tick().await;
            match self.registry.evict_idle() {
                0 => debug!("Conversation sweeper: nothing to evict"),
                n => info!(
                    "Conversation sweeper: evicted {} idle threads, {} remain",
                    n,
                    self.registry.len()
                ),
            }
        }
    }
}
