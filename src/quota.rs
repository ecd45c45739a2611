//! Ceiling and cooldown policy on top of [`UsageTracker`]
//!
//! A request first [`acquire`](QuotaGate::acquire)s a [`UsagePermit`]. The
//! permit is committed once the upstream call succeeded; dropping it instead
//! hands the slot back. Reaching the ceiling stamps the hit time and schedules
//! a reset after the cooldown window.

use crate::config::Config;
use crate::error::BotError;
use crate::usage::{Category, UsageTracker};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::AbortHandle;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaPolicy {
    pub ceiling: u32,
    pub cooldown: Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct QuotaPolicies {
    pub text: QuotaPolicy,
    pub image: QuotaPolicy,
}

impl QuotaPolicies {
    pub fn from_config(config: &Config) -> Self {
        Self {
            text: QuotaPolicy {
                ceiling: config.text_limit,
                cooldown: Duration::from_secs(config.text_cooldown_secs),
            },
            image: QuotaPolicy {
                ceiling: config.image_limit,
                cooldown: Duration::from_secs(config.image_cooldown_secs),
            },
        }
    }

    pub fn for_category(&self, category: Category) -> QuotaPolicy {
        match category {
            Category::Text => self.text,
            Category::Image => self.image,
        }
    }
}

/// Usage after a committed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaStatus {
    pub used: u32,
    pub limit: u32,
    /// Set when this request used up the last slot.
    pub retry_at: Option<DateTime<Utc>>,
}

impl QuotaStatus {
    pub fn remaining(&self) -> u32 {
        self.limit.saturating_sub(self.used)
    }
}

struct PendingReset {
    generation: u64,
    handle: AbortHandle,
}

type TimerMap = HashMap<(u64, Category), PendingReset>;

#[derive(Clone)]
pub struct QuotaGate {
    tracker: Arc<UsageTracker>,
    policies: QuotaPolicies,
    timers: Arc<Mutex<TimerMap>>,
    generation: Arc<AtomicU64>,
}

impl QuotaGate {
    pub fn new(tracker: Arc<UsageTracker>, policies: QuotaPolicies) -> Self {
        Self {
            tracker,
            policies,
            timers: Arc::new(Mutex::new(HashMap::new())),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn tracker(&self) -> &UsageTracker {
        &self.tracker
    }

    pub fn policy(&self, category: Category) -> QuotaPolicy {
        self.policies.for_category(category)
    }

    fn lock_timers(&self) -> MutexGuard<'_, TimerMap> {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cooldown(&self, category: Category) -> chrono::Duration {
        chrono::Duration::from_std(self.policy(category).cooldown)
            .unwrap_or_else(|_| chrono::Duration::zero())
    }

    fn retry_at(&self, category: Category, hit_at: DateTime<Utc>) -> DateTime<Utc> {
        hit_at + self.cooldown(category)
    }

    fn exceeded(&self, category: Category, hit_at: DateTime<Utc>) -> BotError {
        let policy = self.policy(category);
        BotError::QuotaExceeded {
            category,
            limit: policy.ceiling,
            window: policy.cooldown.into(),
            retry_at: self.retry_at(category, hit_at),
        }
    }

    /// Reserves one request for `user_id`, or explains when they may retry.
    pub fn acquire(&self, user_id: u64, category: Category) -> Result<UsagePermit, BotError> {
        let policy = self.policy(category);
        match self.tracker.try_reserve(user_id, category, policy.ceiling) {
            Ok(()) => Ok(UsagePermit {
                gate: self.clone(),
                user_id,
                category,
                armed: true,
            }),
            Err(exhausted) => match exhausted.limit_hit_at {
                Some(hit_at) => {
                    debug!(user_id, %category, "quota exhausted");
                    Err(self.exceeded(category, hit_at))
                }
                // Only in-flight requests fill the remaining slots
                None => {
                    debug!(user_id, %category, "last slots held by in-flight requests");
                    Err(BotError::RequestInProgress { category })
                }
            },
        }
    }

    pub fn remaining(&self, user_id: u64, category: Category) -> u32 {
        self.policy(category)
            .ceiling
            .saturating_sub(self.tracker.get_count(user_id, category))
    }

    /// Current usage without reserving anything.
    pub fn status(&self, user_id: u64, category: Category) -> QuotaStatus {
        QuotaStatus {
            used: self.tracker.get_count(user_id, category),
            limit: self.policy(category).ceiling,
            retry_at: self
                .tracker
                .get_limit_hit_at(user_id, category)
                .map(|hit_at| self.retry_at(category, hit_at)),
        }
    }

    /// The refusal the user would get next, when `status` used up the last slot.
    pub fn limit_notice(&self, category: Category, status: &QuotaStatus) -> Option<BotError> {
        status
            .retry_at
            .map(|retry_at| self.exceeded(category, retry_at - self.cooldown(category)))
    }

    /// Manual reset. Cancels the pending cooldown reset for the same key.
    pub fn reset(&self, user_id: u64, category: Category) {
        let mut timers = self.lock_timers();
        if let Some(pending) = timers.remove(&(user_id, category)) {
            pending.handle.abort();
        }
        self.tracker.reset(user_id, category);
    }

    pub fn pending_resets(&self) -> usize {
        self.lock_timers().len()
    }

    /// Caller holds the timer lock, so a manual reset cannot slip in between
    /// stamping the hit time and arming the timer.
    fn schedule_reset(
        &self,
        timers: &mut TimerMap,
        user_id: u64,
        category: Category,
        after: Duration,
    ) {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let gate = self.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            gate.fire_reset(user_id, category, generation);
        });
        let pending = PendingReset {
            generation,
            handle: task.abort_handle(),
        };
        if let Some(previous) = timers.insert((user_id, category), pending) {
            previous.handle.abort();
        }
    }

    fn fire_reset(&self, user_id: u64, category: Category, generation: u64) {
        let mut timers = self.lock_timers();
        let current = timers
            .get(&(user_id, category))
            .is_some_and(|pending| pending.generation == generation);
        if current {
            timers.remove(&(user_id, category));
            self.tracker.reset(user_id, category);
            info!(user_id, %category, "usage cooldown elapsed, count reset");
        }
    }
}

/// A reserved request slot. Commit on success; drop to give it back.
pub struct UsagePermit {
    gate: QuotaGate,
    user_id: u64,
    category: Category,
    armed: bool,
}

impl UsagePermit {
    pub fn category(&self) -> Category {
        self.category
    }

    pub fn commit(mut self) -> QuotaStatus {
        self.armed = false;
        let gate = &self.gate;
        let policy = gate.policy(self.category);
        let mut timers = gate.lock_timers();
        let used = gate.tracker.commit(self.user_id, self.category);

        let retry_at = if used >= policy.ceiling {
            let hit_at = gate.tracker.record_limit_hit_now(self.user_id, self.category);
            gate.schedule_reset(&mut timers, self.user_id, self.category, policy.cooldown);
            info!(
                user_id = self.user_id,
                category = %self.category,
                used,
                "usage ceiling reached"
            );
            Some(gate.retry_at(self.category, hit_at))
        } else {
            None
        };

        QuotaStatus {
            used,
            limit: policy.ceiling,
            retry_at,
        }
    }
}

impl Drop for UsagePermit {
    fn drop(&mut self) {
        if self.armed {
            self.gate.tracker.release(self.user_id, self.category);
        }
    }
}
