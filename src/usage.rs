//! Per-user usage accounting
//!
//! Counts how many requests each user has made per resource category and when
//! they last hit their ceiling. The tracker only keeps books; the ceiling and
//! cooldown policy lives in [`crate::quota`].

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Resource class being rate-limited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Text,
    Image,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::Text => f.write_str("text"),
            Category::Image => f.write_str("image"),
        }
    }
}

type UsageKey = (u64, Category);

#[derive(Debug, Default, Clone)]
struct UsageRecord {
    count: u32,
    limit_hit_at: Option<DateTime<Utc>>,
    /// Requests that passed the quota check and are still waiting on upstream.
    in_flight: u32,
}

/// Outcome of [`UsageTracker::try_reserve`] when the user is out of quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exhausted {
    pub limit_hit_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
pub struct UsageTracker {
    records: Mutex<HashMap<UsageKey, UsageRecord>>,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<UsageKey, UsageRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn increment(&self, user_id: u64, category: Category) {
        let mut records = self.lock();
        records.entry((user_id, category)).or_default().count += 1;
    }

    /// Current count, 0 when the user has never been seen. Never creates a record.
    pub fn get_count(&self, user_id: u64, category: Category) -> u32 {
        self.lock()
            .get(&(user_id, category))
            .map_or(0, |record| record.count)
    }

    /// Zeroes the count and forgets the last limit hit. No-op for unknown users.
    pub fn reset(&self, user_id: u64, category: Category) {
        if let Some(record) = self.lock().get_mut(&(user_id, category)) {
            record.count = 0;
            record.limit_hit_at = None;
        }
    }

    pub fn record_limit_hit_now(&self, user_id: u64, category: Category) -> DateTime<Utc> {
        let now = Utc::now();
        self.lock().entry((user_id, category)).or_default().limit_hit_at = Some(now);
        now
    }

    pub fn get_limit_hit_at(&self, user_id: u64, category: Category) -> Option<DateTime<Utc>> {
        self.lock()
            .get(&(user_id, category))
            .and_then(|record| record.limit_hit_at)
    }

    /// Claims one slot below `ceiling` for a request about to go upstream.
    ///
    /// Outstanding reservations count against the ceiling, so two overlapping
    /// requests at `ceiling - 1` cannot both get through.
    pub fn try_reserve(
        &self,
        user_id: u64,
        category: Category,
        ceiling: u32,
    ) -> Result<(), Exhausted> {
        let mut records = self.lock();
        let record = records.entry((user_id, category)).or_default();
        if record.count.saturating_add(record.in_flight) >= ceiling {
            let limit_hit_at = record.limit_hit_at;
            // Don't leave an empty record behind for a refused request.
            if record.count == 0 && record.in_flight == 0 && limit_hit_at.is_none() {
                records.remove(&(user_id, category));
            }
            return Err(Exhausted { limit_hit_at });
        }
        record.in_flight += 1;
        Ok(())
    }

    /// Turns a reservation into a counted use and returns the new count.
    pub fn commit(&self, user_id: u64, category: Category) -> u32 {
        let mut records = self.lock();
        let record = records.entry((user_id, category)).or_default();
        record.in_flight = record.in_flight.saturating_sub(1);
        record.count += 1;
        record.count
    }

    /// Gives a reservation back without counting it.
    pub fn release(&self, user_id: u64, category: Category) {
        let mut records = self.lock();
        if let Some(record) = records.get_mut(&(user_id, category)) {
            record.in_flight = record.in_flight.saturating_sub(1);
            if record.count == 0 && record.in_flight == 0 && record.limit_hit_at.is_none() {
                records.remove(&(user_id, category));
            }
        }
    }

    /// Number of (user, category) records currently held.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
