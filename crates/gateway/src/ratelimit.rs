// Per-user sliding-window rate limiting.
//
// Counters live behind `RateCounterStore`: the `Memory` variant is correct
// for a single gateway process only. Multi-instance deployments need a
// shared counter store slotted in here, otherwise each instance enforces its
// own limit for the same user.
//
// Lock discipline: sample lists use a `std::sync::Mutex` held only for
// short, non-awaiting critical sections (same as the metrics collector).

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use tracing::debug;
use uuid::Uuid;

/// How often the opportunistic housekeeping sweep runs.
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    Limited,
}

impl RateDecision {
    pub fn is_limited(self) -> bool {
        matches!(self, Self::Limited)
    }
}

/// One recorded admission: timestamp plus a count, summed over the window.
#[derive(Debug, Clone, Copy)]
pub struct Sample {
    at: Instant,
    count: u32,
}

/// Counter storage seam. `Memory` is the single-process implementation; a
/// shared-cache variant belongs here for horizontal scaling.
#[derive(Debug, Clone)]
pub enum RateCounterStore {
    Memory(Arc<Mutex<HashMap<Uuid, Vec<Sample>>>>),
}

impl RateCounterStore {
    pub fn memory() -> Self {
        Self::Memory(Arc::new(Mutex::new(HashMap::new())))
    }
}

pub struct RateLimiter {
    store: RateCounterStore,
    max_messages: u32,
    window: Duration,
    last_cleanup: Mutex<Instant>,
}

impl RateLimiter {
    pub fn new(store: RateCounterStore, max_messages: u32, window: Duration) -> Self {
        Self { store, max_messages, window, last_cleanup: Mutex::new(Instant::now()) }
    }

    /// Check and record one message for `user_id`.
    ///
    /// Prunes samples older than the window, then compares the in-window sum
    /// against the limit. A rejected message is NOT recorded, so a client
    /// hammering the limit does not extend its own denial.
    pub fn check(&self, user_id: Uuid) -> RateDecision {
        self.check_at(user_id, Instant::now())
    }

    pub(crate) fn check_at(&self, user_id: Uuid, now: Instant) -> RateDecision {
        self.maybe_sweep(now);

        let RateCounterStore::Memory(users) = &self.store;
        let mut guard = users.lock().expect("rate counter lock poisoned");
        let samples = guard.entry(user_id).or_default();

        prune(samples, now, self.window);

        let in_window: u32 = samples.iter().map(|sample| sample.count).sum();
        if in_window >= self.max_messages {
            debug!(user_id = %user_id, in_window, limit = self.max_messages, "rate limited");
            return RateDecision::Limited;
        }

        samples.push(Sample { at: now, count: 1 });
        RateDecision::Allowed
    }

    /// Opportunistic housekeeping: every `CLEANUP_INTERVAL`, prune all
    /// users' histories and drop users with no in-window samples, bounding
    /// memory for idle users. Triggered from the check path, no timer task.
    fn maybe_sweep(&self, now: Instant) {
        {
            let mut last = self.last_cleanup.lock().expect("cleanup clock lock poisoned");
            if now.saturating_duration_since(*last) < CLEANUP_INTERVAL {
                return;
            }
            *last = now;
        }

        let RateCounterStore::Memory(users) = &self.store;
        let mut guard = users.lock().expect("rate counter lock poisoned");
        guard.retain(|_, samples| {
            prune(samples, now, self.window);
            !samples.is_empty()
        });
    }

    /// Number of users with tracked histories.
    pub fn tracked_users(&self) -> usize {
        let RateCounterStore::Memory(users) = &self.store;
        users.lock().expect("rate counter lock poisoned").len()
    }
}

fn prune(samples: &mut Vec<Sample>, now: Instant, window: Duration) {
    samples.retain(|sample| now.saturating_duration_since(sample.at) < window);
}
