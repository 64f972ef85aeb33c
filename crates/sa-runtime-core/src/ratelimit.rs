//! Outbound Rate Limiter (C6, §4.6): sliding-window counters keyed by
//! `(channel, chat_id)`, with strict/lenient modes and the aggressive-GC
//! defense against unbounded key growth described in §10.6, grounded in
//! `clawlet/rate_limit.py::RateLimiter`'s `MAX_ENTRIES` handling.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use sa_runtime_domain::config::RateLimitMode;

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(3600);

/// Outcome of [`OutboundRateLimiter::check`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CheckResult {
    pub allowed: bool,
    pub retry_after: Duration,
}

/// Snapshot counters for one `(channel, chat_id)` key (§10.6 `get_stats`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyStats {
    pub channel: String,
    pub chat_id: String,
    pub messages_last_minute: usize,
    pub messages_last_hour: usize,
}

/// Aggregate snapshot (§10.6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimiterStats {
    pub active_keys: usize,
    pub max_per_minute: u32,
    pub max_per_hour: u32,
}

struct Inner {
    timestamps: HashMap<(String, String), VecDeque<Instant>>,
}

/// Sliding-window limiter for outbound messages (§4.6).
pub struct OutboundRateLimiter {
    per_minute: u32,
    per_hour: u32,
    mode: RateLimitMode,
    max_tracked_keys: usize,
    inner: Mutex<Inner>,
}

impl OutboundRateLimiter {
    pub fn new(per_minute: u32, per_hour: u32, mode: RateLimitMode, max_tracked_keys: usize) -> Self {
        Self {
            per_minute,
            per_hour,
            mode,
            max_tracked_keys,
            inner: Mutex::new(Inner {
                timestamps: HashMap::new(),
            }),
        }
    }

    pub fn mode(&self) -> RateLimitMode {
        self.mode
    }

    /// Prune timestamps older than `HOUR` for `key`, in place.
    fn prune_key(deque: &mut VecDeque<Instant>, now: Instant) {
        while let Some(front) = deque.front() {
            if now.duration_since(*front) >= HOUR {
                deque.pop_front();
            } else {
                break;
            }
        }
    }

    /// Evict keys whose most recent timestamp is older than `2 * HOUR`
    /// (§4.6: "evicting entries whose most recent timestamp is older than
    /// twice the longest window"), then drop any now-empty keys.
    fn aggressive_gc(inner: &mut Inner, now: Instant) {
        inner.timestamps.retain(|_, deque| {
            Self::prune_key(deque, now);
            match deque.back() {
                Some(newest) => now.duration_since(*newest) < 2 * HOUR,
                None => false,
            }
        });
    }

    /// Check whether an outbound message for `(channel, chat_id)` may be
    /// sent right now. Does not mutate state in a rejection path beyond
    /// the GC that rejection may trigger (§4.6).
    pub fn check(&self, channel: &str, chat_id: &str) -> CheckResult {
        let now = Instant::now();
        let key = (channel.to_string(), chat_id.to_string());
        let mut inner = self.inner.lock();

        if !inner.timestamps.contains_key(&key) && inner.timestamps.len() >= self.max_tracked_keys
        {
            tracing::warn!(
                tracked_keys = inner.timestamps.len(),
                "outbound rate limiter at tracked-key cap, running aggressive GC"
            );
            Self::aggressive_gc(&mut inner, now);
            if inner.timestamps.len() >= self.max_tracked_keys {
                tracing::error!(%channel, %chat_id, "rate limiter cannot accept new key: too many entries");
                return CheckResult {
                    allowed: false,
                    retry_after: MINUTE,
                };
            }
        }

        let deque = inner.timestamps.entry(key).or_default();
        Self::prune_key(deque, now);

        let minute_count = deque.iter().filter(|t| now.duration_since(**t) < MINUTE).count();
        if minute_count >= self.per_minute as usize {
            let oldest_in_minute = deque
                .iter()
                .find(|t| now.duration_since(**t) < MINUTE)
                .copied()
                .unwrap_or(now);
            let retry_after = (oldest_in_minute + MINUTE).saturating_duration_since(now);
            self.log_denial(channel, chat_id, "minute", minute_count, self.per_minute, retry_after);
            return CheckResult {
                allowed: false,
                retry_after,
            };
        }

        let hour_count = deque.len();
        if hour_count >= self.per_hour as usize {
            let oldest = deque.front().copied().unwrap_or(now);
            let retry_after = (oldest + HOUR).saturating_duration_since(now);
            self.log_denial(channel, chat_id, "hour", hour_count, self.per_hour, retry_after);
            return CheckResult {
                allowed: false,
                retry_after,
            };
        }

        deque.push_back(now);
        CheckResult {
            allowed: true,
            retry_after: Duration::ZERO,
        }
    }

    fn log_denial(&self, channel: &str, chat_id: &str, window: &str, count: usize, max: u32, retry_after: Duration) {
        match self.mode {
            RateLimitMode::Strict => tracing::warn!(
                %channel, %chat_id, window, count, max, retry_after_s = retry_after.as_secs_f64(),
                "outbound rate limit exceeded (strict mode)"
            ),
            RateLimitMode::Lenient => tracing::warn!(
                %channel, %chat_id, window, count, max,
                "outbound rate limit exceeded, allowing anyway (lenient mode)"
            ),
        }
    }

    pub fn stats_for(&self, channel: &str, chat_id: &str) -> KeyStats {
        let now = Instant::now();
        let inner = self.inner.lock();
        let key = (channel.to_string(), chat_id.to_string());
        let (minute, hour) = match inner.timestamps.get(&key) {
            Some(deque) => (
                deque.iter().filter(|t| now.duration_since(**t) < MINUTE).count(),
                deque.len(),
            ),
            None => (0, 0),
        };
        KeyStats {
            channel: channel.to_string(),
            chat_id: chat_id.to_string(),
            messages_last_minute: minute,
            messages_last_hour: hour,
        }
    }

    pub fn stats(&self) -> LimiterStats {
        let inner = self.inner.lock();
        LimiterStats {
            active_keys: inner.timestamps.len(),
            max_per_minute: self.per_minute,
            max_per_hour: self.per_hour,
        }
    }

    /// Reset a specific key, or every tracked key when `key` is `None`
    /// (§10.6, useful for test isolation between scenarios).
    pub fn reset(&self, key: Option<(&str, &str)>) {
        let mut inner = self.inner.lock();
        match key {
            Some((channel, chat_id)) => {
                inner.timestamps.remove(&(channel.to_string(), chat_id.to_string()));
            }
            None => inner.timestamps.clear(),
        }
    }
}
