//! # Rate Limiting
//!
//! Fixed-window counters keyed by client and rule name.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRule {
    pub name: String,
    pub max_requests: u32,
    pub window_secs: u64,
}

impl RateLimitRule {
    pub fn new(name: impl Into<String>, max_requests: u32, window_secs: u64) -> Self {
        Self {
            name: name.into(),
            max_requests,
            window_secs,
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Time until the current window closes
    pub reset_after: Duration,
}

impl RateLimitDecision {
    /// Whole seconds until reset, rounded up
    pub fn reset_after_secs(&self) -> u64 {
        let secs = self.reset_after.as_secs();
        if self.reset_after.subsec_nanos() > 0 {
            secs + 1
        } else {
            secs
        }
    }
}

#[derive(Debug, Clone)]
struct Window {
    count: u32,
    started: Instant,
}

#[derive(Default)]
pub struct RateLimiter {
    windows: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a request from `client` against `rule`
    pub fn check(&self, client: &str, rule: &RateLimitRule) -> RateLimitDecision {
        self.check_at(client, rule, Instant::now())
    }

    fn check_at(&self, client: &str, rule: &RateLimitRule, now: Instant) -> RateLimitDecision {
        let key = format!("{}:{}", rule.name, client);
        let window_len = rule.window();

        // A poisoned map only loses counters
        let mut windows = match self.windows.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let window = windows.entry(key).or_insert(Window { count: 0, started: now });

        if now.duration_since(window.started) >= window_len {
            window.count = 0;
            window.started = now;
        }

        let allowed = window.count < rule.max_requests;
        if allowed {
            window.count += 1;
        }

        RateLimitDecision {
            allowed,
            limit: rule.max_requests,
            remaining: rule.max_requests.saturating_sub(window.count),
            reset_after: window_len.saturating_sub(now.duration_since(window.started)),
        }
    }

    /// Drop windows older than `max_window`
    pub fn purge_expired(&self, max_window: Duration) -> usize {
        let mut windows = match self.windows.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let before = windows.len();
        let now = Instant::now();
        windows.retain(|_, w| now.duration_since(w.started) < max_window);
        before - windows.len()
    }
}
