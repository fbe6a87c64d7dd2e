//! TTL-wrapped response cache entries.
//!
//! # Design
//! The core never touches storage itself: it computes a key, asks the
//! implementer for the stored entry and decides freshness on read. An entry
//! written with a TTL is never revalidated on write; the next read simply sees
//! an expiry in the past and goes back to the network.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::hash::string_hash_code;
use crate::http::HttpMethod;
use crate::result::RequestApiResult;

const CACHE_KEY_PREFIX: &str = "RequestCache";

/// Per-call cache policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestCacheConfig {
    /// How long a stored response stays usable.
    pub cache_time: Duration,
    pub cache_enable: bool,
}

impl RequestCacheConfig {
    pub fn enabled(cache_time: Duration) -> Self {
        Self {
            cache_time,
            cache_enable: true,
        }
    }

    /// Zero unless caching is enabled with a positive duration.
    pub fn effective_ttl(&self) -> Duration {
        if self.cache_enable {
            self.cache_time
        } else {
            Duration::ZERO
        }
    }
}

/// A stored response together with its absolute expiry (epoch millis).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestCacheStorage {
    pub time: i64,
    pub data: RequestApiResult,
}

impl RequestCacheStorage {
    pub fn new(now: i64, ttl: Duration, data: RequestApiResult) -> Self {
        let ttl = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        Self {
            time: now.saturating_add(ttl),
            data,
        }
    }

    /// Usable only while the expiry lies strictly in the future.
    pub fn is_fresh(&self, now: i64) -> bool {
        self.time > now
    }
}

/// Storage key for a `(url, method)` pair.
pub fn cache_key(url: &str, method: HttpMethod) -> String {
    format!("{CACHE_KEY_PREFIX}{}", string_hash_code(&format!("{url}{method}"), true))
}

/// Source of the current time in epoch milliseconds.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Clock that only moves when told to, for deterministic expiry in tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start: i64) -> Self {
        Self {
            now: AtomicI64::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let by = i64::try_from(by.as_millis()).unwrap_or(i64::MAX);
        self.now.fetch_add(by, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}
