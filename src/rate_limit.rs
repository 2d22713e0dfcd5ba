//! Continuous token buckets keyed by client and rule.

use dashmap::DashMap;
use std::time::{Duration, Instant};

use crate::config::RateLimitRule;

// What the caller needs to build a 429 (or pacing headers on success)
#[derive(Debug, Clone)]
pub struct AdmissionDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u64,
    pub retry_after_secs: Option<u64>,
}

// Single-key bucket. Tokens grow with elapsed time, never above capacity,
// and only shrink on a successful consume.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: u32,
    tokens: f64,
    refill_rate: f64, // tokens per second
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(capacity: u32, refill_rate: f64) -> Self {
        Self {
            capacity,
            tokens: capacity as f64,
            refill_rate,
            last_refill: Instant::now(),
        }
    }

    pub fn for_rule(rule: &RateLimitRule) -> Self {
        Self::new(rule.capacity, rule.refill_rate())
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        if elapsed > 0.0 && self.refill_rate > 0.0 {
            self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity as f64);
        }
        self.last_refill = now;
    }

    // Refill and consume as one step; the caller must hold the bucket
    // exclusively for the whole call.
    pub fn try_consume(&mut self, cost: u32, now: Instant) -> AdmissionDecision {
        self.refill(now);
        let cost = cost as f64;

        if self.tokens >= cost {
            self.tokens -= cost;
            AdmissionDecision {
                allowed: true,
                limit: self.capacity,
                remaining: self.tokens as u64,
                retry_after_secs: None,
            }
        } else {
            let deficit = cost - self.tokens;
            let retry_after_secs = if self.refill_rate > 0.0 {
                Some((deficit / self.refill_rate).ceil() as u64)
            } else {
                None
            };
            AdmissionDecision {
                allowed: false,
                limit: self.capacity,
                remaining: 0,
                retry_after_secs,
            }
        }
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.duration_since(self.last_refill)
    }

    #[cfg(test)]
    pub fn available(&self) -> f64 {
        self.tokens
    }
}

// Keyed store of buckets. The DashMap entry guard keeps refill+consume
// atomic per key, so two concurrent callers can never both spend the last
// token, and or_insert_with guarantees a single bucket per key.
pub struct BucketRegistry {
    buckets: DashMap<String, TokenBucket>,
    idle_ttl: Duration,
}

impl BucketRegistry {
    pub fn new(idle_ttl: Duration) -> Self {
        Self {
            buckets: DashMap::new(),
            idle_ttl,
        }
    }

    pub fn try_consume(&self, key: &str, rule: &RateLimitRule) -> AdmissionDecision {
        let mut bucket = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| TokenBucket::for_rule(rule));
        bucket.try_consume(1, Instant::now())
    }

    // Drop buckets nobody has touched for idle_ttl; returns how many went
    pub fn evict_idle(&self) -> usize {
        let now = Instant::now();
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| bucket.idle_for(now) <= self.idle_ttl);
        before - self.buckets.len()
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}
