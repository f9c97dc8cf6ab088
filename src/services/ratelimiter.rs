// Rate limiter service - per-token token buckets

//! Limits are written as `<count>-<period>` where the period is one of
//! `S` (second), `M` (minute), `H` (hour) or `D` (day): `"5-S"` allows five
//! requests per second for each distinct token.
//!
//! Inputs: `token`. Outputs: `limitReached`, `limitAvailable`, `error`,
//! `errorMessage`. A missing token is reported through the outputs rather
//! than as a service error, so routes can answer it with a normal response.
//!
//! Buckets idle for a whole period are equivalent to fresh ones and are
//! swept every [`SWEEP_EVERY`] new tokens.

use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::debug;

use crate::engine::{InvocationContext, Service, ServiceError};

pub const REFERENCE: &str = "ratelimiter";

/// Number of newly tracked tokens between two sweeps of idle buckets.
pub const SWEEP_EVERY: usize = 1024;

/// A request budget per period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limit {
    pub max_requests: u32,
    pub period: Duration,
}

impl FromStr for Limit {
    type Err = ServiceError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || ServiceError::invalid_input("limit", format!("invalid limit format: {}", value));

        let (count, period) = value.trim().split_once('-').ok_or_else(invalid)?;
        let max_requests = count.trim().parse::<u32>().map_err(|_| invalid())?;
        let period = match period.trim().to_ascii_uppercase().as_str() {
            "S" => Duration::from_secs(1),
            "M" => Duration::from_secs(60),
            "H" => Duration::from_secs(60 * 60),
            "D" => Duration::from_secs(24 * 60 * 60),
            _ => return Err(invalid()),
        };

        Ok(Self {
            max_requests,
            period,
        })
    }
}

#[derive(Debug)]
struct TokenBucket {
    tokens: u32,
    max_tokens: u32,
    refill_interval: Duration,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(limit: Limit, now: Instant) -> Self {
        Self {
            tokens: limit.max_requests,
            max_tokens: limit.max_requests,
            refill_interval: limit.period,
            last_refill: now,
        }
    }

    fn try_acquire(&mut self, now: Instant) -> bool {
        self.refill(now);
        if self.tokens > 0 {
            self.tokens -= 1;
            true
        } else {
            false
        }
    }

    fn refill(&mut self, now: Instant) {
        if self.is_idle(now) {
            self.tokens = self.max_tokens;
            self.last_refill = now;
        }
    }

    /// A full period has passed since the last refill.
    fn is_idle(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_refill) >= self.refill_interval
    }
}

#[derive(Debug, Deserialize)]
struct Settings {
    limit: String,
}

#[derive(Debug, Deserialize)]
struct Input {
    #[serde(default)]
    token: Value,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct Output {
    limit_reached: bool,
    limit_available: u32,
    error: bool,
    error_message: String,
}

pub struct RateLimiter {
    limit: Limit,
    buckets: DashMap<String, Arc<Mutex<TokenBucket>>>,
    inserts: AtomicUsize,
}

impl RateLimiter {
    pub fn new(limit: Limit) -> Self {
        Self {
            limit,
            buckets: DashMap::new(),
            inserts: AtomicUsize::new(0),
        }
    }

    pub fn from_settings(name: &str, settings: &Map<String, Value>) -> Result<Self, ServiceError> {
        let settings: Settings = serde_json::from_value(Value::Object(settings.clone()))
            .map_err(|e| ServiceError::invalid_input(name, e.to_string()))?;
        let limit = settings.limit.parse()?;
        debug!("Rate limiter {} allows {:?}", name, limit);
        Ok(Self::new(limit))
    }

    pub fn limit(&self) -> Limit {
        self.limit
    }

    /// Drop buckets that have been idle for a full period, returning how
    /// many were removed. Buckets in use are kept.
    pub fn cleanup_expired_buckets(&self, now: Instant) -> usize {
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| match bucket.try_lock() {
            Ok(bucket) => !bucket.is_idle(now),
            Err(_) => true,
        });
        let removed = before.saturating_sub(self.buckets.len());
        if removed > 0 {
            debug!("Removed {} idle rate limiter buckets", removed);
        }
        removed
    }

    fn bucket(&self, token: &str, now: Instant) -> Arc<Mutex<TokenBucket>> {
        if let Some(bucket) = self.buckets.get(token) {
            return bucket.value().clone();
        }

        if self.inserts.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY == SWEEP_EVERY - 1 {
            self.cleanup_expired_buckets(now);
        }

        self.buckets
            .entry(token.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(TokenBucket::new(self.limit, now))))
            .value()
            .clone()
    }

    /// Consume one request for `token`, returning whether it was allowed and
    /// how many requests remain in the current period.
    async fn consume(&self, token: &str, now: Instant) -> (bool, u32) {
        let bucket = self.bucket(token, now);
        let mut bucket = bucket.lock().await;
        let allowed = bucket.try_acquire(now);
        (allowed, bucket.tokens)
    }
}

#[async_trait]
impl Service for RateLimiter {
    async fn invoke(&self, ctx: &mut InvocationContext) -> Result<bool, ServiceError> {
        let input: Input = ctx.get_input_object()?;
        let token = crate::engine::coerce::to_string(&input.token);

        let mut output = Output::default();
        if token.is_empty() {
            output.error = true;
            output.error_message = "Token not found".to_string();
        } else {
            let (allowed, available) = self.consume(&token, Instant::now()).await;
            output.limit_reached = !allowed;
            output.limit_available = available;
        }

        ctx.set_output_object(&output)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context(token: Value) -> InvocationContext {
        let mut inputs = Map::new();
        inputs.insert("token".to_string(), token);
        InvocationContext::new("limiter", inputs)
    }

    #[test]
    fn test_parse_limit() {
        assert_eq!(
            "5-S".parse::<Limit>().unwrap(),
            Limit {
                max_requests: 5,
                period: Duration::from_secs(1)
            }
        );
        assert_eq!("10-h".parse::<Limit>().unwrap().period, Duration::from_secs(3600));
        assert!("5".parse::<Limit>().is_err());
        assert!("x-S".parse::<Limit>().is_err());
        assert!("5-W".parse::<Limit>().is_err());
    }

    #[test]
    fn test_missing_limit_setting() {
        assert!(RateLimiter::from_settings("limiter", &Map::new()).is_err());
    }

    #[tokio::test]
    async fn test_limit_reached_per_token() {
        let limiter = RateLimiter::new("2-M".parse().unwrap());

        for expected_available in [1, 0] {
            let mut ctx = context(json!("alice"));
            assert!(limiter.invoke(&mut ctx).await.unwrap());
            assert_eq!(ctx.outputs()["limitReached"], json!(false));
            assert_eq!(ctx.outputs()["limitAvailable"], json!(expected_available));
        }

        let mut ctx = context(json!("alice"));
        limiter.invoke(&mut ctx).await.unwrap();
        assert_eq!(ctx.outputs()["limitReached"], json!(true));

        let mut ctx = context(json!("bob"));
        limiter.invoke(&mut ctx).await.unwrap();
        assert_eq!(ctx.outputs()["limitReached"], json!(false));
    }

    #[tokio::test]
    async fn test_bucket_refills_after_period() {
        let limiter = RateLimiter::new("1-S".parse().unwrap());
        let start = Instant::now();

        assert_eq!(limiter.consume("t", start).await, (true, 0));
        assert_eq!(limiter.consume("t", start + Duration::from_millis(500)).await, (false, 0));
        assert_eq!(limiter.consume("t", start + Duration::from_secs(1)).await, (true, 0));
    }

    #[tokio::test]
    async fn test_idle_buckets_are_removed() {
        let limiter = RateLimiter::new("1-S".parse().unwrap());
        let start = Instant::now();

        limiter.consume("alice", start).await;
        limiter.consume("bob", start + Duration::from_millis(600)).await;
        assert_eq!(limiter.buckets.len(), 2);

        assert_eq!(limiter.cleanup_expired_buckets(start + Duration::from_secs(1)), 1);
        assert!(limiter.buckets.contains_key("bob"));
        assert!(!limiter.buckets.contains_key("alice"));
    }

    #[tokio::test]
    async fn test_new_tokens_trigger_sweep() {
        let limiter = RateLimiter::new("1-S".parse().unwrap());
        let start = Instant::now();

        for i in 0..SWEEP_EVERY - 1 {
            limiter.consume(&format!("token-{}", i), start).await;
        }
        assert_eq!(limiter.buckets.len(), SWEEP_EVERY - 1);

        let later = start + Duration::from_secs(2);
        assert_eq!(limiter.consume("fresh", later).await, (true, 0));
        assert_eq!(limiter.buckets.len(), 1);
        assert!(limiter.buckets.contains_key("fresh"));
    }

    #[tokio::test]
    async fn test_missing_token_reported_in_outputs() {
        let limiter = RateLimiter::new("1-S".parse().unwrap());
        let mut ctx = InvocationContext::new("limiter", Map::new());

        assert!(limiter.invoke(&mut ctx).await.unwrap());
        assert_eq!(ctx.outputs()["error"], json!(true));
        assert_eq!(ctx.outputs()["errorMessage"], json!("Token not found"));
        assert_eq!(ctx.outputs()["limitReached"], json!(false));
    }
}
