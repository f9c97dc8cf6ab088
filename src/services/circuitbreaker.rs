// Circuit breaker service

//! # Circuit Breaker
//!
//! A step invokes the breaker with an `operation` input:
//! - `counter`: record a failure, possibly tripping the breaker
//! - `reset`: record a success, closing the breaker once its timeout passed
//! - anything else: check the breaker; a tripped breaker fails the step
//!   with [`ServiceError::Unavailable`] and sets the `tripped` output
//!
//! Trip modes:
//! - `a`: `threshold` failures in a row
//! - `b`: `threshold` failures within `period`, successes in between
//!   notwithstanding
//! - `c`: `threshold` failures in a row, all within `period`
//!
//! `period` and `timeout` are seconds. A tripped breaker ignores further
//! counters until `timeout` has elapsed.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::engine::{InvocationContext, Service, ServiceError};

pub const REFERENCE: &str = "circuitbreaker";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    A,
    B,
    C,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    pub mode: Mode,
    pub threshold: usize,
    pub period: u64,
    pub timeout: u64,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            mode: Mode::A,
            threshold: 5,
            period: 60,
            timeout: 60,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Input {
    #[serde(default)]
    operation: String,
}

#[derive(Debug, Serialize)]
struct Output {
    tripped: bool,
}

/// Failure history. `stamps` is a ring buffer of the last `threshold`
/// recorded operations; `index` points at the oldest.
#[derive(Debug)]
struct BreakerState {
    counter: usize,
    processed: u64,
    open_until: Option<Instant>,
    index: usize,
    stamps: Vec<Option<Instant>>,
    tripped: bool,
}

impl BreakerState {
    fn new(threshold: usize) -> Self {
        Self {
            counter: 0,
            processed: 0,
            open_until: None,
            index: 0,
            stamps: vec![None; threshold],
            tripped: false,
        }
    }

    fn is_open(&self, now: Instant) -> bool {
        self.open_until.map_or(false, |until| until > now)
    }

    fn add_record(&mut self, now: Instant) {
        self.processed += 1;
        self.stamps[self.index] = Some(now);
        self.index = (self.index + 1) % self.stamps.len();
    }

    fn oldest_within(&self, now: Instant, period: Duration) -> bool {
        self.stamps[self.index].map_or(false, |stamp| now.saturating_duration_since(stamp) < period)
    }

    fn trip(&mut self, now: Instant, timeout: Duration) {
        self.open_until = now.checked_add(timeout);
        self.counter = 0;
        self.tripped = true;
    }
}

pub struct CircuitBreaker {
    settings: CircuitBreakerSettings,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(settings: CircuitBreakerSettings) -> Result<Self, ServiceError> {
        if settings.threshold == 0 {
            return Err(ServiceError::invalid_input("threshold", "must be at least 1"));
        }
        if Instant::now()
            .checked_add(Duration::from_secs(settings.timeout))
            .is_none()
        {
            return Err(ServiceError::invalid_input("timeout", "out of range"));
        }
        let state = Mutex::new(BreakerState::new(settings.threshold));
        Ok(Self { settings, state })
    }

    pub fn from_settings(name: &str, settings: &Map<String, Value>) -> Result<Self, ServiceError> {
        let settings: CircuitBreakerSettings = serde_json::from_value(Value::Object(settings.clone()))
            .map_err(|e| ServiceError::invalid_input(name, e.to_string()))?;
        debug!("Circuit breaker {} configured: {:?}", name, settings);
        Self::new(settings)
    }

    pub fn settings(&self) -> &CircuitBreakerSettings {
        &self.settings
    }

    /// Apply `operation` at `now`, returning whether calls are rejected.
    async fn apply(&self, operation: &str, now: Instant) -> bool {
        let period = Duration::from_secs(self.settings.period);
        let timeout = Duration::from_secs(self.settings.timeout);
        let threshold = self.settings.threshold;
        let mut state = self.state.lock().await;

        match operation {
            "counter" => {
                if state.is_open(now) {
                    return false;
                }
                state.counter += 1;
                state.add_record(now);
                if state.tripped {
                    state.trip(now, timeout);
                    warn!("Circuit breaker tripped again");
                    return false;
                }

                let full = state.processed >= threshold as u64;
                let trips = match self.settings.mode {
                    Mode::A => state.counter >= threshold,
                    Mode::B => full && state.oldest_within(now, period),
                    Mode::C => full && state.counter >= threshold && state.oldest_within(now, period),
                };
                if trips {
                    warn!("Circuit breaker tripped after {} failures", threshold);
                    state.trip(now, timeout);
                }
                false
            }
            "reset" => {
                if !state.is_open(now) {
                    state.counter = 0;
                    state.tripped = false;
                }
                false
            }
            _ => state.is_open(now),
        }
    }
}

#[async_trait]
impl Service for CircuitBreaker {
    async fn invoke(&self, ctx: &mut InvocationContext) -> Result<bool, ServiceError> {
        let input: Input = ctx.get_input_object()?;
        let tripped = self.apply(&input.operation, Instant::now()).await;

        ctx.set_output_object(&Output { tripped })?;
        if tripped {
            return Err(ServiceError::Unavailable("circuit breaker tripped".to_string()));
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn breaker(mode: Mode, threshold: usize) -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerSettings {
            mode,
            threshold,
            period: 10,
            timeout: 30,
        })
        .unwrap()
    }

    fn secs(start: Instant, offset: u64) -> Instant {
        start + Duration::from_secs(offset)
    }

    #[test]
    fn test_settings_defaults_and_validation() {
        let defaults = CircuitBreaker::from_settings("cb", &Map::new()).unwrap();
        assert_eq!(defaults.settings(), &CircuitBreakerSettings::default());

        let mut settings = Map::new();
        settings.insert("mode".to_string(), json!("d"));
        assert!(CircuitBreaker::from_settings("cb", &settings).is_err());

        settings.insert("mode".to_string(), json!("b"));
        settings.insert("threshold".to_string(), json!(0));
        assert!(CircuitBreaker::from_settings("cb", &settings).is_err());
    }

    #[test]
    fn test_out_of_range_timeout_rejected() {
        let mut settings = Map::new();
        settings.insert("timeout".to_string(), json!(u64::MAX));
        match CircuitBreaker::from_settings("cb", &settings) {
            Err(ServiceError::InvalidInput { name, .. }) => assert_eq!(name, "timeout"),
            Err(other) => panic!("unexpected error: {:?}", other),
            Ok(_) => panic!("timeout should be rejected"),
        }
    }

    #[tokio::test]
    async fn test_mode_a_trips_on_consecutive_failures() {
        let cb = breaker(Mode::A, 2);
        let start = Instant::now();

        cb.apply("counter", start).await;
        assert!(!cb.apply("check", start).await);
        cb.apply("counter", secs(start, 1)).await;
        assert!(cb.apply("check", secs(start, 2)).await);

        // reset is ignored while open, check passes once the timeout elapsed
        cb.apply("reset", secs(start, 5)).await;
        assert!(cb.apply("check", secs(start, 5)).await);
        assert!(!cb.apply("check", secs(start, 31)).await);
    }

    #[tokio::test]
    async fn test_mode_a_reset_clears_counter() {
        let cb = breaker(Mode::A, 2);
        let start = Instant::now();

        cb.apply("counter", start).await;
        cb.apply("reset", start).await;
        cb.apply("counter", start).await;
        assert!(!cb.apply("check", start).await);
    }

    #[tokio::test]
    async fn test_mode_b_needs_failures_within_period() {
        let cb = breaker(Mode::B, 2);
        let start = Instant::now();

        cb.apply("counter", start).await;
        cb.apply("counter", secs(start, 20)).await;
        assert!(!cb.apply("check", secs(start, 20)).await);

        cb.apply("counter", secs(start, 25)).await;
        assert!(cb.apply("check", secs(start, 25)).await);
    }

    #[tokio::test]
    async fn test_mode_c_needs_consecutive_failures_within_period() {
        let cb = breaker(Mode::C, 2);
        let start = Instant::now();

        cb.apply("counter", start).await;
        cb.apply("reset", secs(start, 1)).await;
        cb.apply("counter", secs(start, 2)).await;
        assert!(!cb.apply("check", secs(start, 2)).await);

        cb.apply("counter", secs(start, 3)).await;
        assert!(cb.apply("check", secs(start, 3)).await);
    }

    #[tokio::test]
    async fn test_tripped_breaker_fails_invocation() {
        let cb = breaker(Mode::A, 1);
        let mut ctx = InvocationContext::new("cb", {
            let mut inputs = Map::new();
            inputs.insert("operation".to_string(), json!("counter"));
            inputs
        });
        assert!(cb.invoke(&mut ctx).await.unwrap());
        assert_eq!(ctx.outputs()["tripped"], json!(false));

        let mut ctx = InvocationContext::new("cb", Map::new());
        let err = cb.invoke(&mut ctx).await.unwrap_err();
        assert_eq!(err.kind(), "unavailable");
        assert_eq!(ctx.outputs()["tripped"], json!(true));
    }
}
