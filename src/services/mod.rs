// Builtin services

//! # Builtin Services
//!
//! Services shipped with the gateway and registered by
//! [`ServiceRegistry::with_builtin_services`]:
//!
//! - `ratelimiter`: per-token request limits (`"5-S"`, `"100-M"`, ...)
//! - `circuitbreaker`: trips after repeated failures and rejects calls
//!   until its timeout expires
//!
//! Each declaration of a builtin in a route gets its own instance, so two
//! rate limiters in one route keep separate counters.

use std::sync::Arc;

use crate::engine::{Service, ServiceRegistry};

pub mod circuitbreaker;
pub mod ratelimiter;

pub use circuitbreaker::CircuitBreaker;
pub use ratelimiter::RateLimiter;

pub fn register_builtins(registry: &mut ServiceRegistry) {
    registry.register_factory(ratelimiter::REFERENCE, |name, settings| {
        let service: Arc<dyn Service> = Arc::new(RateLimiter::from_settings(name, settings)?);
        Ok(service)
    });
    registry.register_factory(circuitbreaker::REFERENCE, |name, settings| {
        let service: Arc<dyn Service> = Arc::new(CircuitBreaker::from_settings(name, settings)?);
        Ok(service)
    });
}
