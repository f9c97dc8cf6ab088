// Microgateway - declarative request routing
// Steps invoke services under guard and halt conditions, then the first
// matching response shapes the reply

//! # Microgateway Library
//!
//! A route is declared as data: a list of **services**, the **steps** that
//! invoke them, and the **responses** that turn the results into a reply.
//! This file is the **library root** and defines the public API.
//!
//! ## Core Components
//!
//! ### Route Definitions
//! - [`RouteDefinition`]: the serde form of a route, usually loaded from JSON
//! - [`Definition`]: the compiled, executable form produced by [`Compiler`]
//!
//! ### Execution
//! - [`Orchestrator`] / [`execute`]: run a compiled route for one request
//! - [`Action`]: a route compiled once and run per request with its own id
//! - [`Reply`]: status code, data and the route error (if any)
//!
//! ### Services
//! - [`Service`]: the `#[async_trait]` interface a step invokes
//! - [`ServiceRegistry`]: resolves service `ref`s when a route is compiled
//! - [`services`]: the builtin `ratelimiter` and `circuitbreaker`
//!
//! ### Expressions
//! Values in a definition that start with `=` are expressions evaluated
//! against the request scope (`$.payload`, `$.env`, `$.conf`, `$.async` and
//! one entry per executed service):
//!
//! ```rust
//! use microgateway::{Action, GatewayConfig, RouteDefinition, ServiceRegistry};
//!
//! let mut route = RouteDefinition::new("Limited");
//! route.new_service("Limiter", "ratelimiter").add_setting("limit", "5-S");
//! route.new_step("Limiter").add_input("token", "=$.payload.token");
//! route
//!     .new_response(true)
//!     .set_if("$.Limiter.outputs.limitReached == true")
//!     .set_code(429)
//!     .set_data("too many requests");
//! route.new_response(false).set_code(200).set_data("=$.payload");
//!
//! let registry = ServiceRegistry::with_builtin_services();
//! let action = Action::new("limited", route.into(), &registry, GatewayConfig::default());
//! assert!(action.is_ok());
//! ```
//!
//! ## Rust Learning Notes:
//!
//! ### Re-exports
//! `pub use` statements create shortcuts so users don't need to know the
//! internal module structure. Instead of
//! `use microgateway::engine::action::Action`, users can write
//! `use microgateway::Action`.

// Route definition models (serde structures)
pub mod models;

// Compiler, executor, response selection and orchestration
pub mod engine;

// Expression language evaluated against the request scope
pub mod expression;

// Builtin services
pub mod services;

// Environment driven configuration
pub mod config;

pub use config::GatewayConfig;

pub use models::{
    OutputDefinition, ResponseDefinition, RouteDefinition, ServiceDefinition, StepDefinition,
};

pub use engine::{
    execute, Action, ActionSettings, CompileError, Compiler, Definition, ExecutionError, FnService,
    Host, InvocationContext, Orchestrator, Reply, Scope, Service, ServiceError, ServiceRegistry,
};

pub use expression::{EvaluationError, Expression, FunctionRegistry, ParseError};

// Core error types
// Using the `thiserror` crate to make error handling easier
use thiserror::Error;

/// Crate level errors
///
/// Each layer has its own error enum; this one wraps them so callers that
/// do not care about the layer can use a single `Result`.
///
/// ## Rust Learning Notes:
///
/// ### The `thiserror` Crate
/// - `#[derive(Error)]` implements the `std::error::Error` trait
/// - `#[error("...")]` provides human-readable error messages
/// - `#[from]` enables automatic conversion with the `?` operator
#[derive(Error, Debug)]
pub enum GatewayError {
    /// A route definition could not be compiled
    #[error("Compile error: {0}")]
    Compile(#[from] CompileError),

    /// A route produced no reply
    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    /// A route definition or settings document is not valid JSON
    #[error("Definition error: {0}")]
    Definition(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Type alias for Results that use the crate error type
pub type Result<T> = std::result::Result<T, GatewayError>;
