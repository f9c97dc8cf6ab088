// Microgateway Engine
// Compiles route definitions and executes them per request

//! # Engine Module
//!
//! The engine is the layer between the route models and a running request.
//!
//! ## Components
//!
//! ### Compilation (`compiler`, `definition`, `registry`)
//! - Parses every expression in a [`RouteDefinition`](crate::models::RouteDefinition)
//! - Evaluates service settings and resolves service references
//! - Produces an immutable [`Definition`] shared between requests
//!
//! ### Execution (`scope`, `executor`, `responses`, `orchestrator`)
//! - Builds the per-request scope
//! - Runs steps in order under their guard and halt conditions
//! - Selects the first matching response
//!
//! ### Services (`adapter`, `coerce`)
//! - The [`Service`] trait and the [`InvocationContext`] a service sees
//! - Loose value conversions for service inputs
//!
//! ### Actions (`action`)
//! - A compiled route plus its settings, run with a fresh request id

/// Per-request scope shared by steps and response selection
pub mod scope;

/// Dot-path expansion of mapping results
pub mod paths;

/// Loose conversions for service inputs
pub mod coerce;

/// Service, execution and compile errors
pub mod error;

/// Service trait, invocation context and host signals
pub mod adapter;

/// Named service factories
pub mod registry;

/// Compiled definition types
pub mod definition;

/// RouteDefinition to Definition compiler
pub mod compiler;

/// Step state machine
pub mod executor;

/// First-match response selection
pub mod responses;

/// Per-request execution, sync or detached
pub mod orchestrator;

/// Reusable compiled routes
pub mod action;

pub use action::{Action, ActionSettings};
pub use adapter::{FnService, Host, InvocationContext, Service};
pub use compiler::{compile, Compiler};
pub use definition::{BoundService, Definition, Response, ResponseData, Step};
pub use error::{CompileError, ExecutionError, ServiceError};
pub use executor::{execute_steps, StepOutcome};
pub use orchestrator::{execute, Orchestrator};
pub use registry::ServiceRegistry;
pub use responses::{select_response, Reply};
pub use scope::{Scope, SharedScope};
