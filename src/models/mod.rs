// Route definition models
// Plain serde structures, independent of the engine

//! # Models Module
//!
//! The declarative form of a route. Models carry no behavior beyond
//! builder helpers; the engine compiles them before anything runs.

pub mod route;

pub use route::{
    OutputDefinition, ResponseDefinition, RouteDefinition, ServiceDefinition, StepDefinition,
};
