// Error types for service invocation, route execution and compilation

use serde_json::{json, Value};
use thiserror::Error;

use crate::expression::{EvaluationError, ParseError};

/// Errors a service reports from an invocation.
///
/// When stored in the scope the error becomes a JSON object
/// (`{"kind": ..., "message": ...}`), which is what expressions such as
/// `error.isneterror($.Backend.error)` inspect.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServiceError {
    /// Transport level failure talking to a downstream system
    #[error("network error: {message}")]
    Network { message: String, timeout: bool },

    /// An input was missing or could not be coerced to the expected type
    #[error("invalid input `{name}`: {reason}")]
    InvalidInput { name: String, reason: String },

    /// The service refuses to run, e.g. a tripped circuit breaker
    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("{0}")]
    Failed(String),
}

impl ServiceError {
    pub fn network(message: impl Into<String>) -> Self {
        ServiceError::Network {
            message: message.into(),
            timeout: false,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        ServiceError::Failed(message.into())
    }

    pub fn invalid_input(name: &str, reason: impl Into<String>) -> Self {
        ServiceError::InvalidInput {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::Network { .. } => "network",
            ServiceError::InvalidInput { .. } => "input",
            ServiceError::Unavailable(_) => "unavailable",
            ServiceError::Failed(_) => "failed",
        }
    }

    /// Scope representation of the error.
    pub fn to_value(&self) -> Value {
        let mut value = json!({
            "kind": self.kind(),
            "message": self.to_string(),
        });
        if let ServiceError::Network { timeout, .. } = self {
            value["timeout"] = Value::Bool(*timeout);
        }
        value
    }
}

/// Errors that end a route execution or fail response production.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutionError {
    /// A step's halt condition evaluated to true
    #[error("execution halted with expression: {expression}")]
    Halted { expression: String },

    /// A service failed and its step declared no halt condition
    #[error("service `{service}` failed: {source}")]
    Service {
        service: String,
        #[source]
        source: ServiceError,
    },

    /// An input or output mapping could not be evaluated
    #[error("mapping `{name}` could not be evaluated: {source}")]
    Mapping {
        name: String,
        #[source]
        source: EvaluationError,
    },

    #[error("cannot extract data from response output")]
    DataExtraction,
}

impl ExecutionError {
    /// The service error behind a failed step, if any.
    pub fn service_error(&self) -> Option<&ServiceError> {
        match self {
            ExecutionError::Service { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Errors raised while compiling a route definition.
#[derive(Error, Debug)]
pub enum CompileError {
    #[error("duplicate service name: {0}")]
    DuplicateService(String),

    #[error("service not found: {0}")]
    ServiceNotFound(String),

    #[error("can't find service ref `{reference}` for service `{service}`")]
    UnknownReference { service: String, reference: String },

    #[error("no ref or handler for service: {0}")]
    MissingReference(String),

    #[error("invalid expression for `{location}`: {source}")]
    Expression {
        location: String,
        #[source]
        source: ParseError,
    },

    #[error("setting `{setting}` of service `{service}` could not be evaluated: {source}")]
    Setting {
        service: String,
        setting: String,
        #[source]
        source: EvaluationError,
    },

    #[error("service `{service}` could not be created: {source}")]
    Factory {
        service: String,
        #[source]
        source: ServiceError,
    },

}
