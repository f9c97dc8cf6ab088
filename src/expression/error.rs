use serde_json::Value;
use thiserror::Error;

/// Errors raised while compiling expression source text.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("invalid expression `{source_text}`: {message}")]
    Syntax {
        source_text: String,
        message: String,
    },

    #[error("invalid number literal `{0}`")]
    InvalidNumber(String),

    #[error("unknown function `{0}`")]
    UnknownFunction(String),
}

/// Errors raised while evaluating a compiled expression against a scope.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvaluationError {
    #[error("type mismatch in `{operation}`: expected {expected}, found {found}")]
    TypeMismatch {
        operation: String,
        expected: String,
        found: Value,
    },

    #[error("division by zero")]
    DivisionByZero,

    #[error("integer overflow in `{0}`")]
    Overflow(String),

    #[error("unknown function `{0}`")]
    UnknownFunction(String),

    #[error("function `{function}` expects {expected} argument(s), got {found}")]
    Arity {
        function: String,
        expected: usize,
        found: usize,
    },

    #[error("expression has a nil value")]
    NilCondition,

    #[error("expression has a non-bool value: {0}")]
    NonBooleanCondition(Value),
}

impl EvaluationError {
    pub(crate) fn mismatch(operation: &str, expected: &str, found: &Value) -> Self {
        EvaluationError::TypeMismatch {
            operation: operation.to_string(),
            expected: expected.to_string(),
            found: found.clone(),
        }
    }
}
