// Route expression language

//! # Expressions
//!
//! Conditions, halt conditions, step inputs and response outputs are all
//! expressions. In a definition a string value beginning with `=` is compiled
//! from the remainder; any other value is kept as a literal constant:
//!
//! ```text
//! "message": "=$.payload.text"       -> compiled, evaluated per request
//! "message": "hello"                 -> literal "hello"
//! "if": "$.payload.kind == 'order'"  -> conditions are always compiled
//! ```
//!
//! The module is independent of the executor: an [`Expression`] is evaluated
//! against any JSON object acting as the scope root, with a
//! [`FunctionRegistry`] providing callable functions.

pub mod ast;
pub mod error;
pub mod eval;
pub mod functions;
pub mod parser;

use std::fmt;

use serde_json::Value;

pub use ast::Expr;
pub use error::{EvaluationError, ParseError};
pub use functions::FunctionRegistry;

/// Prefix marking a definition value as an expression.
pub const EXPRESSION_PREFIX: char = '=';

#[derive(Debug, Clone, PartialEq)]
enum Body {
    Literal(Value),
    Compiled(Expr),
}

/// A named, compiled expression together with its source text.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    name: String,
    source: String,
    body: Body,
}

impl Expression {
    /// Compile `source` as expression text (no `=` prefix expected).
    ///
    /// Every function the expression calls must already be registered.
    pub fn compile(
        name: &str,
        source: &str,
        functions: &FunctionRegistry,
    ) -> Result<Self, ParseError> {
        let expr = parser::parse(source)?;

        let mut called = Vec::new();
        expr.function_names(&mut called);
        if let Some(unknown) = called.into_iter().find(|f| !functions.contains(f)) {
            return Err(ParseError::UnknownFunction(unknown.to_string()));
        }

        Ok(Self {
            name: name.to_string(),
            source: source.to_string(),
            body: Body::Compiled(expr),
        })
    }

    /// Build an expression from a definition value, applying the `=`
    /// convention.
    pub fn from_value(
        name: &str,
        value: &Value,
        functions: &FunctionRegistry,
    ) -> Result<Self, ParseError> {
        match value.as_str().and_then(|s| s.strip_prefix(EXPRESSION_PREFIX)) {
            Some(source) => {
                let mut expression = Self::compile(name, source, functions)?;
                expression.source = format!("{}{}", EXPRESSION_PREFIX, source);
                Ok(expression)
            }
            None => Ok(Self::literal(name, value.clone())),
        }
    }

    /// A constant expression.
    pub fn literal(name: &str, value: Value) -> Self {
        let source = match &value {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        Self {
            name: name.to_string(),
            source,
            body: Body::Literal(value),
        }
    }

    pub fn evaluate(
        &self,
        root: &Value,
        functions: &FunctionRegistry,
    ) -> Result<Value, EvaluationError> {
        match &self.body {
            Body::Literal(value) => Ok(value.clone()),
            Body::Compiled(expr) => eval::evaluate(expr, root, functions),
        }
    }

    /// Evaluate as a condition: the result must be a boolean.
    ///
    /// `null` and non-boolean results are errors, distinct from `false`.
    pub fn evaluate_condition(
        &self,
        root: &Value,
        functions: &FunctionRegistry,
    ) -> Result<bool, EvaluationError> {
        match self.evaluate(root, functions)? {
            Value::Bool(truthy) => Ok(truthy),
            Value::Null => Err(EvaluationError::NilCondition),
            other => Err(EvaluationError::NonBooleanCondition(other)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn is_literal(&self) -> bool {
        matches!(self.body, Body::Literal(_))
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}
