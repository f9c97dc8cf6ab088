// Builtin expression functions

//! Functions callable from route expressions.
//!
//! The registry is consulted twice: once at compile time to reject unknown
//! names, and on every evaluation to dispatch the call. Names may be
//! namespaced (`error.isneterror`) or plain (`len`).

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use super::error::EvaluationError;
use super::eval::display;

/// A callable expression function.
pub type Function = Arc<dyn Fn(&[Value]) -> Result<Value, EvaluationError> + Send + Sync>;

/// Named functions available to expressions.
#[derive(Clone)]
pub struct FunctionRegistry {
    functions: HashMap<String, Function>,
}

impl FunctionRegistry {
    /// An empty registry, without the builtins.
    pub fn empty() -> Self {
        Self {
            functions: HashMap::new(),
        }
    }

    /// A registry preloaded with the builtin `error.*`, `string.*` and `len`
    /// functions.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();

        registry.register("error.isneterror", |args| {
            expect_arity("error.isneterror", args, 1)?;
            Ok(Value::Bool(error_kind(&args[0]) == Some("network")))
        });

        registry.register("error.string", |args| {
            expect_arity("error.string", args, 1)?;
            let message = match &args[0] {
                Value::Object(map) => map.get("message").map(display).unwrap_or_default(),
                Value::String(text) => text.clone(),
                _ => String::new(),
            };
            Ok(Value::String(message))
        });

        registry.register("error.type", |args| {
            expect_arity("error.type", args, 1)?;
            let kind = match &args[0] {
                Value::Null => "nil",
                value => error_kind(value).unwrap_or_else(|| type_name(value)),
            };
            Ok(Value::String(kind.to_string()))
        });

        registry.register("string.concat", |args| {
            Ok(Value::String(args.iter().map(display).collect()))
        });

        registry.register("string.contains", |args| {
            expect_arity("string.contains", args, 2)?;
            match (&args[0], &args[1]) {
                (Value::String(text), Value::String(needle)) => {
                    Ok(Value::Bool(text.contains(needle.as_str())))
                }
                (Value::String(_), other) | (other, _) => Err(EvaluationError::mismatch(
                    "string.contains",
                    "string",
                    other,
                )),
            }
        });

        registry.register("string.len", |args| {
            expect_arity("string.len", args, 1)?;
            match &args[0] {
                Value::String(text) => Ok(Value::from(text.chars().count() as u64)),
                other => Err(EvaluationError::mismatch("string.len", "string", other)),
            }
        });

        registry.register("len", |args| {
            expect_arity("len", args, 1)?;
            let length = match &args[0] {
                Value::Null => 0,
                Value::String(text) => text.chars().count(),
                Value::Array(items) => items.len(),
                Value::Object(map) => map.len(),
                other => return Err(EvaluationError::mismatch("len", "string, array or object", other)),
            };
            Ok(Value::from(length as u64))
        });

        registry
    }

    /// Register (or replace) a function under `name`.
    pub fn register<F>(&mut self, name: &str, function: F)
    where
        F: Fn(&[Value]) -> Result<Value, EvaluationError> + Send + Sync + 'static,
    {
        self.functions.insert(name.to_string(), Arc::new(function));
    }

    pub fn get(&self, name: &str) -> Option<&Function> {
        self.functions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.functions.keys().collect();
        names.sort();
        f.debug_struct("FunctionRegistry")
            .field("functions", &names)
            .finish()
    }
}

fn expect_arity(function: &str, args: &[Value], expected: usize) -> Result<(), EvaluationError> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(EvaluationError::Arity {
            function: function.to_string(),
            expected,
            found: args.len(),
        })
    }
}

// Service errors are stored in the scope as `{"kind": ..., "message": ...}`.
fn error_kind(value: &Value) -> Option<&str> {
    value.get("kind").and_then(Value::as_str)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "nil",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
