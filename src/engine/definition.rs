// Compiled route definition

//! A [`Definition`] is the executable form of a
//! [`RouteDefinition`](crate::models::RouteDefinition): every expression is
//! parsed, every service reference is resolved, and a fallback `404`
//! response follows the declared ones. Definitions are immutable and shared
//! between requests behind an `Arc`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use super::adapter::Service;
use crate::expression::{Expression, FunctionRegistry};

/// Status code of the response selected when nothing else matches.
pub const NOT_FOUND: i64 = 404;

/// A declared service bound to its implementation.
pub struct BoundService {
    pub(crate) name: String,
    pub(crate) settings: Map<String, Value>,
    pub(crate) capability: Arc<dyn Service>,
}

impl BoundService {
    pub fn new(name: &str, settings: Map<String, Value>, capability: Arc<dyn Service>) -> Self {
        Self {
            name: name.to_string(),
            settings,
            capability,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &Map<String, Value> {
        &self.settings
    }
}

impl fmt::Debug for BoundService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundService")
            .field("name", &self.name)
            .field("settings", &self.settings)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct Step {
    pub(crate) condition: Option<Expression>,
    pub(crate) service: Arc<BoundService>,
    pub(crate) input: Vec<(String, Expression)>,
    pub(crate) halt_condition: Option<Expression>,
}

impl Step {
    pub fn new(service: Arc<BoundService>) -> Self {
        Self {
            condition: None,
            service,
            input: Vec::new(),
            halt_condition: None,
        }
    }

    pub fn with_condition(mut self, condition: Expression) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn with_input(mut self, path: &str, expression: Expression) -> Self {
        self.input.push((path.to_string(), expression));
        self
    }

    pub fn with_halt_condition(mut self, halt_condition: Expression) -> Self {
        self.halt_condition = Some(halt_condition);
        self
    }

    pub fn service(&self) -> &BoundService {
        &self.service
    }
}

/// Where a response takes its data from.
#[derive(Debug, Clone)]
pub enum ResponseData {
    /// One expression producing the whole payload. `None` has nothing to
    /// extract and fails response production.
    Single(Option<Expression>),
    /// Dotted keys, each evaluated and expanded into an object.
    Mapping(Vec<(String, Expression)>),
}

#[derive(Debug, Clone)]
pub struct Response {
    pub(crate) condition: Option<Expression>,
    pub(crate) is_error: bool,
    pub(crate) code: Option<Expression>,
    pub(crate) data: ResponseData,
}

impl Response {
    pub fn new(code: Option<Expression>, data: ResponseData) -> Self {
        Self {
            condition: None,
            is_error: false,
            code,
            data,
        }
    }

    /// The unconditional `404` selected when no declared response matches.
    pub fn not_found() -> Self {
        Self::new(
            Some(Expression::literal("code", Value::from(NOT_FOUND))),
            ResponseData::Single(Some(Expression::literal("data", Value::Null))),
        )
    }

    pub fn with_condition(mut self, condition: Expression) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn with_error(mut self, is_error: bool) -> Self {
        self.is_error = is_error;
        self
    }
}

#[derive(Debug, Clone)]
pub struct Definition {
    pub(crate) name: String,
    pub(crate) is_async: bool,
    pub(crate) steps: Vec<Step>,
    pub(crate) responses: Vec<Response>,
    pub(crate) fallback: Response,
    pub(crate) services: HashMap<String, Arc<BoundService>>,
    pub(crate) configuration: Map<String, Value>,
    pub(crate) functions: Arc<FunctionRegistry>,
}

impl Definition {
    /// Assemble a definition from already compiled parts. `services` holds
    /// every declared service, whether a step uses it or not.
    pub fn new(
        name: &str,
        is_async: bool,
        steps: Vec<Step>,
        responses: Vec<Response>,
        services: HashMap<String, Arc<BoundService>>,
        configuration: Map<String, Value>,
        functions: Arc<FunctionRegistry>,
    ) -> Self {
        Self {
            name: name.to_string(),
            is_async,
            steps,
            responses,
            fallback: Response::not_found(),
            services,
            configuration,
            functions,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_async(&self) -> bool {
        self.is_async
    }

    pub fn set_async(&mut self, is_async: bool) {
        self.is_async = is_async;
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Declared responses in selection order.
    pub fn responses(&self) -> &[Response] {
        &self.responses
    }

    /// The always-true `404` tried after every declared response.
    pub fn fallback(&self) -> &Response {
        &self.fallback
    }

    pub fn service(&self, name: &str) -> Option<&Arc<BoundService>> {
        self.services.get(name)
    }

    pub fn configuration(&self) -> &Map<String, Value> {
        &self.configuration
    }

    pub fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }
}
