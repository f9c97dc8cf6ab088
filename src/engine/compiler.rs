// Route definition compiler

//! Turns a [`RouteDefinition`] into an executable [`Definition`].
//!
//! Compilation does all the work that does not depend on a request:
//! - expressions are parsed and checked against the function registry
//! - service settings are evaluated once, against a scope holding `env`,
//!   `conf` and `async`, then dot-expanded
//! - service references are resolved through the [`ServiceRegistry`]
//! - the fallback `404` response is attached

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, info};

use super::definition::{BoundService, Definition, Response, ResponseData, Step};
use super::error::CompileError;
use super::paths;
use super::registry::ServiceRegistry;
use super::scope::{self, Scope};
use crate::expression::{Expression, FunctionRegistry};
use crate::models::{ResponseDefinition, RouteDefinition, ServiceDefinition, StepDefinition};

/// Compiles route definitions against a service registry.
#[derive(Debug, Clone)]
pub struct Compiler<'a> {
    registry: &'a ServiceRegistry,
    functions: Arc<FunctionRegistry>,
    environment: Map<String, Value>,
}

impl<'a> Compiler<'a> {
    pub fn new(registry: &'a ServiceRegistry) -> Self {
        Self {
            registry,
            functions: Arc::new(FunctionRegistry::with_builtins()),
            environment: scope::process_environment(),
        }
    }

    /// Use a custom function registry instead of the builtins alone.
    pub fn with_functions(mut self, functions: FunctionRegistry) -> Self {
        self.functions = Arc::new(functions);
        self
    }

    /// Environment visible to setting expressions as `$.env`.
    pub fn with_environment(mut self, environment: Map<String, Value>) -> Self {
        self.environment = environment;
        self
    }

    pub fn compile(&self, route: &RouteDefinition) -> Result<Definition, CompileError> {
        info!("Compiling route definition: {}", route.name);

        let settings_scope = Scope::for_settings(
            self.environment.clone(),
            route.configuration.clone(),
            route.is_async,
        );

        let mut services = HashMap::with_capacity(route.services.len());
        for declaration in &route.services {
            if services.contains_key(&declaration.name) {
                return Err(CompileError::DuplicateService(declaration.name.clone()));
            }
            let service = self.bind_service(declaration, &settings_scope)?;
            services.insert(declaration.name.clone(), Arc::new(service));
        }

        let steps = route
            .steps
            .iter()
            .map(|step| self.compile_step(step, &services))
            .collect::<Result<Vec<_>, _>>()?;

        let responses = route
            .responses
            .iter()
            .map(|response| self.compile_response(response))
            .collect::<Result<Vec<_>, _>>()?;

        let definition = Definition::new(
            &route.name,
            route.is_async,
            steps,
            responses,
            services,
            route.configuration.clone(),
            Arc::clone(&self.functions),
        );

        debug!(
            "Compiled route {} with {} steps and {} responses",
            definition.name,
            definition.steps.len(),
            definition.responses.len()
        );
        Ok(definition)
    }

    fn bind_service(
        &self,
        declaration: &ServiceDefinition,
        settings_scope: &Scope,
    ) -> Result<BoundService, CompileError> {
        let name = &declaration.name;

        let mut settings = Vec::with_capacity(declaration.settings.len());
        for (key, value) in &declaration.settings {
            let expression = self.expression(key, value, || format!("{}.settings.{}", name, key))?;
            let value = expression
                .evaluate(settings_scope.root(), &self.functions)
                .map_err(|source| CompileError::Setting {
                    service: name.clone(),
                    setting: key.clone(),
                    source,
                })?;
            settings.push((key.as_str(), value));
        }
        let settings = paths::expand(settings);

        let capability = if !declaration.reference.is_empty() {
            self.registry
                .resolve(&declaration.reference, name, &settings)
                .map_err(|source| CompileError::Factory {
                    service: name.clone(),
                    source,
                })?
                .ok_or_else(|| CompileError::UnknownReference {
                    service: name.clone(),
                    reference: declaration.reference.clone(),
                })?
        } else if let Some(handler) = &declaration.handler {
            Arc::clone(handler)
        } else {
            return Err(CompileError::MissingReference(name.clone()));
        };

        debug!("Bound service {} ({})", name, declaration.reference);
        Ok(BoundService::new(name, settings, capability))
    }

    fn compile_step(
        &self,
        step: &StepDefinition,
        services: &HashMap<String, Arc<BoundService>>,
    ) -> Result<Step, CompileError> {
        let service = services
            .get(&step.service)
            .ok_or_else(|| CompileError::ServiceNotFound(step.service.clone()))?;

        let mut compiled = Step::new(Arc::clone(service));

        if let Some(condition) = self.condition("condition", step.condition.as_deref(), &step.service)? {
            compiled = compiled.with_condition(condition);
        }

        for (path, value) in &step.input {
            let expression =
                self.expression(path, value, || format!("{}.input.{}", step.service, path))?;
            compiled = compiled.with_input(path, expression);
        }

        if let Some(halt) = self.condition("halt", step.halt_condition.as_deref(), &step.service)? {
            compiled = compiled.with_halt_condition(halt);
        }

        Ok(compiled)
    }

    fn compile_response(&self, response: &ResponseDefinition) -> Result<Response, CompileError> {
        let code = match &response.output.code {
            Some(code) => Some(self.expression("code", code, || "output.code".to_string())?),
            None => None,
        };

        let data = match &response.output.data {
            Value::Object(mapping) => {
                let mut expressions = Vec::with_capacity(mapping.len());
                for (path, value) in mapping {
                    let expression =
                        self.expression(path, value, || format!("output.data.{}", path))?;
                    expressions.push((path.clone(), expression));
                }
                ResponseData::Mapping(expressions)
            }
            value => ResponseData::Single(Some(self.expression("data", value, || {
                "output.data".to_string()
            })?)),
        };

        let mut compiled = Response::new(code, data).with_error(response.error);
        if let Some(condition) = self.condition("condition", response.condition.as_deref(), "response")? {
            compiled = compiled.with_condition(condition);
        }
        Ok(compiled)
    }

    /// A guard or halt condition. These are always expression text, with or
    /// without the `=` prefix. Blank text is the same as no condition.
    fn condition(
        &self,
        name: &str,
        source: Option<&str>,
        owner: &str,
    ) -> Result<Option<Expression>, CompileError> {
        let source = match source {
            Some(source) => source,
            None => return Ok(None),
        };
        let text = source
            .strip_prefix(crate::expression::EXPRESSION_PREFIX)
            .unwrap_or(source);
        if text.trim().is_empty() {
            return Ok(None);
        }
        Expression::compile(name, text, &self.functions)
            .map(Some)
            .map_err(|source| CompileError::Expression {
                location: format!("{}.{}", owner, name),
                source,
            })
    }

    fn expression<F>(&self, name: &str, value: &Value, location: F) -> Result<Expression, CompileError>
    where
        F: FnOnce() -> String,
    {
        Expression::from_value(name, value, &self.functions).map_err(|source| {
            CompileError::Expression {
                location: location(),
                source,
            }
        })
    }
}

/// Compile `route` with the builtin functions.
pub fn compile(route: &RouteDefinition, registry: &ServiceRegistry) -> Result<Definition, CompileError> {
    Compiler::new(registry).compile(route)
}
