// Service invocation adapter

//! # Service Adapter
//!
//! Services are the units of work a route step invokes. A service only ever
//! sees an [`InvocationContext`]: its inputs (settings overlaid with the
//! step's evaluated input mappings), a place to write outputs, and a
//! [`Host`] through which it can talk back to the route.
//!
//! ## Rust Learning Notes:
//!
//! `Service` is an `#[async_trait]` trait object (`Arc<dyn Service>`), so
//! one compiled definition can be executed by many requests at once. The
//! `Send + Sync` bound is what lets the executor move a definition onto a
//! spawned task in async mode.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};

use super::coerce;
use super::error::ServiceError;

/// A unit of work that a step can invoke.
///
/// Returning `Ok(true)` means the service completed. Errors are recorded in
/// the scope under the service's name before the step's halt condition is
/// considered.
#[async_trait]
pub trait Service: Send + Sync {
    async fn invoke(&self, ctx: &mut InvocationContext) -> Result<bool, ServiceError>;
}

/// Adapts a plain closure into a [`Service`].
pub struct FnService<F> {
    handler: F,
}

impl<F> FnService<F>
where
    F: Fn(&mut InvocationContext) -> Result<bool, ServiceError> + Send + Sync,
{
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl<F> Service for FnService<F>
where
    F: Fn(&mut InvocationContext) -> Result<bool, ServiceError> + Send + Sync,
{
    async fn invoke(&self, ctx: &mut InvocationContext) -> Result<bool, ServiceError> {
        (self.handler)(ctx)
    }
}

/// What a service asked the host to do during one invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct HostSignal {
    pub reply: Map<String, Value>,
    pub error: Option<ServiceError>,
    pub finished: bool,
}

/// The route as seen from inside a service.
#[derive(Debug, Clone, Default)]
pub struct Host {
    request_id: String,
    route: String,
    signal: HostSignal,
}

impl Host {
    pub(crate) fn new(request_id: &str, route: &str) -> Self {
        Self {
            request_id: request_id.to_string(),
            route: route.to_string(),
            signal: HostSignal::default(),
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn route(&self) -> &str {
        &self.route
    }

    /// Publish `data` as top level scope keys once the invocation returns.
    ///
    /// `error` becomes the invocation error if the service itself succeeds.
    /// Each call replaces the error of the previous one.
    pub fn reply(&mut self, data: Map<String, Value>, error: Option<ServiceError>) {
        self.signal.reply.extend(data);
        self.signal.error = error;
    }

    /// Like [`Host::reply`], and stop the route after this step.
    ///
    /// Without an error the route stops silently.
    pub fn finish(&mut self, data: Map<String, Value>, error: Option<ServiceError>) {
        self.reply(data, error);
        self.signal.finished = true;
    }
}

/// Inputs and outputs of a single service invocation.
#[derive(Debug, Clone)]
pub struct InvocationContext {
    service: String,
    inputs: Map<String, Value>,
    outputs: Map<String, Value>,
    host: Host,
}

impl InvocationContext {
    /// A context for `service` with the given inputs and a detached host.
    pub fn new(service: &str, inputs: Map<String, Value>) -> Self {
        Self::with_host(service, inputs, Host::default())
    }

    pub(crate) fn with_host(service: &str, inputs: Map<String, Value>, host: Host) -> Self {
        Self {
            service: service.to_string(),
            inputs,
            outputs: Map::new(),
            host,
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service
    }

    pub fn get_input(&self, name: &str) -> Option<&Value> {
        self.inputs.get(name)
    }

    pub fn inputs(&self) -> &Map<String, Value> {
        &self.inputs
    }

    /// Input `name` as a string. A missing input is the empty string.
    pub fn input_string(&self, name: &str) -> String {
        self.get_input(name).map(coerce::to_string).unwrap_or_default()
    }

    pub fn input_int(&self, name: &str) -> Result<i64, ServiceError> {
        self.coerce_input(name, coerce::to_int)
    }

    pub fn input_float(&self, name: &str) -> Result<f64, ServiceError> {
        self.coerce_input(name, coerce::to_float)
    }

    pub fn input_bool(&self, name: &str) -> Result<bool, ServiceError> {
        self.coerce_input(name, coerce::to_bool)
    }

    fn coerce_input<T>(
        &self,
        name: &str,
        convert: fn(&Value) -> Result<T, coerce::CoercionError>,
    ) -> Result<T, ServiceError> {
        let value = self.get_input(name).unwrap_or(&Value::Null);
        convert(value).map_err(|e| ServiceError::invalid_input(name, e.to_string()))
    }

    /// Deserialize all inputs into a typed struct.
    pub fn get_input_object<T: DeserializeOwned>(&self) -> Result<T, ServiceError> {
        serde_json::from_value(Value::Object(self.inputs.clone()))
            .map_err(|e| ServiceError::invalid_input(&self.service, e.to_string()))
    }

    pub fn set_output(&mut self, name: &str, value: impl Into<Value>) {
        self.outputs.insert(name.to_string(), value.into());
    }

    /// Serialize a typed struct into the outputs, one key per field.
    pub fn set_output_object<T: Serialize>(&mut self, output: &T) -> Result<(), ServiceError> {
        match serde_json::to_value(output) {
            Ok(Value::Object(fields)) => {
                self.outputs.extend(fields);
                Ok(())
            }
            Ok(other) => Err(ServiceError::failed(format!(
                "output of `{}` must be an object, got {}",
                self.service, other
            ))),
            Err(e) => Err(ServiceError::failed(e.to_string())),
        }
    }

    pub fn outputs(&self) -> &Map<String, Value> {
        &self.outputs
    }

    pub fn host(&mut self) -> &mut Host {
        &mut self.host
    }

    pub(crate) fn merge_inputs(&mut self, values: Map<String, Value>) {
        self.inputs.extend(values);
    }

    /// The scope entry for this invocation.
    pub(crate) fn record(&self, error: Option<&ServiceError>) -> Value {
        json!({
            "inputs": self.inputs,
            "outputs": self.outputs,
            "error": error.map_or(Value::Null, ServiceError::to_value),
        })
    }

    pub(crate) fn take_signal(&mut self) -> HostSignal {
        std::mem::take(&mut self.host.signal)
    }
}
