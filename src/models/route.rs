// Declarative route definitions

//! # Route Definition Model
//!
//! These are the plain serde structures a route is written in, usually as
//! JSON:
//!
//! ```json
//! {
//!   "name": "Pets",
//!   "steps": [
//!     { "if": "$.payload.pathParams.petId == 8", "service": "PetStorePets",
//!       "input": { "method": "GET", "pathParams.id": "=$.payload.pathParams.petId" } }
//!   ],
//!   "responses": [
//!     { "error": false, "output": { "code": 200, "data": "=$.PetStorePets.outputs.data" } }
//!   ],
//!   "services": [
//!     { "name": "PetStorePets", "ref": "rest", "settings": { "uri": "http://petstore.example/v2/pet/:id" } }
//!   ]
//! }
//! ```
//!
//! A definition is not executable on its own; it is compiled into an
//! [`engine::Definition`](crate::engine::Definition) first.
//!
//! ## Rust Learning Notes:
//!
//! ### Skipping Non-Serializable Fields
//! A service can be backed by in-process code instead of a registry `ref`.
//! Trait objects cannot round-trip through JSON, so `handler` carries
//! `#[serde(skip)]` and `Debug` is implemented by hand.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::engine::Service;

/// A complete route: services, the steps that call them and the responses
/// that shape the result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouteDefinition {
    pub name: String,

    /// Run steps in the background and answer immediately
    #[serde(rename = "async", default, skip_serializing_if = "is_false")]
    pub is_async: bool,

    #[serde(default)]
    pub steps: Vec<StepDefinition>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub responses: Vec<ResponseDefinition>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<ServiceDefinition>,

    /// Exposed to expressions as `$.conf`
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub configuration: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Guard expression; the step runs when it is true
    #[serde(rename = "if", default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,

    pub service: String,

    /// Dotted input paths mapped to literals or `=` expressions
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub input: Map<String, Value>,

    /// Stops the route after this step when true
    #[serde(rename = "halt", default, skip_serializing_if = "Option::is_none")]
    pub halt_condition: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseDefinition {
    #[serde(rename = "if", default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,

    #[serde(default)]
    pub error: bool,

    #[serde(default)]
    pub output: OutputDefinition,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<Value>,

    /// A single value or expression, or an object of dotted keys
    #[serde(default)]
    pub data: Value,
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ServiceDefinition {
    pub name: String,

    #[serde(rename = "ref", default)]
    pub reference: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub settings: Map<String, Value>,

    /// In-process implementation used when `reference` is empty
    #[serde(skip)]
    pub handler: Option<Arc<dyn Service>>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl fmt::Debug for ServiceDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDefinition")
            .field("name", &self.name)
            .field("reference", &self.reference)
            .field("description", &self.description)
            .field("settings", &self.settings)
            .field("handler", &self.handler.as_ref().map(|_| "<service>"))
            .finish()
    }
}

impl RouteDefinition {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// Declare a service backed by a registry reference.
    pub fn new_service(&mut self, name: &str, reference: &str) -> &mut ServiceDefinition {
        self.services.push(ServiceDefinition {
            name: name.to_string(),
            reference: reference.to_string(),
            ..Default::default()
        });
        let last = self.services.len() - 1;
        &mut self.services[last]
    }

    /// Declare a service backed by in-process code.
    pub fn new_handler_service(
        &mut self,
        name: &str,
        handler: Arc<dyn Service>,
    ) -> &mut ServiceDefinition {
        self.services.push(ServiceDefinition {
            name: name.to_string(),
            handler: Some(handler),
            ..Default::default()
        });
        let last = self.services.len() - 1;
        &mut self.services[last]
    }

    /// Append a step invoking the service called `service`.
    pub fn new_step(&mut self, service: &str) -> &mut StepDefinition {
        self.steps.push(StepDefinition {
            service: service.to_string(),
            ..Default::default()
        });
        let last = self.steps.len() - 1;
        &mut self.steps[last]
    }

    pub fn new_response(&mut self, is_error: bool) -> &mut ResponseDefinition {
        self.responses.push(ResponseDefinition {
            error: is_error,
            ..Default::default()
        });
        let last = self.responses.len() - 1;
        &mut self.responses[last]
    }

    pub fn set_async(&mut self, is_async: bool) -> &mut Self {
        self.is_async = is_async;
        self
    }

    pub fn add_configuration(&mut self, name: &str, value: impl Into<Value>) -> &mut Self {
        self.configuration.insert(name.to_string(), value.into());
        self
    }
}

impl ServiceDefinition {
    pub fn set_description(&mut self, description: &str) -> &mut Self {
        self.description = description.to_string();
        self
    }

    pub fn add_setting(&mut self, name: &str, value: impl Into<Value>) -> &mut Self {
        self.settings.insert(name.to_string(), value.into());
        self
    }
}

impl StepDefinition {
    pub fn set_if(&mut self, condition: &str) -> &mut Self {
        self.condition = Some(condition.to_string());
        self
    }

    pub fn add_input(&mut self, name: &str, value: impl Into<Value>) -> &mut Self {
        self.input.insert(name.to_string(), value.into());
        self
    }

    pub fn set_halt(&mut self, condition: &str) -> &mut Self {
        self.halt_condition = Some(condition.to_string());
        self
    }
}

impl ResponseDefinition {
    pub fn set_if(&mut self, condition: &str) -> &mut Self {
        self.condition = Some(condition.to_string());
        self
    }

    pub fn set_code(&mut self, code: impl Into<Value>) -> &mut Self {
        self.output.code = Some(code.into());
        self
    }

    pub fn set_data(&mut self, data: impl Into<Value>) -> &mut Self {
        self.output.data = data.into();
        self
    }
}
