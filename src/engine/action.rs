// Action - a compiled route bound to its settings

//! An [`Action`] is what a trigger holds on to: a route compiled once at
//! startup and then run for every incoming request, each run with its own
//! request id.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::info;
use uuid::Uuid;

use super::compiler::Compiler;
use super::definition::Definition;
use super::error::ExecutionError;
use super::orchestrator::Orchestrator;
use super::registry::ServiceRegistry;
use super::responses::Reply;
use crate::config::GatewayConfig;
use crate::models::RouteDefinition;
use crate::Result;

/// Per-action overrides applied on top of a route definition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionSettings {
    pub definition: RouteDefinition,

    /// Replaces the definition's `async` flag when set
    #[serde(rename = "async", default, skip_serializing_if = "Option::is_none")]
    pub is_async: Option<bool>,

    /// Merged over the definition's configuration
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub configuration: Map<String, Value>,
}

impl ActionSettings {
    pub fn new(definition: RouteDefinition) -> Self {
        Self {
            definition,
            ..Default::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

impl From<RouteDefinition> for ActionSettings {
    fn from(definition: RouteDefinition) -> Self {
        Self::new(definition)
    }
}

#[derive(Debug, Clone)]
pub struct Action {
    id: String,
    definition: Arc<Definition>,
    orchestrator: Orchestrator,
}

impl Action {
    pub fn new(
        id: &str,
        settings: ActionSettings,
        registry: &ServiceRegistry,
        config: GatewayConfig,
    ) -> Result<Self> {
        let ActionSettings {
            definition: mut route,
            is_async,
            configuration,
        } = settings;

        if let Some(is_async) = config.force_async.or(is_async) {
            route.is_async = is_async;
        }
        route.configuration.extend(configuration);

        let mut compiler = Compiler::new(registry);
        if !config.expose_env {
            compiler = compiler.with_environment(Map::new());
        }
        let definition = compiler.compile(&route)?;

        info!(
            "Created action {} for route {} (async: {})",
            id,
            definition.name(),
            definition.is_async()
        );

        Ok(Self {
            id: id.to_string(),
            definition: Arc::new(definition),
            orchestrator: Orchestrator::new(config),
        })
    }

    /// Create an action from a route definition written as JSON.
    pub fn from_json(
        id: &str,
        json: &str,
        registry: &ServiceRegistry,
        config: GatewayConfig,
    ) -> Result<Self> {
        let route = RouteDefinition::from_json(json)?;
        Self::new(id, ActionSettings::new(route), registry, config)
    }

    /// Create an action from a JSON route definition file.
    pub fn from_file(
        id: &str,
        path: impl AsRef<Path>,
        registry: &ServiceRegistry,
        config: GatewayConfig,
    ) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(id, &json, registry, config)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn definition(&self) -> &Definition {
        &self.definition
    }

    /// Run the route for one request under a fresh request id.
    pub async fn run(&self, payload: Value) -> std::result::Result<Reply, ExecutionError> {
        let request_id = Uuid::new_v4().to_string();
        self.run_with_id(&request_id, payload).await
    }

    pub async fn run_with_id(
        &self,
        request_id: &str,
        payload: Value,
    ) -> std::result::Result<Reply, ExecutionError> {
        self.orchestrator
            .execute(request_id, payload, Arc::clone(&self.definition))
            .await
    }
}
