// Route orchestrator - one execution per request

//! # Orchestrator
//!
//! `execute` builds a fresh scope for the request, runs the steps and
//! selects the response.
//!
//! In async mode the steps are detached onto a spawned task and the
//! response is selected straight away, from the scope as it is at that
//! instant. Step results may or may not be visible to the response
//! conditions; errors from the detached steps are only logged.
//!
//! ## Rust Learning Notes:
//!
//! `tokio::spawn` needs a `'static` future, which is why the definition is
//! passed as `Arc<Definition>` and the scope is an `Arc<RwLock<_>>`: the
//! spawned task owns its own clones of both.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, error, info};

use super::definition::Definition;
use super::error::ExecutionError;
use super::executor::execute_steps;
use super::responses::{select_response, Reply};
use super::scope::{self, Scope};
use crate::config::GatewayConfig;

#[derive(Debug, Clone, Default)]
pub struct Orchestrator {
    config: GatewayConfig,
}

impl Orchestrator {
    pub fn new(config: GatewayConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Execute `definition` for one request.
    ///
    /// `Err` means no reply could be produced at all. A route that failed
    /// or halted still yields a `Reply`, with the route error attached.
    pub async fn execute(
        &self,
        request_id: &str,
        payload: Value,
        definition: Arc<Definition>,
    ) -> Result<Reply, ExecutionError> {
        let env = if self.config.expose_env {
            scope::process_environment()
        } else {
            Map::new()
        };
        let scope = Scope::new(
            payload,
            env,
            definition.configuration.clone(),
            definition.is_async,
        )
        .into_shared();

        let route_error = if definition.is_async {
            info!("Executing route {} asynchronously ({})", definition.name, request_id);
            let definition = Arc::clone(&definition);
            let scope = Arc::clone(&scope);
            let request_id = request_id.to_string();
            tokio::spawn(async move {
                match execute_steps(&definition, &scope, &request_id).await {
                    Ok(()) => debug!("Background route {} finished ({})", definition.name, request_id),
                    Err(e) => error!("Error executing route {} ({}): {}", definition.name, request_id, e),
                }
            });
            None
        } else {
            debug!("Executing route {} ({})", definition.name, request_id);
            match execute_steps(&definition, &scope, request_id).await {
                Ok(()) => None,
                Err(e) => {
                    error!("Error executing route {} ({}): {}", definition.name, request_id, e);
                    Some(e)
                }
            }
        };

        let scope = scope.read().await;
        select_response(&definition, scope.root(), route_error)
    }
}

/// Execute `definition` with the default configuration.
pub async fn execute(
    request_id: &str,
    payload: Value,
    definition: Arc<Definition>,
) -> Result<Reply, ExecutionError> {
    Orchestrator::default()
        .execute(request_id, payload, definition)
        .await
}
