// Step executor - runs a route's steps against its scope

//! Steps run strictly in order. For each step:
//! 1. the guard decides whether the service is invoked (a guard that fails
//!    to evaluate skips the step)
//! 2. an invocation record seeded from the service settings is published
//!    under the service name, then the input mappings are evaluated over it
//! 3. the service runs and its outputs and error are recorded
//! 4. the halt condition, if any, decides whether the route stops
//!
//! A service error stops the route only when the step has no halt
//! condition. A halt condition that cannot be evaluated stops the route
//! silently.

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use super::adapter::{Host, InvocationContext};
use super::definition::{Definition, Step};
use super::error::ExecutionError;
use super::paths;
use super::scope::SharedScope;
use crate::expression::{Expression, FunctionRegistry};

/// How a step left the route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// The guard was false or could not be evaluated
    Skipped,
    Continue,
    /// The route stops without an error
    Stop,
}

/// Run every step of `definition`, returning the terminal route error if
/// one occurred.
pub async fn execute_steps(
    definition: &Definition,
    scope: &SharedScope,
    request_id: &str,
) -> Result<(), ExecutionError> {
    for step in &definition.steps {
        if execute_step(definition, step, scope, request_id).await? == StepOutcome::Stop {
            debug!("Route {} stopped after step {}", definition.name, step.service.name);
            break;
        }
    }
    Ok(())
}

pub async fn execute_step(
    definition: &Definition,
    step: &Step,
    scope: &SharedScope,
    request_id: &str,
) -> Result<StepOutcome, ExecutionError> {
    let functions = definition.functions();
    let service = &step.service;

    if let Some(condition) = &step.condition {
        let guard = {
            let scope = scope.read().await;
            condition.evaluate_condition(scope.root(), functions)
        };
        match guard {
            Ok(true) => debug!("Condition evaluated to true: {}", condition),
            Ok(false) => {
                debug!("Condition evaluated to false: {}", condition);
                return Ok(StepOutcome::Skipped);
            }
            Err(e) => {
                warn!("Condition evaluation failed, skipping step {}: {} ({})", service.name, condition, e);
                return Ok(StepOutcome::Skipped);
            }
        }
    }

    info!("Invoking service: {}", service.name);
    let host = Host::new(request_id, &definition.name);
    let mut ctx = InvocationContext::with_host(&service.name, service.settings.clone(), host);

    let values = {
        let mut scope = scope.write().await;
        scope.set(&service.name, ctx.record(None));
        translate_mappings(&step.input, scope.root(), functions)?
    };
    ctx.merge_inputs(values);
    scope.write().await.set(&service.name, ctx.record(None));

    let result = service.capability.invoke(&mut ctx).await;
    let signal = ctx.take_signal();
    let error = match result {
        Ok(_) => signal.error,
        Err(e) => Some(e),
    };

    {
        let mut scope = scope.write().await;
        scope.set(&service.name, ctx.record(error.as_ref()));
        for (key, value) in signal.reply {
            scope.set(&key, value);
        }
    }

    if let Some(halt) = &step.halt_condition {
        let verdict = {
            let scope = scope.read().await;
            halt.evaluate_condition(scope.root(), functions)
        };
        return match verdict {
            Ok(true) => {
                info!("Execution halted with expression: {}", halt);
                Err(ExecutionError::Halted {
                    expression: halt.source().to_string(),
                })
            }
            Ok(false) if signal.finished => Ok(StepOutcome::Stop),
            Ok(false) => Ok(StepOutcome::Continue),
            Err(e) => {
                info!("Halt condition could not be evaluated, halting silently: {} ({})", halt, e);
                Ok(StepOutcome::Stop)
            }
        };
    }

    match error {
        Some(source) => {
            warn!("Service {} failed: {}", service.name, source);
            Err(ExecutionError::Service {
                service: service.name.clone(),
                source,
            })
        }
        None if signal.finished => Ok(StepOutcome::Stop),
        None => Ok(StepOutcome::Continue),
    }
}

/// Evaluate named mappings and expand their dotted names.
pub(crate) fn translate_mappings(
    mappings: &[(String, Expression)],
    root: &Value,
    functions: &FunctionRegistry,
) -> Result<Map<String, Value>, ExecutionError> {
    let mut values = Vec::with_capacity(mappings.len());
    for (path, expression) in mappings {
        let value = expression.evaluate(root, functions).map_err(|source| {
            debug!("Mapping evaluation failed: {} ({})", expression, source);
            ExecutionError::Mapping {
                name: path.clone(),
                source,
            }
        })?;
        values.push((path.as_str(), value));
    }
    Ok(paths::expand(values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use serde_json::json;

    use crate::engine::adapter::{FnService, Service};
    use crate::engine::compiler::compile;
    use crate::engine::error::ServiceError;
    use crate::engine::registry::ServiceRegistry;
    use crate::engine::scope::Scope;
    use crate::models::RouteDefinition;

    fn run_scope(payload: Value) -> SharedScope {
        Scope::new(payload, Map::new(), Map::new(), false).into_shared()
    }

    fn counting(counter: Arc<AtomicUsize>) -> Arc<dyn Service> {
        Arc::new(FnService::new(move |ctx: &mut InvocationContext| {
            counter.fetch_add(1, Ordering::SeqCst);
            let message = ctx.input_string("message");
            ctx.set_output("echo", message);
            Ok(true)
        }))
    }

    fn failing(error: ServiceError) -> Arc<dyn Service> {
        Arc::new(FnService::new(move |_ctx: &mut InvocationContext| Err(error.clone())))
    }

    #[tokio::test]
    async fn test_records_inputs_outputs_and_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut route = RouteDefinition::new("Echo");
        route
            .new_handler_service("Echo", counting(calls.clone()))
            .add_setting("prefix", ">");
        route
            .new_step("Echo")
            .add_input("message", "=$.payload.message")
            .add_input("meta.source", "test");
        let definition = compile(&route, &ServiceRegistry::new()).unwrap();

        let scope = run_scope(json!({"message": 1337}));
        execute_steps(&definition, &scope, "req-1").await.unwrap();

        let scope = scope.read().await;
        assert_eq!(
            scope.get("Echo"),
            Some(&json!({
                "inputs": {"prefix": ">", "message": 1337, "meta": {"source": "test"}},
                "outputs": {"echo": "1337"},
                "error": null
            }))
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_bad_guard_skips_only_that_step() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let mut route = RouteDefinition::new("Guards");
        route.new_handler_service("First", counting(first.clone()));
        route.new_handler_service("Second", counting(second.clone()));
        route.new_step("First").set_if("$.payload.missing");
        route.new_step("Second").set_if("$.payload.go == true");
        let definition = compile(&route, &ServiceRegistry::new()).unwrap();

        let scope = run_scope(json!({"go": true}));
        execute_steps(&definition, &scope, "req-2").await.unwrap();

        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
        assert!(scope.read().await.get("First").is_none());
    }

    #[tokio::test]
    async fn test_service_error_without_halt_is_terminal() {
        let after = Arc::new(AtomicUsize::new(0));
        let mut route = RouteDefinition::new("Fails");
        route.new_handler_service("Broken", failing(ServiceError::failed("boom")));
        route.new_handler_service("After", counting(after.clone()));
        route.new_step("Broken");
        route.new_step("After");
        let definition = compile(&route, &ServiceRegistry::new()).unwrap();

        let scope = run_scope(Value::Null);
        let err = execute_steps(&definition, &scope, "req-3").await.unwrap_err();

        assert_eq!(
            err,
            ExecutionError::Service {
                service: "Broken".to_string(),
                source: ServiceError::failed("boom"),
            }
        );
        assert_eq!(after.load(Ordering::SeqCst), 0);
        assert_eq!(
            scope.read().await.root()["Broken"]["error"],
            json!({"kind": "failed", "message": "boom"})
        );
    }

    #[tokio::test]
    async fn test_network_errors_do_not_halt() {
        let after = Arc::new(AtomicUsize::new(0));
        let mut route = RouteDefinition::new("Network");
        route.new_handler_service("Backend", failing(ServiceError::network("connection refused")));
        route.new_handler_service("After", counting(after.clone()));
        route
            .new_step("Backend")
            .set_halt("($.Backend.error != nil) && !error.isneterror($.Backend.error)");
        route.new_step("After");
        let definition = compile(&route, &ServiceRegistry::new()).unwrap();

        let scope = run_scope(Value::Null);
        execute_steps(&definition, &scope, "req-4").await.unwrap();
        assert_eq!(after.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_non_network_error_halts_with_expression() {
        let mut route = RouteDefinition::new("Halts");
        route.new_handler_service("Backend", failing(ServiceError::failed("bad request")));
        route
            .new_step("Backend")
            .set_halt("($.Backend.error != nil) && !error.isneterror($.Backend.error)");
        let definition = compile(&route, &ServiceRegistry::new()).unwrap();

        let scope = run_scope(Value::Null);
        let err = execute_steps(&definition, &scope, "req-5").await.unwrap_err();
        assert_eq!(
            err,
            ExecutionError::Halted {
                expression: "($.Backend.error != nil) && !error.isneterror($.Backend.error)"
                    .to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_unevaluable_halt_stops_silently() {
        let after = Arc::new(AtomicUsize::new(0));
        let mut route = RouteDefinition::new("Silent");
        route.new_handler_service("First", counting(Arc::new(AtomicUsize::new(0))));
        route.new_handler_service("After", counting(after.clone()));
        route.new_step("First").set_halt("$.First.outputs.missing");
        route.new_step("After");
        let definition = compile(&route, &ServiceRegistry::new()).unwrap();

        let scope = run_scope(Value::Null);
        assert!(execute_steps(&definition, &scope, "req-6").await.is_ok());
        assert_eq!(after.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_host_reply_and_finish() {
        let after = Arc::new(AtomicUsize::new(0));
        let replier = Arc::new(FnService::new(|ctx: &mut InvocationContext| {
            let mut data = Map::new();
            data.insert("token".to_string(), json!("abc"));
            ctx.host().finish(data, None);
            Ok(true)
        }));

        let mut route = RouteDefinition::new("Finish");
        route.new_handler_service("Auth", replier);
        route.new_handler_service("After", counting(after.clone()));
        route.new_step("Auth");
        route.new_step("After");
        let definition = compile(&route, &ServiceRegistry::new()).unwrap();

        let scope = run_scope(Value::Null);
        execute_steps(&definition, &scope, "req-7").await.unwrap();

        assert_eq!(scope.read().await.get("token"), Some(&json!("abc")));
        assert_eq!(after.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_later_success_clears_recorded_error() {
        let flaky = Arc::new(FnService::new(|ctx: &mut InvocationContext| {
            if ctx.input_bool("fail")? {
                return Err(ServiceError::failed("flaky"));
            }
            ctx.set_output("ok", true);
            Ok(true)
        }));

        let mut route = RouteDefinition::new("Retry");
        route.new_handler_service("Flaky", flaky);
        route.new_step("Flaky").add_input("fail", true).set_halt("false");
        route.new_step("Flaky").add_input("fail", false);
        let definition = compile(&route, &ServiceRegistry::new()).unwrap();

        let scope = run_scope(Value::Null);
        let outcome = execute_step(&definition, &definition.steps()[0], &scope, "req-10")
            .await
            .unwrap();
        assert_eq!(outcome, StepOutcome::Continue);
        assert_eq!(
            scope.read().await.root()["Flaky"]["error"],
            json!({"kind": "failed", "message": "flaky"})
        );

        execute_step(&definition, &definition.steps()[1], &scope, "req-10")
            .await
            .unwrap();
        let scope = scope.read().await;
        assert_eq!(scope.root()["Flaky"]["error"], Value::Null);
        assert_eq!(scope.root()["Flaky"]["outputs"], json!({"ok": true}));
    }

    fn finishing() -> Arc<dyn Service> {
        Arc::new(FnService::new(|ctx: &mut InvocationContext| {
            let mut data = Map::new();
            data.insert("reason".to_string(), json!("done"));
            ctx.host().finish(data, None);
            Ok(true)
        }))
    }

    #[tokio::test]
    async fn test_finish_with_true_halt_is_halted() {
        let after = Arc::new(AtomicUsize::new(0));
        let mut route = RouteDefinition::new("FinishHalt");
        route.new_handler_service("Auth", finishing());
        route.new_handler_service("After", counting(after.clone()));
        route.new_step("Auth").set_halt("$.reason == 'done'");
        route.new_step("After");
        let definition = compile(&route, &ServiceRegistry::new()).unwrap();

        let scope = run_scope(Value::Null);
        let err = execute_steps(&definition, &scope, "req-11").await.unwrap_err();
        assert_eq!(
            err,
            ExecutionError::Halted {
                expression: "$.reason == 'done'".to_string()
            }
        );
        assert_eq!(after.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_finish_with_false_halt_stops_silently() {
        let after = Arc::new(AtomicUsize::new(0));
        let mut route = RouteDefinition::new("FinishNoHalt");
        route.new_handler_service("Auth", finishing());
        route.new_handler_service("After", counting(after.clone()));
        route.new_step("Auth").set_halt("false");
        route.new_step("After");
        let definition = compile(&route, &ServiceRegistry::new()).unwrap();

        let scope = run_scope(Value::Null);
        let outcome = execute_step(&definition, &definition.steps()[0], &scope, "req-12")
            .await
            .unwrap();
        assert_eq!(outcome, StepOutcome::Stop);

        let scope = run_scope(Value::Null);
        execute_steps(&definition, &scope, "req-12").await.unwrap();
        assert_eq!(after.load(Ordering::SeqCst), 0);
        assert_eq!(scope.read().await.get("reason"), Some(&json!("done")));
    }

    #[tokio::test]
    async fn test_reply_error_becomes_invocation_error() {
        let replier = Arc::new(FnService::new(|ctx: &mut InvocationContext| {
            ctx.host()
                .reply(Map::new(), Some(ServiceError::failed("rejected by host")));
            Ok(true)
        }));

        let mut route = RouteDefinition::new("Reply");
        route.new_handler_service("Auth", replier);
        route.new_step("Auth");
        let definition = compile(&route, &ServiceRegistry::new()).unwrap();

        let scope = run_scope(Value::Null);
        let err = execute_steps(&definition, &scope, "req-8").await.unwrap_err();
        assert_eq!(err.service_error(), Some(&ServiceError::failed("rejected by host")));
    }

    #[tokio::test]
    async fn test_input_mapping_failure_stops_route() {
        let mut route = RouteDefinition::new("Mapping");
        route.new_handler_service("Echo", counting(Arc::new(AtomicUsize::new(0))));
        route.new_step("Echo").add_input("ratio", "=$.payload.a / 0");
        let definition = compile(&route, &ServiceRegistry::new()).unwrap();

        let scope = run_scope(json!({"a": 1}));
        let err = execute_steps(&definition, &scope, "req-9").await.unwrap_err();
        assert!(matches!(err, ExecutionError::Mapping { ref name, .. } if name == "ratio"));
        assert_eq!(
            scope.read().await.root()["Echo"],
            json!({"inputs": {}, "outputs": {}, "error": null})
        );
    }
}
