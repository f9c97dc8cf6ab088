// Response selection

//! Responses are tried in declaration order and the first one whose
//! condition holds produces the reply. A condition that fails to evaluate
//! counts as not matching. When none matches, the definition's
//! unconditional `404` fallback is produced, so selection always yields a
//! reply unless the chosen response's own mappings fail.

use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::definition::{Definition, Response, ResponseData};
use super::error::ExecutionError;
use super::executor::translate_mappings;
use crate::expression::FunctionRegistry;

/// Status code used when a response carries no usable code.
pub const DEFAULT_CODE: i64 = 200;

/// The outcome of one route execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reply {
    pub code: i64,
    pub data: Value,
    /// Whether the selected response was declared as an error response
    pub is_error: bool,
    /// The terminal route error, if the steps ended with one
    #[serde(serialize_with = "serialize_error")]
    pub error: Option<ExecutionError>,
}

impl Reply {
    /// The `{code, data}` object handed back to callers.
    pub fn output(&self) -> Value {
        json!({
            "code": self.code,
            "data": self.data,
        })
    }
}

fn serialize_error<S>(error: &Option<ExecutionError>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match error {
        Some(error) => serializer.serialize_some(&error.to_string()),
        None => serializer.serialize_none(),
    }
}

/// Pick the first matching response and evaluate its code and data.
pub fn select_response(
    definition: &Definition,
    root: &Value,
    route_error: Option<ExecutionError>,
) -> Result<Reply, ExecutionError> {
    let functions = definition.functions();

    let response = definition
        .responses
        .iter()
        .find(|response| is_selected(response, root, functions))
        .unwrap_or(&definition.fallback);

    produce(response, root, functions, route_error)
}

fn is_selected(response: &Response, root: &Value, functions: &FunctionRegistry) -> bool {
    let condition = match &response.condition {
        Some(condition) => condition,
        None => return true,
    };
    match condition.evaluate_condition(root, functions) {
        Ok(true) => {
            debug!("Response condition evaluated to true: {}", condition);
            true
        }
        Ok(false) => false,
        Err(e) => {
            debug!("Response condition failed, skipping: {} ({})", condition, e);
            false
        }
    }
}

fn produce(
    response: &Response,
    root: &Value,
    functions: &FunctionRegistry,
    route_error: Option<ExecutionError>,
) -> Result<Reply, ExecutionError> {
    let code = match &response.code {
        Some(expression) => {
            let value = expression
                .evaluate(root, functions)
                .map_err(|source| ExecutionError::Mapping {
                    name: "code".to_string(),
                    source,
                })?;
            status_code(&value)
        }
        None => 0,
    };
    let code = if code != 0 {
        info!("Code identified in response output: {}", code);
        code
    } else {
        info!("Code not found or not an integer, default response code is {}", DEFAULT_CODE);
        DEFAULT_CODE
    };

    let data = match &response.data {
        ResponseData::Mapping(mappings) => Value::Object(translate_mappings(mappings, root, functions)?),
        ResponseData::Single(Some(expression)) => {
            expression
                .evaluate(root, functions)
                .map_err(|source| ExecutionError::Mapping {
                    name: "data".to_string(),
                    source,
                })?
        }
        ResponseData::Single(None) => return Err(ExecutionError::DataExtraction),
    };

    Ok(Reply {
        code,
        data,
        is_error: response.is_error,
        error: route_error,
    })
}

/// Floats truncate, integers pass and strings are parsed as decimal.
/// Anything else is `0`.
fn status_code(value: &Value) -> i64 {
    match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|float| float as i64))
            .unwrap_or(0),
        Value::String(text) => text.parse::<i64>().unwrap_or_else(|_| {
            warn!("Unable to parse code string from response output: {}", text);
            0
        }),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    use serde_json::Map;

    use crate::engine::definition::NOT_FOUND;
    use crate::expression::{EvaluationError, Expression};

    fn functions() -> Arc<FunctionRegistry> {
        Arc::new(FunctionRegistry::with_builtins())
    }

    fn expr(name: &str, source: &str) -> Expression {
        Expression::from_value(name, &json!(source), &FunctionRegistry::with_builtins()).unwrap()
    }

    fn definition(responses: Vec<Response>) -> Definition {
        Definition::new(
            "Responses",
            false,
            Vec::new(),
            responses,
            HashMap::new(),
            Map::new(),
            functions(),
        )
    }

    fn with_code(code: Value) -> Response {
        Response::new(
            Some(Expression::literal("code", code)),
            ResponseData::Single(Some(Expression::literal("data", json!("ok")))),
        )
    }

    #[test]
    fn test_no_responses_gives_not_found() {
        let reply = select_response(&definition(Vec::new()), &json!({}), None).unwrap();
        assert_eq!(reply.code, NOT_FOUND);
        assert_eq!(reply.data, Value::Null);
        assert!(reply.error.is_none());
    }

    #[test]
    fn test_code_coercion() {
        for (code, expected) in [
            (json!("201"), 201),
            (json!(202.9), 202),
            (json!(0), 200),
            (json!("not-a-number"), 200),
            (json!(true), 200),
            (Value::Null, 200),
        ] {
            let reply = select_response(&definition(vec![with_code(code)]), &json!({}), None).unwrap();
            assert_eq!(reply.code, expected);
        }

        let no_code = Response::new(None, ResponseData::Single(Some(Expression::literal("data", Value::Null))));
        let reply = select_response(&definition(vec![no_code]), &json!({}), None).unwrap();
        assert_eq!(reply.code, DEFAULT_CODE);
    }

    #[test]
    fn test_first_match_wins_and_bad_conditions_skip() {
        let root = json!({"payload": {"kind": "b"}});
        let responses = vec![
            with_code(json!(500)).with_condition(expr("condition", "=$.payload.missing")),
            with_code(json!(400)).with_condition(expr("condition", "=$.payload.kind == 'a'")),
            with_code(json!(201)).with_condition(expr("condition", "=$.payload.kind == 'b'")),
            with_code(json!(202)),
        ];
        let reply = select_response(&definition(responses), &root, None).unwrap();
        assert_eq!(reply.code, 201);
    }

    #[test]
    fn test_mapping_data_is_expanded() {
        let root = json!({"Echo": {"outputs": {"echo": "1337"}}});
        let response = Response::new(
            None,
            ResponseData::Mapping(vec![
                ("body.echo".to_string(), expr("body.echo", "=$.Echo.outputs.echo")),
                ("body.kind".to_string(), expr("body.kind", "echo")),
            ]),
        );
        let reply = select_response(&definition(vec![response]), &root, None).unwrap();
        assert_eq!(reply.data, json!({"body": {"echo": "1337", "kind": "echo"}}));
    }

    #[test]
    fn test_route_error_is_carried_through() {
        let route_error = ExecutionError::Halted {
            expression: "true".to_string(),
        };
        let response = with_code(json!(403)).with_error(true);
        let reply =
            select_response(&definition(vec![response]), &json!({}), Some(route_error.clone())).unwrap();

        assert_eq!(reply.code, 403);
        assert!(reply.is_error);
        assert_eq!(reply.error, Some(route_error));
    }

    #[test]
    fn test_missing_data_expression_is_fatal() {
        let response = Response::new(None, ResponseData::Single(None));
        let err = select_response(&definition(vec![response]), &json!({}), None).unwrap_err();
        assert_eq!(err, ExecutionError::DataExtraction);
        assert_eq!(err.to_string(), "cannot extract data from response output");
    }

    #[test]
    fn test_code_evaluation_failure_is_fatal() {
        let response = Response::new(
            Some(expr("code", "=1 / 0")),
            ResponseData::Single(Some(Expression::literal("data", Value::Null))),
        );
        let err = select_response(&definition(vec![response]), &json!({}), None).unwrap_err();
        assert_eq!(
            err,
            ExecutionError::Mapping {
                name: "code".to_string(),
                source: EvaluationError::DivisionByZero,
            }
        );
    }

    #[test]
    fn test_reply_output() {
        let reply = Reply {
            code: 200,
            data: json!({"echo": "1337"}),
            is_error: false,
            error: None,
        };
        assert_eq!(reply.output(), json!({"code": 200, "data": {"echo": "1337"}}));
        assert_eq!(
            serde_json::to_value(&reply).unwrap(),
            json!({"code": 200, "data": {"echo": "1337"}, "is_error": false, "error": null})
        );
    }
}
