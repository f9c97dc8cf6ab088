// Execution scope shared between the steps of one route execution

//! The scope is a JSON object rooted at `$`. It starts with the request
//! payload, the environment, the route configuration and the async flag;
//! every step invocation then records itself under its service name.
//!
//! Each write bumps a version counter, so a reader holding a snapshot can
//! tell whether the scope has moved on since it was taken.
//!
//! ## Rust Learning Notes:
//!
//! In async mode the response is selected while the steps are still
//! running on another task, so the scope sits behind
//! `Arc<tokio::sync::RwLock<_>>`. Many readers may evaluate expressions at
//! once; a step holds the write lock only long enough to record its result.

use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::RwLock;

pub const PAYLOAD: &str = "payload";
pub const ENV: &str = "env";
pub const CONF: &str = "conf";
pub const ASYNC: &str = "async";

/// A scope shared between the step executor and the response selector.
pub type SharedScope = Arc<RwLock<Scope>>;

#[derive(Debug, Clone, PartialEq)]
pub struct Scope {
    root: Value,
    version: u64,
}

impl Scope {
    pub fn new(
        payload: Value,
        env: Map<String, Value>,
        conf: Map<String, Value>,
        is_async: bool,
    ) -> Self {
        let mut root = Map::new();
        root.insert(PAYLOAD.to_string(), payload);
        root.insert(ENV.to_string(), Value::Object(env));
        root.insert(CONF.to_string(), Value::Object(conf));
        root.insert(ASYNC.to_string(), Value::Bool(is_async));

        Self {
            root: Value::Object(root),
            version: 0,
        }
    }

    /// The scope used to evaluate service settings when a definition is
    /// compiled. There is no payload yet.
    pub fn for_settings(env: Map<String, Value>, conf: Map<String, Value>, is_async: bool) -> Self {
        let mut scope = Self::new(Value::Null, env, conf, is_async);
        if let Value::Object(root) = &mut scope.root {
            root.remove(PAYLOAD);
        }
        scope
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.root.get(key)
    }

    /// Write a top level key, replacing any previous value.
    pub fn set(&mut self, key: &str, value: Value) {
        if let Value::Object(root) = &mut self.root {
            root.insert(key.to_string(), value);
            self.version += 1;
        }
    }

    /// The whole scope as the `$` root of an expression.
    pub fn root(&self) -> &Value {
        &self.root
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn into_shared(self) -> SharedScope {
        Arc::new(RwLock::new(self))
    }
}

/// The process environment as scope values.
pub fn process_environment() -> Map<String, Value> {
    std::env::vars()
        .map(|(key, value)| (key, Value::String(value)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_scope_layout() {
        let scope = Scope::new(json!({"message": "hi"}), Map::new(), Map::new(), true);

        assert_eq!(scope.get(PAYLOAD), Some(&json!({"message": "hi"})));
        assert_eq!(scope.get(ENV), Some(&json!({})));
        assert_eq!(scope.get(CONF), Some(&json!({})));
        assert_eq!(scope.get(ASYNC), Some(&json!(true)));
        assert_eq!(scope.version(), 0);
    }

    #[test]
    fn test_writes_bump_version() {
        let mut scope = Scope::new(Value::Null, Map::new(), Map::new(), false);
        scope.set("Backend", json!({"outputs": {"ok": true}}));
        scope.set("Backend", json!({"outputs": {"ok": false}}));

        assert_eq!(scope.version(), 2);
        assert_eq!(scope.root()["Backend"]["outputs"]["ok"], json!(false));
    }

    #[test]
    fn test_settings_scope_has_no_payload() {
        let mut env = Map::new();
        env.insert("HOST".to_string(), json!("localhost"));
        let scope = Scope::for_settings(env, Map::new(), false);

        assert!(scope.get(PAYLOAD).is_none());
        assert_eq!(scope.root()["env"]["HOST"], json!("localhost"));
    }

    #[tokio::test]
    async fn test_shared_scope_readers_see_writes() {
        let shared = Scope::new(Value::Null, Map::new(), Map::new(), false).into_shared();
        {
            let mut scope = shared.write().await;
            scope.set("step", json!(1));
        }
        let scope = shared.read().await;
        assert_eq!(scope.get("step"), Some(&json!(1)));
        assert_eq!(scope.version(), 1);
    }
}
