// Gateway configuration loaded from the environment

//! # Gateway Configuration
//!
//! Settings are read from `MICROGATEWAY_*` environment variables. Binaries
//! call `dotenv()` first, so a `.env` file in the working directory works
//! too.
//!
//! | Variable                   | Default | Meaning                               |
//! |----------------------------|---------|---------------------------------------|
//! | `MICROGATEWAY_LOG`         | `info`  | `tracing` filter directive            |
//! | `MICROGATEWAY_EXPOSE_ENV`  | `true`  | expose the process env as `$.env`     |
//! | `MICROGATEWAY_ASYNC`       | unset   | force every action sync or async      |

use std::env;

use serde::{Deserialize, Serialize};
use tracing::warn;

pub const ENV_PREFIX: &str = "MICROGATEWAY_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Filter directive handed to `tracing_subscriber::EnvFilter`
    pub log_filter: String,
    /// Whether expressions can read process environment variables
    pub expose_env: bool,
    /// Overrides the `async` flag of every action when set
    pub force_async: Option<bool>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            log_filter: "info".to_string(),
            expose_env: true,
            force_async: None,
        }
    }
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a configuration from any key lookup, `MICROGATEWAY_` prefix
    /// included in the keys asked for.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

        if let Some(filter) = var("LOG") {
            config.log_filter = filter;
        }
        if let Some(value) = var("EXPOSE_ENV") {
            config.expose_env = parse_flag("EXPOSE_ENV", &value).unwrap_or(config.expose_env);
        }
        if let Some(value) = var("ASYNC") {
            config.force_async = parse_flag("ASYNC", &value);
        }
        config
    }
}

fn parse_flag(name: &str, value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => {
            warn!("Ignoring {}{}: not a boolean: {}", ENV_PREFIX, name, value);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> GatewayConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        GatewayConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        assert_eq!(config(&[]), GatewayConfig::default());
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("MICROGATEWAY_LOG", "microgateway=debug"),
            ("MICROGATEWAY_EXPOSE_ENV", "off"),
            ("MICROGATEWAY_ASYNC", "yes"),
        ]);
        assert_eq!(config.log_filter, "microgateway=debug");
        assert!(!config.expose_env);
        assert_eq!(config.force_async, Some(true));
    }

    #[test]
    fn test_invalid_flags_ignored() {
        let config = config(&[("MICROGATEWAY_EXPOSE_ENV", "maybe"), ("MICROGATEWAY_ASYNC", "later")]);
        assert!(config.expose_env);
        assert_eq!(config.force_async, None);
    }
}
