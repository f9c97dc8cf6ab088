// Microgateway CLI
// Compile a route definition and run it against a payload
// Run with: cargo run --bin microgateway -- run --definition route.json --payload '{"token":"abc"}'

//! # Microgateway CLI
//!
//! - `check`: compile a route definition and list its steps and responses
//! - `run`: execute a route once (or `--repeat` times) and print each reply
//!
//! Routes can use the builtin `ratelimiter` and `circuitbreaker` services.
//! Logs go to stderr; replies are printed to stdout as JSON.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use serde_json::Value;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use microgateway::{Action, ActionSettings, GatewayConfig, RouteDefinition, ServiceRegistry};

#[derive(Parser)]
#[command(name = "microgateway")]
#[command(about = "Microgateway CLI - compile and run declarative routes")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a route definition without running it
    Check {
        /// Route definition (JSON)
        #[arg(long, short)]
        definition: PathBuf,
    },

    /// Execute a route against a payload
    Run {
        /// Route definition (JSON)
        #[arg(long, short)]
        definition: PathBuf,

        /// Request payload as inline JSON
        #[arg(long, short, conflicts_with = "payload_file")]
        payload: Option<String>,

        /// Request payload read from a file
        #[arg(long)]
        payload_file: Option<PathBuf>,

        /// Override the route's async flag
        #[arg(long = "async")]
        is_async: Option<bool>,

        /// Execute the route this many times with the same payload
        #[arg(long, default_value_t = 1)]
        repeat: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional; report it once logging is up
    let env_file = dotenv();

    let cli = Cli::parse();
    let config = GatewayConfig::from_env();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.log_filter))?
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = env_file {
        debug!("Could not load .env file: {}", e);
    }

    let registry = ServiceRegistry::with_builtin_services();

    match cli.command {
        Commands::Check { definition } => {
            let route = load_route(&definition)?;
            let id = route.name.clone();
            let action = Action::new(&id, route.into(), &registry, config)?;
            let compiled = action.definition();

            println!("route: {}", compiled.name());
            println!("async: {}", compiled.is_async());
            for (index, step) in compiled.steps().iter().enumerate() {
                println!("step {}: {}", index + 1, step.service().name());
            }
            println!("responses: {}", compiled.responses().len());
        }

        Commands::Run {
            definition,
            payload,
            payload_file,
            is_async,
            repeat,
        } => {
            let route = load_route(&definition)?;
            let payload = load_payload(payload, payload_file)?;

            let mut settings = ActionSettings::new(route);
            settings.is_async = is_async;
            let id = settings.definition.name.clone();
            let action = Action::new(&id, settings, &registry, config)?;
            info!("Running route {} {} time(s)", id, repeat);

            for _ in 0..repeat {
                let reply = action.run(payload.clone()).await?;
                debug!("Reply: {:?}", reply);
                println!("{}", serde_json::to_string(&reply)?);
            }

            if action.definition().is_async() {
                // Let detached steps finish before the runtime shuts down
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
        }
    }

    Ok(())
}

fn load_route(path: &Path) -> Result<RouteDefinition> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("reading route definition {}", path.display()))?;
    RouteDefinition::from_json(&json)
        .with_context(|| format!("parsing route definition {}", path.display()))
}

fn load_payload(inline: Option<String>, file: Option<PathBuf>) -> Result<Value> {
    let json = match (inline, file) {
        (Some(json), _) => json,
        (None, Some(path)) => std::fs::read_to_string(&path)
            .with_context(|| format!("reading payload {}", path.display()))?,
        (None, None) => return Ok(Value::Null),
    };
    serde_json::from_str(&json).context("parsing payload")
}
