//! Greeting service demo
//!
//! Prints the schema document derived from the models below, compiles it, or
//! serves one call in-process.
//!
//! Usage:
//! ```bash
//! # Print the schema document
//! cargo run --package greeting -- schema
//!
//! # Write greeter.proto and run protoc over it
//! cargo run --package greeting -- generate --out-dir generated
//!
//! # Call a method with a JSON request
//! RUST_LOG=debug cargo run --package greeting -- call say_hello '{"name": "Ada", "age": 37}'
//! cargo run --package greeting -- call count_down '{"from": 3}'
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use futures::stream::{self, StreamExt};
use modelrpc_server::prelude::*;
use modelrpc_server::{CancellationHandle, wire_method_name};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Language of a greeting
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema)]
enum Language {
    English,
    Japanese,
    Spanish,
}

/// Someone to greet
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
struct Person {
    /// Given name
    name: String,
    #[schemars(range(max = 150))]
    age: u32,
    language: Option<Language>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
struct Greeting {
    greeting: String,
    at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
struct Countdown {
    from: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
struct Tick {
    remaining: u32,
}

struct Greeter;

impl Greeter {
    async fn say_hello(&self, person: Person) -> Result<Greeting, BoxError> {
        let greeting = match person.language.unwrap_or(Language::English) {
            Language::English => format!("Hello, {}!", person.name),
            Language::Japanese => format!("こんにちは、{}さん!", person.name),
            Language::Spanish => format!("¡Hola, {}!", person.name),
        };
        Ok(Greeting {
            greeting,
            at: Utc::now(),
        })
    }

    fn shout(&self, person: Person) -> Result<Greeting, Status> {
        if person.name.trim().is_empty() {
            return Err(Status::invalid_argument("name must not be empty"));
        }
        Ok(Greeting {
            greeting: format!("HELLO, {}!", person.name.to_uppercase()),
            at: Utc::now(),
        })
    }
}

impl Service for Greeter {
    fn description(&self) -> Option<String> {
        Some("Greets people in a few languages".to_string())
    }

    fn methods(registry: &mut MethodRegistry<Self>) {
        registry
            .unary("say_hello", |greeter: Arc<Self>, person: Person| async move {
                greeter.say_hello(person).await
            })
            .describe("Greets one person");
        registry
            .blocking("shout", |greeter: &Self, person: Person| greeter.shout(person))
            .describe("Greets one person, loudly");
        registry
            .server_streaming("count_down", |_: Arc<Self>, countdown: Countdown| {
                stream::unfold(countdown.from, |remaining| async move {
                    if remaining == 0 {
                        return None;
                    }
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Some((Ok::<_, BoxError>(Tick { remaining }), remaining - 1))
                })
            })
            .describe("Counts down to zero, one tick at a time");
    }
}

#[derive(Parser, Debug)]
#[command(name = "greeting")]
#[command(about = "Greeting service built from serde models")]
struct Args {
    /// Package for the schema document (overrides MODELRPC_PACKAGE)
    #[arg(long, global = true)]
    package: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the schema document
    Schema,
    /// Write the schema document and run the schema compiler over it
    Generate {
        #[arg(long)]
        out_dir: PathBuf,
    },
    /// Call a method in-process with a JSON request
    Call {
        /// Method name, e.g. `say_hello` or `SayHello`
        method: String,
        #[arg(default_value = "{}")]
        request: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let mut config = ServerConfig::from_env();
    if let Some(package) = args.package {
        config = config.with_package(package);
    }

    match args.command {
        Command::Schema => {
            let document = BindingGenerator::new(config).document(&Greeter)?;
            print!("{}", document);
        }
        Command::Generate { out_dir } => {
            let generator = BindingGenerator::new(config.with_out_dir(&out_dir));
            let adapter = generator.generate(Greeter)?;
            info!(service = %adapter.service_name(), out_dir = %out_dir.display(), "Generated");
        }
        Command::Call { method, request } => call(config, &method, &request).await?,
    }
    Ok(())
}

async fn call(config: ServerConfig, method: &str, request: &str) -> Result<()> {
    let generator = BindingGenerator::new(config);
    let adapter = generator.generate(Greeter)?;
    let service = adapter.service_name().to_string();
    let method = wire_method_name(method);

    let request_type = adapter
        .descriptor(&method)
        .map(|d| d.request.clone())
        .ok_or_else(|| anyhow!("{} has no method '{}'", service, method))?;
    let native: serde_json::Value = serde_json::from_str(request)?;
    let message =
        generator
            .registry()
            .to_wire_message(&service, &request_type, &native, &**adapter.binding())?;

    let mut router = Router::new();
    router.mount(adapter)?;

    let cancel = CancellationHandle::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let path = format!("/{}/{}", service, method);
    let ctx = CallContext::new().with_cancellation(cancel);
    match router.call(&path, message, ctx).await? {
        Reply::Unary(response) => {
            println!("{}", serde_json::to_string_pretty(&response.to_json())?);
        }
        Reply::Stream(mut items) => {
            while let Some(item) = items.next().await {
                println!("{}", serde_json::to_string(&item?.to_json())?);
            }
        }
    }
    Ok(())
}
