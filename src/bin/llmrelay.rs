//! llmrelay command line
//!
//! `llmrelay providers` lists the registry, `llmrelay send` routes one prompt.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use llmrelay::{CompletionRequest, ConfigLoader, Message, RequestRouter, RouterConfig};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "llmrelay", version, about = "Route chat completions across LLM providers")]
struct Cli {
    /// Config file (otherwise RELAY_CONFIG and the default locations are used)
    #[arg(short, long, env = "RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List configured providers in routing order
    Providers,

    /// Send one prompt and print the reply
    Send {
        /// User prompt
        prompt: String,

        /// Optional system message
        #[arg(short, long)]
        system: Option<String>,

        /// Sampling temperature
        #[arg(short, long)]
        temperature: Option<f32>,

        /// Maximum tokens to generate
        #[arg(long)]
        max_tokens: Option<u32>,

        /// Print the full JSON response
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "llmrelay=debug" } else { "llmrelay=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&PathBuf>) -> Result<RouterConfig> {
    let loader = match path {
        Some(path) => ConfigLoader::from_path(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ConfigLoader::new().context("loading default config")?,
    };

    if loader.sources().is_empty() {
        warn!("No config file found; the registry is empty");
    }
    for source in loader.sources() {
        debug!(path = %source.display(), "Using config");
    }
    Ok(loader.into_config())
}

fn print_providers(config: &RouterConfig) -> Result<()> {
    let entries = config.entries()?;
    println!("mode: {}", config.routing_mode);
    for entry in entries {
        println!(
            "{:<16} {:<8} {:<24} keys={} {}",
            entry.id,
            if entry.enabled { "enabled" } else { "disabled" },
            entry.model,
            entry.keys.len(),
            entry.api_base
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Command::Providers => print_providers(&config),
        Command::Send {
            prompt,
            system,
            temperature,
            max_tokens,
            json,
        } => {
            let router = RequestRouter::from_config(&config)?;

            let mut messages = Vec::new();
            if let Some(system) = system {
                messages.push(Message::system(system));
            }
            messages.push(Message::user(prompt));

            let mut request = CompletionRequest::new(messages);
            request.temperature = temperature;
            request.max_tokens = max_tokens;

            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    on_interrupt.cancel();
                }
            });

            let response = router.send(request, &cancel).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                println!("{}", response.content().unwrap_or_default());
            }
            Ok(())
        }
    }
}
