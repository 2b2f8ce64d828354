use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use moa::config::{ApiCredential, MoaFileConfig};
use moa::llm::{EmbeddingClient, OpenAiClient};
use moa::pipeline::{event_channel, EventReceiver, MoaEvent, MoaOrchestrator};

#[derive(Parser)]
#[command(name = "moa")]
#[command(about = "Mixture-of-agents text generation")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to .moa.toml discovery)
    #[arg(long, global = true, env = "MOA_CONFIG")]
    config: Option<std::path::PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask the reference models and print the aggregated answer
    Ask {
        /// Prompt to send
        prompt: String,
        /// Total layer count including the final aggregation
        #[arg(long, allow_negative_numbers = true)]
        layers: Option<i64>,
        /// Aggregator model
        #[arg(long)]
        aggregator: Option<String>,
        /// Reference model (repeat to list several, replaces the configured set)
        #[arg(long = "reference", short = 'r')]
        references: Vec<String>,
        /// Print pipeline progress to stderr
        #[arg(long)]
        events: bool,
        /// Print every layer as JSON instead of just the answer
        #[arg(long)]
        json: bool,
    },
    /// Embed text and print the vector as JSON
    Embed {
        /// Text to embed
        text: String,
    },
    /// Show the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // A missing .env is fine; the credential check below catches real gaps
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let file_config = match cli.config {
        Some(ref path) => MoaFileConfig::load_from_path(path)?,
        None => MoaFileConfig::load()?,
    };

    match cli.command {
        Commands::Ask {
            prompt,
            layers,
            aggregator,
            references,
            events,
            json,
        } => {
            let mut config = file_config.moa_config();
            if let Some(layers) = layers {
                config = config.with_layers(layers);
            }
            if let Some(aggregator) = aggregator {
                config.aggregator_model = aggregator;
            }
            if !references.is_empty() {
                config.reference_models = references;
            }
            config.validate()?;

            let credential = ApiCredential::from_env(&file_config.llm.api_key_env)?;
            let backend = Arc::new(OpenAiClient::new(file_config.openai_config(&credential)));
            let mut orchestrator = MoaOrchestrator::new(config, backend)?;
            tracing::debug!(
                references = ?orchestrator.config().reference_models,
                aggregator = %orchestrator.config().aggregator_model,
                layers = orchestrator.config().layers,
                "Starting MoA run"
            );

            let printer = if events {
                let (tx, rx) = event_channel();
                orchestrator = orchestrator.with_event_sender(tx);
                Some(tokio::spawn(print_events(rx)))
            } else {
                None
            };

            let run = orchestrator.generate_detailed(&prompt).await?;
            drop(orchestrator);
            if let Some(printer) = printer {
                if let Err(e) = printer.await {
                    tracing::warn!(error = %e, "Event printer stopped abnormally");
                }
            }

            if json {
                println!("{}", serde_json::to_string_pretty(&run)?);
            } else {
                println!("{}", run.final_text());
            }
        }
        Commands::Embed { text } => {
            let credential = ApiCredential::from_env(&file_config.llm.api_key_env)?;
            let client = EmbeddingClient::new(file_config.embedding_config(&credential));
            let vector = client
                .embed_query(&text)
                .await
                .with_context(|| format!("Embedding with {} failed", client.model()))?;
            println!("{}", serde_json::to_string(&vector)?);
        }
        Commands::Config => {
            let config = file_config.moa_config();
            println!("Base URL:    {}", file_config.llm.base_url);
            println!("API key env: {}", file_config.llm.api_key_env);
            println!("Layers:      {}", config.layers);
            println!("Aggregator:  {}", config.aggregator_model);
            println!("References:");
            for model in &config.reference_models {
                println!("  - {}", model);
            }
            println!("Embeddings:  {}", file_config.embeddings.model);
        }
    }

    Ok(())
}

async fn print_events(mut rx: EventReceiver) {
    while let Some(event) = rx.recv().await {
        match event {
            MoaEvent::LayerStart { layer, models } => {
                eprintln!("--- Layer {}: {} ---", layer, models.join(", "));
            }
            MoaEvent::InvocationComplete {
                model,
                role,
                attempt,
                duration,
            } => {
                eprintln!(
                    "  {} ({}) answered on attempt {} in {:?}",
                    model, role, attempt, duration
                );
            }
            MoaEvent::AttemptFailed {
                model,
                attempt,
                error,
                ..
            } => {
                eprintln!("  {} failed (attempt {}): {}", model, attempt, error);
            }
            MoaEvent::InvocationFailed { model, attempts, .. } => {
                eprintln!("  {} gave up after {} attempts", model, attempts);
            }
            MoaEvent::LayerComplete {
                layer,
                failures,
                duration,
            } => {
                eprintln!("--- Layer {} done in {:?} ({} failed) ---", layer, duration, failures);
            }
            MoaEvent::RunComplete { total_duration, .. } => {
                eprintln!("--- Finished in {:?} ---", total_duration);
            }
        }
    }
}
