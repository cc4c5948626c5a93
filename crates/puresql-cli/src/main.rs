//! pureSQL runtime CLI - install, start and query the local inference runtime.

use clap::{Parser, Subcommand};

mod commands;

/// Manage the local inference runtime used by pureSQL
#[derive(Parser)]
#[command(name = "puresql-runtime")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install if needed, start the runtime and keep it running until Ctrl-C
    Start,

    /// Download and install the runtime binary without starting it
    Install,

    /// Show whether the runtime is reachable and its lifecycle status
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List models installed in the running runtime
    Models,

    /// Pull a model into the running runtime
    Pull {
        /// Model name, e.g. llama3.2:latest
        model: String,
    },

    /// Run a single prompt against a model
    Generate {
        /// Model name
        model: String,
        /// Prompt text
        prompt: String,
        /// Sampling temperature
        #[arg(long)]
        temperature: Option<f32>,
    },

    /// Show the resolved runtime configuration
    Info,
}

fn main() -> miette::Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose { "debug" } else { "warn" };
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();

    let config = commands::load_config()?;

    if let Commands::Info = cli.command {
        return commands::info::run(&config);
    }

    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| miette::miette!("Failed to create async runtime: {}", e))?;

    runtime.block_on(async move {
        match cli.command {
            Commands::Start => commands::start::run(config).await,
            Commands::Install => commands::install::run(&config).await,
            Commands::Status { json } => commands::status::run(config, json).await,
            Commands::Models => commands::model::list(&config).await,
            Commands::Pull { model } => commands::model::pull(&config, &model).await,
            Commands::Generate {
                model,
                prompt,
                temperature,
            } => commands::model::generate(&config, &model, &prompt, temperature).await,
            Commands::Info => commands::info::run(&config),
        }
    })
}
