//! Fleece Server - dynamic inference over a single-flight model cache
//!
//! This binary serves predictions from any (model, task) pair the configured
//! loader can construct, keeping the most recently used pipelines in memory.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
};
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use fleece_server::{
    config::ServerConfig,
    server::{run_server, FleeceServer},
};

/// Command line arguments
#[derive(Parser)]
#[command(
    name = "fleece-server",
    version,
    about = "Fleece dynamic inference server",
    long_about = "An HTTP inference server that loads model pipelines on demand, shares each load between concurrent requests, keeps the most recently used pipelines cached and exports Prometheus metrics."
)]
struct Args {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Server bind address, overrides the configuration file
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable JSON logging
    #[arg(long)]
    json_logs: bool,

    /// Subcommands
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands
#[derive(Subcommand)]
enum Commands {
    /// Start the server
    Serve,
    /// Generate a default configuration file
    Config {
        /// Output file path
        #[arg(short, long, default_value = "fleece-server.toml")]
        output: PathBuf,
        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },
    /// Validate configuration file
    Validate {
        /// Configuration file to validate
        config: PathBuf,
    },
    /// Show server information
    Info,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args)?;

    match &args.command {
        Some(Commands::Config { output, force }) => generate_config(output, *force),
        Some(Commands::Validate { config }) => validate_config(config),
        Some(Commands::Info) => {
            show_info();
            Ok(())
        }
        Some(Commands::Serve) | None => start_server(&args).await,
    }
}

/// Initialize logging based on command line arguments
fn init_logging(args: &Args) -> anyhow::Result<()> {
    let log_level = args
        .log_level
        .parse::<Level>()
        .with_context(|| format!("Invalid log level: {}", args.log_level))?;

    let env_filter = EnvFilter::from_default_env()
        .add_directive(format!("fleece_server={}", log_level).parse()?)
        .add_directive(format!("fleece_core={}", log_level).parse()?)
        .add_directive(format!("tower_http={}", log_level).parse()?);

    if args.json_logs {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().pretty())
            .with(env_filter)
            .init();
    }

    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<ServerConfig> {
    match path {
        Some(path) => {
            info!("Loading configuration from: {:?}", path);
            ServerConfig::from_file(path).with_context(|| format!("Failed to load config {:?}", path))
        }
        None => {
            info!("Using default configuration");
            Ok(ServerConfig::default())
        }
    }
}

/// Start the server
async fn start_server(args: &Args) -> anyhow::Result<()> {
    info!("Starting Fleece Server v{}", fleece_server::VERSION);

    let mut config = load_config(args.config.as_ref())?;
    if let Some(bind) = args.bind {
        config.bind = bind;
    }

    let server = FleeceServer::new(config)?;

    info!("Server configuration:");
    info!("  Bind address: {}", server.config().bind);
    info!("  Device: {}", server.config().device_name());
    info!("  Cache capacity: {}", server.config().cache.capacity);
    match &server.config().default_model {
        Some(model) => info!("  Default model: {} ({})", model.model_name, model.task),
        None => info!("  Default model: none"),
    }

    run_server(server).await?;
    Ok(())
}

/// Generate a default configuration file
fn generate_config(output: &Path, force: bool) -> anyhow::Result<()> {
    if output.exists() && !force {
        error!("Configuration file already exists: {:?}", output);
        error!("Use --force to overwrite");
        bail!("Configuration file already exists: {:?}", output);
    }

    ServerConfig::default().to_file(output)?;

    info!("Generated default configuration file: {:?}", output);
    Ok(())
}

/// Validate a configuration file
fn validate_config(config_path: &Path) -> anyhow::Result<()> {
    info!("Validating configuration file: {:?}", config_path);

    let config = ServerConfig::from_file(config_path)
        .with_context(|| format!("Invalid configuration: {:?}", config_path))?;
    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        return Err(e.into());
    }

    info!("Configuration is valid");
    info!("  Bind address: {}", config.bind);
    info!("  Cache capacity: {}", config.cache.capacity);
    info!("  Loader: {:?}", config.loader);
    Ok(())
}

/// Show server information
fn show_info() {
    println!("Fleece Server v{}", fleece_server::VERSION);
    println!("Dynamic inference API over a bounded, single-flight model cache");
    println!();
    println!("Endpoints:");
    println!("  POST /predict     Run a model on one input or a batch");
    println!("  GET  /healthz     Liveness probe");
    println!("  GET  /readiness   Readiness probe (default model loadable)");
    println!("  GET  /metrics     Prometheus metrics");
    println!("  GET  /cache_info  Cache counters and cached models");
    println!();
    println!("Configuration:");
    println!("  • Default bind address: 0.0.0.0:8000");
    println!("  • Configuration file: fleece-server.toml");
    println!("  • Environment overrides: FLEECE_<KEY>, nested with __");
    println!();
    println!("Usage:");
    println!("  fleece-server                       # Start with default config");
    println!("  fleece-server -c config.toml        # Start with custom config");
    println!("  fleece-server config                # Generate default config");
    println!("  fleece-server validate config.toml  # Validate config file");
}
