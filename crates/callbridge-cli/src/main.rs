use std::sync::Arc;

use clap::{Parser, Subcommand};

use callbridge_core::config::{Config, LoggingConfig};
use callbridge_gateway::engine_rest::{NullEngine, RestEngine};
use callbridge_gateway::{GatewayState, SessionRegistry};

#[derive(Parser)]
#[command(
    name = "callbridge",
    about = "Real-time bridge between telephony media streams and speech services",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the bridge server
    Serve {
        /// Port to listen on (default: 8089)
        #[arg(long)]
        port: Option<u16>,

        /// Skip the Prometheus metrics recorder
        #[arg(long)]
        no_metrics: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Query a running bridge for its status
    Status,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Validate the configuration and report problems
    Validate,
}

/// Build the tracing subscriber from the logging config. `--verbose` and
/// `RUST_LOG` both override the configured level.
fn init_logging(logging: &LoggingConfig, verbose: bool) {
    let level = if verbose {
        "debug".to_string()
    } else {
        logging.level.clone().unwrap_or_else(|| "info".to_string())
    };

    let mut directives = vec![level];
    directives.extend(logging.filters.iter().cloned());
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(directives.join(",")));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match (logging.format.as_str(), logging.output.as_str()) {
        ("json", "stdout") => builder.json().with_writer(std::io::stdout).init(),
        ("json", _) => builder.json().with_writer(std::io::stderr).init(),
        (_, "stdout") => builder.with_writer(std::io::stdout).init(),
        _ => builder.with_writer(std::io::stderr).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .map(std::path::PathBuf::from)
        .unwrap_or_else(Config::config_dir);

    let mut config = Config::load(&config_path)?;
    init_logging(&config.logging.clone().unwrap_or_default(), cli.verbose);

    match cli.command {
        Commands::Serve { port, no_metrics } => {
            if let Some(port) = port {
                config.server.get_or_insert_with(Default::default).port = port;
            }

            let (warnings, errors) = config.validate();
            for warning in &warnings {
                tracing::warn!("{warning}");
            }
            if !errors.is_empty() {
                for error in &errors {
                    tracing::error!("{error}");
                }
                anyhow::bail!("Invalid configuration ({} errors)", errors.len());
            }

            let metrics_handle = if no_metrics {
                None
            } else {
                Some(callbridge_gateway::metrics::install_prometheus_recorder())
            };

            let registry = Arc::new(SessionRegistry::new());
            let engine: Arc<dyn callbridge_core::engine::DecisionEngine> = match &config.engine {
                Some(engine_config) => {
                    tracing::info!("Decision engine: {}", engine_config.url);
                    Arc::new(RestEngine::new(engine_config, registry.clone())?)
                }
                None => {
                    tracing::info!("No decision engine configured, running recognition-only");
                    Arc::new(NullEngine)
                }
            };

            let state = Arc::new(GatewayState::new(
                Arc::new(config),
                registry,
                engine,
                metrics_handle,
            )?);

            tracing::info!("Starting CallBridge v{}", env!("CARGO_PKG_VERSION"));
            callbridge_gateway::start_server(state).await?;
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let json = serde_json::to_string_pretty(&config)?;
                println!("{json}");
            }
            ConfigAction::Validate => {
                let (warnings, errors) = config.validate();
                for warning in &warnings {
                    println!("warning: {warning}");
                }
                for error in &errors {
                    println!("error: {error}");
                }
                if errors.is_empty() {
                    println!("Configuration OK ({} warnings)", warnings.len());
                } else {
                    anyhow::bail!("Invalid configuration ({} errors)", errors.len());
                }
            }
        },
        Commands::Status => {
            let url = format!("http://127.0.0.1:{}/health", config.server_port());
            match reqwest::get(&url).await {
                Ok(resp) => {
                    let body: serde_json::Value = resp.json().await?;
                    println!("CallBridge v{}", env!("CARGO_PKG_VERSION"));
                    println!("Config: {}", config_path.display());
                    println!("Status: {}", body["status"].as_str().unwrap_or("unknown"));
                    println!("Active calls: {}", body["active_calls"]);
                }
                Err(_) => {
                    println!("CallBridge v{}", env!("CARGO_PKG_VERSION"));
                    println!("Config: {}", config_path.display());
                    println!("Status: not running (no bridge on port {})", config.server_port());
                }
            }
        }
    }

    Ok(())
}
