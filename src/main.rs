use addbus::client::{ClientError, RpcClient, RunOptions};
use addbus::config::{self, Config, LogFormat};
use addbus::dbus::AdderService;
use addbus::rpc::{report, BusKind, ZbusBus};
use clap::{Parser, Subcommand};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "addbus")]
#[command(author, version, about = "Request/reply RPC over D-Bus", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Use this config file instead of the default location
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read lines from stdin and send each one to the service
    Call {
        /// Bus to connect to
        #[arg(long, value_enum)]
        bus: Option<BusKind>,

        /// Reply timeout in milliseconds (-1 = bus default)
        #[arg(long, allow_hyphen_values = true)]
        timeout_ms: Option<i32>,

        /// Exit at the first failed request
        #[arg(long)]
        fail_fast: bool,
    },

    /// Serve the adder interface until interrupted
    Serve {
        /// Bus to register on
        #[arg(long, value_enum)]
        bus: Option<BusKind>,
    },

    /// Configure settings
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

fn init_logging(verbose: bool, logging: &config::LoggingConfig) {
    let filter = if verbose {
        EnvFilter::new("addbus=debug,zbus=info")
    } else {
        EnvFilter::new(format!("addbus={},zbus=warn", logging.level))
    };

    // stdout carries call results only.
    let registry = tracing_subscriber::registry().with(filter);
    match logging.format {
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<Config> {
    Ok(match path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Call {
            bus,
            timeout_ms,
            fail_fast,
        } => {
            let mut config = load_config(cli.config.as_ref())?;
            init_logging(cli.verbose, &config.logging);

            if let Some(bus) = bus {
                config.bus.kind = bus;
            }
            if let Some(timeout_ms) = timeout_ms {
                config.call.timeout_ms = timeout_ms;
            }
            config.client.fail_fast |= fail_fast;
            config.validate()?;

            let bus = match ZbusBus::connect(config.bus.kind).await {
                Ok(bus) => bus,
                Err(e) => {
                    eprintln!("{}", report(&e));
                    return Ok(ExitCode::FAILURE);
                }
            };

            let mut client = RpcClient::from_config(bus, &config)?;
            let options = RunOptions {
                fail_fast: config.client.fail_fast,
                prompt: std::io::stdin()
                    .is_terminal()
                    .then(|| config.client.prompt.clone()),
            };

            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            let mut stdout = tokio::io::stdout();
            match client.run(stdin, &mut stdout, &options).await {
                Ok(summary) => {
                    info!(
                        "Done: {} succeeded, {} failed",
                        summary.succeeded, summary.failed
                    );
                }
                // Already reported by the client.
                Err(ClientError::Rpc(_)) => return Ok(ExitCode::FAILURE),
                Err(e) => return Err(e.into()),
            }
        }

        Commands::Serve { bus } => {
            let config = load_config(cli.config.as_ref())?;
            init_logging(cli.verbose, &config.logging);

            let kind = bus.unwrap_or(config.bus.kind);
            let _service = AdderService::start(kind, &config.service).await?;
            info!("Press Ctrl-C to stop");
            tokio::signal::ctrl_c().await?;
            info!("Shutting down");
        }

        Commands::Config { show } => {
            if show {
                config::show(cli.config.as_deref())?;
            } else {
                println!("No changes specified. Use --show to view current config.");
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}
