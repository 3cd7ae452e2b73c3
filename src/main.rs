use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tokio::io::{AsyncWriteExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

use gatekeeper::config::GatekeeperConfig;
use gatekeeper::ratelimit::{spawn_sweeper, RateLimiter, SystemClock, TimeWindow};
use gatekeeper::replay::replay;
use gatekeeper::simulate::{simulate, SimulationOptions};

#[derive(Debug, Parser)]
#[command(name = "gatekeeper", version, about = "Tiered fixed-window request admission control")]
struct Cli {
    /// YAML configuration file; GATEKEEPER__* environment variables override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Feed a JSON-lines request trace through the limiter
    Replay {
        /// Trace file; reads stdin when omitted
        #[arg(short, long)]
        input: Option<PathBuf>,
    },
    /// Print the effective tier limits
    Limits,
    /// Drive the limiter with concurrent simulated clients
    Simulate {
        #[arg(long, default_value_t = 8)]
        clients: usize,

        #[arg(long, default_value_t = 16)]
        identities: usize,

        #[arg(long, default_value_t = 0.5)]
        authenticated_ratio: f64,

        #[arg(long, default_value_t = 5)]
        duration_secs: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = GatekeeperConfig::load(cli.config.as_deref()).context("loading configuration")?;
    let limiter = Arc::new(RateLimiter::from_config(&config).context("building rate limiter")?);
    info!(
        anonymous_per_minute = config.tiers.anonymous.per_minute,
        anonymous_per_day = config.tiers.anonymous.per_day,
        authenticated_per_minute = config.tiers.authenticated.per_minute,
        authenticated_per_day = config.tiers.authenticated.per_day,
        custom_limits = config.custom_limits.len(),
        "Rate limiter initialized"
    );

    match cli.command {
        Command::Replay { input } => {
            let stdout = tokio::io::stdout();
            let summary = match input {
                Some(path) => {
                    let file = tokio::fs::File::open(&path)
                        .await
                        .with_context(|| format!("opening trace {}", path.display()))?;
                    replay(&limiter, BufReader::new(file), stdout).await?
                }
                None => replay(&limiter, BufReader::new(tokio::io::stdin()), stdout).await?,
            };
            info!(
                requests = summary.requests,
                allowed = summary.allowed,
                denied_minute = summary.denied_minute,
                denied_day = summary.denied_day,
                "Replay finished"
            );
        }
        Command::Limits => {
            let yaml = serde_yaml::to_string(&config).context("encoding limits")?;
            tokio::io::stdout().write_all(yaml.as_bytes()).await?;
            for window in TimeWindow::ALL {
                info!(
                    window = %window,
                    anonymous = config.tiers.anonymous.max_for(window),
                    authenticated = config.tiers.authenticated.max_for(window),
                    "Default limit"
                );
            }
        }
        Command::Simulate {
            clients,
            identities,
            authenticated_ratio,
            duration_secs,
        } => {
            let clock = Arc::new(SystemClock);
            let sweeper = config
                .sweeper
                .enabled
                .then(|| spawn_sweeper(limiter.clone(), clock.clone(), config.sweep_interval()));

            let options = SimulationOptions {
                clients,
                identities,
                authenticated_ratio,
                duration: Duration::from_secs(duration_secs),
            };
            let report = simulate(limiter.clone(), clock, options).await?;

            if let Some(sweeper) = sweeper {
                sweeper.shutdown().await;
            }

            let mut encoded = serde_json::to_vec_pretty(&report)?;
            encoded.push(b'\n');
            tokio::io::stdout().write_all(&encoded).await?;
        }
    }

    Ok(())
}

/// Install the global subscriber, logging to stderr so stdout stays parseable.
fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}
