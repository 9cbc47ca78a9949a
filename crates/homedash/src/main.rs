//! `homedash`: headless daemon for the home dashboard core.
//!
//! Loads configuration, restores persisted state, waits (bounded) for the
//! configured services, then keeps polling them until Ctrl-C. Connection
//! transitions are logged as they happen.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use color_eyre::eyre::{Result, WrapErr};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use homedash_core::{Dashboard, Subscription};

/// Watch the services behind the home dashboard.
#[derive(Parser, Debug)]
#[command(name = "homedash", version, about)]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(short, long, env = "HOMEDASH_CONFIG")]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

fn setup_tracing(cli: &Cli) {
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "homedash={log_level},homedash_core={log_level},homedash_api={log_level}"
        ))
    });

    let registry = tracing_subscriber::registry().with(filter);
    match cli.log_format {
        LogFormat::Text => registry
            .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
            .init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
    }
}

/// Log connection transitions as they are emitted.
fn log_transitions(dashboard: &Dashboard) -> Subscription {
    dashboard.bus().on("connection:*", |event| {
        if event.name.ends_with(":online") {
            info!(event = %event.name, metadata = %event.payload, "service came online");
        } else {
            warn!(event = %event.name, detail = %event.payload, "service went offline");
        }
        Ok(())
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    setup_tracing(&cli);

    let path = cli.config.clone().unwrap_or_else(homedash_config::config_path);
    let config = homedash_config::load_config_from(&path)
        .wrap_err_with(|| format!("loading {}", path.display()))?;

    if cli.print_config {
        print!("{}", homedash_config::render_config(&config)?);
        return Ok(());
    }

    let dashboard_config = config.to_dashboard_config()?;
    info!(
        config = %path.display(),
        services = dashboard_config.services.len(),
        "starting homedash"
    );

    let dashboard = Dashboard::new(dashboard_config)?;
    let _transitions = log_transitions(&dashboard);

    let snapshot = dashboard.start().await;
    info!(
        status = %serde_json::to_string(&snapshot)?,
        "startup connection status"
    );

    tokio::signal::ctrl_c()
        .await
        .wrap_err("waiting for Ctrl-C")?;
    info!("interrupt received, shutting down");
    dashboard.shutdown();

    Ok(())
}
