use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use relay_server::shutdown::shutdown_signal;
use relay_server::RelayServer;
use relay_settings::load_settings;
use relay_store::Database;
use relay_telemetry::{init_telemetry, TelemetryConfig};

/// Real-time WebSocket message relay.
#[derive(Debug, Parser)]
#[command(name = "relay", version, about)]
struct Args {
    /// Settings file (JSON). Defaults to $RELAY_CONFIG, then ./relay.json.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen port, overriding settings and SERVER_PORT.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let loaded = load_settings(args.config.as_deref()).context("loading settings")?;
    let mut settings = loaded.settings.clone();
    if let Some(port) = args.port {
        settings.server.port = port;
    }

    let logging = &settings.logging;
    let (telemetry, invalid_levels) =
        TelemetryConfig::from_level_names(&logging.level, &logging.module_levels, logging.json);
    init_telemetry(&telemetry).context("initialising logging")?;

    loaded.log();
    for invalid in &invalid_levels {
        tracing::warn!(
            module = invalid.target.as_deref().unwrap_or("*"),
            value = %invalid.value,
            "invalid log level, ignoring"
        );
    }
    tracing::info!(
        address = %settings.server.address(),
        mode = ?settings.server.mode,
        database = %settings.database.kind,
        "starting relay"
    );

    let db = Database::from_settings(&settings.database).context("opening database")?;
    let metrics = relay_server::metrics::install_recorder().context("installing metrics recorder")?;

    RelayServer::new(settings, db)
        .with_metrics(metrics)
        .run(shutdown_signal())
        .await
        .context("running server")?;

    tracing::info!("relay stopped");
    Ok(())
}
