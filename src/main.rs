mod api;
mod config;
mod error;
mod relay;

use tracing_subscriber::EnvFilter;

use config::{Config, LogFormat};
use error::Result;
use relay::reaper::spawn_reaper;
use relay::{RelayServer, RoomTable};

#[tokio::main]
async fn main() {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("relay-server: {}", e);
            std::process::exit(2);
        }
    };

    init_tracing(config.log_format);

    if let Err(e) = run(config).await {
        tracing::error!(error = %e, "Relay server failed");
        std::process::exit(1);
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

async fn run(config: Config) -> Result<()> {
    let table = RoomTable::new(config.relay.max_code_attempts);
    let server = RelayServer::new(config.relay.clone(), table);

    let reaper = spawn_reaper(
        server.table().clone(),
        config.relay.reaper_interval,
        config.relay.room_ttl,
    );

    let (status_addr, status_server) =
        api::bind_status_server(config.status_address(), server.table().clone())?;
    let status = tokio::spawn(status_server);
    tracing::info!(addr = %status_addr, "Status responder listening");

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    };

    let result = server.run_until(config.relay_address(), shutdown).await;

    reaper.abort();
    status.abort();
    tracing::info!("Relay server stopped");

    result
}
