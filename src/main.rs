use clap::Parser;
use tracing::Level;

use banter_server::ServerConfig;
use banter_telemetry::TelemetryConfig;

/// Single-room WebSocket message relay.
#[derive(Debug, Parser)]
#[command(name = "banter", version, about)]
struct Args {
    /// Address to bind.
    #[arg(long, default_value = "0.0.0.0")]
    bind: String,
    /// Port to listen on.
    #[arg(long, default_value_t = 8080)]
    port: u16,
    /// Default log level (RUST_LOG wins when set).
    #[arg(long, default_value = "info")]
    log_level: Level,
    /// Emit logs as JSON.
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    banter_telemetry::init(&TelemetryConfig {
        log_level: args.log_level,
        json_output: args.json_logs,
    });

    let (bind_addr, port) = listen_addr_override().unwrap_or((args.bind, args.port));

    let config = ServerConfig {
        bind_addr,
        port,
        ..Default::default()
    };
    let handle = banter_server::start(config)
        .await
        .expect("failed to start server");

    tracing::info!(port = handle.port, "banter ready");

    tokio::signal::ctrl_c()
        .await
        .expect("failed to listen for ctrl+c");
    tracing::info!("shutting down");
}

/// `LISTEN_ADDR=host:port` overrides the `--bind`/`--port` flags.
fn listen_addr_override() -> Option<(String, u16)> {
    let addr = std::env::var("LISTEN_ADDR").ok()?;
    let (host, port) = addr.rsplit_once(':')?;
    let port = port.parse().ok()?;
    Some((host.to_owned(), port))
}
