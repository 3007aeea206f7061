use clap::Parser;
use switchboard_server::ServerConfig;
use tracing_subscriber::EnvFilter;

/// Rendezvous relay for peer-to-peer session negotiation.
#[derive(Parser, Debug)]
#[command(name = "switchboard", version, about)]
struct Cli {
    /// Host to bind (overrides SWITCHBOARD_HOST).
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (overrides PORT).
    #[arg(short, long)]
    port: Option<u16>,

    /// Log filter (overrides RUST_LOG), e.g. "info" or "switchboard_server=debug".
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = match cli.log_level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Flags take precedence over the environment, which beats the defaults.
    let mut config = ServerConfig::from_env();
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }

    let metrics_handle = switchboard_server::metrics::install_recorder();

    let handle = match switchboard_server::start(config, metrics_handle).await {
        Ok(handle) => handle,
        Err(e) => {
            tracing::error!(error = %e, "failed to start server");
            std::process::exit(1);
        }
    };
    tracing::info!(addr = %handle.addr, "switchboard ready");

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl+c");
    }

    tracing::info!("shutting down");
    handle.stop().await;
}
