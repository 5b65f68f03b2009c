use anyhow::Context;
use clap::Parser;
use peer_relay::{config::Settings, service::RelayDaemon};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "peer-relay")]
#[command(about = "Relay server brokering connections between named peers")]
struct Cli {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<String>,

    /// Override the listening port
    #[arg(short, long)]
    port: Option<u16>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(format!("peer_relay={}", log_level))
        .init();

    info!("Starting Peer Relay v{}", env!("CARGO_PKG_VERSION"));

    let mut settings =
        Settings::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(port) = cli.port {
        settings.server.port = port;
    }

    // Persistence is not wired into the standalone server; database requests
    // go unanswered.
    let daemon = RelayDaemon::new(settings, None);
    let shutdown = daemon.shutdown_handle();

    let run = tokio::spawn(daemon.run());
    let signalled = tokio::spawn(async move {
        match shutdown_signal().await {
            Ok(()) => info!("Shutdown signal received, stopping relay..."),
            Err(e) => error!("Failed to listen for shutdown signals: {}", e),
        }
        let _ = shutdown.send(());
    });

    let result = run.await.context("Relay task panicked")?;
    signalled.abort();
    if let Err(e) = &result {
        error!("Relay error: {}", e);
    }
    result?;

    info!("Peer Relay stopped");
    Ok(())
}

async fn shutdown_signal() -> std::io::Result<()> {
    use tokio::signal;

    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {},
            _ = sigint.recv() => {},
        }
        Ok(())
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await
    }
}
