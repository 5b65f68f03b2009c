use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use peer_relay::client::{ChunkReceived, ClientEvent, PeerClient};
use peer_relay::config::{ClientSettings, Settings};
use peer_relay::network::{DatabaseOperation, Payload, User};
use peer_relay::transfer::TransferTracker;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Parser)]
#[command(name = "relay-client")]
#[command(about = "Command-line peer for a peer-relay server")]
struct Cli {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<String>,

    /// Relay address, overriding the configuration
    #[arg(short, long)]
    server: Option<String>,

    /// Peer id, overriding the configuration
    #[arg(short = 'i', long)]
    peer_id: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Stay connected, print messages and save incoming images and files
    Listen {
        #[arg(short, long, default_value = "downloads")]
        downloads: PathBuf,
    },
    SendText {
        target: String,
        message: String,
    },
    SendImage {
        target: String,
        path: PathBuf,
    },
    SendFile {
        target: String,
        path: PathBuf,
    },
    /// Send a database request and wait for its result
    Request {
        operation: String,
        #[arg(default_value = "")]
        argument: String,
        /// User record sent as the payload, as JSON
        #[arg(long)]
        user: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(format!("peer_relay={},relay_client={}", log_level, log_level))
        .init();

    let settings = client_settings(&cli)?;
    let (client, events) = PeerClient::new(settings).context("Invalid client settings")?;

    client.open();
    client
        .connect()
        .await
        .context("Failed to connect to relay")?;

    let result = match cli.command {
        Command::Listen { downloads } => listen(events, &downloads).await,
        Command::SendText { target, message } => client
            .send_text(&target, &message)
            .await
            .context("Failed to send text"),
        Command::SendImage { target, path } => client
            .send_image(&target, &path)
            .await
            .context("Failed to send image"),
        Command::SendFile { target, path } => client
            .send_file(&target, &path)
            .await
            .context("Failed to send file"),
        Command::Request {
            operation,
            argument,
            user,
        } => request(&client, &operation, &argument, user.as_deref()).await,
    };

    client.close().await;
    result
}

fn client_settings(cli: &Cli) -> anyhow::Result<ClientSettings> {
    let mut settings = Settings::load(cli.config.as_deref())
        .context("Failed to load configuration")?
        .client;
    if let Some(server) = &cli.server {
        settings.server_address = server.clone();
    }
    if let Some(peer_id) = &cli.peer_id {
        settings.peer_id = peer_id.clone();
    }
    Ok(settings)
}

async fn request(
    client: &PeerClient,
    operation: &str,
    argument: &str,
    user: Option<&str>,
) -> anyhow::Result<()> {
    if operation.parse::<DatabaseOperation>().is_err() {
        warn!("{} is not a known database operation; sending anyway", operation);
    }

    let payload = match user {
        Some(json) => {
            let user: User = serde_json::from_str(json).context("Invalid user JSON")?;
            Payload::User(user)
        }
        None => Payload::None,
    };

    let result = client.request(payload, operation, argument).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

async fn listen(
    mut events: mpsc::UnboundedReceiver<ClientEvent>,
    downloads: &Path,
) -> anyhow::Result<()> {
    let mut tracker = TransferTracker::new();
    info!("Listening; saving transfers to {:?}", downloads);

    loop {
        let event = tokio::select! {
            event = events.recv() => event,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                return Ok(());
            }
        };

        match event {
            Some(ClientEvent::TextReceived { source, message }) => {
                println!("{}: {}", source, message);
            }
            Some(ClientEvent::ImageChunk(chunk)) | Some(ClientEvent::FileChunk(chunk)) => {
                if let Err(e) = save_chunk(&mut tracker, downloads, chunk).await {
                    warn!("{:#}", e);
                }
            }
            Some(ClientEvent::TransferAborted {
                source,
                name,
                reason,
            }) => {
                let key = transfer_key(&source, &name);
                if tracker.is_tracked(&key) {
                    if let Err(e) = tracker.end(&key).await {
                        warn!("Failed to close {}: {}", name, e);
                    }
                    println!("Incomplete {} from {}: {}", name, source, reason);
                }
            }
            Some(ClientEvent::RequestResult { request_id, result }) => {
                let result = serde_json::to_string(&result)?;
                println!("Result for {:?}: {}", request_id, result);
            }
            Some(ClientEvent::Notice(notice)) => debug!("{}", notice),
            Some(ClientEvent::Error { context, message }) => warn!("{}: {}", context, message),
            Some(ClientEvent::Disconnected) | None => bail!("Disconnected from relay"),
        }
    }
}

fn transfer_key(source: &str, name: &str) -> String {
    format!("{}/{}", source, name)
}

async fn save_chunk(
    tracker: &mut TransferTracker,
    downloads: &Path,
    chunk: ChunkReceived,
) -> anyhow::Result<()> {
    // Remote names must not escape the download directory.
    let file_name = Path::new(&chunk.name)
        .file_name()
        .with_context(|| format!("Refusing transfer named {:?}", chunk.name))?;
    let key = transfer_key(&chunk.source, &chunk.name);

    if tracker
        .begin(&key, chunk.total_size, downloads.join(file_name))
        .await?
    {
        println!(
            "Receiving {} ({} bytes) from {}",
            chunk.name, chunk.total_size, chunk.source
        );
    }
    if tracker.advance(&key, &chunk.data).await? {
        println!("Saved {}", downloads.join(file_name).display());
    } else if let Some(progress) = tracker.progress(&key) {
        debug!("{}: {:.1}%", chunk.name, progress.percentage());
    }
    Ok(())
}
