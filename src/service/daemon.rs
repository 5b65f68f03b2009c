use crate::{
    config::Settings,
    server::{DatabaseHandler, RelayServer, ServerEvent},
    RelayError, Result,
};
use std::fmt::Write as _;
use std::io::BufRead;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};

/// Operator console commands read from stdin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleCommand {
    Help,
    Open,
    Close,
    ShowServer,
    ShowClients,
}

impl FromStr for ConsoleCommand {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self> {
        let words: Vec<&str> = s.split_whitespace().collect();
        match words.as_slice() {
            ["help"] => Ok(ConsoleCommand::Help),
            ["open"] => Ok(ConsoleCommand::Open),
            ["close"] => Ok(ConsoleCommand::Close),
            ["show", "server"] => Ok(ConsoleCommand::ShowServer),
            ["show", "clients"] => Ok(ConsoleCommand::ShowClients),
            _ => Err(RelayError::InvalidParameter(format!(
                "Unknown command '{}', try 'help'",
                s.trim()
            ))),
        }
    }
}

const HELP: &str = "\
help          show this list
open          start accepting peers
close         disconnect every peer and stop accepting
show server   listening address and peer count
show clients  connected peers and their channels";

/// The relay process: owns the server, logs its events and serves the
/// operator console.
pub struct RelayDaemon {
    server: RelayServer,
    events: mpsc::UnboundedReceiver<ServerEvent>,
    shutdown_tx: broadcast::Sender<()>,
}

impl RelayDaemon {
    pub fn new(settings: Settings, handler: Option<Arc<dyn DatabaseHandler>>) -> Self {
        let (server, events) = RelayServer::new(settings.server, handler);
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            server,
            events,
            shutdown_tx,
        }
    }

    pub fn server(&self) -> &RelayServer {
        &self.server
    }

    /// Sender that stops [`RelayDaemon::run`] when signalled.
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            server,
            mut events,
            shutdown_tx,
        } = self;
        let mut shutdown_rx = shutdown_tx.subscribe();

        server.open().await?;

        let event_handle = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                log_event(&event);
            }
        });

        let console_handle = {
            let server = server.clone();
            let mut shutdown_rx = shutdown_tx.subscribe();
            tokio::spawn(async move {
                tokio::select! {
                    _ = run_console(&server) => {
                        info!("Console input closed");
                    }
                    _ = shutdown_rx.recv() => {}
                }
            })
        };

        let _ = shutdown_rx.recv().await;
        info!("Shutting down relay");

        console_handle.abort();
        server.close().await;
        drop(server);
        // The logger ends once every sender is gone; don't wait on stray tasks.
        event_handle.abort();
        Ok(())
    }
}

async fn run_console(server: &RelayServer) {
    let mut lines = spawn_stdin_reader();
    while let Some(line) = lines.recv().await {
        if line.trim().is_empty() {
            continue;
        }
        match line.parse::<ConsoleCommand>() {
            Ok(command) => println!("{}", execute(server, command).await),
            Err(e) => println!("{}", e),
        }
    }
}

/// Blocking stdin reads live on their own thread so a pending read never
/// holds up runtime shutdown.
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    let spawned = std::thread::Builder::new()
        .name("relay-console".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("Failed to read console input: {}", e);
                        break;
                    }
                }
            }
        });
    if let Err(e) = spawned {
        warn!("Console unavailable: {}", e);
    }
    rx
}

/// Runs one console command and returns the text to show the operator.
pub async fn execute(server: &RelayServer, command: ConsoleCommand) -> String {
    match command {
        ConsoleCommand::Help => HELP.to_string(),
        ConsoleCommand::Open => match server.open().await {
            Ok(addr) => format!("Listening on {}", addr),
            Err(e) => format!("Failed to open relay: {}", e),
        },
        ConsoleCommand::Close => {
            if server.close().await {
                "Relay closed".to_string()
            } else {
                "Relay is not running".to_string()
            }
        }
        ConsoleCommand::ShowServer => match server.local_addr().await {
            Some(addr) => format!(
                "Listening on {} with {} peer(s)",
                addr,
                server.peer_ids().await.len()
            ),
            None => "Relay is not running".to_string(),
        },
        ConsoleCommand::ShowClients => {
            let peers = server.peer_ids().await;
            if peers.is_empty() {
                return "No peers connected".to_string();
            }
            let mut out = String::new();
            for peer_id in peers {
                let endpoints = server.peer_endpoints(&peer_id).await;
                let endpoints: Vec<String> = endpoints.iter().map(|e| e.to_string()).collect();
                let _ = writeln!(out, "{}: {}", peer_id, endpoints.join(", "));
            }
            out.trim_end().to_string()
        }
    }
}

fn log_event(event: &ServerEvent) {
    match event {
        ServerEvent::Error { .. } => error!("{}", event),
        ServerEvent::TransferFailed { .. } => warn!("{}", event),
        ServerEvent::PeerOffline {
            graceful: false, ..
        } => warn!("{}", event),
        _ => info!("{}", event),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerSettings;

    #[test]
    fn test_parse_commands() {
        assert_eq!("help".parse::<ConsoleCommand>().unwrap(), ConsoleCommand::Help);
        assert_eq!(
            "  show   clients ".parse::<ConsoleCommand>().unwrap(),
            ConsoleCommand::ShowClients
        );
        assert_eq!(
            "show server".parse::<ConsoleCommand>().unwrap(),
            ConsoleCommand::ShowServer
        );
        assert!("show".parse::<ConsoleCommand>().is_err());
        assert!("quit".parse::<ConsoleCommand>().is_err());
    }

    #[tokio::test]
    async fn test_execute_lifecycle() {
        let settings = ServerSettings {
            bind_address: "127.0.0.1".to_string(),
            port: 0,
            ..ServerSettings::default()
        };
        let (server, _events) = RelayServer::new(settings, None);

        assert_eq!(
            execute(&server, ConsoleCommand::ShowServer).await,
            "Relay is not running"
        );
        assert!(execute(&server, ConsoleCommand::Open)
            .await
            .starts_with("Listening on 127.0.0.1:"));
        assert!(execute(&server, ConsoleCommand::ShowServer)
            .await
            .ends_with("with 0 peer(s)"));
        assert_eq!(
            execute(&server, ConsoleCommand::ShowClients).await,
            "No peers connected"
        );
        assert_eq!(execute(&server, ConsoleCommand::Close).await, "Relay closed");
        assert_eq!(
            execute(&server, ConsoleCommand::Close).await,
            "Relay is not running"
        );
    }
}
