use std::fmt;
use std::net::SocketAddr;

/// Notifications raised by a [`RelayServer`](crate::server::RelayServer).
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Started {
        addr: SocketAddr,
    },
    Stopped,
    PeerOnline {
        peer_id: String,
        endpoint: SocketAddr,
    },
    ChannelOpened {
        peer_id: String,
        port: u16,
    },
    /// Raised once per peer, when its primary channel goes away.
    PeerOffline {
        peer_id: String,
        graceful: bool,
    },
    ChannelClosed {
        peer_id: String,
        port: u16,
        graceful: bool,
    },
    TransferFailed {
        source: String,
        target: String,
        reason: String,
    },
    Error {
        context: String,
        message: String,
    },
}

impl fmt::Display for ServerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerEvent::Started { addr } => write!(f, "Relay listening on {}", addr),
            ServerEvent::Stopped => write!(f, "Relay stopped"),
            ServerEvent::PeerOnline { peer_id, endpoint } => {
                write!(f, "{} online from {}", peer_id, endpoint)
            }
            ServerEvent::ChannelOpened { peer_id, port } => {
                write!(f, "{} opened secondary channel {}", peer_id, port)
            }
            ServerEvent::PeerOffline { peer_id, graceful } => {
                if *graceful {
                    write!(f, "{} offline", peer_id)
                } else {
                    write!(f, "{} offline (connection lost)", peer_id)
                }
            }
            ServerEvent::ChannelClosed {
                peer_id,
                port,
                graceful,
            } => {
                if *graceful {
                    write!(f, "{} closed secondary channel {}", peer_id, port)
                } else {
                    write!(f, "{} lost secondary channel {}", peer_id, port)
                }
            }
            ServerEvent::TransferFailed {
                source,
                target,
                reason,
            } => write!(f, "Transfer {} -> {} failed: {}", source, target, reason),
            ServerEvent::Error { context, message } => write!(f, "{}: {}", context, message),
        }
    }
}
