use crate::{RelayError, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub client: ClientSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind_address: String,
    pub port: u16,
    /// How long a file relay waits for the target's new secondary channel.
    pub secondary_grace_ms: u64,
    pub handshake_timeout_ms: u64,
    pub buffer_size: usize,
    pub max_frame_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    pub peer_id: String,
    pub server_address: String,
    pub handshake_timeout_ms: u64,
    pub secondary_idle_timeout_ms: u64,
    pub chunk_size: usize,
    pub header_delay_ms: u64,
    pub chunk_delay_ms: u64,
    pub request_timeout_ms: u64,
    pub request_poll_ms: u64,
    /// Allow only one outstanding database request at a time.
    pub serialize_requests: bool,
    pub max_frame_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 9000,
            secondary_grace_ms: 3000,
            handshake_timeout_ms: 15_000,
            buffer_size: 1024 * 1024, // 1MB relay chunks
            max_frame_size: 16 * 1024 * 1024,
        }
    }
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            peer_id: gethostname::gethostname().to_string_lossy().to_string(),
            server_address: "127.0.0.1:9000".to_string(),
            handshake_timeout_ms: 15_000,
            secondary_idle_timeout_ms: 15_000,
            chunk_size: 1024 * 1024,
            header_delay_ms: 100,
            chunk_delay_ms: 10,
            request_timeout_ms: 10_000,
            request_poll_ms: 100,
            serialize_requests: false,
            max_frame_size: 16 * 1024 * 1024,
        }
    }
}

impl Settings {
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = match config_path {
            Some(path) => PathBuf::from(path),
            None => Self::default_config_path()?,
        };

        if path.exists() {
            let content = fs::read_to_string(&path)
                .map_err(|e| RelayError::Config(format!("Failed to read config: {}", e)))?;

            let settings: Settings = toml::from_str(&content)
                .map_err(|e| RelayError::Config(format!("Failed to parse config: {}", e)))?;

            settings.validate()?;
            Ok(settings)
        } else {
            let settings = Self::default();
            settings.save(Some(&path))?;
            Ok(settings)
        }
    }

    pub fn save(&self, config_path: Option<&Path>) -> Result<()> {
        let path = match config_path {
            Some(path) => path.to_path_buf(),
            None => Self::default_config_path()?,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| RelayError::Config(format!("Failed to create config dir: {}", e)))?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| RelayError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(&path, content)
            .map_err(|e| RelayError::Config(format!("Failed to write config: {}", e)))?;

        Ok(())
    }

    fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "peer-relay", "relay")
            .ok_or_else(|| RelayError::Config("Failed to get project directories".to_string()))?;

        Ok(proj_dirs.config_dir().join("config.toml"))
    }

    fn validate(&self) -> Result<()> {
        self.server.validate()?;
        self.client.validate()
    }
}

impl ServerSettings {
    pub fn validate(&self) -> Result<()> {
        if self.buffer_size == 0 {
            return Err(RelayError::Config("buffer_size must be non-zero".to_string()));
        }
        Ok(())
    }

    pub fn get_bind_address(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.bind_address, self.port)
            .parse()
            .map_err(|e| RelayError::Config(format!("Invalid bind address: {}", e)))
    }

    pub fn secondary_grace(&self) -> Duration {
        Duration::from_millis(self.secondary_grace_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

impl ClientSettings {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(RelayError::Config("chunk_size must be non-zero".to_string()));
        }
        if self.peer_id.is_empty() {
            return Err(RelayError::Config("peer_id must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn with_peer_id(peer_id: impl Into<String>, server_address: SocketAddr) -> Self {
        Self {
            peer_id: peer_id.into(),
            server_address: server_address.to_string(),
            ..Self::default()
        }
    }

    pub fn get_server_address(&self) -> Result<SocketAddr> {
        self.server_address
            .parse()
            .map_err(|e| RelayError::Config(format!("Invalid server address: {}", e)))
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn secondary_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.secondary_idle_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn request_poll(&self) -> Duration {
        Duration::from_millis(self.request_poll_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let path_str = path.to_string_lossy().to_string();

        let settings = Settings::load(Some(&path_str)).unwrap();
        assert!(path.exists());
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.server.secondary_grace_ms, 3000);

        let reloaded = Settings::load(Some(&path_str)).unwrap();
        assert_eq!(reloaded.client.peer_id, settings.client.peer_id);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "[server]\nport = 7100\n\n[client]\npeer_id = \"alice\"\n",
        )
        .unwrap();

        let settings = Settings::load(Some(&path.to_string_lossy())).unwrap();
        assert_eq!(settings.server.port, 7100);
        assert_eq!(settings.server.buffer_size, 1024 * 1024);
        assert_eq!(settings.client.peer_id, "alice");
        assert_eq!(settings.client.request_poll_ms, 100);
    }

    #[test]
    fn test_rejects_empty_peer_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[client]\npeer_id = \"\"\n").unwrap();

        let err = Settings::load(Some(&path.to_string_lossy())).unwrap_err();
        assert!(matches!(err, RelayError::Config(_)));
    }

    #[test]
    fn test_zero_sizes_are_rejected() {
        let server = ServerSettings {
            buffer_size: 0,
            ..ServerSettings::default()
        };
        assert!(matches!(server.validate(), Err(RelayError::Config(_))));

        let client = ClientSettings {
            chunk_size: 0,
            ..ClientSettings::default()
        };
        assert!(matches!(client.validate(), Err(RelayError::Config(_))));
        assert!(ClientSettings::default().validate().is_ok());
    }

    #[test]
    fn test_bind_address() {
        let mut server = ServerSettings::default();
        server.bind_address = "127.0.0.1".to_string();
        server.port = 0;
        let addr = server.get_bind_address().unwrap();
        assert!(addr.ip().is_loopback());
    }
}
