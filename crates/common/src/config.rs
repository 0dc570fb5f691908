use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Wire protocol constants
pub mod protocol {
    /// Name the relay uses for itself in `fromClientId` / `targetClientId`
    pub const RELAY_ADDRESS: &str = "server";

    /// Default port for the signaling endpoint
    pub const DEFAULT_PORT: u16 = 3000;

    /// Default port for the local operator API
    pub const DEFAULT_API_PORT: u16 = 3001;

    /// Port the hidden service exposes
    pub const HIDDEN_SERVICE_PORT: u16 = 80;

    /// Maximum inbound frame size (10 MB)
    pub const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

    /// Time to wait for a transfer response
    pub const NEGOTIATION_TIMEOUT_MS: u64 = 30_000;

    /// Longest one delivery may wait on a peer's full outbound queue
    pub const DELIVERY_TIMEOUT_MS: u64 = 5_000;

    /// Plaintext bytes per chunk for relay-initiated sends (16 KB)
    pub const CHUNK_SIZE: usize = 16 * 1024;

    /// Outbound events queued per session before senders wait
    pub const SESSION_BUFFER: usize = 256;
}

/// Chunk cipher constants
pub mod crypto {
    /// AES-256 key length
    pub const KEY_LEN: usize = 32;

    /// Per-chunk IV length
    pub const IV_LEN: usize = 16;

    /// GCM tag length
    pub const TAG_LEN: usize = 16;
}

/// Hidden service hostname polling
pub mod hidden_service {
    pub const POLL_INTERVAL_MS: u64 = 1000;

    pub const POLL_RETRIES: u32 = 30;

    pub const DIR_NAME: &str = "hidden_service";

    pub const HOSTNAME_FILE: &str = "hostname";

    pub const TORRC_FILE: &str = "torrc";
}

/// Relay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Listen address
    pub listen_addr: String,

    /// Listen port (forwarded by the hidden service)
    pub listen_port: u16,

    /// Operator API port, always bound to loopback
    pub api_port: u16,

    /// Tor data directory (torrc and hidden service live here)
    pub data_dir: String,

    /// Milliseconds to wait for a transfer response
    pub negotiation_timeout_ms: u64,

    /// Milliseconds a delivery may wait on a stalled peer
    pub delivery_timeout_ms: u64,

    /// Plaintext chunk size for relay-initiated sends
    pub chunk_size: usize,

    /// Bounded outbound queue per session
    pub session_buffer: usize,

    /// Delay between hostname file checks
    pub hostname_poll_interval_ms: u64,

    /// Hostname file checks before giving up
    pub hostname_poll_retries: u32,

    /// Enable verbose logging
    pub verbose: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1".to_string(),
            listen_port: protocol::DEFAULT_PORT,
            api_port: protocol::DEFAULT_API_PORT,
            data_dir: "./tor-data".to_string(),
            negotiation_timeout_ms: protocol::NEGOTIATION_TIMEOUT_MS,
            delivery_timeout_ms: protocol::DELIVERY_TIMEOUT_MS,
            chunk_size: protocol::CHUNK_SIZE,
            session_buffer: protocol::SESSION_BUFFER,
            hostname_poll_interval_ms: hidden_service::POLL_INTERVAL_MS,
            hostname_poll_retries: hidden_service::POLL_RETRIES,
            verbose: false,
        }
    }
}

impl RelayConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.listen_port = port;
        self
    }

    pub fn with_api_port(mut self, port: u16) -> Self {
        self.api_port = port;
        self
    }

    pub fn with_data_dir(mut self, dir: impl Into<String>) -> Self {
        self.data_dir = dir.into();
        self
    }

    pub fn with_negotiation_timeout(mut self, timeout: Duration) -> Self {
        self.negotiation_timeout_ms = duration_to_millis(timeout);
        self
    }

    pub fn with_delivery_timeout(mut self, timeout: Duration) -> Self {
        self.delivery_timeout_ms = duration_to_millis(timeout);
        self
    }

    pub fn with_session_buffer(mut self, session_buffer: usize) -> Self {
        self.session_buffer = session_buffer;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn negotiation_timeout(&self) -> Duration {
        Duration::from_millis(self.negotiation_timeout_ms)
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }

    pub fn hostname_poll_interval(&self) -> Duration {
        Duration::from_millis(self.hostname_poll_interval_ms)
    }

    pub fn listen_socket(&self) -> String {
        format!("{}:{}", self.listen_addr, self.listen_port)
    }

    pub fn api_socket(&self) -> String {
        format!("127.0.0.1:{}", self.api_port)
    }

    pub fn hidden_service_dir(&self) -> PathBuf {
        Path::new(&self.data_dir).join(hidden_service::DIR_NAME)
    }

    pub fn torrc_path(&self) -> PathBuf {
        Path::new(&self.data_dir).join(hidden_service::TORRC_FILE)
    }

    /// Reject settings the relay cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::Invalid("chunk_size must be positive".into()));
        }
        if self.session_buffer == 0 {
            return Err(ConfigError::Invalid("session_buffer must be positive".into()));
        }
        if self.api_port == self.listen_port {
            return Err(ConfigError::Invalid(
                "api_port must differ from listen_port".into(),
            ));
        }
        if self.negotiation_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "negotiation_timeout_ms must be positive".into(),
            ));
        }
        if self.delivery_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "delivery_timeout_ms must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError(e.to_string()))?;

        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, contents).map_err(|e| ConfigError::WriteError(e.to_string()))?;

        Ok(())
    }
}

/// Whole milliseconds, saturating; sub-millisecond durations round up to 1
fn duration_to_millis(duration: Duration) -> u64 {
    if duration.is_zero() {
        return 0;
    }
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX).max(1)
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Failed to serialize config: {0}")]
    SerializeError(String),

    #[error("Failed to write config file: {0}")]
    WriteError(String),

    #[error("Invalid config: {0}")]
    Invalid(String),
}
