/// Tor hidden service provisioning and address discovery
///
/// We do not run Tor ourselves. We prepare the hidden service directory,
/// point the torrc at it and then wait for Tor to publish the `hostname`.
use super::address::{OnionAddress, OnionAddressError};
use hiddendrop_common::config::hidden_service::HOSTNAME_FILE;
use hiddendrop_common::config::protocol::HIDDEN_SERVICE_PORT;
use hiddendrop_common::RelayConfig;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};

/// Something that can tell clients where to reach the relay
pub trait AddressResolver: Send + Sync {
    /// Published address, if one is known yet
    fn current_address(&self) -> Option<OnionAddress>;
}

/// On-disk layout of a provisioned hidden service
#[derive(Debug, Clone)]
pub struct HiddenService {
    dir: PathBuf,
    torrc: PathBuf,
}

impl HiddenService {
    /// Create the service directory and register it in the torrc
    ///
    /// The torrc entry is only appended once, so restarts do not pile up
    /// duplicate `HiddenServiceDir` lines.
    pub async fn provision(config: &RelayConfig) -> Result<Self, HiddenServiceError> {
        let data_dir = PathBuf::from(&config.data_dir);
        tokio::fs::create_dir_all(&data_dir)
            .await
            .map_err(|e| HiddenServiceError::io(&data_dir, e))?;

        let dir = config.hidden_service_dir();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| HiddenServiceError::io(&dir, e))?;
        restrict_permissions(&dir).await?;

        // Tor resolves relative paths against its own cwd
        let dir = tokio::fs::canonicalize(&dir)
            .await
            .map_err(|e| HiddenServiceError::io(&dir, e))?;
        let torrc = config.torrc_path();

        let dir_line = format!("HiddenServiceDir {}", dir.display());
        let existing = match tokio::fs::read_to_string(&torrc).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(HiddenServiceError::io(&torrc, e)),
        };

        if existing.lines().any(|line| line.trim() == dir_line) {
            debug!("torrc already references {}", dir.display());
        } else {
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&torrc)
                .await
                .map_err(|e| HiddenServiceError::io(&torrc, e))?;
            let entry = format!(
                "\n{}\nHiddenServicePort {} 127.0.0.1:{}\n",
                dir_line, HIDDEN_SERVICE_PORT, config.listen_port
            );
            file.write_all(entry.as_bytes())
                .await
                .map_err(|e| HiddenServiceError::io(&torrc, e))?;
            file.flush()
                .await
                .map_err(|e| HiddenServiceError::io(&torrc, e))?;
            info!("Registered hidden service in {}", torrc.display());
        }

        Ok(Self { dir, torrc })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn torrc(&self) -> &Path {
        &self.torrc
    }

    pub fn hostname_file(&self) -> PathBuf {
        self.dir.join(HOSTNAME_FILE)
    }
}

#[cfg(unix)]
async fn restrict_permissions(dir: &Path) -> Result<(), HiddenServiceError> {
    use std::os::unix::fs::PermissionsExt;

    // Tor refuses group/world readable service directories
    tokio::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))
        .await
        .map_err(|e| HiddenServiceError::io(dir, e))
}

#[cfg(not(unix))]
async fn restrict_permissions(_dir: &Path) -> Result<(), HiddenServiceError> {
    Ok(())
}

/// Polls the hidden service `hostname` file until Tor writes it
#[derive(Debug, Clone)]
pub struct HostnameWatcher {
    path: PathBuf,
    interval: Duration,
    retries: u32,
    address: Arc<RwLock<Option<OnionAddress>>>,
}

impl HostnameWatcher {
    pub fn new(path: impl Into<PathBuf>, interval: Duration, retries: u32) -> Self {
        Self {
            path: path.into(),
            interval,
            retries,
            address: Arc::new(RwLock::new(None)),
        }
    }

    pub fn from_config(service: &HiddenService, config: &RelayConfig) -> Self {
        Self::new(
            service.hostname_file(),
            config.hostname_poll_interval(),
            config.hostname_poll_retries,
        )
    }

    /// Poll until a valid address appears or retries run out
    pub async fn watch(&self) -> Result<OnionAddress, HiddenServiceError> {
        for attempt in 0..=self.retries {
            match self.check_once().await {
                Ok(Some(address)) => {
                    info!("Hidden service available at: {}", address);
                    *self.address.write().unwrap_or_else(PoisonError::into_inner) =
                        Some(address.clone());
                    return Ok(address);
                }
                Ok(None) => debug!(
                    "Hostname not written yet ({}/{})",
                    attempt, self.retries
                ),
                Err(e) => warn!("Error reading hostname file: {}", e),
            }

            if attempt < self.retries {
                tokio::time::sleep(self.interval).await;
            }
        }

        error!("Failed to get hidden service hostname");
        Err(HiddenServiceError::HostnameTimeout {
            path: self.path.clone(),
            retries: self.retries,
        })
    }

    async fn check_once(&self) -> Result<Option<OnionAddress>, HiddenServiceError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) if contents.trim().is_empty() => Ok(None),
            Ok(contents) => Ok(Some(OnionAddress::from_hostname(&contents)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(HiddenServiceError::io(&self.path, e)),
        }
    }
}

impl AddressResolver for HostnameWatcher {
    fn current_address(&self) -> Option<OnionAddress> {
        self.address
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Hidden service errors
#[derive(Debug, thiserror::Error)]
pub enum HiddenServiceError {
    #[error("I/O error on {}: {}", .path.display(), .source)]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid hostname: {0}")]
    InvalidAddress(#[from] OnionAddressError),

    #[error("No hostname at {} after {} retries", .path.display(), .retries)]
    HostnameTimeout { path: PathBuf, retries: u32 },
}

impl HiddenServiceError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}
