/// .onion address handling
///
/// The relay never derives its own address; Tor writes it to the hidden
/// service's `hostname` file. This type only checks that what we read looks
/// like a v3 address before we hand it out.
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Length of the base32 label of a v3 address
pub const ONION_V3_LABEL_LEN: usize = 56;

/// pubkey (32) || checksum (2) || version (1)
const ONION_V3_RAW_LEN: usize = 35;
const ONION_V3_VERSION: u8 = 0x03;

/// A v3 .onion address (e.g., "abc...xyz.onion")
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OnionAddress(String);

impl OnionAddress {
    /// Parse from hostname (with or without .onion suffix)
    pub fn from_hostname(hostname: &str) -> Result<Self, OnionAddressError> {
        let hostname = hostname.trim().to_lowercase();
        let label = hostname.strip_suffix(".onion").unwrap_or(&hostname);

        if label.len() != ONION_V3_LABEL_LEN {
            return Err(OnionAddressError::InvalidLength(label.len()));
        }

        let raw = data_encoding::BASE32_NOPAD
            .decode(label.to_uppercase().as_bytes())
            .map_err(|_| OnionAddressError::InvalidEncoding)?;

        if raw.len() != ONION_V3_RAW_LEN {
            return Err(OnionAddressError::InvalidLength(label.len()));
        }
        if raw[ONION_V3_RAW_LEN - 1] != ONION_V3_VERSION {
            return Err(OnionAddressError::UnsupportedVersion(raw[ONION_V3_RAW_LEN - 1]));
        }

        Ok(Self(label.to_string()))
    }

    /// Full hostname including the .onion suffix
    pub fn to_hostname(&self) -> String {
        format!("{}.onion", self.0)
    }

    /// Base32 label without the suffix
    pub fn label(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OnionAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hostname())
    }
}

impl FromStr for OnionAddress {
    type Err = OnionAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hostname(s)
    }
}

impl TryFrom<String> for OnionAddress {
    type Error = OnionAddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hostname(&value)
    }
}

impl From<OnionAddress> for String {
    fn from(address: OnionAddress) -> Self {
        address.to_hostname()
    }
}

/// Onion address errors
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum OnionAddressError {
    #[error("Invalid base32 encoding")]
    InvalidEncoding,

    #[error("Invalid address length: {0} (expected 56)")]
    InvalidLength(usize),

    #[error("Unsupported onion address version: {0}")]
    UnsupportedVersion(u8),
}
