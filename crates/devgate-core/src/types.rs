use crate::{Result, error::Error};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity a device reports about itself in its first message.
///
/// The value is opaque to the gateway. The only rule is that it is not
/// empty: an empty identity cannot own a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceId(String);

impl DeviceId {
    /// Create a new device ID with validation.
    ///
    /// # Errors
    /// Returns `Error::InvalidDeviceId` if the identity is empty.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(Error::InvalidDeviceId(
                "device ID must not be empty".to_string(),
            ));
        }
        Ok(DeviceId(id))
    }

    /// Get the device ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the ID and return the owned string.
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for DeviceId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        DeviceId::new(s)
    }
}

impl TryFrom<String> for DeviceId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        DeviceId::new(value)
    }
}

impl From<DeviceId> for String {
    fn from(id: DeviceId) -> Self {
        id.0
    }
}

impl AsRef<str> for DeviceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Liveness of a registered device connection.
///
/// - `Connected`: data received within the idle-check window
/// - `Idle`: silent for at least one idle-check interval but not yet timed out
/// - `Disconnected`: timed out or transport closed (terminal)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connected,
    Idle,
    Disconnected,
}

impl ConnectionStatus {
    /// Whether the connection can still carry traffic.
    ///
    /// An idle connection is still open; delivery is simply not guaranteed.
    pub fn is_live(self) -> bool {
        !matches!(self, Self::Disconnected)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected => write!(f, "CONNECTED"),
            Self::Idle => write!(f, "IDLE"),
            Self::Disconnected => write!(f, "DISCONNECTED"),
        }
    }
}
