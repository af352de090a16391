//! Listener configuration.
//!
//! Each TCP port the gateway serves is described by one [`ListenerConfig`].
//! The structs derive serde so the surrounding application can load them
//! from whatever format it likes; missing fields take the defaults below.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use devgate_core::constants::{
    DEFAULT_ACCEPT_BACKLOG, DEFAULT_BOSS_WORKERS, DEFAULT_IDLE_CHECK_INTERVAL_SECS,
    DEFAULT_IDLE_TIMEOUT_SECS, DEFAULT_IO_WORKERS, DEFAULT_LISTENER_PORT,
};
use devgate_core::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::lifecycle::IdlePolicy;

/// Configuration for a single listener
///
/// # Example
///
/// ```
/// use devgate_network::ListenerConfig;
///
/// let config = ListenerConfig {
///     name: "meters".to_string(),
///     port: 9000,
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// assert_eq!(config.bind_addr().port(), 9000);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Name used to look the listener up and to tag its log lines
    pub name: String,

    /// Interface to bind
    pub bind_host: IpAddr,

    /// Port to bind; 0 lets the OS choose
    pub port: u16,

    /// Seconds without inbound data before a connection is marked idle,
    /// also the cadence of the idle sweep
    pub idle_check_interval_secs: u64,

    /// Seconds without inbound data before a connection is closed
    pub idle_timeout_secs: u64,

    /// Number of accept tasks sharing the listening socket
    pub boss_worker_count: usize,

    /// Worker threads of the listener's dedicated runtime
    pub io_worker_count: usize,

    /// Pending-connection queue length passed to `listen(2)`
    pub accept_backlog: u32,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            bind_host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_LISTENER_PORT,
            idle_check_interval_secs: DEFAULT_IDLE_CHECK_INTERVAL_SECS,
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT_SECS,
            boss_worker_count: DEFAULT_BOSS_WORKERS,
            io_worker_count: DEFAULT_IO_WORKERS,
            accept_backlog: DEFAULT_ACCEPT_BACKLOG,
        }
    }
}

impl ListenerConfig {
    /// Check the configuration before anything is bound.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Config("listener name must not be blank".into()));
        }

        let positive = [
            ("idle_check_interval_secs", self.idle_check_interval_secs),
            ("idle_timeout_secs", self.idle_timeout_secs),
            ("boss_worker_count", self.boss_worker_count as u64),
            ("io_worker_count", self.io_worker_count as u64),
            ("accept_backlog", u64::from(self.accept_backlog)),
        ];
        if let Some((field, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(Error::Config(format!(
                "listener '{}': {field} must be greater than zero",
                self.name
            )));
        }

        Ok(())
    }

    /// Address the listening socket binds to.
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_host, self.port)
    }

    /// Idle detection thresholds for this listener.
    pub fn idle_policy(&self) -> IdlePolicy {
        IdlePolicy::new(
            Duration::from_secs(self.idle_check_interval_secs),
            Duration::from_secs(self.idle_timeout_secs),
        )
    }
}

/// All listeners of one gateway process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub listeners: Vec<ListenerConfig>,
}

impl GatewayConfig {
    /// Find a listener's configuration by name.
    pub fn listener(&self, name: &str) -> Option<&ListenerConfig> {
        self.listeners.iter().find(|l| l.name == name)
    }

    /// Validate every listener and reject duplicate names or ports.
    pub fn validate(&self) -> Result<()> {
        for (i, listener) in self.listeners.iter().enumerate() {
            listener.validate()?;

            let clash = self.listeners[..i].iter().find(|other| {
                other.name == listener.name
                    || (listener.port != 0 && other.bind_addr() == listener.bind_addr())
            });
            if let Some(other) = clash {
                return Err(Error::Config(format!(
                    "listeners '{}' and '{}' clash on name or address",
                    other.name, listener.name
                )));
            }
        }
        Ok(())
    }
}
