//! Connection registry.
//!
//! The registry is the only state shared between connection tasks. It keeps
//! two indexes that always agree:
//!
//! ```text
//! devices: DeviceId     -> Connection (handle, status, last_active, ...)
//! handles: ConnectionId -> DeviceId
//! ```
//!
//! # Supersession
//!
//! A device owns at most one connection. When a device authenticates on a
//! new socket while an older one is still registered, the old connection is
//! superseded: its handle index entry is dropped, its handle is closed and
//! the new connection takes over the device entry.
//!
//! # Locking
//!
//! `register` and `remove` do all their work while holding the `DashMap`
//! entry guard for the device, so the two indexes change together and
//! mutations for the same device serialize. Mutations for different devices
//! only contend on shard locks. The lock order is always `devices` before
//! `handles`; no code path acquires a `devices` lock while holding a
//! `handles` guard.

use std::net::SocketAddr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use devgate_core::{ConnectionStatus, DeviceId};
use devgate_protocol::Message;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::GatewayError;
use crate::handle::{ConnectionHandle, ConnectionId};
use crate::lifecycle::{IdlePolicy, IdleVerdict};

/// Registry entry for one authenticated connection.
#[derive(Debug)]
struct Connection {
    handle: ConnectionHandle,
    status: ConnectionStatus,
    last_active: Instant,
    connected_at: DateTime<Utc>,
}

impl Connection {
    fn new(handle: ConnectionHandle) -> Self {
        Self {
            handle,
            status: ConnectionStatus::Connected,
            last_active: Instant::now(),
            connected_at: Utc::now(),
        }
    }
}

/// Connection information snapshot
///
/// Provides read-only access to connection metadata for monitoring
/// and debugging purposes.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// Device owning the connection
    pub device_id: DeviceId,

    /// Remote device address
    pub peer_addr: SocketAddr,

    /// Listener that accepted the connection
    pub listener: String,

    /// Liveness as of the last idle check or inbound message
    pub status: ConnectionStatus,

    /// When the device authenticated
    pub connected_at: DateTime<Utc>,

    /// How long the connection has been registered
    pub uptime: chrono::Duration,

    /// Time since the last inbound message
    pub idle_for: Duration,
}

/// Result of checking one connection against an [`IdlePolicy`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdleCheck {
    pub device_id: DeviceId,
    pub verdict: IdleVerdict,
    pub previous: ConnectionStatus,
    pub idle_for: Duration,
}

/// Thread-safe mapping between device identity and live connection.
///
/// Construct one per process (or per group of listeners that share device
/// identities) and hand it to each listener behind an `Arc`.
///
/// # Example
///
/// ```
/// use devgate_core::DeviceId;
/// use devgate_network::{ConnectionHandle, ConnectionRegistry};
///
/// let registry = ConnectionRegistry::new();
/// let peer = "127.0.0.1:4000".parse().unwrap();
/// let (handle, _outbound) = ConnectionHandle::channel("meters", peer);
/// let device_id = DeviceId::new("meter-1").unwrap();
///
/// registry.register(device_id.clone(), handle.clone()).unwrap();
/// assert!(registry.is_connected(&device_id));
///
/// assert_eq!(registry.remove(&handle), Some(device_id.clone()));
/// assert_eq!(registry.remove(&handle), None);
/// assert!(!registry.is_connected(&device_id));
/// ```
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    devices: DashMap<DeviceId, Connection>,
    handles: DashMap<ConnectionId, DeviceId>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handle` as the connection of `device_id`.
    ///
    /// If the device already has a connection it is superseded: the old
    /// handle is unindexed and closed, and returned to the caller.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionClosed` if `handle` is already closed. The check
    /// runs under the device's entry lock, so a superseded or expired
    /// connection can never take its device back from the current owner.
    pub fn register(
        &self,
        device_id: DeviceId,
        handle: ConnectionHandle,
    ) -> Result<Option<ConnectionHandle>, GatewayError> {
        let entry = self.devices.entry(device_id.clone());
        if !handle.is_open() {
            debug!(
                device_id = %device_id,
                peer = %handle.peer_addr(),
                "Refusing to register a closed connection"
            );
            return Err(GatewayError::ConnectionClosed(device_id));
        }

        match entry {
            Entry::Occupied(mut occupied) => {
                let previous = occupied.insert(Connection::new(handle.clone())).handle;
                self.handles.remove(&previous.id());
                self.handles.insert(handle.id(), device_id.clone());
                previous.close();

                warn!(
                    device_id = %device_id,
                    old_peer = %previous.peer_addr(),
                    new_peer = %handle.peer_addr(),
                    listener = %handle.listener(),
                    "Device reconnected, superseding previous connection"
                );
                Ok(Some(previous))
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Connection::new(handle.clone()));
                self.handles.insert(handle.id(), device_id.clone());

                info!(
                    device_id = %device_id,
                    peer = %handle.peer_addr(),
                    listener = %handle.listener(),
                    total = self.handles.len(),
                    "Device registered"
                );
                Ok(None)
            }
        }
    }

    /// Remove `handle` from the registry and close it.
    ///
    /// Returns the device the handle was registered for, or `None` if it
    /// was never registered, was already removed, or has been superseded.
    /// Safe to call any number of times.
    pub fn remove(&self, handle: &ConnectionHandle) -> Option<DeviceId> {
        let removed = self.device_id_of(handle).and_then(|device_id| {
            match self.devices.entry(device_id) {
                Entry::Occupied(occupied) if occupied.get().handle == *handle => {
                    let (device_id, _) = occupied.remove_entry();
                    self.handles.remove(&handle.id());
                    Some(device_id)
                }
                _ => {
                    self.handles.remove(&handle.id());
                    None
                }
            }
        });

        if handle.is_open() {
            handle.close();
        }

        if let Some(device_id) = &removed {
            debug!(
                device_id = %device_id,
                peer = %handle.peer_addr(),
                remaining = self.handles.len(),
                "Device removed from registry"
            );
        }
        removed
    }

    /// Set the status of the connection behind `handle`.
    ///
    /// A transition to `Connected` also refreshes its last activity time.
    /// Returns the previous status, or `None` if the handle is not
    /// registered.
    pub fn update_status(
        &self,
        handle: &ConnectionHandle,
        status: ConnectionStatus,
    ) -> Option<ConnectionStatus> {
        let device_id = self.device_id_of(handle)?;
        let mut connection = self.devices.get_mut(&device_id)?;
        if connection.handle != *handle {
            return None;
        }

        let previous = connection.status;
        if status == ConnectionStatus::Connected {
            connection.last_active = Instant::now();
        }
        if previous != status {
            connection.status = status;
            debug!(
                device_id = %device_id,
                from = %previous,
                to = %status,
                "Connection status changed"
            );
        }
        Some(previous)
    }

    /// Apply an idle check to the connection behind `handle`.
    ///
    /// The verdict is computed and the status updated under the device's
    /// entry lock, so a message arriving concurrently is either fully
    /// before or fully after the check. Returns `None` when the handle is
    /// not registered.
    pub fn check_idle(
        &self,
        handle: &ConnectionHandle,
        now: Instant,
        policy: &IdlePolicy,
    ) -> Option<IdleCheck> {
        let device_id = self.device_id_of(handle)?;
        let mut connection = self.devices.get_mut(&device_id)?;
        if connection.handle != *handle {
            return None;
        }

        let idle_for = now.saturating_duration_since(connection.last_active);
        let verdict = policy.evaluate(idle_for);
        let previous = connection.status;
        match verdict {
            IdleVerdict::Active => {}
            IdleVerdict::Idle => connection.status = ConnectionStatus::Idle,
            IdleVerdict::Expired => connection.status = ConnectionStatus::Disconnected,
        }

        Some(IdleCheck {
            device_id,
            verdict,
            previous,
            idle_for,
        })
    }

    /// Queue `message` for delivery to `device_id`.
    ///
    /// Fails immediately, without queuing or retry, if the device is not
    /// registered, its transport is closed, or its outbound buffer is full.
    pub fn send(&self, device_id: &DeviceId, message: Message) -> Result<(), GatewayError> {
        let handle = self
            .handle_of(device_id)
            .filter(ConnectionHandle::is_open)
            .ok_or_else(|| GatewayError::DeviceNotConnected(device_id.clone()))?;

        if handle.send(message) {
            Ok(())
        } else {
            Err(GatewayError::SendFailed {
                device_id: device_id.clone(),
                reason: "outbound buffer full or connection closing".to_string(),
            })
        }
    }

    /// Close the connection of `device_id`.
    ///
    /// The connection task notices, removes the entry and fires the
    /// disconnect callback. Returns `false` if the device is not registered.
    pub fn disconnect(&self, device_id: &DeviceId) -> bool {
        match self.handle_of(device_id) {
            Some(handle) => {
                info!(
                    device_id = %device_id,
                    peer = %handle.peer_addr(),
                    "Disconnecting device"
                );
                handle.close();
                true
            }
            None => false,
        }
    }

    /// Snapshot of the connection registered for `device_id`.
    pub fn get(&self, device_id: &DeviceId) -> Option<ConnectionInfo> {
        self.devices
            .get(device_id)
            .map(|entry| info_of(entry.key(), entry.value()))
    }

    /// Whether `device_id` is registered and its transport is open.
    pub fn is_connected(&self, device_id: &DeviceId) -> bool {
        self.devices
            .get(device_id)
            .is_some_and(|entry| entry.handle.is_open())
    }

    /// Device registered for `handle`, if any.
    pub fn device_id_of(&self, handle: &ConnectionHandle) -> Option<DeviceId> {
        self.handles.get(&handle.id()).map(|entry| entry.value().clone())
    }

    pub fn handle_of(&self, device_id: &DeviceId) -> Option<ConnectionHandle> {
        self.devices.get(device_id).map(|entry| entry.handle.clone())
    }

    pub fn status(&self, device_id: &DeviceId) -> Option<ConnectionStatus> {
        self.devices.get(device_id).map(|entry| entry.status)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn connected_devices(&self) -> Vec<DeviceId> {
        self.devices.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Snapshots of every registered connection.
    pub fn connections(&self) -> Vec<ConnectionInfo> {
        self.devices
            .iter()
            .map(|entry| info_of(entry.key(), entry.value()))
            .collect()
    }

    /// Handles of every connection accepted by `listener`.
    pub fn handles_on(&self, listener: &str) -> Vec<ConnectionHandle> {
        self.devices
            .iter()
            .filter(|entry| entry.handle.listener() == listener)
            .map(|entry| entry.handle.clone())
            .collect()
    }
}

fn info_of(device_id: &DeviceId, connection: &Connection) -> ConnectionInfo {
    ConnectionInfo {
        device_id: device_id.clone(),
        peer_addr: connection.handle.peer_addr(),
        listener: connection.handle.listener().to_string(),
        status: connection.status,
        connected_at: connection.connected_at,
        uptime: Utc::now() - connection.connected_at,
        idle_for: connection.last_active.elapsed(),
    }
}
