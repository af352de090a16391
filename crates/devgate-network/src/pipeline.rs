//! Per-connection message pipeline.
//!
//! For every decoded message the connection task calls
//! [`Pipeline::handle_message`]:
//!
//! 1. Refresh liveness: a registered connection goes back to CONNECTED.
//! 2. If the connection is not registered yet, treat the message's device
//!    ID as a claim. An empty claim or a failed `auth` closes the
//!    connection. Otherwise register the device (superseding any older
//!    connection) and fire `on_connected`.
//! 3. Hand the message to the processor.
//!
//! When the connection ends, for whatever reason, the task calls
//! [`Pipeline::on_closed`] exactly once.
//!
//! A connection that has already been closed (superseded, expired or
//! disconnected) never registers, even if frames it read before the close
//! are still being handled.

use std::sync::Arc;
use std::time::{Duration, Instant};

use devgate_core::constants::SLOW_PROCESSING_THRESHOLD_MS;
use devgate_core::{ConnectionStatus, DeviceId};
use devgate_protocol::Message;
use tracing::{debug, error, info, warn};

use crate::error::PipelineError;
use crate::handle::ConnectionHandle;
use crate::processor::{MessageProcessor, call_in_place};
use crate::registry::ConnectionRegistry;

const SLOW_PROCESSING_THRESHOLD: Duration =
    Duration::from_millis(SLOW_PROCESSING_THRESHOLD_MS);

pub struct Pipeline<P> {
    registry: Arc<ConnectionRegistry>,
    processor: Arc<P>,
}

impl<P: MessageProcessor> Pipeline<P> {
    pub fn new(registry: Arc<ConnectionRegistry>, processor: Arc<P>) -> Self {
        Self { registry, processor }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Run one inbound message through the pipeline.
    ///
    /// # Errors
    ///
    /// Any error means the connection has been closed and the caller should
    /// stop reading from it.
    pub fn handle_message(
        &self,
        handle: &ConnectionHandle,
        message: Message,
    ) -> Result<(), PipelineError> {
        self.registry.update_status(handle, ConnectionStatus::Connected);

        let device_id = match self.registry.device_id_of(handle) {
            Some(device_id) => device_id,
            None => self.authenticate(handle, &message)?,
        };

        self.dispatch(handle, device_id, message)
    }

    /// Clean up after the connection's transport has gone away.
    ///
    /// Returns the device that was disconnected, if the connection was
    /// still registered for one.
    pub fn on_closed(&self, handle: &ConnectionHandle) -> Option<DeviceId> {
        let Some(device_id) = self.registry.remove(handle) else {
            info!(
                peer = %handle.peer_addr(),
                listener = %handle.listener(),
                "Unregistered connection disconnected"
            );
            return None;
        };

        info!(
            device_id = %device_id,
            peer = %handle.peer_addr(),
            listener = %handle.listener(),
            "Device disconnected"
        );
        call_in_place(|| self.processor.on_disconnected(&device_id));
        Some(device_id)
    }

    fn authenticate(
        &self,
        handle: &ConnectionHandle,
        message: &Message,
    ) -> Result<DeviceId, PipelineError> {
        let Ok(device_id) = message.claimed_device_id() else {
            warn!(
                peer = %handle.peer_addr(),
                listener = %handle.listener(),
                message_type = message.message_type(),
                "First message has no device ID, closing connection"
            );
            handle.close();
            return Err(PipelineError::EmptyDeviceId);
        };

        if !handle.is_open() {
            debug!(
                device_id = %device_id,
                peer = %handle.peer_addr(),
                "Connection already closed, ignoring claim"
            );
            return Err(PipelineError::ConnectionClosed(device_id));
        }

        if !call_in_place(|| self.processor.auth(message)) {
            error!(
                device_id = %device_id,
                peer = %handle.peer_addr(),
                listener = %handle.listener(),
                "Device authentication failed, closing connection"
            );
            handle.close();
            return Err(PipelineError::AuthRejected(device_id));
        }

        if self.registry.register(device_id.clone(), handle.clone()).is_err() {
            return Err(PipelineError::ConnectionClosed(device_id));
        }
        call_in_place(|| self.processor.on_connected(&device_id));
        Ok(device_id)
    }

    fn dispatch(
        &self,
        handle: &ConnectionHandle,
        device_id: DeviceId,
        message: Message,
    ) -> Result<(), PipelineError> {
        let message_type = message.message_type();
        let started = Instant::now();
        let result = call_in_place(|| self.processor.process(message, handle));
        let elapsed = started.elapsed();

        if elapsed > SLOW_PROCESSING_THRESHOLD {
            warn!(
                device_id = %device_id,
                message_type,
                elapsed_ms = elapsed.as_millis() as u64,
                "Slow message processing"
            );
        } else {
            debug!(
                device_id = %device_id,
                message_type,
                elapsed_us = elapsed.as_micros() as u64,
                "Message processed"
            );
        }

        result.map_err(|source| {
            error!(
                device_id = %device_id,
                message_type,
                error = %source,
                "Message processing failed, closing connection"
            );
            handle.close();
            PipelineError::Processor {
                device_id,
                message_type,
                source,
            }
        })
    }
}
