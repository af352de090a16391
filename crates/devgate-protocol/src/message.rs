use bytes::Bytes;
use devgate_core::{DeviceId, Result};

/// A decoded protocol unit.
///
/// `device_id` is whatever the device put on the wire. It may be empty,
/// which is only acceptable before a connection has authenticated; use
/// [`Message::claimed_device_id`] to get a validated identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Message {
    device_id: String,
    message_type: i32,
    payload: Bytes,
}

impl Message {
    pub fn new(device_id: impl Into<String>, message_type: i32, payload: impl Into<Bytes>) -> Self {
        Message {
            device_id: device_id.into(),
            message_type,
            payload: payload.into(),
        }
    }

    /// Raw device identity as sent by the device.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Protocol or business defined type tag.
    pub fn message_type(&self) -> i32 {
        self.message_type
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// The identity this message claims, validated.
    ///
    /// # Errors
    /// Returns `Error::InvalidDeviceId` when the message carries no identity.
    pub fn claimed_device_id(&self) -> Result<DeviceId> {
        DeviceId::new(self.device_id.as_str())
    }

    /// Split the message into `(device_id, message_type, payload)`.
    pub fn into_parts(self) -> (String, i32, Bytes) {
        (self.device_id, self.message_type, self.payload)
    }
}
