//! Core constants for the devgate wire protocol and listener defaults.
//!
//! # Frame Structure
//!
//! Every frame on the wire is length-prefixed, big-endian and unpadded:
//!
//! ```text
//! +-------------+-------------+-----------+-------------+-----------+
//! | totalLength | deviceIdLen | deviceId  | messageType | payload   |
//! | u32 BE      | u32 BE      | UTF-8     | i32 BE      | opaque    |
//! +-------------+-------------+-----------+-------------+-----------+
//! ```
//!
//! `totalLength` counts itself and every field after it, so
//! `totalLength = FRAME_HEADER_SIZE + deviceIdLen + payloadLen`.
//!
//! # Usage
//!
//! ```
//! use devgate_core::constants::*;
//!
//! // A frame for device "dev-1" carrying a 5 byte payload
//! let total = FRAME_HEADER_SIZE + "dev-1".len() + 5;
//! assert_eq!(total, 22);
//! assert!(total <= DEFAULT_MAX_FRAME_SIZE);
//! ```

// ============================================================================
// Frame Layout
// ============================================================================

/// Size of the `totalLength` field.
pub const LENGTH_FIELD_SIZE: usize = 4;

/// Size of the `deviceIdLen` field.
pub const DEVICE_ID_LENGTH_FIELD_SIZE: usize = 4;

/// Size of the `messageType` field.
pub const MESSAGE_TYPE_FIELD_SIZE: usize = 4;

/// Bytes every frame carries regardless of device ID and payload length.
///
/// This is the sum of the three fixed-width fields and is the smallest
/// `totalLength` a well-formed frame can declare.
pub const FRAME_HEADER_SIZE: usize =
    LENGTH_FIELD_SIZE + DEVICE_ID_LENGTH_FIELD_SIZE + MESSAGE_TYPE_FIELD_SIZE;

/// Bytes that must be buffered before a decoder looks at a frame.
///
/// Both length fields are needed to validate a frame header, so nothing is
/// inspected until `totalLength` and `deviceIdLen` are available.
pub const MIN_PEEK_SIZE: usize = LENGTH_FIELD_SIZE + DEVICE_ID_LENGTH_FIELD_SIZE;

/// Default upper bound for a single frame (1 MiB).
///
/// Frames declaring a larger `totalLength` are rejected before any payload
/// is buffered, which bounds per-connection memory.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

// ============================================================================
// Listener Defaults
// ============================================================================

/// Default TCP port for a device listener.
pub const DEFAULT_LISTENER_PORT: u16 = 8081;

/// Default number of accept workers per listener.
pub const DEFAULT_BOSS_WORKERS: usize = 1;

/// Default number of I/O worker threads per listener.
pub const DEFAULT_IO_WORKERS: usize = 4;

/// Default accept backlog passed to `listen(2)`.
pub const DEFAULT_ACCEPT_BACKLOG: u32 = 1024;

/// Default idle-check period in seconds.
///
/// Devices are expected to send a heartbeat at least this often.
pub const DEFAULT_IDLE_CHECK_INTERVAL_SECS: u64 = 60;

/// Default idle timeout in seconds before a silent device is disconnected.
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 1800;

/// Dispatch duration above which processing is logged as slow, in milliseconds.
pub const SLOW_PROCESSING_THRESHOLD_MS: u64 = 100;

/// Capacity of a connection's outbound message buffer.
///
/// Sends beyond this many pending messages fail instead of queuing further.
pub const OUTBOUND_BUFFER_CAPACITY: usize = 128;
