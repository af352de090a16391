use devgate_core::DeviceId;
use devgate_protocol::Message;
use tokio::runtime::{Handle, RuntimeFlavor};

use crate::handle::ConnectionHandle;

/// Business logic plugged into a listener.
///
/// A listener calls the processor from the task that owns the connection,
/// so calls for one connection never overlap and arrive in wire order.
/// Calls for different connections run concurrently, hence `Send + Sync`.
///
/// Everything here is synchronous. On a multi-threaded runtime the calls
/// run in place on the connection's task while the worker thread hands its
/// other tasks off, so a slow `process` delays only its own connection.
/// Work that must not hold up the connection should be handed off by the
/// implementation itself.
///
/// # Example
///
/// ```
/// use devgate_network::{ConnectionHandle, MessageProcessor};
/// use devgate_protocol::Message;
///
/// struct Echo;
///
/// impl MessageProcessor for Echo {
///     fn process(&self, message: Message, connection: &ConnectionHandle) -> anyhow::Result<()> {
///         connection.send(message);
///         Ok(())
///     }
/// }
/// ```
pub trait MessageProcessor: Send + Sync + 'static {
    /// Decide whether the first message of a connection may register its
    /// device. Rejected connections are closed without a reply.
    fn auth(&self, message: &Message) -> bool {
        let _ = message;
        true
    }

    /// Handle one message from a registered device.
    ///
    /// An error closes the connection.
    fn process(&self, message: Message, connection: &ConnectionHandle) -> anyhow::Result<()>;

    /// Called once after a device registers, before its first message is
    /// processed.
    fn on_connected(&self, device_id: &DeviceId) {
        let _ = device_id;
    }

    /// Called once when a registered connection goes away: peer close, I/O
    /// error, idle timeout or processing error. Not called for a connection
    /// that was superseded by a newer one for the same device.
    fn on_disconnected(&self, device_id: &DeviceId) {
        let _ = device_id;
    }
}

/// Run a processor callback on the current task.
///
/// On a multi-threaded runtime the worker's other tasks move to another
/// thread for the duration of the call. Anywhere else the callback runs
/// inline.
pub(crate) fn call_in_place<R>(callback: impl FnOnce() -> R) -> R {
    match Handle::try_current() {
        Ok(runtime) if runtime.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(callback)
        }
        _ => callback(),
    }
}
