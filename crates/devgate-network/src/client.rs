//! Device-side TCP client.
//!
//! This module provides a simple client that behaves like a device: it
//! connects to a gateway listener, sends framed messages and reads whatever
//! the gateway writes back. It is what the integration tests use to drive a
//! listener, and it works as a device simulator for manual testing.
//!
//! # Example Usage
//!
//! ```no_run
//! use devgate_network::{DeviceClient, DeviceClientConfig};
//! use devgate_protocol::Message;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = DeviceClientConfig {
//!     server_addr: "127.0.0.1:8081".parse()?,
//!     timeout: Duration::from_millis(3000),
//! };
//!
//! let mut client = DeviceClient::new(config);
//! client.connect().await?;
//!
//! // The first message identifies the device
//! client.send(Message::new("meter-0001", 1, &b"hello"[..])).await?;
//!
//! let reply = client.recv().await?;
//! println!("Received: {:?}", reply);
//!
//! client.close().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Timeout Handling
//!
//! Connect, send and receive all use the configured timeout (default
//! 3000ms). Timeouts are returned to the caller; nothing is retried.

use devgate_core::constants::DEFAULT_LISTENER_PORT;
use devgate_protocol::{LengthPrefixedCodec, Message};
use futures::{SinkExt, StreamExt};
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, error, info, trace, warn};

/// Configuration for a device client
///
/// # Example
///
/// ```
/// use devgate_network::DeviceClientConfig;
/// use std::time::Duration;
///
/// let config = DeviceClientConfig {
///     server_addr: "127.0.0.1:8081".parse().unwrap(),
///     timeout: Duration::from_millis(5000),
/// };
/// ```
#[derive(Debug, Clone)]
pub struct DeviceClientConfig {
    /// Gateway address to connect to
    pub server_addr: SocketAddr,

    /// Timeout for all I/O operations (connect, send, recv)
    pub timeout: Duration,
}

impl Default for DeviceClientConfig {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_LISTENER_PORT)),
            timeout: Duration::from_millis(3000),
        }
    }
}

/// Errors that can occur during device client operations
#[derive(Debug, Error)]
pub enum DeviceClientError {
    /// Client is not connected to the gateway
    #[error("Not connected to server")]
    NotConnected,

    /// Connection attempt timed out
    #[error("Connection timeout after {0}ms")]
    ConnectionTimeout(u64),

    /// Read operation timed out
    #[error("Read timeout after {0}ms")]
    ReadTimeout(u64),

    /// Write operation timed out
    #[error("Write timeout after {0}ms")]
    WriteTimeout(u64),

    /// The gateway closed the connection
    #[error("Connection closed by server")]
    ConnectionClosed,

    /// Framing error from the codec
    #[error("Protocol error: {0}")]
    Protocol(#[from] devgate_core::Error),

    /// Low-level I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Simulated device connection
///
/// # Connection Lifecycle
///
/// 1. Create client with `new()`
/// 2. Connect to the gateway with `connect()`
/// 3. Exchange messages with `send()` and `recv()`
/// 4. Close connection with `close()`
pub struct DeviceClient {
    /// Gateway address to connect to
    server_addr: SocketAddr,

    /// Framed TCP stream (None if not connected)
    framed: Option<Framed<TcpStream, LengthPrefixedCodec>>,

    /// Timeout for all I/O operations
    timeout: Duration,
}

impl DeviceClient {
    /// Create a new client. It is not connected until `connect()` is called.
    ///
    /// # Example
    ///
    /// ```
    /// use devgate_network::{DeviceClient, DeviceClientConfig};
    ///
    /// let client = DeviceClient::new(DeviceClientConfig::default());
    /// assert!(!client.is_connected());
    /// ```
    pub fn new(config: DeviceClientConfig) -> Self {
        debug!("Creating device client for server {}", config.server_addr);

        Self {
            server_addr: config.server_addr,
            framed: None,
            timeout: config.timeout,
        }
    }

    /// Connect to the gateway
    ///
    /// # Errors
    ///
    /// Returns an error if the connection times out or is refused.
    pub async fn connect(&mut self) -> Result<(), DeviceClientError> {
        info!("Connecting to server at {}", self.server_addr);

        let stream =
            match tokio::time::timeout(self.timeout, TcpStream::connect(self.server_addr)).await {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => {
                    error!("Connection failed: {}", e);
                    return Err(e.into());
                }
                Err(_) => {
                    warn!("Connection timeout after {}ms", self.timeout.as_millis());
                    return Err(DeviceClientError::ConnectionTimeout(self.timeout_ms()));
                }
            };

        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY: {}", e);
        }

        self.framed = Some(Framed::new(stream, LengthPrefixedCodec::new()));

        debug!("Client connected and ready");
        Ok(())
    }

    /// Send a message to the gateway
    ///
    /// # Errors
    ///
    /// Returns an error if not connected, on timeout, or if the message
    /// cannot be encoded or written.
    pub async fn send(&mut self, message: Message) -> Result<(), DeviceClientError> {
        trace!(
            device_id = message.device_id(),
            message_type = message.message_type(),
            payload_len = message.payload().len(),
            "Sending message to server"
        );

        let timeout = self.timeout;
        let framed = self.framed.as_mut().ok_or(DeviceClientError::NotConnected)?;

        match tokio::time::timeout(timeout, framed.send(message)).await {
            Ok(result) => result.map_err(DeviceClientError::Protocol),
            Err(_) => {
                warn!("Send timeout after {}ms", timeout.as_millis());
                Err(DeviceClientError::WriteTimeout(self.timeout_ms()))
            }
        }
    }

    /// Send raw bytes, bypassing the codec.
    ///
    /// Used to exercise the gateway with partial or malformed frames.
    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<(), DeviceClientError> {
        let framed = self.framed.as_mut().ok_or(DeviceClientError::NotConnected)?;
        let stream = framed.get_mut();
        stream.write_all(bytes).await?;
        stream.flush().await?;
        Ok(())
    }

    /// Receive a message from the gateway
    ///
    /// # Errors
    ///
    /// Returns `ConnectionClosed` if the gateway closed the connection,
    /// `ReadTimeout` if nothing arrived in time.
    pub async fn recv(&mut self) -> Result<Message, DeviceClientError> {
        let timeout = self.timeout;
        let framed = self.framed.as_mut().ok_or(DeviceClientError::NotConnected)?;

        match tokio::time::timeout(timeout, framed.next()).await {
            Ok(Some(Ok(message))) => {
                trace!(
                    device_id = message.device_id(),
                    message_type = message.message_type(),
                    "Received message from server"
                );
                Ok(message)
            }
            Ok(Some(Err(e))) => {
                error!("Failed to decode message: {}", e);
                Err(DeviceClientError::Protocol(e))
            }
            Ok(None) => {
                debug!("Connection closed by server");
                Err(DeviceClientError::ConnectionClosed)
            }
            Err(_) => Err(DeviceClientError::ReadTimeout(self.timeout_ms())),
        }
    }

    /// Wait until the gateway closes the connection.
    ///
    /// Messages received in the meantime are discarded. Returns `true` if
    /// the close was observed within the timeout.
    pub async fn wait_closed(&mut self) -> bool {
        loop {
            match self.recv().await {
                Ok(_) => continue,
                Err(DeviceClientError::ReadTimeout(_)) | Err(DeviceClientError::NotConnected) => {
                    return false;
                }
                Err(_) => return true,
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.framed.is_some()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.framed
            .as_ref()
            .and_then(|framed| framed.get_ref().local_addr().ok())
    }

    /// Close the connection gracefully. Idempotent.
    pub async fn close(&mut self) -> Result<(), DeviceClientError> {
        if let Some(mut framed) = self.framed.take() {
            info!("Closing connection to {}", self.server_addr);

            let flush_timeout = Duration::from_millis(500);
            match tokio::time::timeout(flush_timeout, framed.flush()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Error flushing during close: {}", e),
                Err(_) => warn!("Flush timeout during close ({}ms)", flush_timeout.as_millis()),
            }

            let mut stream = framed.into_inner();
            match tokio::time::timeout(flush_timeout, stream.shutdown()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!("Error during shutdown: {}", e),
                Err(_) => warn!("Shutdown timeout during close ({}ms)", flush_timeout.as_millis()),
            }

            debug!("Connection closed");
        }

        Ok(())
    }

    fn timeout_ms(&self) -> u64 {
        self.timeout.as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = DeviceClientConfig::default();
        assert_eq!(config.server_addr.port(), 8081);
        assert_eq!(config.timeout.as_millis(), 3000);
    }

    #[tokio::test]
    async fn test_send_without_connect() {
        let mut client = DeviceClient::new(DeviceClientConfig::default());

        let result = client.send(Message::new("dev-1", 1, &b""[..])).await;
        assert!(matches!(result, Err(DeviceClientError::NotConnected)));
    }

    #[tokio::test]
    async fn test_recv_without_connect() {
        let mut client = DeviceClient::new(DeviceClientConfig::default());

        let result = client.recv().await;
        assert!(matches!(result, Err(DeviceClientError::NotConnected)));
    }

    #[tokio::test]
    async fn test_connection_refused() {
        // Bind then drop to get a port nothing listens on
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();

        let mut client = DeviceClient::new(DeviceClientConfig {
            server_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, port)),
            timeout: Duration::from_millis(1000),
        });

        assert!(client.connect().await.is_err());
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_multiple_close_calls() {
        let mut client = DeviceClient::new(DeviceClientConfig::default());

        client.close().await.unwrap();
        client.close().await.unwrap();
    }
}
