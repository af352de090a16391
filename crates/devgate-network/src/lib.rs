//! Network layer for devgate
//!
//! This crate accepts device connections over TCP, keeps track of which
//! device owns which connection and hands decoded messages to business
//! logic supplied by the integrator.
//!
//! # Components
//!
//! - **ConnectionRegistry**: device identity to live connection, with
//!   supersession of stale connections
//! - **Pipeline**: lazy authentication and dispatch per message
//! - **IdleMonitor**: heartbeat timeout sweep per listener
//! - **Listener**: TCP accept loop and per-connection tasks
//! - **DeviceClient**: device-side client for tests and simulation
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use devgate_network::{
//!     ConnectionHandle, ConnectionRegistry, ListenerBuilder, ListenerConfig, MessageProcessor,
//! };
//! use devgate_protocol::{LengthPrefixedCodec, Message};
//! use tokio_util::sync::CancellationToken;
//!
//! struct Telemetry;
//!
//! impl MessageProcessor for Telemetry {
//!     fn process(&self, message: Message, _connection: &ConnectionHandle) -> anyhow::Result<()> {
//!         println!("{} sent {} bytes", message.device_id(), message.payload().len());
//!         Ok(())
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = Arc::new(ConnectionRegistry::new());
//!
//! let listener = ListenerBuilder::new(ListenerConfig::default())
//!     .codec(LengthPrefixedCodec::new())
//!     .processor(Telemetry)
//!     .registry(Arc::clone(&registry))
//!     .build()?
//!     .bind()
//!     .await?;
//!
//! listener.run(CancellationToken::new()).await?;
//! # Ok(())
//! # }
//! ```

mod client;
mod config;
mod error;
mod handle;
mod lifecycle;
mod pipeline;
mod processor;
mod registry;
mod server;

pub use client::{DeviceClient, DeviceClientConfig, DeviceClientError};
pub use config::{GatewayConfig, ListenerConfig};
pub use error::{GatewayError, PipelineError};
pub use handle::{ConnectionHandle, ConnectionId};
pub use lifecycle::{IdleMonitor, IdlePolicy, IdleVerdict, SweepReport};
pub use pipeline::Pipeline;
pub use processor::MessageProcessor;
pub use registry::{ConnectionInfo, ConnectionRegistry, IdleCheck};
pub use server::{BoundListener, Listener, ListenerBuilder, ListenerHandle};
