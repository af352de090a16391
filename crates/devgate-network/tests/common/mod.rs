//! Common test utilities for listener integration tests.
//!
//! Provides a recording processor, a helper that runs a listener on a
//! loopback port, and device client construction.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use devgate_core::DeviceId;
use devgate_network::{
    ConnectionHandle, ConnectionRegistry, DeviceClient, DeviceClientConfig, ListenerBuilder,
    ListenerConfig, MessageProcessor,
};
use devgate_protocol::{LengthPrefixedCodec, Message};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Message type the recording processor answers with an echo.
pub const ECHO: i32 = 1;

/// Message type the recording processor fails on.
pub const FAIL: i32 = 99;

/// Message type the recording processor blocks on for [`SLOW_FOR`].
pub const SLOW: i32 = 50;

pub const SLOW_FOR: Duration = Duration::from_millis(500);

/// Install a fmt subscriber once per test binary. `RUST_LOG` overrides the
/// default filter.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Callback observed by [`RecordingProcessor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Connected(String),
    Processed(String, i32),
    Disconnected(String),
}

/// Processor that records every callback.
///
/// - rejects devices whose ID starts with `"bad"`
/// - echoes `ECHO` messages back to the sender
/// - fails on `FAIL` messages
/// - blocks the calling thread on `SLOW` messages
#[derive(Debug, Default)]
pub struct RecordingProcessor {
    events: Mutex<Vec<Event>>,
}

impl RecordingProcessor {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, wanted: &Event) -> usize {
        self.events().iter().filter(|e| *e == wanted).count()
    }

    fn record(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

impl MessageProcessor for RecordingProcessor {
    fn auth(&self, message: &Message) -> bool {
        !message.device_id().starts_with("bad")
    }

    fn process(&self, message: Message, connection: &ConnectionHandle) -> anyhow::Result<()> {
        self.record(Event::Processed(
            message.device_id().to_string(),
            message.message_type(),
        ));
        match message.message_type() {
            ECHO => {
                connection.send(message);
                Ok(())
            }
            FAIL => anyhow::bail!("refusing message type {FAIL}"),
            SLOW => {
                std::thread::sleep(SLOW_FOR);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn on_connected(&self, device_id: &DeviceId) {
        self.record(Event::Connected(device_id.to_string()));
    }

    fn on_disconnected(&self, device_id: &DeviceId) {
        self.record(Event::Disconnected(device_id.to_string()));
    }
}

/// A listener running on the test runtime.
pub struct TestGateway {
    pub addr: SocketAddr,
    pub registry: Arc<ConnectionRegistry>,
    pub processor: Arc<RecordingProcessor>,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl TestGateway {
    pub async fn start() -> Self {
        Self::start_with(config()).await
    }

    pub async fn start_with(config: ListenerConfig) -> Self {
        init_tracing();

        let processor = Arc::new(RecordingProcessor::default());
        let bound = ListenerBuilder::new(config)
            .codec(LengthPrefixedCodec::new())
            .shared_processor(Arc::clone(&processor))
            .build()
            .expect("valid listener")
            .bind()
            .await
            .expect("bind loopback");

        let addr = bound.local_addr();
        let registry = Arc::clone(bound.registry());
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let task = tokio::spawn(async move {
            bound.run(token).await.expect("listener run");
        });

        Self {
            addr,
            registry,
            processor,
            shutdown,
            task,
        }
    }

    pub async fn client(&self) -> DeviceClient {
        let mut client = DeviceClient::new(DeviceClientConfig {
            server_addr: self.addr,
            timeout: Duration::from_secs(5),
        });
        client.connect().await.expect("connect to listener");
        client
    }

    /// Poll until `condition` holds or five seconds pass.
    pub async fn wait_for(&self, condition: impl Fn(&Self) -> bool) -> bool {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while tokio::time::Instant::now() < deadline {
            if condition(self) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        condition(self)
    }

    pub async fn stop(self) {
        self.shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .expect("listener stops")
            .expect("listener task");
    }
}

/// Loopback listener configuration on an OS-assigned port.
pub fn config() -> ListenerConfig {
    ListenerConfig {
        name: "test".to_string(),
        bind_host: "127.0.0.1".parse().unwrap(),
        port: 0,
        ..Default::default()
    }
}

pub fn device(id: &str) -> DeviceId {
    DeviceId::new(id).unwrap()
}
