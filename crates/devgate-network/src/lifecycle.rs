//! Idle detection.
//!
//! Devices are expected to send heartbeats. Each listener runs one
//! [`IdleMonitor`] that periodically sweeps the registry for that
//! listener's connections and measures how long each has been silent:
//!
//! ```text
//! silent <  check_interval             -> unchanged
//! silent >= check_interval, <= timeout -> IDLE (advisory, nothing sent)
//! silent >  timeout                    -> DISCONNECTED, socket closed,
//!                                         registry entry removed,
//!                                         on_disconnected fired
//! ```
//!
//! Any inbound message moves the connection back to CONNECTED. Only read
//! silence counts; the gateway never sends heartbeats of its own.

use std::sync::Arc;
use std::time::Duration;

use devgate_core::DeviceId;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::processor::{MessageProcessor, call_in_place};
use crate::registry::ConnectionRegistry;

/// Outcome of measuring one connection's silence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleVerdict {
    Active,
    Idle,
    Expired,
}

/// Idle thresholds of one listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdlePolicy {
    check_interval: Duration,
    timeout: Duration,
}

impl IdlePolicy {
    pub fn new(check_interval: Duration, timeout: Duration) -> Self {
        Self {
            check_interval,
            timeout,
        }
    }

    /// Silence after which a connection counts as idle. Also the sweep
    /// period.
    pub fn check_interval(&self) -> Duration {
        self.check_interval
    }

    /// Silence after which a connection is closed.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Classify a connection that has been silent for `idle_for`.
    ///
    /// # Example
    ///
    /// ```
    /// use std::time::Duration;
    /// use devgate_network::{IdlePolicy, IdleVerdict};
    ///
    /// let policy = IdlePolicy::new(Duration::from_secs(60), Duration::from_secs(1800));
    /// assert_eq!(policy.evaluate(Duration::from_secs(10)), IdleVerdict::Active);
    /// assert_eq!(policy.evaluate(Duration::from_secs(60)), IdleVerdict::Idle);
    /// assert_eq!(policy.evaluate(Duration::from_secs(1800)), IdleVerdict::Idle);
    /// assert_eq!(policy.evaluate(Duration::from_secs(1801)), IdleVerdict::Expired);
    /// ```
    pub fn evaluate(&self, idle_for: Duration) -> IdleVerdict {
        if idle_for < self.check_interval {
            IdleVerdict::Active
        } else if idle_for > self.timeout {
            IdleVerdict::Expired
        } else {
            IdleVerdict::Idle
        }
    }
}

/// What one sweep did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    /// Connections that became idle during this sweep
    pub newly_idle: usize,

    /// Devices whose connections timed out and were removed
    pub expired: Vec<DeviceId>,
}

/// Periodic idle sweep for one listener's connections.
pub struct IdleMonitor<P> {
    listener: Arc<str>,
    policy: IdlePolicy,
    registry: Arc<ConnectionRegistry>,
    processor: Arc<P>,
}

impl<P: MessageProcessor> IdleMonitor<P> {
    pub fn new(
        listener: impl Into<Arc<str>>,
        policy: IdlePolicy,
        registry: Arc<ConnectionRegistry>,
        processor: Arc<P>,
    ) -> Self {
        Self {
            listener: listener.into(),
            policy,
            registry,
            processor,
        }
    }

    /// Check every connection of this listener once, as of `now`.
    ///
    /// Timed-out connections are closed and removed here. If the connection
    /// task wins the race and removes the entry first, this sweep skips the
    /// disconnect notification; it fires exactly once either way.
    pub fn sweep(&self, now: Instant) -> SweepReport {
        let mut report = SweepReport::default();

        for handle in self.registry.handles_on(&self.listener) {
            let Some(check) = self.registry.check_idle(&handle, now, &self.policy) else {
                continue;
            };

            match check.verdict {
                IdleVerdict::Active => {}
                IdleVerdict::Idle => {
                    if check.previous != devgate_core::ConnectionStatus::Idle {
                        report.newly_idle += 1;
                        warn!(
                            device_id = %check.device_id,
                            peer = %handle.peer_addr(),
                            idle_secs = check.idle_for.as_secs(),
                            "Device idle"
                        );
                    }
                }
                IdleVerdict::Expired => {
                    warn!(
                        device_id = %check.device_id,
                        peer = %handle.peer_addr(),
                        idle_secs = check.idle_for.as_secs(),
                        timeout_secs = self.policy.timeout().as_secs(),
                        "Device heartbeat timed out, closing connection"
                    );
                    handle.close();
                    if let Some(device_id) = self.registry.remove(&handle) {
                        call_in_place(|| self.processor.on_disconnected(&device_id));
                        report.expired.push(device_id);
                    }
                }
            }
        }

        report
    }

    /// Sweep every `check_interval` until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        let period = self.policy.check_interval();
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            listener = %self.listener,
            interval_secs = period.as_secs(),
            timeout_secs = self.policy.timeout().as_secs(),
            "Idle monitor started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                now = ticker.tick() => {
                    let report = self.sweep(now);
                    debug!(
                        listener = %self.listener,
                        newly_idle = report.newly_idle,
                        expired = report.expired.len(),
                        "Idle sweep finished"
                    );
                }
            }
        }

        debug!(listener = %self.listener, "Idle monitor stopped");
    }
}
