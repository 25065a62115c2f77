// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Broker connection establishment.
//!
//! Retries at a fixed interval, forever, until the broker accepts the
//! connection or shutdown is requested. The wait between attempts is a wait
//! on the shutdown token, so Ctrl+C during an outage returns immediately.

use crate::broker::BrokerClient;
use crate::shutdown::ShutdownToken;
use std::time::Duration;

/// Fixed-interval retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Upper bound on one connection attempt.
    pub attempt_timeout: Duration,
    /// Delay after a failed attempt.
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempt_timeout: Duration::from_secs(1),
            interval: Duration::from_secs(1),
        }
    }
}

/// Result of [`ConnectionManager::connect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// Connected on the given attempt (1-based).
    Connected { attempts: u32 },
    /// Shutdown was requested before a connection succeeded.
    Cancelled,
}

/// Drives connection attempts according to a [`RetryPolicy`].
#[derive(Debug, Clone, Default)]
pub struct ConnectionManager {
    policy: RetryPolicy,
}

impl ConnectionManager {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Connect `broker`, retrying until success or cancellation.
    pub fn connect<B: BrokerClient + ?Sized>(
        &self,
        broker: &mut B,
        shutdown: &ShutdownToken,
    ) -> ConnectOutcome {
        let mut attempts = 0u32;

        loop {
            if shutdown.is_cancelled() {
                return ConnectOutcome::Cancelled;
            }

            attempts = attempts.saturating_add(1);
            match broker.connect(self.policy.attempt_timeout) {
                Ok(()) => {
                    tracing::info!("MQTT connection successful");
                    return ConnectOutcome::Connected { attempts };
                }
                Err(err) => {
                    tracing::warn!("MQTT connection failed (attempt {}): {}", attempts, err);
                }
            }

            if shutdown.wait_timeout(self.policy.interval) {
                return ConnectOutcome::Cancelled;
            }
        }
    }
}
