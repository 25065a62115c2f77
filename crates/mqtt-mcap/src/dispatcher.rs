// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Recording loop.
//!
//! ```text
//! Disconnected -> Connecting -> Subscribing -> Running -> ShuttingDown -> Closed
//!                     |                                        ^
//!                     +------------- cancelled ----------------+
//! ```
//!
//! The dispatcher owns the subscription registry, the channel resolver and
//! the output sink, and is the only thread touching them. Every path out of
//! `Subscribing` or `Running`, fatal or not, goes through `ShuttingDown`,
//! which closes the output and disconnects the broker.

use crate::broker::{BrokerClient, InboundMessage};
use crate::channel::ChannelResolver;
use crate::config::BridgeConfig;
use crate::connection::{ConnectOutcome, ConnectionManager};
use crate::error::BridgeError;
use crate::shutdown::ShutdownToken;
use crate::stats::RecordingStats;
use crate::subscription::SubscriptionRegistry;
use crate::timestamp::extract_log_time;
use crate::writer::{McapRecordWriter, Record, RecordSink, WriterConfig, WriterError};
use std::time::Instant;

/// Dispatcher lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    Disconnected,
    Connecting,
    Subscribing,
    Running,
    ShuttingDown,
    Closed,
}

/// How a clean run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Shutdown arrived before the broker accepted a connection. No output
    /// file was created.
    CancelledBeforeConnect,
    /// Recorded until shutdown was requested.
    Completed,
}

/// Summary of a clean run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub outcome: RunOutcome,
    pub connect_attempts: u32,
    pub stats: RecordingStats,
    /// States visited, in order, starting with `Disconnected`.
    pub states: Vec<DispatcherState>,
}

/// Connects, subscribes and records until shutdown.
pub struct Dispatcher<B: BrokerClient> {
    config: BridgeConfig,
    broker: B,
    registry: SubscriptionRegistry,
    resolver: ChannelResolver,
    state: DispatcherState,
    visited: Vec<DispatcherState>,
    stats: RecordingStats,
}

impl<B: BrokerClient> Dispatcher<B> {
    pub fn new(config: BridgeConfig, broker: B) -> Self {
        let resolver = ChannelResolver::new(config.encoding_policy);
        Self {
            config,
            broker,
            registry: SubscriptionRegistry::new(),
            resolver,
            state: DispatcherState::Disconnected,
            visited: vec![DispatcherState::Disconnected],
            stats: RecordingStats::default(),
        }
    }

    /// Run to completion, recording into an MCAP file.
    pub fn run(self, shutdown: &ShutdownToken) -> Result<RunSummary, BridgeError> {
        self.run_with(shutdown, McapRecordWriter::open)
    }

    /// Run to completion, recording into the sink built by `open_sink`.
    ///
    /// `open_sink` is only called once the broker connection is up.
    pub fn run_with<S, F>(
        mut self,
        shutdown: &ShutdownToken,
        open_sink: F,
    ) -> Result<RunSummary, BridgeError>
    where
        S: RecordSink,
        F: FnOnce(&WriterConfig) -> Result<S, WriterError>,
    {
        self.config.validate()?;

        self.transition(DispatcherState::Connecting);
        let manager = ConnectionManager::new(self.config.retry_policy());
        let connect_attempts = match manager.connect(&mut self.broker, shutdown) {
            ConnectOutcome::Connected { attempts } => attempts,
            ConnectOutcome::Cancelled => {
                tracing::info!("Shutdown requested before connecting, nothing recorded");
                self.transition(DispatcherState::ShuttingDown);
                self.transition(DispatcherState::Closed);
                return Ok(RunSummary {
                    outcome: RunOutcome::CancelledBeforeConnect,
                    connect_attempts: 0,
                    stats: self.stats,
                    states: self.visited,
                });
            }
        };

        self.transition(DispatcherState::Subscribing);
        let mut sink = match open_sink(&self.config.writer_config()) {
            Ok(sink) => sink,
            Err(err) => {
                self.transition(DispatcherState::ShuttingDown);
                self.release_broker();
                self.transition(DispatcherState::Closed);
                return Err(err.into());
            }
        };

        let start = Instant::now();
        let result = match self.subscribe_all() {
            Ok(()) => {
                self.transition(DispatcherState::Running);
                self.consume(&mut sink, shutdown)
            }
            Err(err) => Err(err),
        };

        self.transition(DispatcherState::ShuttingDown);
        if let Err(err) = &result {
            tracing::error!("Stopping on fatal error: {}", err);
        }
        let close_result = sink.close();
        self.release_broker();
        self.stats.finish(start);
        self.stats.report();
        self.transition(DispatcherState::Closed);

        match (result, close_result) {
            (Err(err), Err(close_err)) => {
                tracing::error!("Failed to close output after fatal error: {}", close_err);
                Err(err)
            }
            (Err(err), Ok(())) => Err(err),
            (Ok(()), Err(close_err)) => Err(close_err.into()),
            (Ok(()), Ok(())) => Ok(RunSummary {
                outcome: RunOutcome::Completed,
                connect_attempts,
                stats: self.stats,
                states: self.visited,
            }),
        }
    }

    fn transition(&mut self, next: DispatcherState) {
        match next {
            DispatcherState::Running | DispatcherState::Closed => {
                tracing::info!("{:?} -> {:?}", self.state, next)
            }
            _ => tracing::debug!("{:?} -> {:?}", self.state, next),
        }
        self.state = next;
        self.visited.push(next);
    }

    fn subscribe_all(&mut self) -> Result<(), BridgeError> {
        for pattern in &self.config.topics {
            let subscription = self.registry.register(pattern);
            self.broker.subscribe(&subscription, self.config.qos)?;
            tracing::info!(
                "Subscribed to '{}' (id {}, encoding '{}')",
                subscription.pattern,
                subscription.id,
                subscription.encoding
            );
        }
        Ok(())
    }

    fn consume<S: RecordSink>(
        &mut self,
        sink: &mut S,
        shutdown: &ShutdownToken,
    ) -> Result<(), BridgeError> {
        let inbound = self.broker.inbound();
        let poll_timeout = self.config.poll_timeout_duration();
        let stats_interval = self.config.stats_interval();
        let mut last_report = Instant::now();

        loop {
            crossbeam::select! {
                recv(shutdown.receiver()) -> _ => {
                    tracing::info!("Shutdown requested");
                    return Ok(());
                }
                recv(inbound) -> msg => match msg {
                    Ok(msg) => self.handle_message(msg, sink)?,
                    Err(_) => return Err(BridgeError::BrokerClosed),
                },
                default(poll_timeout) => {}
            }

            if let Some(interval) = stats_interval {
                if last_report.elapsed() >= interval {
                    if self.stats.message_count > 0 {
                        self.stats.report();
                    }
                    last_report = Instant::now();
                }
            }
        }
    }

    fn handle_message<S: RecordSink>(
        &mut self,
        msg: InboundMessage,
        sink: &mut S,
    ) -> Result<(), BridgeError> {
        tracing::debug!("Received message: {}", msg.topic);

        let encoding = self
            .registry
            .resolve_encoding(&msg.subscription_ids)
            .map_err(|source| BridgeError::protocol(&msg.topic, source))?;

        let channel_id = self.resolver.get_or_create(&msg.topic, encoding, sink)?;

        let log_time = extract_log_time(&msg.properties, &self.config.stamp_property)
            .map_err(|source| BridgeError::protocol(&msg.topic, source))?;

        sink.write_record(&Record::new(channel_id, log_time, &msg.payload))?;
        self.stats
            .record_message(msg.payload.len(), self.resolver.len());
        Ok(())
    }

    fn release_broker(&mut self) {
        if let Err(err) = self.broker.disconnect() {
            tracing::warn!("MQTT disconnect failed: {}", err);
        }
    }
}
