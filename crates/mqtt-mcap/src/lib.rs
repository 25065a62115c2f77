// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! MQTT to MCAP recording bridge
//!
//! Subscribes to a set of MQTT v5 topic patterns and appends every received
//! message to a single MCAP file, one channel per distinct topic.
//!
//! # Quick Start
//!
//! ```bash
//! # Record two sensor trees, JSON and raw text
//! mqtt-mcap --topics "sensors/+:json" --topics "logs/#:text" -o capture.mcap
//!
//! # Use a producer-supplied timestamp (nanoseconds) as log time
//! mqtt-mcap --topics "telemetry/#:cbor" --stamp-property ts
//!
//! # Load settings from a file
//! mqtt-mcap --config bridge.toml
//! ```
//!
//! # Pipeline
//!
//! | Stage | Module |
//! |-------|--------|
//! | connect / retry | [`connection`] |
//! | subscription id -> encoding | [`subscription`] |
//! | topic -> channel | [`channel`] |
//! | log time | [`timestamp`] |
//! | MCAP output | [`writer`] |
//! | orchestration | [`dispatcher`] |

pub mod broker;
pub mod channel;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod mqtt;
pub mod shutdown;
pub mod stats;
pub mod subscription;
pub mod timestamp;
pub mod writer;

pub use broker::{BrokerClient, BrokerError, InboundMessage, QoS};
pub use channel::{Channel, ChannelId, ChannelResolver, EncodingPolicy};
pub use config::{BridgeConfig, BrokerAddress, ConfigError, TopicPattern};
pub use connection::{ConnectOutcome, ConnectionManager, RetryPolicy};
pub use dispatcher::{Dispatcher, DispatcherState, RunOutcome, RunSummary};
pub use error::{BridgeError, ErrorKind, ProtocolViolation};
pub use mqtt::MqttBroker;
pub use shutdown::{ShutdownHandle, ShutdownToken};
pub use stats::RecordingStats;
pub use subscription::{Subscription, SubscriptionId, SubscriptionRegistry};
pub use timestamp::extract_log_time;
pub use writer::{Compression, McapRecordWriter, Record, RecordSink, WriterConfig, WriterError};
