// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Broker client interface.
//!
//! The bridge only needs four things from a broker client: a single bounded
//! connection attempt, a tagged subscribe, an inbound message queue and a
//! disconnect. [`crate::mqtt::MqttBroker`] provides them over MQTT v5.

use crate::subscription::{Subscription, SubscriptionId};
use crossbeam::channel::Receiver;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use thiserror::Error;

/// Broker client errors.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("connection attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("subscribe to '{pattern}' failed: {reason}")]
    SubscribeFailed { pattern: String, reason: String },

    #[error("not connected")]
    NotConnected,

    #[error("disconnect failed: {0}")]
    DisconnectFailed(String),
}

/// Subscription quality of service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum QoS {
    AtMostOnce,
    #[default]
    AtLeastOnce,
    ExactlyOnce,
}

impl TryFrom<u8> for QoS {
    type Error = String;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            0 => Ok(Self::AtMostOnce),
            1 => Ok(Self::AtLeastOnce),
            2 => Ok(Self::ExactlyOnce),
            other => Err(format!("invalid QoS level {} (expected 0, 1 or 2)", other)),
        }
    }
}

impl From<QoS> for u8 {
    fn from(qos: QoS) -> Self {
        match qos {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
            QoS::ExactlyOnce => 2,
        }
    }
}

/// A message delivered by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Topic the message was published on.
    pub topic: String,

    /// Opaque payload.
    pub payload: Vec<u8>,

    /// User properties in arrival order. Keys may repeat.
    pub properties: Vec<(String, String)>,

    /// Subscription identifiers attached by the broker.
    pub subscription_ids: BTreeSet<SubscriptionId>,
}

impl InboundMessage {
    /// Create a message without properties or subscription ids.
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            properties: Vec::new(),
            subscription_ids: BTreeSet::new(),
        }
    }

    /// Attach a subscription identifier.
    pub fn with_subscription_id(mut self, id: SubscriptionId) -> Self {
        self.subscription_ids.insert(id);
        self
    }

    /// Append a user property.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.push((key.into(), value.into()));
        self
    }
}

/// Minimal broker client used by the dispatcher.
pub trait BrokerClient {
    /// Make one connection attempt, giving up after `timeout`.
    ///
    /// On error the client must be left disconnected.
    fn connect(&mut self, timeout: Duration) -> Result<(), BrokerError>;

    /// Subscribe to `subscription.pattern`, tagging deliveries with
    /// `subscription.id`.
    fn subscribe(&mut self, subscription: &Subscription, qos: QoS) -> Result<(), BrokerError>;

    /// Queue of inbound messages. Available before connecting so nothing
    /// delivered right after the subscribe is lost. Disconnects when the
    /// client stops delivering for good.
    fn inbound(&self) -> Receiver<InboundMessage>;

    /// Release the connection.
    fn disconnect(&mut self) -> Result<(), BrokerError>;
}
