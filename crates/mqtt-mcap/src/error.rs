// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bridge error taxonomy.
//!
//! Transient connection failures never reach this type: they are retried
//! inside [`crate::connection`]. Everything here aborts the run.

use crate::broker::BrokerError;
use crate::config::ConfigError;
use crate::subscription::SubscriptionId;
use crate::writer::WriterError;
use thiserror::Error;

/// A message that contradicts the declared subscriptions or configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    #[error("received message with unknown subscription identifier '{0}'")]
    UnknownSubscriptionId(SubscriptionId),

    #[error("multiple encodings found: '{first}' '{second}'")]
    AmbiguousEncoding { first: String, second: String },

    #[error("received message with no subscription identifier, no encoding found")]
    NoEncodingFound,

    #[error("property '{property}' does not hold a nanosecond timestamp: '{value}'")]
    MalformedTimestamp { property: String, value: String },
}

/// Fatal bridge errors.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("Protocol violation on topic '{topic}': {source}")]
    Protocol {
        topic: String,
        #[source]
        source: ProtocolViolation,
    },

    #[error(
        "Encoding mismatch on topic '{topic}': channel was created with '{channel}', message resolved to '{message}'"
    )]
    EncodingMismatch {
        topic: String,
        channel: String,
        message: String,
    },

    #[error("Output error: {0}")]
    Writer(#[from] WriterError),

    #[error("Broker stopped delivering messages")]
    BrokerClosed,
}

/// Coarse classification used for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    Connection,
    ProtocolViolation,
    MalformedTimestamp,
    Open,
    Write,
    Close,
}

impl BridgeError {
    pub(crate) fn protocol(topic: &str, source: ProtocolViolation) -> Self {
        Self::Protocol {
            topic: topic.to_string(),
            source,
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) => ErrorKind::Config,
            Self::Broker(_) | Self::BrokerClosed => ErrorKind::Connection,
            Self::Protocol {
                source: ProtocolViolation::MalformedTimestamp { .. },
                ..
            } => ErrorKind::MalformedTimestamp,
            Self::Protocol { .. } | Self::EncodingMismatch { .. } => ErrorKind::ProtocolViolation,
            Self::Writer(err) => err.kind(),
        }
    }
}
