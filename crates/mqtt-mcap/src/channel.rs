// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Topic to channel resolution.
//!
//! A topic gets exactly one channel for the whole run, created the first
//! time the topic is seen. The encoding is fixed at creation; what happens
//! when a later message on the same topic resolves to another encoding is
//! decided by [`EncodingPolicy`].

use crate::error::BridgeError;
use crate::writer::RecordSink;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// MCAP channel identifier.
pub type ChannelId = u16;

/// A recording channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    pub topic: String,
    pub encoding: String,
    pub id: ChannelId,
}

/// Handling of a topic whose encoding changes after its channel exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncodingPolicy {
    /// Keep the existing channel; warn once per topic.
    #[default]
    Reuse,
    /// Abort with [`BridgeError::EncodingMismatch`].
    Strict,
}

/// Maps topics to channels, creating them on first sight.
#[derive(Debug, Default)]
pub struct ChannelResolver {
    policy: EncodingPolicy,
    channels: HashMap<String, Channel>,
    drift_reported: HashSet<String>,
}

impl ChannelResolver {
    pub fn new(policy: EncodingPolicy) -> Self {
        Self {
            policy,
            channels: HashMap::new(),
            drift_reported: HashSet::new(),
        }
    }

    /// Return the channel id for `topic`, declaring a new channel on `sink`
    /// if the topic has not been seen yet.
    pub fn get_or_create<S: RecordSink + ?Sized>(
        &mut self,
        topic: &str,
        encoding: &str,
        sink: &mut S,
    ) -> Result<ChannelId, BridgeError> {
        if let Some(channel) = self.channels.get(topic) {
            if channel.encoding != encoding {
                match self.policy {
                    EncodingPolicy::Strict => {
                        return Err(BridgeError::EncodingMismatch {
                            topic: topic.to_string(),
                            channel: channel.encoding.clone(),
                            message: encoding.to_string(),
                        });
                    }
                    EncodingPolicy::Reuse => {
                        if self.drift_reported.insert(topic.to_string()) {
                            tracing::warn!(
                                "Topic '{}' now resolves to encoding '{}', keeping channel {} ('{}')",
                                topic,
                                encoding,
                                channel.id,
                                channel.encoding
                            );
                        }
                    }
                }
            }
            return Ok(channel.id);
        }

        let id = sink.add_channel(topic, encoding)?;
        tracing::info!(
            "New channel {} for topic '{}' (encoding '{}')",
            id,
            topic,
            encoding
        );

        self.channels.insert(
            topic.to_string(),
            Channel {
                topic: topic.to_string(),
                encoding: encoding.to_string(),
                id,
            },
        );
        Ok(id)
    }

    /// Look up an existing channel.
    pub fn get(&self, topic: &str) -> Option<&Channel> {
        self.channels.get(topic)
    }

    /// Number of channels created so far.
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
