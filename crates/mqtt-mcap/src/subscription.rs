// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Subscription identifiers and encoding resolution.
//!
//! Each configured pattern gets an MQTT v5 subscription identifier. The
//! broker echoes the identifiers of every matching subscription on each
//! delivery, which is how a message finds the encoding its operator
//! declared. Overlapping patterns (`a/#` and `a/b`) can attach several
//! identifiers to one message; if they disagree on the encoding the message
//! is rejected rather than silently assigned to one of them.

use crate::config::TopicPattern;
use crate::error::ProtocolViolation;
use std::collections::{BTreeSet, HashMap};

/// MQTT v5 subscription identifier.
pub type SubscriptionId = usize;

/// A registered subscription. Never mutated after registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub pattern: String,
    pub encoding: String,
}

/// Allocates subscription ids and maps them back to encodings.
#[derive(Debug)]
pub struct SubscriptionRegistry {
    next_id: SubscriptionId,
    encodings: HashMap<SubscriptionId, String>,
    subscriptions: Vec<Subscription>,
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionRegistry {
    /// Create an empty registry. The first id handed out is 1.
    pub fn new() -> Self {
        Self {
            next_id: 1,
            encodings: HashMap::new(),
            subscriptions: Vec::new(),
        }
    }

    /// Register a pattern and return its subscription.
    pub fn register(&mut self, pattern: &TopicPattern) -> Subscription {
        let id = self.next_id;
        self.next_id += 1;

        let subscription = Subscription {
            id,
            pattern: pattern.pattern.clone(),
            encoding: pattern.encoding.clone(),
        };
        self.encodings.insert(id, pattern.encoding.clone());
        self.subscriptions.push(subscription.clone());

        tracing::debug!(
            "Registered subscription {} for '{}' (encoding '{}')",
            id,
            pattern.pattern,
            pattern.encoding
        );

        subscription
    }

    /// Resolve the single encoding shared by `ids`.
    pub fn resolve_encoding(
        &self,
        ids: &BTreeSet<SubscriptionId>,
    ) -> Result<&str, ProtocolViolation> {
        let mut resolved: Option<&str> = None;

        for id in ids {
            let encoding = self
                .encodings
                .get(id)
                .map(String::as_str)
                .ok_or(ProtocolViolation::UnknownSubscriptionId(*id))?;

            match resolved {
                Some(first) if first != encoding => {
                    return Err(ProtocolViolation::AmbiguousEncoding {
                        first: first.to_string(),
                        second: encoding.to_string(),
                    });
                }
                Some(_) => {}
                None => resolved = Some(encoding),
            }
        }

        resolved.ok_or(ProtocolViolation::NoEncodingFound)
    }

    /// All registered subscriptions, in registration order.
    pub fn subscriptions(&self) -> &[Subscription] {
        &self.subscriptions
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }
}
