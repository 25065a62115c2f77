// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Log time extraction.

use crate::error::ProtocolViolation;
use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in nanoseconds since the UNIX epoch.
pub fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// Log time for a message.
///
/// With a non-empty `stamp_property`, the first user property with that key
/// is parsed as decimal nanoseconds. Without one, or if no such property is
/// present, the wall clock is used.
pub fn extract_log_time(
    properties: &[(String, String)],
    stamp_property: &str,
) -> Result<u64, ProtocolViolation> {
    if !stamp_property.is_empty() {
        if let Some((_, value)) = properties.iter().find(|(key, _)| key == stamp_property) {
            return value
                .parse::<u64>()
                .map_err(|_| ProtocolViolation::MalformedTimestamp {
                    property: stamp_property.to_string(),
                    value: value.clone(),
                });
        }
    }

    Ok(now_nanos())
}
