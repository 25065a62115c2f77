// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Recording statistics.

use std::time::Instant;

/// Recording statistics.
#[derive(Debug, Clone, Default)]
pub struct RecordingStats {
    /// Total messages recorded.
    pub message_count: u64,

    /// Total payload bytes recorded.
    pub bytes_written: u64,

    /// Channels created.
    pub channel_count: usize,

    /// Recording duration in seconds.
    pub duration_secs: f64,

    /// Messages per second (average).
    pub messages_per_second: f64,
}

impl RecordingStats {
    /// Account for one written record.
    pub fn record_message(&mut self, payload_len: usize, channel_count: usize) {
        self.message_count += 1;
        self.bytes_written += payload_len as u64;
        self.channel_count = channel_count;
    }

    /// Update duration and rate from the recording start.
    pub fn finish(&mut self, start: Instant) {
        self.duration_secs = start.elapsed().as_secs_f64();
        if self.duration_secs > 0.0 {
            self.messages_per_second = self.message_count as f64 / self.duration_secs;
        }
    }

    /// Log a one-line summary.
    pub fn report(&self) {
        tracing::info!(
            "Recorded {} messages on {} channels ({:.1} MB)",
            self.message_count,
            self.channel_count,
            self.bytes_written as f64 / 1_048_576.0
        );
    }
}
