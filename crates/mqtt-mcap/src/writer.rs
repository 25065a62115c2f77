// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! MCAP record writer.
//!
//! Produces files readable by Foxglove Studio and any MCAP tooling: one
//! schemaless channel per MQTT topic, tagged with the declared message
//! encoding, and one message record per delivery.

use crate::channel::ChannelId;
use crate::error::ErrorKind;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

/// Profile written into the MCAP header.
pub const PROFILE: &str = "mqtt";

/// Name of the metadata record describing the recording.
pub const METADATA_NAME: &str = "recording";

/// Output errors.
#[derive(Debug, Error)]
pub enum WriterError {
    #[error("failed to create '{}': {source}", .path.display())]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to open MCAP writer on '{}': {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: mcap::McapError,
    },

    #[error("failed to add channel '{topic}': {source}")]
    AddChannel {
        topic: String,
        #[source]
        source: mcap::McapError,
    },

    #[error("failed to write message on channel {channel_id}: {source}")]
    Write {
        channel_id: ChannelId,
        #[source]
        source: mcap::McapError,
    },

    #[error("failed to finalize output: {0}")]
    Close(#[source] mcap::McapError),

    #[error("output already closed")]
    Closed,
}

impl WriterError {
    pub(crate) fn kind(&self) -> ErrorKind {
        match self {
            Self::Create { .. } | Self::Open { .. } => ErrorKind::Open,
            Self::AddChannel { .. } | Self::Write { .. } => ErrorKind::Write,
            Self::Close(_) | Self::Closed => ErrorKind::Close,
        }
    }
}

/// Chunk compression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    Zstd,
    Lz4,
    None,
}

impl Compression {
    fn to_mcap(self) -> Option<mcap::Compression> {
        match self {
            Self::Zstd => Some(mcap::Compression::Zstd),
            Self::Lz4 => Some(mcap::Compression::Lz4),
            Self::None => None,
        }
    }
}

impl FromStr for Compression {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "zstd" => Ok(Self::Zstd),
            "lz4" => Ok(Self::Lz4),
            "none" => Ok(Self::None),
            other => Err(format!(
                "unknown compression '{}' (expected zstd, lz4 or none)",
                other
            )),
        }
    }
}

/// Output settings.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Output file path.
    pub path: PathBuf,

    /// Chunk compression.
    pub compression: Compression,

    /// Entries of the `recording` metadata record. Empty = no record.
    pub metadata: BTreeMap<String, String>,
}

impl WriterConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            compression: Compression::default(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// One message to append. `publish_time` always equals `log_time`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Record<'a> {
    pub channel_id: ChannelId,
    pub log_time: u64,
    pub publish_time: u64,
    pub payload: &'a [u8],
}

impl<'a> Record<'a> {
    pub fn new(channel_id: ChannelId, log_time: u64, payload: &'a [u8]) -> Self {
        Self {
            channel_id,
            log_time,
            publish_time: log_time,
            payload,
        }
    }
}

/// Destination for channels and records.
pub trait RecordSink {
    /// Declare a new channel and return its id.
    fn add_channel(&mut self, topic: &str, encoding: &str) -> Result<ChannelId, WriterError>;

    /// Append a record to a previously declared channel.
    fn write_record(&mut self, record: &Record<'_>) -> Result<(), WriterError>;

    /// Flush and finalize. No writes are accepted afterwards.
    fn close(&mut self) -> Result<(), WriterError>;
}

/// MCAP file writer.
pub struct McapRecordWriter {
    writer: Option<mcap::Writer<'static, BufWriter<File>>>,
    path: PathBuf,
    sequences: HashMap<ChannelId, u32>,
}

impl McapRecordWriter {
    /// Create the output file and write the header (and metadata record).
    pub fn open(config: &WriterConfig) -> Result<Self, WriterError> {
        let file = File::create(&config.path).map_err(|source| WriterError::Create {
            path: config.path.clone(),
            source,
        })?;

        let open_err = |source| WriterError::Open {
            path: config.path.clone(),
            source,
        };

        let mut writer = mcap::WriteOptions::new()
            .profile(PROFILE)
            .compression(config.compression.to_mcap())
            .create(BufWriter::new(file))
            .map_err(open_err)?;

        if !config.metadata.is_empty() {
            let metadata = mcap::records::Metadata {
                name: METADATA_NAME.to_string(),
                metadata: config.metadata.clone(),
            };
            writer.write_metadata(&metadata).map_err(open_err)?;
        }

        tracing::info!("Opened {}", config.path.display());

        Ok(Self {
            writer: Some(writer),
            path: config.path.clone(),
            sequences: HashMap::new(),
        })
    }

    /// Output path.
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Check if the writer still accepts records.
    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }
}

impl RecordSink for McapRecordWriter {
    fn add_channel(&mut self, topic: &str, encoding: &str) -> Result<ChannelId, WriterError> {
        let writer = self.writer.as_mut().ok_or(WriterError::Closed)?;

        let channel = mcap::Channel {
            topic: topic.to_string(),
            schema: None,
            message_encoding: encoding.to_string(),
            metadata: Default::default(),
        };

        let id = writer
            .add_channel(&channel)
            .map_err(|source| WriterError::AddChannel {
                topic: topic.to_string(),
                source,
            })?;
        self.sequences.insert(id, 0);
        Ok(id)
    }

    fn write_record(&mut self, record: &Record<'_>) -> Result<(), WriterError> {
        let writer = self.writer.as_mut().ok_or(WriterError::Closed)?;

        let sequence = self.sequences.entry(record.channel_id).or_insert(0);
        *sequence = sequence.wrapping_add(1);

        writer
            .write_to_known_channel(
                &mcap::records::MessageHeader {
                    channel_id: record.channel_id,
                    sequence: *sequence,
                    log_time: record.log_time,
                    publish_time: record.publish_time,
                },
                record.payload,
            )
            .map_err(|source| WriterError::Write {
                channel_id: record.channel_id,
                source,
            })
    }

    fn close(&mut self) -> Result<(), WriterError> {
        let mut writer = self.writer.take().ok_or(WriterError::Closed)?;
        writer.finish().map_err(WriterError::Close)?;

        tracing::info!("Closed {}", self.path.display());
        Ok(())
    }
}
