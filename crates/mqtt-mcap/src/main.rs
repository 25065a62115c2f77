// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! mqtt-mcap - Record MQTT messages to an MCAP file.
//!
//! Usage:
//!   mqtt-mcap --topics "sensors/+:json"
//!   mqtt-mcap --host tcp://broker:1883 -o capture.mcap --topics "a/#:json" --topics "b:text"
//!   mqtt-mcap --topics "telemetry/#:cbor" --stamp-property ts
//!   mqtt-mcap --config bridge.toml

use anyhow::Context;
use clap::Parser;
use mqtt_mcap::{
    shutdown, BridgeConfig, Compression, Dispatcher, EncodingPolicy, MqttBroker, QoS,
    RunOutcome, TopicPattern,
};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "mqtt-mcap")]
#[command(about = "Record MQTT messages to an MCAP file")]
#[command(version)]
struct Args {
    /// Configuration file (TOML). Command line flags override its values.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Broker URL [default: tcp://localhost:1883]
    #[arg(long)]
    host: Option<String>,

    /// Output path [default: output.mcap]
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Topics and message encoding split by ':' (repeatable)
    #[arg(long, required_unless_present = "config")]
    topics: Vec<TopicPattern>,

    /// Name of the MQTT user property to use as publish time in nanoseconds (default empty)
    #[arg(long)]
    stamp_property: Option<String>,

    /// MQTT client identifier [default: mqtt_mcap]
    #[arg(long)]
    client_id: Option<String>,

    /// Subscription QoS (0, 1 or 2) [default: 1]
    #[arg(long, value_parser = parse_qos)]
    qos: Option<QoS>,

    /// Chunk compression (zstd, lz4, none) [default: zstd]
    #[arg(long)]
    compression: Option<Compression>,

    /// Abort when a topic's encoding changes after its channel was created
    #[arg(long)]
    strict_encoding: bool,

    /// Statistics reporting interval (seconds, 0 to disable) [default: 10]
    #[arg(long)]
    stats_interval: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn parse_qos(s: &str) -> Result<QoS, String> {
    let level: u8 = s.parse().map_err(|_| format!("invalid QoS '{}'", s))?;
    QoS::try_from(level)
}

fn build_config(args: Args) -> anyhow::Result<BridgeConfig> {
    let mut config = match &args.config {
        Some(path) => BridgeConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => BridgeConfig::default(),
    };

    if let Some(host) = args.host {
        config = config.host(host);
    }
    if let Some(output) = args.output {
        config.output = output;
    }
    if !args.topics.is_empty() {
        config.topics.clear();
        config = config.topics(args.topics);
    }
    if let Some(name) = args.stamp_property {
        config = config.stamp_property(name);
    }
    if let Some(id) = args.client_id {
        config = config.client_id(id);
    }
    if let Some(qos) = args.qos {
        config = config.qos(qos);
    }
    if let Some(compression) = args.compression {
        config = config.compression(compression);
    }
    if args.strict_encoding {
        config = config.encoding_policy(EncodingPolicy::Strict);
    }
    if let Some(secs) = args.stats_interval {
        config = config.stats_interval_secs(secs);
    }

    config.validate()?;
    Ok(config)
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Setup logging
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = build_config(args)?;

    info!("mqtt-mcap v{}", env!("CARGO_PKG_VERSION"));
    info!("Broker: {}", config.host);
    info!("Output: {}", config.output.display());
    for topic in &config.topics {
        info!("Topic: {} (encoding '{}')", topic.pattern, topic.encoding);
    }

    let (handle, token) = shutdown::channel();
    ctrlc::set_handler(move || {
        info!("Quitting...");
        handle.trigger();
    })?;

    let broker = MqttBroker::new(&config)?;
    let output = config.output.clone();
    let summary = Dispatcher::new(config, broker).run(&token)?;

    match summary.outcome {
        RunOutcome::CancelledBeforeConnect => info!("Stopped before connecting"),
        RunOutcome::Completed => {
            info!("Recording stopped");
            info!("  Messages: {}", summary.stats.message_count);
            info!("  Channels: {}", summary.stats.channel_count);
            info!("  Duration: {:.1}s", summary.stats.duration_secs);
            info!("  Throughput: {:.1} msg/s", summary.stats.messages_per_second);
            info!("  File: {}", output.display());
        }
    }

    Ok(())
}
