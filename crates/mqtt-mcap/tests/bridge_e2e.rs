// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! End-to-end recording tests against a scripted in-process broker.

use crossbeam::channel::{self, Receiver, Sender};
use mqtt_mcap::{
    shutdown, BridgeConfig, BridgeError, BrokerClient, BrokerError, ChannelId, Dispatcher,
    DispatcherState, ErrorKind, InboundMessage, ProtocolViolation, QoS, Record, RecordSink,
    RunOutcome, RunSummary, ShutdownToken, Subscription, TopicPattern, WriterError,
};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tempfile::tempdir;

#[derive(Debug, Default)]
struct BrokerLog {
    connect_attempts: u32,
    subscriptions: Vec<(Subscription, QoS)>,
    disconnected: bool,
}

struct ScriptedBroker {
    failures_left: u32,
    log: Arc<Mutex<BrokerLog>>,
    tx: Sender<InboundMessage>,
    rx: Receiver<InboundMessage>,
}

impl ScriptedBroker {
    fn new() -> Self {
        Self::failing(0)
    }

    fn failing(failures: u32) -> Self {
        let (tx, rx) = channel::unbounded();
        Self {
            failures_left: failures,
            log: Arc::new(Mutex::new(BrokerLog::default())),
            tx,
            rx,
        }
    }
}

impl BrokerClient for ScriptedBroker {
    fn connect(&mut self, _timeout: Duration) -> Result<(), BrokerError> {
        self.log.lock().expect("lock").connect_attempts += 1;
        if self.failures_left > 0 {
            self.failures_left -= 1;
            return Err(BrokerError::ConnectionFailed("connection refused".into()));
        }
        Ok(())
    }

    fn subscribe(&mut self, subscription: &Subscription, qos: QoS) -> Result<(), BrokerError> {
        self.log
            .lock()
            .expect("lock")
            .subscriptions
            .push((subscription.clone(), qos));
        Ok(())
    }

    fn inbound(&self) -> Receiver<InboundMessage> {
        self.rx.clone()
    }

    fn disconnect(&mut self) -> Result<(), BrokerError> {
        self.log.lock().expect("lock").disconnected = true;
        Ok(())
    }
}

fn test_config(output: &Path, topics: &[&str]) -> BridgeConfig {
    BridgeConfig::new(output)
        .topics(topics.iter().map(|t| t.parse::<TopicPattern>().expect("pattern")))
        .retry(Duration::from_millis(10), Duration::from_millis(10))
        .poll_timeout(Duration::from_millis(50))
        .stats_interval_secs(0)
}

/// Queue `messages`, run the bridge until they are consumed, then shut down.
fn drive<F>(
    tx: &Sender<InboundMessage>,
    messages: Vec<InboundMessage>,
    run: F,
) -> Result<RunSummary, BridgeError>
where
    F: FnOnce(&ShutdownToken) -> Result<RunSummary, BridgeError> + Send + 'static,
{
    for msg in messages {
        tx.send(msg).expect("queue");
    }

    let (handle, token) = shutdown::channel();
    let worker = thread::spawn(move || run(&token));

    while !tx.is_empty() && !worker.is_finished() {
        thread::sleep(Duration::from_millis(5));
    }
    handle.trigger();
    worker.join().expect("join")
}

struct RecordedMessage {
    topic: String,
    encoding: String,
    log_time: u64,
    publish_time: u64,
    payload: Vec<u8>,
}

fn read_mcap(path: &Path) -> Vec<RecordedMessage> {
    let data = std::fs::read(path).expect("read output");
    mcap::MessageStream::new(&data)
        .expect("valid mcap")
        .map(|msg| {
            let msg = msg.expect("message");
            RecordedMessage {
                topic: msg.channel.topic.clone(),
                encoding: msg.channel.message_encoding.clone(),
                log_time: msg.log_time,
                publish_time: msg.publish_time,
                payload: msg.data.to_vec(),
            }
        })
        .collect()
}

fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

#[test]
fn test_wildcard_topics_get_own_channels() {
    let dir = tempdir().expect("tempdir");
    let output = dir.path().join("sensors.mcap");
    let broker = ScriptedBroker::new();
    let tx = broker.tx.clone();
    let log = Arc::clone(&broker.log);
    let config = test_config(&output, &["sensors/+:json"]);

    let summary = drive(
        &tx,
        vec![
            InboundMessage::new("sensors/temp", br#"{"c":21.5}"#.to_vec()).with_subscription_id(1),
            InboundMessage::new("sensors/humidity", br#"{"rh":40}"#.to_vec())
                .with_subscription_id(1),
        ],
        move |token| Dispatcher::new(config, broker).run(token),
    )
    .expect("clean run");

    assert_eq!(summary.outcome, RunOutcome::Completed);
    assert_eq!(
        summary.states,
        vec![
            DispatcherState::Disconnected,
            DispatcherState::Connecting,
            DispatcherState::Subscribing,
            DispatcherState::Running,
            DispatcherState::ShuttingDown,
            DispatcherState::Closed,
        ]
    );
    assert_eq!(summary.stats.message_count, 2);
    assert_eq!(summary.stats.channel_count, 2);

    let recorded = read_mcap(&output);
    assert_eq!(recorded.len(), 2);
    assert_eq!(recorded[0].topic, "sensors/temp");
    assert_eq!(recorded[1].topic, "sensors/humidity");
    assert!(recorded.iter().all(|m| m.encoding == "json"));
    assert_eq!(recorded[0].payload, br#"{"c":21.5}"#.to_vec());

    let log = log.lock().expect("lock");
    assert_eq!(log.subscriptions.len(), 1);
    assert_eq!(log.subscriptions[0].0.id, 1);
    assert_eq!(log.subscriptions[0].0.pattern, "sensors/+");
    assert_eq!(log.subscriptions[0].1, QoS::AtLeastOnce);
    assert!(log.disconnected);
}

#[test]
fn test_subscription_ids_follow_declaration_order() {
    let dir = tempdir().expect("tempdir");
    let output = dir.path().join("order.mcap");
    let broker = ScriptedBroker::new();
    let tx = broker.tx.clone();
    let log = Arc::clone(&broker.log);
    let config = test_config(&output, &["a/#:json", "b/+:text", "c"]);

    drive(&tx, Vec::new(), move |token| {
        Dispatcher::new(config, broker).run(token)
    })
    .expect("clean run");

    let log = log.lock().expect("lock");
    let subscribed: Vec<_> = log
        .subscriptions
        .iter()
        .map(|(s, _)| (s.id, s.pattern.as_str(), s.encoding.as_str()))
        .collect();
    assert_eq!(
        subscribed,
        vec![(1, "a/#", "json"), (2, "b/+", "text"), (3, "c", "")]
    );
}

#[test]
fn test_overlapping_subscriptions_with_different_encodings_abort() {
    let dir = tempdir().expect("tempdir");
    let output = dir.path().join("ambiguous.mcap");
    let broker = ScriptedBroker::new();
    let tx = broker.tx.clone();
    let log = Arc::clone(&broker.log);
    let config = test_config(&output, &["a/#:json", "a/b:text"]);

    let err = drive(
        &tx,
        vec![
            InboundMessage::new("a/c", b"first".to_vec()).with_subscription_id(1),
            InboundMessage::new("a/b", b"both".to_vec())
                .with_subscription_id(1)
                .with_subscription_id(2),
            InboundMessage::new("a/d", b"never".to_vec()).with_subscription_id(1),
        ],
        move |token| Dispatcher::new(config, broker).run(token),
    )
    .expect_err("ambiguous encoding is fatal");

    assert_eq!(err.kind(), ErrorKind::ProtocolViolation);
    match err {
        BridgeError::Protocol { topic, source } => {
            assert_eq!(topic, "a/b");
            assert!(matches!(source, ProtocolViolation::AmbiguousEncoding { .. }));
        }
        other => panic!("unexpected error: {}", other),
    }

    // The output is still finalized and holds everything before the failure.
    let recorded = read_mcap(&output);
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].topic, "a/c");
    assert!(log.lock().expect("lock").disconnected);
}

#[test]
fn test_unknown_subscription_id_aborts() {
    let dir = tempdir().expect("tempdir");
    let output = dir.path().join("unknown.mcap");
    let broker = ScriptedBroker::new();
    let tx = broker.tx.clone();
    let config = test_config(&output, &["a/#:json"]);

    let err = drive(
        &tx,
        vec![InboundMessage::new("a/b", b"x".to_vec()).with_subscription_id(99)],
        move |token| Dispatcher::new(config, broker).run(token),
    )
    .expect_err("unknown id is fatal");

    assert!(matches!(
        err,
        BridgeError::Protocol {
            source: ProtocolViolation::UnknownSubscriptionId(99),
            ..
        }
    ));
    assert!(read_mcap(&output).is_empty());
}

#[test]
fn test_message_without_subscription_id_aborts() {
    let dir = tempdir().expect("tempdir");
    let output = dir.path().join("no_id.mcap");
    let broker = ScriptedBroker::new();
    let tx = broker.tx.clone();
    let config = test_config(&output, &["a/#:json"]);

    let err = drive(
        &tx,
        vec![InboundMessage::new("a/b", b"x".to_vec())],
        move |token| Dispatcher::new(config, broker).run(token),
    )
    .expect_err("missing id is fatal");

    assert!(matches!(
        err,
        BridgeError::Protocol {
            source: ProtocolViolation::NoEncodingFound,
            ..
        }
    ));
}

#[test]
fn test_stamp_property_sets_log_time() {
    let dir = tempdir().expect("tempdir");
    let output = dir.path().join("stamped.mcap");
    let broker = ScriptedBroker::new();
    let tx = broker.tx.clone();
    let config = test_config(&output, &["imu/#:cdr"]).stamp_property("ts");

    let before = now_nanos();
    drive(
        &tx,
        vec![
            InboundMessage::new("imu/accel", b"a".to_vec())
                .with_subscription_id(1)
                .with_property("frame", "base")
                .with_property("ts", "123456789"),
            InboundMessage::new("imu/gyro", b"g".to_vec()).with_subscription_id(1),
        ],
        move |token| Dispatcher::new(config, broker).run(token),
    )
    .expect("clean run");
    let after = now_nanos();

    let recorded = read_mcap(&output);
    assert_eq!(recorded.len(), 2);
    assert_eq!(recorded[0].log_time, 123_456_789);
    assert_eq!(recorded[0].publish_time, recorded[0].log_time);

    assert!(recorded[1].log_time >= before && recorded[1].log_time <= after);
    assert_eq!(recorded[1].publish_time, recorded[1].log_time);
}

#[test]
fn test_malformed_stamp_aborts() {
    let dir = tempdir().expect("tempdir");
    let output = dir.path().join("malformed.mcap");
    let broker = ScriptedBroker::new();
    let tx = broker.tx.clone();
    let config = test_config(&output, &["imu/#:cdr"]).stamp_property("ts");

    let err = drive(
        &tx,
        vec![InboundMessage::new("imu/accel", b"a".to_vec())
            .with_subscription_id(1)
            .with_property("ts", "yesterday")],
        move |token| Dispatcher::new(config, broker).run(token),
    )
    .expect_err("malformed stamp is fatal");

    assert_eq!(err.kind(), ErrorKind::MalformedTimestamp);
    assert!(err.to_string().contains("yesterday"));
}

#[test]
fn test_topic_keeps_first_channel_across_subscriptions() {
    let dir = tempdir().expect("tempdir");
    let output = dir.path().join("reuse.mcap");
    let broker = ScriptedBroker::new();
    let tx = broker.tx.clone();
    let config = test_config(&output, &["a/#:json", "+/b:text"]);

    let summary = drive(
        &tx,
        vec![
            InboundMessage::new("a/b", b"1".to_vec()).with_subscription_id(1),
            InboundMessage::new("a/b", b"2".to_vec()).with_subscription_id(2),
        ],
        move |token| Dispatcher::new(config, broker).run(token),
    )
    .expect("clean run");

    assert_eq!(summary.stats.channel_count, 1);
    let recorded = read_mcap(&output);
    assert_eq!(recorded.len(), 2);
    assert!(recorded.iter().all(|m| m.encoding == "json"));
}

#[test]
fn test_strict_encoding_aborts_on_drift() {
    let dir = tempdir().expect("tempdir");
    let output = dir.path().join("strict.mcap");
    let broker = ScriptedBroker::new();
    let tx = broker.tx.clone();
    let config = test_config(&output, &["a/#:json", "+/b:text"])
        .encoding_policy(mqtt_mcap::EncodingPolicy::Strict);

    let err = drive(
        &tx,
        vec![
            InboundMessage::new("a/b", b"1".to_vec()).with_subscription_id(1),
            InboundMessage::new("a/b", b"2".to_vec()).with_subscription_id(2),
        ],
        move |token| Dispatcher::new(config, broker).run(token),
    )
    .expect_err("drift is fatal");

    assert!(matches!(err, BridgeError::EncodingMismatch { .. }));
    assert_eq!(read_mcap(&output).len(), 1);
}

#[test]
fn test_retries_until_broker_accepts() {
    let dir = tempdir().expect("tempdir");
    let output = dir.path().join("retry.mcap");
    let broker = ScriptedBroker::failing(2);
    let tx = broker.tx.clone();
    let log = Arc::clone(&broker.log);
    let config = test_config(&output, &["a:json"]);

    let summary = drive(
        &tx,
        vec![InboundMessage::new("a", b"x".to_vec()).with_subscription_id(1)],
        move |token| Dispatcher::new(config, broker).run(token),
    )
    .expect("clean run");

    assert_eq!(summary.connect_attempts, 3);
    assert_eq!(log.lock().expect("lock").connect_attempts, 3);
    assert_eq!(read_mcap(&output).len(), 1);
}

#[test]
fn test_shutdown_while_unreachable_creates_no_file() {
    let dir = tempdir().expect("tempdir");
    let output = dir.path().join("unreachable.mcap");
    let broker = ScriptedBroker::failing(u32::MAX);
    let log = Arc::clone(&broker.log);
    let config = test_config(&output, &["a:json"]);

    let (handle, token) = shutdown::channel();
    let worker = thread::spawn(move || Dispatcher::new(config, broker).run(&token));
    thread::sleep(Duration::from_millis(100));
    handle.trigger();

    let summary = worker.join().expect("join").expect("clean shutdown");
    assert_eq!(summary.outcome, RunOutcome::CancelledBeforeConnect);
    assert!(log.lock().expect("lock").connect_attempts >= 2);
    assert!(!output.exists());
}

struct FailingSink {
    closed: Arc<AtomicBool>,
}

impl RecordSink for FailingSink {
    fn add_channel(&mut self, _topic: &str, _encoding: &str) -> Result<ChannelId, WriterError> {
        Ok(0)
    }

    fn write_record(&mut self, record: &Record<'_>) -> Result<(), WriterError> {
        Err(WriterError::Create {
            path: "disk-full".into(),
            source: std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("no space left for channel {}", record.channel_id),
            ),
        })
    }

    fn close(&mut self) -> Result<(), WriterError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn test_write_failure_still_closes_and_disconnects() {
    let broker = ScriptedBroker::new();
    let tx = broker.tx.clone();
    let log = Arc::clone(&broker.log);
    let config = test_config(Path::new("unused.mcap"), &["a:json"]);
    let closed = Arc::new(AtomicBool::new(false));
    let sink_closed = Arc::clone(&closed);

    let err = drive(
        &tx,
        vec![InboundMessage::new("a", b"x".to_vec()).with_subscription_id(1)],
        move |token| {
            Dispatcher::new(config, broker).run_with(token, move |_| {
                Ok(FailingSink {
                    closed: sink_closed,
                })
            })
        },
    )
    .expect_err("write failure is fatal");

    assert!(matches!(err, BridgeError::Writer(_)));
    assert!(closed.load(Ordering::SeqCst));
    assert!(log.lock().expect("lock").disconnected);
}
