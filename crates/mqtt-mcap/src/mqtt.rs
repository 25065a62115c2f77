// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! MQTT v5 broker client on top of `rumqttc`.
//!
//! Each connection attempt builds a fresh client and a delivery thread that
//! drives the event loop. The thread reports the first CONNACK (or the first
//! error) back to [`MqttBroker::connect`], then forwards every PUBLISH into
//! the inbound queue. The queue outlives individual attempts.
//!
//! Once connected, a transport loss is retried by the delivery thread; as the
//! session is started clean, every subscription is issued again after the
//! next CONNACK. The re-issue runs on its own thread: requests go through a
//! bounded queue that only the delivery thread drains.
//!
//! After a successful connect the delivery thread holds the only sender of
//! the inbound queue, so the queue disconnects once that thread exits.

use crate::broker::{BrokerClient, BrokerError, InboundMessage, QoS};
use crate::config::{BridgeConfig, BrokerAddress, ConfigError};
use crate::subscription::Subscription;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use rumqttc::v5::mqttbytes::v5::{Packet, Publish, SubscribeProperties};
use rumqttc::v5::mqttbytes::QoS as MqttQoS;
use rumqttc::v5::{Client, Connection, Event, MqttOptions};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Capacity of the client request channel.
const REQUEST_CAPACITY: usize = 64;

/// How long [`MqttBroker::disconnect`] waits for the DISCONNECT to go out.
const DISCONNECT_GRACE: Duration = Duration::from_secs(1);

type SharedSubscriptions = Arc<Mutex<Vec<(Subscription, QoS)>>>;

/// MQTT v5 implementation of [`BrokerClient`].
pub struct MqttBroker {
    address: BrokerAddress,
    client_id: String,
    keep_alive: Duration,
    reconnect_delay: Duration,
    /// Handed over to the delivery thread of the first successful session.
    inbound_tx: Option<Sender<InboundMessage>>,
    inbound_rx: Receiver<InboundMessage>,
    subscriptions: SharedSubscriptions,
    session: Option<Session>,
}

struct Session {
    client: Client,
    stop: Arc<AtomicBool>,
    exited: Receiver<()>,
}

impl MqttBroker {
    /// Create a disconnected client for the configured broker.
    pub fn new(config: &BridgeConfig) -> Result<Self, ConfigError> {
        let (inbound_tx, inbound_rx) = channel::unbounded();
        Ok(Self {
            address: config.broker_address()?,
            client_id: config.client_id.clone(),
            keep_alive: config.keep_alive(),
            reconnect_delay: config.retry_policy().interval,
            inbound_tx: Some(inbound_tx),
            inbound_rx,
            subscriptions: Arc::new(Mutex::new(Vec::new())),
            session: None,
        })
    }

    /// Check if a session is established.
    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.address.host, self.address.port);
        options.set_keep_alive(self.keep_alive);
        options.set_clean_start(true);
        options
    }
}

impl BrokerClient for MqttBroker {
    fn connect(&mut self, timeout: Duration) -> Result<(), BrokerError> {
        let inbound = self.inbound_tx.clone().ok_or_else(|| {
            BrokerError::ConnectionFailed("inbound queue already bound to a session".into())
        })?;

        let (client, connection) = Client::new(self.options(), REQUEST_CAPACITY);
        let (status_tx, status_rx) = channel::bounded(1);
        let (exited_tx, exited_rx) = channel::bounded::<()>(0);
        let stop = Arc::new(AtomicBool::new(false));

        let delivery = DeliveryLoop {
            client: client.clone(),
            connection,
            inbound,
            status: Some(status_tx),
            stop: Arc::clone(&stop),
            subscriptions: Arc::clone(&self.subscriptions),
            reconnect_delay: self.reconnect_delay,
            _exited: exited_tx,
        };
        thread::Builder::new()
            .name("mqtt-delivery".into())
            .spawn(move || delivery.run())
            .map_err(|e| BrokerError::ConnectionFailed(e.to_string()))?;

        let session = Session {
            client,
            stop,
            exited: exited_rx,
        };

        match status_rx.recv_timeout(timeout) {
            Ok(Ok(())) => {
                self.inbound_tx = None;
                self.session = Some(session);
                Ok(())
            }
            Ok(Err(reason)) => {
                session.abandon();
                Err(BrokerError::ConnectionFailed(reason))
            }
            Err(_) => {
                session.abandon();
                Err(BrokerError::Timeout(timeout))
            }
        }
    }

    fn subscribe(&mut self, subscription: &Subscription, qos: QoS) -> Result<(), BrokerError> {
        let session = self.session.as_mut().ok_or(BrokerError::NotConnected)?;
        issue_subscribe(&mut session.client, subscription, qos)?;

        let mut subscriptions = match self.subscriptions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        subscriptions.push((subscription.clone(), qos));
        Ok(())
    }

    fn inbound(&self) -> Receiver<InboundMessage> {
        self.inbound_rx.clone()
    }

    fn disconnect(&mut self) -> Result<(), BrokerError> {
        let Some(mut session) = self.session.take() else {
            return Ok(());
        };

        session.stop.store(true, Ordering::Release);
        let result = session
            .client
            .try_disconnect()
            .map_err(|e| BrokerError::DisconnectFailed(e.to_string()));

        if let Err(RecvTimeoutError::Timeout) = session.exited.recv_timeout(DISCONNECT_GRACE) {
            tracing::debug!("MQTT delivery thread still running after disconnect");
        }
        tracing::info!("MQTT disconnected");
        result
    }
}

impl Drop for MqttBroker {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            session.abandon();
        }
    }
}

impl Session {
    /// Stop the delivery thread without waiting for it.
    fn abandon(mut self) {
        self.stop.store(true, Ordering::Release);
        let _ = self.client.try_disconnect();
    }
}

fn to_mqtt_qos(qos: QoS) -> MqttQoS {
    match qos {
        QoS::AtMostOnce => MqttQoS::AtMostOnce,
        QoS::AtLeastOnce => MqttQoS::AtLeastOnce,
        QoS::ExactlyOnce => MqttQoS::ExactlyOnce,
    }
}

fn issue_subscribe(
    client: &mut Client,
    subscription: &Subscription,
    qos: QoS,
) -> Result<(), BrokerError> {
    let properties = SubscribeProperties {
        id: Some(subscription.id),
        user_properties: Vec::new(),
    };
    client
        .subscribe_with_properties(subscription.pattern.clone(), to_mqtt_qos(qos), properties)
        .map_err(|e| BrokerError::SubscribeFailed {
            pattern: subscription.pattern.clone(),
            reason: e.to_string(),
        })
}

fn to_inbound(publish: Publish) -> InboundMessage {
    let (properties, subscription_ids) = match publish.properties {
        Some(props) => (
            props.user_properties,
            props.subscription_identifiers.into_iter().collect(),
        ),
        None => (Vec::new(), BTreeSet::new()),
    };

    InboundMessage {
        topic: String::from_utf8_lossy(&publish.topic).into_owned(),
        payload: publish.payload.to_vec(),
        properties,
        subscription_ids,
    }
}

/// Event loop driver running on the delivery thread.
struct DeliveryLoop {
    client: Client,
    connection: Connection,
    inbound: Sender<InboundMessage>,
    status: Option<Sender<Result<(), String>>>,
    stop: Arc<AtomicBool>,
    subscriptions: SharedSubscriptions,
    reconnect_delay: Duration,
    // Dropped when the thread exits.
    _exited: Sender<()>,
}

impl DeliveryLoop {
    fn run(mut self) {
        let mut connected = false;

        for event in self.connection.iter() {
            let stopping = self.stop.load(Ordering::Acquire);

            match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    if stopping {
                        break;
                    }
                    if let Some(status) = self.status.take() {
                        let _ = status.send(Ok(()));
                    } else if !connected {
                        tracing::info!("MQTT reconnected, restoring subscriptions");
                        spawn_resubscribe(&self.client, &self.subscriptions);
                    }
                    connected = true;
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    if stopping {
                        continue;
                    }
                    if self.inbound.send(to_inbound(publish)).is_err() {
                        break;
                    }
                }
                Ok(Event::Incoming(Packet::SubAck(ack))) => {
                    tracing::debug!("Subscription acknowledged: {:?}", ack);
                }
                Ok(_) => {}
                Err(err) => {
                    if stopping {
                        break;
                    }
                    if let Some(status) = self.status.take() {
                        let _ = status.send(Err(err.to_string()));
                        break;
                    }
                    if connected {
                        tracing::warn!("MQTT connection lost: {}", err);
                    }
                    connected = false;
                    thread::sleep(self.reconnect_delay);
                }
            }
        }

        tracing::debug!("MQTT delivery thread exiting");
    }
}

fn spawn_resubscribe(client: &Client, subscriptions: &SharedSubscriptions) {
    let client = client.clone();
    let subscriptions = match subscriptions.lock() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    };

    let spawned = thread::Builder::new()
        .name("mqtt-resubscribe".into())
        .spawn(move || resubscribe(client, subscriptions));
    if let Err(err) = spawned {
        tracing::warn!("Failed to restore subscriptions: {}", err);
    }
}

fn resubscribe(mut client: Client, subscriptions: Vec<(Subscription, QoS)>) {
    for (subscription, qos) in &subscriptions {
        if let Err(err) = issue_subscribe(&mut client, subscription, *qos) {
            tracing::warn!("{}", err);
            return;
        }
    }
    tracing::debug!("Restored {} subscriptions", subscriptions.len());
}
