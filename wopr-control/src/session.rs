// Copyright 2025 The Wopr Control Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Broker session lifecycle: lazy connect, QoS 1 publish, inbound delivery.
//!
//! One [`SessionManager`] owns at most one live broker connection for one
//! device. `connect` is idempotent while connected and `publish` reconnects
//! on demand. Inbound messages on the device's wildcard subscription are
//! delivered to a registered [`MessageHandler`] from a background pump task.
//!
//! Concurrency contract: the foreground API and the pump task share only the
//! [`ConnectionState`] cell, guarded by a single mutex that is never held
//! across an await point. Connection establishment itself is serialized
//! behind the lock on the live-client slot, so concurrent `publish` calls
//! coalesce into one reconnect instead of racing two event loops.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, Incoming, MqttOptions, QoS};
use tokio::task::JoinHandle;

use crate::command::{subscription_topic, DeviceId};
use crate::config::SessionConfig;
use crate::error::{ConnectError, PublishError};

/// Connection lifecycle state, driven only by broker acknowledgements.
///
/// `Failed` is recoverable through an explicit new `connect` attempt; the
/// manager never retries on its own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

/// Consumer of inbound messages on the device's wildcard subscription.
///
/// Invoked from the background pump task, once per message. Ordering follows
/// the broker's per-topic guarantee; there is no cross-topic ordering.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn on_message(&self, topic: &str, payload: &[u8]);
}

/// Message counters for one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub messages_sent: u64,
    pub messages_received: u64,
}

/// Manages the connection lifecycle to the broker for one device.
pub struct SessionManager {
    config: SessionConfig,
    device: DeviceId,
    /// The one cell shared with the pump task.
    state: Arc<Mutex<ConnectionState>>,
    handler: Arc<RwLock<Option<Arc<dyn MessageHandler>>>>,
    sent: AtomicU64,
    received: Arc<AtomicU64>,
    /// Owns the live client and serializes connection establishment.
    live: tokio::sync::Mutex<Option<LiveSession>>,
}

struct LiveSession {
    client: AsyncClient,
    pump: JoinHandle<()>,
}

impl SessionManager {
    /// Create a manager for `device` using the given broker config.
    ///
    /// No network activity happens until [`connect`](Self::connect) or the
    /// first [`publish`](Self::publish).
    pub fn new(config: SessionConfig, device: DeviceId) -> Self {
        Self {
            config,
            device,
            state: Arc::new(Mutex::new(ConnectionState::Disconnected)),
            handler: Arc::new(RwLock::new(None)),
            sent: AtomicU64::new(0),
            received: Arc::new(AtomicU64::new(0)),
            live: tokio::sync::Mutex::new(None),
        }
    }

    /// The device this session targets.
    pub fn device(&self) -> &DeviceId {
        &self.device
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Messages sent and received so far.
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            messages_sent: self.sent.load(Ordering::Relaxed),
            messages_received: self.received.load(Ordering::Relaxed),
        }
    }

    /// Register the inbound message consumer. Last registration wins.
    pub fn on_message(&self, handler: Arc<dyn MessageHandler>) {
        let mut slot = self.handler.write().unwrap_or_else(|e| e.into_inner());
        *slot = Some(handler);
    }

    /// Establish the broker session and the wildcard subscription.
    ///
    /// Idempotent while Connected. On refusal, transport failure or timeout
    /// the state becomes Failed and the error carries the broker-reported
    /// reason; a later `connect` starts over from scratch.
    pub async fn connect(&self) -> Result<(), ConnectError> {
        let mut live = self.live.lock().await;
        self.connect_locked(&mut live).await
    }

    async fn connect_locked(&self, live: &mut Option<LiveSession>) -> Result<(), ConnectError> {
        if live.is_some() && self.state() == ConnectionState::Connected {
            return Ok(());
        }
        // Drop any pump left over from a failed or broker-closed session.
        // Waited out so a late state write from it cannot clobber ours.
        if let Some(LiveSession { pump, .. }) = live.take() {
            pump.abort();
            let _ = pump.await;
        }
        self.set_state(ConnectionState::Connecting);

        let mut options = MqttOptions::new(
            &self.config.client_id,
            &self.config.broker_host,
            self.config.port,
        );
        options.set_keep_alive(Duration::from_secs(self.config.keep_alive_secs));
        if let (Some(user), Some(pass)) = (&self.config.username, &self.config.password) {
            options.set_credentials(user, pass);
        }

        let (client, mut eventloop) = AsyncClient::new(options, 64);

        let timeout = Duration::from_secs(self.config.connect_timeout_secs);
        let code = match tokio::time::timeout(timeout, wait_for_connack(&mut eventloop)).await {
            Ok(Ok(code)) => code,
            Ok(Err(err)) => {
                self.set_state(ConnectionState::Failed);
                return Err(err);
            }
            Err(_) => {
                self.set_state(ConnectionState::Failed);
                return Err(ConnectError::Timeout(timeout));
            }
        };
        if code != ConnectReturnCode::Success {
            warn!(
                "[{}] Broker refused connection: {:?}",
                self.config.client_id, code
            );
            self.set_state(ConnectionState::Failed);
            return Err(ConnectError::Refused(code));
        }

        let topic = subscription_topic(&self.device);
        if let Err(e) = client.subscribe(&topic, QoS::AtLeastOnce).await {
            self.set_state(ConnectionState::Failed);
            return Err(ConnectError::Subscribe(e));
        }
        info!(
            "[{}] Connected to {}:{}, subscribed to {}",
            self.config.client_id, self.config.broker_host, self.config.port, topic
        );

        let pump = tokio::spawn(pump_events(
            eventloop,
            self.state.clone(),
            self.handler.clone(),
            self.received.clone(),
            self.config.client_id.clone(),
        ));

        *live = Some(LiveSession { client, pump });
        self.set_state(ConnectionState::Connected);
        Ok(())
    }

    /// Publish `payload` to `topic` with at-least-once delivery (QoS 1).
    ///
    /// If the session is not Connected this performs exactly one `connect`
    /// first. `Ok` means the message was accepted for QoS 1 delivery; the
    /// broker may still deliver it more than once, so callers must not
    /// assume exactly-once from this layer.
    pub async fn publish(
        &self,
        topic: &str,
        payload: impl Into<Vec<u8>>,
    ) -> Result<(), PublishError> {
        let mut live = self.live.lock().await;
        if self.state() != ConnectionState::Connected {
            self.connect_locked(&mut live).await?;
        }
        let client = match live.as_ref() {
            Some(session) => session.client.clone(),
            None => return Err(PublishError::NotConnected),
        };
        drop(live);

        client
            .publish(topic, QoS::AtLeastOnce, false, payload.into())
            .await?;
        self.sent.fetch_add(1, Ordering::Relaxed);
        debug!("[{}] Published to {}", self.config.client_id, topic);
        Ok(())
    }

    /// Tear the session down.
    ///
    /// Safe from any state, including concurrently with an in-flight publish
    /// (the publish completes or fails cleanly on its cloned client handle).
    /// Always leaves the state Disconnected.
    pub async fn disconnect(&self) {
        let mut live = self.live.lock().await;
        if let Some(LiveSession { client, pump }) = live.take() {
            let _ = client.disconnect().await;
            pump.abort();
            // Wait the pump out; it may be mid-way through writing Failed,
            // and Disconnected must be the word that stands.
            let _ = pump.await;
        }
        self.set_state(ConnectionState::Disconnected);
        info!("[{}] Disconnected", self.config.client_id);
    }

    fn set_state(&self, next: ConnectionState) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        *state = next;
    }
}

/// Drive the event loop until the broker's CONNACK.
///
/// rumqttc reports a refused CONNACK as a connection error; that is mapped
/// back to `Refused` so the broker's reason code survives.
async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<ConnectReturnCode, ConnectError> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Incoming::ConnAck(ack))) => return Ok(ack.code),
            Ok(_) => {}
            Err(rumqttc::ConnectionError::ConnectionRefused(code)) => {
                return Err(ConnectError::Refused(code))
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Background task: keep-alive traffic and inbound delivery.
///
/// Exits on the first broker disconnect or transport error; reconnecting is
/// the caller's decision, via the next `connect` or `publish`.
async fn pump_events(
    mut eventloop: EventLoop,
    state: Arc<Mutex<ConnectionState>>,
    handler: Arc<RwLock<Option<Arc<dyn MessageHandler>>>>,
    received: Arc<AtomicU64>,
    client_id: String,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Incoming::Publish(publish))) => {
                received.fetch_add(1, Ordering::Relaxed);
                let current = handler.read().unwrap_or_else(|e| e.into_inner()).clone();
                if let Some(handler) = current {
                    handler.on_message(&publish.topic, &publish.payload).await;
                }
            }
            Ok(Event::Incoming(Incoming::Disconnect)) => {
                info!("[{client_id}] Broker closed the session");
                *state.lock().unwrap_or_else(|e| e.into_inner()) = ConnectionState::Disconnected;
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("[{client_id}] Connection lost: {e}");
                *state.lock().unwrap_or_else(|e| e.into_inner()) = ConnectionState::Failed;
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::DeviceId;
    use crate::config::SessionConfig;

    use bytes::BytesMut;
    use rumqttc::mqttbytes::v4::{
        self, ConnAck, Packet, PingResp, PubAck, SubAck, SubscribeReasonCode,
    };
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    fn manager(host: &str, port: u16, timeout_secs: u64) -> SessionManager {
        let config = SessionConfig::builder(host)
            .port(port)
            .client_id("wopr-test")
            .connect_timeout_secs(timeout_secs)
            .build();
        SessionManager::new(config, DeviceId::new("d1").unwrap())
    }

    /// Minimal scripted broker on loopback: acknowledges CONNECT, SUBSCRIBE,
    /// QoS 1 PUBLISH and PINGREQ, one client at a time, and counts every
    /// CONNECT it sees.
    async fn scripted_broker() -> (u16, Arc<AtomicU64>, JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let connects = Arc::new(AtomicU64::new(0));
        let counter = connects.clone();
        let handle = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                serve_client(stream, &counter).await;
            }
        });
        (port, connects, handle)
    }

    async fn serve_client(mut stream: TcpStream, connects: &AtomicU64) {
        let mut read_buf = BytesMut::with_capacity(4096);
        loop {
            match stream.read_buf(&mut read_buf).await {
                Ok(0) | Err(_) => return,
                Ok(_) => {}
            }
            loop {
                let reply = match v4::read(&mut read_buf, 65535) {
                    Ok(Packet::Connect(_)) => {
                        connects.fetch_add(1, Ordering::SeqCst);
                        let ack = ConnAck {
                            session_present: false,
                            code: ConnectReturnCode::Success,
                        };
                        let mut out = BytesMut::new();
                        ack.write(&mut out).unwrap();
                        Some(out)
                    }
                    Ok(Packet::Subscribe(subscribe)) => {
                        let ack = SubAck {
                            pkid: subscribe.pkid,
                            return_codes: vec![SubscribeReasonCode::Success(QoS::AtLeastOnce)],
                        };
                        let mut out = BytesMut::new();
                        ack.write(&mut out).unwrap();
                        Some(out)
                    }
                    Ok(Packet::Publish(publish)) => {
                        let ack = PubAck { pkid: publish.pkid };
                        let mut out = BytesMut::new();
                        ack.write(&mut out).unwrap();
                        Some(out)
                    }
                    Ok(Packet::PingReq) => {
                        let mut out = BytesMut::new();
                        PingResp.write(&mut out).unwrap();
                        Some(out)
                    }
                    Ok(Packet::Disconnect) => return,
                    Ok(_) => None,
                    Err(rumqttc::mqttbytes::Error::InsufficientBytes(_)) => break,
                    Err(_) => return,
                };
                if let Some(out) = reply {
                    if stream.write_all(&out).await.is_err() {
                        return;
                    }
                }
            }
        }
    }

    #[test]
    fn test_initial_state_is_disconnected() {
        let session = manager("localhost", 1883, 1);
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_disconnect_is_safe_from_disconnected() {
        let session = manager("localhost", 1883, 1);
        session.disconnect().await;
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_failure_marks_failed() {
        // Nothing listens on loopback port 1; the TCP connect is refused.
        let session = manager("127.0.0.1", 1, 2);
        let err = session.connect().await.unwrap_err();
        assert!(matches!(
            err,
            ConnectError::Transport(_) | ConnectError::Timeout(_)
        ));
        assert_eq!(session.state(), ConnectionState::Failed);
    }

    #[tokio::test]
    async fn test_publish_reconnects_and_surfaces_connect_error() {
        let session = manager("127.0.0.1", 1, 2);
        let err = session
            .publish("wopr/d1/display/state/set", "ON")
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::Connect(_)));
        assert_eq!(session.state(), ConnectionState::Failed);
    }

    #[tokio::test]
    async fn test_publish_retries_connect_after_failed_state() {
        let session = manager("127.0.0.1", 1, 2);
        let _ = session.connect().await;
        assert_eq!(session.state(), ConnectionState::Failed);
        // A publish from Failed attempts a fresh connect rather than
        // reusing the dead session.
        let err = session.publish("wopr/d1/display/state/set", "ON").await;
        assert!(matches!(err, Err(PublishError::Connect(_))));
    }

    #[tokio::test]
    async fn test_disconnect_resets_failed_state() {
        let session = manager("127.0.0.1", 1, 2);
        let _ = session.connect().await;
        assert_eq!(session.state(), ConnectionState::Failed);
        session.disconnect().await;
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_stats_start_at_zero() {
        let session = manager("localhost", 1883, 1);
        assert_eq!(session.stats(), SessionStats::default());
    }

    #[tokio::test]
    async fn test_connect_reaches_connected_and_is_idempotent() {
        let (port, connects, broker) = scripted_broker().await;
        let session = manager("127.0.0.1", port, 5);

        session.connect().await.unwrap();
        assert_eq!(session.state(), ConnectionState::Connected);

        // A second connect while Connected is a no-op on the wire.
        session.connect().await.unwrap();
        assert_eq!(connects.load(Ordering::SeqCst), 1);

        session.disconnect().await;
        broker.abort();
    }

    #[tokio::test]
    async fn test_publish_while_connected_reuses_the_session() {
        let (port, connects, broker) = scripted_broker().await;
        let session = manager("127.0.0.1", port, 5);

        session.connect().await.unwrap();
        session
            .publish("wopr/d1/display/state/set", "ON")
            .await
            .unwrap();
        session
            .publish("wopr/d1/display/text/set", "HELLO")
            .await
            .unwrap();

        assert_eq!(session.state(), ConnectionState::Connected);
        assert_eq!(session.stats().messages_sent, 2);
        assert_eq!(connects.load(Ordering::SeqCst), 1);

        session.disconnect().await;
        broker.abort();
    }

    #[tokio::test]
    async fn test_publish_from_disconnected_connects_exactly_once() {
        let (port, connects, broker) = scripted_broker().await;
        let session = manager("127.0.0.1", port, 5);
        assert_eq!(session.state(), ConnectionState::Disconnected);

        session
            .publish("wopr/d1/display/state/set", "ON")
            .await
            .unwrap();

        assert_eq!(session.state(), ConnectionState::Connected);
        assert_eq!(session.stats().messages_sent, 1);
        assert_eq!(connects.load(Ordering::SeqCst), 1);

        session.disconnect().await;
        broker.abort();
    }

    #[tokio::test]
    async fn test_disconnect_outlives_a_dying_pump() {
        let (port, _connects, broker) = scripted_broker().await;
        let session = manager("127.0.0.1", port, 5);
        session.connect().await.unwrap();

        // Kill the broker first so the pump hits its error path while the
        // teardown runs; the pump must not write Failed over Disconnected.
        broker.abort();
        session.disconnect().await;
        assert_eq!(session.state(), ConnectionState::Disconnected);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }
}
