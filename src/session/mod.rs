// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Per-connection session engine.
//!
//! A [`Session`] owns one connected client: it drives the receive loop,
//! the QoS handshakes, the bounded outbound queue with its sender task,
//! and keep alive enforcement. Fan-out to other clients goes through the
//! [`SessionsRegistry`]; transport and wire codec live behind the
//! [`ChannelAdapter`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::adapter::ChannelAdapter;
use crate::config::{MessageQueueContext, SessionConfig};
use crate::error::ErrorKind;
use crate::packet::{
    ApplicationMessage, ConnectPacket, Packet, PublishPacket, SubscribeAck, SubscribeTopic,
};
use crate::registry::SessionsRegistry;
use crate::topic::TopicFilter;
use crate::types::{DisconnectType, QoS, SessionStatus};

mod handlers;
mod keep_alive;
mod packet_id;
mod pending;
mod subscriptions;

pub use keep_alive::{KeepAliveMonitor, ReadActivity};
pub use packet_id::PacketIdAllocator;
pub use pending::PendingQueue;
pub use subscriptions::{CheckResult, SubscribeResult, Subscription, Subscriptions};

/// Server side context of one client.
///
/// All state of this client is maintained in this struct. The registry
/// keeps one `Arc<Session>` per known client id; `run()` is called once
/// per connection, while `enqueue_application_message()` may be called
/// from any task at any time.
pub struct Session {
    client_id: String,
    config: SessionConfig,
    registry: Arc<dyn SessionsRegistry>,

    /// Present exactly while the session is connected.
    adapter: Mutex<Option<Arc<dyn ChannelAdapter>>>,

    /// Taken, published and cleared only on unclean termination.
    will_message: Mutex<Option<ApplicationMessage>>,

    clean_disconnect: AtomicBool,

    /// Lifetime signal of the current run. `stop()` is the only producer
    /// of cancellation.
    shutdown: Mutex<Option<CancellationToken>>,

    packet_ids: PacketIdAllocator,
    keep_alive: KeepAliveMonitor,
    subscriptions: Subscriptions,
    pending: PendingQueue,
}

impl Session {
    pub fn new(client_id: &str, config: SessionConfig, registry: Arc<dyn SessionsRegistry>) -> Self {
        let pending = PendingQueue::new(config.max_pending_messages(), config.overflow_strategy());
        Self {
            client_id: client_id.to_owned(),
            config,
            registry,
            adapter: Mutex::new(None),
            will_message: Mutex::new(None),
            clean_disconnect: AtomicBool::new(false),
            shutdown: Mutex::new(None),
            packet_ids: PacketIdAllocator::new(),
            keep_alive: KeepAliveMonitor::new(),
            subscriptions: Subscriptions::new(),
            pending,
        }
    }

    #[inline]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn is_connected(&self) -> bool {
        self.adapter.lock().unwrap().is_some()
    }

    /// Drive one connection until it ends.
    ///
    /// Returns whether the client disconnected cleanly with a DISCONNECT
    /// packet. No error leaves this function; failures are logged and
    /// folded into the return value.
    pub async fn run(self: Arc<Self>, connect: ConnectPacket, adapter: Arc<dyn ChannelAdapter>) -> bool {
        let shutdown = {
            let mut guard = self.shutdown.lock().unwrap();
            if guard.is_some() {
                log::error!("session: {}: run() called while already running", self.client_id);
                return false;
            }
            let shutdown = CancellationToken::new();
            *guard = Some(shutdown.clone());
            shutdown
        };

        log::info!(
            "session: {}: connected from {}, keep_alive: {}s",
            self.client_id,
            adapter.endpoint(),
            connect.keep_alive()
        );

        self.clean_disconnect.store(false, Ordering::SeqCst);
        *self.will_message.lock().unwrap() = connect.will().cloned();
        *self.adapter.lock().unwrap() = Some(Arc::clone(&adapter));
        self.keep_alive.reset();
        adapter.bind_read_activity(self.keep_alive.activity());

        {
            let session = Arc::clone(&self);
            let adapter = Arc::clone(&adapter);
            let shutdown = shutdown.clone();
            tokio::spawn(async move { session.sender_loop(adapter, shutdown).await });
        }
        {
            let session = Arc::clone(&self);
            let shutdown = shutdown.clone();
            let keep_alive = u64::from(connect.keep_alive());
            tokio::spawn(async move { session.keep_alive_loop(keep_alive, shutdown).await });
        }

        self.receive_loop(adapter.as_ref(), &shutdown).await;

        // Teardown order: detach the read events, drop the adapter
        // reference, dispose the lifetime signal. Sender and keep alive
        // tasks observe the cancellation and wind down on their own.
        adapter.unbind_read_activity();
        *self.adapter.lock().unwrap() = None;
        *self.shutdown.lock().unwrap() = None;

        let was_clean = self.clean_disconnect.load(Ordering::SeqCst);
        log::info!(
            "session: {}: disconnected, clean: {was_clean}",
            self.client_id
        );
        was_clean
    }

    async fn receive_loop(&self, adapter: &dyn ChannelAdapter, shutdown: &CancellationToken) {
        loop {
            let received = tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                received = adapter.receive_packet() => received,
            };

            match received {
                Ok(Some(packet)) => {
                    self.keep_alive.packet_received(packet.packet_type());
                    if let Err(err) = self.handle_client_packet(adapter, packet).await {
                        match err.kind() {
                            ErrorKind::Cancelled => (),
                            ErrorKind::ProtocolViolation => log::warn!(
                                "session: {}: protocol violation: {err}",
                                self.client_id
                            ),
                            _ => log::error!(
                                "session: {}: failed to handle packet: {err}",
                                self.client_id
                            ),
                        }
                        self.stop(DisconnectType::NotClean).await;
                        break;
                    }
                }
                Ok(None) => {
                    log::debug!("session: {}: connection closed by peer", self.client_id);
                    self.stop(DisconnectType::NotClean).await;
                    break;
                }
                Err(err) => {
                    if !err.is_cancelled() {
                        log::warn!(
                            "session: {}: failed to receive packet: {err}",
                            self.client_id
                        );
                    }
                    self.stop(DisconnectType::NotClean).await;
                    break;
                }
            }
        }
    }

    /// Terminate the current run. Idempotent; the first caller decides
    /// the disconnect type.
    ///
    /// On an unclean stop the will message, if any, is fanned out through
    /// the registry exactly once.
    pub async fn stop(&self, disconnect_type: DisconnectType) {
        {
            let guard = self.shutdown.lock().unwrap();
            let Some(shutdown) = guard.as_ref() else {
                return;
            };
            if shutdown.is_cancelled() {
                return;
            }
            self.clean_disconnect.store(
                disconnect_type == DisconnectType::Clean,
                Ordering::SeqCst,
            );
            shutdown.cancel();
        }

        log::debug!(
            "session: {}: stopping, type: {disconnect_type:?}",
            self.client_id
        );

        if disconnect_type == DisconnectType::NotClean {
            let will = self.will_message.lock().unwrap().take();
            if let Some(will) = will {
                log::debug!(
                    "session: {}: publishing will message to {}",
                    self.client_id,
                    will.topic()
                );
                self.registry
                    .enqueue_application_message(Some(&self.client_id), will)
                    .await;
            }
        }
    }

    /// Fan-out sink, called by the registry for every message that might
    /// concern this client. Non-blocking: it only enqueues.
    pub fn enqueue_application_message(
        &self,
        sender_client_id: Option<&str>,
        message: ApplicationMessage,
    ) {
        let check = self.subscriptions.check(&message);
        if !check.is_subscribed {
            return;
        }

        let mut message = message;
        message.set_qos(check.qos);

        if let Some(interceptor) = self.config.client_message_queue_interceptor() {
            let mut context = MessageQueueContext {
                sender_client_id,
                receiver_client_id: &self.client_id,
                application_message: Some(message),
                accept_enqueue: true,
            };
            interceptor(&mut context);
            if !context.accept_enqueue {
                log::debug!(
                    "session: {}: message dropped by queue interceptor",
                    self.client_id
                );
                return;
            }
            let Some(accepted) = context.application_message else {
                return;
            };
            message = accepted;
        }

        let packet_id = if message.qos() > QoS::AtMostOnce {
            Some(self.packet_ids.next_id())
        } else {
            None
        };
        self.pending
            .push(Packet::Publish(PublishPacket::from_message(&message, packet_id)));
    }

    /// Server initiated subscription, e.g. from an admin API. Triggers
    /// retained replay for the granted filters like a client SUBSCRIBE.
    pub async fn subscribe(&self, topics: &[SubscribeTopic]) -> Vec<SubscribeAck> {
        let (acks, close_connection, granted) = self.subscriptions.grant(
            &self.client_id,
            topics,
            self.config.subscription_interceptor(),
        );
        if close_connection {
            self.stop(DisconnectType::NotClean).await;
            return acks;
        }
        self.replay_retained(&granted).await;
        acks
    }

    /// Server initiated unsubscription.
    pub fn unsubscribe(&self, topic_filters: &[String]) {
        self.subscriptions.remove(topic_filters);
    }

    /// Best effort: a packet the sender task already popped is not
    /// recalled.
    pub fn clear_pending_application_messages(&self) {
        let dropped = self.pending.clear();
        if dropped > 0 {
            log::debug!(
                "session: {}: cleared {dropped} pending messages",
                self.client_id
            );
        }
    }

    pub fn fill_status(&self, status: &mut SessionStatus) {
        let adapter = self.adapter.lock().unwrap().clone();
        status.client_id = self.client_id.clone();
        status.is_connected = adapter.is_some();
        status.endpoint = adapter.as_ref().map(|adapter| adapter.endpoint());
        status.protocol_level = adapter.as_ref().map(|adapter| adapter.protocol_level());
        status.pending_messages_count = self.pending.len();
        status.last_packet_received = self.keep_alive.last_packet_received();
        status.last_non_keepalive_packet_received =
            self.keep_alive.last_non_keepalive_packet_received();
    }

    pub fn sent_packets_count(&self) -> u64 {
        self.pending.sent_packets_count()
    }

    async fn keep_alive_loop(&self, keep_alive: u64, shutdown: CancellationToken) {
        // A keep alive value of zero turns the mechanism off.
        if keep_alive == 0 {
            return;
        }

        let period = Duration::from_secs(keep_alive);
        // If the keep alive value is non-zero and the server does not
        // receive a control packet from the client within one and a half
        // times the keep alive time period, it MUST disconnect the network
        // connection to the client as if the network had failed
        // [MQTT-3.1.2-24].
        let timeout = period + period / 2;
        let mut interval = tokio::time::interval(period / 2);

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    if self.keep_alive.timed_out(timeout) {
                        log::warn!(
                            "session: {}: keep alive time reached, disconnect client",
                            self.client_id
                        );
                        self.stop(DisconnectType::NotClean).await;
                        break;
                    }
                }
            }
        }
    }

    async fn replay_retained(&self, filters: &[TopicFilter]) {
        if filters.is_empty() {
            return;
        }
        let retained = self.registry.retained_messages(filters).await;
        for message in retained {
            // Retained replay uses the same enqueue path as live fan-out,
            // so the QoS downgrade and the queue interceptor apply
            // uniformly.
            self.enqueue_application_message(None, message);
        }
    }
}
