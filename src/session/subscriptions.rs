// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! The set of topic filters one client is subscribed to.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::config::{SubscriptionInterceptor, SubscriptionRequest};
use crate::packet::{
    ApplicationMessage, SubscribeAck, SubscribeAckPacket, SubscribePacket, SubscribeTopic,
    UnsubscribeAckPacket, UnsubscribePacket,
};
use crate::topic::TopicFilter;
use crate::types::QoS;

#[derive(Clone, Debug)]
pub struct Subscription {
    filter: TopicFilter,
    qos: QoS,
}

impl Subscription {
    #[inline]
    pub fn filter(&self) -> &TopicFilter {
        &self.filter
    }

    #[inline]
    pub fn qos(&self) -> QoS {
        self.qos
    }
}

/// Result of matching an application message against the subscription set.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CheckResult {
    pub is_subscribed: bool,

    /// min(publisher QoS, highest granted QoS among matching filters).
    pub qos: QoS,
}

/// Result of processing a SUBSCRIBE request.
#[derive(Debug)]
pub struct SubscribeResult {
    pub ack_packet: SubscribeAckPacket,

    /// Set when the subscription interceptor demands the connection be
    /// closed.
    pub close_connection: bool,

    /// Filters granted by this request, used for retained replay.
    pub granted: Vec<TopicFilter>,
}

/// Subscription store of a single session.
///
/// Mutated only from the session side; read concurrently by the registry
/// during fan-out, hence the lock.
#[derive(Debug, Default)]
pub struct Subscriptions {
    map: RwLock<HashMap<String, Subscription>>,
}

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process a SUBSCRIBE packet into a SUBACK.
    ///
    /// A rejected filter gets return code 0x80 in the ack; it never fails
    /// the whole packet. A duplicate filter replaces the prior entry.
    pub fn subscribe(
        &self,
        client_id: &str,
        packet: &SubscribePacket,
        interceptor: Option<&SubscriptionInterceptor>,
    ) -> SubscribeResult {
        let (acks, close_connection, granted) = self.grant(client_id, packet.topics(), interceptor);
        SubscribeResult {
            ack_packet: SubscribeAckPacket::with_vec(packet.packet_id(), acks),
            close_connection,
            granted,
        }
    }

    /// Shared grant loop for client SUBSCRIBE packets and server-initiated
    /// subscriptions.
    pub fn grant(
        &self,
        client_id: &str,
        topics: &[SubscribeTopic],
        interceptor: Option<&SubscriptionInterceptor>,
    ) -> (Vec<SubscribeAck>, bool, Vec<TopicFilter>) {
        let mut acks = Vec::with_capacity(topics.len());
        let mut close_connection = false;
        let mut granted = Vec::new();

        for topic in topics {
            let filter = match TopicFilter::parse(topic.topic()) {
                Ok(filter) => filter,
                Err(err) => {
                    log::warn!(
                        "subscriptions: {client_id}: invalid topic filter: {}, err: {err}",
                        topic.topic()
                    );
                    acks.push(SubscribeAck::Failed);
                    continue;
                }
            };

            let mut qos = topic.qos();
            let mut accept = true;
            if let Some(hook) = interceptor {
                let mut request = SubscriptionRequest {
                    client_id,
                    topic: topic.topic().to_string(),
                    qos,
                    accept: true,
                    close_connection: false,
                };
                hook(&mut request);
                qos = request.qos;
                accept = request.accept;
                close_connection = close_connection || request.close_connection;
            }

            if !accept {
                acks.push(SubscribeAck::Failed);
                continue;
            }

            self.map.write().unwrap().insert(
                filter.filter().to_string(),
                Subscription {
                    filter: filter.clone(),
                    qos,
                },
            );
            acks.push(SubscribeAck::QoS(qos));
            granted.push(filter);
        }

        (acks, close_connection, granted)
    }

    /// Process an UNSUBSCRIBE packet. Unknown filters are tolerated.
    pub fn unsubscribe(&self, packet: &UnsubscribePacket) -> UnsubscribeAckPacket {
        self.remove(packet.topics());
        UnsubscribeAckPacket::new(packet.packet_id())
    }

    pub fn remove(&self, topics: &[String]) {
        let mut map = self.map.write().unwrap();
        for topic in topics {
            if map.remove(topic).is_none() {
                log::debug!("subscriptions: not subscribed to {topic}, ignored");
            }
        }
    }

    /// Whether `message` matches any subscription, and at which QoS it
    /// should be delivered.
    pub fn check(&self, message: &ApplicationMessage) -> CheckResult {
        let map = self.map.read().unwrap();
        let mut granted: Option<QoS> = None;
        for subscription in map.values() {
            if subscription.filter().is_match(message.topic()) {
                granted = Some(match granted {
                    Some(qos) => qos.max(subscription.qos()),
                    None => subscription.qos(),
                });
            }
        }

        granted.map_or(
            CheckResult {
                is_subscribed: false,
                qos: QoS::AtMostOnce,
            },
            |qos| CheckResult {
                is_subscribed: true,
                qos: qos.min(message.qos()),
            },
        )
    }

    pub fn len(&self) -> usize {
        self.map.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().unwrap().is_empty()
    }
}
