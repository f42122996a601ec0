// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Handles client packets

use super::Session;
use crate::adapter::ChannelAdapter;
use crate::error::{Error, ErrorKind};
use crate::packet::{
    Packet, PingResponsePacket, PublishAckPacket, PublishCompletePacket, PublishPacket,
    PublishReceivedPacket, PublishReleasePacket, SubscribePacket, UnsubscribePacket,
};
use crate::topic::is_pub_topic_valid;
use crate::types::{DisconnectType, QoS};

impl Session {
    pub(super) async fn handle_client_packet(
        &self,
        adapter: &dyn ChannelAdapter,
        packet: Packet,
    ) -> Result<(), Error> {
        match packet {
            // The Server MUST process a second CONNECT Packet sent from
            // a Client as a protocol violation and disconnect the Client
            // [MQTT-3.1.0-2].
            Packet::Connect(_) => Err(Error::new(
                ErrorKind::ProtocolViolation,
                "session: Got a second CONNECT packet",
            )),
            Packet::Publish(publish) => self.on_client_publish(adapter, publish).await,
            Packet::PublishRelease(release) => {
                self.send(
                    adapter,
                    Packet::PublishComplete(PublishCompletePacket::new(release.packet_id())),
                )
                .await
            }
            Packet::PublishReceived(received) => {
                self.send(
                    adapter,
                    Packet::PublishRelease(PublishReleasePacket::new(received.packet_id())),
                )
                .await
            }
            // Outbound QoS 1/2 completion is not tracked, see the packet
            // id allocator.
            Packet::PublishAck(ack) => {
                log::trace!(
                    "session: {}: discard PUBACK, id: {}",
                    self.client_id(),
                    ack.packet_id()
                );
                Ok(())
            }
            Packet::PublishComplete(complete) => {
                log::trace!(
                    "session: {}: discard PUBCOMP, id: {}",
                    self.client_id(),
                    complete.packet_id()
                );
                Ok(())
            }
            Packet::Subscribe(subscribe) => self.on_client_subscribe(adapter, subscribe).await,
            Packet::Unsubscribe(unsubscribe) => {
                self.on_client_unsubscribe(adapter, unsubscribe).await
            }
            Packet::PingRequest(_) => {
                self.send(adapter, Packet::PingResponse(PingResponsePacket::new()))
                    .await
            }
            Packet::Disconnect(_) => {
                self.stop(DisconnectType::Clean).await;
                Ok(())
            }
            other => Err(Error::from_string(
                ErrorKind::ProtocolViolation,
                format!(
                    "session: Unexpected {:?} packet from client",
                    other.packet_type()
                ),
            )),
        }
    }

    async fn on_client_publish(
        &self,
        adapter: &dyn ChannelAdapter,
        packet: PublishPacket,
    ) -> Result<(), Error> {
        if !is_pub_topic_valid(packet.topic()) {
            return Err(Error::from_string(
                ErrorKind::ProtocolViolation,
                format!("session: Invalid publish topic: {}", packet.topic()),
            ));
        }

        // The DUP flag MUST be set to 0 for all QoS 0 messages
        // [MQTT-3.3.1-2].
        if packet.qos() == QoS::AtMostOnce && packet.dup() {
            return Err(Error::new(
                ErrorKind::ProtocolViolation,
                "session: Got dup flag on QoS 0 publish packet",
            ));
        }

        let packet_id = match (packet.qos(), packet.packet_id()) {
            (QoS::AtMostOnce, _) => None,
            (_, Some(packet_id)) => Some(packet_id),
            (_, None) => {
                return Err(Error::new(
                    ErrorKind::ProtocolViolation,
                    "session: Missing packet id on QoS 1/2 publish packet",
                ))
            }
        };

        // Hand the message to the registry before acknowledging, so an
        // observer of the ack can assume fan-out has begun.
        self.registry
            .enqueue_application_message(Some(self.client_id()), packet.to_message())
            .await;

        match packet.qos() {
            QoS::AtMostOnce => Ok(()),
            QoS::AtLeastOnce => {
                let packet_id = packet_id.unwrap_or_default();
                self.send(adapter, Packet::PublishAck(PublishAckPacket::new(packet_id)))
                    .await
            }
            QoS::ExactOnce => {
                // Method B of [MQTT-4.3.3]: the message is delivered on
                // the initial PUBLISH, the PUBREL/PUBCOMP exchange only
                // completes the handshake.
                let packet_id = packet_id.unwrap_or_default();
                self.send(
                    adapter,
                    Packet::PublishReceived(PublishReceivedPacket::new(packet_id)),
                )
                .await
            }
        }
    }

    async fn on_client_subscribe(
        &self,
        adapter: &dyn ChannelAdapter,
        packet: SubscribePacket,
    ) -> Result<(), Error> {
        // The payload of a SUBSCRIBE packet MUST contain at least one
        // Topic Filter / QoS pair [MQTT-3.8.3-3].
        if packet.topics().is_empty() {
            return Err(Error::new(
                ErrorKind::ProtocolViolation,
                "session: Empty topic filter list in SUBSCRIBE packet",
            ));
        }

        let result = self.subscriptions.subscribe(
            self.client_id(),
            &packet,
            self.config.subscription_interceptor(),
        );
        self.send(adapter, Packet::SubscribeAck(result.ack_packet))
            .await?;

        if result.close_connection {
            log::warn!(
                "session: {}: subscription interceptor demanded connection close",
                self.client_id()
            );
            self.stop(DisconnectType::NotClean).await;
            return Ok(());
        }

        self.replay_retained(&result.granted).await;
        Ok(())
    }

    async fn on_client_unsubscribe(
        &self,
        adapter: &dyn ChannelAdapter,
        packet: UnsubscribePacket,
    ) -> Result<(), Error> {
        let ack = self.subscriptions.unsubscribe(&packet);
        self.send(adapter, Packet::UnsubscribeAck(ack)).await
    }

    async fn send(&self, adapter: &dyn ChannelAdapter, packet: Packet) -> Result<(), Error> {
        adapter.send_packet(&packet).await
    }
}
