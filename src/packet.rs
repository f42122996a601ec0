// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! In-memory model of MQTT v3 control packets.
//!
//! Wire encoding and decoding belong to the channel adapter; the session
//! engine only works with decoded packets.

use bytes::Bytes;

use crate::types::{PacketId, QoS};

/// Types of MQTT control packets.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum PacketType {
    Connect,
    Publish,
    PublishAck,
    PublishReceived,
    PublishRelease,
    PublishComplete,
    Subscribe,
    SubscribeAck,
    Unsubscribe,
    UnsubscribeAck,
    PingRequest,
    PingResponse,
    Disconnect,
}

/// An application message as seen by the broker: what remains of a PUBLISH
/// packet once protocol bookkeeping is stripped.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ApplicationMessage {
    topic: String,
    payload: Bytes,
    qos: QoS,
    retain: bool,
}

impl ApplicationMessage {
    pub fn new(topic: &str, qos: QoS, payload: Bytes) -> Self {
        Self {
            topic: topic.to_owned(),
            payload,
            qos,
            retain: false,
        }
    }

    #[inline]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn set_topic(&mut self, topic: &str) -> &mut Self {
        self.topic = topic.to_owned();
        self
    }

    #[inline]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn set_payload(&mut self, payload: Bytes) -> &mut Self {
        self.payload = payload;
        self
    }

    #[inline]
    pub fn qos(&self) -> QoS {
        self.qos
    }

    pub fn set_qos(&mut self, qos: QoS) -> &mut Self {
        self.qos = qos;
        self
    }

    #[inline]
    pub fn retain(&self) -> bool {
        self.retain
    }

    pub fn set_retain(&mut self, retain: bool) -> &mut Self {
        self.retain = retain;
        self
    }
}

/// The packet a client sends first, already validated by the connection
/// layer before the session takes over.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ConnectPacket {
    client_id: String,

    /// Keep alive interval in seconds, 0 disables keep alive checking.
    keep_alive: u16,

    clean_session: bool,

    /// Published on the client's behalf when the session terminates
    /// without a DISCONNECT packet.
    will: Option<ApplicationMessage>,
}

impl ConnectPacket {
    pub fn new(client_id: &str) -> Self {
        Self {
            client_id: client_id.to_owned(),
            keep_alive: 0,
            clean_session: true,
            will: None,
        }
    }

    #[inline]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn set_keep_alive(&mut self, keep_alive: u16) -> &mut Self {
        self.keep_alive = keep_alive;
        self
    }

    #[inline]
    pub fn keep_alive(&self) -> u16 {
        self.keep_alive
    }

    pub fn set_clean_session(&mut self, clean_session: bool) -> &mut Self {
        self.clean_session = clean_session;
        self
    }

    #[inline]
    pub fn clean_session(&self) -> bool {
        self.clean_session
    }

    pub fn set_will(&mut self, will: Option<ApplicationMessage>) -> &mut Self {
        self.will = will;
        self
    }

    #[inline]
    pub fn will(&self) -> Option<&ApplicationMessage> {
        self.will.as_ref()
    }
}

/// `PublishPacket` transports application messages in either direction.
///
/// Note that `packet_id` is present exactly when `QoS` is 1 or 2.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PublishPacket {
    topic: String,

    qos: QoS,

    /// If dup is false, this is the first attempt to send this packet.
    /// It must be false if QoS is 0.
    dup: bool,

    retain: bool,

    packet_id: Option<PacketId>,

    payload: Bytes,
}

impl PublishPacket {
    pub fn new(topic: &str, qos: QoS, payload: Bytes) -> Self {
        Self {
            topic: topic.to_owned(),
            qos,
            dup: false,
            retain: false,
            packet_id: None,
            payload,
        }
    }

    /// Build an outbound packet from an application message.
    pub fn from_message(message: &ApplicationMessage, packet_id: Option<PacketId>) -> Self {
        Self {
            topic: message.topic().to_owned(),
            qos: message.qos(),
            dup: false,
            retain: message.retain(),
            packet_id,
            payload: message.payload().clone(),
        }
    }

    /// Strip protocol bookkeeping, leaving the application message.
    pub fn to_message(&self) -> ApplicationMessage {
        let mut message = ApplicationMessage::new(&self.topic, self.qos, self.payload.clone());
        message.set_retain(self.retain);
        message
    }

    #[inline]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    #[inline]
    pub fn qos(&self) -> QoS {
        self.qos
    }

    pub fn set_qos(&mut self, qos: QoS) -> &mut Self {
        self.qos = qos;
        self
    }

    #[inline]
    pub fn dup(&self) -> bool {
        self.dup
    }

    pub fn set_dup(&mut self, dup: bool) -> &mut Self {
        self.dup = dup;
        self
    }

    #[inline]
    pub fn retain(&self) -> bool {
        self.retain
    }

    pub fn set_retain(&mut self, retain: bool) -> &mut Self {
        self.retain = retain;
        self
    }

    #[inline]
    pub fn packet_id(&self) -> Option<PacketId> {
        self.packet_id
    }

    pub fn set_packet_id(&mut self, packet_id: Option<PacketId>) -> &mut Self {
        self.packet_id = packet_id;
        self
    }

    #[inline]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }
}

/// Response to a QoS 1 PUBLISH packet.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PublishAckPacket {
    packet_id: PacketId,
}

impl PublishAckPacket {
    pub fn new(packet_id: PacketId) -> Self {
        Self { packet_id }
    }

    #[inline]
    pub fn packet_id(&self) -> PacketId {
        self.packet_id
    }
}

/// First response of the QoS 2 handshake.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PublishReceivedPacket {
    packet_id: PacketId,
}

impl PublishReceivedPacket {
    pub fn new(packet_id: PacketId) -> Self {
        Self { packet_id }
    }

    #[inline]
    pub fn packet_id(&self) -> PacketId {
        self.packet_id
    }
}

/// Second step of the QoS 2 handshake, answered with PublishComplete.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PublishReleasePacket {
    packet_id: PacketId,
}

impl PublishReleasePacket {
    pub fn new(packet_id: PacketId) -> Self {
        Self { packet_id }
    }

    #[inline]
    pub fn packet_id(&self) -> PacketId {
        self.packet_id
    }
}

/// Final packet of the QoS 2 handshake.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PublishCompletePacket {
    packet_id: PacketId,
}

impl PublishCompletePacket {
    pub fn new(packet_id: PacketId) -> Self {
        Self { packet_id }
    }

    #[inline]
    pub fn packet_id(&self) -> PacketId {
        self.packet_id
    }
}

/// Topic filter / QoS pair in a SUBSCRIBE packet.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SubscribeTopic {
    topic: String,
    qos: QoS,
}

impl SubscribeTopic {
    pub fn new(topic: &str, qos: QoS) -> Self {
        Self {
            topic: topic.to_owned(),
            qos,
        }
    }

    #[inline]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    #[inline]
    pub fn qos(&self) -> QoS {
        self.qos
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SubscribePacket {
    packet_id: PacketId,
    topics: Vec<SubscribeTopic>,
}

impl SubscribePacket {
    pub fn new(packet_id: PacketId, topics: Vec<SubscribeTopic>) -> Self {
        Self { packet_id, topics }
    }

    #[inline]
    pub fn packet_id(&self) -> PacketId {
        self.packet_id
    }

    #[inline]
    pub fn topics(&self) -> &[SubscribeTopic] {
        &self.topics
    }
}

/// Per-filter result in a SUBACK packet.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SubscribeAck {
    /// Maximum QoS granted for the filter.
    QoS(QoS),

    /// Subscription rejected, return code 0x80.
    Failed,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SubscribeAckPacket {
    packet_id: PacketId,
    acknowledgements: Vec<SubscribeAck>,
}

impl SubscribeAckPacket {
    pub fn new(packet_id: PacketId, ack: SubscribeAck) -> Self {
        Self {
            packet_id,
            acknowledgements: vec![ack],
        }
    }

    pub fn with_vec(packet_id: PacketId, acknowledgements: Vec<SubscribeAck>) -> Self {
        Self {
            packet_id,
            acknowledgements,
        }
    }

    #[inline]
    pub fn packet_id(&self) -> PacketId {
        self.packet_id
    }

    #[inline]
    pub fn acknowledgements(&self) -> &[SubscribeAck] {
        &self.acknowledgements
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct UnsubscribePacket {
    packet_id: PacketId,
    topics: Vec<String>,
}

impl UnsubscribePacket {
    pub fn new(packet_id: PacketId, topics: Vec<String>) -> Self {
        Self { packet_id, topics }
    }

    #[inline]
    pub fn packet_id(&self) -> PacketId {
        self.packet_id
    }

    #[inline]
    pub fn topics(&self) -> &[String] {
        &self.topics
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct UnsubscribeAckPacket {
    packet_id: PacketId,
}

impl UnsubscribeAckPacket {
    pub fn new(packet_id: PacketId) -> Self {
        Self { packet_id }
    }

    #[inline]
    pub fn packet_id(&self) -> PacketId {
        self.packet_id
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PingRequestPacket {}

impl PingRequestPacket {
    pub fn new() -> Self {
        Self {}
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PingResponsePacket {}

impl PingResponsePacket {
    pub fn new() -> Self {
        Self {}
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct DisconnectPacket {}

impl DisconnectPacket {
    pub fn new() -> Self {
        Self {}
    }
}

/// A decoded MQTT control packet, as produced and consumed by the channel
/// adapter.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Packet {
    Connect(ConnectPacket),
    Publish(PublishPacket),
    PublishAck(PublishAckPacket),
    PublishReceived(PublishReceivedPacket),
    PublishRelease(PublishReleasePacket),
    PublishComplete(PublishCompletePacket),
    Subscribe(SubscribePacket),
    SubscribeAck(SubscribeAckPacket),
    Unsubscribe(UnsubscribePacket),
    UnsubscribeAck(UnsubscribeAckPacket),
    PingRequest(PingRequestPacket),
    PingResponse(PingResponsePacket),
    Disconnect(DisconnectPacket),
}

impl Packet {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Self::Connect(_) => PacketType::Connect,
            Self::Publish(_) => PacketType::Publish,
            Self::PublishAck(_) => PacketType::PublishAck,
            Self::PublishReceived(_) => PacketType::PublishReceived,
            Self::PublishRelease(_) => PacketType::PublishRelease,
            Self::PublishComplete(_) => PacketType::PublishComplete,
            Self::Subscribe(_) => PacketType::Subscribe,
            Self::SubscribeAck(_) => PacketType::SubscribeAck,
            Self::Unsubscribe(_) => PacketType::Unsubscribe,
            Self::UnsubscribeAck(_) => PacketType::UnsubscribeAck,
            Self::PingRequest(_) => PacketType::PingRequest,
            Self::PingResponse(_) => PacketType::PingResponse,
            Self::Disconnect(_) => PacketType::Disconnect,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_message_round_trip() {
        let mut message = ApplicationMessage::new("sensors/a", QoS::AtLeastOnce, Bytes::from("42"));
        message.set_retain(true);

        let packet = PublishPacket::from_message(&message, Some(17));
        assert_eq!(packet.topic(), "sensors/a");
        assert_eq!(packet.qos(), QoS::AtLeastOnce);
        assert_eq!(packet.packet_id(), Some(17));
        assert!(packet.retain());
        assert!(!packet.dup());

        assert_eq!(packet.to_message(), message);
    }
}
