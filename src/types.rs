// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

use tokio::time::Instant;

use crate::error::{Error, ErrorKind};

/// Packet identifier of QoS 1/2 packets, drawn from `1..=65535`.
pub type PacketId = u16;

/// Quality of Service level of application messages.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum QoS {
    /// At most once delivery.
    #[default]
    AtMostOnce = 0,

    /// At least once delivery.
    AtLeastOnce = 1,

    /// Exactly once delivery.
    ExactOnce = 2,
}

impl TryFrom<u8> for QoS {
    type Error = Error;

    fn try_from(v: u8) -> Result<Self, Error> {
        match v {
            0 => Ok(Self::AtMostOnce),
            1 => Ok(Self::AtLeastOnce),
            2 => Ok(Self::ExactOnce),
            _ => Err(Error::from_string(
                ErrorKind::ProtocolViolation,
                format!("Invalid QoS value: {v}"),
            )),
        }
    }
}

/// MQTT protocol version negotiated on the connection.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum ProtocolLevel {
    V31 = 3,

    #[default]
    V311 = 4,
}

/// How a session run terminated.
///
/// `Clean` is set only by an orderly DISCONNECT packet from the client.
/// Everything else, keep-alive expiry included, is `NotClean` and triggers
/// delivery of the will message.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DisconnectType {
    Clean,
    NotClean,
}

/// Snapshot of a session, filled by `Session::fill_status()`.
#[derive(Clone, Debug, Default)]
pub struct SessionStatus {
    pub client_id: String,
    pub is_connected: bool,

    /// Remote endpoint, present while connected.
    pub endpoint: Option<String>,
    pub protocol_level: Option<ProtocolLevel>,

    pub pending_messages_count: usize,

    /// When the last packet of any kind arrived.
    pub last_packet_received: Option<Instant>,

    /// Same, but ignoring PINGREQ packets.
    pub last_non_keepalive_packet_received: Option<Instant>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qos_try_from() {
        assert_eq!(QoS::try_from(0).unwrap(), QoS::AtMostOnce);
        assert_eq!(QoS::try_from(1).unwrap(), QoS::AtLeastOnce);
        assert_eq!(QoS::try_from(2).unwrap(), QoS::ExactOnce);
        assert!(QoS::try_from(3).is_err());
    }
}
