// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! The channel adapter seam between a session and its transport.

use async_trait::async_trait;

use crate::error::Error;
use crate::packet::Packet;
use crate::session::ReadActivity;
use crate::types::ProtocolLevel;

/// A framed duplex pipe to one connected client.
///
/// Implementations own the socket, TLS and the wire codec; the session
/// engine only ever sees decoded [`Packet`] values. Each `ChannelAdapter`
/// represents exactly one connection.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Remote endpoint of this connection, e.g. `127.0.0.1:52114`.
    fn endpoint(&self) -> String;

    /// Protocol version negotiated during CONNECT.
    fn protocol_level(&self) -> ProtocolLevel;

    /// Install the read-activity handle of the session's keep alive
    /// monitor. Implementations call [`ReadActivity::read_started`] when
    /// the first byte of a packet arrives and
    /// [`ReadActivity::read_completed`] once the packet is fully decoded,
    /// so a slow in-flight read is not mistaken for a dead peer.
    fn bind_read_activity(&self, activity: ReadActivity);

    /// Drop the handle installed by `bind_read_activity`.
    fn unbind_read_activity(&self);

    /// Wait for the next packet from the client.
    ///
    /// Returns `Ok(None)` when the peer closed the connection without an
    /// error.
    ///
    /// # Errors
    ///
    /// `IoError` or `TimedOut` on communication failures, `Cancelled`
    /// when the adapter itself is shutting down.
    async fn receive_packet(&self) -> Result<Option<Packet>, Error>;

    /// Send one packet to the client.
    ///
    /// The session issues concurrent sends (acknowledgements from the
    /// receive loop, publishes from the sender task); implementations
    /// must serialize writes internally.
    ///
    /// # Errors
    ///
    /// Same taxonomy as [`ChannelAdapter::receive_packet`].
    async fn send_packet(&self, packet: &Packet) -> Result<(), Error>;
}
