// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Keep alive bookkeeping for one session.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use crate::packet::PacketType;

#[derive(Debug, Default)]
struct MonitorState {
    /// Set while the adapter is in the middle of reading a packet.
    /// A slow multi-frame read means the peer is alive, so deadline
    /// enforcement is suspended until the read completes.
    reading: AtomicBool,

    /// When the most recent packet of any kind arrived.
    last_packet_received: Mutex<Option<Instant>>,

    /// Same, but ignoring PINGREQ. Surfaced for diagnostics.
    last_non_keepalive_packet_received: Mutex<Option<Instant>>,
}

/// Tracks inter-packet idle time of a connection.
///
/// The monitor itself is passive; the session runs the timer task and
/// asks [`KeepAliveMonitor::timed_out`] on every tick.
#[derive(Debug, Default)]
pub struct KeepAliveMonitor {
    state: Arc<MonitorState>,
}

/// Cloneable pause/resume handle, bound to the channel adapter so it can
/// bracket each packet read.
#[derive(Clone, Debug)]
pub struct ReadActivity {
    state: Arc<MonitorState>,
}

impl ReadActivity {
    /// The adapter started reading a packet; suspend the deadline.
    pub fn read_started(&self) {
        self.state.reading.store(true, Ordering::SeqCst);
    }

    /// The packet is fully read; enforce the deadline again.
    pub fn read_completed(&self) {
        self.state.reading.store(false, Ordering::SeqCst);
    }
}

impl KeepAliveMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for the adapter side of the pause/resume contract.
    pub fn activity(&self) -> ReadActivity {
        ReadActivity {
            state: Arc::clone(&self.state),
        }
    }

    /// Stamp both timestamps, called when a run starts so a mute client
    /// still hits the deadline.
    pub fn reset(&self) {
        let now = Instant::now();
        *self.state.last_packet_received.lock().unwrap() = Some(now);
        *self
            .state
            .last_non_keepalive_packet_received
            .lock()
            .unwrap() = Some(now);
    }

    /// Record an inbound packet of the given type.
    pub fn packet_received(&self, packet_type: PacketType) {
        let now = Instant::now();
        *self.state.last_packet_received.lock().unwrap() = Some(now);
        if packet_type != PacketType::PingRequest {
            *self
                .state
                .last_non_keepalive_packet_received
                .lock()
                .unwrap() = Some(now);
        }
    }

    pub fn last_packet_received(&self) -> Option<Instant> {
        *self.state.last_packet_received.lock().unwrap()
    }

    pub fn last_non_keepalive_packet_received(&self) -> Option<Instant> {
        *self.state.last_non_keepalive_packet_received.lock().unwrap()
    }

    /// Whether the connection has been silent longer than `timeout`.
    ///
    /// Always false while a packet read is in progress.
    pub fn timed_out(&self, timeout: Duration) -> bool {
        if self.state.reading.load(Ordering::SeqCst) {
            return false;
        }
        self.last_packet_received()
            .is_some_and(|instant| instant.elapsed() > timeout)
    }
}
