// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Bounded queue of outbound publish packets, and the task that drains it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use super::Session;
use crate::adapter::ChannelAdapter;
use crate::config::OverflowStrategy;
use crate::error::ErrorKind;
use crate::packet::Packet;
use crate::types::{DisconnectType, QoS};

/// FIFO of packets awaiting transmission, bounded by
/// `max_pending_messages`.
///
/// Producers are the registry threads running fan-out; the single
/// consumer is the session's sender task. The lock is never held across
/// an await.
#[derive(Debug)]
pub struct PendingQueue {
    queue: Mutex<VecDeque<Packet>>,
    capacity: usize,
    strategy: OverflowStrategy,

    /// Edge-triggered wake signal for the sender task. `Notify` stores a
    /// single permit, so any number of enqueues while the sender is busy
    /// coalesce into one wake.
    signal: Notify,

    sent_packets: AtomicU64,
}

impl PendingQueue {
    pub fn new(capacity: usize, strategy: OverflowStrategy) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            capacity,
            strategy,
            signal: Notify::new(),
            sent_packets: AtomicU64::new(0),
        }
    }

    /// Append a packet, applying the overflow strategy when full.
    pub fn push(&self, packet: Packet) {
        {
            let mut queue = self.queue.lock().unwrap();
            if queue.len() >= self.capacity {
                match self.strategy {
                    OverflowStrategy::DropNewMessage => {
                        log::debug!("pending: queue full, dropping new packet");
                        return;
                    }
                    OverflowStrategy::DropOldestQueuedMessage => {
                        log::debug!("pending: queue full, dropping oldest packet");
                        queue.pop_front();
                    }
                }
            }
            queue.push_back(packet);
        }
        self.signal.notify_one();
    }

    pub fn pop(&self) -> Option<Packet> {
        self.queue.lock().unwrap().pop_front()
    }

    /// Wait until `push` signals a new packet.
    pub async fn wait(&self) {
        self.signal.notified().await;
    }

    pub fn len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().unwrap().is_empty()
    }

    /// Drop all queued packets, returning how many were dropped.
    pub fn clear(&self) -> usize {
        let mut queue = self.queue.lock().unwrap();
        let dropped = queue.len();
        queue.clear();
        dropped
    }

    pub fn sent_packets_count(&self) -> u64 {
        self.sent_packets.load(Ordering::Relaxed)
    }

    fn record_sent(&self) {
        self.sent_packets.fetch_add(1, Ordering::Relaxed);
    }
}

impl Session {
    /// Drain loop of the pending queue, one per connected session.
    ///
    /// A publish packet of QoS 1/2 whose send fails is re-enqueued at the
    /// tail with the dup flag set before the loop stops; it goes out when
    /// the queue is drained again on the next connection, preserving
    /// at-least-once delivery across transient I/O errors.
    pub(super) async fn sender_loop(
        &self,
        adapter: Arc<dyn ChannelAdapter>,
        shutdown: CancellationToken,
    ) {
        loop {
            let Some(packet) = self.pending.pop() else {
                tokio::select! {
                    biased;
                    () = shutdown.cancelled() => break,
                    () = self.pending.wait() => continue,
                }
            };

            let result = tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                result = adapter.send_packet(&packet) => result,
            };

            match result {
                Ok(()) => self.pending.record_sent(),
                Err(err) => {
                    if let Packet::Publish(mut publish) = packet {
                        if publish.qos() > QoS::AtMostOnce {
                            publish.set_dup(true);
                            self.pending.push(Packet::Publish(publish));
                        }
                    }

                    match err.kind() {
                        ErrorKind::Cancelled => (),
                        ErrorKind::TimedOut => {
                            log::warn!(
                                "pending: {}: send timed out, err: {err}",
                                self.client_id()
                            );
                        }
                        ErrorKind::IoError => {
                            log::warn!(
                                "pending: {}: failed to send packet, err: {err}",
                                self.client_id()
                            );
                        }
                        _ => {
                            log::error!(
                                "pending: {}: unexpected send error: {err}",
                                self.client_id()
                            );
                        }
                    }

                    if !err.is_cancelled() {
                        self.stop(DisconnectType::NotClean).await;
                    }
                    // The session is terminating either way; leave the
                    // re-enqueued packet in the queue instead of popping
                    // it again for a send that can no longer happen.
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::PingResponsePacket;

    fn packet(n: u16) -> Packet {
        Packet::PublishAck(crate::packet::PublishAckPacket::new(n))
    }

    #[test]
    fn test_fifo_order() {
        let queue = PendingQueue::new(4, OverflowStrategy::DropNewMessage);
        queue.push(packet(1));
        queue.push(packet(2));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop(), Some(packet(1)));
        assert_eq!(queue.pop(), Some(packet(2)));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_drop_new_when_full() {
        let queue = PendingQueue::new(2, OverflowStrategy::DropNewMessage);
        queue.push(packet(1));
        queue.push(packet(2));
        queue.push(packet(3));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop(), Some(packet(1)));
        assert_eq!(queue.pop(), Some(packet(2)));
    }

    #[test]
    fn test_drop_oldest_when_full() {
        let queue = PendingQueue::new(2, OverflowStrategy::DropOldestQueuedMessage);
        queue.push(packet(1));
        queue.push(packet(2));
        queue.push(packet(3));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop(), Some(packet(2)));
        assert_eq!(queue.pop(), Some(packet(3)));
    }

    #[test]
    fn test_clear() {
        let queue = PendingQueue::new(4, OverflowStrategy::DropNewMessage);
        queue.push(Packet::PingResponse(PingResponsePacket::new()));
        queue.push(Packet::PingResponse(PingResponsePacket::new()));
        assert_eq!(queue.clear(), 2);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_push_wakes_waiter() {
        let queue = PendingQueue::new(4, OverflowStrategy::DropNewMessage);
        let mut waiting = tokio_test::task::spawn(queue.wait());
        assert!(waiting.poll().is_pending());

        queue.push(packet(9));
        assert!(waiting.is_woken());
        assert!(waiting.poll().is_ready());
        assert_eq!(queue.pop(), Some(packet(9)));
    }

    #[test]
    fn test_wake_coalesces_multiple_enqueues() {
        let queue = PendingQueue::new(4, OverflowStrategy::DropNewMessage);
        queue.push(packet(1));
        queue.push(packet(2));

        // Both pushes fold into the single stored permit.
        let mut waiting = tokio_test::task::spawn(queue.wait());
        assert!(waiting.poll().is_ready());
        let mut waiting = tokio_test::task::spawn(queue.wait());
        assert!(waiting.poll().is_pending());
    }
}
