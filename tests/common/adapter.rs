// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

use mqtt_session::adapter::ChannelAdapter;
use mqtt_session::error::Error;
use mqtt_session::packet::Packet;
use mqtt_session::session::ReadActivity;
use mqtt_session::types::ProtocolLevel;

type InboundItem = Result<Option<Packet>, Error>;

/// Control handle for the inbound side of a [`MockAdapter`].
///
/// Dropping the script closes the stream, like a peer going away.
pub struct Script {
    tx: mpsc::UnboundedSender<InboundItem>,
}

impl Script {
    /// The client "sends" this packet.
    pub fn feed(&self, packet: Packet) {
        self.tx.send(Ok(Some(packet))).expect("adapter is gone");
    }

    /// The next read fails with `error`.
    pub fn fail(&self, error: Error) {
        self.tx.send(Err(error)).expect("adapter is gone");
    }

    /// The peer closes the connection without an error.
    pub fn close(&self) {
        self.tx.send(Ok(None)).expect("adapter is gone");
    }
}

/// In-memory channel adapter: scripted inbound packets, recorded outbound
/// packets, stallable writes and injectable write failures.
pub struct MockAdapter {
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<InboundItem>>,
    sent: Mutex<Vec<Packet>>,
    sent_signal: Notify,
    stalled: AtomicBool,
    resume_signal: Notify,
    send_failures: Mutex<VecDeque<Error>>,
    activity: Mutex<Option<ReadActivity>>,
}

impl MockAdapter {
    pub fn new() -> (Arc<Self>, Script) {
        let (tx, rx) = mpsc::unbounded_channel();
        let adapter = Arc::new(Self {
            inbound: tokio::sync::Mutex::new(rx),
            sent: Mutex::new(Vec::new()),
            sent_signal: Notify::new(),
            stalled: AtomicBool::new(false),
            resume_signal: Notify::new(),
            send_failures: Mutex::new(VecDeque::new()),
            activity: Mutex::new(None),
        });
        (adapter, Script { tx })
    }

    /// Packets written so far, in send order.
    pub fn sent(&self) -> Vec<Packet> {
        self.sent.lock().unwrap().clone()
    }

    /// Wait until at least `count` packets were sent, then return them all.
    pub async fn wait_for_sent(&self, count: usize) -> Vec<Packet> {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let notified = self.sent_signal.notified();
                if self.sent.lock().unwrap().len() >= count {
                    return;
                }
                notified.await;
            }
        })
        .await
        .expect("timed out waiting for sent packets");
        self.sent()
    }

    /// Block writes until `resume` is called.
    pub fn stall(&self) {
        self.stalled.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.stalled.store(false, Ordering::SeqCst);
        self.resume_signal.notify_waiters();
    }

    /// The next send attempt fails with `error`.
    pub fn fail_next_send(&self, error: Error) {
        self.send_failures.lock().unwrap().push_back(error);
    }
}

#[async_trait]
impl ChannelAdapter for MockAdapter {
    fn endpoint(&self) -> String {
        "127.0.0.1:1883".to_string()
    }

    fn protocol_level(&self) -> ProtocolLevel {
        ProtocolLevel::V311
    }

    fn bind_read_activity(&self, activity: ReadActivity) {
        *self.activity.lock().unwrap() = Some(activity);
    }

    fn unbind_read_activity(&self) {
        *self.activity.lock().unwrap() = None;
    }

    async fn receive_packet(&self) -> Result<Option<Packet>, Error> {
        let mut inbound = self.inbound.lock().await;
        let item = match inbound.recv().await {
            Some(item) => item,
            // Script dropped: peer went away without an error.
            None => Ok(None),
        };
        let activity = self.activity.lock().unwrap().clone();
        if let Some(activity) = activity {
            activity.read_started();
            activity.read_completed();
        }
        item
    }

    async fn send_packet(&self, packet: &Packet) -> Result<(), Error> {
        loop {
            let notified = self.resume_signal.notified();
            if !self.stalled.load(Ordering::SeqCst) {
                break;
            }
            notified.await;
        }
        if let Some(error) = self.send_failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        self.sent.lock().unwrap().push(packet.clone());
        self.sent_signal.notify_waiters();
        Ok(())
    }
}
