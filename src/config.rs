// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

use serde::Deserialize;
use std::fmt;
use std::sync::Arc;

use crate::packet::ApplicationMessage;
use crate::types::QoS;

/// What to do with a new publish packet when the pending queue is full.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum OverflowStrategy {
    /// The incoming packet is silently discarded.
    #[default]
    DropNewMessage,

    /// The head of the queue is discarded to make room for the new packet.
    DropOldestQueuedMessage,
}

/// Context passed to the client message queue interceptor before an
/// application message is turned into a pending publish packet.
#[derive(Debug)]
pub struct MessageQueueContext<'a> {
    /// Client id of the publishing session, `None` for broker-originated
    /// messages such as retained replays.
    pub sender_client_id: Option<&'a str>,

    /// Client id of the session about to enqueue.
    pub receiver_client_id: &'a str,

    /// The outgoing message. The interceptor may mutate it in place, or
    /// set it to `None` to drop it.
    pub application_message: Option<ApplicationMessage>,

    /// Cleared by the interceptor to drop the message.
    pub accept_enqueue: bool,
}

/// One topic filter of a SUBSCRIBE request, as seen by the subscription
/// interceptor. The hook may lower `qos`, clear `accept`, or demand that
/// the whole connection be closed.
#[derive(Debug)]
pub struct SubscriptionRequest<'a> {
    pub client_id: &'a str,
    pub topic: String,
    pub qos: QoS,
    pub accept: bool,
    pub close_connection: bool,
}

pub type ClientMessageQueueInterceptor = dyn Fn(&mut MessageQueueContext<'_>) + Send + Sync;
pub type SubscriptionInterceptor = dyn Fn(&mut SubscriptionRequest<'_>) + Send + Sync;

/// Per-session tunables. The plain-data part deserializes from the broker
/// config file; interceptors are installed programmatically.
#[derive(Clone, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_max_pending_messages")]
    max_pending_messages: usize,

    #[serde(default)]
    overflow_strategy: OverflowStrategy,

    #[serde(skip)]
    client_message_queue_interceptor: Option<Arc<ClientMessageQueueInterceptor>>,

    #[serde(skip)]
    subscription_interceptor: Option<Arc<SubscriptionInterceptor>>,
}

const fn default_max_pending_messages() -> usize {
    1000
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_pending_messages: default_max_pending_messages(),
            overflow_strategy: OverflowStrategy::default(),
            client_message_queue_interceptor: None,
            subscription_interceptor: None,
        }
    }
}

impl SessionConfig {
    pub fn new(max_pending_messages: usize, overflow_strategy: OverflowStrategy) -> Self {
        Self {
            max_pending_messages,
            overflow_strategy,
            client_message_queue_interceptor: None,
            subscription_interceptor: None,
        }
    }

    #[inline]
    pub fn max_pending_messages(&self) -> usize {
        self.max_pending_messages
    }

    #[inline]
    pub fn overflow_strategy(&self) -> OverflowStrategy {
        self.overflow_strategy
    }

    pub fn set_client_message_queue_interceptor(
        &mut self,
        interceptor: impl Fn(&mut MessageQueueContext<'_>) + Send + Sync + 'static,
    ) -> &mut Self {
        self.client_message_queue_interceptor = Some(Arc::new(interceptor));
        self
    }

    #[inline]
    pub fn client_message_queue_interceptor(&self) -> Option<&ClientMessageQueueInterceptor> {
        self.client_message_queue_interceptor.as_deref()
    }

    pub fn set_subscription_interceptor(
        &mut self,
        interceptor: impl Fn(&mut SubscriptionRequest<'_>) + Send + Sync + 'static,
    ) -> &mut Self {
        self.subscription_interceptor = Some(Arc::new(interceptor));
        self
    }

    #[inline]
    pub fn subscription_interceptor(&self) -> Option<&SubscriptionInterceptor> {
        self.subscription_interceptor.as_deref()
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("max_pending_messages", &self.max_pending_messages)
            .field("overflow_strategy", &self.overflow_strategy)
            .field(
                "client_message_queue_interceptor",
                &self.client_message_queue_interceptor.is_some(),
            )
            .field(
                "subscription_interceptor",
                &self.subscription_interceptor.is_some(),
            )
            .finish()
    }
}
