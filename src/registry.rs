// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! The broker-wide collaborators a session publishes into.

use async_trait::async_trait;

use crate::packet::ApplicationMessage;
use crate::topic::TopicFilter;

/// The broker's session registry and message router.
///
/// A session hands every accepted application message to the registry,
/// which stores it when retained and dispatches it to each matching
/// session (the sender's own subscriptions included) by calling that
/// session's `enqueue_application_message`.
#[async_trait]
pub trait SessionsRegistry: Send + Sync {
    /// Fan a message out to all subscribed sessions.
    ///
    /// `sender_client_id` is `None` for broker-originated messages.
    /// The will message of an uncleanly terminated session travels
    /// through this same path.
    async fn enqueue_application_message(
        &self,
        sender_client_id: Option<&str>,
        message: ApplicationMessage,
    );

    /// Retained messages whose topic matches any of `filters`.
    async fn retained_messages(&self, filters: &[TopicFilter]) -> Vec<ApplicationMessage>;
}
