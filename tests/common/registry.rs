// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use mqtt_session::packet::ApplicationMessage;
use mqtt_session::registry::SessionsRegistry;
use mqtt_session::topic::TopicFilter;

/// Records every fanned-out message and serves seeded retained messages.
#[derive(Default)]
pub struct MockRegistry {
    messages: Mutex<Vec<(Option<String>, ApplicationMessage)>>,
    retained: Mutex<Vec<ApplicationMessage>>,
}

impl MockRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_retained(&self, message: ApplicationMessage) {
        self.retained.lock().unwrap().push(message);
    }

    /// Messages received through fan-out, with their sender client id.
    pub fn messages(&self) -> Vec<(Option<String>, ApplicationMessage)> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionsRegistry for MockRegistry {
    async fn enqueue_application_message(
        &self,
        sender_client_id: Option<&str>,
        message: ApplicationMessage,
    ) {
        self.messages
            .lock()
            .unwrap()
            .push((sender_client_id.map(str::to_string), message));
    }

    async fn retained_messages(&self, filters: &[TopicFilter]) -> Vec<ApplicationMessage> {
        self.retained
            .lock()
            .unwrap()
            .iter()
            .filter(|message| filters.iter().any(|filter| filter.is_match(message.topic())))
            .cloned()
            .collect()
    }
}
