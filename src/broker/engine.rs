//! Broker engine
//!
//! The in-memory bus the gateway publishes decoded uplink messages on and
//! reads downlink requests from. It is responsible for:
//! - managing subscriptions (plain topics and `+`/`#` filters)
//! - publishing messages to every matching subscriber, once each
//! - persisting published messages for replay via `Persistence`
//!
//! Publication is fire-and-forget: a subscriber whose channel is closed is
//! logged and skipped, nothing is retried.
//!
//! The API is synchronous and meant to be held behind `SharedBroker`.
//! Callers should not hold the lock across network I/O.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, warn};
use tungstenite::protocol::Message as WsMessage;

use crate::broker::message::Message;
use crate::broker::topic::{SubscriberId, Topic};
use crate::client::Client;
use crate::persistence::Persistence;

pub type SharedBroker = Arc<Mutex<Broker>>;

/// Anything the gateway can publish on.
pub trait Publisher {
    fn publish(&mut self, topic: &str, payload: String);
}

#[derive(Debug, Default)]
pub struct Broker {
    pub topics: HashMap<String, Topic>,
    pub clients: HashMap<SubscriberId, Client>,
    persistence: Option<Persistence>,
}

impl Broker {
    /// A broker without replay storage.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_with_persistence(persistence: Persistence) -> Self {
        Self {
            topics: HashMap::new(),
            clients: HashMap::new(),
            persistence: Some(persistence),
        }
    }

    pub fn into_shared(self) -> SharedBroker {
        Arc::new(Mutex::new(self))
    }

    pub fn register_client(&mut self, client: Client) {
        self.clients.insert(client.id.clone(), client);
    }

    pub fn remove_client(&mut self, client_id: &SubscriberId) {
        self.clients.remove(client_id);
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Subscribes a client to a topic or filter, creating it if needed.
    ///
    /// Subscribing to a plain topic replays the retained messages of that
    /// topic to the client.
    pub fn subscribe(&mut self, topic: &str, subscriber: SubscriberId) {
        let entry = self
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| Topic::new(topic));
        entry.subscribe(subscriber.clone());

        if entry.is_wildcard() {
            return;
        }
        let (Some(persistence), Some(client)) = (&self.persistence, self.clients.get(&subscriber))
        else {
            return;
        };

        match persistence.load_messages(topic) {
            Ok(stored) => {
                for msg in stored {
                    match serde_json::to_string(&Message::from(msg)) {
                        Ok(json) => {
                            let _ = client.sender.send(WsMessage::text(json));
                        }
                        Err(e) => warn!("Failed to serialize replayed message: {}", e),
                    }
                }
            }
            Err(e) => warn!("Failed to load retained messages for {}: {}", topic, e),
        }
    }

    /// Unsubscribes a client from a topic.
    /// If the topic does not exist, it will not perform any action
    pub fn unsubscribe(&mut self, topic: &str, subscriber: &SubscriberId) {
        if let Some(t) = self.topics.get_mut(topic) {
            t.unsubscribe(subscriber);
        }
    }

    /// Publishes a message to every subscriber with a matching subscription.
    pub fn publish(&mut self, msg: Message) {
        if let Some(persistence) = &self.persistence {
            if let Err(e) = persistence.store_message(&msg) {
                warn!("Failed to retain message on {}: {}", msg.topic, e);
            }
        }

        let recipients: HashSet<&SubscriberId> = self
            .topics
            .values()
            .filter(|t| t.matches(&msg.topic))
            .flat_map(|t| t.subscribers.iter())
            .collect();

        if recipients.is_empty() {
            debug!("No subscribers for '{}'", msg.topic);
            return;
        }

        let text = match serde_json::to_string(&msg) {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to serialize message: {}", e);
                return;
            }
        };
        let ws_msg = WsMessage::text(text);

        for sub_id in recipients {
            match self.clients.get(sub_id) {
                Some(client) => {
                    if let Err(e) = client.sender.send(ws_msg.clone()) {
                        warn!("Failed to send to {}: {}", sub_id, e);
                    }
                }
                None => warn!("No client registered with id: {}", sub_id),
            }
        }
    }

    /// Removes a client and its subscriptions.
    pub fn cleanup_client(&mut self, client_id: &SubscriberId) {
        self.remove_client(client_id);

        for topic in self.topics.values_mut() {
            topic.unsubscribe(client_id);
        }
        self.topics.retain(|_, t| !t.subscribers.is_empty());

        info!("Cleaned up client {}", client_id);
    }
}

impl Publisher for Broker {
    fn publish(&mut self, topic: &str, payload: String) {
        Broker::publish(self, Message::now(topic, payload));
    }
}

impl Publisher for SharedBroker {
    fn publish(&mut self, topic: &str, payload: String) {
        lock(self).publish(Message::now(topic, payload));
    }
}

/// Lock the broker, recovering the guard if a holder panicked.
pub fn lock(broker: &SharedBroker) -> MutexGuard<'_, Broker> {
    broker.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
