use chrono::Utc;
use serde::{Deserialize, Serialize};
use sled::{Db, Tree};
use tracing::warn;

use crate::broker::message::Message;
use crate::utils::Result;

/// A bus message kept for replay.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub topic: String,
    pub payload: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl From<StoredMessage> for Message {
    fn from(stored: StoredMessage) -> Self {
        Message {
            topic: stored.topic,
            payload: stored.payload,
            timestamp: stored.timestamp,
        }
    }
}

/// Recently published bus messages, one sled tree per topic.
///
/// Keys are `timestamp (i64 BE) ++ id (u64 BE)` so a tree iterates oldest
/// first and two messages in the same millisecond never collide.
#[derive(Clone)]
pub struct Persistence {
    db: Db,
    ttl_millis: Option<i64>,
    max_messages_per_topic: Option<usize>,
}

impl Persistence {
    pub fn open(
        path: &str,
        ttl_seconds: Option<i64>,
        max_messages_per_topic: Option<usize>,
    ) -> Result<Self> {
        let db = sled::open(path)?;
        Ok(Self::with_db(db, ttl_seconds, max_messages_per_topic))
    }

    /// A store that lives in memory and is dropped with the process.
    pub fn temporary(ttl_seconds: Option<i64>, max_messages_per_topic: Option<usize>) -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self::with_db(db, ttl_seconds, max_messages_per_topic))
    }

    fn with_db(db: Db, ttl_seconds: Option<i64>, max_messages_per_topic: Option<usize>) -> Self {
        Self {
            db,
            ttl_millis: ttl_seconds.map(|s| s.saturating_mul(1000)),
            max_messages_per_topic,
        }
    }

    pub fn store_message(&self, msg: &Message) -> Result<()> {
        let stored = StoredMessage {
            topic: msg.topic.clone(),
            payload: msg.payload.clone(),
            timestamp: msg.timestamp,
        };
        let serialized = serde_json::to_vec(&stored)?;

        let tree = self.db.open_tree(&msg.topic)?;
        let mut key = Vec::with_capacity(16);
        key.extend_from_slice(&stored.timestamp.to_be_bytes());
        key.extend_from_slice(&self.db.generate_id()?.to_be_bytes());
        tree.insert(key, serialized)?;

        if let Some(max) = self.max_messages_per_topic {
            while tree.len() > max {
                if tree.pop_min()?.is_none() {
                    break;
                }
            }
        }
        Ok(())
    }

    /// Messages of `topic` that are still within the TTL, oldest first.
    pub fn load_messages(&self, topic: &str) -> Result<Vec<StoredMessage>> {
        let tree = self.db.open_tree(topic)?;
        self.cleanup_old_messages(&tree)?;

        let mut messages = Vec::new();
        for entry in tree.iter() {
            let (_, value) = entry?;
            match serde_json::from_slice(&value) {
                Ok(msg) => messages.push(msg),
                Err(e) => warn!("Skipping unreadable stored message on {}: {}", topic, e),
            }
        }
        Ok(messages)
    }

    fn cleanup_old_messages(&self, tree: &Tree) -> Result<()> {
        let Some(ttl) = self.ttl_millis else {
            return Ok(());
        };
        let expiry = Utc::now().timestamp_millis() - ttl;

        let old_keys: Vec<_> = tree
            .range(..expiry.to_be_bytes().to_vec())
            .keys()
            .collect::<std::result::Result<_, _>>()?;
        for key in old_keys {
            tree.remove(key)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Persistence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Persistence")
            .field("db", &"sled::Db")
            .field("ttl_millis", &self.ttl_millis)
            .field("max_messages_per_topic", &self.max_messages_per_topic)
            .finish()
    }
}
