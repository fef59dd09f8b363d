use std::collections::HashSet;

pub type SubscriberId = String;

/// A subscription filter and the subscribers registered on it.
///
/// The name is either a plain topic or an MQTT-style filter: `+` matches
/// exactly one level and a trailing `#` matches any number of remaining
/// levels, including none.
#[derive(Debug, Default)]
pub struct Topic {
    pub name: String,
    pub subscribers: HashSet<SubscriberId>,
}

impl Topic {
    /// Creates a new instance of the Topic with the given name
    /// Initializes an empty set of subscribers
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            subscribers: HashSet::new(),
        }
    }

    /// Adds the subscriber's ID to the set of subscribers.
    /// If the subscriber is already subscribed, it has no effect.
    pub fn subscribe(&mut self, id: SubscriberId) {
        self.subscribers.insert(id);
    }

    pub fn unsubscribe(&mut self, id: &SubscriberId) {
        self.subscribers.remove(id);
    }

    /// Whether a message published on `topic` reaches this subscription.
    pub fn matches(&self, topic: &str) -> bool {
        filter_matches(&self.name, topic)
    }

    pub fn is_wildcard(&self) -> bool {
        is_wildcard(&self.name)
    }
}

pub fn is_wildcard(filter: &str) -> bool {
    filter.split('/').any(|level| level == "+" || level == "#")
}

pub fn filter_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return filter_levels.next().is_none(),
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
