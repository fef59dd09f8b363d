use super::Broker;
use super::engine::Publisher;
use super::topic::{Topic, filter_matches};
use crate::broker::message::Message;
use crate::client::Client;
use crate::persistence::Persistence;
use tokio::sync::mpsc;
use tungstenite::protocol::Message as WsMessage;

fn received(rx: &mut mpsc::UnboundedReceiver<WsMessage>) -> Message {
    match rx.try_recv().expect("expected a message") {
        WsMessage::Text(text) => serde_json::from_str(&text).unwrap(),
        other => panic!("Expected a text message, got {other:?}"),
    }
}

fn register(broker: &mut Broker) -> (String, mpsc::UnboundedReceiver<WsMessage>) {
    let (tx, rx) = mpsc::unbounded_channel::<WsMessage>();
    let client = Client::new(tx);
    let id = client.id.clone();
    broker.register_client(client);
    (id, rx)
}

#[test]
fn test_topic_subscribe_and_unsubscribe() {
    let mut topic = Topic::new("test_topic");
    topic.subscribe("client1".to_string());
    assert!(topic.subscribers.contains("client1"));
    topic.unsubscribe(&"client1".to_string());
    assert!(topic.subscribers.is_empty());
}

#[test]
fn test_filter_matching() {
    assert!(filter_matches("signpost/#", "signpost/c098e5120000/radio/led"));
    assert!(filter_matches("signpost/#", "signpost"));
    assert!(!filter_matches("signpost/#", "signpost-preproc/lab11/gps"));
    assert!(filter_matches("application/5/node/+/rx", "application/5/node/00aa/rx"));
    assert!(!filter_matches("application/5/node/+/rx", "application/5/node/00aa/tx"));
    assert!(!filter_matches("application/5/node/+/rx", "application/5/node/rx"));
    assert!(filter_matches("#", "anything/at/all"));
    assert!(filter_matches("a/b", "a/b"));
    assert!(!filter_matches("a/b", "a/b/c"));
    assert!(Topic::new("a/+/c").is_wildcard());
    assert!(!Topic::new("a/b/c").is_wildcard());
}

#[test]
fn test_broker_register_and_remove_client() {
    let mut broker = Broker::default();
    let (client_id, _rx) = register(&mut broker);
    assert_eq!(broker.client_count(), 1);

    broker.remove_client(&client_id);
    assert!(!broker.clients.contains_key(&client_id));
}

#[test]
fn test_broker_publish_to_exact_topic() {
    let mut broker = Broker::default();
    let (client_id, mut rx) = register(&mut broker);
    broker.subscribe("test_topic", client_id);

    broker.publish(Message::now("test_topic", "hello"));

    let msg = received(&mut rx);
    assert_eq!(msg.topic, "test_topic");
    assert_eq!(msg.payload, "hello");
}

#[test]
fn test_broker_publish_through_wildcard_delivers_once() {
    let mut broker = Broker::default();
    let (client_id, mut rx) = register(&mut broker);
    broker.subscribe("signpost/#", client_id.clone());
    broker.subscribe("signpost/+/radio", client_id);

    broker.publish(Message::now("signpost/c098e5120000/radio", "{}"));

    assert_eq!(received(&mut rx).topic, "signpost/c098e5120000/radio");
    assert!(rx.try_recv().is_err());
}

#[test]
fn test_unsubscribe_stops_delivery() {
    let mut broker = Broker::default();
    let (client_id, mut rx) = register(&mut broker);
    broker.subscribe("t", client_id.clone());
    broker.unsubscribe("t", &client_id);

    broker.publish(Message::now("t", "x"));
    assert!(rx.try_recv().is_err());
}

#[test]
fn test_publisher_trait_on_shared_broker() {
    let mut broker = Broker::default();
    let (client_id, mut rx) = register(&mut broker);
    broker.subscribe("t", client_id);
    let mut shared = broker.into_shared();

    Publisher::publish(&mut shared, "t", "payload".to_string());

    assert_eq!(received(&mut rx).payload, "payload");
}

#[test]
fn test_subscribe_replays_retained_messages() {
    let persistence = Persistence::temporary(None, None).unwrap();
    let mut broker = Broker::new_with_persistence(persistence);
    broker.publish(Message::now("signpost-preproc/lab11/gps", "first"));
    broker.publish(Message::now("signpost-preproc/lab11/gps", "second"));

    let (client_id, mut rx) = register(&mut broker);
    broker.subscribe("signpost-preproc/lab11/gps", client_id);

    assert_eq!(received(&mut rx).payload, "first");
    assert_eq!(received(&mut rx).payload, "second");
    assert!(rx.try_recv().is_err());
}

#[test]
fn test_broker_cleanup_client() {
    let mut broker = Broker::default();
    let (client_id, _rx) = register(&mut broker);
    let (other_id, _other_rx) = register(&mut broker);
    broker.subscribe("test_topic", client_id.clone());
    broker.subscribe("test_topic", other_id.clone());
    broker.subscribe("lonely", client_id.clone());

    broker.cleanup_client(&client_id);

    assert!(!broker.clients.contains_key(&client_id));
    let topic = broker.topics.get("test_topic").unwrap();
    assert!(!topic.subscribers.contains(&client_id));
    assert!(topic.subscribers.contains(&other_id));
    assert!(!broker.topics.contains_key("lonely"));
}

#[test]
fn test_publish_to_nonexistent_topic() {
    let mut broker = Broker::default();
    broker.publish(Message::now("nonexistent_topic", "hello"));
    // No assertion, just checking for no panics.
}

#[test]
fn test_publish_to_client_with_closed_channel() {
    let mut broker = Broker::default();
    let (client_id, rx) = register(&mut broker);
    broker.subscribe("test_topic", client_id);
    drop(rx);

    broker.publish(Message::now("test_topic", "hello"));
    // No assertion, the failed send is logged and skipped.
}
