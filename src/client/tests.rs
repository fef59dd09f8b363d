use super::pubsub_client::Client;
use tokio::sync::mpsc;
use tungstenite::protocol::Message as WsMessage;

#[test]
fn test_client_new_has_unique_id() {
    let (tx, _) = mpsc::unbounded_channel::<WsMessage>();
    let a = Client::new(tx.clone());
    let b = Client::new(tx);
    assert!(a.id.starts_with("client-"));
    assert_ne!(a.id, b.id);
}

#[test]
fn test_client_with_id() {
    let (tx, _) = mpsc::unbounded_channel::<WsMessage>();
    let client = Client::with_id("gateway-core", tx);
    assert_eq!(client.id, "gateway-core");
}
