use tokio::sync::mpsc::UnboundedSender;
use tungstenite::protocol::Message as WsMessage;
use uuid::Uuid;

/// A bus subscriber.
///
/// WebSocket connections and in-process consumers (the gateway core) look
/// the same to the broker: an `id` and a channel (`sender`) the broker
/// pushes serialized messages into.
#[derive(Debug)]
pub struct Client {
    /// Unique identifier for the client.
    pub id: String,

    /// Channel to push messages to the client.
    pub sender: UnboundedSender<WsMessage>,
}

impl Client {
    /// Create a client with a random `client-<uuid>` id.
    pub fn new(sender: UnboundedSender<WsMessage>) -> Self {
        Self::with_id(format!("client-{}", Uuid::new_v4()), sender)
    }

    pub fn with_id(id: impl Into<String>, sender: UnboundedSender<WsMessage>) -> Self {
        Self {
            id: id.into(),
            sender,
        }
    }
}
