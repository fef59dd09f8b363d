//! WebSocket transport
//!
//! Gives external programs access to the bus. Responsibilities:
//! - Accept TCP/WebSocket connections, up to the configured maximum
//! - Create a `Client` for each connection and register it with the `Broker`
//! - Translate protocol JSON messages into broker operations
//! - Remove the client and its subscriptions when the connection ends

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::spawn;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tracing::{debug, error, info, warn};
use tungstenite::protocol::Message as WsMessage;

use crate::broker::{Message, SharedBroker, lock};
use crate::client::Client;
use crate::transport::message::ClientMessage;

/// Accept connections on `listener` until it fails.
pub async fn serve(listener: TcpListener, broker: SharedBroker, max_connections: usize) {
    match listener.local_addr() {
        Ok(addr) => info!("WebSocket server listening on ws://{}", addr),
        Err(e) => warn!("WebSocket server listening on unknown address: {}", e),
    }

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!("Failed to accept connection: {}", e);
                break;
            }
        };

        if lock(&broker).client_count() >= max_connections {
            warn!("Rejecting {}: {} connections open", peer, max_connections);
            drop(stream);
            continue;
        }

        spawn(handle_connection(stream, broker.clone()));
    }
}

async fn handle_connection(stream: TcpStream, broker: SharedBroker) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake error: {}", e);
            return;
        }
    };
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();
    let client = Client::new(tx);
    let client_id = client.id.clone();
    lock(&broker).register_client(client);
    info!("{} connected", client_id);

    let cleanup_called = Arc::new(AtomicBool::new(false));
    let do_cleanup = {
        let broker = broker.clone();
        let client_id = client_id.clone();
        let cleanup_called = cleanup_called.clone();

        move || {
            if !cleanup_called.swap(true, Ordering::SeqCst) {
                lock(&broker).cleanup_client(&client_id);
            }
        }
    };

    {
        let client_id = client_id.clone();
        let do_cleanup = do_cleanup.clone();

        spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let Err(e) = ws_sender.send(msg).await {
                    warn!("Failed to send message to {}: {}", client_id, e);
                    break;
                }
            }

            do_cleanup();
            debug!("Send loop closed for {}", client_id);
        });
    }

    while let Some(Ok(msg)) = ws_receiver.next().await {
        if !msg.is_text() {
            continue;
        }
        match msg.to_text() {
            Ok(text) => handle_text(&broker, &client_id, text),
            Err(e) => warn!("Unreadable frame from {}: {}", client_id, e),
        }
    }

    info!("{} disconnected", client_id);
    do_cleanup();
}

/// Apply one protocol message from `client_id` to the broker.
pub fn handle_text(broker: &SharedBroker, client_id: &str, text: &str) {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::Subscribe { topic }) => {
            lock(broker).subscribe(&topic, client_id.to_string());
            info!("{} subscribed to {}", client_id, topic);
        }
        Ok(ClientMessage::Unsubscribe { topic }) => {
            lock(broker).unsubscribe(&topic, &client_id.to_string());
            info!("{} unsubscribed from {}", client_id, topic);
        }
        Ok(ClientMessage::Publish { topic, payload }) => {
            debug!("{} published to {}", client_id, topic);
            lock(broker).publish(Message::now(topic, payload));
        }
        Err(err) => {
            warn!(
                "Invalid client message from {}: {} | {}",
                client_id,
                err,
                text.chars().take(100).collect::<String>()
            );
        }
    }
}
