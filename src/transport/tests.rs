use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde_json::json;
use tokio::sync::mpsc;
use tungstenite::protocol::Message as WsMessage;

use crate::broker::{Broker, Message, Publisher, SharedBroker, lock};
use crate::client::Client;
use crate::config::{HttpSettings, RadioSettings, Settings};
use crate::gateway::{AckReference, DownlinkSink, GatewayEvent, Receiver, Transmission};
use crate::transport::http::{self, IngressState, UploadParams};
use crate::transport::message::ClientMessage;
use crate::transport::radio::{RadioLink, RadioNetwork, RadioTxRequest, RadioUplink};
use crate::transport::websocket::handle_text;

fn register(broker: &SharedBroker) -> (String, mpsc::UnboundedReceiver<WsMessage>) {
    let (tx, rx) = mpsc::unbounded_channel::<WsMessage>();
    let client = Client::new(tx);
    let id = client.id.clone();
    lock(broker).register_client(client);
    (id, rx)
}

fn network() -> RadioNetwork {
    RadioNetwork::new(&RadioSettings {
        application_id: 5,
        f_port: 1,
    })
}

#[derive(Default)]
struct Recorder(Vec<(String, String)>);

impl Publisher for Recorder {
    fn publish(&mut self, topic: &str, payload: String) {
        self.0.push((topic.to_string(), payload));
    }
}

// ---- websocket protocol ----

#[test]
fn test_client_message_parsing() {
    let msg: ClientMessage =
        serde_json::from_str(r#"{"type":"subscribe","topic":"signpost-preproc/#"}"#).unwrap();
    assert_eq!(
        msg,
        ClientMessage::Subscribe {
            topic: "signpost-preproc/#".to_string()
        }
    );
    assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"login"}"#).is_err());
}

#[test]
fn test_handle_subscribe_and_unsubscribe() {
    let broker = Broker::new().into_shared();
    let (client_id, _rx) = register(&broker);

    let subscribe = json!({"type": "subscribe", "topic": "test_topic"}).to_string();
    handle_text(&broker, &client_id, &subscribe);
    assert!(
        lock(&broker).topics["test_topic"]
            .subscribers
            .contains(&client_id)
    );

    let unsubscribe = json!({"type": "unsubscribe", "topic": "test_topic"}).to_string();
    handle_text(&broker, &client_id, &unsubscribe);
    assert!(
        !lock(&broker).topics["test_topic"]
            .subscribers
            .contains(&client_id)
    );
}

#[test]
fn test_handle_publish_reaches_wildcard_subscriber() {
    let broker = Broker::new().into_shared();
    let (subscriber, mut rx) = register(&broker);
    lock(&broker).subscribe("signpost/+/radio/#", subscriber);

    let publish = json!({
        "type": "publish",
        "topic": "signpost/c098e5120000/radio/led",
        "payload": "{\"data\":\"AQ==\"}"
    })
    .to_string();
    handle_text(&broker, "publisher", &publish);

    match rx.try_recv().unwrap() {
        WsMessage::Text(text) => {
            let received: Message = serde_json::from_str(&text).unwrap();
            assert_eq!(received.topic, "signpost/c098e5120000/radio/led");
            assert_eq!(received.payload, "{\"data\":\"AQ==\"}");
        }
        other => panic!("Expected a text message, got {other:?}"),
    }
}

#[test]
fn test_handle_invalid_message_changes_nothing() {
    let broker = Broker::new().into_shared();
    handle_text(&broker, "client", "{not json");
    assert!(lock(&broker).topics.is_empty());
}

// ---- radio bridge ----

#[test]
fn test_radio_topics() {
    let network = network();
    assert_eq!(network.rx_filter(), "application/5/node/+/rx");
    assert_eq!(network.ack_filter(), "application/5/node/+/ack");
    assert_eq!(network.tx_topic("00aa"), "application/5/node/00aa/tx");
    assert_eq!(network.rx_source("application/5/node/00aa/rx"), Some("00aa"));
    assert_eq!(network.ack_source("application/5/node/00aa/ack"), Some("00aa"));
    assert_eq!(network.rx_source("application/6/node/00aa/rx"), None);
    assert_eq!(network.rx_source("application/5/node/00aa/tx"), None);
    assert_eq!(network.rx_source("application/5/node/00aa/rx/extra"), None);
}

#[test]
fn test_radio_uplink_frame() {
    let uplink: RadioUplink = serde_json::from_value(json!({
        "devEUI": "00aa",
        "data": STANDARD.encode([1u8, 2, 3, 4, 5, 6, 7]),
        "rssi": -80,
    }))
    .unwrap();
    assert_eq!(uplink.frame(), Some(vec![1, 2, 3, 4, 5, 6, 7]));

    let short: RadioUplink =
        serde_json::from_value(json!({"data": STANDARD.encode([1u8, 2, 3, 4, 5, 6])})).unwrap();
    assert_eq!(short.frame(), None);

    let empty: RadioUplink = serde_json::from_value(json!({"devEUI": "00aa"})).unwrap();
    assert_eq!(empty.frame(), None);

    let garbage: RadioUplink = serde_json::from_value(json!({"data": "%%%"})).unwrap();
    assert_eq!(garbage.frame(), None);
}

#[test]
fn test_radio_link_publishes_tx_envelope() {
    let network = network();
    let mut bus = Recorder::default();
    let mut link = RadioLink::new(&mut bus, &network);

    link.transmit(Transmission {
        device: "c098e5120000".parse().unwrap(),
        route: "00aabbccddeeff00".to_string(),
        reference: AckReference::new("c098e5120000".parse().unwrap(), 4),
        sequence: 4,
        frame: vec![1, 2, 3],
        attempt: 1,
    });

    assert_eq!(bus.0.len(), 1);
    let (topic, body) = &bus.0[0];
    assert_eq!(topic, "application/5/node/00aabbccddeeff00/tx");
    let request: RadioTxRequest = serde_json::from_str(body).unwrap();
    assert_eq!(
        request,
        RadioTxRequest {
            confirmed: true,
            data: "AQID".to_string(),
            dev_eui: "00aabbccddeeff00".to_string(),
            f_port: 1,
            reference: "c098e5120000:4".to_string(),
        }
    );
    let raw: serde_json::Value = serde_json::from_str(body).unwrap();
    assert_eq!(raw["devEUI"], "00aabbccddeeff00");
    assert_eq!(raw["fPort"], 1);
}

// ---- http ingress ----

fn ingress() -> (IngressState, mpsc::UnboundedReceiver<GatewayEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (IngressState::new(tx), rx)
}

#[tokio::test]
async fn test_upload_queues_framed_frame() {
    let (app_state, mut rx) = ingress();
    let status = http::upload(
        State(app_state),
        Query(UploadParams::default()),
        Bytes::from_static(&[0xc0, 0x98, 0xe5, 0x12, 0x00, 0x00, 0x01, 0x00, 0x00]),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        rx.try_recv().unwrap(),
        GatewayEvent::Frame {
            receiver: Receiver::Http,
            bytes: vec![0xc0, 0x98, 0xe5, 0x12, 0x00, 0x00, 0x01, 0x00, 0x00],
        }
    );
}

#[tokio::test]
async fn test_upload_tags_ble_relay() {
    let (app_state, mut rx) = ingress();
    let status = http::upload(
        State(app_state),
        Query(UploadParams {
            receiver: Some(Receiver::Ble),
        }),
        Bytes::from_static(&[1, 2, 3]),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(matches!(
        rx.try_recv().unwrap(),
        GatewayEvent::Frame {
            receiver: Receiver::Ble,
            ..
        }
    ));
}

#[tokio::test]
async fn test_upload_rejections() {
    let (app_state, rx) = ingress();
    let status = http::upload(
        State(app_state.clone()),
        Query(UploadParams {
            receiver: Some(Receiver::Lora),
        }),
        Bytes::from_static(&[1]),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    drop(rx);
    let status = http::upload(
        State(app_state),
        Query(UploadParams::default()),
        Bytes::from_static(&[1]),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_http_ingress_over_tcp() {
    let settings: HttpSettings = Settings::default().http;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let app = http::router(&settings, tx);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(http::serve(listener, app));

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    let body = [0u8, 0, 0, 0, 0, 1, 7, 0, 0];
    let request = format!(
        "POST /signpost?receiver=ble HTTP/1.1\r\nHost: {addr}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    stream.write_all(request.as_bytes()).await.unwrap();
    stream.write_all(&body).await.unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();

    assert!(response.starts_with("HTTP/1.1 200"), "{response}");
    assert_eq!(
        rx.recv().await.unwrap(),
        GatewayEvent::Frame {
            receiver: Receiver::Ble,
            bytes: body.to_vec(),
        }
    );
}
