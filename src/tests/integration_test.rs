use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use futures_util::{SinkExt, Stream, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tungstenite::protocol::Message as WsMessage;

use crate::broker::{Broker, Message, SharedBroker, lock};
use crate::codec::{self, DeviceAddress, Frame, Layout};
use crate::config::Settings;
use crate::gateway::{GatewayCore, GatewayEvent, Receiver};
use crate::transport::websocket;

const ADDR: DeviceAddress = DeviceAddress::new([0xc0, 0x98, 0xe5, 0x12, 0x00, 0x00]);
const EUI: &str = "00aabbccddeeff00";

async fn wait_for_subscription(broker: &SharedBroker, filter: &str) {
    for _ in 0..100 {
        if lock(broker).topics.contains_key(filter) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("subscription to {filter} never arrived");
}

async fn next_message<S>(ws: &mut S) -> Message
where
    S: Stream<Item = Result<WsMessage, tungstenite::Error>> + Unpin,
{
    let received = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("timed out waiting for a bus message");
    match received {
        Some(Ok(WsMessage::Text(text))) => serde_json::from_str(&text).unwrap(),
        other => panic!("Expected a text message, got {other:?}"),
    }
}

#[tokio::test]
async fn test_integration_uplink_and_downlink_end_to_end() {
    let mut settings = Settings::default();
    settings.devices.insert(ADDR.to_hex(), EUI.to_string());

    let broker = Broker::new().into_shared();
    let core = GatewayCore::new(broker.clone(), &settings).unwrap();
    let bus_rx = core.attach();
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    tokio::spawn(core.run(events_rx, bus_rx));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(websocket::serve(listener, broker.clone(), 16));

    let (mut ws, _) = connect_async(format!("ws://{addr}"))
        .await
        .expect("connect");
    for filter in ["signpost-preproc/#", "application/5/node/+/tx"] {
        let subscribe = json!({"type": "subscribe", "topic": filter}).to_string();
        ws.send(WsMessage::text(subscribe)).await.unwrap();
        wait_for_subscription(&broker, filter).await;
    }

    // Uplink: a framed upload reaches the WebSocket subscriber.
    let frame = Frame::new(ADDR, 1)
        .with_segment("lab11/gps", vec![0x0b, 0x1d])
        .encode(Layout::Framed)
        .unwrap();
    events_tx
        .send(GatewayEvent::Frame {
            receiver: Receiver::Http,
            bytes: frame,
        })
        .unwrap();

    let uplink = next_message(&mut ws).await;
    assert_eq!(uplink.topic, "signpost-preproc/lab11/gps");
    let body: Value = serde_json::from_str(&uplink.payload).unwrap();
    assert_eq!(body["device_id"], "c098e5120000");
    assert_eq!(body["receiver"], "http");
    assert_eq!(body["data"]["data"], json!([11, 29]));

    // Downlink: a request published over the WebSocket becomes a radio tx.
    let request = json!({
        "type": "publish",
        "topic": "signpost/c098e5120000/radio/led",
        "payload": json!({"data": STANDARD.encode([1u8, 0])}).to_string(),
    })
    .to_string();
    ws.send(WsMessage::text(request)).await.unwrap();

    let tx = next_message(&mut ws).await;
    assert_eq!(tx.topic, format!("application/5/node/{EUI}/tx"));
    let envelope: Value = serde_json::from_str(&tx.payload).unwrap();
    assert_eq!(envelope["reference"], "c098e5120000:0");
    let bytes = STANDARD
        .decode(envelope["data"].as_str().unwrap())
        .unwrap();
    let decoded = codec::decode(&bytes, Layout::Compact).unwrap();
    assert_eq!(decoded.frame.address, ADDR);
    assert_eq!(decoded.frame.segments[0].topic, "radio/led");
    assert_eq!(decoded.frame.segments[0].payload, vec![1, 0]);
}
