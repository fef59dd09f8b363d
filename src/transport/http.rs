//! HTTP ingress.
//!
//! Relays upload framed-layout frames with `POST /<endpoint>`, the raw
//! frame as the body. BLE relays add `?receiver=ble` so their frames are
//! tagged accordingly. The frame is queued for the gateway core and the
//! request answered right away with an empty 200.

use axum::Router;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Query, State};
use axum::http::StatusCode;
use axum::routing::post;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::config::HttpSettings;
use crate::gateway::{GatewayEvent, Receiver};

#[derive(Debug, Clone)]
pub struct IngressState {
    events: UnboundedSender<GatewayEvent>,
}

impl IngressState {
    pub fn new(events: UnboundedSender<GatewayEvent>) -> Self {
        Self { events }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct UploadParams {
    pub receiver: Option<Receiver>,
}

pub fn router(settings: &HttpSettings, events: UnboundedSender<GatewayEvent>) -> Router {
    Router::new()
        .route(&format!("/{}", settings.endpoint), post(upload))
        .layer(DefaultBodyLimit::max(settings.body_limit_bytes))
        .with_state(IngressState::new(events))
}

pub async fn upload(
    State(state): State<IngressState>,
    Query(params): Query<UploadParams>,
    body: Bytes,
) -> StatusCode {
    let receiver = match params.receiver {
        None | Some(Receiver::Http) => Receiver::Http,
        Some(Receiver::Ble) => Receiver::Ble,
        Some(Receiver::Lora) => {
            debug!("Refusing radio-tagged upload over HTTP");
            return StatusCode::BAD_REQUEST;
        }
    };

    debug!("{} byte upload via {}", body.len(), receiver);
    let event = GatewayEvent::Frame {
        receiver,
        bytes: body.to_vec(),
    };
    match state.events.send(event) {
        Ok(()) => StatusCode::OK,
        Err(_) => {
            warn!("Gateway core is gone, rejecting upload");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

pub async fn serve(listener: TcpListener, app: Router) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("HTTP ingress listening on http://{}", addr);
    }
    axum::serve(listener, app).await
}
