use std::collections::HashMap;

use serde::Deserialize;

/// Top-level configuration settings for the gateway.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub http: HttpSettings,
    pub broker: BrokerSettings,
    pub gateway: GatewaySettings,
    pub radio: RadioSettings,
    /// Downlink routes: device id (12 hex digits) to radio network id (devEUI).
    pub devices: HashMap<String, String>,
    pub log: LogSettings,
}

/// Host and port of the bus WebSocket server.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

/// HTTP ingress for framed-layout uploads.
#[derive(Debug, Deserialize, Clone)]
pub struct HttpSettings {
    pub host: String,
    pub port: u16,
    /// Path segment frames are posted to, without the leading slash.
    pub endpoint: String,
    pub body_limit_bytes: usize,
}

/// Configuration settings for the bus.
///
/// Controls maximum connections and how long published messages are kept
/// for replay.
#[derive(Debug, Deserialize, Clone)]
pub struct BrokerSettings {
    pub max_connections: usize,
    pub message_ttl_secs: u64,
    pub max_messages_per_topic: usize,
    /// Directory of the sled message store. Empty keeps it in memory.
    pub db_path: String,
}

/// Uplink namespace, downlink subscription and ack timing.
#[derive(Debug, Deserialize, Clone)]
pub struct GatewaySettings {
    pub namespace: String,
    pub downlink_prefix: String,
    pub failure_topic: String,
    pub ack_timeout_ms: u64,
    pub max_retries: u32,
    pub tick_interval_ms: u64,
}

/// Radio network-server topics and downlink port.
#[derive(Debug, Deserialize, Clone)]
pub struct RadioSettings {
    pub application_id: u32,
    pub f_port: u8,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values are filled in
/// from `Settings::default()`.
#[derive(Debug, Deserialize, Default)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub http: Option<PartialHttpSettings>,
    pub broker: Option<PartialBrokerSettings>,
    pub gateway: Option<PartialGatewaySettings>,
    pub radio: Option<PartialRadioSettings>,
    pub devices: Option<HashMap<String, String>>,
    pub log: Option<PartialLogSettings>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialHttpSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub endpoint: Option<String>,
    pub body_limit_bytes: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialBrokerSettings {
    pub max_connections: Option<usize>,
    pub message_ttl_secs: Option<u64>,
    pub max_messages_per_topic: Option<usize>,
    pub db_path: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialGatewaySettings {
    pub namespace: Option<String>,
    pub downlink_prefix: Option<String>,
    pub failure_topic: Option<String>,
    pub ack_timeout_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub tick_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialRadioSettings {
    pub application_id: Option<u32>,
    pub f_port: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialLogSettings {
    pub level: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            http: HttpSettings {
                host: "0.0.0.0".to_string(),
                port: 8081,
                endpoint: "signpost".to_string(),
                body_limit_bytes: 1_000 * 1024,
            },
            broker: BrokerSettings {
                max_connections: 1000,
                message_ttl_secs: 3600,
                max_messages_per_topic: 1000,
                db_path: "gateway_db".to_string(),
            },
            gateway: GatewaySettings {
                namespace: "signpost-preproc".to_string(),
                downlink_prefix: "signpost".to_string(),
                failure_topic: "signpost-preproc/downlink-failed".to_string(),
                ack_timeout_ms: 60_000,
                max_retries: 3,
                tick_interval_ms: 1_000,
            },
            radio: RadioSettings {
                application_id: 5,
                f_port: 1,
            },
            devices: HashMap::new(),
            log: LogSettings {
                level: "info".to_string(),
            },
        }
    }
}

impl Settings {
    /// Fill every missing value of `partial` from the defaults.
    pub fn merge(partial: PartialSettings) -> Self {
        let default = Settings::default();
        let server = partial.server.unwrap_or_default();
        let http = partial.http.unwrap_or_default();
        let broker = partial.broker.unwrap_or_default();
        let gateway = partial.gateway.unwrap_or_default();
        let radio = partial.radio.unwrap_or_default();
        let log = partial.log.unwrap_or_default();

        Settings {
            server: ServerSettings {
                host: server.host.unwrap_or(default.server.host),
                port: server.port.unwrap_or(default.server.port),
            },
            http: HttpSettings {
                host: http.host.unwrap_or(default.http.host),
                port: http.port.unwrap_or(default.http.port),
                endpoint: http
                    .endpoint
                    .map(|e| e.trim_matches('/').to_string())
                    .unwrap_or(default.http.endpoint),
                body_limit_bytes: http
                    .body_limit_bytes
                    .unwrap_or(default.http.body_limit_bytes),
            },
            broker: BrokerSettings {
                max_connections: broker
                    .max_connections
                    .unwrap_or(default.broker.max_connections),
                message_ttl_secs: broker
                    .message_ttl_secs
                    .unwrap_or(default.broker.message_ttl_secs),
                max_messages_per_topic: broker
                    .max_messages_per_topic
                    .unwrap_or(default.broker.max_messages_per_topic),
                db_path: broker.db_path.unwrap_or(default.broker.db_path),
            },
            gateway: GatewaySettings {
                namespace: gateway.namespace.unwrap_or(default.gateway.namespace),
                downlink_prefix: gateway
                    .downlink_prefix
                    .unwrap_or(default.gateway.downlink_prefix),
                failure_topic: gateway
                    .failure_topic
                    .unwrap_or(default.gateway.failure_topic),
                ack_timeout_ms: gateway
                    .ack_timeout_ms
                    .unwrap_or(default.gateway.ack_timeout_ms),
                max_retries: gateway.max_retries.unwrap_or(default.gateway.max_retries),
                tick_interval_ms: gateway
                    .tick_interval_ms
                    .unwrap_or(default.gateway.tick_interval_ms),
            },
            radio: RadioSettings {
                application_id: radio
                    .application_id
                    .unwrap_or(default.radio.application_id),
                f_port: radio.f_port.unwrap_or(default.radio.f_port),
            },
            devices: partial.devices.unwrap_or(default.devices),
            log: LogSettings {
                level: log.level.unwrap_or(default.log.level),
            },
        }
    }
}
