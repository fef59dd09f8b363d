//! CLI for the signpost gateway
//!
//! Subcommands:
//! - `run`: start the bus, the HTTP ingress and the gateway core
//! - `decode`: decode one hex-encoded frame and print it as JSON

use std::process::ExitCode;

use clap::Parser;
use signpost_gateway::broker::Broker;
use signpost_gateway::codec::{self, Layout};
use signpost_gateway::config::{Settings, load_config, load_config_from};
use signpost_gateway::gateway::GatewayCore;
use signpost_gateway::persistence::Persistence;
use signpost_gateway::transport::{http, websocket};
use signpost_gateway::utils::{GatewayError, Result, logging};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "signpost-gateway", version)]
enum Command {
    /// Start the gateway
    Run {
        /// Configuration file, extension optional (default: config/default)
        #[arg(long)]
        config: Option<String>,
    },
    /// Decode a frame given as hex and print its segments
    Decode {
        /// Frame layout: compact (radio) or framed (HTTP, BLE)
        #[arg(long, default_value = "compact")]
        layout: Layout,
        frame: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    match Command::parse() {
        Command::Run { config } => {
            let loaded = match config.as_deref() {
                Some(path) => load_config_from(path, true),
                None => load_config(),
            };
            let settings = match loaded {
                Ok(settings) => settings,
                Err(e) => {
                    logging::init("info");
                    error!("Failed to load configuration: {}", e);
                    return ExitCode::FAILURE;
                }
            };
            logging::init(&settings.log.level);

            match run(settings).await {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    error!("Gateway failed: {}", e);
                    ExitCode::FAILURE
                }
            }
        }
        Command::Decode { layout, frame } => match decode(layout, &frame) {
            Ok(json) => {
                println!("{json}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("{e}");
                ExitCode::FAILURE
            }
        },
    }
}

async fn run(settings: Settings) -> Result<()> {
    let ttl = i64::try_from(settings.broker.message_ttl_secs).ok();
    let cap = Some(settings.broker.max_messages_per_topic);
    let persistence = if settings.broker.db_path.is_empty() {
        Persistence::temporary(ttl, cap)?
    } else {
        Persistence::open(&settings.broker.db_path, ttl, cap)?
    };
    let broker = Broker::new_with_persistence(persistence).into_shared();

    let core = GatewayCore::new(broker.clone(), &settings)?;
    let bus_rx = core.attach();
    let (events_tx, events_rx) = mpsc::unbounded_channel();

    let ws_addr = format!("{}:{}", settings.server.host, settings.server.port);
    let ws_listener = TcpListener::bind(&ws_addr).await?;
    let http_addr = format!("{}:{}", settings.http.host, settings.http.port);
    let http_listener = TcpListener::bind(&http_addr).await?;
    let app = http::router(&settings.http, events_tx);

    info!(
        "Gateway up: bus on {}, ingress on {}/{}",
        ws_addr, http_addr, settings.http.endpoint
    );

    tokio::select! {
        _ = core.run(events_rx, bus_rx) => {
            warn!("Gateway core exited unexpectedly.");
        }
        _ = websocket::serve(ws_listener, broker.clone(), settings.broker.max_connections) => {
            warn!("WebSocket server exited unexpectedly.");
        }
        result = http::serve(http_listener, app) => {
            result?;
            warn!("HTTP ingress exited unexpectedly.");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
        }
    }

    Ok(())
}

fn decode(layout: Layout, frame: &str) -> Result<String> {
    let bytes = hex::decode(frame.trim())
        .map_err(|e| GatewayError::InvalidFrameHex(e.to_string()))?;
    let decoded = codec::decode(&bytes, layout)?;
    for skipped in &decoded.skipped {
        eprintln!("skipped: {skipped}");
    }
    Ok(serde_json::to_string_pretty(&decoded.frame)?)
}
