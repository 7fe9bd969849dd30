use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;

use wallpad_bridge::mqtt::MqttLink;
use wallpad_bridge::{transport, BridgeConfig};

#[derive(Parser)]
#[command(name = "wallpad-bridge")]
#[command(about = "Bridge between an RS485 wallpad bus and MQTT")]
struct Cli {
    /// Path to the JSON options file
    #[arg(long, default_value = "/data/options.json")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG overrides the default `info` level
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();
    let config = BridgeConfig::from_path(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;

    let prefix = config.topic_prefix().to_string();
    let reconnect_delay = config.rs485.reconnect_delay();
    tracing::info!(protocol = %config.protocol, prefix = %prefix, "starting");

    let (changes_tx, changes_rx) = mpsc::unbounded_channel();
    let mut bridge = config.bridge_builder().build(changes_tx);

    let (mqtt, eventloop) = MqttLink::new(&config.mqtt, &prefix);
    tokio::spawn(mqtt.clone().run_publisher(changes_rx));
    tokio::spawn(mqtt.run_events(eventloop, bridge.handle()));

    loop {
        let stream = match transport::connect(&config.transport).await {
            Ok(stream) => stream,
            Err(e) if e.is_fatal() => {
                tracing::error!("Fatal transport error, exiting: {}", e);
                std::process::exit(1);
            }
            Err(e) => {
                tracing::warn!("Failed to connect: {}, retrying in {:?}", e, reconnect_delay);
                tokio::time::sleep(reconnect_delay).await;
                continue;
            }
        };

        match bridge.run(stream).await {
            Ok(()) => {
                tracing::info!("bridge stopped");
                return Ok(());
            }
            Err(e) if e.is_fatal() => {
                tracing::error!("Fatal transport error, exiting: {}", e);
                std::process::exit(1);
            }
            Err(e) => {
                tracing::warn!("Connection lost: {}, reconnecting in {:?}", e, reconnect_delay);
                tokio::time::sleep(reconnect_delay).await;
            }
        }
    }
}
