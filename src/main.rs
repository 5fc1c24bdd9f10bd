use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{info, warn};
use robot_link::core::bluetooth::constants::{STATUS_READY, STATUS_UPLOAD};
use robot_link::core::bluetooth::{Endpoint, MockLink};
use robot_link::{ConnectionManager, Device, LinkConfig, logging};

const CONFIG_DIR_ENV: &str = "ROBOT_LINK_CONFIG_DIR";

fn main() -> Result<()> {
    logging::init_logging(log::LevelFilter::Info);

    let rt = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
    rt.block_on(run())
}

async fn run() -> Result<()> {
    let config_dir = std::env::var_os(CONFIG_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config"));
    let config = LinkConfig::load_config(&config_dir).await?;

    let link = Arc::new(MockLink::new().with_mtu(185));
    link.push_read(Endpoint::LongMessage, vec![STATUS_UPLOAD]);
    link.set_default_read(Endpoint::LongMessage, vec![STATUS_READY]);

    let manager = ConnectionManager::new(link.clone(), config);
    manager.register_connection_listener(|connected: bool| {
        info!("Robot {}", if connected { "connected" } else { "disconnected" });
    });

    let device = Device::new("demo-robot", "Demo Robot", "00:00:00:00:00:00");
    manager.connect(&device).await?;
    info!("Negotiated MTU: {:?}", manager.negotiated_mtu());

    let control = manager.live_control();
    control.start();
    control.update_x_direction(200);
    control.on_button_pressed(0);
    tokio::time::sleep(Duration::from_secs(1)).await;
    control.on_button_released(0);
    control.stop();
    info!(
        "Sent {} live control frames",
        link.writes_to(Endpoint::LiveControl).len()
    );

    let configuration: Vec<u8> = (0..2048u32).map(|i| (i % 251) as u8).collect();
    let handle = manager.long_message().send_configuration(configuration)?;
    match handle.outcome().await {
        Some(Ok(())) => info!("Configuration uploaded"),
        Some(Err(e)) => warn!("Configuration upload failed: {}", e),
        None => warn!("Configuration upload was aborted"),
    }

    manager.disconnect().await?;
    Ok(())
}
