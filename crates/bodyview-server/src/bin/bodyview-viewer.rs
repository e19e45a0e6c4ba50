//! Headless bodyview viewer.
//!
//! Hosts an in-memory scene and, with `--server`, accepts remote clients.
//!
//! # Usage
//!
//! ```bash
//! bodyview-viewer --server
//! bodyview-viewer --server --port 9000 --config viewer.toml
//! ```

use std::{path::PathBuf, time::Duration};

use bodyview_core::ViewerConfig;
use bodyview_server::{MemoryScene, Viewer};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Frame period of the headless render loop (60 Hz).
const FRAME_PERIOD: Duration = Duration::from_micros(16_667);

/// bodyview viewer
#[derive(Parser, Debug)]
#[command(name = "bodyview-viewer")]
#[command(about = "Viewer for human body motion data with remote control")]
struct Args {
    /// Listen for remote clients
    #[arg(long)]
    server: bool,

    /// Host to bind to
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Configuration file (defaults to the user config directory)
    #[arg(short, long, env = "BODYVIEW_CONFIG")]
    config: Option<PathBuf>,
}

impl Args {
    fn viewer_config(&self) -> anyhow::Result<ViewerConfig> {
        let mut config = match &self.config {
            Some(path) => ViewerConfig::load(path)?,
            None => ViewerConfig::load_or_default()?,
        };
        config.server_enabled |= self.server;
        if let Some(host) = &self.host {
            config.host.clone_from(host);
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let config = args.viewer_config()?;
    if !config.server_enabled {
        tracing::info!("Remote server disabled, nothing to serve; pass --server to accept clients");
    }

    let mut viewer = Viewer::new(MemoryScene::new(), config).await?;
    let stopper = viewer.server().cloned();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            if let Some(handle) = stopper {
                handle.stop();
            }
        }
    });

    let mut last_len = 0;
    viewer
        .run_frames(FRAME_PERIOD, |scene| {
            if scene.len() != last_len {
                last_len = scene.len();
                tracing::info!(nodes = last_len, frame = scene.current_frame(), "Scene changed");
            }
        })
        .await;

    tracing::info!("Viewer closed");
    Ok(())
}
