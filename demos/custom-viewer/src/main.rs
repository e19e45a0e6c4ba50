//! Custom viewer reacting to a user-defined message.
//!
//! Without `--server` this runs the client: it launches itself with
//! `--server` as the viewer, sends three cubes, then asks the viewer to
//! select the second one through a custom message.
//!
//! Run with: cargo run -p custom-viewer-demo

use std::time::Duration;

use anyhow::Context as _;
use bodyview_client::{NodeOptions, RemoteMeshes, RemoteViewer};
use bodyview_core::{
    Args as MessageArgs, ClientConfig, Message, MessageType, NdArray, ViewerConfig,
};
use bodyview_server::{
    Context, DispatchError, HandlerResult, LocalId, MemoryScene, SceneGraph, Viewer,
};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Values from `USER_MESSAGE` on are never used by the viewer itself.
const SELECT_CUBE: MessageType = MessageType::USER_MESSAGE;

#[derive(Parser, Debug)]
#[command(name = "custom-viewer-demo")]
struct Args {
    /// Run the viewer part; without it the client runs instead
    #[arg(long)]
    server: bool,

    /// Port the viewer listens on
    #[arg(short, long, default_value_t = bodyview_core::config::DEFAULT_PORT)]
    port: u16,
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
    if args.server {
        run_viewer(args.port).await
    } else {
        run_client(args.port).await
    }
}

async fn run_client(port: u16) -> anyhow::Result<()> {
    let exe = std::env::current_exe().context("cannot locate own executable")?;
    let exe = exe.to_string_lossy();
    let config = ClientConfig {
        port,
        viewer_command: shlex::try_quote(&exe)?.into_owned(),
        terminate_on_close: true,
        ..ClientConfig::default()
    };

    // Runs `<this binary> --port <port> --server`.
    let viewer = RemoteViewer::create_new_process(["--port".to_string(), port.to_string()], &config)
        .await
        .context("viewer did not start")?;

    let (vertices, faces) = cube()?;
    for i in 0..3u8 {
        let options = NodeOptions::named(format!("Cube {i}"))
            .position([f32::from(i), 0.0, 0.0])
            .scale(0.1)
            .kwarg("flat_shading", true);
        viewer
            .add(RemoteMeshes::new(vertices.clone(), faces.clone()).with_options(options))
            .await?;
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    viewer
        .send_message(SELECT_CUBE, MessageArgs::new().kwarg("index", 1))
        .await?;
    tracing::info!("Sent custom message, press Ctrl-C to quit");

    tokio::select! {
        status = viewer.wait_process() => {
            let status = status?;
            tracing::info!(?status, "Viewer exited");
        }
        _ = tokio::signal::ctrl_c() => {}
    }
    viewer.close().await?;
    Ok(())
}

/// Hook state: cubes in creation order.
#[derive(Default)]
struct CubePicker {
    cubes: Vec<LocalId>,
}

impl CubePicker {
    fn handle(&mut self, ctx: &mut Context<'_, MemoryScene>, message: &Message) -> HandlerResult {
        if message.message_type != SELECT_CUBE {
            ctx.builtin(message)?;
            if message.message_type.is_creation() {
                if let Some(uid) = message.target {
                    let cube = ctx.resolve(uid)?;
                    self.cubes.push(cube);
                    ctx.scene_mut().select(cube)?;
                }
            }
            return Ok(());
        }

        let index = message.kwarg_i64("index")?;
        let cube = usize::try_from(index)
            .ok()
            .and_then(|i| self.cubes.get(i))
            .copied()
            .ok_or_else(|| DispatchError::handler(format!("no cube at index {index}")))?;
        ctx.scene_mut().select(cube)?;
        Ok(())
    }
}

async fn run_viewer(port: u16) -> anyhow::Result<()> {
    let config = ViewerConfig {
        server_enabled: true,
        port,
        ..ViewerConfig::default()
    };
    let mut viewer = Viewer::new(MemoryScene::new(), config).await?;

    let mut picker = CubePicker::default();
    viewer
        .dispatcher_mut()
        .set_hook_fn(move |ctx, message| picker.handle(ctx, message));

    let mut selected = None;
    viewer
        .run_frames(Duration::from_millis(16), |scene| {
            if scene.selected() != selected {
                selected = scene.selected();
                if let Some(node) = selected.and_then(|id| scene.node(id)) {
                    tracing::info!(name = %node.name, "Selected");
                }
            }
        })
        .await;
    Ok(())
}

/// Unit cube centred at the origin.
fn cube() -> anyhow::Result<(NdArray<f32>, NdArray<i64>)> {
    let mut vertices = Vec::with_capacity(24);
    for i in 0..8u8 {
        for axis in 0..3 {
            vertices.push(if (i >> axis) & 1 == 1 { 0.5 } else { -0.5 });
        }
    }
    let faces: Vec<i64> = vec![
        0, 2, 1, 1, 2, 3, // -z
        4, 5, 6, 5, 7, 6, // +z
        0, 1, 4, 1, 5, 4, // -y
        2, 6, 3, 3, 6, 7, // +y
        0, 4, 2, 2, 4, 6, // -x
        1, 3, 5, 3, 7, 5, // +x
    ];
    Ok((NdArray::new(vec![8, 3], vertices)?, NdArray::new(vec![12, 3], faces)?))
}
