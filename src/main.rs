//! # axiom-surface - headless surface core runner
//!
//! Runs the buffer pipeline end to end without a display: a simulated client
//! connects, creates a toplevel with a subsurface, and draws frames into a
//! shared-memory pool, pacing itself on frame callbacks. The compositor
//! thread consumes the buffers at the configured frame interval.

use anyhow::{Context, Result};
use axiom_surface::buffer::shm::ShmPool;
use axiom_surface::buffer::BufferHandle;
use axiom_surface::executor::TokioExecutor;
use axiom_surface::geometry::{Point, Rectangle};
use axiom_surface::import::gpu::{GpuDevice, HeadlessGpu};
use axiom_surface::import::BufferImporter;
use axiom_surface::protocol::{ClientEvent, Request};
use axiom_surface::renderer::{CompositorThread, Renderer};
use axiom_surface::resource::CallbackToken;
use axiom_surface::scene::Scene;
use axiom_surface::session::ClientSession;
use axiom_surface::surface::SurfaceContext;
use axiom_surface::SurfaceCoreConfig;
use clap::Parser;
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use wayland_server::protocol::wl_shm;
use wayland_server::WEnum;

#[derive(Parser)]
#[command(name = "axiom-surface")]
#[command(about = "Headless runner for the Axiom buffer and surface core")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "~/.config/axiom/surface.toml")]
    config: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Frames the simulated client draws before disconnecting
    #[arg(long, default_value_t = 120)]
    frames: u32,

    /// Width of the simulated toplevel
    #[arg(long, default_value_t = 256)]
    width: i32,

    /// Height of the simulated toplevel
    #[arg(long, default_value_t = 256)]
    height: i32,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match SurfaceCoreConfig::load(&cli.config) {
        Ok(config) => Some(config),
        Err(e) => {
            // Logging is not up yet; report once it is
            eprintln!("Failed to load configuration: {:#}", e);
            None
        }
    };
    let loaded = config.is_some();
    let config = config.unwrap_or_default();

    // Initialize logging
    let filter = if cli.debug || config.general.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

    info!("🚀 Starting Axiom surface core");
    info!("📄 Version: {}", env!("CARGO_PKG_VERSION"));
    info!("🔨 Built {} for {}", env!("BUILD_DATE"), env!("TARGET_TRIPLE"));
    if loaded {
        info!("✅ Configuration loaded from: {}", cli.config);
    } else {
        info!("📝 Using default configuration");
    }

    let (executor, executor_task) = TokioExecutor::new(&tokio::runtime::Handle::current());
    let executor = Arc::new(executor);

    let gpu: Option<Arc<dyn GpuDevice>> = match config.import.gpu.as_str() {
        "headless" => Some(Arc::new(HeadlessGpu::new())),
        _ => None,
    };
    let importer = Arc::new(BufferImporter::new(&config.import, gpu, executor.clone()));
    let scene = Arc::new(Scene::new(config.compositor.outputs));

    let renderer = Renderer::new(scene.clone(), importer.image_cache().cloned());
    let compositor = CompositorThread::spawn(renderer, config.compositor.frame_interval())
        .context("Failed to start compositor thread")?;

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let ctx = SurfaceContext {
        importer,
        executor: executor.clone(),
        events: Arc::new(events_tx),
        scene,
        stream: config.stream.clone(),
    };

    let client = SimulatedClient {
        frames: cli.frames,
        width: cli.width,
        height: cli.height,
    };
    // Commits block on backpressure, so the client runs off the async workers
    let outcome = tokio::task::spawn_blocking(move || client.run(ctx, events_rx))
        .await
        .context("Simulated client panicked")?;

    let stats = compositor.stop();
    drop(executor);
    match tokio::time::timeout(Duration::from_secs(1), executor_task).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Executor task ended abnormally: {}", e),
        Err(_) => warn!("Executor task still running at exit"),
    }

    match outcome {
        Ok(done) => {
            info!(
                "✅ Client finished: {} frame callbacks, {} buffer releases",
                done.callbacks, done.releases
            );
            info!(
                "📊 Compositor: {} frames, {} fresh / {} redrawn elements, {} missed, worst {:?}",
                stats.total_frames,
                stats.fresh_elements,
                stats.redrawn_elements,
                stats.missed_frames,
                stats.max_frame_time
            );
            Ok(())
        }
        Err(e) => {
            error!("❌ Simulated client failed: {:#}", e);
            Err(e)
        }
    }
}

struct SimulatedClient {
    frames: u32,
    width: i32,
    height: i32,
}

#[derive(Debug, Default)]
struct ClientSummary {
    callbacks: u32,
    releases: u32,
}

impl SimulatedClient {
    fn run(self, ctx: SurfaceContext, mut events: mpsc::UnboundedReceiver<ClientEvent>) -> Result<ClientSummary> {
        let mut session = ClientSession::new(ctx);
        let stride = self.width * 4;
        let frame_bytes = (stride * self.height) as usize;
        let pool = ShmPool::new_anonymous(frame_bytes * 2).context("Failed to create shm pool")?;

        let toplevel = session.create_surface()?;
        let overlay = session.create_surface()?;
        session.dispatch(Request::GetToplevel { surface: toplevel, output: 0 })?;
        session.dispatch(Request::GetSubsurface { surface: overlay, parent: toplevel })?;
        session.dispatch(Request::SetPosition {
            surface: overlay,
            position: Point::new(self.width / 4, self.height / 4),
        })?;
        session.dispatch(Request::SetDesync { surface: overlay })?;

        let overlay_buffer = pool.create_buffer(
            frame_bytes as i32,
            self.width / 2,
            self.height / 2,
            stride,
            WEnum::Value(wl_shm::Format::Argb8888),
        );
        session.dispatch(Request::Attach {
            surface: overlay,
            buffer: Some(BufferHandle::Shm(overlay_buffer)),
            x: 0,
            y: 0,
        })?;
        session.dispatch(Request::SetInputRegion {
            surface: overlay,
            region: Some(Vec::new()),
        })?;
        session.dispatch(Request::Commit { surface: overlay })?;

        let mut summary = ClientSummary::default();
        for frame in 0..self.frames {
            let shade = (frame % 256) as u8;
            let pixels: Vec<u8> = [shade, 0x40, 0xff - shade, 0xff].repeat((self.width * self.height) as usize);
            if !pool.write(0, &pixels) {
                anyhow::bail!("Frame does not fit the shm pool");
            }

            let buffer = pool.create_buffer(0, self.width, self.height, stride, WEnum::Value(wl_shm::Format::Argb8888));
            session.dispatch(Request::Attach {
                surface: toplevel,
                buffer: Some(BufferHandle::Shm(buffer)),
                x: 0,
                y: 0,
            })?;
            session.dispatch(Request::Damage {
                surface: toplevel,
                area: Rectangle::from_xywh(0, 0, self.width, self.height),
            })?;
            session.dispatch(Request::Frame {
                surface: toplevel,
                callback: CallbackToken(frame),
            })?;
            session.dispatch(Request::Commit { surface: toplevel })?;

            // Pace on the frame callback like a real client
            loop {
                match events.blocking_recv() {
                    Some(ClientEvent::CallbackDone { token, timestamp_ms }) => {
                        summary.callbacks += 1;
                        if token == CallbackToken(frame) {
                            log::debug!("Frame {} done at {}ms", frame, timestamp_ms);
                            break;
                        }
                    }
                    Some(ClientEvent::BufferRelease { .. }) => summary.releases += 1,
                    Some(ClientEvent::ProtocolError { code, message, .. }) => {
                        anyhow::bail!("Protocol error {}: {}", code, message);
                    }
                    None => anyhow::bail!("Event channel closed"),
                }
            }
        }

        session.dispatch(Request::Destroy { surface: overlay })?;
        session.dispatch(Request::Destroy { surface: toplevel })?;
        session.disconnect();

        // Give the completion tasks of the teardown a moment to drain
        std::thread::sleep(Duration::from_millis(50));
        while let Ok(event) = events.try_recv() {
            if matches!(event, ClientEvent::BufferRelease { .. }) {
                summary.releases += 1;
            }
        }
        Ok(summary)
    }
}
