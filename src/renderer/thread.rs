//! Render loop on its own thread
//!
//! The compositor never runs on a client's connection context. This thread
//! drives [`Renderer::render_all`] at a fixed frame interval until stopped.

use super::Renderer;
use log::{info, warn};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Statistics about the render loop
#[derive(Debug, Clone, Default)]
pub struct FrameStats {
    /// Frames composed (all outputs count as one)
    pub total_frames: u64,
    /// Elements drawn from freshly acquired buffers
    pub fresh_elements: u64,
    /// Elements redrawn from retained front buffers
    pub redrawn_elements: u64,
    /// Frames that took longer than the interval
    pub missed_frames: u64,
    /// Longest frame observed
    pub max_frame_time: Duration,
}

pub struct CompositorThread {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<FrameStats>>,
}

impl CompositorThread {
    pub fn spawn(mut renderer: Renderer, frame_interval: Duration) -> io::Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();

        let handle = thread::Builder::new()
            .name("axiom-compositor".into())
            .spawn(move || {
                info!("🎬 Compositor thread started, frame interval {:?}", frame_interval);
                let mut stats = FrameStats::default();

                while flag.load(Ordering::Acquire) {
                    let start = Instant::now();
                    for frame in renderer.render_all() {
                        for element in &frame.elements {
                            if element.fresh {
                                stats.fresh_elements += 1;
                            } else {
                                stats.redrawn_elements += 1;
                            }
                        }
                    }
                    stats.total_frames += 1;

                    let elapsed = start.elapsed();
                    stats.max_frame_time = stats.max_frame_time.max(elapsed);
                    if elapsed > frame_interval {
                        stats.missed_frames += 1;
                        warn!("⚠️ Frame took {:?} (interval {:?})", elapsed, frame_interval);
                    } else {
                        thread::sleep(frame_interval - elapsed);
                    }
                }

                info!("🛑 Compositor thread stopped after {} frames", stats.total_frames);
                stats
            })?;

        Ok(Self {
            running,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stops the loop and waits for the thread to finish
    pub fn stop(mut self) -> FrameStats {
        self.shutdown().unwrap_or_default()
    }

    fn shutdown(&mut self) -> Option<FrameStats> {
        self.running.store(false, Ordering::Release);
        let handle = self.handle.take()?;
        match handle.join() {
            Ok(stats) => Some(stats),
            Err(_) => {
                warn!("Compositor thread panicked");
                None
            }
        }
    }
}

impl Drop for CompositorThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}
