//! Compositor side of the buffer flow
//!
//! The [`Renderer`] walks each output's display sync group, pulls at most one
//! ready buffer per stream per frame and binds it:
//!
//! ```text
//! try_compositor_acquire ─► bind ─► mark_consumed ─► compositor_release ─► front buffer
//! ```
//!
//! Releasing the slot right after binding keeps the client's queue moving;
//! the buffer itself is kept as the stream's front buffer and redrawn on
//! frames where the client sent nothing new. The front buffer is dropped when
//! a newer one replaces it or its stream leaves the scene, which is what
//! finally releases native buffers back to the client.

pub mod thread;

pub use thread::{CompositorThread, FrameStats};

use crate::buffer::{Buffer, BufferId, Texture};
use crate::geometry::{Displacement, Point, Rectangle};
use crate::import::image_cache::ImageCache;
use crate::scene::Scene;
use crate::stream::StreamId;
use log::{debug, warn};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Last buffer drawn for a stream
struct FrontBuffer {
    buffer: Arc<Buffer>,
    texture: Texture,
}

/// One stream drawn into a frame
#[derive(Debug, Clone)]
pub struct RenderElement {
    pub stream: StreamId,
    pub buffer: BufferId,
    /// Output coordinates
    pub destination: Rectangle,
    pub texture: Texture,
    /// Whether the buffer was acquired this frame (vs. redrawn)
    pub fresh: bool,
}

#[derive(Debug, Clone)]
pub struct Frame {
    pub output: usize,
    pub sequence: u64,
    pub elements: Vec<RenderElement>,
}

pub struct Renderer {
    scene: Arc<Scene>,
    image_cache: Option<Arc<ImageCache>>,
    front_buffers: HashMap<StreamId, FrontBuffer>,
    sequence: u64,
}

impl Renderer {
    pub fn new(scene: Arc<Scene>, image_cache: Option<Arc<ImageCache>>) -> Self {
        Self {
            scene,
            image_cache,
            front_buffers: HashMap::new(),
            sequence: 0,
        }
    }

    pub fn scene(&self) -> &Arc<Scene> {
        &self.scene
    }

    /// Composes one frame for every output and drops state of streams that
    /// left the scene
    pub fn render_all(&mut self) -> Vec<Frame> {
        self.sequence += 1;
        let frames: Vec<Frame> = (0..self.scene.outputs())
            .filter_map(|output| self.compose(output))
            .collect();

        let visible: HashSet<StreamId> = frames
            .iter()
            .flat_map(|frame| frame.elements.iter().map(|element| element.stream))
            .collect();
        let before = self.front_buffers.len();
        self.front_buffers.retain(|stream, _| visible.contains(stream));
        if self.front_buffers.len() != before {
            debug!(
                "Dropped {} front buffers of streams no longer in the scene",
                before - self.front_buffers.len()
            );
        }

        if let Some(cache) = &self.image_cache {
            cache.purge_destroyed();
        }
        frames
    }

    /// Composes one frame for `output`
    pub fn render_output(&mut self, output: usize) -> Option<Frame> {
        self.sequence += 1;
        self.compose(output)
    }

    fn compose(&mut self, output: usize) -> Option<Frame> {
        let group = self.scene.group(output)?;
        let mut elements = Vec::new();

        for scene_surface in group.surfaces() {
            let origin = scene_surface.top_left();
            let origin = Displacement::new(origin.x, origin.y);

            for placement in scene_surface.streams() {
                let fresh = self.consume_next(&placement.stream);
                let Some(front) = self.front_buffers.get(&placement.stream.id()) else {
                    continue;
                };
                elements.push(RenderElement {
                    stream: placement.stream.id(),
                    buffer: front.buffer.id(),
                    destination: Rectangle::new(Point::default() + origin + placement.displacement, placement.size),
                    texture: front.texture.clone(),
                    fresh,
                });
            }
        }

        Some(Frame {
            output,
            sequence: self.sequence,
            elements,
        })
    }

    /// Pulls the next ready buffer of `stream` into its front buffer.
    /// Returns whether there was one.
    fn consume_next(&mut self, stream: &crate::stream::BufferStream) -> bool {
        let Some(acquired) = stream.try_compositor_acquire() else {
            return false;
        };

        let bound = acquired.buffer().bind();
        // Consumed either way: a buffer that cannot be drawn must not stall
        // the client's frame callbacks
        acquired.buffer().mark_consumed();
        let buffer = stream.compositor_release(acquired);

        match bound {
            Ok(texture) => {
                self.front_buffers
                    .insert(stream.id(), FrontBuffer { buffer, texture });
                true
            }
            Err(e) => {
                warn!("⚠️ Failed to bind buffer {:?}: {}", buffer.id(), e);
                false
            }
        }
    }

    /// Number of streams with a retained front buffer
    pub fn front_buffer_count(&self) -> usize {
        self.front_buffers.len()
    }
}
