//! Per-surface buffer streams
//!
//! A [`BufferStream`] is the ordered handoff of one surface's submitted
//! buffers into the compositor. It wraps a fixed-size [`SwapQueue`] and keeps
//! the properties the compositor queries between frames (size, format, scale).

use crate::buffer::Buffer;
use crate::format::PixelFormat;
use crate::geometry::Size;
use crate::swap_queue::{AcquiredBuffer, QueueStats, SwapQueue, SwapQueueError};
use log::debug;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Per-surface stream settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamConfig {
    /// Slots per stream (the swap queue capacity)
    pub buffer_count: usize,

    /// Replace the oldest queued frame instead of blocking the client
    pub allow_framedropping: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            buffer_count: 3,
            allow_framedropping: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(u64);

impl StreamId {
    fn new_unique() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        StreamId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, Copy)]
struct StreamProperties {
    size: Size,
    format: PixelFormat,
    scale: i32,
}

pub struct BufferStream {
    id: StreamId,
    queue: SwapQueue<Arc<Buffer>>,
    properties: Mutex<StreamProperties>,
}

impl BufferStream {
    pub fn new(buffer_count: usize) -> Result<Arc<Self>, SwapQueueError> {
        Ok(Arc::new(Self {
            id: StreamId::new_unique(),
            queue: SwapQueue::new(buffer_count)?,
            properties: Mutex::new(StreamProperties {
                size: Size::default(),
                format: PixelFormat::Invalid,
                scale: 1,
            }),
        }))
    }

    pub fn from_config(config: &StreamConfig) -> Result<Arc<Self>, SwapQueueError> {
        let stream = Self::new(config.buffer_count)?;
        stream.allow_framedropping(config.allow_framedropping);
        Ok(stream)
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn allow_framedropping(&self, allow: bool) {
        self.queue.allow_framedropping(allow);
    }

    /// Hands a buffer to the compositor; blocks while every slot is in flight
    pub fn submit_buffer(&self, buffer: Arc<Buffer>) -> Result<(), SwapQueueError> {
        {
            let mut props = self.properties.lock();
            props.size = buffer.size();
            props.format = buffer.format();
        }

        if let Some(dropped) = self.queue.submit(buffer)? {
            // A superseded frame will never be drawn; let its completion run
            debug!("Stream {:?} dropped frame {:?}", self.id, dropped.id());
            dropped.mark_consumed();
        }
        Ok(())
    }

    pub fn stream_size(&self) -> Size {
        self.properties.lock().size
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.properties.lock().format
    }

    pub fn scale(&self) -> i32 {
        self.properties.lock().scale
    }

    pub fn set_scale(&self, scale: i32) {
        self.properties.lock().scale = scale;
    }

    pub fn compositor_acquire(&self) -> Result<AcquiredBuffer<Arc<Buffer>>, SwapQueueError> {
        self.queue.compositor_acquire()
    }

    pub fn try_compositor_acquire(&self) -> Option<AcquiredBuffer<Arc<Buffer>>> {
        self.queue.try_compositor_acquire()
    }

    pub fn compositor_release(&self, acquired: AcquiredBuffer<Arc<Buffer>>) -> Arc<Buffer> {
        self.queue.compositor_release(acquired)
    }

    /// Drops every queued buffer; returns how many were discarded.
    /// Drained frames are never drawn, so their completion runs now.
    pub fn drain(&self) -> usize {
        let drained = self.queue.drain();
        for buffer in &drained {
            buffer.mark_consumed();
        }
        if !drained.is_empty() {
            debug!("Drained {} buffers from stream {:?}", drained.len(), self.id);
        }
        drained.len()
    }

    /// Drains and unblocks every waiter; used when the owning surface dies
    pub fn shutdown(&self) {
        self.drain();
        self.queue.shutdown();
    }

    pub fn stats(&self) -> QueueStats {
        self.queue.stats()
    }
}

impl std::fmt::Debug for BufferStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferStream")
            .field("id", &self.id)
            .field("stats", &self.stats())
            .finish()
    }
}
