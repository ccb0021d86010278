//! Renderable buffers
//!
//! A [`Buffer`] is the server-side, renderable form of a client `wl_buffer`.
//! It is shared (`Arc`) between the surface's stream, the swap queue, and the
//! render thread; it lives as long as the longest holder. Two completion hooks
//! ride along:
//!
//! - `on_consumed` fires once, the first time the renderer reads or binds it
//! - `on_release` fires when the last reference is dropped
//!
//! Both are handed to the connection's [`Executor`], never run inline.

pub mod native;
pub mod shm;

use crate::executor::{Executor, Task};
use crate::format::{convert_to_rgba, PixelFormat};
use crate::geometry::Size;
use crate::import::image_cache::ImageCache;
use crate::import::{gpu::GpuImage, ImportError};
use crate::resource::{BackingId, Liveness};
use log::trace;
use native::NativeBufferHandle;
use parking_lot::Mutex;
use shm::ShmBufferHandle;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Server-side identity of an imported buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(u64);

impl BufferId {
    pub fn new_unique() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        BufferId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// Opaque client buffer handle as attached to a surface
#[derive(Debug, Clone, PartialEq)]
pub enum BufferHandle {
    Shm(ShmBufferHandle),
    Native(NativeBufferHandle),
}

impl BufferHandle {
    pub fn id(&self) -> BackingId {
        match self {
            BufferHandle::Shm(handle) => handle.id(),
            BufferHandle::Native(handle) => handle.id(),
        }
    }

    pub fn liveness(&self) -> &Liveness {
        match self {
            BufferHandle::Shm(handle) => handle.liveness(),
            BufferHandle::Native(handle) => handle.liveness(),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.liveness().is_alive()
    }
}

/// Which memory the buffer lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackingKind {
    SharedMemory,
    GpuNative,
}

pub(crate) enum Backing {
    /// Client shared memory, converted on the CPU when rendered
    Shm(ShmBufferHandle),
    /// Native buffer bound zero-copy through the image cache
    Gpu {
        handle: NativeBufferHandle,
        cache: Arc<ImageCache>,
    },
    /// Native buffer the GPU could not bind, read through its CPU mapping
    NativeCopy(NativeBufferHandle),
}

/// What the renderer gets out of a bound buffer
#[derive(Debug, Clone)]
pub enum Texture {
    Pixels { size: Size, rgba: Arc<Vec<u8>> },
    Image(Arc<GpuImage>),
}

impl Texture {
    pub fn size(&self) -> Size {
        match self {
            Texture::Pixels { size, .. } => *size,
            Texture::Image(image) => image.size,
        }
    }
}

pub struct Buffer {
    id: BufferId,
    size: Size,
    format: PixelFormat,
    backing: Backing,
    executor: Arc<dyn Executor>,
    on_consumed: Mutex<Option<Task>>,
    on_release: Mutex<Option<Task>>,
}

impl Buffer {
    pub(crate) fn new(
        size: Size,
        format: PixelFormat,
        backing: Backing,
        executor: Arc<dyn Executor>,
        on_consumed: Task,
        on_release: Option<Task>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: BufferId::new_unique(),
            size,
            format,
            backing,
            executor,
            on_consumed: Mutex::new(Some(on_consumed)),
            on_release: Mutex::new(on_release),
        })
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn size(&self) -> Size {
        self.size
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn kind(&self) -> BackingKind {
        match self.backing {
            Backing::Shm(_) | Backing::NativeCopy(_) => BackingKind::SharedMemory,
            Backing::Gpu { .. } => BackingKind::GpuNative,
        }
    }

    pub fn backing_id(&self) -> BackingId {
        match &self.backing {
            Backing::Shm(handle) => handle.id(),
            Backing::Gpu { handle, .. } | Backing::NativeCopy(handle) => handle.id(),
        }
    }

    /// Reads (software) or binds (hardware) the buffer contents for rendering
    pub fn bind(&self) -> Result<Texture, ImportError> {
        match &self.backing {
            Backing::Shm(handle) => {
                let rgba = handle
                    .pool()
                    .with_contents(|bytes| {
                        convert_to_rgba(
                            bytes,
                            handle.width(),
                            handle.height(),
                            handle.stride(),
                            handle.offset().max(0) as usize,
                            self.format,
                        )
                    })
                    .ok_or(ImportError::Unreadable(handle.id()))?;
                Ok(Texture::Pixels {
                    size: self.size,
                    rgba: Arc::new(rgba),
                })
            }
            Backing::Gpu { handle, cache } => Ok(Texture::Image(cache.get_or_create(handle)?)),
            Backing::NativeCopy(handle) => {
                let plane = handle
                    .planes()
                    .first()
                    .ok_or(ImportError::Unmappable(handle.id()))?;
                let memory = plane
                    .memory
                    .as_ref()
                    .ok_or(ImportError::Unmappable(handle.id()))?;
                let size = handle.size();
                let rgba = memory
                    .with_contents(|bytes| {
                        convert_to_rgba(
                            bytes,
                            size.width,
                            size.height,
                            plane.stride,
                            plane.offset.max(0) as usize,
                            self.format,
                        )
                    })
                    .ok_or(ImportError::Unreadable(handle.id()))?;
                Ok(Texture::Pixels {
                    size,
                    rgba: Arc::new(rgba),
                })
            }
        }
    }

    /// Signals that the renderer has consumed the contents. Only the first
    /// call schedules `on_consumed`.
    pub fn mark_consumed(&self) {
        if let Some(task) = self.on_consumed.lock().take() {
            trace!("Buffer {:?} consumed", self.id);
            self.executor.spawn(task);
        }
    }

    pub fn is_consumed(&self) -> bool {
        self.on_consumed.lock().is_none()
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Some(task) = self.on_release.get_mut().take() {
            trace!("Buffer {:?} released", self.id);
            self.executor.spawn(task);
        }
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("id", &self.id)
            .field("size", &self.size)
            .field("format", &self.format)
            .field("kind", &self.kind())
            .finish()
    }
}
