//! GPU device seam for the zero-copy import path
//!
//! The importer never talks to a driver directly. It is handed a
//! [`GpuDevice`] at construction, scoped to the session, which answers
//! capability queries and binds native buffers to images.

use crate::buffer::native::{NativeBufferHandle, MODIFIER_INVALID, MODIFIER_LINEAR};
use crate::format::fourcc;
use crate::geometry::Size;
use crate::resource::BackingId;
use log::debug;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GpuError {
    #[error("GPU cannot import fourcc 0x{fourcc:08X} with modifier 0x{modifier:016X}")]
    UnsupportedLayout { fourcc: u32, modifier: u64 },
    #[error("failed to create GPU image for {0}")]
    ImageCreation(BackingId),
    #[error("backing buffer {0} was destroyed")]
    BackingDestroyed(BackingId),
}

/// A native buffer bound as a sampleable GPU image
#[derive(Debug)]
pub struct GpuImage {
    pub id: u64,
    pub backing: BackingId,
    pub size: Size,
    pub fourcc: u32,
}

pub trait GpuDevice: Send + Sync {
    fn name(&self) -> &str;

    /// Whether a buffer with this layout can be bound without a copy
    fn supports(&self, fourcc: u32, modifier: u64) -> bool;

    fn create_image(&self, handle: &NativeBufferHandle) -> Result<GpuImage, GpuError>;
}

/// Device used when no display hardware is present: images are bookkeeping only
pub struct HeadlessGpu {
    formats: Vec<u32>,
    next_image: AtomicU64,
    images_created: AtomicU64,
}

impl HeadlessGpu {
    pub fn new() -> Self {
        Self::with_formats(vec![
            fourcc::XRGB8888,
            fourcc::ARGB8888,
            fourcc::XBGR8888,
            fourcc::ABGR8888,
        ])
    }

    pub fn with_formats(formats: Vec<u32>) -> Self {
        Self {
            formats,
            next_image: AtomicU64::new(1),
            images_created: AtomicU64::new(0),
        }
    }

    /// Number of images bound so far; lets callers observe cache reuse
    pub fn images_created(&self) -> u64 {
        self.images_created.load(Ordering::Relaxed)
    }
}

impl Default for HeadlessGpu {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuDevice for HeadlessGpu {
    fn name(&self) -> &str {
        "headless"
    }

    fn supports(&self, fourcc: u32, modifier: u64) -> bool {
        self.formats.contains(&fourcc) && (modifier == MODIFIER_LINEAR || modifier == MODIFIER_INVALID)
    }

    fn create_image(&self, handle: &NativeBufferHandle) -> Result<GpuImage, GpuError> {
        if !handle.is_alive() {
            return Err(GpuError::BackingDestroyed(handle.id()));
        }
        if !self.supports(handle.fourcc(), handle.modifier()) {
            return Err(GpuError::UnsupportedLayout {
                fourcc: handle.fourcc(),
                modifier: handle.modifier(),
            });
        }

        let id = self.next_image.fetch_add(1, Ordering::Relaxed);
        self.images_created.fetch_add(1, Ordering::Relaxed);
        debug!("🖼️ Bound {} as headless image {}", handle.id(), id);
        Ok(GpuImage {
            id,
            backing: handle.id(),
            size: handle.size(),
            fourcc: handle.fourcc(),
        })
    }
}
