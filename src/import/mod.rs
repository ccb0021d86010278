//! Buffer Import Pipeline
//!
//! Turns an opaque client buffer handle into a renderable [`Buffer`]. The
//! strategy follows the backing kind:
//!
//! - **Shared memory** goes down the software path: stride and format are
//!   validated up front, pixels are read on the CPU when rendered.
//! - **Native GPU memory** tries the zero-copy path: if the session's GPU can
//!   bind the layout, the buffer is bound lazily through the [`ImageCache`].
//!   Otherwise the importer quietly falls back to reading the buffer's CPU
//!   mapping. Only when neither path works does the import fail.
//!
//! # Usage
//!
//! ```no_run
//! use axiom_surface::buffer::shm::ShmPool;
//! use axiom_surface::executor::LoopExecutor;
//! use axiom_surface::import::gpu::HeadlessGpu;
//! use axiom_surface::import::{BufferImporter, ImportConfig};
//! use std::sync::Arc;
//! use wayland_server::{protocol::wl_shm, WEnum};
//!
//! let executor = LoopExecutor::new();
//! let importer = BufferImporter::new(
//!     &ImportConfig::default(),
//!     Some(Arc::new(HeadlessGpu::new())),
//!     executor.clone(),
//! );
//!
//! let pool = ShmPool::new_anonymous(64 * 64 * 4).unwrap();
//! let handle = pool.create_buffer(0, 64, 64, 256, WEnum::Value(wl_shm::Format::Argb8888));
//! let buffer = importer.buffer_from_shm(&handle, Box::new(|| println!("consumed"))).unwrap();
//! assert_eq!(buffer.size().width, 64);
//! ```

pub mod gpu;
pub mod image_cache;

use crate::buffer::native::NativeBufferHandle;
use crate::buffer::shm::ShmBufferHandle;
use crate::buffer::{Backing, Buffer};
use crate::executor::{Executor, Task};
use crate::format::PixelFormat;
use crate::geometry::Size;
use crate::resource::BackingId;
use gpu::{GpuDevice, GpuError};
use image_cache::ImageCache;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error(
        "stride ({stride}) is less than width × bytes per pixel ({width}×{bytes_per_pixel}). \
         Did you accidentally specify stride in pixels?"
    )]
    InvalidStride {
        stride: i32,
        width: i32,
        bytes_per_pixel: usize,
    },
    #[error("{id}: {reason}")]
    InvalidGeometry { id: BackingId, reason: String },
    #[error("unsupported pixel format {0}")]
    UnsupportedFormat(String),
    #[error("{0} cannot be bound by the GPU and has no CPU mapping")]
    Unmappable(BackingId),
    #[error("contents of {0} lie outside its memory pool")]
    Unreadable(BackingId),
    #[error(transparent)]
    Gpu(#[from] GpuError),
}

/// Importer settings, passed explicitly rather than read from globals
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImportConfig {
    /// Try zero-copy binding of native buffers
    pub hardware: bool,

    /// Which device backs the hardware path ("headless" or "none")
    pub gpu: String,

    /// Upper bound on cached GPU images
    pub max_cached_images: usize,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            hardware: true,
            gpu: "headless".to_string(),
            max_cached_images: 64,
        }
    }
}

pub struct BufferImporter {
    executor: Arc<dyn Executor>,
    image_cache: Option<Arc<ImageCache>>,
}

impl BufferImporter {
    pub fn new(
        config: &ImportConfig,
        gpu: Option<Arc<dyn GpuDevice>>,
        executor: Arc<dyn Executor>,
    ) -> Self {
        let image_cache = match gpu {
            Some(gpu) if config.hardware => {
                info!("🎮 Hardware buffer import enabled on '{}' device", gpu.name());
                Some(Arc::new(ImageCache::new(gpu, config.max_cached_images)))
            }
            _ => {
                info!("💾 Hardware buffer import disabled, using software path only");
                None
            }
        };

        Self {
            executor,
            image_cache,
        }
    }

    pub fn image_cache(&self) -> Option<&Arc<ImageCache>> {
        self.image_cache.as_ref()
    }

    pub fn hardware_enabled(&self) -> bool {
        self.image_cache.is_some()
    }

    /// Software path for shared-memory buffers
    pub fn buffer_from_shm(
        &self,
        handle: &ShmBufferHandle,
        on_consumed: Task,
    ) -> Result<Arc<Buffer>, ImportError> {
        let format = PixelFormat::from_wl_shm(handle.format());
        if !format.is_valid() {
            return Err(ImportError::UnsupportedFormat(format!("{:?}", handle.format())));
        }

        if handle.width() <= 0 || handle.height() <= 0 {
            return Err(ImportError::InvalidGeometry {
                id: handle.id(),
                reason: format!("invalid size {}x{}", handle.width(), handle.height()),
            });
        }
        if handle.offset() < 0 {
            return Err(ImportError::InvalidGeometry {
                id: handle.id(),
                reason: format!("negative offset {}", handle.offset()),
            });
        }

        let bytes_per_pixel = format.bytes_per_pixel();
        if (handle.stride() as i64) < handle.width() as i64 * bytes_per_pixel as i64 {
            return Err(ImportError::InvalidStride {
                stride: handle.stride(),
                width: handle.width(),
                bytes_per_pixel,
            });
        }

        let end = handle.offset() as i64 + handle.stride() as i64 * handle.height() as i64;
        let pool_size = handle.pool().size() as i64;
        if end > pool_size {
            return Err(ImportError::InvalidGeometry {
                id: handle.id(),
                reason: format!("buffer ends at byte {} of a {} byte pool", end, pool_size),
            });
        }

        let buffer = Buffer::new(
            Size::new(handle.width(), handle.height()),
            format,
            Backing::Shm(handle.clone()),
            self.executor.clone(),
            on_consumed,
            None,
        );
        debug!("📥 Imported {} as sw buffer {:?}", handle.id(), buffer.id());
        Ok(buffer)
    }

    /// Hardware path for native buffers, with silent software fallback
    pub fn buffer_from_native(
        &self,
        handle: &NativeBufferHandle,
        on_consumed: Task,
        on_release: Task,
    ) -> Result<Arc<Buffer>, ImportError> {
        let format = PixelFormat::from_fourcc(handle.fourcc());
        let size = handle.size();
        if size.width <= 0 || size.height <= 0 {
            return Err(ImportError::InvalidGeometry {
                id: handle.id(),
                reason: format!("invalid size {}x{}", size.width, size.height),
            });
        }

        if let Some(cache) = &self.image_cache {
            if cache.gpu().supports(handle.fourcc(), handle.modifier()) {
                let buffer = Buffer::new(
                    handle.size(),
                    format,
                    Backing::Gpu {
                        handle: handle.clone(),
                        cache: cache.clone(),
                    },
                    self.executor.clone(),
                    on_consumed,
                    Some(on_release),
                );
                debug!("📥 Imported {} as hw buffer {:?}", handle.id(), buffer.id());
                return Ok(buffer);
            }
            info!(
                "🟡 GPU cannot bind {:?}, falling back to software import",
                handle
            );
        }

        if !format.is_valid() {
            return Err(ImportError::UnsupportedFormat(format!(
                "fourcc 0x{:08X}",
                handle.fourcc()
            )));
        }
        if !handle.cpu_mappable() {
            return Err(ImportError::Unmappable(handle.id()));
        }

        let buffer = Buffer::new(
            handle.size(),
            format,
            Backing::NativeCopy(handle.clone()),
            self.executor.clone(),
            on_consumed,
            Some(on_release),
        );
        debug!("📥 Imported {} as sw copy buffer {:?}", handle.id(), buffer.id());
        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::native::{NativePlane, MODIFIER_INVALID, MODIFIER_LINEAR};
    use crate::buffer::shm::ShmPool;
    use crate::buffer::BackingKind;
    use crate::executor::LoopExecutor;
    use crate::format::fourcc;
    use gpu::HeadlessGpu;
    use wayland_server::{protocol::wl_shm, WEnum};

    fn importer(hardware: bool) -> (BufferImporter, Arc<LoopExecutor>) {
        let executor = LoopExecutor::new();
        let config = ImportConfig {
            hardware,
            ..ImportConfig::default()
        };
        let importer =
            BufferImporter::new(&config, Some(Arc::new(HeadlessGpu::new())), executor.clone());
        (importer, executor)
    }

    #[test]
    fn test_stride_validation() {
        let (importer, _) = importer(false);
        let pool = ShmPool::new_anonymous(64).unwrap();

        let bad = pool.create_buffer(0, 4, 1, 8, WEnum::Value(wl_shm::Format::Argb8888));
        match importer.buffer_from_shm(&bad, Box::new(|| {})) {
            Err(ImportError::InvalidStride {
                stride,
                width,
                bytes_per_pixel,
            }) => {
                assert_eq!((stride, width, bytes_per_pixel), (8, 4, 4));
            }
            other => panic!("expected InvalidStride, got {:?}", other.map(|b| b.id())),
        }

        let good = pool.create_buffer(0, 4, 1, 16, WEnum::Value(wl_shm::Format::Argb8888));
        let buffer = importer.buffer_from_shm(&good, Box::new(|| {})).unwrap();
        assert_eq!(buffer.size(), Size::new(4, 1));
        assert_eq!(buffer.format(), PixelFormat::Argb8888);
        assert_eq!(buffer.kind(), BackingKind::SharedMemory);
    }

    #[test]
    fn test_shm_geometry_validation() {
        let (importer, _) = importer(false);
        let pool = ShmPool::new_anonymous(64).unwrap();
        let argb = WEnum::Value(wl_shm::Format::Argb8888);

        for handle in [
            pool.create_buffer(0, 0, 4, 16, argb),
            pool.create_buffer(0, -4, -4, 16, argb),
            pool.create_buffer(-16, 4, 1, 16, argb),
            pool.create_buffer(0, 4, 5, 16, argb),
            pool.create_buffer(56, 4, 1, 16, argb),
        ] {
            assert!(matches!(
                importer.buffer_from_shm(&handle, Box::new(|| {})),
                Err(ImportError::InvalidGeometry { .. })
            ));
        }

        // Exactly fills the pool
        let last_row = pool.create_buffer(48, 4, 1, 16, argb);
        assert!(importer.buffer_from_shm(&last_row, Box::new(|| {})).is_ok());
    }

    #[test]
    fn test_unknown_shm_format_is_rejected() {
        let (importer, _) = importer(false);
        let pool = ShmPool::new_anonymous(64).unwrap();
        let handle = pool.create_buffer(0, 4, 1, 16, WEnum::Unknown(0x1234));
        assert!(matches!(
            importer.buffer_from_shm(&handle, Box::new(|| {})),
            Err(ImportError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_native_hardware_path() {
        let (importer, _) = importer(true);
        let handle = NativeBufferHandle::new(Size::new(8, 8), fourcc::XRGB8888, MODIFIER_INVALID, vec![]);
        let buffer = importer
            .buffer_from_native(&handle, Box::new(|| {}), Box::new(|| {}))
            .unwrap();
        assert_eq!(buffer.kind(), BackingKind::GpuNative);
    }

    #[test]
    fn test_native_falls_back_to_software() {
        let (importer, _) = importer(true);
        let pool = ShmPool::new_anonymous(8 * 8 * 2).unwrap();
        let handle = NativeBufferHandle::new(
            Size::new(8, 8),
            fourcc::RGB565,
            MODIFIER_LINEAR,
            vec![NativePlane {
                offset: 0,
                stride: 16,
                memory: Some(pool),
            }],
        );
        let buffer = importer
            .buffer_from_native(&handle, Box::new(|| {}), Box::new(|| {}))
            .unwrap();
        assert_eq!(buffer.kind(), BackingKind::SharedMemory);
        assert!(matches!(buffer.bind(), Ok(crate::buffer::Texture::Pixels { .. })));
    }

    #[test]
    fn test_native_without_any_path_fails() {
        let (importer, _) = importer(false);
        let handle = NativeBufferHandle::new(Size::new(8, 8), fourcc::XRGB8888, MODIFIER_INVALID, vec![]);
        assert!(matches!(
            importer.buffer_from_native(&handle, Box::new(|| {}), Box::new(|| {})),
            Err(ImportError::Unmappable(_))
        ));
    }

    #[test]
    fn test_release_runs_through_executor_on_last_drop() {
        let (importer, executor) = importer(true);
        let released = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = released.clone();
        let handle = NativeBufferHandle::new(Size::new(8, 8), fourcc::XRGB8888, MODIFIER_LINEAR, vec![]);

        let buffer = importer
            .buffer_from_native(
                &handle,
                Box::new(|| {}),
                Box::new(move || flag.store(true, std::sync::atomic::Ordering::SeqCst)),
            )
            .unwrap();
        let second_holder = buffer.clone();

        drop(buffer);
        assert_eq!(executor.pending(), 0);
        drop(second_holder);
        assert_eq!(executor.pending(), 1);
        assert!(!released.load(std::sync::atomic::Ordering::SeqCst));

        executor.run_pending();
        assert!(released.load(std::sync::atomic::Ordering::SeqCst));
    }
}
