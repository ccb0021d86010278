//! Externally shareable GPU buffers (dmabuf-style handles)

use super::shm::ShmPool;
use crate::geometry::Size;
use crate::resource::{BackingId, Liveness};
use std::sync::Arc;

/// Linear (untiled) layout modifier
pub const MODIFIER_LINEAR: u64 = 0;
/// Driver-chosen layout the importer cannot reason about
pub const MODIFIER_INVALID: u64 = 0x00ff_ffff_ffff_ffff;

/// One plane of a native buffer
#[derive(Clone)]
pub struct NativePlane {
    pub offset: i32,
    pub stride: i32,
    /// CPU mapping of the plane, when the exporter allows one.
    /// Only linear single-plane buffers with a mapping can fall back to the
    /// software path.
    pub memory: Option<Arc<ShmPool>>,
}

struct NativeBufferInner {
    id: BackingId,
    size: Size,
    fourcc: u32,
    modifier: u64,
    planes: Vec<NativePlane>,
    liveness: Liveness,
}

/// Opaque client handle to a GPU-native `wl_buffer`
#[derive(Clone)]
pub struct NativeBufferHandle {
    inner: Arc<NativeBufferInner>,
}

impl NativeBufferHandle {
    pub fn new(size: Size, fourcc: u32, modifier: u64, planes: Vec<NativePlane>) -> Self {
        Self {
            inner: Arc::new(NativeBufferInner {
                id: BackingId::new_unique(),
                size,
                fourcc,
                modifier,
                planes,
                liveness: Liveness::new(),
            }),
        }
    }

    pub fn id(&self) -> BackingId {
        self.inner.id
    }

    pub fn size(&self) -> Size {
        self.inner.size
    }

    pub fn fourcc(&self) -> u32 {
        self.inner.fourcc
    }

    pub fn modifier(&self) -> u64 {
        self.inner.modifier
    }

    pub fn planes(&self) -> &[NativePlane] {
        &self.inner.planes
    }

    /// Whether the software path can read this buffer directly
    pub fn cpu_mappable(&self) -> bool {
        self.inner.modifier == MODIFIER_LINEAR
            && self.inner.planes.len() == 1
            && self.inner.planes[0].memory.is_some()
    }

    pub fn liveness(&self) -> &Liveness {
        &self.inner.liveness
    }

    pub fn is_alive(&self) -> bool {
        self.inner.liveness.is_alive()
    }

    /// The client destroyed the `wl_buffer`; cached GPU images become stale
    pub fn destroy(&self) {
        self.inner.liveness.destroy();
    }
}

impl std::fmt::Debug for NativeBufferHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeBufferHandle")
            .field("id", &self.inner.id)
            .field("size", &self.inner.size)
            .field("fourcc", &format_args!("0x{:08X}", self.inner.fourcc))
            .field("modifier", &format_args!("0x{:016X}", self.inner.modifier))
            .field("planes", &self.inner.planes.len())
            .finish()
    }
}

impl PartialEq for NativeBufferHandle {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::fourcc;

    #[test]
    fn test_cpu_mappable_requires_linear_single_mapped_plane() {
        let pool = ShmPool::new_anonymous(64).unwrap();
        let mapped = NativePlane {
            offset: 0,
            stride: 16,
            memory: Some(pool),
        };
        let unmapped = NativePlane {
            offset: 0,
            stride: 16,
            memory: None,
        };

        let linear = NativeBufferHandle::new(
            Size::new(4, 4),
            fourcc::XRGB8888,
            MODIFIER_LINEAR,
            vec![mapped.clone()],
        );
        assert!(linear.cpu_mappable());

        let tiled = NativeBufferHandle::new(
            Size::new(4, 4),
            fourcc::XRGB8888,
            MODIFIER_INVALID,
            vec![mapped],
        );
        assert!(!tiled.cpu_mappable());

        let opaque =
            NativeBufferHandle::new(Size::new(4, 4), fourcc::XRGB8888, MODIFIER_LINEAR, vec![unmapped]);
        assert!(!opaque.cpu_mappable());
    }
}
