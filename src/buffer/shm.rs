//! Shared-memory pools and the buffers carved out of them

use crate::resource::{BackingId, Liveness};
use memmap2::{MmapMut, MmapOptions};
use parking_lot::RwLock;
use std::fs::File;
use std::io;
use std::sync::Arc;
use wayland_server::{protocol::wl_shm, WEnum};

/// A client memory pool (`wl_shm_pool`) mapped into the server
pub struct ShmPool {
    map: RwLock<MmapMut>,
}

impl ShmPool {
    /// Maps an anonymous pool; used by in-process clients and tests
    pub fn new_anonymous(size: usize) -> io::Result<Arc<Self>> {
        let map = MmapMut::map_anon(size)?;
        Ok(Arc::new(Self {
            map: RwLock::new(map),
        }))
    }

    /// Maps a pool from a client-provided file descriptor
    pub fn from_file(file: &File, size: usize) -> io::Result<Arc<Self>> {
        // SAFETY: the client may write to the pool at any time; contents are
        // only ever copied out and torn reads are tolerated.
        let map = unsafe { MmapOptions::new().len(size).map_mut(file)? };
        Ok(Arc::new(Self {
            map: RwLock::new(map),
        }))
    }

    pub fn size(&self) -> usize {
        self.map.read().len()
    }

    /// Writes client pixels into the pool. Returns false if out of bounds.
    pub fn write(&self, offset: usize, bytes: &[u8]) -> bool {
        let mut map = self.map.write();
        match offset.checked_add(bytes.len()) {
            Some(end) if end <= map.len() => {
                map[offset..end].copy_from_slice(bytes);
                true
            }
            _ => false,
        }
    }

    /// Runs `f` over the pool contents under a read lock
    pub fn with_contents<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let map = self.map.read();
        f(&map[..])
    }

    /// Equivalent of `wl_shm_pool.create_buffer`
    pub fn create_buffer(
        self: &Arc<Self>,
        offset: i32,
        width: i32,
        height: i32,
        stride: i32,
        format: WEnum<wl_shm::Format>,
    ) -> ShmBufferHandle {
        ShmBufferHandle {
            inner: Arc::new(ShmBufferInner {
                id: BackingId::new_unique(),
                pool: self.clone(),
                offset,
                width,
                height,
                stride,
                format,
                liveness: Liveness::new(),
            }),
        }
    }
}

struct ShmBufferInner {
    id: BackingId,
    pool: Arc<ShmPool>,
    offset: i32,
    width: i32,
    height: i32,
    stride: i32,
    format: WEnum<wl_shm::Format>,
    liveness: Liveness,
}

/// Opaque client handle to a shared-memory `wl_buffer`
#[derive(Clone)]
pub struct ShmBufferHandle {
    inner: Arc<ShmBufferInner>,
}

impl ShmBufferHandle {
    pub fn id(&self) -> BackingId {
        self.inner.id
    }

    pub fn pool(&self) -> &Arc<ShmPool> {
        &self.inner.pool
    }

    pub fn offset(&self) -> i32 {
        self.inner.offset
    }

    pub fn width(&self) -> i32 {
        self.inner.width
    }

    pub fn height(&self) -> i32 {
        self.inner.height
    }

    pub fn stride(&self) -> i32 {
        self.inner.stride
    }

    pub fn format(&self) -> WEnum<wl_shm::Format> {
        self.inner.format
    }

    pub fn liveness(&self) -> &Liveness {
        &self.inner.liveness
    }

    /// The client destroyed the `wl_buffer`
    pub fn destroy(&self) {
        self.inner.liveness.destroy();
    }
}

impl std::fmt::Debug for ShmBufferHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShmBufferHandle")
            .field("id", &self.inner.id)
            .field("width", &self.inner.width)
            .field("height", &self.inner.height)
            .field("stride", &self.inner.stride)
            .field("format", &self.inner.format)
            .finish()
    }
}

impl PartialEq for ShmBufferHandle {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}
