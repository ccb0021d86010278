//! GPU image cache for native buffers
//!
//! Binding a native buffer to a GPU image is expensive, and clients cycle
//! through a small set of buffers. The cache creates an image the first time
//! a backing buffer is rendered and hands the same image back for every later
//! frame that references that backing memory.
//!
//! # Invalidation
//!
//! An entry dies with its backing buffer: lookups of a destroyed handle drop
//! the entry, and [`ImageCache::purge_destroyed`] sweeps the rest once per
//! composited frame.

use super::gpu::{GpuDevice, GpuError, GpuImage};
use crate::buffer::native::NativeBufferHandle;
use crate::resource::{BackingId, Liveness};
use log::{debug, info};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// Statistics about cache effectiveness
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Images currently cached
    pub cached: usize,
    /// Lookups satisfied from the cache
    pub hits: u64,
    /// Lookups that bound a new image
    pub misses: u64,
    /// Entries dropped because the backing was destroyed
    pub invalidations: u64,
    /// Entries dropped to stay under the size limit
    pub evictions: u64,
}

impl CacheStats {
    /// Calculates cache hit rate
    pub fn hit_rate(&self) -> f32 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            return 0.0;
        }
        (self.hits as f32 / lookups as f32) * 100.0
    }
}

struct CachedImage {
    image: Arc<GpuImage>,
    liveness: Liveness,
}

#[derive(Default)]
struct CacheState {
    images: HashMap<BackingId, CachedImage>,
    /// Insertion order, oldest first
    order: VecDeque<BackingId>,
    stats: CacheStats,
}

pub struct ImageCache {
    gpu: Arc<dyn GpuDevice>,
    max_entries: usize,
    state: Mutex<CacheState>,
}

impl ImageCache {
    pub fn new(gpu: Arc<dyn GpuDevice>, max_entries: usize) -> Self {
        Self {
            gpu,
            max_entries: max_entries.max(1),
            state: Mutex::new(CacheState::default()),
        }
    }

    pub fn gpu(&self) -> &Arc<dyn GpuDevice> {
        &self.gpu
    }

    /// Returns the image bound to `handle`, creating it on first use
    pub fn get_or_create(&self, handle: &NativeBufferHandle) -> Result<Arc<GpuImage>, GpuError> {
        let id = handle.id();
        let mut state = self.state.lock();

        if !handle.is_alive() {
            Self::remove_entry(&mut state, id);
            return Err(GpuError::BackingDestroyed(id));
        }

        if let Some(cached) = state.images.get(&id) {
            let image = cached.image.clone();
            state.stats.hits += 1;
            return Ok(image);
        }

        state.stats.misses += 1;
        let image = Arc::new(self.gpu.create_image(handle)?);
        debug!("🆕 Image cache miss for {} (image {})", id, image.id);

        state.images.insert(
            id,
            CachedImage {
                image: image.clone(),
                liveness: handle.liveness().clone(),
            },
        );
        state.order.push_back(id);

        while state.images.len() > self.max_entries {
            let Some(oldest) = state.order.pop_front() else {
                break;
            };
            if state.images.remove(&oldest).is_some() {
                state.stats.evictions += 1;
                debug!("🗑️ Evicted cached image for {}", oldest);
            }
        }
        state.stats.cached = state.images.len();

        Ok(image)
    }

    /// Drops the image for a backing buffer the client destroyed
    pub fn invalidate(&self, id: BackingId) {
        let mut state = self.state.lock();
        Self::remove_entry(&mut state, id);
    }

    /// Drops every image whose backing buffer has been destroyed
    pub fn purge_destroyed(&self) -> usize {
        let mut state = self.state.lock();
        let dead: Vec<BackingId> = state
            .images
            .iter()
            .filter(|(_, cached)| !cached.liveness.is_alive())
            .map(|(id, _)| *id)
            .collect();

        for id in &dead {
            Self::remove_entry(&mut state, *id);
        }
        if !dead.is_empty() {
            info!("🧹 Purged {} images of destroyed buffers", dead.len());
        }
        dead.len()
    }

    pub fn len(&self) -> usize {
        self.state.lock().images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        self.state.lock().stats.clone()
    }

    fn remove_entry(state: &mut CacheState, id: BackingId) {
        if state.images.remove(&id).is_some() {
            state.order.retain(|entry| *entry != id);
            state.stats.invalidations += 1;
            state.stats.cached = state.images.len();
        }
    }
}
