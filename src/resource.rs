//! Client resource identity and liveness tracking
//!
//! Completion work scheduled on behalf of a client resource (frame callbacks,
//! buffer release notifications) may run after the client destroyed that
//! resource. Instead of holding the resource itself, deferred work captures a
//! [`Liveness`] flag and checks it at fire time.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Shared "has the client destroyed this object" flag
#[derive(Debug, Clone, Default)]
pub struct Liveness {
    destroyed: Arc<AtomicBool>,
}

impl Liveness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_alive(&self) -> bool {
        !self.destroyed.load(Ordering::Acquire)
    }

    /// Marks the resource destroyed; every clone observes it
    pub fn destroy(&self) {
        self.destroyed.store(true, Ordering::Release);
    }

    /// Wraps `task` so it becomes a no-op once the resource is gone
    pub fn run_unless_destroyed<F>(&self, task: F) -> impl FnOnce() + Send + 'static
    where
        F: FnOnce() + Send + 'static,
    {
        let liveness = self.clone();
        move || {
            if liveness.is_alive() {
                task();
            }
        }
    }
}

/// Identity of client-supplied backing memory (a `wl_buffer`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BackingId(u64);

impl BackingId {
    pub fn new_unique() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        BackingId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for BackingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "wl_buffer#{}", self.0)
    }
}

/// Client token identifying one `wl_callback`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallbackToken(pub u32);
