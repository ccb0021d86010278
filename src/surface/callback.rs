//! Frame callbacks (`wl_callback` from `wl_surface.frame`)

use crate::resource::{CallbackToken, Liveness};

/// One-shot "your frame is on screen" signal
#[derive(Debug, Clone)]
pub struct FrameCallback {
    token: CallbackToken,
    liveness: Liveness,
}

impl FrameCallback {
    pub fn new(token: CallbackToken) -> Self {
        Self {
            token,
            liveness: Liveness::new(),
        }
    }

    pub fn token(&self) -> CallbackToken {
        self.token
    }

    /// Destroying the liveness handle suppresses delivery
    pub fn liveness(&self) -> &Liveness {
        &self.liveness
    }

    pub fn is_alive(&self) -> bool {
        self.liveness.is_alive()
    }
}
