//! Surface roles
//!
//! A surface has exactly one role at a time. The role decides what a commit
//! means: a toplevel applies it and republishes its scene data, a
//! synchronized subsurface holds it until the parent commits, and the null
//! role applies it without telling anyone.

use super::state::SurfaceState;
use super::SurfaceId;
use crate::geometry::Point;
use crate::scene::SceneSurface;
use std::sync::Arc;

#[derive(Debug, Default)]
pub enum Role {
    /// No role yet, or the role object was destroyed
    #[default]
    Null,
    Toplevel(ToplevelRole),
    Subsurface(SubsurfaceRole),
}

impl Role {
    pub fn name(&self) -> &'static str {
        match self {
            Role::Null => "null",
            Role::Toplevel(_) => "toplevel",
            Role::Subsurface(_) => "subsurface",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Role::Null)
    }
}

/// Root of a composition tree, published to the compositor
#[derive(Debug)]
pub struct ToplevelRole {
    pub scene_surface: Arc<SceneSurface>,
}

#[derive(Debug)]
pub struct SubsurfaceRole {
    pub parent: SurfaceId,
    /// Subsurfaces start synchronized
    pub synchronized: bool,
    /// Commits held back until the parent commits
    pub cached: Option<SurfaceState>,
    /// `set_position` waiting for the parent's next commit
    pub pending_position: Option<Point>,
}

impl SubsurfaceRole {
    pub fn new(parent: SurfaceId) -> Self {
        Self {
            parent,
            synchronized: true,
            cached: None,
            pending_position: None,
        }
    }

    /// Stores a commit for the parent's next commit, merging with any
    /// earlier one still waiting
    pub fn cache(&mut self, state: SurfaceState) {
        match &mut self.cached {
            Some(cached) => cached.update_from(state),
            None => self.cached = Some(state),
        }
    }
}
