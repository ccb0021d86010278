//! Surface Commit State Machine
//!
//! A [`Surface`] collects requests into its pending [`SurfaceState`] and
//! turns them into [`CurrentState`] on commit, atomically. Surfaces live in
//! a [`SurfaceTable`] and refer to each other (parent, children) by
//! [`SurfaceId`], a slot index plus generation, so deferred work can tell a
//! live surface from a reused slot.
//!
//! ```text
//!   Unmapped ──(attach buffer + commit)──► Mapped ──(attach buffer + commit)──► Mapped
//!      ▲                                     │
//!      └────────(attach none + commit)───────┘
//! ```
//!
//! Destruction forces the unmapped teardown from any state.

pub mod callback;
pub mod role;
pub mod state;
pub mod table;

pub use callback::FrameCallback;
pub use role::{Role, SubsurfaceRole, ToplevelRole};
pub use state::{CurrentState, Pending, SurfaceState};
pub use table::{SharedSurfaceTable, SurfaceContext, SurfaceTable};

use crate::buffer::BufferHandle;
use crate::geometry::{Displacement, Point, Rectangle, Size};
use crate::protocol::ProtocolViolation;
use crate::resource::{CallbackToken, Liveness};
use crate::stream::BufferStream;
use log::{trace, warn};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use wayland_server::protocol::wl_output::Transform;
use wayland_server::WEnum;

/// Generational handle of a surface in a [`SurfaceTable`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId {
    index: u32,
    generation: u32,
}

impl SurfaceId {
    pub const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "wl_surface#{}.{}", self.index, self.generation)
    }
}

/// A frame callback waiting for a submitted frame to be consumed
#[derive(Debug)]
pub(crate) struct QueuedCallback {
    pub frame: u64,
    pub callback: FrameCallback,
}

pub struct Surface {
    id: SurfaceId,
    liveness: Liveness,
    pending: SurfaceState,
    current: CurrentState,
    pub(crate) role: Role,
    stream: Arc<BufferStream>,
    pub(crate) children: Vec<SurfaceId>,
    /// Offset from the parent, set through the subsurface role
    pub(crate) position: Point,
    pub(crate) frame_callbacks: VecDeque<QueuedCallback>,
    /// Frames handed to the stream, counting from 1
    pub(crate) submitted_frames: u64,
    /// Highest frame the renderer has consumed
    pub(crate) consumed_frames: u64,
}

impl Surface {
    pub(crate) fn new(id: SurfaceId, stream: Arc<BufferStream>) -> Self {
        Self {
            id,
            liveness: Liveness::new(),
            pending: SurfaceState::default(),
            current: CurrentState::default(),
            role: Role::Null,
            stream,
            children: Vec::new(),
            position: Point::default(),
            frame_callbacks: VecDeque::new(),
            submitted_frames: 0,
            consumed_frames: 0,
        }
    }

    pub fn id(&self) -> SurfaceId {
        self.id
    }

    pub fn liveness(&self) -> &Liveness {
        &self.liveness
    }

    pub fn pending(&self) -> &SurfaceState {
        &self.pending
    }

    pub fn current(&self) -> &CurrentState {
        &self.current
    }

    pub(crate) fn current_mut(&mut self) -> &mut CurrentState {
        &mut self.current
    }

    pub(crate) fn take_pending(&mut self) -> SurfaceState {
        std::mem::take(&mut self.pending)
    }

    pub fn role(&self) -> &Role {
        &self.role
    }

    pub fn stream(&self) -> &Arc<BufferStream> {
        &self.stream
    }

    /// Children in insertion order (bottom to top)
    pub fn children(&self) -> &[SurfaceId] {
        &self.children
    }

    pub fn position(&self) -> Point {
        self.position
    }

    pub fn is_mapped(&self) -> bool {
        self.current.is_mapped()
    }

    pub fn size(&self) -> Option<Size> {
        self.current.size()
    }

    /// Offset of the surface's content from its parent's origin
    pub fn total_offset(&self) -> Displacement {
        Displacement::new(self.position.x, self.position.y) + self.current.offset
    }

    /// Frames submitted but not yet consumed by the renderer
    pub fn frames_in_flight(&self) -> u64 {
        self.submitted_frames.saturating_sub(self.consumed_frames)
    }

    /// Frame callbacks still waiting for delivery
    pub fn waiting_callbacks(&self) -> usize {
        self.frame_callbacks.len()
    }

    /// Input rectangles in surface-local coordinates, clipped to the surface
    pub fn input_rectangles(&self) -> Vec<Rectangle> {
        let Some(size) = self.size() else {
            return Vec::new();
        };
        let bounds = Rectangle::new(Point::default(), size);
        match &self.current.input_shape {
            Some(shape) => shape
                .iter()
                .map(|rect| rect.intersection_with(&bounds))
                .filter(|rect| !rect.size.is_empty())
                .collect(),
            None => vec![bounds],
        }
    }

    // Pending-state requests. None of these take effect before commit.

    pub fn attach(&mut self, buffer: Option<BufferHandle>, x: i32, y: i32) {
        if x != 0 || y != 0 {
            self.set_offset(x, y);
        }
        self.pending.buffer = buffer.into();
    }

    /// Legacy attach offset; accepted but not applied
    pub fn set_offset(&mut self, dx: i32, dy: i32) {
        if dx != 0 || dy != 0 {
            warn!(
                "🟡 {}: non-zero attach offset ({}, {}) is not supported and was ignored",
                self.id, dx, dy
            );
        }
    }

    /// `wl_surface.offset`: moves the content relative to the surface origin
    pub fn set_pending_offset(&mut self, dx: i32, dy: i32) {
        self.pending.offset = Pending::Set(Displacement::new(dx, dy));
    }

    /// `None` resets to the whole surface, `Some(vec![])` accepts no input
    pub fn set_input_region(&mut self, region: Option<Vec<Rectangle>>) {
        self.pending.input_shape = region.into();
    }

    /// Recorded only; nothing is optimised with it
    pub fn set_opaque_region(&mut self, region: Option<Vec<Rectangle>>) {
        self.pending.opaque_shape = region.into();
    }

    pub fn set_buffer_scale(&mut self, scale: i32) -> Result<(), ProtocolViolation> {
        if scale < 1 {
            return Err(ProtocolViolation::InvalidScale(scale));
        }
        self.pending.scale = Pending::Set(scale);
        Ok(())
    }

    /// Recorded only; buffers are always drawn untransformed
    pub fn set_buffer_transform(&mut self, transform: WEnum<Transform>) {
        match transform {
            WEnum::Value(Transform::Normal) => {
                self.pending.transform = Pending::Set(Transform::Normal);
            }
            WEnum::Value(other) => {
                warn!("🟡 {}: buffer transform {:?} is not supported", self.id, other);
                self.pending.transform = Pending::Set(other);
            }
            WEnum::Unknown(raw) => {
                warn!("🟡 {}: unknown buffer transform {} ignored", self.id, raw);
            }
        }
    }

    pub fn add_frame_callback(&mut self, token: CallbackToken) -> FrameCallback {
        let callback = FrameCallback::new(token);
        self.pending.frame_callbacks.push(callback.clone());
        callback
    }

    /// Damage is not tracked; the whole buffer is redrawn
    pub fn damage(&mut self, area: Rectangle) {
        trace!("{}: damage {:?}", self.id, area);
    }

    pub fn damage_buffer(&mut self, area: Rectangle) {
        trace!("{}: buffer damage {:?}", self.id, area);
    }
}

impl fmt::Debug for Surface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Surface")
            .field("id", &self.id)
            .field("role", &self.role.name())
            .field("current", &self.current)
            .field("children", &self.children)
            .finish()
    }
}
