//! Double-buffered surface state
//!
//! Requests accumulate in a [`SurfaceState`] until commit. Every field is a
//! [`Pending`] tri-state: not sent this commit, explicitly cleared, or
//! explicitly set. "Cleared" and "not sent" must stay distinct; an input
//! region reset to the default is a real change, an untouched one is not.

use super::callback::FrameCallback;
use crate::buffer::{BufferHandle, BufferId};
use crate::geometry::{Displacement, Rectangle, Size};
use wayland_server::protocol::wl_output::Transform;

/// One uncommitted field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pending<T> {
    /// Not sent since the last commit
    Unset,
    /// Explicitly reset to the protocol default
    Cleared,
    /// Explicitly set
    Set(T),
}

impl<T> Default for Pending<T> {
    fn default() -> Self {
        Pending::Unset
    }
}

impl<T> Pending<T> {
    pub fn is_unset(&self) -> bool {
        matches!(self, Pending::Unset)
    }

    /// Takes `newer` unless it was never sent
    pub fn merge_from(&mut self, newer: Pending<T>) {
        if !newer.is_unset() {
            *self = newer;
        }
    }

    /// Folds the field into its committed form, keeping `current` when unset
    pub fn apply_to(self, current: &mut Option<T>) {
        match self {
            Pending::Unset => {}
            Pending::Cleared => *current = None,
            Pending::Set(value) => *current = Some(value),
        }
    }
}

impl<T> From<Option<T>> for Pending<T> {
    /// Requests carry `None` for "reset to default"
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => Pending::Set(value),
            None => Pending::Cleared,
        }
    }
}

/// Accumulated, uncommitted requests of one surface
#[derive(Debug, Default)]
pub struct SurfaceState {
    pub buffer: Pending<BufferHandle>,
    pub offset: Pending<Displacement>,
    pub input_shape: Pending<Vec<Rectangle>>,
    pub opaque_shape: Pending<Vec<Rectangle>>,
    pub scale: Pending<i32>,
    pub transform: Pending<Transform>,
    /// Appended across merges, never replaced
    pub frame_callbacks: Vec<FrameCallback>,
    surface_data_invalidated: bool,
}

impl SurfaceState {
    /// Merges a newer commit into this one (subsurface cached state)
    pub fn update_from(&mut self, newer: SurfaceState) {
        self.buffer.merge_from(newer.buffer);
        self.offset.merge_from(newer.offset);
        self.input_shape.merge_from(newer.input_shape);
        self.opaque_shape.merge_from(newer.opaque_shape);
        self.scale.merge_from(newer.scale);
        self.transform.merge_from(newer.transform);
        self.frame_callbacks.extend(newer.frame_callbacks);
        self.surface_data_invalidated |= newer.surface_data_invalidated;
    }

    /// Something that changes the composited layout happened outside the
    /// fields themselves (e.g. a subsurface moved)
    pub fn invalidate_surface_data(&mut self) {
        self.surface_data_invalidated = true;
    }

    /// Whether applying this state changes what the compositor must be told
    pub fn surface_data_needs_refresh(&self) -> bool {
        self.surface_data_invalidated || !self.offset.is_unset() || !self.input_shape.is_unset()
    }

    /// Drops fields that would not change `current`
    pub(crate) fn drop_unchanged(&mut self, current: &CurrentState) {
        if let Pending::Set(offset) = &self.offset {
            if *offset == current.offset {
                self.offset = Pending::Unset;
            }
        }

        let same_shape = match (&self.input_shape, &current.input_shape) {
            (Pending::Set(pending), Some(current)) => pending == current,
            (Pending::Cleared, None) => true,
            _ => false,
        };
        if same_shape {
            self.input_shape = Pending::Unset;
        }
    }
}

/// Last committed, compositor-visible attributes
#[derive(Debug, Clone, PartialEq)]
pub struct CurrentState {
    pub buffer: Option<BufferId>,
    /// Size of the attached buffer in buffer pixels; `None` when unmapped
    pub buffer_size: Option<Size>,
    pub offset: Displacement,
    /// `None` is the implicit whole-surface region, `Some(vec![])` accepts nothing
    pub input_shape: Option<Vec<Rectangle>>,
    pub opaque_shape: Option<Vec<Rectangle>>,
    pub scale: i32,
    pub transform: Transform,
}

impl Default for CurrentState {
    fn default() -> Self {
        Self {
            buffer: None,
            buffer_size: None,
            offset: Displacement::default(),
            input_shape: None,
            opaque_shape: None,
            scale: 1,
            transform: Transform::Normal,
        }
    }
}

impl CurrentState {
    pub fn is_mapped(&self) -> bool {
        self.buffer_size.is_some()
    }

    /// Mapped size in surface coordinates
    pub fn size(&self) -> Option<Size> {
        let scale = self.scale.max(1);
        self.buffer_size
            .map(|size| Size::new(size.width / scale, size.height / scale))
    }
}
