//! Decoded client requests handled by the surface core

use crate::buffer::BufferHandle;
use crate::geometry::{Point, Rectangle};
use crate::resource::CallbackToken;
use crate::surface::SurfaceId;
use wayland_server::protocol::wl_output;
use wayland_server::WEnum;

#[derive(Debug, Clone)]
pub enum Request {
    /// `wl_surface.attach`; `x`/`y` is the legacy attach offset
    Attach {
        surface: SurfaceId,
        buffer: Option<BufferHandle>,
        x: i32,
        y: i32,
    },
    Damage {
        surface: SurfaceId,
        area: Rectangle,
    },
    DamageBuffer {
        surface: SurfaceId,
        area: Rectangle,
    },
    /// `None` resets to the implicit whole-surface region
    SetInputRegion {
        surface: SurfaceId,
        region: Option<Vec<Rectangle>>,
    },
    SetOpaqueRegion {
        surface: SurfaceId,
        region: Option<Vec<Rectangle>>,
    },
    Frame {
        surface: SurfaceId,
        callback: CallbackToken,
    },
    SetBufferScale {
        surface: SurfaceId,
        scale: i32,
    },
    SetBufferTransform {
        surface: SurfaceId,
        transform: WEnum<wl_output::Transform>,
    },
    /// `wl_surface.offset`
    Offset {
        surface: SurfaceId,
        dx: i32,
        dy: i32,
    },
    Commit {
        surface: SurfaceId,
    },
    /// Gives the surface a toplevel role on `output`
    GetToplevel {
        surface: SurfaceId,
        output: usize,
    },
    /// `wl_subcompositor.get_subsurface`
    GetSubsurface {
        surface: SurfaceId,
        parent: SurfaceId,
    },
    SetPosition {
        surface: SurfaceId,
        position: Point,
    },
    SetSync {
        surface: SurfaceId,
    },
    SetDesync {
        surface: SurfaceId,
    },
    /// Role object destroyed; the surface reverts to having no role
    ClearRole {
        surface: SurfaceId,
    },
    Destroy {
        surface: SurfaceId,
    },
}

impl Request {
    pub fn surface(&self) -> SurfaceId {
        match self {
            Request::Attach { surface, .. }
            | Request::Damage { surface, .. }
            | Request::DamageBuffer { surface, .. }
            | Request::SetInputRegion { surface, .. }
            | Request::SetOpaqueRegion { surface, .. }
            | Request::Frame { surface, .. }
            | Request::SetBufferScale { surface, .. }
            | Request::SetBufferTransform { surface, .. }
            | Request::Offset { surface, .. }
            | Request::Commit { surface }
            | Request::GetToplevel { surface, .. }
            | Request::GetSubsurface { surface, .. }
            | Request::SetPosition { surface, .. }
            | Request::SetSync { surface }
            | Request::SetDesync { surface }
            | Request::ClearRole { surface }
            | Request::Destroy { surface } => *surface,
        }
    }
}
