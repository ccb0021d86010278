//! Per-connection request dispatch
//!
//! A [`ClientSession`] is the serialized context a client's requests run on.
//! It owns the client's [`SurfaceTable`] and forwards decoded requests to
//! it. A [`ProtocolViolation`] is reported to the client as a protocol error
//! event and then the connection is torn down: every surface is destroyed,
//! their streams drained, and later requests are dropped.

use crate::protocol::{ClientEvent, ProtocolViolation, Request};
use crate::resource::CallbackToken;
use crate::surface::{FrameCallback, SharedSurfaceTable, SurfaceContext, SurfaceId, SurfaceTable};
use log::{debug, error, info};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(u64);

pub struct ClientSession {
    id: ClientId,
    table: SharedSurfaceTable,
    connected: bool,
}

impl ClientSession {
    pub fn new(ctx: SurfaceContext) -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        let id = ClientId(NEXT.fetch_add(1, Ordering::Relaxed));
        info!("🔌 Client {:?} connected", id);

        Self {
            id,
            table: SurfaceTable::new_shared(ctx),
            connected: true,
        }
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn table(&self) -> &SharedSurfaceTable {
        &self.table
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// `wl_compositor.create_surface`
    pub fn create_surface(&mut self) -> Result<SurfaceId, ProtocolViolation> {
        if !self.connected {
            return Err(ProtocolViolation::InvalidObject("connection closed".into()));
        }
        let result = self.table.lock().create();
        self.check(result)
    }

    /// `wl_surface.frame`; the returned callback can be destroyed by the client
    pub fn frame(&mut self, surface: SurfaceId, token: CallbackToken) -> Result<FrameCallback, ProtocolViolation> {
        if !self.connected {
            return Err(ProtocolViolation::InvalidObject("connection closed".into()));
        }
        let result = self
            .table
            .lock()
            .get_mut(surface)
            .map(|surface| surface.add_frame_callback(token));
        self.check(result)
    }

    /// Handles one request. After a violation the connection is closed and
    /// further requests are ignored.
    pub fn dispatch(&mut self, request: Request) -> Result<(), ProtocolViolation> {
        if !self.connected {
            debug!("Dropping {:?} from disconnected client {:?}", request, self.id);
            return Ok(());
        }

        let result = Self::handle(&self.table, request);
        self.check(result)
    }

    fn handle(table: &SharedSurfaceTable, request: Request) -> Result<(), ProtocolViolation> {
        let mut table = table.lock();
        match request {
            Request::Attach { surface, buffer, x, y } => table.get_mut(surface)?.attach(buffer, x, y),
            Request::Damage { surface, area } => table.get_mut(surface)?.damage(area),
            Request::DamageBuffer { surface, area } => table.get_mut(surface)?.damage_buffer(area),
            Request::SetInputRegion { surface, region } => {
                table.get_mut(surface)?.set_input_region(region)
            }
            Request::SetOpaqueRegion { surface, region } => {
                table.get_mut(surface)?.set_opaque_region(region)
            }
            Request::Frame { surface, callback } => {
                table.get_mut(surface)?.add_frame_callback(callback);
            }
            Request::SetBufferScale { surface, scale } => {
                table.get_mut(surface)?.set_buffer_scale(scale)?
            }
            Request::SetBufferTransform { surface, transform } => {
                table.get_mut(surface)?.set_buffer_transform(transform)
            }
            Request::Offset { surface, dx, dy } => table.get_mut(surface)?.set_pending_offset(dx, dy),
            Request::Commit { surface } => table.commit(surface)?,
            Request::GetToplevel { surface, output } => {
                table.make_toplevel(surface, output)?;
            }
            Request::GetSubsurface { surface, parent } => table.make_subsurface(surface, parent)?,
            Request::SetPosition { surface, position } => {
                table.set_subsurface_position(surface, position)?
            }
            Request::SetSync { surface } => table.set_sync(surface)?,
            Request::SetDesync { surface } => table.set_desync(surface)?,
            Request::ClearRole { surface } => table.clear_role(surface)?,
            Request::Destroy { surface } => table.destroy(surface)?,
        }
        Ok(())
    }

    fn check<T>(&mut self, result: Result<T, ProtocolViolation>) -> Result<T, ProtocolViolation> {
        if let Err(violation) = &result {
            self.post_error(violation);
        }
        result
    }

    fn post_error(&mut self, violation: &ProtocolViolation) {
        error!(
            "❌ Protocol error from client {:?} ({}): {}",
            self.id,
            violation.code(),
            violation
        );
        self.table
            .lock()
            .context()
            .events
            .send_event(ClientEvent::protocol_error(violation));
        self.disconnect();
    }

    /// Tears the connection down, destroying every surface
    pub fn disconnect(&mut self) {
        if !self.connected {
            return;
        }
        self.connected = false;

        let mut table = self.table.lock();
        let count = table.len();
        table.destroy_all();
        info!("🔌 Client {:?} disconnected, {} surfaces destroyed", self.id, count);
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        self.disconnect();
    }
}
