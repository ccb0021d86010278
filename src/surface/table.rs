//! Surface table and the commit machine
//!
//! The table owns every surface of one client connection. All state
//! transitions that involve more than one surface (role dispatch, subsurface
//! synchronization, scene publication, teardown) go through it.
//!
//! # Commit
//!
//! 1. The pending state is taken and fields equal to the current state are
//!    dropped.
//! 2. The role decides: a synchronized subsurface caches the state, every
//!    other role applies it.
//! 3. Applying imports and submits the new buffer first. Nothing in
//!    [`CurrentState`](super::CurrentState) changes unless that succeeds.
//! 4. Children get `parent_has_committed`; the toplevel republishes its
//!    scene data if the layout changed.
//!
//! # Frame callbacks
//!
//! A callback is tied to the newest frame submitted when it was committed and
//! fires once the renderer consumed that frame. The completion comes back
//! through the connection's executor holding only a weak table reference and
//! a generational [`SurfaceId`], so a destroyed surface just drops it.

use super::role::{Role, SubsurfaceRole, ToplevelRole};
use super::state::{Pending, SurfaceState};
use super::{FrameCallback, QueuedCallback, Surface, SurfaceId};
use crate::buffer::{Buffer, BufferHandle};
use crate::executor::{Executor, Task};
use crate::geometry::{Displacement, Point, Rectangle, Size};
use crate::import::BufferImporter;
use crate::protocol::{ClientEvent, ClientEventSink, ProtocolViolation};
use crate::scene::{Scene, SceneSurface, StreamSpecification};
use crate::stream::{BufferStream, StreamConfig};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Instant;

pub type SharedSurfaceTable = Arc<Mutex<SurfaceTable>>;

/// Collaborators of one client connection, passed in at construction
#[derive(Clone)]
pub struct SurfaceContext {
    pub importer: Arc<BufferImporter>,
    pub executor: Arc<dyn Executor>,
    pub events: Arc<dyn ClientEventSink>,
    pub scene: Arc<Scene>,
    pub stream: StreamConfig,
}

struct Slot {
    generation: u32,
    surface: Option<Surface>,
}

pub struct SurfaceTable {
    self_ref: Weak<Mutex<SurfaceTable>>,
    slots: Vec<Slot>,
    free: Vec<u32>,
    ctx: SurfaceContext,
    epoch: Instant,
}

impl SurfaceTable {
    pub fn new_shared(ctx: SurfaceContext) -> SharedSurfaceTable {
        Arc::new_cyclic(|self_ref| {
            Mutex::new(SurfaceTable {
                self_ref: self_ref.clone(),
                slots: Vec::new(),
                free: Vec::new(),
                ctx,
                epoch: Instant::now(),
            })
        })
    }

    pub fn context(&self) -> &SurfaceContext {
        &self.ctx
    }

    pub fn create(&mut self) -> Result<SurfaceId, ProtocolViolation> {
        let stream = BufferStream::from_config(&self.ctx.stream)
            .map_err(|e| ProtocolViolation::ImportFailed(e.to_string()))?;

        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    surface: None,
                });
                (self.slots.len() - 1) as u32
            }
        };
        let slot = &mut self.slots[index as usize];
        let id = SurfaceId::new(index, slot.generation);
        slot.surface = Some(Surface::new(id, stream));

        debug!("🆕 Created {}", id);
        Ok(id)
    }

    pub fn get(&self, id: SurfaceId) -> Result<&Surface, ProtocolViolation> {
        self.slots
            .get(id.index() as usize)
            .filter(|slot| slot.generation == id.generation())
            .and_then(|slot| slot.surface.as_ref())
            .ok_or_else(|| ProtocolViolation::InvalidObject(id.to_string()))
    }

    pub fn get_mut(&mut self, id: SurfaceId) -> Result<&mut Surface, ProtocolViolation> {
        self.slots
            .get_mut(id.index() as usize)
            .filter(|slot| slot.generation == id.generation())
            .and_then(|slot| slot.surface.as_mut())
            .ok_or_else(|| ProtocolViolation::InvalidObject(id.to_string()))
    }

    pub fn contains(&self, id: SurfaceId) -> bool {
        self.get(id).is_ok()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.surface.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn surface_ids(&self) -> Vec<SurfaceId> {
        self.slots
            .iter()
            .filter_map(|slot| slot.surface.as_ref().map(Surface::id))
            .collect()
    }

    // ---- commit ----

    pub fn commit(&mut self, id: SurfaceId) -> Result<(), ProtocolViolation> {
        let surface = self.get_mut(id)?;
        let mut state = surface.take_pending();
        state.drop_unchanged(surface.current());

        if self.is_synchronized(id) {
            if let Role::Subsurface(subsurface) = &mut self.get_mut(id)?.role {
                debug!("{} is synchronized, caching commit until parent commits", id);
                subsurface.cache(state);
            }
            return Ok(());
        }

        self.apply_state(id, state)
    }

    /// Whether commits of `id` wait for an ancestor's commit
    pub fn is_synchronized(&self, id: SurfaceId) -> bool {
        let mut next = id;
        // Bounded by the table size so a corrupt parent chain cannot spin
        for _ in 0..=self.slots.len() {
            let Ok(surface) = self.get(next) else {
                return false;
            };
            match &surface.role {
                Role::Subsurface(subsurface) if subsurface.synchronized => return true,
                Role::Subsurface(subsurface) => next = subsurface.parent,
                _ => return false,
            }
        }
        false
    }

    fn apply_state(&mut self, id: SurfaceId, mut state: SurfaceState) -> Result<(), ProtocolViolation> {
        let (stream, next_frame) = {
            let surface = self.get(id)?;
            (surface.stream().clone(), surface.submitted_frames + 1)
        };

        let imported = match &state.buffer {
            Pending::Set(handle) => Some(self.import_and_submit(id, next_frame, handle, &stream)?),
            _ => None,
        };

        let mut refresh = state.surface_data_needs_refresh();
        let new_callbacks = std::mem::take(&mut state.frame_callbacks);
        let mut fire_now = Vec::new();
        let mut completed_frame = None;

        {
            let surface = self.get_mut(id)?;
            let was_mapped = surface.is_mapped();
            let old_size = surface.size();
            let current = surface.current_mut();

            match state.buffer {
                Pending::Set(_) => {
                    if let Some(buffer) = &imported {
                        current.buffer = Some(buffer.id());
                        current.buffer_size = Some(buffer.size());
                    }
                }
                Pending::Cleared => {
                    current.buffer = None;
                    current.buffer_size = None;
                }
                Pending::Unset => {}
            }
            match state.offset {
                Pending::Set(offset) => current.offset = offset,
                Pending::Cleared => current.offset = Displacement::default(),
                Pending::Unset => {}
            }
            state.input_shape.apply_to(&mut current.input_shape);
            state.opaque_shape.apply_to(&mut current.opaque_shape);
            if let Pending::Set(scale) = state.scale {
                current.scale = scale;
                stream.set_scale(scale);
            }
            if let Pending::Set(transform) = state.transform {
                current.transform = transform;
            }

            if imported.is_some() {
                surface.submitted_frames = next_frame;
            }
            if surface.is_mapped() != was_mapped || surface.size() != old_size {
                refresh = true;
            }

            if surface.is_mapped() {
                let frame = surface.submitted_frames;
                let idle = surface.consumed_frames >= frame;
                if idle && !new_callbacks.is_empty() {
                    completed_frame = Some(frame);
                }
                surface
                    .frame_callbacks
                    .extend(new_callbacks.into_iter().map(|callback| QueuedCallback { frame, callback }));
            } else {
                // Nothing will be drawn, so nothing is worth waiting for
                surface.consumed_frames = surface.submitted_frames;
                fire_now.extend(surface.frame_callbacks.drain(..).map(|queued| queued.callback));
                fire_now.extend(new_callbacks);
            }

            if was_mapped && !surface.is_mapped() {
                info!("👋 {} unmapped", id);
            } else if !was_mapped && surface.is_mapped() {
                info!("🖼️ {} mapped at {:?}", id, surface.size());
            }
        }

        if !self.get(id)?.is_mapped() {
            stream.drain();
        }
        self.fire_callbacks(fire_now);
        if let Some(frame) = completed_frame {
            // Mapped and nothing in flight: done still goes out through the executor
            self.ctx.executor.spawn(self.frame_completion(id, frame));
        }

        let children = self.get(id)?.children.clone();
        for child in children {
            self.parent_has_committed(child)?;
        }

        if refresh {
            self.refresh_scene(id);
        }
        Ok(())
    }

    fn import_and_submit(
        &self,
        id: SurfaceId,
        frame: u64,
        handle: &BufferHandle,
        stream: &BufferStream,
    ) -> Result<Arc<Buffer>, ProtocolViolation> {
        if !handle.is_alive() {
            return Err(ProtocolViolation::InvalidObject(handle.id().to_string()));
        }

        let completion = self.frame_completion(id, frame);
        let release = self.release_notification(handle);
        let buffer = match handle {
            BufferHandle::Shm(shm) => self.ctx.importer.buffer_from_shm(
                shm,
                Box::new(move || {
                    // Contents were copied out; the client can reuse the memory
                    release();
                    completion();
                }),
            ),
            BufferHandle::Native(native) => {
                self.ctx
                    .importer
                    .buffer_from_native(native, completion, Box::new(release))
            }
        }?;

        stream
            .submit_buffer(buffer.clone())
            .map_err(|_| ProtocolViolation::BadSurface {
                surface: id,
                reason: "buffer stream is shut down",
            })?;
        Ok(buffer)
    }

    /// `wl_buffer.release`, skipped once the client destroyed the buffer
    fn release_notification(&self, handle: &BufferHandle) -> impl FnOnce() + Send + 'static {
        let events = self.ctx.events.clone();
        let buffer = handle.id();
        handle.liveness().run_unless_destroyed(move || {
            events.send_event(ClientEvent::BufferRelease { buffer });
        })
    }

    /// Completion task for frame `frame` of `id`, safe to run after teardown
    fn frame_completion(&self, id: SurfaceId, frame: u64) -> Task {
        let table = self.self_ref.clone();
        Box::new(move || {
            if let Some(table) = table.upgrade() {
                table.lock().frame_consumed(id, frame);
            }
        })
    }

    /// Delivers every callback waiting on `frame` or an earlier frame
    pub fn frame_consumed(&mut self, id: SurfaceId, frame: u64) {
        let Ok(surface) = self.get_mut(id) else {
            debug!("Frame {} of destroyed {} consumed, dropping", frame, id);
            return;
        };
        surface.consumed_frames = surface.consumed_frames.max(frame);

        let mut ready = Vec::new();
        while let Some(queued) = surface.frame_callbacks.front() {
            if queued.frame > surface.consumed_frames {
                break;
            }
            if let Some(queued) = surface.frame_callbacks.pop_front() {
                ready.push(queued.callback);
            }
        }
        self.fire_callbacks(ready);
    }

    /// Sends done to every waiting callback of `id` and forgets them
    pub fn send_frame_callbacks(&mut self, id: SurfaceId) -> Result<(), ProtocolViolation> {
        let surface = self.get_mut(id)?;
        let callbacks: Vec<_> = surface
            .frame_callbacks
            .drain(..)
            .map(|queued| queued.callback)
            .collect();
        self.fire_callbacks(callbacks);
        Ok(())
    }

    fn fire_callbacks(&self, callbacks: Vec<FrameCallback>) {
        if callbacks.is_empty() {
            return;
        }
        let timestamp_ms = self.epoch.elapsed().as_millis() as u32;
        for callback in callbacks.into_iter().filter(FrameCallback::is_alive) {
            self.ctx.events.send_event(ClientEvent::CallbackDone {
                token: callback.token(),
                timestamp_ms,
            });
        }
    }

    // ---- roles ----

    /// Makes `id` the root of a composition tree shown on `output`
    pub fn make_toplevel(&mut self, id: SurfaceId, output: usize) -> Result<Arc<SceneSurface>, ProtocolViolation> {
        self.check_no_role(id, "toplevel")?;

        let output = self.ctx.scene.resolve_output(output);
        let scene_surface = Arc::new(SceneSurface::new(id, output));
        self.ctx.scene.add_surface(scene_surface.clone());
        self.get_mut(id)?.role = Role::Toplevel(ToplevelRole {
            scene_surface: scene_surface.clone(),
        });
        info!("🪟 {} became a toplevel on output {}", id, scene_surface.output());

        self.refresh_scene(id);
        Ok(scene_surface)
    }

    pub fn make_subsurface(&mut self, id: SurfaceId, parent: SurfaceId) -> Result<(), ProtocolViolation> {
        if id == parent {
            return Err(ProtocolViolation::BadSurface {
                surface: id,
                reason: "a surface cannot be its own parent",
            });
        }
        self.get(parent)?;
        if self.is_ancestor(id, parent) {
            return Err(ProtocolViolation::BadSurface {
                surface: id,
                reason: "parent is a descendant of the surface",
            });
        }
        self.check_no_role(id, "subsurface")?;

        self.get_mut(id)?.role = Role::Subsurface(SubsurfaceRole::new(parent));
        self.add_subsurface(parent, id)?;
        debug!("{} became a subsurface of {}", id, parent);
        Ok(())
    }

    /// Reverts `id` to the null role, tearing the old role down
    pub fn clear_role(&mut self, id: SurfaceId) -> Result<(), ProtocolViolation> {
        let mut role = std::mem::take(&mut self.get_mut(id)?.role);
        let cached = match &mut role {
            Role::Subsurface(subsurface) => subsurface.cached.take(),
            _ => None,
        };
        let detached = !role.is_null();
        self.teardown_role(id, role);
        if detached {
            self.flush_detached(id, cached);
        }
        Ok(())
    }

    /// A surface that left its composition tree is never drawn again, so
    /// the callbacks it holds (cached or waiting on a frame) fire now
    fn flush_detached(&mut self, id: SurfaceId, cached: Option<SurfaceState>) {
        let mut callbacks = cached.map(|state| state.frame_callbacks).unwrap_or_default();
        let Ok(surface) = self.get_mut(id) else {
            return;
        };
        surface.consumed_frames = surface.submitted_frames;
        callbacks.extend(surface.frame_callbacks.drain(..).map(|queued| queued.callback));
        let drained = surface.stream().drain();
        debug!(
            "{} detached: {} frame callbacks fired, {} buffers drained",
            id,
            callbacks.len(),
            drained
        );
        self.fire_callbacks(callbacks);
    }

    fn check_no_role(&self, id: SurfaceId, requested: &'static str) -> Result<(), ProtocolViolation> {
        let surface = self.get(id)?;
        if surface.role.is_null() {
            Ok(())
        } else {
            Err(ProtocolViolation::RoleAlreadySet {
                surface: id,
                existing: surface.role.name(),
                requested,
            })
        }
    }

    fn teardown_role(&mut self, id: SurfaceId, role: Role) {
        match role {
            Role::Null => {}
            Role::Toplevel(toplevel) => {
                self.ctx.scene.remove_surface(&toplevel.scene_surface);
                debug!("{} left the scene", id);
            }
            Role::Subsurface(subsurface) => {
                self.remove_subsurface(subsurface.parent, id);
                self.refresh_scene(subsurface.parent);
            }
        }
    }

    /// Whether `ancestor` is `id` or one of its parents
    fn is_ancestor(&self, ancestor: SurfaceId, id: SurfaceId) -> bool {
        let mut next = Some(id);
        for _ in 0..=self.slots.len() {
            let Some(current) = next else {
                return false;
            };
            if current == ancestor {
                return true;
            }
            next = self.parent_of(current);
        }
        false
    }

    pub fn parent_of(&self, id: SurfaceId) -> Option<SurfaceId> {
        match &self.get(id).ok()?.role {
            Role::Subsurface(subsurface) => Some(subsurface.parent),
            _ => None,
        }
    }

    // ---- subsurfaces ----

    pub fn add_subsurface(&mut self, parent: SurfaceId, child: SurfaceId) -> Result<(), ProtocolViolation> {
        let surface = self.get_mut(parent)?;
        if surface.children.contains(&child) {
            warn!("🟡 {} is already a child of {}, ignoring", child, parent);
            return Ok(());
        }
        surface.children.push(child);
        Ok(())
    }

    pub fn remove_subsurface(&mut self, parent: SurfaceId, child: SurfaceId) {
        if let Ok(surface) = self.get_mut(parent) {
            surface.children.retain(|existing| *existing != child);
        }
    }

    /// Position takes effect on the parent's next commit
    pub fn set_subsurface_position(&mut self, id: SurfaceId, position: Point) -> Result<(), ProtocolViolation> {
        match &mut self.get_mut(id)?.role {
            Role::Subsurface(subsurface) => {
                subsurface.pending_position = Some(position);
                Ok(())
            }
            _ => Err(ProtocolViolation::BadSurface {
                surface: id,
                reason: "set_position on a surface without the subsurface role",
            }),
        }
    }

    pub fn set_sync(&mut self, id: SurfaceId) -> Result<(), ProtocolViolation> {
        match &mut self.get_mut(id)?.role {
            Role::Subsurface(subsurface) => {
                subsurface.synchronized = true;
                Ok(())
            }
            _ => Err(ProtocolViolation::BadSurface {
                surface: id,
                reason: "set_sync on a surface without the subsurface role",
            }),
        }
    }

    /// Leaving synchronized mode applies any commit still cached
    pub fn set_desync(&mut self, id: SurfaceId) -> Result<(), ProtocolViolation> {
        match &mut self.get_mut(id)?.role {
            Role::Subsurface(subsurface) => subsurface.synchronized = false,
            _ => {
                return Err(ProtocolViolation::BadSurface {
                    surface: id,
                    reason: "set_desync on a surface without the subsurface role",
                })
            }
        }

        if !self.is_synchronized(id) {
            if let Some(cached) = self.take_cached(id) {
                return self.apply_state(id, cached);
            }
        }
        Ok(())
    }

    fn take_cached(&mut self, id: SurfaceId) -> Option<SurfaceState> {
        match &mut self.get_mut(id).ok()?.role {
            Role::Subsurface(subsurface) => subsurface.cached.take(),
            _ => None,
        }
    }

    fn parent_has_committed(&mut self, child: SurfaceId) -> Result<(), ProtocolViolation> {
        let Ok(surface) = self.get_mut(child) else {
            return Ok(());
        };
        let Role::Subsurface(subsurface) = &mut surface.role else {
            return Ok(());
        };

        let new_position = subsurface.pending_position.take();
        let cached = subsurface.cached.take();
        let moved = match new_position {
            Some(position) if position != surface.position => {
                surface.position = position;
                true
            }
            _ => false,
        };

        match cached {
            Some(mut state) => {
                if moved {
                    state.invalidate_surface_data();
                }
                self.apply_state(child, state)
            }
            None => {
                if moved {
                    self.refresh_scene(child);
                }
                Ok(())
            }
        }
    }

    // ---- composition tree ----

    /// Topmost surface of the tree rooted at `id` accepting input at `point`
    /// (in `id`'s parent coordinates)
    pub fn subsurface_at(&self, id: SurfaceId, point: Point) -> Option<SurfaceId> {
        let surface = self.get(id).ok()?;
        if !surface.is_mapped() {
            return None;
        }

        let local = point - surface.total_offset();
        for child in surface.children.iter().rev() {
            if let Some(hit) = self.subsurface_at(*child, local) {
                return Some(hit);
            }
        }

        surface
            .input_rectangles()
            .iter()
            .any(|rect| rect.contains(local))
            .then_some(id)
    }

    /// Appends the streams and input shape of the tree rooted at `id`
    pub fn populate_composited_regions(
        &self,
        id: SurfaceId,
        streams: &mut Vec<StreamSpecification>,
        shapes: &mut Vec<Rectangle>,
        parent_offset: Displacement,
    ) {
        let Ok(surface) = self.get(id) else {
            return;
        };
        // An unmapped surface hides its whole subtree
        let Some(size) = surface.size() else {
            return;
        };
        let offset = parent_offset + surface.total_offset();

        streams.push(StreamSpecification {
            stream: surface.stream().clone(),
            displacement: offset,
            size,
        });

        match &surface.current().input_shape {
            Some(shape) if shape.is_empty() => {
                // Explicitly empty: one degenerate rectangle, unlike "unset"
                shapes.push(Rectangle::new(Point::default() + offset, Size::default()));
            }
            _ => shapes.extend(
                surface
                    .input_rectangles()
                    .into_iter()
                    .map(|rect| rect.translated(offset)),
            ),
        }

        for child in &surface.children {
            self.populate_composited_regions(*child, streams, shapes, offset);
        }
    }

    fn root_of(&self, id: SurfaceId) -> SurfaceId {
        let mut root = id;
        for _ in 0..=self.slots.len() {
            match self.parent_of(root) {
                Some(parent) => root = parent,
                None => break,
            }
        }
        root
    }

    /// Republishes the scene data of the toplevel above `id`, if any
    fn refresh_scene(&self, id: SurfaceId) {
        let root = self.root_of(id);
        let Ok(surface) = self.get(root) else {
            return;
        };
        let Role::Toplevel(toplevel) = &surface.role else {
            return;
        };

        let mut streams = Vec::new();
        let mut shapes = Vec::new();
        self.populate_composited_regions(root, &mut streams, &mut shapes, Displacement::default());
        toplevel.scene_surface.publish(streams, shapes);
    }

    // ---- teardown ----

    /// Client destroyed the surface: tears down the role, detaches children
    /// and shuts the stream down
    pub fn destroy(&mut self, id: SurfaceId) -> Result<(), ProtocolViolation> {
        let surface = self.get_mut(id)?;
        let role = std::mem::take(&mut surface.role);
        let children = std::mem::take(&mut surface.children);
        self.teardown_role(id, role);

        let mut orphans = Vec::new();
        for child in children {
            if let Ok(orphan) = self.get_mut(child) {
                if matches!(&orphan.role, Role::Subsurface(s) if s.parent == id) {
                    debug!("{} lost its parent {}, unmapping", child, id);
                    if let Role::Subsurface(subsurface) = std::mem::take(&mut orphan.role) {
                        orphans.push((child, subsurface.cached));
                    }
                }
            }
        }
        for (orphan, cached) in orphans {
            self.flush_detached(orphan, cached);
        }

        let slot = &mut self.slots[id.index() as usize];
        let Some(surface) = slot.surface.take() else {
            return Ok(());
        };
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index());

        surface.liveness().destroy();
        surface.stream().shutdown();
        info!(
            "🗑️ Destroyed {} ({} frame callbacks dropped)",
            id,
            surface.waiting_callbacks()
        );
        Ok(())
    }

    /// Destroys every surface, children before parents
    pub fn destroy_all(&mut self) {
        let mut ids = self.surface_ids();
        ids.sort_by_key(|id| std::cmp::Reverse(self.depth(*id)));
        for id in ids {
            if let Err(e) = self.destroy(id) {
                debug!("Surface already gone during teardown: {}", e);
            }
        }
    }

    fn depth(&self, id: SurfaceId) -> usize {
        let mut depth = 0;
        let mut next = id;
        while let Some(parent) = self.parent_of(next) {
            depth += 1;
            next = parent;
            if depth > self.slots.len() {
                break;
            }
        }
        depth
    }
}
