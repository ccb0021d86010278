// Shared fixture for the integration tests
//
// Wires one client session to a single-threaded executor, an in-process
// event channel and a renderer over a one-output scene, so tests can step
// the buffer flow by hand: dispatch, compose, run completions, read events.

#![allow(dead_code)]

use axiom_surface::buffer::native::{NativeBufferHandle, NativePlane, MODIFIER_LINEAR};
use axiom_surface::buffer::shm::ShmPool;
use axiom_surface::buffer::BufferHandle;
use axiom_surface::executor::LoopExecutor;
use axiom_surface::format::fourcc;
use axiom_surface::geometry::Size;
use axiom_surface::import::gpu::{GpuDevice, HeadlessGpu};
use axiom_surface::import::{BufferImporter, ImportConfig};
use axiom_surface::protocol::{ClientEvent, Request};
use axiom_surface::renderer::{Frame, Renderer};
use axiom_surface::resource::{BackingId, CallbackToken};
use axiom_surface::scene::Scene;
use axiom_surface::session::ClientSession;
use axiom_surface::stream::StreamConfig;
use axiom_surface::surface::{CurrentState, SharedSurfaceTable, SurfaceContext, SurfaceId};
use std::sync::{mpsc, Arc};
use wayland_server::protocol::wl_shm;
use wayland_server::WEnum;

pub struct Harness {
    pub session: ClientSession,
    pub executor: Arc<LoopExecutor>,
    pub events: mpsc::Receiver<ClientEvent>,
    pub scene: Arc<Scene>,
    pub renderer: Renderer,
    pub gpu: Arc<HeadlessGpu>,
    pub pool: Arc<ShmPool>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_stream(StreamConfig::default())
    }

    pub fn with_stream(stream: StreamConfig) -> Self {
        let executor = LoopExecutor::new();
        let gpu = Arc::new(HeadlessGpu::new());
        let import = ImportConfig {
            hardware: true,
            ..ImportConfig::default()
        };
        let device: Arc<dyn GpuDevice> = gpu.clone();
        let importer = Arc::new(BufferImporter::new(&import, Some(device), executor.clone()));
        let scene = Arc::new(Scene::new(1));
        let renderer = Renderer::new(scene.clone(), importer.image_cache().cloned());

        let (events_tx, events) = mpsc::channel();
        let session = ClientSession::new(SurfaceContext {
            importer,
            executor: executor.clone(),
            events: Arc::new(events_tx),
            scene: scene.clone(),
            stream,
        });

        Self {
            session,
            executor,
            events,
            scene,
            renderer,
            gpu,
            pool: ShmPool::new_anonymous(256 * 256 * 4).unwrap(),
        }
    }

    pub fn table(&self) -> SharedSurfaceTable {
        self.session.table().clone()
    }

    pub fn shm_buffer(&self, width: i32, height: i32) -> BufferHandle {
        BufferHandle::Shm(self.pool.create_buffer(
            0,
            width,
            height,
            width * 4,
            WEnum::Value(wl_shm::Format::Argb8888),
        ))
    }

    pub fn native_buffer(&self, width: i32, height: i32) -> NativeBufferHandle {
        NativeBufferHandle::new(
            Size::new(width, height),
            fourcc::XRGB8888,
            MODIFIER_LINEAR,
            vec![NativePlane {
                offset: 0,
                stride: width * 4,
                memory: None,
            }],
        )
    }

    pub fn toplevel(&mut self) -> SurfaceId {
        let surface = self.session.create_surface().unwrap();
        self.session
            .dispatch(Request::GetToplevel { surface, output: 0 })
            .unwrap();
        surface
    }

    pub fn subsurface(&mut self, parent: SurfaceId) -> SurfaceId {
        let surface = self.session.create_surface().unwrap();
        self.session
            .dispatch(Request::GetSubsurface { surface, parent })
            .unwrap();
        surface
    }

    pub fn attach(&mut self, surface: SurfaceId, buffer: Option<BufferHandle>) {
        self.session
            .dispatch(Request::Attach {
                surface,
                buffer,
                x: 0,
                y: 0,
            })
            .unwrap();
    }

    pub fn frame(&mut self, surface: SurfaceId, token: u32) {
        self.session
            .dispatch(Request::Frame {
                surface,
                callback: CallbackToken(token),
            })
            .unwrap();
    }

    pub fn commit(&mut self, surface: SurfaceId) {
        self.session.dispatch(Request::Commit { surface }).unwrap();
    }

    pub fn attach_and_commit(&mut self, surface: SurfaceId, width: i32, height: i32) {
        let buffer = self.shm_buffer(width, height);
        self.attach(surface, Some(buffer));
        self.commit(surface);
    }

    /// One pass of the compositor followed by the completion work it caused
    pub fn compose(&mut self) -> Vec<Frame> {
        let frames = self.renderer.render_all();
        self.executor.run_pending();
        frames
    }

    pub fn current(&self, surface: SurfaceId) -> CurrentState {
        self.session
            .table()
            .lock()
            .get(surface)
            .unwrap()
            .current()
            .clone()
    }

    pub fn drain_events(&self) -> Vec<ClientEvent> {
        self.events.try_iter().collect()
    }
}

pub fn done_tokens(events: &[ClientEvent]) -> Vec<u32> {
    events
        .iter()
        .filter_map(|event| match event {
            ClientEvent::CallbackDone { token, .. } => Some(token.0),
            _ => None,
        })
        .collect()
}

pub fn released(events: &[ClientEvent]) -> Vec<BackingId> {
    events
        .iter()
        .filter_map(|event| match event {
            ClientEvent::BufferRelease { buffer } => Some(*buffer),
            _ => None,
        })
        .collect()
}
