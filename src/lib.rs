//! # Axiom Surface Core
//!
//! Buffer lifecycle and surface composition for the Axiom Wayland compositor:
//! client buffers are committed atomically into surface state, imported into
//! renderable form, queued for the compositor with bounded backpressure, and
//! completed back to the client for frame pacing.
//!
//! ## Architecture
//!
//! - `surface`: double-buffered commit state machine, roles, subsurface tree,
//!   hit-testing and region accumulation
//! - `import`: shared-memory and native buffer import, GPU image cache
//! - `swap_queue` / `stream`: bounded handoff of ready buffers to the compositor
//! - `scene` / `renderer`: per-output display sync groups and the render loop
//! - `protocol` / `session`: the request/event boundary of one client connection
//! - `executor`: serialized execution of client-visible completion work
//! - `config`: configuration parsing and management
//!
//! ## Usage
//!
//! ```rust,no_run
//! use axiom_surface::executor::LoopExecutor;
//! use axiom_surface::import::BufferImporter;
//! use axiom_surface::protocol::Request;
//! use axiom_surface::scene::Scene;
//! use axiom_surface::session::ClientSession;
//! use axiom_surface::surface::SurfaceContext;
//! use axiom_surface::SurfaceCoreConfig;
//! use std::sync::{mpsc, Arc};
//!
//! let config = SurfaceCoreConfig::default();
//! let executor = LoopExecutor::new();
//! let (events, _rx) = mpsc::channel();
//! let scene = Arc::new(Scene::new(config.compositor.outputs));
//!
//! let mut session = ClientSession::new(SurfaceContext {
//!     importer: Arc::new(BufferImporter::new(&config.import, None, executor.clone())),
//!     executor: executor.clone(),
//!     events: Arc::new(events),
//!     scene,
//!     stream: config.stream.clone(),
//! });
//!
//! let surface = session.create_surface().unwrap();
//! session.dispatch(Request::GetToplevel { surface, output: 0 }).unwrap();
//! session.dispatch(Request::Commit { surface }).unwrap();
//! executor.run_pending();
//! ```

pub mod buffer;
pub mod config;
pub mod executor;
pub mod format;
pub mod geometry;
pub mod import;
pub mod protocol;
pub mod renderer;
pub mod resource;
pub mod scene;
pub mod session;
pub mod stream;
pub mod surface;
pub mod swap_queue;

// Re-export main types for easy access
pub use buffer::{Buffer, BufferHandle, BufferId};
pub use config::SurfaceCoreConfig;
pub use import::{BufferImporter, ImportError};
pub use protocol::{ClientEvent, ProtocolViolation, Request};
pub use session::ClientSession;
pub use stream::BufferStream;
pub use surface::{SurfaceId, SurfaceTable};
pub use swap_queue::{SwapQueue, SwapQueueError};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
