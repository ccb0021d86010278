//! Protocol boundary of the surface core
//!
//! Wire decoding and encoding live outside this crate. What crosses the
//! boundary is defined here:
//!
//! - **Inbound**: decoded [`Request`]s addressed to a surface by id
//! - **Outbound**: [`ClientEvent`]s (callback done, buffer release, protocol
//!   errors) pushed through a [`ClientEventSink`]
//! - **Violations**: [`ProtocolViolation`] fails the offending request and
//!   ends the client connection. Each carries a stable string code and the
//!   wire-level error number the protocol layer serializes.
//!
//! # Usage
//!
//! ```no_run
//! use axiom_surface::protocol::{ClientEvent, ClientEventSink};
//! use axiom_surface::resource::CallbackToken;
//! use std::sync::mpsc;
//!
//! let (tx, rx) = mpsc::channel::<ClientEvent>();
//! tx.send_event(ClientEvent::CallbackDone {
//!     token: CallbackToken(7),
//!     timestamp_ms: 16,
//! });
//! assert!(matches!(rx.recv(), Ok(ClientEvent::CallbackDone { .. })));
//! ```

pub mod request;

pub use request::Request;

use crate::import::ImportError;
use crate::resource::{BackingId, CallbackToken};
use crate::surface::SurfaceId;
use log::debug;
use thiserror::Error;
use wayland_server::protocol::{wl_shm, wl_subcompositor, wl_surface};

/// Requests that end the client connection
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolViolation {
    #[error(
        "stride ({stride}) is less than width × bytes per pixel ({width}×{bytes_per_pixel}). \
         Did you accidentally specify stride in pixels?"
    )]
    InvalidStride {
        stride: i32,
        width: i32,
        bytes_per_pixel: usize,
    },
    #[error("invalid buffer geometry: {0}")]
    InvalidGeometry(String),
    #[error("invalid buffer format: {0}")]
    InvalidFormat(String),
    #[error("{surface} already has the {existing} role, cannot become {requested}")]
    RoleAlreadySet {
        surface: SurfaceId,
        existing: &'static str,
        requested: &'static str,
    },
    #[error("buffer scale must be at least 1, got {0}")]
    InvalidScale(i32),
    #[error("{surface}: {reason}")]
    BadSurface {
        surface: SurfaceId,
        reason: &'static str,
    },
    #[error("invalid object: {0}")]
    InvalidObject(String),
    #[error("buffer import failed: {0}")]
    ImportFailed(String),
}

/// `wl_display.error` values from the core protocol
pub const WL_DISPLAY_INVALID_OBJECT: u32 = 0;
pub const WL_DISPLAY_IMPLEMENTATION: u32 = 3;

impl ProtocolViolation {
    /// Stable string code reported with the error
    pub fn code(&self) -> &'static str {
        match self {
            ProtocolViolation::InvalidStride { .. } | ProtocolViolation::InvalidGeometry(_) => {
                "invalid_stride"
            }
            ProtocolViolation::InvalidFormat(_) => "invalid_format",
            ProtocolViolation::RoleAlreadySet { .. } => "role_already_set",
            ProtocolViolation::InvalidScale(_) => "invalid_scale",
            ProtocolViolation::BadSurface { .. } => "bad_surface",
            ProtocolViolation::InvalidObject(_) => "invalid_object",
            ProtocolViolation::ImportFailed(_) => "import_failed",
        }
    }

    /// Wire-level error number, as carried by `wl_display.error`
    pub fn wire_code(&self) -> u32 {
        match self {
            ProtocolViolation::InvalidStride { .. } | ProtocolViolation::InvalidGeometry(_) => {
                wl_shm::Error::InvalidStride as u32
            }
            ProtocolViolation::InvalidFormat(_) => wl_shm::Error::InvalidFormat as u32,
            ProtocolViolation::RoleAlreadySet { .. } | ProtocolViolation::BadSurface { .. } => {
                wl_subcompositor::Error::BadSurface as u32
            }
            ProtocolViolation::InvalidScale(_) => wl_surface::Error::InvalidScale as u32,
            ProtocolViolation::InvalidObject(_) => WL_DISPLAY_INVALID_OBJECT,
            ProtocolViolation::ImportFailed(_) => WL_DISPLAY_IMPLEMENTATION,
        }
    }
}

impl From<ImportError> for ProtocolViolation {
    fn from(err: ImportError) -> Self {
        match err {
            ImportError::InvalidStride {
                stride,
                width,
                bytes_per_pixel,
            } => ProtocolViolation::InvalidStride {
                stride,
                width,
                bytes_per_pixel,
            },
            err @ ImportError::InvalidGeometry { .. } => {
                ProtocolViolation::InvalidGeometry(err.to_string())
            }
            ImportError::UnsupportedFormat(format) => ProtocolViolation::InvalidFormat(format),
            other => ProtocolViolation::ImportFailed(other.to_string()),
        }
    }
}

/// Events the core sends back to a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// `wl_callback.done`
    CallbackDone {
        token: CallbackToken,
        timestamp_ms: u32,
    },
    /// `wl_buffer.release`: the client may reuse the backing memory
    BufferRelease { buffer: BackingId },
    /// Fatal error; the connection is torn down right after
    ProtocolError {
        code: &'static str,
        wire_code: u32,
        message: String,
    },
}

impl ClientEvent {
    pub fn protocol_error(violation: &ProtocolViolation) -> Self {
        ClientEvent::ProtocolError {
            code: violation.code(),
            wire_code: violation.wire_code(),
            message: violation.to_string(),
        }
    }
}

/// Outbound event queue of one client connection
pub trait ClientEventSink: Send + Sync {
    fn send_event(&self, event: ClientEvent);
}

impl ClientEventSink for std::sync::mpsc::Sender<ClientEvent> {
    fn send_event(&self, event: ClientEvent) {
        if self.send(event).is_err() {
            debug!("Client event receiver gone, dropping event");
        }
    }
}

impl ClientEventSink for tokio::sync::mpsc::UnboundedSender<ClientEvent> {
    fn send_event(&self, event: ClientEvent) {
        if self.send(event).is_err() {
            debug!("Client event receiver gone, dropping event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_stride_maps_to_wl_shm_error() {
        let violation = ProtocolViolation::from(ImportError::InvalidStride {
            stride: 8,
            width: 4,
            bytes_per_pixel: 4,
        });
        assert_eq!(violation.code(), "invalid_stride");
        assert_eq!(violation.wire_code(), wl_shm::Error::InvalidStride as u32);
        assert!(violation.to_string().contains("stride in pixels"));
    }

    #[test]
    fn test_bad_pool_geometry_is_reported_as_invalid_stride() {
        let violation = ProtocolViolation::from(ImportError::InvalidGeometry {
            id: BackingId::new_unique(),
            reason: "invalid size -4x-4".into(),
        });
        assert_eq!(violation.code(), "invalid_stride");
        assert_eq!(violation.wire_code(), wl_shm::Error::InvalidStride as u32);
        assert!(violation.to_string().contains("-4x-4"));
    }

    #[test]
    fn test_display_errors_use_core_wire_values() {
        assert_eq!(ProtocolViolation::InvalidObject("wl_buffer#3".into()).wire_code(), 0);
        assert_eq!(ProtocolViolation::ImportFailed("no GPU".into()).wire_code(), 3);
    }

    #[test]
    fn test_unsupported_format_maps_to_invalid_format() {
        let violation =
            ProtocolViolation::from(ImportError::UnsupportedFormat("Unknown(4660)".into()));
        assert_eq!(violation.code(), "invalid_format");
        assert_eq!(violation.wire_code(), wl_shm::Error::InvalidFormat as u32);
    }

    #[test]
    fn test_protocol_error_event_carries_code_and_message() {
        let violation = ProtocolViolation::InvalidScale(0);
        match ClientEvent::protocol_error(&violation) {
            ClientEvent::ProtocolError {
                code,
                wire_code,
                message,
            } => {
                assert_eq!(code, "invalid_scale");
                assert_eq!(wire_code, wl_surface::Error::InvalidScale as u32);
                assert!(message.contains("at least 1"));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_tokio_sink_delivers_in_order() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        for n in 0..3 {
            tx.send_event(ClientEvent::CallbackDone {
                token: CallbackToken(n),
                timestamp_ms: 0,
            });
        }
        for n in 0..3 {
            assert_eq!(
                rx.try_recv().ok(),
                Some(ClientEvent::CallbackDone {
                    token: CallbackToken(n),
                    timestamp_ms: 0
                })
            );
        }
    }
}
