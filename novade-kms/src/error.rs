//! Error types for the KMS presentation layer.
//!
//! Every fallible operation in this crate returns [`KmsError`]. Kernel-side
//! causes are kept as the `#[source]` of the variant so callers can inspect
//! the underlying `errno` when they need to.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KmsError {
    /// The kernel device lacks a capability this path requires.
    #[error("KMS device lacks capability {capability}")]
    CapabilityUnavailable {
        capability: &'static str,
        #[source]
        source: Option<io::Error>,
    },

    /// Creation of a dumb buffer, framebuffer object, GPU surface or buffer object failed.
    #[error("Allocation failed: {what}")]
    AllocationFailure {
        what: String,
        #[source]
        source: Option<io::Error>,
    },

    /// Mapping a kernel buffer into process memory failed.
    #[error("Mapping failed: {what}")]
    MappingFailure {
        what: String,
        #[source]
        source: io::Error,
    },

    /// The kernel refused a page flip (typically EBUSY while one is outstanding).
    #[error("Page flip rejected on CRTC {crtc}")]
    FlipRejected {
        crtc: u32,
        #[source]
        source: io::Error,
    },

    /// The CRTC configuration was rejected.
    #[error("Mode-set failed on CRTC {crtc}")]
    ModesetFailure {
        crtc: u32,
        #[source]
        source: io::Error,
    },

    /// Waiting for a page-flip completion event failed.
    #[error("Waiting for page flip on CRTC {crtc} failed: {reason}")]
    FlipWaitFailed {
        crtc: u32,
        reason: String,
        #[source]
        source: Option<io::Error>,
    },

    /// The rendering context could not bind a surface or swap its buffers.
    #[error("Rendering context failure: {0}")]
    ContextLoadFailure(String),

    /// Software and accelerated presentation were both attempted on one window.
    #[error("Cannot mix dumb buffers with accelerated presentation")]
    ModeConflict,

    /// A software frame whose pixel storage does not cover its declared size and pitch.
    #[error("Invalid software surface: {0}")]
    InvalidSurface(String),

    /// The requested path has not been set up yet.
    #[error("{0} is not initialized")]
    NotInitialized(&'static str),

    /// The device descriptor is closed.
    #[error("KMS device {0:?} is not open")]
    DeviceClosed(PathBuf),

    /// Opening the device node failed.
    #[error("Failed to open KMS device {path:?}")]
    DeviceOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Only swap intervals of 0 or 1 are supported, got {0}")]
    InvalidSwapInterval(u32),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl KmsError {
    pub(crate) fn allocation(what: impl Into<String>, source: io::Error) -> Self {
        KmsError::AllocationFailure { what: what.into(), source: Some(source) }
    }

    pub(crate) fn mapping(what: impl Into<String>, source: io::Error) -> Self {
        KmsError::MappingFailure { what: what.into(), source }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T, E = KmsError> = std::result::Result<T, E>;
