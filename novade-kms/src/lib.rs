//! # Novade KMS Presentation
//!
//! Puts application windows on screen through the kernel's mode-setting
//! interface, without a display server in between. Two presentation paths are
//! provided:
//!
//! - **Software**: frames rendered on the CPU are copied into a pair of dumb
//!   buffers that alternate as front and back buffer ([`software`], [`dumb`]).
//! - **Accelerated**: frames rendered by a GPU context are swapped into a GPU
//!   surface whose buffer objects are scanned out directly ([`accel`],
//!   [`swapchain`]).
//!
//! Both paths hand framebuffers to the per-output [`flip::PageFlipSync`],
//! which issues the initial mode-set and then keeps at most one page flip in
//! flight. [`presenter::WindowPresenter`] owns the device handle and switches
//! a window between the two paths.
//!
//! The kernel is only reached through the [`kms::KmsDevice`] trait. The
//! `backend_drm` feature (default) implements it on a real DRM card node, and
//! `backend_gbm` adds the GBM implementation of the GPU traits.

pub mod accel;
pub mod config;
pub mod device;
pub mod dumb;
pub mod error;
pub mod flip;
pub mod kms;
pub mod logging;
pub mod presenter;
pub mod software;
pub mod swapchain;
pub mod types;

// Re-export key types for convenience.
pub use accel::{AcceleratedPath, GpuBackend, GpuBufferObject, GpuDevice, GpuSurface, RenderContext};
pub use config::PresentConfig;
pub use device::DisplayDevice;
pub use dumb::{DumbBuffer, DumbBufferPool};
pub use error::{KmsError, Result};
pub use flip::{FlipState, PageFlipSync, Presented};
pub use kms::{DriverCapability, KmsBackend, KmsDevice, KmsEvent};
pub use presenter::{Presentation, WindowPresenter};
pub use software::SoftwarePath;
pub use swapchain::SwapOptions;
pub use types::{
    BufferHandle, ConnectorId, CrtcId, DisplayMode, FramebufferId, ModeTimings, OutputTarget, PixelFormat, Rect,
    SoftwareSurface,
};

#[cfg(feature = "backend_drm")]
pub use kms::{DrmBackend, DrmCard};

#[cfg(feature = "backend_gbm")]
pub use accel::gbm_backend::{GbmBackend, GbmGpu, GbmSurface};
