//! # Kernel Interface
//!
//! The kernel side of presentation, expressed as the fixed set of requests a
//! KMS device accepts. Everything above this module talks to the kernel only
//! through [`KmsDevice`], which keeps the buffer and flip logic independent of
//! the ioctl plumbing (and lets the tests drive it with a recording device).
//!
//! Requests are small immutable records built fresh for each call; nothing is
//! reused between calls.

use std::io;
use std::path::Path;

use crate::types::{BufferHandle, ConnectorId, CrtcId, DisplayMode, FramebufferId};

#[cfg(feature = "backend_drm")]
pub mod drm_card;
#[cfg(test)]
pub(crate) mod fake;

#[cfg(feature = "backend_drm")]
pub use drm_card::{DrmBackend, DrmCard};

/// Driver capabilities this crate queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverCapability {
    DumbBuffer,
    AsyncPageFlip,
}

impl DriverCapability {
    pub fn name(self) -> &'static str {
        match self {
            DriverCapability::DumbBuffer => "DRM_CAP_DUMB_BUFFER",
            DriverCapability::AsyncPageFlip => "DRM_CAP_ASYNC_PAGE_FLIP",
        }
    }
}

/// `DRM_IOCTL_MODE_CREATE_DUMB` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateDumbRequest {
    pub width: u32,
    pub height: u32,
    pub bpp: u32,
}

/// What the kernel hands back for a created dumb buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreatedDumb {
    pub handle: BufferHandle,
    pub pitch: u32,
    pub size: u64,
}

/// `drmModeAddFB` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddFramebufferRequest {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub bpp: u32,
    pub pitch: u32,
    pub handle: BufferHandle,
}

/// `drmModeSetCrtc` request binding one connector to one framebuffer at a mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModesetRequest {
    pub crtc: CrtcId,
    pub framebuffer: FramebufferId,
    pub connector: ConnectorId,
    pub mode: DisplayMode,
}

/// `drmModePageFlip` request. The completion event is always requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageFlipRequest {
    pub crtc: CrtcId,
    pub framebuffer: FramebufferId,
    /// Flip immediately instead of at the next vblank (`DRM_MODE_PAGE_FLIP_ASYNC`).
    pub async_flip: bool,
}

/// An event read back from the device descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KmsEvent {
    PageFlip { crtc: CrtcId },
    Vblank { crtc: Option<CrtcId> },
    /// Anything the reader could not decode.
    Malformed(Vec<u8>),
}

/// An open KMS device descriptor.
///
/// Dropping the device closes the descriptor. Dropping a [`KmsDevice::Mapping`]
/// unmaps it.
pub trait KmsDevice {
    type Mapping: AsRef<[u8]> + AsMut<[u8]>;

    fn driver_capability(&self, cap: DriverCapability) -> io::Result<u64>;
    fn acquire_master(&self) -> io::Result<()>;

    fn create_dumb(&self, req: &CreateDumbRequest) -> io::Result<CreatedDumb>;
    fn destroy_dumb(&self, handle: BufferHandle) -> io::Result<()>;
    /// Returns the fake offset to pass to `mmap` for this buffer.
    fn map_dumb(&self, handle: BufferHandle) -> io::Result<u64>;
    fn mmap(&self, offset: u64, len: usize) -> io::Result<Self::Mapping>;

    fn add_framebuffer(&self, req: &AddFramebufferRequest) -> io::Result<FramebufferId>;
    fn remove_framebuffer(&self, fb: FramebufferId) -> io::Result<()>;

    /// Blocking CRTC configuration.
    fn set_crtc(&self, req: &ModesetRequest) -> io::Result<()>;
    /// Non-blocking flip; completion arrives later through [`KmsDevice::read_events`].
    fn page_flip(&self, req: &PageFlipRequest) -> io::Result<()>;
    /// Blocks until at least one event is available on the descriptor.
    fn read_events(&self) -> io::Result<Vec<KmsEvent>>;
}

/// Opens KMS device nodes.
pub trait KmsBackend {
    type Device: KmsDevice;

    fn open(&self, path: &Path) -> io::Result<Self::Device>;
}
