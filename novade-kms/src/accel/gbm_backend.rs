//! GBM implementation of the GPU seam.
//!
//! The GBM device lives on its own duplicate of the card descriptor, so
//! closing it never invalidates the descriptor the flips go through.

use std::ffi::c_void;
use std::io;
use std::os::fd::{AsFd, OwnedFd};

use gbm::{AsRaw, BufferObject, BufferObjectFlags, Format};
use tracing::debug;

use super::{GpuBackend, GpuBufferObject, GpuDevice, GpuSurface};
use crate::kms::DrmCard;
use crate::types::BufferHandle;

/// Creates GBM devices on open DRM cards.
#[derive(Debug, Clone, Copy, Default)]
pub struct GbmBackend;

impl GpuBackend<DrmCard> for GbmBackend {
    type Device = GbmGpu;

    fn create_device(&self, kms: &DrmCard) -> io::Result<GbmGpu> {
        let fd = kms.as_fd().try_clone_to_owned()?;
        let device = gbm::Device::new(fd)?;
        debug!(backend = ?device.backend_name(), "GBM device created");
        Ok(GbmGpu { device })
    }
}

pub struct GbmGpu {
    device: gbm::Device<OwnedFd>,
}

impl GbmGpu {
    /// The native display handle an EGL platform display is created from.
    pub fn as_raw(&self) -> *const c_void {
        self.device.as_raw().cast()
    }
}

impl std::fmt::Debug for GbmGpu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GbmGpu").field("device", &self.as_raw()).finish()
    }
}

impl GpuDevice for GbmGpu {
    type Surface = GbmSurface;

    fn create_surface(&mut self, width: u32, height: u32) -> io::Result<GbmSurface> {
        let surface = self.device.create_surface::<()>(
            width,
            height,
            Format::Xrgb8888,
            BufferObjectFlags::SCANOUT | BufferObjectFlags::RENDERING,
        )?;
        Ok(GbmSurface { surface })
    }
}

/// A GBM surface an EGL window surface is created on.
pub struct GbmSurface {
    surface: gbm::Surface<()>,
}

impl GbmSurface {
    /// The native window handle for `eglCreateWindowSurface`.
    pub fn as_raw(&self) -> *const c_void {
        self.surface.as_raw().cast()
    }
}

impl std::fmt::Debug for GbmSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GbmSurface").field("surface", &self.as_raw()).finish()
    }
}

impl GpuSurface for GbmSurface {
    type BufferObject = BufferObject<()>;

    fn lock_front_buffer(&mut self) -> io::Result<BufferObject<()>> {
        // SAFETY: only called right after the rendering context swapped this
        // surface, and every locked buffer is dropped before the surface.
        unsafe { self.surface.lock_front_buffer() }
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err.to_string()))
    }

    fn release_buffer(&mut self, bo: BufferObject<()>) {
        // Dropping a surface buffer object hands it back to its surface.
        drop(bo);
    }
}

impl GpuBufferObject for BufferObject<()> {
    fn handle(&self) -> BufferHandle {
        // SAFETY: every handle variant of the union aliases the same 32-bit GEM handle.
        BufferHandle(unsafe { BufferObject::handle(self).u32_ })
    }

    fn width(&self) -> u32 {
        BufferObject::width(self)
    }

    fn height(&self) -> u32 {
        BufferObject::height(self)
    }

    fn stride(&self) -> u32 {
        BufferObject::stride(self)
    }
}
