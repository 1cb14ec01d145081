//! # Accelerated Surface Manager
//!
//! GPU-backed presentation: a GPU device created on the KMS descriptor, a
//! presentable surface sized to the display mode, and the rendering context
//! bound to it. Buffer objects locked from the surface are scanned out through
//! framebuffers that are created on first use and cached per buffer handle.
//!
//! Device resources are only created when a window actually presents through
//! this path, since other presentation APIs may need the same device
//! exclusively.

use std::collections::HashMap;
use std::fmt;
use std::io;

use tracing::{debug, info, warn};

use crate::device::DisplayDevice;
use crate::error::{KmsError, Result};
use crate::kms::{AddFramebufferRequest, DriverCapability, KmsBackend, KmsDevice};
use crate::types::{BufferHandle, DisplayMode, FramebufferId};

#[cfg(feature = "backend_gbm")]
pub mod gbm_backend;

/// A buffer object the GPU rendered into.
pub trait GpuBufferObject {
    fn handle(&self) -> BufferHandle;
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn stride(&self) -> u32;
}

/// A presentable GPU surface handing out buffer objects.
pub trait GpuSurface {
    type BufferObject: GpuBufferObject;

    /// Locks the buffer the last swap finished, so the renderer cannot draw into it.
    fn lock_front_buffer(&mut self) -> io::Result<Self::BufferObject>;
    /// Hands a locked buffer back to the surface.
    fn release_buffer(&mut self, bo: Self::BufferObject);
}

/// The GPU device object living on a KMS descriptor.
pub trait GpuDevice {
    type Surface: GpuSurface;

    fn create_surface(&mut self, width: u32, height: u32) -> io::Result<Self::Surface>;
}

/// Creates GPU devices for a given kind of KMS device.
pub trait GpuBackend<D: KmsDevice> {
    type Device: GpuDevice;

    fn create_device(&self, kms: &D) -> io::Result<Self::Device>;
}

/// A rendering context that can draw into and swap a GPU surface.
pub trait RenderContext<S> {
    type Error: fmt::Display;

    /// Creates the context's window surface on `surface` and makes it current.
    fn bind_surface(&mut self, surface: &mut S) -> std::result::Result<(), Self::Error>;
    /// Makes no surface current and drops the window surface.
    fn unbind_surface(&mut self);
    fn swap_buffers(&mut self) -> std::result::Result<(), Self::Error>;
}

pub(crate) type BufferObjectOf<G> = <<G as GpuDevice>::Surface as GpuSurface>::BufferObject;

/// Accelerated presentation state of one window.
pub struct AcceleratedPath<G: GpuDevice, C> {
    pub(crate) gpu: Option<G>,
    pub(crate) surface: Option<G::Surface>,
    pub(crate) current_front: Option<BufferObjectOf<G>>,
    pub(crate) pending_next: Option<BufferObjectOf<G>>,
    pub(crate) framebuffers: HashMap<BufferHandle, FramebufferId>,
    pub(crate) context: C,
    pub(crate) surface_bound: bool,
    pub(crate) swap_interval: u32,
}

impl<G, C> AcceleratedPath<G, C>
where
    G: GpuDevice,
    C: RenderContext<G::Surface>,
{
    /// Reopens the descriptor, claims master, and creates the GPU device on it.
    ///
    /// Master and async-flip support are best-effort. On failure the
    /// descriptor is closed again and acceleration stays disabled.
    pub fn init<B, GB>(device: &mut DisplayDevice<B>, backend: &GB, context: C) -> Result<Self>
    where
        B: KmsBackend,
        GB: GpuBackend<B::Device, Device = G>,
    {
        device.reopen()?;
        device.claim_master();
        if let Err(err) = device.query_capability(DriverCapability::AsyncPageFlip) {
            debug!(error = %err, "Async page flips unavailable");
        }

        let gpu = match backend.create_device(device.device()?) {
            Ok(gpu) => gpu,
            Err(err) => {
                device.close();
                return Err(KmsError::AllocationFailure {
                    what: "GPU device".into(),
                    source: Some(err),
                });
            }
        };
        info!(master = device.is_master(), async_flip = device.supports_async_flip(), "GPU device created");
        Ok(Self {
            gpu: Some(gpu),
            surface: None,
            current_front: None,
            pending_next: None,
            framebuffers: HashMap::new(),
            context,
            surface_bound: false,
            swap_interval: 1,
        })
    }

    pub fn has_surface(&self) -> bool {
        self.surface.is_some()
    }

    pub fn context(&self) -> &C {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut C {
        &mut self.context
    }

    pub fn swap_interval(&self) -> u32 {
        self.swap_interval
    }

    pub fn set_swap_interval(&mut self, interval: u32) -> Result<()> {
        if interval > 1 {
            return Err(KmsError::InvalidSwapInterval(interval));
        }
        self.swap_interval = interval;
        Ok(())
    }

    /// The buffer object currently scanned out, if any.
    pub fn current_front(&self) -> Option<&BufferObjectOf<G>> {
        self.current_front.as_ref()
    }

    /// The buffer object locked for the next flip, if any.
    pub fn pending_next(&self) -> Option<&BufferObjectOf<G>> {
        self.pending_next.as_ref()
    }

    /// Creates the GPU surface for `mode` and binds the rendering context to it.
    pub fn create_surfaces<D: KmsDevice>(&mut self, dev: Option<&D>, mode: &DisplayMode) -> Result<()> {
        self.destroy_surfaces(dev);
        let gpu = self.gpu.as_mut().ok_or(KmsError::NotInitialized("GPU device"))?;
        let (width, height) = mode.size();
        let mut surface = gpu.create_surface(width, height).map_err(|err| KmsError::AllocationFailure {
            what: format!("GPU surface {}x{}", width, height),
            source: Some(err),
        })?;
        self.context
            .bind_surface(&mut surface)
            .map_err(|err| KmsError::ContextLoadFailure(format!("binding window surface: {}", err)))?;
        self.surface_bound = true;
        self.surface = Some(surface);
        debug!(width, height, "GPU surface created");
        Ok(())
    }

    /// Detaches the context, releases held buffer objects and their
    /// framebuffers, and destroys the surface. Every step is skipped when its
    /// resource does not exist, so calling this twice is harmless.
    pub fn destroy_surfaces<D: KmsDevice>(&mut self, dev: Option<&D>) {
        if self.surface_bound {
            self.context.unbind_surface();
            self.surface_bound = false;
        }

        if let Some(surface) = self.surface.as_mut() {
            if let Some(bo) = self.current_front.take() {
                surface.release_buffer(bo);
            }
            if let Some(bo) = self.pending_next.take() {
                surface.release_buffer(bo);
            }
        }
        self.current_front = None;
        self.pending_next = None;

        for (handle, fb) in self.framebuffers.drain() {
            if let Some(dev) = dev {
                if let Err(err) = dev.remove_framebuffer(fb) {
                    warn!(handle = %handle, fb = %fb, error = %err, "Failed to remove BO framebuffer");
                }
            }
        }

        if self.surface.take().is_some() {
            debug!("GPU surface destroyed");
        }
    }

    /// Destroys the surfaces (if still present), the GPU device, and closes the descriptor.
    pub fn deinit<B: KmsBackend>(&mut self, device: &mut DisplayDevice<B>) {
        self.destroy_surfaces(device.device().ok());
        if self.gpu.take().is_some() {
            info!("GPU device destroyed");
        }
        device.close();
    }

    pub fn is_initialized(&self) -> bool {
        self.gpu.is_some()
    }
}

/// Looks up, or creates and caches, the framebuffer scanning out `bo`.
pub(crate) fn framebuffer_for<D: KmsDevice, BO: GpuBufferObject>(
    cache: &mut HashMap<BufferHandle, FramebufferId>,
    dev: &D,
    bo: &BO,
) -> Result<FramebufferId> {
    let handle = bo.handle();
    if let Some(fb) = cache.get(&handle) {
        return Ok(*fb);
    }
    let req = AddFramebufferRequest {
        width: bo.width(),
        height: bo.height(),
        depth: 24,
        bpp: 32,
        pitch: bo.stride(),
        handle,
    };
    let fb = dev
        .add_framebuffer(&req)
        .map_err(|err| KmsError::allocation(format!("framebuffer for buffer object {}", handle), err))?;
    cache.insert(handle, fb);
    Ok(fb)
}

impl<G: GpuDevice, C> fmt::Debug for AcceleratedPath<G, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcceleratedPath")
            .field("gpu", &self.gpu.is_some())
            .field("surface", &self.surface.is_some())
            .field("current_front", &self.current_front.as_ref().map(GpuBufferObject::handle))
            .field("pending_next", &self.pending_next.as_ref().map(GpuBufferObject::handle))
            .field("framebuffers", &self.framebuffers.len())
            .field("swap_interval", &self.swap_interval)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod fake;

#[cfg(test)]
mod tests {
    use super::fake::{FakeContext, FakeGpu, FakeGpuBackend, GpuCall};
    use super::*;
    use crate::kms::fake::{Call, FakeKernel, FakeKms};

    type Path = AcceleratedPath<FakeGpu, FakeContext>;

    fn init(kernel: &FakeKernel, gpu: &FakeGpuBackend) -> (DisplayDevice<FakeKernel>, Path) {
        let mut device = DisplayDevice::new(kernel.clone(), "/dev/dri/card0");
        let path = AcceleratedPath::init(&mut device, gpu, gpu.context()).unwrap();
        (device, path)
    }

    #[test]
    fn init_reopens_and_claims_master() {
        let kernel = FakeKernel::new();
        let gpu = FakeGpuBackend::new();
        let mut device = DisplayDevice::new(kernel.clone(), "/dev/dri/card0");
        device.open().unwrap();

        let path: Path = AcceleratedPath::init(&mut device, &gpu, gpu.context()).unwrap();
        assert!(path.is_initialized());
        assert!(device.is_master());
        let calls = kernel.calls();
        assert_eq!(&calls[..3], &[Call::Open("/dev/dri/card0".into()), Call::Close, Call::Open("/dev/dri/card0".into())]);
        assert!(calls.contains(&Call::Master));
    }

    #[test]
    fn gpu_device_failure_leaves_acceleration_disabled() {
        let kernel = FakeKernel::new();
        let gpu = FakeGpuBackend::new();
        gpu.state_mut().fail_device = true;
        let mut device = DisplayDevice::new(kernel.clone(), "/dev/dri/card0");

        let err = AcceleratedPath::<FakeGpu, FakeContext>::init(&mut device, &gpu, gpu.context()).unwrap_err();
        assert!(matches!(err, KmsError::AllocationFailure { .. }));
        assert!(!device.is_open());
    }

    #[test]
    fn surface_failure_is_allocation_failure() {
        let kernel = FakeKernel::new();
        let gpu = FakeGpuBackend::new();
        let (device, mut path) = init(&kernel, &gpu);
        gpu.state_mut().fail_surface = true;

        let err = path.create_surfaces(device.device().ok(), &DisplayMode::new(640, 480, 60)).unwrap_err();
        assert!(matches!(err, KmsError::AllocationFailure { .. }));
        assert!(!path.has_surface());
    }

    #[test]
    fn destroy_surfaces_releases_everything_once() {
        let kernel = FakeKernel::new();
        let gpu = FakeGpuBackend::new();
        let (device, mut path) = init(&kernel, &gpu);
        let dev = device.device().unwrap();
        path.create_surfaces(Some(dev), &DisplayMode::new(640, 480, 60)).unwrap();

        let surface = path.surface.as_mut().unwrap();
        let front = surface.lock_front_buffer().unwrap();
        let next = surface.lock_front_buffer().unwrap();
        framebuffer_for(&mut path.framebuffers, dev, &front).unwrap();
        framebuffer_for(&mut path.framebuffers, dev, &next).unwrap();
        path.current_front = Some(front);
        path.pending_next = Some(next);

        path.destroy_surfaces(Some(dev));
        path.destroy_surfaces(Some(dev));
        path.destroy_surfaces::<FakeKms>(None);

        let state = gpu.state();
        assert_eq!(state.locked.len(), 0);
        assert_eq!(state.live_surfaces, 0);
        assert_eq!(state.calls.iter().filter(|c| **c == GpuCall::Unbind).count(), 1);
        assert!(kernel.state().live_fbs.is_empty());
        assert!(!path.has_surface());
    }

    #[test]
    fn framebuffers_are_cached_per_handle() {
        let kernel = FakeKernel::new();
        let gpu = FakeGpuBackend::new();
        let (device, mut path) = init(&kernel, &gpu);
        let dev = device.device().unwrap();
        path.create_surfaces(Some(dev), &DisplayMode::new(64, 64, 60)).unwrap();
        let bo = path.surface.as_mut().unwrap().lock_front_buffer().unwrap();

        let a = framebuffer_for(&mut path.framebuffers, dev, &bo).unwrap();
        let b = framebuffer_for(&mut path.framebuffers, dev, &bo).unwrap();
        assert_eq!(a, b);
        assert_eq!(kernel.state().count(|c| matches!(c, Call::AddFb(_))), 1);
        path.surface.as_mut().unwrap().release_buffer(bo);
    }

    #[test]
    fn deinit_closes_the_descriptor() {
        let kernel = FakeKernel::new();
        let gpu = FakeGpuBackend::new();
        let (mut device, mut path) = init(&kernel, &gpu);
        path.create_surfaces(device.device().ok(), &DisplayMode::new(64, 64, 60)).unwrap();

        path.deinit(&mut device);
        path.deinit(&mut device);
        assert!(!path.is_initialized());
        assert!(!device.is_open());
        assert_eq!(kernel.state().open_descriptors, 0);
        assert_eq!(gpu.state().live_devices, 0);
    }

    #[test]
    fn swap_interval_accepts_only_zero_or_one() {
        let kernel = FakeKernel::new();
        let gpu = FakeGpuBackend::new();
        let (_device, mut path) = init(&kernel, &gpu);
        path.set_swap_interval(0).unwrap();
        assert_eq!(path.swap_interval(), 0);
        assert!(matches!(path.set_swap_interval(2), Err(KmsError::InvalidSwapInterval(2))));
        assert_eq!(path.swap_interval(), 0);
    }
}
