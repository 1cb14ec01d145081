//! # Window Presenter
//!
//! Ties one window to one output and decides which presentation path it uses.
//! A window presents either through dumb buffers (software rendering) or
//! through the GPU (accelerated rendering), never both: switching tears the
//! previous path down completely, descriptor included, before the other one is
//! brought up.

use tracing::{debug, info, warn};

use crate::accel::{AcceleratedPath, GpuBackend, GpuDevice, RenderContext};
use crate::config::PresentConfig;
use crate::device::DisplayDevice;
use crate::error::{KmsError, Result};
use crate::flip::{PageFlipSync, Presented};
use crate::kms::{KmsBackend, KmsDevice};
use crate::software::SoftwarePath;
use crate::swapchain::SwapOptions;
use crate::types::{DisplayMode, OutputTarget, PixelFormat, Rect, SoftwareSurface};

type MappingOf<B> = <<B as KmsBackend>::Device as KmsDevice>::Mapping;

/// The presentation path a window is currently using.
pub enum Presentation<M, G: GpuDevice, C> {
    Inactive,
    Software(SoftwarePath<M>),
    Accelerated(AcceleratedPath<G, C>),
}

impl<M, G: GpuDevice, C> Presentation<M, G, C> {
    pub fn name(&self) -> &'static str {
        match self {
            Presentation::Inactive => "inactive",
            Presentation::Software(_) => "software",
            Presentation::Accelerated(_) => "accelerated",
        }
    }
}

pub struct WindowPresenter<B, GB, C>
where
    B: KmsBackend,
    GB: GpuBackend<B::Device>,
{
    device: DisplayDevice<B>,
    gpu_backend: GB,
    output: OutputTarget,
    config: PresentConfig,
    sync: PageFlipSync,
    mode_dirty: bool,
    window_framebuffer: Option<SoftwareSurface>,
    presentation: Presentation<MappingOf<B>, GB::Device, C>,
}

impl<B, GB, C> WindowPresenter<B, GB, C>
where
    B: KmsBackend,
    GB: GpuBackend<B::Device>,
    C: RenderContext<<GB::Device as GpuDevice>::Surface>,
{
    /// A presenter for `output`. No device resources are acquired until a path is activated.
    pub fn new(backend: B, gpu_backend: GB, output: OutputTarget, config: PresentConfig) -> Self {
        let device = DisplayDevice::new(backend, config.device_path.clone());
        let sync = PageFlipSync::new(output.crtc);
        Self {
            device,
            gpu_backend,
            output,
            config,
            sync,
            mode_dirty: false,
            window_framebuffer: None,
            presentation: Presentation::Inactive,
        }
    }

    pub fn presentation(&self) -> &Presentation<MappingOf<B>, GB::Device, C> {
        &self.presentation
    }

    pub fn device(&self) -> &DisplayDevice<B> {
        &self.device
    }

    pub fn output(&self) -> &OutputTarget {
        &self.output
    }

    pub fn config(&self) -> &PresentConfig {
        &self.config
    }

    pub fn sync(&self) -> &PageFlipSync {
        &self.sync
    }

    /// Switches the window to dumb-buffer presentation.
    ///
    /// The first frame afterwards is a mode-set. A software path whose buffers
    /// are gone (a failed rebuild) is brought up again from scratch.
    pub fn activate_software(&mut self) -> Result<()> {
        if let Presentation::Software(path) = &self.presentation {
            if path.pool().is_initialized() {
                return Ok(());
            }
        }
        self.teardown();

        match SoftwarePath::init(&mut self.device, &self.output, &mut self.sync) {
            Ok(path) => {
                self.presentation = Presentation::Software(path);
                self.mode_dirty = false;
                info!(crtc = %self.output.crtc, "Window switched to software presentation");
                Ok(())
            }
            Err(err) => {
                self.device.close();
                Err(err)
            }
        }
    }

    /// Switches the window to GPU presentation with `context`.
    ///
    /// Surfaces are created on the first [`swap_window`](Self::swap_window).
    pub fn activate_accelerated(&mut self, context: C) -> Result<()> {
        self.window_framebuffer = None;
        self.teardown();

        let mut path = AcceleratedPath::init(&mut self.device, &self.gpu_backend, context)?;
        if let Err(err) = path.set_swap_interval(self.config.swap_interval) {
            path.deinit(&mut self.device);
            return Err(err);
        }
        self.sync.reset();
        self.mode_dirty = false;
        self.presentation = Presentation::Accelerated(path);
        info!(crtc = %self.output.crtc, "Window switched to accelerated presentation");
        Ok(())
    }

    /// Creates the CPU-side framebuffer the application draws into, sized to the current mode.
    ///
    /// Activates software presentation if no path is active yet.
    pub fn create_window_framebuffer(&mut self) -> Result<&mut SoftwareSurface> {
        if matches!(self.presentation, Presentation::Accelerated(_)) {
            return Err(KmsError::ModeConflict);
        }
        self.activate_software()?;
        let (width, height) = self.output.mode.size();
        debug!(width, height, "Creating window framebuffer");
        Ok(self.window_framebuffer.insert(SoftwareSurface::new(width, height, PixelFormat::Argb8888)))
    }

    /// Drops the window framebuffer and the dumb buffers behind it.
    pub fn destroy_window_framebuffer(&mut self) {
        if self.window_framebuffer.take().is_none() {
            return;
        }
        if matches!(self.presentation, Presentation::Software(_)) {
            self.teardown();
        }
    }

    pub fn window_framebuffer_mut(&mut self) -> Option<&mut SoftwareSurface> {
        self.window_framebuffer.as_mut()
    }

    /// Presents the window framebuffer.
    pub fn present_software(&mut self, dirty: &[Rect]) -> Result<Presented> {
        let path = match &mut self.presentation {
            Presentation::Software(path) => path,
            Presentation::Accelerated(_) => return Err(KmsError::ModeConflict),
            Presentation::Inactive => return Err(KmsError::NotInitialized("software presentation")),
        };
        let source = self
            .window_framebuffer
            .as_ref()
            .ok_or(KmsError::NotInitialized("window framebuffer"))?;
        present_through(path, &mut self.device, &mut self.sync, &self.output, source, dirty, &mut self.mode_dirty)
    }

    /// Presents a caller-owned software frame.
    pub fn present_software_from(&mut self, source: &SoftwareSurface, dirty: &[Rect]) -> Result<Presented> {
        let path = match &mut self.presentation {
            Presentation::Software(path) => path,
            Presentation::Accelerated(_) => return Err(KmsError::ModeConflict),
            Presentation::Inactive => return Err(KmsError::NotInitialized("software presentation")),
        };
        present_through(path, &mut self.device, &mut self.sync, &self.output, source, dirty, &mut self.mode_dirty)
    }

    /// Presents the frame the rendering context just finished.
    pub fn swap_window(&mut self) -> Result<Presented> {
        let path = match &mut self.presentation {
            Presentation::Accelerated(path) => path,
            Presentation::Software(_) => return Err(KmsError::ModeConflict),
            Presentation::Inactive => return Err(KmsError::NotInitialized("accelerated presentation")),
        };
        let options = SwapOptions {
            double_buffer: self.config.double_buffer,
            mode_dirty: std::mem::take(&mut self.mode_dirty),
        };
        path.swap_window(&mut self.device, &mut self.sync, &self.output, options)
    }

    /// Records a new display mode; buffers are recreated on the next present.
    pub fn set_display_mode(&mut self, mode: DisplayMode) {
        if mode != self.output.mode {
            debug!(from = %self.output.mode.name, to = %mode.name, "Display mode changed");
            self.output.mode = mode;
            self.mode_dirty = true;
        }
    }

    /// Accepts 0 (flip immediately where supported) or 1 (sync to vblank).
    pub fn set_swap_interval(&mut self, interval: u32) -> Result<()> {
        if let Presentation::Accelerated(path) = &mut self.presentation {
            path.set_swap_interval(interval)?;
        } else if interval > 1 {
            return Err(KmsError::InvalidSwapInterval(interval));
        }
        self.config.swap_interval = interval;
        Ok(())
    }

    /// Tears down whichever path is active. Idempotent.
    pub fn destroy(&mut self) {
        self.window_framebuffer = None;
        self.teardown();
    }

    fn teardown(&mut self) {
        match std::mem::replace(&mut self.presentation, Presentation::Inactive) {
            Presentation::Inactive => {}
            Presentation::Software(mut path) => {
                path.destroy(&mut self.device, &mut self.sync);
                info!("Software presentation torn down");
            }
            Presentation::Accelerated(mut path) => {
                if let Ok(dev) = self.device.device() {
                    if let Err(err) = self.sync.wait_for_completion(dev) {
                        warn!(error = %err, "Wait for pageflip before teardown failed");
                    }
                }
                path.deinit(&mut self.device);
                info!("Accelerated presentation torn down");
            }
        }
        self.device.close();
        self.sync.reset();
    }
}

/// Presents one software frame, keeping the mode change pending if the
/// buffers could not be rebuilt for it.
fn present_through<B: KmsBackend>(
    path: &mut SoftwarePath<MappingOf<B>>,
    device: &mut DisplayDevice<B>,
    sync: &mut PageFlipSync,
    output: &OutputTarget,
    source: &SoftwareSurface,
    dirty: &[Rect],
    mode_dirty: &mut bool,
) -> Result<Presented> {
    let mode_changed = std::mem::take(mode_dirty);
    let result = path.present(device, sync, output, source, dirty, mode_changed);
    if mode_changed && !path.pool().is_initialized() {
        *mode_dirty = true;
    }
    result
}

impl<B, GB, C> std::fmt::Debug for WindowPresenter<B, GB, C>
where
    B: KmsBackend,
    GB: GpuBackend<B::Device>,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowPresenter")
            .field("device", &self.device)
            .field("output", &self.output)
            .field("presentation", &self.presentation.name())
            .field("sync", &self.sync)
            .field("mode_dirty", &self.mode_dirty)
            .finish()
    }
}
