//! # Swap-Chain Orchestrator
//!
//! The per-frame driver for accelerated windows. Buffer objects move through
//! three roles: drawn into by the renderer, locked as `pending_next` once the
//! context swapped, and `current_front` once the flip that shows them has been
//! waited on. The previous front is only handed back to the surface after that
//! wait, so the renderer never draws into a buffer that is still on screen.

use tracing::{debug, error, warn};

use crate::accel::{framebuffer_for, AcceleratedPath, GpuDevice, GpuSurface, RenderContext};
use crate::device::DisplayDevice;
use crate::error::{KmsError, Result};
use crate::flip::{PageFlipSync, Presented};
use crate::kms::KmsBackend;
use crate::types::OutputTarget;

/// Per-frame knobs of the accelerated present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SwapOptions {
    /// Wait for the flip right after queueing it instead of at the start of the next frame.
    pub double_buffer: bool,
    /// The display mode changed since the last frame.
    pub mode_dirty: bool,
}

impl<G, C> AcceleratedPath<G, C>
where
    G: GpuDevice,
    C: RenderContext<G::Surface>,
{
    /// Presents the frame the rendering context just finished.
    ///
    /// Context-swap, buffer-lock and framebuffer failures abort the frame.
    /// Failed waits are logged and the frame goes on.
    pub fn swap_window<B: KmsBackend>(
        &mut self,
        device: &mut DisplayDevice<B>,
        sync: &mut PageFlipSync,
        target: &OutputTarget,
        options: SwapOptions,
    ) -> Result<Presented> {
        // Recreate the surfaces if the display mode has changed.
        if options.mode_dirty || self.surface.is_none() {
            if let Ok(dev) = device.device() {
                if let Err(err) = sync.wait_for_completion(dev) {
                    warn!(error = %err, "Wait for pageflip before surface recreation failed");
                }
            }
            self.create_surfaces(device.device().ok(), &target.mode)?;
        }

        let dev = device.device()?;

        // The previous front can only be released once the flip away from it completed.
        if let Err(err) = sync.wait_for_completion(dev) {
            warn!(error = %err, "Wait for previous pageflip failed");
        }

        let surface = self.surface.as_mut().ok_or(KmsError::NotInitialized("GPU surface"))?;
        if let Some(bo) = self.current_front.take() {
            surface.release_buffer(bo);
        }
        self.current_front = self.pending_next.take();

        self.context.swap_buffers().map_err(|err| {
            error!(error = %err, "Swapping the rendering context failed");
            KmsError::ContextLoadFailure(err.to_string())
        })?;

        let next = surface.lock_front_buffer().map_err(|err| {
            error!(error = %err, "Could not lock front buffer on GPU surface");
            KmsError::AllocationFailure { what: "locked front buffer".into(), source: Some(err) }
        })?;
        let next = self.pending_next.insert(next);

        let framebuffer = framebuffer_for(&mut self.framebuffers, dev, &*next)?;

        if self.current_front.is_none() {
            // First frame on this surface: the CRTC has to be configured before it can flip.
            return sync.request_presentation(dev, target, framebuffer, true, false);
        }

        let async_flip = self.swap_interval == 0 && device.supports_async_flip();
        let presented = sync.request_presentation(dev, target, framebuffer, false, async_flip)?;

        if options.double_buffer {
            if let Err(err) = sync.wait_for_completion(dev) {
                warn!(error = %err, "Immediate wait for pageflip failed");
            }
        }
        debug!(fb = %framebuffer, async_flip, "Accelerated frame queued");
        Ok(presented)
    }
}
