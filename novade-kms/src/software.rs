//! # Software Present Path
//!
//! Copies a software-rendered frame into the back dumb buffer and hands that
//! buffer to the page-flip synchronizer. Buffer roles swap after every frame,
//! including frames whose flip or mode-set failed.

use tracing::{debug, error, info, trace, warn};

use crate::device::DisplayDevice;
use crate::dumb::{DumbBuffer, DumbBufferPool};
use crate::error::{KmsError, Result};
use crate::flip::{PageFlipSync, Presented};
use crate::kms::{KmsBackend, KmsDevice};
use crate::types::{OutputTarget, Rect, SoftwareSurface};

fn check_source(source: &SoftwareSurface) -> Result<()> {
    if source.is_well_formed() {
        return Ok(());
    }
    Err(KmsError::InvalidSurface(format!(
        "{}x{} at pitch {} needs more than the {} bytes provided",
        source.width,
        source.height,
        source.pitch,
        source.pixels.len()
    )))
}

/// Copies `source` into `dst` row by row, honouring both pitches.
///
/// Returns the number of rows copied. Fails without touching `dst` if the
/// source pixels do not cover its declared size and pitch.
pub fn copy_surface<M: AsRef<[u8]> + AsMut<[u8]>>(source: &SoftwareSurface, dst: &mut DumbBuffer<M>) -> Result<u32> {
    check_source(source)?;
    let rows = source.height.min(dst.height());
    let row_bytes = (source.width.min(dst.width()) * source.bytes_per_pixel()) as usize;
    let dst_pitch = dst.pitch() as usize;
    let pixels = dst.pixels_mut();
    for y in 0..rows {
        let src_row = &source.row(y)[..row_bytes];
        let start = y as usize * dst_pitch;
        pixels[start..start + row_bytes].copy_from_slice(src_row);
    }
    Ok(rows)
}

/// The dumb-buffer presentation state of one window.
#[derive(Debug)]
pub struct SoftwarePath<M> {
    pool: DumbBufferPool<M>,
}

impl<M: AsRef<[u8]> + AsMut<[u8]>> SoftwarePath<M> {
    /// Opens the device and creates the buffer pool for `target`'s mode.
    pub fn init<B>(device: &mut DisplayDevice<B>, target: &OutputTarget, sync: &mut PageFlipSync) -> Result<Self>
    where
        B: KmsBackend,
        B::Device: KmsDevice<Mapping = M>,
    {
        let mut pool = DumbBufferPool::new();
        pool.create_all(device, &target.mode)?;
        sync.reset();
        info!(crtc = %target.crtc, "Software presentation ready");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &DumbBufferPool<M> {
        &self.pool
    }

    /// Presents one software-rendered frame.
    ///
    /// `mode_changed` recreates the pool at the new mode and forces a mode-set.
    /// If that rebuild fails the descriptor is closed and the pool stays empty;
    /// presenting again with `mode_changed` retries it.
    /// Dirty rectangles are accepted for bookkeeping; the whole surface is copied.
    pub fn present<B>(
        &mut self,
        device: &mut DisplayDevice<B>,
        sync: &mut PageFlipSync,
        target: &OutputTarget,
        source: &SoftwareSurface,
        dirty: &[Rect],
        mode_changed: bool,
    ) -> Result<Presented>
    where
        B: KmsBackend,
        B::Device: KmsDevice<Mapping = M>,
    {
        if !self.pool.is_initialized() && !mode_changed {
            return Err(KmsError::NotInitialized("dumb buffer pool"));
        }
        check_source(source)?;

        if mode_changed {
            if let Ok(dev) = device.device() {
                if let Err(err) = sync.wait_for_completion(dev) {
                    warn!(error = %err, "Wait for pageflip before resize failed");
                }
            }
            debug!(mode = %target.mode.name, "Display mode changed, recreating dumb buffers");
            if let Err(err) = self.pool.create_all(device, &target.mode) {
                error!(mode = %target.mode.name, error = %err, "Recreating dumb buffers failed");
                self.pool.destroy_all(device);
                sync.reset();
                return Err(err);
            }
            sync.mark_modeset_pending();
        }

        let dev = device.device()?;
        if let Err(err) = sync.wait_for_completion(dev) {
            warn!(error = %err, "Wait for previous pageflip failed");
        }

        let back = self.pool.back_index();
        let buffer = self
            .pool
            .back_buffer_mut()
            .ok_or(KmsError::NotInitialized("dumb back buffer"))?;
        let rows = copy_surface(source, buffer)?;
        let framebuffer = buffer.framebuffer();
        trace!(slot = back, rows, dirty = dirty.len(), fb = %framebuffer, "Copied frame into dumb buffer");

        let result = sync.request_presentation(dev, target, framebuffer, false, false);
        self.pool.swap();
        result
    }

    /// Releases the pool and closes the device. Idempotent.
    pub fn destroy<B>(&mut self, device: &mut DisplayDevice<B>, sync: &mut PageFlipSync)
    where
        B: KmsBackend,
        B::Device: KmsDevice<Mapping = M>,
    {
        if let Ok(dev) = device.device() {
            if let Err(err) = sync.wait_for_completion(dev) {
                warn!(error = %err, "Wait for pageflip before teardown failed");
            }
        }
        self.pool.destroy_all(device);
        sync.reset();
    }
}
