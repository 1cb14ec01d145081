//! # Dumb Buffer Pool
//!
//! Two CPU-mappable scanout buffers sized to the active display mode. Each
//! buffer is a kernel dumb buffer wrapped in a framebuffer object and mapped
//! into process memory.
//!
//! A buffer only ever exists in one of two states: fully built (in a pool slot)
//! or gone. While a buffer is being built its kernel objects are held by a
//! construction guard that releases them, newest first, if any step fails.

use tracing::{debug, info, warn};

use crate::device::DisplayDevice;
use crate::error::{KmsError, Result};
use crate::kms::{AddFramebufferRequest, CreateDumbRequest, DriverCapability, KmsBackend, KmsDevice};
use crate::types::{BufferHandle, DisplayMode, FramebufferId};

/// Number of buffers in the pool: one scanned out, one drawn into.
pub const DUMB_BUFFER_COUNT: usize = 2;

const DUMB_BPP: u32 = 32;
const DUMB_DEPTH: u32 = 24;

/// A fully constructed dumb buffer.
#[derive(Debug)]
pub struct DumbBuffer<M> {
    width: u32,
    height: u32,
    bits_per_pixel: u32,
    pitch: u32,
    byte_size: u64,
    handle: BufferHandle,
    framebuffer: FramebufferId,
    mapping: M,
}

impl<M: AsRef<[u8]> + AsMut<[u8]>> DumbBuffer<M> {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn bits_per_pixel(&self) -> u32 {
        self.bits_per_pixel
    }

    pub fn pitch(&self) -> u32 {
        self.pitch
    }

    pub fn byte_size(&self) -> u64 {
        self.byte_size
    }

    pub fn handle(&self) -> BufferHandle {
        self.handle
    }

    pub fn framebuffer(&self) -> FramebufferId {
        self.framebuffer
    }

    pub fn pixels(&self) -> &[u8] {
        self.mapping.as_ref()
    }

    pub fn pixels_mut(&mut self) -> &mut [u8] {
        self.mapping.as_mut()
    }

    /// Unmaps, removes the framebuffer and destroys the kernel buffer, in that order.
    fn release<D: KmsDevice<Mapping = M>>(self, dev: Option<&D>) {
        let DumbBuffer { handle, framebuffer, mapping, .. } = self;
        drop(mapping);
        if let Some(dev) = dev {
            if let Err(err) = dev.remove_framebuffer(framebuffer) {
                warn!(fb = %framebuffer, error = %err, "Failed to remove dumb framebuffer");
            }
            if let Err(err) = dev.destroy_dumb(handle) {
                warn!(handle = %handle, error = %err, "Failed to destroy dumb buffer");
            }
        }
    }
}

/// Holds the kernel objects of a buffer that is still being built.
/// Whatever is left in it when dropped is released newest first. The mapping
/// is the last step, so a failed build never holds one.
struct BufferUnderConstruction<'a, D: KmsDevice> {
    dev: &'a D,
    created: Option<BufferHandle>,
    framebuffer: Option<FramebufferId>,
}

impl<'a, D: KmsDevice> BufferUnderConstruction<'a, D> {
    fn new(dev: &'a D) -> Self {
        Self { dev, created: None, framebuffer: None }
    }

    fn build(mut self, slot: usize, width: u32, height: u32) -> Result<DumbBuffer<D::Mapping>> {
        let req = CreateDumbRequest { width, height, bpp: DUMB_BPP };
        let created = self.dev.create_dumb(&req).map_err(|err| {
            KmsError::allocation(format!("dumb buffer {} ({}x{})", slot, width, height), err)
        })?;
        self.created = Some(created.handle);

        let fb_req = AddFramebufferRequest {
            width,
            height,
            depth: DUMB_DEPTH,
            bpp: DUMB_BPP,
            pitch: created.pitch,
            handle: created.handle,
        };
        let framebuffer = self
            .dev
            .add_framebuffer(&fb_req)
            .map_err(|err| KmsError::allocation(format!("framebuffer for dumb buffer {}", slot), err))?;
        self.framebuffer = Some(framebuffer);

        let offset = self
            .dev
            .map_dumb(created.handle)
            .map_err(|err| KmsError::mapping(format!("map request for dumb buffer {}", slot), err))?;
        let len = usize::try_from(created.size).map_err(|_| {
            KmsError::mapping(
                format!("dumb buffer {} size {}", slot, created.size),
                std::io::Error::from(std::io::ErrorKind::InvalidData),
            )
        })?;
        let mapping = self
            .dev
            .mmap(offset, len)
            .map_err(|err| KmsError::mapping(format!("mmap of dumb buffer {}", slot), err))?;

        debug!(slot, handle = %created.handle, fb = %framebuffer, pitch = created.pitch, "Created dumb buffer");
        self.created = None;
        self.framebuffer = None;
        Ok(DumbBuffer {
            width,
            height,
            bits_per_pixel: DUMB_BPP,
            pitch: created.pitch,
            byte_size: created.size,
            handle: created.handle,
            framebuffer,
            mapping,
        })
    }
}

impl<D: KmsDevice> Drop for BufferUnderConstruction<'_, D> {
    fn drop(&mut self) {
        if let Some(fb) = self.framebuffer.take() {
            if let Err(err) = self.dev.remove_framebuffer(fb) {
                warn!(fb = %fb, error = %err, "Rollback: failed to remove framebuffer");
            }
        }
        if let Some(handle) = self.created.take() {
            if let Err(err) = self.dev.destroy_dumb(handle) {
                warn!(handle = %handle, error = %err, "Rollback: failed to destroy dumb buffer");
            }
        }
    }
}

/// The pair of dumb buffers used by the software present path.
#[derive(Debug)]
pub struct DumbBufferPool<M> {
    slots: [Option<DumbBuffer<M>>; DUMB_BUFFER_COUNT],
    back_index: usize,
    front_index: usize,
    initialized: bool,
}

impl<M> Default for DumbBufferPool<M> {
    fn default() -> Self {
        Self { slots: [None, None], back_index: 0, front_index: 1, initialized: false }
    }
}

impl<M: AsRef<[u8]> + AsMut<[u8]>> DumbBufferPool<M> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn back_index(&self) -> usize {
        self.back_index
    }

    pub fn front_index(&self) -> usize {
        self.front_index
    }

    pub fn buffer(&self, index: usize) -> Option<&DumbBuffer<M>> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    pub fn back_buffer(&self) -> Option<&DumbBuffer<M>> {
        self.buffer(self.back_index)
    }

    pub fn back_buffer_mut(&mut self) -> Option<&mut DumbBuffer<M>> {
        self.slots[self.back_index].as_mut()
    }

    /// Exchanges the back and front roles.
    pub fn swap(&mut self) {
        std::mem::swap(&mut self.back_index, &mut self.front_index);
    }

    /// Opens the device if needed and builds both buffers for `mode`.
    ///
    /// All-or-nothing: on failure every kernel object created so far is
    /// released and the pool is left uninitialized.
    pub fn create_all<B>(&mut self, device: &mut DisplayDevice<B>, mode: &DisplayMode) -> Result<()>
    where
        B: KmsBackend,
        B::Device: KmsDevice<Mapping = M>,
    {
        device.open()?;
        device.query_capability(DriverCapability::DumbBuffer)?;
        let dev = device.device()?;
        self.release_buffers(Some(dev));

        let (width, height) = mode.size();
        info!(width, height, "Creating dumb buffers");

        let mut built: Vec<DumbBuffer<M>> = Vec::with_capacity(DUMB_BUFFER_COUNT);
        for slot in 0..DUMB_BUFFER_COUNT {
            match BufferUnderConstruction::new(dev).build(slot, width, height) {
                Ok(buffer) => built.push(buffer),
                Err(err) => {
                    warn!(slot, error = %err, "Dumb buffer creation failed, rolling back");
                    for buffer in built.into_iter().rev() {
                        buffer.release(Some(dev));
                    }
                    return Err(err);
                }
            }
        }

        for (slot, buffer) in self.slots.iter_mut().zip(built) {
            *slot = Some(buffer);
        }
        self.back_index = 0;
        self.front_index = 1;
        self.initialized = true;
        Ok(())
    }

    /// Releases both buffers but keeps the device open.
    pub fn release_buffers<D: KmsDevice<Mapping = M>>(&mut self, dev: Option<&D>) {
        for slot in self.slots.iter_mut().rev() {
            if let Some(buffer) = slot.take() {
                buffer.release(dev);
            }
        }
        self.back_index = 0;
        self.front_index = 1;
        self.initialized = false;
    }

    /// Releases both buffers and closes the device descriptor. Idempotent.
    ///
    /// The descriptor is closed even if the pool was never built, so a failed
    /// [`create_all`](Self::create_all) leaves nothing open behind it.
    pub fn destroy_all<B>(&mut self, device: &mut DisplayDevice<B>)
    where
        B: KmsBackend,
        B::Device: KmsDevice<Mapping = M>,
    {
        if self.initialized {
            info!("Destroying dumb buffers");
            self.release_buffers(device.device().ok());
        }
        device.close();
    }
}
