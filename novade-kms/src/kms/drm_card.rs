//! [`KmsDevice`] on top of a real `/dev/dri/card*` node.
//!
//! Dumb-buffer and framebuffer requests go straight through `drm-ffi` so the
//! kernel handles stay plain integers; mode-setting, flips, capabilities and
//! event decoding use the `drm` crate's control API.

use std::ffi::c_char;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::{AsFd, BorrowedFd};
use std::path::Path;

use drm::control::{self, connector, crtc, framebuffer, Device as ControlDevice, PageFlipFlags};
use drm::{Device as BasicDevice, DriverCapability as DrmCapability};
use memmap2::{MmapMut, MmapOptions};

use super::{
    AddFramebufferRequest, CreateDumbRequest, CreatedDumb, DriverCapability, KmsBackend, KmsDevice,
    KmsEvent, ModesetRequest, PageFlipRequest,
};
use crate::types::{BufferHandle, CrtcId, DisplayMode, FramebufferId};

/// An open DRM card.
#[derive(Debug)]
pub struct DrmCard {
    file: File,
}

impl DrmCard {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self { file })
    }
}

impl AsFd for DrmCard {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}

impl BasicDevice for DrmCard {}
impl ControlDevice for DrmCard {}

fn resource<H: From<control::RawResourceHandle>>(raw: u32, kind: &str) -> io::Result<H> {
    control::from_u32(raw).ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, format!("invalid {} id {}", kind, raw))
    })
}

fn mode_info(mode: &DisplayMode) -> drm_ffi::drm_mode_modeinfo {
    let mut name: [c_char; 32] = [0; 32];
    for (dst, src) in name.iter_mut().zip(mode.name.bytes().take(31)) {
        *dst = src as c_char;
    }
    let t = &mode.timings;
    drm_ffi::drm_mode_modeinfo {
        clock: t.clock,
        hdisplay: mode.width,
        hsync_start: t.hsync_start,
        hsync_end: t.hsync_end,
        htotal: t.htotal,
        hskew: t.hskew,
        vdisplay: mode.height,
        vsync_start: t.vsync_start,
        vsync_end: t.vsync_end,
        vtotal: t.vtotal,
        vscan: t.vscan,
        vrefresh: mode.refresh,
        flags: t.flags,
        type_: t.mode_type,
        name,
    }
}

impl KmsDevice for DrmCard {
    type Mapping = MmapMut;

    fn driver_capability(&self, cap: DriverCapability) -> io::Result<u64> {
        let cap = match cap {
            DriverCapability::DumbBuffer => DrmCapability::DumbBuffer,
            DriverCapability::AsyncPageFlip => DrmCapability::ASyncPageFlip,
        };
        self.get_driver_capability(cap)
    }

    fn acquire_master(&self) -> io::Result<()> {
        self.acquire_master_lock()
    }

    fn create_dumb(&self, req: &CreateDumbRequest) -> io::Result<CreatedDumb> {
        let created =
            drm_ffi::mode::dumbbuffer::create(self.as_fd(), req.width, req.height, req.bpp, 0)?;
        Ok(CreatedDumb {
            handle: BufferHandle(created.handle),
            pitch: created.pitch,
            size: created.size,
        })
    }

    fn destroy_dumb(&self, handle: BufferHandle) -> io::Result<()> {
        drm_ffi::mode::dumbbuffer::destroy(self.as_fd(), handle.raw()).map(|_| ())
    }

    fn map_dumb(&self, handle: BufferHandle) -> io::Result<u64> {
        let map = drm_ffi::mode::dumbbuffer::map(self.as_fd(), handle.raw(), 0, 0)?;
        Ok(map.offset)
    }

    fn mmap(&self, offset: u64, len: usize) -> io::Result<MmapMut> {
        // SAFETY: the offset comes from DRM_IOCTL_MODE_MAP_DUMB for a buffer of at
        // least `len` bytes; the kernel keeps the pages alive while they are mapped.
        unsafe { MmapOptions::new().offset(offset).len(len).map_mut(&self.file) }
    }

    fn add_framebuffer(&self, req: &AddFramebufferRequest) -> io::Result<FramebufferId> {
        let cmd = drm_ffi::mode::add_fb(
            self.as_fd(),
            req.width,
            req.height,
            req.pitch,
            req.bpp,
            req.depth,
            req.handle.raw(),
        )?;
        Ok(FramebufferId(cmd.fb_id))
    }

    fn remove_framebuffer(&self, fb: FramebufferId) -> io::Result<()> {
        drm_ffi::mode::rm_fb(self.as_fd(), fb.raw())
    }

    fn set_crtc(&self, req: &ModesetRequest) -> io::Result<()> {
        let crtc: crtc::Handle = resource(req.crtc.raw(), "crtc")?;
        let fb: framebuffer::Handle = resource(req.framebuffer.raw(), "framebuffer")?;
        let conn: connector::Handle = resource(req.connector.raw(), "connector")?;
        let mode = control::Mode::from(mode_info(&req.mode));
        ControlDevice::set_crtc(self, crtc, Some(fb), (0, 0), &[conn], Some(mode))
    }

    fn page_flip(&self, req: &PageFlipRequest) -> io::Result<()> {
        let crtc: crtc::Handle = resource(req.crtc.raw(), "crtc")?;
        let fb: framebuffer::Handle = resource(req.framebuffer.raw(), "framebuffer")?;
        let mut flags = PageFlipFlags::EVENT;
        if req.async_flip {
            flags |= PageFlipFlags::ASYNC;
        }
        ControlDevice::page_flip(self, crtc, fb, flags, None)
    }

    fn read_events(&self) -> io::Result<Vec<KmsEvent>> {
        let events = self.receive_events()?;
        #[allow(unreachable_patterns)]
        let decoded = events
            .map(|event| match event {
                control::Event::PageFlip(flip) => KmsEvent::PageFlip { crtc: CrtcId(u32::from(flip.crtc)) },
                control::Event::Vblank(_) => KmsEvent::Vblank { crtc: None },
                control::Event::Unknown(raw) => KmsEvent::Malformed(raw),
                _ => KmsEvent::Malformed(Vec::new()),
            })
            .collect();
        Ok(decoded)
    }
}

/// Opens [`DrmCard`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct DrmBackend;

impl KmsBackend for DrmBackend {
    type Device = DrmCard;

    fn open(&self, path: &Path) -> io::Result<DrmCard> {
        DrmCard::open(path)
    }
}
