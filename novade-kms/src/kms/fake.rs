//! Recording in-memory KMS device used by the unit tests.
//!
//! Every kernel request is appended to a shared call log, live kernel objects
//! are tracked so tests can assert nothing leaks, and any request kind can be
//! made to fail on its n-th occurrence.

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use super::{
    AddFramebufferRequest, CreateDumbRequest, CreatedDumb, DriverCapability, KmsBackend, KmsDevice,
    KmsEvent, ModesetRequest, PageFlipRequest,
};
use crate::types::{BufferHandle, CrtcId, FramebufferId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Open,
    Capability,
    Master,
    CreateDumb,
    DestroyDumb,
    MapDumb,
    Mmap,
    AddFb,
    RmFb,
    SetCrtc,
    PageFlip,
    ReadEvents,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Open(PathBuf),
    Close,
    Capability(DriverCapability),
    Master,
    CreateDumb(CreateDumbRequest),
    DestroyDumb(BufferHandle),
    MapDumb(BufferHandle),
    Mmap { offset: u64, len: usize },
    Unmap { offset: u64 },
    AddFb(AddFramebufferRequest),
    RmFb(FramebufferId),
    SetCrtc { crtc: CrtcId, fb: FramebufferId },
    PageFlip { crtc: CrtcId, fb: FramebufferId, async_flip: bool },
    ReadEvents,
}

#[derive(Debug)]
pub struct FakeState {
    pub calls: Vec<Call>,
    pub caps: HashMap<DriverCapability, u64>,
    pub pitch_padding: u32,
    pub live_dumbs: BTreeSet<u32>,
    pub live_fbs: BTreeSet<u32>,
    pub live_maps: usize,
    pub open_descriptors: usize,
    pub flip_in_flight: Option<CrtcId>,
    pub rejected_while_in_flight: usize,
    /// Delivered before the completion of the in-flight flip.
    pub queued_events: VecDeque<KmsEvent>,
    counters: HashMap<Op, usize>,
    failures: HashMap<Op, BTreeSet<usize>>,
    next_id: u32,
}

impl Default for FakeState {
    fn default() -> Self {
        let mut caps = HashMap::new();
        caps.insert(DriverCapability::DumbBuffer, 1);
        caps.insert(DriverCapability::AsyncPageFlip, 0);
        Self {
            calls: Vec::new(),
            caps,
            pitch_padding: 0,
            live_dumbs: BTreeSet::new(),
            live_fbs: BTreeSet::new(),
            live_maps: 0,
            open_descriptors: 0,
            flip_in_flight: None,
            rejected_while_in_flight: 0,
            queued_events: VecDeque::new(),
            counters: HashMap::new(),
            failures: HashMap::new(),
            next_id: 1,
        }
    }
}

impl FakeState {
    /// Counts the request and reports whether it was scripted to fail.
    fn tick(&mut self, op: Op) -> io::Result<()> {
        let count = self.counters.entry(op).or_insert(0);
        *count += 1;
        let n = *count;
        if self.failures.get(&op).map_or(false, |set| set.contains(&n)) {
            return Err(io::Error::from_raw_os_error(libc::EINVAL));
        }
        Ok(())
    }

    fn alloc_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.iter().filter(|c| pred(c)).count()
    }

    pub fn nothing_live(&self) -> bool {
        self.live_dumbs.is_empty() && self.live_fbs.is_empty() && self.live_maps == 0
    }
}

/// Cloneable handle to the shared fake kernel state.
#[derive(Debug, Clone, Default)]
pub struct FakeKernel(pub Rc<RefCell<FakeState>>);

impl FakeKernel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the `nth` (1-based) request of kind `op` fail with `EINVAL`.
    pub fn fail_nth(&self, op: Op, nth: usize) {
        self.0.borrow_mut().failures.entry(op).or_default().insert(nth);
    }

    pub fn state(&self) -> std::cell::Ref<'_, FakeState> {
        self.0.borrow()
    }

    pub fn state_mut(&self) -> std::cell::RefMut<'_, FakeState> {
        self.0.borrow_mut()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.0.borrow().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.0.borrow_mut().calls.clear();
    }

    pub fn device(&self) -> FakeKms {
        let mut state = self.0.borrow_mut();
        state.open_descriptors += 1;
        FakeKms { kernel: self.clone() }
    }
}

impl KmsBackend for FakeKernel {
    type Device = FakeKms;

    fn open(&self, path: &Path) -> io::Result<FakeKms> {
        {
            let mut state = self.0.borrow_mut();
            state.calls.push(Call::Open(path.to_path_buf()));
            state.tick(Op::Open)?;
        }
        Ok(self.device())
    }
}

#[derive(Debug)]
pub struct FakeKms {
    kernel: FakeKernel,
}

impl Drop for FakeKms {
    fn drop(&mut self) {
        let mut state = self.kernel.0.borrow_mut();
        state.calls.push(Call::Close);
        state.open_descriptors -= 1;
    }
}

#[derive(Debug)]
pub struct FakeMapping {
    kernel: FakeKernel,
    offset: u64,
    bytes: Vec<u8>,
}

impl AsRef<[u8]> for FakeMapping {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl AsMut<[u8]> for FakeMapping {
    fn as_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

impl Drop for FakeMapping {
    fn drop(&mut self) {
        let mut state = self.kernel.0.borrow_mut();
        state.calls.push(Call::Unmap { offset: self.offset });
        state.live_maps -= 1;
    }
}

impl KmsDevice for FakeKms {
    type Mapping = FakeMapping;

    fn driver_capability(&self, cap: DriverCapability) -> io::Result<u64> {
        let mut state = self.kernel.0.borrow_mut();
        state.calls.push(Call::Capability(cap));
        state.tick(Op::Capability)?;
        Ok(state.caps.get(&cap).copied().unwrap_or(0))
    }

    fn acquire_master(&self) -> io::Result<()> {
        let mut state = self.kernel.0.borrow_mut();
        state.calls.push(Call::Master);
        state.tick(Op::Master)
    }

    fn create_dumb(&self, req: &CreateDumbRequest) -> io::Result<CreatedDumb> {
        let mut state = self.kernel.0.borrow_mut();
        state.calls.push(Call::CreateDumb(*req));
        state.tick(Op::CreateDumb)?;
        let handle = state.alloc_id();
        state.live_dumbs.insert(handle);
        let pitch = req.width * req.bpp / 8 + state.pitch_padding;
        Ok(CreatedDumb {
            handle: BufferHandle(handle),
            pitch,
            size: u64::from(pitch) * u64::from(req.height),
        })
    }

    fn destroy_dumb(&self, handle: BufferHandle) -> io::Result<()> {
        let mut state = self.kernel.0.borrow_mut();
        state.calls.push(Call::DestroyDumb(handle));
        state.tick(Op::DestroyDumb)?;
        state.live_dumbs.remove(&handle.raw());
        Ok(())
    }

    fn map_dumb(&self, handle: BufferHandle) -> io::Result<u64> {
        let mut state = self.kernel.0.borrow_mut();
        state.calls.push(Call::MapDumb(handle));
        state.tick(Op::MapDumb)?;
        Ok(u64::from(handle.raw()) << 12)
    }

    fn mmap(&self, offset: u64, len: usize) -> io::Result<FakeMapping> {
        {
            let mut state = self.kernel.0.borrow_mut();
            state.calls.push(Call::Mmap { offset, len });
            state.tick(Op::Mmap)?;
            state.live_maps += 1;
        }
        Ok(FakeMapping { kernel: self.kernel.clone(), offset, bytes: vec![0; len] })
    }

    fn add_framebuffer(&self, req: &AddFramebufferRequest) -> io::Result<FramebufferId> {
        let mut state = self.kernel.0.borrow_mut();
        state.calls.push(Call::AddFb(*req));
        state.tick(Op::AddFb)?;
        let id = state.alloc_id();
        state.live_fbs.insert(id);
        Ok(FramebufferId(id))
    }

    fn remove_framebuffer(&self, fb: FramebufferId) -> io::Result<()> {
        let mut state = self.kernel.0.borrow_mut();
        state.calls.push(Call::RmFb(fb));
        state.tick(Op::RmFb)?;
        state.live_fbs.remove(&fb.raw());
        Ok(())
    }

    fn set_crtc(&self, req: &ModesetRequest) -> io::Result<()> {
        let mut state = self.kernel.0.borrow_mut();
        state.calls.push(Call::SetCrtc { crtc: req.crtc, fb: req.framebuffer });
        state.tick(Op::SetCrtc)
    }

    fn page_flip(&self, req: &PageFlipRequest) -> io::Result<()> {
        let mut state = self.kernel.0.borrow_mut();
        state.calls.push(Call::PageFlip {
            crtc: req.crtc,
            fb: req.framebuffer,
            async_flip: req.async_flip,
        });
        if state.flip_in_flight.is_some() {
            state.rejected_while_in_flight += 1;
            return Err(io::Error::from_raw_os_error(libc::EBUSY));
        }
        state.tick(Op::PageFlip)?;
        state.flip_in_flight = Some(req.crtc);
        Ok(())
    }

    fn read_events(&self) -> io::Result<Vec<KmsEvent>> {
        let mut state = self.kernel.0.borrow_mut();
        state.calls.push(Call::ReadEvents);
        state.tick(Op::ReadEvents)?;
        if let Some(event) = state.queued_events.pop_front() {
            return Ok(vec![event]);
        }
        match state.flip_in_flight.take() {
            Some(crtc) => Ok(vec![KmsEvent::PageFlip { crtc }]),
            None => Err(io::Error::new(io::ErrorKind::WouldBlock, "no event would ever arrive")),
        }
    }
}
