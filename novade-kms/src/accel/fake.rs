//! In-memory GPU device, surface and rendering context for the unit tests.
//!
//! Each surface owns three buffer objects; locking hands out the first one
//! not currently locked, mirroring how a GBM surface keeps locked buffers away
//! from the renderer.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::io;
use std::rc::Rc;

use super::{GpuBackend, GpuBufferObject, GpuDevice, GpuSurface, RenderContext};
use crate::kms::KmsDevice;
use crate::types::BufferHandle;

const BUFFERS_PER_SURFACE: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GpuCall {
    CreateDevice,
    CreateSurface { width: u32, height: u32 },
    Bind,
    Unbind,
    Swap,
    Lock(BufferHandle),
    Release(BufferHandle),
}

#[derive(Debug, Default)]
pub struct GpuState {
    pub calls: Vec<GpuCall>,
    pub fail_device: bool,
    pub fail_surface: bool,
    pub fail_bind: bool,
    pub fail_swap: bool,
    pub fail_lock: bool,
    pub locked: BTreeSet<u32>,
    pub live_surfaces: usize,
    pub live_devices: usize,
    next_base: u32,
}

#[derive(Debug, Clone, Default)]
pub struct FakeGpuBackend(Rc<RefCell<GpuState>>);

impl FakeGpuBackend {
    pub fn new() -> Self {
        let backend = Self::default();
        backend.0.borrow_mut().next_base = 1000;
        backend
    }

    pub fn state(&self) -> std::cell::Ref<'_, GpuState> {
        self.0.borrow()
    }

    pub fn state_mut(&self) -> std::cell::RefMut<'_, GpuState> {
        self.0.borrow_mut()
    }

    pub fn context(&self) -> FakeContext {
        FakeContext { shared: self.0.clone() }
    }
}

impl<D: KmsDevice> GpuBackend<D> for FakeGpuBackend {
    type Device = FakeGpu;

    fn create_device(&self, _kms: &D) -> io::Result<FakeGpu> {
        let mut state = self.0.borrow_mut();
        state.calls.push(GpuCall::CreateDevice);
        if state.fail_device {
            return Err(io::Error::from_raw_os_error(libc::ENODEV));
        }
        state.live_devices += 1;
        Ok(FakeGpu { shared: self.0.clone() })
    }
}

#[derive(Debug)]
pub struct FakeGpu {
    shared: Rc<RefCell<GpuState>>,
}

impl Drop for FakeGpu {
    fn drop(&mut self) {
        self.shared.borrow_mut().live_devices -= 1;
    }
}

impl GpuDevice for FakeGpu {
    type Surface = FakeSurface;

    fn create_surface(&mut self, width: u32, height: u32) -> io::Result<FakeSurface> {
        let mut state = self.shared.borrow_mut();
        state.calls.push(GpuCall::CreateSurface { width, height });
        if state.fail_surface {
            return Err(io::Error::from_raw_os_error(libc::ENOMEM));
        }
        state.live_surfaces += 1;
        let base = state.next_base;
        state.next_base += BUFFERS_PER_SURFACE;
        Ok(FakeSurface { shared: self.shared.clone(), width, height, base })
    }
}

#[derive(Debug)]
pub struct FakeSurface {
    shared: Rc<RefCell<GpuState>>,
    width: u32,
    height: u32,
    base: u32,
}

impl Drop for FakeSurface {
    fn drop(&mut self) {
        self.shared.borrow_mut().live_surfaces -= 1;
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct FakeBo {
    handle: BufferHandle,
    width: u32,
    height: u32,
}

impl GpuBufferObject for FakeBo {
    fn handle(&self) -> BufferHandle {
        self.handle
    }

    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn stride(&self) -> u32 {
        self.width * 4
    }
}

impl GpuSurface for FakeSurface {
    type BufferObject = FakeBo;

    fn lock_front_buffer(&mut self) -> io::Result<FakeBo> {
        let mut state = self.shared.borrow_mut();
        if state.fail_lock {
            return Err(io::Error::from_raw_os_error(libc::EBUSY));
        }
        let free = (self.base..self.base + BUFFERS_PER_SURFACE)
            .find(|h| !state.locked.contains(h))
            .ok_or_else(|| io::Error::from_raw_os_error(libc::EBUSY))?;
        state.locked.insert(free);
        state.calls.push(GpuCall::Lock(BufferHandle(free)));
        Ok(FakeBo { handle: BufferHandle(free), width: self.width, height: self.height })
    }

    fn release_buffer(&mut self, bo: FakeBo) {
        let mut state = self.shared.borrow_mut();
        state.locked.remove(&bo.handle.raw());
        state.calls.push(GpuCall::Release(bo.handle));
    }
}

#[derive(Debug)]
pub struct FakeContext {
    shared: Rc<RefCell<GpuState>>,
}

impl RenderContext<FakeSurface> for FakeContext {
    type Error = String;

    fn bind_surface(&mut self, _surface: &mut FakeSurface) -> Result<(), String> {
        let mut state = self.shared.borrow_mut();
        state.calls.push(GpuCall::Bind);
        if state.fail_bind {
            return Err("eglCreateWindowSurface failed".into());
        }
        Ok(())
    }

    fn unbind_surface(&mut self) {
        self.shared.borrow_mut().calls.push(GpuCall::Unbind);
    }

    fn swap_buffers(&mut self) -> Result<(), String> {
        let mut state = self.shared.borrow_mut();
        state.calls.push(GpuCall::Swap);
        if state.fail_swap {
            return Err("eglSwapBuffers failed".into());
        }
        Ok(())
    }
}
