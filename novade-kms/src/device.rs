//! # Display Device Handle
//!
//! Owns the kernel display device descriptor for one display engine. The
//! descriptor is opened lazily, can be closed and reopened (the accelerated
//! path reopens it so the software path and other presentation APIs never
//! share it), and is dropped, which closes it, on [`DisplayDevice::close`].

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::{KmsError, Result};
use crate::kms::{DriverCapability, KmsBackend, KmsDevice};

pub struct DisplayDevice<B: KmsBackend> {
    backend: B,
    path: PathBuf,
    descriptor: Option<B::Device>,
    is_master: bool,
    supports_dumb_buffers: bool,
    supports_async_flip: bool,
}

impl<B: KmsBackend> DisplayDevice<B> {
    /// Creates a closed handle for the device node at `path`.
    pub fn new(backend: B, path: impl Into<PathBuf>) -> Self {
        Self {
            backend,
            path: path.into(),
            descriptor: None,
            is_master: false,
            supports_dumb_buffers: false,
            supports_async_flip: false,
        }
    }

    /// Opens the device node if it is not open yet.
    pub fn open(&mut self) -> Result<&B::Device> {
        if self.descriptor.is_none() {
            let device = self.backend.open(&self.path).map_err(|source| KmsError::DeviceOpen {
                path: self.path.clone(),
                source,
            })?;
            info!(path = %self.path.display(), "Opened KMS device");
            self.descriptor = Some(device);
        }
        self.device()
    }

    /// Closes and reopens the descriptor.
    pub fn reopen(&mut self) -> Result<&B::Device> {
        self.close();
        self.open()
    }

    /// Releases the descriptor. Safe to call when already closed.
    pub fn close(&mut self) {
        if self.descriptor.take().is_some() {
            debug!(path = %self.path.display(), "Closed KMS device");
        }
        self.is_master = false;
        self.supports_dumb_buffers = false;
        self.supports_async_flip = false;
    }

    pub fn is_open(&self) -> bool {
        self.descriptor.is_some()
    }

    pub fn device(&self) -> Result<&B::Device> {
        self.descriptor.as_ref().ok_or_else(|| KmsError::DeviceClosed(self.path.clone()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_master(&self) -> bool {
        self.is_master
    }

    pub fn supports_dumb_buffers(&self) -> bool {
        self.supports_dumb_buffers
    }

    pub fn supports_async_flip(&self) -> bool {
        self.supports_async_flip
    }

    /// Returns the capability value, failing when the query fails or reports zero.
    pub fn query_capability(&mut self, cap: DriverCapability) -> Result<u64> {
        let value = self
            .device()?
            .driver_capability(cap)
            .map_err(|source| KmsError::CapabilityUnavailable {
                capability: cap.name(),
                source: Some(source),
            })?;
        if value == 0 {
            return Err(KmsError::CapabilityUnavailable { capability: cap.name(), source: None });
        }
        match cap {
            DriverCapability::DumbBuffer => self.supports_dumb_buffers = true,
            DriverCapability::AsyncPageFlip => self.supports_async_flip = true,
        }
        Ok(value)
    }

    /// Tries to become DRM master. Being denied is not fatal.
    pub fn claim_master(&mut self) -> bool {
        let claimed = match self.device() {
            Ok(device) => match device.acquire_master() {
                Ok(()) => true,
                Err(err) => {
                    warn!(path = %self.path.display(), error = %err, "Could not become DRM master");
                    false
                }
            },
            Err(_) => false,
        };
        self.is_master = claimed;
        claimed
    }
}

impl<B: KmsBackend> std::fmt::Debug for DisplayDevice<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisplayDevice")
            .field("path", &self.path)
            .field("open", &self.descriptor.is_some())
            .field("is_master", &self.is_master)
            .field("supports_dumb_buffers", &self.supports_dumb_buffers)
            .field("supports_async_flip", &self.supports_async_flip)
            .finish()
    }
}
