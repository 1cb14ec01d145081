//! # Page-Flip Synchronizer
//!
//! Per-output state machine: `Idle -> FlipPending -> Idle`. A flip request
//! moves the output to `FlipPending`; reading its completion event from the
//! device moves it back. At most one flip is ever outstanding: a new flip
//! always drains the previous one first.
//!
//! The first frame on a surface (and the first after a mode change) needs a
//! blocking mode-set instead, which binds the connector, mode and framebuffer
//! to the CRTC. Mode-sets never leave anything pending.

use tracing::{debug, error, trace, warn};

use crate::error::{KmsError, Result};
use crate::kms::{KmsDevice, KmsEvent, ModesetRequest, PageFlipRequest};
use crate::types::{CrtcId, FramebufferId, OutputTarget};

/// How a framebuffer ended up on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presented {
    Modeset,
    FlipQueued,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlipState {
    pub crtc: CrtcId,
    pub pending: bool,
    pub modeset_pending: bool,
}

#[derive(Debug)]
pub struct PageFlipSync {
    state: FlipState,
}

impl PageFlipSync {
    /// A synchronizer for `crtc` that will mode-set on its first presentation.
    pub fn new(crtc: CrtcId) -> Self {
        Self { state: FlipState { crtc, pending: false, modeset_pending: true } }
    }

    pub fn state(&self) -> FlipState {
        self.state
    }

    pub fn is_pending(&self) -> bool {
        self.state.pending
    }

    pub fn crtc(&self) -> CrtcId {
        self.state.crtc
    }

    /// Forces the next presentation to be a mode-set.
    pub fn mark_modeset_pending(&mut self) {
        self.state.modeset_pending = true;
    }

    /// Forgets any outstanding flip, e.g. after the descriptor it was issued on was closed.
    pub fn reset(&mut self) {
        self.state.pending = false;
        self.state.modeset_pending = true;
    }

    /// Blocks until the outstanding flip on this CRTC completes.
    ///
    /// Returns immediately when nothing is pending. A read error or an
    /// undecodable event clears the pending flag and fails without retrying.
    pub fn wait_for_completion<D: KmsDevice>(&mut self, dev: &D) -> Result<()> {
        let crtc = self.state.crtc;
        while self.state.pending {
            let events = match dev.read_events() {
                Ok(events) => events,
                Err(err) => {
                    self.state.pending = false;
                    return Err(KmsError::FlipWaitFailed {
                        crtc: crtc.raw(),
                        reason: "reading DRM events failed".into(),
                        source: Some(err),
                    });
                }
            };
            for event in events {
                match event {
                    KmsEvent::PageFlip { crtc: flipped } if flipped == crtc => {
                        trace!(crtc = %crtc, "Page flip completed");
                        self.state.pending = false;
                    }
                    KmsEvent::PageFlip { crtc: other } => {
                        trace!(crtc = %other, "Ignoring page flip for another CRTC");
                    }
                    KmsEvent::Vblank { .. } => {}
                    KmsEvent::Malformed(raw) => {
                        self.state.pending = false;
                        return Err(KmsError::FlipWaitFailed {
                            crtc: crtc.raw(),
                            reason: format!("malformed DRM event ({} bytes)", raw.len()),
                            source: None,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Puts `framebuffer` on screen.
    ///
    /// Mode-sets (blocking) when `force_modeset` is set or a mode-set is
    /// pending; otherwise queues a flip for the next vblank, or immediately
    /// when `async_flip` is set. Flips are never retried.
    pub fn request_presentation<D: KmsDevice>(
        &mut self,
        dev: &D,
        target: &OutputTarget,
        framebuffer: FramebufferId,
        force_modeset: bool,
        async_flip: bool,
    ) -> Result<Presented> {
        let crtc = self.state.crtc;
        if force_modeset || self.state.modeset_pending {
            let req = ModesetRequest {
                crtc,
                framebuffer,
                connector: target.connector,
                mode: target.mode.clone(),
            };
            dev.set_crtc(&req).map_err(|source| {
                error!(crtc = %crtc, fb = %framebuffer, error = %source, "Could not set videomode on CRTC");
                KmsError::ModesetFailure { crtc: crtc.raw(), source }
            })?;
            debug!(crtc = %crtc, fb = %framebuffer, mode = %target.mode.name, "Mode-set done");
            self.state.modeset_pending = false;
            return Ok(Presented::Modeset);
        }

        if self.state.pending {
            if let Err(err) = self.wait_for_completion(dev) {
                warn!(error = %err, "Draining the previous page flip failed");
            }
        }

        let req = PageFlipRequest { crtc, framebuffer, async_flip };
        dev.page_flip(&req).map_err(|source| {
            error!(crtc = %crtc, fb = %framebuffer, error = %source, "Could not queue page flip");
            KmsError::FlipRejected { crtc: crtc.raw(), source }
        })?;
        self.state.pending = true;
        trace!(crtc = %crtc, fb = %framebuffer, async_flip, "Page flip queued");
        Ok(Presented::FlipQueued)
    }
}
