//! Explicit device/frame context shared by every component.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::backend::{DeviceLimits, GpuBackend};
use crate::frame::FRAMES_IN_FLIGHT;

/// Shared handle to the device and the frame counter.
///
/// Components receive an `Arc<FrameContext>` at construction instead of
/// reaching for a process-wide engine instance.
pub struct FrameContext {
    backend: Mutex<Box<dyn GpuBackend>>,
    backend_name: &'static str,
    limits: DeviceLimits,
    frame_number: AtomicU64,
}

static_assertions::assert_impl_all!(FrameContext: Send, Sync);

impl FrameContext {
    pub fn new(backend: impl GpuBackend + 'static) -> Arc<Self> {
        Self::from_boxed(Box::new(backend))
    }

    pub fn from_boxed(backend: Box<dyn GpuBackend>) -> Arc<Self> {
        let backend_name = backend.name();
        let limits = backend.limits();
        log::info!(
            "Frame context created on {} backend (timestamp period: {} ns)",
            backend_name,
            limits.timestamp_period
        );
        Arc::new(Self {
            backend: Mutex::new(backend),
            backend_name,
            limits,
            frame_number: AtomicU64::new(0),
        })
    }

    /// Lock the backend for object creation or command recording.
    ///
    /// Resource wrappers release their objects in `Drop`, so never drop one
    /// while holding this guard.
    pub fn backend(&self) -> MutexGuard<'_, Box<dyn GpuBackend>> {
        self.backend.lock()
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend_name
    }

    pub fn limits(&self) -> &DeviceLimits {
        &self.limits
    }

    /// Number of frames begun so far; the index of the frame being built.
    pub fn frame_number(&self) -> u64 {
        self.frame_number.load(Ordering::Acquire)
    }

    /// Frame slot the frame being built records into.
    pub fn frame_slot(&self) -> usize {
        (self.frame_number() % FRAMES_IN_FLIGHT as u64) as usize
    }

    pub(crate) fn advance_frame(&self) -> u64 {
        self.frame_number.fetch_add(1, Ordering::AcqRel) + 1
    }
}

impl std::fmt::Debug for FrameContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameContext")
            .field("backend", &self.backend_name)
            .field("frame_number", &self.frame_number())
            .finish()
    }
}
