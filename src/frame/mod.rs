//! Frame executor
//!
//! Cycles [`FRAMES_IN_FLIGHT`] sets of synchronization primitives and command
//! pools. Every frame is submitted as three semaphore-chained batches:
//!
//! 1. the pre-frame transition of the acquired swapchain image, waiting on
//!    *image-available* and signaling *image-ready*;
//! 2. every command buffer leased during the frame, waiting on *image-ready*
//!    and signaling *layer-done*;
//! 3. the post-frame composite, waiting on *layer-done* and signaling
//!    *render-done*, which gates presentation.
//!
//! The only CPU blocking point is the fence wait in [`FrameExecutor::begin_frame`].

mod timer;

pub use timer::FrameTimer;

use std::sync::Arc;

use crate::backend::*;
use crate::context::FrameContext;
use crate::error::{GraphicsError, GraphicsResult};
use crate::resources::Texture;

/// Number of frames that may be in flight on the GPU at once.
pub const FRAMES_IN_FLIGHT: usize = 2;

/// Synchronization primitives and command storage for one frame in flight.
#[derive(Debug)]
pub struct FrameSlot {
    fence: FenceHandle,
    image_available: SemaphoreHandle,
    image_ready: SemaphoreHandle,
    layer_done: SemaphoreHandle,
    render_done: SemaphoreHandle,
    command_pool: CommandPoolHandle,
    pre_frame: CommandBufferHandle,
    post_frame: CommandBufferHandle,
    leased: Vec<CommandBufferHandle>,
}

impl FrameSlot {
    fn new(backend: &mut dyn GpuBackend) -> BackendResult<Self> {
        let command_pool = backend.create_command_pool()?;
        Ok(Self {
            fence: backend.create_fence(true)?,
            image_available: backend.create_semaphore()?,
            image_ready: backend.create_semaphore()?,
            layer_done: backend.create_semaphore()?,
            render_done: backend.create_semaphore()?,
            pre_frame: backend.allocate_command_buffer(command_pool)?,
            post_frame: backend.allocate_command_buffer(command_pool)?,
            command_pool,
            leased: Vec::new(),
        })
    }

    fn release_leases(&mut self, backend: &mut dyn GpuBackend) {
        if !self.leased.is_empty() {
            backend.free_command_buffers(self.command_pool, &self.leased);
            self.leased.clear();
        }
    }

    fn destroy(mut self, backend: &mut dyn GpuBackend) {
        self.release_leases(backend);
        backend.free_command_buffers(self.command_pool, &[self.pre_frame, self.post_frame]);
        backend.destroy_command_pool(self.command_pool);
        for semaphore in [
            self.image_available,
            self.image_ready,
            self.layer_done,
            self.render_done,
        ] {
            backend.destroy_semaphore(semaphore);
        }
        backend.destroy_fence(self.fence);
    }

    pub fn fence(&self) -> FenceHandle {
        self.fence
    }

    /// Command buffers leased from this slot that have not been freed yet.
    pub fn leased(&self) -> &[CommandBufferHandle] {
        &self.leased
    }
}

/// Per-frame facts handed out by [`FrameExecutor::begin_frame`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameInfo {
    /// Zero-based index of this frame since startup.
    pub index: u64,
    /// Frame slot this frame records into.
    pub slot: usize,
    /// Swapchain image index acquired for this frame.
    pub image_index: u32,
    /// Seconds since the previous frame began.
    pub delta: f32,
}

struct ActiveFrame {
    info: FrameInfo,
    swapchain: Arc<Texture>,
}

/// Owns the frame slots and sequences acquisition, recording, submission
/// and presentation.
pub struct FrameExecutor {
    context: Arc<FrameContext>,
    slots: Vec<FrameSlot>,
    current: usize,
    active: Option<ActiveFrame>,
    timer: FrameTimer,
}

impl FrameExecutor {
    pub fn new(context: &Arc<FrameContext>) -> GraphicsResult<Self> {
        Self::with_timer(context, FrameTimer::new())
    }

    pub fn with_timer(context: &Arc<FrameContext>, timer: FrameTimer) -> GraphicsResult<Self> {
        let slots = {
            let mut backend = context.backend();
            (0..FRAMES_IN_FLIGHT)
                .map(|_| FrameSlot::new(backend.as_mut()))
                .collect::<BackendResult<Vec<_>>>()?
        };
        log::info!("Frame executor created with {} frames in flight", FRAMES_IN_FLIGHT);
        Ok(Self {
            context: Arc::clone(context),
            slots,
            // In step with the context, which may have run frames already.
            current: context.frame_slot(),
            active: None,
            timer,
        })
    }

    pub fn context(&self) -> &Arc<FrameContext> {
        &self.context
    }

    /// Advance to the next slot, wait for the GPU to finish the frame that
    /// last used it, acquire a swapchain image and record the pre-frame
    /// transition.
    ///
    /// The slot and the context's frame number only advance once every step
    /// has succeeded, so a failed call can simply be retried.
    pub fn begin_frame(&mut self) -> GraphicsResult<FrameInfo> {
        if self.active.is_some() {
            return Err(GraphicsError::InvalidParameter(
                "begin_frame called twice without end_frame".into(),
            ));
        }
        let delta = self.timer.tick();
        let next = (self.current + 1) % FRAMES_IN_FLIGHT;
        let slot = &mut self.slots[next];

        let (image, extent, format) = {
            let mut backend = self.context.backend();
            backend.wait_fence(slot.fence, u64::MAX)?;
            let image = backend.acquire_next_image(slot.image_available)?;
            slot.release_leases(backend.as_mut());
            (image, backend.surface_extent(), backend.surface_format())
        };

        let swapchain = Arc::new(Texture::borrowed(
            &self.context,
            image.texture,
            extent,
            format,
        ));
        self.context.backend().begin_command_buffer(slot.pre_frame)?;
        swapchain.transition_layout(slot.pre_frame, ImageLayout::TransferDst);
        {
            let mut backend = self.context.backend();
            backend.end_command_buffer(slot.pre_frame)?;
            // Last fallible step: past this point the slot must be submitted.
            backend.reset_fence(slot.fence)?;
        }

        self.current = next;
        let index = self.context.advance_frame() - 1;
        let info = FrameInfo {
            index,
            slot: self.current,
            image_index: image.index,
            delta,
        };
        self.active = Some(ActiveFrame { info, swapchain });
        Ok(info)
    }

    /// Allocate a command buffer from the current slot's pool.
    ///
    /// The buffer is submitted in the leased-work stage of `end_frame` and
    /// freed the next time this slot comes around, after its fence signals.
    /// The caller begins and ends it.
    pub fn acquire_command_buffer(&mut self) -> GraphicsResult<CommandBufferHandle> {
        let slot = &mut self.slots[self.current];
        let cmd = self
            .context
            .backend()
            .allocate_command_buffer(slot.command_pool)?;
        slot.leased.push(cmd);
        Ok(cmd)
    }

    /// Submit the frame with no composite work and present it.
    pub fn end_frame(&mut self) -> GraphicsResult<()> {
        self.end_frame_with(|_, _| {})
    }

    /// Submit the frame and present it.
    ///
    /// `composite` records into the post-frame command buffer inside a
    /// rendering pass over the swapchain image, after all leased work.
    pub fn end_frame_with<F>(&mut self, composite: F) -> GraphicsResult<()>
    where
        F: FnOnce(CommandBufferHandle, &Texture),
    {
        self.finish_frame(composite, true)
    }

    /// Close the open frame without submitting its leased work.
    ///
    /// The swapchain image still goes through the pre-frame and post-frame
    /// stages, so the slot's fence signals and the image is presented
    /// unchanged. Leased buffers are freed the next time the slot comes
    /// around. Does nothing when no frame is open.
    pub fn abandon_frame(&mut self) -> GraphicsResult<()> {
        if self.active.is_none() {
            return Ok(());
        }
        log::warn!(
            "Abandoning frame {} with {} leased command buffers",
            self.context.frame_number().saturating_sub(1),
            self.slots[self.current].leased.len()
        );
        self.finish_frame(|_, _| {}, false)
    }

    fn finish_frame<F>(&mut self, composite: F, submit_leased: bool) -> GraphicsResult<()>
    where
        F: FnOnce(CommandBufferHandle, &Texture),
    {
        let Some(active) = self.active.take() else {
            return Err(GraphicsError::InvalidParameter(
                "end_frame called without begin_frame".into(),
            ));
        };
        let slot = &self.slots[self.current];
        let swapchain = &active.swapchain;

        self.context.backend().begin_command_buffer(slot.post_frame)?;
        swapchain.transition_layout(slot.post_frame, ImageLayout::ColorAttachment);
        self.context.backend().cmd_begin_rendering(
            slot.post_frame,
            swapchain.handle(),
            swapchain.extent(),
            LoadOp::Load,
        );
        composite(slot.post_frame, swapchain);
        self.context.backend().cmd_end_rendering(slot.post_frame);
        swapchain.transition_layout(slot.post_frame, ImageLayout::PresentSrc);
        self.context.backend().end_command_buffer(slot.post_frame)?;

        let leased = if submit_leased {
            slot.leased.clone()
        } else {
            Vec::new()
        };
        let submits = [
            SubmitInfo {
                wait: vec![(slot.image_available, PipelineStages::TRANSFER)],
                command_buffers: vec![slot.pre_frame],
                signal: vec![slot.image_ready],
            },
            SubmitInfo {
                wait: vec![(slot.image_ready, PipelineStages::COLOR_ATTACHMENT_OUTPUT)],
                command_buffers: leased,
                signal: vec![slot.layer_done],
            },
            SubmitInfo {
                wait: vec![(
                    slot.layer_done,
                    PipelineStages::TRANSFER | PipelineStages::COLOR_ATTACHMENT_OUTPUT,
                )],
                command_buffers: vec![slot.post_frame],
                signal: vec![slot.render_done],
            },
        ];

        let mut backend = self.context.backend();
        backend.submit(&submits, Some(slot.fence))?;
        backend.present(active.info.image_index, slot.render_done)?;
        Ok(())
    }

    /// Whether a frame is between `begin_frame` and `end_frame`.
    pub fn in_frame(&self) -> bool {
        self.active.is_some()
    }

    /// Facts about the frame being built, if any.
    pub fn current_frame(&self) -> Option<FrameInfo> {
        self.active.as_ref().map(|active| active.info)
    }

    /// Swapchain image of the frame being built, if any.
    pub fn swapchain_image(&self) -> Option<&Arc<Texture>> {
        self.active.as_ref().map(|active| &active.swapchain)
    }

    /// Index of the slot the current (or most recent) frame records into.
    pub fn current_slot(&self) -> usize {
        self.current
    }

    pub fn slot(&self, index: usize) -> Option<&FrameSlot> {
        self.slots.get(index)
    }

    pub fn timer(&self) -> &FrameTimer {
        &self.timer
    }

    pub fn frames_per_second(&self) -> u32 {
        self.timer.frames_per_second()
    }

    pub fn delta_time(&self) -> f32 {
        self.timer.delta_time()
    }

    /// Wait for the device to go idle.
    pub fn wait_idle(&self) -> GraphicsResult<()> {
        self.context.backend().wait_idle()?;
        Ok(())
    }
}

impl Drop for FrameExecutor {
    fn drop(&mut self) {
        // Release the swapchain wrapper before taking the backend lock.
        self.active = None;
        let mut backend = self.context.backend();
        if let Err(e) = backend.wait_idle() {
            log::error!("wait_idle failed during frame executor teardown: {}", e);
        }
        for slot in self.slots.drain(..) {
            slot.destroy(backend.as_mut());
        }
    }
}

/// A frame being built, as seen by layers.
pub struct Frame<'a> {
    executor: &'a mut FrameExecutor,
    info: FrameInfo,
    swapchain: Arc<Texture>,
}

impl<'a> Frame<'a> {
    /// Borrow the frame currently open on `executor`.
    pub fn new(executor: &'a mut FrameExecutor) -> Option<Self> {
        let active = executor.active.as_ref()?;
        let info = active.info;
        let swapchain = Arc::clone(&active.swapchain);
        Some(Self {
            executor,
            info,
            swapchain,
        })
    }

    pub fn info(&self) -> FrameInfo {
        self.info
    }

    pub fn index(&self) -> u64 {
        self.info.index
    }

    pub fn slot(&self) -> usize {
        self.info.slot
    }

    pub fn delta_time(&self) -> f32 {
        self.info.delta
    }

    pub fn swapchain(&self) -> &Arc<Texture> {
        &self.swapchain
    }

    pub fn context(&self) -> &Arc<FrameContext> {
        self.executor.context()
    }

    pub fn acquire_command_buffer(&mut self) -> GraphicsResult<CommandBufferHandle> {
        self.executor.acquire_command_buffer()
    }
}
