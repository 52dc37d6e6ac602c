//! Dummy GPU backend for testing and development.
//!
//! This backend doesn't talk to a GPU. It keeps every object in host memory,
//! records every `cmd_*` call per command buffer and "executes" a command
//! buffer when it is submitted: buffer copies move bytes, timestamp writes
//! resolve against a tick counter, and the submission fence is signaled
//! immediately. A [`DummyInspector`] shares the state so tests can look at
//! what was recorded after the backend has been moved into a
//! [`FrameContext`](crate::FrameContext).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::traits::*;
use crate::backend::types::*;

/// A recorded `cmd_*` call
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    TransitionTexture {
        texture: TextureHandle,
        old: ImageLayout,
        new: ImageLayout,
    },
    CopyBuffer {
        src: BufferHandle,
        dst: BufferHandle,
        region: BufferCopy,
    },
    BlitTexture {
        src: TextureHandle,
        dst: TextureHandle,
    },
    ClearColor {
        texture: TextureHandle,
        layout: ImageLayout,
        color: [f32; 4],
    },
    BeginRendering {
        target: TextureHandle,
        extent: Extent2d,
        load: LoadOp,
    },
    EndRendering,
    SetViewportScissor(Extent2d),
    BindPipeline {
        bind_point: BindPoint,
        pipeline: PipelineHandle,
    },
    BindDescriptorSet {
        bind_point: BindPoint,
        layout: PipelineLayoutHandle,
        set: DescriptorSetHandle,
    },
    PushConstants {
        layout: PipelineLayoutHandle,
        stages: ShaderStages,
        offset: u32,
        data: Vec<u8>,
    },
    BindVertexBuffer {
        buffer: BufferHandle,
        offset: u64,
    },
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
    WriteTimestamp {
        stage: PipelineStages,
        pool: QueryPoolHandle,
        index: u32,
    },
}

/// Host-visible side effects, in the order they happened
#[derive(Debug, Clone, PartialEq)]
pub enum DummyEvent {
    FenceWait(FenceHandle),
    FenceReset(FenceHandle),
    Allocate(CommandBufferHandle),
    Free(Vec<CommandBufferHandle>),
    Acquire(u32),
    Submit {
        submits: Vec<SubmitInfo>,
        fence: Option<FenceHandle>,
    },
    Present {
        image_index: u32,
        wait: SemaphoreHandle,
    },
    WaitIdle,
}

/// Device behaviour knobs for the dummy backend
#[derive(Debug, Clone)]
pub struct DummyConfig {
    pub limits: DeviceLimits,
    /// Device-local buffers are also host visible (integrated GPU / resizable BAR).
    pub unified_memory: bool,
    pub surface_extent: Extent2d,
    pub surface_format: TextureFormat,
    pub swapchain_images: u32,
    /// Ticks the simulated clock advances per executed command.
    pub ticks_per_command: u64,
}

impl Default for DummyConfig {
    fn default() -> Self {
        Self {
            limits: DeviceLimits::default(),
            unified_memory: true,
            surface_extent: Extent2d::new(1280, 720),
            surface_format: TextureFormat::Bgra8Unorm,
            swapchain_images: 3,
            ticks_per_command: 1_000,
        }
    }
}

impl DummyConfig {
    pub fn with_limits(mut self, limits: DeviceLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_unified_memory(mut self, unified: bool) -> Self {
        self.unified_memory = unified;
        self
    }

    pub fn with_surface_extent(mut self, width: u32, height: u32) -> Self {
        self.surface_extent = Extent2d::new(width, height);
        self
    }

    pub fn without_timestamps(mut self) -> Self {
        self.limits.timestamp_period = 0.0;
        self
    }
}

struct DummyCommandBuffer {
    pool: u64,
    recording: bool,
    commands: Vec<RecordedCommand>,
}

struct DummyBuffer {
    data: Vec<u8>,
    memory: MemoryProperties,
}

#[derive(Default)]
struct DummyState {
    next_id: u64,
    fences: HashMap<u64, bool>,
    semaphores: HashSet<u64>,
    command_pools: HashSet<u64>,
    command_buffers: HashMap<u64, DummyCommandBuffer>,
    buffers: HashMap<u64, DummyBuffer>,
    textures: HashMap<u64, TextureDescriptor>,
    samplers: HashSet<u64>,
    shader_modules: HashSet<u64>,
    set_layouts: HashSet<u64>,
    descriptor_pools: HashSet<u64>,
    descriptor_sets: HashMap<u64, u64>,
    pipeline_layouts: HashMap<u64, Option<PushConstantRange>>,
    pipelines: HashMap<u64, BindPoint>,
    query_pools: HashMap<u64, Vec<Option<u64>>>,
    swapchain: Vec<u64>,
    next_image: u32,
    surface_outdated: bool,
    clock: u64,
    events: Vec<DummyEvent>,
    executed: Vec<RecordedCommand>,
    descriptor_writes: Vec<DescriptorWrite>,
}

impl DummyState {
    fn alloc_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn live_objects(&self) -> usize {
        self.fences.len()
            + self.semaphores.len()
            + self.command_pools.len()
            + self.command_buffers.len()
            + self.buffers.len()
            + self.textures.len().saturating_sub(self.swapchain.len())
            + self.samplers.len()
            + self.shader_modules.len()
            + self.set_layouts.len()
            + self.descriptor_pools.len()
            + self.descriptor_sets.len()
            + self.pipeline_layouts.len()
            + self.pipelines.len()
            + self.query_pools.len()
    }

    fn execute(&mut self, commands: &[RecordedCommand], ticks_per_command: u64) {
        for command in commands {
            self.clock += ticks_per_command;
            match command {
                RecordedCommand::CopyBuffer { src, dst, region } => {
                    let start = region.src_offset as usize;
                    let end = start + region.size as usize;
                    let bytes = match self.buffers.get(&src.0) {
                        Some(buffer) if end <= buffer.data.len() => buffer.data[start..end].to_vec(),
                        _ => {
                            log::error!("DummyBackend: copy out of bounds of buffer {}", src.0);
                            continue;
                        }
                    };
                    if let Some(buffer) = self.buffers.get_mut(&dst.0) {
                        let dst_start = region.dst_offset as usize;
                        if dst_start + bytes.len() <= buffer.data.len() {
                            buffer.data[dst_start..dst_start + bytes.len()].copy_from_slice(&bytes);
                        }
                    }
                }
                RecordedCommand::WriteTimestamp { pool, index, .. } => {
                    let clock = self.clock;
                    if let Some(slots) = self.query_pools.get_mut(&pool.0) {
                        if let Some(slot) = slots.get_mut(*index as usize) {
                            *slot = Some(clock);
                        }
                    }
                }
                _ => {}
            }
            self.executed.push(command.clone());
        }
    }

    fn record(&mut self, cmd: CommandBufferHandle, command: RecordedCommand) {
        match self.command_buffers.get_mut(&cmd.0) {
            Some(buffer) if buffer.recording => buffer.commands.push(command),
            Some(_) => log::error!("DummyBackend: command buffer {} is not recording", cmd.0),
            None => log::error!("DummyBackend: unknown command buffer {}", cmd.0),
        }
    }
}

/// Dummy GPU backend.
pub struct DummyBackend {
    config: DummyConfig,
    state: Arc<Mutex<DummyState>>,
}

impl DummyBackend {
    /// Create a dummy backend with default limits and timestamp support.
    pub fn new() -> Self {
        Self::with_config(DummyConfig::default())
    }

    pub fn with_config(config: DummyConfig) -> Self {
        let mut state = DummyState::default();
        for _ in 0..config.swapchain_images {
            let id = state.alloc_id();
            state.textures.insert(
                id,
                TextureDescriptor::new(
                    config.surface_extent.width,
                    config.surface_extent.height,
                    config.surface_format,
                    TextureUsage::COLOR_ATTACHMENT | TextureUsage::COPY_DST,
                )
                .with_label("swapchain"),
            );
            state.swapchain.push(id);
        }
        Self {
            config,
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// A handle that observes this backend's state.
    pub fn inspector(&self) -> DummyInspector {
        DummyInspector {
            state: Arc::clone(&self.state),
        }
    }
}

impl Default for DummyBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Read access to a [`DummyBackend`]'s recorded state.
#[derive(Clone)]
pub struct DummyInspector {
    state: Arc<Mutex<DummyState>>,
}

impl DummyInspector {
    /// Commands currently recorded in a live command buffer.
    pub fn commands(&self, cmd: CommandBufferHandle) -> Option<Vec<RecordedCommand>> {
        self.state
            .lock()
            .command_buffers
            .get(&cmd.0)
            .map(|buffer| buffer.commands.clone())
    }

    /// Every command executed by a submission, in execution order.
    pub fn executed(&self) -> Vec<RecordedCommand> {
        self.state.lock().executed.clone()
    }

    pub fn events(&self) -> Vec<DummyEvent> {
        self.state.lock().events.clone()
    }

    pub fn clear_events(&self) {
        self.state.lock().events.clear();
    }

    pub fn descriptor_writes(&self) -> Vec<DescriptorWrite> {
        self.state.lock().descriptor_writes.clone()
    }

    pub fn live_command_buffers(&self) -> usize {
        self.state.lock().command_buffers.len()
    }

    /// Objects created through the backend and not yet destroyed.
    pub fn live_objects(&self) -> usize {
        self.state.lock().live_objects()
    }

    pub fn buffer_contents(&self, buffer: BufferHandle) -> Option<Vec<u8>> {
        self.state
            .lock()
            .buffers
            .get(&buffer.0)
            .map(|buffer| buffer.data.clone())
    }

    /// Make the next acquire report an out-of-date surface.
    pub fn set_surface_outdated(&self, outdated: bool) {
        self.state.lock().surface_outdated = outdated;
    }
}

fn invalid(kind: &'static str, id: u64) -> BackendError {
    BackendError::InvalidHandle { kind, id }
}

impl GpuBackend for DummyBackend {
    fn name(&self) -> &'static str {
        "Dummy"
    }

    fn limits(&self) -> DeviceLimits {
        self.config.limits
    }

    fn create_fence(&mut self, signaled: bool) -> BackendResult<FenceHandle> {
        let mut state = self.state.lock();
        let id = state.alloc_id();
        state.fences.insert(id, signaled);
        log::trace!("DummyBackend: created fence {} (signaled: {})", id, signaled);
        Ok(FenceHandle(id))
    }

    fn wait_fence(&mut self, fence: FenceHandle, _timeout_ns: u64) -> BackendResult<()> {
        let mut state = self.state.lock();
        let signaled = *state.fences.get(&fence.0).ok_or_else(|| invalid("fence", fence.0))?;
        state.events.push(DummyEvent::FenceWait(fence));
        if !signaled {
            // Nothing pending can ever signal it; a real device would hang here.
            return Err(BackendError::SubmissionFailed(format!(
                "wait on fence {} that no submission will signal",
                fence.0
            )));
        }
        Ok(())
    }

    fn reset_fence(&mut self, fence: FenceHandle) -> BackendResult<()> {
        let mut state = self.state.lock();
        let signaled = state
            .fences
            .get_mut(&fence.0)
            .ok_or_else(|| invalid("fence", fence.0))?;
        *signaled = false;
        state.events.push(DummyEvent::FenceReset(fence));
        Ok(())
    }

    fn destroy_fence(&mut self, fence: FenceHandle) {
        self.state.lock().fences.remove(&fence.0);
    }

    fn create_semaphore(&mut self) -> BackendResult<SemaphoreHandle> {
        let mut state = self.state.lock();
        let id = state.alloc_id();
        state.semaphores.insert(id);
        Ok(SemaphoreHandle(id))
    }

    fn destroy_semaphore(&mut self, semaphore: SemaphoreHandle) {
        self.state.lock().semaphores.remove(&semaphore.0);
    }

    fn wait_idle(&mut self) -> BackendResult<()> {
        self.state.lock().events.push(DummyEvent::WaitIdle);
        Ok(())
    }

    fn create_command_pool(&mut self) -> BackendResult<CommandPoolHandle> {
        let mut state = self.state.lock();
        let id = state.alloc_id();
        state.command_pools.insert(id);
        log::trace!("DummyBackend: created command pool {}", id);
        Ok(CommandPoolHandle(id))
    }

    fn destroy_command_pool(&mut self, pool: CommandPoolHandle) {
        let mut state = self.state.lock();
        state.command_pools.remove(&pool.0);
        state.command_buffers.retain(|_, buffer| buffer.pool != pool.0);
    }

    fn allocate_command_buffer(
        &mut self,
        pool: CommandPoolHandle,
    ) -> BackendResult<CommandBufferHandle> {
        let mut state = self.state.lock();
        if !state.command_pools.contains(&pool.0) {
            return Err(invalid("command pool", pool.0));
        }
        let id = state.alloc_id();
        state.command_buffers.insert(
            id,
            DummyCommandBuffer {
                pool: pool.0,
                recording: false,
                commands: Vec::new(),
            },
        );
        state.events.push(DummyEvent::Allocate(CommandBufferHandle(id)));
        Ok(CommandBufferHandle(id))
    }

    fn free_command_buffers(&mut self, _pool: CommandPoolHandle, buffers: &[CommandBufferHandle]) {
        let mut state = self.state.lock();
        for buffer in buffers {
            state.command_buffers.remove(&buffer.0);
        }
        state.events.push(DummyEvent::Free(buffers.to_vec()));
    }

    fn begin_command_buffer(&mut self, cmd: CommandBufferHandle) -> BackendResult<()> {
        let mut state = self.state.lock();
        let buffer = state
            .command_buffers
            .get_mut(&cmd.0)
            .ok_or_else(|| invalid("command buffer", cmd.0))?;
        buffer.commands.clear();
        buffer.recording = true;
        Ok(())
    }

    fn end_command_buffer(&mut self, cmd: CommandBufferHandle) -> BackendResult<()> {
        let mut state = self.state.lock();
        let buffer = state
            .command_buffers
            .get_mut(&cmd.0)
            .ok_or_else(|| invalid("command buffer", cmd.0))?;
        buffer.recording = false;
        Ok(())
    }

    fn submit(&mut self, submits: &[SubmitInfo], fence: Option<FenceHandle>) -> BackendResult<()> {
        let mut state = self.state.lock();
        for submit in submits {
            for cmd in &submit.command_buffers {
                let commands = match state.command_buffers.get(&cmd.0) {
                    Some(buffer) if buffer.recording => {
                        return Err(BackendError::SubmissionFailed(format!(
                            "command buffer {} is still recording",
                            cmd.0
                        )))
                    }
                    Some(buffer) => buffer.commands.clone(),
                    None => return Err(invalid("command buffer", cmd.0)),
                };
                state.execute(&commands, self.config.ticks_per_command);
            }
        }
        if let Some(fence) = fence {
            let signaled = state
                .fences
                .get_mut(&fence.0)
                .ok_or_else(|| invalid("fence", fence.0))?;
            *signaled = true;
        }
        state.events.push(DummyEvent::Submit {
            submits: submits.to_vec(),
            fence,
        });
        log::trace!("DummyBackend: submitted {} batches", submits.len());
        Ok(())
    }

    fn surface_extent(&self) -> Extent2d {
        self.config.surface_extent
    }

    fn surface_format(&self) -> TextureFormat {
        self.config.surface_format
    }

    fn acquire_next_image(&mut self, signal: SemaphoreHandle) -> BackendResult<AcquiredImage> {
        let mut state = self.state.lock();
        if !state.semaphores.contains(&signal.0) {
            return Err(invalid("semaphore", signal.0));
        }
        if state.surface_outdated {
            return Err(BackendError::SurfaceOutdated);
        }
        if state.swapchain.is_empty() {
            return Err(BackendError::Unsupported("no swapchain images".into()));
        }
        let index = state.next_image;
        state.next_image = (index + 1) % state.swapchain.len() as u32;
        state.events.push(DummyEvent::Acquire(index));
        Ok(AcquiredImage {
            index,
            texture: TextureHandle(state.swapchain[index as usize]),
        })
    }

    fn present(&mut self, image_index: u32, wait: SemaphoreHandle) -> BackendResult<()> {
        let mut state = self.state.lock();
        if image_index as usize >= state.swapchain.len() {
            return Err(BackendError::PresentFailed(format!(
                "image index {} out of range",
                image_index
            )));
        }
        state.events.push(DummyEvent::Present { image_index, wait });
        Ok(())
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        if desc.size == 0 {
            return Err(BackendError::ResourceCreationFailed(
                "buffer size must be non-zero".into(),
            ));
        }
        let memory = match desc.memory {
            MemoryPreference::HostVisible if self.config.unified_memory => {
                MemoryProperties::DEVICE_LOCAL
                    | MemoryProperties::HOST_VISIBLE
                    | MemoryProperties::HOST_COHERENT
            }
            MemoryPreference::HostVisible => {
                MemoryProperties::HOST_VISIBLE | MemoryProperties::HOST_COHERENT
            }
            MemoryPreference::DeviceLocal if self.config.unified_memory => {
                MemoryProperties::DEVICE_LOCAL
                    | MemoryProperties::HOST_VISIBLE
                    | MemoryProperties::HOST_COHERENT
            }
            MemoryPreference::DeviceLocal => MemoryProperties::DEVICE_LOCAL,
        };
        let mut state = self.state.lock();
        let id = state.alloc_id();
        state.buffers.insert(
            id,
            DummyBuffer {
                data: vec![0; desc.size as usize],
                memory,
            },
        );
        log::trace!(
            "DummyBackend: creating buffer {:?} (size: {}, memory: {:?})",
            desc.label,
            desc.size,
            memory
        );
        Ok(BufferHandle(id))
    }

    fn buffer_memory_properties(&self, buffer: BufferHandle) -> MemoryProperties {
        self.state
            .lock()
            .buffers
            .get(&buffer.0)
            .map(|buffer| buffer.memory)
            .unwrap_or_else(MemoryProperties::empty)
    }

    fn write_buffer(
        &mut self,
        buffer: BufferHandle,
        offset: u64,
        data: &[u8],
    ) -> BackendResult<()> {
        let mut state = self.state.lock();
        let target = state
            .buffers
            .get_mut(&buffer.0)
            .ok_or_else(|| invalid("buffer", buffer.0))?;
        if !target.memory.contains(MemoryProperties::HOST_VISIBLE) {
            return Err(BackendError::Unsupported(format!(
                "buffer {} is not host visible",
                buffer.0
            )));
        }
        let start = offset as usize;
        let end = start + data.len();
        if end > target.data.len() {
            return Err(BackendError::ResourceCreationFailed(format!(
                "write of {} bytes at {} overflows buffer {}",
                data.len(),
                offset,
                buffer.0
            )));
        }
        target.data[start..end].copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(&self, buffer: BufferHandle, offset: u64, len: u64) -> BackendResult<Vec<u8>> {
        let state = self.state.lock();
        let source = state
            .buffers
            .get(&buffer.0)
            .ok_or_else(|| invalid("buffer", buffer.0))?;
        let start = offset as usize;
        let end = start + len as usize;
        source
            .data
            .get(start..end)
            .map(|bytes| bytes.to_vec())
            .ok_or_else(|| BackendError::Unsupported(format!("read past end of buffer {}", buffer.0)))
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.state.lock().buffers.remove(&buffer.0);
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        if desc.width == 0 || desc.height == 0 {
            return Err(BackendError::ResourceCreationFailed(format!(
                "texture {:?} has zero extent",
                desc.label
            )));
        }
        log::trace!(
            "DummyBackend: creating texture {:?} ({}x{})",
            desc.label,
            desc.width,
            desc.height
        );
        let mut state = self.state.lock();
        let id = state.alloc_id();
        state.textures.insert(id, desc.clone());
        Ok(TextureHandle(id))
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        self.state.lock().textures.remove(&texture.0);
    }

    fn create_sampler(&mut self, desc: &SamplerDescriptor) -> BackendResult<SamplerHandle> {
        log::trace!("DummyBackend: creating sampler {:?}", desc.label);
        let mut state = self.state.lock();
        let id = state.alloc_id();
        state.samplers.insert(id);
        Ok(SamplerHandle(id))
    }

    fn destroy_sampler(&mut self, sampler: SamplerHandle) {
        self.state.lock().samplers.remove(&sampler.0);
    }

    fn create_shader_module(&mut self, spirv: &[u32]) -> BackendResult<ShaderModuleHandle> {
        if spirv.is_empty() {
            return Err(BackendError::ResourceCreationFailed(
                "empty shader module".into(),
            ));
        }
        let mut state = self.state.lock();
        let id = state.alloc_id();
        state.shader_modules.insert(id);
        Ok(ShaderModuleHandle(id))
    }

    fn destroy_shader_module(&mut self, module: ShaderModuleHandle) {
        self.state.lock().shader_modules.remove(&module.0);
    }

    fn create_descriptor_set_layout(
        &mut self,
        desc: &DescriptorSetLayoutDescriptor,
    ) -> BackendResult<DescriptorSetLayoutHandle> {
        log::trace!(
            "DummyBackend: creating descriptor set layout with {} bindings",
            desc.bindings.len()
        );
        let mut state = self.state.lock();
        let id = state.alloc_id();
        state.set_layouts.insert(id);
        Ok(DescriptorSetLayoutHandle(id))
    }

    fn destroy_descriptor_set_layout(&mut self, layout: DescriptorSetLayoutHandle) {
        self.state.lock().set_layouts.remove(&layout.0);
    }

    fn create_descriptor_pool(
        &mut self,
        desc: &DescriptorPoolDescriptor,
    ) -> BackendResult<DescriptorPoolHandle> {
        log::trace!("DummyBackend: creating descriptor pool ({} sets)", desc.max_sets);
        let mut state = self.state.lock();
        let id = state.alloc_id();
        state.descriptor_pools.insert(id);
        Ok(DescriptorPoolHandle(id))
    }

    fn destroy_descriptor_pool(&mut self, pool: DescriptorPoolHandle) {
        let mut state = self.state.lock();
        state.descriptor_pools.remove(&pool.0);
        state.descriptor_sets.retain(|_, owner| *owner != pool.0);
    }

    fn allocate_descriptor_set(
        &mut self,
        pool: DescriptorPoolHandle,
        layout: DescriptorSetLayoutHandle,
        _variable_count: Option<u32>,
    ) -> BackendResult<DescriptorSetHandle> {
        let mut state = self.state.lock();
        if !state.descriptor_pools.contains(&pool.0) {
            return Err(invalid("descriptor pool", pool.0));
        }
        if !state.set_layouts.contains(&layout.0) {
            return Err(invalid("descriptor set layout", layout.0));
        }
        let id = state.alloc_id();
        state.descriptor_sets.insert(id, pool.0);
        Ok(DescriptorSetHandle(id))
    }

    fn update_descriptor_sets(&mut self, writes: &[DescriptorWrite]) {
        self.state
            .lock()
            .descriptor_writes
            .extend(writes.iter().cloned());
    }

    fn create_pipeline_layout(
        &mut self,
        desc: &PipelineLayoutDescriptor,
    ) -> BackendResult<PipelineLayoutHandle> {
        let mut state = self.state.lock();
        let id = state.alloc_id();
        state.pipeline_layouts.insert(id, desc.push_constants);
        Ok(PipelineLayoutHandle(id))
    }

    fn destroy_pipeline_layout(&mut self, layout: PipelineLayoutHandle) {
        self.state.lock().pipeline_layouts.remove(&layout.0);
    }

    fn create_compute_pipeline(
        &mut self,
        desc: &ComputePipelineDescriptor,
    ) -> BackendResult<PipelineHandle> {
        let mut state = self.state.lock();
        if !state.shader_modules.contains(&desc.shader.0) {
            return Err(invalid("shader module", desc.shader.0));
        }
        let id = state.alloc_id();
        state.pipelines.insert(id, BindPoint::Compute);
        log::trace!("DummyBackend: creating compute pipeline {:?}", desc.label);
        Ok(PipelineHandle(id))
    }

    fn create_graphics_pipeline(
        &mut self,
        desc: &GraphicsPipelineDescriptor,
    ) -> BackendResult<PipelineHandle> {
        let mut state = self.state.lock();
        for module in [desc.vertex_shader, desc.fragment_shader] {
            if !state.shader_modules.contains(&module.0) {
                return Err(invalid("shader module", module.0));
            }
        }
        let id = state.alloc_id();
        state.pipelines.insert(id, BindPoint::Graphics);
        log::trace!("DummyBackend: creating graphics pipeline {:?}", desc.label);
        Ok(PipelineHandle(id))
    }

    fn destroy_pipeline(&mut self, pipeline: PipelineHandle) {
        self.state.lock().pipelines.remove(&pipeline.0);
    }

    fn create_timestamp_pool(&mut self, count: u32) -> BackendResult<QueryPoolHandle> {
        if !self.config.limits.supports_timestamps() {
            return Err(BackendError::Unsupported("timestamp queries".into()));
        }
        let mut state = self.state.lock();
        let id = state.alloc_id();
        state.query_pools.insert(id, vec![None; count as usize]);
        Ok(QueryPoolHandle(id))
    }

    fn destroy_query_pool(&mut self, pool: QueryPoolHandle) {
        self.state.lock().query_pools.remove(&pool.0);
    }

    fn reset_query_pool(&mut self, pool: QueryPoolHandle, first: u32, count: u32) {
        let mut state = self.state.lock();
        if let Some(slots) = state.query_pools.get_mut(&pool.0) {
            for slot in slots.iter_mut().skip(first as usize).take(count as usize) {
                *slot = None;
            }
        }
    }

    fn timestamp_results(
        &mut self,
        pool: QueryPoolHandle,
        first: u32,
        count: u32,
    ) -> BackendResult<Vec<TimestampQuery>> {
        let state = self.state.lock();
        let slots = state
            .query_pools
            .get(&pool.0)
            .ok_or_else(|| invalid("query pool", pool.0))?;
        if (first + count) as usize > slots.len() {
            return Err(BackendError::Unsupported(format!(
                "query range {}..{} exceeds pool of {}",
                first,
                first + count,
                slots.len()
            )));
        }
        Ok(slots[first as usize..(first + count) as usize]
            .iter()
            .map(|slot| match slot {
                Some(ticks) => TimestampQuery {
                    ticks: *ticks,
                    available: true,
                },
                None => TimestampQuery::default(),
            })
            .collect())
    }

    fn cmd_transition_texture(
        &mut self,
        cmd: CommandBufferHandle,
        texture: TextureHandle,
        old: ImageLayout,
        new: ImageLayout,
    ) {
        self.state
            .lock()
            .record(cmd, RecordedCommand::TransitionTexture { texture, old, new });
    }

    fn cmd_copy_buffer(
        &mut self,
        cmd: CommandBufferHandle,
        src: BufferHandle,
        dst: BufferHandle,
        region: BufferCopy,
    ) {
        self.state
            .lock()
            .record(cmd, RecordedCommand::CopyBuffer { src, dst, region });
    }

    fn cmd_blit_texture(
        &mut self,
        cmd: CommandBufferHandle,
        src: TextureHandle,
        _src_extent: Extent2d,
        dst: TextureHandle,
        _dst_extent: Extent2d,
    ) {
        self.state
            .lock()
            .record(cmd, RecordedCommand::BlitTexture { src, dst });
    }

    fn cmd_clear_color(
        &mut self,
        cmd: CommandBufferHandle,
        texture: TextureHandle,
        layout: ImageLayout,
        color: [f32; 4],
    ) {
        self.state.lock().record(
            cmd,
            RecordedCommand::ClearColor {
                texture,
                layout,
                color,
            },
        );
    }

    fn cmd_begin_rendering(
        &mut self,
        cmd: CommandBufferHandle,
        target: TextureHandle,
        extent: Extent2d,
        load: LoadOp,
    ) {
        self.state.lock().record(
            cmd,
            RecordedCommand::BeginRendering {
                target,
                extent,
                load,
            },
        );
    }

    fn cmd_end_rendering(&mut self, cmd: CommandBufferHandle) {
        self.state.lock().record(cmd, RecordedCommand::EndRendering);
    }

    fn cmd_set_viewport_scissor(&mut self, cmd: CommandBufferHandle, extent: Extent2d) {
        self.state
            .lock()
            .record(cmd, RecordedCommand::SetViewportScissor(extent));
    }

    fn cmd_bind_pipeline(
        &mut self,
        cmd: CommandBufferHandle,
        bind_point: BindPoint,
        pipeline: PipelineHandle,
    ) {
        self.state.lock().record(
            cmd,
            RecordedCommand::BindPipeline {
                bind_point,
                pipeline,
            },
        );
    }

    fn cmd_bind_descriptor_set(
        &mut self,
        cmd: CommandBufferHandle,
        bind_point: BindPoint,
        layout: PipelineLayoutHandle,
        set: DescriptorSetHandle,
    ) {
        self.state.lock().record(
            cmd,
            RecordedCommand::BindDescriptorSet {
                bind_point,
                layout,
                set,
            },
        );
    }

    fn cmd_push_constants(
        &mut self,
        cmd: CommandBufferHandle,
        layout: PipelineLayoutHandle,
        stages: ShaderStages,
        offset: u32,
        data: &[u8],
    ) {
        self.state.lock().record(
            cmd,
            RecordedCommand::PushConstants {
                layout,
                stages,
                offset,
                data: data.to_vec(),
            },
        );
    }

    fn cmd_bind_vertex_buffer(&mut self, cmd: CommandBufferHandle, buffer: BufferHandle, offset: u64) {
        self.state
            .lock()
            .record(cmd, RecordedCommand::BindVertexBuffer { buffer, offset });
    }

    fn cmd_draw(
        &mut self,
        cmd: CommandBufferHandle,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        self.state.lock().record(
            cmd,
            RecordedCommand::Draw {
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            },
        );
    }

    fn cmd_dispatch(&mut self, cmd: CommandBufferHandle, x: u32, y: u32, z: u32) {
        self.state
            .lock()
            .record(cmd, RecordedCommand::Dispatch { x, y, z });
    }

    fn cmd_write_timestamp(
        &mut self,
        cmd: CommandBufferHandle,
        stage: PipelineStages,
        pool: QueryPoolHandle,
        index: u32,
    ) {
        self.state
            .lock()
            .record(cmd, RecordedCommand::WriteTimestamp { stage, pool, index });
    }
}
