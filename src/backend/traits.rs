//! Core backend abstraction traits
//!
//! [`GpuBackend`] is the narrow device contract the frame executor, the sprite
//! batch and the compute registry are written against. Both the Vulkan backend
//! and the dummy backend implement it.

use crate::backend::types::*;
use thiserror::Error;

/// Backend error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("Failed to initialize backend: {0}")]
    InitializationFailed(String),
    #[error("Failed to create resource: {0}")]
    ResourceCreationFailed(String),
    #[error("Invalid {kind} handle {id}")]
    InvalidHandle { kind: &'static str, id: u64 },
    #[error("Queue submission failed: {0}")]
    SubmissionFailed(String),
    #[error("Failed to present: {0}")]
    PresentFailed(String),
    #[error("Surface out of date")]
    SurfaceOutdated,
    #[error("Operation not supported: {0}")]
    Unsupported(String),
    #[error("Out of memory")]
    OutOfMemory,
    #[error("Device lost")]
    DeviceLost,
}

pub type BackendResult<T> = Result<T, BackendError>;

macro_rules! define_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub(crate) u64);

        impl $name {
            /// Raw backend id, for logging.
            pub fn raw(&self) -> u64 {
                self.0
            }
        }
    };
}

define_handle!(
    /// Handle to a CPU-waitable fence
    FenceHandle
);
define_handle!(
    /// Handle to a GPU-GPU semaphore
    SemaphoreHandle
);
define_handle!(
    /// Handle to a command pool
    CommandPoolHandle
);
define_handle!(
    /// Handle to a primary command buffer
    CommandBufferHandle
);
define_handle!(
    /// Handle to a GPU buffer
    BufferHandle
);
define_handle!(
    /// Handle to a GPU texture (image plus its default view)
    TextureHandle
);
define_handle!(
    /// Handle to a sampler
    SamplerHandle
);
define_handle!(
    /// Handle to a shader module
    ShaderModuleHandle
);
define_handle!(
    /// Handle to a descriptor pool
    DescriptorPoolHandle
);
define_handle!(
    /// Handle to a descriptor set layout
    DescriptorSetLayoutHandle
);
define_handle!(
    /// Handle to a descriptor set
    DescriptorSetHandle
);
define_handle!(
    /// Handle to a pipeline layout
    PipelineLayoutHandle
);
define_handle!(
    /// Handle to a graphics or compute pipeline
    PipelineHandle
);
define_handle!(
    /// Handle to a timestamp query pool
    QueryPoolHandle
);

/// Device contract consumed by the orchestration layer.
///
/// Object creation returns `BackendResult`; a failure there means the device
/// or driver is in a state no caller can repair. Recording methods (`cmd_*`)
/// are infallible at record time, matching the underlying API.
pub trait GpuBackend: Send {
    fn name(&self) -> &'static str;
    fn limits(&self) -> DeviceLimits;

    // Synchronization
    fn create_fence(&mut self, signaled: bool) -> BackendResult<FenceHandle>;
    fn wait_fence(&mut self, fence: FenceHandle, timeout_ns: u64) -> BackendResult<()>;
    fn reset_fence(&mut self, fence: FenceHandle) -> BackendResult<()>;
    fn destroy_fence(&mut self, fence: FenceHandle);
    fn create_semaphore(&mut self) -> BackendResult<SemaphoreHandle>;
    fn destroy_semaphore(&mut self, semaphore: SemaphoreHandle);
    fn wait_idle(&mut self) -> BackendResult<()>;

    // Command pools and submission
    fn create_command_pool(&mut self) -> BackendResult<CommandPoolHandle>;
    fn destroy_command_pool(&mut self, pool: CommandPoolHandle);
    fn allocate_command_buffer(
        &mut self,
        pool: CommandPoolHandle,
    ) -> BackendResult<CommandBufferHandle>;
    fn free_command_buffers(&mut self, pool: CommandPoolHandle, buffers: &[CommandBufferHandle]);
    fn begin_command_buffer(&mut self, cmd: CommandBufferHandle) -> BackendResult<()>;
    fn end_command_buffer(&mut self, cmd: CommandBufferHandle) -> BackendResult<()>;
    fn submit(&mut self, submits: &[SubmitInfo], fence: Option<FenceHandle>) -> BackendResult<()>;

    // Presentation
    fn surface_extent(&self) -> Extent2d;
    fn surface_format(&self) -> TextureFormat;
    fn acquire_next_image(&mut self, signal: SemaphoreHandle) -> BackendResult<AcquiredImage>;
    fn present(&mut self, image_index: u32, wait: SemaphoreHandle) -> BackendResult<()>;

    // Buffers
    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle>;
    fn buffer_memory_properties(&self, buffer: BufferHandle) -> MemoryProperties;
    /// Write through the persistent mapping. Fails for non-host-visible buffers.
    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8])
        -> BackendResult<()>;
    fn read_buffer(&self, buffer: BufferHandle, offset: u64, len: u64) -> BackendResult<Vec<u8>>;
    fn destroy_buffer(&mut self, buffer: BufferHandle);

    // Textures
    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle>;
    fn destroy_texture(&mut self, texture: TextureHandle);
    fn create_sampler(&mut self, desc: &SamplerDescriptor) -> BackendResult<SamplerHandle>;
    fn destroy_sampler(&mut self, sampler: SamplerHandle);

    // Shaders
    fn create_shader_module(&mut self, spirv: &[u32]) -> BackendResult<ShaderModuleHandle>;
    fn destroy_shader_module(&mut self, module: ShaderModuleHandle);

    // Descriptors
    fn create_descriptor_set_layout(
        &mut self,
        desc: &DescriptorSetLayoutDescriptor,
    ) -> BackendResult<DescriptorSetLayoutHandle>;
    fn destroy_descriptor_set_layout(&mut self, layout: DescriptorSetLayoutHandle);
    fn create_descriptor_pool(
        &mut self,
        desc: &DescriptorPoolDescriptor,
    ) -> BackendResult<DescriptorPoolHandle>;
    fn destroy_descriptor_pool(&mut self, pool: DescriptorPoolHandle);
    fn allocate_descriptor_set(
        &mut self,
        pool: DescriptorPoolHandle,
        layout: DescriptorSetLayoutHandle,
        variable_count: Option<u32>,
    ) -> BackendResult<DescriptorSetHandle>;
    fn update_descriptor_sets(&mut self, writes: &[DescriptorWrite]);

    // Pipelines
    fn create_pipeline_layout(
        &mut self,
        desc: &PipelineLayoutDescriptor,
    ) -> BackendResult<PipelineLayoutHandle>;
    fn destroy_pipeline_layout(&mut self, layout: PipelineLayoutHandle);
    fn create_compute_pipeline(
        &mut self,
        desc: &ComputePipelineDescriptor,
    ) -> BackendResult<PipelineHandle>;
    fn create_graphics_pipeline(
        &mut self,
        desc: &GraphicsPipelineDescriptor,
    ) -> BackendResult<PipelineHandle>;
    fn destroy_pipeline(&mut self, pipeline: PipelineHandle);

    // Timestamp queries
    fn create_timestamp_pool(&mut self, count: u32) -> BackendResult<QueryPoolHandle>;
    fn destroy_query_pool(&mut self, pool: QueryPoolHandle);
    /// Host-side reset of `count` queries starting at `first`.
    fn reset_query_pool(&mut self, pool: QueryPoolHandle, first: u32, count: u32);
    /// Read `count` queries without waiting; unresolved slots report `available == false`.
    fn timestamp_results(
        &mut self,
        pool: QueryPoolHandle,
        first: u32,
        count: u32,
    ) -> BackendResult<Vec<TimestampQuery>>;

    // Command recording
    fn cmd_transition_texture(
        &mut self,
        cmd: CommandBufferHandle,
        texture: TextureHandle,
        old: ImageLayout,
        new: ImageLayout,
    );
    fn cmd_copy_buffer(
        &mut self,
        cmd: CommandBufferHandle,
        src: BufferHandle,
        dst: BufferHandle,
        region: BufferCopy,
    );
    /// Full-extent linear blit; `src` must be TRANSFER_SRC and `dst` TRANSFER_DST.
    fn cmd_blit_texture(
        &mut self,
        cmd: CommandBufferHandle,
        src: TextureHandle,
        src_extent: Extent2d,
        dst: TextureHandle,
        dst_extent: Extent2d,
    );
    fn cmd_clear_color(
        &mut self,
        cmd: CommandBufferHandle,
        texture: TextureHandle,
        layout: ImageLayout,
        color: [f32; 4],
    );
    fn cmd_begin_rendering(
        &mut self,
        cmd: CommandBufferHandle,
        target: TextureHandle,
        extent: Extent2d,
        load: LoadOp,
    );
    fn cmd_end_rendering(&mut self, cmd: CommandBufferHandle);
    fn cmd_set_viewport_scissor(&mut self, cmd: CommandBufferHandle, extent: Extent2d);
    fn cmd_bind_pipeline(
        &mut self,
        cmd: CommandBufferHandle,
        bind_point: BindPoint,
        pipeline: PipelineHandle,
    );
    fn cmd_bind_descriptor_set(
        &mut self,
        cmd: CommandBufferHandle,
        bind_point: BindPoint,
        layout: PipelineLayoutHandle,
        set: DescriptorSetHandle,
    );
    fn cmd_push_constants(
        &mut self,
        cmd: CommandBufferHandle,
        layout: PipelineLayoutHandle,
        stages: ShaderStages,
        offset: u32,
        data: &[u8],
    );
    fn cmd_bind_vertex_buffer(&mut self, cmd: CommandBufferHandle, buffer: BufferHandle, offset: u64);
    fn cmd_draw(
        &mut self,
        cmd: CommandBufferHandle,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    );
    fn cmd_dispatch(&mut self, cmd: CommandBufferHandle, x: u32, y: u32, z: u32);
    fn cmd_write_timestamp(
        &mut self,
        cmd: CommandBufferHandle,
        stage: PipelineStages,
        pool: QueryPoolHandle,
        index: u32,
    );
}
