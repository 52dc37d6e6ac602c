//! Common types shared between backends

use bitflags::bitflags;

use crate::backend::traits::{
    CommandBufferHandle, DescriptorSetHandle, DescriptorSetLayoutHandle, PipelineLayoutHandle,
    SamplerHandle, SemaphoreHandle, ShaderModuleHandle, TextureHandle, BufferHandle,
};

/// Texture format enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Bgra8UnormSrgb,
    Rgba16Float,
    Rgba32Float,
    R32Float,
    Rg16Float,
    Rg32Float,
}

impl TextureFormat {
    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            TextureFormat::Rgba8Unorm
            | TextureFormat::Rgba8UnormSrgb
            | TextureFormat::Bgra8Unorm
            | TextureFormat::Bgra8UnormSrgb
            | TextureFormat::R32Float
            | TextureFormat::Rg16Float => 4,
            TextureFormat::Rgba16Float | TextureFormat::Rg32Float => 8,
            TextureFormat::Rgba32Float => 16,
        }
    }
}

bitflags! {
    /// Texture usage flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        const COPY_SRC = 1 << 0;
        const COPY_DST = 1 << 1;
        const SAMPLED = 1 << 2;
        const STORAGE = 1 << 3;
        const COLOR_ATTACHMENT = 1 << 4;
    }
}

bitflags! {
    /// Buffer usage flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        const VERTEX = 1 << 0;
        const INDEX = 1 << 1;
        const UNIFORM = 1 << 2;
        const STORAGE = 1 << 3;
        const COPY_SRC = 1 << 4;
        const COPY_DST = 1 << 5;
    }
}

bitflags! {
    /// Properties of the memory a buffer ended up in.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MemoryProperties: u32 {
        const DEVICE_LOCAL = 1 << 0;
        const HOST_VISIBLE = 1 << 1;
        const HOST_COHERENT = 1 << 2;
    }
}

bitflags! {
    /// Shader stage visibility
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ShaderStages: u32 {
        const VERTEX = 1 << 0;
        const FRAGMENT = 1 << 1;
        const COMPUTE = 1 << 2;
    }
}

bitflags! {
    /// Pipeline stages used for semaphore waits and timestamps
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PipelineStages: u32 {
        const TOP_OF_PIPE = 1 << 0;
        const TRANSFER = 1 << 1;
        const COLOR_ATTACHMENT_OUTPUT = 1 << 2;
        const FRAGMENT_SHADER = 1 << 3;
        const COMPUTE_SHADER = 1 << 4;
        const BOTTOM_OF_PIPE = 1 << 5;
        const ALL_COMMANDS = 1 << 6;
    }
}

bitflags! {
    /// Descriptor indexing flags for a single binding
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DescriptorBindingFlags: u32 {
        const PARTIALLY_BOUND = 1 << 0;
        const UPDATE_AFTER_BIND = 1 << 1;
        const VARIABLE_COUNT = 1 << 2;
    }
}

/// Where a buffer should be allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MemoryPreference {
    /// Device-local memory, host visibility not required.
    DeviceLocal,
    /// Host-visible, persistently mapped memory.
    #[default]
    HostVisible,
}

/// Image layout tracked per texture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageLayout {
    Undefined,
    General,
    ColorAttachment,
    ShaderReadOnly,
    TransferSrc,
    TransferDst,
    PresentSrc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceType {
    Discrete,
    Integrated,
    Virtual,
    Cpu,
    Other,
}

/// Device properties the orchestration layer cares about.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceLimits {
    /// Nanoseconds per timestamp tick. Zero means timestamps are unsupported.
    pub timestamp_period: f32,
    /// Whether every graphics and compute queue supports timestamps.
    pub timestamp_compute_and_graphics: bool,
    /// Valid timestamp bits of the queue family work is submitted to.
    pub queue_timestamp_valid_bits: u32,
    pub device_type: DeviceType,
}

impl DeviceLimits {
    /// Whether timestamp queries can be written and read on the work queue.
    pub fn supports_timestamps(&self) -> bool {
        if self.timestamp_period == 0.0 {
            return false;
        }
        self.timestamp_compute_and_graphics || self.queue_timestamp_valid_bits != 0
    }
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self {
            timestamp_period: 1.0,
            timestamp_compute_and_graphics: true,
            queue_timestamp_valid_bits: 64,
            device_type: DeviceType::Integrated,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Extent2d {
    pub width: u32,
    pub height: u32,
}

impl Extent2d {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Buffer descriptor
#[derive(Debug, Clone)]
pub struct BufferDescriptor {
    pub label: Option<String>,
    pub size: u64,
    pub usage: BufferUsage,
    pub memory: MemoryPreference,
}

impl BufferDescriptor {
    pub fn new(size: u64, usage: BufferUsage, memory: MemoryPreference) -> Self {
        Self {
            label: None,
            size,
            usage,
            memory,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// Texture descriptor
#[derive(Debug, Clone)]
pub struct TextureDescriptor {
    pub label: Option<String>,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub usage: TextureUsage,
}

impl TextureDescriptor {
    pub fn new(width: u32, height: u32, format: TextureFormat, usage: TextureUsage) -> Self {
        Self {
            label: None,
            width,
            height,
            format,
            usage,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterMode {
    Nearest,
    #[default]
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddressMode {
    #[default]
    ClampToEdge,
    Repeat,
}

/// Sampler descriptor
#[derive(Debug, Clone, Default)]
pub struct SamplerDescriptor {
    pub label: Option<String>,
    pub filter: FilterMode,
    pub address_mode: AddressMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorType {
    UniformBuffer,
    CombinedImageSampler,
    StorageBuffer,
    StorageImage,
}

/// One binding of a descriptor set layout
#[derive(Debug, Clone)]
pub struct DescriptorBinding {
    pub binding: u32,
    pub ty: DescriptorType,
    pub count: u32,
    pub stages: ShaderStages,
    pub flags: DescriptorBindingFlags,
}

impl DescriptorBinding {
    pub fn new(binding: u32, ty: DescriptorType, stages: ShaderStages) -> Self {
        Self {
            binding,
            ty,
            count: 1,
            stages,
            flags: DescriptorBindingFlags::empty(),
        }
    }

    pub fn with_count(mut self, count: u32) -> Self {
        self.count = count;
        self
    }

    pub fn with_flags(mut self, flags: DescriptorBindingFlags) -> Self {
        self.flags = flags;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct DescriptorSetLayoutDescriptor {
    pub bindings: Vec<DescriptorBinding>,
}

impl DescriptorSetLayoutDescriptor {
    /// Whether any binding may be updated after the set is bound.
    pub fn update_after_bind(&self) -> bool {
        self.bindings
            .iter()
            .any(|b| b.flags.contains(DescriptorBindingFlags::UPDATE_AFTER_BIND))
    }
}

#[derive(Debug, Clone)]
pub struct DescriptorPoolDescriptor {
    pub max_sets: u32,
    pub sizes: Vec<(DescriptorType, u32)>,
    /// Individual sets may be freed back to the pool.
    pub free_sets: bool,
    pub update_after_bind: bool,
}

/// What a descriptor write points at
#[derive(Debug, Clone, PartialEq)]
pub enum DescriptorResource {
    Image {
        texture: TextureHandle,
        sampler: Option<SamplerHandle>,
        layout: ImageLayout,
    },
    Buffer {
        buffer: BufferHandle,
        offset: u64,
        range: u64,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct DescriptorWrite {
    pub set: DescriptorSetHandle,
    pub binding: u32,
    pub array_element: u32,
    pub ty: DescriptorType,
    pub resource: DescriptorResource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushConstantRange {
    pub stages: ShaderStages,
    pub offset: u32,
    pub size: u32,
}

#[derive(Debug, Clone, Default)]
pub struct PipelineLayoutDescriptor {
    pub set_layouts: Vec<DescriptorSetLayoutHandle>,
    pub push_constants: Option<PushConstantRange>,
}

/// Vertex attribute format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexFormat {
    Float32,
    Float32x2,
    Float32x4,
}

impl VertexFormat {
    pub fn size(&self) -> u32 {
        match self {
            VertexFormat::Float32 => 4,
            VertexFormat::Float32x2 => 8,
            VertexFormat::Float32x4 => 16,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexAttribute {
    pub location: u32,
    pub format: VertexFormat,
    pub offset: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexStepMode {
    Vertex,
    Instance,
}

#[derive(Debug, Clone)]
pub struct VertexBufferLayout {
    pub stride: u32,
    pub step_mode: VertexStepMode,
    pub attributes: Vec<VertexAttribute>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlendMode {
    #[default]
    Opaque,
    /// Straight alpha: `src * a + dst * (1 - a)` for color and alpha.
    Alpha,
}

/// Graphics pipeline for dynamic rendering with a single color attachment.
#[derive(Debug, Clone)]
pub struct GraphicsPipelineDescriptor {
    pub label: Option<String>,
    pub layout: PipelineLayoutHandle,
    pub vertex_shader: ShaderModuleHandle,
    pub fragment_shader: ShaderModuleHandle,
    pub vertex_layout: VertexBufferLayout,
    pub blend: BlendMode,
    pub color_format: TextureFormat,
}

#[derive(Debug, Clone)]
pub struct ComputePipelineDescriptor {
    pub label: Option<String>,
    pub layout: PipelineLayoutHandle,
    pub shader: ShaderModuleHandle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindPoint {
    Graphics,
    Compute,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferCopy {
    pub src_offset: u64,
    pub dst_offset: u64,
    pub size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoadOp {
    Clear([f32; 4]),
    Load,
}

/// One batch of a queue submission
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubmitInfo {
    pub wait: Vec<(SemaphoreHandle, PipelineStages)>,
    pub command_buffers: Vec<CommandBufferHandle>,
    pub signal: Vec<SemaphoreHandle>,
}

/// Swapchain image handed out by `acquire_next_image`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquiredImage {
    pub index: u32,
    pub texture: TextureHandle,
}

/// A resolved timestamp query slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimestampQuery {
    pub ticks: u64,
    pub available: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_support_requires_period() {
        let limits = DeviceLimits {
            timestamp_period: 0.0,
            ..Default::default()
        };
        assert!(!limits.supports_timestamps());
    }

    #[test]
    fn test_timestamp_support_falls_back_to_queue_bits() {
        let mut limits = DeviceLimits {
            timestamp_compute_and_graphics: false,
            queue_timestamp_valid_bits: 0,
            ..Default::default()
        };
        assert!(!limits.supports_timestamps());

        limits.queue_timestamp_valid_bits = 36;
        assert!(limits.supports_timestamps());
    }

    #[test]
    fn test_update_after_bind_detection() {
        let desc = DescriptorSetLayoutDescriptor {
            bindings: vec![
                DescriptorBinding::new(0, DescriptorType::UniformBuffer, ShaderStages::VERTEX),
                DescriptorBinding::new(1, DescriptorType::CombinedImageSampler, ShaderStages::FRAGMENT)
                    .with_count(16)
                    .with_flags(DescriptorBindingFlags::UPDATE_AFTER_BIND),
            ],
        };
        assert!(desc.update_after_bind());
    }
}
