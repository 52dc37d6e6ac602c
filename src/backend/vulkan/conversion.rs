//! Translation from backend-neutral types to Vulkan enums and flags

use ash::vk;

use crate::backend::traits::BackendError;
use crate::backend::types::*;

pub(super) fn convert_format(format: TextureFormat) -> vk::Format {
    match format {
        TextureFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        TextureFormat::Rgba8UnormSrgb => vk::Format::R8G8B8A8_SRGB,
        TextureFormat::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
        TextureFormat::Bgra8UnormSrgb => vk::Format::B8G8R8A8_SRGB,
        TextureFormat::Rgba16Float => vk::Format::R16G16B16A16_SFLOAT,
        TextureFormat::Rgba32Float => vk::Format::R32G32B32A32_SFLOAT,
        TextureFormat::R32Float => vk::Format::R32_SFLOAT,
        TextureFormat::Rg16Float => vk::Format::R16G16_SFLOAT,
        TextureFormat::Rg32Float => vk::Format::R32G32_SFLOAT,
    }
}

pub(super) fn convert_format_back(format: vk::Format) -> Option<TextureFormat> {
    Some(match format {
        vk::Format::R8G8B8A8_UNORM => TextureFormat::Rgba8Unorm,
        vk::Format::R8G8B8A8_SRGB => TextureFormat::Rgba8UnormSrgb,
        vk::Format::B8G8R8A8_UNORM => TextureFormat::Bgra8Unorm,
        vk::Format::B8G8R8A8_SRGB => TextureFormat::Bgra8UnormSrgb,
        vk::Format::R16G16B16A16_SFLOAT => TextureFormat::Rgba16Float,
        vk::Format::R32G32B32A32_SFLOAT => TextureFormat::Rgba32Float,
        vk::Format::R32_SFLOAT => TextureFormat::R32Float,
        vk::Format::R16G16_SFLOAT => TextureFormat::Rg16Float,
        vk::Format::R32G32_SFLOAT => TextureFormat::Rg32Float,
        _ => return None,
    })
}

pub(super) fn convert_buffer_usage(usage: BufferUsage) -> vk::BufferUsageFlags {
    let mut flags = vk::BufferUsageFlags::empty();
    if usage.contains(BufferUsage::VERTEX) {
        flags |= vk::BufferUsageFlags::VERTEX_BUFFER;
    }
    if usage.contains(BufferUsage::INDEX) {
        flags |= vk::BufferUsageFlags::INDEX_BUFFER;
    }
    if usage.contains(BufferUsage::UNIFORM) {
        flags |= vk::BufferUsageFlags::UNIFORM_BUFFER;
    }
    if usage.contains(BufferUsage::STORAGE) {
        flags |= vk::BufferUsageFlags::STORAGE_BUFFER;
    }
    if usage.contains(BufferUsage::COPY_SRC) {
        flags |= vk::BufferUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(BufferUsage::COPY_DST) {
        flags |= vk::BufferUsageFlags::TRANSFER_DST;
    }
    flags
}

pub(super) fn convert_texture_usage(usage: TextureUsage) -> vk::ImageUsageFlags {
    let mut flags = vk::ImageUsageFlags::empty();
    if usage.contains(TextureUsage::COPY_SRC) {
        flags |= vk::ImageUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(TextureUsage::COPY_DST) {
        flags |= vk::ImageUsageFlags::TRANSFER_DST;
    }
    if usage.contains(TextureUsage::SAMPLED) {
        flags |= vk::ImageUsageFlags::SAMPLED;
    }
    if usage.contains(TextureUsage::STORAGE) {
        flags |= vk::ImageUsageFlags::STORAGE;
    }
    if usage.contains(TextureUsage::COLOR_ATTACHMENT) {
        flags |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
    }
    flags
}

pub(super) fn convert_memory_properties(flags: vk::MemoryPropertyFlags) -> MemoryProperties {
    let mut props = MemoryProperties::empty();
    if flags.contains(vk::MemoryPropertyFlags::DEVICE_LOCAL) {
        props |= MemoryProperties::DEVICE_LOCAL;
    }
    if flags.contains(vk::MemoryPropertyFlags::HOST_VISIBLE) {
        props |= MemoryProperties::HOST_VISIBLE;
    }
    if flags.contains(vk::MemoryPropertyFlags::HOST_COHERENT) {
        props |= MemoryProperties::HOST_COHERENT;
    }
    props
}

pub(super) fn convert_shader_stages(stages: ShaderStages) -> vk::ShaderStageFlags {
    let mut flags = vk::ShaderStageFlags::empty();
    if stages.contains(ShaderStages::VERTEX) {
        flags |= vk::ShaderStageFlags::VERTEX;
    }
    if stages.contains(ShaderStages::FRAGMENT) {
        flags |= vk::ShaderStageFlags::FRAGMENT;
    }
    if stages.contains(ShaderStages::COMPUTE) {
        flags |= vk::ShaderStageFlags::COMPUTE;
    }
    flags
}

pub(super) fn convert_pipeline_stages(stages: PipelineStages) -> vk::PipelineStageFlags {
    let pairs = [
        (PipelineStages::TOP_OF_PIPE, vk::PipelineStageFlags::TOP_OF_PIPE),
        (PipelineStages::TRANSFER, vk::PipelineStageFlags::TRANSFER),
        (
            PipelineStages::COLOR_ATTACHMENT_OUTPUT,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        ),
        (PipelineStages::FRAGMENT_SHADER, vk::PipelineStageFlags::FRAGMENT_SHADER),
        (PipelineStages::COMPUTE_SHADER, vk::PipelineStageFlags::COMPUTE_SHADER),
        (PipelineStages::BOTTOM_OF_PIPE, vk::PipelineStageFlags::BOTTOM_OF_PIPE),
        (PipelineStages::ALL_COMMANDS, vk::PipelineStageFlags::ALL_COMMANDS),
    ];
    pairs
        .into_iter()
        .filter(|(ours, _)| stages.contains(*ours))
        .fold(vk::PipelineStageFlags::empty(), |acc, (_, theirs)| acc | theirs)
}

pub(super) fn convert_descriptor_type(ty: DescriptorType) -> vk::DescriptorType {
    match ty {
        DescriptorType::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
        DescriptorType::CombinedImageSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        DescriptorType::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
        DescriptorType::StorageImage => vk::DescriptorType::STORAGE_IMAGE,
    }
}

pub(super) fn convert_binding_flags(flags: DescriptorBindingFlags) -> vk::DescriptorBindingFlags {
    let mut out = vk::DescriptorBindingFlags::empty();
    if flags.contains(DescriptorBindingFlags::PARTIALLY_BOUND) {
        out |= vk::DescriptorBindingFlags::PARTIALLY_BOUND;
    }
    if flags.contains(DescriptorBindingFlags::UPDATE_AFTER_BIND) {
        out |= vk::DescriptorBindingFlags::UPDATE_AFTER_BIND;
    }
    if flags.contains(DescriptorBindingFlags::VARIABLE_COUNT) {
        out |= vk::DescriptorBindingFlags::VARIABLE_DESCRIPTOR_COUNT;
    }
    out
}

pub(super) fn convert_image_layout(layout: ImageLayout) -> vk::ImageLayout {
    match layout {
        ImageLayout::Undefined => vk::ImageLayout::UNDEFINED,
        ImageLayout::General => vk::ImageLayout::GENERAL,
        ImageLayout::ColorAttachment => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        ImageLayout::ShaderReadOnly => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        ImageLayout::TransferSrc => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        ImageLayout::TransferDst => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        ImageLayout::PresentSrc => vk::ImageLayout::PRESENT_SRC_KHR,
    }
}

/// Access mask and pipeline stage of work that uses an image in `layout`.
pub(super) fn layout_access(layout: ImageLayout) -> (vk::AccessFlags, vk::PipelineStageFlags) {
    match layout {
        ImageLayout::Undefined => (vk::AccessFlags::empty(), vk::PipelineStageFlags::TOP_OF_PIPE),
        ImageLayout::General => (
            vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE,
            vk::PipelineStageFlags::COMPUTE_SHADER,
        ),
        ImageLayout::ColorAttachment => (
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        ),
        ImageLayout::ShaderReadOnly => (
            vk::AccessFlags::SHADER_READ,
            vk::PipelineStageFlags::FRAGMENT_SHADER | vk::PipelineStageFlags::COMPUTE_SHADER,
        ),
        ImageLayout::TransferSrc => (vk::AccessFlags::TRANSFER_READ, vk::PipelineStageFlags::TRANSFER),
        ImageLayout::TransferDst => (vk::AccessFlags::TRANSFER_WRITE, vk::PipelineStageFlags::TRANSFER),
        ImageLayout::PresentSrc => (
            vk::AccessFlags::empty(),
            vk::PipelineStageFlags::BOTTOM_OF_PIPE,
        ),
    }
}

pub(super) fn convert_vertex_format(format: VertexFormat) -> vk::Format {
    match format {
        VertexFormat::Float32 => vk::Format::R32_SFLOAT,
        VertexFormat::Float32x2 => vk::Format::R32G32_SFLOAT,
        VertexFormat::Float32x4 => vk::Format::R32G32B32A32_SFLOAT,
    }
}

pub(super) fn convert_filter(mode: FilterMode) -> vk::Filter {
    match mode {
        FilterMode::Nearest => vk::Filter::NEAREST,
        FilterMode::Linear => vk::Filter::LINEAR,
    }
}

pub(super) fn convert_address_mode(mode: AddressMode) -> vk::SamplerAddressMode {
    match mode {
        AddressMode::ClampToEdge => vk::SamplerAddressMode::CLAMP_TO_EDGE,
        AddressMode::Repeat => vk::SamplerAddressMode::REPEAT,
    }
}

pub(super) fn convert_device_type(ty: vk::PhysicalDeviceType) -> DeviceType {
    match ty {
        vk::PhysicalDeviceType::DISCRETE_GPU => DeviceType::Discrete,
        vk::PhysicalDeviceType::INTEGRATED_GPU => DeviceType::Integrated,
        vk::PhysicalDeviceType::VIRTUAL_GPU => DeviceType::Virtual,
        vk::PhysicalDeviceType::CPU => DeviceType::Cpu,
        _ => DeviceType::Other,
    }
}

pub(super) fn convert_bind_point(bind_point: BindPoint) -> vk::PipelineBindPoint {
    match bind_point {
        BindPoint::Graphics => vk::PipelineBindPoint::GRAPHICS,
        BindPoint::Compute => vk::PipelineBindPoint::COMPUTE,
    }
}

/// Map a creation failure, keeping the variants callers treat specially.
pub(super) fn creation_error(e: vk::Result) -> BackendError {
    match e {
        vk::Result::ERROR_OUT_OF_HOST_MEMORY | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => {
            BackendError::OutOfMemory
        }
        vk::Result::ERROR_DEVICE_LOST => BackendError::DeviceLost,
        other => BackendError::ResourceCreationFailed(other.to_string()),
    }
}

pub(super) fn submission_error(e: vk::Result) -> BackendError {
    match e {
        vk::Result::ERROR_DEVICE_LOST => BackendError::DeviceLost,
        vk::Result::ERROR_OUT_OF_DATE_KHR => BackendError::SurfaceOutdated,
        vk::Result::ERROR_OUT_OF_HOST_MEMORY | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => {
            BackendError::OutOfMemory
        }
        other => BackendError::SubmissionFailed(other.to_string()),
    }
}

pub(super) fn color_subresource_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}
