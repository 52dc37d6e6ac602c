//! Vulkan backend implementation using ash
//!
//! The instance, physical device, logical device and queue are created by the
//! caller and handed over in a [`VulkanDeviceDesc`]. The device must have
//! Vulkan 1.3 dynamic rendering, host query reset and the descriptor indexing
//! features (partially bound, update-after-bind sampled images, variable
//! descriptor count) enabled. The backend owns every object it creates plus an
//! optional swapchain built on a caller-provided surface, and destroys them on
//! drop. The device and instance are left to the caller.

mod conversion;

use std::collections::HashMap;

use ash::khr::{surface, swapchain};
use ash::vk;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use gpu_allocator::MemoryLocation;

use crate::backend::traits::*;
use crate::backend::types::*;
use conversion::*;

/// Externally created device objects the backend runs on.
pub struct VulkanDeviceDesc {
    pub entry: ash::Entry,
    pub instance: ash::Instance,
    pub physical_device: vk::PhysicalDevice,
    pub device: ash::Device,
    /// Queue supporting graphics, compute and (with a surface) presentation.
    pub queue: vk::Queue,
    pub queue_family_index: u32,
    /// Surface to build the swapchain on. `None` runs headless.
    pub surface: Option<vk::SurfaceKHR>,
    /// Swapchain extent used when the surface leaves it to the application.
    pub surface_extent: Extent2d,
    pub vsync: bool,
}

struct VkBuffer {
    buffer: vk::Buffer,
    allocation: Allocation,
}

struct VkTexture {
    image: vk::Image,
    view: vk::ImageView,
    /// `None` for swapchain images, which the swapchain owns.
    allocation: Option<Allocation>,
}

struct Swapchain {
    surface: vk::SurfaceKHR,
    swapchain: vk::SwapchainKHR,
    format: vk::Format,
    extent: vk::Extent2D,
    /// Texture handle ids of the swapchain images, by image index.
    images: Vec<u64>,
}

/// Vulkan backend implementation
pub struct VulkanBackend {
    _entry: ash::Entry,
    instance: ash::Instance,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
    queue: vk::Queue,
    queue_family_index: u32,
    allocator: Option<Allocator>,
    surface_fn: surface::Instance,
    swapchain_fn: swapchain::Device,
    swapchain: Option<Swapchain>,
    vsync: bool,
    limits: DeviceLimits,

    next_id: u64,
    fences: HashMap<u64, vk::Fence>,
    semaphores: HashMap<u64, vk::Semaphore>,
    command_pools: HashMap<u64, vk::CommandPool>,
    command_buffers: HashMap<u64, vk::CommandBuffer>,
    buffers: HashMap<u64, VkBuffer>,
    textures: HashMap<u64, VkTexture>,
    samplers: HashMap<u64, vk::Sampler>,
    shader_modules: HashMap<u64, vk::ShaderModule>,
    descriptor_set_layouts: HashMap<u64, vk::DescriptorSetLayout>,
    descriptor_pools: HashMap<u64, vk::DescriptorPool>,
    descriptor_sets: HashMap<u64, vk::DescriptorSet>,
    pipeline_layouts: HashMap<u64, vk::PipelineLayout>,
    pipelines: HashMap<u64, vk::Pipeline>,
    query_pools: HashMap<u64, vk::QueryPool>,
}

impl VulkanBackend {
    pub fn new(desc: VulkanDeviceDesc) -> BackendResult<Self> {
        let VulkanDeviceDesc {
            entry,
            instance,
            physical_device,
            device,
            queue,
            queue_family_index,
            surface,
            surface_extent,
            vsync,
        } = desc;

        let limits = unsafe {
            let properties = instance.get_physical_device_properties(physical_device);
            let families = instance.get_physical_device_queue_family_properties(physical_device);
            DeviceLimits {
                timestamp_period: properties.limits.timestamp_period,
                timestamp_compute_and_graphics: properties.limits.timestamp_compute_and_graphics
                    == vk::TRUE,
                queue_timestamp_valid_bits: families
                    .get(queue_family_index as usize)
                    .map(|family| family.timestamp_valid_bits)
                    .unwrap_or(0),
                device_type: convert_device_type(properties.device_type),
            }
        };

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .map_err(|e| BackendError::InitializationFailed(e.to_string()))?;

        let surface_fn = surface::Instance::new(&entry, &instance);
        let swapchain_fn = swapchain::Device::new(&instance, &device);

        let mut backend = Self {
            _entry: entry,
            instance,
            physical_device,
            device,
            queue,
            queue_family_index,
            allocator: Some(allocator),
            surface_fn,
            swapchain_fn,
            swapchain: None,
            vsync,
            limits,
            next_id: 1,
            fences: HashMap::new(),
            semaphores: HashMap::new(),
            command_pools: HashMap::new(),
            command_buffers: HashMap::new(),
            buffers: HashMap::new(),
            textures: HashMap::new(),
            samplers: HashMap::new(),
            shader_modules: HashMap::new(),
            descriptor_set_layouts: HashMap::new(),
            descriptor_pools: HashMap::new(),
            descriptor_sets: HashMap::new(),
            pipeline_layouts: HashMap::new(),
            pipelines: HashMap::new(),
            query_pools: HashMap::new(),
        };

        if let Some(surface) = surface {
            backend.create_swapchain(surface, surface_extent)?;
        }

        log::info!(
            "Vulkan backend created ({:?}, timestamp period {} ns)",
            backend.limits.device_type,
            backend.limits.timestamp_period
        );
        Ok(backend)
    }

    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    pub fn queue(&self) -> vk::Queue {
        self.queue
    }

    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }

    /// Rebuild the swapchain, e.g. after `SurfaceOutdated` or a window resize.
    pub fn resize(&mut self, width: u32, height: u32) -> BackendResult<()> {
        let Some(surface) = self.swapchain.as_ref().map(|s| s.surface) else {
            return Err(BackendError::Unsupported("backend has no surface".into()));
        };
        self.create_swapchain(surface, Extent2d::new(width, height))
    }

    fn next_handle(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn allocator(&mut self) -> BackendResult<&mut Allocator> {
        self.allocator
            .as_mut()
            .ok_or_else(|| BackendError::ResourceCreationFailed("allocator not available".into()))
    }

    fn command_buffer(&self, cmd: CommandBufferHandle) -> Option<vk::CommandBuffer> {
        let found = self.command_buffers.get(&cmd.0).copied();
        if found.is_none() {
            log::error!("Recording into unknown command buffer {}", cmd.0);
        }
        found
    }

    fn create_swapchain(&mut self, surface: vk::SurfaceKHR, extent: Extent2d) -> BackendResult<()> {
        unsafe {
            let _ = self.device.device_wait_idle();

            let capabilities = self
                .surface_fn
                .get_physical_device_surface_capabilities(self.physical_device, surface)
                .map_err(|e| BackendError::InitializationFailed(e.to_string()))?;
            let formats = self
                .surface_fn
                .get_physical_device_surface_formats(self.physical_device, surface)
                .map_err(|e| BackendError::InitializationFailed(e.to_string()))?;
            let present_modes = self
                .surface_fn
                .get_physical_device_surface_present_modes(self.physical_device, surface)
                .map_err(|e| BackendError::InitializationFailed(e.to_string()))?;

            let format = formats
                .iter()
                .find(|f| {
                    f.format == vk::Format::B8G8R8A8_UNORM
                        && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
                })
                .or_else(|| formats.first())
                .copied()
                .ok_or_else(|| {
                    BackendError::InitializationFailed("surface reports no formats".into())
                })?;

            let present_mode = if self.vsync {
                vk::PresentModeKHR::FIFO
            } else {
                present_modes
                    .iter()
                    .copied()
                    .find(|&m| m == vk::PresentModeKHR::MAILBOX)
                    .unwrap_or(vk::PresentModeKHR::FIFO)
            };

            let image_extent = if capabilities.current_extent.width != u32::MAX {
                capabilities.current_extent
            } else {
                vk::Extent2D {
                    width: extent.width.clamp(
                        capabilities.min_image_extent.width,
                        capabilities.max_image_extent.width,
                    ),
                    height: extent.height.clamp(
                        capabilities.min_image_extent.height,
                        capabilities.max_image_extent.height,
                    ),
                }
            };

            let mut image_count = capabilities.min_image_count + 1;
            if capabilities.max_image_count > 0 {
                image_count = image_count.min(capabilities.max_image_count);
            }

            let old_swapchain = self.swapchain.take();
            let swapchain_info = vk::SwapchainCreateInfoKHR::default()
                .surface(surface)
                .min_image_count(image_count)
                .image_format(format.format)
                .image_color_space(format.color_space)
                .image_extent(image_extent)
                .image_array_layers(1)
                .image_usage(
                    vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST,
                )
                .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
                .pre_transform(capabilities.current_transform)
                .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
                .present_mode(present_mode)
                .clipped(true)
                .old_swapchain(
                    old_swapchain
                        .as_ref()
                        .map(|s| s.swapchain)
                        .unwrap_or_default(),
                );

            let swapchain = self
                .swapchain_fn
                .create_swapchain(&swapchain_info, None)
                .map_err(|e| BackendError::InitializationFailed(e.to_string()));
            if let Some(old) = old_swapchain {
                self.destroy_swapchain(old);
            }
            let swapchain = swapchain?;

            let images = self
                .swapchain_fn
                .get_swapchain_images(swapchain)
                .map_err(|e| BackendError::InitializationFailed(e.to_string()))?;

            let mut ids = Vec::with_capacity(images.len());
            for image in images {
                let view_info = vk::ImageViewCreateInfo::default()
                    .image(image)
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .format(format.format)
                    .subresource_range(color_subresource_range());
                let view = self
                    .device
                    .create_image_view(&view_info, None)
                    .map_err(creation_error)?;
                let id = self.next_handle();
                self.textures.insert(
                    id,
                    VkTexture {
                        image,
                        view,
                        allocation: None,
                    },
                );
                ids.push(id);
            }

            log::info!(
                "Swapchain created: {}x{}, {} images, {:?}",
                image_extent.width,
                image_extent.height,
                ids.len(),
                present_mode
            );
            self.swapchain = Some(Swapchain {
                surface,
                swapchain,
                format: format.format,
                extent: image_extent,
                images: ids,
            });
            Ok(())
        }
    }

    fn destroy_swapchain(&mut self, swapchain: Swapchain) {
        unsafe {
            for id in swapchain.images {
                if let Some(texture) = self.textures.remove(&id) {
                    self.device.destroy_image_view(texture.view, None);
                }
            }
            self.swapchain_fn.destroy_swapchain(swapchain.swapchain, None);
        }
    }

    fn free_allocation(&mut self, allocation: Allocation) {
        if let Some(allocator) = self.allocator.as_mut() {
            if let Err(e) = allocator.free(allocation) {
                log::error!("Failed to free allocation: {}", e);
            }
        }
    }
}

impl GpuBackend for VulkanBackend {
    fn name(&self) -> &'static str {
        "Vulkan"
    }

    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn create_fence(&mut self, signaled: bool) -> BackendResult<FenceHandle> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let info = vk::FenceCreateInfo::default().flags(flags);
        let fence = unsafe { self.device.create_fence(&info, None) }.map_err(creation_error)?;
        let id = self.next_handle();
        self.fences.insert(id, fence);
        Ok(FenceHandle(id))
    }

    fn wait_fence(&mut self, fence: FenceHandle, timeout_ns: u64) -> BackendResult<()> {
        let vk_fence = *self
            .fences
            .get(&fence.0)
            .ok_or(BackendError::InvalidHandle { kind: "fence", id: fence.0 })?;
        unsafe { self.device.wait_for_fences(&[vk_fence], true, timeout_ns) }
            .map_err(submission_error)
    }

    fn reset_fence(&mut self, fence: FenceHandle) -> BackendResult<()> {
        let vk_fence = *self
            .fences
            .get(&fence.0)
            .ok_or(BackendError::InvalidHandle { kind: "fence", id: fence.0 })?;
        unsafe { self.device.reset_fences(&[vk_fence]) }.map_err(submission_error)
    }

    fn destroy_fence(&mut self, fence: FenceHandle) {
        if let Some(vk_fence) = self.fences.remove(&fence.0) {
            unsafe { self.device.destroy_fence(vk_fence, None) };
        }
    }

    fn create_semaphore(&mut self) -> BackendResult<SemaphoreHandle> {
        let info = vk::SemaphoreCreateInfo::default();
        let semaphore =
            unsafe { self.device.create_semaphore(&info, None) }.map_err(creation_error)?;
        let id = self.next_handle();
        self.semaphores.insert(id, semaphore);
        Ok(SemaphoreHandle(id))
    }

    fn destroy_semaphore(&mut self, semaphore: SemaphoreHandle) {
        if let Some(vk_semaphore) = self.semaphores.remove(&semaphore.0) {
            unsafe { self.device.destroy_semaphore(vk_semaphore, None) };
        }
    }

    fn wait_idle(&mut self) -> BackendResult<()> {
        unsafe { self.device.device_wait_idle() }.map_err(submission_error)
    }

    fn create_command_pool(&mut self) -> BackendResult<CommandPoolHandle> {
        let info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(self.queue_family_index)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let pool = unsafe { self.device.create_command_pool(&info, None) }.map_err(creation_error)?;
        let id = self.next_handle();
        self.command_pools.insert(id, pool);
        Ok(CommandPoolHandle(id))
    }

    fn destroy_command_pool(&mut self, pool: CommandPoolHandle) {
        if let Some(vk_pool) = self.command_pools.remove(&pool.0) {
            unsafe { self.device.destroy_command_pool(vk_pool, None) };
        }
    }

    fn allocate_command_buffer(
        &mut self,
        pool: CommandPoolHandle,
    ) -> BackendResult<CommandBufferHandle> {
        let vk_pool = *self.command_pools.get(&pool.0).ok_or(BackendError::InvalidHandle {
            kind: "command pool",
            id: pool.0,
        })?;
        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(vk_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let buffers =
            unsafe { self.device.allocate_command_buffers(&info) }.map_err(creation_error)?;
        let buffer = buffers.first().copied().ok_or_else(|| {
            BackendError::ResourceCreationFailed("no command buffer allocated".into())
        })?;
        let id = self.next_handle();
        self.command_buffers.insert(id, buffer);
        Ok(CommandBufferHandle(id))
    }

    fn free_command_buffers(&mut self, pool: CommandPoolHandle, buffers: &[CommandBufferHandle]) {
        let Some(&vk_pool) = self.command_pools.get(&pool.0) else {
            return;
        };
        let vk_buffers: Vec<_> = buffers
            .iter()
            .filter_map(|cmd| self.command_buffers.remove(&cmd.0))
            .collect();
        if !vk_buffers.is_empty() {
            unsafe { self.device.free_command_buffers(vk_pool, &vk_buffers) };
        }
    }

    fn begin_command_buffer(&mut self, cmd: CommandBufferHandle) -> BackendResult<()> {
        let buffer = *self.command_buffers.get(&cmd.0).ok_or(BackendError::InvalidHandle {
            kind: "command buffer",
            id: cmd.0,
        })?;
        let info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.device.begin_command_buffer(buffer, &info) }.map_err(submission_error)
    }

    fn end_command_buffer(&mut self, cmd: CommandBufferHandle) -> BackendResult<()> {
        let buffer = *self.command_buffers.get(&cmd.0).ok_or(BackendError::InvalidHandle {
            kind: "command buffer",
            id: cmd.0,
        })?;
        unsafe { self.device.end_command_buffer(buffer) }.map_err(submission_error)
    }

    fn submit(&mut self, submits: &[SubmitInfo], fence: Option<FenceHandle>) -> BackendResult<()> {
        struct Batch {
            wait: Vec<vk::Semaphore>,
            stages: Vec<vk::PipelineStageFlags>,
            buffers: Vec<vk::CommandBuffer>,
            signal: Vec<vk::Semaphore>,
        }

        let semaphore = |handle: &SemaphoreHandle| {
            self.semaphores
                .get(&handle.0)
                .copied()
                .ok_or(BackendError::InvalidHandle { kind: "semaphore", id: handle.0 })
        };

        let mut batches = Vec::with_capacity(submits.len());
        for submit in submits {
            batches.push(Batch {
                wait: submit
                    .wait
                    .iter()
                    .map(|(s, _)| semaphore(s))
                    .collect::<BackendResult<_>>()?,
                stages: submit
                    .wait
                    .iter()
                    .map(|(_, stages)| convert_pipeline_stages(*stages))
                    .collect(),
                buffers: submit
                    .command_buffers
                    .iter()
                    .map(|cmd| {
                        self.command_buffers.get(&cmd.0).copied().ok_or(
                            BackendError::InvalidHandle {
                                kind: "command buffer",
                                id: cmd.0,
                            },
                        )
                    })
                    .collect::<BackendResult<_>>()?,
                signal: submit
                    .signal
                    .iter()
                    .map(semaphore)
                    .collect::<BackendResult<_>>()?,
            });
        }

        let infos: Vec<_> = batches
            .iter()
            .map(|batch| {
                vk::SubmitInfo::default()
                    .wait_semaphores(&batch.wait)
                    .wait_dst_stage_mask(&batch.stages)
                    .command_buffers(&batch.buffers)
                    .signal_semaphores(&batch.signal)
            })
            .collect();

        let vk_fence = match fence {
            Some(fence) => *self
                .fences
                .get(&fence.0)
                .ok_or(BackendError::InvalidHandle { kind: "fence", id: fence.0 })?,
            None => vk::Fence::null(),
        };

        unsafe { self.device.queue_submit(self.queue, &infos, vk_fence) }
            .map_err(submission_error)
    }

    fn surface_extent(&self) -> Extent2d {
        self.swapchain
            .as_ref()
            .map(|s| Extent2d::new(s.extent.width, s.extent.height))
            .unwrap_or_default()
    }

    fn surface_format(&self) -> TextureFormat {
        self.swapchain
            .as_ref()
            .and_then(|s| convert_format_back(s.format))
            .unwrap_or(TextureFormat::Bgra8Unorm)
    }

    fn acquire_next_image(&mut self, signal: SemaphoreHandle) -> BackendResult<AcquiredImage> {
        let swapchain = self
            .swapchain
            .as_ref()
            .ok_or_else(|| BackendError::Unsupported("backend has no swapchain".into()))?;
        let semaphore = *self.semaphores.get(&signal.0).ok_or(BackendError::InvalidHandle {
            kind: "semaphore",
            id: signal.0,
        })?;
        let (index, suboptimal) = unsafe {
            self.swapchain_fn.acquire_next_image(
                swapchain.swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        }
        .map_err(submission_error)?;
        if suboptimal {
            log::debug!("Swapchain is suboptimal for the surface");
        }
        let texture = swapchain
            .images
            .get(index as usize)
            .copied()
            .ok_or_else(|| BackendError::SubmissionFailed(format!("bad image index {}", index)))?;
        Ok(AcquiredImage {
            index,
            texture: TextureHandle(texture),
        })
    }

    fn present(&mut self, image_index: u32, wait: SemaphoreHandle) -> BackendResult<()> {
        let swapchain = self
            .swapchain
            .as_ref()
            .ok_or_else(|| BackendError::Unsupported("backend has no swapchain".into()))?;
        let semaphore = *self.semaphores.get(&wait.0).ok_or(BackendError::InvalidHandle {
            kind: "semaphore",
            id: wait.0,
        })?;
        let wait_semaphores = [semaphore];
        let swapchains = [swapchain.swapchain];
        let indices = [image_index];
        let info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&indices);
        unsafe { self.swapchain_fn.queue_present(self.queue, &info) }
            .map(|_| ())
            .map_err(|e| match e {
                vk::Result::ERROR_OUT_OF_DATE_KHR => BackendError::SurfaceOutdated,
                vk::Result::ERROR_DEVICE_LOST => BackendError::DeviceLost,
                other => BackendError::PresentFailed(other.to_string()),
            })
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        let info = vk::BufferCreateInfo::default()
            .size(desc.size)
            .usage(convert_buffer_usage(desc.usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { self.device.create_buffer(&info, None) }.map_err(creation_error)?;
        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };

        let location = match desc.memory {
            MemoryPreference::DeviceLocal => MemoryLocation::GpuOnly,
            MemoryPreference::HostVisible => MemoryLocation::CpuToGpu,
        };
        let allocation = self.allocator().and_then(|allocator| {
            allocator
                .allocate(&AllocationCreateDesc {
                    name: desc.label.as_deref().unwrap_or("buffer"),
                    requirements,
                    location,
                    linear: true,
                    allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                })
                .map_err(|e| BackendError::ResourceCreationFailed(e.to_string()))
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        if let Err(e) = unsafe {
            self.device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        } {
            unsafe { self.device.destroy_buffer(buffer, None) };
            self.free_allocation(allocation);
            return Err(creation_error(e));
        }

        let id = self.next_handle();
        self.buffers.insert(id, VkBuffer { buffer, allocation });
        Ok(BufferHandle(id))
    }

    fn buffer_memory_properties(&self, buffer: BufferHandle) -> MemoryProperties {
        self.buffers
            .get(&buffer.0)
            .map(|b| convert_memory_properties(b.allocation.memory_properties()))
            .unwrap_or_else(MemoryProperties::empty)
    }

    fn write_buffer(
        &mut self,
        buffer: BufferHandle,
        offset: u64,
        data: &[u8],
    ) -> BackendResult<()> {
        let target = self
            .buffers
            .get_mut(&buffer.0)
            .ok_or(BackendError::InvalidHandle { kind: "buffer", id: buffer.0 })?;
        let mapped = target.allocation.mapped_slice_mut().ok_or_else(|| {
            BackendError::Unsupported(format!("buffer {} is not host visible", buffer.0))
        })?;
        let start = offset as usize;
        let end = start + data.len();
        let dst = mapped.get_mut(start..end).ok_or_else(|| {
            BackendError::ResourceCreationFailed(format!(
                "write of {} bytes at {} overflows buffer {}",
                data.len(),
                offset,
                buffer.0
            ))
        })?;
        dst.copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(&self, buffer: BufferHandle, offset: u64, len: u64) -> BackendResult<Vec<u8>> {
        let source = self
            .buffers
            .get(&buffer.0)
            .ok_or(BackendError::InvalidHandle { kind: "buffer", id: buffer.0 })?;
        let mapped = source.allocation.mapped_slice().ok_or_else(|| {
            BackendError::Unsupported(format!("buffer {} is not host visible", buffer.0))
        })?;
        let start = offset as usize;
        mapped
            .get(start..start + len as usize)
            .map(|bytes| bytes.to_vec())
            .ok_or_else(|| BackendError::Unsupported(format!("read past end of buffer {}", buffer.0)))
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        if let Some(vk_buffer) = self.buffers.remove(&buffer.0) {
            unsafe { self.device.destroy_buffer(vk_buffer.buffer, None) };
            self.free_allocation(vk_buffer.allocation);
        }
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        let format = convert_format(desc.format);
        let info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: desc.width,
                height: desc.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(convert_texture_usage(desc.usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .samples(vk::SampleCountFlags::TYPE_1);
        let image = unsafe { self.device.create_image(&info, None) }.map_err(creation_error)?;
        let requirements = unsafe { self.device.get_image_memory_requirements(image) };

        let allocation = self.allocator().and_then(|allocator| {
            allocator
                .allocate(&AllocationCreateDesc {
                    name: desc.label.as_deref().unwrap_or("texture"),
                    requirements,
                    location: MemoryLocation::GpuOnly,
                    linear: false,
                    allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                })
                .map_err(|e| BackendError::ResourceCreationFailed(e.to_string()))
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_image(image, None) };
                return Err(e);
            }
        };

        let view = unsafe {
            self.device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
                .and_then(|()| {
                    let view_info = vk::ImageViewCreateInfo::default()
                        .image(image)
                        .view_type(vk::ImageViewType::TYPE_2D)
                        .format(format)
                        .subresource_range(color_subresource_range());
                    self.device.create_image_view(&view_info, None)
                })
        };
        let view = match view {
            Ok(view) => view,
            Err(e) => {
                unsafe { self.device.destroy_image(image, None) };
                self.free_allocation(allocation);
                return Err(creation_error(e));
            }
        };

        let id = self.next_handle();
        self.textures.insert(
            id,
            VkTexture {
                image,
                view,
                allocation: Some(allocation),
            },
        );
        Ok(TextureHandle(id))
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        let is_swapchain_image = self
            .swapchain
            .as_ref()
            .is_some_and(|s| s.images.contains(&texture.0));
        if is_swapchain_image {
            return;
        }
        if let Some(vk_texture) = self.textures.remove(&texture.0) {
            unsafe {
                self.device.destroy_image_view(vk_texture.view, None);
                self.device.destroy_image(vk_texture.image, None);
            }
            if let Some(allocation) = vk_texture.allocation {
                self.free_allocation(allocation);
            }
        }
    }

    fn create_sampler(&mut self, desc: &SamplerDescriptor) -> BackendResult<SamplerHandle> {
        let filter = convert_filter(desc.filter);
        let address_mode = convert_address_mode(desc.address_mode);
        let info = vk::SamplerCreateInfo::default()
            .mag_filter(filter)
            .min_filter(filter)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .address_mode_u(address_mode)
            .address_mode_v(address_mode)
            .address_mode_w(address_mode)
            .max_lod(vk::LOD_CLAMP_NONE);
        let sampler = unsafe { self.device.create_sampler(&info, None) }.map_err(creation_error)?;
        let id = self.next_handle();
        self.samplers.insert(id, sampler);
        Ok(SamplerHandle(id))
    }

    fn destroy_sampler(&mut self, sampler: SamplerHandle) {
        if let Some(vk_sampler) = self.samplers.remove(&sampler.0) {
            unsafe { self.device.destroy_sampler(vk_sampler, None) };
        }
    }

    fn create_shader_module(&mut self, spirv: &[u32]) -> BackendResult<ShaderModuleHandle> {
        let info = vk::ShaderModuleCreateInfo::default().code(spirv);
        let module =
            unsafe { self.device.create_shader_module(&info, None) }.map_err(creation_error)?;
        let id = self.next_handle();
        self.shader_modules.insert(id, module);
        Ok(ShaderModuleHandle(id))
    }

    fn destroy_shader_module(&mut self, module: ShaderModuleHandle) {
        if let Some(vk_module) = self.shader_modules.remove(&module.0) {
            unsafe { self.device.destroy_shader_module(vk_module, None) };
        }
    }

    fn create_descriptor_set_layout(
        &mut self,
        desc: &DescriptorSetLayoutDescriptor,
    ) -> BackendResult<DescriptorSetLayoutHandle> {
        let bindings: Vec<_> = desc
            .bindings
            .iter()
            .map(|b| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(b.binding)
                    .descriptor_type(convert_descriptor_type(b.ty))
                    .descriptor_count(b.count)
                    .stage_flags(convert_shader_stages(b.stages))
            })
            .collect();
        let binding_flags: Vec<_> = desc
            .bindings
            .iter()
            .map(|b| convert_binding_flags(b.flags))
            .collect();
        let mut flags_info =
            vk::DescriptorSetLayoutBindingFlagsCreateInfo::default().binding_flags(&binding_flags);

        let layout_flags = if desc.update_after_bind() {
            vk::DescriptorSetLayoutCreateFlags::UPDATE_AFTER_BIND_POOL
        } else {
            vk::DescriptorSetLayoutCreateFlags::empty()
        };
        let info = vk::DescriptorSetLayoutCreateInfo::default()
            .flags(layout_flags)
            .bindings(&bindings)
            .push_next(&mut flags_info);

        let layout = unsafe { self.device.create_descriptor_set_layout(&info, None) }
            .map_err(creation_error)?;
        let id = self.next_handle();
        self.descriptor_set_layouts.insert(id, layout);
        Ok(DescriptorSetLayoutHandle(id))
    }

    fn destroy_descriptor_set_layout(&mut self, layout: DescriptorSetLayoutHandle) {
        if let Some(vk_layout) = self.descriptor_set_layouts.remove(&layout.0) {
            unsafe { self.device.destroy_descriptor_set_layout(vk_layout, None) };
        }
    }

    fn create_descriptor_pool(
        &mut self,
        desc: &DescriptorPoolDescriptor,
    ) -> BackendResult<DescriptorPoolHandle> {
        let sizes: Vec<_> = desc
            .sizes
            .iter()
            .map(|(ty, count)| vk::DescriptorPoolSize {
                ty: convert_descriptor_type(*ty),
                descriptor_count: *count,
            })
            .collect();
        let mut flags = vk::DescriptorPoolCreateFlags::empty();
        if desc.free_sets {
            flags |= vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET;
        }
        if desc.update_after_bind {
            flags |= vk::DescriptorPoolCreateFlags::UPDATE_AFTER_BIND;
        }
        let info = vk::DescriptorPoolCreateInfo::default()
            .flags(flags)
            .max_sets(desc.max_sets)
            .pool_sizes(&sizes);
        let pool =
            unsafe { self.device.create_descriptor_pool(&info, None) }.map_err(creation_error)?;
        let id = self.next_handle();
        self.descriptor_pools.insert(id, pool);
        Ok(DescriptorPoolHandle(id))
    }

    fn destroy_descriptor_pool(&mut self, pool: DescriptorPoolHandle) {
        if let Some(vk_pool) = self.descriptor_pools.remove(&pool.0) {
            // Sets allocated from the pool die with it.
            unsafe { self.device.destroy_descriptor_pool(vk_pool, None) };
        }
    }

    fn allocate_descriptor_set(
        &mut self,
        pool: DescriptorPoolHandle,
        layout: DescriptorSetLayoutHandle,
        variable_count: Option<u32>,
    ) -> BackendResult<DescriptorSetHandle> {
        let vk_pool = *self.descriptor_pools.get(&pool.0).ok_or(BackendError::InvalidHandle {
            kind: "descriptor pool",
            id: pool.0,
        })?;
        let vk_layout =
            *self
                .descriptor_set_layouts
                .get(&layout.0)
                .ok_or(BackendError::InvalidHandle {
                    kind: "descriptor set layout",
                    id: layout.0,
                })?;
        let layouts = [vk_layout];
        let counts = [variable_count.unwrap_or(0)];
        let mut variable_info =
            vk::DescriptorSetVariableDescriptorCountAllocateInfo::default().descriptor_counts(&counts);
        let mut info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(vk_pool)
            .set_layouts(&layouts);
        if variable_count.is_some() {
            info = info.push_next(&mut variable_info);
        }
        let sets = unsafe { self.device.allocate_descriptor_sets(&info) }.map_err(creation_error)?;
        let set = sets.first().copied().ok_or_else(|| {
            BackendError::ResourceCreationFailed("no descriptor set allocated".into())
        })?;
        let id = self.next_handle();
        self.descriptor_sets.insert(id, set);
        Ok(DescriptorSetHandle(id))
    }

    fn update_descriptor_sets(&mut self, writes: &[DescriptorWrite]) {
        enum Info {
            Image(vk::DescriptorImageInfo),
            Buffer(vk::DescriptorBufferInfo),
        }

        let mut resolved = Vec::with_capacity(writes.len());
        for write in writes {
            let Some(&set) = self.descriptor_sets.get(&write.set.0) else {
                log::error!("Descriptor write to unknown set {}", write.set.0);
                continue;
            };
            let info = match &write.resource {
                DescriptorResource::Image {
                    texture,
                    sampler,
                    layout,
                } => {
                    let Some(vk_texture) = self.textures.get(&texture.0) else {
                        log::error!("Descriptor write references unknown texture {}", texture.0);
                        continue;
                    };
                    Info::Image(vk::DescriptorImageInfo {
                        sampler: sampler
                            .and_then(|s| self.samplers.get(&s.0).copied())
                            .unwrap_or_default(),
                        image_view: vk_texture.view,
                        image_layout: convert_image_layout(*layout),
                    })
                }
                DescriptorResource::Buffer {
                    buffer,
                    offset,
                    range,
                } => {
                    let Some(vk_buffer) = self.buffers.get(&buffer.0) else {
                        log::error!("Descriptor write references unknown buffer {}", buffer.0);
                        continue;
                    };
                    Info::Buffer(vk::DescriptorBufferInfo {
                        buffer: vk_buffer.buffer,
                        offset: *offset,
                        range: *range,
                    })
                }
            };
            resolved.push((write, set, info));
        }

        let vk_writes: Vec<_> = resolved
            .iter()
            .map(|(write, set, info)| {
                let base = vk::WriteDescriptorSet::default()
                    .dst_set(*set)
                    .dst_binding(write.binding)
                    .dst_array_element(write.array_element)
                    .descriptor_type(convert_descriptor_type(write.ty));
                match info {
                    Info::Image(image) => base.image_info(std::slice::from_ref(image)),
                    Info::Buffer(buffer) => base.buffer_info(std::slice::from_ref(buffer)),
                }
            })
            .collect();

        if !vk_writes.is_empty() {
            unsafe { self.device.update_descriptor_sets(&vk_writes, &[]) };
        }
    }

    fn create_pipeline_layout(
        &mut self,
        desc: &PipelineLayoutDescriptor,
    ) -> BackendResult<PipelineLayoutHandle> {
        let set_layouts = desc
            .set_layouts
            .iter()
            .map(|layout| {
                self.descriptor_set_layouts
                    .get(&layout.0)
                    .copied()
                    .ok_or(BackendError::InvalidHandle {
                        kind: "descriptor set layout",
                        id: layout.0,
                    })
            })
            .collect::<BackendResult<Vec<_>>>()?;
        let ranges: Vec<_> = desc
            .push_constants
            .iter()
            .map(|range| vk::PushConstantRange {
                stage_flags: convert_shader_stages(range.stages),
                offset: range.offset,
                size: range.size,
            })
            .collect();
        let info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&ranges);
        let layout =
            unsafe { self.device.create_pipeline_layout(&info, None) }.map_err(creation_error)?;
        let id = self.next_handle();
        self.pipeline_layouts.insert(id, layout);
        Ok(PipelineLayoutHandle(id))
    }

    fn destroy_pipeline_layout(&mut self, layout: PipelineLayoutHandle) {
        if let Some(vk_layout) = self.pipeline_layouts.remove(&layout.0) {
            unsafe { self.device.destroy_pipeline_layout(vk_layout, None) };
        }
    }

    fn create_compute_pipeline(
        &mut self,
        desc: &ComputePipelineDescriptor,
    ) -> BackendResult<PipelineHandle> {
        let layout = *self
            .pipeline_layouts
            .get(&desc.layout.0)
            .ok_or(BackendError::InvalidHandle { kind: "pipeline layout", id: desc.layout.0 })?;
        let module = *self
            .shader_modules
            .get(&desc.shader.0)
            .ok_or(BackendError::InvalidHandle { kind: "shader module", id: desc.shader.0 })?;
        let stage = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(module)
            .name(c"main");
        let info = vk::ComputePipelineCreateInfo::default()
            .stage(stage)
            .layout(layout);
        let pipelines = unsafe {
            self.device
                .create_compute_pipelines(vk::PipelineCache::null(), &[info], None)
        }
        .map_err(|(_, e)| creation_error(e))?;
        let pipeline = pipelines.first().copied().ok_or_else(|| {
            BackendError::ResourceCreationFailed("no compute pipeline created".into())
        })?;
        let id = self.next_handle();
        self.pipelines.insert(id, pipeline);
        Ok(PipelineHandle(id))
    }

    fn create_graphics_pipeline(
        &mut self,
        desc: &GraphicsPipelineDescriptor,
    ) -> BackendResult<PipelineHandle> {
        let layout = *self
            .pipeline_layouts
            .get(&desc.layout.0)
            .ok_or(BackendError::InvalidHandle { kind: "pipeline layout", id: desc.layout.0 })?;
        let module = |handle: ShaderModuleHandle| {
            self.shader_modules
                .get(&handle.0)
                .copied()
                .ok_or(BackendError::InvalidHandle { kind: "shader module", id: handle.0 })
        };
        let stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(module(desc.vertex_shader)?)
                .name(c"main"),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(module(desc.fragment_shader)?)
                .name(c"main"),
        ];

        let vertex_bindings = [vk::VertexInputBindingDescription {
            binding: 0,
            stride: desc.vertex_layout.stride,
            input_rate: match desc.vertex_layout.step_mode {
                VertexStepMode::Vertex => vk::VertexInputRate::VERTEX,
                VertexStepMode::Instance => vk::VertexInputRate::INSTANCE,
            },
        }];
        let vertex_attributes: Vec<_> = desc
            .vertex_layout
            .attributes
            .iter()
            .map(|attr| vk::VertexInputAttributeDescription {
                location: attr.location,
                binding: 0,
                format: convert_vertex_format(attr.format),
                offset: attr.offset,
            })
            .collect();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&vertex_bindings)
            .vertex_attribute_descriptions(&vertex_attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST);
        let viewport = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);
        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .line_width(1.0);
        let multisample = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let blend_attachment = match desc.blend {
            BlendMode::Opaque => vk::PipelineColorBlendAttachmentState::default()
                .color_write_mask(vk::ColorComponentFlags::RGBA),
            BlendMode::Alpha => vk::PipelineColorBlendAttachmentState::default()
                .blend_enable(true)
                .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
                .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
                .color_blend_op(vk::BlendOp::ADD)
                .src_alpha_blend_factor(vk::BlendFactor::SRC_ALPHA)
                .dst_alpha_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
                .alpha_blend_op(vk::BlendOp::ADD)
                .color_write_mask(vk::ColorComponentFlags::RGBA),
        };
        let blend_attachments = [blend_attachment];
        let color_blend =
            vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let color_formats = [convert_format(desc.color_format)];
        let mut rendering =
            vk::PipelineRenderingCreateInfo::default().color_attachment_formats(&color_formats);

        let info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic)
            .layout(layout)
            .push_next(&mut rendering);

        let pipelines = unsafe {
            self.device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[info], None)
        }
        .map_err(|(_, e)| creation_error(e))?;
        let pipeline = pipelines.first().copied().ok_or_else(|| {
            BackendError::ResourceCreationFailed("no graphics pipeline created".into())
        })?;
        let id = self.next_handle();
        self.pipelines.insert(id, pipeline);
        Ok(PipelineHandle(id))
    }

    fn destroy_pipeline(&mut self, pipeline: PipelineHandle) {
        if let Some(vk_pipeline) = self.pipelines.remove(&pipeline.0) {
            unsafe { self.device.destroy_pipeline(vk_pipeline, None) };
        }
    }

    fn create_timestamp_pool(&mut self, count: u32) -> BackendResult<QueryPoolHandle> {
        let info = vk::QueryPoolCreateInfo::default()
            .query_type(vk::QueryType::TIMESTAMP)
            .query_count(count);
        let pool = unsafe { self.device.create_query_pool(&info, None) }.map_err(creation_error)?;
        let id = self.next_handle();
        self.query_pools.insert(id, pool);
        Ok(QueryPoolHandle(id))
    }

    fn destroy_query_pool(&mut self, pool: QueryPoolHandle) {
        if let Some(vk_pool) = self.query_pools.remove(&pool.0) {
            unsafe { self.device.destroy_query_pool(vk_pool, None) };
        }
    }

    fn reset_query_pool(&mut self, pool: QueryPoolHandle, first: u32, count: u32) {
        if let Some(&vk_pool) = self.query_pools.get(&pool.0) {
            unsafe { self.device.reset_query_pool(vk_pool, first, count) };
        }
    }

    fn timestamp_results(
        &mut self,
        pool: QueryPoolHandle,
        first: u32,
        count: u32,
    ) -> BackendResult<Vec<TimestampQuery>> {
        let vk_pool = *self
            .query_pools
            .get(&pool.0)
            .ok_or(BackendError::InvalidHandle { kind: "query pool", id: pool.0 })?;
        // Each entry is the timestamp followed by its availability word.
        let mut data = vec![[0u64; 2]; count as usize];
        let result = unsafe {
            self.device.get_query_pool_results(
                vk_pool,
                first,
                &mut data,
                vk::QueryResultFlags::TYPE_64 | vk::QueryResultFlags::WITH_AVAILABILITY,
            )
        };
        match result {
            Ok(()) | Err(vk::Result::NOT_READY) => {}
            Err(e) => return Err(submission_error(e)),
        }
        Ok(data
            .iter()
            .map(|&[ticks, available]| TimestampQuery {
                ticks,
                available: available != 0,
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
        let (Some(buffer), Some(vk_texture)) =
            (self.command_buffer(cmd), self.textures.get(&texture.0))
        else {
            return;
        };
        let (src_access, src_stage) = layout_access(old);
        let (dst_access, dst_stage) = layout_access(new);
        let barrier = vk::ImageMemoryBarrier::default()
            .src_access_mask(src_access)
            .dst_access_mask(dst_access)
            .old_layout(convert_image_layout(old))
            .new_layout(convert_image_layout(new))
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(vk_texture.image)
            .subresource_range(color_subresource_range());
        unsafe {
            self.device.cmd_pipeline_barrier(
                buffer,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
    }

    fn cmd_copy_buffer(
        &mut self,
        cmd: CommandBufferHandle,
        src: BufferHandle,
        dst: BufferHandle,
        region: BufferCopy,
    ) {
        let (Some(buffer), Some(src), Some(dst)) = (
            self.command_buffer(cmd),
            self.buffers.get(&src.0),
            self.buffers.get(&dst.0),
        ) else {
            return;
        };
        let copy = vk::BufferCopy {
            src_offset: region.src_offset,
            dst_offset: region.dst_offset,
            size: region.size,
        };
        unsafe {
            self.device
                .cmd_copy_buffer(buffer, src.buffer, dst.buffer, &[copy]);
        }
    }

    fn cmd_blit_texture(
        &mut self,
        cmd: CommandBufferHandle,
        src: TextureHandle,
        src_extent: Extent2d,
        dst: TextureHandle,
        dst_extent: Extent2d,
    ) {
        let (Some(buffer), Some(src), Some(dst)) = (
            self.command_buffer(cmd),
            self.textures.get(&src.0),
            self.textures.get(&dst.0),
        ) else {
            return;
        };
        let layers = vk::ImageSubresourceLayers {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        };
        let corner = |extent: Extent2d| vk::Offset3D {
            x: extent.width as i32,
            y: extent.height as i32,
            z: 1,
        };
        let blit = vk::ImageBlit {
            src_subresource: layers,
            src_offsets: [vk::Offset3D::default(), corner(src_extent)],
            dst_subresource: layers,
            dst_offsets: [vk::Offset3D::default(), corner(dst_extent)],
        };
        unsafe {
            self.device.cmd_blit_image(
                buffer,
                src.image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                dst.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[blit],
                vk::Filter::LINEAR,
            );
        }
    }

    fn cmd_clear_color(
        &mut self,
        cmd: CommandBufferHandle,
        texture: TextureHandle,
        layout: ImageLayout,
        color: [f32; 4],
    ) {
        let (Some(buffer), Some(vk_texture)) =
            (self.command_buffer(cmd), self.textures.get(&texture.0))
        else {
            return;
        };
        let value = vk::ClearColorValue { float32: color };
        unsafe {
            self.device.cmd_clear_color_image(
                buffer,
                vk_texture.image,
                convert_image_layout(layout),
                &value,
                &[color_subresource_range()],
            );
        }
    }

    fn cmd_begin_rendering(
        &mut self,
        cmd: CommandBufferHandle,
        target: TextureHandle,
        extent: Extent2d,
        load: LoadOp,
    ) {
        let (Some(buffer), Some(vk_texture)) =
            (self.command_buffer(cmd), self.textures.get(&target.0))
        else {
            return;
        };
        let (load_op, clear) = match load {
            LoadOp::Clear(color) => (vk::AttachmentLoadOp::CLEAR, color),
            LoadOp::Load => (vk::AttachmentLoadOp::LOAD, [0.0; 4]),
        };
        let attachment = vk::RenderingAttachmentInfo::default()
            .image_view(vk_texture.view)
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(load_op)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(vk::ClearValue {
                color: vk::ClearColorValue { float32: clear },
            });
        let info = vk::RenderingInfo::default()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent: vk::Extent2D {
                    width: extent.width,
                    height: extent.height,
                },
            })
            .layer_count(1)
            .color_attachments(std::slice::from_ref(&attachment));
        unsafe { self.device.cmd_begin_rendering(buffer, &info) };
    }

    fn cmd_end_rendering(&mut self, cmd: CommandBufferHandle) {
        if let Some(buffer) = self.command_buffer(cmd) {
            unsafe { self.device.cmd_end_rendering(buffer) };
        }
    }

    fn cmd_set_viewport_scissor(&mut self, cmd: CommandBufferHandle, extent: Extent2d) {
        let Some(buffer) = self.command_buffer(cmd) else {
            return;
        };
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D::default(),
            extent: vk::Extent2D {
                width: extent.width,
                height: extent.height,
            },
        };
        unsafe {
            self.device.cmd_set_viewport(buffer, 0, &[viewport]);
            self.device.cmd_set_scissor(buffer, 0, &[scissor]);
        }
    }

    fn cmd_bind_pipeline(
        &mut self,
        cmd: CommandBufferHandle,
        bind_point: BindPoint,
        pipeline: PipelineHandle,
    ) {
        let (Some(buffer), Some(&vk_pipeline)) =
            (self.command_buffer(cmd), self.pipelines.get(&pipeline.0))
        else {
            return;
        };
        unsafe {
            self.device
                .cmd_bind_pipeline(buffer, convert_bind_point(bind_point), vk_pipeline);
        }
    }

    fn cmd_bind_descriptor_set(
        &mut self,
        cmd: CommandBufferHandle,
        bind_point: BindPoint,
        layout: PipelineLayoutHandle,
        set: DescriptorSetHandle,
    ) {
        let (Some(buffer), Some(&vk_layout), Some(&vk_set)) = (
            self.command_buffer(cmd),
            self.pipeline_layouts.get(&layout.0),
            self.descriptor_sets.get(&set.0),
        ) else {
            return;
        };
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                buffer,
                convert_bind_point(bind_point),
                vk_layout,
                0,
                &[vk_set],
                &[],
            );
        }
    }

    fn cmd_push_constants(
        &mut self,
        cmd: CommandBufferHandle,
        layout: PipelineLayoutHandle,
        stages: ShaderStages,
        offset: u32,
        data: &[u8],
    ) {
        let (Some(buffer), Some(&vk_layout)) =
            (self.command_buffer(cmd), self.pipeline_layouts.get(&layout.0))
        else {
            return;
        };
        unsafe {
            self.device.cmd_push_constants(
                buffer,
                vk_layout,
                convert_shader_stages(stages),
                offset,
                data,
            );
        }
    }

    fn cmd_bind_vertex_buffer(&mut self, cmd: CommandBufferHandle, buffer: BufferHandle, offset: u64) {
        let (Some(cmd_buffer), Some(vk_buffer)) =
            (self.command_buffer(cmd), self.buffers.get(&buffer.0))
        else {
            return;
        };
        unsafe {
            self.device
                .cmd_bind_vertex_buffers(cmd_buffer, 0, &[vk_buffer.buffer], &[offset]);
        }
    }

    fn cmd_draw(
        &mut self,
        cmd: CommandBufferHandle,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        if let Some(buffer) = self.command_buffer(cmd) {
            unsafe {
                self.device.cmd_draw(
                    buffer,
                    vertex_count,
                    instance_count,
                    first_vertex,
                    first_instance,
                );
            }
        }
    }

    fn cmd_dispatch(&mut self, cmd: CommandBufferHandle, x: u32, y: u32, z: u32) {
        if let Some(buffer) = self.command_buffer(cmd) {
            unsafe { self.device.cmd_dispatch(buffer, x, y, z) };
        }
    }

    fn cmd_write_timestamp(
        &mut self,
        cmd: CommandBufferHandle,
        stage: PipelineStages,
        pool: QueryPoolHandle,
        index: u32,
    ) {
        let (Some(buffer), Some(&vk_pool)) =
            (self.command_buffer(cmd), self.query_pools.get(&pool.0))
        else {
            return;
        };
        unsafe {
            self.device
                .cmd_write_timestamp(buffer, convert_pipeline_stages(stage), vk_pool, index);
        }
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();

            if let Some(swapchain) = self.swapchain.take() {
                self.destroy_swapchain(swapchain);
            }

            for (_, pipeline) in self.pipelines.drain() {
                self.device.destroy_pipeline(pipeline, None);
            }
            for (_, layout) in self.pipeline_layouts.drain() {
                self.device.destroy_pipeline_layout(layout, None);
            }
            self.descriptor_sets.clear();
            for (_, pool) in self.descriptor_pools.drain() {
                self.device.destroy_descriptor_pool(pool, None);
            }
            for (_, layout) in self.descriptor_set_layouts.drain() {
                self.device.destroy_descriptor_set_layout(layout, None);
            }
            for (_, module) in self.shader_modules.drain() {
                self.device.destroy_shader_module(module, None);
            }
            for (_, sampler) in self.samplers.drain() {
                self.device.destroy_sampler(sampler, None);
            }
            for (_, pool) in self.query_pools.drain() {
                self.device.destroy_query_pool(pool, None);
            }

            let buffers: Vec<_> = self.buffers.drain().map(|(_, b)| b).collect();
            for buffer in buffers {
                self.device.destroy_buffer(buffer.buffer, None);
                self.free_allocation(buffer.allocation);
            }
            let textures: Vec<_> = self.textures.drain().map(|(_, t)| t).collect();
            for texture in textures {
                self.device.destroy_image_view(texture.view, None);
                if let Some(allocation) = texture.allocation {
                    self.device.destroy_image(texture.image, None);
                    self.free_allocation(allocation);
                }
            }

            // The allocator must go before the caller destroys the device.
            drop(self.allocator.take());

            self.command_buffers.clear();
            for (_, pool) in self.command_pools.drain() {
                self.device.destroy_command_pool(pool, None);
            }
            for (_, semaphore) in self.semaphores.drain() {
                self.device.destroy_semaphore(semaphore, None);
            }
            for (_, fence) in self.fences.drain() {
                self.device.destroy_fence(fence, None);
            }
        }
    }
}
