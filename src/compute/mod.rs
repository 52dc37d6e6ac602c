//! Named compute pipeline registry with per-pass GPU timing
//!
//! Every pipeline gets a query index at creation (1, 2, 3, ... in creation
//! order). Each frame the registry writes a start marker at index 0,
//! each pipeline writes one at its own index in [`ComputePipeline::begin`],
//! and [`PipelineRegistry::end_frame`] closes the chain at `count + 1`. A
//! pipeline's time is the distance from its marker to the next one, so
//! pipelines are expected to run in creation order.

pub mod chain;
mod timing;

pub use chain::{
    dispatch_size, jump_flood_pass_count, JumpFloodSchedule, JumpFloodStep, PingPong,
    TemporalFrame, TemporalHistory, WORKGROUP_SIZE,
};
pub use timing::{elapsed_ms, TimestampPools, MAX_TIMED_PIPELINES, TIMESTAMP_QUERY_CAPACITY};

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::backend::*;
use crate::context::FrameContext;
use crate::error::GraphicsResult;
use crate::resources::Texture;
use crate::shader::{load_shader_module, ShaderSource};

/// Sets in the registry-wide descriptor pool.
const DESCRIPTOR_POOL_SETS: u32 = 1000;

/// Size and format of one pipeline output image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputDescription {
    pub format: TextureFormat,
    pub width: u32,
    pub height: u32,
}

impl OutputDescription {
    pub fn new(format: TextureFormat, width: u32, height: u32) -> Self {
        Self {
            format,
            width,
            height,
        }
    }
}

/// A compute pipeline, its descriptor set and output images.
pub struct ComputePipeline {
    context: Arc<FrameContext>,
    name: String,
    pipeline: PipelineHandle,
    layout: PipelineLayoutHandle,
    set_layout: DescriptorSetLayoutHandle,
    set: DescriptorSetHandle,
    query_pool: Option<QueryPoolHandle>,
    query_index: u32,
    execution_time: f32,
    texture_input_count: u32,
    push_constant_size: u32,
    outputs: Vec<Arc<Texture>>,
}

impl ComputePipeline {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Slot of this pipeline's start marker in the timestamp pools.
    pub fn query_index(&self) -> u32 {
        self.query_index
    }

    pub fn is_timed(&self) -> bool {
        self.query_pool.is_some()
    }

    pub fn outputs(&self) -> &[Arc<Texture>] {
        &self.outputs
    }

    pub fn output(&self, index: usize) -> Option<&Arc<Texture>> {
        self.outputs.get(index)
    }

    /// GPU time of this pass the last time its timestamps resolved, in
    /// milliseconds; 0 when no data is available.
    pub fn execution_time(&self) -> f32 {
        self.execution_time
    }

    pub fn texture_input_count(&self) -> u32 {
        self.texture_input_count
    }

    pub fn push_constant_size(&self) -> u32 {
        self.push_constant_size
    }

    pub fn pipeline_handle(&self) -> PipelineHandle {
        self.pipeline
    }

    /// Mark the start of this pass, bind the pipeline and its set and
    /// optionally push constants.
    pub fn begin(&self, cmd: CommandBufferHandle, push_constants: Option<&[u8]>) {
        {
            let mut backend = self.context.backend();
            if let Some(pool) = self.query_pool {
                backend.cmd_write_timestamp(cmd, PipelineStages::BOTTOM_OF_PIPE, pool, self.query_index);
            }
            backend.cmd_bind_pipeline(cmd, BindPoint::Compute, self.pipeline);
            backend.cmd_bind_descriptor_set(cmd, BindPoint::Compute, self.layout, self.set);
        }
        if let Some(data) = push_constants {
            self.set_push_constants(cmd, data);
        }
    }

    /// Point storage image `binding` at `texture`.
    ///
    /// The texture must be in `General` layout when the dispatch runs.
    pub fn bind_texture(&self, binding: u32, texture: &Texture) {
        if binding >= self.texture_input_count {
            log::error!(
                "Pipeline {}: binding {} out of range ({} texture bindings)",
                self.name,
                binding,
                self.texture_input_count
            );
            return;
        }
        self.context.backend().update_descriptor_sets(&[DescriptorWrite {
            set: self.set,
            binding,
            array_element: 0,
            ty: DescriptorType::StorageImage,
            resource: DescriptorResource::Image {
                texture: texture.handle(),
                sampler: None,
                layout: ImageLayout::General,
            },
        }]);
    }

    pub fn set_push_constants(&self, cmd: CommandBufferHandle, data: &[u8]) {
        if data.len() > self.push_constant_size as usize {
            log::error!(
                "Pipeline {}: {} bytes of push constants exceed the declared {}",
                self.name,
                data.len(),
                self.push_constant_size
            );
            return;
        }
        self.context
            .backend()
            .cmd_push_constants(cmd, self.layout, ShaderStages::COMPUTE, 0, data);
    }

    /// Dispatch enough workgroups to cover a `width` x `height` image.
    pub fn dispatch(&self, cmd: CommandBufferHandle, width: u32, height: u32) {
        self.context
            .backend()
            .cmd_dispatch(cmd, dispatch_size(width), dispatch_size(height), 1);
    }
}

impl std::fmt::Debug for ComputePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputePipeline")
            .field("name", &self.name)
            .field("query_index", &self.query_index)
            .field("execution_time", &self.execution_time)
            .field("outputs", &self.outputs.len())
            .finish()
    }
}

impl Drop for ComputePipeline {
    fn drop(&mut self) {
        let mut backend = self.context.backend();
        backend.destroy_pipeline(self.pipeline);
        backend.destroy_pipeline_layout(self.layout);
        backend.destroy_descriptor_set_layout(self.set_layout);
    }
}

/// Owns compute pipelines by name and times them every frame.
pub struct PipelineRegistry {
    context: Arc<FrameContext>,
    shaders: Arc<dyn ShaderSource>,
    descriptor_pool: DescriptorPoolHandle,
    pipelines: BTreeMap<String, ComputePipeline>,
    timestamps: Option<TimestampPools>,
    next_query_index: u32,
    pre_execution_time: f32,
    capacity_warned: bool,
}

impl PipelineRegistry {
    pub fn new(context: &Arc<FrameContext>, shaders: Arc<dyn ShaderSource>) -> GraphicsResult<Self> {
        let limits = *context.limits();
        let mut backend = context.backend();
        let descriptor_pool = backend.create_descriptor_pool(&DescriptorPoolDescriptor {
            max_sets: DESCRIPTOR_POOL_SETS,
            sizes: vec![
                (DescriptorType::StorageImage, DESCRIPTOR_POOL_SETS),
                (DescriptorType::CombinedImageSampler, DESCRIPTOR_POOL_SETS),
                (DescriptorType::UniformBuffer, DESCRIPTOR_POOL_SETS),
                (DescriptorType::StorageBuffer, DESCRIPTOR_POOL_SETS),
            ],
            free_sets: true,
            update_after_bind: false,
        })?;

        let timestamps = if limits.supports_timestamps() {
            log::info!("Timestamp period: {} ns", limits.timestamp_period);
            match TimestampPools::new(backend.as_mut(), limits.timestamp_period) {
                Ok(pools) => Some(pools),
                Err(e) => {
                    backend.destroy_descriptor_pool(descriptor_pool);
                    return Err(e);
                }
            }
        } else {
            log::warn!("Timestamp queries are not supported, compute pass timings disabled");
            None
        };
        drop(backend);

        log::info!("Pipeline registry created");
        Ok(Self {
            context: Arc::clone(context),
            shaders,
            descriptor_pool,
            pipelines: BTreeMap::new(),
            timestamps,
            next_query_index: 1,
            pre_execution_time: 0.0,
            capacity_warned: false,
        })
    }

    /// Create and register a compute pipeline under `name`.
    ///
    /// Returns `Ok(None)` (after logging) if the name is taken or the shader
    /// cannot be loaded.
    pub fn create(
        &mut self,
        name: &str,
        shader_id: &str,
        outputs: &[OutputDescription],
        texture_input_count: u32,
        push_constant_size: u32,
    ) -> GraphicsResult<Option<&ComputePipeline>> {
        if self.pipelines.contains_key(name) {
            log::error!("Pipeline with name {} already exists", name);
            return Ok(None);
        }
        let Some(shader) = load_shader_module(&self.context, self.shaders.as_ref(), shader_id)? else {
            log::error!("Pipeline {}: shader {} not loaded", name, shader_id);
            return Ok(None);
        };

        let (pipeline, layout, set_layout, set) = {
            let mut backend = self.context.backend();
            let bindings = (0..texture_input_count)
                .map(|binding| {
                    DescriptorBinding::new(binding, DescriptorType::StorageImage, ShaderStages::COMPUTE)
                })
                .collect();
            let set_layout =
                backend.create_descriptor_set_layout(&DescriptorSetLayoutDescriptor { bindings })?;
            let set = backend.allocate_descriptor_set(self.descriptor_pool, set_layout, None)?;
            let layout = backend.create_pipeline_layout(&PipelineLayoutDescriptor {
                set_layouts: vec![set_layout],
                push_constants: (push_constant_size > 0).then_some(PushConstantRange {
                    stages: ShaderStages::COMPUTE,
                    offset: 0,
                    size: push_constant_size,
                }),
            })?;
            let pipeline = backend.create_compute_pipeline(&ComputePipelineDescriptor {
                label: Some(name.to_string()),
                layout,
                shader,
            })?;
            backend.destroy_shader_module(shader);
            (pipeline, layout, set_layout, set)
        };

        let query_index = self.next_query_index;
        self.next_query_index += 1;
        let query_pool = if query_index <= MAX_TIMED_PIPELINES {
            self.timestamps.as_ref().map(TimestampPools::current)
        } else {
            if self.timestamps.is_some() && !self.capacity_warned {
                log::warn!(
                    "More than {} compute pipelines, pipelines from {} on are not timed",
                    MAX_TIMED_PIPELINES,
                    name
                );
                self.capacity_warned = true;
            }
            None
        };

        let mut compute = ComputePipeline {
            context: Arc::clone(&self.context),
            name: name.to_string(),
            pipeline,
            layout,
            set_layout,
            set,
            query_pool,
            query_index,
            execution_time: 0.0,
            texture_input_count,
            push_constant_size,
            outputs: Vec::with_capacity(outputs.len()),
        };
        for (i, output) in outputs.iter().enumerate() {
            let desc = TextureDescriptor::new(
                output.width,
                output.height,
                output.format,
                TextureUsage::STORAGE
                    | TextureUsage::COPY_SRC
                    | TextureUsage::COPY_DST
                    | TextureUsage::SAMPLED,
            )
            .with_label(format!("{} output {}", name, i));
            compute.outputs.push(Arc::new(Texture::sampled(
                &self.context,
                &desc,
                &SamplerDescriptor::default(),
            )?));
        }

        log::info!(
            "Created compute pipeline {} (query index {}, {} outputs)",
            name,
            query_index,
            outputs.len()
        );
        self.pipelines.insert(name.to_string(), compute);
        Ok(self.pipelines.get(name))
    }

    /// Read back last frame's timings and open this frame's timestamp chain.
    pub fn begin_frame(&mut self, cmd: CommandBufferHandle) -> GraphicsResult<()> {
        let Some(timestamps) = self.timestamps.as_ref() else {
            return Ok(());
        };
        let timed = self.timed_count();
        let results = {
            let mut backend = self.context.backend();
            let results = timestamps.read_previous(backend.as_mut(), timed + 2)?;
            timestamps.begin(backend.as_mut(), cmd);
            results
        };
        let period = timestamps.period_ns();
        let current = timestamps.current();

        // Index 1 is the first pipeline's start only when one is timed.
        if timed >= 1 && results[0].available && results[1].available {
            self.pre_execution_time = elapsed_ms(results[0], results[1], period);
        }
        for pipeline in self.pipelines.values_mut() {
            if pipeline.query_index > timed {
                continue;
            }
            let start = results[pipeline.query_index as usize];
            let end = results[pipeline.query_index as usize + 1];
            pipeline.execution_time = elapsed_ms(start, end, period);
            pipeline.query_pool = Some(current);
        }
        Ok(())
    }

    /// Close this frame's timestamp chain.
    pub fn end_frame(&mut self, cmd: CommandBufferHandle) {
        let end_index = self.timed_count() + 1;
        if let Some(timestamps) = self.timestamps.as_mut() {
            timestamps.end(self.context.backend().as_mut(), cmd, end_index);
        }
    }

    pub fn get_pipeline(&self, name: &str) -> Option<&ComputePipeline> {
        self.pipelines.get(name)
    }

    /// Every pipeline, ordered by name.
    pub fn pipelines(&self) -> impl Iterator<Item = &ComputePipeline> {
        self.pipelines.values()
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }

    /// GPU time between the frame-start marker and the first pipeline, in ms.
    pub fn pre_execution_time(&self) -> f32 {
        self.pre_execution_time
    }

    /// Sum of every pipeline's last resolved execution time, in ms.
    pub fn total_execution_time(&self) -> f32 {
        self.pipelines.values().map(|p| p.execution_time).sum()
    }

    pub fn timestamps_supported(&self) -> bool {
        self.timestamps.is_some()
    }

    fn timed_count(&self) -> u32 {
        (self.next_query_index - 1).min(MAX_TIMED_PIPELINES)
    }
}

impl Drop for PipelineRegistry {
    fn drop(&mut self) {
        // Pipelines lock the backend in their own Drop.
        self.pipelines.clear();
        let mut backend = self.context.backend();
        if let Some(timestamps) = self.timestamps.take() {
            timestamps.destroy(backend.as_mut());
        }
        backend.destroy_descriptor_pool(self.descriptor_pool);
    }
}
