//! Dynamic sprite batching
//!
//! Sprites are accumulated into one instance-rate geometry buffer and drawn
//! with one instanced draw per batch. Every sprite carries the index of its
//! texture in a per-frame descriptor table; see [`TextureTable`].
//!
//! The geometry buffer, its upload path, the descriptor set and the texture
//! table exist once per frame slot, picked by [`FrameContext::frame_slot`],
//! so recording a frame never touches what a frame still in flight reads.
//! Record between `FrameExecutor::begin_frame` and `end_frame`.

mod geometry;
mod texture_table;

pub use geometry::GeometryUpload;
pub use texture_table::{TextureTable, TEXTURE_TABLE_CAPACITY};

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2, Vec4};

use crate::backend::*;
use crate::context::FrameContext;
use crate::error::{GraphicsError, GraphicsResult};
use crate::frame::FRAMES_IN_FLIGHT;
use crate::resources::{Buffer, Texture};
use crate::shader::{load_shader_module, ShaderSource};

/// Number of `f32` values in one packed [`Sprite`].
pub const SPRITE_ATTRIB_COUNT: usize = 14;

/// Descriptor binding holding the texture table.
const TEXTURE_BINDING: u32 = 1;

/// One quad, packed exactly as the sprite vertex shader reads it.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Sprite {
    pub position: Vec2,
    pub size: Vec2,
    /// `u0, v0, u1, v1`
    pub uv: [f32; 4],
    pub color: [f32; 4],
    /// Radians.
    pub rotation: f32,
    /// Overwritten by [`SpriteBatch::draw_sprite`].
    pub texture_index: f32,
}

static_assertions::assert_eq_size!(Sprite, [f32; SPRITE_ATTRIB_COUNT]);

impl Sprite {
    pub fn new(position: Vec2, size: Vec2) -> Self {
        Self {
            position,
            size,
            ..Self::default()
        }
    }

    pub fn with_position(mut self, position: Vec2) -> Self {
        self.position = position;
        self
    }

    pub fn with_size(mut self, size: Vec2) -> Self {
        self.size = size;
        self
    }

    pub fn with_uv(mut self, uv: Vec4) -> Self {
        self.uv = uv.to_array();
        self
    }

    pub fn with_color(mut self, color: Vec4) -> Self {
        self.color = color.to_array();
        self
    }

    pub fn with_rotation(mut self, radians: f32) -> Self {
        self.rotation = radians;
        self
    }

    pub fn as_floats(&self) -> &[f32; SPRITE_ATTRIB_COUNT] {
        bytemuck::cast_ref(self)
    }
}

impl Default for Sprite {
    fn default() -> Self {
        Self {
            position: Vec2::ZERO,
            size: Vec2::ZERO,
            uv: [0.0, 0.0, 1.0, 1.0],
            color: [1.0; 4],
            rotation: 0.0,
            texture_index: 0.0,
        }
    }
}

/// A run of sprites drawn with one transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Batch {
    pub start_index: u32,
    pub count: u32,
    pub transform: Mat4,
}

#[derive(Debug, Clone)]
pub struct SpriteBatchConfig {
    /// Maximum number of sprites per frame.
    pub capacity: u32,
    /// Format of the color attachment the batch renders into.
    pub color_format: TextureFormat,
    pub vertex_shader: String,
    pub fragment_shader: String,
}

impl SpriteBatchConfig {
    pub fn new(capacity: u32) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    pub fn with_color_format(mut self, format: TextureFormat) -> Self {
        self.color_format = format;
        self
    }

    pub fn with_shaders(mut self, vertex: impl Into<String>, fragment: impl Into<String>) -> Self {
        self.vertex_shader = vertex.into();
        self.fragment_shader = fragment.into();
        self
    }
}

impl Default for SpriteBatchConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            color_format: TextureFormat::Rgba8Unorm,
            vertex_shader: "shaders/sprite_batch.vert.spv".to_string(),
            fragment_shader: "shaders/sprite_batch.frag.spv".to_string(),
        }
    }
}

/// Per-frame counters for overlays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SpriteStats {
    pub sprites: u32,
    pub batches: u32,
    pub textures: u32,
}

/// What one frame slot's draws read on the GPU.
struct SlotResources {
    geometry: Buffer,
    upload: GeometryUpload,
    descriptor_set: DescriptorSetHandle,
    textures: TextureTable,
}

/// Accumulates sprites and draws them with one instanced draw per batch.
pub struct SpriteBatch {
    context: Arc<FrameContext>,
    capacity: u32,
    slots: Vec<SlotResources>,
    descriptor_pool: DescriptorPoolHandle,
    set_layout: DescriptorSetLayoutHandle,
    pipeline_layout: PipelineLayoutHandle,
    pipeline: PipelineHandle,
    vertex_module: ShaderModuleHandle,
    fragment_module: ShaderModuleHandle,
    batches: Vec<Batch>,
    sprite_count: u32,
}

static_assertions::assert_impl_all!(SpriteBatch: Send);

fn sprite_vertex_layout() -> VertexBufferLayout {
    let attribute = |location, format, offset| VertexAttribute {
        location,
        format,
        offset,
    };
    VertexBufferLayout {
        stride: std::mem::size_of::<Sprite>() as u32,
        step_mode: VertexStepMode::Instance,
        attributes: vec![
            // x, y, width, height
            attribute(0, VertexFormat::Float32x4, 0),
            // u0, v0, u1, v1
            attribute(1, VertexFormat::Float32x4, 16),
            // r, g, b, a
            attribute(2, VertexFormat::Float32x4, 32),
            // rotation, texture index
            attribute(3, VertexFormat::Float32x2, 48),
        ],
    }
}

impl SpriteBatch {
    /// Build the batch pipeline and buffers.
    ///
    /// Returns `Ok(None)` when either shader stage cannot be loaded.
    pub fn new(
        context: &Arc<FrameContext>,
        shaders: &dyn ShaderSource,
        config: &SpriteBatchConfig,
    ) -> GraphicsResult<Option<Self>> {
        log::info!("Creating sprite batch with capacity: {}", config.capacity);
        if config.capacity == 0 {
            return Err(GraphicsError::InvalidParameter(
                "sprite batch capacity must be non-zero".into(),
            ));
        }

        let Some(vertex_module) = load_shader_module(context, shaders, &config.vertex_shader)?
        else {
            log::error!("Vertex shader not loaded");
            return Ok(None);
        };
        let Some(fragment_module) = load_shader_module(context, shaders, &config.fragment_shader)?
        else {
            log::error!("Fragment shader not loaded");
            context.backend().destroy_shader_module(vertex_module);
            return Ok(None);
        };

        let memory = if context.limits().device_type == DeviceType::Discrete {
            MemoryPreference::DeviceLocal
        } else {
            MemoryPreference::HostVisible
        };
        let mut geometry = Vec::with_capacity(FRAMES_IN_FLIGHT);
        for slot in 0..FRAMES_IN_FLIGHT {
            let buffer = Buffer::new(
                context,
                &BufferDescriptor::new(
                    config.capacity as u64 * std::mem::size_of::<Sprite>() as u64,
                    BufferUsage::VERTEX | BufferUsage::COPY_DST,
                    memory,
                )
                .with_label(format!("sprite geometry {}", slot)),
            )?;
            let upload = GeometryUpload::for_buffer(context, &buffer, config.capacity)?;
            geometry.push((buffer, upload));
        }

        let sets = FRAMES_IN_FLIGHT as u32;
        let mut backend = context.backend();
        let descriptor_pool = backend.create_descriptor_pool(&DescriptorPoolDescriptor {
            max_sets: sets,
            sizes: vec![
                (DescriptorType::CombinedImageSampler, TEXTURE_TABLE_CAPACITY * sets),
                (DescriptorType::UniformBuffer, sets),
            ],
            free_sets: false,
            update_after_bind: true,
        })?;
        let set_layout = backend.create_descriptor_set_layout(&DescriptorSetLayoutDescriptor {
            bindings: vec![
                DescriptorBinding::new(
                    0,
                    DescriptorType::UniformBuffer,
                    ShaderStages::VERTEX | ShaderStages::FRAGMENT,
                ),
                DescriptorBinding::new(
                    TEXTURE_BINDING,
                    DescriptorType::CombinedImageSampler,
                    ShaderStages::FRAGMENT,
                )
                .with_count(TEXTURE_TABLE_CAPACITY)
                .with_flags(
                    DescriptorBindingFlags::PARTIALLY_BOUND
                        | DescriptorBindingFlags::UPDATE_AFTER_BIND
                        | DescriptorBindingFlags::VARIABLE_COUNT,
                ),
            ],
        })?;
        let mut slots = Vec::with_capacity(FRAMES_IN_FLIGHT);
        for (geometry, upload) in geometry {
            let descriptor_set = backend.allocate_descriptor_set(
                descriptor_pool,
                set_layout,
                Some(TEXTURE_TABLE_CAPACITY),
            )?;
            slots.push(SlotResources {
                geometry,
                upload,
                descriptor_set,
                textures: TextureTable::new(),
            });
        }
        let pipeline_layout = backend.create_pipeline_layout(&PipelineLayoutDescriptor {
            set_layouts: vec![set_layout],
            push_constants: Some(PushConstantRange {
                stages: ShaderStages::VERTEX,
                offset: 0,
                size: std::mem::size_of::<Mat4>() as u32,
            }),
        })?;
        let pipeline = backend.create_graphics_pipeline(&GraphicsPipelineDescriptor {
            label: Some("sprite batch".to_string()),
            layout: pipeline_layout,
            vertex_shader: vertex_module,
            fragment_shader: fragment_module,
            vertex_layout: sprite_vertex_layout(),
            blend: BlendMode::Alpha,
            color_format: config.color_format,
        })?;
        drop(backend);

        Ok(Some(Self {
            context: Arc::clone(context),
            capacity: config.capacity,
            slots,
            descriptor_pool,
            set_layout,
            pipeline_layout,
            pipeline,
            vertex_module,
            fragment_module,
            batches: Vec::new(),
            sprite_count: 0,
        }))
    }

    fn slot(&self) -> &SlotResources {
        &self.slots[self.context.frame_slot()]
    }

    fn slot_mut(&mut self) -> &mut SlotResources {
        let index = self.context.frame_slot();
        &mut self.slots[index]
    }

    /// Forget this frame's textures, batches and sprites.
    ///
    /// Only the current slot's texture table is cleared; the other slots
    /// keep their textures alive until their frames come around again.
    pub fn reset(&mut self) {
        self.slot_mut().textures.clear();
        self.batches.clear();
        self.sprite_count = 0;
    }

    /// Open a batch drawn with `transform`; it starts where the last one ended.
    pub fn begin_batch(&mut self, transform: Mat4) {
        let start_index = self
            .batches
            .last()
            .map_or(0, |batch| batch.start_index + batch.count);
        self.batches.push(Batch {
            start_index,
            count: 0,
            transform,
        });
    }

    /// Append `sprite` to the open batch, sampling `texture`.
    ///
    /// Over capacity, with no open batch, or with a full texture table the
    /// draw is logged and dropped.
    pub fn draw_sprite(&mut self, sprite: &mut Sprite, texture: &Arc<Texture>) -> GraphicsResult<()> {
        if self.sprite_count >= self.capacity {
            log::error!("SpriteBatch::draw_sprite: Exceeded capacity of {}", self.capacity);
            return Ok(());
        }
        if self.batches.is_empty() {
            log::error!("SpriteBatch::draw_sprite: No active batch");
            return Ok(());
        }
        let sprite_index = self.sprite_count;
        let slot = self.slot_mut();
        let Some(index) = slot.textures.register(texture) else {
            log::error!(
                "SpriteBatch::draw_sprite: Texture table full ({} textures)",
                slot.textures.capacity()
            );
            return Ok(());
        };

        sprite.texture_index = index as f32;
        slot.upload.write(sprite_index, sprite)?;
        self.sprite_count += 1;
        if let Some(batch) = self.batches.last_mut() {
            batch.count += 1;
        }
        Ok(())
    }

    /// Move this frame's sprites into the geometry buffer.
    pub fn build_batches(&self, cmd: CommandBufferHandle) -> GraphicsResult<()> {
        if self.batches.is_empty() || self.sprite_count == 0 {
            return Ok(());
        }
        let slot = self.slot();
        slot.upload
            .flush(&self.context, cmd, &slot.geometry, self.sprite_count)
    }

    /// Point the texture table at this frame's textures and draw every batch.
    ///
    /// Must be recorded inside a rendering pass with viewport and scissor set.
    pub fn render(&self, cmd: CommandBufferHandle) {
        let slot = self.slot();
        let writes: Vec<DescriptorWrite> = slot
            .textures
            .iter()
            .map(|(index, texture)| DescriptorWrite {
                set: slot.descriptor_set,
                binding: TEXTURE_BINDING,
                array_element: index,
                ty: DescriptorType::CombinedImageSampler,
                resource: DescriptorResource::Image {
                    texture: texture.handle(),
                    sampler: texture.sampler(),
                    layout: ImageLayout::ShaderReadOnly,
                },
            })
            .collect();

        let mut backend = self.context.backend();
        if !writes.is_empty() {
            backend.update_descriptor_sets(&writes);
        }
        backend.cmd_bind_pipeline(cmd, BindPoint::Graphics, self.pipeline);
        backend.cmd_bind_descriptor_set(
            cmd,
            BindPoint::Graphics,
            self.pipeline_layout,
            slot.descriptor_set,
        );
        backend.cmd_bind_vertex_buffer(cmd, slot.geometry.handle(), 0);

        for batch in &self.batches {
            backend.cmd_push_constants(
                cmd,
                self.pipeline_layout,
                ShaderStages::VERTEX,
                0,
                bytemuck::bytes_of(&batch.transform),
            );
            backend.cmd_draw(cmd, 6, batch.count, 0, batch.start_index);
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn sprite_count(&self) -> u32 {
        self.sprite_count
    }

    pub fn batch_count(&self) -> u32 {
        self.batches.len() as u32
    }

    pub fn texture_count(&self) -> u32 {
        self.slot().textures.len() as u32
    }

    pub fn batches(&self) -> &[Batch] {
        &self.batches
    }

    /// Texture table of the current frame slot.
    pub fn textures(&self) -> &TextureTable {
        &self.slot().textures
    }

    /// Geometry buffer of the current frame slot.
    pub fn geometry_buffer(&self) -> &Buffer {
        &self.slot().geometry
    }

    pub fn upload(&self) -> &GeometryUpload {
        &self.slot().upload
    }

    /// Descriptor set of the current frame slot.
    pub fn descriptor_set(&self) -> DescriptorSetHandle {
        self.slot().descriptor_set
    }

    pub fn stats(&self) -> SpriteStats {
        SpriteStats {
            sprites: self.sprite_count,
            batches: self.batch_count(),
            textures: self.texture_count(),
        }
    }
}

impl Drop for SpriteBatch {
    fn drop(&mut self) {
        let mut backend = self.context.backend();
        backend.destroy_pipeline(self.pipeline);
        backend.destroy_pipeline_layout(self.pipeline_layout);
        backend.destroy_descriptor_pool(self.descriptor_pool);
        backend.destroy_descriptor_set_layout(self.set_layout);
        backend.destroy_shader_module(self.vertex_module);
        backend.destroy_shader_module(self.fragment_module);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sprite_defaults() {
        let sprite = Sprite::new(Vec2::new(1.0, 2.0), Vec2::new(3.0, 4.0));
        assert_eq!(
            sprite.as_floats(),
            &[1.0, 2.0, 3.0, 4.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 0.0, 0.0]
        );
    }

    #[test]
    fn test_vertex_layout_covers_sprite() {
        let layout = sprite_vertex_layout();
        assert_eq!(layout.stride as usize, SPRITE_ATTRIB_COUNT * 4);
        let covered: u32 = layout.attributes.iter().map(|a| a.format.size()).sum();
        assert_eq!(covered, layout.stride);
        let last = layout.attributes.last().unwrap();
        assert_eq!(last.offset + last.format.size(), layout.stride);
    }
}
