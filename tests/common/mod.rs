//! Common utilities for integration tests.
//!
//! Every test runs against the dummy backend; the inspector handed out next
//! to the context shows what reached the "device".

#![allow(dead_code)]

use std::sync::Arc;

use lumen_frame::backend::{
    CommandBufferHandle, DummyBackend, DummyConfig, DummyEvent, DummyInspector, GpuBackend,
    SamplerDescriptor, SubmitInfo, TextureDescriptor, TextureFormat, TextureUsage,
};
use lumen_frame::shader::spirv_stub;
use lumen_frame::{FrameContext, MemoryShaderSource, Texture};

pub const SPRITE_VERTEX_SHADER: &str = "shaders/sprite_batch.vert.spv";
pub const SPRITE_FRAGMENT_SHADER: &str = "shaders/sprite_batch.frag.spv";

/// Compute shader ids the shader fixture knows about.
pub const COMPUTE_SHADERS: &[&str] = &[
    "shaders/blur.comp.spv",
    "shaders/jump_flood.comp.spv",
    "shaders/sdf.comp.spv",
    "shaders/trail.comp.spv",
];

/// Install `env_logger` once; repeated calls are no-ops.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A frame context over a dummy backend, plus the backend's inspector.
pub struct TestContext {
    pub context: Arc<FrameContext>,
    pub inspector: DummyInspector,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_config(DummyConfig::default())
    }

    pub fn with_config(config: DummyConfig) -> Self {
        init_logging();
        let backend = DummyBackend::with_config(config);
        let inspector = backend.inspector();
        Self {
            context: FrameContext::new(backend),
            inspector,
        }
    }

    /// A sampled RGBA texture of the given size.
    pub fn texture(&self, width: u32, height: u32) -> Arc<Texture> {
        let desc = TextureDescriptor::new(
            width,
            height,
            TextureFormat::Rgba8Unorm,
            TextureUsage::SAMPLED | TextureUsage::COPY_DST,
        );
        Arc::new(
            Texture::sampled(&self.context, &desc, &SamplerDescriptor::default())
                .expect("texture creation"),
        )
    }

    /// Allocate and begin a standalone command buffer.
    pub fn command_buffer(&self) -> CommandBufferHandle {
        let mut backend = self.context.backend();
        let pool = backend.create_command_pool().expect("command pool");
        let cmd = backend.allocate_command_buffer(pool).expect("command buffer");
        backend.begin_command_buffer(cmd).expect("begin");
        cmd
    }

    /// End `cmd` and submit it on its own.
    pub fn submit(&self, cmd: CommandBufferHandle) {
        let mut backend = self.context.backend();
        backend.end_command_buffer(cmd).expect("end");
        backend
            .submit(
                &[SubmitInfo {
                    command_buffers: vec![cmd],
                    ..Default::default()
                }],
                None,
            )
            .expect("submit");
    }

    /// Every queue submission recorded so far, oldest first.
    pub fn submissions(&self) -> Vec<Vec<SubmitInfo>> {
        self.inspector
            .events()
            .into_iter()
            .filter_map(|event| match event {
                DummyEvent::Submit { submits, .. } => Some(submits),
                _ => None,
            })
            .collect()
    }
}

/// Shader source holding stub SPIR-V for the sprite shaders and every compute shader.
pub fn shader_fixture() -> MemoryShaderSource {
    let stub = spirv_stub();
    COMPUTE_SHADERS.iter().fold(
        MemoryShaderSource::new()
            .with_spirv(SPRITE_VERTEX_SHADER, &stub)
            .with_spirv(SPRITE_FRAGMENT_SHADER, &stub),
        |source, id| source.with_spirv(*id, &stub),
    )
}
