//! # Lumen Frame
//!
//! GPU frame and compute-pass orchestration on top of an explicit graphics API.
//!
//! ## Overview
//!
//! This crate provides:
//! - [`FrameExecutor`] - Frames in flight, swapchain acquisition, three-stage submission
//! - [`SpriteBatch`] - Instanced sprite rendering through a bindless texture table
//! - [`PipelineRegistry`] - Named compute pipelines with GPU timestamp timing
//! - [`Engine`] - Frame loop driving a [`LayerStack`]
//! - Backends: Vulkan (feature `vulkan-backend`) and Dummy (for testing)
//!
//! ## Example
//!
//! ```ignore
//! use lumen_frame::{Engine, EngineConfig, FrameContext};
//!
//! let context = FrameContext::new(vulkan_backend);
//! let mut engine = Engine::new(&context, &EngineConfig::default())?;
//! engine.push_layer(MyLayer::new(&context)?);
//! engine.run(|| window.poll_events())?;
//! ```

pub mod backend;
pub mod compute;
pub mod context;
pub mod engine;
pub mod error;
pub mod frame;
pub mod layer;
pub mod resources;
pub mod shader;
pub mod sprite;
pub mod telemetry;

pub use backend::{BackendError, BackendResult, DummyBackend, GpuBackend};
pub use compute::{ComputePipeline, OutputDescription, PipelineRegistry};
pub use context::FrameContext;
pub use engine::{Engine, EngineConfig};
pub use error::{GraphicsError, GraphicsResult};
pub use frame::{Frame, FrameExecutor, FrameInfo, FrameTimer, FRAMES_IN_FLIGHT};
pub use layer::{Event, Layer, LayerStack};
pub use resources::{Buffer, Texture};
pub use shader::{MemoryShaderSource, SearchPathShaderSource, ShaderSource};
pub use sprite::{Sprite, SpriteBatch, SpriteBatchConfig};
pub use telemetry::FrameStats;

#[cfg(feature = "vulkan-backend")]
pub use backend::vulkan::VulkanBackend;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    static_assertions::assert_impl_all!(Texture: Send, Sync);
    static_assertions::assert_impl_all!(Buffer: Send, Sync);
}
