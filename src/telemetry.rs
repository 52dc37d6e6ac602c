//! Per-frame statistics for overlays

use std::fmt;

use crate::compute::PipelineRegistry;
use crate::frame::FrameExecutor;
use crate::sprite::SpriteBatch;

/// Snapshot of frame counters and GPU timings.
///
/// Purely observational; nothing reads it back to drive execution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameStats {
    pub fps: u32,
    pub delta_ms: f32,
    pub sprites: u32,
    pub batches: u32,
    pub textures: u32,
    /// `(name, ms)` per compute pipeline, in name order.
    pub pipelines: Vec<(String, f32)>,
    pub total_gpu_ms: f32,
    /// Time from the start of the frame to the first timed pipeline.
    pub pre_execution_ms: f32,
}

impl FrameStats {
    pub fn collect(
        executor: &FrameExecutor,
        sprites: Option<&SpriteBatch>,
        registry: Option<&PipelineRegistry>,
    ) -> Self {
        let mut stats = Self {
            fps: executor.frames_per_second(),
            delta_ms: executor.delta_time() * 1000.0,
            ..Default::default()
        };
        if let Some(batch) = sprites {
            let sprite_stats = batch.stats();
            stats.sprites = sprite_stats.sprites;
            stats.batches = sprite_stats.batches;
            stats.textures = sprite_stats.textures;
        }
        if let Some(registry) = registry {
            stats.pipelines = registry
                .pipelines()
                .map(|p| (p.name().to_string(), p.execution_time()))
                .collect();
            stats.total_gpu_ms = registry.total_execution_time();
            stats.pre_execution_ms = registry.pre_execution_time();
        }
        stats
    }
}

impl fmt::Display for FrameStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "FPS: {} ({:.2} ms)", self.fps, self.delta_ms)?;
        writeln!(
            f,
            "Sprites: {}  Batches: {}  Textures: {}",
            self.sprites, self.batches, self.textures
        )?;
        writeln!(f, "Pre-execution: {:.3} ms", self.pre_execution_ms)?;
        for (name, ms) in &self.pipelines {
            writeln!(f, "  {}: {:.3} ms", name, ms)?;
        }
        write!(f, "GPU total: {:.3} ms", self.total_gpu_ms)
    }
}
