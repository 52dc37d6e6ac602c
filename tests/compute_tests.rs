//! Integration tests for the compute pipeline registry.
//!
//! # Test Categories
//!
//! - **Registry Tests**: Creation, naming and query index assignment
//! - **Recording Tests**: Binding, push constants and dispatch sizing
//! - **Timing Tests**: Timestamp chains and degraded mode
//! - **Chaining Tests**: Passes feeding each other

mod common;

use std::sync::Arc;

use rstest::rstest;

use common::{shader_fixture, TestContext};
use lumen_frame::backend::{
    DescriptorResource, DescriptorType, DummyConfig, ImageLayout, RecordedCommand, TextureFormat,
    TextureUsage,
};
use lumen_frame::compute::{JumpFloodSchedule, PingPong, TemporalHistory, MAX_TIMED_PIPELINES};
use lumen_frame::{FrameExecutor, FrameStats, OutputDescription, PipelineRegistry, ShaderSource};

const BLUR: &str = "shaders/blur.comp.spv";
const JUMP_FLOOD: &str = "shaders/jump_flood.comp.spv";
const SDF: &str = "shaders/sdf.comp.spv";

fn registry(ctx: &TestContext) -> PipelineRegistry {
    let shaders: Arc<dyn ShaderSource> = Arc::new(shader_fixture());
    PipelineRegistry::new(&ctx.context, shaders).expect("registry creation")
}

fn output(width: u32, height: u32) -> OutputDescription {
    OutputDescription::new(TextureFormat::Rgba16Float, width, height)
}

/// Record one frame that runs `names` in order, then submit it.
fn run_frame(ctx: &TestContext, registry: &mut PipelineRegistry, names: &[&str]) {
    let cmd = ctx.command_buffer();
    registry.begin_frame(cmd).unwrap();
    for name in names {
        let pipeline = registry.get_pipeline(name).unwrap();
        pipeline.begin(cmd, None);
        pipeline.dispatch(cmd, 64, 64);
    }
    registry.end_frame(cmd);
    ctx.submit(cmd);
}

fn approx(a: f32, b: f32) -> bool {
    (a - b).abs() < 1e-6
}

// ============================================================================
// Registry Tests
// ============================================================================

/// Query indices are handed out 1, 2, 3... in creation order.
#[test]
fn test_query_indices_follow_creation_order() {
    let ctx = TestContext::new();
    let mut registry = registry(&ctx);

    for (expected, name) in [(1, "sdf"), (2, "blur"), (3, "flood")] {
        let pipeline = registry.create(name, SDF, &[], 1, 0).unwrap().unwrap();
        assert_eq!(pipeline.query_index(), expected);
        assert!(pipeline.is_timed());
    }
    assert_eq!(registry.len(), 3);
    let names: Vec<_> = registry.pipelines().map(|p| p.name()).collect();
    assert_eq!(names, vec!["blur", "flood", "sdf"]);
}

#[test]
fn test_duplicate_name_is_rejected() {
    let ctx = TestContext::new();
    let mut registry = registry(&ctx);

    registry.create("blur", BLUR, &[output(8, 8)], 2, 0).unwrap();
    let before = ctx.inspector.live_objects();
    assert!(registry.create("blur", SDF, &[], 1, 0).unwrap().is_none());
    assert_eq!(ctx.inspector.live_objects(), before);
    assert_eq!(registry.len(), 1);

    let next = registry.create("sdf", SDF, &[], 1, 0).unwrap().unwrap();
    assert_eq!(next.query_index(), 2);
}

#[test]
fn test_missing_shader_is_rejected() {
    let ctx = TestContext::new();
    let mut registry = registry(&ctx);

    assert!(registry
        .create("trail", "shaders/missing.comp.spv", &[], 1, 0)
        .unwrap()
        .is_none());
    assert!(registry.is_empty());
}

/// Outputs are sampled storage images of the requested size.
#[test]
fn test_outputs_created() {
    let ctx = TestContext::new();
    let mut registry = registry(&ctx);

    let pipeline = registry
        .create("blur", BLUR, &[output(320, 200), output(64, 32)], 2, 0)
        .unwrap()
        .unwrap();
    assert_eq!(pipeline.outputs().len(), 2);

    let first = pipeline.output(0).unwrap();
    assert_eq!((first.width(), first.height()), (320, 200));
    assert_eq!(first.format(), TextureFormat::Rgba16Float);
    assert!(first
        .usage()
        .contains(TextureUsage::STORAGE | TextureUsage::SAMPLED));
    assert!(first.sampler().is_some());
    assert!(pipeline.output(2).is_none());
}

/// Pipelines past the query pool capacity still work but are never timed.
#[test]
fn test_pipelines_past_query_capacity_are_untimed() {
    let ctx = TestContext::new();
    let mut registry = registry(&ctx);

    for i in 0..MAX_TIMED_PIPELINES {
        registry.create(&format!("pass{:02}", i), SDF, &[], 0, 0).unwrap();
    }
    let extra = registry.create("extra", SDF, &[], 0, 0).unwrap().unwrap();
    assert_eq!(extra.query_index(), MAX_TIMED_PIPELINES + 1);
    assert!(!extra.is_timed());
    assert!(registry.get_pipeline("pass61").unwrap().is_timed());

    let names: Vec<String> = registry.pipelines().map(|p| p.name().to_string()).collect();
    let names: Vec<&str> = names.iter().map(String::as_str).collect();
    run_frame(&ctx, &mut registry, &names);
    run_frame(&ctx, &mut registry, &names);
    assert_eq!(registry.get_pipeline("extra").unwrap().execution_time(), 0.0);
    assert!(registry.get_pipeline("pass00").unwrap().execution_time() > 0.0);
}

#[test]
fn test_drop_releases_objects() {
    let ctx = TestContext::new();
    let before = ctx.inspector.live_objects();
    {
        let mut registry = registry(&ctx);
        registry.create("blur", BLUR, &[output(16, 16)], 2, 8).unwrap();
        run_frame(&ctx, &mut registry, &["blur"]);
    }
    // The frame's command pool stays behind.
    let leftover_pool_and_buffer = 2;
    assert_eq!(ctx.inspector.live_objects(), before + leftover_pool_and_buffer);
}

// ============================================================================
// Recording Tests
// ============================================================================

#[rstest]
#[case(1920, 1080, 120, 68)]
#[case(16, 16, 1, 1)]
#[case(17, 1, 2, 1)]
fn test_dispatch_covers_image(
    #[case] width: u32,
    #[case] height: u32,
    #[case] x: u32,
    #[case] y: u32,
) {
    let ctx = TestContext::new();
    let mut registry = registry(&ctx);
    let pipeline = registry.create("sdf", SDF, &[], 1, 0).unwrap().unwrap();

    let cmd = ctx.command_buffer();
    pipeline.dispatch(cmd, width, height);
    assert_eq!(
        ctx.inspector.commands(cmd).unwrap(),
        vec![RecordedCommand::Dispatch { x, y, z: 1 }]
    );
}

/// Push constants larger than the declared range are dropped.
#[test]
fn test_push_constants_respect_declared_size() {
    let ctx = TestContext::new();
    let mut registry = registry(&ctx);
    let pipeline = registry.create("blur", BLUR, &[], 1, 8).unwrap().unwrap();

    let cmd = ctx.command_buffer();
    pipeline.set_push_constants(cmd, &[0u8; 16]);
    assert!(ctx.inspector.commands(cmd).unwrap().is_empty());

    pipeline.begin(cmd, Some([1u8, 2, 3, 4, 5, 6, 7, 8].as_slice()));
    let commands = ctx.inspector.commands(cmd).unwrap();
    assert!(matches!(
        commands.last(),
        Some(RecordedCommand::PushConstants { data, offset: 0, .. }) if data == &[1, 2, 3, 4, 5, 6, 7, 8]
    ));
}

/// `begin` writes the pass marker before binding the pipeline.
#[test]
fn test_begin_marks_then_binds() {
    let ctx = TestContext::new();
    let mut registry = registry(&ctx);
    let pipeline = registry.create("blur", BLUR, &[], 1, 0).unwrap().unwrap();
    let handle = pipeline.pipeline_handle();

    let cmd = ctx.command_buffer();
    pipeline.begin(cmd, None);
    let commands = ctx.inspector.commands(cmd).unwrap();
    assert_eq!(commands.len(), 3);
    assert!(matches!(
        commands[0],
        RecordedCommand::WriteTimestamp { index: 1, .. }
    ));
    assert!(matches!(
        commands[1],
        RecordedCommand::BindPipeline { pipeline, .. } if pipeline == handle
    ));
    assert!(matches!(commands[2], RecordedCommand::BindDescriptorSet { .. }));
}

#[test]
fn test_bind_texture_out_of_range_is_ignored() {
    let ctx = TestContext::new();
    let mut registry = registry(&ctx);
    registry.create("blur", BLUR, &[], 2, 0).unwrap();
    let texture = ctx.texture(8, 8);

    let pipeline = registry.get_pipeline("blur").unwrap();
    pipeline.bind_texture(2, &texture);
    assert!(ctx.inspector.descriptor_writes().is_empty());

    pipeline.bind_texture(1, &texture);
    let writes = ctx.inspector.descriptor_writes();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].binding, 1);
    assert_eq!(writes[0].ty, DescriptorType::StorageImage);
    assert_eq!(
        writes[0].resource,
        DescriptorResource::Image {
            texture: texture.handle(),
            sampler: None,
            layout: ImageLayout::General,
        }
    );
}

// ============================================================================
// Timing Tests
// ============================================================================

/// Two chained passes: times show up once the first frame's pool is read
/// back, and each pass is measured to the next marker.
#[test]
fn test_chained_pass_timings() {
    let ctx = TestContext::new();
    let mut registry = registry(&ctx);
    assert!(registry.timestamps_supported());
    registry.create("sdf", SDF, &[], 1, 0).unwrap();
    registry.create("blur", BLUR, &[], 1, 0).unwrap();

    run_frame(&ctx, &mut registry, &["sdf", "blur"]);
    assert_eq!(registry.total_execution_time(), 0.0);

    run_frame(&ctx, &mut registry, &["sdf", "blur"]);
    // Marker, bind, bind, dispatch: four commands of 1000 ticks at 1 ns.
    let sdf = registry.get_pipeline("sdf").unwrap().execution_time();
    let blur = registry.get_pipeline("blur").unwrap().execution_time();
    assert!(approx(sdf, 0.004), "sdf took {}", sdf);
    assert!(approx(blur, 0.004), "blur took {}", blur);
    assert!(approx(registry.pre_execution_time(), 0.001));
    assert!(approx(registry.total_execution_time(), sdf + blur));
}

/// With no timed pipeline the second marker closes the chain, so there is
/// no time before a first pipeline to report.
#[test]
fn test_pre_execution_time_needs_a_timed_pipeline() {
    let ctx = TestContext::new();
    let mut registry = registry(&ctx);

    for _ in 0..3 {
        run_frame(&ctx, &mut registry, &[]);
    }
    assert_eq!(registry.pre_execution_time(), 0.0);
    assert_eq!(registry.total_execution_time(), 0.0);
}

/// Timestamp markers alternate between two pools frame to frame.
#[test]
fn test_frames_alternate_query_pools() {
    let ctx = TestContext::new();
    let mut registry = registry(&ctx);
    registry.create("sdf", SDF, &[], 1, 0).unwrap();

    let pools: Vec<_> = (0..3)
        .map(|_| {
            let cmd = ctx.command_buffer();
            registry.begin_frame(cmd).unwrap();
            registry.end_frame(cmd);
            let pool = match ctx.inspector.commands(cmd).unwrap()[0] {
                RecordedCommand::WriteTimestamp { pool, index: 0, .. } => pool,
                ref other => panic!("unexpected {:?}", other),
            };
            ctx.submit(cmd);
            pool
        })
        .collect();
    assert_ne!(pools[0], pools[1]);
    assert_eq!(pools[0], pools[2]);
}

/// Without timestamp support nothing is timed and nothing is written.
#[test]
fn test_degraded_mode_without_timestamps() {
    let ctx = TestContext::with_config(DummyConfig::default().without_timestamps());
    let mut registry = registry(&ctx);
    assert!(!registry.timestamps_supported());

    let pipeline = registry.create("sdf", SDF, &[], 1, 0).unwrap().unwrap();
    assert!(!pipeline.is_timed());
    assert_eq!(pipeline.query_index(), 1);

    for _ in 0..3 {
        run_frame(&ctx, &mut registry, &["sdf"]);
    }
    assert!(!ctx
        .inspector
        .executed()
        .iter()
        .any(|c| matches!(c, RecordedCommand::WriteTimestamp { .. })));
    assert_eq!(registry.get_pipeline("sdf").unwrap().execution_time(), 0.0);
    assert_eq!(registry.pre_execution_time(), 0.0);
}

// ============================================================================
// Chaining Tests
// ============================================================================

/// A pass reads the previous pass's output through its storage binding.
#[test]
fn test_pass_reads_previous_output() {
    let ctx = TestContext::new();
    let mut registry = registry(&ctx);
    registry.create("sdf", SDF, &[output(64, 64)], 1, 0).unwrap();
    registry.create("blur", BLUR, &[output(64, 64)], 2, 0).unwrap();

    let sdf_out = Arc::clone(registry.get_pipeline("sdf").unwrap().output(0).unwrap());
    let blur = registry.get_pipeline("blur").unwrap();
    let cmd = ctx.command_buffer();
    sdf_out.transition_layout(cmd, ImageLayout::General);
    blur.bind_texture(0, &sdf_out);
    blur.bind_texture(1, blur.output(0).unwrap());

    let writes = ctx.inspector.descriptor_writes();
    let bound: Vec<_> = writes
        .iter()
        .map(|w| match w.resource {
            DescriptorResource::Image { texture, .. } => texture,
            ref other => panic!("unexpected {:?}", other),
        })
        .collect();
    assert_eq!(bound, vec![sdf_out.handle(), blur.output(0).unwrap().handle()]);
    assert_eq!(sdf_out.layout(), ImageLayout::General);
}

/// Jump flood iterations swap input and output and end in the reported image.
#[test]
fn test_jump_flood_ping_pong() {
    let ctx = TestContext::new();
    let mut registry = registry(&ctx);
    registry
        .create("flood", JUMP_FLOOD, &[output(8, 8), output(8, 8)], 2, 4)
        .unwrap();
    let flood = registry.get_pipeline("flood").unwrap();
    let images = PingPong::new(
        Arc::clone(flood.output(0).unwrap()),
        Arc::clone(flood.output(1).unwrap()),
    );

    let schedule = JumpFloodSchedule::new(8, 8);
    let result_index = schedule.result_index();
    let mut last_written = None;
    let cmd = ctx.command_buffer();
    for step in schedule {
        let input = images.get(step.input_index()).unwrap();
        let output = images.get(step.output_index()).unwrap();
        flood.begin(cmd, Some(step.offset.to_le_bytes().as_slice()));
        flood.bind_texture(0, input);
        flood.bind_texture(1, output);
        flood.dispatch(cmd, 8, 8);
        last_written = Some(output.handle());
    }

    assert_eq!(ctx.inspector.descriptor_writes().len(), 6);
    assert_eq!(last_written, Some(images.get(result_index).unwrap().handle()));
    let offsets: Vec<u32> = ctx
        .inspector
        .commands(cmd)
        .unwrap()
        .iter()
        .filter_map(|c| match c {
            RecordedCommand::PushConstants { data, .. } => {
                Some(u32::from_le_bytes([data[0], data[1], data[2], data[3]]))
            }
            _ => None,
        })
        .collect();
    assert_eq!(offsets, vec![4, 2, 1]);
}

/// A temporal pass reads last frame's output as history.
#[test]
fn test_temporal_pass_history() {
    let ctx = TestContext::new();
    let mut registry = registry(&ctx);
    registry
        .create("trail", common::COMPUTE_SHADERS[3], &[output(16, 16), output(16, 16)], 2, 0)
        .unwrap();
    let trail = registry.get_pipeline("trail").unwrap();
    let history = TemporalHistory::new(
        Arc::clone(trail.output(0).unwrap()),
        Arc::clone(trail.output(1).unwrap()),
    );

    let mut previous_output = None;
    for frame in 0..4u64 {
        let images = history.frame(frame);
        assert_eq!(images.clear_history, frame == 0);
        if let Some(previous) = previous_output {
            assert_eq!(images.history.handle(), previous);
        }
        trail.bind_texture(0, images.history);
        trail.bind_texture(1, images.output);
        previous_output = Some(images.output.handle());
    }
}

// ============================================================================
// Telemetry Tests
// ============================================================================

#[test]
fn test_frame_stats_collect() {
    let ctx = TestContext::new();
    let executor = FrameExecutor::new(&ctx.context).unwrap();
    let mut registry = registry(&ctx);
    registry.create("sdf", SDF, &[], 1, 0).unwrap();
    registry.create("blur", BLUR, &[], 1, 0).unwrap();
    run_frame(&ctx, &mut registry, &["sdf", "blur"]);
    run_frame(&ctx, &mut registry, &["sdf", "blur"]);

    let stats = FrameStats::collect(&executor, None, Some(&registry));
    assert_eq!(
        stats.pipelines.iter().map(|(n, _)| n.as_str()).collect::<Vec<_>>(),
        vec!["blur", "sdf"]
    );
    assert_eq!(stats.total_gpu_ms, registry.total_execution_time());
    assert_eq!(stats.sprites, 0);

    let text = stats.to_string();
    assert!(text.contains("  sdf: 0.004 ms"), "{}", text);
}
