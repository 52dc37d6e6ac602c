//! Integration tests for the frame executor and the engine loop.
//!
//! # Test Categories
//!
//! - **Slot Tests**: Slot rotation, fence waits and command buffer recycling
//! - **Submission Tests**: The three-stage semaphore chain and presentation
//! - **Engine Tests**: Layers driven through whole frames, teardown order

mod common;

use std::sync::Arc;

use parking_lot::Mutex;
use rstest::rstest;

use common::TestContext;
use lumen_frame::backend::{
    CommandBufferHandle, DummyConfig, DummyEvent, DummyInspector, ImageLayout, LoadOp,
    PipelineStages, RecordedCommand,
};
use lumen_frame::{
    BackendError, Engine, EngineConfig, Event, Frame, FrameExecutor, GraphicsError,
    GraphicsResult, Layer, Texture, FRAMES_IN_FLIGHT,
};

fn run_empty_frame(executor: &mut FrameExecutor) {
    executor.begin_frame().expect("begin_frame");
    executor.end_frame().expect("end_frame");
}

// ============================================================================
// Slot Tests
// ============================================================================

/// Frame k records into slot k mod F, starting from slot 1 on the first frame.
#[rstest]
#[case(1)]
#[case(2)]
#[case(5)]
fn test_slot_rotation(#[case] frames: u64) {
    let ctx = TestContext::new();
    let mut executor = FrameExecutor::new(&ctx.context).unwrap();

    for k in 1..=frames {
        let info = executor.begin_frame().unwrap();
        assert_eq!(info.index, k - 1);
        assert_eq!(info.slot, (k % FRAMES_IN_FLIGHT as u64) as usize);
        assert_eq!(ctx.context.frame_number(), k);
        assert_eq!(ctx.context.frame_slot(), info.slot);
        executor.end_frame().unwrap();
    }
}

/// Command buffers leased in a frame are freed only after the slot's fence
/// has been waited on, the next time the slot comes around.
#[test]
fn test_leased_buffers_freed_after_fence_wait() {
    let ctx = TestContext::new();
    let mut executor = FrameExecutor::new(&ctx.context).unwrap();

    executor.begin_frame().unwrap();
    let leased_slot = executor.current_slot();
    let cmd = executor.acquire_command_buffer().unwrap();
    ctx.context.backend().begin_command_buffer(cmd).unwrap();
    ctx.context.backend().end_command_buffer(cmd).unwrap();
    executor.end_frame().unwrap();

    run_empty_frame(&mut executor);
    assert_eq!(executor.slot(leased_slot).unwrap().leased(), &[cmd]);

    ctx.inspector.clear_events();
    run_empty_frame(&mut executor);
    assert_eq!(executor.current_slot(), leased_slot);
    assert!(executor.slot(leased_slot).unwrap().leased().is_empty());

    let fence = executor.slot(leased_slot).unwrap().fence();
    let events = ctx.inspector.events();
    let wait = events
        .iter()
        .position(|e| *e == DummyEvent::FenceWait(fence))
        .expect("fence wait");
    let free = events
        .iter()
        .position(|e| *e == DummyEvent::Free(vec![cmd]))
        .expect("free of leased buffer");
    assert!(wait < free);
}

/// The fence is reset only after an image has been acquired.
#[test]
fn test_fence_reset_after_acquire() {
    let ctx = TestContext::new();
    let mut executor = FrameExecutor::new(&ctx.context).unwrap();
    ctx.inspector.clear_events();

    executor.begin_frame().unwrap();
    let events = ctx.inspector.events();
    let acquire = events
        .iter()
        .position(|e| matches!(e, DummyEvent::Acquire(_)))
        .unwrap();
    let reset = events
        .iter()
        .position(|e| matches!(e, DummyEvent::FenceReset(_)))
        .unwrap();
    assert!(acquire < reset);
}

/// An out-of-date surface is an error and leaves no frame open.
#[test]
fn test_surface_outdated_propagates() {
    let ctx = TestContext::new();
    let mut executor = FrameExecutor::new(&ctx.context).unwrap();
    run_empty_frame(&mut executor);

    ctx.inspector.set_surface_outdated(true);
    let err = executor.begin_frame().unwrap_err();
    assert_eq!(err, GraphicsError::Backend(BackendError::SurfaceOutdated));
    assert!(!executor.in_frame());
}

/// A failed `begin_frame` leaves the slot and the frame number where they
/// were, so the retry records into the slot the context reports.
#[test]
fn test_failed_begin_frame_keeps_slot_in_step() {
    let ctx = TestContext::new();
    let mut executor = FrameExecutor::new(&ctx.context).unwrap();
    run_empty_frame(&mut executor);
    let slot_before = executor.current_slot();

    ctx.inspector.set_surface_outdated(true);
    assert!(executor.begin_frame().is_err());
    assert_eq!(executor.current_slot(), slot_before);
    assert_eq!(ctx.context.frame_number(), 1);

    ctx.inspector.set_surface_outdated(false);
    let info = executor.begin_frame().unwrap();
    assert_eq!(info.index, 1);
    assert_eq!(ctx.context.frame_slot(), info.slot);
    assert_eq!(executor.current_slot(), info.slot);
    executor.end_frame().unwrap();
}

/// An abandoned frame still signals its fence and presents, but leaves the
/// leased work out of the submission.
#[test]
fn test_abandon_frame_skips_leased_work() {
    let ctx = TestContext::new();
    let mut executor = FrameExecutor::new(&ctx.context).unwrap();

    executor.abandon_frame().unwrap();
    let info = executor.begin_frame().unwrap();
    let cmd = executor.acquire_command_buffer().unwrap();
    ctx.context.backend().begin_command_buffer(cmd).unwrap();
    ctx.inspector.clear_events();
    executor.abandon_frame().unwrap();

    assert!(!executor.in_frame());
    let submissions = ctx.submissions();
    let last = submissions.last().unwrap();
    assert_eq!(last.len(), 3);
    assert!(last[1].command_buffers.is_empty());
    let events = ctx.inspector.events();
    assert!(events
        .iter()
        .any(|e| matches!(e, DummyEvent::Present { image_index, .. } if *image_index == info.image_index)));

    run_empty_frame(&mut executor);
    run_empty_frame(&mut executor);
    assert!(executor.slot(info.slot).unwrap().leased().is_empty());
}

#[test]
fn test_unbalanced_begin_end_is_rejected() {
    let ctx = TestContext::new();
    let mut executor = FrameExecutor::new(&ctx.context).unwrap();

    assert!(executor.end_frame().is_err());
    executor.begin_frame().unwrap();
    assert!(executor.begin_frame().is_err());
    executor.end_frame().unwrap();
    assert!(Frame::new(&mut executor).is_none());
}

// ============================================================================
// Submission Tests
// ============================================================================

/// One frame is submitted as pre-frame, leased work and post-frame batches
/// chained by semaphores, and presentation waits on the last one.
#[test]
fn test_three_stage_submission() {
    let ctx = TestContext::new();
    let mut executor = FrameExecutor::new(&ctx.context).unwrap();

    let info = executor.begin_frame().unwrap();
    let first = executor.acquire_command_buffer().unwrap();
    let second = executor.acquire_command_buffer().unwrap();
    for cmd in [first, second] {
        ctx.context.backend().begin_command_buffer(cmd).unwrap();
        ctx.context.backend().end_command_buffer(cmd).unwrap();
    }
    executor.end_frame().unwrap();

    let submissions = ctx.submissions();
    let submits = submissions.last().unwrap();
    assert_eq!(submits.len(), 3);
    let (pre, work, post) = (&submits[0], &submits[1], &submits[2]);

    assert_eq!(pre.wait[0].1, PipelineStages::TRANSFER);
    assert_eq!(pre.command_buffers.len(), 1);

    assert_eq!(work.wait, vec![(pre.signal[0], PipelineStages::COLOR_ATTACHMENT_OUTPUT)]);
    assert_eq!(work.command_buffers, vec![first, second]);

    assert_eq!(
        post.wait,
        vec![(
            work.signal[0],
            PipelineStages::TRANSFER | PipelineStages::COLOR_ATTACHMENT_OUTPUT
        )]
    );
    assert_eq!(post.command_buffers.len(), 1);

    let present = ctx
        .inspector
        .events()
        .into_iter()
        .find_map(|e| match e {
            DummyEvent::Present { image_index, wait } => Some((image_index, wait)),
            _ => None,
        })
        .unwrap();
    assert_eq!(present, (info.image_index, post.signal[0]));
}

/// The swapchain image goes TRANSFER_DST before leased work and is rendered
/// into with LOAD, then handed to presentation.
#[test]
fn test_swapchain_transitions() {
    let ctx = TestContext::new();
    let mut executor = FrameExecutor::new(&ctx.context).unwrap();

    executor.begin_frame().unwrap();
    let image = executor.swapchain_image().unwrap().handle();
    executor.end_frame().unwrap();

    let submissions = ctx.submissions();
    let submits = submissions.last().unwrap();
    let pre = ctx.inspector.commands(submits[0].command_buffers[0]).unwrap();
    let post = ctx.inspector.commands(submits[2].command_buffers[0]).unwrap();

    assert_eq!(
        pre,
        vec![RecordedCommand::TransitionTexture {
            texture: image,
            old: ImageLayout::Undefined,
            new: ImageLayout::TransferDst,
        }]
    );
    assert_eq!(post.len(), 4);
    assert_eq!(
        post[0],
        RecordedCommand::TransitionTexture {
            texture: image,
            old: ImageLayout::TransferDst,
            new: ImageLayout::ColorAttachment,
        }
    );
    assert!(matches!(
        post[1],
        RecordedCommand::BeginRendering { target, load: LoadOp::Load, .. } if target == image
    ));
    assert_eq!(post[2], RecordedCommand::EndRendering);
    assert_eq!(
        post[3],
        RecordedCommand::TransitionTexture {
            texture: image,
            old: ImageLayout::ColorAttachment,
            new: ImageLayout::PresentSrc,
        }
    );
}

/// Teardown waits for the device and releases every slot object.
#[test]
fn test_executor_teardown_releases_slots() {
    let ctx = TestContext::with_config(DummyConfig::default());
    let before = ctx.inspector.live_objects();
    {
        let mut executor = FrameExecutor::new(&ctx.context).unwrap();
        run_empty_frame(&mut executor);
        assert!(ctx.inspector.live_objects() > before);
    }
    assert_eq!(ctx.inspector.live_objects(), before);
    assert!(ctx.inspector.events().contains(&DummyEvent::WaitIdle));
}

// ============================================================================
// Engine Tests
// ============================================================================

/// Records lifecycle calls into a shared log.
struct TracingLayer {
    name: &'static str,
    log: Arc<Mutex<Vec<String>>>,
    inspector: DummyInspector,
    leased: Arc<Mutex<Vec<CommandBufferHandle>>>,
}

impl TracingLayer {
    fn new(
        name: &'static str,
        log: &Arc<Mutex<Vec<String>>>,
        ctx: &TestContext,
        leased: &Arc<Mutex<Vec<CommandBufferHandle>>>,
    ) -> Self {
        Self {
            name,
            log: Arc::clone(log),
            inspector: ctx.inspector.clone(),
            leased: Arc::clone(leased),
        }
    }
}

impl Layer for TracingLayer {
    fn name(&self) -> &str {
        self.name
    }

    fn on_update(&mut self, frame: &mut Frame<'_>) -> GraphicsResult<()> {
        let cmd = frame.acquire_command_buffer()?;
        let mut backend = frame.context().backend();
        backend.begin_command_buffer(cmd)?;
        backend.cmd_dispatch(cmd, 1, 1, 1);
        backend.end_command_buffer(cmd)?;
        drop(backend);
        self.leased.lock().push(cmd);
        self.log
            .lock()
            .push(format!("update {} frame {}", self.name, frame.index()));
        Ok(())
    }

    fn composite(&mut self, _cmd: CommandBufferHandle, target: &Texture) {
        assert_eq!(target.layout(), ImageLayout::ColorAttachment);
        self.log.lock().push(format!("composite {}", self.name));
    }

    fn on_detach(&mut self) {
        let idle = self.inspector.events().contains(&DummyEvent::WaitIdle);
        self.log
            .lock()
            .push(format!("detach {} idle={}", self.name, idle));
    }
}

/// Layers update bottom-up, their work lands in the leased stage and
/// composite runs inside the final pass.
#[test]
fn test_engine_frame_runs_layers() {
    let ctx = TestContext::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    let leased = Arc::new(Mutex::new(Vec::new()));

    let mut engine = Engine::new(&ctx.context, &EngineConfig::default()).unwrap();
    engine.push_layer(TracingLayer::new("world", &log, &ctx, &leased));
    engine.push_layer(TracingLayer::new("overlay", &log, &ctx, &leased));
    engine.run_frame().unwrap();

    assert_eq!(
        *log.lock(),
        vec![
            "update world frame 0",
            "update overlay frame 0",
            "composite world",
            "composite overlay",
        ]
    );
    let submissions = ctx.submissions();
    assert_eq!(submissions.last().unwrap()[1].command_buffers, *leased.lock());
}

/// Dropping the engine waits for the GPU, then detaches layers top-down.
#[test]
fn test_engine_teardown_order() {
    let ctx = TestContext::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    let leased = Arc::new(Mutex::new(Vec::new()));

    let mut engine = Engine::new(&ctx.context, &EngineConfig::default()).unwrap();
    engine.push_layer(TracingLayer::new("a", &log, &ctx, &leased));
    engine.push_layer(TracingLayer::new("b", &log, &ctx, &leased));
    engine.push_layer(TracingLayer::new("c", &log, &ctx, &leased));
    ctx.inspector.clear_events();
    drop(engine);

    assert_eq!(
        *log.lock(),
        vec!["detach c idle=true", "detach b idle=true", "detach a idle=true"]
    );
}

/// A GPU failure stops `run` and comes back to the caller.
#[test]
fn test_engine_run_returns_gpu_errors() {
    let ctx = TestContext::new();
    let mut engine = Engine::new(&ctx.context, &EngineConfig::default()).unwrap();

    let mut polls = 0;
    let inspector = ctx.inspector.clone();
    let result = engine.run(|| {
        polls += 1;
        if polls == 3 {
            inspector.set_surface_outdated(true);
        }
        Vec::new()
    });

    assert_eq!(
        result,
        Err(GraphicsError::Backend(BackendError::SurfaceOutdated))
    );
    assert_eq!(ctx.context.frame_number(), 2);
    assert!(engine.is_running());
}

/// Fails its update on the first frame only.
struct FlakyLayer;

impl Layer for FlakyLayer {
    fn name(&self) -> &str {
        "flaky"
    }

    fn on_update(&mut self, frame: &mut Frame<'_>) -> GraphicsResult<()> {
        let cmd = frame.acquire_command_buffer()?;
        frame.context().backend().begin_command_buffer(cmd)?;
        if frame.index() == 0 {
            return Err(GraphicsError::InvalidParameter("flaky update".into()));
        }
        frame.context().backend().end_command_buffer(cmd)?;
        Ok(())
    }
}

/// A layer error is returned as is and the next frame runs normally.
#[test]
fn test_engine_layer_error_abandons_frame() {
    let ctx = TestContext::new();
    let mut engine = Engine::new(&ctx.context, &EngineConfig::default()).unwrap();
    engine.push_layer(FlakyLayer);

    assert_eq!(
        engine.run_frame(),
        Err(GraphicsError::InvalidParameter("flaky update".into()))
    );
    assert!(!engine.executor().in_frame());
    assert!(ctx.submissions().last().unwrap()[1].command_buffers.is_empty());

    engine.run_frame().unwrap();
    assert_eq!(ctx.context.frame_number(), 2);
    assert_eq!(ctx.submissions().last().unwrap()[1].command_buffers.len(), 1);
}

/// Closing the window stops the loop before another frame starts.
#[test]
fn test_engine_window_close() {
    let ctx = TestContext::new();
    let mut engine = Engine::new(&ctx.context, &EngineConfig::default()).unwrap();

    let mut polls = 0;
    engine
        .run(|| {
            polls += 1;
            match polls {
                1 => vec![Event::KeyPressed(42)],
                2 => vec![Event::WindowClose, Event::KeyReleased(42)],
                _ => unreachable!("loop should have stopped"),
            }
        })
        .unwrap();

    assert_eq!(ctx.context.frame_number(), 1);
    assert!(!engine.is_running());
    assert!(!engine.is_key_down(42));
}
