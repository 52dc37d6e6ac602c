//! Main engine loop

use std::path::PathBuf;
use std::sync::Arc;

use crate::context::FrameContext;
use crate::error::{GraphicsError, GraphicsResult};
use crate::frame::{Frame, FrameExecutor, FrameTimer};
use crate::layer::{Event, Layer, LayerStack};
use crate::shader::SearchPathShaderSource;

/// Number of tracked key scan codes.
pub const KEY_COUNT: usize = 512;
/// Number of tracked mouse buttons.
pub const MOUSE_BUTTON_COUNT: usize = 10;

/// Configuration for the engine loop
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Minimum seconds per frame; 0 leaves the frame rate uncapped.
    pub min_frame_time: f32,
    /// Seconds over which frames are counted for the FPS figure.
    pub fps_window: f32,
    /// Directories searched, in order, for shader binaries.
    pub shader_search_paths: Vec<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_frame_time: 0.0,
            fps_window: 1.0,
            shader_search_paths: vec![PathBuf::from(".")],
        }
    }
}

impl EngineConfig {
    pub fn with_min_frame_time(mut self, seconds: f32) -> Self {
        self.min_frame_time = seconds;
        self
    }

    pub fn with_fps_window(mut self, seconds: f32) -> Self {
        self.fps_window = seconds;
        self
    }

    pub fn with_shader_search_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.shader_search_paths.push(path.into());
        self
    }

    /// Shader source reading from [`Self::shader_search_paths`].
    pub fn shader_source(&self) -> SearchPathShaderSource {
        self.shader_search_paths
            .iter()
            .fold(SearchPathShaderSource::new(), |source, path| {
                source.with_search_path(path.clone())
            })
    }
}

/// Drives the frame executor and the layer stack.
pub struct Engine {
    context: Arc<FrameContext>,
    executor: FrameExecutor,
    layers: LayerStack,
    running: bool,
    key_states: [bool; KEY_COUNT],
    mouse_button_states: [bool; MOUSE_BUTTON_COUNT],
}

impl Engine {
    pub fn new(context: &Arc<FrameContext>, config: &EngineConfig) -> GraphicsResult<Self> {
        let timer = FrameTimer::new()
            .with_min_frame_time(config.min_frame_time)
            .with_fps_window(config.fps_window);
        let executor = FrameExecutor::with_timer(context, timer)?;
        log::info!("Engine created on {} backend", context.backend_name());
        Ok(Self {
            context: Arc::clone(context),
            executor,
            layers: LayerStack::new(),
            running: true,
            key_states: [false; KEY_COUNT],
            mouse_button_states: [false; MOUSE_BUTTON_COUNT],
        })
    }

    pub fn context(&self) -> &Arc<FrameContext> {
        &self.context
    }

    pub fn executor(&self) -> &FrameExecutor {
        &self.executor
    }

    pub fn layers(&self) -> &LayerStack {
        &self.layers
    }

    pub fn push_layer(&mut self, layer: impl Layer + 'static) {
        self.layers.push(Box::new(layer));
    }

    /// Run one frame: update every layer, then composite and present.
    ///
    /// A layer error abandons the frame, so the next call starts cleanly,
    /// and is then returned.
    pub fn run_frame(&mut self) -> GraphicsResult<()> {
        self.executor.begin_frame()?;
        let updated = match Frame::new(&mut self.executor) {
            Some(mut frame) => self.layers.update(&mut frame),
            None => Err(GraphicsError::InvalidParameter(
                "no frame open after begin_frame".into(),
            )),
        };
        if let Err(e) = updated {
            if let Err(abandon) = self.executor.abandon_frame() {
                log::error!("Failed to abandon frame after layer error: {}", abandon);
            }
            return Err(e);
        }
        let layers = &mut self.layers;
        self.executor
            .end_frame_with(|cmd, target| layers.composite(cmd, target))
    }

    /// Loop until closed, feeding the events `poll` returns before each frame.
    ///
    /// A GPU failure stops the loop and is returned.
    pub fn run<P>(&mut self, mut poll: P) -> GraphicsResult<()>
    where
        P: FnMut() -> Vec<Event>,
    {
        while self.running {
            for event in poll() {
                self.on_event(&event);
            }
            if !self.running {
                break;
            }
            self.run_frame()?;
        }
        self.executor.wait_idle()
    }

    /// Update engine state from `event`, then offer it to the layers.
    pub fn on_event(&mut self, event: &Event) {
        match *event {
            Event::WindowClose => {
                self.close();
                return;
            }
            Event::WindowResize { width, height } => {
                log::debug!("Window resized to {}x{}", width, height);
            }
            Event::KeyPressed(code) => set_state(&mut self.key_states, code, true, "Key scan code"),
            Event::KeyReleased(code) => set_state(&mut self.key_states, code, false, "Key scan code"),
            Event::MousePressed(button) => {
                set_state(&mut self.mouse_button_states, button, true, "Mouse button")
            }
            Event::MouseReleased(button) => {
                set_state(&mut self.mouse_button_states, button, false, "Mouse button")
            }
        }
        self.layers.dispatch(event);
    }

    pub fn close(&mut self) {
        self.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_key_down(&self, scan_code: u32) -> bool {
        self.key_states
            .get(scan_code as usize)
            .copied()
            .unwrap_or(false)
    }

    pub fn is_mouse_button_down(&self, button: u32) -> bool {
        self.mouse_button_states
            .get(button as usize)
            .copied()
            .unwrap_or(false)
    }

    pub fn frames_per_second(&self) -> u32 {
        self.executor.frames_per_second()
    }

    pub fn delta_time(&self) -> f32 {
        self.executor.delta_time()
    }
}

fn set_state(states: &mut [bool], code: u32, down: bool, what: &str) {
    match states.get_mut(code as usize) {
        Some(state) => *state = down,
        None => log::warn!("{} out of range: {}", what, code),
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(e) = self.executor.wait_idle() {
            log::error!("wait_idle failed during engine teardown: {}", e);
        }
        // Layers may own GPU resources; release them before the frame slots.
        self.layers.clear();
    }
}
