//! Application layers and window/input events.

use crate::backend::CommandBufferHandle;
use crate::error::GraphicsResult;
use crate::frame::Frame;
use crate::resources::Texture;

/// Window and input events fed to the engine by the windowing layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    WindowClose,
    WindowResize { width: u32, height: u32 },
    /// Platform scan code.
    KeyPressed(u32),
    KeyReleased(u32),
    /// Mouse button index.
    MousePressed(u32),
    MouseReleased(u32),
}

/// A unit of application logic driven by the engine every frame.
///
/// # Lifecycle
///
/// 1. `on_attach` - when pushed onto the stack
/// 2. `on_update` - every frame, bottom layer first
/// 3. `composite` - every frame, inside the final pass over the swapchain image
/// 4. `on_detach` - at teardown, top layer first
pub trait Layer {
    fn name(&self) -> &str {
        "layer"
    }

    fn on_attach(&mut self) {}

    fn on_detach(&mut self) {}

    /// Record this layer's work for the frame.
    ///
    /// Command buffers come from [`Frame::acquire_command_buffer`] and are
    /// submitted together after every layer has run.
    fn on_update(&mut self, _frame: &mut Frame<'_>) -> GraphicsResult<()> {
        Ok(())
    }

    /// Handle an event; return `true` to stop it reaching layers below.
    fn on_event(&mut self, _event: &Event) -> bool {
        false
    }

    /// Draw onto the swapchain image after all leased work has run.
    ///
    /// `cmd` is already inside a rendering pass targeting `target`.
    fn composite(&mut self, _cmd: CommandBufferHandle, _target: &Texture) {}
}

/// Owned layers, updated bottom-up and torn down top-down.
#[derive(Default)]
pub struct LayerStack {
    layers: Vec<Box<dyn Layer>>,
}

impl LayerStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, mut layer: Box<dyn Layer>) {
        log::info!("Attaching layer {}", layer.name());
        layer.on_attach();
        self.layers.push(layer);
    }

    /// Detach and return the top layer.
    pub fn pop(&mut self) -> Option<Box<dyn Layer>> {
        let mut layer = self.layers.pop()?;
        layer.on_detach();
        Some(layer)
    }

    pub fn update(&mut self, frame: &mut Frame<'_>) -> GraphicsResult<()> {
        for layer in &mut self.layers {
            layer.on_update(frame)?;
        }
        Ok(())
    }

    /// Offer `event` to layers from the top down; returns whether one handled it.
    pub fn dispatch(&mut self, event: &Event) -> bool {
        self.layers
            .iter_mut()
            .rev()
            .any(|layer| layer.on_event(event))
    }

    pub fn composite(&mut self, cmd: CommandBufferHandle, target: &Texture) {
        for layer in &mut self.layers {
            layer.composite(cmd, target);
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.layers.iter().map(|layer| layer.name())
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Detach and drop every layer, top first.
    pub fn clear(&mut self) {
        while let Some(layer) = self.pop() {
            log::info!("Detached layer {}", layer.name());
        }
    }
}

impl Drop for LayerStack {
    fn drop(&mut self) {
        self.clear();
    }
}
