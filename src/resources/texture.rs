//! Texture wrapper with tracked layout

use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::*;
use crate::context::FrameContext;
use crate::error::GraphicsResult;

/// A GPU image plus its view, optional sampler and current layout.
///
/// The layout is tracked on the CPU so callers only ever name the layout they
/// need next; `transition_layout` records the barrier from whatever the image
/// is in now.
pub struct Texture {
    context: Arc<FrameContext>,
    handle: TextureHandle,
    sampler: Option<SamplerHandle>,
    extent: Extent2d,
    format: TextureFormat,
    usage: TextureUsage,
    layout: Mutex<ImageLayout>,
    label: Option<String>,
    owned: bool,
}

static_assertions::assert_impl_all!(Texture: Send, Sync);

impl Texture {
    pub fn new(context: &Arc<FrameContext>, desc: &TextureDescriptor) -> GraphicsResult<Self> {
        let handle = context.backend().create_texture(desc)?;
        Ok(Self {
            context: Arc::clone(context),
            handle,
            sampler: None,
            extent: Extent2d::new(desc.width, desc.height),
            format: desc.format,
            usage: desc.usage,
            layout: Mutex::new(ImageLayout::Undefined),
            label: desc.label.clone(),
            owned: true,
        })
    }

    /// Create a sampled texture with its own sampler.
    pub fn sampled(
        context: &Arc<FrameContext>,
        desc: &TextureDescriptor,
        sampler: &SamplerDescriptor,
    ) -> GraphicsResult<Self> {
        let mut texture = Self::new(context, desc)?;
        texture.sampler = Some(context.backend().create_sampler(sampler)?);
        Ok(texture)
    }

    /// Wrap a swapchain image; the backend keeps ownership.
    pub(crate) fn borrowed(
        context: &Arc<FrameContext>,
        handle: TextureHandle,
        extent: Extent2d,
        format: TextureFormat,
    ) -> Self {
        Self {
            context: Arc::clone(context),
            handle,
            sampler: None,
            extent,
            format,
            usage: TextureUsage::COLOR_ATTACHMENT | TextureUsage::COPY_DST,
            layout: Mutex::new(ImageLayout::Undefined),
            label: Some("swapchain".to_string()),
            owned: false,
        }
    }

    pub fn handle(&self) -> TextureHandle {
        self.handle
    }

    pub fn sampler(&self) -> Option<SamplerHandle> {
        self.sampler
    }

    pub fn width(&self) -> u32 {
        self.extent.width
    }

    pub fn height(&self) -> u32 {
        self.extent.height
    }

    pub fn extent(&self) -> Extent2d {
        self.extent
    }

    pub fn format(&self) -> TextureFormat {
        self.format
    }

    pub fn usage(&self) -> TextureUsage {
        self.usage
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn layout(&self) -> ImageLayout {
        *self.layout.lock()
    }

    /// Record a transition to `new`.
    ///
    /// Same-layout requests are dropped, except `General`, which always
    /// records a barrier so back-to-back dispatches see each other's writes.
    pub fn transition_layout(&self, cmd: CommandBufferHandle, new: ImageLayout) {
        let mut layout = self.layout.lock();
        if *layout == new && new != ImageLayout::General {
            return;
        }
        self.context
            .backend()
            .cmd_transition_texture(cmd, self.handle, *layout, new);
        *layout = new;
    }

    /// Blit the whole of `src` over the whole of `self`.
    ///
    /// Both textures are moved to their transfer layouts first.
    pub fn blit_from(&self, src: &Texture, cmd: CommandBufferHandle) {
        src.transition_layout(cmd, ImageLayout::TransferSrc);
        self.transition_layout(cmd, ImageLayout::TransferDst);
        self.context
            .backend()
            .cmd_blit_texture(cmd, src.handle, src.extent, self.handle, self.extent);
    }

    /// Clear to `color` in the current layout (which must be `General` or `TransferDst`).
    pub fn clear(&self, cmd: CommandBufferHandle, color: [f32; 4]) {
        let layout = {
            let mut layout = self.layout.lock();
            if !matches!(*layout, ImageLayout::General | ImageLayout::TransferDst) {
                self.context.backend().cmd_transition_texture(
                    cmd,
                    self.handle,
                    *layout,
                    ImageLayout::General,
                );
                *layout = ImageLayout::General;
            }
            *layout
        };
        self.context
            .backend()
            .cmd_clear_color(cmd, self.handle, layout, color);
    }
}

impl std::fmt::Debug for Texture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Texture")
            .field("handle", &self.handle)
            .field("label", &self.label)
            .field("extent", &self.extent)
            .field("format", &self.format)
            .field("layout", &self.layout())
            .finish()
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        if !self.owned {
            return;
        }
        let mut backend = self.context.backend();
        if let Some(sampler) = self.sampler.take() {
            backend.destroy_sampler(sampler);
        }
        backend.destroy_texture(self.handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DummyBackend, RecordedCommand};

    fn setup() -> (Arc<FrameContext>, crate::backend::DummyInspector, CommandBufferHandle) {
        let backend = DummyBackend::new();
        let inspector = backend.inspector();
        let context = FrameContext::new(backend);
        let cmd = {
            let mut backend = context.backend();
            let pool = backend.create_command_pool().unwrap();
            let cmd = backend.allocate_command_buffer(pool).unwrap();
            backend.begin_command_buffer(cmd).unwrap();
            cmd
        };
        (context, inspector, cmd)
    }

    #[test]
    fn test_transition_tracks_layout() {
        let (context, inspector, cmd) = setup();
        let texture = Texture::new(
            &context,
            &TextureDescriptor::new(8, 8, TextureFormat::Rgba8Unorm, TextureUsage::STORAGE),
        )
        .unwrap();

        texture.transition_layout(cmd, ImageLayout::General);
        texture.transition_layout(cmd, ImageLayout::TransferSrc);
        texture.transition_layout(cmd, ImageLayout::TransferSrc);

        assert_eq!(texture.layout(), ImageLayout::TransferSrc);
        let commands = inspector.commands(cmd).unwrap();
        assert_eq!(
            commands,
            vec![
                RecordedCommand::TransitionTexture {
                    texture: texture.handle(),
                    old: ImageLayout::Undefined,
                    new: ImageLayout::General,
                },
                RecordedCommand::TransitionTexture {
                    texture: texture.handle(),
                    old: ImageLayout::General,
                    new: ImageLayout::TransferSrc,
                },
            ]
        );
    }

    #[test]
    fn test_general_to_general_records_barrier() {
        let (context, inspector, cmd) = setup();
        let texture = Texture::new(
            &context,
            &TextureDescriptor::new(8, 8, TextureFormat::Rgba16Float, TextureUsage::STORAGE),
        )
        .unwrap();

        texture.transition_layout(cmd, ImageLayout::General);
        texture.transition_layout(cmd, ImageLayout::General);

        assert_eq!(inspector.commands(cmd).unwrap().len(), 2);
    }

    #[test]
    fn test_drop_releases_texture() {
        let (context, inspector, _cmd) = setup();
        let before = inspector.live_objects();
        let texture = Texture::sampled(
            &context,
            &TextureDescriptor::new(4, 4, TextureFormat::Rgba8Unorm, TextureUsage::SAMPLED),
            &SamplerDescriptor::default(),
        )
        .unwrap();
        assert_eq!(inspector.live_objects(), before + 2);
        drop(texture);
        assert_eq!(inspector.live_objects(), before);
    }
}
