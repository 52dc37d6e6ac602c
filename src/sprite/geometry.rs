//! Sprite geometry upload paths

use std::sync::Arc;

use bytemuck::Zeroable;

use crate::backend::*;
use crate::context::FrameContext;
use crate::error::GraphicsResult;
use crate::resources::Buffer;

use super::Sprite;

const SPRITE_SIZE: u64 = std::mem::size_of::<Sprite>() as u64;

/// How sprite records reach the geometry buffer.
///
/// Chosen once at creation from the memory the geometry buffer landed in.
pub enum GeometryUpload {
    /// The geometry buffer is host visible: sprites are cached on the CPU
    /// and written through the mapping in one go on flush.
    Mapped { cache: Vec<Sprite> },
    /// The geometry buffer is device local only: sprites go straight into a
    /// host-visible staging buffer and flush records a buffer copy.
    Staged { staging: Buffer },
}

impl GeometryUpload {
    /// Pick the upload path for `geometry`.
    pub fn for_buffer(
        context: &Arc<FrameContext>,
        geometry: &Buffer,
        capacity: u32,
    ) -> GraphicsResult<Self> {
        let memory = geometry.memory();
        if memory.contains(MemoryProperties::DEVICE_LOCAL)
            && !memory.contains(MemoryProperties::HOST_VISIBLE)
        {
            log::info!("Sprite geometry is device local, uploading through a staging buffer");
            let staging = Buffer::new(
                context,
                &BufferDescriptor::new(
                    capacity as u64 * SPRITE_SIZE,
                    BufferUsage::VERTEX | BufferUsage::COPY_SRC,
                    MemoryPreference::HostVisible,
                )
                .with_label("sprite staging"),
            )?;
            Ok(Self::Staged { staging })
        } else {
            log::info!("Sprite geometry is host visible, writing through the mapping");
            Ok(Self::Mapped {
                cache: vec![Sprite::zeroed(); capacity as usize],
            })
        }
    }

    pub fn is_staged(&self) -> bool {
        matches!(self, Self::Staged { .. })
    }

    /// Store `sprite` in slot `index`.
    pub fn write(&mut self, index: u32, sprite: &Sprite) -> GraphicsResult<()> {
        match self {
            Self::Mapped { cache } => {
                cache[index as usize] = *sprite;
                Ok(())
            }
            Self::Staged { staging } => {
                staging.write(index as u64 * SPRITE_SIZE, bytemuck::bytes_of(sprite))
            }
        }
    }

    /// Make the first `count` sprites visible in `geometry`.
    pub fn flush(
        &self,
        context: &FrameContext,
        cmd: CommandBufferHandle,
        geometry: &Buffer,
        count: u32,
    ) -> GraphicsResult<()> {
        let size = count as u64 * SPRITE_SIZE;
        match self {
            Self::Mapped { cache } => {
                geometry.write(0, bytemuck::cast_slice(&cache[..count as usize]))
            }
            Self::Staged { staging } => {
                context.backend().cmd_copy_buffer(
                    cmd,
                    staging.handle(),
                    geometry.handle(),
                    BufferCopy {
                        src_offset: 0,
                        dst_offset: 0,
                        size,
                    },
                );
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for GeometryUpload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mapped { cache } => f.debug_struct("Mapped").field("slots", &cache.len()).finish(),
            Self::Staged { staging } => f
                .debug_struct("Staged")
                .field("staging", &staging.handle())
                .finish(),
        }
    }
}
