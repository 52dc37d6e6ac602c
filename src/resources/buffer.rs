//! Buffer wrapper

use std::sync::Arc;

use crate::backend::*;
use crate::context::FrameContext;
use crate::error::GraphicsResult;

/// A GPU buffer and the memory properties it was allocated with.
pub struct Buffer {
    context: Arc<FrameContext>,
    handle: BufferHandle,
    size: u64,
    memory: MemoryProperties,
}

impl Buffer {
    pub fn new(context: &Arc<FrameContext>, desc: &BufferDescriptor) -> GraphicsResult<Self> {
        let (handle, memory) = {
            let mut backend = context.backend();
            let handle = backend.create_buffer(desc)?;
            (handle, backend.buffer_memory_properties(handle))
        };
        Ok(Self {
            context: Arc::clone(context),
            handle,
            size: desc.size,
            memory,
        })
    }

    pub fn handle(&self) -> BufferHandle {
        self.handle
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn memory(&self) -> MemoryProperties {
        self.memory
    }

    pub fn is_host_visible(&self) -> bool {
        self.memory.contains(MemoryProperties::HOST_VISIBLE)
    }

    /// Write through the persistent mapping.
    pub fn write(&self, offset: u64, data: &[u8]) -> GraphicsResult<()> {
        self.context
            .backend()
            .write_buffer(self.handle, offset, data)?;
        Ok(())
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        self.context.backend().destroy_buffer(self.handle);
    }
}
