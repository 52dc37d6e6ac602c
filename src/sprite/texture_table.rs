//! Per-frame texture descriptor table

use std::collections::HashMap;
use std::sync::Arc;

use crate::backend::TextureHandle;
use crate::resources::Texture;

/// Number of combined image sampler slots in the sprite descriptor set.
pub const TEXTURE_TABLE_CAPACITY: u32 = 1024;

/// Maps textures to descriptor array indices in first-seen order.
///
/// Indices are only valid until the next [`TextureTable::clear`]. The table
/// keeps every registered texture alive until then, so a handle can never be
/// reused by a different texture while its index is still referenced.
#[derive(Debug)]
pub struct TextureTable {
    capacity: u32,
    indices: HashMap<TextureHandle, u32>,
    entries: Vec<Arc<Texture>>,
}

impl TextureTable {
    pub fn new() -> Self {
        Self::with_capacity(TEXTURE_TABLE_CAPACITY)
    }

    pub fn with_capacity(capacity: u32) -> Self {
        Self {
            capacity,
            indices: HashMap::new(),
            entries: Vec::new(),
        }
    }

    /// Index of `texture`, assigning the next free one if it is new.
    ///
    /// Returns `None` when the table is full.
    pub fn register(&mut self, texture: &Arc<Texture>) -> Option<u32> {
        if let Some(&index) = self.indices.get(&texture.handle()) {
            return Some(index);
        }
        let index = self.entries.len() as u32;
        if index >= self.capacity {
            return None;
        }
        self.indices.insert(texture.handle(), index);
        self.entries.push(Arc::clone(texture));
        Some(index)
    }

    pub fn index_of(&self, texture: &Texture) -> Option<u32> {
        self.indices.get(&texture.handle()).copied()
    }

    /// Registered textures with their indices, in index order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &Arc<Texture>)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(index, texture)| (index as u32, texture))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.indices.clear();
        self.entries.clear();
    }
}

impl Default for TextureTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DummyBackend, TextureDescriptor, TextureFormat, TextureUsage};
    use crate::context::FrameContext;

    fn texture(context: &Arc<FrameContext>) -> Arc<Texture> {
        let desc = TextureDescriptor::new(2, 2, TextureFormat::Rgba8Unorm, TextureUsage::SAMPLED);
        Arc::new(Texture::new(context, &desc).unwrap())
    }

    #[test]
    fn test_first_seen_order() {
        let context = FrameContext::new(DummyBackend::new());
        let (a, b) = (texture(&context), texture(&context));
        let mut table = TextureTable::new();

        assert_eq!(table.register(&b), Some(0));
        assert_eq!(table.register(&a), Some(1));
        assert_eq!(table.register(&b), Some(0));
        assert_eq!(table.len(), 2);

        table.clear();
        assert_eq!(table.register(&a), Some(0));
        assert_eq!(table.index_of(&b), None);
    }

    #[test]
    fn test_full_table_rejects_new_textures() {
        let context = FrameContext::new(DummyBackend::new());
        let textures: Vec<_> = (0..3).map(|_| texture(&context)).collect();
        let mut table = TextureTable::with_capacity(2);

        assert_eq!(table.register(&textures[0]), Some(0));
        assert_eq!(table.register(&textures[1]), Some(1));
        assert_eq!(table.register(&textures[2]), None);
        // Known textures still resolve.
        assert_eq!(table.register(&textures[0]), Some(0));
    }
}
