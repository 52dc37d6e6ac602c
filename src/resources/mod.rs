//! Resource wrappers owned by the orchestration components

mod buffer;
mod texture;

pub use buffer::Buffer;
pub use texture::Texture;
