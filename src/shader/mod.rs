//! Shader byte loading
//!
//! The asset store is an external collaborator; the orchestration layer only
//! needs `load(id) -> bytes-or-absent`, expressed as [`ShaderSource`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::backend::ShaderModuleHandle;
use crate::context::FrameContext;
use crate::error::{GraphicsError, GraphicsResult};

/// SPIR-V magic number, first word of every module.
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Something that can produce shader bytes by id.
pub trait ShaderSource: Send + Sync {
    fn load(&self, id: &str) -> Option<Vec<u8>>;
}

/// Shader bytes registered in memory, keyed by id.
#[derive(Debug, Default, Clone)]
pub struct MemoryShaderSource {
    shaders: HashMap<String, Vec<u8>>,
}

impl MemoryShaderSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<String>, bytes: Vec<u8>) {
        self.shaders.insert(id.into(), bytes);
    }

    pub fn with_shader(mut self, id: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.insert(id, bytes);
        self
    }

    /// Register words as little-endian bytes.
    pub fn with_spirv(self, id: impl Into<String>, words: &[u32]) -> Self {
        self.with_shader(id, bytemuck::cast_slice(words).to_vec())
    }
}

impl ShaderSource for MemoryShaderSource {
    fn load(&self, id: &str) -> Option<Vec<u8>> {
        self.shaders.get(id).cloned()
    }
}

/// Loads shaders from an ordered list of directories; the first hit wins.
#[derive(Debug, Default, Clone)]
pub struct SearchPathShaderSource {
    search_paths: Vec<PathBuf>,
}

impl SearchPathShaderSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_search_path(&mut self, path: impl Into<PathBuf>) {
        self.search_paths.push(path.into());
    }

    pub fn with_search_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.add_search_path(path);
        self
    }

    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    fn resolve(&self, id: &str) -> Option<PathBuf> {
        self.search_paths
            .iter()
            .map(|dir| dir.join(id))
            .find(|candidate| candidate.is_file())
    }
}

impl ShaderSource for SearchPathShaderSource {
    fn load(&self, id: &str) -> Option<Vec<u8>> {
        let path = self.resolve(id)?;
        match std::fs::read(&path) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                log::error!("Failed to read shader {}: {}", path.display(), e);
                None
            }
        }
    }
}

impl<T: ShaderSource + ?Sized> ShaderSource for Arc<T> {
    fn load(&self, id: &str) -> Option<Vec<u8>> {
        (**self).load(id)
    }
}

/// Reinterpret shader bytes as SPIR-V words.
pub fn spirv_words(id: &str, bytes: &[u8]) -> GraphicsResult<Vec<u32>> {
    if bytes.is_empty() || bytes.len() % 4 != 0 {
        return Err(GraphicsError::InvalidShader {
            id: id.to_string(),
            reason: format!("length {} is not a non-zero multiple of 4", bytes.len()),
        });
    }
    let words: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();
    if words[0] != SPIRV_MAGIC {
        return Err(GraphicsError::InvalidShader {
            id: id.to_string(),
            reason: format!("bad magic number {:#010x}", words[0]),
        });
    }
    Ok(words)
}

/// Load `id` and create a shader module from it.
///
/// Returns `Ok(None)` (after logging) when the shader is missing or is not
/// SPIR-V; only a failing module creation is an error.
pub fn load_shader_module(
    context: &FrameContext,
    source: &dyn ShaderSource,
    id: &str,
) -> GraphicsResult<Option<ShaderModuleHandle>> {
    log::info!("Loading shader module: {}", id);
    let Some(bytes) = source.load(id) else {
        log::error!("Shader {} not found", id);
        return Ok(None);
    };
    let words = match spirv_words(id, &bytes) {
        Ok(words) => words,
        Err(e) => {
            log::error!("{}", e);
            return Ok(None);
        }
    };
    let module = context.backend().create_shader_module(&words)?;
    Ok(Some(module))
}

/// Convenience for tests and tools: a minimal valid-looking SPIR-V header.
pub fn spirv_stub() -> Vec<u32> {
    vec![SPIRV_MAGIC, 0x0001_0000, 0, 1, 0]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;

    #[test]
    fn test_spirv_words_rejects_bad_length() {
        assert!(spirv_words("a", &[1, 2, 3]).is_err());
        assert!(spirv_words("a", &[]).is_err());
    }

    #[test]
    fn test_spirv_words_checks_magic() {
        let bytes = 0xdead_beefu32.to_le_bytes();
        assert!(matches!(
            spirv_words("a", &bytes),
            Err(GraphicsError::InvalidShader { .. })
        ));

        let words = spirv_stub();
        let bytes: Vec<u8> = bytemuck::cast_slice(&words).to_vec();
        assert_eq!(spirv_words("a", &bytes).unwrap(), words);
    }

    #[test]
    fn test_missing_shader_is_not_an_error() {
        let context = FrameContext::new(DummyBackend::new());
        let source = MemoryShaderSource::new();
        assert_eq!(load_shader_module(&context, &source, "missing.spv"), Ok(None));
    }

    #[test]
    fn test_search_path_first_hit_wins() {
        let root = std::env::temp_dir().join(format!("lumen-frame-shaders-{}", std::process::id()));
        let first = root.join("first");
        let second = root.join("second");
        std::fs::create_dir_all(&first).unwrap();
        std::fs::create_dir_all(&second).unwrap();
        std::fs::write(second.join("blur.comp.spv"), b"second").unwrap();

        let source = SearchPathShaderSource::new()
            .with_search_path(&first)
            .with_search_path(&second);
        assert_eq!(source.load("blur.comp.spv"), Some(b"second".to_vec()));

        std::fs::write(first.join("blur.comp.spv"), b"first").unwrap();
        assert_eq!(source.load("blur.comp.spv"), Some(b"first".to_vec()));
        assert_eq!(source.load("missing.spv"), None);

        std::fs::remove_dir_all(&root).unwrap();
    }
}
