//! Precompiled shader bytecode loading.
//!
//! Shader blobs are opaque bytes read from `shaders/<name>.{vert,frag,comp}.spv`;
//! the only contract this crate enforces is that their length is a multiple
//! of 4, matching SPIR-V's own word alignment.

use std::path::Path;

use crate::error::{GpuError, Result};

/// Reads precompiled shader bytecode blobs from disk.
pub struct ShaderLoader;

impl ShaderLoader {
    /// Reads `path` and validates `len % 4 == 0`. Returns the raw bytes;
    /// callers transmute them into the `u32` words `wgpu::ShaderSource::SpirV`
    /// expects.
    pub fn load_blob(path: &Path) -> Result<Vec<u8>> {
        let bytes = std::fs::read(path)?;
        if bytes.len() % 4 != 0 {
            return Err(GpuError::ShaderBlobInvalid(format!(
                "{}: length {} is not a multiple of 4",
                path.display(),
                bytes.len()
            )));
        }
        Ok(bytes)
    }

    /// Builds a `wgpu::ShaderModule` from a validated blob.
    pub fn create_module(device: &wgpu::Device, label: &str, blob: &[u8]) -> Result<wgpu::ShaderModule> {
        if blob.len() % 4 != 0 {
            return Err(GpuError::ShaderBlobInvalid(format!("{label}: length {} is not a multiple of 4", blob.len())));
        }
        let words: Vec<u32> = blob
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Ok(device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::SpirV(std::borrow::Cow::Owned(words)),
        }))
    }

    /// Convenience: read + validate + compile in one call.
    pub fn load_module(device: &wgpu::Device, path: &Path) -> Result<wgpu::ShaderModule> {
        let blob = Self::load_blob(path)?;
        let label = path.file_stem().and_then(|s| s.to_str()).unwrap_or("shader");
        Self::create_module(device, label, &blob)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_misaligned_blob() {
        let bytes = vec![0u8; 5];
        let tmp = std::env::temp_dir().join("gpu_render_core_bad_shader.spv");
        std::fs::write(&tmp, &bytes).unwrap();
        let err = ShaderLoader::load_blob(&tmp).unwrap_err();
        assert!(matches!(err, GpuError::ShaderBlobInvalid(_)));
        let _ = std::fs::remove_file(&tmp);
    }

    #[test]
    fn accepts_aligned_blob() {
        let bytes = vec![0u8; 16];
        let tmp = std::env::temp_dir().join("gpu_render_core_ok_shader.spv");
        std::fs::write(&tmp, &bytes).unwrap();
        let loaded = ShaderLoader::load_blob(&tmp).unwrap();
        assert_eq!(loaded.len(), 16);
        let _ = std::fs::remove_file(&tmp);
    }
}
