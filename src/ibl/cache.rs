//! Disk cache for IBL precompute results.
//!
//! Cache filename = `hash(key)_suffix.bin` under `cache/`. File layout is a
//! 24-byte header `{u32 width; u32 height; u32 mipLevels; u32 faceCount; u64
//! dataSize}` followed by `dataSize` bytes of raw pixel payload in
//! [`super::cubemap::CubemapCpuImage`]'s packing (mips back-to-back, 6 faces
//! contiguous per mip). Byte order is host little-endian; not portable
//! across endianness, matching spec §6.

use std::path::{Path, PathBuf};

use xxhash_rust::xxh3::xxh3_64;

use crate::error::{GpuError, Result};

pub const HEADER_SIZE: usize = 24;

/// 24-byte disk cache header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheHeader {
    pub width: u32,
    pub height: u32,
    pub mip_levels: u32,
    pub face_count: u32,
    pub data_size: u64,
}

impl CacheHeader {
    #[must_use]
    pub fn to_bytes(self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0..4].copy_from_slice(&self.width.to_le_bytes());
        out[4..8].copy_from_slice(&self.height.to_le_bytes());
        out[8..12].copy_from_slice(&self.mip_levels.to_le_bytes());
        out[12..16].copy_from_slice(&self.face_count.to_le_bytes());
        out[16..24].copy_from_slice(&self.data_size.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(GpuError::CacheInvalid(format!(
                "short header: {} bytes, expected {HEADER_SIZE}",
                bytes.len()
            )));
        }
        let width = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        let height = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
        let mip_levels = u32::from_le_bytes(bytes[8..12].try_into().unwrap());
        let face_count = u32::from_le_bytes(bytes[12..16].try_into().unwrap());
        let data_size = u64::from_le_bytes(bytes[16..24].try_into().unwrap());
        let header = Self { width, height, mip_levels, face_count, data_size };
        header.validate()?;
        Ok(header)
    }

    /// A header with `width == 0` or `data_size == 0` is invalid per spec §6.
    fn validate(self) -> Result<()> {
        if self.width == 0 || self.data_size == 0 {
            return Err(GpuError::CacheInvalid(format!(
                "degenerate header: width={}, data_size={}",
                self.width, self.data_size
            )));
        }
        Ok(())
    }
}

/// 64-bit non-cryptographic hash of a cache key string (xxh3), per spec §6.
#[must_use]
pub fn hash_key(key: &str) -> u64 {
    xxh3_64(key.as_bytes())
}

#[must_use]
pub fn cache_path(cache_dir: &Path, key: &str, suffix: &str) -> PathBuf {
    cache_dir.join(format!("{:016x}_{suffix}.bin", hash_key(key)))
}

/// Writes `header` + `payload` to `path`, creating parent directories if
/// needed. A write failure (disk full, permissions) leaves a partial file
/// that the next `load` call detects via the header check and regenerates,
/// matching spec §7's propagation policy.
pub fn save(path: &Path, header: CacheHeader, payload: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut bytes = Vec::with_capacity(HEADER_SIZE + payload.len());
    bytes.extend_from_slice(&header.to_bytes());
    bytes.extend_from_slice(payload);
    std::fs::write(path, bytes)?;
    Ok(())
}

/// Reads and validates `path`. A missing file, short read, or invalid
/// header all surface as `GpuError::CacheInvalid`; callers treat this as a
/// cache miss and regenerate.
pub fn load(path: &Path) -> Result<(CacheHeader, Vec<u8>)> {
    let bytes = std::fs::read(path).map_err(|e| GpuError::CacheInvalid(e.to_string()))?;
    let header = CacheHeader::from_bytes(&bytes)?;
    let payload = bytes.get(HEADER_SIZE..).unwrap_or(&[]);
    if (payload.len() as u64) < header.data_size {
        return Err(GpuError::CacheInvalid(format!(
            "short payload: {} bytes, header claims {}",
            payload.len(),
            header.data_size
        )));
    }
    Ok((header, payload[..header.data_size as usize].to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_header_and_payload() {
        let dir = std::env::temp_dir().join("gpu_render_core_cache_test");
        let path = cache_path(&dir, "envs/sky.hdr_1024", "env_cubemap");
        let payload: Vec<u8> = (0u8..=255).cycle().take(4096).collect();
        let header = CacheHeader { width: 1024, height: 1024, mip_levels: 1, face_count: 6, data_size: payload.len() as u64 };
        save(&path, header, &payload).unwrap();
        let (loaded_header, loaded_payload) = load(&path).unwrap();
        assert_eq!(loaded_header, header);
        assert_eq!(loaded_payload, payload);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn zero_width_header_is_invalid() {
        let header = CacheHeader { width: 0, height: 0, mip_levels: 1, face_count: 6, data_size: 16 };
        let bytes = header.to_bytes();
        assert!(CacheHeader::from_bytes(&bytes).is_err());
    }

    #[test]
    fn zero_data_size_header_is_invalid() {
        let header = CacheHeader { width: 64, height: 64, mip_levels: 1, face_count: 6, data_size: 0 };
        let bytes = header.to_bytes();
        assert!(CacheHeader::from_bytes(&bytes).is_err());
    }

    #[test]
    fn short_header_is_invalid() {
        assert!(CacheHeader::from_bytes(&[0u8; 10]).is_err());
    }

    #[test]
    fn same_key_same_hash() {
        assert_eq!(hash_key("a_b_c"), hash_key("a_b_c"));
        assert_ne!(hash_key("a_b_c"), hash_key("a_b_d"));
    }
}
