//! Render Settings Configuration
//!
//! Centralizes the tuning knobs for the GPU resource and render-graph core:
//! adapter selection, frame pacing, shadow map sizes, water grid resolution,
//! and IBL quality presets.

/// Configuration options for GPU adapter/device selection and frame pacing.
///
/// | Field | Description | Default |
/// |-------|-------------|---------|
/// | `power_preference` | GPU selection preference | `HighPerformance` |
/// | `required_features` | Required wgpu features | Empty |
/// | `required_limits` | Required wgpu limits | Default |
/// | `vsync` | Vertical sync enabled | `true` |
/// | `clear_color` | Background clear color | Black |
/// | `depth_format` | Preferred depth buffer format | `Depth32Float` |
/// | `max_frames_in_flight` | Frames pipelined ahead of the GPU | `2` |
#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub power_preference: wgpu::PowerPreference,
    pub required_features: wgpu::Features,
    pub required_limits: wgpu::Limits,
    pub vsync: bool,
    pub clear_color: wgpu::Color,
    pub depth_format: wgpu::TextureFormat,
    pub max_frames_in_flight: u32,
    pub shadow: ShadowSettings,
    pub water: WaterSettings,
    pub ibl: IblConfig,
}

impl Default for RenderSettings {
    fn default() -> Self {
        // Model matrices (shadow passes), the per-face index of the point-light
        // cube pass, and `MaterialPush` are all sent as push constants rather
        // than dynamic uniform buffers, matching the original engine's
        // `vkCmdPushConstants` usage throughout `VulkanRenderer`. wgpu gates
        // this behind an explicit feature + a `max_push_constant_size` limit
        // raise past the 128-byte Vulkan baseline `MaterialPush` needs.
        let mut required_limits = wgpu::Limits::default();
        required_limits.max_push_constant_size = 256;
        Self {
            power_preference: wgpu::PowerPreference::HighPerformance,
            required_features: wgpu::Features::PUSH_CONSTANTS,
            required_limits,
            vsync: true,
            clear_color: wgpu::Color::BLACK,
            depth_format: wgpu::TextureFormat::Depth32Float,
            max_frames_in_flight: 2,
            shadow: ShadowSettings::default(),
            water: WaterSettings::default(),
            ibl: IblConfig::preset(IblQuality::Medium),
        }
    }
}

/// Directional + point-light shadow tuning, matching the original engine's
/// `ShadowSystem`/`PointLightShadowSystem` defaults.
#[derive(Debug, Clone, Copy)]
pub struct ShadowSettings {
    pub directional_size: u32,
    pub directional_bias_constant: f32,
    pub directional_bias_slope: f32,
    pub directional_frustum_size: f32,
    pub directional_near: f32,
    pub directional_far: f32,

    pub point_face_size: u32,
    pub point_bias_constant: f32,
    pub point_bias_slope: f32,
    pub point_near: f32,
    pub point_far: f32,
}

impl Default for ShadowSettings {
    fn default() -> Self {
        Self {
            directional_size: 4096,
            directional_bias_constant: 1.0,
            directional_bias_slope: 1.5,
            directional_frustum_size: 50.0,
            directional_near: 0.1,
            directional_far: 200.0,

            point_face_size: 1024,
            point_bias_constant: 1.25,
            point_bias_slope: 1.75,
            point_near: 0.1,
            point_far: 50.0,
        }
    }
}

/// Water simulation tuning, matching the original engine's `WaterParameters`
/// defaults.
#[derive(Debug, Clone, Copy)]
pub struct WaterSettings {
    pub grid_resolution: u32,
    pub mesh_resolution: u32,
    pub wave_speed: f32,
    pub damping: f32,
    pub height_scale: f32,
    pub fresnel_power: f32,
    pub specular_power: f32,
    pub reflection_strength: f32,
    pub refraction_strength: f32,
    pub foam_threshold: f32,
    pub foam_intensity: f32,
    pub edge_foam_width: f32,
    pub shallow_color: [f32; 3],
    pub deep_color: [f32; 3],
    pub depth_falloff: f32,
}

impl Default for WaterSettings {
    fn default() -> Self {
        Self {
            grid_resolution: 256,
            mesh_resolution: 64,
            wave_speed: 0.4,
            damping: 0.98,
            height_scale: 0.5,
            fresnel_power: 5.0,
            specular_power: 256.0,
            reflection_strength: 1.0,
            refraction_strength: 0.1,
            foam_threshold: 0.3,
            foam_intensity: 1.0,
            edge_foam_width: 0.5,
            shallow_color: [0.0, 0.5, 0.5],
            deep_color: [0.0, 0.1, 0.2],
            depth_falloff: 2.0,
        }
    }
}

/// IBL quality presets, mirroring the original engine's `IBLQuality` enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IblQuality {
    Low,
    Medium,
    High,
    Ultra,
}

/// Resolution / sample-count settings for one IBL precompute run.
///
/// Invariant: `prefilter_mip_levels = floor(log2(prefilter_size)) + 1`.
#[derive(Debug, Clone, Copy)]
pub struct IblConfig {
    pub env_size: u32,
    pub irradiance_size: u32,
    pub prefilter_size: u32,
    pub brdf_lut_size: u32,
    pub prefilter_mip_levels: u32,
    pub irradiance_samples: u32,
    pub prefilter_base_samples: u32,
    pub brdf_samples: u32,
}

impl IblConfig {
    #[must_use]
    pub fn preset(quality: IblQuality) -> Self {
        match quality {
            IblQuality::Low => Self::custom(256, 32, 256, 256, 64, 32, 128),
            IblQuality::Medium => Self::custom(1024, 64, 128, 256, 64, 32, 256),
            IblQuality::High => Self::custom(2048, 128, 256, 512, 128, 64, 512),
            IblQuality::Ultra => Self::custom(4096, 256, 512, 1024, 256, 128, 1024),
        }
    }

    /// Build a custom config, deriving `prefilter_mip_levels` from
    /// `prefilter_size` per the spec invariant.
    #[must_use]
    pub fn custom(
        env_size: u32,
        irradiance_size: u32,
        prefilter_size: u32,
        brdf_lut_size: u32,
        irradiance_samples: u32,
        prefilter_base_samples: u32,
        brdf_samples: u32,
    ) -> Self {
        Self {
            env_size,
            irradiance_size,
            prefilter_size,
            brdf_lut_size,
            prefilter_mip_levels: prefilter_mip_levels_for(prefilter_size),
            irradiance_samples,
            prefilter_base_samples,
            brdf_samples,
        }
    }
}

/// `floor(log2(prefilter_size)) + 1`, the invariant relating prefilter
/// resolution to its mip count.
#[must_use]
pub fn prefilter_mip_levels_for(prefilter_size: u32) -> u32 {
    (prefilter_size as f32).log2().floor() as u32 + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefilter_mip_levels_matches_invariant() {
        assert_eq!(prefilter_mip_levels_for(256), 9);
        assert_eq!(prefilter_mip_levels_for(128), 8);
        assert_eq!(prefilter_mip_levels_for(512), 10);
    }

    #[test]
    fn presets_satisfy_mip_level_invariant() {
        for q in [IblQuality::Low, IblQuality::Medium, IblQuality::High, IblQuality::Ultra] {
            let cfg = IblConfig::preset(q);
            assert_eq!(cfg.prefilter_mip_levels, prefilter_mip_levels_for(cfg.prefilter_size));
        }
    }
}
