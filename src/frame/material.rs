//! PBR material push constants and the fixed material descriptor-set layout
//! (spec §4.9).
//!
//! Grounded on `VulkanRenderer.h`'s `struct PushConstant` (field-for-field,
//! snake_case) and the teacher's `dummy_image`/`dummy_sampler` pattern in
//! `ResourceManager::new` for resolving absent material textures to 1x1
//! defaults rather than branching in the shader.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};

use crate::gpu::{GpuContext, Image, ImageLayout, ResourceFactory};
use crate::types::RenderMode;

/// Per-draw PBR push constant, matching `VulkanRenderer.h`'s `PushConstant`.
/// Rust's `repr(C)` layout rules pad this from its 132 raw bytes up to a
/// 16-byte-aligned 144, comfortably under the 256-byte push-constant budget
/// `RenderSettings::default()` requests.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct MaterialPush {
    pub model: Mat4,
    pub base_color_factor: Vec4,
    pub metallic_factor: f32,
    pub roughness_factor: f32,
    pub ambient_occlusion: f32,
    pub emissive_factor: f32,
    pub has_albedo_map: i32,
    pub has_normal_map: i32,
    pub has_metallic_roughness_map: i32,
    pub has_emissive_map: i32,
    pub has_occlusion_map: i32,
    pub debug_layer: i32,
    pub use_ibl: i32,
    pub ibl_intensity: f32,
    pub use_rt: i32,
}

impl MaterialPush {
    /// Fills in `use_ibl`/`debug_layer`/`ibl_intensity` from the
    /// orchestrator's frame-wide state, leaving the material-specific fields
    /// as supplied by the caller.
    #[must_use]
    pub fn with_frame_state(mut self, mode: RenderMode, debug_layer: i32, ibl_intensity: f32) -> Self {
        self.use_ibl = i32::from(mode == RenderMode::PbrIbl);
        self.debug_layer = debug_layer;
        self.ibl_intensity = ibl_intensity;
        self
    }
}

impl Default for MaterialPush {
    fn default() -> Self {
        Self {
            model: Mat4::IDENTITY,
            base_color_factor: Vec4::ONE,
            metallic_factor: 1.0,
            roughness_factor: 1.0,
            ambient_occlusion: 1.0,
            emissive_factor: 0.0,
            has_albedo_map: 0,
            has_normal_map: 0,
            has_metallic_roughness_map: 0,
            has_emissive_map: 0,
            has_occlusion_map: 0,
            debug_layer: 0,
            use_ibl: 0,
            ibl_intensity: 1.0,
            use_rt: 0,
        }
    }
}

/// The five texture slots a material may supply; any left `None` are
/// resolved to [`MaterialDefaults`]'s fallback textures.
#[derive(Debug, Clone, Copy, Default)]
pub struct MaterialTextures<'a> {
    pub albedo: Option<(&'a wgpu::TextureView, &'a wgpu::Sampler)>,
    pub normal: Option<(&'a wgpu::TextureView, &'a wgpu::Sampler)>,
    pub metallic_roughness: Option<(&'a wgpu::TextureView, &'a wgpu::Sampler)>,
    pub emissive: Option<(&'a wgpu::TextureView, &'a wgpu::Sampler)>,
    pub occlusion: Option<(&'a wgpu::TextureView, &'a wgpu::Sampler)>,
}

/// Fixed PBR material descriptor-set layout (set 1 in the pipeline-selection
/// table): 5 texture+sampler pairs, matching the 5 `hasXMap` push-constant
/// flags. Owns 1x1 fallback textures so every material binding is complete
/// regardless of which maps a material actually supplies.
pub struct MaterialDefaults {
    pub layout: wgpu::BindGroupLayout,
    white: Image,
    flat_normal: Image,
    neutral_metallic_roughness: Image,
    black: Image,
    sampler: wgpu::Sampler,
}

fn solid_color_image(
    ctx: &GpuContext,
    factory: &ResourceFactory,
    label: &'static str,
    rgba: [u8; 4],
) -> Image {
    let mut image = factory.create_image_2d(
        &ctx.device,
        1,
        1,
        1,
        wgpu::TextureFormat::Rgba8Unorm,
        wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
    );
    ctx.queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            texture: &image.texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        &rgba,
        wgpu::TexelCopyBufferLayout { offset: 0, bytes_per_row: Some(4), rows_per_image: Some(1) },
        wgpu::Extent3d { width: 1, height: 1, depth_or_array_layers: 1 },
    );
    image.set_layout(ImageLayout::ShaderReadOnly);
    log::debug!("material: built 1x1 default texture `{label}`");
    image
}

fn material_bind_group_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    let texture_entry = |binding: u32| wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: true },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    };
    let sampler_entry = |binding: u32| wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
        count: None,
    };
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("material-bind-group-layout"),
        entries: &[
            texture_entry(0),
            sampler_entry(1),
            texture_entry(2),
            sampler_entry(3),
            texture_entry(4),
            sampler_entry(5),
            texture_entry(6),
            sampler_entry(7),
            texture_entry(8),
            sampler_entry(9),
        ],
    })
}

impl MaterialDefaults {
    pub fn new(ctx: &GpuContext, factory: &ResourceFactory) -> Self {
        let layout = material_bind_group_layout(&ctx.device);
        let sampler = factory.create_sampler(
            &ctx.device,
            wgpu::FilterMode::Linear,
            wgpu::FilterMode::Linear,
            wgpu::MipmapFilterMode::Linear,
            wgpu::AddressMode::Repeat,
            1,
            None,
            None,
            0.0..32.0,
        );
        Self {
            layout,
            white: solid_color_image(ctx, factory, "white", [255, 255, 255, 255]),
            flat_normal: solid_color_image(ctx, factory, "flat-normal", [127, 127, 255, 255]),
            neutral_metallic_roughness: solid_color_image(ctx, factory, "neutral-metallic-roughness", [0, 255, 0, 255]),
            black: solid_color_image(ctx, factory, "black", [0, 0, 0, 255]),
            sampler,
        }
    }

    /// Builds the fixed-layout material bind group, substituting a 1x1
    /// default for every texture slot the material didn't supply. Returns
    /// which flags should go into the draw's [`MaterialPush`].
    #[must_use]
    pub fn create_bind_group(
        &self,
        device: &wgpu::Device,
        textures: &MaterialTextures<'_>,
    ) -> (wgpu::BindGroup, [i32; 5]) {
        let mut flags = [0i32; 5];
        let resolve = |slot: Option<(&wgpu::TextureView, &wgpu::Sampler)>, fallback: &Image, flag: &mut i32| {
            match slot {
                Some((view, sampler)) => {
                    *flag = 1;
                    (view.clone(), sampler.clone())
                }
                None => {
                    log::debug!("material: substituting default texture for missing slot");
                    (fallback.view.clone(), self.sampler.clone())
                }
            }
        };

        let (albedo_view, albedo_sampler) = resolve(textures.albedo, &self.white, &mut flags[0]);
        let (normal_view, normal_sampler) = resolve(textures.normal, &self.flat_normal, &mut flags[1]);
        let (mr_view, mr_sampler) =
            resolve(textures.metallic_roughness, &self.neutral_metallic_roughness, &mut flags[2]);
        let (emissive_view, emissive_sampler) = resolve(textures.emissive, &self.black, &mut flags[3]);
        let (occlusion_view, occlusion_sampler) = resolve(textures.occlusion, &self.white, &mut flags[4]);

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("material-bind-group"),
            layout: &self.layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: wgpu::BindingResource::TextureView(&albedo_view) },
                wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::Sampler(&albedo_sampler) },
                wgpu::BindGroupEntry { binding: 2, resource: wgpu::BindingResource::TextureView(&normal_view) },
                wgpu::BindGroupEntry { binding: 3, resource: wgpu::BindingResource::Sampler(&normal_sampler) },
                wgpu::BindGroupEntry { binding: 4, resource: wgpu::BindingResource::TextureView(&mr_view) },
                wgpu::BindGroupEntry { binding: 5, resource: wgpu::BindingResource::Sampler(&mr_sampler) },
                wgpu::BindGroupEntry { binding: 6, resource: wgpu::BindingResource::TextureView(&emissive_view) },
                wgpu::BindGroupEntry { binding: 7, resource: wgpu::BindingResource::Sampler(&emissive_sampler) },
                wgpu::BindGroupEntry { binding: 8, resource: wgpu::BindingResource::TextureView(&occlusion_view) },
                wgpu::BindGroupEntry { binding: 9, resource: wgpu::BindingResource::Sampler(&occlusion_sampler) },
            ],
        });
        (bind_group, flags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_push_has_no_maps_and_full_white_albedo() {
        let push = MaterialPush::default();
        assert_eq!(push.base_color_factor, Vec4::ONE);
        assert_eq!(push.has_albedo_map, 0);
        assert_eq!(push.has_normal_map, 0);
        assert_eq!(push.use_ibl, 0);
    }

    #[test]
    fn with_frame_state_sets_use_ibl_only_for_pbr_ibl() {
        let push = MaterialPush::default().with_frame_state(RenderMode::Pbr, 0, 1.0);
        assert_eq!(push.use_ibl, 0);
        let push = MaterialPush::default().with_frame_state(RenderMode::PbrIbl, 2, 0.5);
        assert_eq!(push.use_ibl, 1);
        assert_eq!(push.debug_layer, 2);
        assert!((push.ibl_intensity - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn material_push_fits_in_push_constant_budget() {
        assert!(std::mem::size_of::<MaterialPush>() <= 256);
        assert_eq!(std::mem::size_of::<MaterialPush>() % 16, 0);
    }
}
