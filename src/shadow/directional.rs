//! Cascade-free directional shadow mapping (spec §4.6).
//!
//! One light-space matrix, one depth map, texel-snapped to kill shimmer as
//! the camera moves. Grounded on `ShadowSystem::calculateLightSpaceMatrix`
//! and `ShadowSystem::renderShadowPass` in the original engine; the teacher's
//! own CSM pass (`renderer/graph/passes/shadow.rs`) is followed for idiom
//! (dynamic-offset UBO shape, `align_to`, bound-pipeline tracking) but its
//! cascade split machinery is deliberately not ported — this system wants a
//! single map, not a cascade stack.
//!
//! The two depth-only vertex stages default to built-in WGSL but accept an
//! optional precompiled-bytecode override (see [`ShadowDirectional::new`]),
//! the one internal pipeline realizing this crate's external-shader-bytecode
//! boundary via [`crate::shader::ShaderLoader`].

use std::borrow::Cow;
use std::path::Path;

use glam::{Mat4, Vec3, Vec4};

use crate::error::Result;
use crate::gpu::{GpuContext, Image, ImageLayout, ResourceFactory};
use crate::settings::ShadowSettings;
use crate::shader::ShaderLoader;
use crate::types::{Light, LightKind, Mesh};

use super::skeletal::SkeletalResourceCache;
use super::{skeletal_vertex_layout, static_vertex_layout};

const STATIC_SHADOW_SHADER: &str = r#"
struct ShadowUbo { light_space_matrix: mat4x4<f32> };
@group(0) @binding(0) var<uniform> shadow: ShadowUbo;
var<push_constant> model: mat4x4<f32>;

@vertex
fn vs_main(@location(0) position: vec3<f32>) -> @builtin(position) vec4<f32> {
    return shadow.light_space_matrix * model * vec4<f32>(position, 1.0);
}
"#;

const SKELETAL_SHADOW_SHADER: &str = r#"
struct ShadowUbo { light_space_matrix: mat4x4<f32> };
@group(0) @binding(0) var<uniform> shadow: ShadowUbo;
struct Bones { matrices: array<mat4x4<f32>> };
@group(1) @binding(0) var<storage, read> bones: Bones;
var<push_constant> model: mat4x4<f32>;

@vertex
fn vs_main(
    @location(0) position: vec3<f32>,
    @location(1) bone_indices: vec4<u32>,
    @location(2) bone_weights: vec4<f32>,
) -> @builtin(position) vec4<f32> {
    let skin = bones.matrices[bone_indices.x] * bone_weights.x
             + bones.matrices[bone_indices.y] * bone_weights.y
             + bones.matrices[bone_indices.z] * bone_weights.z
             + bones.matrices[bone_indices.w] * bone_weights.w;
    return shadow.light_space_matrix * model * skin * vec4<f32>(position, 1.0);
}
"#;

/// A single draw request resolved by the orchestrator's scene storage into
/// the bare minimum this pass needs: a mesh to bind, its world transform,
/// and optional skeletal state.
pub struct ShadowDrawItem<'a> {
    pub mesh: &'a dyn Mesh,
    pub transform: Mat4,
    pub skeletal: Option<&'a crate::types::SkeletalState>,
}

#[derive(PartialEq, Eq, Clone, Copy)]
enum BoundPipeline {
    None,
    Static,
    Skeletal,
}

/// One 4096² (by default) directional shadow map, its depth-only pipelines,
/// and the per-frame light-space-matrix UBO.
pub struct ShadowDirectional {
    enabled: bool,
    size: u32,
    frustum_size: f32,
    near: f32,
    far: f32,
    depth_image: Image,
    sampler: wgpu::Sampler,
    ubo_layout: wgpu::BindGroupLayout,
    ubo_buffers: Vec<wgpu::Buffer>,
    ubo_bind_groups: Vec<wgpu::BindGroup>,
    static_pipeline: wgpu::RenderPipeline,
    skeletal_pipeline: wgpu::RenderPipeline,
    light_space_matrix: Mat4,
}

impl ShadowDirectional {
    /// `static_shader_path`/`skeletal_shader_path`: when `Some`, the depth-only
    /// vertex stage is loaded as a precompiled bytecode blob via
    /// [`ShaderLoader`] instead of the built-in WGSL below — the realization
    /// of this crate's external-shader-bytecode boundary. `None` (the
    /// common case) keeps the built-in shaders.
    pub fn new(
        ctx: &GpuContext,
        factory: &ResourceFactory,
        settings: &ShadowSettings,
        frames_in_flight: usize,
        bones_layout: &wgpu::BindGroupLayout,
        static_shader_path: Option<&Path>,
        skeletal_shader_path: Option<&Path>,
    ) -> Result<Self> {
        let device = &ctx.device;
        let depth_format = ctx.find_depth_format();
        let mut depth_image = factory.create_image_2d(
            device,
            settings.directional_size,
            settings.directional_size,
            1,
            depth_format,
            wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
        );
        depth_image.set_layout(ImageLayout::DepthAttachment);

        // Border-clamp, comparison sampler: fragments outside the light
        // frustum sample the `OpaqueWhite` border (depth 1.0), which a
        // `LessEqual` comparison against any in-range depth resolves as
        // "lit", matching the original engine's out-of-frustum behavior.
        let sampler = factory.create_sampler(
            device,
            wgpu::FilterMode::Linear,
            wgpu::FilterMode::Linear,
            wgpu::MipmapFilterMode::Nearest,
            wgpu::AddressMode::ClampToBorder,
            1,
            Some(wgpu::SamplerBorderColor::OpaqueWhite),
            Some(wgpu::CompareFunction::LessEqual),
            0.0..1.0,
        );

        let ubo_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("shadow-directional-ubo-layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });

        let ubo_size = std::mem::size_of::<Mat4>() as u64;
        let ubo_buffers: Vec<wgpu::Buffer> = (0..frames_in_flight)
            .map(|i| {
                device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some(&format!("shadow-directional-ubo-{i}")),
                    size: ubo_size,
                    usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                })
            })
            .collect();
        let ubo_bind_groups: Vec<wgpu::BindGroup> = ubo_buffers
            .iter()
            .map(|buf| {
                device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("shadow-directional-ubo-bind-group"),
                    layout: &ubo_layout,
                    entries: &[wgpu::BindGroupEntry { binding: 0, resource: buf.as_entire_binding() }],
                })
            })
            .collect();

        let push_constant_range = wgpu::PushConstantRange {
            stages: wgpu::ShaderStages::VERTEX,
            range: 0..std::mem::size_of::<Mat4>() as u32,
        };

        let static_shader = match static_shader_path {
            Some(path) => ShaderLoader::load_module(device, path)?,
            None => device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("shadow-directional-static-vs"),
                source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(STATIC_SHADOW_SHADER)),
            }),
        };
        let static_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("shadow-directional-static-pipeline-layout"),
            bind_group_layouts: &[&ubo_layout],
            push_constant_ranges: &[push_constant_range],
        });
        let static_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("shadow-directional-static-pipeline"),
            layout: Some(&static_layout),
            vertex: wgpu::VertexState {
                module: &static_shader,
                entry_point: Some("vs_main"),
                buffers: &[static_vertex_layout()],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: None,
            primitive: wgpu::PrimitiveState { topology: wgpu::PrimitiveTopology::TriangleList, cull_mode: None, ..Default::default() },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: depth_format,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::LessEqual,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState {
                    constant: settings.directional_bias_constant as i32,
                    slope_scale: settings.directional_bias_slope,
                    clamp: 0.0,
                },
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        let skeletal_shader = match skeletal_shader_path {
            Some(path) => ShaderLoader::load_module(device, path)?,
            None => device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("shadow-directional-skeletal-vs"),
                source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(SKELETAL_SHADOW_SHADER)),
            }),
        };
        let skeletal_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("shadow-directional-skeletal-pipeline-layout"),
            bind_group_layouts: &[&ubo_layout, bones_layout],
            push_constant_ranges: &[wgpu::PushConstantRange {
                stages: wgpu::ShaderStages::VERTEX,
                range: 0..std::mem::size_of::<Mat4>() as u32,
            }],
        });
        let skeletal_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("shadow-directional-skeletal-pipeline"),
            layout: Some(&skeletal_layout),
            vertex: wgpu::VertexState {
                module: &skeletal_shader,
                entry_point: Some("vs_main"),
                buffers: &[skeletal_vertex_layout()],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: None,
            primitive: wgpu::PrimitiveState { topology: wgpu::PrimitiveTopology::TriangleList, cull_mode: None, ..Default::default() },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: depth_format,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::LessEqual,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState {
                    constant: settings.directional_bias_constant as i32,
                    slope_scale: settings.directional_bias_slope,
                    clamp: 0.0,
                },
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        Ok(Self {
            enabled: true,
            size: settings.directional_size,
            frustum_size: settings.directional_frustum_size,
            near: settings.directional_near,
            far: settings.directional_far,
            depth_image,
            sampler,
            ubo_layout,
            ubo_buffers,
            ubo_bind_groups,
            static_pipeline,
            skeletal_pipeline,
            light_space_matrix: Mat4::IDENTITY,
        })
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    #[must_use]
    pub fn depth_view(&self) -> &wgpu::TextureView {
        &self.depth_image.view
    }

    #[must_use]
    pub fn sampler(&self) -> &wgpu::Sampler {
        &self.sampler
    }

    #[must_use]
    pub fn ubo_layout(&self) -> &wgpu::BindGroupLayout {
        &self.ubo_layout
    }

    #[must_use]
    pub fn light_space_matrix(&self) -> Mat4 {
        self.light_space_matrix
    }

    /// `calculateLightSpaceMatrix` from the original engine, verbatim:
    /// ortho projection with a `[0,1]` depth remap, view placed
    /// `far/2` behind the camera along the light direction, and a
    /// texel-snap offset baked into the projection's translation column to
    /// stabilize shadows under camera motion.
    #[must_use]
    pub fn calculate_light_space_matrix(&self, light_direction: Vec3, camera_position: Vec3) -> Mat4 {
        light_space_matrix(self.frustum_size, self.near, self.far, self.size, light_direction, camera_position)
    }

    /// Recomputes the light-space matrix from the first directional light in
    /// `lights` (if any) and uploads it to `frame_index`'s UBO slot.
    pub fn update(&mut self, queue: &wgpu::Queue, frame_index: usize, lights: &[Light], camera_position: Vec3) {
        if !self.enabled {
            return;
        }
        let Some(light) = lights.iter().find(|l| l.kind == LightKind::Directional) else {
            return;
        };
        self.light_space_matrix = self.calculate_light_space_matrix(light.position_or_direction, camera_position);
        if let Some(buffer) = self.ubo_buffers.get(frame_index) {
            queue.write_buffer(buffer, 0, bytemuck::bytes_of(&self.light_space_matrix));
        }
    }

    /// Records the depth-only pass: one draw per item, pipeline chosen by
    /// whether the item carries skeletal state, bone resources created and
    /// updated idempotently inline (spec §9).
    pub fn render(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        bones: &mut SkeletalResourceCache,
        frame_index: usize,
        items: &[ShadowDrawItem<'_>],
    ) {
        if !self.enabled {
            return;
        }
        let Some(ubo_bind_group) = self.ubo_bind_groups.get(frame_index) else {
            return;
        };

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("shadow-directional-pass"),
            color_attachments: &[],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: &self.depth_image.view,
                depth_ops: Some(wgpu::Operations { load: wgpu::LoadOp::Clear(1.0), store: wgpu::StoreOp::Store }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        pass.set_viewport(0.0, 0.0, self.size as f32, self.size as f32, 0.0, 1.0);
        pass.set_scissor_rect(0, 0, self.size, self.size);

        let mut bound = BoundPipeline::None;
        for item in items {
            let skeletal = item.skeletal.is_some();
            if skeletal && bound != BoundPipeline::Skeletal {
                pass.set_pipeline(&self.skeletal_pipeline);
                bound = BoundPipeline::Skeletal;
            } else if !skeletal && bound != BoundPipeline::Static {
                pass.set_pipeline(&self.static_pipeline);
                bound = BoundPipeline::Static;
            }
            pass.set_bind_group(0, ubo_bind_group, &[]);

            if let Some(state) = item.skeletal {
                bones.ensure(device, state.instance_id, state.bone_matrices.len());
                if let Err(e) = bones.update(queue, state.instance_id, frame_index, &state.bone_matrices) {
                    log::warn!("shadow directional: bone update failed for instance {}: {e}", state.instance_id);
                    continue;
                }
                let Some(bone_bind_group) = bones.bind_group(state.instance_id, frame_index) else {
                    continue;
                };
                pass.set_bind_group(1, bone_bind_group, &[]);
            }

            pass.set_push_constants(wgpu::ShaderStages::VERTEX, 0, bytemuck::bytes_of(&item.transform));
            item.mesh.bind(&mut pass);
            pass.draw_indexed(0..item.mesh.index_count(), 0, 0..1);
        }
    }
}

/// Free-function core of [`ShadowDirectional::calculate_light_space_matrix`],
/// pulled out so it can be unit-tested without standing up a GPU device.
#[must_use]
fn light_space_matrix(frustum_size: f32, near: f32, far: f32, map_size: u32, light_direction: Vec3, camera_position: Vec3) -> Mat4 {
    let f = frustum_size;
    // glam's `orthographic_rh_gl` maps z to [-1, 1]; the original engine's
    // depth-correction matrix remaps that to Vulkan/wgpu's [0, 1] z range.
    let depth_correction = Mat4::from_cols(
        Vec4::new(1.0, 0.0, 0.0, 0.0),
        Vec4::new(0.0, 1.0, 0.0, 0.0),
        Vec4::new(0.0, 0.0, 0.5, 0.0),
        Vec4::new(0.0, 0.0, 0.5, 1.0),
    );
    let mut projection = depth_correction * Mat4::orthographic_rh_gl(-f, f, -f, f, near, far);

    let light_dir = light_direction.normalize_or_zero();
    let mut up = Vec3::Y;
    if light_dir.dot(up).abs() > 0.99 {
        up = Vec3::Z;
    }
    let light_pos = camera_position - light_dir * (far * 0.5);
    let view = Mat4::look_at_rh(light_pos, camera_position, up);

    let shadow_matrix = projection * view;
    let mut shadow_origin = shadow_matrix * Vec4::new(0.0, 0.0, 0.0, 1.0);
    shadow_origin *= map_size as f32 / 2.0;
    let rounded_origin = shadow_origin.round();
    let mut round_offset = rounded_origin - shadow_origin;
    round_offset *= 2.0 / map_size as f32;
    round_offset.z = 0.0;
    round_offset.w = 0.0;

    let mut cols = projection.to_cols_array_2d();
    cols[3][0] += round_offset.x;
    cols[3][1] += round_offset.y;
    cols[3][2] += round_offset.z;
    cols[3][3] += round_offset.w;
    projection = Mat4::from_cols_array_2d(&cols);

    projection * view
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn up_vector_switches_when_light_is_near_vertical() {
        let m_down = light_space_matrix(50.0, 0.1, 200.0, 4096, Vec3::new(0.0, -1.0, 0.0), Vec3::ZERO);
        assert!(m_down.is_finite());
        let m_angled = light_space_matrix(50.0, 0.1, 200.0, 4096, Vec3::new(0.3, -0.8, 0.2), Vec3::ZERO);
        assert!(m_angled.is_finite());
    }

    #[test]
    fn light_space_matrix_is_finite_for_typical_directions() {
        let m = light_space_matrix(50.0, 0.1, 200.0, 4096, Vec3::new(-0.3, -0.7, -0.2), Vec3::new(5.0, 2.0, -3.0));
        assert!(m.is_finite());
    }

    #[test]
    fn texel_snap_moves_origin_to_an_integer_texel() {
        let size = 4096.0;
        let m = light_space_matrix(50.0, 0.1, 200.0, 4096, Vec3::new(-0.2, -0.9, 0.1), Vec3::new(1.0, 0.0, 2.0));
        let origin = m * Vec4::new(0.0, 0.0, 0.0, 1.0);
        let snapped = origin * (size / 2.0);
        assert!((snapped.x - snapped.x.round()).abs() < 1e-3);
        assert!((snapped.y - snapped.y.round()).abs() < 1e-3);
    }
}
