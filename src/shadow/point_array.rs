//! Cube-array point-light shadow mapping (spec §4.7).
//!
//! Up to [`MAX_SHADOW_POINT_LIGHTS`] lights, each with its own 6-face cube
//! depth map packed into one `6*MAX` layer cube-array image. Grounded on the
//! original engine's `PointLightShadowSystem::calculateCubeFaceMatrices` /
//! `updateLightMatrices` / `renderLightShadowPass`.

use std::borrow::Cow;

use glam::{Mat4, Vec3, Vec4};

use crate::error::Result;
use crate::gpu::{GpuContext, Image, ImageLayout, ResourceFactory, ViewKind};
use crate::settings::ShadowSettings;
use crate::types::{Light, LightKind, Mesh};

use super::directional::ShadowDrawItem;
use super::skeletal::SkeletalResourceCache;
use super::{align_to, skeletal_vertex_layout, static_vertex_layout};

/// Hard cap on simultaneously shadow-casting point lights, matching the
/// original engine's `#define MAX_SHADOW_POINT_LIGHTS 8` (spec §9: kept as a
/// compile-time const rather than made configurable).
pub const MAX_SHADOW_POINT_LIGHTS: usize = 8;

const FACES_PER_LIGHT: u32 = 6;

const STATIC_SHADOW_SHADER: &str = r#"
struct ShadowUboPoint { view_proj: array<mat4x4<f32>, 6>, light_pos_far: vec4<f32> };
@group(0) @binding(0) var<uniform> shadow: ShadowUboPoint;
struct Push { model: mat4x4<f32>, face: i32 };
var<push_constant> push: Push;

@vertex
fn vs_main(@location(0) position: vec3<f32>) -> @builtin(position) vec4<f32> {
    return shadow.view_proj[push.face] * push.model * vec4<f32>(position, 1.0);
}
"#;

const SKELETAL_SHADOW_SHADER: &str = r#"
struct ShadowUboPoint { view_proj: array<mat4x4<f32>, 6>, light_pos_far: vec4<f32> };
@group(0) @binding(0) var<uniform> shadow: ShadowUboPoint;
struct Push { model: mat4x4<f32>, face: i32 };
var<push_constant> push: Push;
struct Bones { matrices: array<mat4x4<f32>> };
@group(1) @binding(0) var<storage, read> bones: Bones;

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
    return shadow.view_proj[push.face] * push.model * skin * vec4<f32>(position, 1.0);
}
"#;

#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct PointPush {
    model: Mat4,
    face: i32,
    _pad: [i32; 3],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct ShadowUboPoint {
    view_proj: [Mat4; 6],
    light_pos_far: Vec4,
}

#[derive(PartialEq, Eq, Clone, Copy)]
enum BoundPipeline {
    None,
    Static,
    Skeletal,
}

struct ActiveLight {
    position: Vec3,
    far: f32,
}

/// One cube-array depth image holding up to [`MAX_SHADOW_POINT_LIGHTS`]
/// shadow-casting point lights, 6 faces each.
pub struct ShadowPointArray {
    enabled: bool,
    face_size: u32,
    near: f32,
    far: f32,
    depth_image: Image,
    face_views: Vec<wgpu::TextureView>, // len = MAX * 6, index = light*6 + face
    sampler: wgpu::Sampler,
    ubo_layout: wgpu::BindGroupLayout,
    ubo_buffer: wgpu::Buffer,
    ubo_bind_groups: Vec<wgpu::BindGroup>, // one per frame in flight, dynamic-offset
    stride: u32,
    static_pipeline: wgpu::RenderPipeline,
    skeletal_pipeline: wgpu::RenderPipeline,
    active_lights: Vec<ActiveLight>,
}

impl ShadowPointArray {
    pub fn new(
        ctx: &GpuContext,
        factory: &ResourceFactory,
        settings: &ShadowSettings,
        frames_in_flight: usize,
        bones_layout: &wgpu::BindGroupLayout,
    ) -> Result<Self> {
        let device = &ctx.device;
        let depth_format = ctx.find_depth_format();
        let layers = FACES_PER_LIGHT * MAX_SHADOW_POINT_LIGHTS as u32;

        let mut depth_image = factory.create_cube_image(
            device,
            settings.point_face_size,
            1,
            depth_format,
            wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            layers,
        );
        depth_image.set_layout(ImageLayout::DepthAttachment);

        let face_views: Vec<wgpu::TextureView> = (0..layers)
            .map(|layer| {
                factory.create_image_view(&depth_image, ViewKind::D2, 0, 1, layer, 1, wgpu::TextureAspect::DepthOnly)
            })
            .collect();

        let sampler = factory.create_sampler(
            device,
            wgpu::FilterMode::Linear,
            wgpu::FilterMode::Linear,
            wgpu::MipmapFilterMode::Nearest,
            wgpu::AddressMode::ClampToEdge,
            1,
            None,
            Some(wgpu::CompareFunction::LessEqual),
            0.0..1.0,
        );

        let min_alignment = ctx.device.limits().min_uniform_buffer_offset_alignment;
        let stride = align_to(std::mem::size_of::<ShadowUboPoint>() as u32, min_alignment);

        let ubo_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("shadow-point-ubo-layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: wgpu::BufferSize::new(std::mem::size_of::<ShadowUboPoint>() as u64),
                },
                count: None,
            }],
        });

        let ubo_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("shadow-point-ubo"),
            size: (stride as u64) * (MAX_SHADOW_POINT_LIGHTS as u64) * (frames_in_flight as u64),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let ubo_bind_groups: Vec<wgpu::BindGroup> = (0..frames_in_flight)
            .map(|frame| {
                let frame_offset = (stride as u64) * (MAX_SHADOW_POINT_LIGHTS as u64) * (frame as u64);
                device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("shadow-point-ubo-bind-group"),
                    layout: &ubo_layout,
                    entries: &[wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                            buffer: &ubo_buffer,
                            offset: frame_offset,
                            size: wgpu::BufferSize::new(std::mem::size_of::<ShadowUboPoint>() as u64),
                        }),
                    }],
                })
            })
            .collect();

        let push_constant_range = wgpu::PushConstantRange {
            stages: wgpu::ShaderStages::VERTEX,
            range: 0..std::mem::size_of::<PointPush>() as u32,
        };

        let static_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("shadow-point-static-vs"),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(STATIC_SHADOW_SHADER)),
        });
        let static_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("shadow-point-static-pipeline-layout"),
            bind_group_layouts: &[&ubo_layout],
            push_constant_ranges: &[push_constant_range],
        });
        let static_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("shadow-point-static-pipeline"),
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
                    constant: settings.point_bias_constant as i32,
                    slope_scale: settings.point_bias_slope,
                    clamp: 0.0,
                },
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        let skeletal_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("shadow-point-skeletal-vs"),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(SKELETAL_SHADOW_SHADER)),
        });
        let skeletal_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("shadow-point-skeletal-pipeline-layout"),
            bind_group_layouts: &[&ubo_layout, bones_layout],
            push_constant_ranges: &[wgpu::PushConstantRange {
                stages: wgpu::ShaderStages::VERTEX,
                range: 0..std::mem::size_of::<PointPush>() as u32,
            }],
        });
        let skeletal_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("shadow-point-skeletal-pipeline"),
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
                    constant: settings.point_bias_constant as i32,
                    slope_scale: settings.point_bias_slope,
                    clamp: 0.0,
                },
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        Ok(Self {
            enabled: true,
            face_size: settings.point_face_size,
            near: settings.point_near,
            far: settings.point_far,
            depth_image,
            face_views,
            sampler,
            ubo_layout,
            ubo_buffer,
            ubo_bind_groups,
            stride,
            static_pipeline,
            skeletal_pipeline,
            active_lights: Vec::new(),
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
    pub fn sampling_view(&self) -> &wgpu::TextureView {
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
    pub fn active_light_count(&self) -> usize {
        self.active_lights.len()
    }

    /// Position (xyz) and far-plane distance (w) of every currently active
    /// shadow-casting point light, in the same order used for cube-face
    /// matrix upload. Feeds the main pass's `PointLightShadowInfoBuffer`.
    pub fn active_light_positions_far(&self) -> impl Iterator<Item = Vec4> + '_ {
        self.active_lights.iter().map(|l| l.position.extend(l.far))
    }

    /// `calculateCubeFaceMatrices` from the original engine, verbatim: a 90°
    /// perspective projection with a `[0,1]` depth remap, times a per-face
    /// `lookAt` whose up-vector varies by axis (not a single constant
    /// `(0,-1,0)` for every face).
    #[must_use]
    pub fn calculate_cube_face_matrices(&self, light_pos: Vec3, light_far: f32) -> [Mat4; 6] {
        cube_face_matrices(self.near, light_far, light_pos)
    }

    /// Rebuilds the active-light list from the scene's point lights (up to
    /// [`MAX_SHADOW_POINT_LIGHTS`]) and uploads each light's 6 view-proj
    /// matrices + position/far into its dynamic-UBO slot.
    pub fn update_lights(&mut self, queue: &wgpu::Queue, frame_index: usize, lights: &[Light]) {
        if !self.enabled {
            return;
        }
        self.active_lights.clear();
        for light in lights.iter().filter(|l| l.kind == LightKind::Point) {
            if self.active_lights.len() >= MAX_SHADOW_POINT_LIGHTS {
                break;
            }
            let light_far = if light.radius > 0.0 { light.radius } else { self.far };
            self.active_lights.push(ActiveLight { position: light.position_or_direction, far: light_far });
        }

        let frame_base = (self.stride as u64) * (MAX_SHADOW_POINT_LIGHTS as u64) * (frame_index as u64);
        for (i, light) in self.active_lights.iter().enumerate() {
            let view_proj = cube_face_matrices(self.near, light.far, light.position);
            let ubo = ShadowUboPoint { view_proj, light_pos_far: light.position.extend(light.far) };
            let offset = frame_base + (self.stride as u64) * (i as u64);
            queue.write_buffer(&self.ubo_buffer, offset, bytemuck::bytes_of(&ubo));
        }
    }

    /// Renders all 6 faces for every active light. Each face is its own
    /// render pass targeting `face_views[light*6 + face]`; every mesh in
    /// `items` is drawn into every face (point-light shadows have no
    /// per-face culling in this design, matching the original engine).
    pub fn render(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        bones: &mut SkeletalResourceCache,
        frame_index: usize,
        items: &[ShadowDrawItem<'_>],
    ) {
        if !self.enabled || self.active_lights.is_empty() {
            return;
        }
        let Some(ubo_bind_group) = self.ubo_bind_groups.get(frame_index) else {
            return;
        };

        for (light_index, _light) in self.active_lights.iter().enumerate() {
            let dynamic_offset = (self.stride as u32) * (light_index as u32);
            for face in 0..FACES_PER_LIGHT {
                let layer = (light_index as u32) * FACES_PER_LIGHT + face;
                let view = &self.face_views[layer as usize];

                let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("shadow-point-face-pass"),
                    color_attachments: &[],
                    depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                        view,
                        depth_ops: Some(wgpu::Operations { load: wgpu::LoadOp::Clear(1.0), store: wgpu::StoreOp::Store }),
                        stencil_ops: None,
                    }),
                    timestamp_writes: None,
                    occlusion_query_set: None,
                });
                pass.set_viewport(0.0, 0.0, self.face_size as f32, self.face_size as f32, 0.0, 1.0);
                pass.set_scissor_rect(0, 0, self.face_size, self.face_size);

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
                    pass.set_bind_group(0, ubo_bind_group, &[dynamic_offset]);

                    if let Some(state) = item.skeletal {
                        bones.ensure(device, state.instance_id, state.bone_matrices.len());
                        if let Err(e) = bones.update(queue, state.instance_id, frame_index, &state.bone_matrices) {
                            log::warn!("shadow point array: bone update failed for instance {}: {e}", state.instance_id);
                            continue;
                        }
                        let Some(bone_bind_group) = bones.bind_group(state.instance_id, frame_index) else {
                            continue;
                        };
                        pass.set_bind_group(1, bone_bind_group, &[]);
                    }

                    let push = PointPush { model: item.transform, face: face as i32, _pad: [0; 3] };
                    pass.set_push_constants(wgpu::ShaderStages::VERTEX, 0, bytemuck::bytes_of(&push));
                    item.mesh.bind(&mut pass);
                    pass.draw_indexed(0..item.mesh.index_count(), 0, 0..1);
                }
            }
        }
    }
}

/// Free-function core of [`ShadowPointArray::calculate_cube_face_matrices`],
/// testable without a GPU device. Per-face up-vector table matches the
/// original engine exactly: `+Y`/`-Y` use a `z`-axis up since the default
/// `(0,-1,0)` up is degenerate (parallel to the view direction) on those
/// faces.
#[must_use]
fn cube_face_matrices(near: f32, far: f32, light_pos: Vec3) -> [Mat4; 6] {
    let depth_correction = Mat4::from_cols(
        Vec4::new(1.0, 0.0, 0.0, 0.0),
        Vec4::new(0.0, 1.0, 0.0, 0.0),
        Vec4::new(0.0, 0.0, 0.5, 0.0),
        Vec4::new(0.0, 0.0, 0.5, 1.0),
    );
    let projection = depth_correction * Mat4::perspective_rh_gl(90.0_f32.to_radians(), 1.0, near, far);

    let directions_and_ups: [(Vec3, Vec3); 6] = [
        (Vec3::new(1.0, 0.0, 0.0), Vec3::new(0.0, -1.0, 0.0)),
        (Vec3::new(-1.0, 0.0, 0.0), Vec3::new(0.0, -1.0, 0.0)),
        (Vec3::new(0.0, 1.0, 0.0), Vec3::new(0.0, 0.0, 1.0)),
        (Vec3::new(0.0, -1.0, 0.0), Vec3::new(0.0, 0.0, -1.0)),
        (Vec3::new(0.0, 0.0, 1.0), Vec3::new(0.0, -1.0, 0.0)),
        (Vec3::new(0.0, 0.0, -1.0), Vec3::new(0.0, -1.0, 0.0)),
    ];

    let mut matrices = [Mat4::IDENTITY; 6];
    for (i, (dir, up)) in directions_and_ups.into_iter().enumerate() {
        let view = Mat4::look_at_rh(light_pos, light_pos + dir, up);
        matrices[i] = projection * view;
    }
    matrices
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_six_face_matrices_are_finite() {
        let matrices = cube_face_matrices(0.1, 50.0, Vec3::new(1.0, 2.0, 3.0));
        for m in matrices {
            assert!(m.is_finite());
        }
    }

    #[test]
    fn face_matrices_differ_for_each_direction() {
        let matrices = cube_face_matrices(0.1, 50.0, Vec3::ZERO);
        for i in 0..6 {
            for j in (i + 1)..6 {
                assert_ne!(matrices[i].to_cols_array(), matrices[j].to_cols_array());
            }
        }
    }

    #[test]
    fn stride_is_at_least_struct_size_and_aligned() {
        let stride = align_to(std::mem::size_of::<ShadowUboPoint>() as u32, 256);
        assert!(stride >= std::mem::size_of::<ShadowUboPoint>() as u32);
        assert_eq!(stride % 256, 0);
    }
}
