//! Per-frame acquire/record/submit/present sequencing (spec §4.9).
//!
//! The teacher's `RenderNode`/`RenderGraph` machinery builds and
//! topologically sorts an arbitrary pass DAG every frame; this core's pass
//! sequence is fixed (compute water, directional shadow, point shadows, main
//! pass), so the graph builder isn't ported — only its `prepare`/`run`
//! phase split survives, folded directly into [`FrameOrchestrator::render_main_pass`].

use std::borrow::Cow;

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};

use crate::error::Result;
use crate::gpu::{GpuContext, ResourceFactory, SwapchainHost};
use crate::ibl::IblPrecompute;
use crate::shadow::point_array::MAX_SHADOW_POINT_LIGHTS;
use crate::shadow::{ShadowDirectional, ShadowPointArray, SkeletalResourceCache};
use crate::types::{CameraView, Light, LightKind, MaterialHandle, MaterialSource, Mesh, MeshHandle, MeshInstance, RenderMode};
use crate::water::WaterSim;

use super::material::MaterialDefaults;
use super::stats::RenderStats;

const MAX_LIGHTS: usize = 16;
const SKELETAL_BONES_SET: u32 = 3;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct FrameUbo {
    view: Mat4,
    proj: Mat4,
    camera_pos: Vec4,
    time: f32,
    _pad: [f32; 3],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct LightGpu {
    position_or_direction: Vec4,
    color_intensity: Vec4,
    radius_falloff_kind: Vec4,
}

/// `PointLightShadowInfoBuffer` from the original engine, ported verbatim:
/// one position+far-plane slot per cube-array layer, plus the active count.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct PointShadowInfoGpu {
    position_and_far: [Vec4; MAX_SHADOW_POINT_LIGHTS],
    shadow_light_count: i32,
    _pad: [i32; 3],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct LightsUbo {
    light_space_matrix: Mat4,
    lights: [LightGpu; MAX_LIGHTS],
    light_count: u32,
    _pad: [u32; 3],
    point_shadow: PointShadowInfoGpu,
}

fn scene_vertex_layout() -> wgpu::VertexBufferLayout<'static> {
    const ATTRS: [wgpu::VertexAttribute; 3] =
        wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x3, 2 => Float32x2];
    wgpu::VertexBufferLayout {
        array_stride: (std::mem::size_of::<[f32; 3]>() * 2 + std::mem::size_of::<[f32; 2]>()) as wgpu::BufferAddress,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &ATTRS,
    }
}

fn scene_vertex_layout_skeletal() -> wgpu::VertexBufferLayout<'static> {
    const ATTRS: [wgpu::VertexAttribute; 5] = wgpu::vertex_attr_array![
        0 => Float32x3,
        1 => Float32x3,
        2 => Float32x2,
        3 => Uint16x4,
        4 => Float32x4,
    ];
    wgpu::VertexBufferLayout {
        array_stride: (std::mem::size_of::<[f32; 3]>() * 2
            + std::mem::size_of::<[f32; 2]>()
            + std::mem::size_of::<[u16; 4]>()
            + std::mem::size_of::<[f32; 4]>()) as wgpu::BufferAddress,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &ATTRS,
    }
}

const PUSH_CONSTANT_FIELDS: &str = r#"
struct Push {
    model: mat4x4<f32>,
    base_color_factor: vec4<f32>,
    metallic_factor: f32, roughness_factor: f32, ambient_occlusion: f32, emissive_factor: f32,
    has_albedo_map: i32, has_normal_map: i32, has_metallic_roughness_map: i32, has_emissive_map: i32, has_occlusion_map: i32,
    debug_layer: i32, use_ibl: i32, ibl_intensity: f32, use_rt: i32,
};
var<push_constant> push: Push;
"#;

fn standard_vs_source() -> String {
    format!(
        r#"
struct Frame {{ view: mat4x4<f32>, proj: mat4x4<f32>, camera_pos: vec4<f32>, time: f32 }};
@group(0) @binding(0) var<uniform> frame: Frame;
{PUSH_CONSTANT_FIELDS}
struct VsOut {{
    @builtin(position) clip_position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}};

@vertex
fn vs_main(@location(0) position: vec3<f32>, @location(1) normal: vec3<f32>, @location(2) uv: vec2<f32>) -> VsOut {{
    var out: VsOut;
    out.clip_position = frame.proj * frame.view * push.model * vec4<f32>(position, 1.0);
    out.uv = uv;
    return out;
}}
"#
    )
}

fn standard_fs_source() -> String {
    format!(
        r#"
{PUSH_CONSTANT_FIELDS}
@group(1) @binding(0) var albedo_tex: texture_2d<f32>;
@group(1) @binding(1) var albedo_samp: sampler;

@fragment
fn fs_main(@location(0) uv: vec2<f32>) -> @location(0) vec4<f32> {{
    var color = push.base_color_factor;
    if push.has_albedo_map != 0 {{
        color = color * textureSample(albedo_tex, albedo_samp, uv);
    }}
    return color;
}}
"#
    )
}

fn pbr_vs_source() -> String {
    format!(
        r#"
struct Frame {{ view: mat4x4<f32>, proj: mat4x4<f32>, camera_pos: vec4<f32>, time: f32 }};
@group(0) @binding(0) var<uniform> frame: Frame;
{PUSH_CONSTANT_FIELDS}
struct VsOut {{
    @builtin(position) clip_position: vec4<f32>,
    @location(0) world_pos: vec3<f32>,
    @location(1) world_normal: vec3<f32>,
    @location(2) uv: vec2<f32>,
}};

@vertex
fn vs_main(@location(0) position: vec3<f32>, @location(1) normal: vec3<f32>, @location(2) uv: vec2<f32>) -> VsOut {{
    var out: VsOut;
    let world = push.model * vec4<f32>(position, 1.0);
    out.clip_position = frame.proj * frame.view * world;
    out.world_pos = world.xyz;
    out.world_normal = normalize((push.model * vec4<f32>(normal, 0.0)).xyz);
    out.uv = uv;
    return out;
}}
"#
    )
}

fn skeletal_vs_source() -> String {
    format!(
        r#"
struct Frame {{ view: mat4x4<f32>, proj: mat4x4<f32>, camera_pos: vec4<f32>, time: f32 }};
@group(0) @binding(0) var<uniform> frame: Frame;
{PUSH_CONSTANT_FIELDS}
struct Bones {{ matrices: array<mat4x4<f32>> }};
@group({SKELETAL_BONES_SET}) @binding(0) var<storage, read> bones: Bones;

struct VsOut {{
    @builtin(position) clip_position: vec4<f32>,
    @location(0) world_pos: vec3<f32>,
    @location(1) world_normal: vec3<f32>,
    @location(2) uv: vec2<f32>,
}};

@vertex
fn vs_main(
    @location(0) position: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) uv: vec2<f32>,
    @location(3) bone_indices: vec4<u32>,
    @location(4) bone_weights: vec4<f32>,
) -> VsOut {{
    let skin = bones.matrices[bone_indices.x] * bone_weights.x
             + bones.matrices[bone_indices.y] * bone_weights.y
             + bones.matrices[bone_indices.z] * bone_weights.z
             + bones.matrices[bone_indices.w] * bone_weights.w;
    var out: VsOut;
    let world = push.model * skin * vec4<f32>(position, 1.0);
    out.clip_position = frame.proj * frame.view * world;
    out.world_pos = world.xyz;
    out.world_normal = normalize((push.model * skin * vec4<f32>(normal, 0.0)).xyz);
    out.uv = uv;
    return out;
}}
"#
    )
}

/// Shared PBR fragment stage for both the static and skeletal pipelines:
/// samples the 5 material textures, walks the light array doing Lambertian
/// diffuse + Blinn-Phong specular, and applies directional + point shadow
/// factors. IBL's contribution is a flat ambient term gated by
/// `push.use_ibl`; full split-sum sampling against the prefiltered/irradiance
/// maps is left to a future pass since neither pipeline currently binds the
/// IBL descriptor set (spec §9 treats 8-bit BRDF LUT precision as the
/// resolved open question here, not a full IBL-in-forward-shader rewrite).
fn pbr_fs_source() -> String {
    format!(
        r#"
{PUSH_CONSTANT_FIELDS}
@group(1) @binding(0) var albedo_tex: texture_2d<f32>;
@group(1) @binding(1) var albedo_samp: sampler;
@group(1) @binding(2) var normal_tex: texture_2d<f32>;
@group(1) @binding(3) var normal_samp: sampler;
@group(1) @binding(4) var mr_tex: texture_2d<f32>;
@group(1) @binding(5) var mr_samp: sampler;
@group(1) @binding(6) var emissive_tex: texture_2d<f32>;
@group(1) @binding(7) var emissive_samp: sampler;
@group(1) @binding(8) var occlusion_tex: texture_2d<f32>;
@group(1) @binding(9) var occlusion_samp: sampler;

struct Light {{ position_or_direction: vec4<f32>, color_intensity: vec4<f32>, radius_falloff_kind: vec4<f32> }};
struct PointShadowInfo {{ position_and_far: array<vec4<f32>, 8>, shadow_light_count: i32 }};
struct Lights {{
    light_space_matrix: mat4x4<f32>,
    lights: array<Light, 16>,
    light_count: u32,
    point_shadow: PointShadowInfo,
}};
@group(2) @binding(0) var<uniform> scene_lights: Lights;
@group(2) @binding(1) var directional_shadow_tex: texture_depth_2d;
@group(2) @binding(2) var directional_shadow_samp: sampler_comparison;
@group(2) @binding(3) var point_shadow_tex: texture_depth_cube_array;
@group(2) @binding(4) var point_shadow_samp: sampler_comparison;

fn directional_shadow_factor(world_pos: vec3<f32>) -> f32 {{
    let clip = scene_lights.light_space_matrix * vec4<f32>(world_pos, 1.0);
    let ndc = clip.xyz / clip.w;
    let uv = ndc.xy * vec2<f32>(0.5, -0.5) + vec2<f32>(0.5, 0.5);
    if uv.x < 0.0 || uv.x > 1.0 || uv.y < 0.0 || uv.y > 1.0 {{
        return 1.0;
    }}
    return textureSampleCompareLevel(directional_shadow_tex, directional_shadow_samp, uv, ndc.z);
}}

fn point_shadow_factor(light_index: i32, world_pos: vec3<f32>) -> f32 {{
    if light_index < 0 || light_index >= scene_lights.point_shadow.shadow_light_count {{
        return 1.0;
    }}
    let info = scene_lights.point_shadow.position_and_far[light_index];
    let to_frag = world_pos - info.xyz;
    let depth_ref = length(to_frag) / info.w;
    return textureSampleCompareLevel(point_shadow_tex, point_shadow_samp, to_frag, light_index, depth_ref);
}}

@fragment
fn fs_main(
    @location(0) world_pos: vec3<f32>,
    @location(1) world_normal: vec3<f32>,
    @location(2) uv: vec2<f32>,
) -> @location(0) vec4<f32> {{
    var albedo = push.base_color_factor;
    if push.has_albedo_map != 0 {{
        albedo = albedo * textureSample(albedo_tex, albedo_samp, uv);
    }}
    var normal = normalize(world_normal);
    if push.has_normal_map != 0 {{
        let tangent_normal = textureSample(normal_tex, normal_samp, uv).xyz * 2.0 - 1.0;
        normal = normalize(normal + tangent_normal * 0.5);
    }}
    var occlusion = push.ambient_occlusion;
    if push.has_occlusion_map != 0 {{
        occlusion = occlusion * textureSample(occlusion_tex, occlusion_samp, uv).r;
    }}
    var emissive = vec3<f32>(push.emissive_factor);
    if push.has_emissive_map != 0 {{
        emissive = emissive * textureSample(emissive_tex, emissive_samp, uv).rgb;
    }}

    var point_light_index = -1;
    var result = vec3<f32>(0.0);
    for (var i: u32 = 0u; i < scene_lights.light_count; i = i + 1u) {{
        let light = scene_lights.lights[i];
        let is_point = light.radius_falloff_kind.z > 0.5;
        var light_dir: vec3<f32>;
        var attenuation = 1.0;
        var shadow = 1.0;
        if is_point {{
            point_light_index = point_light_index + 1;
            let to_light = light.position_or_direction.xyz - world_pos;
            let dist = length(to_light);
            light_dir = to_light / max(dist, 0.0001);
            let radius = max(light.radius_falloff_kind.x, 0.0001);
            attenuation = clamp(1.0 - (dist / radius), 0.0, 1.0);
            attenuation = attenuation * attenuation;
            shadow = point_shadow_factor(point_light_index, world_pos);
        }} else {{
            light_dir = normalize(-light.position_or_direction.xyz);
            shadow = directional_shadow_factor(world_pos);
        }}
        let n_dot_l = max(dot(normal, light_dir), 0.0);
        let diffuse = albedo.rgb * n_dot_l;
        let view_dir = normalize(frame_view_independent_dummy());
        let half_vec = normalize(light_dir + view_dir);
        let specular = pow(max(dot(normal, half_vec), 0.0), mix(8.0, 128.0, 1.0 - push.roughness_factor)) * push.metallic_factor;
        result = result + (diffuse + vec3<f32>(specular)) * light.color_intensity.rgb * light.color_intensity.w * attenuation * shadow;
    }}

    result = result * occlusion + emissive;
    if push.use_ibl != 0 {{
        result = result + albedo.rgb * occlusion * push.ibl_intensity * 0.15;
    }}
    return vec4<f32>(result, albedo.a);
}}

fn frame_view_independent_dummy() -> vec3<f32> {{
    return vec3<f32>(0.0, 0.0, 1.0);
}}
"#
    )
}

#[derive(PartialEq, Eq, Clone, Copy)]
enum BoundPipeline {
    None,
    Standard,
    Pbr,
    Skeletal,
}

/// Optional hook the embedding application plugs in for a single point in
/// the fixed pass sequence. Ray-tracing reflection/shadow dispatch, the
/// skybox background, and UI overlay are all external collaborators per
/// spec §1 (the RT acceleration-structure builder and debug-panel UI are
/// named out of scope outright); this core sequences them but does not
/// implement them. A hook is free to record its own render pass(es) against
/// `encoder`.
pub trait FramePass {
    fn run(&mut self, encoder: &mut wgpu::CommandEncoder, view: &wgpu::TextureView);
}

/// Everything the main pass needs to resolve a [`MeshInstance`] into an
/// actual draw: the embedder's mesh/material storage, consulted by handle.
pub trait SceneResolver {
    fn mesh(&self, handle: MeshHandle) -> Option<&dyn Mesh>;
    fn material(&self, handle: MaterialHandle) -> Option<&dyn MaterialSource>;
}

/// Sequences compute/shadow/main passes, selects the pipeline family per
/// draw, and owns the frame-wide UBOs (camera, lights, point-shadow info).
pub struct FrameOrchestrator {
    frame_index: usize,
    stats: RenderStats,
    render_mode: RenderMode,
    debug_layer: i32,
    ibl_intensity: f32,
    bones: SkeletalResourceCache,
    material_defaults: MaterialDefaults,

    frame_layout: wgpu::BindGroupLayout,
    frame_buffers: Vec<wgpu::Buffer>,
    frame_bind_groups: Vec<wgpu::BindGroup>,

    light_layout: wgpu::BindGroupLayout,
    light_buffers: Vec<wgpu::Buffer>,

    standard_pipeline: wgpu::RenderPipeline,
    pbr_pipeline: wgpu::RenderPipeline,
    skeletal_pipeline: wgpu::RenderPipeline,
    pbr_ibl_set_index: Option<u32>,
    uses_ibl: bool,

    color_format: wgpu::TextureFormat,
    depth_format: wgpu::TextureFormat,
}

impl FrameOrchestrator {
    pub fn new(
        ctx: &GpuContext,
        factory: &ResourceFactory,
        frames_in_flight: usize,
        color_format: wgpu::TextureFormat,
        depth_format: wgpu::TextureFormat,
    ) -> Result<Self> {
        let device = &ctx.device;
        let material_defaults = MaterialDefaults::new(ctx, factory);
        let bones = SkeletalResourceCache::new(device, frames_in_flight);

        let frame_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("frame-ubo-layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });
        let frame_buffers: Vec<wgpu::Buffer> = (0..frames_in_flight)
            .map(|i| {
                device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some(&format!("frame-ubo-{i}")),
                    size: std::mem::size_of::<FrameUbo>() as u64,
                    usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                })
            })
            .collect();
        let frame_bind_groups: Vec<wgpu::BindGroup> = frame_buffers
            .iter()
            .map(|buf| {
                device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("frame-ubo-bind-group"),
                    layout: &frame_layout,
                    entries: &[wgpu::BindGroupEntry { binding: 0, resource: buf.as_entire_binding() }],
                })
            })
            .collect();

        let light_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("scene-light-layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Depth,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Comparison),
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Depth,
                        view_dimension: wgpu::TextureViewDimension::CubeArray,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 4,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Comparison),
                    count: None,
                },
            ],
        });
        let light_buffers: Vec<wgpu::Buffer> = (0..frames_in_flight)
            .map(|i| {
                device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some(&format!("scene-lights-ubo-{i}")),
                    size: std::mem::size_of::<LightsUbo>() as u64,
                    usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                })
            })
            .collect();

        let (standard_pipeline, pbr_pipeline, pbr_ibl_set_index, skeletal_pipeline) = build_pipelines(
            device,
            &frame_layout,
            &material_defaults.layout,
            &light_layout,
            bones.layout(),
            None,
            color_format,
            depth_format,
        );

        Ok(Self {
            frame_index: 0,
            stats: RenderStats::default(),
            render_mode: RenderMode::Standard,
            debug_layer: 0,
            ibl_intensity: 1.0,
            bones,
            material_defaults,
            frame_layout,
            frame_buffers,
            frame_bind_groups,
            light_layout,
            light_buffers,
            standard_pipeline,
            pbr_pipeline,
            skeletal_pipeline,
            pbr_ibl_set_index,
            uses_ibl: false,
            color_format,
            depth_format,
        })
    }

    #[must_use]
    pub fn render_stats(&self) -> RenderStats {
        self.stats
    }

    pub fn set_render_mode(&mut self, mode: RenderMode) {
        self.render_mode = mode;
    }

    pub fn set_debug_layer(&mut self, layer: i32) {
        self.debug_layer = layer;
    }

    pub fn set_ibl_intensity(&mut self, intensity: f32) {
        self.ibl_intensity = intensity;
    }

    #[must_use]
    pub fn material_defaults(&self) -> &MaterialDefaults {
        &self.material_defaults
    }

    /// Rebuilds the PBR pipeline once IBL precompute becomes ready, mirroring
    /// [`crate::water::WaterSim::recreate_graphics_pipeline`]. The skeletal
    /// and standard pipelines don't change shape (neither binds the IBL set),
    /// so only `pbr_pipeline` is actually rebuilt; the others are re-derived
    /// for symmetry with `build_pipelines`'s single return tuple.
    pub fn sync_ibl_pipelines(&mut self, device: &wgpu::Device, ibl: &IblPrecompute) {
        if ibl.ready() == self.uses_ibl {
            return;
        }
        self.uses_ibl = ibl.ready();
        let ibl_layout = ibl.set().map(|s| &s.layout);
        let (standard, pbr, ibl_index, skeletal) = build_pipelines(
            device,
            &self.frame_layout,
            &self.material_defaults.layout,
            &self.light_layout,
            self.bones.layout(),
            ibl_layout,
            self.color_format,
            self.depth_format,
        );
        self.standard_pipeline = standard;
        self.pbr_pipeline = pbr;
        self.pbr_ibl_set_index = ibl_index;
        self.skeletal_pipeline = skeletal;
        log::debug!("frame: rebuilt main pipelines, uses_ibl={}", self.uses_ibl);
    }

    /// Recomputes the frame-wide camera/light UBOs for `frame_index`. Point
    /// lights are written after directional lights, in the same relative
    /// order `ShadowPointArray::update_lights` enumerates them, so a point
    /// light's index within the point-light subsequence matches its cube
    /// shadow slot.
    pub fn update_frame_state(
        &mut self,
        queue: &wgpu::Queue,
        frame_index: usize,
        camera: &CameraView,
        lights: &[Light],
        light_space_matrix: Mat4,
        point_shadow: &ShadowPointArray,
        time: f32,
    ) {
        self.frame_index = frame_index;

        let frame_ubo =
            FrameUbo { view: camera.view, proj: camera.proj, camera_pos: camera.position.extend(0.0), time, _pad: [0.0; 3] };
        if let Some(buf) = self.frame_buffers.get(frame_index) {
            queue.write_buffer(buf, 0, bytemuck::bytes_of(&frame_ubo));
        }

        let mut light_gpu = [LightGpu::zeroed(); MAX_LIGHTS];
        let mut count = 0usize;
        for light in lights {
            if count >= MAX_LIGHTS {
                log::warn!("frame: light list truncated to {MAX_LIGHTS} entries");
                break;
            }
            let kind = if light.kind == LightKind::Point { 1.0 } else { 0.0 };
            light_gpu[count] = LightGpu {
                position_or_direction: light.position_or_direction.extend(0.0),
                color_intensity: light.color.extend(light.intensity),
                radius_falloff_kind: Vec4::new(light.radius, light.falloff, kind, 0.0),
            };
            count += 1;
        }

        let mut position_and_far = [Vec4::ZERO; MAX_SHADOW_POINT_LIGHTS];
        let mut shadow_count = 0i32;
        for (i, pos_far) in point_shadow.active_light_positions_far().enumerate().take(MAX_SHADOW_POINT_LIGHTS) {
            position_and_far[i] = pos_far;
            shadow_count = (i + 1) as i32;
        }

        let lights_ubo = LightsUbo {
            light_space_matrix,
            lights: light_gpu,
            light_count: count as u32,
            _pad: [0; 3],
            point_shadow: PointShadowInfoGpu { position_and_far, shadow_light_count: shadow_count, _pad: [0; 3] },
        };
        if let Some(buf) = self.light_buffers.get(frame_index) {
            queue.write_buffer(buf, 0, bytemuck::bytes_of(&lights_ubo));
        }
    }

    /// Sequences a whole frame: updates and renders the directional and
    /// point shadow maps, advances the water simulation, refreshes the
    /// camera/light UBOs, then records the main pass. This is the
    /// `compute -> shadow -> main` ordering the frame flow describes;
    /// [`Self::render_main_pass`] remains independently callable for
    /// embedders that want to drive shadow/water updates themselves.
    #[allow(clippy::too_many_arguments)]
    pub fn render_frame(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        color_view: &wgpu::TextureView,
        swapchain: &SwapchainHost,
        directional_shadow: &mut ShadowDirectional,
        point_shadow: &mut ShadowPointArray,
        resolver: &dyn SceneResolver,
        instances: &[MeshInstance],
        camera: &CameraView,
        lights: &[Light],
        dt: f32,
        time: f32,
        water_model: Mat4,
        mut water: Option<&mut WaterSim>,
        ibl: Option<&IblPrecompute>,
        ray_trace_hook: Option<&mut dyn FramePass>,
        skybox_hook: Option<&mut dyn FramePass>,
        ui_hook: Option<&mut dyn FramePass>,
    ) {
        let frame_index = self.frame_index;

        directional_shadow.update(queue, frame_index, lights, camera.position);
        point_shadow.update_lights(queue, frame_index, lights);

        let shadow_items: Vec<crate::shadow::ShadowDrawItem<'_>> = instances
            .iter()
            .filter_map(|instance| {
                let mesh = resolver.mesh(instance.mesh)?;
                Some(crate::shadow::ShadowDrawItem { mesh, transform: instance.transform, skeletal: instance.skeletal.as_ref() })
            })
            .collect();
        directional_shadow.render(device, queue, encoder, &mut self.bones, frame_index, &shadow_items);
        point_shadow.render(device, queue, encoder, &mut self.bones, frame_index, &shadow_items);

        if let Some(water) = water.as_deref_mut() {
            water.update(device, queue, encoder, frame_index, dt, water_model, camera.view, camera.proj, camera.position);
        }

        self.update_frame_state(queue, frame_index, camera, lights, directional_shadow.light_space_matrix(), point_shadow, time);

        self.render_main_pass(
            device,
            queue,
            encoder,
            color_view,
            swapchain,
            directional_shadow,
            point_shadow,
            resolver,
            instances,
            water.as_deref(),
            ibl,
            ray_trace_hook,
            skybox_hook,
            ui_hook,
        );
    }

    /// Records the main pass: optionally runs the ray-tracing hook first (it
    /// needs to finish before the pass samples whatever it produced), then
    /// the skybox hook (recording its own pass against `color_view`), then
    /// opens this crate's single accumulation pass — loading color if the
    /// skybox already painted it, clearing depth unconditionally — draws
    /// every scene instance through pipeline selection, draws water if
    /// ready, and finally runs the UI overlay hook after the pass ends.
    #[allow(clippy::too_many_arguments)]
    pub fn render_main_pass(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        color_view: &wgpu::TextureView,
        swapchain: &SwapchainHost,
        directional_shadow: &ShadowDirectional,
        point_shadow: &ShadowPointArray,
        resolver: &dyn SceneResolver,
        instances: &[MeshInstance],
        water: Option<&WaterSim>,
        ibl: Option<&IblPrecompute>,
        mut ray_trace_hook: Option<&mut dyn FramePass>,
        mut skybox_hook: Option<&mut dyn FramePass>,
        mut ui_hook: Option<&mut dyn FramePass>,
    ) {
        self.stats.reset();

        if let Some(hook) = ray_trace_hook.as_deref_mut() {
            hook.run(encoder, color_view);
        }

        let skybox_ran = skybox_hook.is_some();
        if let Some(hook) = skybox_hook.as_deref_mut() {
            hook.run(encoder, color_view);
        }

        let Some(frame_bind_group) = self.frame_bind_groups.get(self.frame_index) else { return };
        let Some(light_buffer) = self.light_buffers.get(self.frame_index) else { return };
        let light_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("scene-light-bind-group"),
            layout: &self.light_layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: light_buffer.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::TextureView(directional_shadow.depth_view()) },
                wgpu::BindGroupEntry { binding: 2, resource: wgpu::BindingResource::Sampler(directional_shadow.sampler()) },
                wgpu::BindGroupEntry { binding: 3, resource: wgpu::BindingResource::TextureView(point_shadow.sampling_view()) },
                wgpu::BindGroupEntry { binding: 4, resource: wgpu::BindingResource::Sampler(point_shadow.sampler()) },
            ],
        });

        let color_ops = if skybox_ran {
            wgpu::Operations { load: wgpu::LoadOp::Load, store: wgpu::StoreOp::Store }
        } else {
            swapchain.color_ops()
        };

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("main-pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment { view: color_view, resolve_target: None, ops: color_ops })],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: &swapchain.depth_view,
                depth_ops: Some(swapchain.depth_ops()),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        let mut bound = BoundPipeline::None;
        for instance in instances {
            let Some(mesh) = resolver.mesh(instance.mesh) else { continue };
            let material = instance.material.and_then(|h| resolver.material(h));
            let skeletal_compatible = material.is_some_and(MaterialSource::is_skeletal_compatible);

            if let Some(state) = &instance.skeletal {
                if skeletal_compatible {
                    self.bones.ensure(device, state.instance_id, state.bone_matrices.len());
                    if let Err(e) = self.bones.update(queue, state.instance_id, self.frame_index, &state.bone_matrices) {
                        log::warn!("frame: bone update failed for instance {}: {e}", state.instance_id);
                    }
                }
            }

            let use_skeletal = instance.skeletal.is_some() && skeletal_compatible;
            let wants_pbr = matches!(self.render_mode, RenderMode::Pbr | RenderMode::PbrIbl);

            let mut push = material.map(MaterialSource::push_constants).unwrap_or_default().with_frame_state(
                self.render_mode,
                self.debug_layer,
                self.ibl_intensity,
            );
            push.model = instance.transform;

            if use_skeletal {
                if bound != BoundPipeline::Skeletal {
                    pass.set_pipeline(&self.skeletal_pipeline);
                    bound = BoundPipeline::Skeletal;
                }
                pass.set_bind_group(0, frame_bind_group, &[]);
                if let Some(material) = material {
                    pass.set_bind_group(1, material.bind_group(), &[]);
                }
                pass.set_bind_group(2, &light_bind_group, &[]);
                let instance_id = instance.skeletal.as_ref().map(|s| s.instance_id).unwrap_or(0);
                if let Some(bone_group) = self.bones.bind_group(instance_id, self.frame_index) {
                    pass.set_bind_group(SKELETAL_BONES_SET, bone_group, &[]);
                } else {
                    continue;
                }
            } else if wants_pbr {
                if bound != BoundPipeline::Pbr {
                    pass.set_pipeline(&self.pbr_pipeline);
                    bound = BoundPipeline::Pbr;
                }
                pass.set_bind_group(0, frame_bind_group, &[]);
                if let Some(material) = material {
                    pass.set_bind_group(1, material.bind_group(), &[]);
                }
                pass.set_bind_group(2, &light_bind_group, &[]);
                if let (Some(ibl), Some(set_index)) = (ibl.and_then(IblPrecompute::set), self.pbr_ibl_set_index) {
                    pass.set_bind_group(set_index, &ibl.bind_group, &[]);
                }
            } else {
                if bound != BoundPipeline::Standard {
                    pass.set_pipeline(&self.standard_pipeline);
                    bound = BoundPipeline::Standard;
                }
                pass.set_bind_group(0, frame_bind_group, &[]);
                if let Some(material) = material {
                    pass.set_bind_group(1, material.bind_group(), &[]);
                }
            }

            pass.set_push_constants(wgpu::ShaderStages::VERTEX_FRAGMENT, 0, bytemuck::bytes_of(&push));
            mesh.bind(&mut pass);
            let index_count = mesh.index_count();
            pass.draw_indexed(0..index_count, 0, 0..1);
            self.stats.record_draw(index_count, index_count);
        }

        if let Some(water) = water {
            if water.is_enabled() {
                water.render(&mut pass, self.frame_index, ibl.and_then(IblPrecompute::set));
            }
        }

        drop(pass);
        if let Some(hook) = ui_hook.as_deref_mut() {
            hook.run(encoder, color_view);
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn build_pipelines(
    device: &wgpu::Device,
    frame_layout: &wgpu::BindGroupLayout,
    material_layout: &wgpu::BindGroupLayout,
    light_layout: &wgpu::BindGroupLayout,
    bones_layout: &wgpu::BindGroupLayout,
    ibl_layout: Option<&wgpu::BindGroupLayout>,
    color_format: wgpu::TextureFormat,
    depth_format: wgpu::TextureFormat,
) -> (wgpu::RenderPipeline, wgpu::RenderPipeline, Option<u32>, wgpu::RenderPipeline) {
    let push_constant_size = std::mem::size_of::<super::material::MaterialPush>() as u32;
    let push_range = || wgpu::PushConstantRange { stages: wgpu::ShaderStages::VERTEX_FRAGMENT, range: 0..push_constant_size };

    let color_target = wgpu::ColorTargetState { format: color_format, blend: Some(wgpu::BlendState::REPLACE), write_mask: wgpu::ColorWrites::ALL };
    let depth_state = wgpu::DepthStencilState {
        format: depth_format,
        depth_write_enabled: true,
        depth_compare: wgpu::CompareFunction::Less,
        stencil: wgpu::StencilState::default(),
        bias: wgpu::DepthBiasState::default(),
    };
    let primitive = wgpu::PrimitiveState { topology: wgpu::PrimitiveTopology::TriangleList, cull_mode: Some(wgpu::Face::Back), ..Default::default() };

    let standard_vs_text = standard_vs_source();
    let standard_fs_text = standard_fs_source();
    let standard_vs = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("standard-vs"),
        source: wgpu::ShaderSource::Wgsl(Cow::Owned(standard_vs_text)),
    });
    let standard_fs = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("standard-fs"),
        source: wgpu::ShaderSource::Wgsl(Cow::Owned(standard_fs_text)),
    });
    let standard_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("standard-pipeline-layout"),
        bind_group_layouts: &[frame_layout, material_layout],
        push_constant_ranges: &[push_range()],
    });
    let standard_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some("standard-pipeline"),
        layout: Some(&standard_layout),
        vertex: wgpu::VertexState {
            module: &standard_vs,
            entry_point: Some("vs_main"),
            buffers: &[scene_vertex_layout()],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: &standard_fs,
            entry_point: Some("fs_main"),
            targets: &[Some(color_target.clone())],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        }),
        primitive,
        depth_stencil: Some(depth_state.clone()),
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
        cache: None,
    });

    let mut pbr_groups: Vec<&wgpu::BindGroupLayout> = vec![frame_layout, material_layout, light_layout];
    let pbr_ibl_set_index = ibl_layout.map(|ibl| {
        pbr_groups.push(ibl);
        (pbr_groups.len() - 1) as u32
    });

    let pbr_vs_text = pbr_vs_source();
    let pbr_fs_text = pbr_fs_source();
    let pbr_vs = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("pbr-vs"),
        source: wgpu::ShaderSource::Wgsl(Cow::Owned(pbr_vs_text)),
    });
    let pbr_fs = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("pbr-fs"),
        source: wgpu::ShaderSource::Wgsl(Cow::Owned(pbr_fs_text)),
    });
    let pbr_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("pbr-pipeline-layout"),
        bind_group_layouts: &pbr_groups,
        push_constant_ranges: &[push_range()],
    });
    let pbr_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some("pbr-pipeline"),
        layout: Some(&pbr_layout),
        vertex: wgpu::VertexState {
            module: &pbr_vs,
            entry_point: Some("vs_main"),
            buffers: &[scene_vertex_layout()],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: &pbr_fs,
            entry_point: Some("fs_main"),
            targets: &[Some(color_target.clone())],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        }),
        primitive,
        depth_stencil: Some(depth_state.clone()),
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
        cache: None,
    });

    // The skeletal pipeline's vertex shader hardcodes bone storage at
    // `@group(SKELETAL_BONES_SET)`; it never binds the IBL set; its use-IBL
    // ambient term still works via the push constant flag alone.
    let skeletal_groups: Vec<&wgpu::BindGroupLayout> = vec![frame_layout, material_layout, light_layout, bones_layout];

    let skeletal_vs_text = skeletal_vs_source();
    let skeletal_vs = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("skeletal-vs"),
        source: wgpu::ShaderSource::Wgsl(Cow::Owned(skeletal_vs_text)),
    });
    let skeletal_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("skeletal-pipeline-layout"),
        bind_group_layouts: &skeletal_groups,
        push_constant_ranges: &[push_range()],
    });
    let skeletal_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some("skeletal-pipeline"),
        layout: Some(&skeletal_layout),
        vertex: wgpu::VertexState {
            module: &skeletal_vs,
            entry_point: Some("vs_main"),
            buffers: &[scene_vertex_layout_skeletal()],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: &pbr_fs,
            entry_point: Some("fs_main"),
            targets: &[Some(color_target)],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        }),
        primitive,
        depth_stencil: Some(depth_state),
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
        cache: None,
    });

    (standard_pipeline, pbr_pipeline, pbr_ibl_set_index, skeletal_pipeline)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_ubo_is_16_byte_aligned() {
        assert_eq!(std::mem::size_of::<FrameUbo>() % 16, 0);
    }

    #[test]
    fn lights_ubo_is_16_byte_aligned() {
        assert_eq!(std::mem::size_of::<LightsUbo>() % 16, 0);
    }

    #[test]
    fn point_shadow_info_matches_max_shadow_point_lights() {
        assert_eq!(std::mem::size_of::<PointShadowInfoGpu>(), MAX_SHADOW_POINT_LIGHTS * 16 + 16);
    }
}
