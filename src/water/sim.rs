//! Height-field simulation core: wave propagation, normal/foam derivation,
//! ripple injection, and the blended graphics pass that samples the result.

use std::borrow::Cow;

use glam::{Mat4, Vec3, Vec4};

use crate::error::Result;
use crate::gpu::{GpuContext, Image, ImageLayout, ResourceFactory};
use crate::ibl::IblSet;
use crate::settings::WaterSettings;

const WORKGROUP_SIZE: u32 = 16;
const MAX_RIPPLES: usize = 16;

const WAVE_SHADER: &str = r#"
struct Ripple { xy: vec2<f32>, strength: f32, radius: f32 };
struct Ripples { data: array<Ripple, 16>, count: u32 };
@group(0) @binding(0) var h_prev: texture_storage_2d<r32float, read>;
@group(0) @binding(1) var h_curr: texture_storage_2d<r32float, read>;
@group(0) @binding(2) var h_out: texture_storage_2d<r32float, write>;
@group(0) @binding(3) var<uniform> ripples: Ripples;

struct WavePush { delta_time: f32, wave_speed: f32, damping: f32, grid_size: f32 };
var<push_constant> push: WavePush;

@compute @workgroup_size(16, 16, 1)
fn cs_main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let size = u32(push.grid_size);
    if (gid.x >= size || gid.y >= size) {
        return;
    }
    let center = textureLoad(h_curr, vec2<i32>(gid.xy)).r;

    var neighbor_sum = 0.0;
    let left = vec2<i32>(max(i32(gid.x) - 1, 0), i32(gid.y));
    let right = vec2<i32>(min(i32(gid.x) + 1, i32(size) - 1), i32(gid.y));
    let up = vec2<i32>(i32(gid.x), max(i32(gid.y) - 1, 0));
    let down = vec2<i32>(i32(gid.x), min(i32(gid.y) + 1, i32(size) - 1));
    neighbor_sum = textureLoad(h_curr, left).r + textureLoad(h_curr, right).r
                 + textureLoad(h_curr, up).r + textureLoad(h_curr, down).r;

    let prev = textureLoad(h_prev, vec2<i32>(gid.xy)).r;
    let c2 = push.wave_speed * push.wave_speed;
    var next = 2.0 * center - prev + c2 * (neighbor_sum - 4.0 * center);
    next = next * push.damping;

    let texel = vec2<f32>(f32(gid.x), f32(gid.y)) / push.grid_size;
    for (var i: u32 = 0u; i < ripples.count; i = i + 1u) {
        let r = ripples.data[i];
        let d = distance(texel, r.xy);
        if (d < r.radius) {
            let falloff = 1.0 - (d / r.radius);
            next = next + r.strength * falloff * falloff;
        }
    }

    textureStore(h_out, vec2<i32>(gid.xy), vec4<f32>(next, 0.0, 0.0, 0.0));
}
"#;

const NORMAL_SHADER: &str = r#"
@group(0) @binding(0) var h_out: texture_storage_2d<r32float, read>;
@group(0) @binding(1) var normal_out: texture_storage_2d<rgba8unorm, write>;

struct NormalPush { grid_size: f32, height_scale: f32, texel_size: f32, _pad: f32 };
var<push_constant> push: NormalPush;

@compute @workgroup_size(16, 16, 1)
fn cs_main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let size = u32(push.grid_size);
    if (gid.x >= size || gid.y >= size) {
        return;
    }
    let left = vec2<i32>(max(i32(gid.x) - 1, 0), i32(gid.y));
    let right = vec2<i32>(min(i32(gid.x) + 1, i32(size) - 1), i32(gid.y));
    let up = vec2<i32>(i32(gid.x), max(i32(gid.y) - 1, 0));
    let down = vec2<i32>(i32(gid.x), min(i32(gid.y) + 1, i32(size) - 1));

    let hl = textureLoad(h_out, left).r * push.height_scale;
    let hr = textureLoad(h_out, right).r * push.height_scale;
    let hu = textureLoad(h_out, up).r * push.height_scale;
    let hd = textureLoad(h_out, down).r * push.height_scale;

    let dx = (hr - hl) / (2.0 * push.texel_size);
    let dz = (hd - hu) / (2.0 * push.texel_size);
    let normal = normalize(vec3<f32>(-dx, 1.0, -dz));

    let gradient = sqrt(dx * dx + dz * dz);
    let foam = clamp(gradient, 0.0, 1.0);

    let encoded = normal * 0.5 + vec3<f32>(0.5, 0.5, 0.5);
    textureStore(normal_out, vec2<i32>(gid.xy), vec4<f32>(encoded, foam));
}
"#;

const WATER_VS: &str = r#"
struct WaterUbo {
    model: mat4x4<f32>,
    view: mat4x4<f32>,
    projection: mat4x4<f32>,
    camera_pos: vec4<f32>,
    shallow_color: vec4<f32>,
    deep_color: vec4<f32>,
    time: f32,
    height_scale: f32,
    grid_size: f32,
    fresnel_power: f32,
    reflection_strength: f32,
    refraction_strength: f32,
    specular_power: f32,
};
@group(0) @binding(0) var<uniform> water: WaterUbo;
@group(0) @binding(1) var height_tex: texture_2d<f32>;
@group(0) @binding(2) var height_sampler: sampler;
@group(0) @binding(3) var normal_tex: texture_2d<f32>;
@group(0) @binding(4) var normal_sampler: sampler;

struct VsOut {
    @builtin(position) clip_pos: vec4<f32>,
    @location(0) uv: vec2<f32>,
    @location(1) world_pos: vec3<f32>,
};

@vertex
fn vs_main(@location(0) position: vec2<f32>, @location(1) uv: vec2<f32>) -> VsOut {
    let h = textureSampleLevel(height_tex, height_sampler, uv, 0.0).r * water.height_scale;
    let local = vec4<f32>(position.x, h, position.y, 1.0);
    let world = water.model * local;
    var out: VsOut;
    out.clip_pos = water.projection * water.view * world;
    out.uv = uv;
    out.world_pos = world.xyz;
    return out;
}
"#;

const WATER_FS: &str = r#"
struct WaterUbo {
    model: mat4x4<f32>,
    view: mat4x4<f32>,
    projection: mat4x4<f32>,
    camera_pos: vec4<f32>,
    shallow_color: vec4<f32>,
    deep_color: vec4<f32>,
    time: f32,
    height_scale: f32,
    grid_size: f32,
    fresnel_power: f32,
    reflection_strength: f32,
    refraction_strength: f32,
    specular_power: f32,
};
@group(0) @binding(0) var<uniform> water: WaterUbo;
@group(0) @binding(1) var height_tex: texture_2d<f32>;
@group(0) @binding(2) var height_sampler: sampler;
@group(0) @binding(3) var normal_tex: texture_2d<f32>;
@group(0) @binding(4) var normal_sampler: sampler;

@fragment
fn fs_main(@location(0) uv: vec2<f32>, @location(1) world_pos: vec3<f32>) -> @location(0) vec4<f32> {
    let packed = textureSample(normal_tex, normal_sampler, uv);
    let normal = normalize(packed.rgb * 2.0 - vec3<f32>(1.0, 1.0, 1.0));
    let foam = packed.a;

    let view_dir = normalize(water.camera_pos.xyz - world_pos);
    let fresnel = pow(1.0 - max(dot(normal, view_dir), 0.0), water.fresnel_power);
    let refracted_uv = uv + normal.xz * water.refraction_strength;
    let refracted_h = textureSample(height_tex, height_sampler, refracted_uv).r;
    let depth_tint = clamp(refracted_h * 0.5 + 0.5, 0.0, 1.0);
    var color = mix(water.deep_color.rgb, water.shallow_color.rgb, fresnel * depth_tint);
    color = mix(color, vec3<f32>(1.0, 1.0, 1.0), foam * water.reflection_strength);
    return vec4<f32>(color, 0.85);
}
"#;

#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct WaterUboGpu {
    model: Mat4,
    view: Mat4,
    projection: Mat4,
    camera_pos: Vec4,
    shallow_color: Vec4,
    deep_color: Vec4,
    time: f32,
    height_scale: f32,
    grid_size: f32,
    fresnel_power: f32,
    reflection_strength: f32,
    refraction_strength: f32,
    specular_power: f32,
    _pad: f32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct RippleGpu {
    xy: [f32; 2],
    strength: f32,
    radius: f32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct RipplesGpu {
    data: [RippleGpu; MAX_RIPPLES],
    count: u32,
    _pad: [u32; 3],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct WavePush {
    delta_time: f32,
    wave_speed: f32,
    damping: f32,
    grid_size: f32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct NormalPush {
    grid_size: f32,
    height_scale: f32,
    texel_size: f32,
    _pad: f32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct WaterVertex {
    position: [f32; 2],
    uv: [f32; 2],
}

/// A caller-enqueued disturbance at UV coordinate `(x, y)`; consumed and
/// cleared by the next [`WaterSim::update`] call.
#[derive(Debug, Clone, Copy)]
pub struct RippleRequest {
    pub x: f32,
    pub y: f32,
    pub strength: f32,
    pub radius: f32,
}

fn grid_vertex_layout() -> wgpu::VertexBufferLayout<'static> {
    const ATTRS: [wgpu::VertexAttribute; 2] = wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32x2];
    wgpu::VertexBufferLayout {
        array_stride: std::mem::size_of::<WaterVertex>() as wgpu::BufferAddress,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &ATTRS,
    }
}

/// Builds a flat `mesh_resolution x mesh_resolution` quad grid in `[-0.5,
/// 0.5]` local space, UVs in `[0, 1]`.
fn build_grid_mesh(mesh_resolution: u32) -> (Vec<WaterVertex>, Vec<u32>) {
    let n = mesh_resolution + 1;
    let mut vertices = Vec::with_capacity((n * n) as usize);
    for z in 0..n {
        for x in 0..n {
            let u = x as f32 / mesh_resolution as f32;
            let v = z as f32 / mesh_resolution as f32;
            vertices.push(WaterVertex { position: [u - 0.5, v - 0.5], uv: [u, v] });
        }
    }
    let mut indices = Vec::with_capacity((mesh_resolution * mesh_resolution * 6) as usize);
    for z in 0..mesh_resolution {
        for x in 0..mesh_resolution {
            let i0 = z * n + x;
            let i1 = z * n + x + 1;
            let i2 = (z + 1) * n + x;
            let i3 = (z + 1) * n + x + 1;
            indices.extend_from_slice(&[i0, i2, i1, i1, i2, i3]);
        }
    }
    (vertices, indices)
}

/// One compute pipeline plus its own bind group layout.
struct ComputeStage {
    layout: wgpu::BindGroupLayout,
    pipeline: wgpu::ComputePipeline,
}

/// Triple-buffered height-field water simulation, generalized from the
/// original engine's `WaterSystem` onto wgpu's compute-pass model.
pub struct WaterSim {
    enabled: bool,
    settings: WaterSettings,
    height_images: [Image; 3],
    normal_image: Image,
    height_sampler: wgpu::Sampler,
    normal_sampler: wgpu::Sampler,
    prev: usize,
    curr: usize,
    out: usize,

    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    index_count: u32,

    water_set0_layout: wgpu::BindGroupLayout,
    water_ubo_buffers: Vec<wgpu::Buffer>,
    water_bind_groups: Vec<wgpu::BindGroup>,

    graphics_pipeline: wgpu::RenderPipeline,
    uses_ibl: bool,
    color_format: wgpu::TextureFormat,
    depth_format: wgpu::TextureFormat,

    ripple_buffer: wgpu::Buffer,
    pending_ripples: Vec<RippleRequest>,

    wave_stage: ComputeStage,
    normal_stage: ComputeStage,

    time: f32,
}

impl WaterSim {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ctx: &GpuContext,
        factory: &ResourceFactory,
        settings: &WaterSettings,
        frames_in_flight: usize,
        color_format: wgpu::TextureFormat,
        depth_format: wgpu::TextureFormat,
    ) -> Result<Self> {
        let device = &ctx.device;
        let grid = settings.grid_resolution;

        let height_images: [Image; 3] = std::array::from_fn(|_| {
            let mut img = factory.create_image_2d(
                device,
                grid,
                grid,
                1,
                wgpu::TextureFormat::R32Float,
                wgpu::TextureUsages::STORAGE_BINDING | wgpu::TextureUsages::TEXTURE_BINDING,
            );
            img.set_layout(ImageLayout::General);
            img
        });

        let mut normal_image = factory.create_image_2d(
            device,
            grid,
            grid,
            1,
            wgpu::TextureFormat::Rgba8Unorm,
            wgpu::TextureUsages::STORAGE_BINDING | wgpu::TextureUsages::TEXTURE_BINDING,
        );
        normal_image.set_layout(ImageLayout::General);

        let height_sampler = factory.create_sampler(
            device,
            wgpu::FilterMode::Nearest,
            wgpu::FilterMode::Nearest,
            wgpu::MipmapFilterMode::Nearest,
            wgpu::AddressMode::ClampToEdge,
            1,
            None,
            None,
            0.0..1.0,
        );
        let normal_sampler = factory.create_sampler(
            device,
            wgpu::FilterMode::Linear,
            wgpu::FilterMode::Linear,
            wgpu::MipmapFilterMode::Nearest,
            wgpu::AddressMode::ClampToEdge,
            1,
            None,
            None,
            0.0..1.0,
        );

        let (vertices, indices) = build_grid_mesh(settings.mesh_resolution);
        let vertex_bytes: &[u8] = bytemuck::cast_slice(&vertices);
        let vertex_buffer_res = factory.create_buffer(
            device,
            vertex_bytes.len() as u64,
            wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
        );
        ctx.queue.write_buffer(&vertex_buffer_res.buffer, 0, vertex_bytes);
        let vertex_buffer = vertex_buffer_res.buffer;

        let index_bytes: &[u8] = bytemuck::cast_slice(&indices);
        let index_buffer_res = factory.create_buffer(
            device,
            index_bytes.len() as u64,
            wgpu::BufferUsages::INDEX | wgpu::BufferUsages::COPY_DST,
        );
        ctx.queue.write_buffer(&index_buffer_res.buffer, 0, index_bytes);
        let index_buffer = index_buffer_res.buffer;

        let wave_stage = build_wave_stage(device);
        let normal_stage = build_normal_stage(device);

        let ripple_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("water-ripple-ubo"),
            size: std::mem::size_of::<RipplesGpu>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let water_set0_layout = water_set0_bind_group_layout(device);
        let water_ubo_buffers: Vec<wgpu::Buffer> = (0..frames_in_flight)
            .map(|i| {
                device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some(&format!("water-ubo-{i}")),
                    size: std::mem::size_of::<WaterUboGpu>() as u64,
                    usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                })
            })
            .collect();
        let water_bind_groups: Vec<wgpu::BindGroup> = water_ubo_buffers
            .iter()
            .map(|buf| {
                water_bind_group(device, &water_set0_layout, buf, &height_images[0].view, &height_sampler, &normal_image.view, &normal_sampler)
            })
            .collect();

        let graphics_pipeline = build_graphics_pipeline(device, &water_set0_layout, None, color_format, depth_format);

        Ok(Self {
            enabled: true,
            settings: *settings,
            height_images,
            normal_image,
            height_sampler,
            normal_sampler,
            prev: 0,
            curr: 1,
            out: 2,
            vertex_buffer,
            index_buffer,
            index_count: indices.len() as u32,
            water_set0_layout,
            water_ubo_buffers,
            water_bind_groups,
            graphics_pipeline,
            uses_ibl: false,
            color_format,
            depth_format,
            ripple_buffer,
            pending_ripples: Vec::new(),
            wave_stage,
            normal_stage,
            time: 0.0,
        })
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Enqueues a disturbance; consumed (and the list clamped to
    /// [`MAX_RIPPLES`]) by the next [`WaterSim::update`].
    pub fn push_ripple(&mut self, ripple: RippleRequest) {
        self.pending_ripples.push(ripple);
    }

    #[must_use]
    pub fn normal_image_view(&self) -> &wgpu::TextureView {
        &self.normal_image.view
    }

    /// Rebuilds the graphics pipeline with a second bind-group-layout slot
    /// for the IBL set once it becomes ready. A no-op if `ibl_layout` is
    /// `None` and the pipeline was already built without IBL, or vice versa.
    pub fn recreate_graphics_pipeline(&mut self, device: &wgpu::Device, ibl_layout: Option<&wgpu::BindGroupLayout>) {
        let wants_ibl = ibl_layout.is_some();
        if wants_ibl == self.uses_ibl {
            return;
        }
        self.graphics_pipeline = build_graphics_pipeline(device, &self.water_set0_layout, ibl_layout, self.color_format, self.depth_format);
        self.uses_ibl = wants_ibl;
        log::debug!("WaterSim: rebuilt graphics pipeline, uses_ibl={wants_ibl}");
    }

    /// Advances the simulation by `dt` seconds (clamped to `[0, 1/30]` per
    /// spec §9 to avoid instability from large frame hitches), dispatches
    /// the wave and normal compute passes, and rotates the ping-pong buffer
    /// indices.
    #[allow(clippy::too_many_arguments)]
    pub fn update(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        frame_index: usize,
        dt: f32,
        model: Mat4,
        view: Mat4,
        projection: Mat4,
        camera_pos: Vec3,
    ) {
        if !self.enabled {
            return;
        }
        let dt = dt.clamp(0.0, 1.0 / 30.0);
        self.time += dt;

        self.write_ripple_ubo(queue);

        let grid = self.settings.grid_resolution;
        let workgroups = grid.div_ceil(WORKGROUP_SIZE);

        let prev_view = &self.height_images[self.prev].view;
        let curr_view = &self.height_images[self.curr].view;
        let out_view = &self.height_images[self.out].view;
        let wave_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("water-wave-bind-group"),
            layout: &self.wave_stage.layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: wgpu::BindingResource::TextureView(prev_view) },
                wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::TextureView(curr_view) },
                wgpu::BindGroupEntry { binding: 2, resource: wgpu::BindingResource::TextureView(out_view) },
                wgpu::BindGroupEntry { binding: 3, resource: self.ripple_buffer.as_entire_binding() },
            ],
        });

        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor { label: Some("water-wave-pass"), timestamp_writes: None });
            pass.set_pipeline(&self.wave_stage.pipeline);
            pass.set_bind_group(0, &wave_bind_group, &[]);
            let push = WavePush { delta_time: dt, wave_speed: self.settings.wave_speed, damping: self.settings.damping, grid_size: grid as f32 };
            pass.set_push_constants(0, bytemuck::bytes_of(&push));
            pass.dispatch_workgroups(workgroups, workgroups, 1);
        }
        // wgpu tracks the storage-texture write-then-read hazard between the
        // wave and normal passes automatically; no explicit barrier call is
        // needed the way `vkCmdPipelineBarrier` would be on the Vulkan side.

        let normal_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("water-normal-bind-group"),
            layout: &self.normal_stage.layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: wgpu::BindingResource::TextureView(&self.height_images[self.out].view) },
                wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::TextureView(&self.normal_image.view) },
            ],
        });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor { label: Some("water-normal-pass"), timestamp_writes: None });
            pass.set_pipeline(&self.normal_stage.pipeline);
            pass.set_bind_group(0, &normal_bind_group, &[]);
            let texel_size = 1.0 / grid as f32;
            let push = NormalPush { grid_size: grid as f32, height_scale: self.settings.height_scale, texel_size, _pad: 0.0 };
            pass.set_push_constants(0, bytemuck::bytes_of(&push));
            pass.dispatch_workgroups(workgroups, workgroups, 1);
        }

        let old_prev = self.prev;
        self.prev = self.curr;
        self.curr = self.out;
        self.out = old_prev;

        if let Some(buf) = self.water_ubo_buffers.get(frame_index) {
            let ubo = WaterUboGpu {
                model,
                view,
                projection,
                camera_pos: camera_pos.extend(1.0),
                shallow_color: Vec4::new(self.settings.shallow_color[0], self.settings.shallow_color[1], self.settings.shallow_color[2], 1.0),
                deep_color: Vec4::new(self.settings.deep_color[0], self.settings.deep_color[1], self.settings.deep_color[2], 1.0),
                time: self.time,
                height_scale: self.settings.height_scale,
                grid_size: grid as f32,
                fresnel_power: self.settings.fresnel_power,
                reflection_strength: self.settings.reflection_strength,
                refraction_strength: self.settings.refraction_strength,
                specular_power: self.settings.specular_power,
                _pad: 0.0,
            };
            queue.write_buffer(buf, 0, bytemuck::bytes_of(&ubo));
        }
        if let Some(slot) = self.water_bind_groups.get_mut(frame_index) {
            *slot = water_bind_group(
                device,
                &self.water_set0_layout,
                &self.water_ubo_buffers[frame_index],
                &self.height_images[self.curr].view,
                &self.height_sampler,
                &self.normal_image.view,
                &self.normal_sampler,
            );
        }
    }

    fn write_ripple_ubo(&mut self, queue: &wgpu::Queue) {
        let mut data = [RippleGpu { xy: [0.0, 0.0], strength: 0.0, radius: 0.0 }; MAX_RIPPLES];
        let count = self.pending_ripples.len().min(MAX_RIPPLES);
        for (i, r) in self.pending_ripples.iter().take(count).enumerate() {
            data[i] = RippleGpu { xy: [r.x, r.y], strength: r.strength, radius: r.radius.max(1e-4) };
        }
        if self.pending_ripples.len() > MAX_RIPPLES {
            log::warn!("WaterSim: dropped {} ripples past the {MAX_RIPPLES}-slot limit", self.pending_ripples.len() - MAX_RIPPLES);
        }
        let gpu = RipplesGpu { data, count: count as u32, _pad: [0; 3] };
        queue.write_buffer(&self.ripple_buffer, 0, bytemuck::bytes_of(&gpu));
        self.pending_ripples.clear();
    }

    /// Records the alpha-blended graphics pass. `ibl` is bound as set 1 when
    /// present and the pipeline was rebuilt via
    /// [`WaterSim::recreate_graphics_pipeline`] to expect it.
    pub fn render<'a>(&'a self, pass: &mut wgpu::RenderPass<'a>, frame_index: usize, ibl: Option<&'a IblSet>) {
        if !self.enabled {
            return;
        }
        let Some(bind_group) = self.water_bind_groups.get(frame_index) else {
            return;
        };
        pass.set_pipeline(&self.graphics_pipeline);
        pass.set_bind_group(0, bind_group, &[]);
        if self.uses_ibl {
            if let Some(set) = ibl {
                pass.set_bind_group(1, &set.bind_group, &[]);
            }
        }
        pass.set_vertex_buffer(0, self.vertex_buffer.slice(..));
        pass.set_index_buffer(self.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
        pass.draw_indexed(0..self.index_count, 0, 0..1);
    }
}

fn water_set0_bind_group_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("water-set0-layout"),
        entries: &[
            wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer { ty: wgpu::BufferBindingType::Uniform, has_dynamic_offset: false, min_binding_size: None },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 1,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: false },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 2,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::NonFiltering),
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 3,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 4,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                count: None,
            },
        ],
    })
}

#[allow(clippy::too_many_arguments)]
fn water_bind_group(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    ubo: &wgpu::Buffer,
    height_view: &wgpu::TextureView,
    height_sampler: &wgpu::Sampler,
    normal_view: &wgpu::TextureView,
    normal_sampler: &wgpu::Sampler,
) -> wgpu::BindGroup {
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("water-set0-bind-group"),
        layout,
        entries: &[
            wgpu::BindGroupEntry { binding: 0, resource: ubo.as_entire_binding() },
            wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::TextureView(height_view) },
            wgpu::BindGroupEntry { binding: 2, resource: wgpu::BindingResource::Sampler(height_sampler) },
            wgpu::BindGroupEntry { binding: 3, resource: wgpu::BindingResource::TextureView(normal_view) },
            wgpu::BindGroupEntry { binding: 4, resource: wgpu::BindingResource::Sampler(normal_sampler) },
        ],
    })
}

fn storage_texture_entry(binding: u32, format: wgpu::TextureFormat, access: wgpu::StorageTextureAccess) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::StorageTexture { access, format, view_dimension: wgpu::TextureViewDimension::D2 },
        count: None,
    }
}

fn build_wave_stage(device: &wgpu::Device) -> ComputeStage {
    let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("water-wave-layout"),
        entries: &[
            storage_texture_entry(0, wgpu::TextureFormat::R32Float, wgpu::StorageTextureAccess::ReadOnly),
            storage_texture_entry(1, wgpu::TextureFormat::R32Float, wgpu::StorageTextureAccess::ReadOnly),
            storage_texture_entry(2, wgpu::TextureFormat::R32Float, wgpu::StorageTextureAccess::WriteOnly),
            wgpu::BindGroupLayoutEntry {
                binding: 3,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer { ty: wgpu::BufferBindingType::Uniform, has_dynamic_offset: false, min_binding_size: None },
                count: None,
            },
        ],
    });
    let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("water-wave-shader"),
        source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(WAVE_SHADER)),
    });
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("water-wave-pipeline-layout"),
        bind_group_layouts: &[&layout],
        push_constant_ranges: &[wgpu::PushConstantRange { stages: wgpu::ShaderStages::COMPUTE, range: 0..std::mem::size_of::<WavePush>() as u32 }],
    });
    let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some("water-wave-pipeline"),
        layout: Some(&pipeline_layout),
        module: &shader,
        entry_point: Some("cs_main"),
        compilation_options: wgpu::PipelineCompilationOptions::default(),
        cache: None,
    });
    ComputeStage { layout, pipeline }
}

fn build_normal_stage(device: &wgpu::Device) -> ComputeStage {
    let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("water-normal-layout"),
        entries: &[
            storage_texture_entry(0, wgpu::TextureFormat::R32Float, wgpu::StorageTextureAccess::ReadOnly),
            storage_texture_entry(1, wgpu::TextureFormat::Rgba8Unorm, wgpu::StorageTextureAccess::WriteOnly),
        ],
    });
    let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("water-normal-shader"),
        source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(NORMAL_SHADER)),
    });
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("water-normal-pipeline-layout"),
        bind_group_layouts: &[&layout],
        push_constant_ranges: &[wgpu::PushConstantRange { stages: wgpu::ShaderStages::COMPUTE, range: 0..std::mem::size_of::<NormalPush>() as u32 }],
    });
    let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some("water-normal-pipeline"),
        layout: Some(&pipeline_layout),
        module: &shader,
        entry_point: Some("cs_main"),
        compilation_options: wgpu::PipelineCompilationOptions::default(),
        cache: None,
    });
    ComputeStage { layout, pipeline }
}

fn build_graphics_pipeline(
    device: &wgpu::Device,
    set0_layout: &wgpu::BindGroupLayout,
    ibl_layout: Option<&wgpu::BindGroupLayout>,
    color_format: wgpu::TextureFormat,
    depth_format: wgpu::TextureFormat,
) -> wgpu::RenderPipeline {
    let vs = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("water-vs"),
        source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(WATER_VS)),
    });
    let fs = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("water-fs"),
        source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(WATER_FS)),
    });
    let mut layouts: Vec<&wgpu::BindGroupLayout> = vec![set0_layout];
    if let Some(ibl) = ibl_layout {
        layouts.push(ibl);
    }
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("water-pipeline-layout"),
        bind_group_layouts: &layouts,
        push_constant_ranges: &[],
    });
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some("water-graphics-pipeline"),
        layout: Some(&pipeline_layout),
        vertex: wgpu::VertexState {
            module: &vs,
            entry_point: Some("vs_main"),
            buffers: &[grid_vertex_layout()],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: &fs,
            entry_point: Some("fs_main"),
            targets: &[Some(wgpu::ColorTargetState {
                format: color_format,
                blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        }),
        primitive: wgpu::PrimitiveState { topology: wgpu::PrimitiveTopology::TriangleList, cull_mode: None, ..Default::default() },
        depth_stencil: Some(wgpu::DepthStencilState {
            format: depth_format,
            depth_write_enabled: false,
            depth_compare: wgpu::CompareFunction::LessEqual,
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        }),
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
        cache: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_mesh_has_expected_vertex_and_index_counts() {
        let (vertices, indices) = build_grid_mesh(4);
        assert_eq!(vertices.len(), 5 * 5);
        assert_eq!(indices.len(), 4 * 4 * 6);
    }

    #[test]
    fn grid_mesh_uv_spans_unit_square() {
        let (vertices, _) = build_grid_mesh(2);
        let max_u = vertices.iter().map(|v| v.uv[0]).fold(0.0f32, f32::max);
        let max_v = vertices.iter().map(|v| v.uv[1]).fold(0.0f32, f32::max);
        assert!((max_u - 1.0).abs() < 1e-6);
        assert!((max_v - 1.0).abs() < 1e-6);
    }

    #[test]
    fn water_settings_satisfy_stability_invariants() {
        let s = WaterSettings::default();
        assert!(s.wave_speed > 0.0 && s.wave_speed < 0.5, "wave_speed sanity bound");
        assert!(s.damping >= 0.9 && s.damping <= 1.0);
        assert!(s.height_scale > 0.0);
    }
}
