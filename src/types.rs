//! Stand-ins for the external collaborators spec §6 names as consumed-not-
//! owned inputs: scene instances, camera, lights, meshes, materials. None of
//! this crate's subsystems construct these; the orchestrator borrows them
//! each frame from whatever scene/asset system the embedding application
//! uses (out of scope per spec §1).

use glam::{Mat4, Vec3};
use slotmap::new_key_type;

new_key_type! {
    /// Opaque handle into the embedder's mesh storage.
    pub struct MeshHandle;
    /// Opaque handle into the embedder's material storage.
    pub struct MaterialHandle;
}

/// View/projection/position supplied by the embedder's camera each frame.
#[derive(Debug, Clone, Copy)]
pub struct CameraView {
    pub view: Mat4,
    pub proj: Mat4,
    pub position: Vec3,
    pub near: f32,
    pub far: f32,
}

/// Light kind, matching spec §6's `{kind ∈ {Directional, Point}, ...}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightKind {
    Directional,
    Point,
}

/// One scene light. For `Directional`, `position_or_direction` holds the
/// (unnormalized) light direction; for `Point`, the world position.
#[derive(Debug, Clone, Copy)]
pub struct Light {
    pub kind: LightKind,
    pub position_or_direction: Vec3,
    pub color: Vec3,
    pub intensity: f32,
    pub radius: f32,
    pub falloff: f32,
}

/// Per-instance skeletal animation state: the final bone matrices for this
/// frame, keyed by a stable per-instance id so shadow/main passes can share
/// idempotently-created GPU resources (spec §9).
#[derive(Debug, Clone)]
pub struct SkeletalState {
    pub instance_id: u64,
    pub bone_matrices: Vec<Mat4>,
}

/// One draw request for this frame: a mesh, its world transform, and
/// optional skeletal/material overrides.
#[derive(Debug, Clone)]
pub struct MeshInstance {
    pub mesh: MeshHandle,
    pub transform: Mat4,
    pub skeletal: Option<SkeletalState>,
    pub material: Option<MaterialHandle>,
}

/// Minimal binding contract a mesh must expose: bind its vertex/index
/// buffers onto a render pass and report how many indices to draw.
pub trait Mesh {
    fn bind<'a>(&'a self, pass: &mut wgpu::RenderPass<'a>);
    fn index_count(&self) -> u32;
}

/// Minimal binding contract a material must expose: a descriptor set (bind
/// group) plus the scalar push-constant payload for this draw.
pub trait MaterialSource {
    fn bind_group(&self) -> &wgpu::BindGroup;
    fn push_constants(&self) -> crate::frame::material::MaterialPush;
    fn is_skeletal_compatible(&self) -> bool {
        false
    }
}

/// Active render mode, selecting which pipeline family a draw prefers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    Standard,
    Pbr,
    PbrIbl,
}
