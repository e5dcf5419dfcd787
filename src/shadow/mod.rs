//! Directional and point-light shadow systems (spec §4.6, §4.7).
//!
//! Both systems are cascade-free single-map designs: one light-space matrix
//! for the directional sun, and one cube-face set per point light, up to
//! [`MAX_SHADOW_POINT_LIGHTS`]. Grounded on the original engine's
//! `ShadowSystem`/`PointLightShadowSystem`, generalized from Vulkan
//! framebuffers/descriptor sets onto wgpu render passes/bind groups.

pub mod directional;
pub mod point_array;
pub mod skeletal;

pub use directional::{ShadowDirectional, ShadowDrawItem};
pub use point_array::ShadowPointArray;
pub use skeletal::SkeletalResourceCache;

/// Rounds `value` up to the next multiple of `alignment`. Used to compute the
/// dynamic-UBO stride for the point-light shadow buffer, matching the
/// teacher's own `align_to` helper in `renderer/graph/passes/shadow.rs`.
#[must_use]
pub fn align_to(value: u32, alignment: u32) -> u32 {
    if alignment == 0 {
        return value;
    }
    value.div_ceil(alignment) * alignment
}

/// Vertex attribute layout every [`crate::types::Mesh`] implementation is
/// expected to expose for the static (non-skeletal) shadow pipelines: a
/// single `vec3` position, matching the original engine's depth-only vertex
/// shader which reads nothing else.
#[must_use]
pub fn static_vertex_layout() -> wgpu::VertexBufferLayout<'static> {
    const ATTRS: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![0 => Float32x3];
    wgpu::VertexBufferLayout {
        array_stride: std::mem::size_of::<[f32; 3]>() as wgpu::BufferAddress,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &ATTRS,
    }
}

/// Vertex attribute layout for skeletal meshes: position plus up to 4 bone
/// indices and weights, matching the original engine's skinned depth vertex
/// shader.
#[must_use]
pub fn skeletal_vertex_layout() -> wgpu::VertexBufferLayout<'static> {
    const ATTRS: [wgpu::VertexAttribute; 3] = wgpu::vertex_attr_array![
        0 => Float32x3,
        1 => Uint16x4,
        2 => Float32x4,
    ];
    wgpu::VertexBufferLayout {
        array_stride: (std::mem::size_of::<[f32; 3]>()
            + std::mem::size_of::<[u16; 4]>()
            + std::mem::size_of::<[f32; 4]>()) as wgpu::BufferAddress,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &ATTRS,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_to_rounds_up_to_multiple() {
        assert_eq!(align_to(200, 256), 256);
        assert_eq!(align_to(256, 256), 256);
        assert_eq!(align_to(257, 256), 512);
        assert_eq!(align_to(0, 256), 0);
    }

    #[test]
    fn align_to_passes_through_when_alignment_is_zero() {
        assert_eq!(align_to(17, 0), 17);
    }
}
