//! Shared per-instance skeletal GPU resources.
//!
//! Bone matrices are uploaded once per instance per frame and read by
//! whichever pipeline draws that instance this frame — the directional
//! shadow pass, the point-light shadow pass, and the main scene pass all
//! bind the same buffer. Creation is idempotent and keyed by the scene's own
//! stable instance id (spec §9), so whichever pass encounters an instance
//! first pays the allocation cost and every later pass in the same frame
//! just binds the cached group.

use rustc_hash::FxHashMap;

use crate::error::{GpuError, Result};

struct InstanceResources {
    bone_capacity: usize,
    buffers: Vec<wgpu::Buffer>,
    bind_groups: Vec<wgpu::BindGroup>,
}

/// Bone-matrix storage buffer cache, one entry per `(instance_id, frame
/// index)` pair, doubling capacity on demand like the teacher's own
/// light-uniform growth pattern in `graph/passes/shadow.rs`.
pub struct SkeletalResourceCache {
    layout: wgpu::BindGroupLayout,
    frames_in_flight: usize,
    per_instance: FxHashMap<u64, InstanceResources>,
}

impl SkeletalResourceCache {
    #[must_use]
    pub fn new(device: &wgpu::Device, frames_in_flight: usize) -> Self {
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("skeletal-bones-layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Storage { read_only: true },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });
        Self { layout, frames_in_flight, per_instance: FxHashMap::default() }
    }

    #[must_use]
    pub fn layout(&self) -> &wgpu::BindGroupLayout {
        &self.layout
    }

    /// Idempotently creates (or grows) the bone buffer + bind group for
    /// `instance_id` so it can hold at least `bone_count` matrices. A no-op
    /// if resources of sufficient capacity already exist.
    pub fn ensure(&mut self, device: &wgpu::Device, instance_id: u64, bone_count: usize) {
        let needs_create = self
            .per_instance
            .get(&instance_id)
            .map(|r| r.bone_capacity < bone_count)
            .unwrap_or(true);
        if !needs_create {
            return;
        }
        let capacity = bone_count.max(1).next_power_of_two();
        let size = (capacity * std::mem::size_of::<glam::Mat4>()) as u64;
        let buffers: Vec<wgpu::Buffer> = (0..self.frames_in_flight)
            .map(|i| {
                device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some(&format!("bone-buffer-{instance_id}-{i}")),
                    size,
                    usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                })
            })
            .collect();
        let bind_groups: Vec<wgpu::BindGroup> = buffers
            .iter()
            .map(|buf| {
                device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("skeletal-bones-bind-group"),
                    layout: &self.layout,
                    entries: &[wgpu::BindGroupEntry { binding: 0, resource: buf.as_entire_binding() }],
                })
            })
            .collect();
        log::debug!("SkeletalResourceCache: allocated instance {instance_id} for {capacity} bones");
        self.per_instance.insert(instance_id, InstanceResources { bone_capacity: capacity, buffers, bind_groups });
    }

    /// Writes `bone_matrices` for `instance_id`'s `frame_index` slot.
    /// `ensure` must have been called first with a sufficient `bone_count`.
    pub fn update(&self, queue: &wgpu::Queue, instance_id: u64, frame_index: usize, bone_matrices: &[glam::Mat4]) -> Result<()> {
        let res = self.per_instance.get(&instance_id).ok_or_else(|| {
            GpuError::ResourceCreationFailed(format!("skeletal instance {instance_id} not initialized"))
        })?;
        let buffer = res.buffers.get(frame_index).ok_or_else(|| {
            GpuError::ResourceCreationFailed(format!("frame index {frame_index} out of range for instance {instance_id}"))
        })?;
        queue.write_buffer(buffer, 0, bytemuck::cast_slice(bone_matrices));
        Ok(())
    }

    #[must_use]
    pub fn bind_group(&self, instance_id: u64, frame_index: usize) -> Option<&wgpu::BindGroup> {
        self.per_instance.get(&instance_id).and_then(|r| r.bind_groups.get(frame_index))
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn capacity_doubles_via_next_power_of_two() {
        assert_eq!(4usize.next_power_of_two(), 4);
        assert_eq!(5usize.next_power_of_two(), 8);
        assert_eq!(64usize.next_power_of_two(), 64);
    }
}
