//! Bind-group layout cache and per-frame bind-group allocation.
//!
//! wgpu's binding model has no descriptor *pool* to size up front (bind
//! groups are allocated individually by the driver) — `DescriptorHub` keeps
//! the spec's "sized at construction" summary as a soft capacity hint used
//! only to pre-size the internal maps/vectors, not as a hard allocation
//! limit.

use std::hash::{Hash, Hasher};

use rustc_hash::{FxHashMap, FxHasher};

/// Summary used to size internal storage. wgpu has no real pool to size, so
/// these counts are advisory `Vec`/`HashMap` capacity hints only.
#[derive(Debug, Clone, Copy, Default)]
pub struct PoolSizeSummary {
    pub uniform_buffer: u32,
    pub uniform_buffer_dynamic: u32,
    pub storage_image: u32,
    pub combined_image_sampler: u32,
    pub storage_buffer: u32,
    pub max_sets: u32,
}

/// One binding slot description, the input to a layout-creation call.
#[derive(Debug, Clone)]
pub struct BindingDesc {
    pub binding: u32,
    pub ty: wgpu::BindingType,
    pub visibility: wgpu::ShaderStages,
    pub count: Option<std::num::NonZeroU32>,
}

fn hash_bindings(bindings: &[BindingDesc]) -> u64 {
    let mut hasher = FxHasher::default();
    for b in bindings {
        b.binding.hash(&mut hasher);
        b.visibility.bits().hash(&mut hasher);
        format!("{:?}", b.ty).hash(&mut hasher);
        b.count.map(std::num::NonZeroU32::get).hash(&mut hasher);
    }
    hasher.finish()
}

/// Owns the layout cache; bind groups are immutable under wgpu so a "write"
/// is realized as allocating a fresh bind group rather than patching one in
/// place. Freeing individual bind groups is not supported: layouts and
/// allocations live for the process, matching the spec's pool-lifetime
/// model.
pub struct DescriptorHub {
    layouts: FxHashMap<u64, wgpu::BindGroupLayout>,
    summary: PoolSizeSummary,
}

impl DescriptorHub {
    #[must_use]
    pub fn new(summary: PoolSizeSummary) -> Self {
        Self {
            layouts: FxHashMap::with_capacity_and_hasher(summary.max_sets as usize, Default::default()),
            summary,
        }
    }

    #[must_use]
    pub fn summary(&self) -> PoolSizeSummary {
        self.summary
    }

    /// Creates (or returns the cached) layout for an identical set of
    /// bindings, deduplicating by a hash of the binding description slice.
    pub fn get_or_create_layout(
        &mut self,
        device: &wgpu::Device,
        bindings: &[BindingDesc],
    ) -> &wgpu::BindGroupLayout {
        let key = hash_bindings(bindings);
        self.layouts.entry(key).or_insert_with(|| {
            let entries: Vec<wgpu::BindGroupLayoutEntry> = bindings
                .iter()
                .map(|b| wgpu::BindGroupLayoutEntry {
                    binding: b.binding,
                    visibility: b.visibility,
                    ty: b.ty,
                    count: b.count,
                })
                .collect();
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("descriptor-hub-layout"),
                entries: &entries,
            })
        })
    }

    pub fn allocate(
        &self,
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        entries: &[wgpu::BindGroupEntry],
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("descriptor-hub-set"),
            layout,
            entries,
        })
    }

    /// Allocates `count` independent bind groups from the same layout, one
    /// per frame-in-flight.
    pub fn allocate_per_frame(
        &self,
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        count: usize,
        mut entries_for: impl FnMut(usize) -> Vec<wgpu::BindGroupEntry>,
    ) -> Vec<wgpu::BindGroup> {
        (0..count)
            .map(|i| self.allocate(device, layout, &entries_for(i)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_binding_slices_hash_equal() {
        let a = vec![BindingDesc {
            binding: 0,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            visibility: wgpu::ShaderStages::FRAGMENT,
            count: None,
        }];
        let b = a.clone();
        assert_eq!(hash_bindings(&a), hash_bindings(&b));
    }
}
