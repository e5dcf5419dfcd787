//! GPU device/queue ownership and the single-time-command helper.
//!
//! `GpuContext` is the sole owner of the `wgpu::Instance`/`Adapter`/`Device`/
//! `Queue` quadruple. Every other subsystem borrows it for the lifetime of
//! an `initialize` or `update` call; none of them retain their own device
//! handle.

use crate::error::{GpuError, Result};
use crate::settings::RenderSettings;

/// Device/queue/adapter handle shared by every subsystem. Construction
/// failures are always fatal (`GpuError::DeviceInitFailed`).
pub struct GpuContext {
    pub instance: wgpu::Instance,
    pub adapter: wgpu::Adapter,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
}

impl GpuContext {
    /// Request an adapter/device pair with no surface requirement (used for
    /// headless precompute and for tests). For a windowed context, pass
    /// `compatible_surface` through [`GpuContext::new_with_surface`] instead.
    pub async fn new(settings: &RenderSettings) -> Result<Self> {
        let instance = wgpu::Instance::default();
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: settings.power_preference,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| GpuError::AdapterRequestFailed(e.to_string()))?;

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("gpu-render-core device"),
                required_features: settings.required_features,
                required_limits: settings.required_limits.clone(),
                memory_hints: wgpu::MemoryHints::Performance,
                ..Default::default()
            })
            .await?;

        Ok(Self { instance, adapter, device, queue })
    }

    /// Picks the first supported depth format from the preference order
    /// `Depth32Float` > `Depth32FloatStencil8` > `Depth24PlusStencil8`,
    /// matching the Vulkan fallback chain `D32_SFLOAT` >
    /// `D32_SFLOAT_S8_UINT` > `D24_UNORM_S8_UINT`.
    #[must_use]
    pub fn find_depth_format(&self) -> wgpu::TextureFormat {
        const CANDIDATES: [wgpu::TextureFormat; 3] = [
            wgpu::TextureFormat::Depth32Float,
            wgpu::TextureFormat::Depth32FloatStencil8,
            wgpu::TextureFormat::Depth24PlusStencil8,
        ];
        for format in CANDIDATES {
            let features = self.adapter.get_texture_format_features(format);
            if features
                .allowed_usages
                .contains(wgpu::TextureUsages::RENDER_ATTACHMENT)
            {
                return format;
            }
        }
        wgpu::TextureFormat::Depth32Float
    }

    /// wgpu has no raw `VkMemoryPropertyFlags`/type-bits query — the
    /// allocator lives inside `wgpu-hal`. This exposes the memory hints used
    /// at device creation, the closest equivalent to "queryable memory
    /// behavior" the API surface offers.
    #[must_use]
    pub fn memory_hints(&self) -> wgpu::MemoryHints {
        wgpu::MemoryHints::Performance
    }

    /// Records `f` into a fresh command encoder, submits it, then blocks on
    /// the device until the GPU has finished executing it. This is the
    /// `queue_wait_idle` suspension point used by resource uploads and
    /// layout transitions outside the frame loop.
    pub fn with_single_time_commands<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut wgpu::CommandEncoder),
    {
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("single-time-commands"),
            });
        f(&mut encoder);
        self.queue.submit(std::iter::once(encoder.finish()));
        self.device.poll(wgpu::Maintain::Wait);
        Ok(())
    }
}
