//! Surface/swapchain lifecycle, resize recreation, shared depth attachment.
//!
//! There is no standalone "render pass" object to cache under wgpu (pass
//! descriptors are built per-frame from `TextureView`s), so `SwapchainHost`
//! instead owns the depth attachment and the load/store/clear configuration
//! spec §4.4 describes as the main render pass, and hands out a
//! `RenderPassDescriptor` builder each frame.

use crate::error::{GpuError, Result};

/// Surface + swapchain + shared depth attachment, recreated on resize.
pub struct SwapchainHost {
    pub surface: wgpu::Surface<'static>,
    pub config: wgpu::SurfaceConfiguration,
    pub depth_format: wgpu::TextureFormat,
    pub depth_view: wgpu::TextureView,
    pub clear_color: wgpu::Color,
}

impl SwapchainHost {
    pub fn new(
        device: &wgpu::Device,
        adapter: &wgpu::Adapter,
        surface: wgpu::Surface<'static>,
        width: u32,
        height: u32,
        depth_format: wgpu::TextureFormat,
        vsync: bool,
        clear_color: wgpu::Color,
    ) -> Result<Self> {
        let caps = surface.get_capabilities(adapter);
        let format = caps
            .formats
            .iter()
            .copied()
            .find(|f| *f == wgpu::TextureFormat::Bgra8UnormSrgb)
            .unwrap_or(caps.formats[0]);
        let present_mode = if vsync {
            if caps.present_modes.contains(&wgpu::PresentMode::Mailbox) {
                wgpu::PresentMode::Mailbox
            } else {
                wgpu::PresentMode::Fifo
            }
        } else {
            wgpu::PresentMode::Immediate
        };

        let mut config = surface
            .get_default_config(adapter, width, height)
            .ok_or_else(|| GpuError::ResourceCreationFailed("surface unsupported by adapter".into()))?;
        config.format = format;
        config.present_mode = present_mode;
        surface.configure(device, &config);

        let depth_view = Self::create_depth_view(device, &config, depth_format);

        Ok(Self { surface, config, depth_format, depth_view, clear_color })
    }

    fn create_depth_view(
        device: &wgpu::Device,
        config: &wgpu::SurfaceConfiguration,
        format: wgpu::TextureFormat,
    ) -> wgpu::TextureView {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("swapchain-depth"),
            size: wgpu::Extent3d { width: config.width, height: config.height, depth_or_array_layers: 1 },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        texture.create_view(&wgpu::TextureViewDescriptor::default())
    }

    /// Recreation order: wait-device-idle (caller's responsibility before
    /// calling this), destroy-and-reconfigure, recreate depth attachment.
    /// Pipelines created with dynamic viewport/scissor do not need to be
    /// rebuilt; only systems that cache the swapchain extent do.
    pub fn resize(&mut self, device: &wgpu::Device, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.config.width = width;
        self.config.height = height;
        self.surface.configure(device, &self.config);
        self.depth_view = Self::create_depth_view(device, &self.config, self.depth_format);
    }

    /// Acquires the next swapchain image, translating wgpu's
    /// `SurfaceError` into the spec's `SwapchainOutOfDate`/`Suboptimal`
    /// recoverable signals.
    pub fn acquire(&self) -> Result<wgpu::SurfaceTexture> {
        match self.surface.get_current_texture() {
            Ok(frame) => {
                if frame.suboptimal {
                    return Err(GpuError::SwapchainSuboptimal);
                }
                Ok(frame)
            }
            Err(wgpu::SurfaceError::Outdated | wgpu::SurfaceError::Lost) => Err(GpuError::SwapchainOutOfDate),
            Err(other) => Err(GpuError::ResourceCreationFailed(other.to_string())),
        }
    }

    /// Matches spec §4.4's main render pass color attachment ops: clear to
    /// [`SwapchainHost::clear_color`], store. Callers build the full
    /// `RenderPassDescriptor` inline each frame (see
    /// `frame::orchestrator`) since its attachment slice must borrow from
    /// that frame's acquired image view.
    #[must_use]
    pub fn color_ops(&self) -> wgpu::Operations<wgpu::Color> {
        wgpu::Operations { load: wgpu::LoadOp::Clear(self.clear_color), store: wgpu::StoreOp::Store }
    }

    /// Matches spec §4.4's depth attachment ops: clear to 1.0, don't store.
    #[must_use]
    pub fn depth_ops(&self) -> wgpu::Operations<f32> {
        wgpu::Operations { load: wgpu::LoadOp::Clear(1.0), store: wgpu::StoreOp::Discard }
    }

    #[must_use]
    pub fn color_format(&self) -> wgpu::TextureFormat {
        self.config.format
    }
}
