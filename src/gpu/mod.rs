//! Device/queue ownership, typed resource creation, descriptor allocation,
//! and swapchain lifecycle — the foundation every other subsystem in this
//! crate borrows.

pub mod context;
pub mod descriptor;
pub mod resources;
pub mod swapchain;

pub use context::GpuContext;
pub use descriptor::{DescriptorHub, PoolSizeSummary};
pub use resources::{Buffer, Image, ImageLayout, MipmapGenerator, ResourceFactory, ViewKind};
pub use swapchain::SwapchainHost;
