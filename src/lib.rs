#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_arguments)]

pub mod error;
pub mod frame;
pub mod gpu;
pub mod ibl;
pub mod settings;
pub mod shader;
pub mod shadow;
pub mod types;
pub mod water;

pub use error::{GpuError, Result};
pub use frame::{FrameOrchestrator, FramePass, MaterialDefaults, MaterialPush, MaterialTextures, RenderStats, SceneResolver};
pub use gpu::{Buffer, DescriptorHub, GpuContext, Image, ImageLayout, MipmapGenerator, PoolSizeSummary, ResourceFactory, SwapchainHost, ViewKind};
pub use ibl::{CacheHeader, CubemapCpuImage, EquirectImage, IblPrecompute, IblSet, HEADER_SIZE};
pub use settings::{IblConfig, IblQuality, RenderSettings, ShadowSettings, WaterSettings};
pub use shader::ShaderLoader;
pub use shadow::{ShadowDirectional, ShadowDrawItem, ShadowPointArray, SkeletalResourceCache};
pub use types::{
    CameraView, Light, LightKind, MaterialHandle, MaterialSource, Mesh, MeshHandle, MeshInstance, RenderMode, SkeletalState,
};
pub use water::{RippleRequest, WaterSim};
