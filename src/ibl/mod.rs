//! Image-based lighting precompute: equirect→cubemap projection, GGX
//! importance-sampled irradiance/prefilter convolution, the split-sum BRDF
//! LUT, and a disk cache around all three (spec §4.5).

pub mod cache;
pub mod convolve;
pub mod cubemap;
pub mod precompute;

pub use cache::{CacheHeader, HEADER_SIZE};
pub use cubemap::{CubemapCpuImage, EquirectImage};
pub use precompute::{IblPrecompute, IblSet};
