//! GPU height-field water simulation (spec §4.8).
//!
//! Triple-buffered ping-pong height field driven by two compute passes
//! (wave propagation, then normal/foam derivation), sampled by a single
//! alpha-blended graphics pass over a fixed-resolution grid mesh. Grounded on
//! the original engine's `WaterSystem`, generalized from its Vulkan
//! compute-dispatch/barrier pattern onto wgpu compute passes (which need no
//! explicit barriers — the driver tracks storage-texture hazards itself).

pub mod sim;

pub use sim::{RippleRequest, WaterSim};
