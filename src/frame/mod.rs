//! Per-frame orchestration: material defaults, draw statistics, and the
//! fixed compute/shadow/main pass sequence (spec §4.9).

pub mod material;
pub mod orchestrator;
pub mod stats;

pub use material::{MaterialDefaults, MaterialPush, MaterialTextures};
pub use orchestrator::{FrameOrchestrator, FramePass, SceneResolver};
pub use stats::RenderStats;
