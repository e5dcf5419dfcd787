//! Error Types
//!
//! This module defines the error taxonomy used throughout the GPU resource
//! and render-graph core.
//!
//! # Overview
//!
//! The main error type [`GpuError`] covers every failure mode named by the
//! core's error handling design: device initialization, resource creation,
//! texture upload, IBL cache validation, HDR loading, swapchain lifecycle
//! events, and shader bytecode validation.
//!
//! # Usage
//!
//! All public APIs return [`Result<T>`], an alias for `std::result::Result<T, GpuError>`.

use thiserror::Error;

/// The error type for the GPU resource and render-graph core.
///
/// Most variants are fatal for the subsystem that raised them; a few
/// (`CacheInvalid`, `HdrLoadFailed`, `SwapchainOutOfDate`, `SwapchainSuboptimal`)
/// are expected, recoverable events rather than bugs.
#[derive(Error, Debug)]
pub enum GpuError {
    /// No suitable adapter, queue, or required device feature/limit was found.
    /// Fatal at boot.
    #[error("device initialization failed: {0}")]
    DeviceInitFailed(String),

    /// Failed to create a requested GPU adapter (wgpu's lower-level variant
    /// of `DeviceInitFailed`, kept separate so the adapter-request error
    /// string survives unmangled).
    #[error("failed to request GPU adapter: {0}")]
    AdapterRequestFailed(String),

    /// Failed to create the logical device.
    #[error("failed to create GPU device: {0}")]
    DeviceCreateFailed(#[from] wgpu::RequestDeviceError),

    /// Image/buffer/view/sampler/pipeline creation failed. Fatal for the
    /// owning subsystem's `initialize`; the subsystem reports readiness =
    /// false and the orchestrator skips its passes.
    #[error("resource creation failed: {0}")]
    ResourceCreationFailed(String),

    /// A staging upload or single-time-command submission failed. Fatal for
    /// the texture being uploaded; the destination image is left in layout
    /// `Undefined`.
    #[error("upload failed: {0}")]
    UploadFailed(String),

    /// A disk cache file's header was short, mismatched, or named a zero
    /// width/size. Recovered locally by regenerating and overwriting.
    #[error("cache invalid: {0}")]
    CacheInvalid(String),

    /// The source `.hdr` file was missing or unreadable. Recovered by
    /// substituting a procedural gradient cubemap.
    #[error("HDR load failed: {0}")]
    HdrLoadFailed(String),

    /// Swapchain acquire/present reported `OutOfDate`. Recovered by
    /// recreating the swapchain; the frame is abandoned.
    #[error("swapchain out of date")]
    SwapchainOutOfDate,

    /// Swapchain acquire/present reported `Suboptimal`. Recovered the same
    /// way as `SwapchainOutOfDate`.
    #[error("swapchain suboptimal")]
    SwapchainSuboptimal,

    /// A shader bytecode blob's length was not a multiple of 4, or module
    /// creation failed. Fatal for the owning pipeline.
    #[error("shader blob invalid: {0}")]
    ShaderBlobInvalid(String),

    /// File I/O error (cache files, shader blobs, HDR source).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HDR/image decoding error surfaced by the `image` crate.
    #[error("image decode error: {0}")]
    ImageDecodeError(String),
}

impl From<image::ImageError> for GpuError {
    fn from(err: image::ImageError) -> Self {
        GpuError::ImageDecodeError(err.to_string())
    }
}

/// Alias for `Result<T, GpuError>`.
pub type Result<T> = std::result::Result<T, GpuError>;
