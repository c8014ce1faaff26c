//! Error types for ember.
//!
//! Device initialization, program loading, texture decoding and configuration
//! each get their own error enum. None of these cross the engine boundary as
//! panics: the lifecycle engine and renderer report through return values and
//! log output only.

use thiserror::Error;

use crate::backend::BufferId;

/// Errors raised by a compute device.
#[derive(Debug, Error)]
pub enum GpuError {
    /// No compatible GPU adapter found.
    #[error("no compatible GPU adapter found; ensure the system has a WebGPU/Vulkan/Metal/DX12 capable device")]
    NoAdapter,
    /// Failed to create the logical device.
    #[error("failed to create GPU device: {0}")]
    DeviceCreation(#[from] wgpu::RequestDeviceError),
    /// Device storage could not be allocated.
    #[error("failed to allocate {bytes} bytes for '{label}': {reason}")]
    Allocation {
        /// Debug label of the buffer.
        label: String,
        /// Requested size in bytes.
        bytes: u64,
        /// Reason reported by the device.
        reason: String,
    },
    /// Failed to map a buffer for reading.
    #[error("failed to map GPU buffer: {0}")]
    BufferMapping(String),
    /// A handle that the device never issued.
    #[error("unknown buffer handle {0:?}")]
    UnknownBuffer(BufferId),
}

/// Errors raised while loading a compute program.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProgramError {
    /// No program is registered under this name.
    #[error("no program named '{0}'")]
    NotFound(String),
    /// The device rejected the program source.
    #[error("program '{name}' failed to compile: {message}")]
    Compile {
        /// Program name.
        name: String,
        /// Compiler output.
        message: String,
    },
    /// A program set was built for a different workgroup size than the pool uses.
    #[error("program set uses workgroup size {found}, pool expects {expected}")]
    WorkgroupMismatch {
        /// Workgroup size from the pool configuration.
        expected: u32,
        /// Workgroup size the programs were built with.
        found: u32,
    },
}

/// Errors that can occur during texture loading.
#[derive(Debug, Error)]
pub enum TextureError {
    /// Failed to open or decode the image file.
    #[error("failed to load image: {0}")]
    ImageLoad(#[from] image::ImageError),
    /// The image decoded to zero pixels.
    #[error("image has no pixels")]
    EmptyImage,
}

/// Errors that can occur while reading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the config file.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    /// The file is not valid TOML for this schema.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    /// A value is outside its allowed range.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Errors that stop a particle system from being constructed.
#[derive(Debug, Error)]
pub enum InitError {
    /// The pool configuration was rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The device could not allocate the pool.
    #[error(transparent)]
    Gpu(#[from] GpuError),
}
