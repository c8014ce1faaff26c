//! # ember
//!
//! A fixed-capacity particle pool that lives entirely on the GPU.
//!
//! Particles occupy slots in a device buffer and are never compacted. Each
//! tick runs three compute passes separated by barriers:
//!
//! 1. **reclaim** rebuilds the Free-Slot List from every dead slot,
//! 2. **age** advances every live slot and kills those past their life,
//! 3. **spawn** pops free slots and initialises new particles in them.
//!
//! The renderer then draws one camera-facing quad per slot with instancing,
//! letting the vertex stage hide dead slots.
//!
//! ## Quick Start
//!
//! ```ignore
//! use ember::prelude::*;
//!
//! let mut device = WgpuBackend::new()?;
//! let config = PoolConfig::new(10_000);
//! let programs = ProgramSet::load(&mut device, config.workgroup_size)?;
//!
//! let mut smoke = ParticleSystem::new(&mut device, config)?
//!     .with_properties(SpawnParams::clouds());
//! smoke.set_programs(programs)?;
//!
//! loop {
//!     smoke.update(&mut device, 1.0 / 60.0, None);
//!     // renderer.render(&device, &mut encoder, target, &smoke, &camera, &viewport);
//! }
//! ```
//!
//! ## Devices
//!
//! Everything the lifecycle does goes through the [`ComputeBackend`] trait.
//! [`WgpuBackend`] runs the WGSL programs on a real adapter;
//! [`HostBackend`] runs equivalent kernels on the CPU and flags any pass that
//! reads a buffer before a barrier made earlier writes visible. Tests and the
//! `--backend host` runner use the latter.
//!
//! ## Sharing programs
//!
//! A [`ProgramSet`] is loaded once per device and attached to as many systems
//! as needed; each system owns its own buffers.

pub mod backend;
pub mod config;
pub mod error;
pub mod gpu;
pub mod host;
pub mod lifecycle;
pub mod particle;
pub mod pool;
pub mod shaders;
pub mod system;
pub mod textures;
pub mod uniforms;

pub use backend::{group_count, BufferId, ComputeBackend, ProgramId};
pub use config::{BackendKind, EmberConfig, PoolConfig, RunConfig, SpawnParams};
pub use error::{ConfigError, GpuError, InitError, ProgramError, TextureError};
pub use glam::{Mat4, Vec3, Vec4};
pub use gpu::{Camera, InstancedRenderer, ProjectionSource, RenderView, ViewSource, Viewport, WgpuBackend};
pub use host::HostBackend;
pub use lifecycle::{LifecycleEngine, ProgramSet, SpawnAccumulator, SpawnRequest, TickOutcome};
pub use particle::{FreeListSnapshot, ParticleSlot};
pub use pool::BufferPool;
pub use system::ParticleSystem;
pub use textures::{FilterMode, ParticleImage};
pub use uniforms::UniformValue;

/// Convenient re-exports for common usage.
pub mod prelude {
    pub use crate::backend::ComputeBackend;
    pub use crate::config::{PoolConfig, SpawnParams};
    pub use crate::gpu::{Camera, InstancedRenderer, RenderView, Viewport, WgpuBackend};
    pub use crate::host::HostBackend;
    pub use crate::lifecycle::{ProgramSet, TickOutcome};
    pub use crate::system::ParticleSystem;
    pub use crate::{Vec3, Vec4};
}
