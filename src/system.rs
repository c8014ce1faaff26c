//! The owning particle system.
//!
//! [`ParticleSystem`] ties one [`BufferPool`] to a [`LifecycleEngine`], holds
//! the editable [`SpawnParams`] and the optional sprite image. Rendering goes
//! through [`crate::gpu::InstancedRenderer`], which reads the pool and image
//! from here.

use std::path::Path;

use tracing::{error, info};

use crate::backend::ComputeBackend;
use crate::config::{PoolConfig, SpawnParams};
use crate::error::{InitError, ProgramError};
use crate::lifecycle::{LifecycleEngine, ProgramSet, SpawnRequest, TickOutcome};
use crate::particle::FreeListSnapshot;
use crate::pool::BufferPool;
use crate::textures::ParticleImage;

/// One particle system: a pool, its lifecycle and its look.
#[derive(Debug)]
pub struct ParticleSystem {
    pool: BufferPool,
    engine: LifecycleEngine,
    /// Spawn and simulation properties, read on every tick and frame.
    pub properties: SpawnParams,
    image: Option<ParticleImage>,
    image_generation: u64,
}

impl ParticleSystem {
    /// Allocate and seed a pool of `config.capacity` dead slots.
    ///
    /// The system is not runnable until programs are attached with
    /// [`ParticleSystem::set_programs`]; ticks before that are skipped.
    pub fn new<B: ComputeBackend + ?Sized>(backend: &mut B, config: PoolConfig) -> Result<Self, InitError> {
        Self::with_engine(backend, config, LifecycleEngine::new())
    }

    /// Like [`ParticleSystem::new`] with a reproducible spawn RNG.
    pub fn with_seed<B: ComputeBackend + ?Sized>(
        backend: &mut B,
        config: PoolConfig,
        seed: u64,
    ) -> Result<Self, InitError> {
        Self::with_engine(backend, config, LifecycleEngine::with_seed(seed))
    }

    fn with_engine<B: ComputeBackend + ?Sized>(
        backend: &mut B,
        config: PoolConfig,
        engine: LifecycleEngine,
    ) -> Result<Self, InitError> {
        config.validate()?;
        let pool = BufferPool::create(backend, config)?;
        Ok(Self {
            pool,
            engine,
            properties: SpawnParams::default(),
            image: None,
            image_generation: 0,
        })
    }

    /// Replace the spawn properties.
    pub fn with_properties(mut self, properties: SpawnParams) -> Self {
        self.properties = properties;
        self
    }

    /// Attach a shared program set.
    pub fn set_programs(&mut self, programs: ProgramSet) -> Result<(), ProgramError> {
        self.engine.attach(programs, self.pool.config())
    }

    /// Whether ticks will run.
    pub fn is_ready(&self) -> bool {
        self.engine.is_ready()
    }

    pub fn capacity(&self) -> u32 {
        self.pool.capacity()
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    pub fn engine(&self) -> &LifecycleEngine {
        &self.engine
    }

    /// Advance the simulation by `dt` seconds.
    ///
    /// `requested` spawns exactly that many particles (clamped to what is
    /// free); `None` spawns from the frequency accumulator.
    pub fn update<B: ComputeBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        dt: f32,
        requested: Option<u32>,
    ) -> TickOutcome {
        self.engine.tick(
            backend,
            &self.pool,
            &self.properties,
            dt,
            SpawnRequest::from(requested),
        )
    }

    /// Load a sprite image. On failure the error is logged, `false` is
    /// returned and any previously loaded image stays in use.
    pub fn load_texture<P: AsRef<Path>>(&mut self, path: P) -> bool {
        let path = path.as_ref();
        match ParticleImage::load(path) {
            Ok(image) => {
                info!(
                    path = %path.display(),
                    width = image.width(),
                    height = image.height(),
                    "particle texture loaded"
                );
                self.set_image(image);
                true
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "failed to load particle texture");
                false
            }
        }
    }

    /// Use an already decoded image.
    pub fn set_image(&mut self, image: ParticleImage) {
        self.image = Some(image);
        self.image_generation += 1;
    }

    pub fn image(&self) -> Option<&ParticleImage> {
        self.image.as_ref()
    }

    /// Bumped on every image change.
    pub fn image_generation(&self) -> u64 {
        self.image_generation
    }

    /// Read the Free-Slot List back and log it.
    ///
    /// Read-back failures are logged and yield `None`; nothing else changes.
    pub fn debug<B: ComputeBackend + ?Sized>(&self, backend: &mut B) -> Option<FreeListSnapshot> {
        match self.pool.read_free_list(backend) {
            Ok(snapshot) => {
                info!(
                    capacity = self.capacity(),
                    free = snapshot.count,
                    indices = ?snapshot.indices,
                    "free-slot list"
                );
                Some(snapshot)
            }
            Err(e) => {
                error!(error = %e, "failed to read free-slot list");
                None
            }
        }
    }

    /// Slots currently alive, from a full read-back.
    pub fn alive_count<B: ComputeBackend + ?Sized>(&self, backend: &mut B) -> Option<usize> {
        match self.pool.read_particles(backend) {
            Ok(slots) => Some(slots.iter().filter(|p| p.is_alive()).count()),
            Err(e) => {
                error!(error = %e, "failed to read particle array");
                None
            }
        }
    }

    /// Release the pool.
    pub fn destroy<B: ComputeBackend + ?Sized>(self, backend: &mut B) {
        self.pool.destroy(backend);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigError;
    use crate::host::HostBackend;

    fn ready_system(host: &mut HostBackend, capacity: u32) -> ParticleSystem {
        let config = PoolConfig::new(capacity);
        let mut system = ParticleSystem::with_seed(host, config, 11).unwrap();
        let programs = ProgramSet::load(host, config.workgroup_size).unwrap();
        system.set_programs(programs).unwrap();
        system
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let mut host = HostBackend::new();
        let err = ParticleSystem::new(&mut host, PoolConfig::new(0)).unwrap_err();
        assert!(matches!(err, InitError::Config(ConfigError::Invalid(_))));
        assert_eq!(host.allocated_bytes(), 0);
    }

    #[test]
    fn allocation_failure_is_reported() {
        let mut host = HostBackend::new().with_memory_limit(64);
        let err = ParticleSystem::new(&mut host, PoolConfig::new(100)).unwrap_err();
        assert!(matches!(err, InitError::Gpu(_)));
    }

    #[test]
    fn update_spawns_requested_particles() {
        let mut host = HostBackend::new();
        let mut system = ready_system(&mut host, 8);
        let outcome = system.update(&mut host, 1.0, Some(3));
        assert!(matches!(outcome, TickOutcome::Completed { spawn_count: 3, .. }));
        assert_eq!(system.alive_count(&mut host), Some(3));
        assert_eq!(system.debug(&mut host).map(|s| s.count), Some(5));
    }

    #[test]
    fn failed_texture_load_keeps_previous_image() {
        let mut host = HostBackend::new();
        let mut system = ParticleSystem::new(&mut host, PoolConfig::new(4)).unwrap();
        assert!(system.image().is_none());

        system.set_image(ParticleImage::solid_white());
        assert_eq!(system.image_generation(), 1);

        assert!(!system.load_texture("/no/such/sprite.png"));
        assert!(system.image().is_some());
        assert_eq!(system.image_generation(), 1);
    }

    #[test]
    fn debug_on_released_pool_logs_and_returns_none() {
        let mut host = HostBackend::new();
        let system = ParticleSystem::new(&mut host, PoolConfig::new(4)).unwrap();
        host.destroy_storage(system.pool().free_list());
        assert!(system.debug(&mut host).is_none());
    }
}
