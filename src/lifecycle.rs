//! Particle lifecycle engine.
//!
//! Each tick runs three compute passes over the pool, strictly in order, with
//! a barrier between every pair:
//!
//! 1. **reclaim**: zero the Free-Slot List counter, then append every slot
//!    whose age is negative. The list is rebuilt from scratch every tick.
//! 2. **age**: advance every live slot by `dt`; a slot that reaches its life
//!    length gets the dead sentinel and shows up in the *next* tick's
//!    reclaim pass.
//! 3. **spawn**: pop up to `spawn_count` indices from the list and
//!    initialise new particles there. Skipped when nothing is to be spawned.
//!
//! The spawn count comes either from a frequency accumulator
//! ([`SpawnRequest::Rate`]) or directly from the caller
//! ([`SpawnRequest::Exact`]).
//!
//! # Example
//!
//! ```ignore
//! let programs = ProgramSet::load(&mut backend, config.workgroup_size)?;
//! let mut engine = LifecycleEngine::new();
//! engine.attach(programs, config)?;
//! engine.tick(&mut backend, &pool, &params, 1.0 / 60.0, SpawnRequest::Rate);
//! ```

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug_span, trace, warn};

use crate::backend::{group_count, ComputeBackend, ProgramId};
use crate::config::{PoolConfig, SpawnParams};
use crate::error::ProgramError;
use crate::pool::BufferPool;
use crate::shaders::{self, FREE_LIST_SLOT, PARTICLES_SLOT};

/// Handles of the three compute programs, loaded once and shareable between
/// any number of particle systems on the same device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProgramSet {
    pub reclaim: ProgramId,
    pub age: ProgramId,
    pub spawn: ProgramId,
    /// Workgroup size every program was built with.
    pub workgroup_size: u32,
}

impl ProgramSet {
    /// Load all three programs.
    pub fn load<B: ComputeBackend + ?Sized>(
        backend: &mut B,
        workgroup_size: u32,
    ) -> Result<Self, ProgramError> {
        Ok(Self {
            reclaim: backend.load_program(shaders::RECLAIM, workgroup_size)?,
            age: backend.load_program(shaders::AGE, workgroup_size)?,
            spawn: backend.load_program(shaders::SPAWN, workgroup_size)?,
            workgroup_size,
        })
    }
}

/// Converts a spawn frequency into whole particles per tick, carrying the
/// fractional remainder so variable frame times do not drift the rate.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SpawnAccumulator {
    carry: f32,
}

impl SpawnAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `frequency * dt` and take out the whole part.
    pub fn advance(&mut self, frequency: f32, dt: f32) -> u32 {
        self.carry += frequency * dt;
        let whole = self.carry.trunc();
        self.carry -= whole;
        if whole > 0.0 {
            whole as u32
        } else {
            0
        }
    }

    /// Fraction carried into the next tick.
    pub fn carry(&self) -> f32 {
        self.carry
    }
}

/// How many particles a tick should try to spawn.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SpawnRequest {
    /// Use the spawn frequency and the accumulator.
    #[default]
    Rate,
    /// Exactly this many; frequency is ignored and the accumulator untouched.
    Exact(u32),
}

impl From<Option<u32>> for SpawnRequest {
    fn from(requested: Option<u32>) -> Self {
        requested.map_or(SpawnRequest::Rate, SpawnRequest::Exact)
    }
}

/// What a call to [`LifecycleEngine::tick`] did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// No programs attached; nothing was dispatched.
    Skipped,
    Completed {
        /// Spawns requested of the device, before the free-count clamp.
        spawn_count: u32,
        /// Compute dispatches issued.
        dispatches: u32,
    },
}

/// Drives the reclaim, age and spawn passes for one pool.
#[derive(Debug)]
pub struct LifecycleEngine {
    programs: Option<ProgramSet>,
    accumulator: SpawnAccumulator,
    rng: StdRng,
}

impl Default for LifecycleEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleEngine {
    /// An engine with no programs attached and an entropy-seeded spawn RNG.
    pub fn new() -> Self {
        Self {
            programs: None,
            accumulator: SpawnAccumulator::new(),
            rng: StdRng::from_entropy(),
        }
    }

    /// An engine whose spawn seeds are reproducible.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            ..Self::new()
        }
    }

    /// Attach programs built for `config`'s workgroup size.
    pub fn attach(&mut self, programs: ProgramSet, config: PoolConfig) -> Result<(), ProgramError> {
        if programs.workgroup_size != config.workgroup_size {
            return Err(ProgramError::WorkgroupMismatch {
                expected: config.workgroup_size,
                found: programs.workgroup_size,
            });
        }
        self.programs = Some(programs);
        Ok(())
    }

    /// Drop the attached programs; later ticks are skipped.
    pub fn detach(&mut self) {
        self.programs = None;
    }

    pub fn is_ready(&self) -> bool {
        self.programs.is_some()
    }

    pub fn accumulator(&self) -> &SpawnAccumulator {
        &self.accumulator
    }

    /// Run one simulation tick.
    pub fn tick<B: ComputeBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        pool: &BufferPool,
        params: &SpawnParams,
        dt: f32,
        request: SpawnRequest,
    ) -> TickOutcome {
        let Some(programs) = self.programs else {
            warn!("particle programs not loaded, skipping tick");
            return TickOutcome::Skipped;
        };

        let capacity = pool.capacity();
        let requested = match request {
            SpawnRequest::Rate => self.accumulator.advance(params.frequency, dt),
            SpawnRequest::Exact(n) => n,
        };
        // The device clamps further to the live free count.
        let spawn_count = requested.min(capacity);

        let _span = debug_span!("particle_tick", capacity, spawn_count, dt).entered();
        let pool_groups = group_count(capacity, programs.workgroup_size);
        let mut dispatches = 0;

        // Reclaim: rebuild the free list from scratch.
        backend.clear_words(pool.free_list(), 0, 1);
        backend.barrier();
        backend.use_program(programs.reclaim);
        backend.set_uniform("max_particles", capacity.into());
        backend.bind_storage(PARTICLES_SLOT, pool.particles());
        backend.bind_storage(FREE_LIST_SLOT, pool.free_list());
        backend.dispatch(pool_groups, 1, 1);
        backend.barrier();
        dispatches += 1;

        // Age every live slot.
        backend.use_program(programs.age);
        backend.set_uniform("delta_time", dt.into());
        backend.set_uniform("max_particles", capacity.into());
        backend.set_uniform("gravity", params.gravity.into());
        backend.set_uniform("size_falloff", params.size_falloff.into());
        backend.bind_storage(PARTICLES_SLOT, pool.particles());
        backend.dispatch(pool_groups, 1, 1);
        backend.barrier();
        dispatches += 1;

        if spawn_count > 0 {
            backend.use_program(programs.spawn);
            backend.set_uniform("n_new_particles", spawn_count.into());
            backend.set_uniform("random", self.rng.gen::<u32>().into());
            backend.set_uniform("minimum_life_length", params.minimum_life_length.into());
            backend.set_uniform("maximum_life_length", params.maximum_life_length.into());
            backend.set_uniform("minimum_start_size", params.minimum_start_size.into());
            backend.set_uniform("maximum_start_size", params.maximum_start_size.into());
            backend.set_uniform(
                "start_velocity_strength",
                params.start_velocity_strength.into(),
            );
            backend.set_uniform("source_position", params.source_position.into());
            backend.set_uniform("source_radius", params.source_radius.into());
            backend.bind_storage(PARTICLES_SLOT, pool.particles());
            backend.bind_storage(FREE_LIST_SLOT, pool.free_list());
            backend.dispatch(group_count(spawn_count, programs.workgroup_size), 1, 1);
            backend.barrier();
            dispatches += 1;
        }

        backend.submit();
        trace!(dispatches, carry = self.accumulator.carry(), "tick recorded");
        TickOutcome::Completed {
            spawn_count,
            dispatches,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostBackend;

    #[test]
    fn accumulator_carries_fraction() {
        let mut acc = SpawnAccumulator::new();
        // frequency * dt == 0.3 per tick
        assert_eq!(acc.advance(3.0, 0.1), 0);
        assert_eq!(acc.advance(3.0, 0.1), 0);
        assert_eq!(acc.advance(3.0, 0.1), 0);
        assert_eq!(acc.advance(3.0, 0.1), 1);
        assert!((acc.carry() - 0.2).abs() < 1e-5);
    }

    #[test]
    fn accumulator_ignores_negative_rates() {
        let mut acc = SpawnAccumulator::new();
        assert_eq!(acc.advance(-5.0, 1.0), 0);
        assert_eq!(acc.carry(), 0.0);
    }

    #[test]
    fn spawn_request_from_option() {
        assert_eq!(SpawnRequest::from(None), SpawnRequest::Rate);
        assert_eq!(SpawnRequest::from(Some(3)), SpawnRequest::Exact(3));
    }

    #[test]
    fn tick_without_programs_is_skipped() {
        let mut host = HostBackend::new();
        let pool = BufferPool::create(&mut host, PoolConfig::new(4)).unwrap();
        let mut engine = LifecycleEngine::with_seed(1);
        let outcome = engine.tick(&mut host, &pool, &SpawnParams::default(), 1.0, SpawnRequest::Exact(2));
        assert_eq!(outcome, TickOutcome::Skipped);
        assert_eq!(host.stats().dispatches, 0);
        assert_eq!(engine.accumulator().carry(), 0.0);
    }

    #[test]
    fn detached_engine_skips_ticks() {
        let mut host = HostBackend::new();
        let config = PoolConfig::new(8);
        let pool = BufferPool::create(&mut host, config).unwrap();
        let mut engine = LifecycleEngine::with_seed(5);
        engine
            .attach(ProgramSet::load(&mut host, config.workgroup_size).unwrap(), config)
            .unwrap();
        let params = SpawnParams::default();

        let outcome = engine.tick(&mut host, &pool, &params, 0.1, SpawnRequest::Exact(1));
        assert!(matches!(outcome, TickOutcome::Completed { .. }));
        let dispatched = host.stats().dispatches;

        engine.detach();
        assert!(!engine.is_ready());
        let outcome = engine.tick(&mut host, &pool, &params, 0.1, SpawnRequest::Exact(1));
        assert_eq!(outcome, TickOutcome::Skipped);
        assert_eq!(host.stats().dispatches, dispatched);
    }

    #[test]
    fn attach_rejects_mismatched_workgroup() {
        let mut host = HostBackend::new();
        let programs = ProgramSet::load(&mut host, 64).unwrap();
        let mut engine = LifecycleEngine::with_seed(1);
        let err = engine.attach(programs, PoolConfig::new(8)).unwrap_err();
        assert_eq!(
            err,
            ProgramError::WorkgroupMismatch {
                expected: 128,
                found: 64
            }
        );
        assert!(!engine.is_ready());
    }

    #[test]
    fn dispatch_counts_follow_group_size() {
        let mut host = HostBackend::new();
        let config = PoolConfig::new(300).with_workgroup_size(128);
        let pool = BufferPool::create(&mut host, config).unwrap();
        let programs = ProgramSet::load(&mut host, 128).unwrap();
        let mut engine = LifecycleEngine::with_seed(7);
        engine.attach(programs, config).unwrap();

        let outcome = engine.tick(&mut host, &pool, &SpawnParams::default(), 0.1, SpawnRequest::Exact(130));
        assert_eq!(
            outcome,
            TickOutcome::Completed {
                spawn_count: 130,
                dispatches: 3
            }
        );

        let log = host.take_dispatch_log();
        let groups: Vec<_> = log.iter().map(|r| (r.program, r.groups[0])).collect();
        assert_eq!(
            groups,
            vec![(shaders::RECLAIM, 3), (shaders::AGE, 3), (shaders::SPAWN, 2)]
        );
        assert_eq!(host.stats().hazards, 0);
        assert_eq!(host.stats().submits, 1);
    }

    #[test]
    fn zero_spawn_skips_spawn_pass() {
        let mut host = HostBackend::new();
        let config = PoolConfig::new(16);
        let pool = BufferPool::create(&mut host, config).unwrap();
        let mut engine = LifecycleEngine::with_seed(3);
        engine
            .attach(ProgramSet::load(&mut host, config.workgroup_size).unwrap(), config)
            .unwrap();

        let params = SpawnParams {
            frequency: 0.0,
            ..SpawnParams::default()
        };
        let outcome = engine.tick(&mut host, &pool, &params, 0.5, SpawnRequest::Rate);
        assert_eq!(
            outcome,
            TickOutcome::Completed {
                spawn_count: 0,
                dispatches: 2
            }
        );
    }

    #[test]
    fn host_clamps_exact_request_to_capacity() {
        let mut host = HostBackend::new();
        let config = PoolConfig::new(4);
        let pool = BufferPool::create(&mut host, config).unwrap();
        let mut engine = LifecycleEngine::with_seed(3);
        engine
            .attach(ProgramSet::load(&mut host, config.workgroup_size).unwrap(), config)
            .unwrap();
        let outcome = engine.tick(&mut host, &pool, &SpawnParams::default(), 0.5, SpawnRequest::Exact(1000));
        assert!(matches!(outcome, TickOutcome::Completed { spawn_count: 4, .. }));
    }
}
