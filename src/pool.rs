//! Device buffers backing one particle system.

use tracing::debug;

use crate::backend::{BufferId, ComputeBackend};
use crate::config::PoolConfig;
use crate::error::GpuError;
use crate::particle::{
    initial_free_list, initial_particles, FreeListSnapshot, ParticleSlot, SLOT_BYTES,
};

/// The Particle Array and Free-Slot List of one particle system.
///
/// Created once, seeded with every slot dead and every index free. After
/// construction only compute dispatches write to these buffers; the pool
/// itself exposes binding handles and diagnostic read-back, nothing else.
#[derive(Debug)]
pub struct BufferPool {
    config: PoolConfig,
    particles: BufferId,
    free_list: BufferId,
}

impl BufferPool {
    /// Allocate and seed both buffers.
    ///
    /// An allocation failure is returned as-is; callers treat it as fatal
    /// because the system cannot run without its buffers.
    pub fn create<B: ComputeBackend + ?Sized>(
        backend: &mut B,
        config: PoolConfig,
    ) -> Result<Self, GpuError> {
        let particles = backend.create_storage(
            "Particle Array",
            bytemuck::cast_slice(&initial_particles(config.capacity)),
        )?;
        let free_list = match backend.create_storage(
            "Free-Slot List",
            bytemuck::cast_slice(&initial_free_list(config.capacity)),
        ) {
            Ok(buffer) => buffer,
            Err(e) => {
                backend.destroy_storage(particles);
                return Err(e);
            }
        };

        debug!(
            capacity = config.capacity,
            bytes = config.capacity as usize * SLOT_BYTES,
            "particle pool created"
        );
        Ok(Self {
            config,
            particles,
            free_list,
        })
    }

    pub fn config(&self) -> PoolConfig {
        self.config
    }

    pub fn capacity(&self) -> u32 {
        self.config.capacity
    }

    /// Binding handle of the Particle Array.
    pub fn particles(&self) -> BufferId {
        self.particles
    }

    /// Binding handle of the Free-Slot List.
    pub fn free_list(&self) -> BufferId {
        self.free_list
    }

    /// Read the Free-Slot List back to the host.
    pub fn read_free_list<B: ComputeBackend + ?Sized>(
        &self,
        backend: &mut B,
    ) -> Result<FreeListSnapshot, GpuError> {
        let bytes = backend.read_buffer(self.free_list)?;
        let words: Vec<u32> = bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Ok(FreeListSnapshot::from_words(&words))
    }

    /// Read the Particle Array back to the host.
    pub fn read_particles<B: ComputeBackend + ?Sized>(
        &self,
        backend: &mut B,
    ) -> Result<Vec<ParticleSlot>, GpuError> {
        let bytes = backend.read_buffer(self.particles)?;
        Ok(bytes
            .chunks_exact(SLOT_BYTES)
            .take(self.config.capacity as usize)
            .map(bytemuck::pod_read_unaligned::<ParticleSlot>)
            .collect())
    }

    /// Release both buffers.
    pub fn destroy<B: ComputeBackend + ?Sized>(self, backend: &mut B) {
        backend.destroy_storage(self.particles);
        backend.destroy_storage(self.free_list);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostBackend;

    #[test]
    fn create_seeds_dead_slots_and_full_free_list() {
        let mut host = HostBackend::new();
        let pool = BufferPool::create(&mut host, PoolConfig::new(6)).unwrap();

        let free = pool.read_free_list(&mut host).unwrap();
        assert_eq!(free.count, 6);
        assert_eq!(free.indices, vec![0, 1, 2, 3, 4, 5]);

        let particles = pool.read_particles(&mut host).unwrap();
        assert_eq!(particles.len(), 6);
        assert!(particles.iter().all(|p| p.age < 0.0));
    }

    #[test]
    fn failed_free_list_allocation_releases_particles() {
        // Room for the particle array (4 * 48) but not the free list.
        let mut host = HostBackend::new().with_memory_limit(4 * 48 + 8);
        let err = BufferPool::create(&mut host, PoolConfig::new(4)).unwrap_err();
        assert!(matches!(err, GpuError::Allocation { .. }));
        assert_eq!(host.allocated_bytes(), 0);
    }

    #[test]
    fn destroy_releases_storage() {
        let mut host = HostBackend::new();
        let pool = BufferPool::create(&mut host, PoolConfig::new(3)).unwrap();
        assert!(host.allocated_bytes() > 0);
        pool.destroy(&mut host);
        assert_eq!(host.allocated_bytes(), 0);
    }
}
