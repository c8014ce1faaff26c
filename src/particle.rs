//! Device memory layout of the particle pool.
//!
//! Two arrays live on the device for every particle system:
//!
//! | Buffer | Layout |
//! |--------|--------|
//! | Particle Array | `capacity` × [`ParticleSlot`] (48 bytes each) |
//! | Free-Slot List | `u32` counter followed by `capacity` slot indices |
//!
//! A slot whose `age` is negative is dead. Slots are never created or
//! destroyed individually, only overwritten in place by the spawn pass.

use bytemuck::{Pod, Zeroable};
use glam::Vec3;

/// Age written into a slot to mark it dead.
pub const DEAD_AGE: f32 = -1.0;

/// Words in front of the indices in the Free-Slot List.
pub const FREE_LIST_HEADER_WORDS: usize = 1;

/// One fixed-index record in the Particle Array.
///
/// Padded to 48 bytes so the layout matches the WGSL `Particle` struct
/// (`vec3<f32>` is 16-byte aligned, struct size rounds up to 16).
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct ParticleSlot {
    pub position: [f32; 3],
    pub size: f32,
    pub velocity: [f32; 3],
    /// Elapsed lifetime; negative means dead.
    pub age: f32,
    /// Age at which the slot is reclaimed.
    pub life_length: f32,
    pub _pad: [f32; 3],
}

impl ParticleSlot {
    /// A zeroed slot carrying the dead sentinel.
    pub const DEAD: Self = Self {
        position: [0.0; 3],
        size: 0.0,
        velocity: [0.0; 3],
        age: DEAD_AGE,
        life_length: 0.0,
        _pad: [0.0; 3],
    };

    /// Whether the slot is occupied.
    #[inline]
    pub fn is_alive(&self) -> bool {
        self.age >= 0.0
    }

    pub fn position(&self) -> Vec3 {
        Vec3::from_array(self.position)
    }

    pub fn velocity(&self) -> Vec3 {
        Vec3::from_array(self.velocity)
    }
}

/// Size of one slot in bytes.
pub const SLOT_BYTES: usize = std::mem::size_of::<ParticleSlot>();

/// WGSL declaration matching [`ParticleSlot`] and the Free-Slot List.
pub const WGSL_STRUCTS: &str = r#"
struct Particle {
    position: vec3<f32>,
    size: f32,
    velocity: vec3<f32>,
    age: f32,
    life_length: f32,
    _pad0: f32,
    _pad1: f32,
    _pad2: f32,
};

struct FreeList {
    count: atomic<u32>,
    indices: array<u32>,
};
"#;

/// Initial Particle Array contents: every slot zeroed and dead.
pub fn initial_particles(capacity: u32) -> Vec<ParticleSlot> {
    vec![ParticleSlot::DEAD; capacity as usize]
}

/// Initial Free-Slot List contents: `[capacity, 0, 1, .., capacity - 1]`.
pub fn initial_free_list(capacity: u32) -> Vec<u32> {
    let mut words = Vec::with_capacity(capacity as usize + FREE_LIST_HEADER_WORDS);
    words.push(capacity);
    words.extend(0..capacity);
    words
}

/// Host copy of the Free-Slot List taken by a diagnostic read-back.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FreeListSnapshot {
    /// Counter value at read-back time.
    pub count: u32,
    /// The first `count` entries (clamped to capacity).
    pub indices: Vec<u32>,
}

impl FreeListSnapshot {
    /// Decode raw Free-Slot List words.
    pub fn from_words(words: &[u32]) -> Self {
        let count = words.first().copied().unwrap_or(0);
        let entries = &words[FREE_LIST_HEADER_WORDS.min(words.len())..];
        let valid = (count as usize).min(entries.len());
        Self {
            count,
            indices: entries[..valid].to_vec(),
        }
    }

    /// Indices sorted ascending, for set comparisons.
    pub fn sorted(&self) -> Vec<u32> {
        let mut sorted = self.indices.clone();
        sorted.sort_unstable();
        sorted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_matches_wgsl_layout() {
        assert_eq!(SLOT_BYTES, 48);
        assert_eq!(std::mem::offset_of!(ParticleSlot, size), 12);
        assert_eq!(std::mem::offset_of!(ParticleSlot, velocity), 16);
        assert_eq!(std::mem::offset_of!(ParticleSlot, age), 28);
        assert_eq!(std::mem::offset_of!(ParticleSlot, life_length), 32);
    }

    #[test]
    fn initial_particles_are_dead() {
        let slots = initial_particles(5);
        assert_eq!(slots.len(), 5);
        assert!(slots.iter().all(|s| !s.is_alive()));
        assert!(slots.iter().all(|s| s.age == DEAD_AGE && s.size == 0.0));
    }

    #[test]
    fn initial_free_list_is_ascending() {
        assert_eq!(initial_free_list(4), vec![4, 0, 1, 2, 3]);
        assert_eq!(initial_free_list(1), vec![1, 0]);
    }

    #[test]
    fn snapshot_clamps_count_to_entries() {
        let snapshot = FreeListSnapshot::from_words(&[9, 3, 1]);
        assert_eq!(snapshot.count, 9);
        assert_eq!(snapshot.indices, vec![3, 1]);
        assert_eq!(snapshot.sorted(), vec![1, 3]);
    }
}
