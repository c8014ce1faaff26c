//! Host kernels mirroring the WGSL compute programs.
//!
//! Each kernel is called once per invocation with the invocation's global
//! index, exactly like the WGSL `main` entry point. Out-of-range accesses
//! are dropped the way robust buffer access drops them on a device.

use glam::Vec3;

use crate::particle::{ParticleSlot, DEAD_AGE, FREE_LIST_HEADER_WORDS};
use crate::shaders::{self, FREE_LIST_SLOT, GRAVITY, PARTICLES_SLOT, SEED_STRIDE};
use crate::uniforms::ParamBlock;

/// Signature of a host kernel.
pub type Kernel = fn(params: &ParamBlock, storage: &mut Storage, global_id: u32);

/// Find the kernel registered under a program name.
pub fn lookup(name: &str) -> Option<Kernel> {
    match name {
        shaders::RECLAIM => Some(reclaim),
        shaders::AGE => Some(age),
        shaders::SPAWN => Some(spawn),
        _ => None,
    }
}

/// Storage buffers bound for one dispatch, indexed by binding slot.
#[derive(Debug, Default)]
pub struct Storage {
    slots: Vec<Vec<u32>>,
}

impl Storage {
    pub(crate) fn new(slots: Vec<Vec<u32>>) -> Self {
        Self { slots }
    }

    pub(crate) fn into_slots(self) -> Vec<Vec<u32>> {
        self.slots
    }

    fn as_particles(words: &mut [u32]) -> &mut [ParticleSlot] {
        bytemuck::try_cast_slice_mut(words).unwrap_or(&mut [])
    }

    /// The Particle Array binding.
    pub fn particles(&mut self) -> &mut [ParticleSlot] {
        match self.slots.get_mut(PARTICLES_SLOT as usize) {
            Some(words) => Self::as_particles(words),
            None => &mut [],
        }
    }

    /// The Particle Array and Free-Slot List bindings together.
    pub fn particles_and_free_list(&mut self) -> (&mut [ParticleSlot], &mut [u32]) {
        if self.slots.len() <= FREE_LIST_SLOT as usize {
            self.slots.resize_with(FREE_LIST_SLOT as usize + 1, Vec::new);
        }
        let (head, tail) = self.slots.split_at_mut(FREE_LIST_SLOT as usize);
        let particles = Self::as_particles(&mut head[PARTICLES_SLOT as usize]);
        (particles, &mut tail[0])
    }
}

/// Integer hash shared with the WGSL programs.
pub fn hash(n: u32) -> u32 {
    let mut x = n;
    x ^= x >> 16;
    x = x.wrapping_mul(0x7feb_352d);
    x ^= x >> 15;
    x = x.wrapping_mul(0x846c_a68b);
    x ^= x >> 16;
    x
}

/// Uniform value in `[0, 1]`.
pub fn rand01(seed: u32) -> f32 {
    hash(seed) as f32 / 4_294_967_295.0
}

/// Uniform direction on the unit sphere.
pub fn random_unit_vector(seed: u32) -> Vec3 {
    let z = rand01(seed) * 2.0 - 1.0;
    let phi = rand01(seed.wrapping_add(1)) * 6.283_185_3;
    let r = (1.0 - z * z).max(0.0).sqrt();
    Vec3::new(r * phi.cos(), r * phi.sin(), z)
}

fn mix(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

/// Append every dead slot to the Free-Slot List.
pub fn reclaim(params: &ParamBlock, storage: &mut Storage, global_id: u32) {
    if global_id >= params.u32("max_particles") {
        return;
    }
    let (particles, free_list) = storage.particles_and_free_list();
    let Some(slot) = particles.get(global_id as usize) else {
        return;
    };
    if slot.age < 0.0 {
        let Some(count) = free_list.first_mut() else {
            return;
        };
        let position = *count;
        *count += 1;
        if let Some(entry) = free_list.get_mut(FREE_LIST_HEADER_WORDS + position as usize) {
            *entry = global_id;
        }
    }
}

/// Advance one live slot by `delta_time`, killing it at the end of its life.
pub fn age(params: &ParamBlock, storage: &mut Storage, global_id: u32) {
    if global_id >= params.u32("max_particles") {
        return;
    }
    let Some(p) = storage.particles().get_mut(global_id as usize) else {
        return;
    };
    if p.age < 0.0 {
        return;
    }

    let dt = params.f32("delta_time");
    p.age += dt;
    if p.age >= p.life_length {
        p.age = DEAD_AGE;
        return;
    }

    if params.bool("gravity") {
        p.velocity[1] -= GRAVITY * dt;
    }
    let position = p.position() + p.velocity() * dt;
    p.position = position.to_array();
    p.size = (p.size - params.f32("size_falloff") * dt).max(0.0);
}

/// Pop one free slot and initialise a new particle in it.
pub fn spawn(params: &ParamBlock, storage: &mut Storage, global_id: u32) {
    if global_id >= params.u32("n_new_particles") {
        return;
    }
    let (particles, free_list) = storage.particles_and_free_list();

    // Invocations run one at a time here, so the compare-exchange loop of
    // the WGSL program reduces to a guarded decrement.
    let Some(count) = free_list.first_mut() else {
        return;
    };
    if *count == 0 {
        return;
    }
    *count -= 1;
    let top = *count as usize;
    let Some(&slot) = free_list.get(FREE_LIST_HEADER_WORDS + top) else {
        return;
    };

    let seed = params
        .u32("random")
        .wrapping_add(global_id.wrapping_mul(SEED_STRIDE));

    let radius = rand01(seed.wrapping_add(2)).powf(1.0 / 3.0);
    let offset = random_unit_vector(seed.wrapping_add(3)) * radius;
    let position = params.vec3("source_position") + offset * params.vec3("source_radius");
    let velocity =
        random_unit_vector(seed.wrapping_add(5)) * params.f32("start_velocity_strength");

    let Some(p) = particles.get_mut(slot as usize) else {
        return;
    };
    *p = ParticleSlot {
        position: position.to_array(),
        size: mix(
            params.f32("minimum_start_size"),
            params.f32("maximum_start_size"),
            rand01(seed.wrapping_add(1)),
        ),
        velocity: velocity.to_array(),
        age: 0.0,
        life_length: mix(
            params.f32("minimum_life_length"),
            params.f32("maximum_life_length"),
            rand01(seed),
        ),
        _pad: [0.0; 3],
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::particle::{initial_free_list, initial_particles};
    use crate::shaders::find;
    use crate::uniforms::UniformValue;

    fn params_for(name: &str, values: &[(&str, UniformValue)]) -> ParamBlock {
        let mut block = ParamBlock::new(find(name).unwrap().layout());
        for (key, value) in values {
            block.set(key, *value);
        }
        block
    }

    fn storage_with(particles: &[ParticleSlot], free_list: Vec<u32>) -> Storage {
        Storage::new(vec![bytemuck::cast_slice(particles).to_vec(), free_list])
    }

    fn alive(age: f32, life_length: f32) -> ParticleSlot {
        ParticleSlot {
            age,
            life_length,
            size: 1.0,
            ..ParticleSlot::DEAD
        }
    }

    #[test]
    fn random_values_stay_in_range() {
        for seed in 0..1000 {
            let r = rand01(seed);
            assert!((0.0..=1.0).contains(&r));
            let v = random_unit_vector(seed);
            assert!((v.length() - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn reclaim_lists_only_dead_slots() {
        let particles = [alive(0.0, 1.0), ParticleSlot::DEAD, alive(0.5, 1.0), ParticleSlot::DEAD];
        let mut storage = storage_with(&particles, vec![0; 5]);
        let params = params_for(shaders::RECLAIM, &[("max_particles", 4u32.into())]);
        for id in 0..8 {
            reclaim(&params, &mut storage, id);
        }
        let (_, free_list) = storage.particles_and_free_list();
        assert_eq!(&free_list[..3], &[2, 1, 3]);
    }

    #[test]
    fn age_kills_at_life_length() {
        let particles = [alive(0.5, 1.0), alive(0.2, 1.0)];
        let mut storage = storage_with(&particles, Vec::new());
        let params = params_for(
            shaders::AGE,
            &[
                ("delta_time", 0.5f32.into()),
                ("max_particles", 2u32.into()),
            ],
        );
        age(&params, &mut storage, 0);
        age(&params, &mut storage, 1);
        let particles = storage.particles();
        assert_eq!(particles[0].age, DEAD_AGE);
        assert!((particles[1].age - 0.7).abs() < 1e-6);
    }

    #[test]
    fn age_clamps_size_and_applies_gravity() {
        let particles = [alive(0.0, 10.0)];
        let mut storage = storage_with(&particles, Vec::new());
        let params = params_for(
            shaders::AGE,
            &[
                ("delta_time", 1.0f32.into()),
                ("max_particles", 1u32.into()),
                ("gravity", true.into()),
                ("size_falloff", 5.0f32.into()),
            ],
        );
        age(&params, &mut storage, 0);
        let p = storage.particles()[0];
        assert_eq!(p.size, 0.0);
        assert!((p.velocity[1] + GRAVITY).abs() < 1e-5);
        assert!((p.position[1] + GRAVITY).abs() < 1e-5);
    }

    #[test]
    fn spawn_stops_when_free_list_is_empty() {
        let particles = initial_particles(2);
        let mut storage = storage_with(&particles, initial_free_list(2));
        let params = params_for(
            shaders::SPAWN,
            &[
                ("n_new_particles", 5u32.into()),
                ("maximum_life_length", 2.0f32.into()),
                ("minimum_life_length", 1.0f32.into()),
            ],
        );
        for id in 0..5 {
            spawn(&params, &mut storage, id);
        }
        let (particles, free_list) = storage.particles_and_free_list();
        assert_eq!(free_list[0], 0);
        assert!(particles.iter().all(|p| p.age == 0.0));
        assert!(particles.iter().all(|p| (1.0..=2.0).contains(&p.life_length)));
    }

    #[test]
    fn spawn_positions_stay_inside_ellipsoid() {
        let capacity = 256;
        let particles = initial_particles(capacity);
        let mut storage = storage_with(&particles, initial_free_list(capacity));
        let origin = Vec3::new(1.0, 2.0, 3.0);
        let radius = Vec3::new(4.0, 0.5, 2.0);
        let params = params_for(
            shaders::SPAWN,
            &[
                ("n_new_particles", capacity.into()),
                ("random", 1234u32.into()),
                ("source_position", origin.into()),
                ("source_radius", radius.into()),
                ("start_velocity_strength", 3.0f32.into()),
            ],
        );
        for id in 0..capacity {
            spawn(&params, &mut storage, id);
        }
        for p in storage.particles().iter() {
            let local = (p.position() - origin) / radius;
            assert!(local.length() <= 1.0 + 1e-4);
            assert!((p.velocity().length() - 3.0).abs() < 1e-3);
        }
    }

    #[test]
    fn unknown_kernel_is_not_found() {
        assert!(lookup("birth").is_none());
        assert!(lookup(shaders::SPAWN).is_some());
    }
}
