//! Registry of the particle programs and WGSL source composition.
//!
//! Each compute program is described once by a [`ProgramSpec`]: its storage
//! bindings, its named parameters and a WGSL body. The wgpu device compiles
//! [`compose_compute`]'s output; the host device runs the matching kernel in
//! [`crate::host::kernels`] and uses the same parameter layout.
//!
//! Binding convention shared by every program:
//!
//! | Group | Binding | Contents |
//! |-------|---------|----------|
//! | 0 | slot N | storage buffer bound with `bind_storage(N, ..)` |
//! | 1 | 0 | `Params` uniform block |

use crate::particle::WGSL_STRUCTS;
use crate::uniforms::{UniformKind, UniformLayout};

/// Name of the dead-list rebuild program.
pub const RECLAIM: &str = "reclaim";
/// Name of the life-update program.
pub const AGE: &str = "age";
/// Name of the birth program.
pub const SPAWN: &str = "spawn";

/// Storage binding slot of the Particle Array.
pub const PARTICLES_SLOT: u32 = 0;
/// Storage binding slot of the Free-Slot List.
pub const FREE_LIST_SLOT: u32 = 1;

/// Downward acceleration applied when gravity is enabled.
pub const GRAVITY: f32 = 9.81;

/// Per-invocation spacing of random seeds in the spawn pass.
pub const SEED_STRIDE: u32 = 9781;

pub const RENDER_SOURCE: &str = include_str!("shaders/render.wgsl");

/// Access mode of a storage binding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    Read,
    ReadWrite,
}

impl Access {
    fn wgsl(&self) -> &'static str {
        match self {
            Access::Read => "read",
            Access::ReadWrite => "read_write",
        }
    }
}

/// One storage binding of a program.
#[derive(Clone, Copy, Debug)]
pub struct StorageBinding {
    pub slot: u32,
    pub name: &'static str,
    pub ty: &'static str,
    pub access: Access,
}

/// Static description of a compute program.
#[derive(Debug)]
pub struct ProgramSpec {
    pub name: &'static str,
    pub storage: &'static [StorageBinding],
    pub params: &'static [(&'static str, UniformKind)],
    body: &'static str,
}

impl ProgramSpec {
    pub fn layout(&self) -> UniformLayout {
        UniformLayout::new(self.params)
    }
}

const PARTICLES_READ: StorageBinding = StorageBinding {
    slot: PARTICLES_SLOT,
    name: "particles",
    ty: "array<Particle>",
    access: Access::Read,
};

const PARTICLES_READ_WRITE: StorageBinding = StorageBinding {
    access: Access::ReadWrite,
    ..PARTICLES_READ
};

const FREE_LIST: StorageBinding = StorageBinding {
    slot: FREE_LIST_SLOT,
    name: "free_list",
    ty: "FreeList",
    access: Access::ReadWrite,
};

pub static PROGRAMS: &[ProgramSpec] = &[
    ProgramSpec {
        name: RECLAIM,
        storage: &[PARTICLES_READ, FREE_LIST],
        params: &[("max_particles", UniformKind::U32)],
        body: include_str!("shaders/reclaim.wgsl"),
    },
    ProgramSpec {
        name: AGE,
        storage: &[PARTICLES_READ_WRITE],
        params: &[
            ("delta_time", UniformKind::F32),
            ("max_particles", UniformKind::U32),
            ("gravity", UniformKind::Bool),
            ("size_falloff", UniformKind::F32),
        ],
        body: include_str!("shaders/age.wgsl"),
    },
    ProgramSpec {
        name: SPAWN,
        storage: &[PARTICLES_READ_WRITE, FREE_LIST],
        params: &[
            ("n_new_particles", UniformKind::U32),
            ("random", UniformKind::U32),
            ("minimum_life_length", UniformKind::F32),
            ("maximum_life_length", UniformKind::F32),
            ("minimum_start_size", UniformKind::F32),
            ("maximum_start_size", UniformKind::F32),
            ("start_velocity_strength", UniformKind::F32),
            ("source_position", UniformKind::Vec3),
            ("source_radius", UniformKind::Vec3),
        ],
        body: include_str!("shaders/spawn.wgsl"),
    },
];

/// Find a program by name.
pub fn find(name: &str) -> Option<&'static ProgramSpec> {
    PROGRAMS.iter().find(|p| p.name == name)
}

/// Hash-based random numbers shared by every program. Mirrored by
/// [`crate::host::kernels::hash`].
const RANDOM_WGSL: &str = r#"
fn hash(n: u32) -> u32 {
    var x = n;
    x = x ^ (x >> 16u);
    x = x * 0x7feb352du;
    x = x ^ (x >> 15u);
    x = x * 0x846ca68bu;
    x = x ^ (x >> 16u);
    return x;
}

fn rand01(seed: u32) -> f32 {
    return f32(hash(seed)) / 4294967295.0;
}

fn random_unit_vector(seed: u32) -> vec3<f32> {
    let z = rand01(seed) * 2.0 - 1.0;
    let phi = rand01(seed + 1u) * 6.2831853;
    let r = sqrt(max(0.0, 1.0 - z * z));
    return vec3<f32>(r * cos(phi), r * sin(phi), z);
}
"#;

/// Build the complete WGSL module for a compute program.
pub fn compose_compute(spec: &ProgramSpec, workgroup_size: u32) -> String {
    let mut src = String::new();
    src.push_str(WGSL_STRUCTS);
    src.push('\n');
    src.push_str(&spec.layout().wgsl_struct("Params"));
    src.push_str(&format!(
        "\nconst GRAVITY: f32 = {GRAVITY:?};\nconst SEED_STRIDE: u32 = {SEED_STRIDE}u;\n"
    ));

    for binding in spec.storage {
        src.push_str(&format!(
            "\n@group(0) @binding({})\nvar<storage, {}> {}: {};\n",
            binding.slot,
            binding.access.wgsl(),
            binding.name,
            binding.ty
        ));
    }
    src.push_str("\n@group(1) @binding(0)\nvar<uniform> params: Params;\n");
    src.push_str(RANDOM_WGSL);

    src.push_str(&format!(
        "\n@compute @workgroup_size({workgroup_size})\nfn main(@builtin(global_invocation_id) global_id: vec3<u32>) {{\n"
    ));
    src.push_str(spec.body);
    src.push_str("}\n");
    src
}

/// Build the complete WGSL module for the instanced render program.
pub fn compose_render() -> String {
    format!("{WGSL_STRUCTS}\n{RENDER_SOURCE}")
}
