//! CPU reference device.
//!
//! [`HostBackend`] implements [`ComputeBackend`] entirely in host memory. It
//! runs the kernels in [`kernels`], which mirror the WGSL programs, so the
//! lifecycle engine can be driven and inspected without a GPU.
//!
//! Workgroups execute one after another. Because ordering inside a pass is
//! irrelevant to the particle programs, that is a valid schedule for them.
//! What the host device does check is ordering *across* passes: a dispatch
//! that reads a buffer written since the last [`ComputeBackend::barrier`] is
//! counted as a hazard.

pub mod kernels;

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::{trace, warn};

use crate::backend::{apply_uniform, BufferId, ComputeBackend, ProgramId};
use crate::error::{GpuError, ProgramError};
use crate::shaders::{self, Access, ProgramSpec};
use crate::uniforms::{ParamBlock, UniformValue};

use kernels::{Kernel, Storage};

struct HostBuffer {
    label: String,
    words: Vec<u32>,
}

struct HostProgram {
    spec: &'static ProgramSpec,
    kernel: Kernel,
    workgroup_size: u32,
    params: ParamBlock,
}

/// One recorded dispatch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DispatchRecord {
    pub program: &'static str,
    pub groups: [u32; 3],
    pub invocations: u32,
}

/// Counters describing what the device has executed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HostStats {
    pub dispatches: u32,
    pub barriers: u32,
    pub submits: u32,
    /// Reads of a buffer written since the last barrier.
    pub hazards: u32,
}

/// CPU implementation of [`ComputeBackend`].
#[derive(Default)]
pub struct HostBackend {
    buffers: HashMap<BufferId, HostBuffer>,
    next_buffer: u32,
    programs: Vec<HostProgram>,
    current: Option<ProgramId>,
    bindings: BTreeMap<u32, BufferId>,
    written_since_barrier: HashSet<BufferId>,
    memory_limit: Option<u64>,
    allocated: u64,
    stats: HostStats,
    log: Vec<DispatchRecord>,
}

impl HostBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail allocations that would take total storage past `bytes`.
    pub fn with_memory_limit(mut self, bytes: u64) -> Self {
        self.memory_limit = Some(bytes);
        self
    }

    pub fn stats(&self) -> &HostStats {
        &self.stats
    }

    /// Drain the list of dispatches executed so far.
    pub fn take_dispatch_log(&mut self) -> Vec<DispatchRecord> {
        std::mem::take(&mut self.log)
    }

    /// Bytes currently allocated.
    pub fn allocated_bytes(&self) -> u64 {
        self.allocated
    }

    /// Overwrite part of a buffer from the host, as a test fixture would.
    pub fn write_buffer(
        &mut self,
        buffer: BufferId,
        byte_offset: usize,
        data: &[u8],
    ) -> Result<(), GpuError> {
        let target = self
            .buffers
            .get_mut(&buffer)
            .ok_or(GpuError::UnknownBuffer(buffer))?;
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(&mut target.words);
        let end = (byte_offset + data.len()).min(bytes.len());
        if byte_offset < end {
            bytes[byte_offset..end].copy_from_slice(&data[..end - byte_offset]);
        }
        Ok(())
    }

    fn current_program(&mut self) -> Option<&mut HostProgram> {
        let id = self.current?;
        self.programs.get_mut(id.0 as usize)
    }
}

impl ComputeBackend for HostBackend {
    fn create_storage(&mut self, label: &str, contents: &[u8]) -> Result<BufferId, GpuError> {
        let bytes = contents.len().next_multiple_of(4) as u64;
        if let Some(limit) = self.memory_limit {
            if self.allocated + bytes > limit {
                return Err(GpuError::Allocation {
                    label: label.to_string(),
                    bytes,
                    reason: format!("host memory limit of {limit} bytes exceeded"),
                });
            }
        }

        let mut words = vec![0u32; bytes as usize / 4];
        bytemuck::cast_slice_mut::<u32, u8>(&mut words)[..contents.len()].copy_from_slice(contents);

        let id = BufferId(self.next_buffer);
        self.next_buffer += 1;
        self.allocated += bytes;
        self.buffers.insert(
            id,
            HostBuffer {
                label: label.to_string(),
                words,
            },
        );
        trace!(?id, label, bytes, "allocated host buffer");
        Ok(id)
    }

    fn destroy_storage(&mut self, buffer: BufferId) {
        if let Some(released) = self.buffers.remove(&buffer) {
            self.allocated -= released.words.len() as u64 * 4;
            self.bindings.retain(|_, bound| *bound != buffer);
            trace!(?buffer, label = %released.label, "released host buffer");
        }
    }

    fn load_program(&mut self, name: &str, workgroup_size: u32) -> Result<ProgramId, ProgramError> {
        let spec = shaders::find(name).ok_or_else(|| ProgramError::NotFound(name.to_string()))?;
        let kernel = kernels::lookup(name).ok_or_else(|| ProgramError::NotFound(name.to_string()))?;
        if workgroup_size == 0 {
            return Err(ProgramError::Compile {
                name: name.to_string(),
                message: "workgroup size must be at least 1".into(),
            });
        }

        let id = ProgramId(self.programs.len() as u32);
        self.programs.push(HostProgram {
            spec,
            kernel,
            workgroup_size,
            params: ParamBlock::new(spec.layout()),
        });
        Ok(id)
    }

    fn use_program(&mut self, program: ProgramId) {
        if (program.0 as usize) < self.programs.len() {
            self.current = Some(program);
        } else {
            warn!(?program, "use_program with unknown handle");
            self.current = None;
        }
    }

    fn set_uniform(&mut self, name: &str, value: UniformValue) {
        let Some(program) = self.current_program() else {
            warn!(name, "set_uniform with no program in use");
            return;
        };
        apply_uniform(program.spec.name, &mut program.params, name, value);
    }

    fn bind_storage(&mut self, slot: u32, buffer: BufferId) {
        self.bindings.insert(slot, buffer);
    }

    fn clear_words(&mut self, buffer: BufferId, first_word: u32, word_count: u32) {
        let Some(target) = self.buffers.get_mut(&buffer) else {
            warn!(?buffer, "clear_words on unknown buffer");
            return;
        };
        let start = (first_word as usize).min(target.words.len());
        let end = (start + word_count as usize).min(target.words.len());
        target.words[start..end].fill(0);
        self.written_since_barrier.insert(buffer);
    }

    fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        let Some(id) = self.current else {
            warn!("dispatch with no program in use");
            return;
        };
        let program = &self.programs[id.0 as usize];
        let spec = program.spec;

        // Pull every bound buffer out so the kernel can borrow them together.
        let slot_count = spec.storage.iter().map(|b| b.slot + 1).max().unwrap_or(0) as usize;
        let mut slots = vec![Vec::new(); slot_count];
        let mut taken = Vec::new();
        for binding in spec.storage {
            let Some(&buffer) = self.bindings.get(&binding.slot) else {
                warn!(program = spec.name, slot = binding.slot, "storage slot not bound");
                continue;
            };
            if self.written_since_barrier.contains(&buffer) {
                self.stats.hazards += 1;
                warn!(
                    program = spec.name,
                    slot = binding.slot,
                    "buffer read before a barrier made earlier writes visible"
                );
            }
            if let Some(host) = self.buffers.get_mut(&buffer) {
                slots[binding.slot as usize] = std::mem::take(&mut host.words);
                taken.push((binding.slot, buffer, binding.access));
            }
        }

        let invocations = x.saturating_mul(y).saturating_mul(z).saturating_mul(program.workgroup_size);
        let mut storage = Storage::new(slots);
        for global_id in 0..invocations {
            (program.kernel)(&program.params, &mut storage, global_id);
        }

        let mut slots = storage.into_slots();
        for (slot, buffer, access) in taken {
            if let Some(host) = self.buffers.get_mut(&buffer) {
                host.words = std::mem::take(&mut slots[slot as usize]);
            }
            if access == Access::ReadWrite {
                self.written_since_barrier.insert(buffer);
            }
        }

        self.stats.dispatches += 1;
        self.log.push(DispatchRecord {
            program: spec.name,
            groups: [x, y, z],
            invocations,
        });
    }

    fn barrier(&mut self) {
        self.written_since_barrier.clear();
        self.stats.barriers += 1;
    }

    fn submit(&mut self) {
        self.stats.submits += 1;
    }

    fn read_buffer(&mut self, buffer: BufferId) -> Result<Vec<u8>, GpuError> {
        let host = self.buffers.get(&buffer).ok_or(GpuError::UnknownBuffer(buffer))?;
        Ok(bytemuck::cast_slice(&host.words).to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::particle::{initial_free_list, initial_particles, FreeListSnapshot};
    use crate::shaders::{FREE_LIST_SLOT, PARTICLES_SLOT};

    #[test]
    fn storage_round_trips() {
        let mut host = HostBackend::new();
        let id = host.create_storage("test", &[1, 2, 3, 4, 5]).unwrap();
        let bytes = host.read_buffer(id).unwrap();
        assert_eq!(bytes, vec![1, 2, 3, 4, 5, 0, 0, 0]);
        assert_eq!(host.allocated_bytes(), 8);

        host.destroy_storage(id);
        assert_eq!(host.allocated_bytes(), 0);
        assert!(matches!(host.read_buffer(id), Err(GpuError::UnknownBuffer(_))));
    }

    #[test]
    fn memory_limit_fails_allocation() {
        let mut host = HostBackend::new().with_memory_limit(16);
        assert!(host.create_storage("fits", &[0; 16]).is_ok());
        let err = host.create_storage("too big", &[0; 4]).unwrap_err();
        assert!(matches!(err, GpuError::Allocation { .. }));
    }

    #[test]
    fn unknown_program_is_reported() {
        let mut host = HostBackend::new();
        assert_eq!(
            host.load_program("birth", 128),
            Err(ProgramError::NotFound("birth".into()))
        );
        assert!(matches!(
            host.load_program(shaders::AGE, 0),
            Err(ProgramError::Compile { .. })
        ));
    }

    #[test]
    fn missing_barrier_is_counted_as_hazard() {
        let mut host = HostBackend::new();
        let particles = host
            .create_storage("particles", bytemuck::cast_slice(&initial_particles(4)))
            .unwrap();
        let free_list = host
            .create_storage("free list", bytemuck::cast_slice(&initial_free_list(4)))
            .unwrap();
        let reclaim = host.load_program(shaders::RECLAIM, 4).unwrap();

        host.use_program(reclaim);
        host.set_uniform("max_particles", 4u32.into());
        host.bind_storage(PARTICLES_SLOT, particles);
        host.bind_storage(FREE_LIST_SLOT, free_list);

        host.clear_words(free_list, 0, 1);
        host.dispatch(1, 1, 1);
        assert_eq!(host.stats().hazards, 1);

        host.barrier();
        host.clear_words(free_list, 0, 1);
        host.barrier();
        host.dispatch(1, 1, 1);
        assert_eq!(host.stats().hazards, 1);

        let words: Vec<u32> = bytemuck::cast_slice(&host.read_buffer(free_list).unwrap()).to_vec();
        assert_eq!(FreeListSnapshot::from_words(&words).sorted(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn dispatch_log_records_groups() {
        let mut host = HostBackend::new();
        let age = host.load_program(shaders::AGE, 8).unwrap();
        host.use_program(age);
        host.dispatch(3, 1, 1);
        let log = host.take_dispatch_log();
        assert_eq!(
            log,
            vec![DispatchRecord {
                program: shaders::AGE,
                groups: [3, 1, 1],
                invocations: 24
            }]
        );
        assert!(host.take_dispatch_log().is_empty());
    }

    #[test]
    fn undeclared_uniform_is_ignored() {
        let mut host = HostBackend::new();
        let age = host.load_program(shaders::AGE, 8).unwrap();
        host.use_program(age);
        host.set_uniform("not_a_param", 1.0f32.into());
        host.set_uniform("delta_time", 0.25f32.into());
        assert_eq!(host.programs[0].params.f32("delta_time"), 0.25);
    }
}
