//! The compute stage interface every pass is issued through.
//!
//! A [`ComputeBackend`] looks like a minimal graphics API: load a program,
//! make it current, set named parameters, bind storage buffers to numbered
//! slots, dispatch workgroups, and insert a barrier before anything that
//! reads what the dispatch wrote. The lifecycle engine only talks to this
//! trait, so the same tick runs on [`crate::gpu::WgpuBackend`] and on the CPU
//! reference device [`crate::host::HostBackend`].

use tracing::{trace, warn};

use crate::error::{GpuError, ProgramError};
use crate::uniforms::{ParamBlock, SetOutcome, UniformValue};

/// Handle to a device storage buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferId(pub(crate) u32);

/// Handle to a loaded compute program.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ProgramId(pub(crate) u32);

/// A device that can run the particle compute passes.
pub trait ComputeBackend {
    /// Allocate a storage buffer initialised with `contents`.
    fn create_storage(&mut self, label: &str, contents: &[u8]) -> Result<BufferId, GpuError>;

    /// Release a storage buffer. Unknown handles are ignored.
    fn destroy_storage(&mut self, buffer: BufferId);

    /// Load the named program with its entry point sized to `workgroup_size`.
    fn load_program(&mut self, name: &str, workgroup_size: u32) -> Result<ProgramId, ProgramError>;

    /// Make `program` current for `set_uniform` and `dispatch`.
    fn use_program(&mut self, program: ProgramId);

    /// Set a parameter of the current program. Names the program does not
    /// declare are ignored.
    fn set_uniform(&mut self, name: &str, value: UniformValue);

    /// Bind `buffer` to storage binding point `slot`.
    fn bind_storage(&mut self, slot: u32, buffer: BufferId);

    /// Zero `word_count` words of `buffer` starting at `first_word`, ordered
    /// with the surrounding dispatches.
    fn clear_words(&mut self, buffer: BufferId, first_word: u32, word_count: u32);

    /// Run the current program over `x * y * z` workgroups.
    fn dispatch(&mut self, x: u32, y: u32, z: u32);

    /// Make every write recorded so far visible to everything recorded after.
    fn barrier(&mut self);

    /// Hand recorded work to the device without waiting for it.
    fn submit(&mut self);

    /// Copy a buffer back to the host. Blocks until the device is done with it.
    fn read_buffer(&mut self, buffer: BufferId) -> Result<Vec<u8>, GpuError>;
}

/// Store a named parameter, logging names the program does not declare and
/// values of the wrong type.
pub(crate) fn apply_uniform(program: &str, params: &mut ParamBlock, name: &str, value: UniformValue) {
    match params.set(name, value) {
        SetOutcome::Applied => {}
        SetOutcome::UnknownName => trace!(program, name, "ignoring undeclared uniform"),
        SetOutcome::KindMismatch { declared, given } => warn!(
            program,
            name,
            ?declared,
            ?given,
            "uniform type mismatch, value ignored"
        ),
    }
}

/// Workgroups needed to cover `items` invocations: `ceil(items / group_size)`.
#[inline]
pub fn group_count(items: u32, group_size: u32) -> u32 {
    items.div_ceil(group_size.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_count_rounds_up() {
        assert_eq!(group_count(0, 128), 0);
        assert_eq!(group_count(1, 128), 1);
        assert_eq!(group_count(128, 128), 1);
        assert_eq!(group_count(129, 128), 2);
        assert_eq!(group_count(1000, 256), 4);
    }

    #[test]
    fn group_count_tolerates_zero_group_size() {
        assert_eq!(group_count(5, 0), 5);
    }
}
