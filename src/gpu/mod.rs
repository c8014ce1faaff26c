//! wgpu implementation of the compute device, plus the instanced renderer.
//!
//! [`WgpuBackend`] records everything into one command encoder per
//! submission. Dispatches recorded between two barriers share a compute pass;
//! a barrier ends the pass, and wgpu synchronises storage writes between
//! passes. Every dispatch gets its own snapshot of the current program's
//! parameter block, so setting a uniform after a dispatch never changes what
//! that dispatch sees.

mod camera;
mod renderer;

use std::collections::{BTreeMap, HashMap};
use std::sync::mpsc;

use tracing::{debug, info, trace, warn};
use wgpu::util::DeviceExt;

use crate::backend::{apply_uniform, BufferId, ComputeBackend, ProgramId};
use crate::error::{GpuError, ProgramError};
use crate::shaders::{self, Access, ProgramSpec};
use crate::uniforms::{ParamBlock, UniformValue};

pub use camera::{Camera, ProjectionSource, ViewSource, Viewport};
pub use renderer::{draw_ranges, InstancedRenderer, RenderUniforms, RenderView, QUAD_VERTICES};

struct GpuBuffer {
    label: String,
    buffer: wgpu::Buffer,
}

struct GpuProgram {
    spec: &'static ProgramSpec,
    pipeline: wgpu::ComputePipeline,
    storage_layout: wgpu::BindGroupLayout,
    params_layout: wgpu::BindGroupLayout,
    params: ParamBlock,
}

struct PendingDispatch {
    program: usize,
    storage: wgpu::BindGroup,
    params: wgpu::BindGroup,
    groups: [u32; 3],
}

/// Compute device backed by a wgpu device and queue.
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    buffers: HashMap<BufferId, GpuBuffer>,
    next_buffer: u32,
    programs: Vec<GpuProgram>,
    current: Option<ProgramId>,
    bindings: BTreeMap<u32, BufferId>,
    encoder: Option<wgpu::CommandEncoder>,
    pending: Vec<PendingDispatch>,
}

impl WgpuBackend {
    /// Open the default adapter without a surface.
    pub fn new() -> Result<Self, GpuError> {
        pollster::block_on(Self::new_async())
    }

    pub async fn new_async() -> Result<Self, GpuError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or(GpuError::NoAdapter)?;

        let adapter_info = adapter.get_info();
        info!(
            name = %adapter_info.name,
            backend = ?adapter_info.backend,
            "using GPU adapter"
        );

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Particle Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    memory_hints: Default::default(),
                },
                None,
            )
            .await?;

        Ok(Self::from_device(device, queue))
    }

    /// Wrap a device the application already owns.
    pub fn from_device(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self {
            device,
            queue,
            buffers: HashMap::new(),
            next_buffer: 0,
            programs: Vec::new(),
            current: None,
            bindings: BTreeMap::new(),
            encoder: None,
            pending: Vec::new(),
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// The wgpu buffer behind a handle, for binding in render passes.
    pub fn raw_buffer(&self, buffer: BufferId) -> Option<&wgpu::Buffer> {
        self.buffers.get(&buffer).map(|b| &b.buffer)
    }

    /// Record every pending dispatch into one compute pass.
    fn flush_pass(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let pending = std::mem::take(&mut self.pending);
        let encoder = self
            .encoder
            .get_or_insert_with(|| new_encoder(&self.device));

        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("Particle Compute Pass"),
            timestamp_writes: None,
        });
        for dispatch in &pending {
            let program = &self.programs[dispatch.program];
            pass.set_pipeline(&program.pipeline);
            pass.set_bind_group(0, &dispatch.storage, &[]);
            pass.set_bind_group(1, &dispatch.params, &[]);
            let [x, y, z] = dispatch.groups;
            pass.dispatch_workgroups(x, y, z);
        }
    }

    fn storage_layout(device: &wgpu::Device, spec: &ProgramSpec) -> wgpu::BindGroupLayout {
        let entries: Vec<wgpu::BindGroupLayoutEntry> = spec
            .storage
            .iter()
            .map(|binding| wgpu::BindGroupLayoutEntry {
                binding: binding.slot,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Storage {
                        read_only: binding.access == Access::Read,
                    },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            })
            .collect();
        device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(&format!("{} Storage Layout", spec.name)),
            entries: &entries,
        })
    }

    fn params_layout(device: &wgpu::Device, spec: &ProgramSpec) -> wgpu::BindGroupLayout {
        device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(&format!("{} Params Layout", spec.name)),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        })
    }
}

impl ComputeBackend for WgpuBackend {
    fn create_storage(&mut self, label: &str, contents: &[u8]) -> Result<BufferId, GpuError> {
        let bytes = contents.len().next_multiple_of(4) as u64;
        let limit = self.device.limits().max_storage_buffer_binding_size as u64;
        if bytes > limit {
            return Err(GpuError::Allocation {
                label: label.to_string(),
                bytes,
                reason: format!("exceeds max storage binding size of {limit} bytes"),
            });
        }

        let mut padded = contents.to_vec();
        padded.resize(bytes as usize, 0);

        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: &padded,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
        });
        let validation = pollster::block_on(self.device.pop_error_scope());
        let out_of_memory = pollster::block_on(self.device.pop_error_scope());
        if let Some(error) = out_of_memory.or(validation) {
            buffer.destroy();
            return Err(GpuError::Allocation {
                label: label.to_string(),
                bytes,
                reason: error.to_string(),
            });
        }

        let id = BufferId(self.next_buffer);
        self.next_buffer += 1;
        self.buffers.insert(
            id,
            GpuBuffer {
                label: label.to_string(),
                buffer,
            },
        );
        debug!(?id, label, bytes, "allocated storage buffer");
        Ok(id)
    }

    fn destroy_storage(&mut self, buffer: BufferId) {
        if let Some(released) = self.buffers.remove(&buffer) {
            released.buffer.destroy();
            self.bindings.retain(|_, bound| *bound != buffer);
            trace!(?buffer, label = %released.label, "released storage buffer");
        }
    }

    fn load_program(&mut self, name: &str, workgroup_size: u32) -> Result<ProgramId, ProgramError> {
        let spec = shaders::find(name).ok_or_else(|| ProgramError::NotFound(name.to_string()))?;
        let max_invocations = self.device.limits().max_compute_invocations_per_workgroup;
        if workgroup_size == 0 || workgroup_size > max_invocations {
            return Err(ProgramError::Compile {
                name: name.to_string(),
                message: format!("workgroup size {workgroup_size} outside 1..={max_invocations}"),
            });
        }

        let source = shaders::compose_compute(spec, workgroup_size);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(name),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });
        let storage_layout = Self::storage_layout(&self.device, spec);
        let params_layout = Self::params_layout(&self.device, spec);
        let pipeline_layout = self.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(name),
            bind_group_layouts: &[&storage_layout, &params_layout],
            push_constant_ranges: &[],
        });
        let pipeline = self.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(name),
            layout: Some(&pipeline_layout),
            module: &module,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: None,
        });
        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(ProgramError::Compile {
                name: name.to_string(),
                message: error.to_string(),
            });
        }

        let id = ProgramId(self.programs.len() as u32);
        self.programs.push(GpuProgram {
            spec,
            pipeline,
            storage_layout,
            params_layout,
            params: ParamBlock::new(spec.layout()),
        });
        debug!(name, workgroup_size, "compute program loaded");
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
        let Some(program) = self.current.and_then(|id| self.programs.get_mut(id.0 as usize)) else {
            warn!(name, "set_uniform with no program in use");
            return;
        };
        apply_uniform(program.spec.name, &mut program.params, name, value);
    }

    fn bind_storage(&mut self, slot: u32, buffer: BufferId) {
        self.bindings.insert(slot, buffer);
    }

    fn clear_words(&mut self, buffer: BufferId, first_word: u32, word_count: u32) {
        self.flush_pass();
        let Some(target) = self.buffers.get(&buffer).map(|b| &b.buffer) else {
            warn!(?buffer, "clear_words on unknown buffer");
            return;
        };
        let offset = first_word as u64 * 4;
        let size = (word_count as u64 * 4).min(target.size().saturating_sub(offset));
        if size > 0 {
            let encoder = self
                .encoder
                .get_or_insert_with(|| new_encoder(&self.device));
            encoder.clear_buffer(target, offset, Some(size));
        }
    }

    fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        let Some(id) = self.current else {
            warn!("dispatch with no program in use");
            return;
        };
        let program = &self.programs[id.0 as usize];
        let spec = program.spec;

        let mut entries = Vec::with_capacity(spec.storage.len());
        for binding in spec.storage {
            let Some(buffer) = self
                .bindings
                .get(&binding.slot)
                .and_then(|id| self.buffers.get(id))
            else {
                warn!(program = spec.name, slot = binding.slot, "storage slot not bound, dispatch dropped");
                return;
            };
            entries.push(wgpu::BindGroupEntry {
                binding: binding.slot,
                resource: buffer.buffer.as_entire_binding(),
            });
        }

        let storage = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(spec.name),
            layout: &program.storage_layout,
            entries: &entries,
        });
        let params_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(spec.name),
            contents: program.params.bytes(),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let params = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(spec.name),
            layout: &program.params_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: params_buffer.as_entire_binding(),
            }],
        });

        self.pending.push(PendingDispatch {
            program: id.0 as usize,
            storage,
            params,
            groups: [x, y, z],
        });
    }

    fn barrier(&mut self) {
        self.flush_pass();
    }

    fn submit(&mut self) {
        self.flush_pass();
        if let Some(encoder) = self.encoder.take() {
            self.queue.submit(std::iter::once(encoder.finish()));
        }
    }

    fn read_buffer(&mut self, buffer: BufferId) -> Result<Vec<u8>, GpuError> {
        self.submit();
        let source = &self
            .buffers
            .get(&buffer)
            .ok_or(GpuError::UnknownBuffer(buffer))?
            .buffer;
        let size = source.size();

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback Staging Buffer"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Readback Encoder"),
        });
        encoder.copy_buffer_to_buffer(source, 0, &staging, 0, size);
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|e| GpuError::BufferMapping(e.to_string()))?
            .map_err(|e| GpuError::BufferMapping(e.to_string()))?;

        let bytes = slice.get_mapped_range().to_vec();
        staging.unmap();
        Ok(bytes)
    }
}

fn new_encoder(device: &wgpu::Device) -> wgpu::CommandEncoder {
    device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("Particle Compute Encoder"),
    })
}
