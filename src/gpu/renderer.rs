//! Instanced billboard renderer.
//!
//! One unit quad (four corners, drawn as a triangle strip) is instanced
//! `capacity` times. The vertex stage reads slot `instance_index` straight
//! from the Particle Array storage buffer; dead slots collapse outside the
//! clip volume, so nothing is compacted on the host. Depth is tested but not
//! written, and colours are alpha-blended over whatever the target holds.

use std::collections::hash_map::{Entry, HashMap};
use std::ops::Range;

use bytemuck::{Pod, Zeroable};
use tracing::{debug, warn};
use wgpu::util::DeviceExt;

use super::camera::{ProjectionSource, ViewSource};
use super::WgpuBackend;
use crate::backend::BufferId;
use crate::config::SpawnParams;
use crate::shaders;
use crate::system::ParticleSystem;
use crate::textures::{FilterMode, ParticleImage};

/// Corner position and texture coordinate of the unit quad, in strip order.
pub const QUAD_VERTICES: [[f32; 4]; 4] = [
    [-0.5, -0.5, 0.0, 0.0],
    [0.5, -0.5, 1.0, 0.0],
    [-0.5, 0.5, 0.0, 1.0],
    [0.5, 0.5, 1.0, 1.0],
];

/// Vertex and instance ranges for drawing a pool of `capacity` slots.
pub fn draw_ranges(capacity: u32) -> (Range<u32>, Range<u32>) {
    (0..QUAD_VERTICES.len() as u32, 0..capacity)
}

/// Uniform block of the render program.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct RenderUniforms {
    pub view: [[f32; 4]; 4],
    pub proj: [[f32; 4]; 4],
    pub cam_right: [f32; 3],
    pub has_image: u32,
    pub cam_up: [f32; 3],
    pub _pad: f32,
    pub start_color: [f32; 4],
    pub end_color: [f32; 4],
}

impl RenderUniforms {
    pub fn new<V, P>(view: &V, projection: &P, params: &SpawnParams, has_image: bool) -> Self
    where
        V: ViewSource + ?Sized,
        P: ProjectionSource + ?Sized,
    {
        Self {
            view: view.view_matrix().to_cols_array_2d(),
            proj: projection.perspective_matrix().to_cols_array_2d(),
            cam_right: view.right().to_array(),
            has_image: has_image as u32,
            cam_up: view.up().to_array(),
            _pad: 0.0,
            start_color: params.start_color.to_array(),
            end_color: params.end_color.to_array(),
        }
    }
}

/// Attachments to draw into. Both are loaded, never cleared.
pub struct RenderView<'a> {
    pub color: &'a wgpu::TextureView,
    pub depth: Option<&'a wgpu::TextureView>,
}

struct UploadedImage {
    bind_group: wgpu::BindGroup,
    has_image: bool,
}

/// Uploads kept per particle system, keyed by the system's particle buffer.
/// Buffer ids are never reused on a device, so a key names one system.
struct ImageSlots<T> {
    slots: HashMap<BufferId, (u64, T)>,
}

impl<T> ImageSlots<T> {
    fn new() -> Self {
        Self {
            slots: HashMap::new(),
        }
    }

    /// The upload for `owner` at `generation`, running `upload` when the
    /// owner has none yet or its image changed since.
    fn get_or_upload(&mut self, owner: BufferId, generation: u64, upload: impl FnOnce() -> T) -> &T {
        match self.slots.entry(owner) {
            Entry::Occupied(entry) => {
                let slot = entry.into_mut();
                if slot.0 != generation {
                    *slot = (generation, upload());
                }
                &slot.1
            }
            Entry::Vacant(entry) => &entry.insert((generation, upload())).1,
        }
    }
}

/// Draws particle systems as camera-facing quads.
pub struct InstancedRenderer {
    pipeline: wgpu::RenderPipeline,
    quad: wgpu::Buffer,
    particles_layout: wgpu::BindGroupLayout,
    params_layout: wgpu::BindGroupLayout,
    image_layout: wgpu::BindGroupLayout,
    images: ImageSlots<UploadedImage>,
}

impl InstancedRenderer {
    /// Build the render pipeline for a colour target format and an optional
    /// depth format.
    pub fn new(
        device: &wgpu::Device,
        color_format: wgpu::TextureFormat,
        depth_format: Option<wgpu::TextureFormat>,
    ) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Particle Render Shader"),
            source: wgpu::ShaderSource::Wgsl(shaders::compose_render().into()),
        });

        let particles_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Particle Render Storage Layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Storage { read_only: true },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });

        let params_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Particle Render Params Layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });

        let image_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Particle Image Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Particle Render Pipeline Layout"),
            bind_group_layouts: &[&particles_layout, &params_layout, &image_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Particle Render Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: std::mem::size_of::<[f32; 4]>() as wgpu::BufferAddress,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &[
                        wgpu::VertexAttribute {
                            offset: 0,
                            shader_location: 0,
                            format: wgpu::VertexFormat::Float32x2, // corner
                        },
                        wgpu::VertexAttribute {
                            offset: 8,
                            shader_location: 1,
                            format: wgpu::VertexFormat::Float32x2, // uv
                        },
                    ],
                }],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: color_format,
                    blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleStrip,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: depth_format.map(|format| wgpu::DepthStencilState {
                format,
                depth_write_enabled: false,
                depth_compare: wgpu::CompareFunction::Less,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        let quad = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Particle Quad"),
            contents: bytemuck::cast_slice(&QUAD_VERTICES),
            usage: wgpu::BufferUsages::VERTEX,
        });

        Self {
            pipeline,
            quad,
            particles_layout,
            params_layout,
            image_layout,
            images: ImageSlots::new(),
        }
    }

    /// Record one draw of `system` into `encoder`.
    pub fn render<V, P>(
        &mut self,
        backend: &WgpuBackend,
        encoder: &mut wgpu::CommandEncoder,
        target: RenderView<'_>,
        system: &ParticleSystem,
        view: &V,
        projection: &P,
    ) where
        V: ViewSource + ?Sized,
        P: ProjectionSource + ?Sized,
    {
        let Some(particles) = backend.raw_buffer(system.pool().particles()) else {
            warn!("particle buffer not found on this device, nothing drawn");
            return;
        };
        let device = backend.device();
        let image = sync_image(&mut self.images, &self.image_layout, device, backend.queue(), system);

        let uniforms = RenderUniforms::new(view, projection, &system.properties, image.has_image);
        let params_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Particle Render Params"),
            contents: bytemuck::bytes_of(&uniforms),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let params = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Particle Render Params"),
            layout: &self.params_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: params_buffer.as_entire_binding(),
            }],
        });
        let storage = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Particle Render Storage"),
            layout: &self.particles_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: particles.as_entire_binding(),
            }],
        });

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Particle Render Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target.color,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: target.depth.map(|depth| {
                wgpu::RenderPassDepthStencilAttachment {
                    view: depth,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        let (vertices, instances) = draw_ranges(system.capacity());
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &storage, &[]);
        pass.set_bind_group(1, &params, &[]);
        pass.set_bind_group(2, &image.bind_group, &[]);
        pass.set_vertex_buffer(0, self.quad.slice(..));
        pass.draw(vertices, instances);
    }
}

/// The system's uploaded image, re-uploaded if it changed since its last draw.
fn sync_image<'a>(
    images: &'a mut ImageSlots<UploadedImage>,
    layout: &wgpu::BindGroupLayout,
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    system: &ParticleSystem,
) -> &'a UploadedImage {
    let owner = system.pool().particles();
    let generation = system.image_generation();
    images.get_or_upload(owner, generation, || {
        let (source, has_image) = match system.image() {
            Some(image) => (image.clone(), true),
            None => (ParticleImage::solid_white(), false),
        };
        let bind_group = upload(device, queue, layout, &source);
        debug!(
            ?owner,
            generation,
            width = source.width(),
            height = source.height(),
            mips = source.levels().len(),
            "particle image uploaded"
        );
        UploadedImage { bind_group, has_image }
    })
}

fn upload(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    layout: &wgpu::BindGroupLayout,
    image: &ParticleImage,
) -> wgpu::BindGroup {
    let levels = image.levels();
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Particle Image"),
        size: wgpu::Extent3d {
            width: image.width(),
            height: image.height(),
            depth_or_array_layers: 1,
        },
        mip_level_count: levels.len() as u32,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba8UnormSrgb,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });

    for (mip_level, level) in levels.iter().enumerate() {
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level: mip_level as u32,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &level.rgba,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4 * level.width),
                rows_per_image: Some(level.height),
            },
            wgpu::Extent3d {
                width: level.width,
                height: level.height,
                depth_or_array_layers: 1,
            },
        );
    }

    let filter = match image.filter {
        FilterMode::Linear => wgpu::FilterMode::Linear,
        FilterMode::Nearest => wgpu::FilterMode::Nearest,
    };
    let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some("Particle Image Sampler"),
        address_mode_u: wgpu::AddressMode::ClampToEdge,
        address_mode_v: wgpu::AddressMode::ClampToEdge,
        address_mode_w: wgpu::AddressMode::ClampToEdge,
        mag_filter: filter,
        min_filter: filter,
        mipmap_filter: filter,
        ..Default::default()
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("Particle Image Bind Group"),
        layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(&view),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::Sampler(&sampler),
            },
        ],
    })
}
