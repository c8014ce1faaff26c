//! Offscreen rendering of a single frame to PNG.

use std::path::Path;
use std::sync::mpsc;

use anyhow::{anyhow, Context, Result};
use image::RgbaImage;

use ember::{Camera, InstancedRenderer, ParticleSystem, RenderView, Viewport, WgpuBackend};

const WIDTH: u32 = 800;
const HEIGHT: u32 = 600;
const COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8UnormSrgb;
const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

pub fn render_to_png(gpu: &WgpuBackend, system: &ParticleSystem, path: &Path) -> Result<()> {
    let device = gpu.device();
    let size = wgpu::Extent3d {
        width: WIDTH,
        height: HEIGHT,
        depth_or_array_layers: 1,
    };

    let color = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Frame Color"),
        size,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: COLOR_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    });
    let depth = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Frame Depth"),
        size,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: DEPTH_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    let color_view = color.create_view(&wgpu::TextureViewDescriptor::default());
    let depth_view = depth.create_view(&wgpu::TextureViewDescriptor::default());

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("Frame Encoder"),
    });

    // The particle pass loads its attachments, so clear them first.
    let clear = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some("Frame Clear"),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view: &color_view,
            resolve_target: None,
            ops: wgpu::Operations {
                load: wgpu::LoadOp::Clear(wgpu::Color {
                    r: 0.02,
                    g: 0.02,
                    b: 0.05,
                    a: 1.0,
                }),
                store: wgpu::StoreOp::Store,
            },
        })],
        depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
            view: &depth_view,
            depth_ops: Some(wgpu::Operations {
                load: wgpu::LoadOp::Clear(1.0),
                store: wgpu::StoreOp::Store,
            }),
            stencil_ops: None,
        }),
        timestamp_writes: None,
        occlusion_query_set: None,
    });
    drop(clear);

    let props = &system.properties;
    let camera = Camera::looking_at(props.source_position, 10.0 + 4.0 * props.source_radius.length());
    let viewport = Viewport {
        far: 1000.0,
        ..Viewport::new(WIDTH, HEIGHT)
    };
    let mut renderer = InstancedRenderer::new(device, COLOR_FORMAT, Some(DEPTH_FORMAT));
    renderer.render(
        gpu,
        &mut encoder,
        RenderView {
            color: &color_view,
            depth: Some(&depth_view),
        },
        system,
        &camera,
        &viewport,
    );

    let bytes_per_row = WIDTH * 4;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    let padded_bytes_per_row = bytes_per_row.div_ceil(align) * align;
    let readback = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Frame Readback"),
        size: padded_bytes_per_row as u64 * HEIGHT as u64,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });
    encoder.copy_texture_to_buffer(
        wgpu::TexelCopyTextureInfo {
            texture: &color,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::TexelCopyBufferInfo {
            buffer: &readback,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(padded_bytes_per_row),
                rows_per_image: Some(HEIGHT),
            },
        },
        size,
    );
    gpu.queue().submit(std::iter::once(encoder.finish()));

    let slice = readback.slice(..);
    let (tx, rx) = mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    device.poll(wgpu::Maintain::Wait);
    rx.recv()
        .context("readback callback dropped")?
        .context("failed to map frame buffer")?;

    let mut rgba = vec![0u8; (bytes_per_row * HEIGHT) as usize];
    {
        let mapped = slice.get_mapped_range();
        for row in 0..HEIGHT as usize {
            let src = row * padded_bytes_per_row as usize;
            let dst = row * bytes_per_row as usize;
            rgba[dst..dst + bytes_per_row as usize]
                .copy_from_slice(&mapped[src..src + bytes_per_row as usize]);
        }
    }
    readback.unmap();

    RgbaImage::from_raw(WIDTH, HEIGHT, rgba)
        .ok_or_else(|| anyhow!("frame buffer has the wrong size"))?
        .save(path)?;
    Ok(())
}
