//! Hardware backend on wgpu.
//!
//! Textures keep the byte layout of the software backend: `R8`, `Rg8` or `Rgba8` texels holding
//! the raw channel bytes, with three-channel images widened to four on upload. Every draw first
//! copies its target into a scratch texture so the kernel can evaluate any blend mode against
//! what is already there.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use parking_lot::Mutex;
use wgpu::util::DeviceExt;

use crate::backend::{GpuBackend, KernelParams, Keyer, TextureRef};
use crate::foundation::error::{MixerError, MixerResult};
use crate::frame::pixel::PixelFormat;

/// Output formats go up to DCI 4K; anything smaller cannot hold a frame.
const MIN_TEXTURE_DIMENSION: u32 = 4096;

const PARAMS_SIZE: u64 = 64;

const QUAD_ATTRIBUTES: [wgpu::VertexAttribute; 2] =
    wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32x2];

const FLAG_LOCAL_KEY: u32 = 1;
const FLAG_LAYER_KEY: u32 = 2;
const FLAG_LOCAL_KEY_RGBA: u32 = 4;
const FLAG_LAYER_KEY_RGBA: u32 = 8;
const FLAG_ALPHA_TARGET: u32 = 16;

#[derive(Debug, Clone, Copy)]
pub struct WgpuBackendOpts {
    pub power_preference: wgpu::PowerPreference,
    pub force_fallback_adapter: bool,
}

impl Default for WgpuBackendOpts {
    fn default() -> Self {
        Self {
            power_preference: wgpu::PowerPreference::HighPerformance,
            force_fallback_adapter: false,
        }
    }
}

impl WgpuBackendOpts {
    pub fn with_fallback_adapter(mut self, on: bool) -> Self {
        self.force_fallback_adapter = on;
        self
    }
}

#[derive(Debug)]
pub struct WgpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
    stride: u32,
}

impl WgpuTexture {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn stride(&self) -> u32 {
        self.stride
    }
}

/// A texture copy into a mappable buffer, submitted but not yet mapped.
#[derive(Debug)]
pub struct WgpuReadback {
    buffer: wgpu::Buffer,
    width: u32,
    height: u32,
    stride: u32,
    padded_row: u32,
}

struct Kernel {
    layout: wgpu::BindGroupLayout,
    params: wgpu::Buffer,
    blend_rgba: wgpu::RenderPipeline,
    blend_alpha: wgpu::RenderPipeline,
    straighten: wgpu::RenderPipeline,
    placeholder: wgpu::TextureView,
}

pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    info: wgpu::AdapterInfo,
    kernel: Kernel,
    /// Copies of draw targets, one per size and format.
    scratch: Mutex<HashMap<(u32, u32, wgpu::TextureFormat), WgpuTexture>>,
}

impl WgpuBackend {
    /// Open the preferred adapter.
    ///
    /// Fails with [`MixerError::NotSupported`] when there is no adapter or it cannot hold a
    /// 4096 pixel wide texture.
    pub fn new(opts: WgpuBackendOpts) -> MixerResult<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: opts.power_preference,
            compatible_surface: None,
            force_fallback_adapter: opts.force_fallback_adapter,
        }))
        .map_err(|e| match e {
            wgpu::RequestAdapterError::NotFound { .. } => {
                MixerError::not_supported("no gpu adapter available")
            }
            other => MixerError::gpu(format!("wgpu request_adapter failed: {other:?}")),
        })?;

        let limits = adapter.limits();
        if limits.max_texture_dimension_2d < MIN_TEXTURE_DIMENSION {
            return Err(MixerError::not_supported(format!(
                "adapter textures are limited to {} pixels, need {MIN_TEXTURE_DIMENSION}",
                limits.max_texture_dimension_2d
            )));
        }

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("layermix"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::downlevel_defaults().using_resolution(limits),
            experimental_features: wgpu::ExperimentalFeatures::default(),
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::Off,
        }))
        .map_err(|e| MixerError::gpu(format!("wgpu request_device failed: {e:?}")))?;

        let info = adapter.get_info();
        tracing::info!(adapter = %info.name, backend = ?info.backend, "wgpu backend opened");
        let kernel = Kernel::new(&device);
        Ok(Self {
            device,
            queue,
            info,
            kernel,
            scratch: Mutex::new(HashMap::new()),
        })
    }

    fn allocate(&self, width: u32, height: u32, stride: u32, label: &str) -> WgpuTexture {
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: texture_format(stride),
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        WgpuTexture {
            texture,
            view,
            width,
            height,
            stride,
        }
    }

    /// Run `encode` against a fresh copy of `target`, then submit.
    fn with_background(
        &self,
        target: &WgpuTexture,
        encode: impl FnOnce(&mut wgpu::CommandEncoder, &WgpuTexture),
    ) {
        let mut scratch = self.scratch.lock();
        let key = (target.width, target.height, target.texture.format());
        let background = match scratch.entry(key) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => e.insert(self.allocate(
                target.width,
                target.height,
                target.stride,
                "layermix_scratch",
            )),
        };

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("layermix_draw"),
            });
        encoder.copy_texture_to_texture(
            target.texture.as_image_copy(),
            background.texture.as_image_copy(),
            target.texture.size(),
        );
        encode(&mut encoder, background);
        self.queue.submit(Some(encoder.finish()));
    }

    fn bind_group(
        &self,
        planes: [&wgpu::TextureView; 4],
        background: &wgpu::TextureView,
        local_key: &wgpu::TextureView,
        layer_key: &wgpu::TextureView,
    ) -> wgpu::BindGroup {
        let views = [
            planes[0], planes[1], planes[2], planes[3], background, local_key, layer_key,
        ];
        let mut entries = vec![wgpu::BindGroupEntry {
            binding: 0,
            resource: self.kernel.params.as_entire_binding(),
        }];
        entries.extend(views.iter().zip(1u32..).map(|(view, binding)| {
            wgpu::BindGroupEntry {
                binding,
                resource: wgpu::BindingResource::TextureView(view),
            }
        }));
        self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("layermix_kernel_bg"),
            layout: &self.kernel.layout,
            entries: &entries,
        })
    }
}

impl GpuBackend for WgpuBackend {
    type Texture = WgpuTexture;
    type Readback = WgpuReadback;

    fn describe(&self) -> MixerResult<String> {
        Ok(format!(
            "{} ({:?}, {} {})",
            self.info.name, self.info.backend, self.info.driver, self.info.driver_info
        ))
    }

    fn max_texture_size(&self) -> u32 {
        self.device.limits().max_texture_dimension_2d
    }

    fn create_texture(
        &self,
        width: u32,
        height: u32,
        stride: u32,
        _mipmapped: bool,
    ) -> MixerResult<WgpuTexture> {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let texture = self.allocate(width, height, stride, "layermix_texture");
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(err) => Err(MixerError::gpu(format!(
                "texture {width}x{height}x{stride} allocation failed: {err}"
            ))),
            None => Ok(texture),
        }
    }

    fn clear_texture(&self, texture: &WgpuTexture) -> MixerResult<()> {
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("layermix_clear"),
            });
        encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("layermix_clear_rp"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &texture.view,
                resolve_target: None,
                depth_slice: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        self.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    fn upload(&self, texture: &WgpuTexture, data: &[u8]) -> MixerResult<()> {
        let expected = texel_bytes(texture.width, texture.height, texture.stride);
        if data.len() != expected {
            return Err(MixerError::validation(format!(
                "upload of {} bytes into a {expected} byte texture",
                data.len()
            )));
        }
        let widened;
        let bytes = if texture.stride == 3 {
            widened = data
                .chunks_exact(3)
                .flat_map(|px| [px[0], px[1], px[2], 255])
                .collect::<Vec<u8>>();
            widened.as_slice()
        } else {
            data
        };
        self.queue.write_texture(
            texture.texture.as_image_copy(),
            bytes,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(texture.width * stored_channels(texture.stride)),
                rows_per_image: Some(texture.height),
            },
            texture.texture.size(),
        );
        Ok(())
    }

    fn begin_readback(&self, texture: &WgpuTexture) -> MixerResult<WgpuReadback> {
        let row = texture
            .width
            .checked_mul(stored_channels(texture.stride))
            .ok_or_else(|| MixerError::validation("readback row overflow"))?;
        let padded_row = align_to(row, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("layermix_readback"),
            size: u64::from(padded_row) * u64::from(texture.height),
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("layermix_readback_encoder"),
            });
        encoder.copy_texture_to_buffer(
            texture.texture.as_image_copy(),
            wgpu::TexelCopyBufferInfo {
                buffer: &buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row),
                    rows_per_image: Some(texture.height),
                },
            },
            texture.texture.size(),
        );
        self.queue.submit(Some(encoder.finish()));

        Ok(WgpuReadback {
            buffer,
            width: texture.width,
            height: texture.height,
            stride: texture.stride,
            padded_row,
        })
    }

    fn finish_readback(&self, pending: WgpuReadback, out: &mut [u8]) -> MixerResult<()> {
        let expected = texel_bytes(pending.width, pending.height, pending.stride);
        if out.len() != expected {
            return Err(MixerError::validation(format!(
                "readback of {expected} bytes into a {} byte buffer",
                out.len()
            )));
        }

        let slice = pending.buffer.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |res| {
            let _ = tx.send(res);
        });
        self.device
            .poll(wgpu::PollType::wait_indefinitely())
            .map_err(|e| MixerError::gpu(format!("wgpu poll failed: {e:?}")))?;
        rx.recv()
            .map_err(|_| MixerError::gpu("readback channel closed"))?
            .map_err(|e| MixerError::gpu(format!("readback map failed: {e:?}")))?;

        let mapped = slice.get_mapped_range();
        let stored = stored_channels(pending.stride) as usize;
        let row_bytes = pending.width as usize * pending.stride as usize;
        for (y, dst) in out.chunks_exact_mut(row_bytes).enumerate() {
            let start = y * pending.padded_row as usize;
            let src = &mapped[start..start + pending.width as usize * stored];
            if stored == pending.stride as usize {
                dst.copy_from_slice(src);
            } else {
                for (d, s) in dst.chunks_exact_mut(3).zip(src.chunks_exact(4)) {
                    d.copy_from_slice(&s[..3]);
                }
            }
        }
        drop(mapped);
        pending.buffer.unmap();
        Ok(())
    }

    fn draw(&self, p: &KernelParams<'_, WgpuTexture>) -> MixerResult<()> {
        if p.pix_desc.format == PixelFormat::Invalid || p.transform.field_mode.is_empty() {
            return Ok(());
        }
        p.validate()?;
        let vertices = quad_vertices(p);
        if vertices.is_empty() {
            return Ok(());
        }

        let target = p.target.raw;
        self.queue
            .write_buffer(&self.kernel.params, 0, &encode_params(p));
        let vertex_count = (vertices.len() / 16) as u32;
        let vertex_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("layermix_quads"),
                contents: &vertices,
                usage: wgpu::BufferUsages::VERTEX,
            });

        let placeholder = &self.kernel.placeholder;
        let mut planes = [placeholder; 4];
        for (slot, t) in planes.iter_mut().zip(&p.textures) {
            *slot = &t.raw.view;
        }
        let local_key = key_view(p.local_key, placeholder);
        let layer_key = key_view(p.layer_key, placeholder);
        let pipeline = if target.stride == 1 {
            &self.kernel.blend_alpha
        } else {
            &self.kernel.blend_rgba
        };

        self.with_background(target, |encoder, background| {
            let bind_group = self.bind_group(planes, &background.view, local_key, layer_key);
            let mut rp = begin_load_pass(encoder, &target.view);
            rp.set_pipeline(pipeline);
            rp.set_bind_group(0, &bind_group, &[]);
            rp.set_vertex_buffer(0, vertex_buffer.slice(..));
            rp.draw(0..vertex_count, 0..1);
        });
        Ok(())
    }

    fn post_process(&self, target: &WgpuTexture, straighten: bool) -> MixerResult<()> {
        if !straighten || target.stride != 4 {
            return Ok(());
        }
        let placeholder = &self.kernel.placeholder;
        self.with_background(target, |encoder, background| {
            let bind_group = self.bind_group(
                [placeholder; 4],
                &background.view,
                placeholder,
                placeholder,
            );
            let mut rp = begin_load_pass(encoder, &target.view);
            rp.set_pipeline(&self.kernel.straighten);
            rp.set_bind_group(0, &bind_group, &[]);
            rp.draw(0..3, 0..1);
        });
        Ok(())
    }
}

impl Kernel {
    fn new(device: &wgpu::Device) -> Self {
        let mut entries = vec![wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: wgpu::BufferSize::new(PARAMS_SIZE),
            },
            count: None,
        }];
        entries.extend((1..=7).map(|binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                multisampled: false,
                view_dimension: wgpu::TextureViewDimension::D2,
                sample_type: wgpu::TextureSampleType::Float { filterable: false },
            },
            count: None,
        }));
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("layermix_kernel_bgl"),
            entries: &entries,
        });

        let params = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("layermix_kernel_params"),
            size: PARAMS_SIZE,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("layermix_kernel"),
            source: wgpu::ShaderSource::Wgsl(KERNEL_WGSL.into()),
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("layermix_kernel_pl"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });

        let quads = [wgpu::VertexBufferLayout {
            array_stride: 16,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &QUAD_ATTRIBUTES,
        }];
        let pipeline = |vs: &str,
                        fs: &str,
                        buffers: &[wgpu::VertexBufferLayout<'_>],
                        format: wgpu::TextureFormat| {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(fs),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &shader,
                    entry_point: Some(vs),
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                    buffers,
                },
                fragment: Some(wgpu::FragmentState {
                    module: &shader,
                    entry_point: Some(fs),
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                    targets: &[Some(wgpu::ColorTargetState {
                        format,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                }),
                primitive: wgpu::PrimitiveState::default(),
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            })
        };
        let blend_rgba = pipeline("vs_quad", "fs_kernel", &quads, wgpu::TextureFormat::Rgba8Unorm);
        let blend_alpha = pipeline("vs_quad", "fs_kernel", &quads, wgpu::TextureFormat::R8Unorm);
        let straighten = pipeline(
            "vs_fullscreen",
            "fs_straighten",
            &[],
            wgpu::TextureFormat::Rgba8Unorm,
        );

        let placeholder = device
            .create_texture(&wgpu::TextureDescriptor {
                label: Some("layermix_placeholder"),
                size: wgpu::Extent3d {
                    width: 1,
                    height: 1,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::R8Unorm,
                usage: wgpu::TextureUsages::TEXTURE_BINDING,
                view_formats: &[],
            })
            .create_view(&wgpu::TextureViewDescriptor::default());

        Self {
            layout,
            params,
            blend_rgba,
            blend_alpha,
            straighten,
            placeholder,
        }
    }
}

fn begin_load_pass<'e>(
    encoder: &'e mut wgpu::CommandEncoder,
    view: &wgpu::TextureView,
) -> wgpu::RenderPass<'e> {
    encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some("layermix_kernel_rp"),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view,
            resolve_target: None,
            depth_slice: None,
            ops: wgpu::Operations {
                load: wgpu::LoadOp::Load,
                store: wgpu::StoreOp::Store,
            },
        })],
        depth_stencil_attachment: None,
        timestamp_writes: None,
        occlusion_query_set: None,
    })
}

fn key_view<'a>(
    key: Option<TextureRef<'a, WgpuTexture>>,
    placeholder: &'a wgpu::TextureView,
) -> &'a wgpu::TextureView {
    key.map_or(placeholder, |k| &k.raw.view)
}

fn texture_format(stride: u32) -> wgpu::TextureFormat {
    match stride {
        1 => wgpu::TextureFormat::R8Unorm,
        2 => wgpu::TextureFormat::Rg8Unorm,
        _ => wgpu::TextureFormat::Rgba8Unorm,
    }
}

fn stored_channels(stride: u32) -> u32 {
    if stride == 3 { 4 } else { stride }
}

fn texel_bytes(width: u32, height: u32, stride: u32) -> usize {
    width as usize * height as usize * stride as usize
}

fn align_to(value: u32, alignment: u32) -> u32 {
    let mask = alignment - 1;
    (value + mask) & !mask
}

fn format_code(format: PixelFormat) -> u32 {
    match format {
        PixelFormat::Gray => 0,
        PixelFormat::Bgra => 1,
        PixelFormat::Rgba => 2,
        PixelFormat::Argb => 3,
        PixelFormat::Abgr => 4,
        PixelFormat::Ycbcr => 5,
        PixelFormat::Ycbcra => 6,
        PixelFormat::Luma => 7,
        PixelFormat::Bgr => 8,
        PixelFormat::Rgb => 9,
        PixelFormat::Invalid => 10,
    }
}

/// Uniform block matching `Params` in the kernel.
fn encode_params(p: &KernelParams<'_, WgpuTexture>) -> [u8; PARAMS_SIZE as usize] {
    let it = &p.transform;
    let mut flags = 0;
    if let Some(k) = p.local_key {
        flags |= FLAG_LOCAL_KEY;
        if k.stride != 1 {
            flags |= FLAG_LOCAL_KEY_RGBA;
        }
    }
    if let Some(k) = p.layer_key {
        flags |= FLAG_LAYER_KEY;
        if k.stride != 1 {
            flags |= FLAG_LAYER_KEY_RGBA;
        }
    }
    if p.target.stride == 1 {
        flags |= FLAG_ALPHA_TARGET;
    }
    let keyer = match p.keyer {
        Keyer::Linear => 0u32,
        Keyer::Additive => 1,
    };

    let words: [u32; 16] = [
        format_code(p.pix_desc.format),
        p.blend_mode.index(),
        keyer,
        flags,
        u32::from(it.field_mode.bits()),
        (it.opacity.clamp(0.0, 1.0) as f32).to_bits(),
        0,
        0,
        (it.clip_translation.x as f32).to_bits(),
        (it.clip_translation.y as f32).to_bits(),
        ((it.clip_translation.x + it.clip_scale.x) as f32).to_bits(),
        ((it.clip_translation.y + it.clip_scale.y) as f32).to_bits(),
        (p.target.width as f32).to_bits(),
        (p.target.height as f32).to_bits(),
        0,
        0,
    ];
    let mut out = [0u8; PARAMS_SIZE as usize];
    for (chunk, w) in out.chunks_exact_mut(4).zip(words) {
        chunk.copy_from_slice(&w.to_le_bytes());
    }
    out
}

/// Two triangles per non-degenerate quad: clip-space position then texture coordinate.
fn quad_vertices(p: &KernelParams<'_, WgpuTexture>) -> Vec<u8> {
    let it = &p.transform;
    let mut out = Vec::new();
    for q in p.geometry.quads() {
        if q[0].vertex.x == q[2].vertex.x || q[0].vertex.y == q[2].vertex.y {
            continue;
        }
        for i in [0, 1, 2, 0, 2, 3] {
            let c = q[i];
            let x = it.fill_translation.x + it.fill_scale.x * c.vertex.x;
            let y = it.fill_translation.y + it.fill_scale.y * c.vertex.y;
            for v in [x * 2.0 - 1.0, 1.0 - y * 2.0, c.texture.x, c.texture.y] {
                out.extend_from_slice(&(v as f32).to_le_bytes());
            }
        }
    }
    out
}

const KERNEL_WGSL: &str = r#"
struct Params {
  format: u32,
  blend_mode: u32,
  keyer: u32,
  flags: u32,
  field_mode: u32,
  opacity: f32,
  pad0: u32,
  pad1: u32,
  clip: vec4<f32>,
  target_size: vec2<f32>,
  pad2: vec2<f32>,
};

@group(0) @binding(0) var<uniform> params: Params;
@group(0) @binding(1) var plane0: texture_2d<f32>;
@group(0) @binding(2) var plane1: texture_2d<f32>;
@group(0) @binding(3) var plane2: texture_2d<f32>;
@group(0) @binding(4) var plane3: texture_2d<f32>;
@group(0) @binding(5) var background: texture_2d<f32>;
@group(0) @binding(6) var local_key: texture_2d<f32>;
@group(0) @binding(7) var layer_key: texture_2d<f32>;

struct VsOut {
  @builtin(position) pos: vec4<f32>,
  @location(0) uv: vec2<f32>,
};

@vertex
fn vs_quad(@location(0) pos: vec2<f32>, @location(1) uv: vec2<f32>) -> VsOut {
  var o: VsOut;
  o.pos = vec4<f32>(pos, 0.0, 1.0);
  o.uv = uv;
  return o;
}

@vertex
fn vs_fullscreen(@builtin(vertex_index) vi: u32) -> VsOut {
  var p = array<vec2<f32>, 3>(
    vec2<f32>(-1.0, -1.0),
    vec2<f32>( 3.0, -1.0),
    vec2<f32>(-1.0,  3.0),
  );
  var o: VsOut;
  o.pos = vec4<f32>(p[vi], 0.0, 1.0);
  o.uv = (p[vi] + vec2<f32>(1.0, 1.0)) * 0.5;
  return o;
}

fn texel(t: texture_2d<f32>, uv: vec2<f32>) -> vec4<f32> {
  let size = vec2<i32>(textureDimensions(t));
  let xy = clamp(vec2<i32>(floor(uv * vec2<f32>(size))), vec2<i32>(0), size - vec2<i32>(1));
  return textureLoad(t, xy, 0);
}

// Premultiplied source in [b, g, r, a] order.
fn sample_source(uv: vec2<f32>) -> vec4<f32> {
  let t = texel(plane0, uv);
  var out = vec4<f32>(0.0);
  switch params.format {
    case 0u: { out = vec4<f32>(t.r, t.r, t.r, 1.0); }
    case 1u: { out = t; }
    case 2u: { out = vec4<f32>(t.b, t.g, t.r, t.a); }
    case 3u: { out = vec4<f32>(t.a, t.b, t.g, t.r); }
    case 4u: { out = vec4<f32>(t.g, t.b, t.a, t.r); }
    case 5u, 6u: {
      let y = t.r;
      let cb = texel(plane1, uv).r - 0.5;
      let cr = texel(plane2, uv).r - 0.5;
      var a = 1.0;
      if params.format == 6u {
        a = texel(plane3, uv).r;
      }
      let r = clamp(y + 1.5748 * cr, 0.0, 1.0);
      let g = clamp(y - 0.1873 * cb - 0.4681 * cr, 0.0, 1.0);
      let b = clamp(y + 1.8556 * cb, 0.0, 1.0);
      out = vec4<f32>(b, g, r, 1.0) * a;
    }
    case 7u: { out = vec4<f32>(t.r, t.r, t.r, t.r); }
    case 8u: { out = vec4<f32>(t.r, t.g, t.b, 1.0); }
    case 9u: { out = vec4<f32>(t.b, t.g, t.r, 1.0); }
    default: {}
  }
  return out;
}

fn overlay(b: f32, s: f32) -> f32 {
  if b < 0.5 {
    return 2.0 * b * s;
  }
  return 1.0 - 2.0 * (1.0 - b) * (1.0 - s);
}

fn color_dodge(b: f32, s: f32) -> f32 {
  if s >= 1.0 {
    return 1.0;
  }
  return min(b / (1.0 - s), 1.0);
}

fn color_burn(b: f32, s: f32) -> f32 {
  if s <= 0.0 {
    return 0.0;
  }
  return max(1.0 - (1.0 - b) / s, 0.0);
}

fn vivid_light(b: f32, s: f32) -> f32 {
  if s < 0.5 {
    return color_burn(b, 2.0 * s);
  }
  return color_dodge(b, 2.0 * (s - 0.5));
}

fn reflect_mode(b: f32, s: f32) -> f32 {
  if s >= 1.0 {
    return 1.0;
  }
  return min(b * b / (1.0 - s), 1.0);
}

// Indices follow BlendMode declaration order.
fn blend_channel(mode: u32, b: f32, s: f32) -> f32 {
  var v = s;
  switch mode {
    case 1u: { v = max(b, s); }
    case 2u: { v = min(b, s); }
    case 3u: { v = b * s; }
    case 4u: { v = (b + s) * 0.5; }
    case 5u, 16u: { v = min(b + s, 1.0); }
    case 6u, 17u: { v = max(b + s - 1.0, 0.0); }
    case 7u: { v = abs(b - s); }
    case 8u: { v = 1.0 - abs(1.0 - b - s); }
    case 9u: { v = b + s - 2.0 * b * s; }
    case 10u: { v = 1.0 - (1.0 - b) * (1.0 - s); }
    case 11u: { v = overlay(b, s); }
    case 12u: {
      if s < 0.5 {
        v = 2.0 * b * s + b * b * (1.0 - 2.0 * s);
      } else {
        v = sqrt(b) * (2.0 * s - 1.0) + 2.0 * b * (1.0 - s);
      }
    }
    case 13u: { v = overlay(s, b); }
    case 14u: { v = color_dodge(b, s); }
    case 15u: { v = color_burn(b, s); }
    case 18u: {
      if s < 0.5 {
        v = max(b + 2.0 * s - 1.0, 0.0);
      } else {
        v = min(b + 2.0 * (s - 0.5), 1.0);
      }
    }
    case 19u: { v = vivid_light(b, s); }
    case 20u: {
      if s < 0.5 {
        v = min(b, 2.0 * s);
      } else {
        v = max(b, 2.0 * (s - 0.5));
      }
    }
    case 21u: { v = select(1.0, 0.0, vivid_light(b, s) < 0.5); }
    case 22u: { v = reflect_mode(b, s); }
    case 23u: { v = reflect_mode(s, b); }
    case 24u: { v = min(b, s) - max(b, s) + 1.0; }
    default: {}
  }
  return clamp(v, 0.0, 1.0);
}

fn composite(mode: u32, dst: vec4<f32>, src: vec4<f32>) -> vec4<f32> {
  if mode == 0u {
    return src + dst * (1.0 - src.a);
  }
  let sa = src.a;
  let da = dst.a;
  if sa <= 0.0 {
    return dst;
  }
  var out = vec4<f32>(0.0, 0.0, 0.0, sa + da - sa * da);
  for (var i = 0; i < 3; i++) {
    let cs = src[i];
    let cb = dst[i];
    var sb = 0.0;
    if da > 0.0 {
      sb = min(cb / da, 1.0);
    }
    let mixed = blend_channel(mode, sb, min(cs / sa, 1.0));
    out[i] = clamp((1.0 - da) * cs + (1.0 - sa) * cb + sa * da * mixed, 0.0, 1.0);
  }
  return out;
}

fn covers_row(y: u32) -> bool {
  let bit = select(2u, 1u, (y & 1u) == 1u);
  return (params.field_mode & bit) != 0u;
}

fn key_value(t: texture_2d<f32>, xy: vec2<i32>, rgba: bool) -> f32 {
  let k = textureLoad(t, xy, 0);
  return select(k.r, k.a, rgba);
}

@fragment
fn fs_kernel(in: VsOut) -> @location(0) vec4<f32> {
  let xy = vec2<i32>(floor(in.pos.xy));
  if !covers_row(u32(xy.y)) {
    discard;
  }
  let p = in.pos.xy / params.target_size;
  if p.x < params.clip.x || p.x >= params.clip.z || p.y < params.clip.y || p.y >= params.clip.w {
    discard;
  }

  var src = sample_source(in.uv) * params.opacity;
  if (params.flags & 1u) != 0u {
    src = src * key_value(local_key, xy, (params.flags & 4u) != 0u);
  }
  if (params.flags & 2u) != 0u {
    src = src * key_value(layer_key, xy, (params.flags & 8u) != 0u);
  }

  let dst = textureLoad(background, xy, 0);
  if (params.flags & 16u) != 0u {
    return vec4<f32>(src.a + dst.r * (1.0 - src.a), 0.0, 0.0, 1.0);
  }
  if params.keyer == 1u {
    return min(dst + src, vec4<f32>(1.0));
  }
  return composite(params.blend_mode, dst, src);
}

@fragment
fn fs_straighten(in: VsOut) -> @location(0) vec4<f32> {
  let c = textureLoad(background, vec2<i32>(floor(in.pos.xy)), 0);
  if c.a <= 0.0 || c.a >= 1.0 {
    return c;
  }
  return vec4<f32>(min(c.rgb / c.a, vec3<f32>(1.0)), c.a);
}
"#;

#[cfg(test)]
#[path = "../../tests/unit/backend/wgpu.rs"]
mod tests;
