//! wgpu backend: one compiled program per pipeline signature, three band
//! textures per tile, a fullscreen-triangle draw, and a padded readback into
//! the same RGBA layout the CPU backend produces.

use std::collections::HashMap;

use crate::band_ops::{BandWindow, SampleBuffer};
use crate::error::{CogtileError, CogtileResult};
use crate::pipeline::{Pipeline, PipelineSignature};
use crate::render::{TileBands, TileRgba};
use crate::shader;

struct CompiledProgram {
    pipeline: wgpu::RenderPipeline,
    params_size: u64,
}

/// Holds the device, queue and the per-signature program cache. Programs are
/// compiled lazily on first use and retained for the backend's lifetime;
/// per-tile resources (textures, buffers) are created and dropped every
/// render.
///
/// All access is funneled through one owner (the engine behind a mutex), so
/// the underlying context is never touched concurrently.
pub struct GpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    programs: HashMap<PipelineSignature, CompiledProgram>,
}

impl GpuBackend {
    /// Acquire an adapter and device. Called once at engine construction;
    /// failure here means the process renders on the CPU for its lifetime.
    pub fn probe() -> CogtileResult<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = pollster::block_on(instance.request_adapter(
            &wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            },
        ))
        .map_err(|e| match e {
            wgpu::RequestAdapterError::NotFound { .. } => {
                CogtileError::gpu("no gpu adapter available")
            }
            other => CogtileError::gpu(format!("wgpu request_adapter failed: {other:?}")),
        })?;

        let (device, queue) =
            pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
                label: Some("cogtile_device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                experimental_features: wgpu::ExperimentalFeatures::default(),
                memory_hints: wgpu::MemoryHints::Performance,
                trace: wgpu::Trace::Off,
            }))
            .map_err(|e| CogtileError::gpu(format!("wgpu request_device failed: {e:?}")))?;

        // One layout serves every program: three band textures plus the
        // per-draw parameter block.
        let texture_entry = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                multisampled: false,
                view_dimension: wgpu::TextureViewDimension::D2,
                sample_type: wgpu::TextureSampleType::Float { filterable: false },
            },
            count: None,
        };
        let bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("cogtile_bgl"),
                entries: &[
                    texture_entry(0),
                    texture_entry(1),
                    texture_entry(2),
                    wgpu::BindGroupLayoutEntry {
                        binding: 3,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Uniform,
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    },
                ],
            });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("cogtile_pl"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        Ok(Self {
            device,
            queue,
            bind_group_layout,
            pipeline_layout,
            programs: HashMap::new(),
        })
    }

    pub fn program_count(&self) -> usize {
        self.programs.len()
    }

    fn classify(error: wgpu::Error) -> CogtileError {
        match error {
            wgpu::Error::OutOfMemory { .. } => {
                CogtileError::device_lost("wgpu reported out of memory")
            }
            wgpu::Error::Internal { source, .. } => {
                CogtileError::device_lost(format!("wgpu internal error: {source}"))
            }
            wgpu::Error::Validation { description, .. } => CogtileError::gpu(description),
        }
    }

    /// Compile and cache the program for this pipeline's signature if it is
    /// not cached yet. The same signature is never compiled twice.
    fn ensure_program(&mut self, pipeline: &Pipeline) -> CogtileResult<PipelineSignature> {
        let signature = pipeline.signature();
        if self.programs.contains_key(&signature) {
            return Ok(signature);
        }

        let source = shader::pipeline_wgsl(pipeline);

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("cogtile_pipeline_shader"),
                source: wgpu::ShaderSource::Wgsl(source.wgsl.into()),
            });
        let render_pipeline =
            self.device
                .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                    label: Some("cogtile_pipeline"),
                    layout: Some(&self.pipeline_layout),
                    vertex: wgpu::VertexState {
                        module: &module,
                        entry_point: Some("vs_main"),
                        compilation_options: wgpu::PipelineCompilationOptions::default(),
                        buffers: &[],
                    },
                    fragment: Some(wgpu::FragmentState {
                        module: &module,
                        entry_point: Some("fs_main"),
                        compilation_options: wgpu::PipelineCompilationOptions::default(),
                        targets: &[Some(wgpu::ColorTargetState {
                            format: wgpu::TextureFormat::Rgba8Unorm,
                            blend: Some(wgpu::BlendState::REPLACE),
                            write_mask: wgpu::ColorWrites::ALL,
                        })],
                    }),
                    primitive: wgpu::PrimitiveState::default(),
                    depth_stencil: None,
                    multisample: wgpu::MultisampleState::default(),
                    multiview: None,
                    cache: None,
                });
        if let Some(e) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(Self::classify(e));
        }

        tracing::debug!(signature = %signature, "compiled pipeline program");
        self.programs.insert(
            signature.clone(),
            CompiledProgram {
                pipeline: render_pipeline,
                params_size: source.params_size,
            },
        );
        Ok(signature)
    }

    fn band_texture(&self, window: &BandWindow) -> CogtileResult<wgpu::Texture> {
        if window.samples.len() != window.pixel_count() {
            return Err(CogtileError::decode(format!(
                "band window is {}x{} but holds {} samples",
                window.width,
                window.height,
                window.samples.len()
            )));
        }

        let raw: Vec<f32> = (0..window.samples.len())
            .map(|i| window.samples.get(i))
            .collect();
        let mut bytes = Vec::with_capacity(raw.len() * 4);
        for v in &raw {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        Ok(self.upload_texture(
            window.width,
            window.height,
            wgpu::TextureFormat::R32Float,
            4,
            &bytes,
        ))
    }

    fn upload_texture(
        &self,
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
        bytes_per_texel: u32,
        bytes: &[u8],
    ) -> wgpu::Texture {
        let size = wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("cogtile_band"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            bytes,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(bytes_per_texel * width),
                rows_per_image: Some(height),
            },
            size,
        );
        texture
    }

    /// Upload the tile's bands. Returns the three texture bindings plus the
    /// per-channel texel divisors and single-texture flag for the parameter
    /// block.
    fn upload_bands(
        &self,
        bands: &TileBands,
    ) -> CogtileResult<(Vec<wgpu::Texture>, [f32; 3], bool)> {
        match bands {
            TileBands::Separate { red, green, blue } => {
                let textures = vec![
                    self.band_texture(red)?,
                    self.band_texture(green)?,
                    self.band_texture(blue)?,
                ];
                let divisors = [red.sample_max(), green.sample_max(), blue.sample_max()];
                Ok((textures, divisors, false))
            }
            TileBands::Interleaved(window) => match &window.samples {
                // 8-bit interleaved RGB goes up as one Rgba8Unorm texture;
                // sampling yields raw/255, so the divisor rescales to the
                // window's declared range.
                SampleBuffer::U8(rgb) => {
                    if rgb.len() != window.pixel_count() * 3 {
                        return Err(CogtileError::decode(format!(
                            "interleaved window is {}x{} but holds {} samples",
                            window.width,
                            window.height,
                            rgb.len()
                        )));
                    }
                    let mut rgba = Vec::with_capacity(window.pixel_count() * 4);
                    for px in rgb.chunks_exact(3) {
                        rgba.extend_from_slice(px);
                        rgba.push(255);
                    }
                    let texture = self.upload_texture(
                        window.width,
                        window.height,
                        wgpu::TextureFormat::Rgba8Unorm,
                        4,
                        &rgba,
                    );
                    let divisor = window.sample_max() / 255.0;
                    Ok((vec![texture], [divisor; 3], true))
                }
                // Wider interleaved samples are deinterleaved into three
                // float band textures instead.
                _ => {
                    let [r, g, b] = window.normalized_rgb()?;
                    let upload = |channel: &[f32]| {
                        let mut bytes = Vec::with_capacity(channel.len() * 4);
                        for v in channel {
                            bytes.extend_from_slice(&v.to_le_bytes());
                        }
                        self.upload_texture(
                            window.width,
                            window.height,
                            wgpu::TextureFormat::R32Float,
                            4,
                            &bytes,
                        )
                    };
                    let textures = vec![upload(&r), upload(&g), upload(&b)];
                    // Channels were normalized on upload.
                    Ok((textures, [1.0; 3], false))
                }
            },
        }
    }

    /// Render one tile through the cached program for `pipeline`. Per-tile
    /// textures and buffers are scoped to this call and released on every
    /// exit path.
    pub fn render_tile(
        &mut self,
        pipeline: &Pipeline,
        bands: &TileBands,
    ) -> CogtileResult<TileRgba> {
        let (width, height) = bands.dimensions()?;
        if width == 0 || height == 0 {
            return Err(CogtileError::decode("empty tile window"));
        }

        let signature = self.ensure_program(pipeline)?;
        let program = self
            .programs
            .get(&signature)
            .ok_or_else(|| CogtileError::gpu("program cache lost a just-compiled entry"))?;

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let result = self.draw_and_read_back(program, pipeline, bands, width, height);
        let oom = pollster::block_on(self.device.pop_error_scope());
        let validation = pollster::block_on(self.device.pop_error_scope());
        if let Some(e) = oom {
            return Err(Self::classify(e));
        }
        if let Some(e) = validation {
            return Err(Self::classify(e));
        }
        result
    }

    fn draw_and_read_back(
        &self,
        program: &CompiledProgram,
        pipeline: &Pipeline,
        bands: &TileBands,
        width: u32,
        height: u32,
    ) -> CogtileResult<TileRgba> {
        let (textures, divisors, single_texture) = self.upload_bands(bands)?;

        let params_bytes =
            shader::pack_params(pipeline, divisors, single_texture, bands.sample_maxes());
        let params = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("cogtile_params"),
            size: program.params_size,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        self.queue.write_buffer(&params, 0, &params_bytes);

        let views: Vec<wgpu::TextureView> = textures
            .iter()
            .map(|t| t.create_view(&wgpu::TextureViewDescriptor::default()))
            .collect();
        // The single-texture path binds the one RGBA texture to all three
        // band slots; the shader only reads slot 0 for it.
        let view_for = |i: usize| views.get(i).unwrap_or(&views[0]);
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("cogtile_bg"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(view_for(0)),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(view_for(1)),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(view_for(2)),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: params.as_entire_binding(),
                },
            ],
        });

        let target = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("cogtile_target"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let target_view = target.create_view(&wgpu::TextureViewDescriptor::default());

        let bytes_per_row = align_to(width * 4, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);
        let readback = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("cogtile_readback"),
            size: bytes_per_row as u64 * height as u64,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("cogtile_encoder"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("cogtile_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target_view,
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
            pass.set_pipeline(&program.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.draw(0..3, 0..1);
        }
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &target,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &readback,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(Some(encoder.finish()));

        let slice = readback.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |res| {
            let _ = tx.send(res);
        });
        self.device
            .poll(wgpu::PollType::wait_indefinitely())
            .map_err(|e| CogtileError::device_lost(format!("wgpu poll failed: {e:?}")))?;
        rx.recv()
            .map_err(|_| CogtileError::gpu("readback channel closed"))?
            .map_err(|e| CogtileError::gpu(format!("readback map failed: {e:?}")))?;

        let mapped = slice.get_mapped_range();
        let row_bytes = width as usize * 4;
        let mut data = Vec::with_capacity(row_bytes * height as usize);
        for row in 0..height as usize {
            let start = row * bytes_per_row as usize;
            data.extend_from_slice(&mapped[start..start + row_bytes]);
        }
        drop(mapped);
        readback.unmap();

        Ok(TileRgba {
            width,
            height,
            data,
        })
    }
}

fn align_to(value: u32, alignment: u32) -> u32 {
    let mask = alignment - 1;
    (value + mask) & !mask
}
