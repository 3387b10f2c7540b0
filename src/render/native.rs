use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use bytemuck::bytes_of;
use image::RgbaImage;
use log::{debug, info, warn};
use wgpu::util::DeviceExt;
use winit::dpi::PhysicalSize;
use winit::window::{Window, WindowId};

use super::common::{interleave, GlobalUniform, ObjectConstants, Vertex, WaterConstants};
use super::{
    DrawCommand, FrameUniforms, MeshHandle, PassKind, RenderBackend, Viewport, WaterUniforms,
};
use crate::error::RenderError;
use crate::mesh::{MeshBuffer, Topology};
use crate::water::WaterMaps;

const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

const SKY: wgpu::Color = wgpu::Color {
    r: 0.53,
    g: 0.81,
    b: 0.92,
    a: 1.0,
};

/// Global uniform slot used by the water composite; scene passes use 0..3.
const WATER_SLOT: usize = 3;

/// wgpu renderer drawing the beach scene into a winit window.
pub struct WgpuRenderer {
    window: Arc<Window>,
    surface: wgpu::Surface<'static>,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,
    depth: DepthBuffer,
    reflection: Option<OffscreenTarget>,
    refraction: Option<OffscreenTarget>,
    object_layout: wgpu::BindGroupLayout,
    water_layout: wgpu::BindGroupLayout,
    globals: Vec<GlobalBinding>,
    triangle_pipeline: wgpu::RenderPipeline,
    strip_pipeline: wgpu::RenderPipeline,
    water_pipeline: wgpu::RenderPipeline,
    sampler: wgpu::Sampler,
    dudv: MapTexture,
    normal_map: MapTexture,
    meshes: Vec<GpuMesh>,
    frame: Option<FrameInFlight>,
}

impl WgpuRenderer {
    /// Initializes the device, surface and pipelines for the given window.
    pub async fn new(window: Arc<Window>) -> Result<Self> {
        let size = window.inner_size();
        if size.width == 0 || size.height == 0 {
            return Err(anyhow!("window has zero area"));
        }

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            flags: wgpu::InstanceFlags::default(),
            memory_budget_thresholds: Default::default(),
            backend_options: Default::default(),
        });
        let surface = instance.create_surface(Arc::clone(&window))?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .context("failed to acquire GPU adapter")?;
        info!("using adapter {}", adapter.get_info().name);

        let device_descriptor = wgpu::DeviceDescriptor {
            label: Some("shoreline-device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            experimental_features: Default::default(),
            memory_hints: Default::default(),
            trace: Default::default(),
        };
        let (device, queue) = adapter
            .request_device(&device_descriptor)
            .await
            .context("failed to create GPU device")?;

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|format| format.is_srgb())
            .copied()
            .or_else(|| surface_caps.formats.first().copied())
            .context("surface reports no formats")?;
        let alpha_mode = surface_caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width,
            height: size.height,
            present_mode: wgpu::PresentMode::Fifo,
            desired_maximum_frame_latency: 2,
            alpha_mode,
            view_formats: vec![],
        };
        surface.configure(&device, &config);

        let depth = DepthBuffer::create(&device, config.width, config.height);

        let global_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("global-bind-layout"),
            entries: &[uniform_entry::<GlobalUniform>(0)],
        });
        let object_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("object-bind-layout"),
            entries: &[uniform_entry::<ObjectConstants>(0)],
        });
        let water_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("water-bind-layout"),
            entries: &[
                uniform_entry::<WaterConstants>(0),
                color_texture_entry(1),
                color_texture_entry(2),
                color_texture_entry(3),
                color_texture_entry(4),
                wgpu::BindGroupLayoutEntry {
                    binding: 5,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 6,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Depth,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
            ],
        });

        let globals = (0..=WATER_SLOT)
            .map(|slot| GlobalBinding::create(&device, &global_layout, slot))
            .collect();

        let scene_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("scene-shader"),
            source: wgpu::ShaderSource::Wgsl(SCENE_SHADER.into()),
        });
        let water_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("water-shader"),
            source: wgpu::ShaderSource::Wgsl(WATER_SHADER.into()),
        });

        let scene_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("scene-pipeline-layout"),
            bind_group_layouts: &[&global_layout, &object_layout],
            push_constant_ranges: &[],
        });
        let water_pipeline_layout =
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("water-pipeline-layout"),
                bind_group_layouts: &[&global_layout, &water_layout],
                push_constant_ranges: &[],
            });

        let triangle_pipeline = scene_pipeline(
            &device,
            &scene_layout,
            &scene_shader,
            surface_format,
            wgpu::PrimitiveTopology::TriangleList,
        );
        let strip_pipeline = scene_pipeline(
            &device,
            &scene_layout,
            &scene_shader,
            surface_format,
            wgpu::PrimitiveTopology::TriangleStrip,
        );
        let water_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("water-pipeline"),
            layout: Some(&water_pipeline_layout),
            vertex: wgpu::VertexState {
                module: &water_shader,
                entry_point: Some("vs_main"),
                compilation_options: Default::default(),
                buffers: &[Vertex::layout()],
            },
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                polygon_mode: wgpu::PolygonMode::Fill,
                ..Default::default()
            },
            // water reads the main pass depth but never writes it
            depth_stencil: Some(wgpu::DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: false,
                depth_compare: wgpu::CompareFunction::Less,
                stencil: Default::default(),
                bias: Default::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            fragment: Some(wgpu::FragmentState {
                module: &water_shader,
                entry_point: Some("fs_main"),
                compilation_options: Default::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format: surface_format,
                    blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            multiview: None,
            cache: None,
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("water-sampler"),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::Repeat,
            address_mode_w: wgpu::AddressMode::Repeat,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let placeholder = WaterMaps::default();
        let dudv = MapTexture::upload(&device, &queue, "dudv-map", &placeholder.dudv);
        let normal_map = MapTexture::upload(&device, &queue, "normal-map", &placeholder.normal);

        Ok(Self {
            window,
            surface,
            device,
            queue,
            config,
            depth,
            reflection: None,
            refraction: None,
            object_layout,
            water_layout,
            globals,
            triangle_pipeline,
            strip_pipeline,
            water_pipeline,
            sampler,
            dudv,
            normal_map,
            meshes: Vec::new(),
            frame: None,
        })
    }

    pub fn window_id(&self) -> WindowId {
        self.window.id()
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    /// Current surface size as a viewport.
    pub fn viewport(&self) -> Viewport {
        Viewport::new(self.config.width, self.config.height)
    }

    /// Reconfigures the swap chain and main depth buffer. Offscreen targets
    /// follow lazily through [`RenderBackend::resize_targets`].
    pub fn resize_surface(&mut self, new_size: PhysicalSize<u32>) {
        if new_size.width == 0 || new_size.height == 0 {
            return;
        }
        self.config.width = new_size.width;
        self.config.height = new_size.height;
        self.surface.configure(&self.device, &self.config);
        self.depth = DepthBuffer::create(&self.device, new_size.width, new_size.height);
    }

    fn upload(&self, label: &str, mesh: &MeshBuffer, topology: Topology) -> GpuMesh {
        GpuMesh::from_mesh(&self.device, label, mesh, topology)
    }

    fn object_bind_group(&self, draw: &DrawCommand) -> wgpu::BindGroup {
        let constants = ObjectConstants::from_draw(draw);
        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("object-uniform"),
                contents: bytes_of(&constants),
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            });
        self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("object-bind-group"),
            layout: &self.object_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: buffer.as_entire_binding(),
            }],
        })
    }

    fn write_globals(&self, slot: usize, frame: &FrameUniforms) {
        let uniform = GlobalUniform::from_frame(frame);
        self.queue
            .write_buffer(&self.globals[slot].buffer, 0, bytes_of(&uniform));
    }
}

impl RenderBackend for WgpuRenderer {
    fn upload_mesh(
        &mut self,
        label: &str,
        mesh: &MeshBuffer,
        topology: Topology,
    ) -> Result<MeshHandle, RenderError> {
        let gpu = self.upload(label, mesh, topology);
        self.meshes.push(gpu);
        debug!("uploaded mesh {label} ({} vertices)", mesh.vertices.len());
        Ok(MeshHandle::new(self.meshes.len() - 1))
    }

    fn replace_mesh(
        &mut self,
        handle: MeshHandle,
        mesh: &MeshBuffer,
        topology: Topology,
    ) -> Result<(), RenderError> {
        if handle.index() >= self.meshes.len() {
            return Err(RenderError::UnknownMesh(handle.index()));
        }
        let label = self.meshes[handle.index()].label.clone();
        let gpu = self.upload(&label, mesh, topology);
        self.meshes[handle.index()] = gpu;
        Ok(())
    }

    fn upload_water_maps(&mut self, maps: &WaterMaps) -> Result<(), RenderError> {
        self.dudv = MapTexture::upload(&self.device, &self.queue, "dudv-map", &maps.dudv);
        self.normal_map = MapTexture::upload(&self.device, &self.queue, "normal-map", &maps.normal);
        Ok(())
    }

    fn resize_targets(&mut self, viewport: Viewport) -> Result<(), RenderError> {
        let format = self.config.format;
        let reflection =
            OffscreenTarget::allocate(&self.device, "reflection-target", format, viewport)?;
        let refraction =
            OffscreenTarget::allocate(&self.device, "refraction-target", format, viewport)?;
        self.reflection = Some(reflection);
        self.refraction = Some(refraction);
        debug!(
            "allocated water targets at {}x{}",
            viewport.width, viewport.height
        );
        Ok(())
    }

    fn begin_frame(&mut self) -> Result<(), RenderError> {
        if self.frame.is_some() {
            warn!("discarding a frame that was never ended");
            self.abort_frame();
        }
        let output = self
            .surface
            .get_current_texture()
            .map_err(surface_error)?;
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("frame-encoder"),
            });
        self.frame = Some(FrameInFlight {
            output,
            view,
            encoder,
        });
        Ok(())
    }

    fn render_pass(
        &mut self,
        pass: PassKind,
        frame: &FrameUniforms,
        draws: &[DrawCommand],
    ) -> Result<(), RenderError> {
        for draw in draws {
            if draw.mesh.index() >= self.meshes.len() {
                return Err(RenderError::UnknownMesh(draw.mesh.index()));
            }
        }
        let slot = pass_slot(pass);
        self.write_globals(slot, frame);
        let bind_groups: Vec<wgpu::BindGroup> =
            draws.iter().map(|draw| self.object_bind_group(draw)).collect();

        let Self {
            frame: in_flight,
            reflection,
            refraction,
            depth,
            globals,
            meshes,
            triangle_pipeline,
            strip_pipeline,
            ..
        } = self;
        let in_flight = in_flight.as_mut().ok_or(RenderError::SurfaceLost)?;
        let (color_view, depth_view) = match pass {
            PassKind::Reflection => {
                let target = reflection.as_ref().ok_or_else(missing_targets)?;
                (&target.color_view, &target.depth_view)
            }
            PassKind::Refraction => {
                let target = refraction.as_ref().ok_or_else(missing_targets)?;
                (&target.color_view, &target.depth_view)
            }
            PassKind::Main => (&in_flight.view, &depth.view),
        };

        let mut render_pass = in_flight
            .encoder
            .begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(pass.label()),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: color_view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(SKY),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
        render_pass.set_bind_group(0, &globals[slot].bind_group, &[]);

        for (draw, bind_group) in draws.iter().zip(&bind_groups) {
            let mesh = &meshes[draw.mesh.index()];
            let Some(vertex) = mesh.vertex.as_ref() else {
                continue;
            };
            render_pass.set_bind_group(1, bind_group, &[]);
            render_pass.set_vertex_buffer(0, vertex.slice(..));
            match (&mesh.index, mesh.topology) {
                (Some(index), Topology::Triangles) => {
                    render_pass.set_pipeline(triangle_pipeline);
                    render_pass.set_index_buffer(index.slice(..), wgpu::IndexFormat::Uint32);
                    render_pass.draw_indexed(0..mesh.index_count, 0, 0..1);
                }
                (_, Topology::Strips { strips, strip_len }) => {
                    render_pass.set_pipeline(strip_pipeline);
                    for strip in 0..strips {
                        let start = strip * strip_len;
                        render_pass.draw(start..start + strip_len, 0..1);
                    }
                }
                (None, Topology::Triangles) => {}
            }
        }
        Ok(())
    }

    fn composite_water(
        &mut self,
        mesh: MeshHandle,
        frame: &FrameUniforms,
        water: &WaterUniforms,
    ) -> Result<(), RenderError> {
        let gpu = self
            .meshes
            .get(mesh.index())
            .ok_or(RenderError::UnknownMesh(mesh.index()))?;
        let (Some(vertex), Some(index)) = (gpu.vertex.as_ref(), gpu.index.as_ref()) else {
            return Ok(());
        };
        let reflection = self.reflection.as_ref().ok_or_else(missing_targets)?;
        let refraction = self.refraction.as_ref().ok_or_else(missing_targets)?;

        self.write_globals(WATER_SLOT, frame);
        let constants = WaterConstants::from_water(water);
        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("water-uniform"),
                contents: bytes_of(&constants),
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            });
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("water-bind-group"),
            layout: &self.water_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&reflection.color_view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(&refraction.color_view),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::TextureView(&self.dudv.view),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: wgpu::BindingResource::TextureView(&self.normal_map.view),
                },
                wgpu::BindGroupEntry {
                    binding: 5,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 6,
                    resource: wgpu::BindingResource::TextureView(&refraction.depth_view),
                },
            ],
        });

        let in_flight = self.frame.as_mut().ok_or(RenderError::SurfaceLost)?;
        let mut render_pass = in_flight
            .encoder
            .begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("water"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &in_flight.view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &self.depth.view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
        render_pass.set_pipeline(&self.water_pipeline);
        render_pass.set_bind_group(0, &self.globals[WATER_SLOT].bind_group, &[]);
        render_pass.set_bind_group(1, &bind_group, &[]);
        render_pass.set_vertex_buffer(0, vertex.slice(..));
        render_pass.set_index_buffer(index.slice(..), wgpu::IndexFormat::Uint32);
        render_pass.draw_indexed(0..gpu.index_count, 0, 0..1);
        Ok(())
    }

    fn end_frame(&mut self) -> Result<(), RenderError> {
        let Some(frame) = self.frame.take() else {
            return Ok(());
        };
        self.queue.submit(std::iter::once(frame.encoder.finish()));
        self.window.pre_present_notify();
        frame.output.present();
        Ok(())
    }

    fn abort_frame(&mut self) {
        // unsubmitted encoder and unpresented texture are released on drop
        self.frame = None;
    }
}

fn pass_slot(pass: PassKind) -> usize {
    match pass {
        PassKind::Reflection => 0,
        PassKind::Refraction => 1,
        PassKind::Main => 2,
    }
}

fn missing_targets() -> RenderError {
    RenderError::Backend("water targets have not been allocated".into())
}

fn surface_error(err: wgpu::SurfaceError) -> RenderError {
    match err {
        wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated => RenderError::SurfaceLost,
        wgpu::SurfaceError::OutOfMemory => RenderError::OutOfMemory,
        other => RenderError::Backend(other.to_string()),
    }
}

fn uniform_entry<T>(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: wgpu::BufferSize::new(std::mem::size_of::<T>() as u64),
        },
        count: None,
    }
}

fn color_texture_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: true },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }
}

fn scene_pipeline(
    device: &wgpu::Device,
    layout: &wgpu::PipelineLayout,
    shader: &wgpu::ShaderModule,
    format: wgpu::TextureFormat,
    topology: wgpu::PrimitiveTopology,
) -> wgpu::RenderPipeline {
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(match topology {
            wgpu::PrimitiveTopology::TriangleStrip => "scene-strip-pipeline",
            _ => "scene-triangle-pipeline",
        }),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module: shader,
            entry_point: Some("vs_main"),
            compilation_options: Default::default(),
            buffers: &[Vertex::layout()],
        },
        primitive: wgpu::PrimitiveState {
            topology,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: None,
            polygon_mode: wgpu::PolygonMode::Fill,
            ..Default::default()
        },
        depth_stencil: Some(wgpu::DepthStencilState {
            format: DEPTH_FORMAT,
            depth_write_enabled: true,
            depth_compare: wgpu::CompareFunction::Less,
            stencil: Default::default(),
            bias: Default::default(),
        }),
        multisample: wgpu::MultisampleState::default(),
        fragment: Some(wgpu::FragmentState {
            module: shader,
            entry_point: Some("fs_main"),
            compilation_options: Default::default(),
            targets: &[Some(wgpu::ColorTargetState {
                format,
                blend: Some(wgpu::BlendState::REPLACE),
                write_mask: wgpu::ColorWrites::ALL,
            })],
        }),
        multiview: None,
        cache: None,
    })
}

struct FrameInFlight {
    output: wgpu::SurfaceTexture,
    view: wgpu::TextureView,
    encoder: wgpu::CommandEncoder,
}

struct GlobalBinding {
    buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
}

impl GlobalBinding {
    fn create(device: &wgpu::Device, layout: &wgpu::BindGroupLayout, slot: usize) -> Self {
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&format!("global-uniform-{slot}")),
            size: std::mem::size_of::<GlobalUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&format!("global-bind-group-{slot}")),
            layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: buffer.as_entire_binding(),
            }],
        });
        Self { buffer, bind_group }
    }
}

struct GpuMesh {
    label: String,
    vertex: Option<wgpu::Buffer>,
    index: Option<wgpu::Buffer>,
    index_count: u32,
    topology: Topology,
}

impl GpuMesh {
    fn from_mesh(device: &wgpu::Device, label: &str, mesh: &MeshBuffer, topology: Topology) -> Self {
        let vertices = interleave(mesh);
        let vertex = (!vertices.is_empty()).then(|| {
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(&format!("{label}-vertices")),
                contents: bytemuck::cast_slice(&vertices),
                usage: wgpu::BufferUsages::VERTEX,
            })
        });
        let index = (matches!(topology, Topology::Triangles) && !mesh.indices.is_empty()).then(
            || {
                device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(&format!("{label}-indices")),
                    contents: bytemuck::cast_slice(&mesh.indices),
                    usage: wgpu::BufferUsages::INDEX,
                })
            },
        );
        Self {
            label: label.to_string(),
            vertex,
            index,
            index_count: mesh.indices.len() as u32,
            topology,
        }
    }
}

struct DepthBuffer {
    _texture: wgpu::Texture,
    view: wgpu::TextureView,
}

impl DepthBuffer {
    fn create(device: &wgpu::Device, width: u32, height: u32) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("depth-texture"),
            size: extent(width, height),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            _texture: texture,
            view,
        }
    }
}

/// Color and depth attachment pair for the reflection or refraction pass.
struct OffscreenTarget {
    _color: wgpu::Texture,
    color_view: wgpu::TextureView,
    _depth: wgpu::Texture,
    depth_view: wgpu::TextureView,
}

impl OffscreenTarget {
    fn allocate(
        device: &wgpu::Device,
        label: &'static str,
        format: wgpu::TextureFormat,
        viewport: Viewport,
    ) -> Result<Self, RenderError> {
        device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let usage = wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING;
        let color = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: extent(viewport.width, viewport.height),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage,
            view_formats: &[],
        });
        let depth = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: extent(viewport.width, viewport.height),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage,
            view_formats: &[],
        });
        let validation = pollster::block_on(device.pop_error_scope());
        let out_of_memory = pollster::block_on(device.pop_error_scope());
        if let Some(err) = validation.or(out_of_memory) {
            return Err(RenderError::TargetAllocation {
                label,
                width: viewport.width,
                height: viewport.height,
                message: err.to_string(),
            });
        }

        let color_view = color.create_view(&wgpu::TextureViewDescriptor::default());
        let depth_view = depth.create_view(&wgpu::TextureViewDescriptor::default());
        Ok(Self {
            _color: color,
            color_view,
            _depth: depth,
            depth_view,
        })
    }
}

struct MapTexture {
    _texture: wgpu::Texture,
    view: wgpu::TextureView,
}

impl MapTexture {
    fn upload(device: &wgpu::Device, queue: &wgpu::Queue, label: &str, image: &RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        let size = extent(width, height);
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            // linear: dudv and normal maps hold vectors, not colors
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        if width > 0 && height > 0 {
            queue.write_texture(
                wgpu::TexelCopyTextureInfo {
                    texture: &texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                image.as_raw(),
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(4 * width),
                    rows_per_image: Some(height),
                },
                size,
            );
        }
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            _texture: texture,
            view,
        }
    }
}

fn extent(width: u32, height: u32) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width: width.max(1),
        height: height.max(1),
        depth_or_array_layers: 1,
    }
}

const SCENE_SHADER: &str = r#"
struct GlobalUniform {
    projection: mat4x4<f32>,
    view: mat4x4<f32>,
    camera_position: vec4<f32>,
    light_direction: vec4<f32>,
    light_color: vec4<f32>,
    clip_plane: vec4<f32>,
    flags: vec4<f32>,
}

struct ObjectConstants {
    model: mat4x4<f32>,
    normal: mat3x4<f32>,
    color: vec4<f32>,
    material: vec4<f32>,
}

@group(0) @binding(0)
var<uniform> globals: GlobalUniform;

@group(1) @binding(0)
var<uniform> object: ObjectConstants;

struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) tex_coord: vec2<f32>,
}

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) world_pos: vec3<f32>,
    @location(1) normal: vec3<f32>,
}

@vertex
fn vs_main(input: VertexInput) -> VertexOutput {
    var out: VertexOutput;
    let world_position = object.model * vec4<f32>(input.position, 1.0);
    out.position = globals.projection * globals.view * world_position;
    out.world_pos = world_position.xyz;
    out.normal = mat3x3<f32>(
        object.normal[0].xyz,
        object.normal[1].xyz,
        object.normal[2].xyz
    ) * input.normal;
    return out;
}

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    if globals.flags.x > 0.5 && dot(globals.clip_plane, vec4<f32>(input.world_pos, 1.0)) < 0.0 {
        discard;
    }
    let base = object.color.rgb;
    if object.color.a < 0.0 {
        return vec4<f32>(base, 1.0);
    }

    let normal = normalize(input.normal + vec3<f32>(0.0, 1e-6, 0.0));
    let to_light = normalize(-globals.light_direction.xyz);
    let to_camera = normalize(globals.camera_position.xyz - input.world_pos);
    var diffuse = max(dot(normal, to_light), 0.0);
    let reflected = reflect(-to_light, normal);
    var specular = pow(max(dot(reflected, to_camera), 0.0), max(object.material.w, 1.0));

    if globals.flags.y > 0.5 {
        diffuse = floor(diffuse * 4.0) / 4.0;
        specular = step(0.5, specular);
    }

    let light = globals.light_color.rgb;
    let shaded = base * light * (object.material.x + object.material.y * diffuse)
        + light * object.material.z * specular;
    return vec4<f32>(shaded, 1.0);
}
"#;

const WATER_SHADER: &str = r#"
struct GlobalUniform {
    projection: mat4x4<f32>,
    view: mat4x4<f32>,
    camera_position: vec4<f32>,
    light_direction: vec4<f32>,
    light_color: vec4<f32>,
    clip_plane: vec4<f32>,
    flags: vec4<f32>,
}

struct WaterConstants {
    model: mat4x4<f32>,
    params: vec4<f32>,
}

@group(0) @binding(0)
var<uniform> globals: GlobalUniform;

@group(1) @binding(0)
var<uniform> water: WaterConstants;
@group(1) @binding(1)
var reflection_map: texture_2d<f32>;
@group(1) @binding(2)
var refraction_map: texture_2d<f32>;
@group(1) @binding(3)
var dudv_map: texture_2d<f32>;
@group(1) @binding(4)
var normal_map: texture_2d<f32>;
@group(1) @binding(5)
var map_sampler: sampler;
@group(1) @binding(6)
var refraction_depth: texture_depth_2d;

const TILING: f32 = 6.0;
const WAVE_STRENGTH: f32 = 0.02;
const SHINE_DAMPER: f32 = 20.0;
const REFLECTIVITY: f32 = 0.5;
const EDGE_SOFTNESS: f32 = 5.0;

struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) tex_coord: vec2<f32>,
}

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) clip: vec4<f32>,
    @location(1) uv: vec2<f32>,
    @location(2) to_camera: vec3<f32>,
}

@vertex
fn vs_main(input: VertexInput) -> VertexOutput {
    var out: VertexOutput;
    let world_position = water.model * vec4<f32>(input.position, 1.0);
    out.position = globals.projection * globals.view * world_position;
    out.clip = out.position;
    out.uv = input.tex_coord * TILING;
    out.to_camera = globals.camera_position.xyz - world_position.xyz;
    return out;
}

fn linear_depth(depth: f32) -> f32 {
    let near = water.params.z;
    let far = water.params.w;
    return near * far / (far - depth * (far - near));
}

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    let ndc = input.clip.xy / input.clip.w;
    let refract_uv = vec2<f32>(0.5 + 0.5 * ndc.x, 0.5 - 0.5 * ndc.y);
    // the reflection was rendered from the mirrored camera, so it is flipped vertically
    let reflect_uv = vec2<f32>(0.5 + 0.5 * ndc.x, 0.5 + 0.5 * ndc.y);

    let move_factor = water.params.x;
    var distorted = textureSample(dudv_map, map_sampler, vec2<f32>(input.uv.x + move_factor, input.uv.y)).rg * 0.1;
    distorted = input.uv + vec2<f32>(distorted.x, distorted.y + move_factor);
    let distortion = (textureSample(dudv_map, map_sampler, distorted).rg * 2.0 - 1.0) * WAVE_STRENGTH;

    let refraction = textureSample(refraction_map, map_sampler, clamp(refract_uv + distortion, vec2<f32>(0.001), vec2<f32>(0.999)));
    let reflection = textureSample(reflection_map, map_sampler, clamp(reflect_uv + distortion, vec2<f32>(0.001), vec2<f32>(0.999)));
    let normal_sample = textureSample(normal_map, map_sampler, distorted);
    let normal = normalize(vec3<f32>(normal_sample.r * 2.0 - 1.0, normal_sample.b * 3.0, normal_sample.g * 2.0 - 1.0));

    let dims = vec2<i32>(textureDimensions(refraction_depth));
    let texel = clamp(vec2<i32>(input.position.xy), vec2<i32>(0), dims - vec2<i32>(1));
    let floor_distance = linear_depth(textureLoad(refraction_depth, texel, 0));
    let water_distance = linear_depth(input.position.z);
    let alpha = clamp((floor_distance - water_distance) / EDGE_SOFTNESS, 0.0, 1.0);

    let to_camera = normalize(input.to_camera);
    let fresnel = clamp(pow(max(dot(to_camera, vec3<f32>(0.0, 1.0, 0.0)), 0.0), 0.5), 0.0, 1.0);
    let reflected_light = reflect(normalize(globals.light_direction.xyz), normal);
    let specular = pow(max(dot(reflected_light, to_camera), 0.0), SHINE_DAMPER) * REFLECTIVITY * alpha;

    var color = mix(reflection, refraction, fresnel);
    color = mix(color, vec4<f32>(0.0, 0.3, 0.5, 1.0), 0.2);
    return vec4<f32>(color.rgb + globals.light_color.rgb * specular, alpha);
}
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passes_use_distinct_global_slots() {
        let slots = [
            pass_slot(PassKind::Reflection),
            pass_slot(PassKind::Refraction),
            pass_slot(PassKind::Main),
        ];
        assert_eq!(slots, [0, 1, 2]);
        assert!(!slots.contains(&WATER_SLOT));
    }

    #[test]
    fn surface_errors_map_to_render_errors() {
        assert!(matches!(
            surface_error(wgpu::SurfaceError::Lost),
            RenderError::SurfaceLost
        ));
        assert!(matches!(
            surface_error(wgpu::SurfaceError::Outdated),
            RenderError::SurfaceLost
        ));
        assert!(matches!(
            surface_error(wgpu::SurfaceError::OutOfMemory),
            RenderError::OutOfMemory
        ));
        assert!(matches!(
            surface_error(wgpu::SurfaceError::Timeout),
            RenderError::Backend(_)
        ));
    }

    #[test]
    fn extent_never_collapses_to_zero() {
        let size = extent(0, 480);
        assert_eq!((size.width, size.height), (1, 480));
    }

    #[test]
    fn shaders_agree_on_uniform_layout() {
        assert_eq!(std::mem::size_of::<GlobalUniform>(), 208);
        assert_eq!(std::mem::size_of::<ObjectConstants>(), 144);
        assert_eq!(std::mem::size_of::<WaterConstants>(), 80);
        assert!(SCENE_SHADER.contains("flags: vec4<f32>"));
        assert!(WATER_SHADER.contains("params: vec4<f32>"));
    }
}
