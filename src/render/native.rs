use std::borrow::Cow;
use std::collections::HashMap;
use std::num::NonZeroU64;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};
use log::{debug, info};
use wgpu::util::DeviceExt;
use winit::window::Window;

use crate::error::{GpuError, PipelineError};
use crate::gpu::{
    CompiledProgram, GpuDiagnostic, GraphicsBackend, MeshHandle, MeshUpload, ProgramHandle,
    RasterState,
};
use crate::shader::{self, ShaderSource, UniformLocation};

const SHADER_ENTRY_POINT: &str = "main";

/// Uploads land in CPU staging copies of each uniform block; every draw
/// snapshots them into its own bind group. Draws are encoded into one pass on
/// present.
pub struct WgpuBackend {
    window: Arc<Window>,
    surface: wgpu::Surface<'static>,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,
    depth: DepthBuffer,
    meshes: HashMap<MeshHandle, MeshBuffers>,
    programs: HashMap<ProgramHandle, GpuProgram>,
    next_id: u32,
    active_program: Option<ProgramHandle>,
    bound_mesh: Option<MeshHandle>,
    frame: Option<FrameRecording>,
    diagnostics: Vec<GpuDiagnostic>,
}

impl WgpuBackend {
    /// Acquires an adapter and device for `window` and configures its surface.
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
        let surface = instance
            .create_surface(Arc::clone(&window))
            .context("failed to create window surface")?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .context("failed to acquire GPU adapter")?;
        let adapter_info = adapter.get_info();
        info!(
            "GPU adapter: {} ({:?}, driver {} {})",
            adapter_info.name, adapter_info.backend, adapter_info.driver, adapter_info.driver_info
        );

        let device_descriptor = wgpu::DeviceDescriptor {
            label: Some("flycam-device"),
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
        // Vertex colors are written as-is, so prefer a linear target.
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|format| !format.is_srgb())
            .or_else(|| surface_caps.formats.first())
            .copied()
            .context("surface reports no supported formats")?;
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
            present_mode: wgpu::PresentMode::AutoVsync,
            desired_maximum_frame_latency: 2,
            alpha_mode,
            view_formats: vec![],
        };
        surface.configure(&device, &config);
        debug!("configured {surface_format:?} surface at {}x{}", size.width, size.height);

        let depth = DepthBuffer::create(&device, config.width, config.height);

        Ok(Self {
            window,
            surface,
            device,
            queue,
            config,
            depth,
            meshes: HashMap::new(),
            programs: HashMap::new(),
            next_id: 0,
            active_program: None,
            bound_mesh: None,
            frame: None,
            diagnostics: Vec::new(),
        })
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    fn next_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    fn diagnose(&mut self, call: &'static str, message: impl Into<String>) {
        self.diagnostics.push(GpuDiagnostic::new(call, message));
    }

    /// Runs `build` inside out-of-memory and validation error scopes and
    /// returns the first error either scope caught.
    fn scoped<T>(&self, build: impl FnOnce(&wgpu::Device) -> T) -> (T, Option<wgpu::Error>) {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = build(&self.device);
        let validation = pollster::block_on(self.device.pop_error_scope());
        let out_of_memory = pollster::block_on(self.device.pop_error_scope());
        (value, out_of_memory.or(validation))
    }

    fn build_pipeline(
        &self,
        device: &wgpu::Device,
        vertex: wgpu::ShaderModule,
        fragment: wgpu::ShaderModule,
        layout: &wgpu::BindGroupLayout,
        raster: RasterState,
    ) -> wgpu::RenderPipeline {
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("program-pipeline-layout"),
            bind_group_layouts: &[layout],
            push_constant_ranges: &[],
        });

        let (depth_write_enabled, depth_compare) = if raster.depth_test {
            (true, wgpu::CompareFunction::Less)
        } else {
            (false, wgpu::CompareFunction::Always)
        };

        device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("program-pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &vertex,
                entry_point: Some(SHADER_ENTRY_POINT),
                compilation_options: Default::default(),
                buffers: &[
                    attribute_layout(&POSITION_ATTRIBUTE),
                    attribute_layout(&COLOR_ATTRIBUTE),
                ],
            },
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: raster.cull_faces.then_some(wgpu::Face::Back),
                polygon_mode: wgpu::PolygonMode::Fill,
                ..Default::default()
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: DepthBuffer::FORMAT,
                depth_write_enabled,
                depth_compare,
                stencil: Default::default(),
                bias: Default::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            fragment: Some(wgpu::FragmentState {
                module: &fragment,
                entry_point: Some(SHADER_ENTRY_POINT),
                compilation_options: Default::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format: self.config.format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            multiview: None,
            cache: None,
        })
    }

    /// Snapshots the program's staging bytes into a bind group for one draw.
    fn snapshot_uniforms(&self, program: &GpuProgram) -> wgpu::BindGroup {
        let buffers: Vec<wgpu::Buffer> = program
            .blocks
            .iter()
            .map(|block| {
                self.device
                    .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                        label: Some("draw-uniforms"),
                        contents: &block.data,
                        usage: wgpu::BufferUsages::UNIFORM,
                    })
            })
            .collect();
        let entries: Vec<wgpu::BindGroupEntry<'_>> = program
            .blocks
            .iter()
            .zip(&buffers)
            .map(|(block, buffer)| wgpu::BindGroupEntry {
                binding: block.binding,
                resource: buffer.as_entire_binding(),
            })
            .collect();
        self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("draw-bind-group"),
            layout: &program.layout,
            entries: &entries,
        })
    }
}

impl GraphicsBackend for WgpuBackend {
    fn create_mesh(&mut self, mesh: &MeshUpload<'_>) -> Result<MeshHandle, GpuError> {
        let (buffers, error) = self.scoped(|device| MeshBuffers::upload(device, mesh));
        if let Some(error) = error {
            return Err(GpuError::Allocation {
                label: mesh.label.to_string(),
                message: error.to_string(),
            });
        }
        let handle = MeshHandle(self.next_id());
        self.meshes.insert(handle, buffers);
        debug!("uploaded mesh {} as {handle:?}", mesh.label);
        Ok(handle)
    }

    fn delete_mesh(&mut self, mesh: MeshHandle) {
        match self.meshes.remove(&mesh) {
            Some(buffers) => buffers.destroy(),
            None => self.diagnose("delete_mesh", format!("unknown mesh {mesh:?}")),
        }
        if self.bound_mesh == Some(mesh) {
            self.bound_mesh = None;
        }
    }

    fn create_program(
        &mut self,
        source: &ShaderSource,
        raster: RasterState,
    ) -> Result<CompiledProgram, PipelineError> {
        let shader::CompiledShaders {
            vertex,
            fragment,
            uniforms,
        } = shader::compile(source)?;

        if let Some(block) = uniforms.blocks().iter().find(|block| block.group != 0) {
            return Err(PipelineError::Link {
                message: format!(
                    "uniform block at set {} binding {} is outside set 0",
                    block.group, block.binding
                ),
            });
        }

        let layout_entries: Vec<wgpu::BindGroupLayoutEntry> = uniforms
            .blocks()
            .iter()
            .map(|block| wgpu::BindGroupLayoutEntry {
                binding: block.binding,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: NonZeroU64::new(u64::from(block.size)),
                },
                count: None,
            })
            .collect();

        let ((layout, pipeline), error) = self.scoped(|device| {
            let vertex = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("vertex-shader"),
                source: wgpu::ShaderSource::Naga(Cow::Owned(vertex)),
            });
            let fragment = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("fragment-shader"),
                source: wgpu::ShaderSource::Naga(Cow::Owned(fragment)),
            });
            let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("uniform-bind-layout"),
                entries: &layout_entries,
            });
            let pipeline = self.build_pipeline(device, vertex, fragment, &layout, raster);
            (layout, pipeline)
        });
        if let Some(error) = error {
            return Err(PipelineError::Link {
                message: error.to_string(),
            });
        }

        let blocks = uniforms
            .blocks()
            .iter()
            .map(|block| StagingBlock {
                binding: block.binding,
                data: vec![0; block.size as usize],
            })
            .collect();
        let handle = ProgramHandle(self.next_id());
        self.programs.insert(
            handle,
            GpuProgram {
                pipeline,
                layout,
                blocks,
            },
        );
        Ok(CompiledProgram { handle, uniforms })
    }

    fn delete_program(&mut self, program: ProgramHandle) {
        if self.programs.remove(&program).is_none() {
            self.diagnose("delete_program", format!("unknown program {program:?}"));
        }
        if self.active_program == Some(program) {
            self.active_program = None;
        }
    }

    fn begin_frame(&mut self, clear_color: Vec4) -> Result<(), GpuError> {
        if self.frame.take().is_some() {
            pollster::block_on(self.device.pop_error_scope());
            self.diagnose("begin_frame", "previous frame was never presented");
        }

        let output = match self.surface.get_current_texture() {
            Ok(output) => output,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                self.surface.configure(&self.device, &self.config);
                return Err(GpuError::SurfaceUnavailable(
                    "surface lost or outdated; reconfigured".to_string(),
                ));
            }
            Err(wgpu::SurfaceError::OutOfMemory) => return Err(GpuError::OutOfMemory),
            Err(err) => return Err(GpuError::SurfaceUnavailable(err.to_string())),
        };

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        self.frame = Some(FrameRecording {
            output,
            clear_color,
            draws: Vec::new(),
        });
        Ok(())
    }

    fn use_program(&mut self, program: ProgramHandle) {
        if self.programs.contains_key(&program) {
            self.active_program = Some(program);
        } else {
            self.diagnose("use_program", format!("unknown program {program:?}"));
        }
    }

    fn upload_mat4(&mut self, location: UniformLocation, value: &Mat4) {
        let Some(program) = self
            .active_program
            .and_then(|program| self.programs.get_mut(&program))
        else {
            self.diagnose("upload_mat4", "no active program");
            return;
        };
        let columns = value.to_cols_array();
        let bytes: &[u8] = bytemuck::cast_slice(&columns);
        let start = location.offset as usize;
        let target = if location.group == 0 {
            program
                .blocks
                .iter_mut()
                .find(|block| block.binding == location.binding)
                .and_then(|block| block.data.get_mut(start..start + bytes.len()))
        } else {
            None
        };
        let written = match target {
            Some(target) => {
                target.copy_from_slice(bytes);
                true
            }
            None => false,
        };
        if !written {
            self.diagnose(
                "upload_mat4",
                format!("{location:?} is not a location in the active program"),
            );
        }
    }

    fn bind_mesh(&mut self, mesh: MeshHandle) {
        if self.meshes.contains_key(&mesh) {
            self.bound_mesh = Some(mesh);
        } else {
            self.diagnose("bind_mesh", format!("unknown mesh {mesh:?}"));
        }
    }

    fn draw_indexed(&mut self, index_count: u32) {
        if self.frame.is_none() {
            self.diagnose("draw_indexed", "draw issued outside a frame");
            return;
        }
        let (Some(program), Some(mesh)) = (
            self.active_program.and_then(|handle| self.programs.get(&handle)),
            self.bound_mesh.and_then(|handle| self.meshes.get(&handle)),
        ) else {
            self.diagnose("draw_indexed", "draw issued without a program and mesh bound");
            return;
        };
        if index_count > mesh.index_count {
            let available = mesh.index_count;
            self.diagnose(
                "draw_indexed",
                format!("{index_count} indices requested, {available} available"),
            );
            return;
        }

        let draw = DrawCommand {
            pipeline: program.pipeline.clone(),
            bind_group: self.snapshot_uniforms(program),
            positions: mesh.positions.clone(),
            colors: mesh.colors.clone(),
            indices: mesh.indices.clone(),
            index_count,
        };
        if let Some(frame) = self.frame.as_mut() {
            frame.draws.push(draw);
        }
    }

    fn present(&mut self) -> Result<(), GpuError> {
        let Some(frame) = self.frame.take() else {
            self.diagnose("present", "present without a recorded frame");
            return Ok(());
        };

        let view = frame
            .output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("frame-encoder"),
            });

        let clear = frame.clear_color.as_dvec4();
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("main-pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &view,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color {
                        r: clear.x,
                        g: clear.y,
                        b: clear.z,
                        a: clear.w,
                    }),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: &self.depth.view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(1.0),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        for draw in &frame.draws {
            pass.set_pipeline(&draw.pipeline);
            pass.set_bind_group(0, &draw.bind_group, &[]);
            pass.set_vertex_buffer(0, draw.positions.slice(..));
            pass.set_vertex_buffer(1, draw.colors.slice(..));
            pass.set_index_buffer(draw.indices.slice(..), wgpu::IndexFormat::Uint32);
            pass.draw_indexed(0..draw.index_count, 0, 0..1);
        }

        drop(pass);
        self.queue.submit(std::iter::once(encoder.finish()));
        frame.output.present();

        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            self.diagnose("present", error.to_string());
        }
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        if (self.config.width, self.config.height) == (width, height) {
            return;
        }
        self.config.width = width;
        self.config.height = height;
        self.surface.configure(&self.device, &self.config);
        self.depth = DepthBuffer::create(&self.device, width, height);
    }

    fn take_diagnostics(&mut self) -> Vec<GpuDiagnostic> {
        std::mem::take(&mut self.diagnostics)
    }
}

struct FrameRecording {
    output: wgpu::SurfaceTexture,
    clear_color: Vec4,
    draws: Vec<DrawCommand>,
}

struct DrawCommand {
    pipeline: wgpu::RenderPipeline,
    bind_group: wgpu::BindGroup,
    positions: wgpu::Buffer,
    colors: wgpu::Buffer,
    indices: wgpu::Buffer,
    index_count: u32,
}

struct GpuProgram {
    pipeline: wgpu::RenderPipeline,
    layout: wgpu::BindGroupLayout,
    blocks: Vec<StagingBlock>,
}

/// CPU copy of one uniform block in set 0.
struct StagingBlock {
    binding: u32,
    data: Vec<u8>,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct VertexAttribute([f32; 3]);

impl From<Vec3> for VertexAttribute {
    fn from(value: Vec3) -> Self {
        Self(value.to_array())
    }
}

const POSITION_ATTRIBUTE: [wgpu::VertexAttribute; 1] = [wgpu::VertexAttribute {
    format: wgpu::VertexFormat::Float32x3,
    offset: 0,
    shader_location: 0,
}];

const COLOR_ATTRIBUTE: [wgpu::VertexAttribute; 1] = [wgpu::VertexAttribute {
    format: wgpu::VertexFormat::Float32x3,
    offset: 0,
    shader_location: 1,
}];

fn attribute_layout(attributes: &[wgpu::VertexAttribute]) -> wgpu::VertexBufferLayout<'_> {
    wgpu::VertexBufferLayout {
        array_stride: std::mem::size_of::<VertexAttribute>() as u64,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes,
    }
}

struct MeshBuffers {
    positions: wgpu::Buffer,
    colors: wgpu::Buffer,
    indices: wgpu::Buffer,
    index_count: u32,
}

impl MeshBuffers {
    fn upload(device: &wgpu::Device, mesh: &MeshUpload<'_>) -> Self {
        let attribute_buffer = |suffix: &str, values: &[Vec3]| {
            let attributes: Vec<VertexAttribute> =
                values.iter().copied().map(VertexAttribute::from).collect();
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(&format!("{}-{suffix}", mesh.label)),
                contents: bytemuck::cast_slice(&attributes),
                usage: wgpu::BufferUsages::VERTEX,
            })
        };
        let positions = attribute_buffer("positions", mesh.positions);
        let colors = attribute_buffer("colors", mesh.colors);
        let indices = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{}-indices", mesh.label)),
            contents: bytemuck::cast_slice(mesh.indices),
            usage: wgpu::BufferUsages::INDEX,
        });
        Self {
            positions,
            colors,
            indices,
            index_count: mesh.indices.len() as u32,
        }
    }

    fn destroy(self) {
        self.positions.destroy();
        self.colors.destroy();
        self.indices.destroy();
    }
}

struct DepthBuffer {
    _texture: wgpu::Texture,
    view: wgpu::TextureView,
}

impl DepthBuffer {
    const FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth24Plus;

    fn create(device: &wgpu::Device, width: u32, height: u32) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("depth-texture"),
            size: wgpu::Extent3d {
                width: width.max(1),
                height: height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: Self::FORMAT,
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
