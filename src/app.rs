use std::rc::Rc;

use glam::IVec2;
use log::{debug, info, warn};

use crate::camera::Camera;
use crate::config::{AppConfig, ResolvedBindings};
use crate::error::{GpuError, RenderError};
use crate::gpu::{log_diagnostics, GraphicsBackend};
use crate::input::{InputEvent, InputSource};
use crate::mesh::{MeshData, MeshInstance};
use crate::pipeline::{ShaderProgram, REQUIRED_UNIFORMS};
use crate::shader::ShaderSource;
use crate::transform::Transform;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    Running,
    Quitting,
    Stopped,
}

/// Owns everything the frame loop touches: backend, camera, program and meshes.
pub struct App<B: GraphicsBackend> {
    config: AppConfig,
    bindings: ResolvedBindings,
    backend: B,
    camera: Camera,
    program: Rc<ShaderProgram>,
    meshes: Vec<MeshInstance>,
    mouse: IVec2,
    state: FrameState,
    frames: u64,
}

impl<B: GraphicsBackend> App<B> {
    /// Links the shader program, checks it exposes the matrices every draw
    /// needs, and uploads one demo quad per configured transform.
    pub fn new(config: AppConfig, mut backend: B, source: &ShaderSource) -> Result<Self, RenderError> {
        let bindings = config.bindings.resolve()?;
        config.projection.validate()?;
        let program = ShaderProgram::create(&mut backend, source, config.raster)?;
        program.require_uniforms(&REQUIRED_UNIFORMS)?;

        let mut camera = Camera::new();
        camera.set_projection_params(config.projection_for(config.width, config.height));
        backend.resize(config.width, config.height);

        let mouse = IVec2::new(config.width as i32 / 2, config.height as i32 / 2);
        let transforms = config.meshes.clone();
        let mut app = Self {
            config,
            bindings,
            backend,
            camera,
            program: Rc::new(program),
            meshes: Vec::new(),
            mouse,
            state: FrameState::Running,
            frames: 0,
        };
        for transform in transforms {
            app.add_mesh(&MeshData::quad(), transform)?;
        }
        Ok(app)
    }

    /// Uploads `data` and appends it to the draw list with the shared program.
    pub fn add_mesh(&mut self, data: &MeshData, transform: Transform) -> Result<(), RenderError> {
        let name = format!("mesh{}", self.meshes.len());
        let mut mesh = MeshInstance::create(&mut self.backend, name, data)?.with_transform(transform);
        mesh.set_pipeline(Rc::clone(&self.program));
        self.meshes.push(mesh);
        Ok(())
    }

    /// Runs one iteration: input, camera update, draw, present.
    ///
    /// Returns without drawing once a quit has been requested.
    pub fn tick<I: InputSource + ?Sized>(&mut self, input: &mut I) -> Result<FrameState, RenderError> {
        if self.state != FrameState::Running {
            return Ok(self.state);
        }

        while let Some(event) = input.poll_event() {
            match event {
                InputEvent::Quit => self.request_quit(),
                InputEvent::MouseMotion { dx, dy } => {
                    self.mouse += IVec2::new(dx, dy);
                    self.camera.look(self.mouse.x, self.mouse.y);
                }
                InputEvent::KeyDown(_) | InputEvent::KeyUp(_) => {}
            }
        }

        let keyboard = input.keyboard();
        if keyboard.is_key_down(self.bindings.quit) {
            self.request_quit();
        }
        if self.state != FrameState::Running {
            return Ok(self.state);
        }

        let speed = self.config.move_speed;
        if keyboard.is_key_down(self.bindings.forward) {
            self.camera.move_forward(speed);
        }
        if keyboard.is_key_down(self.bindings.backward) {
            self.camera.move_backward(speed);
        }
        if keyboard.is_key_down(self.bindings.left) {
            self.camera.move_left(speed);
        }
        if keyboard.is_key_down(self.bindings.right) {
            self.camera.move_right(speed);
        }

        if self.render_frame()? {
            self.frames += 1;
        }
        Ok(self.state)
    }

    /// Ticks until the loop stops running or `max_frames` frames were presented.
    pub fn run<I: InputSource + ?Sized>(
        &mut self,
        input: &mut I,
        max_frames: Option<u64>,
    ) -> Result<FrameState, RenderError> {
        while self.state == FrameState::Running {
            if max_frames.is_some_and(|limit| self.frames >= limit) {
                self.request_quit();
                break;
            }
            self.tick(input)?;
        }
        Ok(self.state)
    }

    pub fn request_quit(&mut self) {
        if self.state == FrameState::Running {
            info!("quit requested after {} frame(s)", self.frames);
            self.state = FrameState::Quitting;
        }
    }

    /// Zero-sized windows (minimized) keep the previous projection.
    pub fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        debug!("resizing to {width}x{height}");
        self.camera
            .set_projection_params(self.config.projection_for(width, height));
        self.backend.resize(width, height);
    }

    /// Releases every GPU resource. Safe to call more than once.
    pub fn shutdown(&mut self) {
        if self.state == FrameState::Stopped {
            return;
        }
        for mesh in self.meshes.drain(..) {
            mesh.release(&mut self.backend);
        }
        self.program.release(&mut self.backend);
        log_diagnostics(&mut self.backend);
        self.state = FrameState::Stopped;
        info!("stopped after {} frame(s)", self.frames);
    }

    pub fn print_final_state(&self) {
        let eye = self.camera.eye();
        let direction = self.camera.view_direction();
        println!("Frames rendered: {}", self.frames);
        println!(
            "Camera eye=({:.2}, {:.2}, {:.2}) direction=({:.2}, {:.2}, {:.2})",
            eye.x, eye.y, eye.z, direction.x, direction.y, direction.z
        );
        println!("Final mesh states:");
        for mesh in &self.meshes {
            let transform = &mesh.transform;
            println!(
                " - {} pos=({:.2}, {:.2}, {:.2}) rotation={:.2} scale={:.2}",
                mesh.name(),
                transform.translation.x,
                transform.translation.y,
                transform.translation.z,
                transform.rotation_degrees,
                transform.scale
            );
        }
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn meshes(&self) -> &[MeshInstance] {
        &self.meshes
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Returns whether the frame reached the screen.
    fn render_frame(&mut self) -> Result<bool, RenderError> {
        if let Err(err) = self.backend.begin_frame(self.config.clear_color()) {
            return skip_if_recoverable(err);
        }
        for mesh in &mut self.meshes {
            mesh.draw(&mut self.backend, &self.camera)?;
        }
        if let Err(err) = self.backend.present() {
            return skip_if_recoverable(err);
        }
        log_diagnostics(&mut self.backend);
        Ok(true)
    }
}

fn skip_if_recoverable(err: GpuError) -> Result<bool, RenderError> {
    if err.is_recoverable() {
        warn!("skipping frame: {err}");
        Ok(false)
    } else {
        Err(err.into())
    }
}
