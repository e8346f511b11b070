use std::collections::HashMap;

use glam::{Mat4, Vec3, Vec4};
use log::debug;

use crate::error::{GpuError, PipelineError};
use crate::gpu::{
    CompiledProgram, GpuDiagnostic, GraphicsBackend, MeshHandle, MeshUpload, ProgramHandle,
    RasterState,
};
use crate::shader::{self, ShaderSource, UniformLocation, UniformTable};

const MAT4_SIZE: u32 = 64;

/// One recorded backend call.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    BeginFrame { clear_color: Vec4 },
    UseProgram(ProgramHandle),
    UploadMat4 { location: UniformLocation, value: Mat4 },
    BindMesh(MeshHandle),
    DrawIndexed { program: ProgramHandle, mesh: MeshHandle, index_count: u32 },
    Present,
}

/// A draw with the uniform values it captured.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawRecord {
    pub program: ProgramHandle,
    pub mesh: MeshHandle,
    pub mesh_label: String,
    pub index_count: u32,
    pub uniforms: HashMap<UniformLocation, Mat4>,
}

#[derive(Debug, Clone)]
pub struct StoredMesh {
    pub label: String,
    pub positions: Vec<Vec3>,
    pub colors: Vec<Vec3>,
    pub indices: Vec<u32>,
}

#[derive(Debug)]
struct StoredProgram {
    uniforms: UniformTable,
    raster: RasterState,
    values: HashMap<UniformLocation, Mat4>,
}

/// Records the command stream instead of drawing. Misuse a driver would flag
/// is reported as a diagnostic.
#[derive(Debug, Default)]
pub struct HeadlessBackend {
    meshes: HashMap<MeshHandle, StoredMesh>,
    programs: HashMap<ProgramHandle, StoredProgram>,
    next_id: u32,
    active_program: Option<ProgramHandle>,
    bound_mesh: Option<MeshHandle>,
    recording: bool,
    commands: Vec<Command>,
    draws: Vec<DrawRecord>,
    frames_presented: u64,
    size: (u32, u32),
    reject_allocations: bool,
    surface_losses: u32,
    out_of_memory: bool,
    diagnostics: Vec<GpuDiagnostic>,
}

impl HeadlessBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every later mesh allocation fail, as a driver out of space would.
    pub fn rejecting_allocations(mut self) -> Self {
        self.reject_allocations = true;
        self
    }

    /// Makes the next `begin_frame` fail as if the surface had been lost.
    pub fn losing_surface_once(mut self) -> Self {
        self.surface_losses += 1;
        self
    }

    /// Makes every `begin_frame` fail with [`GpuError::OutOfMemory`].
    pub fn out_of_memory_on_begin(mut self) -> Self {
        self.out_of_memory = true;
        self
    }

    /// Commands recorded since the start of the most recent frame.
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Draws issued during the most recent frame.
    pub fn draws(&self) -> &[DrawRecord] {
        &self.draws
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    pub fn mesh(&self, handle: MeshHandle) -> Option<&StoredMesh> {
        self.meshes.get(&handle)
    }

    pub fn live_meshes(&self) -> usize {
        self.meshes.len()
    }

    pub fn live_programs(&self) -> usize {
        self.programs.len()
    }

    pub fn raster_state(&self, program: ProgramHandle) -> Option<RasterState> {
        self.programs.get(&program).map(|stored| stored.raster)
    }

    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    /// Last value uploaded to `name` in `program`.
    pub fn uniform_value(&self, program: ProgramHandle, name: &str) -> Option<Mat4> {
        let stored = self.programs.get(&program)?;
        let location = stored.uniforms.get(name)?.location;
        stored.values.get(&location).copied()
    }

    /// Value `name` held when `draw` was issued.
    pub fn uniform_in_draw(&self, draw: &DrawRecord, name: &str) -> Option<Mat4> {
        let location = self.programs.get(&draw.program)?.uniforms.get(name)?.location;
        draw.uniforms.get(&location).copied()
    }

    fn next_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    fn diagnose(&mut self, call: &'static str, message: impl Into<String>) {
        self.diagnostics.push(GpuDiagnostic::new(call, message));
    }
}

impl GraphicsBackend for HeadlessBackend {
    fn create_mesh(&mut self, mesh: &MeshUpload<'_>) -> Result<MeshHandle, GpuError> {
        if self.reject_allocations {
            return Err(GpuError::Allocation {
                label: mesh.label.to_string(),
                message: "buffer allocation rejected".to_string(),
            });
        }
        let handle = MeshHandle(self.next_id());
        self.meshes.insert(
            handle,
            StoredMesh {
                label: mesh.label.to_string(),
                positions: mesh.positions.to_vec(),
                colors: mesh.colors.to_vec(),
                indices: mesh.indices.to_vec(),
            },
        );
        debug!("allocated mesh {} as {handle:?}", mesh.label);
        Ok(handle)
    }

    fn delete_mesh(&mut self, mesh: MeshHandle) {
        if self.meshes.remove(&mesh).is_none() {
            self.diagnose("delete_mesh", format!("unknown mesh {mesh:?}"));
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
        let compiled = shader::compile(source)?;
        let handle = ProgramHandle(self.next_id());
        self.programs.insert(
            handle,
            StoredProgram {
                uniforms: compiled.uniforms.clone(),
                raster,
                values: HashMap::new(),
            },
        );
        Ok(CompiledProgram {
            handle,
            uniforms: compiled.uniforms,
        })
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
        if self.out_of_memory {
            return Err(GpuError::OutOfMemory);
        }
        if self.surface_losses > 0 {
            self.surface_losses -= 1;
            return Err(GpuError::SurfaceUnavailable("surface lost".to_string()));
        }
        if self.recording {
            self.diagnose("begin_frame", "previous frame was never presented");
        }
        self.recording = true;
        self.commands.clear();
        self.draws.clear();
        self.commands.push(Command::BeginFrame { clear_color });
        Ok(())
    }

    fn use_program(&mut self, program: ProgramHandle) {
        self.commands.push(Command::UseProgram(program));
        if self.programs.contains_key(&program) {
            self.active_program = Some(program);
        } else {
            self.diagnose("use_program", format!("unknown program {program:?}"));
        }
    }

    fn upload_mat4(&mut self, location: UniformLocation, value: &Mat4) {
        self.commands.push(Command::UploadMat4 {
            location,
            value: *value,
        });
        let Some(stored) = self
            .active_program
            .and_then(|program| self.programs.get_mut(&program))
        else {
            self.diagnose("upload_mat4", "no active program");
            return;
        };
        let fits = stored
            .uniforms
            .block(location.group, location.binding)
            .is_some_and(|block| location.offset + MAT4_SIZE <= block.size);
        if fits {
            stored.values.insert(location, *value);
        } else {
            self.diagnose(
                "upload_mat4",
                format!("{location:?} is not a location in the active program"),
            );
        }
    }

    fn bind_mesh(&mut self, mesh: MeshHandle) {
        self.commands.push(Command::BindMesh(mesh));
        if self.meshes.contains_key(&mesh) {
            self.bound_mesh = Some(mesh);
        } else {
            self.diagnose("bind_mesh", format!("unknown mesh {mesh:?}"));
        }
    }

    fn draw_indexed(&mut self, index_count: u32) {
        if !self.recording {
            self.diagnose("draw_indexed", "draw issued outside a frame");
            return;
        }
        let (Some(program), Some(mesh)) = (self.active_program, self.bound_mesh) else {
            self.diagnose("draw_indexed", "draw issued without a program and mesh bound");
            return;
        };
        let stored_mesh = &self.meshes[&mesh];
        if index_count as usize > stored_mesh.indices.len() {
            let available = stored_mesh.indices.len();
            self.diagnose(
                "draw_indexed",
                format!("{index_count} indices requested, {available} available"),
            );
            return;
        }
        let mesh_label = stored_mesh.label.clone();
        let uniforms = self.programs[&program].values.clone();
        self.commands.push(Command::DrawIndexed {
            program,
            mesh,
            index_count,
        });
        self.draws.push(DrawRecord {
            program,
            mesh,
            mesh_label,
            index_count,
            uniforms,
        });
    }

    fn present(&mut self) -> Result<(), GpuError> {
        if !self.recording {
            self.diagnose("present", "present without a recorded frame");
            return Ok(());
        }
        self.commands.push(Command::Present);
        self.recording = false;
        self.frames_presented += 1;
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.size = (width, height);
    }

    fn take_diagnostics(&mut self) -> Vec<GpuDiagnostic> {
        std::mem::take(&mut self.diagnostics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VERTEX: &str = include_str!("../../shaders/vert.glsl");
    const FRAGMENT: &str = include_str!("../../shaders/frag.glsl");

    fn upload() -> (Vec<Vec3>, Vec<Vec3>, Vec<u32>) {
        (vec![Vec3::ZERO, Vec3::X, Vec3::Y], vec![Vec3::ONE; 3], vec![0, 1, 2])
    }

    #[test]
    fn draw_without_bindings_is_advisory() {
        let mut backend = HeadlessBackend::new();
        backend.begin_frame(Vec4::ONE).unwrap();
        backend.draw_indexed(3);
        backend.present().unwrap();

        assert!(backend.draws().is_empty());
        let diagnostics = backend.take_diagnostics();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].call, "draw_indexed");
        assert!(backend.take_diagnostics().is_empty());
    }

    #[test]
    fn draws_capture_uniforms_at_issue_time() {
        let mut backend = HeadlessBackend::new();
        let (positions, colors, indices) = upload();
        let mesh = backend
            .create_mesh(&MeshUpload {
                label: "tri",
                positions: &positions,
                colors: &colors,
                indices: &indices,
            })
            .unwrap();
        let program = backend
            .create_program(&ShaderSource::new(VERTEX, FRAGMENT), RasterState::default())
            .unwrap();
        let model = program.uniforms.get("uModelMatrix").unwrap().location;

        backend.begin_frame(Vec4::ONE).unwrap();
        backend.use_program(program.handle);
        backend.bind_mesh(mesh);
        backend.upload_mat4(model, &Mat4::IDENTITY);
        backend.draw_indexed(3);
        backend.upload_mat4(model, &Mat4::ZERO);
        backend.draw_indexed(3);
        backend.present().unwrap();

        let draws = backend.draws();
        assert_eq!(draws.len(), 2);
        assert_eq!(
            backend.uniform_in_draw(&draws[0], "uModelMatrix"),
            Some(Mat4::IDENTITY)
        );
        assert_eq!(
            backend.uniform_in_draw(&draws[1], "uModelMatrix"),
            Some(Mat4::ZERO)
        );
        assert_eq!(backend.frames_presented(), 1);
    }

    #[test]
    fn rejected_allocations_surface_as_errors() {
        let mut backend = HeadlessBackend::new().rejecting_allocations();
        let (positions, colors, indices) = upload();
        let err = backend
            .create_mesh(&MeshUpload {
                label: "tri",
                positions: &positions,
                colors: &colors,
                indices: &indices,
            })
            .unwrap_err();
        assert!(matches!(err, GpuError::Allocation { label, .. } if label == "tri"));
    }

    #[test]
    fn lost_surface_fails_a_single_frame() {
        let mut backend = HeadlessBackend::new().losing_surface_once();
        let err = backend.begin_frame(Vec4::ONE).unwrap_err();
        assert!(err.is_recoverable());
        assert!(backend.commands().is_empty());

        backend.begin_frame(Vec4::ONE).unwrap();
        backend.present().unwrap();
        assert_eq!(backend.frames_presented(), 1);
        assert!(backend.take_diagnostics().is_empty());
    }
}
