use glam::{Mat4, Vec3, Vec4};
use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::{GpuError, PipelineError};
use crate::shader::{ShaderSource, UniformLocation, UniformTable};

/// Backend-issued identifier for uploaded mesh buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MeshHandle(pub(crate) u32);

/// Backend-issued identifier for a linked shader program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramHandle(pub(crate) u32);

/// Fixed-function state baked into a program at link time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RasterState {
    pub depth_test: bool,
    pub cull_faces: bool,
}

/// Vertex data handed to the backend. Positions bind to attribute slot 0 and
/// colors to slot 1, three floats each.
#[derive(Debug, Clone, Copy)]
pub struct MeshUpload<'a> {
    pub label: &'a str,
    pub positions: &'a [Vec3],
    pub colors: &'a [Vec3],
    pub indices: &'a [u32],
}

#[derive(Debug)]
pub struct CompiledProgram {
    pub handle: ProgramHandle,
    pub uniforms: UniformTable,
}

/// A non-fatal error raised by an individual GPU call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpuDiagnostic {
    pub call: &'static str,
    pub message: String,
}

impl GpuDiagnostic {
    pub fn new(call: &'static str, message: impl Into<String>) -> Self {
        Self {
            call,
            message: message.into(),
        }
    }
}

/// Immediate-mode GPU surface: bind a program, upload uniforms, bind a mesh,
/// draw. Each draw captures the uniform values current when it was issued.
pub trait GraphicsBackend {
    fn create_mesh(&mut self, mesh: &MeshUpload<'_>) -> Result<MeshHandle, GpuError>;

    fn delete_mesh(&mut self, mesh: MeshHandle);

    /// Compiles and links `source` into a program.
    fn create_program(
        &mut self,
        source: &ShaderSource,
        raster: RasterState,
    ) -> Result<CompiledProgram, PipelineError>;

    fn delete_program(&mut self, program: ProgramHandle);

    /// Starts recording a frame that clears color to `clear_color` and depth to 1.
    fn begin_frame(&mut self, clear_color: Vec4) -> Result<(), GpuError>;

    fn use_program(&mut self, program: ProgramHandle);

    /// Writes a column-major matrix into the active program's uniform storage.
    fn upload_mat4(&mut self, location: UniformLocation, value: &Mat4);

    fn bind_mesh(&mut self, mesh: MeshHandle);

    fn draw_indexed(&mut self, index_count: u32);

    /// Submits the recorded frame and swaps buffers.
    fn present(&mut self) -> Result<(), GpuError>;

    fn resize(&mut self, _width: u32, _height: u32) {}

    /// Drains the diagnostics collected since the last call.
    fn take_diagnostics(&mut self) -> Vec<GpuDiagnostic>;
}

/// Logs and discards pending diagnostics, returning how many there were.
pub fn log_diagnostics<B: GraphicsBackend + ?Sized>(backend: &mut B) -> usize {
    let diagnostics = backend.take_diagnostics();
    for diagnostic in &diagnostics {
        warn!("GPU error in {}: {}", diagnostic.call, diagnostic.message);
    }
    diagnostics.len()
}
