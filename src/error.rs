use thiserror::Error;

use crate::shader::ShaderStage;

/// Host/shader mismatches and invalid settings. Never recoverable at draw time.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("could not find uniform `{name}` in the linked shader program")]
    MissingUniform { name: String },
    #[error("uniform `{name}` is not a 4x4 float matrix")]
    UniformType { name: String },
    #[error("mesh `{mesh}` has no shader program attached")]
    NoPipeline { mesh: String },
    #[error("projection matrix requested before it was set")]
    ProjectionUnset,
    #[error("unknown key name `{name}` bound to {action}")]
    UnknownKey { action: &'static str, name: String },
    #[error("invalid projection: {0}")]
    InvalidProjection(String),
}

/// Shader compilation and program linking failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error("failed to compile {stage} shader: {message}")]
    Compile { stage: ShaderStage, message: String },
    #[error("failed to link shader program: {message}")]
    Link { message: String },
}

/// Failures reported by the graphics backend.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GpuError {
    #[error("GPU rejected allocation of `{label}`: {message}")]
    Allocation { label: String, message: String },
    #[error("surface unavailable this frame: {0}")]
    SurfaceUnavailable(String),
    #[error("GPU is out of memory")]
    OutOfMemory,
}

impl GpuError {
    /// Whether the frame loop may skip the current frame and keep running.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::SurfaceUnavailable(_))
    }
}

/// Inconsistent CPU-side mesh data.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MeshError {
    #[error("mesh has no vertices")]
    Empty,
    #[error("mesh has {positions} positions but {colors} colors")]
    ColorCountMismatch { positions: usize, colors: usize },
    #[error("index count {0} is not a multiple of three")]
    IndexCount(usize),
    #[error("index {index} is out of range for {vertex_count} vertices")]
    IndexOutOfRange { index: u32, vertex_count: usize },
}

/// Any failure that can abort a frame.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error(transparent)]
    Gpu(#[from] GpuError),
    #[error(transparent)]
    Mesh(#[from] MeshError),
}

impl RenderError {
    /// True for shader/host mismatches as opposed to driver failures.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Pipeline(_))
    }
}
