//! Free-fly camera renderer built around a fixed-step frame loop.
//!
//! The crate keeps the frame loop, camera and mesh logic independent of the
//! GPU: everything renders through the [`GraphicsBackend`] trait. The wgpu
//! backend draws into a winit window, while [`HeadlessBackend`] records the
//! command stream so the whole loop can run and be tested without a display.

pub mod app;
pub mod camera;
pub mod config;
pub mod error;
pub mod gpu;
pub mod input;
pub mod mesh;
pub mod pipeline;
pub mod render;
pub mod shader;
pub mod transform;

pub use app::{App, FrameState};
pub use camera::{Camera, Projection};
pub use config::AppConfig;
pub use error::{ConfigError, GpuError, MeshError, PipelineError, RenderError};
pub use gpu::{GraphicsBackend, RasterState};
pub use input::{
    EventQueue, InputEvent, InputSource, KeyCode, KeyboardState, MotionAccumulator, NamedKey,
};
pub use mesh::{MeshData, MeshInstance};
pub use pipeline::ShaderProgram;
pub use render::{HeadlessBackend, WgpuBackend};
pub use shader::ShaderSource;
pub use transform::Transform;
