use glam::Mat4;
use log::{info, trace};

use crate::error::{ConfigError, PipelineError};
use crate::gpu::{GraphicsBackend, ProgramHandle, RasterState};
use crate::shader::{ShaderSource, UniformKind, UniformLocation, UniformTable};

pub const MODEL_MATRIX_UNIFORM: &str = "uModelMatrix";
pub const VIEW_MATRIX_UNIFORM: &str = "uViewMatrix";
pub const PROJECTION_UNIFORM: &str = "uProjection";

/// Uniforms every mesh draw uploads.
pub const REQUIRED_UNIFORMS: [&str; 3] =
    [MODEL_MATRIX_UNIFORM, VIEW_MATRIX_UNIFORM, PROJECTION_UNIFORM];

/// A linked program and the uniforms it exposes.
#[derive(Debug)]
pub struct ShaderProgram {
    handle: ProgramHandle,
    uniforms: UniformTable,
}

impl ShaderProgram {
    pub fn create<B: GraphicsBackend + ?Sized>(
        backend: &mut B,
        source: &ShaderSource,
        raster: RasterState,
    ) -> Result<Self, PipelineError> {
        let compiled = backend.create_program(source, raster)?;
        info!(
            "linked shader program with {} uniform(s) in {} block(s)",
            compiled.uniforms.len(),
            compiled.uniforms.blocks().len()
        );
        Ok(Self {
            handle: compiled.handle,
            uniforms: compiled.uniforms,
        })
    }

    pub fn handle(&self) -> ProgramHandle {
        self.handle
    }

    pub fn resolve_uniform(&self, name: &str) -> Result<UniformLocation, ConfigError> {
        let location = self
            .uniforms
            .get(name)
            .map(|info| info.location)
            .ok_or_else(|| ConfigError::MissingUniform {
                name: name.to_string(),
            })?;
        trace!("location of {name}: {location:?}");
        Ok(location)
    }

    /// Fails on the first name the program does not expose.
    pub fn require_uniforms(&self, names: &[&str]) -> Result<(), ConfigError> {
        names
            .iter()
            .try_for_each(|name| self.resolve_uniform(name).map(|_| ()))
    }

    pub fn release<B: GraphicsBackend + ?Sized>(&self, backend: &mut B) {
        backend.delete_program(self.handle);
    }
}

/// Matrices uploaded for every draw.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameUniforms {
    pub model: Mat4,
    pub view: Mat4,
    pub projection: Mat4,
}

/// Resolves `name` and uploads `value`; the uniform must be a `mat4`.
pub fn upload_matrix<B: GraphicsBackend + ?Sized>(
    backend: &mut B,
    program: &ShaderProgram,
    name: &str,
    value: &Mat4,
) -> Result<(), ConfigError> {
    let location = program.resolve_uniform(name)?;
    if program.uniforms.get(name).map(|info| info.kind) != Some(UniformKind::Mat4) {
        return Err(ConfigError::UniformType {
            name: name.to_string(),
        });
    }
    backend.upload_mat4(location, value);
    Ok(())
}

/// Uploads model, view and projection by value. The program must be active.
pub fn upload_frame_uniforms<B: GraphicsBackend + ?Sized>(
    backend: &mut B,
    program: &ShaderProgram,
    uniforms: &FrameUniforms,
) -> Result<(), ConfigError> {
    upload_matrix(backend, program, MODEL_MATRIX_UNIFORM, &uniforms.model)?;
    upload_matrix(backend, program, VIEW_MATRIX_UNIFORM, &uniforms.view)?;
    upload_matrix(backend, program, PROJECTION_UNIFORM, &uniforms.projection)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::headless::{Command, HeadlessBackend};

    const VERTEX: &str = include_str!("../shaders/vert.glsl");
    const FRAGMENT: &str = include_str!("../shaders/frag.glsl");

    const VERTEX_FLOAT_PROJECTION: &str = r#"#version 450 core
layout(location = 0) in vec3 position;
layout(location = 1) in vec3 vertexColors;
layout(set = 0, binding = 0) uniform Transforms {
    mat4 uModelMatrix;
    mat4 uViewMatrix;
    float uProjection;
};
layout(location = 0) out vec3 v_vertexColors;
void main() {
    v_vertexColors = vertexColors;
    gl_Position = uViewMatrix * uModelMatrix * vec4(position, uProjection);
}
"#;

    fn program(backend: &mut HeadlessBackend, vertex: &str) -> ShaderProgram {
        ShaderProgram::create(
            backend,
            &ShaderSource::new(vertex, FRAGMENT),
            RasterState::default(),
        )
        .unwrap()
    }

    #[test]
    fn resolves_known_uniforms() {
        let mut backend = HeadlessBackend::new();
        let program = program(&mut backend, VERTEX);
        assert_eq!(program.resolve_uniform(VIEW_MATRIX_UNIFORM).unwrap().offset, 64);
        assert!(program.require_uniforms(&REQUIRED_UNIFORMS).is_ok());
    }

    #[test]
    fn missing_uniform_is_a_configuration_error() {
        let mut backend = HeadlessBackend::new();
        let program = program(&mut backend, VERTEX);
        let err = program.resolve_uniform("uModelMatix").unwrap_err();
        assert_eq!(
            err,
            ConfigError::MissingUniform {
                name: "uModelMatix".to_string()
            }
        );
    }

    #[test]
    fn wrong_uniform_type_is_rejected_without_upload() {
        let mut backend = HeadlessBackend::new();
        let program = program(&mut backend, VERTEX_FLOAT_PROJECTION);
        backend.begin_frame(glam::Vec4::ONE).unwrap();
        backend.use_program(program.handle());

        let err = upload_matrix(&mut backend, &program, PROJECTION_UNIFORM, &Mat4::IDENTITY)
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::UniformType {
                name: PROJECTION_UNIFORM.to_string()
            }
        );
        assert!(!backend
            .commands()
            .iter()
            .any(|command| matches!(command, Command::UploadMat4 { .. })));
    }

    #[test]
    fn frame_uniforms_upload_in_model_view_projection_order() {
        let mut backend = HeadlessBackend::new();
        let program = program(&mut backend, VERTEX);
        backend.begin_frame(glam::Vec4::ONE).unwrap();
        backend.use_program(program.handle());

        let uniforms = FrameUniforms {
            model: Mat4::from_scale(glam::Vec3::splat(2.0)),
            view: Mat4::IDENTITY,
            projection: Mat4::from_translation(glam::Vec3::X),
        };
        upload_frame_uniforms(&mut backend, &program, &uniforms).unwrap();

        let offsets: Vec<u32> = backend
            .commands()
            .iter()
            .filter_map(|command| match command {
                Command::UploadMat4 { location, .. } => Some(location.offset),
                _ => None,
            })
            .collect();
        assert_eq!(offsets, vec![0, 64, 128]);
        assert_eq!(
            backend.uniform_value(program.handle(), PROJECTION_UNIFORM),
            Some(uniforms.projection)
        );
    }
}
