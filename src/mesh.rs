use std::rc::Rc;

use glam::{Mat4, Vec3};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::camera::Camera;
use crate::error::{ConfigError, MeshError, RenderError};
use crate::gpu::{GraphicsBackend, MeshHandle, MeshUpload};
use crate::pipeline::{upload_frame_uniforms, FrameUniforms, ShaderProgram};
use crate::transform::Transform;

/// Degrees subtracted from a mesh's rotation on every draw.
pub const ROTATION_STEP_DEGREES: f32 = 0.1;

/// CPU-side geometry: one color per position and a triangle-list index buffer.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MeshData {
    pub positions: Vec<Vec3>,
    pub colors: Vec<Vec3>,
    pub indices: Vec<u32>,
}

impl MeshData {
    pub fn new(
        positions: Vec<Vec3>,
        colors: Vec<Vec3>,
        indices: Vec<u32>,
    ) -> Result<Self, MeshError> {
        let mesh = Self {
            positions,
            colors,
            indices,
        };
        mesh.validate()?;
        Ok(mesh)
    }

    /// Unit quad in the XY plane with red, green and blue corners.
    pub fn quad() -> Self {
        Self {
            positions: vec![
                Vec3::new(-0.5, -0.5, 0.0),
                Vec3::new(0.5, -0.5, 0.0),
                Vec3::new(-0.5, 0.5, 0.0),
                Vec3::new(0.5, 0.5, 0.0),
            ],
            colors: vec![
                Vec3::new(1.0, 0.0, 0.0),
                Vec3::new(0.0, 1.0, 0.0),
                Vec3::new(0.0, 0.0, 1.0),
                Vec3::new(0.0, 0.0, 1.0),
            ],
            indices: vec![2, 0, 1, 3, 2, 1],
        }
    }

    pub fn validate(&self) -> Result<(), MeshError> {
        if self.positions.is_empty() {
            return Err(MeshError::Empty);
        }
        if self.colors.len() != self.positions.len() {
            return Err(MeshError::ColorCountMismatch {
                positions: self.positions.len(),
                colors: self.colors.len(),
            });
        }
        if self.indices.len() % 3 != 0 {
            return Err(MeshError::IndexCount(self.indices.len()));
        }
        let vertex_count = self.positions.len();
        match self.indices.iter().find(|&&i| i as usize >= vertex_count) {
            Some(&index) => Err(MeshError::IndexOutOfRange {
                index,
                vertex_count,
            }),
            None => Ok(()),
        }
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Corner positions of every triangle. Assumes validated data.
    pub fn triangles(&self) -> impl Iterator<Item = [Vec3; 3]> + '_ {
        self.indices.chunks_exact(3).map(|tri| {
            [
                self.positions[tri[0] as usize],
                self.positions[tri[1] as usize],
                self.positions[tri[2] as usize],
            ]
        })
    }

    pub fn triangle_areas(&self) -> impl Iterator<Item = f32> + '_ {
        self.triangles()
            .map(|[a, b, c]| (b - a).cross(c - a).length() * 0.5)
    }

    pub fn triangle_area(&self, index: usize) -> Option<f32> {
        self.triangle_areas().nth(index)
    }

    pub fn degenerate_triangles(&self) -> usize {
        self.triangle_areas()
            .filter(|area| *area <= f32::EPSILON)
            .count()
    }
}

/// A drawable mesh: uploaded buffers plus its own spin state.
#[derive(Debug)]
pub struct MeshInstance {
    name: String,
    buffers: MeshHandle,
    index_count: u32,
    pub transform: Transform,
    program: Option<Rc<ShaderProgram>>,
}

impl MeshInstance {
    pub fn create<B: GraphicsBackend + ?Sized>(
        backend: &mut B,
        name: impl Into<String>,
        data: &MeshData,
    ) -> Result<Self, RenderError> {
        let name = name.into();
        data.validate()?;
        let buffers = backend.create_mesh(&MeshUpload {
            label: &name,
            positions: &data.positions,
            colors: &data.colors,
            indices: &data.indices,
        })?;
        debug!(
            "created mesh {name} with {} vertices and {} triangles",
            data.positions.len(),
            data.triangle_count()
        );
        Ok(Self {
            name,
            buffers,
            index_count: data.indices.len() as u32,
            transform: Transform::default(),
            program: None,
        })
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn buffers(&self) -> MeshHandle {
        self.buffers
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    /// Layout compatibility is checked when uniforms are resolved at draw time.
    pub fn set_pipeline(&mut self, program: Rc<ShaderProgram>) {
        self.program = Some(program);
    }

    pub fn model_matrix(&self) -> Mat4 {
        self.transform.model_matrix()
    }

    /// Spins the mesh one step, uploads its matrices and issues the draw.
    ///
    /// Leaves the program and mesh bound on the backend.
    pub fn draw<B: GraphicsBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        camera: &Camera,
    ) -> Result<(), RenderError> {
        let program = self
            .program
            .clone()
            .ok_or_else(|| ConfigError::NoPipeline {
                mesh: self.name.clone(),
            })?;
        let projection = camera
            .projection_matrix()
            .ok_or(ConfigError::ProjectionUnset)?;

        self.transform.rotation_degrees -= ROTATION_STEP_DEGREES;

        backend.use_program(program.handle());
        upload_frame_uniforms(
            backend,
            &program,
            &FrameUniforms {
                model: self.model_matrix(),
                view: camera.view_matrix(),
                projection,
            },
        )?;
        backend.bind_mesh(self.buffers);
        backend.draw_indexed(self.index_count);
        Ok(())
    }

    pub fn release<B: GraphicsBackend + ?Sized>(self, backend: &mut B) {
        debug!("releasing mesh {}", self.name);
        backend.delete_mesh(self.buffers);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::RasterState;
    use crate::pipeline::MODEL_MATRIX_UNIFORM;
    use crate::render::headless::{Command, HeadlessBackend};
    use crate::shader::ShaderSource;
    use glam::Vec4;

    const VERTEX: &str = include_str!("../shaders/vert.glsl");
    const FRAGMENT: &str = include_str!("../shaders/frag.glsl");

    fn setup() -> (HeadlessBackend, MeshInstance, Camera) {
        let mut backend = HeadlessBackend::new();
        let program = ShaderProgram::create(
            &mut backend,
            &ShaderSource::new(VERTEX, FRAGMENT),
            RasterState::default(),
        )
        .unwrap();
        let mut mesh = MeshInstance::create(&mut backend, "quad", &MeshData::quad())
            .unwrap()
            .with_transform(Transform::new(Vec3::new(0.0, 0.0, -2.0), 0.0, 0.5));
        mesh.set_pipeline(Rc::new(program));
        let mut camera = Camera::new();
        camera.set_projection(45f32.to_radians(), 640.0 / 480.0, 0.1, 10.0);
        (backend, mesh, camera)
    }

    #[test]
    fn quad_is_two_triangles_covering_the_unit_square() {
        let quad = MeshData::quad();
        assert!(quad.validate().is_ok());
        assert_eq!(quad.triangle_count(), 2);
        assert_eq!(quad.degenerate_triangles(), 0);
        let covered: f32 = quad.triangle_areas().sum();
        assert!((covered - 1.0).abs() < 1e-6);
        assert_eq!(quad.triangle_area(0), Some(0.5));
        assert_eq!(quad.triangle_area(2), None);
    }

    #[test]
    fn quad_triangles_share_only_the_diagonal() {
        let quad = MeshData::quad();
        let triangles: Vec<[Vec3; 3]> = quad.triangles().collect();
        let shared = triangles[0]
            .iter()
            .filter(|corner| triangles[1].contains(corner))
            .count();
        assert_eq!(shared, 2);
    }

    #[test]
    fn validation_rejects_inconsistent_data() {
        assert_eq!(
            MeshData::new(vec![Vec3::ZERO], vec![], vec![]).unwrap_err(),
            MeshError::ColorCountMismatch {
                positions: 1,
                colors: 0
            }
        );
        assert_eq!(
            MeshData::new(vec![Vec3::ZERO; 3], vec![Vec3::ONE; 3], vec![0, 1]).unwrap_err(),
            MeshError::IndexCount(2)
        );
        assert_eq!(
            MeshData::new(vec![Vec3::ZERO; 3], vec![Vec3::ONE; 3], vec![0, 1, 3]).unwrap_err(),
            MeshError::IndexOutOfRange {
                index: 3,
                vertex_count: 3
            }
        );
        assert_eq!(
            MeshData::new(vec![], vec![], vec![]).unwrap_err(),
            MeshError::Empty
        );
    }

    #[test]
    fn create_uploads_all_buffers() {
        let (backend, mesh, _) = setup();
        let stored = backend.mesh(mesh.buffers()).unwrap();
        assert_eq!(stored.indices, vec![2, 0, 1, 3, 2, 1]);
        assert_eq!(stored.colors.len(), 4);
        assert_eq!(mesh.index_count(), 6);
    }

    #[test]
    fn allocation_failure_is_reported() {
        let mut backend = HeadlessBackend::new().rejecting_allocations();
        let err = MeshInstance::create(&mut backend, "quad", &MeshData::quad()).unwrap_err();
        assert!(matches!(err, RenderError::Gpu(_)));
    }

    #[test]
    fn each_draw_spins_by_a_fixed_step() {
        let (mut backend, mut mesh, camera) = setup();
        let frames = 25;
        for _ in 0..frames {
            backend.begin_frame(Vec4::ONE).unwrap();
            mesh.draw(&mut backend, &camera).unwrap();
            backend.present().unwrap();
        }

        let expected_degrees = -ROTATION_STEP_DEGREES * frames as f32;
        assert!((mesh.transform.rotation_degrees - expected_degrees).abs() < 1e-4);

        let expected = Transform::new(Vec3::new(0.0, 0.0, -2.0), expected_degrees, 0.5);
        let uploaded = backend
            .uniform_in_draw(&backend.draws()[0], MODEL_MATRIX_UNIFORM)
            .unwrap();
        assert!(uploaded.abs_diff_eq(expected.model_matrix(), 1e-4));
    }

    #[test]
    fn draw_binds_uploads_then_draws() {
        let (mut backend, mut mesh, camera) = setup();
        backend.begin_frame(Vec4::ONE).unwrap();
        mesh.draw(&mut backend, &camera).unwrap();

        let commands = backend.commands();
        assert!(matches!(commands[1], Command::UseProgram(_)));
        assert_eq!(
            commands
                .iter()
                .filter(|c| matches!(c, Command::UploadMat4 { .. }))
                .count(),
            3
        );
        assert!(matches!(commands[5], Command::BindMesh(_)));
        assert!(matches!(
            commands[6],
            Command::DrawIndexed { index_count: 6, .. }
        ));
    }

    #[test]
    fn draw_without_pipeline_is_a_configuration_error() {
        let mut backend = HeadlessBackend::new();
        let mut mesh = MeshInstance::create(&mut backend, "orphan", &MeshData::quad()).unwrap();
        let mut camera = Camera::new();
        camera.set_projection(1.0, 1.0, 0.1, 10.0);

        let err = mesh.draw(&mut backend, &camera).unwrap_err();
        assert_eq!(
            err,
            RenderError::Config(ConfigError::NoPipeline {
                mesh: "orphan".to_string()
            })
        );
        assert_eq!(mesh.transform.rotation_degrees, 0.0);
    }

    #[test]
    fn draw_requires_a_projection() {
        let (mut backend, mut mesh, _) = setup();
        let err = mesh.draw(&mut backend, &Camera::new()).unwrap_err();
        assert_eq!(err, RenderError::Config(ConfigError::ProjectionUnset));
    }

    #[test]
    fn release_frees_buffers() {
        let (mut backend, mesh, _) = setup();
        assert_eq!(backend.live_meshes(), 1);
        mesh.release(&mut backend);
        assert_eq!(backend.live_meshes(), 0);
    }
}
