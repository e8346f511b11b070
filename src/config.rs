use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use glam::{Vec3, Vec4};
use serde::{Deserialize, Serialize};

use crate::camera::Projection;
use crate::error::ConfigError;
use crate::gpu::RasterState;
use crate::input::KeyCode;
use crate::shader::DEFAULT_SHADER_DIR;
use crate::transform::Transform;

pub const DEFAULT_WIDTH: u32 = 640;
pub const DEFAULT_HEIGHT: u32 = 480;

/// Application settings. Every field has a compiled-in default, so a config
/// file only needs the values it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub shader_dir: PathBuf,
    /// Distance moved per frame while a movement key is held.
    pub move_speed: f32,
    pub clear_color: [f32; 4],
    pub raster: RasterState,
    pub projection: ProjectionConfig,
    pub bindings: KeyBindings,
    /// One demo quad per entry, drawn in this order.
    pub meshes: Vec<Transform>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            title: "flycam".to_string(),
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            shader_dir: PathBuf::from(DEFAULT_SHADER_DIR),
            move_speed: 0.1,
            clear_color: [1.0, 1.0, 0.1, 1.0],
            raster: RasterState::default(),
            projection: ProjectionConfig::default(),
            bindings: KeyBindings::default(),
            meshes: vec![Transform::new(Vec3::new(0.0, 0.0, -2.0), 0.0, 0.5)],
        }
    }
}

impl AppConfig {
    /// Reads a JSON config file; missing fields keep their defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("unable to read config {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("invalid config {}", path.display()))
    }

    /// Parses a config and rejects projection settings no frustum can use.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.projection.validate()?;
        Ok(config)
    }

    pub fn aspect_ratio(&self) -> f32 {
        if self.height == 0 {
            1.0
        } else {
            self.width as f32 / self.height as f32
        }
    }

    pub fn projection_for(&self, width: u32, height: u32) -> Projection {
        let aspect_ratio = if height == 0 {
            1.0
        } else {
            width as f32 / height as f32
        };
        Projection {
            fov_y_radians: self.projection.fov_y_degrees.to_radians(),
            aspect_ratio,
            near: self.projection.near,
            far: self.projection.far,
        }
    }

    pub fn clear_color(&self) -> Vec4 {
        Vec4::from_array(self.clear_color)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectionConfig {
    pub fov_y_degrees: f32,
    pub near: f32,
    pub far: f32,
}

impl ProjectionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let Self {
            fov_y_degrees,
            near,
            far,
        } = *self;
        if !(fov_y_degrees > 0.0 && fov_y_degrees < 180.0) {
            return Err(ConfigError::InvalidProjection(format!(
                "vertical field of view {fov_y_degrees} must be between 0 and 180 degrees"
            )));
        }
        if !(near > 0.0 && near.is_finite()) {
            return Err(ConfigError::InvalidProjection(format!(
                "near plane {near} must be positive"
            )));
        }
        if !(far > near && far.is_finite()) {
            return Err(ConfigError::InvalidProjection(format!(
                "far plane {far} must lie beyond the near plane {near}"
            )));
        }
        Ok(())
    }
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            fov_y_degrees: 45.0,
            near: 0.1,
            far: 10.0,
        }
    }
}

/// Key names as accepted by [`KeyCode::from_name`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyBindings {
    pub forward: String,
    pub backward: String,
    pub left: String,
    pub right: String,
    pub quit: String,
}

impl Default for KeyBindings {
    fn default() -> Self {
        Self {
            forward: "E".to_string(),
            backward: "D".to_string(),
            left: "S".to_string(),
            right: "F".to_string(),
            quit: "Escape".to_string(),
        }
    }
}

impl KeyBindings {
    pub fn resolve(&self) -> Result<ResolvedBindings, ConfigError> {
        Ok(ResolvedBindings {
            forward: resolve_key("forward", &self.forward)?,
            backward: resolve_key("backward", &self.backward)?,
            left: resolve_key("left", &self.left)?,
            right: resolve_key("right", &self.right)?,
            quit: resolve_key("quit", &self.quit)?,
        })
    }
}

fn resolve_key(action: &'static str, name: &str) -> Result<KeyCode, ConfigError> {
    KeyCode::from_name(name).ok_or_else(|| ConfigError::UnknownKey {
        action,
        name: name.to_string(),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedBindings {
    pub forward: KeyCode,
    pub backward: KeyCode,
    pub left: KeyCode,
    pub right: KeyCode,
    pub quit: KeyCode,
}
