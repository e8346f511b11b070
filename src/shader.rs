use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;

use log::warn;
use naga::front::glsl;
use naga::valid::{Capabilities, ValidationFlags, Validator};
use naga::{AddressSpace, Module, ScalarKind, TypeInner, VectorSize};

use crate::error::PipelineError;

pub const DEFAULT_SHADER_DIR: &str = "./shaders";
pub const VERTEX_SHADER_FILE: &str = "vert.glsl";
pub const FRAGMENT_SHADER_FILE: &str = "frag.glsl";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl ShaderStage {
    fn to_naga(self) -> naga::ShaderStage {
        match self {
            Self::Vertex => naga::ShaderStage::Vertex,
            Self::Fragment => naga::ShaderStage::Fragment,
        }
    }
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vertex => f.write_str("vertex"),
            Self::Fragment => f.write_str("fragment"),
        }
    }
}

/// Raw text of a vertex/fragment shader pair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShaderSource {
    pub vertex: String,
    pub fragment: String,
}

impl ShaderSource {
    pub fn new(vertex: impl Into<String>, fragment: impl Into<String>) -> Self {
        Self {
            vertex: vertex.into(),
            fragment: fragment.into(),
        }
    }

    /// Reads `vert.glsl` and `frag.glsl` from `dir`.
    ///
    /// Unreadable files become empty sources; compilation reports them later.
    pub fn load<P: AsRef<Path>>(dir: P) -> Self {
        let dir = dir.as_ref();
        Self {
            vertex: read_or_empty(&dir.join(VERTEX_SHADER_FILE)),
            fragment: read_or_empty(&dir.join(FRAGMENT_SHADER_FILE)),
        }
    }

    pub fn stage(&self, stage: ShaderStage) -> &str {
        match stage {
            ShaderStage::Vertex => &self.vertex,
            ShaderStage::Fragment => &self.fragment,
        }
    }
}

fn read_or_empty(path: &Path) -> String {
    match fs::read_to_string(path) {
        Ok(source) => source,
        Err(err) => {
            warn!("unable to read shader {}: {err}", path.display());
            String::new()
        }
    }
}

/// Where a uniform's bytes live: the block binding plus a byte offset into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UniformLocation {
    pub group: u32,
    pub binding: u32,
    pub offset: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniformKind {
    Mat4,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniformInfo {
    pub location: UniformLocation,
    pub kind: UniformKind,
}

/// A uniform buffer binding and its byte size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniformBlock {
    pub group: u32,
    pub binding: u32,
    pub size: u32,
}

/// Every uniform reachable by name in a linked program.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UniformTable {
    uniforms: HashMap<String, UniformInfo>,
    blocks: Vec<UniformBlock>,
}

impl UniformTable {
    pub fn get(&self, name: &str) -> Option<&UniformInfo> {
        self.uniforms.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.uniforms.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.uniforms.keys().map(String::as_str)
    }

    pub fn blocks(&self) -> &[UniformBlock] {
        &self.blocks
    }

    pub fn block(&self, group: u32, binding: u32) -> Option<&UniformBlock> {
        self.blocks
            .iter()
            .find(|block| block.group == group && block.binding == binding)
    }

    pub fn len(&self) -> usize {
        self.uniforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.uniforms.is_empty()
    }

    fn insert_block(&mut self, block: UniformBlock) {
        match self
            .blocks
            .iter_mut()
            .find(|b| b.group == block.group && b.binding == block.binding)
        {
            Some(existing) => existing.size = existing.size.max(block.size),
            None => self.blocks.push(block),
        }
    }

    /// Both stages share one binding namespace, as in a linked program.
    fn merge(&mut self, other: UniformTable) {
        for block in other.blocks {
            self.insert_block(block);
        }
        self.uniforms.extend(other.uniforms);
    }
}

/// Validated stage modules plus their reflected uniforms.
#[derive(Debug)]
pub struct CompiledShaders {
    pub vertex: Module,
    pub fragment: Module,
    pub uniforms: UniformTable,
}

/// Compiles both stages and reflects their uniforms.
pub fn compile(source: &ShaderSource) -> Result<CompiledShaders, PipelineError> {
    let vertex = compile_stage(ShaderStage::Vertex, &source.vertex)?;
    let fragment = compile_stage(ShaderStage::Fragment, &source.fragment)?;

    let mut uniforms = reflect_uniforms(&vertex);
    uniforms.merge(reflect_uniforms(&fragment));

    Ok(CompiledShaders {
        vertex,
        fragment,
        uniforms,
    })
}

fn compile_stage(stage: ShaderStage, source: &str) -> Result<Module, PipelineError> {
    if source.trim().is_empty() {
        return Err(PipelineError::Compile {
            stage,
            message: "shader source is empty".to_string(),
        });
    }

    let mut frontend = glsl::Frontend::default();
    let module = frontend
        .parse(&glsl::Options::from(stage.to_naga()), source)
        .map_err(|errors| PipelineError::Compile {
            stage,
            message: errors.to_string(),
        })?;

    Validator::new(ValidationFlags::all(), Capabilities::empty())
        .validate(&module)
        .map_err(|err| PipelineError::Compile {
            stage,
            message: err.to_string(),
        })?;

    Ok(module)
}

/// Collects uniform-space globals: block members by member name, bare
/// uniforms by variable name.
pub fn reflect_uniforms(module: &Module) -> UniformTable {
    let mut table = UniformTable::default();

    for (_, variable) in module.global_variables.iter() {
        if variable.space != AddressSpace::Uniform {
            continue;
        }
        let Some(binding) = &variable.binding else {
            continue;
        };
        let ty = &module.types[variable.ty];
        table.insert_block(UniformBlock {
            group: binding.group,
            binding: binding.binding,
            size: ty.inner.size(module.to_ctx()),
        });

        let location = |offset| UniformLocation {
            group: binding.group,
            binding: binding.binding,
            offset,
        };

        match &ty.inner {
            TypeInner::Struct { members, .. } => {
                for member in members {
                    let Some(name) = &member.name else {
                        continue;
                    };
                    table.uniforms.insert(
                        name.clone(),
                        UniformInfo {
                            location: location(member.offset),
                            kind: uniform_kind(&module.types[member.ty].inner),
                        },
                    );
                }
            }
            inner => {
                if let Some(name) = &variable.name {
                    table.uniforms.insert(
                        name.clone(),
                        UniformInfo {
                            location: location(0),
                            kind: uniform_kind(inner),
                        },
                    );
                }
            }
        }
    }

    table
}

fn uniform_kind(inner: &TypeInner) -> UniformKind {
    match inner {
        TypeInner::Matrix {
            columns: VectorSize::Quad,
            rows: VectorSize::Quad,
            scalar,
        } if scalar.kind == ScalarKind::Float && scalar.width == 4 => UniformKind::Mat4,
        _ => UniformKind::Other,
    }
}
