//! Material cache and mesh-to-material bindings.
//!
//! Only the canonical `UsdPreviewSurface` network is understood. Texture
//! links are followed a single hop: the first connection of an input, and
//! only when it lands on a `UsdUVTexture` shader. Layered or procedural
//! networks therefore report no texture for the affected slot.

use std::collections::HashMap;

use crate::config::StageConfig;
use crate::error::{RecordKind, StageError};
use crate::oracle::{SceneOracle, Schema, TimeCode, tokens};

use super::GeometryCache;

/// Texture-capable inputs of a surface shader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureSlot {
    Diffuse,
    Roughness,
    Metallic,
    Normal,
    Emissive,
}

impl TextureSlot {
    pub const ALL: [TextureSlot; 5] = [
        Self::Diffuse,
        Self::Roughness,
        Self::Metallic,
        Self::Normal,
        Self::Emissive,
    ];

    /// The shader input this slot reads.
    pub fn input(self) -> &'static str {
        match self {
            Self::Diffuse => tokens::INPUT_DIFFUSE_COLOR,
            Self::Roughness => tokens::INPUT_ROUGHNESS,
            Self::Metallic => tokens::INPUT_METALLIC,
            Self::Normal => tokens::INPUT_NORMAL,
            Self::Emissive => tokens::INPUT_EMISSIVE_COLOR,
        }
    }
}

/// Flattened physically-based material parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedMaterial {
    pub path: String,
    pub diffuse_color: [f32; 3],
    pub metallic: f32,
    pub roughness: f32,
    /// Mean of the authored specular color.
    pub specular: f32,
    pub opacity: f32,
    pub emissive_color: [f32; 3],
    pub diffuse_texture: Option<String>,
    pub roughness_texture: Option<String>,
    pub metallic_texture: Option<String>,
    pub normal_texture: Option<String>,
    pub emissive_texture: Option<String>,
    /// The surface is a MaterialX node graph. Parameters stay at defaults.
    pub is_materialx: bool,
}

impl CachedMaterial {
    /// The all-defaults record.
    pub fn with_defaults(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            diffuse_color: [0.5, 0.5, 0.5],
            metallic: 0.0,
            roughness: 0.5,
            specular: 0.5,
            opacity: 1.0,
            emissive_color: [0.0, 0.0, 0.0],
            diffuse_texture: None,
            roughness_texture: None,
            metallic_texture: None,
            normal_texture: None,
            emissive_texture: None,
            is_materialx: false,
        }
    }

    pub fn texture(&self, slot: TextureSlot) -> Option<&str> {
        match slot {
            TextureSlot::Diffuse => self.diffuse_texture.as_deref(),
            TextureSlot::Roughness => self.roughness_texture.as_deref(),
            TextureSlot::Metallic => self.metallic_texture.as_deref(),
            TextureSlot::Normal => self.normal_texture.as_deref(),
            TextureSlot::Emissive => self.emissive_texture.as_deref(),
        }
    }

    fn texture_mut(&mut self, slot: TextureSlot) -> &mut Option<String> {
        match slot {
            TextureSlot::Diffuse => &mut self.diffuse_texture,
            TextureSlot::Roughness => &mut self.roughness_texture,
            TextureSlot::Metallic => &mut self.metallic_texture,
            TextureSlot::Normal => &mut self.normal_texture,
            TextureSlot::Emissive => &mut self.emissive_texture,
        }
    }
}

/// Texture file feeding `input` of `shader`, if any.
///
/// Prefers the resolved asset path and falls back to the authored one.
pub fn resolve_texture_link<O: SceneOracle + ?Sized>(
    oracle: &O,
    shader: &str,
    input: &str,
) -> Option<String> {
    let source = oracle.connections(shader, input).into_iter().next()?;
    let is_texture = oracle.is_a(&source.prim, Schema::Shader)
        && oracle.token(&source.prim, tokens::INFO_ID).as_deref() == Some(tokens::UV_TEXTURE);
    if !is_texture {
        return None;
    }
    oracle
        .asset(&source.prim, tokens::INPUT_FILE)
        .map(|asset| asset.best().to_string())
        .filter(|path| !path.is_empty())
}

/// Materials in traversal order plus one binding per cached mesh.
#[derive(Debug, Default)]
pub struct MaterialCache {
    materials: Vec<CachedMaterial>,
    index: Option<HashMap<String, usize>>,
    bindings: Vec<String>,
    geometry_generation: u64,
}

impl MaterialCache {
    /// Extracts every material, then resolves the binding of each mesh in
    /// `geometry` by position.
    pub fn build<O: SceneOracle + ?Sized>(
        oracle: &O,
        geometry: &GeometryCache,
        geometry_generation: u64,
        config: &StageConfig,
    ) -> Self {
        crate::profiling::profile_function!();

        let materials: Vec<CachedMaterial> = {
            crate::profiling::profile_scope!("materials");
            oracle
                .traverse()
                .into_iter()
                .filter(|prim| oracle.is_a(prim, Schema::Material))
                .map(|prim| read_material(oracle, prim))
                .collect()
        };

        let bindings: Vec<String> = {
            crate::profiling::profile_scope!("bindings");
            geometry
                .meshes()
                .iter()
                .map(|mesh| oracle.compute_bound_material(&mesh.path).unwrap_or_default())
                .collect()
        };

        let index = config.path_index.then(|| {
            materials
                .iter()
                .enumerate()
                .map(|(i, material)| (material.path.clone(), i))
                .collect()
        });

        crate::profiling::profile_records!("usd materials", materials.len());
        Self {
            materials,
            index,
            bindings,
            geometry_generation,
        }
    }

    pub fn material_count(&self) -> usize {
        self.materials.len()
    }

    pub fn materials(&self) -> &[CachedMaterial] {
        &self.materials
    }

    pub fn material(&self, index: usize) -> Result<&CachedMaterial, StageError> {
        self.materials.get(index).ok_or_else(|| {
            StageError::invalid_index(RecordKind::Material, index, self.materials.len())
        })
    }

    pub fn material_index_of(&self, path: &str) -> Option<usize> {
        match &self.index {
            Some(index) => index.get(path).copied(),
            None => self.materials.iter().position(|m| m.path == path),
        }
    }

    pub fn material_by_path(&self, path: &str) -> Result<&CachedMaterial, StageError> {
        self.material_index_of(path)
            .map(|i| &self.materials[i])
            .ok_or_else(|| StageError::NotFound(path.to_string()))
    }

    /// Bound material paths, parallel to the mesh sequence; `""` when unbound.
    pub fn bindings(&self) -> &[String] {
        &self.bindings
    }

    pub fn mesh_material_path(&self, mesh_index: usize) -> Result<&str, StageError> {
        self.bindings
            .get(mesh_index)
            .map(String::as_str)
            .ok_or_else(|| {
                StageError::invalid_index(RecordKind::MeshBinding, mesh_index, self.bindings.len())
            })
    }

    /// Generation of the geometry cache the bindings were resolved against.
    pub fn geometry_generation(&self) -> u64 {
        self.geometry_generation
    }
}

fn read_material<O: SceneOracle + ?Sized>(oracle: &O, path: String) -> CachedMaterial {
    let mut material = CachedMaterial::with_defaults(path);

    let surface = oracle
        .connections(&material.path, tokens::SURFACE_OUTPUT)
        .into_iter()
        .next();
    let Some(surface) = surface else {
        material.is_materialx = oracle
            .connections(&material.path, tokens::MTLX_SURFACE_OUTPUT)
            .first()
            .is_some_and(|mtlx| is_materialx_shader(oracle, &mtlx.prim));
        return material;
    };

    let shader = surface.prim;
    let id = oracle.token(&shader, tokens::INFO_ID).unwrap_or_default();
    if !oracle.is_a(&shader, Schema::Shader) || id != tokens::PREVIEW_SURFACE {
        material.is_materialx = is_materialx_shader(oracle, &shader);
        log::debug!(
            "Material {}: surface shader '{id}' is not {}, using defaults",
            material.path,
            tokens::PREVIEW_SURFACE
        );
        return material;
    }

    let time = TimeCode::Default;
    if let Some(color) = oracle.float3(&shader, tokens::INPUT_DIFFUSE_COLOR, time) {
        material.diffuse_color = color;
    }
    if let Some(value) = oracle.float(&shader, tokens::INPUT_METALLIC, time) {
        material.metallic = value;
    }
    if let Some(value) = oracle.float(&shader, tokens::INPUT_ROUGHNESS, time) {
        material.roughness = value;
    }
    if let Some([r, g, b]) = oracle.float3(&shader, tokens::INPUT_SPECULAR_COLOR, time) {
        material.specular = (r + g + b) / 3.0;
    }
    if let Some(value) = oracle.float(&shader, tokens::INPUT_OPACITY, time) {
        material.opacity = value;
    }
    if let Some(color) = oracle.float3(&shader, tokens::INPUT_EMISSIVE_COLOR, time) {
        material.emissive_color = color;
    }

    for slot in TextureSlot::ALL {
        *material.texture_mut(slot) = resolve_texture_link(oracle, &shader, slot.input());
    }

    material
}

fn is_materialx_shader<O: SceneOracle + ?Sized>(oracle: &O, shader: &str) -> bool {
    oracle
        .token(shader, tokens::INFO_ID)
        .is_some_and(|id| id.starts_with(tokens::MATERIALX_NODEDEF_PREFIX))
}
