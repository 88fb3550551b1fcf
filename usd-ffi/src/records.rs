//! `repr(C)` records filled by the accessor functions.
//!
//! Every pointer in a record borrows storage owned by the stage. It stays
//! valid until the stage is closed or its cache is cleared; callers that need
//! the data longer must copy it out before either call.

use std::ffi::{CStr, c_char};
use std::ptr;

use redlilium_usd::{CachedInstancer, CachedMaterial, CachedMesh, CachedPrimInfo, TextureSlot};

use crate::strings::{InstancerStrings, MaterialStringSet};

/// Null for empty buffers.
fn buffer<T>(items: &[T]) -> *const T {
    if items.is_empty() {
        ptr::null()
    } else {
        items.as_ptr()
    }
}

fn opt_str(s: Option<&std::ffi::CString>) -> *const c_char {
    s.map_or(ptr::null(), |s| s.as_ptr())
}

/// One triangulated mesh.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RlusdMesh {
    pub path: *const c_char,
    /// `vertex_count` xyz triples.
    pub vertices: *const f32,
    pub vertex_count: usize,
    /// `index_count` indices, three per triangle.
    pub indices: *const u32,
    pub index_count: usize,
    /// `normal_count` xyz triples; null when `normal_count` is 0.
    pub normals: *const f32,
    pub normal_count: usize,
    /// `uv_count` uv pairs; null when `uv_count` is 0.
    pub uvs: *const f32,
    pub uv_count: usize,
    /// Local-to-world, column-major.
    pub transform: [f32; 16],
}

impl RlusdMesh {
    pub(crate) fn new(mesh: &CachedMesh, path: &CStr) -> Self {
        Self {
            path: path.as_ptr(),
            vertices: buffer(&mesh.vertices),
            vertex_count: mesh.vertex_count(),
            indices: buffer(&mesh.indices),
            index_count: mesh.index_count(),
            normals: buffer(&mesh.normals),
            normal_count: mesh.normal_count(),
            uvs: buffer(&mesh.uvs),
            uv_count: mesh.uv_count(),
            transform: mesh.transform,
        }
    }
}

impl Default for RlusdMesh {
    fn default() -> Self {
        Self {
            path: ptr::null(),
            vertices: ptr::null(),
            vertex_count: 0,
            indices: ptr::null(),
            index_count: 0,
            normals: ptr::null(),
            normal_count: 0,
            uvs: ptr::null(),
            uv_count: 0,
            transform: [0.0; 16],
        }
    }
}

/// One point instancer.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RlusdInstancer {
    pub path: *const c_char,
    /// `prototype_count` prim paths; `proto_indices` address this array.
    pub prototype_paths: *const *const c_char,
    pub prototype_count: usize,
    /// `instance_count` column-major 4x4 matrices.
    pub transforms: *const f32,
    pub instance_count: usize,
    /// `instance_count` prototype selectors.
    pub proto_indices: *const i32,
}

impl RlusdInstancer {
    pub(crate) fn new(instancer: &CachedInstancer, strings: &InstancerStrings) -> Self {
        Self {
            path: strings.path.as_ptr(),
            prototype_paths: buffer(strings.prototype_ptrs()),
            prototype_count: strings.prototype_count(),
            transforms: buffer(&instancer.transforms),
            instance_count: instancer.instance_count(),
            proto_indices: buffer(&instancer.proto_indices),
        }
    }
}

impl Default for RlusdInstancer {
    fn default() -> Self {
        Self {
            path: ptr::null(),
            prototype_paths: ptr::null(),
            prototype_count: 0,
            transforms: ptr::null(),
            instance_count: 0,
            proto_indices: ptr::null(),
        }
    }
}

/// Physically-based material parameters. Texture paths are null when absent.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RlusdMaterial {
    pub path: *const c_char,
    pub diffuse_color: [f32; 3],
    pub metallic: f32,
    pub roughness: f32,
    pub specular: f32,
    pub opacity: f32,
    pub emissive_color: [f32; 3],
    pub diffuse_texture: *const c_char,
    pub roughness_texture: *const c_char,
    pub metallic_texture: *const c_char,
    pub normal_texture: *const c_char,
    pub emissive_texture: *const c_char,
    /// Non-zero when the surface is a MaterialX network.
    pub is_materialx: i32,
}

impl RlusdMaterial {
    pub(crate) fn new(material: &CachedMaterial, strings: &MaterialStringSet) -> Self {
        Self {
            path: strings.path.as_ptr(),
            diffuse_color: material.diffuse_color,
            metallic: material.metallic,
            roughness: material.roughness,
            specular: material.specular,
            opacity: material.opacity,
            emissive_color: material.emissive_color,
            diffuse_texture: opt_str(strings.texture(TextureSlot::Diffuse)),
            roughness_texture: opt_str(strings.texture(TextureSlot::Roughness)),
            metallic_texture: opt_str(strings.texture(TextureSlot::Metallic)),
            normal_texture: opt_str(strings.texture(TextureSlot::Normal)),
            emissive_texture: opt_str(strings.texture(TextureSlot::Emissive)),
            is_materialx: material.is_materialx.into(),
        }
    }
}

impl Default for RlusdMaterial {
    fn default() -> Self {
        Self {
            path: ptr::null(),
            diffuse_color: [0.0; 3],
            metallic: 0.0,
            roughness: 0.0,
            specular: 0.0,
            opacity: 0.0,
            emissive_color: [0.0; 3],
            diffuse_texture: ptr::null(),
            roughness_texture: ptr::null(),
            metallic_texture: ptr::null(),
            normal_texture: ptr::null(),
            emissive_texture: ptr::null(),
            is_materialx: 0,
        }
    }
}

/// Hierarchy record of one prim.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RlusdPrimInfo {
    pub path: *const c_char,
    /// Empty string for typeless prims.
    pub type_name: *const c_char,
    pub is_active: i32,
    pub has_children: i32,
    pub child_count: usize,
}

impl RlusdPrimInfo {
    pub(crate) fn new(prim: &CachedPrimInfo, path: &CStr, type_name: &CStr) -> Self {
        Self {
            path: path.as_ptr(),
            type_name: type_name.as_ptr(),
            is_active: prim.active.into(),
            has_children: prim.has_children().into(),
            child_count: prim.child_count(),
        }
    }
}

impl Default for RlusdPrimInfo {
    fn default() -> Self {
        Self {
            path: ptr::null(),
            type_name: ptr::null(),
            is_active: 0,
            has_children: 0,
            child_count: 0,
        }
    }
}
