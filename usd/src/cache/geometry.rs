//! Geometry and point-instancer cache.

use std::collections::HashMap;

use crate::config::StageConfig;
use crate::error::{RecordKind, StageError};
use crate::geometry::{matrix_to_cols, triangulate, validate_index_range, world_transform};
use crate::oracle::{SceneOracle, Schema, TimeCode, tokens};

/// Flattened, triangulated mesh.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CachedMesh {
    pub path: String,
    /// Positions, three floats per vertex.
    pub vertices: Vec<f32>,
    /// Triangle list, three indices per triangle. Every index addresses a vertex.
    pub indices: Vec<u32>,
    /// Either empty or one normal (three floats) per vertex.
    pub normals: Vec<f32>,
    /// Texture coordinates, two floats each. Empty when the mesh has none.
    pub uvs: Vec<f32>,
    /// Local-to-world transform, column-major.
    pub transform: [f32; 16],
}

impl CachedMesh {
    pub fn vertex_count(&self) -> usize {
        self.vertices.len() / 3
    }

    pub fn index_count(&self) -> usize {
        self.indices.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn normal_count(&self) -> usize {
        self.normals.len() / 3
    }

    pub fn uv_count(&self) -> usize {
        self.uvs.len() / 2
    }

    /// Positions viewed as `[x, y, z]` triples without copying.
    pub fn positions(&self) -> &[[f32; 3]] {
        bytemuck::cast_slice(&self.vertices)
    }

    /// Indices viewed as triangles without copying.
    pub fn triangles(&self) -> &[[u32; 3]] {
        bytemuck::cast_slice(&self.indices)
    }
}

/// Flattened point instancer.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CachedInstancer {
    pub path: String,
    /// Prototype prim paths; `proto_indices` addresses this list. May repeat.
    pub prototype_paths: Vec<String>,
    /// Per-instance world transforms, sixteen column-major floats each.
    pub transforms: Vec<f32>,
    /// Per-instance prototype selector, parallel to `transforms`.
    pub proto_indices: Vec<i32>,
}

impl CachedInstancer {
    pub fn instance_count(&self) -> usize {
        self.proto_indices.len()
    }

    pub fn transform_count(&self) -> usize {
        self.transforms.len() / 16
    }

    /// Transform of instance `index` as a column-major matrix.
    pub fn instance_transform(&self, index: usize) -> Option<&[f32; 16]> {
        let matrices: &[[f32; 16]] = bytemuck::cast_slice(&self.transforms);
        matrices.get(index)
    }
}

/// Meshes and instancers of a stage in traversal order.
#[derive(Debug, Default)]
pub struct GeometryCache {
    meshes: Vec<CachedMesh>,
    instancers: Vec<CachedInstancer>,
    mesh_index: Option<HashMap<String, usize>>,
}

impl GeometryCache {
    /// Runs one traversal and extracts every mesh and point instancer.
    ///
    /// Never fails. Missing attributes produce empty buffers; inconsistent
    /// topology keeps the mesh with no triangles so the index space is
    /// unaffected.
    pub fn build<O: SceneOracle + ?Sized>(oracle: &O, config: &StageConfig) -> Self {
        crate::profiling::profile_function!();

        let mut meshes = Vec::new();
        let mut instancers = Vec::new();

        for prim in oracle.traverse() {
            if oracle.is_a(&prim, Schema::Mesh) {
                crate::profiling::profile_scope!("mesh");
                meshes.push(read_mesh(oracle, prim, config));
            } else if oracle.is_a(&prim, Schema::PointInstancer) {
                crate::profiling::profile_scope!("instancer");
                instancers.push(read_instancer(oracle, prim));
            }
        }

        let mesh_index = config.path_index.then(|| {
            meshes
                .iter()
                .enumerate()
                .map(|(i, mesh)| (mesh.path.clone(), i))
                .collect()
        });

        crate::profiling::profile_records!("usd meshes", meshes.len());
        crate::profiling::profile_records!("usd instancers", instancers.len());
        Self {
            meshes,
            instancers,
            mesh_index,
        }
    }

    pub fn mesh_count(&self) -> usize {
        self.meshes.len()
    }

    pub fn instancer_count(&self) -> usize {
        self.instancers.len()
    }

    pub fn meshes(&self) -> &[CachedMesh] {
        &self.meshes
    }

    pub fn instancers(&self) -> &[CachedInstancer] {
        &self.instancers
    }

    pub fn mesh(&self, index: usize) -> Result<&CachedMesh, StageError> {
        self.meshes
            .get(index)
            .ok_or_else(|| StageError::invalid_index(RecordKind::Mesh, index, self.meshes.len()))
    }

    pub fn instancer(&self, index: usize) -> Result<&CachedInstancer, StageError> {
        self.instancers.get(index).ok_or_else(|| {
            StageError::invalid_index(RecordKind::Instancer, index, self.instancers.len())
        })
    }

    /// Position of the mesh at `path` in the mesh sequence.
    pub fn mesh_index_of(&self, path: &str) -> Option<usize> {
        match &self.mesh_index {
            Some(index) => index.get(path).copied(),
            None => self.meshes.iter().position(|m| m.path == path),
        }
    }

    pub fn mesh_by_path(&self, path: &str) -> Result<&CachedMesh, StageError> {
        self.mesh_index_of(path)
            .map(|i| &self.meshes[i])
            .ok_or_else(|| StageError::NotFound(path.to_string()))
    }
}

fn read_mesh<O: SceneOracle + ?Sized>(oracle: &O, path: String, config: &StageConfig) -> CachedMesh {
    // Animated meshes are captured at their first authored sample.
    let time = TimeCode::EarliestTime;

    let points = oracle
        .float3_array(&path, tokens::POINTS, time)
        .unwrap_or_default();
    let counts = oracle
        .int_array(&path, tokens::FACE_VERTEX_COUNTS, time)
        .unwrap_or_default();
    let face_indices = oracle
        .int_array(&path, tokens::FACE_VERTEX_INDICES, time)
        .unwrap_or_default();

    let indices = match triangulate(&counts, &face_indices)
        .and_then(|tris| validate_index_range(&tris, points.len()).map(|()| tris))
    {
        Ok(indices) => indices,
        Err(e) => {
            log::warn!("Mesh {path}: {}, keeping it without triangles", StageError::from(e));
            Vec::new()
        }
    };

    let normals = match oracle.float3_array(&path, tokens::NORMALS, time) {
        Some(normals) if normals.len() == points.len() => flatten(&normals),
        Some(normals) => {
            log::debug!(
                "Mesh {path}: ignoring {} normals for {} vertices",
                normals.len(),
                points.len()
            );
            Vec::new()
        }
        None => Vec::new(),
    };

    let uvs = config
        .uv_primvars
        .iter()
        .find_map(|name| {
            oracle.float2_array(&path, &format!("{}{name}", tokens::PRIMVARS_PREFIX), time)
        })
        .map(|uvs| flatten(&uvs))
        .unwrap_or_default();

    let transform = world_transform(oracle, &path);

    CachedMesh {
        vertices: flatten(&points),
        indices,
        normals,
        uvs,
        transform,
        path,
    }
}

fn read_instancer<O: SceneOracle + ?Sized>(oracle: &O, path: String) -> CachedInstancer {
    let prototype_paths = oracle.forwarded_targets(&path, tokens::PROTOTYPES);
    let proto_indices = oracle
        .int_array(&path, tokens::PROTO_INDICES, TimeCode::Default)
        .unwrap_or_default();

    // Instance transforms use the default time, unlike mesh points.
    let Some(matrices) = oracle.compute_instance_transforms(&path, TimeCode::Default) else {
        log::debug!("Instancer {path}: no instance transforms, treating as empty");
        return CachedInstancer {
            path,
            prototype_paths,
            ..CachedInstancer::default()
        };
    };

    let valid_selectors = proto_indices
        .iter()
        .all(|&i| usize::try_from(i).is_ok_and(|i| i < prototype_paths.len()));
    if matrices.len() != proto_indices.len() || !valid_selectors {
        log::warn!(
            "Instancer {path}: {} transforms for {} prototype indices over {} prototypes, treating as empty",
            matrices.len(),
            proto_indices.len(),
            prototype_paths.len()
        );
        return CachedInstancer {
            path,
            prototype_paths,
            ..CachedInstancer::default()
        };
    }

    let transforms = matrices.iter().flat_map(matrix_to_cols).collect();
    CachedInstancer {
        path,
        prototype_paths,
        transforms,
        proto_indices,
    }
}

fn flatten<const N: usize>(groups: &[[f32; N]]) -> Vec<f32> {
    groups.iter().flatten().copied().collect()
}
