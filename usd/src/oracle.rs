//! The composed-scene collaborator.
//!
//! The extraction pipeline never parses files or resolves composition arcs
//! itself. It asks a [`SceneOracle`] structural and attribute questions about
//! an already-composed scene and turns the answers into flat buffers.
//!
//! Prims are addressed by their absolute path string (`"/World/Mesh"`).
//! Attribute names are the schema property names (`"points"`,
//! `"primvars:st"`, `"inputs:diffuseColor"`); see [`tokens`].
//!
//! [`MemoryStage`](crate::memory::MemoryStage) is the reference implementation
//! shipped with this crate.

use std::fmt;
use std::path::Path;

use nalgebra::Matrix4;

/// Time at which an attribute is sampled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimeCode {
    /// The non-time-varying default value.
    Default,
    /// The first authored time sample.
    EarliestTime,
    /// A specific time; held interpolation from the sample at or before it.
    At(f64),
}

/// Schema families the pipeline branches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Schema {
    Mesh,
    PointInstancer,
    Material,
    Shader,
}

/// Upstream end of an attribute connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    /// Path of the prim that owns the source attribute.
    pub prim: String,
    /// Name of the source attribute (`"outputs:rgb"`).
    pub attribute: String,
}

impl Connection {
    /// Parses a connection target of the form `/Prim/Path.attribute`.
    pub fn parse(target: &str) -> Option<Self> {
        let dot = target.rfind('.')?;
        let (prim, attribute) = (&target[..dot], &target[dot + 1..]);
        if prim.is_empty() || attribute.is_empty() {
            return None;
        }
        Some(Self {
            prim: prim.to_owned(),
            attribute: attribute.to_owned(),
        })
    }
}

/// An asset-valued attribute.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AssetPath {
    /// The path exactly as authored.
    pub authored: String,
    /// The search-path expanded path; empty when resolution found nothing.
    pub resolved: String,
}

impl AssetPath {
    /// Resolved path when available, otherwise the authored one.
    pub fn best(&self) -> &str {
        if self.resolved.is_empty() {
            &self.authored
        } else {
            &self.resolved
        }
    }
}

/// Errors reported by a scene oracle.
#[derive(Debug)]
pub enum OracleError {
    /// The stage file does not exist.
    NotFound(String),
    /// Reading or writing a file failed.
    Io {
        path: String,
        source: std::io::Error,
    },
    /// A text layer could not be parsed.
    Parse {
        file: String,
        line: usize,
        column: usize,
        message: String,
    },
    /// A binary layer or serialized value was malformed.
    Format(String),
    /// A composition arc could not be resolved.
    Composition(String),
    /// The request is not supported by this oracle (e.g. unknown export extension).
    Unsupported(String),
}

impl fmt::Display for OracleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(path) => write!(f, "stage not found: {path}"),
            Self::Io { path, source } => write!(f, "IO error on {path}: {source}"),
            Self::Parse {
                file,
                line,
                column,
                message,
            } => write!(f, "{file}:{line}:{column}: {message}"),
            Self::Format(msg) => write!(f, "format error: {msg}"),
            Self::Composition(msg) => write!(f, "composition error: {msg}"),
            Self::Unsupported(msg) => write!(f, "unsupported: {msg}"),
        }
    }
}

impl std::error::Error for OracleError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl OracleError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound(path.display().to_string())
        } else {
            Self::Io {
                path: path.display().to_string(),
                source,
            }
        }
    }
}

/// Read-only query interface over a composed scene graph.
///
/// Implementations are expected to memoize hierarchical transform lookups so
/// that [`local_to_world`](Self::local_to_world) is cheap when called once per
/// prim during a traversal.
pub trait SceneOracle {
    /// Opens and composes the stage at `path`.
    ///
    /// Must return [`OracleError::NotFound`] when the file does not exist.
    fn open(path: &Path) -> Result<Self, OracleError>
    where
        Self: Sized;

    /// Serializes the stage to `path`; the format follows the extension.
    fn export(&self, path: &Path) -> Result<(), OracleError>;

    /// Paths of the direct children of the pseudo-root, in authored order.
    fn root_children(&self) -> Vec<String>;

    /// Paths of every prim in depth-first pre-order. The order is stable.
    fn traverse(&self) -> Vec<String>;

    /// Paths of the direct children of `prim`, in authored order.
    fn children(&self, prim: &str) -> Vec<String>;

    /// Schema type name (`"Mesh"`, `"Xform"`); empty for typeless prims.
    fn type_name(&self, prim: &str) -> String;

    fn is_active(&self, prim: &str) -> bool;

    /// Whether `prim` conforms to `schema`.
    fn is_a(&self, prim: &str, schema: Schema) -> bool;

    fn float3_array(&self, prim: &str, attribute: &str, time: TimeCode) -> Option<Vec<[f32; 3]>>;

    fn float2_array(&self, prim: &str, attribute: &str, time: TimeCode) -> Option<Vec<[f32; 2]>>;

    fn int_array(&self, prim: &str, attribute: &str, time: TimeCode) -> Option<Vec<i32>>;

    fn float(&self, prim: &str, attribute: &str, time: TimeCode) -> Option<f32>;

    fn float3(&self, prim: &str, attribute: &str, time: TimeCode) -> Option<[f32; 3]>;

    fn token(&self, prim: &str, attribute: &str) -> Option<String>;

    fn asset(&self, prim: &str, attribute: &str) -> Option<AssetPath>;

    /// Upstream connections of an attribute, in authored order.
    fn connections(&self, prim: &str, attribute: &str) -> Vec<Connection>;

    /// Relationship targets with relationship-to-relationship forwarding applied.
    fn forwarded_targets(&self, prim: &str, relationship: &str) -> Vec<String>;

    /// Composed local-to-world transform (column-vector convention).
    fn local_to_world(&self, prim: &str) -> Matrix4<f64>;

    /// Per-instance transforms of a point instancer at `time`.
    ///
    /// `None` when the computation cannot produce a result.
    fn compute_instance_transforms(&self, prim: &str, time: TimeCode) -> Option<Vec<Matrix4<f64>>>;

    /// Path of the material bound to `prim`, accounting for inherited bindings.
    fn compute_bound_material(&self, prim: &str) -> Option<String>;
}

/// Property and type-name tokens used by the extraction pipeline.
pub mod tokens {
    pub const POINTS: &str = "points";
    pub const NORMALS: &str = "normals";
    pub const FACE_VERTEX_COUNTS: &str = "faceVertexCounts";
    pub const FACE_VERTEX_INDICES: &str = "faceVertexIndices";
    pub const PRIMVARS_PREFIX: &str = "primvars:";

    pub const PROTOTYPES: &str = "prototypes";
    pub const PROTO_INDICES: &str = "protoIndices";
    pub const POSITIONS: &str = "positions";
    pub const ORIENTATIONS: &str = "orientations";
    pub const SCALES: &str = "scales";

    pub const MATERIAL_BINDING: &str = "material:binding";
    pub const SURFACE_OUTPUT: &str = "outputs:surface";
    pub const MTLX_SURFACE_OUTPUT: &str = "outputs:mtlx:surface";
    pub const INFO_ID: &str = "info:id";

    pub const PREVIEW_SURFACE: &str = "UsdPreviewSurface";
    pub const UV_TEXTURE: &str = "UsdUVTexture";
    pub const MATERIALX_NODEDEF_PREFIX: &str = "ND_";

    pub const INPUT_DIFFUSE_COLOR: &str = "inputs:diffuseColor";
    pub const INPUT_METALLIC: &str = "inputs:metallic";
    pub const INPUT_ROUGHNESS: &str = "inputs:roughness";
    pub const INPUT_SPECULAR_COLOR: &str = "inputs:specularColor";
    pub const INPUT_OPACITY: &str = "inputs:opacity";
    pub const INPUT_EMISSIVE_COLOR: &str = "inputs:emissiveColor";
    pub const INPUT_NORMAL: &str = "inputs:normal";
    pub const INPUT_FILE: &str = "inputs:file";
}
