//! # RedLilium USD
//!
//! Scene extraction for scene-description stages: meshes, point instancers,
//! materials and the prim hierarchy, flattened into render-ready buffers.
//!
//! The composition engine is abstracted behind [`SceneOracle`]; [`MemoryStage`]
//! is the built-in implementation that reads `.usda` text and the binary
//! `.usdc` layer format.
//!
//! ```ignore
//! use redlilium_usd::Stage;
//!
//! let mut stage: Stage = Stage::open("scene.usda")?;
//! let mesh = stage.mesh(0)?;
//! let material = stage.mesh_material_path(0)?;
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod geometry;
pub mod memory;
pub mod oracle;
pub mod profiling;
pub mod stage;

pub use cache::{
    BuildStats, CacheDomain, CachedInstancer, CachedMaterial, CachedMesh, CachedPrimInfo,
    TextureSlot,
};
pub use config::StageConfig;
pub use error::{RecordKind, ResultCode, StageError};
pub use memory::MemoryStage;
pub use oracle::{SceneOracle, TimeCode};
pub use stage::{Stage, panic_message};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
