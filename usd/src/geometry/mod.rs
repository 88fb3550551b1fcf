//! Pure geometry helpers used by the geometry cache.
//!
//! - [`triangulate`]: polygon faces to a triangle index buffer
//! - [`world_transform`]: oracle transform query to column-major floats

mod transform;
mod triangulate;

pub use transform::{IDENTITY_COLS, cols_to_matrix, matrix_to_cols, world_transform};
pub use triangulate::{TopologyError, triangulate, validate_index_range};
