//! World-transform resolution and matrix serialization.

use nalgebra::Matrix4;

use crate::oracle::SceneOracle;

/// Identity in the serialized column-major layout.
pub const IDENTITY_COLS: [f32; 16] = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 0.0, 0.0, 1.0,
];

/// Serializes a double-precision matrix to 16 column-major floats.
///
/// Translation lands in elements 12, 13 and 14. Values are narrowed as-is;
/// NaN and degenerate matrices pass through unchanged.
pub fn matrix_to_cols(m: &Matrix4<f64>) -> [f32; 16] {
    let mut out = [0.0f32; 16];
    for (dst, src) in out.iter_mut().zip(m.as_slice()) {
        *dst = *src as f32;
    }
    out
}

/// Inverse of [`matrix_to_cols`], widening back to `f64`.
pub fn cols_to_matrix(cols: &[f32; 16]) -> Matrix4<f64> {
    Matrix4::from_iterator(cols.iter().map(|&v| v as f64))
}

/// Local-to-world transform of `prim`, serialized column-major.
pub fn world_transform<O: SceneOracle + ?Sized>(oracle: &O, prim: &str) -> [f32; 16] {
    matrix_to_cols(&oracle.local_to_world(prim))
}
