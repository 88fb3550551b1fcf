//! Polygon topology to triangle index buffers.

use std::fmt;

/// Topology that cannot be triangulated safely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopologyError {
    /// A face would read past the end of the index array.
    OffsetOutOfBounds {
        face: usize,
        offset: usize,
        count: usize,
        available: usize,
    },
    /// A face reported a negative vertex count.
    NegativeCount { face: usize, count: i32 },
    /// A face referenced a negative vertex index.
    NegativeIndex { face: usize, index: i32 },
    /// A triangle index does not address a vertex.
    IndexOutOfRange { index: u32, vertex_count: usize },
}

impl fmt::Display for TopologyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OffsetOutOfBounds {
                face,
                offset,
                count,
                available,
            } => write!(
                f,
                "face {face} reads {count} indices at offset {offset}, only {available} available"
            ),
            Self::NegativeCount { face, count } => {
                write!(f, "face {face} has negative vertex count {count}")
            }
            Self::NegativeIndex { face, index } => {
                write!(f, "face {face} references negative vertex index {index}")
            }
            Self::IndexOutOfRange {
                index,
                vertex_count,
            } => write!(f, "index {index} out of range for {vertex_count} vertices"),
        }
    }
}

impl std::error::Error for TopologyError {}

/// Fan-triangulates polygon faces.
///
/// `face_vertex_counts` holds one entry per face; `face_vertex_indices` is the
/// face-major concatenation of every face's vertex indices. Faces with fewer
/// than three vertices emit nothing but still consume their indices. Each
/// remaining face emits `(f[0], f[i], f[i + 1])` for `i` in `1..count - 1`.
///
/// Concave and non-planar faces are fanned like any other; no attempt is made
/// to fix the resulting artifacts.
pub fn triangulate(
    face_vertex_counts: &[i32],
    face_vertex_indices: &[i32],
) -> Result<Vec<u32>, TopologyError> {
    // Sized from the indices actually present; counts are untrusted.
    let mut out = Vec::with_capacity(face_vertex_indices.len().saturating_sub(2) * 3);
    let mut offset = 0usize;

    for (face, &count) in face_vertex_counts.iter().enumerate() {
        if count < 0 {
            return Err(TopologyError::NegativeCount { face, count });
        }
        let count = count as usize;
        let end = offset
            .checked_add(count)
            .filter(|&end| end <= face_vertex_indices.len())
            .ok_or(TopologyError::OffsetOutOfBounds {
                face,
                offset,
                count,
                available: face_vertex_indices.len(),
            })?;

        if count >= 3 {
            let verts = &face_vertex_indices[offset..end];
            let to_u32 = |index: i32| {
                u32::try_from(index).map_err(|_| TopologyError::NegativeIndex { face, index })
            };
            let first = to_u32(verts[0])?;
            for pair in verts[1..].windows(2) {
                out.push(first);
                out.push(to_u32(pair[0])?);
                out.push(to_u32(pair[1])?);
            }
        }

        offset = end;
    }

    Ok(out)
}

/// Checks that every index addresses one of `vertex_count` vertices.
pub fn validate_index_range(indices: &[u32], vertex_count: usize) -> Result<(), TopologyError> {
    match indices.iter().find(|&&i| i as usize >= vertex_count) {
        Some(&index) => Err(TopologyError::IndexOutOfRange {
            index,
            vertex_count,
        }),
        None => Ok(()),
    }
}
