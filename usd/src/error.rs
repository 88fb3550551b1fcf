//! Error types and boundary result codes.
//!
//! [`StageError`] is what the Rust façade returns. [`ResultCode`] is its flat,
//! `repr(C)` projection used at the C boundary, where every failure must be
//! reported as a code rather than a native fault.

use std::fmt;

use crate::cache::CacheDomain;
use crate::geometry::TopologyError;
use crate::oracle::OracleError;

/// Errors returned by [`Stage`](crate::Stage) operations.
#[derive(Debug)]
pub enum StageError {
    /// A required handle or out-pointer argument was missing.
    NullArgument,
    /// The stage file does not exist or could not be read.
    FileNotFound(String),
    /// The handle does not refer to an open stage.
    InvalidHandle,
    /// An index was outside the cached range for a domain.
    InvalidIndex {
        /// Which record sequence was addressed.
        domain: RecordKind,
        /// Requested index.
        index: usize,
        /// Number of records available.
        count: usize,
    },
    /// No cached record has the requested path.
    NotFound(String),
    /// Allocation failure. Reserved; not raised by the current pipeline.
    OutOfMemory,
    /// Face topology was inconsistent with its counts or vertex buffer.
    MalformedTopology(TopologyError),
    /// Any other failure, including oracle failures and caught panics.
    Unknown(String),
}

/// The record sequence an index addresses, used for error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Mesh,
    Instancer,
    Material,
    MeshBinding,
    Prim,
    RootPrim,
    ChildPrim,
}

impl RecordKind {
    /// The cache domain that owns this record sequence.
    pub fn domain(self) -> CacheDomain {
        match self {
            Self::Mesh | Self::Instancer => CacheDomain::Geometry,
            Self::Material | Self::MeshBinding => CacheDomain::Materials,
            Self::Prim | Self::RootPrim | Self::ChildPrim => CacheDomain::Prims,
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Mesh => "mesh",
            Self::Instancer => "instancer",
            Self::Material => "material",
            Self::MeshBinding => "mesh binding",
            Self::Prim => "prim",
            Self::RootPrim => "root prim",
            Self::ChildPrim => "child prim",
        };
        f.write_str(name)
    }
}

impl StageError {
    /// The boundary result code for this error.
    pub fn code(&self) -> ResultCode {
        match self {
            Self::NullArgument => ResultCode::NullArgument,
            Self::FileNotFound(_) => ResultCode::FileNotFound,
            Self::InvalidHandle => ResultCode::InvalidHandle,
            Self::InvalidIndex { .. } | Self::NotFound(_) => ResultCode::InvalidIndex,
            Self::OutOfMemory => ResultCode::OutOfMemory,
            Self::MalformedTopology(_) | Self::Unknown(_) => ResultCode::Unknown,
        }
    }

    pub(crate) fn invalid_index(domain: RecordKind, index: usize, count: usize) -> Self {
        Self::InvalidIndex {
            domain,
            index,
            count,
        }
    }
}

impl fmt::Display for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NullArgument => write!(f, "null pointer argument"),
            Self::FileNotFound(path) => write!(f, "stage file not found: {path}"),
            Self::InvalidHandle => write!(f, "invalid stage handle"),
            Self::InvalidIndex {
                domain,
                index,
                count,
            } => write!(f, "{domain} index {index} out of range (count {count})"),
            Self::NotFound(path) => write!(f, "no cached record at path '{path}'"),
            Self::OutOfMemory => write!(f, "out of memory"),
            Self::MalformedTopology(e) => write!(f, "malformed topology: {e}"),
            Self::Unknown(msg) => write!(f, "stage error: {msg}"),
        }
    }
}

impl std::error::Error for StageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::MalformedTopology(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TopologyError> for StageError {
    fn from(e: TopologyError) -> Self {
        Self::MalformedTopology(e)
    }
}

impl From<OracleError> for StageError {
    fn from(e: OracleError) -> Self {
        match e {
            OracleError::NotFound(path) => Self::FileNotFound(path),
            other => Self::Unknown(other.to_string()),
        }
    }
}

/// Result codes reported across the C boundary.
///
/// Values are stable and part of the ABI.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultCode {
    Success = 0,
    NullArgument = 1,
    FileNotFound = 2,
    InvalidHandle = 3,
    /// Index out of range or path not found.
    InvalidIndex = 4,
    OutOfMemory = 5,
    Unknown = 99,
}

impl ResultCode {
    /// Fixed human-readable message for this code.
    pub const fn message(self) -> &'static str {
        match self {
            Self::Success => "Success",
            Self::NullArgument => "Null pointer argument",
            Self::FileNotFound => "File not found",
            Self::InvalidHandle => "Invalid stage handle",
            Self::InvalidIndex => "Invalid prim, path or index",
            Self::OutOfMemory => "Out of memory",
            Self::Unknown => "Unknown error",
        }
    }

    /// NUL-terminated form of [`message`](Self::message) for C callers.
    pub const fn message_cstr(self) -> &'static std::ffi::CStr {
        match self {
            Self::Success => c"Success",
            Self::NullArgument => c"Null pointer argument",
            Self::FileNotFound => c"File not found",
            Self::InvalidHandle => c"Invalid stage handle",
            Self::InvalidIndex => c"Invalid prim, path or index",
            Self::OutOfMemory => c"Out of memory",
            Self::Unknown => c"Unknown error",
        }
    }

    /// Maps a raw code back to a `ResultCode`; anything unrecognised is `Unknown`.
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            0 => Self::Success,
            1 => Self::NullArgument,
            2 => Self::FileNotFound,
            3 => Self::InvalidHandle,
            4 => Self::InvalidIndex,
            5 => Self::OutOfMemory,
            _ => Self::Unknown,
        }
    }
}

impl<T> From<&Result<T, StageError>> for ResultCode {
    fn from(result: &Result<T, StageError>) -> Self {
        match result {
            Ok(_) => Self::Success,
            Err(e) => e.code(),
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}
