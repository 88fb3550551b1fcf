//! Layer file formats: detection, encoding and decoding.
//!
//! - `.usda` is always text.
//! - `.usdc` is always binary: the [`BINARY_MAGIC`] header followed by a
//!   bincode encoding of the [`Layer`].
//! - `.usd` may be either; reading sniffs the header, writing picks binary.

use std::path::Path;

use crate::memory::layer::Layer;
use crate::memory::usda;
use crate::oracle::OracleError;

/// Header of binary layers.
pub const BINARY_MAGIC: &[u8; 8] = b"RLUSDB\0\x01";

/// Supported layer encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Human-readable `.usda` text.
    Text,
    /// Compact bincode payload behind [`BINARY_MAGIC`].
    Binary,
}

impl Format {
    /// Format used when writing to `path`; `None` for unknown extensions.
    pub fn for_output(path: &Path) -> Option<Self> {
        match extension(path).as_deref() {
            Some("usda") => Some(Self::Text),
            Some("usdc" | "usd") => Some(Self::Binary),
            _ => None,
        }
    }

    /// Format of existing layer bytes read from `path`.
    pub fn detect(path: &Path, bytes: &[u8]) -> Self {
        match extension(path).as_deref() {
            Some("usda") => Self::Text,
            Some("usdc") => Self::Binary,
            _ if bytes.starts_with(BINARY_MAGIC) => Self::Binary,
            _ => Self::Text,
        }
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
}

/// Encodes a layer in the given format.
pub fn encode(layer: &Layer, format: Format) -> Result<Vec<u8>, OracleError> {
    match format {
        Format::Text => Ok(usda::write_layer(layer).into_bytes()),
        Format::Binary => {
            let payload =
                bincode::serialize(layer).map_err(|e| OracleError::Format(e.to_string()))?;
            let mut bytes = Vec::with_capacity(BINARY_MAGIC.len() + payload.len());
            bytes.extend_from_slice(BINARY_MAGIC);
            bytes.extend_from_slice(&payload);
            Ok(bytes)
        }
    }
}

/// Decodes layer bytes. `file` is used for error messages only.
pub fn decode(bytes: &[u8], format: Format, file: &str) -> Result<Layer, OracleError> {
    match format {
        Format::Text => {
            let text = std::str::from_utf8(bytes)
                .map_err(|e| OracleError::Format(format!("{file}: not UTF-8 text: {e}")))?;
            usda::parse_layer(text).map_err(|e| OracleError::Parse {
                file: file.to_string(),
                line: e.line,
                column: e.column,
                message: e.message,
            })
        }
        Format::Binary => {
            let payload = bytes.strip_prefix(BINARY_MAGIC.as_slice()).ok_or_else(|| {
                OracleError::Format(format!("{file}: missing binary layer header"))
            })?;
            bincode::deserialize(payload)
                .map_err(|e| OracleError::Format(format!("{file}: {e}")))
        }
    }
}
