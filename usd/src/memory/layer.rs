//! Layer data model shared by the text and binary formats.
//!
//! A [`Layer`] is a tree of [`PrimSpec`]s exactly as authored in one file,
//! before references are resolved. Everything here is serde-derived so the
//! binary format is a direct encoding of these types.

use serde::{Deserialize, Serialize};

/// Deepest prim or value nesting accepted when reading and composing layers.
pub const MAX_NESTING_DEPTH: usize = 256;

/// A scene-description value.
///
/// Numbers keep only the int/float distinction; the declared type name of
/// the owning attribute decides how they are interpreted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// `None`: an explicitly blocked value.
    Blocked,
    Bool(bool),
    Int(i64),
    Double(f64),
    /// Quoted string or token.
    String(String),
    /// `@path@`
    Asset(String),
    /// `</Path>`
    Path(String),
    /// `(a, b, ...)`: vectors, quaternions, matrix rows.
    Tuple(Vec<Value>),
    /// `[a, b, ...]`
    Array(Vec<Value>),
    /// `{ type name = value ... }`
    Dictionary(Vec<DictEntry>),
}

/// One typed entry of a dictionary value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DictEntry {
    pub type_name: String,
    pub name: String,
    pub value: Value,
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Self::Int(v) => Some(v as f64),
            Self::Double(v) => Some(v),
            Self::Bool(v) => Some(if v { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Self::Int(v) => Some(v),
            Self::Double(v) if v.fract() == 0.0 => Some(v as i64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Self::Bool(v) => Some(v),
            Self::Int(v) => Some(v != 0),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) | Self::Asset(s) | Self::Path(s) => Some(s),
            _ => None,
        }
    }

    /// A numeric tuple of exactly `N` components.
    pub fn as_tuple<const N: usize>(&self) -> Option<[f64; N]> {
        let Self::Tuple(items) = self else {
            return None;
        };
        if items.len() != N {
            return None;
        }
        let mut out = [0.0; N];
        for (dst, item) in out.iter_mut().zip(items) {
            *dst = item.as_f64()?;
        }
        Some(out)
    }

    /// Four rows of four numbers, as authored.
    pub fn as_matrix_rows(&self) -> Option<[[f64; 4]; 4]> {
        let Self::Tuple(rows) = self else {
            return None;
        };
        if rows.len() != 4 {
            return None;
        }
        let mut out = [[0.0; 4]; 4];
        for (dst, row) in out.iter_mut().zip(rows) {
            *dst = row.as_tuple::<4>()?;
        }
        Some(out)
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }
}

/// How a prim spec contributes to the composed prim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Specifier {
    Def,
    Over,
    Class,
}

impl Specifier {
    pub fn keyword(self) -> &'static str {
        match self {
            Self::Def => "def",
            Self::Over => "over",
            Self::Class => "class",
        }
    }
}

/// A reference arc: `@asset@</Prim>`. An empty asset refers to this layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub asset: String,
    pub prim_path: Option<String>,
}

/// One authored time sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSample {
    pub time: f64,
    pub value: Value,
}

/// An attribute as authored in one layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeSpec {
    pub name: String,
    /// Declared value type, e.g. `point3f[]`, `token`, `matrix4d`.
    pub type_name: String,
    pub uniform: bool,
    pub custom: bool,
    pub default: Option<Value>,
    /// Sorted by time.
    pub time_samples: Vec<TimeSample>,
    /// Connection source paths (`/Prim.attribute`).
    pub connections: Vec<String>,
    /// Attribute metadata other than the value itself, e.g. `interpolation`.
    pub metadata: Vec<(String, Value)>,
}

impl AttributeSpec {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            uniform: false,
            custom: false,
            default: None,
            time_samples: Vec::new(),
            connections: Vec::new(),
            metadata: Vec::new(),
        }
    }

    /// Inserts a sample keeping the list ordered; a repeated time replaces.
    pub fn set_sample(&mut self, time: f64, value: Value) {
        match self
            .time_samples
            .binary_search_by(|s| s.time.total_cmp(&time))
        {
            Ok(i) => self.time_samples[i].value = value,
            Err(i) => self.time_samples.insert(i, TimeSample { time, value }),
        }
    }

    /// Layers `other`'s authored fields over this one.
    pub fn merge_stronger(&mut self, other: &AttributeSpec) {
        if !other.type_name.is_empty() {
            self.type_name.clone_from(&other.type_name);
        }
        self.uniform |= other.uniform;
        self.custom |= other.custom;
        if other.default.is_some() {
            self.default.clone_from(&other.default);
        }
        if !other.time_samples.is_empty() {
            self.time_samples.clone_from(&other.time_samples);
        }
        if !other.connections.is_empty() {
            self.connections.clone_from(&other.connections);
        }
        merge_metadata(&mut self.metadata, &other.metadata);
    }
}

/// A relationship as authored in one layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipSpec {
    pub name: String,
    pub uniform: bool,
    pub custom: bool,
    /// Target paths; prims (`/A`) or properties (`/A.rel`).
    pub targets: Vec<String>,
}

/// A prim as authored in one layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimSpec {
    pub specifier: Specifier,
    /// Empty for typeless prims.
    pub type_name: String,
    pub name: String,
    pub active: Option<bool>,
    pub references: Vec<Reference>,
    /// Prim metadata other than `active` and `references`, e.g. `kind`.
    pub metadata: Vec<(String, Value)>,
    pub attributes: Vec<AttributeSpec>,
    pub relationships: Vec<RelationshipSpec>,
    pub children: Vec<PrimSpec>,
}

impl PrimSpec {
    pub fn new(specifier: Specifier, type_name: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            specifier,
            type_name: type_name.into(),
            name: name.into(),
            active: None,
            references: Vec::new(),
            metadata: Vec::new(),
            attributes: Vec::new(),
            relationships: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeSpec> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn child(&self, name: &str) -> Option<&PrimSpec> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Merges an attribute statement into this spec. Value, samples and
    /// connections of one attribute may be authored in separate statements.
    pub fn add_attribute(&mut self, attribute: AttributeSpec) {
        match self.attributes.iter_mut().find(|a| a.name == attribute.name) {
            Some(existing) => existing.merge_stronger(&attribute),
            None => self.attributes.push(attribute),
        }
    }

    pub fn add_relationship(&mut self, relationship: RelationshipSpec) {
        match self
            .relationships
            .iter_mut()
            .find(|r| r.name == relationship.name)
        {
            Some(existing) => existing.targets.extend(relationship.targets),
            None => self.relationships.push(relationship),
        }
    }
}

/// One authored file.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Layer {
    /// Layer metadata, e.g. `defaultPrim`, `upAxis`, `doc`.
    pub metadata: Vec<(String, Value)>,
    pub root_prims: Vec<PrimSpec>,
}

impl Layer {
    pub fn metadata(&self, key: &str) -> Option<&Value> {
        self.metadata.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn default_prim(&self) -> Option<&str> {
        self.metadata("defaultPrim").and_then(Value::as_str)
    }

    /// Finds a prim spec by absolute path (`/A/B`).
    pub fn prim_at(&self, path: &str) -> Option<&PrimSpec> {
        let mut names = path.strip_prefix('/')?.split('/');
        let first = names.next()?;
        let mut prim = self.root_prims.iter().find(|p| p.name == first)?;
        for name in names {
            prim = prim.child(name)?;
        }
        Some(prim)
    }
}

pub(crate) fn merge_metadata(weaker: &mut Vec<(String, Value)>, stronger: &[(String, Value)]) {
    for (key, value) in stronger {
        match weaker.iter_mut().find(|(k, _)| k == key) {
            Some((_, existing)) => existing.clone_from(value),
            None => weaker.push((key.clone(), value.clone())),
        }
    }
}
