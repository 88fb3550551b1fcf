//! In-memory scene oracle.
//!
//! [`MemoryStage`] reads `.usda`/`.usdc`/`.usd` layers, composes their
//! reference arcs into a single prim arena and answers every
//! [`SceneOracle`] query from it. Export writes the composed (flattened)
//! stage back out in the format implied by the output extension.
//!
//! Traversal visits defined, active prims depth-first. Deactivated prims,
//! `over` prims without an underlying definition and `class` prims are
//! skipped along with their subtrees. Path queries still answer for every
//! composed prim.

pub mod compose;
pub mod format;
pub mod layer;
pub mod usda;
pub mod xform;

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use nalgebra::Matrix4;

use crate::oracle::{AssetPath, Connection, OracleError, SceneOracle, Schema, TimeCode, tokens};

use compose::{ComposedPrim, ComposedStage, compose, resolve_asset};
use format::{Format, decode, encode};
use layer::{AttributeSpec, Layer, PrimSpec, Value};

/// Value of `attribute` at `time`.
///
/// - `Default`: the default value, falling back to the earliest sample.
/// - `EarliestTime`: the earliest sample, falling back to the default.
/// - `At(t)`: the last sample at or before `t` (the first sample before the
///   range), falling back to the default.
///
/// A blocked value reads as absent.
pub(crate) fn sample(attribute: &AttributeSpec, time: TimeCode) -> Option<&Value> {
    let samples = &attribute.time_samples;
    let value = match time {
        TimeCode::Default => attribute
            .default
            .as_ref()
            .or_else(|| samples.first().map(|s| &s.value)),
        TimeCode::EarliestTime => samples
            .first()
            .map(|s| &s.value)
            .or(attribute.default.as_ref()),
        TimeCode::At(t) => {
            let held = samples.partition_point(|s| s.time <= t);
            samples
                .get(held.saturating_sub(1))
                .map(|s| &s.value)
                .or(attribute.default.as_ref())
        }
    };
    value.filter(|v| **v != Value::Blocked)
}

/// Rewrites resolvable asset paths so they no longer depend on the layer
/// they were authored in.
fn anchor_assets(value: &mut Value, anchor: &Path) {
    match value {
        Value::Asset(authored) => {
            let resolved = resolve_asset(Some(anchor), authored);
            if !resolved.is_empty() {
                *authored = resolved;
            }
        }
        Value::Array(items) | Value::Tuple(items) => {
            for item in items {
                anchor_assets(item, anchor);
            }
        }
        _ => {}
    }
}

/// A composed stage held entirely in memory.
#[derive(Debug)]
pub struct MemoryStage {
    stage: ComposedStage,
    by_path: HashMap<String, usize>,
    world: RefCell<HashMap<usize, Matrix4<f64>>>,
}

impl MemoryStage {
    /// Composes an already parsed layer. `base_dir` anchors relative
    /// references and asset paths.
    pub fn from_layer(layer: Layer, base_dir: Option<&Path>) -> Result<Self, OracleError> {
        let stage = compose(layer, None, base_dir.map(Path::to_path_buf))?;
        Ok(Self::from_composed(stage))
    }

    /// Parses and composes `.usda` text.
    pub fn from_usda_str(text: &str, base_dir: Option<&Path>) -> Result<Self, OracleError> {
        let layer = decode(text.as_bytes(), Format::Text, "<memory>")?;
        Self::from_layer(layer, base_dir)
    }

    fn from_composed(stage: ComposedStage) -> Self {
        let by_path = stage
            .prims
            .iter()
            .enumerate()
            .map(|(i, prim)| (prim.path.clone(), i))
            .collect();
        Self {
            stage,
            by_path,
            world: RefCell::new(HashMap::new()),
        }
    }

    /// Layer metadata of the root layer.
    pub fn metadata(&self) -> &[(String, Value)] {
        &self.stage.metadata
    }

    /// The composed stage as a single layer with every arc resolved.
    pub fn flatten(&self) -> Layer {
        Layer {
            metadata: self.stage.metadata.clone(),
            root_prims: self
                .stage
                .roots
                .iter()
                .map(|&i| self.flatten_prim(i))
                .collect(),
        }
    }

    fn flatten_prim(&self, index: usize) -> PrimSpec {
        let prim = &self.stage.prims[index];
        let mut spec = PrimSpec::new(prim.specifier, prim.type_name.clone(), prim.name.clone());
        spec.active = prim.active;
        spec.metadata = prim.metadata.clone();
        spec.attributes = prim
            .attributes
            .iter()
            .map(|a| {
                let mut attribute = a.spec.clone();
                if let Some(anchor) = &a.anchor {
                    if let Some(value) = attribute.default.as_mut() {
                        anchor_assets(value, anchor);
                    }
                    for sample in &mut attribute.time_samples {
                        anchor_assets(&mut sample.value, anchor);
                    }
                }
                attribute
            })
            .collect();
        spec.relationships = prim.relationships.clone();
        spec.children = prim.children.iter().map(|&c| self.flatten_prim(c)).collect();
        spec
    }

    fn prim(&self, path: &str) -> Option<&ComposedPrim> {
        self.by_path.get(path).map(|&i| &self.stage.prims[i])
    }

    fn value(&self, path: &str, attribute: &str, time: TimeCode) -> Option<&Value> {
        let attribute = self.prim(path)?.attribute(attribute)?;
        sample(&attribute.spec, time)
    }

    /// Defined and not deactivated.
    fn is_traversable(&self, index: usize) -> bool {
        let prim = &self.stage.prims[index];
        prim.specifier == layer::Specifier::Def && prim.active != Some(false)
    }

    fn traversable_paths(&self, indices: &[usize]) -> Vec<String> {
        indices
            .iter()
            .filter(|&&i| self.is_traversable(i))
            .map(|&i| self.stage.prims[i].path.clone())
            .collect()
    }

    fn visit(&self, index: usize, out: &mut Vec<String>) {
        if !self.is_traversable(index) {
            return;
        }
        let prim = &self.stage.prims[index];
        out.push(prim.path.clone());
        for &child in &prim.children {
            self.visit(child, out);
        }
    }

    fn world_matrix(&self, index: usize) -> Matrix4<f64> {
        if let Some(m) = self.world.borrow().get(&index) {
            return *m;
        }
        let prim = &self.stage.prims[index];
        let local = xform::local_transform(prim, TimeCode::Default);
        let m = match prim.parent {
            Some(parent) if !local.resets_stack => self.world_matrix(parent) * local.matrix,
            _ => local.matrix,
        };
        self.world.borrow_mut().insert(index, m);
        m
    }

    fn float3_array_value(value: &Value) -> Option<Vec<[f32; 3]>> {
        value
            .as_array()?
            .iter()
            .map(|v| v.as_tuple::<3>().map(|[x, y, z]| [x as f32, y as f32, z as f32]))
            .collect()
    }

    fn forward(&self, prim: &str, relationship: &str, seen: &mut Vec<String>, out: &mut Vec<String>) {
        let key = format!("{prim}.{relationship}");
        if seen.contains(&key) {
            return;
        }
        seen.push(key);
        let Some(rel) = self.prim(prim).and_then(|p| p.relationship(relationship)) else {
            return;
        };
        for target in &rel.targets {
            match Connection::parse(target) {
                Some(c) if self.prim(&c.prim).and_then(|p| p.relationship(&c.attribute)).is_some() => {
                    self.forward(&c.prim, &c.attribute, seen, out);
                }
                _ => out.push(target.clone()),
            }
        }
    }
}

impl SceneOracle for MemoryStage {
    fn open(path: &Path) -> Result<Self, OracleError> {
        crate::profiling::profile_function!();
        let bytes = std::fs::read(path).map_err(|e| OracleError::io(path, e))?;
        let file = path.display().to_string();
        let layer = decode(&bytes, Format::detect(path, &bytes), &file)?;
        let dir = path.parent().map(Path::to_path_buf);
        let stage = compose(layer, Some(PathBuf::from(path)), dir)?;
        log::debug!("Composed {} prims from {file}", stage.prims.len());
        Ok(Self::from_composed(stage))
    }

    fn export(&self, path: &Path) -> Result<(), OracleError> {
        let format = Format::for_output(path).ok_or_else(|| {
            OracleError::Unsupported(format!("no layer format for {}", path.display()))
        })?;
        let bytes = encode(&self.flatten(), format)?;
        std::fs::write(path, bytes).map_err(|e| OracleError::io(path, e))
    }

    fn root_children(&self) -> Vec<String> {
        self.traversable_paths(&self.stage.roots)
    }

    fn traverse(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(self.stage.prims.len());
        for &root in &self.stage.roots {
            self.visit(root, &mut out);
        }
        out
    }

    fn children(&self, prim: &str) -> Vec<String> {
        self.prim(prim)
            .map(|p| self.traversable_paths(&p.children))
            .unwrap_or_default()
    }

    fn type_name(&self, prim: &str) -> String {
        self.prim(prim).map(|p| p.type_name.clone()).unwrap_or_default()
    }

    fn is_active(&self, prim: &str) -> bool {
        self.prim(prim).is_some_and(|p| p.active.unwrap_or(true))
    }

    fn is_a(&self, prim: &str, schema: Schema) -> bool {
        let expected = match schema {
            Schema::Mesh => "Mesh",
            Schema::PointInstancer => "PointInstancer",
            Schema::Material => "Material",
            Schema::Shader => "Shader",
        };
        self.prim(prim).is_some_and(|p| p.type_name == expected)
    }

    fn float3_array(&self, prim: &str, attribute: &str, time: TimeCode) -> Option<Vec<[f32; 3]>> {
        Self::float3_array_value(self.value(prim, attribute, time)?)
    }

    fn float2_array(&self, prim: &str, attribute: &str, time: TimeCode) -> Option<Vec<[f32; 2]>> {
        self.value(prim, attribute, time)?
            .as_array()?
            .iter()
            .map(|v| v.as_tuple::<2>().map(|[u, v]| [u as f32, v as f32]))
            .collect()
    }

    fn int_array(&self, prim: &str, attribute: &str, time: TimeCode) -> Option<Vec<i32>> {
        self.value(prim, attribute, time)?
            .as_array()?
            .iter()
            .map(|v| v.as_i64().and_then(|i| i32::try_from(i).ok()))
            .collect()
    }

    fn float(&self, prim: &str, attribute: &str, time: TimeCode) -> Option<f32> {
        self.value(prim, attribute, time)?.as_f64().map(|v| v as f32)
    }

    fn float3(&self, prim: &str, attribute: &str, time: TimeCode) -> Option<[f32; 3]> {
        self.value(prim, attribute, time)?
            .as_tuple::<3>()
            .map(|[x, y, z]| [x as f32, y as f32, z as f32])
    }

    fn token(&self, prim: &str, attribute: &str) -> Option<String> {
        self.value(prim, attribute, TimeCode::Default)?
            .as_str()
            .map(str::to_string)
    }

    fn asset(&self, prim: &str, attribute: &str) -> Option<AssetPath> {
        let attribute = self.prim(prim)?.attribute(attribute)?;
        let Value::Asset(authored) = sample(&attribute.spec, TimeCode::Default)? else {
            return None;
        };
        Some(AssetPath {
            resolved: resolve_asset(attribute.anchor.as_deref(), authored),
            authored: authored.clone(),
        })
    }

    fn connections(&self, prim: &str, attribute: &str) -> Vec<Connection> {
        self.prim(prim)
            .and_then(|p| p.attribute(attribute))
            .map(|a| a.spec.connections.iter().filter_map(|c| Connection::parse(c)).collect())
            .unwrap_or_default()
    }

    fn forwarded_targets(&self, prim: &str, relationship: &str) -> Vec<String> {
        let mut out = Vec::new();
        self.forward(prim, relationship, &mut Vec::new(), &mut out);
        out
    }

    fn local_to_world(&self, prim: &str) -> Matrix4<f64> {
        self.by_path
            .get(prim)
            .map_or_else(Matrix4::identity, |&i| self.world_matrix(i))
    }

    fn compute_instance_transforms(&self, prim: &str, time: TimeCode) -> Option<Vec<Matrix4<f64>>> {
        let positions = self.float3_array(prim, tokens::POSITIONS, time)?;
        let count = positions.len();
        let matches = |len: usize| len == count;

        if let Some(indices) = self.int_array(prim, tokens::PROTO_INDICES, time) {
            if !matches(indices.len()) {
                log::warn!(
                    "{prim}: {} prototype indices for {count} positions",
                    indices.len()
                );
                return None;
            }
        }

        let orientations = match self.value(prim, tokens::ORIENTATIONS, time) {
            Some(value) => {
                let quats: Vec<[f64; 4]> = value
                    .as_array()?
                    .iter()
                    .map(Value::as_tuple::<4>)
                    .collect::<Option<_>>()?;
                if !matches(quats.len()) {
                    return None;
                }
                Some(quats)
            }
            None => None,
        };
        let scales = match self.float3_array(prim, tokens::SCALES, time) {
            Some(scales) if !matches(scales.len()) => return None,
            other => other,
        };

        Some(
            positions
                .iter()
                .enumerate()
                .map(|(i, &p)| {
                    xform::instance_matrix(
                        p,
                        orientations.as_ref().map(|o| o[i]),
                        scales.as_ref().map(|s| s[i]),
                    )
                })
                .collect(),
        )
    }

    fn compute_bound_material(&self, prim: &str) -> Option<String> {
        let mut current = self.by_path.get(prim).copied();
        while let Some(index) = current {
            let candidate = &self.stage.prims[index];
            if let Some(target) = candidate
                .relationship(tokens::MATERIAL_BINDING)
                .and_then(|r| r.targets.first())
            {
                if self.is_a(target, Schema::Material) {
                    return Some(target.clone());
                }
                log::warn!(
                    "{}: material binding target {target} is not a Material",
                    candidate.path
                );
                return None;
            }
            current = candidate.parent;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use nalgebra::Point3;

    use super::*;

    const SCENE: &str = r#"#usda 1.0
(
    defaultPrim = "World"
)

def Xform "World"
{
    double3 xformOp:translate = (0, 10, 0)
    uniform token[] xformOpOrder = ["xformOp:translate"]

    def Xform "Child"
    {
        float3 xformOp:scale = (2, 2, 2)
        uniform token[] xformOpOrder = ["xformOp:scale"]

        def Xform "Detached"
        {
            uniform token[] xformOpOrder = ["!resetXformStack!"]
        }
    }

    def Scope "Off" (
        active = false
    )
    {
    }

    def PointInstancer "Scatter"
    {
        rel prototypes = </World/Scatter.alias>
        rel alias = [</World/Child>, </World/Off>]
        int[] protoIndices = [0, 1]
        point3f[] positions = [(1, 0, 0), (0, 1, 0)]
        quath[] orientations = [(1, 0, 0, 0), (0, 0, 0, 1)]
        float3[] scales = [(1, 1, 1), (3, 3, 3)]
    }

    def PointInstancer "Mismatched"
    {
        point3f[] positions = [(1, 0, 0)]
        float3[] scales = [(1, 1, 1), (3, 3, 3)]
    }
}

over "Ghost"
{
    def Mesh "Hidden" {}
}

class "Abstract"
{
}

def Material "NotAShader"
{
}

def Shader "BadTarget"
{
    rel material:binding = </World>
}
"#;

    fn stage() -> MemoryStage {
        MemoryStage::from_usda_str(SCENE, None).unwrap()
    }

    #[test]
    fn traversal_skips_undefined_prims() {
        let stage = stage();
        assert_eq!(
            stage.traverse(),
            [
                "/World",
                "/World/Child",
                "/World/Child/Detached",
                "/World/Scatter",
                "/World/Mismatched",
                "/NotAShader",
                "/BadTarget",
            ]
        );
        assert_eq!(stage.root_children(), ["/World", "/NotAShader", "/BadTarget"]);
        assert!(!stage.is_active("/World/Off"));
        assert!(stage.is_active("/World"));
    }

    #[test]
    fn deactivated_subtrees_are_not_traversed() {
        let stage = MemoryStage::from_usda_str(
            r#"#usda 1.0
def Xform "World"
{
    def Mesh "Hidden" (
        active = false
    )
    {
        def Mesh "Inner" {}
    }

    def Mesh "Shown" {}
}
"#,
            None,
        )
        .unwrap();
        assert_eq!(stage.traverse(), ["/World", "/World/Shown"]);
        assert_eq!(stage.children("/World"), ["/World/Shown"]);
        // still answered by path
        assert_eq!(stage.type_name("/World/Hidden"), "Mesh");
        assert!(!stage.is_active("/World/Hidden"));
    }

    #[test]
    fn world_transforms_compose_and_reset() {
        let stage = stage();
        let child = stage.local_to_world("/World/Child");
        let p = child.transform_point(&Point3::new(1.0, 1.0, 1.0));
        assert_eq!(p, Point3::new(2.0, 12.0, 2.0));
        assert_eq!(stage.local_to_world("/World/Child/Detached"), Matrix4::identity());
        assert_eq!(stage.local_to_world("/Missing"), Matrix4::identity());
        // memoized
        assert_eq!(stage.local_to_world("/World/Child"), child);
    }

    #[test]
    fn relationship_targets_are_forwarded() {
        let stage = stage();
        assert_eq!(
            stage.forwarded_targets("/World/Scatter", tokens::PROTOTYPES),
            ["/World/Child", "/World/Off"]
        );
    }

    #[test]
    fn instance_transforms() {
        let stage = stage();
        let transforms = stage
            .compute_instance_transforms("/World/Scatter", TimeCode::Default)
            .unwrap();
        assert_eq!(transforms.len(), 2);
        let p = transforms[1].transform_point(&Point3::new(1.0, 0.0, 0.0));
        assert!((p - Point3::new(-3.0, 1.0, 0.0)).norm() < 1e-9);

        assert!(stage
            .compute_instance_transforms("/World/Mismatched", TimeCode::Default)
            .is_none());
        assert!(stage
            .compute_instance_transforms("/World/Child", TimeCode::Default)
            .is_none());
    }

    #[test]
    fn binding_target_must_be_material() {
        let stage = stage();
        assert_eq!(stage.compute_bound_material("/BadTarget"), None);
        assert_eq!(stage.compute_bound_material("/World/Child"), None);
    }

    #[test]
    fn time_code_resolution() {
        let mut attr = AttributeSpec::new("a", "float");
        assert_eq!(sample(&attr, TimeCode::Default), None);

        attr.default = Some(Value::Int(0));
        attr.set_sample(10.0, Value::Int(10));
        attr.set_sample(20.0, Value::Int(20));
        assert_eq!(sample(&attr, TimeCode::Default), Some(&Value::Int(0)));
        assert_eq!(sample(&attr, TimeCode::EarliestTime), Some(&Value::Int(10)));
        assert_eq!(sample(&attr, TimeCode::At(15.0)), Some(&Value::Int(10)));
        assert_eq!(sample(&attr, TimeCode::At(20.0)), Some(&Value::Int(20)));
        assert_eq!(sample(&attr, TimeCode::At(-5.0)), Some(&Value::Int(10)));

        attr.default = Some(Value::Blocked);
        assert_eq!(sample(&attr, TimeCode::Default), None);
    }

    #[test]
    fn typed_reads() {
        let stage = stage();
        assert_eq!(stage.type_name("/World/Scatter"), "PointInstancer");
        assert!(stage.is_a("/NotAShader", Schema::Material));
        assert!(!stage.is_a("/NotAShader", Schema::Shader));
        assert_eq!(
            stage.int_array("/World/Scatter", tokens::PROTO_INDICES, TimeCode::Default),
            Some(vec![0, 1])
        );
        assert_eq!(stage.float3_array("/World", tokens::POINTS, TimeCode::Default), None);
        assert_eq!(stage.token("/World/Off", "missing"), None);
    }

    #[test]
    fn export_rejects_unknown_extension() {
        let path = std::env::temp_dir().join("redlilium_usd_memory_export.obj");
        assert!(matches!(stage().export(&path), Err(OracleError::Unsupported(_))));
    }

    #[test]
    fn open_missing_file_is_not_found() {
        assert!(matches!(
            MemoryStage::open(Path::new("/nonexistent/scene.usda")),
            Err(OracleError::NotFound(_))
        ));
    }
}
