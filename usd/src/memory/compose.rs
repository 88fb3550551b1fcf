//! Reference composition: turns a root layer into one flat prim tree.
//!
//! Reference arcs (`@file@</Prim>` or an internal `</Prim>`) graft the
//! target prim's properties and children under the referencing prim. Local
//! opinions are stronger than referenced ones, and earlier references are
//! stronger than later ones. Paths inside a referenced subtree are remapped
//! into the referencing prim's namespace.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::memory::format::{Format, decode};
use crate::memory::layer::{
    AttributeSpec, Layer, MAX_NESTING_DEPTH, PrimSpec, RelationshipSpec, Specifier, Value,
    merge_metadata,
};
use crate::oracle::OracleError;

/// An attribute plus the directory its asset values resolve against.
#[derive(Debug, Clone, PartialEq)]
pub struct ComposedAttribute {
    pub spec: AttributeSpec,
    pub anchor: Option<PathBuf>,
}

/// A composed prim in the flattened arena.
#[derive(Debug, Clone, PartialEq)]
pub struct ComposedPrim {
    pub path: String,
    pub name: String,
    pub specifier: Specifier,
    pub type_name: String,
    /// Authored `active` opinion; absent means active.
    pub active: Option<bool>,
    pub metadata: Vec<(String, Value)>,
    pub attributes: Vec<ComposedAttribute>,
    pub relationships: Vec<RelationshipSpec>,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
}

impl ComposedPrim {
    pub fn attribute(&self, name: &str) -> Option<&ComposedAttribute> {
        self.attributes.iter().find(|a| a.spec.name == name)
    }

    pub fn relationship(&self, name: &str) -> Option<&RelationshipSpec> {
        self.relationships.iter().find(|r| r.name == name)
    }
}

/// Result of composing a root layer.
#[derive(Debug, Default)]
pub struct ComposedStage {
    pub metadata: Vec<(String, Value)>,
    /// Depth-first pre-order; a parent always precedes its children.
    pub prims: Vec<ComposedPrim>,
    pub roots: Vec<usize>,
}

/// Where a layer came from.
#[derive(Debug, Clone)]
struct Source {
    file: Option<PathBuf>,
    dir: Option<PathBuf>,
}

impl Source {
    fn label(&self) -> String {
        self.file
            .as_ref()
            .map_or_else(|| "<memory>".to_string(), |f| f.display().to_string())
    }
}

/// Prim tree under construction.
#[derive(Debug, Clone)]
struct Node {
    name: String,
    specifier: Specifier,
    type_name: String,
    active: Option<bool>,
    metadata: Vec<(String, Value)>,
    attributes: Vec<ComposedAttribute>,
    relationships: Vec<RelationshipSpec>,
    children: Vec<Node>,
}

impl Node {
    fn empty(name: &str, specifier: Specifier) -> Self {
        Self {
            name: name.to_string(),
            specifier,
            type_name: String::new(),
            active: None,
            metadata: Vec::new(),
            attributes: Vec::new(),
            relationships: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Layers `stronger` over this node.
    fn layer_over(&mut self, stronger: Node) {
        if stronger.specifier == Specifier::Def
            || (self.specifier == Specifier::Over && stronger.specifier == Specifier::Class)
        {
            self.specifier = stronger.specifier;
        }
        if !stronger.type_name.is_empty() {
            self.type_name = stronger.type_name;
        }
        if stronger.active.is_some() {
            self.active = stronger.active;
        }
        merge_metadata(&mut self.metadata, &stronger.metadata);

        for attribute in stronger.attributes {
            match self
                .attributes
                .iter_mut()
                .find(|a| a.spec.name == attribute.spec.name)
            {
                Some(existing) => {
                    let has_value = attribute.spec.default.is_some()
                        || !attribute.spec.time_samples.is_empty();
                    existing.spec.merge_stronger(&attribute.spec);
                    if has_value {
                        existing.anchor = attribute.anchor;
                    }
                }
                None => self.attributes.push(attribute),
            }
        }

        for relationship in stronger.relationships {
            match self
                .relationships
                .iter_mut()
                .find(|r| r.name == relationship.name)
            {
                Some(existing) => {
                    if !relationship.targets.is_empty() {
                        existing.targets = relationship.targets;
                    }
                    existing.custom |= relationship.custom;
                    existing.uniform |= relationship.uniform;
                }
                None => self.relationships.push(relationship),
            }
        }

        for child in stronger.children {
            match self.children.iter_mut().find(|c| c.name == child.name) {
                Some(existing) => existing.layer_over(child),
                None => self.children.push(child),
            }
        }
    }

    fn remap(&mut self, from: &str, to: &str) {
        for attribute in &mut self.attributes {
            for connection in &mut attribute.spec.connections {
                remap_path(connection, from, to);
            }
        }
        for relationship in &mut self.relationships {
            for target in &mut relationship.targets {
                remap_path(target, from, to);
            }
        }
        for child in &mut self.children {
            child.remap(from, to);
        }
    }
}

/// Rewrites `path` if it lies at or under `from`.
fn remap_path(path: &mut String, from: &str, to: &str) {
    if let Some(rest) = path.strip_prefix(from) {
        if rest.is_empty() || rest.starts_with('/') || rest.starts_with('.') {
            *path = format!("{to}{rest}");
        }
    }
}

/// Resolves `authored` against `anchor`. Returns the anchored path when the
/// file exists, otherwise an empty string.
pub fn resolve_asset(anchor: Option<&Path>, authored: &str) -> String {
    if authored.is_empty() {
        return String::new();
    }
    let relative = authored.strip_prefix("./").unwrap_or(authored);
    let candidate = match anchor {
        Some(dir) if Path::new(relative).is_relative() => dir.join(relative),
        _ => PathBuf::from(relative),
    };
    if candidate.is_file() {
        candidate.to_string_lossy().into_owned()
    } else {
        String::new()
    }
}

/// Composes layers, loading referenced files on demand.
struct Composer {
    layers: HashMap<PathBuf, Rc<Layer>>,
    stack: Vec<(String, String)>,
}

impl Composer {
    fn load(&mut self, path: PathBuf) -> Result<(Rc<Layer>, Source), OracleError> {
        let source = Source {
            dir: path.parent().map(Path::to_path_buf),
            file: Some(path.clone()),
        };
        if let Some(layer) = self.layers.get(&path) {
            return Ok((layer.clone(), source));
        }

        let bytes = std::fs::read(&path).map_err(|e| {
            OracleError::Composition(format!(
                "cannot read referenced layer {}: {e}",
                path.display()
            ))
        })?;
        let layer = Rc::new(decode(
            &bytes,
            Format::detect(&path, &bytes),
            &path.display().to_string(),
        )?);
        log::debug!("Loaded referenced layer {}", path.display());
        self.layers.insert(path, layer.clone());
        Ok((layer, source))
    }

    fn compose_spec(
        &mut self,
        spec: &PrimSpec,
        layer: &Rc<Layer>,
        source: &Source,
        spec_path: &str,
        depth: usize,
    ) -> Result<Node, OracleError> {
        if depth > MAX_NESTING_DEPTH {
            return Err(OracleError::Composition(format!(
                "{spec_path} nests deeper than {MAX_NESTING_DEPTH} levels"
            )));
        }
        let mut node = Node::empty(&spec.name, Specifier::Over);

        // weakest reference first
        for reference in spec.references.iter().rev() {
            let (ref_layer, ref_source) = if reference.asset.is_empty() {
                (layer.clone(), source.clone())
            } else {
                let relative = reference.asset.strip_prefix("./").unwrap_or(&reference.asset);
                let path = match &source.dir {
                    Some(dir) if Path::new(relative).is_relative() => dir.join(relative),
                    _ => PathBuf::from(relative),
                };
                self.load(path)?
            };

            let target_path = match &reference.prim_path {
                Some(path) => path.clone(),
                None => ref_layer
                    .default_prim()
                    .map(str::to_string)
                    .or_else(|| ref_layer.root_prims.first().map(|p| p.name.clone()))
                    .map(|name| format!("/{name}"))
                    .ok_or_else(|| {
                        OracleError::Composition(format!(
                            "{} has no prim to reference",
                            ref_source.label()
                        ))
                    })?,
            };
            let target = ref_layer.prim_at(&target_path).ok_or_else(|| {
                OracleError::Composition(format!(
                    "reference from {spec_path} to missing prim {target_path} in {}",
                    ref_source.label()
                ))
            })?;

            let key = (ref_source.label(), target_path.clone());
            if self.stack.contains(&key) {
                return Err(OracleError::Composition(format!(
                    "reference cycle at {target_path} in {}",
                    key.0
                )));
            }
            self.stack.push(key);
            let mut referenced = self.compose_spec(target, &ref_layer, &ref_source, &target_path, depth + 1)?;
            self.stack.pop();

            referenced.remap(&target_path, spec_path);
            referenced.name = spec.name.clone();
            node.layer_over(referenced);
        }

        let mut local = Node::empty(&spec.name, spec.specifier);
        local.type_name = spec.type_name.clone();
        local.active = spec.active;
        local.metadata = spec.metadata.clone();
        local.attributes = spec
            .attributes
            .iter()
            .map(|a| ComposedAttribute {
                spec: a.clone(),
                anchor: source.dir.clone(),
            })
            .collect();
        local.relationships = spec.relationships.clone();
        for child in &spec.children {
            let child_path = format!("{spec_path}/{}", child.name);
            local
                .children
                .push(self.compose_spec(child, layer, source, &child_path, depth + 1)?);
        }
        node.layer_over(local);
        Ok(node)
    }
}

/// Composes `layer`. `file` is the layer's own path, if it has one; `dir`
/// anchors relative references and asset paths.
pub fn compose(
    layer: Layer,
    file: Option<PathBuf>,
    dir: Option<PathBuf>,
) -> Result<ComposedStage, OracleError> {
    let source = Source { file, dir };
    let layer = Rc::new(layer);
    let mut composer = Composer {
        layers: HashMap::new(),
        stack: Vec::new(),
    };
    if let Some(file) = &source.file {
        composer.layers.insert(file.clone(), layer.clone());
    }

    let mut stage = ComposedStage {
        metadata: layer.metadata.clone(),
        ..ComposedStage::default()
    };
    for spec in &layer.root_prims {
        let path = format!("/{}", spec.name);
        composer.stack.push((source.label(), path.clone()));
        let node = composer.compose_spec(spec, &layer, &source, &path, 1)?;
        composer.stack.pop();
        let index = flatten(&mut stage.prims, node, None, "");
        stage.roots.push(index);
    }
    Ok(stage)
}

fn flatten(
    prims: &mut Vec<ComposedPrim>,
    node: Node,
    parent: Option<usize>,
    parent_path: &str,
) -> usize {
    let index = prims.len();
    let path = format!("{parent_path}/{}", node.name);
    prims.push(ComposedPrim {
        path: path.clone(),
        name: node.name,
        specifier: node.specifier,
        type_name: node.type_name,
        active: node.active,
        metadata: node.metadata,
        attributes: node.attributes,
        relationships: node.relationships,
        parent,
        children: Vec::new(),
    });
    for child in node.children {
        let child_index = flatten(prims, child, Some(index), &path);
        prims[index].children.push(child_index);
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::usda::parse_layer;

    fn compose_text(text: &str) -> Result<ComposedStage, OracleError> {
        compose(parse_layer(text).unwrap(), None, None)
    }

    fn prim<'a>(stage: &'a ComposedStage, path: &str) -> &'a ComposedPrim {
        stage.prims.iter().find(|p| p.path == path).unwrap()
    }

    #[test]
    fn internal_reference_grafts_and_remaps() {
        let stage = compose_text(
            r#"#usda 1.0
class "Template"
{
    float size = 1
    rel target = </Template/Part>

    def Cube "Part"
    {
        float size = 2
    }
}

def Xform "Instance" (
    references = </Template>
)
{
    float size = 5
}
"#,
        )
        .unwrap();

        let instance = prim(&stage, "/Instance");
        assert_eq!(instance.specifier, Specifier::Def);
        let size = instance.attribute("size").unwrap();
        assert_eq!(size.spec.default, Some(Value::Int(5)));
        assert_eq!(instance.relationship("target").unwrap().targets, ["/Instance/Part"]);
        assert_eq!(prim(&stage, "/Instance/Part").type_name, "Cube");
        assert_eq!(stage.roots.len(), 2);
    }

    #[test]
    fn earlier_reference_is_stronger() {
        let stage = compose_text(
            r#"#usda 1.0
class "A"
{
    int value = 1
}

class "B"
{
    int value = 2
    int only_b = 3
}

def "P" (
    references = [</A>, </B>]
)
{
}
"#,
        )
        .unwrap();
        let p = prim(&stage, "/P");
        assert_eq!(p.attribute("value").unwrap().spec.default, Some(Value::Int(1)));
        assert_eq!(p.attribute("only_b").unwrap().spec.default, Some(Value::Int(3)));
    }

    #[test]
    fn cycles_are_composition_errors() {
        let err = compose_text(
            r#"#usda 1.0
def "A" (
    references = </B>
)
{
}

def "B" (
    references = </A>
)
{
}
"#,
        )
        .unwrap_err();
        assert!(matches!(err, OracleError::Composition(ref m) if m.contains("cycle")), "{err}");
    }

    #[test]
    fn long_reference_chains_are_composition_errors() {
        let chain = |links: usize| {
            let mut text = String::from("#usda 1.0\n");
            for i in 0..links {
                text.push_str(&format!("def \"R{i}\" (\n    references = </R{}>\n)\n{{\n}}\n", i + 1));
            }
            text.push_str(&format!("def \"R{links}\" {{\n}}\n"));
            text
        };
        assert!(compose_text(&chain(16)).is_ok());

        let err = compose_text(&chain(300)).unwrap_err();
        assert!(matches!(err, OracleError::Composition(ref m) if m.contains("nests deeper")), "{err}");
    }

    #[test]
    fn missing_targets_are_composition_errors() {
        assert!(matches!(
            compose_text("#usda 1.0\ndef \"A\" (\n references = </Nope>\n)\n{\n}\n"),
            Err(OracleError::Composition(_))
        ));
        assert!(matches!(
            compose_text("#usda 1.0\ndef \"A\" (\n references = @missing.usda@\n)\n{\n}\n"),
            Err(OracleError::Composition(_))
        ));
    }

    #[test]
    fn arena_is_preorder_with_parents() {
        let stage = compose_text(
            "#usda 1.0\ndef \"A\"\n{\n def \"B\"\n {\n  def \"C\" {}\n }\n def \"D\" {}\n}\n",
        )
        .unwrap();
        let paths: Vec<&str> = stage.prims.iter().map(|p| p.path.as_str()).collect();
        assert_eq!(paths, ["/A", "/A/B", "/A/B/C", "/A/D"]);
        assert_eq!(stage.prims[2].parent, Some(1));
        assert_eq!(stage.prims[0].children, [1, 3]);
    }

    #[test]
    fn path_remapping_respects_boundaries() {
        let mut path = "/Template/Part.size".to_string();
        remap_path(&mut path, "/Template", "/Instance");
        assert_eq!(path, "/Instance/Part.size");

        let mut other = "/TemplateOther".to_string();
        remap_path(&mut other, "/Template", "/Instance");
        assert_eq!(other, "/TemplateOther");
    }

    #[test]
    fn unresolvable_assets_resolve_to_empty() {
        assert_eq!(resolve_asset(None, ""), "");
        assert_eq!(resolve_asset(Some(Path::new("/definitely/not")), "tex.png"), "");
    }
}
