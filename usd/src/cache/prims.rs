//! Prim hierarchy cache: a depth-first snapshot of the composed scene graph.

use std::collections::HashMap;

use crate::config::StageConfig;
use crate::error::{RecordKind, StageError};
use crate::oracle::SceneOracle;

/// Hierarchy record for one prim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedPrimInfo {
    pub path: String,
    /// Schema type name; empty for typeless prims.
    pub type_name: String,
    pub active: bool,
    /// Direct child paths in authored order.
    pub children: Vec<String>,
}

impl CachedPrimInfo {
    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }
}

/// Every prim of the stage in traversal order, plus the root-level paths.
///
/// Record positions match the oracle's depth-first traversal exactly, so an
/// index obtained from one build addresses the same prim until the domain is
/// invalidated.
#[derive(Debug, Default)]
pub struct PrimCache {
    prims: Vec<CachedPrimInfo>,
    roots: Vec<String>,
    index: Option<HashMap<String, usize>>,
}

/// True for the spellings that address the pseudo-root.
pub(crate) fn is_root_alias(path: &str) -> bool {
    path.is_empty() || path == "/"
}

impl PrimCache {
    pub fn build<O: SceneOracle + ?Sized>(oracle: &O, config: &StageConfig) -> Self {
        crate::profiling::profile_function!();

        let roots = oracle.root_children();
        let prims: Vec<CachedPrimInfo> = oracle
            .traverse()
            .into_iter()
            .map(|path| CachedPrimInfo {
                type_name: oracle.type_name(&path),
                active: oracle.is_active(&path),
                children: oracle.children(&path),
                path,
            })
            .collect();

        let index = config.path_index.then(|| {
            prims
                .iter()
                .enumerate()
                .map(|(i, prim)| (prim.path.clone(), i))
                .collect()
        });

        crate::profiling::profile_records!("usd prims", prims.len());
        Self {
            prims,
            roots,
            index,
        }
    }

    pub fn len(&self) -> usize {
        self.prims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prims.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CachedPrimInfo> {
        self.prims.iter()
    }

    pub fn get(&self, index: usize) -> Result<&CachedPrimInfo, StageError> {
        self.prims
            .get(index)
            .ok_or_else(|| StageError::invalid_index(RecordKind::Prim, index, self.prims.len()))
    }

    /// Traversal position of the prim at `path`.
    pub fn index_of(&self, path: &str) -> Option<usize> {
        match &self.index {
            Some(index) => index.get(path).copied(),
            None => self.prims.iter().position(|p| p.path == path),
        }
    }

    /// The prim at `path`. The pseudo-root is not a recorded prim.
    pub fn by_path(&self, path: &str) -> Result<&CachedPrimInfo, StageError> {
        self.index_of(path)
            .map(|i| &self.prims[i])
            .ok_or_else(|| StageError::NotFound(path.to_string()))
    }

    /// Paths of the pseudo-root's direct children.
    pub fn roots(&self) -> &[String] {
        &self.roots
    }

    pub fn root_path(&self, index: usize) -> Result<&str, StageError> {
        self.roots
            .get(index)
            .map(String::as_str)
            .ok_or_else(|| StageError::invalid_index(RecordKind::RootPrim, index, self.roots.len()))
    }

    /// Direct children of `path`; `"/"` and `""` both list the root prims.
    pub fn children_of(&self, path: &str) -> Result<&[String], StageError> {
        if is_root_alias(path) {
            return Ok(&self.roots);
        }
        self.by_path(path).map(|prim| prim.children.as_slice())
    }

    pub fn child_path(&self, path: &str, index: usize) -> Result<&str, StageError> {
        let children = self.children_of(path)?;
        children
            .get(index)
            .map(String::as_str)
            .ok_or_else(|| StageError::invalid_index(RecordKind::ChildPrim, index, children.len()))
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::memory::MemoryStage;

    const HIERARCHY: &str = r#"#usda 1.0

def Xform "World"
{
    def Mesh "Body"
    {
    }

    def Xform "Hidden" (
        active = false
    )
    {
        def Scope "Inner"
        {
        }
    }
}

def "Loose"
{
}
"#;

    fn cache(path_index: bool) -> PrimCache {
        let stage = MemoryStage::from_usda_str(HIERARCHY, None).unwrap();
        let config = StageConfig {
            path_index,
            ..StageConfig::default()
        };
        PrimCache::build(&stage, &config)
    }

    #[rstest]
    #[case::indexed(true)]
    #[case::linear_scan(false)]
    fn records_follow_traversal_order(#[case] path_index: bool) {
        let prims = cache(path_index);
        let paths: Vec<&str> = prims.iter().map(|p| p.path.as_str()).collect();
        assert_eq!(
            paths,
            ["/World", "/World/Body", "/Loose"]
        );
        assert_eq!(prims.index_of("/Loose"), Some(2));
        assert_eq!(prims.index_of("/Nope"), None);
    }

    #[test]
    fn records_carry_type_and_activity() {
        let prims = cache(true);
        let world = prims.by_path("/World").unwrap();
        assert_eq!(world.type_name, "Xform");
        assert!(world.active);
        assert_eq!(world.children, vec!["/World/Body".to_string()]);
        assert!(world.has_children());

        // deactivated subtrees are not recorded
        assert!(matches!(prims.by_path("/World/Hidden"), Err(StageError::NotFound(_))));
        assert!(prims.index_of("/World/Hidden/Inner").is_none());

        let loose = prims.by_path("/Loose").unwrap();
        assert_eq!(loose.type_name, "");
        assert!(loose.active);
        assert_eq!(loose.child_count(), 0);
    }

    #[test]
    fn root_aliases_list_the_same_children() {
        let prims = cache(true);
        assert_eq!(prims.children_of("/").unwrap(), prims.children_of("").unwrap());
        assert_eq!(prims.roots(), ["/World".to_string(), "/Loose".to_string()]);
        assert_eq!(prims.child_path("", 1).unwrap(), "/Loose");
    }

    #[test]
    fn pseudo_root_is_not_a_record() {
        let prims = cache(true);
        assert!(matches!(prims.by_path("/"), Err(StageError::NotFound(_))));
    }

    #[test]
    fn out_of_range_lookups_fail() {
        let prims = cache(true);
        assert!(matches!(
            prims.get(prims.len()),
            Err(StageError::InvalidIndex {
                domain: RecordKind::Prim,
                index: 5,
                count: 5
            })
        ));
        assert!(prims.root_path(2).is_err());
        assert!(matches!(
            prims.child_path("/World", 2),
            Err(StageError::InvalidIndex {
                domain: RecordKind::ChildPrim,
                ..
            })
        ));
        assert!(matches!(
            prims.children_of("/Missing"),
            Err(StageError::NotFound(_))
        ));
    }
}
