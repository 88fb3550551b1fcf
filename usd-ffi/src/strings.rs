//! NUL-terminated copies of cached strings.
//!
//! Cache records store Rust `String`s. C callers receive pointers into the
//! mirrors kept here, one mirror per cache domain. A mirror is rebuilt when
//! the generation of its domain changes, so it never outlives the records it
//! was copied from by more than one rebuild.

use std::collections::HashMap;
use std::ffi::{CString, c_char};

use redlilium_usd::cache::{GeometryCache, MaterialCache, PrimCache};
use redlilium_usd::{StageError, TextureSlot};

pub(crate) fn c_string(s: &str) -> Result<CString, StageError> {
    CString::new(s).map_err(|_| StageError::Unknown(format!("string contains NUL: {s:?}")))
}

fn c_strings(items: &[String]) -> Result<Vec<CString>, StageError> {
    items.iter().map(|s| c_string(s)).collect()
}

/// Per-domain string mirrors of one stage.
#[derive(Default)]
pub struct StringMirror {
    geometry: Option<GeometryStrings>,
    materials: Option<MaterialStrings>,
    prims: Option<PrimStrings>,
}

impl StringMirror {
    pub fn geometry(
        &mut self,
        generation: u64,
        cache: &GeometryCache,
    ) -> Result<&GeometryStrings, StageError> {
        if self.geometry.as_ref().is_none_or(|m| m.generation != generation) {
            self.geometry = Some(GeometryStrings::new(generation, cache)?);
        }
        self.geometry
            .as_ref()
            .ok_or_else(|| StageError::Unknown("geometry strings missing".into()))
    }

    pub fn materials(
        &mut self,
        generation: u64,
        cache: &MaterialCache,
    ) -> Result<&MaterialStrings, StageError> {
        if self.materials.as_ref().is_none_or(|m| m.generation != generation) {
            self.materials = Some(MaterialStrings::new(generation, cache)?);
        }
        self.materials
            .as_ref()
            .ok_or_else(|| StageError::Unknown("material strings missing".into()))
    }

    pub fn prims(
        &mut self,
        generation: u64,
        cache: &PrimCache,
    ) -> Result<&mut PrimStrings, StageError> {
        if self.prims.as_ref().is_none_or(|m| m.generation != generation) {
            self.prims = Some(PrimStrings::new(generation, cache)?);
        }
        self.prims
            .as_mut()
            .ok_or_else(|| StageError::Unknown("prim strings missing".into()))
    }
}

pub struct GeometryStrings {
    generation: u64,
    pub mesh_paths: Vec<CString>,
    pub instancers: Vec<InstancerStrings>,
}

impl GeometryStrings {
    fn new(generation: u64, cache: &GeometryCache) -> Result<Self, StageError> {
        Ok(Self {
            generation,
            mesh_paths: cache
                .meshes()
                .iter()
                .map(|m| c_string(&m.path))
                .collect::<Result<_, _>>()?,
            instancers: cache
                .instancers()
                .iter()
                .map(|i| InstancerStrings::new(&i.path, &i.prototype_paths))
                .collect::<Result<_, _>>()?,
        })
    }
}

pub struct InstancerStrings {
    pub path: CString,
    prototypes: Vec<CString>,
    /// Pointers into `prototypes`, handed out as `const char* const*`.
    prototype_ptrs: Vec<*const c_char>,
}

// SAFETY: `prototype_ptrs` only points into the heap buffers of
// `prototypes`, which live and move together with this struct.
unsafe impl Send for InstancerStrings {}

impl InstancerStrings {
    fn new(path: &str, prototypes: &[String]) -> Result<Self, StageError> {
        let prototypes = c_strings(prototypes)?;
        let prototype_ptrs = prototypes.iter().map(|p| p.as_ptr()).collect();
        Ok(Self {
            path: c_string(path)?,
            prototypes,
            prototype_ptrs,
        })
    }

    pub fn prototype_count(&self) -> usize {
        self.prototypes.len()
    }

    pub fn prototype_ptrs(&self) -> &[*const c_char] {
        &self.prototype_ptrs
    }
}

pub struct MaterialStrings {
    generation: u64,
    pub materials: Vec<MaterialStringSet>,
    pub bindings: Vec<CString>,
}

pub struct MaterialStringSet {
    pub path: CString,
    /// Indexed like [`TextureSlot::ALL`].
    pub textures: [Option<CString>; 5],
}

impl MaterialStringSet {
    pub fn texture(&self, slot: TextureSlot) -> Option<&CString> {
        let i = TextureSlot::ALL.iter().position(|&s| s == slot)?;
        self.textures[i].as_ref()
    }
}

impl MaterialStrings {
    fn new(generation: u64, cache: &MaterialCache) -> Result<Self, StageError> {
        let materials = cache
            .materials()
            .iter()
            .map(|m| -> Result<MaterialStringSet, StageError> {
                let mut textures: [Option<CString>; 5] = Default::default();
                for (dst, slot) in textures.iter_mut().zip(TextureSlot::ALL) {
                    *dst = m.texture(slot).map(c_string).transpose()?;
                }
                Ok(MaterialStringSet {
                    path: c_string(&m.path)?,
                    textures,
                })
            })
            .collect::<Result<_, _>>()?;
        Ok(Self {
            generation,
            materials,
            bindings: c_strings(cache.bindings())?,
        })
    }
}

pub struct PrimStrings {
    generation: u64,
    pub paths: Vec<CString>,
    pub type_names: Vec<CString>,
    pub roots: Vec<CString>,
    /// Child lists keyed by the parent path as the caller spelled it.
    children: HashMap<String, Vec<CString>>,
}

impl PrimStrings {
    fn new(generation: u64, cache: &PrimCache) -> Result<Self, StageError> {
        let mut paths = Vec::with_capacity(cache.len());
        let mut type_names = Vec::with_capacity(cache.len());
        for prim in cache.iter() {
            paths.push(c_string(&prim.path)?);
            type_names.push(c_string(&prim.type_name)?);
        }
        Ok(Self {
            generation,
            paths,
            type_names,
            roots: c_strings(cache.roots())?,
            children: HashMap::new(),
        })
    }

    /// Child paths of `parent`, mirrored on first request.
    pub fn children(&mut self, cache: &PrimCache, parent: &str) -> Result<&[CString], StageError> {
        if !self.children.contains_key(parent) {
            let children = c_strings(cache.children_of(parent)?)?;
            self.children.insert(parent.to_string(), children);
        }
        self.children
            .get(parent)
            .map(Vec::as_slice)
            .ok_or_else(|| StageError::NotFound(parent.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use redlilium_usd::{MemoryStage, Stage};

    use super::*;

    const SCENE: &str = r#"#usda 1.0
def Xform "World"
{
    def Mesh "A" {}
    def PointInstancer "Scatter"
    {
        rel prototypes = [</World/A>, </World/A>]
    }
}
"#;

    #[test]
    fn mirrors_follow_generations() {
        let mut stage = Stage::from_oracle(MemoryStage::from_usda_str(SCENE, None).unwrap());
        let mut mirror = StringMirror::default();

        stage.geometry();
        let generation = stage.generation(redlilium_usd::CacheDomain::Geometry);
        let first = mirror.geometry(generation, stage.geometry()).unwrap();
        assert_eq!(first.mesh_paths[0].to_str().unwrap(), "/World/A");
        let ptr = first.mesh_paths[0].as_ptr();

        // same generation: same storage
        let again = mirror.geometry(generation, stage.geometry()).unwrap();
        assert_eq!(again.mesh_paths[0].as_ptr(), ptr);

        let instancer = &again.instancers[0];
        assert_eq!(instancer.prototype_count(), 2);
        assert_eq!(instancer.prototype_ptrs().len(), 2);

        stage.clear_cache();
        stage.geometry();
        let next = stage.generation(redlilium_usd::CacheDomain::Geometry);
        assert_ne!(next, generation);
        let rebuilt = mirror.geometry(next, stage.geometry()).unwrap();
        assert_eq!(rebuilt.mesh_paths.len(), 1);
    }

    #[test]
    fn children_mirrored_per_spelling() {
        let mut stage = Stage::from_oracle(MemoryStage::from_usda_str(SCENE, None).unwrap());
        let mut mirror = StringMirror::default();
        stage.prims();
        let generation = stage.generation(redlilium_usd::CacheDomain::Prims);
        let prims = mirror.prims(generation, stage.prims()).unwrap();

        let roots: Vec<String> = prims
            .children(stage.prims(), "/")
            .unwrap()
            .iter()
            .map(|c| c.to_string_lossy().into_owned())
            .collect();
        assert_eq!(roots, ["/World"]);
        assert_eq!(prims.children(stage.prims(), "/World").unwrap().len(), 2);
        assert!(matches!(
            prims.children(stage.prims(), "/Nope"),
            Err(StageError::NotFound(_))
        ));
    }

    #[test]
    fn nul_bytes_are_rejected() {
        assert!(matches!(c_string("a\0b"), Err(StageError::Unknown(_))));
    }
}
