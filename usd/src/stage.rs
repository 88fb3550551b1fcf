//! The stage handle: one composed scene plus its extraction caches.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::Path;

use crate::cache::{
    BuildStats, CacheDomain, CacheState, CachedInstancer, CachedMaterial, CachedMesh,
    CachedPrimInfo, GeometryCache, MaterialCache, PrimCache,
};
use crate::config::StageConfig;
use crate::error::StageError;
use crate::memory::MemoryStage;
use crate::oracle::SceneOracle;

/// An open stage and its lazily built caches.
///
/// Every query takes `&mut self` because it may populate a cache domain on
/// first use. Returned references borrow the stage, so they cannot outlive a
/// [`clear_cache`](Self::clear_cache), an [`invalidate`](Self::invalidate)
/// or [`close`](Self::close).
///
/// ```ignore
/// let mut stage = Stage::<MemoryStage>::open("scene.usda")?;
/// for i in 0..stage.mesh_count() {
///     let mesh = stage.mesh(i)?;
///     println!("{}: {} triangles", mesh.path, mesh.triangle_count());
/// }
/// ```
pub struct Stage<O: SceneOracle = MemoryStage> {
    oracle: O,
    config: StageConfig,
    prims: CacheState<PrimCache>,
    geometry: CacheState<GeometryCache>,
    materials: CacheState<MaterialCache>,
    stats: BuildStats,
}

impl<O: SceneOracle> Stage<O> {
    /// Opens the stage at `path` with the default [`StageConfig`].
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StageError> {
        Self::open_with_config(path, StageConfig::default())
    }

    /// Opens the stage at `path`.
    ///
    /// Fails with [`StageError::FileNotFound`] when the file is missing or
    /// unreadable and [`StageError::Unknown`] for any other failure,
    /// including a panic inside the oracle.
    pub fn open_with_config(path: impl AsRef<Path>, config: StageConfig) -> Result<Self, StageError> {
        crate::profiling::profile_function!();
        let path = path.as_ref();

        let oracle = match catch_unwind(AssertUnwindSafe(|| O::open(path))) {
            Ok(result) => result?,
            Err(payload) => {
                let msg = panic_message(payload.as_ref());
                log::error!("Panic while opening {}: {msg}", path.display());
                return Err(StageError::Unknown(format!("panic during open: {msg}")));
            }
        };

        log::info!("Opened stage {}", path.display());
        Ok(Self::from_oracle_with_config(oracle, config))
    }

    pub fn from_oracle(oracle: O) -> Self {
        Self::from_oracle_with_config(oracle, StageConfig::default())
    }

    pub fn from_oracle_with_config(oracle: O, config: StageConfig) -> Self {
        Self {
            oracle,
            config,
            prims: CacheState::NotBuilt,
            geometry: CacheState::NotBuilt,
            materials: CacheState::NotBuilt,
            stats: BuildStats::default(),
        }
    }

    /// Releases the stage and every cache buffer.
    pub fn close(self) {
        log::debug!(
            "Closing stage after {} cache builds",
            self.stats.total_builds()
        );
    }

    pub fn oracle(&self) -> &O {
        &self.oracle
    }

    pub fn config(&self) -> &StageConfig {
        &self.config
    }

    /// Drops every cache domain. The next query rebuilds what it needs.
    pub fn clear_cache(&mut self) {
        for domain in CacheDomain::ALL {
            self.invalidate(domain);
        }
    }

    /// Drops one domain and every domain derived from it.
    pub fn invalidate(&mut self, domain: CacheDomain) {
        let cleared = match domain {
            CacheDomain::Prims => self.prims.clear(),
            CacheDomain::Geometry => self.geometry.clear(),
            CacheDomain::Materials => self.materials.clear(),
        };
        if cleared {
            log::debug!("Invalidated {domain} cache");
        }
        for &dependent in domain.dependents() {
            self.invalidate(dependent);
        }
    }

    pub fn is_built(&self, domain: CacheDomain) -> bool {
        match domain {
            CacheDomain::Prims => self.prims.is_built(),
            CacheDomain::Geometry => self.geometry.is_built(),
            CacheDomain::Materials => self.materials.is_built(),
        }
    }

    pub fn build_stats(&self) -> BuildStats {
        self.stats
    }

    /// Generation of `domain`; changes every time the domain is rebuilt.
    pub fn generation(&self, domain: CacheDomain) -> u64 {
        self.stats.generation(domain)
    }

    /// Writes the composed stage to `path`. The format follows the extension.
    pub fn export(&self, path: impl AsRef<Path>) -> Result<(), StageError> {
        crate::profiling::profile_function!();
        let path = path.as_ref();
        self.oracle.export(path).map_err(|e| {
            log::error!("Export to {} failed: {e}", path.display());
            StageError::Unknown(e.to_string())
        })?;
        log::info!("Exported stage to {}", path.display());
        Ok(())
    }

    // Domain views

    /// Prim hierarchy cache, built on first use.
    pub fn prims(&mut self) -> &PrimCache {
        let Self {
            oracle,
            config,
            prims,
            stats,
            ..
        } = self;
        prims.get_or_build(|| {
            let cache = PrimCache::build(&*oracle, config);
            let generation = stats.record_build(CacheDomain::Prims);
            log_build(config, CacheDomain::Prims, generation, &[("prims", cache.len())]);
            cache
        })
    }

    /// Geometry cache, built on first use.
    pub fn geometry(&mut self) -> &GeometryCache {
        let Self {
            oracle,
            config,
            geometry,
            stats,
            ..
        } = self;
        geometry.get_or_build(|| {
            let cache = GeometryCache::build(&*oracle, config);
            let generation = stats.record_build(CacheDomain::Geometry);
            log_build(
                config,
                CacheDomain::Geometry,
                generation,
                &[
                    ("meshes", cache.mesh_count()),
                    ("instancers", cache.instancer_count()),
                ],
            );
            cache
        })
    }

    /// Material cache, built on first use together with the geometry it binds to.
    pub fn materials(&mut self) -> &MaterialCache {
        self.geometry();

        let live_generation = self.stats.generation(CacheDomain::Geometry);
        let stale = self
            .materials
            .get()
            .is_some_and(|cache| cache.geometry_generation() != live_generation);
        if stale {
            log::debug!("Material bindings predate geometry generation {live_generation}");
            self.materials.clear();
        }

        let Self {
            oracle,
            config,
            geometry,
            materials,
            stats,
            ..
        } = self;
        materials.get_or_build(|| {
            let empty = GeometryCache::default();
            let geometry = geometry.get().unwrap_or(&empty);
            let cache = MaterialCache::build(&*oracle, geometry, live_generation, config);
            let generation = stats.record_build(CacheDomain::Materials);
            log_build(
                config,
                CacheDomain::Materials,
                generation,
                &[
                    ("materials", cache.material_count()),
                    ("bindings", cache.bindings().len()),
                ],
            );
            cache
        })
    }

    // Geometry queries

    pub fn mesh_count(&mut self) -> usize {
        self.geometry().mesh_count()
    }

    pub fn mesh(&mut self, index: usize) -> Result<&CachedMesh, StageError> {
        self.geometry().mesh(index)
    }

    pub fn mesh_by_path(&mut self, path: &str) -> Result<&CachedMesh, StageError> {
        self.geometry().mesh_by_path(path)
    }

    pub fn instancer_count(&mut self) -> usize {
        self.geometry().instancer_count()
    }

    pub fn instancer(&mut self, index: usize) -> Result<&CachedInstancer, StageError> {
        self.geometry().instancer(index)
    }

    /// Owned copies of every mesh.
    pub fn meshes_owned(&mut self) -> Vec<CachedMesh> {
        self.geometry().meshes().to_vec()
    }

    /// Owned copies of every instancer.
    pub fn instancers_owned(&mut self) -> Vec<CachedInstancer> {
        self.geometry().instancers().to_vec()
    }

    // Material queries

    pub fn material_count(&mut self) -> usize {
        self.materials().material_count()
    }

    pub fn material(&mut self, index: usize) -> Result<&CachedMaterial, StageError> {
        self.materials().material(index)
    }

    pub fn material_by_path(&mut self, path: &str) -> Result<&CachedMaterial, StageError> {
        self.materials().material_by_path(path)
    }

    /// Path of the material bound to mesh `mesh_index`; `""` when unbound.
    pub fn mesh_material_path(&mut self, mesh_index: usize) -> Result<&str, StageError> {
        self.materials().mesh_material_path(mesh_index)
    }

    /// Owned copies of every material.
    pub fn materials_owned(&mut self) -> Vec<CachedMaterial> {
        self.materials().materials().to_vec()
    }

    // Hierarchy queries

    pub fn prim_count(&mut self) -> usize {
        self.prims().len()
    }

    pub fn prim(&mut self, index: usize) -> Result<&CachedPrimInfo, StageError> {
        self.prims().get(index)
    }

    pub fn prim_by_path(&mut self, path: &str) -> Result<&CachedPrimInfo, StageError> {
        self.prims().by_path(path)
    }

    pub fn root_count(&mut self) -> usize {
        self.prims().roots().len()
    }

    pub fn root_path(&mut self, index: usize) -> Result<&str, StageError> {
        self.prims().root_path(index)
    }

    /// Number of direct children of `path`; `"/"` and `""` address the root.
    pub fn children_count(&mut self, path: &str) -> Result<usize, StageError> {
        self.prims().children_of(path).map(<[String]>::len)
    }

    pub fn child_path(&mut self, path: &str, index: usize) -> Result<&str, StageError> {
        self.prims().child_path(path, index)
    }
}

impl<O: SceneOracle> std::fmt::Debug for Stage<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stage")
            .field("prims_built", &self.prims.is_built())
            .field("geometry_built", &self.geometry.is_built())
            .field("materials_built", &self.materials.is_built())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

fn log_build(config: &StageConfig, domain: CacheDomain, generation: u64, counts: &[(&str, usize)]) {
    let summary = counts
        .iter()
        .map(|(name, count)| format!("{count} {name}"))
        .collect::<Vec<_>>()
        .join(", ");
    if config.log_build_stats {
        log::info!("Built {domain} cache (generation {generation}): {summary}");
    } else {
        log::debug!("Built {domain} cache (generation {generation}): {summary}");
    }
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
