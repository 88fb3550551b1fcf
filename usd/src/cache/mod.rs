//! Lazily populated extraction caches.
//!
//! A stage owns three independent cache domains. Each domain starts
//! [`CacheState::NotBuilt`], is populated by a single traversal on first
//! access, and stays immutable until it is explicitly invalidated.
//!
//! | Domain | Contents | Depends on |
//! |---|---|---|
//! | [`CacheDomain::Prims`] | [`PrimCache`] | none |
//! | [`CacheDomain::Geometry`] | [`GeometryCache`] | none |
//! | [`CacheDomain::Materials`] | [`MaterialCache`] | geometry (mesh bindings) |

mod geometry;
mod materials;
mod prims;

use std::fmt;

pub use geometry::{CachedInstancer, CachedMesh, GeometryCache};
pub use materials::{CachedMaterial, MaterialCache, TextureSlot, resolve_texture_link};
pub use prims::{CachedPrimInfo, PrimCache};

/// One of the three independently invalidated cache domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheDomain {
    Prims,
    Geometry,
    Materials,
}

impl CacheDomain {
    pub const ALL: [CacheDomain; 3] = [Self::Prims, Self::Geometry, Self::Materials];

    /// Domains whose contents are derived from this one and must be dropped with it.
    pub fn dependents(self) -> &'static [CacheDomain] {
        match self {
            Self::Geometry => &[Self::Materials],
            Self::Prims | Self::Materials => &[],
        }
    }

    fn slot(self) -> usize {
        match self {
            Self::Prims => 0,
            Self::Geometry => 1,
            Self::Materials => 2,
        }
    }
}

impl fmt::Display for CacheDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Prims => f.write_str("prims"),
            Self::Geometry => f.write_str("geometry"),
            Self::Materials => f.write_str("materials"),
        }
    }
}

/// Build state of a single domain.
#[derive(Debug, Default)]
pub enum CacheState<T> {
    #[default]
    NotBuilt,
    Built(T),
}

impl<T> CacheState<T> {
    pub fn is_built(&self) -> bool {
        matches!(self, Self::Built(_))
    }

    pub fn get(&self) -> Option<&T> {
        match self {
            Self::Built(value) => Some(value),
            Self::NotBuilt => None,
        }
    }

    /// Returns the built value, running `build` first if necessary.
    pub fn get_or_build(&mut self, build: impl FnOnce() -> T) -> &T {
        if let Self::NotBuilt = self {
            *self = Self::Built(build());
        }
        match self {
            Self::Built(value) => value,
            Self::NotBuilt => unreachable!("cache state was just built"),
        }
    }

    /// Drops the built value. Returns whether anything was dropped.
    pub fn clear(&mut self) -> bool {
        matches!(std::mem::take(self), Self::Built(_))
    }
}

/// Per-domain build counters and generations.
///
/// `builds` counts completed populations; it only grows, so two reads with
/// no invalidation in between can prove a domain was built at most once.
/// `generation` changes whenever a domain is rebuilt and is what the C
/// boundary uses to decide when borrowed strings must be regenerated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildStats {
    builds: [u64; 3],
    generations: [u64; 3],
}

impl BuildStats {
    /// Number of times `domain` has been populated.
    pub fn builds(&self, domain: CacheDomain) -> u64 {
        self.builds[domain.slot()]
    }

    /// Current generation of `domain`; 0 means never built.
    pub fn generation(&self, domain: CacheDomain) -> u64 {
        self.generations[domain.slot()]
    }

    /// Total number of builds across all domains.
    pub fn total_builds(&self) -> u64 {
        self.builds.iter().sum()
    }

    pub(crate) fn record_build(&mut self, domain: CacheDomain) -> u64 {
        let slot = domain.slot();
        self.builds[slot] += 1;
        self.generations[slot] += 1;
        self.generations[slot]
    }
}
